//! Command execution.

use crate::Commands;
use colored::Colorize;
use procflow_core::{
    read_definition_file, Config, ProcessDefinition, ProcessEngine, ProcessInstance, VarValue,
    Variables,
};
use std::path::Path;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(
    engine: &ProcessEngine,
    config: &Config,
    cmd: Commands,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl { .. } => unreachable!(),

        Commands::Validate { files } => {
            let mut output = String::new();
            let mut failed = 0;

            for file in &files {
                match compile_file(file) {
                    Ok(def) => output.push_str(&format!(
                        "{} {} ({}: {} nodes, {} edges, checksum {})\n",
                        "Valid".green(),
                        file.display(),
                        def.key.cyan(),
                        def.nodes().len(),
                        def.edges().len(),
                        def.checksum
                    )),
                    Err(e) => {
                        failed += 1;
                        output.push_str(&format!(
                            "{} {}: {}\n",
                            "Invalid".red(),
                            file.display(),
                            e
                        ));
                    }
                }
            }

            if failed > 0 {
                return Err(format!(
                    "{}{} of {} definitions failed validation",
                    output,
                    failed,
                    files.len()
                )
                .into());
            }
            Ok(output.trim_end().to_string())
        }

        Commands::Run {
            file,
            start_before,
            vars,
            complete,
        } => {
            let deployed = engine.deploy_file(&file)?;
            let mut output = format!(
                "{} {} (checksum: {})\n",
                if deployed.created {
                    "Deployed".green()
                } else {
                    "Already deployed".yellow()
                },
                deployed.key.cyan(),
                deployed.checksum
            );

            let mut builder = engine.create_instance_by_key(&deployed.key);
            if let Some(node) = start_before {
                builder = builder.start_before_activity(node);
            }
            if let Some(vars) = vars {
                builder = builder.set_variables(parse_vars(&vars)?);
            }
            let mut instance = builder.execute()?;
            output.push_str(&format!(
                "{} instance {}\n  {}\n",
                "Started".green(),
                instance.id.cyan(),
                describe_state(&instance)
            ));

            for vars in &complete {
                let vars = parse_vars(vars)?;
                let result = engine.complete(&mut instance, &vars)?;
                output.push_str(&format!(
                    "{} {}\n  {}\n",
                    "Completed".green(),
                    result.completed_task.cyan(),
                    describe_state(&instance)
                ));
            }

            output.push_str(&format!(
                "{}: {}",
                "Variables".dimmed(),
                serde_json::to_string(instance.variables())?
            ));
            Ok(output)
        }

        Commands::PrintConfig => Ok(config.to_yaml()?.trim_end().to_string()),
    }
}

/// Reads and compiles a definition file without deploying it.
pub fn compile_file(path: &Path) -> Result<ProcessDefinition, procflow_core::CoreError> {
    ProcessDefinition::compile(read_definition_file(path)?)
}

/// Describes where an instance waits.
pub fn describe_state(instance: &ProcessInstance) -> String {
    match instance.current_task() {
        Some(task) => format!(
            "waiting at {} ({})",
            task.id.yellow(),
            task.display_name()
        ),
        None => "ended".green().to_string(),
    }
}

/// Parses a variable argument.
///
/// Accepts a JSON object, `@file.json`, or whitespace/comma separated
/// `name=value` pairs where `true`/`false` become booleans and integers
/// become ints.
pub fn parse_vars(arg: &str) -> Result<Variables, Box<dyn std::error::Error>> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Ok(Variables::new());
    }

    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&content)?);
    }
    if arg.starts_with('{') {
        return Ok(serde_json::from_str(arg)?);
    }

    let mut vars = Variables::new();
    for pair in arg
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
    {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got '{}'", pair))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("missing variable name in '{}'", pair).into());
        }
        vars.insert(name, VarValue::parse_literal(value.trim()));
    }
    Ok(vars)
}
