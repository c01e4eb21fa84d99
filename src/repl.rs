//! Interactive REPL.

use crate::commands::{describe_state, parse_vars};
use colored::Colorize;
use procflow_core::{ProcessEngine, ProcessInstance};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::collections::BTreeMap;
use std::path::PathBuf;

const HELP_TEXT: &str = r#"
Available commands:
  help                               Show this help

  deploy <file>                      Deploy a definition file
  defs                               List deployed definitions
  show-def <key>                     Show a definition as YAML

  start <key> [--before <node>] [vars]  Start an instance
  complete <instance_id> [vars]      Complete the task an instance waits at
  get <instance_id>                  Show an instance
  list                               List instances of this session
  coverage <key>                     Show nodes and flows not yet visited

  quit, exit                         Exit the REPL

vars: a JSON object, @file.json, or name=value pairs (e.g. approved=true)
"#;

/// Instances started during the session, keyed by ID.
#[derive(Default)]
struct Session {
    instances: BTreeMap<String, ProcessInstance>,
}

pub fn run(engine: ProcessEngine, files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "procflow REPL".bold().cyan());

    for file in files {
        match engine.deploy_file(file) {
            Ok(result) => println!(
                "{} {} from {}",
                "Deployed".green(),
                result.key.cyan(),
                file.display()
            ),
            Err(e) => println!("{}: {}: {}", "Error".red(), file.display(), e),
        }
    }

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".procflow_history"))
        .unwrap_or_else(|_| ".procflow_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let mut session = Session::default();
    loop {
        let prompt = format!("{} ", "procflow>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&engine, &mut session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    Ok(())
}

fn execute_repl_command(
    engine: &ProcessEngine,
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "deploy" => {
            if args.is_empty() {
                return Ok(Some("Usage: deploy <file>".to_string()));
            }
            let result = engine.deploy_file(args[0])?;
            Ok(Some(format!(
                "{} {} (checksum: {})",
                if result.created {
                    "Deployed".green()
                } else {
                    "Exists".yellow()
                },
                result.key.cyan(),
                result.checksum
            )))
        }

        "defs" => {
            let keys = engine.list_definitions();
            if keys.is_empty() {
                return Ok(Some("No definitions".yellow().to_string()));
            }
            let mut output = String::new();
            for key in keys {
                let def = engine.get_definition(&key)?;
                output.push_str(&format!(
                    "  {} [{} user tasks, checksum {}]\n",
                    key.cyan(),
                    def.user_tasks().count(),
                    def.checksum
                ));
            }
            Ok(Some(output))
        }

        "show-def" | "sd" => {
            if args.is_empty() {
                return Ok(Some("Usage: show-def <key>".to_string()));
            }
            let def = engine.get_definition(args[0])?;
            Ok(Some(def.to_yaml()?))
        }

        "start" | "s" => {
            if args.is_empty() {
                return Ok(Some(
                    "Usage: start <key> [--before <node>] [vars]".to_string(),
                ));
            }
            let mut builder = engine.create_instance_by_key(args[0]);
            let mut rest = &args[1..];
            if rest.first() == Some(&"--before") {
                let Some(node) = rest.get(1) else {
                    return Ok(Some("Usage: start <key> --before <node> [vars]".to_string()));
                };
                builder = builder.start_before_activity(*node);
                rest = &rest[2..];
            }
            builder = builder.set_variables(parse_vars(&rest.join(" "))?);

            let instance = builder.execute()?;
            let output = format!(
                "{} {}\n  {}",
                "Started".green(),
                instance.id.cyan(),
                describe_state(&instance)
            );
            session.instances.insert(instance.id.clone(), instance);
            Ok(Some(output))
        }

        "complete" | "c" => {
            if args.is_empty() {
                return Ok(Some("Usage: complete <instance_id> [vars]".to_string()));
            }
            let instance = session
                .instances
                .get_mut(args[0])
                .ok_or_else(|| format!("unknown instance: {}", args[0]))?;
            let vars = parse_vars(&args[1..].join(" "))?;
            let result = engine.complete(instance, &vars)?;
            Ok(Some(format!(
                "{} {} via {}\n  {}",
                "Completed".green(),
                result.completed_task.cyan(),
                result.path.join(" -> "),
                describe_state(instance)
            )))
        }

        "get" | "g" => {
            if args.is_empty() {
                return Ok(Some("Usage: get <instance_id>".to_string()));
            }
            let instance = session
                .instances
                .get(args[0])
                .ok_or_else(|| format!("unknown instance: {}", args[0]))?;
            Ok(Some(serde_json::to_string_pretty(&instance.snapshot())?))
        }

        "list" | "l" => {
            if session.instances.is_empty() {
                return Ok(Some("No instances".yellow().to_string()));
            }
            let mut output = String::new();
            for (id, instance) in &session.instances {
                output.push_str(&format!(
                    "  {} {} {}\n",
                    id.cyan(),
                    instance.definition().key,
                    describe_state(instance)
                ));
            }
            Ok(Some(output))
        }

        "coverage" | "cov" => {
            if args.is_empty() {
                return Ok(Some("Usage: coverage <key>".to_string()));
            }
            let report = engine.coverage(args[0])?;
            let mut output = format!(
                "{} {:.1}% ({}/{} nodes, {}/{} flows)",
                report.process.cyan(),
                report.percent(),
                report.nodes_covered,
                report.nodes_total,
                report.flows_covered,
                report.flows_total
            );
            for node in &report.missed_nodes {
                output.push_str(&format!("\n  {} node {}", "missed".yellow(), node));
            }
            for flow in &report.missed_flows {
                output.push_str(&format!("\n  {} flow {}", "missed".yellow(), flow));
            }
            Ok(Some(output))
        }

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_engine() -> ProcessEngine {
        let engine = ProcessEngine::default();
        engine
            .deploy_file(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("definitions/larger_process.yaml"))
            .unwrap();
        engine
    }

    fn run_line(engine: &ProcessEngine, session: &mut Session, line: &str) -> String {
        execute_repl_command(engine, session, line).unwrap().unwrap()
    }

    #[test]
    fn test_start_and_complete() {
        colored::control::set_override(false);
        let engine = session_engine();
        let mut session = Session::default();

        let output = run_line(
            &engine,
            &mut session,
            "start LargerProcess --before isSubjectToClauseT",
        );
        assert!(output.contains("waiting at isSubjectToClauseT (task2)"));

        let id = session.instances.keys().next().unwrap().clone();
        let output = run_line(
            &engine,
            &mut session,
            &format!("complete {} prc_is_subject_to_clause_t=true", id),
        );
        assert!(output.contains("waiting at issueApprovalCode (task4)"));

        let output = run_line(&engine, &mut session, &format!("get {}", id));
        let snapshot: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(snapshot["task"], "issueApprovalCode");
        assert_eq!(snapshot["variables"]["prc_is_subject_to_clause_t"], true);
    }

    #[test]
    fn test_coverage_command() {
        colored::control::set_override(false);
        let engine = session_engine();
        let mut session = Session::default();

        run_line(&engine, &mut session, "start LargerProcess");
        let output = run_line(&engine, &mut session, "coverage LargerProcess");
        assert!(output.starts_with("LargerProcess"));
        assert!(output.contains("(2/17 nodes, 1/22 flows)"));
        assert!(output.contains("missed flow projectRegistration -> isSubjectToClauseT"));
        assert!(execute_repl_command(&engine, &mut session, "coverage Nope").is_err());
    }

    #[test]
    fn test_unknown_instance_is_an_error() {
        let engine = session_engine();
        let mut session = Session::default();
        assert!(execute_repl_command(&engine, &mut session, "complete nope").is_err());
        assert!(execute_repl_command(&engine, &mut session, "get nope").is_err());
    }

    #[test]
    fn test_quit_and_usage() {
        let engine = session_engine();
        let mut session = Session::default();
        assert!(execute_repl_command(&engine, &mut session, "quit")
            .unwrap()
            .is_none());
        assert!(run_line(&engine, &mut session, "start").starts_with("Usage"));
        assert!(run_line(&engine, &mut session, "defs").contains("LargerProcess"));
    }
}
