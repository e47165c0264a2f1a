//! REPL – Read-Eval-Print Loop for the Stagehand operator shell.
//!
//! Supported slash-commands:
//!   /start              – start a run of every enabled task
//!   /stop               – cancel the pending tasks
//!   /status             – orchestrator status
//!   /tasks              – task table
//!   /enable <task>      – enable a task
//!   /disable <task>     – disable a task
//!   /model [name]       – list models, or switch the active one
//!   /location [refresh] – show (or reclassify) the current location
//!   /help               – show this list
//!   /quit | /exit       – shut down and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stagehand_runtime::Orchestrator;
use stagehand_types::{ControlSurface, TaskStatus};

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Tasks,
    Enable(String),
    Disable(String),
    Model(Option<String>),
    Location { refresh: bool },
    Help,
    Quit,
}

/// Whether the REPL keeps reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or("");
    let arg = words.next().map(str::to_string);
    let command = match (head, arg) {
        ("/start", None) => Command::Start,
        ("/stop", None) => Command::Stop,
        ("/status", None) => Command::Status,
        ("/tasks", None) => Command::Tasks,
        ("/enable", Some(name)) => Command::Enable(name),
        ("/disable", Some(name)) => Command::Disable(name),
        ("/enable" | "/disable", None) => return Err(format!("usage: {head} <task>")),
        ("/model", name) => Command::Model(name),
        ("/location", None) => Command::Location { refresh: false },
        ("/location", Some(arg)) if arg == "refresh" => Command::Location { refresh: true },
        ("/help", None) => Command::Help,
        ("/quit" | "/exit", None) => Command::Quit,
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    if words.next().is_some() {
        return Err(format!("too many arguments for {head}"));
    }
    Ok(command)
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(orch: &Orchestrator, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "stagehand>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Ok(command) => {
                if execute(orch, command) == Flow::Quit {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
}

/// Run one command against the orchestrator and print the outcome.
pub fn execute(orch: &Orchestrator, command: Command) -> Flow {
    match command {
        Command::Start => {
            if orch.start_tasks() {
                println!("{}", "✓ Task run started.".green());
            } else {
                println!("{}", "A task run is already active.".yellow());
            }
        }
        Command::Stop => {
            if orch.stop_tasks() {
                println!("{}", "✓ Pending tasks canceled.".green());
            } else {
                println!("{}", "No task run is active.".yellow());
            }
        }
        Command::Status => cmd_status(orch),
        Command::Tasks => cmd_tasks(orch),
        Command::Enable(name) => cmd_toggle(orch, &name, true),
        Command::Disable(name) => cmd_toggle(orch, &name, false),
        Command::Model(None) => cmd_models(orch),
        Command::Model(Some(name)) => match orch.switch_model(&name) {
            Ok(()) => println!("{} {}", "✓ Active model set to".green(), name.bold()),
            Err(e) => println!("{}: {}", "Model switch failed".red(), e),
        },
        Command::Location { refresh } => {
            let location = if refresh {
                Some(orch.refresh_location())
            } else {
                orch.location()
            };
            match location {
                Some(l) => println!("  Location : {}", l.to_string().bold()),
                None => println!("  Location : {}", "not classified yet".dimmed()),
            }
        }
        Command::Help => cmd_help(),
        Command::Quit => {
            println!("{}", "Goodbye.".green());
            return Flow::Quit;
        }
    }
    Flow::Continue
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Stagehand Commands".bold().underline());
    println!("  {}              – start a run of every enabled task", "/start".bold().cyan());
    println!("  {}               – cancel the pending tasks", "/stop".bold().cyan());
    println!("  {}             – orchestrator status", "/status".bold().cyan());
    println!("  {}              – task table", "/tasks".bold().cyan());
    println!("  {} – enable or disable a task", "/enable  /disable <task>".bold().cyan());
    println!("  {}       – list models or switch the active one", "/model [name]".bold().cyan());
    println!("  {} – show or reclassify the location", "/location [refresh]".bold().cyan());
    println!("  {}        – shut down and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(orch: &Orchestrator) {
    let status = orch.status();
    let on_off = |b: bool| if b { "running".green() } else { "stopped".yellow() };
    println!("{}", "Status".bold().underline());
    println!("  Perception : {}", on_off(status.perception_running));
    println!("  Tasks      : {}", on_off(status.tasks_running));
    println!(
        "  Location   : {}",
        status
            .location
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "  Model      : {}",
        status.active_model.as_deref().unwrap_or("-").bold()
    );
    println!("  Frames     : {}", status.frames_processed);
}

fn cmd_tasks(orch: &Orchestrator) {
    println!("{}", "Tasks".bold().underline());
    for task in orch.task_list() {
        let status = match task.status {
            TaskStatus::Pending => "PENDING".dimmed(),
            TaskStatus::Running => "RUNNING".cyan(),
            TaskStatus::Success => "SUCCESS".green(),
            TaskStatus::Failed => "FAILED".red(),
            TaskStatus::Canceled => "CANCELED".yellow(),
        };
        let enabled = if task.enabled { "●".green() } else { "○".dimmed() };
        let last = task
            .last_run_time
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {} {:<22} {:<9} last run {}  {}",
            enabled,
            task.name.bold(),
            status,
            last,
            task.description.dimmed()
        );
    }
}

fn cmd_toggle(orch: &Orchestrator, name: &str, enabled: bool) {
    if orch.set_task_enabled(name, enabled) {
        let verb = if enabled { "enabled" } else { "disabled" };
        println!("{} {} {}", "✓".green(), name.bold(), verb);
    } else {
        println!("{} '{}'", "Unknown task:".red(), name.yellow());
    }
}

fn cmd_models(orch: &Orchestrator) {
    let active = orch.active_model();
    println!("{}", "Detection Models".bold().underline());
    for name in orch.model_names() {
        let marker = if Some(&name) == active.as_ref() { "▶" } else { " " };
        println!("  {} {}", marker.green(), name.bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_hal::sim::{SimDetector, SimRig};
    use stagehand_types::Location;

    fn orchestrator(rig: &SimRig) -> Arc<Orchestrator> {
        let orch = Orchestrator::builder()
            .device(rig.device.clone())
            .recognizer(rig.recognizer.clone())
            .probe(rig.probe.clone())
            .model("base_ui", rig.detector.clone())
            .model("producer", Arc::new(SimDetector::new(rig.scene.clone())))
            .build()
            .unwrap();
        stagehand_runtime::register_builtin(&orch).unwrap();
        orch
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse("/start"), Ok(Command::Start));
        assert_eq!(parse("  /status  "), Ok(Command::Status));
        assert_eq!(parse("/enable dispatch_work"), Ok(Command::Enable("dispatch_work".into())));
        assert_eq!(parse("/model"), Ok(Command::Model(None)));
        assert_eq!(parse("/model producer"), Ok(Command::Model(Some("producer".into()))));
        assert_eq!(parse("/location refresh"), Ok(Command::Location { refresh: true }));
        assert_eq!(parse("/exit"), Ok(Command::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("/disable").is_err());
        assert!(parse("/start now").is_err());
        assert!(parse("/location somewhere").is_err());
        assert!(parse("hello").is_err());
    }

    #[test]
    fn toggles_and_switches_through_the_orchestrator() {
        let rig = SimRig::builder().build();
        let orch = orchestrator(&rig);

        assert_eq!(execute(&orch, Command::Disable("dispatch_work".into())), Flow::Continue);
        let dispatch = orch
            .task_list()
            .into_iter()
            .find(|t| t.name == "dispatch_work")
            .unwrap();
        assert!(!dispatch.enabled);

        execute(&orch, Command::Model(Some("producer".into())));
        assert_eq!(orch.active_model().as_deref(), Some("producer"));
        execute(&orch, Command::Model(Some("missing".into())));
        assert_eq!(orch.active_model().as_deref(), Some("producer"));
    }

    #[test]
    fn location_refresh_classifies() {
        let rig = SimRig::builder().build();
        let orch = orchestrator(&rig);
        execute(&orch, Command::Location { refresh: true });
        assert_eq!(orch.location(), Some(Location::Unknown));
    }

    #[test]
    fn quit_ends_the_loop() {
        let rig = SimRig::builder().build();
        let orch = orchestrator(&rig);
        assert_eq!(execute(&orch, Command::Quit), Flow::Quit);
        assert_eq!(execute(&orch, Command::Help), Flow::Continue);
    }
}
