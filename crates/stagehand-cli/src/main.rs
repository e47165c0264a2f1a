//! `stagehand-cli` – Stagehand Command Line Interface
//!
//! This binary is the entry point for the Stagehand stack.  It:
//!
//! 1. Loads `~/.stagehand/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Attaches to the (headless, simulated) game window, loads the detection
//!    models and starts the perception loop.
//! 3. Serves the **cockpit** (HTTP + WebSocket remote control) on the
//!    configured port.
//! 4. Drops the operator into an **interactive REPL** (`/start`, `/status`,
//!    `/tasks`, `/model`, `/help`, ...).
//! 5. Intercepts **Ctrl-C** to cancel pending tasks, stop the perception loop
//!    and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use stagehand_cockpit::CockpitServer;
use stagehand_hal::sim::{SimDetector, SimRig};
use stagehand_memory::SimilarityStore;
use stagehand_runtime::{Orchestrator, register_builtin, register_builtin_middleware};
use stagehand_types::StageError;

fn main() {
    // Hold the guard for the whole process so pending spans are flushed.
    let _tracing = stagehand_runtime::init_tracing("stagehand-cli");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Orchestrator ──────────────────────────────────────────────────────
    let orch = match boot(&cfg) {
        Ok(orch) => orch,
        Err(e) => {
            error!(error = %e, "startup failed");
            println!("{}: {}", "Startup failed".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Cockpit ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("cockpit")
        .build()
    {
        Ok(rt) => Some(rt),
        Err(e) => {
            warn!(error = %e, "could not start the async runtime; cockpit disabled");
            None
        }
    };
    if let Some(rt) = &runtime {
        let server = CockpitServer::new(orch.clone(), orch.bus().clone()).with_port(cfg.cockpit_port);
        rt.spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "cockpit stopped");
            }
        });
        println!(
            "  Cockpit on {}",
            format!("http://localhost:{}", cfg.cockpit_port).bold()
        );
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let orch_ctrlc = Arc::clone(&orch);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_flag.store(true, Ordering::SeqCst);
        orch_ctrlc.shutdown();
        println!("{}", "  ✓ Tasks canceled, perception stopped.".green());
        // The REPL is blocked on stdin; exit from here.
        std::process::exit(130);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&orch, shutdown);

    orch.shutdown();
    if let Some(rt) = runtime {
        rt.shutdown_background();
    }
    info!("stagehand exited");
}

/// Attach the drivers, build the orchestrator, register the built-in
/// procedures and start the perception loop.
fn boot(cfg: &config::Config) -> Result<Arc<Orchestrator>, StageError> {
    let rig = SimRig::builder().window(cfg.window.clone()).build();
    stagehand_runtime::demo::install(&rig);

    let mut builder = Orchestrator::builder()
        .config(cfg.orchestrator_config())
        .device(rig.device.clone())
        .recognizer(rig.recognizer.clone())
        .probe(rig.probe.clone())
        .embedder(rig.embedder.clone());
    for name in cfg.model_names() {
        builder = builder.model(name, Arc::new(SimDetector::new(rig.scene.clone())));
    }
    builder = builder.active_model(&cfg.default_model)?;
    if let Some(path) = &cfg.memory_path {
        builder = builder.memory(Arc::new(SimilarityStore::open(path)?));
    }

    let orch = builder.build()?;
    register_builtin(&orch)?;
    register_builtin_middleware(&orch)?;
    orch.resume();
    info!(window = %cfg.window, model = %cfg.default_model, "stagehand ready");
    Ok(orch)
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Stagehand First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Stagehand.\n");

    let mut cfg = config::Config::default();

    cfg.window = prompt_line(&format!("  Game window title [{}]: ", cfg.window), &cfg.window);

    let port = prompt_line(
        &format!("  Cockpit port [{}]: ", cfg.cockpit_port),
        &cfg.cockpit_port.to_string(),
    );
    if let Ok(p) = port.trim().parse::<u16>() {
        cfg.cockpit_port = p;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______                   __                __"#.bold().cyan());
    println!("{}", r#"  / __/ /____ ____ ____ ___/ /  ___ ____  ___/ /"#.bold().cyan());
    println!("{}", r#" _\ \/ __/ _ `/ _ `/ -_) _  /  / _ `/ _ \/ _  / "#.bold().cyan());
    println!("{}", r#"/___/\__/\_,_/\_, /\__/_//_/   \_,_/_//_/\_,_/  "#.bold().cyan());
    println!("{}", r#"             /___/                               "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Stagehand".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vision-driven game automation");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
