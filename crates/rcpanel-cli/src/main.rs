//! `rcpanel` – remote control panel for an MQTT-driven robot car.
//!
//! 1. Checks for `~/.rcpanel/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Connects to the broker over secure WebSockets (or a loopback link with
//!    `--dry-run`).
//! 3. Drops the operator into an **interactive REPL** with slash-commands
//!    (`/drive`, `/voice`, `/image`, `/pose`, `/stop`, `/speed`, `/help`).
//! 4. Intercepts **Ctrl-C** to send STOP before exiting.

mod config;
mod drive;
mod panel;
mod repl;
mod status;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use rcpanel_types::Command;

use crate::panel::Panel;

fn main() {
    // RUST_LOG filters (default "info"); RCPANEL_LOG_FORMAT=json switches to
    // JSON lines. Operator-facing output still uses println!.
    let _tracing = rcpanel_runtime::init_tracing("rcpanel");

    print_banner();

    let dry_run = std::env::args().skip(1).any(|arg| arg == "--dry-run");

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let _enter = runtime.enter();

    let mut panel = Panel::start(runtime.handle().clone(), cfg, dry_run);
    info!(topic = %panel.topic(), dry_run, "control panel started");
    println!("  Device topic: {}", panel.topic().as_str().bold());

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // The REPL and drive mode read Ctrl-C as a key; this catches it at any
    // other moment.
    let (transport, topic) = panel.emergency_stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the vehicle …".yellow().bold());
        match transport.publish(topic.as_str(), Command::Stop.token()) {
            Ok(()) => println!("{}", "  ✓ STOP sent.".green()),
            Err(e) => println!("  {} {}", "✗ STOP not sent:".red(), e),
        }
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C outside the prompt will not send STOP");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&mut panel, shutdown);

    panel.shutdown();
    println!("{}", "  ✓ Exiting rcpanel.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      RC Panel First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's point the panel at your car.\n");

    let mut cfg = config::Config::default();
    config::apply_env_overrides(&mut cfg);

    // Device id
    cfg.device_id = prompt_line(
        &format!("  Device id (as flashed on the car) [{}]: ", cfg.device_id),
        &cfg.device_id,
    );

    // Broker
    cfg.broker.host = prompt_line(
        &format!("  Broker host [{}]: ", cfg.broker.host),
        &cfg.broker.host,
    );
    let port_str = prompt_line(
        &format!("  Broker WebSocket (wss) port [{}]: ", cfg.broker.port),
        &cfg.broker.port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.broker.port = p;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___  _____   ___                __"#.bold().cyan());
    println!("{}", r#"  / _ \/ ___/  / _ \___ ____  ___ / /"#.bold().cyan());
    println!("{}", r#" / , _/ /__   / ___/ _ `/ _ \/ -_) / "#.bold().cyan());
    println!("{}", r#"/_/|_|\___/  /_/   \_,_/_//_/\__/_/  "#.bold().cyan());
    println!();
    println!("  {} {}",
        "rcpanel".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Keyboard, voice and gesture control over MQTT");
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
