//! REPL – the interactive control shell.
//!
//! Supported slash-commands:
//!   /help            – show this list
//!   /status          – connection, speed and session overview
//!   /drive           – keyboard drive mode (arrows, space, +/-; Esc leaves)
//!   /voice [file]    – start audio control from recorded predictions
//!   /image [file]    – start image-gesture control
//!   /pose [file]     – start pose control
//!   /stop            – stop the active session and send STOP
//!   /speed <0-100>   – set the speed
//!   /send <cmd>      – stop the active session, send F, B, L, R or S once
//!   /quit | /exit    – send STOP and leave

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rcpanel_kernel::{Decision, Suppression};
use rcpanel_types::{Command, Modality, Speed};

use crate::panel::Panel;

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReplCommand {
    Help,
    Status,
    Drive,
    Classifier(Modality, Option<PathBuf>),
    Stop,
    Speed(String),
    Send(String),
    Quit,
    Unknown(String),
}

pub(crate) fn parse(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());
    Some(match head {
        "/help" | "/?" => ReplCommand::Help,
        "/status" => ReplCommand::Status,
        "/drive" | "/keyboard" => ReplCommand::Drive,
        "/voice" | "/audio" => ReplCommand::Classifier(Modality::Audio, arg.map(PathBuf::from)),
        "/image" => ReplCommand::Classifier(Modality::Image, arg.map(PathBuf::from)),
        "/pose" => ReplCommand::Classifier(Modality::Pose, arg.map(PathBuf::from)),
        "/stop" => ReplCommand::Stop,
        "/speed" => ReplCommand::Speed(rest.to_string()),
        "/send" => ReplCommand::Send(rest.to_string()),
        "/quit" | "/exit" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(line.to_string()),
    })
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits.
pub fn run(panel: &mut Panel, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "rcpanel>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – stopping the vehicle.".yellow().bold());
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let Some(command) = parse(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.trim());

        match command {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status => cmd_status(panel),
            ReplCommand::Drive => cmd_drive(panel),
            ReplCommand::Classifier(modality, path) => cmd_classifier(panel, modality, path),
            ReplCommand::Stop => {
                let decision = panel.stop_vehicle();
                report(decision);
            }
            ReplCommand::Speed(arg) => cmd_speed(panel, &arg),
            ReplCommand::Send(arg) => cmd_send(panel, &arg),
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            ReplCommand::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "RC Panel Commands".bold().underline());
    println!("  {}          – connection, speed and session overview", "/status".bold().cyan());
    println!("  {}           – drive with the arrow keys (space stops, +/- speed, Esc leaves)", "/drive".bold().cyan());
    println!("  {}   – voice control from recorded predictions", "/voice [file]".bold().cyan());
    println!("  {}   – image-gesture control", "/image [file]".bold().cyan());
    println!("  {}    – pose control", "/pose [file]".bold().cyan());
    println!("  {}            – stop the active session and send STOP", "/stop".bold().cyan());
    println!("  {}     – set the speed (percent)", "/speed <0-100>".bold().cyan());
    println!("  {}      – stop the active session, then send F, B, L, R or S once", "/send <cmd>".bold().cyan());
    println!("  {}     – send STOP and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(panel: &Panel) {
    println!();
    println!("{}", "Status".bold().underline());
    let link = if panel.is_connected() {
        "connected".green()
    } else {
        "disconnected".red()
    };
    println!("  Link         : {} ({})", link, panel.link().describe());
    if !matches!(panel.link(), crate::panel::Link::Loopback(_)) {
        println!("  Broker       : {}", panel.config().broker.to_broker_config().url().yellow());
    }
    println!("  Topic        : {}", panel.topic().as_str().yellow());
    println!("  Speed        : {}", panel.speed().to_string().yellow());
    let session = panel
        .active_modality()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!("  Session      : {}", session.yellow());
    let last = panel
        .manual_state()
        .last_command()
        .map(|c| c.token().to_string())
        .unwrap_or_else(|| "–".to_string());
    println!("  Last /send   : {}", last.yellow());
    println!();
}

fn cmd_drive(panel: &mut Panel) {
    println!(
        "  {} arrows steer, {} stops, {} speed, {} leaves",
        "Drive mode:".bold(),
        "space".bold(),
        "+/-".bold(),
        "Esc".bold()
    );
    match panel.drive() {
        Ok(summary) => println!(
            "  {} {} key event(s), {} command(s) sent",
            "✓ Left drive mode.".green(),
            summary.intents,
            summary.transmitted
        ),
        Err(e) => println!("{}: {}", "Drive mode unavailable".red(), e),
    }
}

fn cmd_classifier(panel: &mut Panel, modality: Modality, path: Option<PathBuf>) {
    match panel.start_classifier(modality, path) {
        Ok(()) => println!(
            "  {} {} control running. {} ends it.",
            "✓".green().bold(),
            modality.to_string().bold(),
            "/stop".bold().cyan()
        ),
        Err(e) => println!("{}: {}", "Could not start session".red(), e),
    }
}

fn cmd_speed(panel: &Panel, arg: &str) {
    if arg.is_empty() {
        println!("  Speed: {}", panel.speed().to_string().yellow());
        return;
    }
    let speed = match arg.trim_end_matches('%').parse::<i64>() {
        Ok(value) => Speed::try_from(value),
        Err(_) => {
            println!("{} '{}'", "Not a number:".red(), arg.yellow());
            return;
        }
    };
    match speed.and_then(|s| panel.set_speed(s)) {
        Ok(true) => {}
        Ok(false) => println!("  {}", "Offline – the speed goes out on reconnect.".yellow()),
        Err(e) => println!("{}: {}", "Speed not set".red(), e),
    }
}

fn cmd_send(panel: &mut Panel, arg: &str) {
    if arg.is_empty() {
        println!("  Usage: {} F|B|L|R|S", "/send".bold().cyan());
        return;
    }
    match arg.parse::<Command>() {
        Ok(command) => {
            if let Some(decision) = panel.send(command.token()) {
                report(decision);
            }
        }
        Err(e) => println!("{}: {}", "Not sent".red(), e),
    }
}

fn report(decision: Decision) {
    match decision {
        Decision::Transmitted(_) => {}
        Decision::Suppressed(Suppression::Disconnected) => {
            println!("  {}", "Not connected – nothing sent.".yellow())
        }
        Decision::Suppressed(Suppression::PublishFailed) => {
            println!("  {}", "Publish failed – see the log.".red())
        }
        Decision::Suppressed(reason) => println!("  {} ({reason:?})", "Not sent".dimmed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse("/help"), Some(ReplCommand::Help));
        assert_eq!(parse("  /drive  "), Some(ReplCommand::Drive));
        assert_eq!(parse("/exit"), Some(ReplCommand::Quit));
        assert_eq!(parse(""), None);
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn parses_classifier_paths() {
        assert_eq!(
            parse("/voice recordings/voice.jsonl"),
            Some(ReplCommand::Classifier(
                Modality::Audio,
                Some(PathBuf::from("recordings/voice.jsonl"))
            ))
        );
        assert_eq!(parse("/pose"), Some(ReplCommand::Classifier(Modality::Pose, None)));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse("/speed 75"), Some(ReplCommand::Speed("75".into())));
        assert_eq!(parse("/send   f"), Some(ReplCommand::Send("f".into())));
        assert_eq!(parse("/speed"), Some(ReplCommand::Speed(String::new())));
    }

    #[test]
    fn unknown_input_is_echoed() {
        assert_eq!(parse("forward"), Some(ReplCommand::Unknown("forward".into())));
    }
}
