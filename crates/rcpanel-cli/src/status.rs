//! Prints status events as they happen.

use colored::Colorize;
use rcpanel_middleware::StatusReceiver;
use rcpanel_types::{StatusEvent, StatusKind};
use tokio::task::JoinHandle;
use tracing::debug;

/// One line of operator-facing text, or `None` for events that only go to
/// the log.
pub(crate) fn render(event: &StatusEvent) -> Option<String> {
    let time = event.timestamp.format("%H:%M:%S").to_string().dimmed();
    let text = match &event.kind {
        StatusKind::Connecting { url } => format!("connecting to {}", url.bold()).normal(),
        StatusKind::Connected => "connected".green().bold(),
        StatusKind::Reconnecting => "connection lost, reconnecting …".yellow(),
        StatusKind::Disconnected => "disconnected".red(),
        StatusKind::TransportError(reason) => format!("transport error: {reason}").red(),
        StatusKind::ClassifierLoading(m) => format!("loading {m} model …").normal(),
        StatusKind::ClassifierLoaded(m) => format!("{m} model ready").green(),
        StatusKind::ClassifierFailed { modality, reason } => {
            format!("{modality} model failed: {reason}").red()
        }
        StatusKind::SessionRunning(m) => format!("{m} control active").cyan(),
        StatusKind::SessionStopped(m) => format!("{m} control stopped").dimmed(),
        StatusKind::CommandSent(command) => format!("→ {}", command.token()).bold(),
        StatusKind::SpeedSent(speed) => format!("→ speed {speed}").bold(),
        StatusKind::Detected { .. } => return None,
    };
    Some(format!("{time} {text}"))
}

/// Print every event from `rx` until the bus closes.
pub fn spawn_printer(mut rx: StatusReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match render(&event) {
                // `\r` keeps lines aligned while drive mode has the terminal
                // in raw mode.
                Some(line) => print!("\r{line}\r\n"),
                None => debug!(kind = ?event.kind, "status"),
            }
        }
    })
}
