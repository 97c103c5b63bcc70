//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an
//! mpsc channel; events are written to stdout one JSON object per line.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{ConsoleCommand, ConsoleEvent};

/// Emit a `ConsoleEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &ConsoleEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // The pipe may be closed; nothing useful to do about it here.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

pub fn emit_error(message: &str) {
    emit_event(&ConsoleEvent::Error {
        message: message.to_string(),
    });
}

/// Forward events from the engine to stdout until the channel closes.
pub fn spawn_event_writer(
    mut events: mpsc::UnboundedReceiver<ConsoleEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            emit_event(&event);
        }
        debug!("event writer exiting");
    })
}

/// Parse one stdin line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards the
/// commands through the returned channel. Malformed lines are reported with
/// an `error` event and skipped.
///
/// The channel closes when stdin does (parent process gone).
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<ConsoleCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_command(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command");
                        if tx.send(cmd).is_err() {
                            break; // Engine is gone.
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_error(&format!("Invalid JSON command: {}", e));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_variants() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(
            parse_command(r#"{"command":"ping"}"#).unwrap(),
            Some(ConsoleCommand::Ping {})
        );
        // Only the `command` tag selects a variant.
        assert!(parse_command(r#"{"type":"start_call"}"#).is_err());
        assert!(parse_command("not json").is_err());
    }
}
