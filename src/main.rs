//! HQ Console host process.
//!
//! Communicates with the UI via JSON-line IPC on stdin/stdout. Initializes
//! logging, configuration, the backend clients and the audio output, then
//! hands everything to the console engine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use hq_console::capture::IpcRecognizer;
use hq_console::config::paths::get_log_dir;
use hq_console::config::read_console_config;
use hq_console::dialogue::{http_client, HttpDialogue};
use hq_console::ipc::bridge::{emit_event, spawn_event_writer, spawn_stdin_reader};
use hq_console::ipc::ConsoleEvent;
use hq_console::tts::{AudioSink, BackendTts, RodioSink, SilentSink, SpeechSynthesizer};
use hq_console::{Console, ConsoleParts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = hq_console::logging::init(&get_log_dir()) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Emit starting event immediately so the host knows we're alive.
    emit_event(&ConsoleEvent::Starting {});

    let config = read_console_config();
    info!(api_url = %config.api_url, personas = ?config.selected_personas, "Configuration loaded");

    let commands = spawn_stdin_reader();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let writer = spawn_event_writer(event_rx);

    let client = http_client()?;
    let dialogue = HttpDialogue::with_client(&config.api_url, config.request_timeout(), client.clone());
    let synthesizer = BackendTts::new(&config.api_url, config.request_timeout(), client);
    info!(synthesizer = %synthesizer.name(), "Speech synthesis configured");

    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let sink: Box<dyn AudioSink> = match RodioSink::open(config.volume, signal_tx.clone()) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("Audio output unavailable, continuing without sound: {}", e);
            let _ = event_tx.send(ConsoleEvent::Error {
                message: format!("Audio output unavailable: {}", e),
            });
            Box::new(SilentSink::new(signal_tx))
        }
    };

    let console = Console::new(ConsoleParts {
        config,
        dialogue: Arc::new(dialogue),
        synthesizer: Arc::new(synthesizer),
        sink,
        playback_signals: signal_rx,
        recognizer: Box::new(IpcRecognizer::new(event_tx.clone())),
        events: event_tx,
    });

    console.run(commands).await;

    // The console and recognizer held the last senders; the writer drains
    // what is left and exits.
    let _ = writer.await;
    info!("HQ Console shutting down");
    Ok(())
}
