//! Audio output capability and its rodio implementation.
//!
//! The sink is driven with `load` / `play` / `pause_and_reset` and reports
//! back asynchronously through `PlaybackSignal`s tagged with the ticket of
//! the clip they belong to. A signal for a ticket that is no longer current
//! must be ignored by the receiver.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use bytes::Bytes;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AudioClip;

/// Identifies one load of the output device.
pub type PlaybackTicket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSignal {
    /// The clip is decoded and can start without delay. `duration` is known
    /// when the decoder can tell it up front.
    Ready {
        ticket: PlaybackTicket,
        duration: Option<Duration>,
    },
    /// Playback ran to the end.
    Ended(PlaybackTicket),
    /// Decode or device failure.
    Failed {
        ticket: PlaybackTicket,
        reason: String,
    },
}

impl PlaybackSignal {
    pub fn ticket(&self) -> PlaybackTicket {
        match self {
            Self::Ended(t) => *t,
            Self::Ready { ticket, .. } | Self::Failed { ticket, .. } => *ticket,
        }
    }
}

/// Device-facing audio playback capability.
pub trait AudioSink: Send {
    /// Prepare a clip. Answers with `Ready` or `Failed`.
    fn load(&mut self, ticket: PlaybackTicket, clip: AudioClip);

    /// Start the loaded clip. Answers with `Ended` or `Failed`.
    fn play(&mut self, ticket: PlaybackTicket);

    /// Stop immediately and forget the current clip. No `Ended` follows.
    fn pause_and_reset(&mut self);

    fn set_volume(&mut self, _volume: f32) {}
}

enum SinkCommand {
    Load(PlaybackTicket, Bytes),
    Play(PlaybackTicket),
    Reset,
    Volume(f32),
}

/// How often the audio thread checks whether the current clip finished.
const END_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays clips through the default output device.
///
/// `rodio::OutputStream` is not `Send`, so the device lives on a dedicated
/// thread and this handle only forwards commands to it.
pub struct RodioSink {
    commands: std_mpsc::Sender<SinkCommand>,
}

impl RodioSink {
    /// Open the default audio output device.
    pub fn open(volume: f32, signals: mpsc::UnboundedSender<PlaybackSignal>) -> anyhow::Result<Self> {
        let (cmd_tx, cmd_rx) = std_mpsc::channel::<SinkCommand>();
        let (init_tx, init_rx) = std_mpsc::channel::<Result<(), String>>();

        std::thread::Builder::new()
            .name("hq-audio-out".into())
            .spawn(move || audio_thread(volume, cmd_rx, init_tx, signals))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Self { commands: cmd_tx }),
            Ok(Err(e)) => anyhow::bail!("Failed to open audio output: {}", e),
            Err(_) => anyhow::bail!("Audio output thread exited during startup"),
        }
    }

    fn send(&self, cmd: SinkCommand) {
        if self.commands.send(cmd).is_err() {
            error!("Audio output thread is gone; command dropped");
        }
    }
}

impl AudioSink for RodioSink {
    fn load(&mut self, ticket: PlaybackTicket, clip: AudioClip) {
        self.send(SinkCommand::Load(ticket, clip.data));
    }

    fn play(&mut self, ticket: PlaybackTicket) {
        self.send(SinkCommand::Play(ticket));
    }

    fn pause_and_reset(&mut self) {
        self.send(SinkCommand::Reset);
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(SinkCommand::Volume(volume.clamp(0.0, 1.0)));
    }
}

/// Stand-in when no output device could be opened. Every load fails, so
/// turns still run through to completion without sound.
pub struct SilentSink {
    signals: mpsc::UnboundedSender<PlaybackSignal>,
}

impl SilentSink {
    pub fn new(signals: mpsc::UnboundedSender<PlaybackSignal>) -> Self {
        Self { signals }
    }
}

impl AudioSink for SilentSink {
    fn load(&mut self, ticket: PlaybackTicket, _clip: AudioClip) {
        let _ = self.signals.send(PlaybackSignal::Failed {
            ticket,
            reason: "no audio output device".into(),
        });
    }

    fn play(&mut self, _ticket: PlaybackTicket) {}

    fn pause_and_reset(&mut self) {}
}

/// The device side of the audio thread. `rodio::Sink` in production.
trait OutputDevice {
    type Source;

    fn decode(&self, data: Bytes) -> Result<(Self::Source, Option<Duration>), String>;
    fn start(&mut self, source: Self::Source);
    /// Silence whatever is sounding and forget queued sources.
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
    fn set_volume(&mut self, volume: f32);
}

struct RodioOutput {
    handle: OutputStreamHandle,
    sink: Sink,
    volume: f32,
}

impl OutputDevice for RodioOutput {
    type Source = Decoder<Cursor<Bytes>>;

    fn decode(&self, data: Bytes) -> Result<(Self::Source, Option<Duration>), String> {
        let source = Decoder::new(Cursor::new(data)).map_err(|e| format!("decode failed: {}", e))?;
        let duration = source.total_duration();
        Ok((source, duration))
    }

    fn start(&mut self, source: Self::Source) {
        self.sink.append(source);
        self.sink.play();
    }

    fn stop(&mut self) {
        self.sink.stop();
        // A stopped sink is replaced so the next clip starts clean.
        match Sink::try_new(&self.handle) {
            Ok(fresh) => {
                fresh.set_volume(self.volume);
                self.sink = fresh;
            }
            Err(e) => warn!("Failed to recreate audio sink: {}", e),
        }
    }

    fn is_idle(&self) -> bool {
        self.sink.empty()
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.sink.set_volume(volume);
    }
}

/// Ticket bookkeeping of the audio thread.
struct OutputLoop<D: OutputDevice> {
    device: D,
    loaded: Option<(PlaybackTicket, D::Source)>,
    playing: Option<PlaybackTicket>,
    signals: mpsc::UnboundedSender<PlaybackSignal>,
}

impl<D: OutputDevice> OutputLoop<D> {
    fn new(device: D, signals: mpsc::UnboundedSender<PlaybackSignal>) -> Self {
        Self {
            device,
            loaded: None,
            playing: None,
            signals,
        }
    }

    fn handle(&mut self, cmd: SinkCommand) {
        match cmd {
            SinkCommand::Load(ticket, data) => {
                if let Some(previous) = self.playing.take() {
                    warn!(ticket, previous, "Clip loaded while another was playing");
                    self.device.stop();
                }
                match self.device.decode(data) {
                    Ok((source, duration)) => {
                        self.loaded = Some((ticket, source));
                        self.signal(PlaybackSignal::Ready { ticket, duration });
                    }
                    Err(reason) => {
                        self.loaded = None;
                        self.signal(PlaybackSignal::Failed { ticket, reason });
                    }
                }
            }
            SinkCommand::Play(ticket) => match self.loaded.take() {
                Some((t, source)) if t == ticket => {
                    self.device.start(source);
                    self.playing = Some(ticket);
                }
                other => {
                    self.loaded = other;
                    self.signal(PlaybackSignal::Failed {
                        ticket,
                        reason: "play requested for a clip that is not loaded".into(),
                    });
                }
            },
            SinkCommand::Reset => {
                debug!(playing = ?self.playing, "Audio output reset");
                self.loaded = None;
                self.playing = None;
                self.device.stop();
            }
            SinkCommand::Volume(v) => self.device.set_volume(v),
        }
    }

    /// Report the end of the playing clip once the device runs dry.
    fn poll_end(&mut self) {
        if let Some(ticket) = self.playing {
            if self.device.is_idle() {
                self.playing = None;
                self.signal(PlaybackSignal::Ended(ticket));
            }
        }
    }

    fn signal(&self, signal: PlaybackSignal) {
        let _ = self.signals.send(signal);
    }
}

fn audio_thread(
    volume: f32,
    commands: std_mpsc::Receiver<SinkCommand>,
    init: std_mpsc::Sender<Result<(), String>>,
    signals: mpsc::UnboundedSender<PlaybackSignal>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init.send(Err(e.to_string()));
            return;
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(s) => s,
        Err(e) => {
            let _ = init.send(Err(e.to_string()));
            return;
        }
    };
    let volume = volume.clamp(0.0, 1.0);
    sink.set_volume(volume);
    let _ = init.send(Ok(()));
    info!("Audio output ready");

    let mut output = OutputLoop::new(
        RodioOutput {
            handle,
            sink,
            volume,
        },
        signals,
    );

    loop {
        match commands.recv_timeout(END_POLL_INTERVAL) {
            Ok(cmd) => output.handle(cmd),
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
        output.poll_end();
    }

    debug!("Audio output thread exiting");
}
