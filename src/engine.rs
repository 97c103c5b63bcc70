//! The console engine: one task that owns every piece of mutable state.
//!
//! Commands from the host, completions of spawned work (dialogue requests,
//! the stream reader, audio fetches, timers) and audio device signals all
//! arrive on channels and are handled one at a time by `Console::run`. Work
//! spawned for a session reports back tagged with that session's id; reports
//! for a session that is no longer current are dropped on arrival.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureController, CaptureTimer, Recognizer};
use crate::config::ConsoleConfig;
use crate::dialogue::{
    BatchRequest, Credentials, DialogueService, StreamDecoder, StreamLength, StreamRecord,
    StreamRequest,
};
use crate::error::ConsoleResult;
use crate::ipc::{ConsoleCommand, ConsoleEvent};
use crate::persona::{normalize_selection, PersonaId, Utterance};
use crate::playback::{AudioChannel, SchedulerPhase};
use crate::session::{Session, SessionId, SessionMode};
use crate::tts::{AudioClip, AudioSink, PlaybackSignal, PlaybackTicket, SpeechSynthesizer};

const NO_RESPONSE: &str = "No response.";
const FUN_MODE_STARTING: &str = "Initializing Fun Mode...";
const CONNECTION_LOST: &str = "Connection Lost.";

/// Completions of work spawned by the engine.
#[derive(Debug)]
enum Internal {
    BatchReply {
        session: SessionId,
        result: ConsoleResult<Vec<Utterance>>,
    },
    StreamRecords {
        session: SessionId,
        records: Vec<StreamRecord>,
    },
    StreamClosed {
        session: SessionId,
        result: ConsoleResult<()>,
    },
    AudioFetched {
        session: SessionId,
        seq: u64,
        result: ConsoleResult<AudioClip>,
    },
    SpeakerGapElapsed {
        session: SessionId,
    },
    PlaybackTimedOut {
        session: SessionId,
        ticket: PlaybackTicket,
    },
    CredentialsChecked {
        pushed: bool,
        result: ConsoleResult<()>,
    },
}

struct PrefetchJob {
    seq: u64,
    utterance: Utterance,
}

/// Everything the engine needs from the outside world.
pub struct ConsoleParts {
    pub config: ConsoleConfig,
    pub dialogue: Arc<dyn DialogueService>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Box<dyn AudioSink>,
    /// Signals produced by `sink`.
    pub playback_signals: mpsc::UnboundedReceiver<PlaybackSignal>,
    pub recognizer: Box<dyn Recognizer>,
    pub events: mpsc::UnboundedSender<ConsoleEvent>,
}

struct Inboxes {
    internal: mpsc::UnboundedReceiver<Internal>,
    timers: mpsc::UnboundedReceiver<CaptureTimer>,
    playback: mpsc::UnboundedReceiver<PlaybackSignal>,
}

pub struct Console {
    config: ConsoleConfig,
    dialogue: Arc<dyn DialogueService>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    channel: AudioChannel,
    capture: CaptureController,
    session: Option<Session>,
    next_session: u64,
    prefetch: Option<mpsc::UnboundedSender<PrefetchJob>>,
    fetch_permits: Arc<Semaphore>,
    selected: Vec<PersonaId>,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    internal: mpsc::UnboundedSender<Internal>,
    inboxes: Option<Inboxes>,
    gap_timer: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Console {
    pub fn new(parts: ConsoleParts) -> Self {
        let ConsoleParts {
            config,
            dialogue,
            synthesizer,
            sink,
            playback_signals,
            recognizer,
            events,
        } = parts;

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let mut channel = AudioChannel::new(sink);
        channel.set_volume(config.volume);

        let capture = CaptureController::new(
            recognizer,
            config.silence_window(),
            config.restart_delay(),
            events.clone(),
            timer_tx,
        );

        Self {
            selected: normalize_selection(&config.selected_personas),
            fetch_permits: Arc::new(Semaphore::new(config.max_inflight_fetches.max(1))),
            config,
            dialogue,
            synthesizer,
            channel,
            capture,
            session: None,
            next_session: 1,
            prefetch: None,
            events,
            internal: internal_tx,
            inboxes: Some(Inboxes {
                internal: internal_rx,
                timers: timer_rx,
                playback: playback_signals,
            }),
            gap_timer: None,
            watchdog: None,
        }
    }

    /// Process commands until `stop` or until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ConsoleCommand>) {
        let Some(mut inboxes) = self.inboxes.take() else {
            warn!("Console is already running");
            return;
        };

        self.check_credentials(self.config.credentials());
        self.emit(ConsoleEvent::PersonasSelected {
            personas: self.selected.clone(),
        });
        self.emit(ConsoleEvent::Ready {});
        info!("Console ready");

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => {
                        info!("Command channel closed, shutting down");
                        break;
                    }
                },
                Some(event) = inboxes.internal.recv() => self.handle_internal(event),
                Some(timer) = inboxes.timers.recv() => self.handle_capture_timer(timer),
                Some(signal) = inboxes.playback.recv() => self.handle_playback_signal(signal),
            }
        }

        self.shutdown();
    }

    /// Returns `false` if the loop should exit.
    fn handle_command(&mut self, cmd: ConsoleCommand) -> bool {
        match cmd {
            ConsoleCommand::Send { text, persona } => {
                let persona = persona.and_then(|p| match p.parse::<PersonaId>() {
                    Ok(id) if id.is_speaker() => Some(id),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Ignoring persona override: {}", e);
                        None
                    }
                });
                self.handle_send(&text, persona);
            }
            ConsoleCommand::FunMode { topic, mode } => {
                let length = mode.unwrap_or(self.config.stream_length);
                self.start_fun_mode(&topic, length);
            }
            ConsoleCommand::StopDebate {} => self.stop_debate(),
            ConsoleCommand::StartCall {} => self.start_call(),
            ConsoleCommand::StopCall {} => self.capture.stop_call(),
            ConsoleCommand::ToggleCall {} => {
                if self.capture.call_active() {
                    self.capture.stop_call();
                } else {
                    self.start_call();
                }
            }
            ConsoleCommand::SelectPersonas { personas } => {
                let parsed: Vec<PersonaId> = personas
                    .iter()
                    .filter_map(|p| match p.parse() {
                        Ok(id) => Some(id),
                        Err(e) => {
                            warn!("Ignoring selection entry: {}", e);
                            None
                        }
                    })
                    .collect();
                self.set_selection(&parsed);
            }
            ConsoleCommand::TogglePersona { persona } => match persona.parse::<PersonaId>() {
                Ok(id) if id.is_speaker() => {
                    let mut next = self.selected.clone();
                    if let Some(pos) = next.iter().position(|p| *p == id) {
                        next.remove(pos);
                    } else {
                        next.push(id);
                    }
                    self.set_selection(&next);
                }
                Ok(id) => debug!(persona = %id, "Idle persona cannot be selected"),
                Err(e) => warn!("Ignoring toggle: {}", e),
            },
            ConsoleCommand::ResetPersonas {} => self.set_selection(&PersonaId::SPEAKERS),
            ConsoleCommand::Configure {
                gemini_key,
                eleven_key,
            } => {
                let creds = Credentials {
                    gemini_key: gemini_key.filter(|k| !k.trim().is_empty()),
                    eleven_key: eleven_key.filter(|k| !k.trim().is_empty()),
                };
                if creds.gemini_key.is_some() {
                    self.config.gemini_key = creds.gemini_key.clone();
                }
                if creds.eleven_key.is_some() {
                    self.config.eleven_key = creds.eleven_key.clone();
                }
                self.check_credentials((!creds.is_empty()).then_some(creds));
            }
            ConsoleCommand::RecognitionStarted {} => self.capture.on_started(),
            ConsoleCommand::RecognitionResult { transcript } => {
                // Speech during a speaker gap or while the next clip is
                // fetching ends the turn just like speech over playing audio.
                let turn_audible = self.turn_has_pending_audio();
                let preempted = self.capture.on_partial_result(&transcript, &mut self.channel);
                let spoke = self.capture.call_active() && !transcript.trim().is_empty();
                if preempted || (turn_audible && spoke) {
                    self.cancel_session("barge-in");
                }
            }
            ConsoleCommand::RecognitionError { error } => {
                self.capture.on_error(&error);
            }
            ConsoleCommand::RecognitionEnded {} => self.capture.on_recognition_ended(),
            ConsoleCommand::Ping {} => self.emit(ConsoleEvent::Pong {}),
            ConsoleCommand::Stop {} => {
                self.emit(ConsoleEvent::Stopping {});
                return false;
            }
        }
        true
    }

    /// Starting a call cuts off AI audio and ends any turn that still had audio to play.
    fn start_call(&mut self) {
        let interrupted = self.channel.is_busy() || self.turn_has_pending_audio();
        self.capture.start_call(&mut self.channel);
        if interrupted {
            self.cancel_session("call started");
        }
    }

    fn set_selection(&mut self, personas: &[PersonaId]) {
        self.selected = normalize_selection(personas);
        info!(personas = ?self.selected, "Persona selection changed");
        self.emit(ConsoleEvent::PersonasSelected {
            personas: self.selected.clone(),
        });
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    fn begin_session(&mut self, mode: SessionMode, text: &str) -> (SessionId, CancellationToken) {
        self.cancel_session("superseded");

        let id = SessionId(self.next_session);
        self.next_session += 1;
        let session = Session::new(id, mode);
        let token = session.token.clone();

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        self.spawn_prefetcher(id, token.clone(), job_rx);
        self.prefetch = Some(job_tx);
        self.session = Some(session);

        info!(session = %id, %mode, "Turn started");
        self.emit(ConsoleEvent::TurnStarted {
            session: id,
            mode,
            text: text.to_string(),
        });
        (id, token)
    }

    /// Batch turn: one request, all utterances enqueued at once.
    fn handle_send(&mut self, text: &str, persona: Option<PersonaId>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let (id, token) = self.begin_session(SessionMode::Batch, text);
        let request = BatchRequest {
            message: text.to_string(),
            target_persona: persona,
            target_personas: self.selected.clone(),
        };

        let dialogue = Arc::clone(&self.dialogue);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                r = dialogue.respond(request) => r,
            };
            let _ = internal.send(Internal::BatchReply {
                session: id,
                result,
            });
        });
    }

    /// Streaming turn: utterances are enqueued as their lines arrive.
    fn start_fun_mode(&mut self, topic: &str, length: StreamLength) {
        let topic = topic.trim();
        if topic.is_empty() {
            return;
        }
        self.emit(ConsoleEvent::Notice {
            text: FUN_MODE_STARTING.into(),
        });
        let (id, token) = self.begin_session(SessionMode::Streaming, topic);
        let request = StreamRequest {
            message: topic.to_string(),
            mode: length,
            target_personas: self.selected.clone(),
        };

        let dialogue = Arc::clone(&self.dialogue);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = read_stream(dialogue.as_ref(), request, id, &token, &internal).await;
            if token.is_cancelled() {
                return;
            }
            let _ = internal.send(Internal::StreamClosed {
                session: id,
                result,
            });
        });
    }

    fn stop_debate(&mut self) {
        if !self.cancel_session("stopped") {
            // Nothing active; still make sure nothing is audible.
            self.channel.preempt();
        }
    }

    /// Cancel the active session, if any. Returns whether there was one.
    fn cancel_session(&mut self, reason: &str) -> bool {
        let Some(mut session) = self.session.take() else {
            return false;
        };
        info!(session = %session.id, reason, "Turn cancelled");
        session.cancel();
        self.prefetch = None;
        self.abort_timers();
        self.channel.preempt();
        self.emit(ConsoleEvent::CaptionCleared {});
        self.emit(ConsoleEvent::PersonaChanged {
            persona: PersonaId::IDLE,
        });
        self.emit(ConsoleEvent::TurnCancelled {
            session: session.id,
        });
        true
    }

    /// Tear the session down once ingestion is over, the queue is empty and
    /// nothing is loading, playing or pausing between speakers.
    fn check_completion(&mut self) {
        let finished = match &self.session {
            Some(s) if !s.is_cancelled() && s.is_finished() => s.id,
            _ => return,
        };
        if let Some(session) = self.session.take() {
            session.token.cancel();
            info!(
                session = %finished,
                utterances = session.queue.admitted(),
                skipped = session.queue.dropped(),
                "Turn finished"
            );
        }
        self.prefetch = None;
        self.abort_timers();
        self.emit(ConsoleEvent::TurnFinished { session: finished });
        self.emit(ConsoleEvent::PersonaChanged {
            persona: PersonaId::IDLE,
        });
        self.capture.resume_after_turn();
    }

    fn turn_has_pending_audio(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.is_cancelled() && s.has_pending_audio())
    }

    fn current_session(&mut self, id: SessionId) -> Option<&mut Session> {
        self.session
            .as_mut()
            .filter(|s| s.id == id && !s.is_cancelled())
    }

    // -----------------------------------------------------------------------
    // Prefetch
    // -----------------------------------------------------------------------

    fn enqueue(&mut self, utterance: Utterance) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let seq = session.queue.admit(utterance.clone());
        debug!(session = %session.id, seq, persona = %utterance.persona, "Utterance queued");
        if let Some(prefetch) = &self.prefetch {
            let _ = prefetch.send(PrefetchJob { seq, utterance });
        }
    }

    /// Dispatch fetches for one session in arrival order, at most
    /// `max_inflight_fetches` at a time across all sessions.
    fn spawn_prefetcher(
        &self,
        session: SessionId,
        token: CancellationToken,
        mut jobs: mpsc::UnboundedReceiver<PrefetchJob>,
    ) {
        let permits = Arc::clone(&self.fetch_permits);
        let synthesizer = Arc::clone(&self.synthesizer);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = token.cancelled() => break,
                    job = jobs.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                let permit = tokio::select! {
                    _ = token.cancelled() => break,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let synthesizer = Arc::clone(&synthesizer);
                let internal = internal.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let PrefetchJob { seq, utterance } = job;
                    let result = tokio::select! {
                        _ = token.cancelled() => return,
                        r = synthesizer.synthesize(utterance.persona, &utterance.text) => r,
                    };
                    let _ = internal.send(Internal::AudioFetched {
                        session,
                        seq,
                        result,
                    });
                });
            }
            debug!(%session, "Prefetcher exiting");
        });
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::BatchReply { session, result } => {
                let Some(active) = self.current_session(session) else {
                    debug!(%session, "Reply for inactive turn discarded");
                    return;
                };
                match result {
                    Ok(utterances) => {
                        active.ingesting = false;
                        info!(%session, count = utterances.len(), "Batch reply");
                        if utterances.is_empty() {
                            self.emit(ConsoleEvent::Notice {
                                text: NO_RESPONSE.into(),
                            });
                        }
                        for utterance in utterances {
                            self.enqueue(utterance);
                        }
                        self.check_completion();
                    }
                    Err(e) => self.abort_on_transport(session, &e.to_string()),
                }
            }
            Internal::StreamRecords { session, records } => {
                if self.current_session(session).is_none() {
                    debug!(%session, "Stream records for inactive turn discarded");
                    return;
                }
                for record in records {
                    match record {
                        StreamRecord::Utterance(u) => self.enqueue(u),
                        StreamRecord::Notice(text) => self.emit(ConsoleEvent::Notice { text }),
                    }
                }
            }
            Internal::StreamClosed { session, result } => {
                let Some(active) = self.current_session(session) else {
                    return;
                };
                match result {
                    Ok(()) => {
                        info!(%session, "Stream closed");
                        active.ingesting = false;
                        self.check_completion();
                    }
                    Err(e) => self.abort_on_transport(session, &e.to_string()),
                }
            }
            Internal::AudioFetched {
                session,
                seq,
                result,
            } => {
                let Some(active) = self.current_session(session) else {
                    debug!(%session, seq, "Audio for inactive turn discarded");
                    return;
                };
                active.queue.resolve(seq, result);
                self.drain();
                self.check_completion();
            }
            Internal::SpeakerGapElapsed { session } => {
                let Some(active) = self.current_session(session) else {
                    return;
                };
                if active.playback.on_gap_elapsed() {
                    self.gap_timer = None;
                    self.drain();
                    self.check_completion();
                }
            }
            Internal::PlaybackTimedOut { session, ticket } => {
                let Some(active) = self.current_session(session) else {
                    return;
                };
                if active.playback.current_ticket() != Some(ticket) {
                    return;
                }
                warn!(%session, ticket, "Playback watchdog fired; skipping item");
                self.watchdog = None;
                self.channel.preempt();
                self.finish_item(ticket);
            }
            Internal::CredentialsChecked { pushed, result } => {
                let (ready, detail) = match result {
                    Ok(()) if pushed => (true, "Credentials accepted".to_string()),
                    Ok(()) => (true, "Backend ready".to_string()),
                    Err(e) => (false, e.to_string()),
                };
                if ready {
                    info!(%detail, "Credential check passed");
                } else {
                    warn!(%detail, "Credential check failed");
                }
                self.emit(ConsoleEvent::CredentialStatus { ready, detail });
            }
        }
    }

    fn abort_on_transport(&mut self, session: SessionId, detail: &str) {
        warn!(%session, "Dialogue request failed: {}", detail);
        self.emit(ConsoleEvent::Notice {
            text: CONNECTION_LOST.into(),
        });
        self.cancel_session("transport failure");
    }

    fn handle_capture_timer(&mut self, timer: CaptureTimer) {
        match timer {
            CaptureTimer::Silence(generation) => {
                if let Some(text) = self.capture.on_silence_elapsed(generation) {
                    self.handle_send(&text, None);
                }
            }
            CaptureTimer::Restart(generation) => self.capture.on_restart_due(generation),
        }
    }

    fn handle_playback_signal(&mut self, signal: PlaybackSignal) {
        let ticket = signal.ticket();
        let Some(session) = self.session.as_mut().filter(|s| !s.is_cancelled()) else {
            debug!(ticket, "Playback signal without active turn");
            return;
        };
        if session.playback.current_ticket() != Some(ticket) {
            debug!(ticket, "Stale playback signal");
            return;
        }

        match signal {
            PlaybackSignal::Ready { ticket, duration } => {
                let id = session.id;
                if let Some(item) = session.playback.on_ready(ticket, &mut self.channel) {
                    info!(session = %id, seq = item.seq, persona = %item.utterance.persona, "Speaking");
                    let _ = self.events.send(ConsoleEvent::Speaking {
                        session: id,
                        seq: item.seq,
                        persona: item.utterance.persona,
                        text: item.utterance.text.clone(),
                    });
                    // The cap counts from the start of playback, on top of
                    // the clip's own length when the decoder knows it.
                    let limit = self.config.playback_timeout() + duration.unwrap_or_default();
                    self.arm_watchdog(id, ticket, limit);
                } else if *session.playback.phase() == SchedulerPhase::Gap {
                    self.start_gap();
                }
            }
            PlaybackSignal::Ended(ticket) => self.finish_item(ticket),
            PlaybackSignal::Failed { ticket, reason } => {
                warn!(ticket, "Playback failed, skipping item: {}", reason);
                self.finish_item(ticket);
            }
        }
    }

    /// End of the current item, however it ended.
    fn finish_item(&mut self, ticket: PlaybackTicket) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.playback.on_finished(ticket, &mut self.channel) {
            return;
        }
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.emit(ConsoleEvent::CaptionCleared {});
        self.start_gap();
    }

    fn drain(&mut self) {
        let Some(session) = self.session.as_mut().filter(|s| !s.is_cancelled()) else {
            return;
        };
        let id = session.id;
        if let Some(ticket) = session.playback.drain(&mut session.queue, &mut self.channel) {
            self.arm_watchdog(id, ticket, self.config.playback_timeout());
        }
    }

    fn start_gap(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let id = session.id;
        let gap = session
            .mode
            .speaker_gap(self.config.batch_gap(), self.config.stream_gap());
        let internal = self.internal.clone();
        self.replace_timer_gap(tokio::spawn(async move {
            tokio::time::sleep(gap).await;
            let _ = internal.send(Internal::SpeakerGapElapsed { session: id });
        }));
    }

    fn arm_watchdog(&mut self, session: SessionId, ticket: PlaybackTicket, timeout: Duration) {
        let internal = self.internal.clone();
        if let Some(old) = self.watchdog.replace(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = internal.send(Internal::PlaybackTimedOut { session, ticket });
        })) {
            old.abort();
        }
    }

    fn replace_timer_gap(&mut self, task: JoinHandle<()>) {
        if let Some(old) = self.gap_timer.replace(task) {
            old.abort();
        }
    }

    fn abort_timers(&mut self) {
        if let Some(t) = self.gap_timer.take() {
            t.abort();
        }
        if let Some(t) = self.watchdog.take() {
            t.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    /// Push keys to the backend, or probe it with a minimal request when no
    /// keys are configured locally.
    fn check_credentials(&self, credentials: Option<Credentials>) {
        let dialogue = Arc::clone(&self.dialogue);
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let (pushed, result) = match credentials {
                Some(creds) => (true, dialogue.configure(creds).await),
                None => {
                    let probe = BatchRequest {
                        message: "test".into(),
                        target_persona: None,
                        target_personas: vec![PersonaId::Joy],
                    };
                    (false, dialogue.respond(probe).await.map(|_| ()))
                }
            };
            let _ = internal.send(Internal::CredentialsChecked { pushed, result });
        });
    }

    fn shutdown(&mut self) {
        self.capture.shutdown();
        self.cancel_session("shutdown");
        self.channel.preempt();
        info!("Console stopped");
    }

    fn emit(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }
}

/// Read a streaming turn to its end, forwarding decoded records as they are
/// produced. Stops quietly once `token` is cancelled.
async fn read_stream(
    dialogue: &dyn DialogueService,
    request: StreamRequest,
    session: SessionId,
    token: &CancellationToken,
    internal: &mpsc::UnboundedSender<Internal>,
) -> ConsoleResult<()> {
    let mut stream = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        s = dialogue.open_stream(request) => s?,
    };
    let mut decoder = StreamDecoder::new();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            n = stream.next() => n,
        };
        let records = match next {
            Some(Ok(chunk)) => decoder.push(&chunk),
            Some(Err(e)) => return Err(e),
            None => {
                let records = decoder.finish();
                if !records.is_empty() && !token.is_cancelled() {
                    let _ = internal.send(Internal::StreamRecords { session, records });
                }
                if decoder.skipped() > 0 {
                    debug!(%session, skipped = decoder.skipped(), "Stream lines skipped");
                }
                return Ok(());
            }
        };
        if token.is_cancelled() {
            return Ok(());
        }
        if !records.is_empty() {
            let _ = internal.send(Internal::StreamRecords { session, records });
        }
    }
}
