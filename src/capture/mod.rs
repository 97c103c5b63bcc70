//! Continuous speech capture.
//!
//! `CaptureController` turns the recognizer's stream of partial transcripts
//! into debounced text submissions. A submission happens once no new result
//! has arrived for the silence window. While a call is active the recognizer
//! is restarted shortly after every end event.
//!
//! Timers run as spawned tasks that post a `CaptureTimer` back to the owner.
//! Each carries the generation it was armed with; re-arming or cancelling
//! bumps the generation, so a late timer is ignored.

pub mod recognizer;
pub mod state;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ipc::ConsoleEvent;
use crate::playback::channel::AudioChannel;

pub use recognizer::{IpcRecognizer, Recognizer};
pub use state::{CapturePhase, CaptureState, CaptureTransition};

/// Timer expiry posted back to the controller's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTimer {
    Silence(u64),
    Restart(u64),
}

/// What to do with a recognizer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Transient; the recognizer ends and restarts as usual.
    Ignore,
    /// The microphone cannot be used; the call was ended.
    EndCall,
}

/// Error kinds that mean capture cannot work until the user intervenes.
const FATAL_ERRORS: &[&str] = &["not-allowed", "service-not-allowed", "audio-capture"];

pub struct CaptureController {
    state: CaptureState,
    recognizer: Box<dyn Recognizer>,
    silence_window: Duration,
    restart_delay: Duration,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    timers: mpsc::UnboundedSender<CaptureTimer>,
    /// A start was requested and `on_started` has not arrived yet.
    starting: bool,
    shutting_down: bool,
    silence_gen: u64,
    restart_gen: u64,
    silence_task: Option<JoinHandle<()>>,
    restart_task: Option<JoinHandle<()>>,
}

impl CaptureController {
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        silence_window: Duration,
        restart_delay: Duration,
        events: mpsc::UnboundedSender<ConsoleEvent>,
        timers: mpsc::UnboundedSender<CaptureTimer>,
    ) -> Self {
        Self {
            state: CaptureState::default(),
            recognizer,
            silence_window,
            restart_delay,
            events,
            timers,
            starting: false,
            shutting_down: false,
            silence_gen: 0,
            restart_gen: 0,
            silence_task: None,
            restart_task: None,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn call_active(&self) -> bool {
        self.state.call_active
    }

    /// Begin continuous capture. Any AI audio is cut off first.
    pub fn start_call(&mut self, channel: &mut AudioChannel) {
        if channel.preempt() {
            debug!("Audio preempted by call start");
        }
        self.state.pending_transcript.clear();
        if self.state.call_active {
            debug!("Call already active");
            return;
        }
        info!("Call started");
        self.state.call_active = true;
        self.emit(ConsoleEvent::CallState { active: true });
        self.begin_recognition(true);
    }

    /// End continuous capture. Nothing restarts afterwards.
    pub fn stop_call(&mut self) {
        if !self.state.call_active {
            return;
        }
        info!("Call stopped");
        self.state.call_active = false;
        self.cancel_silence();
        self.cancel_restart();
        self.state.user_speaking = false;
        self.state.pending_transcript.clear();
        self.recognizer.stop();
        self.starting = false;
        self.state.apply(CaptureTransition::Ended);
        self.emit(ConsoleEvent::CallState { active: false });
        self.emit(ConsoleEvent::Listening { active: false });
    }

    pub fn on_started(&mut self) {
        self.starting = false;
        if !self.state.apply(CaptureTransition::Started) {
            debug!(phase = %self.state.phase, "Duplicate recognition start");
            return;
        }
        self.emit(ConsoleEvent::Listening { active: true });
    }

    /// Handle a partial or final transcript.
    ///
    /// Audio holding the output channel is preempted before anything else.
    /// Returns whether it was.
    pub fn on_partial_result(&mut self, transcript: &str, channel: &mut AudioChannel) -> bool {
        if !self.state.call_active {
            debug!("Recognition result outside a call ignored");
            return false;
        }
        let barged_in = channel.preempt();
        if barged_in {
            info!("Barge-in: AI audio interrupted");
        }

        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            return barged_in;
        }

        self.state.apply(CaptureTransition::Result);
        self.state.user_speaking = true;
        self.state.pending_transcript = trimmed.to_string();
        self.emit(ConsoleEvent::UserSpeaking {
            transcript: trimmed.to_string(),
        });
        self.arm_silence();
        barged_in
    }

    /// The silence window elapsed. Returns the text to submit, if any.
    pub fn on_silence_elapsed(&mut self, generation: u64) -> Option<String> {
        if generation != self.silence_gen || self.state.silence_deadline.is_none() {
            return None;
        }
        self.silence_task = None;
        self.state.silence_deadline = None;
        self.state.user_speaking = false;
        if !self.state.call_active {
            return None;
        }

        let text = std::mem::take(&mut self.state.pending_transcript);
        if text.is_empty() {
            return None;
        }
        self.state.apply(CaptureTransition::Submitted);
        // Recognition ends here; the end event schedules the restart.
        self.recognizer.stop();
        info!(text_len = text.len(), "Utterance submitted");
        self.emit(ConsoleEvent::Submitted { text: text.clone() });
        Some(text)
    }

    pub fn on_recognition_ended(&mut self) {
        self.starting = false;
        self.state.apply(CaptureTransition::Ended);
        self.state.user_speaking = false;
        self.emit(ConsoleEvent::Listening { active: false });

        if self.state.should_auto_restart(self.shutting_down) {
            debug!("Recognition ended; scheduling restart");
            self.schedule_restart();
        }
    }

    pub fn on_restart_due(&mut self, generation: u64) {
        if generation != self.restart_gen {
            return;
        }
        self.restart_task = None;
        if !self.state.should_auto_restart(self.shutting_down) {
            return;
        }
        self.begin_recognition(false);
    }

    /// Classify a recognizer error. Only microphone-unavailable kinds end the
    /// call; the rest are swallowed.
    pub fn on_error(&mut self, kind: &str) -> ErrorDisposition {
        let kind = kind.trim();
        if FATAL_ERRORS.contains(&kind) {
            warn!(kind, "Microphone unavailable; ending call");
            self.stop_call();
            self.emit(ConsoleEvent::Notice {
                text: "Microphone unavailable.".into(),
            });
            return ErrorDisposition::EndCall;
        }
        debug!(kind, "Transient recognition error ignored");
        ErrorDisposition::Ignore
    }

    /// A dialogue turn finished. Capture resumes if the call is on and the
    /// recognizer is not already running.
    pub fn resume_after_turn(&mut self) {
        if self.state.should_auto_restart(self.shutting_down)
            && !self.state.listening()
            && !self.starting
            && self.restart_task.is_none()
        {
            debug!("Resuming capture after turn");
            self.begin_recognition(false);
        }
    }

    /// Stop everything for process exit.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        self.stop_call();
    }

    /// A failed start is retried once, after the restart delay, only when
    /// `retry` is set. Otherwise capture stays idle until the current turn
    /// finishes or the call is started again.
    fn begin_recognition(&mut self, retry: bool) {
        if self.state.listening() || self.starting {
            return;
        }
        match self.recognizer.start() {
            Ok(()) => {
                self.starting = true;
            }
            Err(e) => {
                warn!(retry, "Failed to start recognition: {}", e);
                self.recognizer.stop();
                if retry {
                    self.schedule_restart();
                }
            }
        }
    }

    fn arm_silence(&mut self) {
        self.cancel_silence();
        self.state.silence_deadline = Some(Instant::now() + self.silence_window);
        let generation = self.silence_gen;
        let window = self.silence_window;
        let timers = self.timers.clone();
        self.silence_task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = timers.send(CaptureTimer::Silence(generation));
        }));
    }

    fn cancel_silence(&mut self) {
        self.silence_gen += 1;
        self.state.silence_deadline = None;
        if let Some(task) = self.silence_task.take() {
            task.abort();
        }
    }

    fn schedule_restart(&mut self) {
        self.cancel_restart();
        let generation = self.restart_gen;
        let delay = self.restart_delay;
        let timers = self.timers.clone();
        self.restart_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(CaptureTimer::Restart(generation));
        }));
    }

    fn cancel_restart(&mut self) {
        self.restart_gen += 1;
        if let Some(task) = self.restart_task.take() {
            task.abort();
        }
    }

    fn emit(&self, event: ConsoleEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(task) = self.silence_task.take() {
            task.abort();
        }
        if let Some(task) = self.restart_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::{AudioClip, AudioSink, PlaybackTicket};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingRecognizer {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail_next: Arc<AtomicUsize>,
    }

    impl Recognizer for CountingRecognizer {
        fn start(&mut self) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("recognizer busy");
            }
            Ok(())
        }
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullSink;

    impl AudioSink for NullSink {
        fn load(&mut self, _ticket: PlaybackTicket, _clip: AudioClip) {}
        fn play(&mut self, _ticket: PlaybackTicket) {}
        fn pause_and_reset(&mut self) {}
    }

    struct Harness {
        capture: CaptureController,
        recognizer: CountingRecognizer,
        channel: AudioChannel,
        timers: mpsc::UnboundedReceiver<CaptureTimer>,
        _events: mpsc::UnboundedReceiver<ConsoleEvent>,
    }

    fn harness() -> Harness {
        let recognizer = CountingRecognizer::default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let capture = CaptureController::new(
            Box::new(recognizer.clone()),
            Duration::from_millis(1200),
            Duration::from_millis(100),
            event_tx,
            timer_tx,
        );
        Harness {
            capture,
            recognizer,
            channel: AudioChannel::new(Box::new(NullSink)),
            timers: timer_rx,
            _events: event_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_debounce_submits_last_transcript() {
        let mut h = harness();
        h.capture.start_call(&mut h.channel);
        h.capture.on_started();

        h.capture.on_partial_result("what", &mut h.channel);
        tokio::time::advance(Duration::from_millis(800)).await;
        h.capture.on_partial_result("what is", &mut h.channel);
        tokio::time::advance(Duration::from_millis(800)).await;
        h.capture.on_partial_result("what is fear", &mut h.channel);

        // Only the last timer can submit.
        tokio::time::advance(Duration::from_millis(1199)).await;
        tokio::task::yield_now().await;
        while let Ok(CaptureTimer::Silence(generation)) = h.timers.try_recv() {
            assert_eq!(h.capture.on_silence_elapsed(generation), None);
        }

        tokio::time::advance(Duration::from_millis(2)).await;
        let timer = h.timers.recv().await.unwrap();
        let CaptureTimer::Silence(generation) = timer else {
            panic!("expected silence timer, got {timer:?}");
        };
        assert_eq!(
            h.capture.on_silence_elapsed(generation).as_deref(),
            Some("what is fear")
        );
        assert_eq!(h.recognizer.stops.load(Ordering::SeqCst), 1);
        assert!(h.capture.state().pending_transcript.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_does_not_reset_timer() {
        let mut h = harness();
        h.capture.start_call(&mut h.channel);
        h.capture.on_partial_result("hello", &mut h.channel);
        tokio::time::advance(Duration::from_millis(1000)).await;
        h.capture.on_partial_result("   ", &mut h.channel);
        tokio::time::advance(Duration::from_millis(201)).await;

        let Some(CaptureTimer::Silence(generation)) = h.timers.recv().await else {
            panic!("expected silence timer");
        };
        assert_eq!(h.capture.on_silence_elapsed(generation).as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_end_only_while_call_active() {
        let mut h = harness();
        h.capture.start_call(&mut h.channel);
        h.capture.on_started();
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);

        h.capture.on_recognition_ended();
        tokio::time::advance(Duration::from_millis(100)).await;
        let Some(CaptureTimer::Restart(generation)) = h.timers.recv().await else {
            panic!("expected restart timer");
        };
        h.capture.on_restart_due(generation);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);

        h.capture.on_started();
        h.capture.stop_call();
        h.capture.on_recognition_ended();
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(h.timers.try_recv().is_err());
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partial_result_preempts_audio() {
        let mut h = harness();
        h.capture.start_call(&mut h.channel);
        let t = h.channel.load(AudioClip::new(vec![0]));
        h.channel.play(t);

        assert!(h.capture.on_partial_result("wait", &mut h.channel));
        assert!(!h.channel.is_busy());
        assert!(!h.capture.on_partial_result("wait a second", &mut h.channel));
    }

    #[tokio::test]
    async fn test_results_ignored_without_call() {
        let mut h = harness();
        let t = h.channel.load(AudioClip::new(vec![0]));
        assert!(!h.capture.on_partial_result("hello", &mut h.channel));
        assert!(h.channel.is_current(t));
        assert!(h.capture.state().pending_transcript.is_empty());
    }

    #[tokio::test]
    async fn test_error_dispositions() {
        let mut h = harness();
        h.capture.start_call(&mut h.channel);
        assert_eq!(h.capture.on_error("no-speech"), ErrorDisposition::Ignore);
        assert_eq!(h.capture.on_error("network"), ErrorDisposition::Ignore);
        assert!(h.capture.call_active());
        assert_eq!(h.capture.on_error("not-allowed"), ErrorDisposition::EndCall);
        assert!(!h.capture.call_active());
    }

    #[tokio::test]
    async fn test_resume_after_turn_only_when_idle() {
        let mut h = harness();
        h.capture.resume_after_turn();
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 0);

        h.capture.start_call(&mut h.channel);
        h.capture.on_started();
        h.capture.resume_after_turn();
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);

        h.capture.stop_call();
        h.capture.start_call(&mut h.channel);
        h.capture.on_started();
        h.capture.on_recognition_ended();
        // A restart is already scheduled.
        h.capture.resume_after_turn();
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_retries_once_then_waits_for_turn_end() {
        let mut h = harness();
        h.recognizer.fail_next.store(2, Ordering::SeqCst);
        h.capture.start_call(&mut h.channel);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        let Some(CaptureTimer::Restart(generation)) = h.timers.recv().await else {
            panic!("expected restart timer");
        };
        h.capture.on_restart_due(generation);
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 2);

        // The second failure leaves capture idle instead of spinning.
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert!(h.timers.try_recv().is_err());
        assert!(!h.capture.state().listening());

        h.capture.resume_after_turn();
        assert_eq!(h.recognizer.starts.load(Ordering::SeqCst), 3);
    }
}
