//! Single-flight playback scheduler.
//!
//! Drains the prefetch queue one item at a time:
//! `Idle -> Loading -> Playing -> Gap -> Idle`. The persona switch, caption
//! and playback start all happen on the ready signal, never separately. A
//! failed or timed-out item finishes like a normal one so the queue keeps
//! moving.

use tracing::{debug, warn};

use super::channel::AudioChannel;
use super::queue::{PrefetchQueue, QueueItem};
use crate::tts::PlaybackTicket;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Loading { ticket: PlaybackTicket, item: QueueItem },
    Playing { ticket: PlaybackTicket, item: QueueItem },
    /// Pause between speakers.
    Gap,
}

#[derive(Debug)]
pub struct PlaybackScheduler {
    phase: SchedulerPhase,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
        }
    }

    pub fn phase(&self) -> &SchedulerPhase {
        &self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SchedulerPhase::Idle
    }

    pub fn current_ticket(&self) -> Option<PlaybackTicket> {
        match &self.phase {
            SchedulerPhase::Loading { ticket, .. } | SchedulerPhase::Playing { ticket, .. } => {
                Some(*ticket)
            }
            _ => None,
        }
    }

    /// Start the next item if idle. Idempotent: does nothing while an item
    /// is loading, playing or in its gap, or when nothing is ready.
    /// Returns the ticket of the loaded item.
    pub fn drain(
        &mut self,
        queue: &mut PrefetchQueue,
        channel: &mut AudioChannel,
    ) -> Option<PlaybackTicket> {
        if !self.is_idle() {
            return None;
        }
        let item = queue.pop_front()?;
        debug!(seq = item.seq, persona = %item.utterance.persona, "Dequeued");
        let ticket = channel.load(item.audio.clone());
        self.phase = SchedulerPhase::Loading { ticket, item };
        Some(ticket)
    }

    /// The loaded clip can play. Starts it and returns the item so its
    /// persona and caption can be shown together with playback.
    pub fn on_ready(
        &mut self,
        ticket: PlaybackTicket,
        channel: &mut AudioChannel,
    ) -> Option<&QueueItem> {
        let phase = std::mem::replace(&mut self.phase, SchedulerPhase::Idle);
        match phase {
            SchedulerPhase::Loading { ticket: t, item } if t == ticket => {
                if !channel.play(ticket) {
                    warn!(ticket, "Channel lost before playback start");
                    channel.release(ticket);
                    self.phase = SchedulerPhase::Gap;
                    return None;
                }
                self.phase = SchedulerPhase::Playing { ticket, item };
                match &self.phase {
                    SchedulerPhase::Playing { item, .. } => Some(item),
                    _ => None,
                }
            }
            other => {
                debug!(ticket, "Stale ready signal");
                self.phase = other;
                None
            }
        }
    }

    /// The clip ended, failed or timed out. Frees the channel and enters the
    /// speaker gap. Returns false for signals that are not current.
    pub fn on_finished(&mut self, ticket: PlaybackTicket, channel: &mut AudioChannel) -> bool {
        if self.current_ticket() != Some(ticket) {
            debug!(ticket, "Stale finish signal");
            return false;
        }
        channel.release(ticket);
        self.phase = SchedulerPhase::Gap;
        true
    }

    /// The pause between speakers is over.
    pub fn on_gap_elapsed(&mut self) -> bool {
        if self.phase != SchedulerPhase::Gap {
            return false;
        }
        self.phase = SchedulerPhase::Idle;
        true
    }

    /// Drop the current item without touching the channel.
    pub fn reset(&mut self) {
        self.phase = SchedulerPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{PersonaId, Utterance};
    use crate::tts::{AudioClip, AudioSink};

    struct NullSink;

    impl AudioSink for NullSink {
        fn load(&mut self, _ticket: PlaybackTicket, _clip: AudioClip) {}
        fn play(&mut self, _ticket: PlaybackTicket) {}
        fn pause_and_reset(&mut self) {}
    }

    fn setup(texts: &[&str]) -> (PrefetchQueue, AudioChannel) {
        let mut queue = PrefetchQueue::new();
        for (i, text) in texts.iter().enumerate() {
            let seq = queue.admit(Utterance::new(PersonaId::Joy, *text));
            queue.resolve(seq, Ok(AudioClip::new(vec![i as u8])));
        }
        (queue, AudioChannel::new(Box::new(NullSink)))
    }

    #[test]
    fn test_single_flight_cycle() {
        let (mut queue, mut channel) = setup(&["a", "b"]);
        let mut sched = PlaybackScheduler::new();

        let t1 = sched.drain(&mut queue, &mut channel).unwrap();
        // Second trigger while loading is a no-op.
        assert!(sched.drain(&mut queue, &mut channel).is_none());
        assert!(queue.has_ready());

        let item = sched.on_ready(t1, &mut channel).unwrap();
        assert_eq!(item.utterance.text, "a");
        assert!(channel.is_playing());
        assert!(sched.drain(&mut queue, &mut channel).is_none());

        assert!(sched.on_finished(t1, &mut channel));
        assert!(!channel.is_busy());
        assert_eq!(sched.phase(), &SchedulerPhase::Gap);
        assert!(sched.drain(&mut queue, &mut channel).is_none());

        assert!(sched.on_gap_elapsed());
        let t2 = sched.drain(&mut queue, &mut channel).unwrap();
        assert_ne!(t1, t2);
        assert_eq!(
            sched.on_ready(t2, &mut channel).map(|i| i.utterance.text.clone()),
            Some("b".to_string())
        );
    }

    #[test]
    fn test_failure_before_ready_advances() {
        let (mut queue, mut channel) = setup(&["a", "b"]);
        let mut sched = PlaybackScheduler::new();
        let t1 = sched.drain(&mut queue, &mut channel).unwrap();
        assert!(sched.on_finished(t1, &mut channel));
        assert!(sched.on_gap_elapsed());
        assert!(sched.drain(&mut queue, &mut channel).is_some());
    }

    #[test]
    fn test_stale_signals_ignored() {
        let (mut queue, mut channel) = setup(&["a"]);
        let mut sched = PlaybackScheduler::new();
        let t1 = sched.drain(&mut queue, &mut channel).unwrap();

        assert!(sched.on_ready(t1 + 7, &mut channel).is_none());
        assert!(!sched.on_finished(t1 + 7, &mut channel));
        assert!(matches!(sched.phase(), SchedulerPhase::Loading { .. }));
        assert!(!sched.on_gap_elapsed());
    }

    #[test]
    fn test_ready_after_preempt_does_not_play() {
        let (mut queue, mut channel) = setup(&["a"]);
        let mut sched = PlaybackScheduler::new();
        let t1 = sched.drain(&mut queue, &mut channel).unwrap();
        channel.preempt();
        assert!(sched.on_ready(t1, &mut channel).is_none());
        assert!(!channel.is_busy());
    }
}
