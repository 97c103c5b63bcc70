//! Arrival-ordered prefetch queue.
//!
//! Utterances are admitted in production order and get consecutive sequence
//! numbers. Their audio is fetched concurrently and may resolve in any order;
//! a resolved item only becomes playable once every earlier item has
//! resolved too, so `pop_front` always yields the lowest outstanding sequence.
//! Failed fetches leave a gap that is skipped.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use crate::error::ConsoleResult;
use crate::persona::Utterance;
use crate::tts::AudioClip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub seq: u64,
    pub utterance: Utterance,
    pub audio: AudioClip,
}

#[derive(Debug)]
enum Slot {
    Fetching(Utterance),
    Resolved(Option<QueueItem>),
}

#[derive(Debug, Default)]
pub struct PrefetchQueue {
    next_seq: u64,
    /// Lowest sequence not yet moved to `ready`.
    cursor: u64,
    pending: BTreeMap<u64, Slot>,
    ready: VecDeque<QueueItem>,
    dropped: usize,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an utterance whose audio is about to be fetched.
    pub fn admit(&mut self, utterance: Utterance) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq, Slot::Fetching(utterance));
        seq
    }

    /// Record the outcome of a fetch. Returns how many items became
    /// playable. Unknown or already-resolved sequences are ignored.
    pub fn resolve(&mut self, seq: u64, result: ConsoleResult<AudioClip>) -> usize {
        let utterance = match self.pending.remove(&seq) {
            Some(Slot::Fetching(u)) => u,
            Some(resolved) => {
                self.pending.insert(seq, resolved);
                debug!(seq, "Duplicate resolution ignored");
                return 0;
            }
            None => {
                debug!(seq, "Resolution for unknown item ignored");
                return 0;
            }
        };

        let slot = match result {
            Ok(audio) => Slot::Resolved(Some(QueueItem {
                seq,
                utterance,
                audio,
            })),
            Err(e) => {
                warn!(seq, persona = %utterance.persona, "Audio fetch failed, skipping: {}", e);
                self.dropped += 1;
                Slot::Resolved(None)
            }
        };
        self.pending.insert(seq, slot);
        self.release_prefix()
    }

    fn release_prefix(&mut self) -> usize {
        let mut released = 0;
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.cursor || matches!(entry.get(), Slot::Fetching(_)) {
                break;
            }
            if let Slot::Resolved(Some(item)) = entry.remove() {
                self.ready.push_back(item);
                released += 1;
            }
            self.cursor += 1;
        }
        released
    }

    /// Next playable item in arrival order.
    pub fn pop_front(&mut self) -> Option<QueueItem> {
        self.ready.pop_front()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Nothing fetching, waiting for an earlier item, or ready to play.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.ready.is_empty()
    }

    /// Items whose audio could not be fetched.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Utterances admitted so far.
    pub fn admitted(&self) -> u64 {
        self.next_seq
    }

    /// Forget everything. Fetches still running will resolve as unknown.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.ready.clear();
        self.cursor = self.next_seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsoleError;
    use crate::persona::PersonaId;

    fn utt(persona: PersonaId, text: &str) -> Utterance {
        Utterance::new(persona, text)
    }

    fn clip(byte: u8) -> AudioClip {
        AudioClip::new(vec![byte])
    }

    #[test]
    fn test_out_of_order_resolution_keeps_arrival_order() {
        let mut q = PrefetchQueue::new();
        let a = q.admit(utt(PersonaId::Joy, "one"));
        let b = q.admit(utt(PersonaId::Anger, "two"));
        let c = q.admit(utt(PersonaId::Fear, "three"));

        assert_eq!(q.resolve(c, Ok(clip(3))), 0);
        assert_eq!(q.resolve(b, Ok(clip(2))), 0);
        assert!(!q.has_ready());
        assert_eq!(q.resolve(a, Ok(clip(1))), 3);

        let order: Vec<_> = std::iter::from_fn(|| q.pop_front())
            .map(|i| i.utterance.text)
            .collect();
        assert_eq!(order, vec!["one", "two", "three"]);
        assert!(q.is_drained());
    }

    #[test]
    fn test_failed_fetch_is_skipped() {
        let mut q = PrefetchQueue::new();
        let a = q.admit(utt(PersonaId::Joy, "one"));
        let b = q.admit(utt(PersonaId::Sadness, "two"));
        let c = q.admit(utt(PersonaId::Disgust, "three"));

        q.resolve(
            a,
            Err(ConsoleError::Synthesis {
                persona: PersonaId::Joy,
                reason: "boom".into(),
            }),
        );
        assert_eq!(q.resolve(c, Ok(clip(3))), 0);
        assert_eq!(q.resolve(b, Ok(clip(2))), 2);

        assert_eq!(q.pop_front().map(|i| i.seq), Some(b));
        assert_eq!(q.pop_front().map(|i| i.seq), Some(c));
        assert_eq!(q.dropped(), 1);
        assert!(q.is_drained());
    }

    #[test]
    fn test_all_failed_still_drains() {
        let mut q = PrefetchQueue::new();
        let a = q.admit(utt(PersonaId::Joy, "one"));
        assert!(!q.is_drained());
        q.resolve(a, Err(ConsoleError::Disconnected("x".into())));
        assert!(q.is_drained());
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn test_clear_discards_late_results() {
        let mut q = PrefetchQueue::new();
        let a = q.admit(utt(PersonaId::Joy, "one"));
        let b = q.admit(utt(PersonaId::Fear, "two"));
        q.resolve(a, Ok(clip(1)));
        assert!(q.has_ready());

        q.clear();
        assert!(q.is_drained());
        assert_eq!(q.resolve(b, Ok(clip(2))), 0);
        assert!(q.is_drained());

        let c = q.admit(utt(PersonaId::Anger, "three"));
        assert_eq!(q.resolve(c, Ok(clip(3))), 1);
        assert_eq!(q.pop_front().map(|i| i.utterance.text), Some("three".into()));
    }

    #[test]
    fn test_duplicate_resolution_ignored() {
        let mut q = PrefetchQueue::new();
        let a = q.admit(utt(PersonaId::Joy, "one"));
        let b = q.admit(utt(PersonaId::Joy, "two"));
        q.resolve(b, Ok(clip(2)));
        assert_eq!(q.resolve(b, Ok(clip(9))), 0);
        assert_eq!(q.resolve(a, Ok(clip(1))), 2);
        q.pop_front();
        assert_eq!(q.pop_front().map(|i| i.audio), Some(clip(2)));
    }
}
