//! The single audio output channel.
//!
//! Exactly one clip can be loaded or playing at a time. The scheduler drives
//! it through `load` / `play` / `release`; capture may seize it at any moment
//! with `preempt`. Every load gets a fresh ticket, so signals from a clip that
//! was preempted or replaced can be recognised as stale.

use tracing::{debug, warn};

use crate::tts::{AudioClip, AudioSink, PlaybackTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Loading(PlaybackTicket),
    Playing(PlaybackTicket),
}

pub struct AudioChannel {
    sink: Box<dyn AudioSink>,
    state: ChannelState,
    next_ticket: PlaybackTicket,
}

impl AudioChannel {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            state: ChannelState::Free,
            next_ticket: 1,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != ChannelState::Free
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, ChannelState::Playing(_))
    }

    /// Ticket of the clip currently holding the channel.
    pub fn current(&self) -> Option<PlaybackTicket> {
        match self.state {
            ChannelState::Free => None,
            ChannelState::Loading(t) | ChannelState::Playing(t) => Some(t),
        }
    }

    pub fn is_current(&self, ticket: PlaybackTicket) -> bool {
        self.current() == Some(ticket)
    }

    /// Acquire the channel for `clip`. A clip still holding it is cut off.
    pub fn load(&mut self, clip: AudioClip) -> PlaybackTicket {
        if let Some(old) = self.current() {
            warn!(ticket = old, "Channel still held at load; resetting");
            self.sink.pause_and_reset();
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.state = ChannelState::Loading(ticket);
        debug!(ticket, bytes = clip.len(), "Loading clip");
        self.sink.load(ticket, clip);
        ticket
    }

    /// Start the loaded clip. Returns false if `ticket` is not the loaded one.
    pub fn play(&mut self, ticket: PlaybackTicket) -> bool {
        if self.state != ChannelState::Loading(ticket) {
            return false;
        }
        self.state = ChannelState::Playing(ticket);
        self.sink.play(ticket);
        true
    }

    /// Give the channel back after the clip ended or failed.
    pub fn release(&mut self, ticket: PlaybackTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.state = ChannelState::Free;
        true
    }

    /// Hard interrupt: stop and reset whatever holds the channel.
    /// Returns whether anything was loaded or playing.
    pub fn preempt(&mut self) -> bool {
        match self.current() {
            Some(ticket) => {
                debug!(ticket, "Channel preempted");
                self.sink.pause_and_reset();
                self.state = ChannelState::Free;
                true
            }
            None => false,
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<String>>>);

    impl AudioSink for RecordingSink {
        fn load(&mut self, ticket: PlaybackTicket, _clip: AudioClip) {
            self.0.lock().unwrap().push(format!("load {ticket}"));
        }
        fn play(&mut self, ticket: PlaybackTicket) {
            self.0.lock().unwrap().push(format!("play {ticket}"));
        }
        fn pause_and_reset(&mut self) {
            self.0.lock().unwrap().push("reset".into());
        }
    }

    #[test]
    fn test_load_play_release() {
        let sink = RecordingSink::default();
        let mut channel = AudioChannel::new(Box::new(sink.clone()));
        assert!(!channel.is_busy());

        let t = channel.load(AudioClip::new(vec![1, 2, 3]));
        assert_eq!(channel.state(), ChannelState::Loading(t));
        assert!(!channel.play(t + 1));
        assert!(channel.play(t));
        assert!(channel.is_playing());
        assert!(!channel.release(t + 1));
        assert!(channel.release(t));
        assert!(!channel.is_busy());

        assert_eq!(*sink.0.lock().unwrap(), vec!["load 1", "play 1"]);
    }

    #[test]
    fn test_preempt_only_when_busy() {
        let sink = RecordingSink::default();
        let mut channel = AudioChannel::new(Box::new(sink.clone()));
        assert!(!channel.preempt());

        let t = channel.load(AudioClip::new(vec![0]));
        channel.play(t);
        assert!(channel.preempt());
        assert!(!channel.is_current(t));
        assert!(!channel.release(t));

        assert_eq!(*sink.0.lock().unwrap(), vec!["load 1", "play 1", "reset"]);
    }

    #[test]
    fn test_tickets_are_fresh_per_load() {
        let mut channel = AudioChannel::new(Box::new(RecordingSink::default()));
        let a = channel.load(AudioClip::new(vec![0]));
        let b = channel.load(AudioClip::new(vec![0]));
        assert_ne!(a, b);
        assert!(channel.is_current(b));
        assert!(!channel.is_current(a));
    }
}
