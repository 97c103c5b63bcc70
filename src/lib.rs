//! HQ Console: capture-to-playback coordination for multi-persona spoken
//! dialogue.
//!
//! User input (typed, or captured from continuous speech) is sent to a remote
//! dialogue service; the persona-tagged utterances that come back, as a batch
//! or as a stream, are synthesized and played strictly one at a time in the
//! order they were produced.

pub mod capture;
pub mod config;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod persona;
pub mod playback;
pub mod session;
pub mod tts;

pub use engine::{Console, ConsoleParts};
pub use error::{ConsoleError, ConsoleResult};
