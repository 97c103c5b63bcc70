//! Incremental NDJSON decoder for streamed dialogue turns.
//!
//! Chunks may split a line anywhere, including inside a multi-byte UTF-8
//! sequence, so reassembly happens on raw bytes and only complete lines are
//! decoded. A line that does not parse is logged and skipped.

use bytes::BytesMut;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::persona::{PersonaId, Utterance};

/// Persona name the service uses for its own status lines.
const SYSTEM_PERSONA: &str = "System";

/// Longest line kept while waiting for its terminator.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// One decoded line of a dialogue response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    Utterance(Utterance),
    /// A status line from the service itself; shown, never spoken.
    Notice(String),
}

/// Loose wire shape of one line; both fields must be present and non-empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLine {
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl WireLine {
    pub fn into_record(self) -> Option<StreamRecord> {
        let persona = self.persona.filter(|p| !p.trim().is_empty())?;
        let text = self.text.filter(|t| !t.trim().is_empty())?;

        if persona.trim() == SYSTEM_PERSONA {
            return Some(StreamRecord::Notice(text));
        }
        match persona.parse::<PersonaId>() {
            Ok(id) if id.is_speaker() => Some(StreamRecord::Utterance(Utterance::new(id, text))),
            Ok(_) => {
                debug!(persona = %persona, "Skipping line from non-speaking persona");
                None
            }
            Err(e) => {
                warn!("Skipping stream line: {}", e);
                None
            }
        }
    }
}

/// Reassembly buffer turning arbitrary byte chunks into ordered records.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    /// Dropping the rest of an overlong line up to its terminator.
    discarding: bool,
    finished: bool,
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every fully terminated line in it. The
    /// trailing fragment is kept for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        if self.finished {
            warn!(len = chunk.len(), "Chunk pushed after end of stream, ignoring");
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.buf.split_to(pos + 1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(record) = self.decode_line(&line[..pos]) {
                out.push(record);
            }
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_LINE_BYTES {
            if !self.discarding {
                warn!(limit = MAX_LINE_BYTES, "Stream line too long, skipping it");
                self.skipped += 1;
                self.discarding = true;
            }
            self.buf.clear();
            self.scanned = 0;
        }
        out
    }

    /// End of stream: decode any unterminated remainder. No records are
    /// produced after this.
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let rest = self.buf.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return Vec::new();
        }
        self.decode_line(&rest).into_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Lines dropped because they were not valid records.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamRecord> {
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s.trim(),
            Err(e) => {
                warn!("Skipping non-UTF-8 stream line: {}", e);
                self.skipped += 1;
                return None;
            }
        };
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<WireLine>(line) {
            Ok(wire) => {
                let record = wire.into_record();
                if record.is_none() {
                    self.skipped += 1;
                }
                record
            }
            Err(e) => {
                warn!("Skipping malformed stream line: {} (input: {})", e, line);
                self.skipped += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(persona: PersonaId, text: &str) -> StreamRecord {
        StreamRecord::Utterance(Utterance::new(persona, text))
    }

    #[test]
    fn test_partial_line_held_until_completed() {
        let mut decoder = StreamDecoder::new();

        let first = decoder.push(br#"{"persona":"Joy","text":"hi"}
{"persona":"Ang"#);
        assert_eq!(first, vec![utterance(PersonaId::Joy, "hi")]);

        let second = decoder.push(br#"er","text":"no"}
"#);
        assert_eq!(second, vec![utterance(PersonaId::Anger, "no")]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut decoder = StreamDecoder::new();
        let records = decoder.push(
            b"{\"persona\":\"Joy\",\"text\":\"one\"}\nnot-json\n{\"persona\":\"Fear\",\"text\":\"two\"}\n",
        );
        assert_eq!(
            records,
            vec![
                utterance(PersonaId::Joy, "one"),
                utterance(PersonaId::Fear, "two"),
            ]
        );
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_split_inside_multibyte_character() {
        let line = "{\"persona\":\"Joy\",\"text\":\"caf\u{e9} \u{1f389}\"}\n".as_bytes();
        let mut decoder = StreamDecoder::new();
        let mut records = Vec::new();
        for byte in line {
            records.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(records, vec![utterance(PersonaId::Joy, "caf\u{e9} \u{1f389}")]);
    }

    #[test]
    fn test_missing_fields_and_unknown_personas_skipped() {
        let mut decoder = StreamDecoder::new();
        let records = decoder.push(
            concat!(
                "{\"persona\":\"Joy\"}\n",
                "{\"text\":\"orphan\"}\n",
                "{\"persona\":\"Joy\",\"text\":\"\"}\n",
                "{\"persona\":\"Bing Bong\",\"text\":\"hello\"}\n",
                "{\"persona\":\"Headquarters\",\"text\":\"idle\"}\n",
                "\n",
                "{\"persona\":\"Sadness\",\"text\":\"oh\"}\n",
            )
            .as_bytes(),
        );
        assert_eq!(records, vec![utterance(PersonaId::Sadness, "oh")]);
        assert_eq!(decoder.skipped(), 5);
    }

    #[test]
    fn test_system_line_becomes_notice() {
        let mut decoder = StreamDecoder::new();
        let records =
            decoder.push(b"{\"persona\":\"System\",\"text\":\"Connection interrupted.\"}\n");
        assert_eq!(
            records,
            vec![StreamRecord::Notice("Connection interrupted.".into())]
        );
    }

    #[test]
    fn test_finish_flushes_unterminated_line_once() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder
            .push(br#"{"persona":"Disgust","text":"ugh"}"#)
            .is_empty());
        assert_eq!(decoder.finish(), vec![utterance(PersonaId::Disgust, "ugh")]);
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
        assert!(decoder
            .push(b"{\"persona\":\"Joy\",\"text\":\"late\"}\n")
            .is_empty());
    }

    #[test]
    fn test_overlong_line_dropped_up_to_its_newline() {
        let mut decoder = StreamDecoder::new();
        let chunk = vec![b'x'; 4096];
        for _ in 0..(MAX_LINE_BYTES / chunk.len() + 2) {
            assert!(decoder.push(&chunk).is_empty());
        }
        assert!(decoder.buf.len() <= MAX_LINE_BYTES);

        let records = decoder.push(b"xxxx\n{\"persona\":\"Fear\",\"text\":\"ok\"}\n");
        assert_eq!(records, vec![utterance(PersonaId::Fear, "ok")]);
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = StreamDecoder::new();
        let records = decoder.push(b"{\"persona\":\"Joy\",\"text\":\"a\"}\r\n");
        assert_eq!(records, vec![utterance(PersonaId::Joy, "a")]);
    }
}
