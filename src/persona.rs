//! Persona roster and the utterance record that flows through the engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the six fixed identities. `Headquarters` is the idle display
/// state and never speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PersonaId {
    Headquarters,
    Joy,
    Sadness,
    Anger,
    Fear,
    Disgust,
}

impl PersonaId {
    /// Every persona that can be asked to speak, in display order.
    pub const SPEAKERS: [PersonaId; 5] = [
        PersonaId::Joy,
        PersonaId::Sadness,
        PersonaId::Anger,
        PersonaId::Fear,
        PersonaId::Disgust,
    ];

    /// The persona shown while nothing is being spoken.
    pub const IDLE: PersonaId = PersonaId::Headquarters;

    pub fn is_speaker(self) -> bool {
        self != PersonaId::Headquarters
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Headquarters => "Headquarters",
            Self::Joy => "Joy",
            Self::Sadness => "Sadness",
            Self::Anger => "Anger",
            Self::Fear => "Fear",
            Self::Disgust => "Disgust",
        }
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl FromStr for PersonaId {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Headquarters" => Ok(Self::Headquarters),
            "Joy" => Ok(Self::Joy),
            "Sadness" => Ok(Self::Sadness),
            "Anger" => Ok(Self::Anger),
            "Fear" => Ok(Self::Fear),
            "Disgust" => Ok(Self::Disgust),
            other => Err(UnknownPersona(other.to_string())),
        }
    }
}

/// One persona's single turn of text. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub persona: PersonaId,
    pub text: String,
}

impl Utterance {
    pub fn new(persona: PersonaId, text: impl Into<String>) -> Self {
        Self {
            persona,
            text: text.into(),
        }
    }
}

/// Normalize a persona selection: speakers only, no duplicates, roster order.
pub fn normalize_selection(personas: &[PersonaId]) -> Vec<PersonaId> {
    PersonaId::SPEAKERS
        .iter()
        .copied()
        .filter(|p| personas.contains(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roster_names() {
        assert_eq!("Joy".parse::<PersonaId>(), Ok(PersonaId::Joy));
        assert_eq!(" Anger ".parse::<PersonaId>(), Ok(PersonaId::Anger));
        assert_eq!(
            "Headquarters".parse::<PersonaId>(),
            Ok(PersonaId::Headquarters)
        );
        assert!("System".parse::<PersonaId>().is_err());
        assert!("joy".parse::<PersonaId>().is_err());
    }

    #[test]
    fn test_unknown_persona_error() {
        let err = "Bob".parse::<PersonaId>().unwrap_err();
        assert_eq!(err.to_string(), "unknown persona: Bob");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_headquarters_is_not_a_speaker() {
        assert!(!PersonaId::Headquarters.is_speaker());
        assert!(PersonaId::SPEAKERS.iter().all(|p| p.is_speaker()));
    }

    #[test]
    fn test_utterance_wire_shape() {
        let u = Utterance::new(PersonaId::Fear, "run!");
        let json = serde_json::to_string(&u).unwrap();
        assert_eq!(json, r#"{"persona":"Fear","text":"run!"}"#);
    }

    #[test]
    fn test_normalize_selection() {
        let picked = normalize_selection(&[
            PersonaId::Disgust,
            PersonaId::Headquarters,
            PersonaId::Joy,
            PersonaId::Disgust,
        ]);
        assert_eq!(picked, vec![PersonaId::Joy, PersonaId::Disgust]);
    }
}
