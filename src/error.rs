//! The error hierarchy (§7): every failure the core produces fits one of six
//! kinds, each with its own handling policy. Call sites match on the kind
//! rather than sniffing message text.

use thiserror::Error;

/// Errors the core can surface. Variants map 1:1 onto §7's six kinds.
#[derive(Debug, Error, Clone)]
pub enum ServerError {
    /// Kind 1 — transport read/write failed. Handled by tearing the session
    /// down exactly once; other entities learn about it via `Disconnect`.
    #[error("transport error: {0}")]
    Transport(String),

    /// Kind 2 — malformed frame or unknown type/payload.
    #[error("malformed message")]
    MalformedMessage,

    /// Kind 3 — the referenced gameId has no live coordinator.
    #[error("unknown game")]
    UnknownGame,

    /// Kind 4 — admission was refused: duplicate name, wrong state for the
    /// requested transition, and similar caller-visible rejections.
    #[error("{0}")]
    Admission(AdmissionError),

    /// Kind 5 — the Repository failed to save or expire a summary. Logged
    /// and otherwise ignored; the in-memory core remains authoritative.
    #[error("repository error: {0}")]
    Repository(String),

    /// Kind 6 — an internal invariant was violated. Indicates a bug; the
    /// caller is expected to fail fast rather than try to recover.
    #[error("internal error: {0}")]
    Internal(String),
}

/// The specific admission rejections a command can hit (kind 4).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("name is already in use")]
    NameTaken,
    #[error("name must not be empty")]
    EmptyName,
    #[error("game cannot be started from its current state")]
    NotStartable,
    #[error("player is not a participant of this game")]
    NotParticipant,
    #[error("question_count must be positive and not exceed the catalog size")]
    InvalidQuestionCount,
}

impl ServerError {
    /// The short string sent back on the session's own channel for kinds
    /// (2)-(4). Never broadcast; never shown to anyone but the sender.
    pub fn wire_message(&self) -> String {
        match self {
            ServerError::MalformedMessage => "malformed message".to_string(),
            ServerError::UnknownGame => "unknown game".to_string(),
            ServerError::Admission(inner) => inner.to_string(),
            other => other.to_string(),
        }
    }
}
