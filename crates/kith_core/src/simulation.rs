use serde::{Deserialize, Serialize};

/// Hard cap on a one-shot generated transcript.
pub const MAX_BATCH_TURNS: usize = 50;
/// Hard cap on a live session transcript, user and oracle turns combined.
pub const MAX_LIVE_TURNS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Speech,
    Thought,
    Feeling,
    Action,
    /// Synthetic turn recording an oracle failure inside a live session.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub actor: String,
    pub kind: TurnKind,
    pub content: String,
}

impl Turn {
    pub fn speech(actor: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            kind: TurnKind::Speech,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            actor: "system".to_string(),
            kind: TurnKind::Error,
            content: content.into(),
        }
    }
}
