//! Append-only conversation history

use serde::{Deserialize, Serialize};

/// One completed transcript/reply exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub transcript: String,
    pub reply: String,
}

impl Turn {
    pub fn new(transcript: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            reply: reply.into(),
        }
    }
}

/// Turns in the order they completed. Never reordered or edited.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn and return its index
    pub fn append(&mut self, turn: Turn) -> usize {
        self.turns.push(turn);
        self.turns.len() - 1
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut log = ConversationLog::new();
        assert!(log.is_empty());
        assert_eq!(log.append(Turn::new("Hello", "Hi there")), 0);
        assert_eq!(log.append(Turn::new("Price?", "It depends")), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.turns()[0].transcript, "Hello");
        assert_eq!(log.turns()[1].reply, "It depends");
    }
}
