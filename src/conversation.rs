//! Conversation history with a compaction policy.
//!
//! The store only records turns and decides when compaction is due; the
//! summarisation call itself is driven by the session so it can be sequenced
//! with the answer to the pending message.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SUMMARY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub sequence: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
    exchange_count: u32,
    next_sequence: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user message that counts toward compaction.
    pub fn record_user(&mut self, text: impl Into<String>) -> &ConversationTurn {
        self.exchange_count += 1;
        self.record(Role::User, text)
    }

    /// Record a turn without touching `exchange_count`.
    pub fn record(&mut self, role: Role, text: impl Into<String>) -> &ConversationTurn {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.turns.push(ConversationTurn { role, text: text.into(), sequence });
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// User turns since the last compaction.
    pub fn exchange_count(&self) -> u32 {
        self.exchange_count
    }

    pub fn needs_compaction(&self, threshold: u32) -> bool {
        threshold > 0 && self.exchange_count >= threshold
    }

    /// All turns flattened into one block for summarisation.
    pub fn history_block(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role.label(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace the history with a single summary turn and reset the count.
    pub fn compact(&mut self, summary: impl Into<String>) {
        let dropped = self.turns.len();
        self.turns.clear();
        self.exchange_count = 0;
        self.record(Role::System, summary);
        log::info!("[SESSION] Compacted {} turns into one summary", dropped);
    }

    /// Text of the retained summary turn, if the history was compacted.
    pub fn summary(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
    }

    /// Forget every turn, summary included.
    pub fn clear(&mut self) {
        let dropped = self.turns.len();
        self.turns.clear();
        self.exchange_count = 0;
        log::info!("[SESSION] Cleared {} turns", dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_turns_count_exchanges() {
        let mut store = ConversationStore::new();
        store.record_user("hi");
        store.record(Role::Assistant, "hello");
        store.record_user("how are you");
        assert_eq!(store.exchange_count(), 2);
        assert_eq!(store.len(), 3);
        assert!(!store.needs_compaction(5));
    }

    #[test]
    fn sequence_numbers_increase_across_compaction() {
        let mut store = ConversationStore::new();
        let a = store.record_user("a").sequence;
        let b = store.record(Role::Assistant, "b").sequence;
        store.compact("summary");
        let c = store.turns()[0].sequence;
        assert!(a < b && b < c);
    }

    #[test]
    fn compaction_leaves_one_summary_turn() {
        let mut store = ConversationStore::new();
        for i in 0..5 {
            store.record_user(format!("q{i}"));
            store.record(Role::Assistant, format!("a{i}"));
        }
        assert!(store.needs_compaction(5));

        store.compact("They talked about five things.");
        assert_eq!(store.len(), 1);
        assert_eq!(store.exchange_count(), 0);
        assert_eq!(store.turns()[0].role, Role::System);
        assert_eq!(store.summary(), Some("They talked about five things."));
    }

    #[test]
    fn history_block_labels_roles() {
        let mut store = ConversationStore::new();
        store.record_user("what time is it");
        store.record(Role::Assistant, "noon");
        assert_eq!(store.history_block(), "USER: what time is it\nASSISTANT: noon");
    }

    #[test]
    fn clear_drops_summary_and_count() {
        let mut store = ConversationStore::new();
        store.record_user("weather?");
        store.compact("asked about weather");
        store.record_user("and tomorrow?");

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.exchange_count(), 0);
        assert_eq!(store.summary(), None);
        assert!(store.record_user("hi").sequence > 0);
    }

    #[test]
    fn zero_threshold_never_compacts() {
        let mut store = ConversationStore::new();
        store.record_user("x");
        assert!(!store.needs_compaction(0));
    }
}
