use super::types::Turn;

/// Lead-in of the synthetic turn left behind by a reset
pub const SUMMARY_LEAD_IN: &str = "Here is the summary of the previous conversation:";

/// Ordered conversation memory of one session.
///
/// Append-only between resets. A reset collapses everything into a single
/// user turn carrying the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryBuffer {
    turns: Vec<Turn>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Append a user turn and its answer together
    pub fn commit_exchange(&mut self, user: Turn, model: Turn) {
        self.turns.reserve(2);
        self.turns.push(user);
        self.turns.push(model);
    }

    pub fn size(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Copy of the current turns, ready to send to the LLM
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Drop every turn and keep only the summary
    pub fn reset(&mut self, summary_text: &str) {
        self.turns.clear();
        self.turns
            .push(Turn::user(format!("{}\n{}", SUMMARY_LEAD_IN, summary_text)));
    }
}
