//! Prompt assembly from stored conversation history.

use chatlog_common::history::sort_chronological;
use chatlog_common::{ChatMessage, PromptMessage};

/// Number of stored messages folded into each completion request.
pub const HISTORY_WINDOW: usize = 10;

/// Builds the message list sent to the completion service.
///
/// The window is fixed at `HISTORY_WINDOW`; roles are passed through as
/// stored and only the appended message is forced to the user role.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Chronological history (oldest first) followed by `new_message`.
    ///
    /// `history` may arrive in any order, typically newest first straight
    /// from the store. Only the `HISTORY_WINDOW` most recent entries are
    /// kept, so the result never exceeds `HISTORY_WINDOW + 1` messages.
    pub fn build(&self, history: &[ChatMessage], new_message: &str) -> Vec<PromptMessage> {
        let mut window = history.to_vec();
        sort_chronological(&mut window);
        let skip = window.len().saturating_sub(HISTORY_WINDOW);

        let mut prompt: Vec<PromptMessage> = window[skip..]
            .iter()
            .map(ChatMessage::to_prompt)
            .collect();
        prompt.push(PromptMessage::user(new_message));
        prompt
    }
}
