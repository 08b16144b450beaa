use std::collections::VecDeque;

/// Exchanges kept as context for the next chat turn.
pub const CHAT_HISTORY_TURNS: usize = 3;

/// Questions run by `docket demo`, in order.
pub const DEMO_QUESTIONS: [&str; 8] = [
    "How many personal injury cases do we have in the system?",
    "Which attorney is handling the most matters?",
    "What's the breakdown of case stages in our matters?",
    "Show me all matters that were settled pre-litigation",
    "Which clients have the most matters with us?",
    "How many matters were closed this year?",
    "What are the different record types we handle?",
    "Show me the average case duration for closed matters",
];

/// The most recent user/assistant exchanges of a chat session.
#[derive(Debug)]
pub struct ChatHistory {
    turns: VecDeque<(String, String)>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records an exchange, forgetting the oldest beyond capacity.
    pub fn push(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back((user.into(), assistant.into()));
    }

    /// Plain-text transcript for the `history` input. Empty before the first exchange.
    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }
        let mut out = String::from("Recent conversation:\n");
        for (user, assistant) in &self.turns {
            out.push_str(&format!("User: {user}\nAssistant: {assistant}\n\n"));
        }
        out.truncate(out.trim_end().len());
        out
    }
}

/// True for the words that end a chat session.
pub fn is_exit(line: &str) -> bool {
    matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "exit" | "quit" | "bye"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_last_exchanges() {
        let mut history = ChatHistory::new(CHAT_HISTORY_TURNS);
        assert_eq!(history.render(), "");
        for i in 1..=5 {
            history.push(format!("q{i}"), format!("a{i}"));
        }
        let text = history.render();
        assert!(text.starts_with("Recent conversation:\nUser: q3\nAssistant: a3"));
        assert!(text.ends_with("User: q5\nAssistant: a5"));
        assert!(!text.contains("q2"));
        assert_eq!(text.matches("User: ").count(), 3);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut history = ChatHistory::new(0);
        history.push("q", "a");
        assert_eq!(history.render(), "");
    }

    #[test]
    fn test_exit_words() {
        assert!(is_exit("quit"));
        assert!(is_exit("  EXIT "));
        assert!(is_exit("Bye"));
        assert!(!is_exit("exit strategy for the Lee matter?"));
    }
}
