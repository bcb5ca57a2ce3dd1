use crate::config::MAX_HISTORY_MESSAGES;
use crate::ConversationMessage;

/// Per-message token cost, e.g. a character heuristic or a real tokenizer.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

/// Roughly four characters per token, plus a fixed overhead for role framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHeuristic;

impl CharHeuristic {
    pub const CHARS_PER_TOKEN: usize = 4;
    pub const MESSAGE_OVERHEAD: usize = 4;
}

impl TokenEstimator for CharHeuristic {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(Self::CHARS_PER_TOKEN) + Self::MESSAGE_OVERHEAD
    }
}

/// Adapts a plain function, such as a tokenizer's `count_tokens`, into a [`TokenEstimator`].
pub struct FnEstimator<F>(pub F);

impl<F> TokenEstimator for FnEstimator<F>
where
    F: Fn(&str) -> usize,
{
    fn estimate(&self, text: &str) -> usize {
        (self.0)(text)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    CharHeuristic.estimate(text)
}

pub fn truncate_history_to_token_budget(
    messages: &[ConversationMessage],
    token_budget: usize,
) -> Vec<ConversationMessage> {
    truncate_history_with(messages, token_budget, MAX_HISTORY_MESSAGES, &CharHeuristic)
}

/// Walks back from the newest message while the running total stays within
/// `token_budget`, then caps the selection at `max_messages`. The newest message
/// is always kept. Output is chronological.
pub fn truncate_history_with<E>(
    messages: &[ConversationMessage],
    token_budget: usize,
    max_messages: usize,
    estimator: &E,
) -> Vec<ConversationMessage>
where
    E: TokenEstimator + ?Sized,
{
    let mut selected: Vec<&ConversationMessage> = Vec::new();
    let mut used = 0usize;

    for message in messages.iter().rev() {
        let cost = estimator.estimate(&message.content);
        if !selected.is_empty() && used.saturating_add(cost) > token_budget {
            break;
        }
        used = used.saturating_add(cost);
        selected.push(message);
    }

    selected.truncate(max_messages.max(1));
    selected.into_iter().rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    fn conversation(lengths: &[usize]) -> Vec<ConversationMessage> {
        lengths
            .iter()
            .enumerate()
            .map(|(index, len)| {
                let role = if index % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                let mut content = format!("m{index}:");
                content.push_str(&"x".repeat(len.saturating_sub(content.len())));
                ConversationMessage::new("conv-1", role, content)
            })
            .collect()
    }

    fn labels(messages: &[ConversationMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|message| message.content.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(estimate_tokens(""), 4);
        assert_eq!(estimate_tokens("abcd"), 5);
        assert_eq!(estimate_tokens("abcde"), 6);
    }

    #[test]
    fn empty_history_stays_empty() {
        assert!(truncate_history_to_token_budget(&[], 100).is_empty());
    }

    #[test]
    fn keeps_newest_message_even_over_budget() {
        let history = conversation(&[40, 4_000]);
        let kept = truncate_history_to_token_budget(&history, 1);
        assert_eq!(labels(&kept), vec!["m1"]);
    }

    #[test]
    fn zero_budget_still_returns_one() {
        let history = conversation(&[10, 10, 10]);
        let kept = truncate_history_to_token_budget(&history, 0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, history[2].id);
    }

    #[test]
    fn drops_oldest_first_and_keeps_order() {
        // Each message costs 10 + 4 = 14 tokens.
        let history = conversation(&[40, 40, 40, 40]);
        let kept = truncate_history_to_token_budget(&history, 30);
        assert_eq!(labels(&kept), vec!["m2", "m3"]);
    }

    #[test]
    fn stops_at_first_message_that_does_not_fit() {
        let history = conversation(&[8, 4_000, 8, 8]);
        let kept = truncate_history_to_token_budget(&history, 100);
        assert_eq!(labels(&kept), vec!["m2", "m3"]);
    }

    #[test]
    fn caps_at_ten_messages_under_large_budget() {
        let history = conversation(&[8; 25]);
        let kept = truncate_history_to_token_budget(&history, 1_000_000);
        assert_eq!(kept.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(labels(&kept).first().map(String::as_str), Some("m15"));
        assert_eq!(kept.last().map(|m| m.id), history.last().map(|m| m.id));
    }

    #[test]
    fn idempotent_within_limits() {
        let history = conversation(&[20, 30, 40]);
        let once = truncate_history_to_token_budget(&history, 500);
        assert_eq!(once, history);
        let twice = truncate_history_to_token_budget(&once, 500);
        assert_eq!(twice, once);
    }

    #[test]
    fn estimator_is_pluggable() {
        let history = conversation(&[8, 8, 8]);
        let per_message = FnEstimator(|_: &str| 50usize);
        let kept = truncate_history_with(&history, 100, 10, &per_message);
        assert_eq!(kept.len(), 2);
    }
}
