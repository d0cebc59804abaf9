use catalog_rag::llm::ChatMessage;
use catalog_rag::tokens::{build_messages, TokenCounter};
use proptest::prelude::*;

fn history() -> impl Strategy<Value = Vec<ChatMessage>> {
    prop::collection::vec(("[a-z ]{0,80}", any::<bool>()), 0..12).prop_map(|turns| {
        turns
            .into_iter()
            .map(|(text, from_user)| {
                if from_user {
                    ChatMessage::user(text)
                } else {
                    ChatMessage::assistant(text)
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn system_and_user_always_kept(past in history(), budget in 0usize..400) {
        let counter = TokenCounter::for_model("gpt-35-turbo", true).unwrap();
        let messages = build_messages(&counter, "You sell tents.", "cheapest tent?", &past, budget);

        prop_assert!(messages.len() >= 2);
        prop_assert_eq!(messages[0].content.as_deref(), Some("You sell tents."));
        prop_assert_eq!(messages[messages.len() - 1].content.as_deref(), Some("cheapest tent?"));
    }

    #[test]
    fn kept_history_is_newest_suffix(past in history(), budget in 0usize..400) {
        let counter = TokenCounter::for_model("gpt-35-turbo", true).unwrap();
        let messages = build_messages(&counter, "You sell tents.", "cheapest tent?", &past, budget);

        let kept = &messages[1..messages.len() - 1];
        prop_assert!(kept.len() <= past.len());
        prop_assert_eq!(kept, &past[past.len() - kept.len()..]);
    }

    #[test]
    fn history_fits_budget_when_anything_kept(past in history(), budget in 0usize..400) {
        let counter = TokenCounter::for_model("gpt-35-turbo", true).unwrap();
        let messages = build_messages(&counter, "You sell tents.", "cheapest tent?", &past, budget);

        if messages.len() > 2 {
            let total: usize = messages.iter().map(|m| counter.count_message(m)).sum();
            prop_assert!(total <= budget, "{} tokens over budget {}", total, budget);
        }
    }
}
