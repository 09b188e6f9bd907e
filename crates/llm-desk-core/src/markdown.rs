//! Markdown export of a conversation.

use crate::conversation::StoredMessage;
use crate::types::ChatRole;

/// Render user and assistant turns as Markdown sections separated by rules.
///
/// System messages are left out. Message content is copied verbatim, so fenced
/// code blocks survive.
pub fn conversation_to_markdown(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m.role {
            ChatRole::User => Some(format!("## User\n\n{}\n", m.content)),
            ChatRole::Assistant => Some(format!("## Assistant\n\n{}\n", m.content)),
            ChatRole::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: u64, role: ChatRole, content: &str) -> StoredMessage {
        StoredMessage {
            id,
            conversation_id: "c".into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            model: None,
        }
    }

    #[test]
    fn test_skips_system_and_separates_turns() {
        let md = conversation_to_markdown(&[
            msg(1, ChatRole::System, "be brief"),
            msg(2, ChatRole::User, "Show code"),
            msg(3, ChatRole::Assistant, "```rust\nfn main() {}\n```"),
        ]);
        assert_eq!(
            md,
            "## User\n\nShow code\n\n---\n\n## Assistant\n\n```rust\nfn main() {}\n```\n"
        );
    }

    #[test]
    fn test_empty_conversation() {
        assert_eq!(conversation_to_markdown(&[]), "");
    }
}
