use serde::{Deserialize, Serialize};

use crate::providers::{ChatMessage, ChatRole, ContentBlock, MessagePart};
use crate::truncation::{truncate_middle, truncate_tail};

/// Number of leading messages that survive eviction.
const ANCHOR_MESSAGES: usize = 2;
const DIGEST_RECENT: usize = 6;
const DIGEST_EXCERPT_CHARS: usize = 500;

/// Ordered chat history with a rolling window.
///
/// Once the history exceeds `max_messages` the first two messages and the
/// newest `max_messages - 2` are kept. Tool results are truncated when they
/// are appended.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<ChatMessage>,
    max_messages: usize,
    max_tool_result_length: usize,
}

impl ConversationStore {
    pub fn new(max_messages: usize, max_tool_result_length: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(ANCHOR_MESSAGES + 1),
            max_tool_result_length,
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    /// Record an assistant turn that requested tool calls.
    pub fn add_assistant_tool_calls(&mut self, text: &str, calls: Vec<ContentBlock>) {
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        parts.extend(calls);
        self.push(ChatMessage {
            role: ChatRole::Assistant,
            content: MessagePart::Parts(parts),
        });
    }

    pub fn add_tool_result(&mut self, tool_use_id: &str, content: &str) {
        let content = self.truncate_tool_result(content);
        self.push(ChatMessage::tool_result(tool_use_id, content));
    }

    pub fn truncate_tool_result(&self, content: &str) -> String {
        truncate_middle(content, self.max_tool_result_length)
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.evict();
    }

    fn evict(&mut self) {
        if self.messages.len() <= self.max_messages {
            return;
        }
        let excess = self.messages.len() - self.max_messages;
        self.messages.drain(ANCHOR_MESSAGES..ANCHOR_MESSAGES + excess);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// A compact summary suitable for persisting in a checkpoint.
    pub fn digest(&self) -> ConversationDigest {
        let mut digest = ConversationDigest {
            message_count: self.messages.len(),
            ..ConversationDigest::default()
        };

        for msg in &self.messages {
            match msg.role {
                ChatRole::User => digest.user_messages += 1,
                ChatRole::Assistant => digest.assistant_messages += 1,
                ChatRole::Tool => digest.tool_results += 1,
                ChatRole::System => {}
            }
            if let MessagePart::Parts(parts) = &msg.content {
                for part in parts {
                    if let ContentBlock::ToolUse { name, .. } = part
                        && !digest.tools_used.contains(name)
                    {
                        digest.tools_used.push(name.clone());
                    }
                }
            }
        }

        let mut recent: Vec<DigestEntry> = self
            .messages
            .iter()
            .rev()
            .filter(|m| matches!(m.role, ChatRole::User | ChatRole::Assistant))
            .filter_map(|m| {
                let text = m.text();
                if text.trim().is_empty() {
                    None
                } else {
                    Some(DigestEntry {
                        role: m.role,
                        text: truncate_tail(text.trim(), DIGEST_EXCERPT_CHARS),
                    })
                }
            })
            .take(DIGEST_RECENT)
            .collect();
        recent.reverse();
        digest.recent = recent;
        digest
    }
}

/// Persistable summary of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationDigest {
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub user_messages: usize,
    #[serde(default)]
    pub assistant_messages: usize,
    #[serde(default)]
    pub tool_results: usize,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub recent: Vec<DigestEntry>,
}

impl ConversationDigest {
    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub role: ChatRole,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_keeps_anchor_and_newest() {
        let mut store = ConversationStore::new(10, 8000);
        for i in 0..25 {
            store.add_user_message(format!("m{i}"));
        }
        assert_eq!(store.len(), 10);
        let texts: Vec<String> = store.messages().iter().map(|m| m.text()).collect();
        assert_eq!(texts[0], "m0");
        assert_eq!(texts[1], "m1");
        assert_eq!(texts[2], "m17");
        assert_eq!(texts[9], "m24");
    }

    #[test]
    fn under_cap_nothing_is_evicted() {
        let mut store = ConversationStore::new(100, 8000);
        for i in 0..5 {
            store.add_user_message(format!("m{i}"));
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn tool_results_are_truncated_on_append() {
        let mut store = ConversationStore::new(100, 300);
        store.add_tool_result("call_1", &"x".repeat(5000));
        let MessagePart::Parts(parts) = &store.messages()[0].content else {
            panic!("expected parts");
        };
        let ContentBlock::ToolResult { content, .. } = &parts[0] else {
            panic!("expected tool result");
        };
        assert!(content.contains("(truncated 4700 chars)"));
        assert!(content.len() < 400);
    }

    #[test]
    fn digest_counts_roles_and_tools() {
        let mut store = ConversationStore::new(100, 8000);
        store.add_user_message("why is avg wrong?");
        store.add_assistant_tool_calls(
            "Checking locals.",
            vec![ContentBlock::ToolUse {
                id: "c1".into(),
                name: "get_all_locals".into(),
                input: serde_json::json!({}),
                raw_arguments: None,
            }],
        );
        store.add_tool_result("c1", "{}");
        store.add_assistant_message("count is zero");

        let digest = store.digest();
        assert_eq!(digest.message_count, 4);
        assert_eq!(digest.user_messages, 1);
        assert_eq!(digest.assistant_messages, 2);
        assert_eq!(digest.tool_results, 1);
        assert_eq!(digest.tools_used, vec!["get_all_locals"]);
        assert_eq!(digest.recent.len(), 3);
        assert_eq!(digest.recent[2].text, "count is zero");
    }
}
