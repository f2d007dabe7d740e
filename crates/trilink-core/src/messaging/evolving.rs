//! Evolving group replies.
//!
//! A streamed agent reply starts as one group text (the anchor) and is
//! then mutated in place with group edits. The state machine is pure:
//! callers inject the clock and perform the actual sends, reporting
//! results back. That keeps every transition deterministic and
//! testable, and the caller's per-session FIFO guarantees a later
//! partial never overtakes an in-flight edit.
//!
//! Rules:
//! - The first chunk produces a fresh group text.
//! - Partial chunks below the configured character delta, or arriving
//!   inside the minimum interval, are coalesced (the newest wins).
//! - A partial that does not extend the last sent text is skipped.
//! - Block chunks must form a growing prefix; a block that does not
//!   extend the previous text is appended to it instead.
//! - A final chunk drains pending state and emits the closing edit.
//! - A failed edit falls back to a fresh group text, which becomes the
//!   new anchor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coalescing and expiry knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvolvingReplyConfig {
    /// Entry lifetime since the last update, in milliseconds.
    pub ttl_ms: u64,
    /// Minimum growth (in characters) before a partial flushes.
    pub min_chars_delta: usize,
    /// Minimum spacing between sends, in milliseconds.
    pub min_interval_ms: u64,
}

impl Default for EvolvingReplyConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 15 * 60 * 1000,
            min_chars_delta: 1,
            min_interval_ms: 1000,
        }
    }
}

/// Kind of a reply fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// An intermediate snapshot of the reply so far.
    Partial,
    /// A chunk that extends the reply as a growing prefix.
    Block,
    /// The completed reply.
    Final,
}

/// Key of one evolving-reply session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyKey {
    /// The conversation, canonically encoded.
    pub chat: String,
    /// The message that triggered the reply.
    pub trigger_message_id: u64,
}

/// What the caller must send next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a fresh group text; report its id via
    /// [`EvolvingReplies::on_text_sent`].
    SendText {
        /// The text to send.
        text: String,
    },
    /// Edit the anchor message in place.
    SendEdit {
        /// The anchor message id.
        anchor: u64,
        /// The replacement text.
        text: String,
    },
}

#[derive(Debug)]
struct Entry {
    anchor: Option<u64>,
    last_sent: String,
    pending: Option<String>,
    last_updated_ms: u64,
    last_send_ms: u64,
}

/// The evolving-reply table: in-memory, per account session, entries
/// expiring 15 minutes after their last update.
pub struct EvolvingReplies {
    config: EvolvingReplyConfig,
    sessions: HashMap<ReplyKey, Entry>,
}

impl EvolvingReplies {
    /// Create an empty table.
    pub fn new(config: EvolvingReplyConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop expired entries. Called opportunistically on insert.
    pub fn prune(&mut self, now_ms: u64) {
        let ttl = self.config.ttl_ms;
        self.sessions
            .retain(|_, entry| now_ms.saturating_sub(entry.last_updated_ms) < ttl);
    }

    /// Clear the table, e.g. on session disconnect.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Feed one fragment; returns the action the caller must perform.
    pub fn on_fragment(
        &mut self,
        key: &ReplyKey,
        kind: FragmentKind,
        text: &str,
        now_ms: u64,
    ) -> Option<Action> {
        self.prune(now_ms);

        let entry = match self.sessions.get_mut(key) {
            Some(entry) => entry,
            None => {
                // First chunk: a fresh group text becomes the anchor.
                self.sessions.insert(
                    key.clone(),
                    Entry {
                        anchor: None,
                        last_sent: text.to_string(),
                        pending: None,
                        last_updated_ms: now_ms,
                        last_send_ms: now_ms,
                    },
                );
                return Some(Action::SendText { text: text.to_string() });
            }
        };
        entry.last_updated_ms = now_ms;

        let previous = entry.pending.as_deref().unwrap_or(&entry.last_sent).to_string();
        let candidate = match kind {
            FragmentKind::Partial | FragmentKind::Final => text.to_string(),
            FragmentKind::Block => {
                if text.starts_with(&previous) {
                    text.to_string()
                } else {
                    // Not a growing prefix: append instead.
                    let mut appended = previous.clone();
                    appended.push_str(text);
                    appended
                }
            }
        };

        if kind == FragmentKind::Final {
            entry.pending = None;
            if candidate == entry.last_sent {
                return None;
            }
            return Self::emit(entry, candidate, now_ms);
        }

        // A snapshot that regresses to a prefix of what was already
        // sent carries no new content.
        if candidate.len() <= entry.last_sent.len() && entry.last_sent.starts_with(&candidate) {
            return None;
        }

        let grown = candidate.len().saturating_sub(entry.last_sent.len());
        let too_soon = now_ms.saturating_sub(entry.last_send_ms) < self.config.min_interval_ms;
        if entry.anchor.is_none() || too_soon || grown < self.config.min_chars_delta {
            entry.pending = Some(candidate);
            return None;
        }

        entry.pending = None;
        Self::emit(entry, candidate, now_ms)
    }

    fn emit(entry: &mut Entry, text: String, now_ms: u64) -> Option<Action> {
        entry.last_send_ms = now_ms;
        match entry.anchor {
            Some(anchor) => {
                entry.last_sent = text.clone();
                Some(Action::SendEdit { anchor, text })
            }
            None => {
                // The anchor send is still in flight; hold the update.
                entry.pending = Some(text);
                None
            }
        }
    }

    /// Record the anchor id after a fresh group text was sent.
    pub fn on_text_sent(&mut self, key: &ReplyKey, anchor_message_id: u64, now_ms: u64) {
        if let Some(entry) = self.sessions.get_mut(key) {
            entry.anchor = Some(anchor_message_id);
            entry.last_updated_ms = now_ms;
        }
    }

    /// Record an edit failure; the returned action replaces the anchor
    /// with a fresh group text carrying the failed text.
    pub fn on_edit_failed(&mut self, key: &ReplyKey, now_ms: u64) -> Option<Action> {
        let entry = self.sessions.get_mut(key)?;
        entry.anchor = None;
        entry.last_updated_ms = now_ms;
        entry.last_send_ms = now_ms;
        Some(Action::SendText {
            text: entry.last_sent.clone(),
        })
    }

    /// Pull any pending coalesced text, e.g. to flush before shutdown.
    pub fn take_pending(&mut self, key: &ReplyKey) -> Option<Action> {
        let entry = self.sessions.get_mut(key)?;
        let pending = entry.pending.take()?;
        let anchor = entry.anchor?;
        entry.last_sent = pending.clone();
        Some(Action::SendEdit { anchor, text: pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ReplyKey {
        ReplyKey {
            chat: "group:CREATOR1/7".into(),
            trigger_message_id: 99,
        }
    }

    fn table() -> EvolvingReplies {
        EvolvingReplies::new(EvolvingReplyConfig {
            ttl_ms: 15 * 60 * 1000,
            min_chars_delta: 1,
            min_interval_ms: 1000,
        })
    }

    #[test]
    fn test_anchor_then_coalesce_then_final() {
        // Anchor "A", partials "AB", "ABC", "AB" (regression), final
        // "ABCD": one text send, one edit to "ABC", one final edit.
        let mut replies = table();
        let key = key();

        let action = replies.on_fragment(&key, FragmentKind::Partial, "A", 0);
        assert_eq!(action, Some(Action::SendText { text: "A".into() }));
        replies.on_text_sent(&key, 1000, 0);

        // Within the interval: coalesced.
        let action = replies.on_fragment(&key, FragmentKind::Partial, "AB", 500);
        assert_eq!(action, None);

        // Interval elapsed: flush with the newest text.
        let action = replies.on_fragment(&key, FragmentKind::Partial, "ABC", 1200);
        assert_eq!(
            action,
            Some(Action::SendEdit { anchor: 1000, text: "ABC".into() })
        );

        // Prefix regression: skipped.
        let action = replies.on_fragment(&key, FragmentKind::Partial, "AB", 2500);
        assert_eq!(action, None);

        // Final drains and emits.
        let action = replies.on_fragment(&key, FragmentKind::Final, "ABCD", 2600);
        assert_eq!(
            action,
            Some(Action::SendEdit { anchor: 1000, text: "ABCD".into() })
        );
    }

    #[test]
    fn test_small_delta_is_coalesced() {
        let mut replies = EvolvingReplies::new(EvolvingReplyConfig {
            min_chars_delta: 8,
            min_interval_ms: 0,
            ..EvolvingReplyConfig::default()
        });
        let key = key();

        assert!(replies.on_fragment(&key, FragmentKind::Partial, "hello", 0).is_some());
        replies.on_text_sent(&key, 7, 0);

        // Seven new characters: below the delta, held.
        assert_eq!(replies.on_fragment(&key, FragmentKind::Partial, "hello wordl", 10), None);
        // Eight or more: flushes.
        assert_eq!(
            replies.on_fragment(&key, FragmentKind::Partial, "hello world..", 20),
            Some(Action::SendEdit { anchor: 7, text: "hello world..".into() })
        );
    }

    #[test]
    fn test_block_appends_when_not_a_prefix() {
        let mut replies = EvolvingReplies::new(EvolvingReplyConfig {
            min_chars_delta: 1,
            min_interval_ms: 0,
            ..EvolvingReplyConfig::default()
        });
        let key = key();

        assert!(replies.on_fragment(&key, FragmentKind::Block, "first.", 0).is_some());
        replies.on_text_sent(&key, 5, 0);

        // Extends the previous text: used as-is.
        assert_eq!(
            replies.on_fragment(&key, FragmentKind::Block, "first. second.", 10),
            Some(Action::SendEdit { anchor: 5, text: "first. second.".into() })
        );

        // Does not extend: appended.
        assert_eq!(
            replies.on_fragment(&key, FragmentKind::Block, " third.", 20),
            Some(Action::SendEdit { anchor: 5, text: "first. second. third.".into() })
        );
    }

    #[test]
    fn test_final_with_no_change_sends_nothing() {
        let mut replies = EvolvingReplies::new(EvolvingReplyConfig {
            min_chars_delta: 1,
            min_interval_ms: 0,
            ..EvolvingReplyConfig::default()
        });
        let key = key();

        assert!(replies.on_fragment(&key, FragmentKind::Partial, "done", 0).is_some());
        replies.on_text_sent(&key, 3, 0);
        assert_eq!(replies.on_fragment(&key, FragmentKind::Final, "done", 10), None);
    }

    #[test]
    fn test_edit_failure_falls_back_to_fresh_text() {
        let mut replies = EvolvingReplies::new(EvolvingReplyConfig {
            min_chars_delta: 1,
            min_interval_ms: 0,
            ..EvolvingReplyConfig::default()
        });
        let key = key();

        assert!(replies.on_fragment(&key, FragmentKind::Partial, "v1", 0).is_some());
        replies.on_text_sent(&key, 1, 0);
        assert!(replies.on_fragment(&key, FragmentKind::Partial, "v1 v2", 10).is_some());

        // The edit failed: fall back to a fresh text with that content.
        let action = replies.on_edit_failed(&key, 20);
        assert_eq!(action, Some(Action::SendText { text: "v1 v2".into() }));
        replies.on_text_sent(&key, 2, 20);

        // Subsequent edits reference the new anchor.
        assert_eq!(
            replies.on_fragment(&key, FragmentKind::Partial, "v1 v2 v3", 30),
            Some(Action::SendEdit { anchor: 2, text: "v1 v2 v3".into() })
        );
    }

    #[test]
    fn test_ttl_expiry_restarts_session() {
        let mut replies = table();
        let key = key();

        assert!(replies.on_fragment(&key, FragmentKind::Partial, "old", 0).is_some());
        replies.on_text_sent(&key, 1, 0);
        assert_eq!(replies.len(), 1);

        // Fifteen minutes later the entry has expired; a new fragment
        // starts a fresh anchor.
        let later = 15 * 60 * 1000 + 1;
        let action = replies.on_fragment(&key, FragmentKind::Partial, "new", later);
        assert_eq!(action, Some(Action::SendText { text: "new".into() }));
    }

    #[test]
    fn test_clear_empties_table() {
        let mut replies = table();
        replies.on_fragment(&key(), FragmentKind::Partial, "x", 0);
        assert!(!replies.is_empty());
        replies.clear();
        assert!(replies.is_empty());
    }
}
