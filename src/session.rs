//! UI-agnostic conversation state
//!
//! The message list and the pending detection/finalize correlation ids live
//! here, behind plain transition methods, so the whole redaction workflow
//! can be exercised without a terminal.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Placeholder text shown while a finalize request is in flight.
pub const THINKING_TEXT: &str = "Thinking...";

/// Text the placeholder is replaced with when a finalize request fails.
pub const FAILED_TEXT: &str = "No reply. The send failed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub image_url: Option<String>,
    pub failed: bool,
}

impl Message {
    fn text_message(sender: Sender, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            text: Some(text.to_string()),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            image_url: None,
            failed: false,
        }
    }

    fn image_message(sender: Sender, url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            text: None,
            timestamp: Utc::now(),
            kind: MessageKind::Image,
            image_url: Some(url.to_string()),
            failed: false,
        }
    }
}

/// Correlates a detection response with the eventual finalize request.
///
/// Non-empty only between a detection response and its finalize call; the
/// composer is single-threaded so there is never more than one.
#[derive(Debug, Clone, Default)]
pub struct PendingExchange {
    pub conversion_id: Option<String>,
    pub message_id: Option<String>,
}

/// What a composer submission should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAction {
    DetectText(String),
    DetectImage,
    FinalizeText(String),
    DirectText(String),
    DirectImage,
    RejectEmpty,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<Message>,
    pending: PendingExchange,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> &PendingExchange {
        &self.pending
    }

    pub fn set_pending(&mut self, message_id: Option<String>, conversion_id: Option<String>) {
        self.pending = PendingExchange {
            conversion_id,
            message_id,
        };
    }

    pub fn clear_pending(&mut self) {
        self.pending = PendingExchange::default();
    }

    /// Decide what a submission does, given the composer contents.
    ///
    /// A staged image is always re-detected, even when ids from an earlier
    /// detection are still pending: that state only arises after the user
    /// cancelled a review, and a cancelled review must not finalize.
    pub fn decide_submit(&self, input: &str, has_attachment: bool, redaction: bool) -> SubmitAction {
        let text = input.trim();
        if has_attachment {
            if redaction {
                SubmitAction::DetectImage
            } else {
                SubmitAction::DirectImage
            }
        } else if text.is_empty() {
            SubmitAction::RejectEmpty
        } else if !redaction {
            SubmitAction::DirectText(text.to_string())
        } else if self.pending.message_id.is_some() {
            SubmitAction::FinalizeText(text.to_string())
        } else {
            SubmitAction::DetectText(text.to_string())
        }
    }

    pub fn push_user_text(&mut self, text: &str) {
        self.messages.push(Message::text_message(Sender::User, text));
    }

    pub fn push_user_image(&mut self, url: &str) {
        self.messages.push(Message::image_message(Sender::User, url));
    }

    pub fn push_reply(&mut self, text: &str) {
        self.messages
            .push(Message::text_message(Sender::Assistant, text));
    }

    /// Append the "Thinking..." placeholder and return its id.
    pub fn begin_reply(&mut self) -> String {
        let placeholder = Message::text_message(Sender::Assistant, THINKING_TEXT);
        let id = placeholder.id.clone();
        self.messages.push(placeholder);
        id
    }

    /// Replace the placeholder in place with the actual reply. The slot keeps
    /// its list position but gets a fresh id and content.
    pub fn resolve_reply(&mut self, placeholder_id: &str, text: &str) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == placeholder_id) {
            *slot = Message::text_message(Sender::Assistant, text);
        }
    }

    /// Replace the placeholder with a failed marker so the list never keeps a
    /// stale "Thinking..." entry after a terminal failure.
    pub fn fail_reply(&mut self, placeholder_id: &str) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == placeholder_id) {
            let mut failed = Message::text_message(Sender::Assistant, FAILED_TEXT);
            failed.failed = true;
            *slot = failed;
        }
    }

    pub fn delete_message(&mut self, id: &str) {
        self.messages.retain(|m| m.id != id);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_pending() -> ChatSession {
        let mut session = ChatSession::new();
        session.set_pending(Some("msg-1".into()), Some("conv-1".into()));
        session
    }

    #[test]
    fn first_text_submit_detects() {
        let session = ChatSession::new();
        assert_eq!(
            session.decide_submit("hello", false, true),
            SubmitAction::DetectText("hello".into())
        );
    }

    #[test]
    fn pending_text_submit_finalizes() {
        let session = session_with_pending();
        assert_eq!(
            session.decide_submit("hello", false, true),
            SubmitAction::FinalizeText("hello".into())
        );
    }

    #[test]
    fn pending_cleared_means_detect_again() {
        let mut session = session_with_pending();
        session.clear_pending();
        assert_eq!(
            session.decide_submit("hello", false, true),
            SubmitAction::DetectText("hello".into())
        );
    }

    #[test]
    fn staged_image_always_redetects() {
        let session = session_with_pending();
        assert_eq!(
            session.decide_submit("", true, true),
            SubmitAction::DetectImage
        );
    }

    #[test]
    fn empty_submit_rejected() {
        let session = ChatSession::new();
        assert_eq!(
            session.decide_submit("   ", false, true),
            SubmitAction::RejectEmpty
        );
    }

    #[test]
    fn redaction_off_sends_direct() {
        let session = ChatSession::new();
        assert_eq!(
            session.decide_submit("hi", false, false),
            SubmitAction::DirectText("hi".into())
        );
        assert_eq!(
            session.decide_submit("", true, false),
            SubmitAction::DirectImage
        );
    }

    #[test]
    fn placeholder_is_replaced_in_place() {
        let mut session = ChatSession::new();
        session.push_user_text("one");
        let placeholder = session.begin_reply();
        session.push_user_text("two");

        session.resolve_reply(&placeholder, "the reply");

        let messages = session.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text.as_deref(), Some("the reply"));
        assert_eq!(messages[1].sender, Sender::Assistant);
        assert_ne!(messages[1].id, placeholder, "replacement gets a new id");
        assert!(!messages[1].failed);
    }

    #[test]
    fn failed_reply_marks_placeholder() {
        let mut session = ChatSession::new();
        let placeholder = session.begin_reply();

        session.fail_reply(&placeholder);

        let slot = &session.messages()[0];
        assert!(slot.failed);
        assert_ne!(slot.text.as_deref(), Some(THINKING_TEXT));
    }

    #[test]
    fn delete_removes_exactly_one_and_keeps_order() {
        let mut session = ChatSession::new();
        session.push_user_text("a");
        session.push_user_text("b");
        session.push_user_text("c");
        let victim = session.messages()[1].id.clone();

        session.delete_message(&victim);

        let texts: Vec<_> = session
            .messages()
            .iter()
            .map(|m| m.text.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[test]
    fn clear_empties_unconditionally() {
        let mut session = ChatSession::new();
        session.push_user_text("a");
        session.begin_reply();
        session.clear();
        assert!(session.messages().is_empty());
    }
}
