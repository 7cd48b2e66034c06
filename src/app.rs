use anyhow::Result;
use ratatui::widgets::ListState;
use std::path::PathBuf;
use tokio::task::JoinHandle;

use crate::api::{ChatApi, ImageDetection, TextDetection};
use crate::attachment::{self, Attachment};
use crate::config::Config;
use crate::redaction::{ContentKind, RedactionContent, ReviewState};
use crate::session::{ChatSession, MessageKind, SubmitAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Sidebar,
    Messages,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Which network operation currently occupies the task slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    DetectText { original: String },
    DetectImage,
    FinalizeText { placeholder_id: String },
    FinalizeImage { placeholder_id: String },
    DirectText,
    DirectImage,
    Download,
}

/// What a finished background task hands back to the event loop.
pub enum TaskOutput {
    TextDetection(TextDetection),
    ImageDetection(ImageDetection),
    Reply(String),
    Saved(PathBuf),
}

/// The single-slot background task. The composer is disabled while the slot
/// is occupied, which keeps every network round trip mutually exclusive.
pub struct ActiveTask {
    pub kind: TaskKind,
    pub handle: JoinHandle<Result<TaskOutput>>,
}

/// Sidebar entry. The conversation list is static; only the highlight moves.
pub struct Conversation {
    pub id: String,
    pub name: String,
}

pub struct App {
    pub should_quit: bool,
    pub focus: FocusPane,
    pub input_mode: InputMode,

    // Composer
    pub input: String,
    pub input_cursor: usize,

    // Conversation state
    pub session: ChatSession,
    pub selected_msg: Option<usize>,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub total_chat_lines: u16,

    // Staged attachment and the path-input popup
    pub attachment: Option<Attachment>,
    pub show_attach_input: bool,
    pub attach_input: String,
    pub attach_cursor: usize,

    // Redaction review modal
    pub review: Option<ReviewState>,

    // Blocking alert popup, dismissed by any key
    pub alert: Option<String>,

    // Single-slot background task
    pub task: Option<ActiveTask>,
    pub animation_frame: u8,

    // Sidebar
    pub sidebar_expanded: bool,
    pub conversations: Vec<Conversation>,
    pub sidebar_state: ListState,

    pub api: ChatApi,
    pub config: Config,
}

impl App {
    pub fn new(config: Config) -> Self {
        let api = ChatApi::new(&config.server_url);

        let conversations = vec![
            Conversation { id: "1".into(), name: "Conversation 1".into() },
            Conversation { id: "2".into(), name: "Conversation 2".into() },
            Conversation { id: "3".into(), name: "Conversation 3".into() },
            Conversation { id: "4".into(), name: "Support Chat".into() },
            Conversation { id: "5".into(), name: "Project Planning".into() },
        ];
        let mut sidebar_state = ListState::default();
        sidebar_state.select(Some(0));

        Self {
            should_quit: false,
            focus: FocusPane::Input,
            input_mode: InputMode::Editing,

            input: String::new(),
            input_cursor: 0,

            session: ChatSession::new(),
            selected_msg: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            total_chat_lines: 0,

            attachment: None,
            show_attach_input: false,
            attach_input: String::new(),
            attach_cursor: 0,

            review: None,
            alert: None,

            task: None,
            animation_frame: 0,

            sidebar_expanded: false,
            conversations,
            sidebar_state,

            api,
            config,
        }
    }

    pub fn processing(&self) -> bool {
        self.task.is_some()
    }

    pub fn show_alert(&mut self, message: impl Into<String>) {
        self.alert = Some(message.into());
    }

    pub fn tick_animation(&mut self) {
        if self.processing() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Composer submission. Routes to detection, finalize or direct send
    /// depending on what is staged and whether a detection is pending.
    pub fn submit(&mut self) {
        if self.processing() {
            return;
        }
        match self.session.decide_submit(
            &self.input,
            self.attachment.is_some(),
            self.config.redaction,
        ) {
            SubmitAction::DetectText(text) => self.start_detect_text(text),
            SubmitAction::DetectImage => self.start_detect_image(),
            SubmitAction::FinalizeText(text) => self.start_finalize_text(text),
            SubmitAction::DirectText(text) => self.start_direct_text(text),
            SubmitAction::DirectImage => self.start_direct_image(),
            SubmitAction::RejectEmpty => {
                self.show_alert("Please enter a message or attach an image.");
            }
        }
    }

    fn start_detect_text(&mut self, text: String) {
        let api = self.api.clone();
        let conversion_id = self.session.pending().conversion_id.clone();
        let original = text.clone();
        tracing::info!("requesting text detection");
        let handle = tokio::spawn(async move {
            api.detect_text(conversion_id.as_deref(), &text)
                .await
                .map(TaskOutput::TextDetection)
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::DetectText { original },
            handle,
        });
    }

    fn start_detect_image(&mut self) {
        let Some(staged) = self.attachment.clone() else {
            return;
        };
        let api = self.api.clone();
        let conversion_id = self.session.pending().conversion_id.clone();
        tracing::info!(file = %staged.file_name, "requesting image detection");
        let handle = tokio::spawn(async move {
            api.detect_image(conversion_id.as_deref(), &staged)
                .await
                .map(TaskOutput::ImageDetection)
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::DetectImage,
            handle,
        });
    }

    fn start_finalize_text(&mut self, text: String) {
        let Some(message_id) = self.session.pending().message_id.clone() else {
            return;
        };
        let conversion_id = self.session.pending().conversion_id.clone();

        self.session.push_user_text(&text);
        let placeholder_id = self.session.begin_reply();
        self.scroll_chat_to_bottom();

        let api = self.api.clone();
        tracing::info!("sending finalized text");
        let handle = tokio::spawn(async move {
            api.send_final_text(conversion_id.as_deref(), &message_id, &text)
                .await
                .map(TaskOutput::Reply)
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::FinalizeText { placeholder_id },
            handle,
        });
    }

    fn start_finalize_image(&mut self, image_url: String) {
        let Some(staged) = self.attachment.clone() else {
            return;
        };
        let Some(message_id) = self.session.pending().message_id.clone() else {
            return;
        };
        let conversion_id = self.session.pending().conversion_id.clone();

        // The confirmed (redacted) URL is what the conversation shows; the
        // original file still goes to the backend for final processing.
        self.session.push_user_image(&image_url);
        let placeholder_id = self.session.begin_reply();
        self.scroll_chat_to_bottom();

        let api = self.api.clone();
        tracing::info!(file = %staged.file_name, "sending finalized image");
        let handle = tokio::spawn(async move {
            api.send_final_image(conversion_id.as_deref(), &message_id, &staged)
                .await
                .map(TaskOutput::Reply)
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::FinalizeImage { placeholder_id },
            handle,
        });
    }

    fn start_direct_text(&mut self, text: String) {
        self.session.push_user_text(&text);
        self.scroll_chat_to_bottom();

        let api = self.api.clone();
        tracing::info!("sending text without detection");
        let handle =
            tokio::spawn(async move { api.send_text(&text).await.map(TaskOutput::Reply) });
        self.task = Some(ActiveTask {
            kind: TaskKind::DirectText,
            handle,
        });
    }

    fn start_direct_image(&mut self) {
        let Some(staged) = self.attachment.clone() else {
            return;
        };
        let caption = {
            let trimmed = self.input.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };

        self.session.push_user_image(&staged.preview);
        self.scroll_chat_to_bottom();

        let api = self.api.clone();
        tracing::info!(file = %staged.file_name, "sending image without detection");
        let handle = tokio::spawn(async move {
            api.send_image(&staged, caption.as_deref())
                .await
                .map(TaskOutput::Reply)
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::DirectImage,
            handle,
        });
    }

    /// Fetch an image and save it next to the working directory as image.png.
    pub fn start_download(&mut self, url: String) {
        if self.processing() {
            return;
        }
        let api = self.api.clone();
        tracing::info!("downloading image");
        let handle = tokio::spawn(async move {
            let bytes = api.fetch_image_bytes(&url).await?;
            let dest = PathBuf::from("image.png");
            tokio::fs::write(&dest, bytes).await?;
            Ok(TaskOutput::Saved(dest))
        });
        self.task = Some(ActiveTask {
            kind: TaskKind::Download,
            handle,
        });
    }

    /// Abort the in-flight request and free the slot. A hung backend no
    /// longer wedges the composer.
    pub fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.handle.abort();
            tracing::info!(kind = ?task.kind, "cancelled background task");
        }
    }

    /// Called every loop turn; dispatches the task result once it finishes.
    pub async fn poll_task(&mut self) {
        let finished = self
            .task
            .as_ref()
            .map(|t| t.handle.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }
        if let Some(task) = self.task.take() {
            let result = match task.handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => return,
                Err(err) => Err(anyhow::anyhow!("background task failed: {err}")),
            };
            self.on_task_complete(task.kind, result);
        }
    }

    fn on_task_complete(&mut self, kind: TaskKind, result: Result<TaskOutput>) {
        match kind {
            TaskKind::DetectText { original } => match result {
                Ok(TaskOutput::TextDetection(res)) => {
                    let conversion_id = self.session.pending().conversion_id.clone();
                    self.session.set_pending(res.message_id.clone(), conversion_id);
                    let redacted = res.redacted_text.unwrap_or_else(|| original.clone());
                    self.review = Some(ReviewState::new(
                        RedactionContent {
                            kind: ContentKind::Text,
                            original,
                            redacted: Some(redacted),
                        },
                        res.detection,
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "text detection failed");
                    self.show_alert("PII detection failed. Try again.");
                }
            },
            TaskKind::DetectImage => match result {
                Ok(TaskOutput::ImageDetection(res)) => {
                    let Some(staged) = &self.attachment else {
                        return;
                    };
                    let conversion_id = self.session.pending().conversion_id.clone();
                    self.session.set_pending(res.message_id.clone(), conversion_id);
                    self.review = Some(ReviewState::new(
                        RedactionContent {
                            kind: ContentKind::Image,
                            original: staged.preview.clone(),
                            redacted: res.redacted_image_url,
                        },
                        res.detection,
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "image detection failed");
                    self.show_alert("Image PII detection failed.");
                }
            },
            TaskKind::FinalizeText { placeholder_id } => match result {
                Ok(TaskOutput::Reply(reply)) => {
                    self.session.resolve_reply(&placeholder_id, &reply);
                    self.session.clear_pending();
                    self.input.clear();
                    self.input_cursor = 0;
                    self.scroll_chat_to_bottom();
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "text send failed");
                    self.session.fail_reply(&placeholder_id);
                    self.session.clear_pending();
                    self.show_alert("Failed to send message.");
                }
            },
            TaskKind::FinalizeImage { placeholder_id } => match result {
                Ok(TaskOutput::Reply(reply)) => {
                    self.session.resolve_reply(&placeholder_id, &reply);
                    self.session.clear_pending();
                    self.attachment = None;
                    self.scroll_chat_to_bottom();
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "image send failed");
                    self.session.fail_reply(&placeholder_id);
                    self.session.clear_pending();
                    self.show_alert("Failed to send image.");
                }
            },
            TaskKind::DirectText => {
                match result {
                    Ok(TaskOutput::Reply(reply)) => {
                        self.session.push_reply(&reply);
                        self.scroll_chat_to_bottom();
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(%err, "direct text send failed");
                        self.show_alert("Failed to send message.");
                    }
                }
                self.input.clear();
                self.input_cursor = 0;
            }
            TaskKind::DirectImage => {
                match result {
                    Ok(TaskOutput::Reply(reply)) => {
                        self.session.push_reply(&reply);
                        self.attachment = None;
                        self.scroll_chat_to_bottom();
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::error!(%err, "direct image send failed");
                        self.show_alert("Failed to send image.");
                    }
                }
                self.input.clear();
                self.input_cursor = 0;
            }
            TaskKind::Download => match result {
                Ok(TaskOutput::Saved(path)) => {
                    tracing::info!(path = %path.display(), "image saved");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(%err, "download failed");
                    self.show_alert("Download failed.");
                }
            },
        }
    }

    /// Review confirmation. Text goes back into the composer with the pending
    /// ids kept so the next submit finalizes; an image finalizes right away.
    pub fn confirm_review(&mut self) {
        let Some(review) = self.review.take() else {
            return;
        };
        let confirmed = review.confirm();
        match review.content.kind {
            ContentKind::Text => {
                self.input = confirmed;
                self.input_cursor = self.input.chars().count();
                self.focus = FocusPane::Input;
                self.input_mode = InputMode::Editing;
            }
            ContentKind::Image => self.start_finalize_image(confirmed),
        }
    }

    /// Close the review without touching orchestrator state.
    pub fn cancel_review(&mut self) {
        self.review = None;
    }

    pub async fn attach_from_path(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let path = if let Some(rest) = trimmed.strip_prefix("~/") {
            dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(trimmed))
        } else {
            PathBuf::from(trimmed)
        };

        match attachment::stage(&path).await {
            Ok(staged) => {
                tracing::info!(file = %staged.file_name, "image staged");
                self.attachment = Some(staged);
                self.show_attach_input = false;
                self.attach_input.clear();
                self.attach_cursor = 0;
            }
            Err(err) => self.show_alert(err.to_string()),
        }
    }

    pub fn remove_attachment(&mut self) {
        self.attachment = None;
    }

    pub fn clear_history(&mut self) {
        self.session.clear();
        self.selected_msg = None;
        self.chat_scroll = 0;
    }

    pub fn delete_selected(&mut self) {
        let Some(idx) = self.selected_msg else {
            return;
        };
        let Some(message) = self.session.messages().get(idx) else {
            return;
        };
        if message.sender != crate::session::Sender::User {
            return;
        }
        let id = message.id.clone();
        self.session.delete_message(&id);
        let len = self.session.messages().len();
        if len == 0 {
            self.selected_msg = None;
        } else if idx >= len {
            self.selected_msg = Some(len - 1);
        }
    }

    pub fn selected_message(&self) -> Option<&crate::session::Message> {
        self.selected_msg
            .and_then(|i| self.session.messages().get(i))
    }

    pub fn select_next_message(&mut self) {
        let len = self.session.messages().len();
        if len > 0 {
            let current = self.selected_msg.unwrap_or(0);
            self.selected_msg = Some((current + 1).min(len - 1));
            self.scroll_to_selected();
        }
    }

    pub fn select_prev_message(&mut self) {
        if let Some(current) = self.selected_msg {
            self.selected_msg = Some(current.saturating_sub(1));
            self.scroll_to_selected();
        } else if !self.session.messages().is_empty() {
            self.selected_msg = Some(0);
        }
    }

    fn wrap_width(&self) -> usize {
        if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            60
        }
    }

    /// Keep the selected message inside the visible window.
    pub fn scroll_to_selected(&mut self) {
        let Some(idx) = self.selected_msg else {
            return;
        };
        let wrap_width = self.wrap_width();
        let mut start_line = 0u16;

        for (i, msg) in self.session.messages().iter().enumerate() {
            let end_line = start_line + message_line_count(msg, wrap_width);
            if i == idx {
                if start_line < self.chat_scroll {
                    self.chat_scroll = start_line;
                } else if end_line > self.chat_scroll + self.chat_height {
                    self.chat_scroll = end_line.saturating_sub(self.chat_height);
                }
                break;
            }
            start_line = end_line + 1; // blank line between messages
        }
    }

    pub fn scroll_down(&mut self) {
        if self.chat_scroll < self.total_chat_lines.saturating_sub(self.chat_height) {
            self.chat_scroll = self.chat_scroll.saturating_add(1);
        }
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    /// Scroll so the newest message (or the placeholder) is visible. Wrap
    /// width mirrors the render-side estimate.
    pub fn scroll_chat_to_bottom(&mut self) {
        let wrap_width = self.wrap_width();

        let mut total_lines: u16 = 0;
        for msg in self.session.messages() {
            total_lines += message_line_count(msg, wrap_width);
            total_lines += 1; // blank line between messages
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.total_chat_lines = total_lines;
        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        }
    }

    // Sidebar navigation
    pub fn sidebar_nav_down(&mut self) {
        let len = self.conversations.len();
        if len > 0 {
            let i = self.sidebar_state.selected().unwrap_or(0);
            self.sidebar_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn sidebar_nav_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }
}

/// Estimated rendered height of one message, in wrapped lines. Used by the
/// scroll math; must stay in step with how the chat pane lays messages out.
fn message_line_count(msg: &crate::session::Message, wrap_width: usize) -> u16 {
    let mut lines: u16 = 1; // sender and time line
    if let Some(text) = &msg.text {
        for line in text.lines() {
            let char_count = line.chars().count();
            if char_count == 0 {
                lines += 1;
            } else {
                lines += ((char_count / wrap_width) + 1) as u16;
            }
        }
    }
    if msg.kind == MessageKind::Image {
        lines += 1;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Sender;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_app(server_url: &str) -> App {
        let mut config = Config::new();
        config.server_url = server_url.to_string();
        App::new(config)
    }

    async fn wait_for_task(app: &mut App) {
        for _ in 0..400 {
            app.poll_task().await;
            if app.task.is_none() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("background task never finished");
    }

    #[test]
    fn empty_submit_raises_an_alert_without_a_task() {
        let mut app = test_app("http://unused.invalid");
        app.input = "   ".into();
        app.submit();
        assert!(app.alert.is_some());
        assert!(app.task.is_none());
    }

    #[tokio::test]
    async fn detect_confirm_finalize_then_detect_again() {
        let server = MockServer::start().await;

        // Detection must run twice: once before the finalize, once after it,
        // because a successful finalize clears the pending exchange.
        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "m-1"
            })))
            .expect(2)
            .mount(&server)
            .await;

        // The finalize body must be exactly what Confirm returned.
        Mock::given(method("POST"))
            .and(path("/api/chat/text"))
            .and(body_json(json!({
                "conversion_id": null,
                "message_id": "m-1",
                "text": "hello world"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "a reply"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = test_app(&server.uri());
        app.input = "hello world".into();
        app.submit();
        wait_for_task(&mut app).await;

        // Review opens with the redaction defaulting to the original text.
        {
            let review = app.review.as_ref().expect("review should open");
            assert_eq!(review.buffer, "hello world");
            assert_eq!(
                app.session.pending().message_id.as_deref(),
                Some("m-1")
            );
        }

        app.confirm_review();
        assert!(app.review.is_none());
        assert_eq!(app.input, "hello world");
        assert!(
            app.session.pending().message_id.is_some(),
            "pending survives a text confirm"
        );

        app.submit();
        wait_for_task(&mut app).await;

        let messages = app.session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].text.as_deref(), Some("a reply"));
        assert!(app.session.pending().message_id.is_none());
        assert!(app.input.is_empty());

        // Same input again: must go back through detection, not finalize.
        app.input = "hello world".into();
        app.submit();
        wait_for_task(&mut app).await;
        assert!(app.review.is_some());
    }

    #[tokio::test]
    async fn finalize_failure_marks_the_placeholder() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/text"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut app = test_app(&server.uri());
        app.session.set_pending(Some("m-1".into()), None);
        app.input = "send me".into();
        app.submit();
        wait_for_task(&mut app).await;

        let messages = app.session.messages();
        assert_eq!(messages.len(), 2);
        let placeholder = &messages[1];
        assert!(placeholder.failed, "placeholder must be marked failed");
        assert_ne!(
            placeholder.text.as_deref(),
            Some(crate::session::THINKING_TEXT)
        );
        assert!(app.alert.is_some());
        assert!(
            app.session.pending().message_id.is_none(),
            "terminal failure clears the pending exchange"
        );
    }

    #[tokio::test]
    async fn detection_failure_leaves_state_unchanged() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut app = test_app(&server.uri());
        app.input = "hello".into();
        app.submit();
        wait_for_task(&mut app).await;

        assert!(app.review.is_none());
        assert!(app.alert.is_some());
        assert!(app.session.messages().is_empty());
        assert_eq!(app.input, "hello");
    }

    #[tokio::test]
    async fn cancel_frees_the_slot_without_side_effects() {
        // Point at a server that will never answer quickly.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/detect"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "message_id": "m-1" }))
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let mut app = test_app(&server.uri());
        app.input = "hello".into();
        app.submit();
        assert!(app.processing());

        app.cancel_task();
        assert!(!app.processing());

        app.poll_task().await;
        assert!(app.review.is_none());
        assert!(app.alert.is_none());
    }
}

