//! Redaction review state and the span-redaction preview
//!
//! The review surface owns two pieces of local state: the editable
//! redacted-text buffer and the per-finding selected flags. Both are rebuilt
//! whenever a new detection result arrives.

use ratatui::widgets::ListState;
use serde::Deserialize;

/// Full-block character applied over selected spans.
pub const REDACTION_BLOCK: char = '\u{2588}';

/// Character offsets of a detected value inside the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

/// One detected PII instance, as returned by the detection endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub value: Option<String>,
    pub confidence: Option<f64>,
    pub position: Option<TextSpan>,
    #[serde(skip, default = "selected_default")]
    pub selected: bool,
}

fn selected_default() -> bool {
    true
}

/// Findings with no id get their list index, matching however much of the id
/// the backend chose to send.
pub fn assign_ids(findings: &mut [Finding]) {
    for (i, finding) in findings.iter_mut().enumerate() {
        if finding.id.is_empty() {
            finding.id = i.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
}

/// The original/redacted pairing shown in the review surface.
#[derive(Debug, Clone)]
pub struct RedactionContent {
    pub kind: ContentKind,
    pub original: String,
    pub redacted: Option<String>,
}

pub struct ReviewState {
    pub content: RedactionContent,
    pub findings: Vec<Finding>,
    pub list_state: ListState,
    /// Editable redacted-text buffer, text reviews only.
    pub buffer: String,
    pub cursor: usize,
    pub editing: bool,
}

impl ReviewState {
    pub fn new(content: RedactionContent, mut findings: Vec<Finding>) -> Self {
        assign_ids(&mut findings);
        let buffer = match content.kind {
            ContentKind::Text => content.redacted.clone().unwrap_or_default(),
            ContentKind::Image => String::new(),
        };
        let mut list_state = ListState::default();
        if !findings.is_empty() {
            list_state.select(Some(0));
        }
        Self {
            content,
            findings,
            list_state,
            cursor: buffer.chars().count(),
            buffer,
            editing: false,
        }
    }

    pub fn selected_count(&self) -> usize {
        self.findings.iter().filter(|f| f.selected).count()
    }

    /// Flip the selected flag of the finding under the cursor.
    pub fn toggle_current(&mut self) {
        if let Some(i) = self.list_state.selected() {
            if let Some(finding) = self.findings.get_mut(i) {
                finding.selected = !finding.selected;
            }
        }
    }

    pub fn select_all(&mut self) {
        for finding in &mut self.findings {
            finding.selected = true;
        }
    }

    pub fn clear_all(&mut self) {
        for finding in &mut self.findings {
            finding.selected = false;
        }
    }

    pub fn nav_down(&mut self) {
        let len = self.findings.len();
        if len > 0 {
            let i = self.list_state.selected().unwrap_or(0);
            self.list_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn nav_up(&mut self) {
        let i = self.list_state.selected().unwrap_or(0);
        self.list_state.select(Some(i.saturating_sub(1)));
    }

    /// The preview shown under the editable buffer.
    ///
    /// When any finding carries a span, the preview is the original with the
    /// selected spans blocked out and the buffer is ignored; otherwise it is
    /// the buffer itself. The two modes never merge.
    pub fn preview(&self) -> String {
        match self.content.kind {
            ContentKind::Image => self.content.redacted.clone().unwrap_or_default(),
            ContentKind::Text => {
                if self.findings.iter().any(|f| f.position.is_some()) {
                    apply_spans(&self.content.original, &self.findings)
                } else {
                    self.buffer.clone()
                }
            }
        }
    }

    /// The value handed back to the orchestrator on Confirm.
    pub fn confirm(&self) -> String {
        match self.content.kind {
            ContentKind::Text => {
                if self.buffer.is_empty() {
                    self.preview()
                } else {
                    self.buffer.clone()
                }
            }
            ContentKind::Image => self
                .content
                .redacted
                .clone()
                .unwrap_or_else(|| self.content.original.clone()),
        }
    }
}

/// Block out the selected findings' spans, applied by descending end offset
/// so earlier offsets keep their meaning. Out-of-range offsets are clamped.
fn apply_spans(original: &str, findings: &[Finding]) -> String {
    let mut spans: Vec<TextSpan> = findings
        .iter()
        .filter(|f| f.selected)
        .filter_map(|f| f.position)
        .collect();
    spans.sort_by(|a, b| b.end.cmp(&a.end));

    let mut chars: Vec<char> = original.chars().collect();
    for span in spans {
        let end = span.end.min(chars.len());
        let start = span.start.min(end);
        for c in &mut chars[start..end] {
            *c = REDACTION_BLOCK;
        }
    }
    chars.into_iter().collect()
}
