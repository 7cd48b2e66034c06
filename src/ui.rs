use chrono::Local;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, FocusPane, InputMode, TaskKind};
use crate::redaction::ContentKind;
use crate::session::{MessageKind, Sender};

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let sidebar_width = if app.sidebar_expanded { 24 } else { 4 };
    let [sidebar_area, chat_area] = Layout::horizontal([
        Constraint::Length(sidebar_width),
        Constraint::Min(0),
    ])
    .areas(body_area);

    render_sidebar(app, frame, sidebar_area);
    render_chat(app, frame, chat_area);
    render_footer(app, frame, footer_area);

    // Popups, topmost last
    if app.review.is_some() {
        render_review(app, frame, area);
    }
    if app.show_attach_input {
        render_attach_input(app, frame, area);
    }
    if app.alert.is_some() {
        render_alert(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let staged = if app.attachment.is_some() {
        " [image staged]"
    } else {
        ""
    };

    let title = Line::from(vec![
        Span::styled(" piichat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(staged, Style::default().fg(Color::Yellow)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let title = if app.sidebar_expanded { " Chats " } else { " C " };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let items: Vec<ListItem> = app
        .conversations
        .iter()
        .map(|c| {
            if app.sidebar_expanded {
                ListItem::new(format!(" {}  #{} ", c.name, c.id))
            } else {
                ListItem::new(format!(
                    " {} ",
                    c.name.chars().next().unwrap_or('?')
                ))
            }
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let has_attachment = app.attachment.is_some();

    let (messages_area, attach_area, input_area) = if has_attachment {
        let [m, a, i] = Layout::vertical([
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .areas(area);
        (m, Some(a), i)
    } else {
        let [m, i] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(area);
        (m, None, i)
    };

    render_messages(app, frame, messages_area);
    if let (Some(bar_area), Some(staged)) = (attach_area, &app.attachment) {
        let size_kib = staged.bytes.len() / 1024;
        let bar = Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" [image] {} ({} KiB)", staged.file_name, size_kib),
                Style::default().fg(Color::Yellow),
            ),
            Span::styled("  x to remove", Style::default().fg(Color::Gray)),
        ]));
        frame.render_widget(bar, bar_area);
    }
    render_input(app, frame, input_area);
}

fn render_messages(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Messages;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversation ");

    let inner = block.inner(area);
    app.chat_height = inner.height;
    app.chat_width = inner.width;

    let mut lines: Vec<Line> = Vec::new();
    for (i, msg) in app.session.messages().iter().enumerate() {
        let selected = focused && app.selected_msg == Some(i);

        let (label, label_color) = match msg.sender {
            Sender::User => ("You", Color::Cyan),
            Sender::Assistant => ("AI", Color::Green),
        };
        let time = msg.timestamp.with_timezone(&Local).format("%H:%M");

        let mut header_spans = vec![
            Span::styled(label, Style::default().fg(label_color).bold()),
            Span::styled(format!("  {}", time), Style::default().fg(Color::Gray)),
        ];
        if msg.failed {
            header_spans.push(Span::styled(
                "  failed",
                Style::default().fg(Color::Red).bold(),
            ));
        }
        let header_style = if selected {
            Style::default().bg(Color::Blue)
        } else {
            Style::default()
        };
        lines.push(Line::from(header_spans).style(header_style));

        if let Some(text) = &msg.text {
            let body_style = if msg.failed {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };
            for line in text.lines() {
                lines.push(Line::from(Span::styled(line.to_string(), body_style)));
            }
        }
        if msg.kind == MessageKind::Image {
            if let Some(url) = &msg.image_url {
                lines.push(Line::from(vec![
                    Span::styled("[image] ", Style::default().fg(Color::Magenta).bold()),
                    Span::styled(short_url(url), Style::default().fg(Color::Gray)),
                ]));
            }
        }
        lines.push(Line::default());
    }

    // Detection progress shows inline, below the history.
    if let Some(task) = &app.task {
        let note = match task.kind {
            TaskKind::DetectText { .. } | TaskKind::DetectImage => {
                Some("Scanning for sensitive content")
            }
            TaskKind::Download => Some("Downloading image"),
            _ => None,
        };
        if let Some(note) = note {
            let dots = ".".repeat(app.animation_frame as usize + 1);
            lines.push(Line::from(Span::styled(
                format!("{}{}", note, dots),
                Style::default().fg(Color::Gray).italic(),
            )));
        }
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "No messages yet. Press i and start typing.",
            Style::default().fg(Color::Gray),
        )));
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if app.processing() {
        Color::DarkGray
    } else if editing || app.focus == FocusPane::Input {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let title = if app.processing() {
        " Message (sending is disabled while a request runs) "
    } else {
        " Message "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let paragraph = if visible_text.is_empty() && !editing {
        Paragraph::new("Type your message...")
            .style(Style::default().fg(Color::Gray))
            .block(block)
    } else {
        Paragraph::new(visible_text)
            .style(Style::default().fg(Color::Cyan))
            .block(block)
    };
    frame.render_widget(paragraph, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let (mode_text, mode_style) = if app.processing() {
        (" WORKING ", Style::default().bg(Color::Magenta).fg(Color::White))
    } else if app.input_mode == InputMode::Editing {
        (" EDIT ", Style::default().bg(Color::Yellow).fg(Color::Black))
    } else {
        (" CHAT ", Style::default().bg(Color::Blue).fg(Color::White))
    };

    let mut hints: Vec<Span> = Vec::new();
    let push_hint = |hints: &mut Vec<Span<'static>>, key: &'static str, label: &'static str| {
        hints.push(Span::styled(key, key_style));
        hints.push(Span::styled(label, label_style));
    };

    if app.alert.is_some() {
        push_hint(&mut hints, " any key ", " dismiss ");
    } else if app.review.is_some() {
        let editing = app.review.as_ref().is_some_and(|r| r.editing);
        if editing {
            push_hint(&mut hints, " Esc/Enter ", " done editing ");
        } else {
            push_hint(&mut hints, " j/k ", " findings ");
            push_hint(&mut hints, " Space ", " toggle ");
            push_hint(&mut hints, " a ", " redact all ");
            push_hint(&mut hints, " n ", " clear all ");
            push_hint(&mut hints, " e ", " edit text ");
            push_hint(&mut hints, " Enter ", " confirm ");
            push_hint(&mut hints, " Esc ", " cancel ");
        }
    } else if app.show_attach_input {
        push_hint(&mut hints, " Enter ", " stage ");
        push_hint(&mut hints, " Esc ", " cancel ");
    } else if app.input_mode == InputMode::Editing {
        push_hint(&mut hints, " Enter ", " send ");
        push_hint(&mut hints, " Esc ", " messages ");
        push_hint(&mut hints, " Tab ", " focus ");
    } else {
        match app.focus {
            FocusPane::Sidebar => {
                push_hint(&mut hints, " j/k ", " chats ");
                push_hint(&mut hints, " b ", " collapse ");
            }
            FocusPane::Messages => {
                push_hint(&mut hints, " j/k ", " select ");
                push_hint(&mut hints, " d ", " delete ");
                push_hint(&mut hints, " c ", " copy ");
                push_hint(&mut hints, " s ", " save image ");
            }
            FocusPane::Input => {
                push_hint(&mut hints, " i ", " type ");
            }
        }
        push_hint(&mut hints, " a ", " attach ");
        push_hint(&mut hints, " C ", " clear chat ");
        push_hint(&mut hints, " Tab ", " focus ");
        push_hint(&mut hints, " q ", " quit ");
    }

    if app.processing() {
        push_hint(&mut hints, " Esc ", " cancel request ");
    }

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_review(app: &mut App, frame: &mut Frame, area: Rect) {
    let Some(review) = &mut app.review else {
        return;
    };

    let popup_width = area.width.saturating_sub(8).min(90).max(40);
    let popup_height = area.height.saturating_sub(4).min(26).max(14);
    let popup_area = centered(area, popup_width, popup_height);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Review Redactions ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let findings_height = (review.findings.len() as u16 + 2).min(8);
    let [count_area, compare_area, findings_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(6),
        Constraint::Length(findings_height),
    ])
    .areas(inner);

    if review.content.kind == ContentKind::Text {
        let counter = Paragraph::new(format!(
            " {} of {} items selected",
            review.selected_count(),
            review.findings.len()
        ))
        .style(Style::default().fg(Color::Gray));
        frame.render_widget(counter, count_area);
    }

    let [left_area, right_area] = Layout::horizontal([
        Constraint::Percentage(50),
        Constraint::Percentage(50),
    ])
    .areas(compare_area);

    match review.content.kind {
        ContentKind::Text => {
            let original = Paragraph::new(review.content.original.clone())
                .wrap(Wrap { trim: false })
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::DarkGray))
                        .title(" Original Text "),
                );
            frame.render_widget(original, left_area);

            let [buffer_area, preview_area] = Layout::vertical([
                Constraint::Percentage(50),
                Constraint::Percentage(50),
            ])
            .areas(right_area);

            let buffer_border = if review.editing {
                Color::Yellow
            } else {
                Color::DarkGray
            };
            let buffer_block = Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(buffer_border))
                .title(" Redacted Text (e to edit) ");

            let buffer_inner_width = buffer_area.width.saturating_sub(2) as usize;
            let scroll_offset = if buffer_inner_width == 0 {
                0
            } else if review.cursor >= buffer_inner_width {
                review.cursor - buffer_inner_width + 1
            } else {
                0
            };
            let visible: String = review
                .buffer
                .chars()
                .skip(scroll_offset)
                .take(buffer_inner_width)
                .collect();
            let buffer = Paragraph::new(visible)
                .style(Style::default().fg(Color::Cyan))
                .block(buffer_block);
            frame.render_widget(buffer, buffer_area);

            if review.editing {
                let cursor_x = (review.cursor - scroll_offset) as u16;
                frame.set_cursor_position((buffer_area.x + cursor_x + 1, buffer_area.y + 1));
            }

            let preview = Paragraph::new(review.preview())
                .wrap(Wrap { trim: false })
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::DarkGray))
                        .title(" Preview "),
                );
            frame.render_widget(preview, preview_area);
        }
        ContentKind::Image => {
            let original = Paragraph::new(short_url(&review.content.original))
                .wrap(Wrap { trim: true })
                .style(Style::default().fg(Color::Gray))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::DarkGray))
                        .title(" Original Image "),
                );
            frame.render_widget(original, left_area);

            let redacted_text = review
                .content
                .redacted
                .as_deref()
                .map(short_url)
                .unwrap_or_else(|| "(no redacted version returned)".to_string());
            let redacted = Paragraph::new(redacted_text)
                .wrap(Wrap { trim: true })
                .style(Style::default().fg(Color::Gray))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::DarkGray))
                        .title(" Redacted Image "),
                );
            frame.render_widget(redacted, right_area);
        }
    }

    let items: Vec<ListItem> = review
        .findings
        .iter()
        .map(|f| {
            let check = if f.selected { "[x]" } else { "[ ]" };
            let value = f.value.as_deref().unwrap_or("(value withheld)");
            let kind = f.kind.as_deref().unwrap_or("");
            let confidence = f
                .confidence
                .map(|c| format!(" {:.1}%", c * 100.0))
                .unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::raw(format!(" {} ", check)),
                Span::styled(value.to_string(), Style::default().fg(Color::Yellow)),
                Span::styled(format!("  {}", kind), Style::default().fg(Color::Magenta)),
                Span::styled(confidence, Style::default().fg(Color::Gray)),
            ]))
        })
        .collect();

    let findings_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Detected PII ");

    if review.findings.is_empty() {
        let empty = Paragraph::new(" Nothing detected.")
            .style(Style::default().fg(Color::Gray))
            .block(findings_block);
        frame.render_widget(empty, findings_area);
    } else {
        let list = List::new(items)
            .block(findings_block)
            .highlight_style(
                Style::default()
                    .bg(Color::Blue)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");
        frame.render_stateful_widget(list, findings_area, &mut review.list_state);
    }
}

fn render_attach_input(app: &App, frame: &mut Frame, area: Rect) {
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 7;
    let popup_area = centered(area, popup_width, popup_height);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Attach Image ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions =
        Paragraph::new("Path to a JPEG, PNG, GIF, or WebP image (max 5 MiB).")
            .style(Style::default().fg(Color::Gray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let inner_width = inner.width as usize;
    let visible: String = app
        .attach_input
        .chars()
        .skip(app.attach_cursor.saturating_sub(inner_width.saturating_sub(1)))
        .take(inner_width)
        .collect();
    let input = Paragraph::new(visible).style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.attach_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    let hint = Paragraph::new("Enter to stage, Esc to cancel.")
        .style(Style::default().fg(Color::Gray));
    frame.render_widget(hint, Rect::new(inner.x, inner.y + 4, inner.width, 1));
}

fn render_alert(app: &App, frame: &mut Frame, area: Rect) {
    let Some(message) = &app.alert else {
        return;
    };

    let popup_width = 50.min(area.width.saturating_sub(4));
    let popup_height = 6;
    let popup_area = centered(area, popup_width, popup_height);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Notice ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let body = Paragraph::new(message.clone()).wrap(Wrap { trim: true });
    frame.render_widget(
        body,
        Rect::new(inner.x, inner.y, inner.width, inner.height.saturating_sub(1)),
    );

    let hint = Paragraph::new("press any key").style(Style::default().fg(Color::Gray));
    frame.render_widget(
        hint,
        Rect::new(inner.x, inner.y + inner.height.saturating_sub(1), inner.width, 1),
    );
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let x = (area.width.saturating_sub(width)) / 2;
    let y = (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

/// Data URLs get very long; show enough to recognize the content.
fn short_url(url: &str) -> String {
    const LIMIT: usize = 48;
    if url.chars().count() <= LIMIT {
        url.to_string()
    } else {
        let head: String = url.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}
