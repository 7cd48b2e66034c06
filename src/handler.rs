use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, FocusPane, InputMode};
use crate::redaction::ContentKind;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string edits.
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    // Popups take the whole keyboard, in priority order.
    if app.alert.is_some() {
        app.alert = None;
        return Ok(());
    }
    if app.review.is_some() {
        handle_review_key(app, key);
        return Ok(());
    }
    if app.show_attach_input {
        handle_attach_key(app, key).await;
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
    Ok(())
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Abort the in-flight request, if any.
        KeyCode::Esc => {
            if app.processing() {
                app.cancel_task();
            }
        }

        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Sidebar => FocusPane::Messages,
                FocusPane::Messages => FocusPane::Input,
                FocusPane::Input => FocusPane::Sidebar,
            };
            if app.focus == FocusPane::Input {
                app.input_mode = InputMode::Editing;
                app.input_cursor = app.input.chars().count();
            }
        }

        KeyCode::Char('i') | KeyCode::Char('/') => {
            app.focus = FocusPane::Input;
            app.input_mode = InputMode::Editing;
            app.input_cursor = app.input.chars().count();
        }

        // Attachment staging
        KeyCode::Char('a') => {
            app.show_attach_input = true;
            app.attach_input.clear();
            app.attach_cursor = 0;
        }
        KeyCode::Char('x') => app.remove_attachment(),

        KeyCode::Char('b') => app.sidebar_expanded = !app.sidebar_expanded,
        KeyCode::Char('C') => app.clear_history(),

        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_down(),
            FocusPane::Messages => app.select_next_message(),
            FocusPane::Input => {}
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::Sidebar => app.sidebar_nav_up(),
            FocusPane::Messages => app.select_prev_message(),
            FocusPane::Input => {}
        },
        KeyCode::Char('g') => {
            if app.focus == FocusPane::Messages && !app.session.messages().is_empty() {
                app.selected_msg = Some(0);
                app.scroll_to_selected();
            }
        }
        KeyCode::Char('G') => {
            if app.focus == FocusPane::Messages {
                let len = app.session.messages().len();
                if len > 0 {
                    app.selected_msg = Some(len - 1);
                    app.scroll_to_selected();
                }
            }
        }

        // Chat scrolling (must match before the plain 'd'/'u' arms)
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if app.focus == FocusPane::Messages {
                for _ in 0..3 {
                    app.scroll_down();
                }
            }
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            if app.focus == FocusPane::Messages {
                for _ in 0..3 {
                    app.scroll_up();
                }
            }
        }

        // Message actions
        KeyCode::Char('d') => {
            if app.focus == FocusPane::Messages {
                app.delete_selected();
            }
        }
        KeyCode::Char('c') => {
            if app.focus == FocusPane::Messages {
                if let Some(text) = app.selected_message().and_then(|m| m.text.clone()) {
                    copy_to_clipboard(&text);
                }
            }
        }
        KeyCode::Char('s') => {
            if app.focus == FocusPane::Messages {
                if let Some(url) = app.selected_message().and_then(|m| m.image_url.clone()) {
                    app.start_download(url);
                }
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::Messages;
            if app.selected_msg.is_none() && !app.session.messages().is_empty() {
                app.selected_msg = Some(app.session.messages().len() - 1);
            }
        }
        KeyCode::Enter => app.submit(),
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => app.input_cursor = app.input_cursor.saturating_sub(1),
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => app.input_cursor = 0,
        KeyCode::End => app.input_cursor = app.input.chars().count(),
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
            app.input.insert(byte_pos, c);
            app.input_cursor += 1;
        }
        _ => {}
    }
}

fn handle_review_key(app: &mut App, key: KeyEvent) {
    let Some(review) = app.review.as_mut() else {
        return;
    };

    if review.editing {
        match key.code {
            KeyCode::Esc | KeyCode::Enter => review.editing = false,
            KeyCode::Backspace => {
                if review.cursor > 0 {
                    review.cursor -= 1;
                    let byte_pos = char_to_byte_index(&review.buffer, review.cursor);
                    review.buffer.remove(byte_pos);
                }
            }
            KeyCode::Delete => {
                let char_count = review.buffer.chars().count();
                if review.cursor < char_count {
                    let byte_pos = char_to_byte_index(&review.buffer, review.cursor);
                    review.buffer.remove(byte_pos);
                }
            }
            KeyCode::Left => review.cursor = review.cursor.saturating_sub(1),
            KeyCode::Right => {
                let char_count = review.buffer.chars().count();
                review.cursor = (review.cursor + 1).min(char_count);
            }
            KeyCode::Home => review.cursor = 0,
            KeyCode::End => review.cursor = review.buffer.chars().count(),
            KeyCode::Char(c) => {
                let byte_pos = char_to_byte_index(&review.buffer, review.cursor);
                review.buffer.insert(byte_pos, c);
                review.cursor += 1;
            }
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Esc => app.cancel_review(),
        KeyCode::Enter => app.confirm_review(),
        KeyCode::Char('j') | KeyCode::Down => review.nav_down(),
        KeyCode::Char('k') | KeyCode::Up => review.nav_up(),
        KeyCode::Char(' ') => review.toggle_current(),
        KeyCode::Char('a') => review.select_all(),
        KeyCode::Char('n') => review.clear_all(),
        KeyCode::Char('e') => {
            if review.content.kind == ContentKind::Text {
                review.editing = true;
                review.cursor = review.buffer.chars().count();
            }
        }
        _ => {}
    }
}

async fn handle_attach_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_attach_input = false;
            app.attach_input.clear();
            app.attach_cursor = 0;
        }
        KeyCode::Enter => {
            let path = app.attach_input.clone();
            app.attach_from_path(&path).await;
        }
        KeyCode::Backspace => {
            if app.attach_cursor > 0 {
                app.attach_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.attach_input, app.attach_cursor);
                app.attach_input.remove(byte_pos);
            }
        }
        KeyCode::Left => app.attach_cursor = app.attach_cursor.saturating_sub(1),
        KeyCode::Right => {
            let char_count = app.attach_input.chars().count();
            app.attach_cursor = (app.attach_cursor + 1).min(char_count);
        }
        KeyCode::Home => app.attach_cursor = 0,
        KeyCode::End => app.attach_cursor = app.attach_input.chars().count(),
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.attach_input, app.attach_cursor);
            app.attach_input.insert(byte_pos, c);
            app.attach_cursor += 1;
        }
        _ => {}
    }
}

/// Best-effort system clipboard write. No-op when no clipboard tool exists.
fn copy_to_clipboard(text: &str) {
    use std::io::Write;
    use std::process::{Command, Stdio};

    for tool in [
        &["pbcopy"][..],
        &["wl-copy"][..],
        &["xclip", "-selection", "clipboard"][..],
    ] {
        if let Ok(mut child) = Command::new(tool[0])
            .args(&tool[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(text.as_bytes());
            }
            return;
        }
    }
}
