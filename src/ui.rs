use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::{io, time::Duration};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};

use volunteer_messenger::messaging::view::{self, Bubble, PanelState, Sidebar, ThreadView, Toast};
use volunteer_messenger::MessagingScreen;

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

/// What the main loop should do after a key press.
#[derive(Debug, Clone, PartialEq)]
pub enum UiAction {
    Quit,
    Send,
    OpenConversation { partner_id: String, partner_name: String },
    OpenToast,
    DismissAlert,
    InputChanged(String),
}

#[derive(Clone, Copy, PartialEq)]
enum Focus {
    Conversations,
    Messages,
}

pub struct ChatUI {
    input: Input,
    focus: Focus,
    selected: usize,
    help_visible: bool,
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            input: Input::default(),
            focus: Focus::Conversations,
            selected: 0,
            help_visible: false,
        }
    }

    /// The screen owns the draft (a failed send restores it), so mirror it here.
    pub fn sync_input(&mut self, draft: &str) {
        if self.input.value() != draft {
            self.input = Input::default().with_value(draft.to_string());
        }
    }

    /// Keep the highlighted row on the open conversation after the sidebar re-sorts.
    pub fn follow_active(&mut self, sidebar: &Sidebar) {
        if let Some(index) = sidebar.active.as_deref().and_then(|id| sidebar.position(id)) {
            if self.focus == Focus::Messages {
                self.selected = index;
            }
        }
        self.selected = self.selected.min(sidebar.conversations.len().saturating_sub(1));
    }

    pub fn handle_input(&mut self, screen: &MessagingScreen) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(10))? {
            return Ok(None);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(None);
        };
        if key.kind != KeyEventKind::Press {
            return Ok(None);
        }

        // The send-failure alert is modal
        if screen.alert().is_some() {
            return Ok(match key.code {
                KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ') => Some(UiAction::DismissAlert),
                _ => None,
            });
        }

        if self.help_visible {
            self.help_visible = false;
            return Ok(None);
        }

        match (key.code, key.modifiers) {
            (KeyCode::Esc, _) => return Ok(Some(UiAction::Quit)),
            (KeyCode::Tab, _) => {
                self.focus = match self.focus {
                    Focus::Conversations => Focus::Messages,
                    Focus::Messages => Focus::Conversations,
                };
                return Ok(None);
            }
            (KeyCode::Char('h'), KeyModifiers::CONTROL) => {
                self.help_visible = true;
                return Ok(None);
            }
            (KeyCode::Char('o'), KeyModifiers::CONTROL) => {
                if screen.toast().is_some() {
                    self.focus = Focus::Messages;
                    return Ok(Some(UiAction::OpenToast));
                }
                return Ok(None);
            }
            _ => {}
        }

        match self.focus {
            Focus::Conversations => {
                let conversations = &screen.sidebar().conversations;
                match key.code {
                    KeyCode::Up => {
                        self.selected = self.selected.saturating_sub(1);
                    }
                    KeyCode::Down => {
                        if self.selected + 1 < conversations.len() {
                            self.selected += 1;
                        }
                    }
                    KeyCode::Enter => {
                        if let Some(conversation) = conversations.get(self.selected) {
                            debug!("UI: opening conversation with {}", conversation.partner_id);
                            self.focus = Focus::Messages;
                            return Ok(Some(UiAction::OpenConversation {
                                partner_id: conversation.partner_id.clone(),
                                partner_name: conversation.partner_name.clone(),
                            }));
                        }
                    }
                    _ => {}
                }
                Ok(None)
            }
            Focus::Messages => match key.code {
                KeyCode::Enter => Ok(Some(UiAction::Send)),
                _ => {
                    if screen.open_partner().is_none() {
                        return Ok(None);
                    }
                    let before = self.input.value().to_string();
                    self.input.handle_event(&Event::Key(key));
                    if self.input.value() != before {
                        Ok(Some(UiAction::InputChanged(self.input.value().to_string())))
                    } else {
                        Ok(None)
                    }
                }
            },
        }
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, screen: &MessagingScreen) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30), // Conversations panel
                Constraint::Percentage(70), // Chat panel
            ])
            .split(size);

        let chat_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(5),    // Messages area
                Constraint::Length(3), // Input box
                Constraint::Length(1), // Help line
            ])
            .split(chunks[1]);

        draw_conversations(frame, screen.sidebar(), self.selected, self.focus == Focus::Conversations, chunks[0]);
        draw_thread(frame, screen.thread(), chat_chunks[0]);

        let input_title = if screen.open_partner().is_some() { "Message" } else { "Select a conversation" };
        let input_block = Block::default()
            .title(input_title)
            .borders(Borders::ALL)
            .border_style(match self.focus {
                Focus::Messages => Style::default().fg(Color::Yellow),
                _ => Style::default(),
            });
        let input_widget = Paragraph::new(self.input.value()).block(input_block);
        frame.render_widget(input_widget, chat_chunks[1]);

        let mut help_spans = vec![Span::styled(
            "ESC quit | TAB switch | Enter open/send | Ctrl+H help",
            Style::default().fg(Color::Gray),
        )];
        if screen.toast().is_some() {
            help_spans.push(Span::styled(" | Ctrl+O open new message", Style::default().fg(Color::Cyan)));
        }
        frame.render_widget(Paragraph::new(Line::from(help_spans)), chat_chunks[2]);

        if self.focus == Focus::Messages && screen.open_partner().is_some() {
            frame.set_cursor(
                chat_chunks[1].x + self.input.cursor() as u16 + 1,
                chat_chunks[1].y + 1,
            );
        }

        if let Some(toast) = screen.toast() {
            draw_toast(frame, toast, size);
        }

        if self.help_visible {
            draw_help_dialog(frame, size);
        }

        if let Some(alert) = screen.alert() {
            draw_alert(frame, alert, size);
        }
    }
}

impl Default for ChatUI {
    fn default() -> Self {
        ChatUI::new()
    }
}

fn panel_placeholder(state: &PanelState, loading: &str, empty: &str) -> Option<(String, Style)> {
    match state {
        PanelState::Loading => Some((loading.to_string(), Style::default().fg(Color::Gray))),
        PanelState::Empty => Some((empty.to_string(), Style::default().fg(Color::Gray))),
        PanelState::Error(message) => Some((message.clone(), Style::default().fg(Color::Red))),
        PanelState::Ready => None,
    }
}

fn draw_conversations<B: Backend>(f: &mut Frame<B>, sidebar: &Sidebar, selected: usize, focused: bool, area: Rect) {
    let block = Block::default()
        .title("Conversations (Tab to focus)")
        .borders(Borders::ALL)
        .border_style(if focused { Style::default().fg(Color::Yellow) } else { Style::default() });

    if let Some((text, style)) = panel_placeholder(&sidebar.state, view::LOADING_CONVERSATIONS, view::NO_CONVERSATIONS) {
        f.render_widget(Paragraph::new(text).style(style).block(block), area);
        return;
    }

    let preview_width = area.width.saturating_sub(6) as usize;
    let items: Vec<ListItem> = sidebar
        .conversations
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let is_active = sidebar.active.as_deref() == Some(c.partner_id.as_str());
            let cursor = if i == selected { "> " } else { "  " };
            let marker = if c.has_unread() { "● " } else { "  " };

            let mut name_style = Style::default();
            if c.has_unread() {
                name_style = name_style.add_modifier(Modifier::BOLD);
            }
            if is_active {
                name_style = name_style.fg(Color::Cyan);
            }

            let mut name_spans = vec![Span::raw(cursor), Span::styled(marker, Style::default().fg(Color::Green))];
            name_spans.push(Span::styled(c.partner_name.clone(), name_style));
            if c.unread_count > 1 {
                name_spans.push(Span::styled(format!(" ({})", c.unread_count), Style::default().fg(Color::Green)));
            }

            let preview = wrap(&c.last_message, preview_width.max(1))
                .into_iter()
                .next()
                .map(|l| l.into_owned())
                .unwrap_or_default();
            let preview_style = if c.is_new {
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
            } else {
                Style::default().fg(Color::Gray)
            };

            ListItem::new(vec![
                Line::from(name_spans),
                Line::from(vec![Span::raw("    "), Span::styled(preview, preview_style)]),
            ])
        })
        .collect();

    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(selected.min(items.len() - 1)));
    }
    let list = List::new(items).block(block).highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn bubble_lines(bubble: &Bubble, partner_name: &str, wrap_width: usize) -> Vec<ListItem<'static>> {
    let who = if bubble.outgoing { "You" } else { partner_name };
    let status = if bubble.sending { " (sending...)" } else { "" };
    let full_content = format!("[{}] {}: {}{}", bubble.time_label, who, bubble.body, status);

    let style = if bubble.sending {
        Style::default().fg(Color::Blue)
    } else if bubble.outgoing {
        Style::default().fg(Color::Green)
    } else {
        Style::default()
    };

    wrap(&full_content, wrap_width.max(1))
        .into_iter()
        .map(|line| ListItem::new(Text::from(line.into_owned())).style(style))
        .collect()
}

fn draw_thread<B: Backend>(f: &mut Frame<B>, thread: Option<&ThreadView>, area: Rect) {
    let Some(thread) = thread else {
        let hint = Paragraph::new("Pick a conversation on the left to start chatting.")
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::ALL).title("Messages"));
        f.render_widget(hint, area);
        return;
    };

    let block = Block::default().borders(Borders::ALL).title(thread.partner_name.clone());

    if let Some((text, style)) = panel_placeholder(&thread.state, view::LOADING_MESSAGES, view::NO_MESSAGES) {
        f.render_widget(Paragraph::new(text).style(style).block(block), area);
        return;
    }

    let wrap_width = area.width.saturating_sub(2) as usize; // Account for borders
    let items: Vec<ListItem> = thread
        .bubbles
        .iter()
        .flat_map(|b| bubble_lines(b, &thread.partner_name, wrap_width))
        .collect();

    // Select the last line so the list scrolls to the newest message
    let mut list_state = ListState::default();
    if !items.is_empty() {
        list_state.select(Some(items.len() - 1));
    }
    let list = List::new(items).block(block).highlight_style(Style::default());
    f.render_stateful_widget(list, area, &mut list_state);
}

fn draw_toast<B: Backend>(f: &mut Frame<B>, toast: &Toast, area: Rect) {
    // Top-right corner
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = 5.min(area.height.saturating_sub(4));
    let popup_x = area.width.saturating_sub(popup_width + 2);
    let popup_area = Rect::new(popup_x, 1, popup_width, popup_height);

    let popup_block = Block::default()
        .title(format!("New message from {}", toast.sender_name))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let content = vec![
        Line::from(toast.excerpt.clone()),
        Line::from(Span::styled("Ctrl+O to open", Style::default().fg(Color::Gray))),
    ];

    f.render_widget(Clear, popup_area);
    f.render_widget(
        Paragraph::new(content).block(popup_block).wrap(Wrap { trim: true }),
        popup_area,
    );
}

fn draw_alert<B: Backend>(f: &mut Frame<B>, alert: &str, area: Rect) {
    let popup_width = 40.min(area.width.saturating_sub(4));
    let popup_height = 5.min(area.height.saturating_sub(4));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let popup_block = Block::default()
        .title("Error")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let content = vec![
        Line::from(Span::styled(alert.to_string(), Style::default().fg(Color::Red))),
        Line::from(Span::styled("Press Enter to dismiss", Style::default().fg(Color::Gray))),
    ];

    f.render_widget(Clear, popup_area);
    f.render_widget(Paragraph::new(content).block(popup_block).alignment(Alignment::Center), popup_area);
}

fn draw_help_dialog<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = 16.min(area.height.saturating_sub(4));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    let popup_block = Block::default()
        .title("Keyboard Shortcuts")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    f.render_widget(Clear, popup_area);
    f.render_widget(popup_block, popup_area);

    let inner_area = popup_area.inner(&Margin {
        vertical: 1,
        horizontal: 2,
    });

    let shortcuts = vec![
        ("General", ""),
        ("ESC", "Quit application"),
        ("Tab", "Switch between Conversations and Messages"),
        ("", ""),
        ("Conversations", ""),
        ("↑/↓", "Move through conversations"),
        ("Enter", "Open the highlighted conversation"),
        ("", ""),
        ("Messages", ""),
        ("Enter", "Send message"),
        ("Ctrl+O", "Open the conversation from a new-message popup"),
        ("", ""),
        ("Press any key to close this dialog", ""),
    ];

    let items: Vec<ListItem> = shortcuts
        .iter()
        .map(|(key, desc)| {
            if desc.is_empty() {
                if key.is_empty() {
                    ListItem::new("")
                } else {
                    ListItem::new(Text::styled(
                        key.to_string(),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ))
                }
            } else {
                let line = Line::from(vec![
                    Span::styled(format!("{:<10}", key), Style::default().fg(Color::Green)),
                    Span::raw(desc.to_string()),
                ]);
                ListItem::new(line)
            }
        })
        .collect();

    f.render_widget(List::new(items), inner_area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
