//! TUI for a team chat using ratatui

use anyhow::Result;
use clubchat::{ChatError, ChatMessage, ChatSession, MessageId, Notice};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// What the input line asks for
#[derive(Debug, PartialEq)]
enum InputCommand {
    Send(String),
    Delete(MessageId),
    Older,
    Nothing,
    Unknown(String),
}

fn parse_input(input: &str) -> InputCommand {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return InputCommand::Nothing;
    }
    if let Some(rest) = trimmed.strip_prefix("/delete") {
        return match rest.trim().parse::<MessageId>() {
            Ok(id) => InputCommand::Delete(id),
            Err(_) => InputCommand::Unknown("Usage: /delete <message id>".to_string()),
        };
    }
    if trimmed == "/older" {
        return InputCommand::Older;
    }
    if trimmed.starts_with('/') {
        return InputCommand::Unknown(format!("Unknown command: {}", trimmed));
    }
    InputCommand::Send(input.to_string())
}

fn notice_text(notice: &Notice) -> String {
    match notice {
        Notice::SendFailed { body, reason, .. } => {
            format!("Not sent ({}): {}", reason, body)
        }
        Notice::DeleteFailed { id, reason, .. } => format!("Delete of {} failed: {}", id, reason),
        Notice::FeedLost { reason, .. } => format!("Offline ({}), reconnecting...", reason),
        Notice::FeedRestored { .. } => "Back online".to_string(),
    }
}

/// Application state for TUI
struct App {
    session: Arc<ChatSession>,
    team_id: Uuid,
    local_user: Option<Uuid>,
    /// Latest store snapshot
    messages: Vec<ChatMessage>,
    online: usize,
    members: Option<usize>,
    /// Input buffer
    input: String,
    /// Lines scrolled up from the newest message
    scroll: usize,
    loading_older: bool,
    has_more: bool,
    should_quit: bool,
    status: String,
    /// Results of spawned operations
    results: mpsc::UnboundedSender<TaskResult>,
}

enum TaskResult {
    Status(String),
    Members(usize),
    Older { loaded: usize, may_have_more: bool },
    OlderFailed(String),
}

impl App {
    fn new(session: Arc<ChatSession>, team_id: Uuid, results: mpsc::UnboundedSender<TaskResult>) -> Self {
        let local_user = session.identity().user_id;
        Self {
            session,
            team_id,
            local_user,
            messages: Vec::new(),
            online: 0,
            members: None,
            input: String::new(),
            scroll: 0,
            loading_older: false,
            has_more: true,
            should_quit: false,
            status: "Connected".to_string(),
            results,
        }
    }

    fn submit_input(&mut self) {
        let input = std::mem::take(&mut self.input);
        match parse_input(&input) {
            InputCommand::Nothing => {}
            InputCommand::Send(body) => {
                self.scroll = 0;
                let session = self.session.clone();
                let results = self.results.clone();
                // Spawned so the pending entry renders while the request runs
                tokio::spawn(async move {
                    match session.send(&body).await {
                        Ok(_) | Err(ChatError::TeamChanged) => {}
                        // Write failures arrive as notices
                        Err(e) if e.is_retryable() => {}
                        Err(e) => {
                            let _ = results.send(TaskResult::Status(format!("Error: {}", e)));
                        }
                    }
                });
            }
            InputCommand::Delete(id) => {
                let session = self.session.clone();
                let results = self.results.clone();
                tokio::spawn(async move {
                    let status = match session.delete(&id).await {
                        Ok(()) => format!("Deleted {}", id),
                        Err(e) if e.is_retryable() => return,
                        Err(e) => format!("Error: {}", e),
                    };
                    let _ = results.send(TaskResult::Status(status));
                });
            }
            InputCommand::Older => self.request_older(),
            InputCommand::Unknown(message) => self.status = message,
        }
    }

    fn request_older(&mut self) {
        if self.loading_older || !self.has_more {
            return;
        }
        self.loading_older = true;
        self.status = "Loading older messages...".to_string();
        let session = self.session.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let result = match session.load_older().await {
                Ok(page) => TaskResult::Older {
                    loaded: page.loaded,
                    may_have_more: page.may_have_more,
                },
                Err(e) => TaskResult::OlderFailed(e.to_string()),
            };
            let _ = results.send(result);
        });
    }

    fn handle_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::Status(status) => self.status = status,
            TaskResult::Members(count) => self.members = Some(count),
            TaskResult::Older {
                loaded,
                may_have_more,
            } => {
                self.loading_older = false;
                self.has_more = may_have_more;
                self.status = if may_have_more {
                    format!("Loaded {} older messages", loaded)
                } else {
                    "Start of conversation".to_string()
                };
            }
            TaskResult::OlderFailed(reason) => {
                self.loading_older = false;
                self.status = format!("Error: {}", reason);
            }
        }
    }

    fn scroll_up(&mut self, lines: usize, visible: usize) {
        let max = self.messages.len().saturating_sub(visible);
        if self.scroll + lines >= max {
            self.scroll = max;
            self.request_older();
        } else {
            self.scroll += lines;
        }
    }
}

/// Run the TUI
pub async fn run(session: Arc<ChatSession>, team_id: Uuid) -> Result<()> {
    let mut messages_rx = session.subscribe_messages().await?;
    let mut online_rx: watch::Receiver<BTreeSet<Uuid>> = session.subscribe_online().await?;
    let mut notices: broadcast::Receiver<Notice> = session.subscribe_notices();
    let (results_tx, mut results_rx) = mpsc::unbounded_channel();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(session.clone(), team_id, results_tx.clone());
    app.messages = messages_rx.borrow_and_update().clone();

    {
        let session = session.clone();
        tokio::spawn(async move {
            match session.member_count().await {
                Ok(count) => {
                    let _ = results_tx.send(TaskResult::Members(count));
                }
                Err(e) => tracing::warn!("Failed to count members: {}", e),
            }
        });
    }

    // Main loop
    loop {
        let mut visible = 0;
        terminal.draw(|f| {
            visible = conversation_height(f.area());
            draw_ui(f, &app)
        })?;

        // Handle events with timeout
        if event::poll(std::time::Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                match (key.code, key.modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                        app.should_quit = true;
                    }
                    (KeyCode::Enter, _) => app.submit_input(),
                    (KeyCode::Backspace, _) => {
                        app.input.pop();
                    }
                    (KeyCode::Char(c), _) => {
                        app.input.push(c);
                    }
                    (KeyCode::Up, _) => app.scroll_up(1, visible),
                    (KeyCode::Down, _) => {
                        app.scroll = app.scroll.saturating_sub(1);
                    }
                    (KeyCode::PageUp, _) => app.scroll_up(10, visible),
                    (KeyCode::PageDown, _) => {
                        app.scroll = app.scroll.saturating_sub(10);
                    }
                    _ => {}
                }
            }
        }

        if messages_rx.has_changed().unwrap_or(false) {
            app.messages = messages_rx.borrow_and_update().clone();
        }
        if online_rx.has_changed().unwrap_or(false) {
            app.online = online_rx.borrow_and_update().len();
        }
        loop {
            match notices.try_recv() {
                Ok(notice) => app.status = notice_text(&notice),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("Skipped {} notices", n);
                }
                Err(_) => break,
            }
        }
        while let Ok(result) = results_rx.try_recv() {
            app.handle_result(result);
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(())
}

fn layout(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),    // Conversation
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status bar
        ])
        .split(area)
}

fn conversation_height(area: Rect) -> usize {
    layout(area)[0].height.saturating_sub(2) as usize
}

fn draw_ui(f: &mut Frame, app: &App) {
    let chunks = layout(f.area());
    draw_conversation(f, app, chunks[0]);
    draw_input(f, app, chunks[1]);
    draw_status(f, app, chunks[2]);
}

fn message_line<'a>(message: &'a ChatMessage, local_user: Option<Uuid>) -> Line<'a> {
    let own = Some(message.author_user_id) == local_user;
    let style = if own {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Green)
    };

    let mut spans = vec![
        Span::styled(
            message.created_at.with_timezone(&chrono::Local).format("%H:%M ").to_string(),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("{}: ", message.author_label()),
            style.add_modifier(Modifier::BOLD),
        ),
        Span::styled(message.body.as_str(), style),
    ];
    if message.is_temporary() {
        spans.push(Span::styled(" [sending...]", Style::default().fg(Color::Yellow)));
    }
    Line::from(spans)
}

fn draw_conversation(f: &mut Frame, app: &App, area: Rect) {
    let visible = area.height.saturating_sub(2) as usize;
    let end = app.messages.len().saturating_sub(app.scroll);
    let start = end.saturating_sub(visible);

    let items: Vec<ListItem> = app.messages[start..end]
        .iter()
        .map(|m| ListItem::new(message_line(m, app.local_user)))
        .collect();

    let title = format!(" Team {} ", &app.team_id.to_string()[..8]);
    let conversation = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(conversation, area);
}

fn draw_input(f: &mut Frame, app: &App, area: Rect) {
    let can_send = app.local_user.is_some();
    let display_text = if !app.input.is_empty() {
        app.input.clone()
    } else if can_send {
        "Type a message... (/older, /delete <id>)".to_string()
    } else {
        "Read only: no user id given".to_string()
    };

    let input = Paragraph::new(display_text)
        .style(if app.input.is_empty() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::White)
        })
        .block(
            Block::default()
                .title(" Input ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });

    f.render_widget(input, area);
    f.set_cursor_position((area.x + 1 + app.input.chars().count() as u16, area.y + 1));
}

fn status_text(status: &str, online: usize, members: Option<usize>) -> String {
    let presence = match members {
        Some(total) => format!("{} of {} online", online, total),
        None => format!("{} online", online),
    };
    format!(" {} | {} | Ctrl+C to quit", status, presence)
}

fn draw_status(f: &mut Frame, app: &App, area: Rect) {
    let status = Paragraph::new(status_text(&app.status, app.online, app.members))
        .style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(status, area);
}
