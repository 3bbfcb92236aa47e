use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use nlsql_core::chart_spec::{ChartBody, ChartSpec, ChartType, PieSlice, SeriesChart, TableView};
use nlsql_core::chat_session::{ChatMessage, ChatSession, InboundOutcome, Sender};
use nlsql_core::connection_manager::{ConnectionCommands, ConnectionEvent, ConnectionState};
use nlsql_core::local_store::KeyValueStore;
use nlsql_core::settings::{save_history, SettingsDialog};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Clear, Dataset, GraphType, Paragraph,
    Row, Table, Wrap,
};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const TICK_RATE: Duration = Duration::from_millis(100);
const TABLE_COLUMN_MIN_WIDTH: u16 = 8;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsField {
    Database,
    Llm,
}

impl SettingsField {
    fn next(self) -> Self {
        match self {
            Self::Database => Self::Llm,
            Self::Llm => Self::Database,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    Submit,
    Input(char),
    Backspace,
    NextChartType,
    SelectResult(DirectionKey),
    OpenSettings,
    SaveSettings,
    CancelSettings,
    NextSettingsField,
    CycleSetting,
    ResetChat,
    Reconnect,
    Tick,
}

/// Everything the chat screen needs from the outside world.
pub struct ChatTui<C, S> {
    pub connection: C,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub store: S,
    pub session: ChatSession,
    pub settings: SettingsDialog,
}

struct TuiApp<C, S> {
    connection: C,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    store: S,
    session: ChatSession,
    settings: SettingsDialog,
    settings_field: SettingsField,
    input: String,
    selected_result: Option<String>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl<C: ConnectionCommands, S: KeyValueStore> TuiApp<C, S> {
    fn new(parts: ChatTui<C, S>) -> Self {
        let mut app = Self {
            connection: parts.connection,
            events: parts.events,
            store: parts.store,
            session: parts.session,
            settings: parts.settings,
            settings_field: SettingsField::Database,
            input: String::new(),
            selected_result: None,
            show_help: false,
            should_quit: false,
            status_line: "Type a question and press Enter".to_string(),
        };
        app.session.set_settings(app.settings.committed().clone());
        app
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => {
                self.persist_history();
                self.should_quit = true;
            }
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::Submit => self.submit(),
            Msg::Input(ch) => self.input.push(ch),
            Msg::Backspace => {
                self.input.pop();
            }
            Msg::NextChartType => self.cycle_chart_type(),
            Msg::SelectResult(direction) => self.select_result(direction),
            Msg::OpenSettings => {
                self.settings.open();
                self.settings_field = SettingsField::Database;
            }
            Msg::SaveSettings => self.save_settings(),
            Msg::CancelSettings => {
                self.settings.cancel();
                self.status_line = "Settings unchanged".to_string();
            }
            Msg::NextSettingsField => self.settings_field = self.settings_field.next(),
            Msg::CycleSetting => match self.settings_field {
                SettingsField::Database => self.settings.cycle_database(),
                SettingsField::Llm => self.settings.cycle_llm(),
            },
            Msg::ResetChat => {
                self.session.reset();
                self.selected_result = None;
                self.persist_history();
                self.status_line = "Chat cleared".to_string();
            }
            Msg::Reconnect => {
                self.connection.connect();
                self.status_line = "Reconnecting...".to_string();
            }
            Msg::Tick => self.drain_connection_events(),
        }
    }

    fn drain_connection_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply_connection_event(&event);
        }
    }

    fn apply_connection_event(&mut self, event: &ConnectionEvent) {
        let outcome = self.session.apply_connection_event(event);
        if let ConnectionEvent::StateChanged(state) = event {
            self.status_line = format!("Connection: {}", state.label());
        }

        if let Some(latest) = self.latest_result_id() {
            if self.selected_result.as_deref() != Some(latest.as_str())
                && outcome != InboundOutcome::Ignored
                && matches!(event, ConnectionEvent::Inbound(_))
            {
                self.selected_result = Some(latest);
            }
        }

        if outcome == InboundOutcome::Finished {
            self.persist_history();
        }
    }

    fn latest_result_id(&self) -> Option<String> {
        self.result_ids().last().cloned()
    }

    fn result_ids(&self) -> Vec<String> {
        self.session
            .messages()
            .iter()
            .filter(|message| message.result.is_some())
            .map(|message| message.id.clone())
            .collect()
    }

    fn submit(&mut self) {
        match self.session.submit(&self.input, &self.connection) {
            Ok(response_id) => {
                debug!(response_id = %response_id, "query sent from input line");
                self.input.clear();
                self.status_line = "Waiting for the agent...".to_string();
            }
            Err(error) => self.status_line = format!("Cannot send: {error}"),
        }
    }

    fn cycle_chart_type(&mut self) {
        let Some(message_id) = self.selected_result.clone() else {
            self.status_line = "No result selected".to_string();
            return;
        };

        let options = match self.session.chart_options(&message_id) {
            Ok(options) => options,
            Err(error) => {
                self.status_line = format!("Chart error: {error}");
                return;
            }
        };
        let current = self
            .session
            .message(&message_id)
            .and_then(|message| message.chart_type);
        let next = next_chart_type(&options, current);

        match self.session.set_chart_type(&message_id, next) {
            Ok(()) => self.status_line = format!("Showing {}", next.display_name()),
            Err(error) => self.status_line = format!("Chart error: {error}"),
        }
    }

    fn select_result(&mut self, direction: DirectionKey) {
        let ids = self.result_ids();
        if ids.is_empty() {
            self.status_line = "No results yet".to_string();
            return;
        }

        let current = self
            .selected_result
            .as_ref()
            .and_then(|selected| ids.iter().position(|id| id == selected))
            .unwrap_or(ids.len() - 1);
        let index = match direction {
            DirectionKey::Up => current.saturating_sub(1),
            DirectionKey::Down => (current + 1).min(ids.len() - 1),
        };

        self.selected_result = ids.get(index).cloned();
        self.status_line = format!("Result {} / {}", index + 1, ids.len());
    }

    fn save_settings(&mut self) {
        let Some(settings) = self.settings.save().cloned() else {
            return;
        };

        self.session.set_settings(settings.clone());
        self.status_line = match settings.save(&self.store) {
            Ok(()) => "Settings saved".to_string(),
            Err(error) => {
                warn!(error = %error, "failed to persist settings");
                format!("Settings applied (save failed: {error})")
            }
        };
    }

    fn persist_history(&mut self) {
        if let Err(error) = save_history(&self.store, &self.session.history_snapshot()) {
            warn!(error = %error, "failed to persist chat history");
            self.status_line = format!("History not saved: {error}");
        }
    }

    fn selected_chart(&mut self) -> Option<(String, ChartSpec)> {
        let message_id = self.selected_result.clone()?;
        let spec = self.session.chart_spec(&message_id).ok()?;
        let sql = self
            .session
            .message(&message_id)
            .and_then(|message| message.result.as_ref())
            .map(|result| result.sql_query.clone())
            .unwrap_or_default();
        Some((sql, spec))
    }
}

fn next_chart_type(options: &[ChartType], current: Option<ChartType>) -> ChartType {
    let index = current
        .and_then(|current| options.iter().position(|option| *option == current))
        .map_or(0, |index| (index + 1) % options.len().max(1));
    options.get(index).copied().unwrap_or(ChartType::Table)
}

pub fn run<C: ConnectionCommands, S: KeyValueStore>(parts: ChatTui<C, S>) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, TuiApp::new(parts));
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B, C, S>(terminal: &mut Terminal<B>, mut app: TuiApp<C, S>) -> Result<(), TuiError>
where
    B: Backend,
    C: ConnectionCommands,
    S: KeyValueStore,
{
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, &mut app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.settings.is_open()) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn status_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Connecting => Color::Yellow,
        ConnectionState::Error => Color::Red,
        ConnectionState::Disconnected => Color::DarkGray,
    }
}

fn palette_color(hex: &str) -> Color {
    hex.parse::<Color>().unwrap_or(Color::Cyan)
}

fn render<C: ConnectionCommands, S: KeyValueStore>(frame: &mut Frame<'_>, app: &mut TuiApp<C, S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let state = app.session.connection_state();
    let settings = app.session.settings();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", state.label()),
            Style::default()
                .fg(status_color(state))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("DB: {}", non_empty_or_dash(&settings.database))),
        Span::raw(" | "),
        Span::raw(format!("LLM: {}", non_empty_or_dash(&settings.llm))),
        Span::raw(" | "),
        Span::raw("F1 help  F2 settings"),
    ]))
    .block(Block::default().borders(Borders::ALL).title("NL to SQL"));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);
    render_messages(frame, app.session.messages(), app.selected_result.as_deref(), body[0]);
    match app.selected_chart() {
        Some((sql, spec)) => render_chart(frame, &sql, &spec, body[1]),
        None => {
            let empty = Paragraph::new("No result selected")
                .block(Block::default().borders(Borders::ALL).title("Result"))
                .alignment(Alignment::Center);
            frame.render_widget(empty, body[1]);
        }
    }

    let input_title = if app.session.accepts_input() {
        "Ask a question (Enter to send)"
    } else if app.session.active().is_some() {
        "Waiting for response..."
    } else {
        "Not connected (Ctrl+R to reconnect)"
    };
    let input = Paragraph::new(format!("> {}", app.input))
        .block(Block::default().borders(Borders::ALL).title(input_title));
    frame.render_widget(input, chunks[2]);

    let footer = Paragraph::new(Line::from(format!("Status: {}", app.status_line)))
        .block(Block::default().borders(Borders::ALL).title("Status"));
    frame.render_widget(footer, chunks[3]);

    if app.settings.is_open() {
        render_settings_popup(frame, &app.settings, app.settings_field);
    } else if app.show_help {
        render_help_popup(frame);
    }
}

fn non_empty_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn message_lines(message: &ChatMessage, selected: bool) -> Vec<Line<'static>> {
    let (prefix, color) = match message.sender {
        Sender::User => ("You", Color::Cyan),
        Sender::Assistant => ("Agent", Color::White),
        Sender::Error => ("Error", Color::Red),
        Sender::System => ("System", Color::DarkGray),
    };

    let mut body = message.content.clone();
    if let Some(result) = &message.result {
        let summary = format!(
            "[result: {} rows, {} columns]",
            result.table.row_count(),
            result.table.column_count()
        );
        body = if body.is_empty() {
            summary
        } else {
            format!("{body} {summary}")
        };
    }
    if message.is_loading {
        body.push_str(" ...");
    }

    let marker = if selected { ">" } else { " " };
    let mut lines = vec![Line::from(vec![
        Span::raw(format!("{marker} ")),
        Span::styled(
            format!("{prefix}: "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(body.lines().next().unwrap_or_default().to_string()),
    ])];
    lines.extend(
        body.lines()
            .skip(1)
            .map(|line| Line::from(format!("    {line}"))),
    );
    lines
}

fn render_messages(frame: &mut Frame<'_>, messages: &[ChatMessage], selected: Option<&str>, area: Rect) {
    let lines = messages
        .iter()
        .flat_map(|message| message_lines(message, selected == Some(message.id.as_str())))
        .collect::<Vec<_>>();
    let visible = usize::from(area.height.saturating_sub(2));
    let scroll = u16::try_from(lines.len().saturating_sub(visible)).unwrap_or(u16::MAX);

    let list = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Chat"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    frame.render_widget(list, area);
}

fn render_chart(frame: &mut Frame<'_>, sql: &str, spec: &ChartSpec, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("{} (Tab to switch)", spec.chart_type.display_name()));

    match &spec.body {
        ChartBody::Table(view) => render_table(frame, view, block, area),
        ChartBody::RawSql => {
            let sql = Paragraph::new(sql.to_string())
                .block(block)
                .wrap(Wrap { trim: false });
            frame.render_widget(sql, area);
        }
        ChartBody::Pie(slices) => render_pie(frame, slices, block, area),
        ChartBody::Series(chart) if spec.chart_type == ChartType::Line => {
            render_line_chart(frame, chart, block, area);
        }
        ChartBody::Series(chart) => render_bar_chart(frame, chart, block, area),
    }
}

fn render_table(frame: &mut Frame<'_>, view: &TableView, block: Block<'_>, area: Rect) {
    let widths = view
        .columns
        .iter()
        .map(|_| Constraint::Min(TABLE_COLUMN_MIN_WIDTH))
        .collect::<Vec<_>>();
    let header = Row::new(view.columns.clone()).style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );
    let rows = view.rows.iter().map(|row| Row::new(row.clone()));
    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bar_value(value: f64) -> u64 {
    value.max(0.0).round() as u64
}

fn render_bar_chart(frame: &mut Frame<'_>, chart: &SeriesChart, block: Block<'_>, area: Rect) {
    let groups = chart
        .labels
        .iter()
        .enumerate()
        .map(|(index, label)| {
            let bars = chart
                .datasets
                .iter()
                .map(|dataset| {
                    let value = dataset.values.get(index).copied().unwrap_or(0.0);
                    let color = dataset
                        .point_colors
                        .as_ref()
                        .and_then(|colors| colors.get(index))
                        .unwrap_or(&dataset.border_color);
                    Bar::default()
                        .value(bar_value(value))
                        .style(Style::default().fg(palette_color(color)))
                })
                .collect::<Vec<_>>();
            BarGroup::default()
                .label(Line::from(label.clone()))
                .bars(&bars)
        })
        .collect::<Vec<_>>();

    let series = chart.datasets.len().max(1);
    let bar_width = u16::try_from((usize::from(area.width) / (chart.labels.len().max(1) * (series + 1))).clamp(1, 9))
        .unwrap_or(1);
    let mut bar_chart = BarChart::default()
        .block(block)
        .bar_width(bar_width)
        .bar_gap(0)
        .group_gap(1)
        .max(bar_value(chart.y_range.max));
    for group in groups {
        bar_chart = bar_chart.data(group);
    }
    frame.render_widget(bar_chart, area);
}

fn render_line_chart(frame: &mut Frame<'_>, chart: &SeriesChart, block: Block<'_>, area: Rect) {
    #[allow(clippy::cast_precision_loss)]
    let points = chart
        .datasets
        .iter()
        .map(|dataset| {
            dataset
                .values
                .iter()
                .enumerate()
                .map(|(index, value)| (index as f64, *value))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let datasets = chart
        .datasets
        .iter()
        .zip(&points)
        .map(|(dataset, points)| {
            Dataset::default()
                .name(dataset.label.clone())
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(palette_color(&dataset.border_color)))
                .data(points)
        })
        .collect::<Vec<_>>();

    #[allow(clippy::cast_precision_loss)]
    let x_max = chart.labels.len().saturating_sub(1).max(1) as f64;
    let x_labels = match (chart.labels.first(), chart.labels.last()) {
        (Some(first), Some(last)) if chart.labels.len() > 1 => vec![first.clone(), last.clone()],
        (Some(first), _) => vec![first.clone()],
        _ => Vec::new(),
    };
    let y_labels = vec![
        nlsql_core::tabular::format_number(chart.y_range.min),
        nlsql_core::tabular::format_number(chart.y_range.max),
    ];

    let widget = Chart::new(datasets)
        .block(block)
        .x_axis(Axis::default().bounds([0.0, x_max]).labels(x_labels))
        .y_axis(
            Axis::default()
                .bounds([chart.y_range.min, chart.y_range.max])
                .labels(y_labels),
        );
    frame.render_widget(widget, area);
}

fn render_pie(frame: &mut Frame<'_>, slices: &[PieSlice], block: Block<'_>, area: Rect) {
    let lines = slices
        .iter()
        .map(|slice| {
            Line::from(vec![
                Span::styled("■ ", Style::default().fg(palette_color(&slice.color))),
                Span::raw(format!(
                    "{:<20} {:>12} {:>8}",
                    slice.label,
                    nlsql_core::tabular::format_number(slice.value),
                    slice.percentage_label
                )),
            ])
        })
        .collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_settings_popup(frame: &mut Frame<'_>, dialog: &SettingsDialog, field: SettingsField) {
    let area = centered_rect(60, 40, frame.area());
    frame.render_widget(Clear, area);

    let Some(draft) = dialog.draft() else {
        return;
    };
    let marker = |candidate: SettingsField| if candidate == field { ">" } else { " " };
    let settings = Paragraph::new(vec![
        Line::from("Settings"),
        Line::from(""),
        Line::from(format!(
            "{} Database: {}",
            marker(SettingsField::Database),
            non_empty_or_dash(&draft.database)
        )),
        Line::from(format!(
            "{} LLM backend: {}",
            marker(SettingsField::Llm),
            non_empty_or_dash(&draft.llm)
        )),
        Line::from(""),
        Line::from("Tab: next field  Left/Right: change value"),
        Line::from("Enter: save  Esc: cancel"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Settings"));
    frame.render_widget(settings, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("Esc / Ctrl+C: quit"),
        Line::from("F1: toggle help"),
        Line::from("F2: settings"),
        Line::from("Enter: send question"),
        Line::from("Tab: next chart type for the selected result"),
        Line::from("Up / Down: select result"),
        Line::from("Ctrl+L: clear chat"),
        Line::from("Ctrl+R: reconnect"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, settings_open: bool) -> Option<Msg> {
    if settings_open {
        return match key.code {
            KeyCode::Esc => Some(Msg::CancelSettings),
            KeyCode::Enter => Some(Msg::SaveSettings),
            KeyCode::Tab | KeyCode::Up | KeyCode::Down => Some(Msg::NextSettingsField),
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ') => Some(Msg::CycleSetting),
            _ => None,
        };
    }

    match (key.modifiers, key.code) {
        (_, KeyCode::Esc) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('l')) => Some(Msg::ResetChat),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(Msg::Reconnect),
        (_, KeyCode::F(1)) => Some(Msg::ToggleHelp),
        (_, KeyCode::F(2)) => Some(Msg::OpenSettings),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Tab) => Some(Msg::NextChartType),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::SelectResult(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::SelectResult(DirectionKey::Down)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Some(Msg::Input(ch)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use nlsql_core::chart_spec::{ChartOptions, ChartType};
    use nlsql_core::chat_session::ChatSession;
    use nlsql_core::connection_manager::{
        ConnectionCommands, ConnectionEvent, ConnectionState,
    };
    use nlsql_core::local_store::FileKeyValueStore;
    use nlsql_core::protocol::InboundPayload;
    use nlsql_core::settings::{load_history, SettingsDialog, UserSettings};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::{
        map_key_event, next_chart_type, render, ChatTui, DirectionKey, Msg, SettingsField, TuiApp,
    };

    #[derive(Debug, Default)]
    struct RecordingConnection {
        sent: RefCell<Vec<String>>,
        connects: RefCell<usize>,
    }

    impl ConnectionCommands for RecordingConnection {
        fn connect(&self) {
            *self.connects.borrow_mut() += 1;
        }

        fn send(&self, frame: String) {
            self.sent.borrow_mut().push(frame);
        }

        fn disconnect(&self) {}
    }

    struct Harness {
        app: TuiApp<RecordingConnection, FileKeyValueStore>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
        temp_dir: TempDir,
    }

    fn harness() -> Harness {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let app = TuiApp::new(ChatTui {
            connection: RecordingConnection::default(),
            events: events_rx,
            store: FileKeyValueStore::new(temp_dir.path()),
            session: ChatSession::new(UserSettings::default(), ChartOptions::default()),
            settings: SettingsDialog::new(
                UserSettings::default(),
                vec!["inventory_vega".to_string(), "sakila".to_string()],
                vec!["gpt_oss".to_string(), "aws".to_string()],
            ),
        });
        Harness {
            app,
            events: events_tx,
            temp_dir,
        }
    }

    impl Harness {
        fn push(&self, event: ConnectionEvent) {
            self.events.send(event).expect("event channel open");
        }

        fn push_frame(&self, frame: serde_json::Value) {
            self.push(ConnectionEvent::Inbound(InboundPayload::Json(frame)));
        }

        fn connect(&mut self) {
            self.push(ConnectionEvent::StateChanged(ConnectionState::Connected));
            self.app.handle(Msg::Tick);
        }

        fn type_text(&mut self, text: &str) {
            for ch in text.chars() {
                self.app.handle(Msg::Input(ch));
            }
        }
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn keymap_supports_required_global_keys() {
        assert_eq!(
            map_key_event(key(KeyCode::Esc, KeyModifiers::NONE), false),
            Some(Msg::Quit)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Enter, KeyModifiers::NONE), false),
            Some(Msg::Submit)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Tab, KeyModifiers::NONE), false),
            Some(Msg::NextChartType)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('l'), KeyModifiers::CONTROL), false),
            Some(Msg::ResetChat)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('r'), KeyModifiers::CONTROL), false),
            Some(Msg::Reconnect)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Char('Q'), KeyModifiers::SHIFT), false),
            Some(Msg::Input('Q'))
        );
        assert_eq!(
            map_key_event(key(KeyCode::Down, KeyModifiers::NONE), false),
            Some(Msg::SelectResult(DirectionKey::Down))
        );
    }

    #[test]
    fn settings_dialog_captures_keys_while_open() {
        assert_eq!(
            map_key_event(key(KeyCode::Esc, KeyModifiers::NONE), true),
            Some(Msg::CancelSettings)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Enter, KeyModifiers::NONE), true),
            Some(Msg::SaveSettings)
        );
        assert_eq!(
            map_key_event(key(KeyCode::Right, KeyModifiers::NONE), true),
            Some(Msg::CycleSetting)
        );
        assert_eq!(map_key_event(key(KeyCode::Char('x'), KeyModifiers::NONE), true), None);
    }

    #[test]
    fn chart_type_cycle_wraps_through_options() {
        let options = [ChartType::Table, ChartType::Bar, ChartType::RawSql];
        assert_eq!(next_chart_type(&options, None), ChartType::Table);
        assert_eq!(next_chart_type(&options, Some(ChartType::Bar)), ChartType::RawSql);
        assert_eq!(next_chart_type(&options, Some(ChartType::RawSql)), ChartType::Table);
    }

    #[test]
    fn input_is_kept_when_submission_is_rejected() {
        let mut harness = harness();
        harness.type_text("how many films?");
        harness.app.handle(Msg::Submit);

        assert_eq!(harness.app.input, "how many films?");
        assert!(harness.app.status_line.starts_with("Cannot send"));
        assert!(harness.app.connection.sent.borrow().is_empty());
    }

    #[test]
    fn full_turn_selects_result_and_persists_history() {
        let mut harness = harness();
        harness.connect();
        harness.type_text("revenue per year");
        harness.app.handle(Msg::Submit);
        assert!(harness.app.input.is_empty());
        assert_eq!(harness.app.connection.sent.borrow().len(), 1);

        harness.push_frame(json!({
            "event": "db_result",
            "data": {
                "sql_query": "SELECT Year, Revenue FROM sales",
                "rows": [{"Year": 2020, "Revenue": 100}, {"Year": 2021, "Revenue": 150}]
            }
        }));
        harness.push_frame(json!({"event": "completion", "data": {}}));
        harness.app.handle(Msg::Tick);

        assert_eq!(harness.app.selected_result.as_deref(), Some("1-response"));
        let history = load_history(&FileKeyValueStore::new(harness.temp_dir.path()))
            .expect("history should load");
        assert_eq!(history.len(), 2);

        // Year drives a line chart by default; Tab moves on to pie.
        harness.app.handle(Msg::NextChartType);
        let chart_type = harness
            .app
            .session
            .message("1-response")
            .and_then(|message| message.chart_type);
        assert_eq!(chart_type, Some(ChartType::Pie));
    }

    #[test]
    fn settings_save_applies_to_next_query() {
        let mut harness = harness();
        harness.connect();
        harness.app.handle(Msg::OpenSettings);
        harness.app.handle(Msg::CycleSetting);
        harness.app.handle(Msg::NextSettingsField);
        assert_eq!(harness.app.settings_field, SettingsField::Llm);
        harness.app.handle(Msg::CycleSetting);
        harness.app.handle(Msg::SaveSettings);

        assert_eq!(
            harness.app.session.settings(),
            &UserSettings::new("inventory_vega", "gpt_oss")
        );
        let stored = UserSettings::load(&FileKeyValueStore::new(harness.temp_dir.path()))
            .expect("settings should load");
        assert_eq!(stored, UserSettings::new("inventory_vega", "gpt_oss"));

        harness.type_text("q");
        harness.app.handle(Msg::Submit);
        let frame = harness.app.connection.sent.borrow()[0].clone();
        assert!(frame.contains("\"DATABASE\":\"inventory_vega\""));
    }

    #[test]
    fn reset_and_reconnect_commands() {
        let mut harness = harness();
        harness.connect();
        harness.type_text("q");
        harness.app.handle(Msg::Submit);

        harness.app.handle(Msg::ResetChat);
        assert!(harness.app.session.messages().is_empty());
        assert!(harness.app.selected_result.is_none());

        harness.app.handle(Msg::Reconnect);
        assert_eq!(*harness.app.connection.connects.borrow(), 1);
    }

    #[test]
    fn render_shows_connection_status_and_chart() {
        let mut harness = harness();
        harness.connect();
        harness.type_text("sales");
        harness.app.handle(Msg::Submit);
        harness.push_frame(json!({
            "event": "db_result",
            "data": {
                "sql_query": "SELECT Category, Count FROM t",
                "rows": [{"Category": "A", "Count": 5}, {"Category": "B", "Count": 10}]
            }
        }));
        harness.app.handle(Msg::Tick);
        harness
            .app
            .session
            .set_chart_type("1-response", ChartType::Pie)
            .expect("pie should be offered");

        let mut terminal = Terminal::new(TestBackend::new(100, 30)).expect("test terminal");
        terminal
            .draw(|frame| render(frame, &mut harness.app))
            .expect("render should succeed");

        let content = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(ratatui::buffer::Cell::symbol)
            .collect::<String>();
        assert!(content.contains("Connected"));
        assert!(content.contains("Pie Chart"));
        assert!(content.contains("33.33%"));
    }
}
