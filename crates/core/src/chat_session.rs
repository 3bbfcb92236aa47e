use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chart_spec::{ChartOptions, ChartSpec, ChartType};
use crate::connection_manager::{ConnectionCommands, ConnectionEvent, ConnectionState};
use crate::protocol::{decode_event, InboundPayload, OutboundFrame, ProtocolEvent};
use crate::settings::{HistoryEntry, UserSettings};
use crate::tabular::TabularResult;
use crate::visualization::{ChartTypeError, VisualizationEngine};

pub const FALLBACK_ERROR_MESSAGE: &str = "An error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    Error,
    System,
}

impl Sender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Error => "error",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "error" => Some(Self::Error),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Pending,
    Streaming,
    Complete,
    Errored,
}

impl ResponseStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub sql_query: String,
    pub table: TabularResult,
}

/// Client-side state of one query/response turn.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRecord {
    pub response_id: String,
    pub query: String,
    pub status: ResponseStatus,
    pub accumulated_text: String,
    pub result: Option<QueryResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub is_loading: bool,
    pub result: Option<QueryResult>,
    pub chart_type: Option<ChartType>,
}

impl ChatMessage {
    fn new(id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            content: content.into(),
            is_loading: false,
            result: None,
            chart_type: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmissionRejected {
    #[error("query is empty")]
    EmptyQuery,
    #[error("not connected (connection is {})", .state.label())]
    NotConnected { state: ConnectionState },
    #[error("response `{response_id}` is still pending")]
    ResponsePending { response_id: String },
    #[error("failed to encode query frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What an inbound frame did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Updated,
    /// The active record reached `complete` or `errored` and was released.
    Finished,
    Ignored,
}

#[derive(Debug)]
pub struct ChatSession {
    connection_state: ConnectionState,
    messages: Vec<ChatMessage>,
    active: Option<CorrelationRecord>,
    finished: Vec<CorrelationRecord>,
    settings: UserSettings,
    visualization: VisualizationEngine,
    next_message_id: u64,
}

impl ChatSession {
    #[must_use]
    pub fn new(settings: UserSettings, chart_options: ChartOptions) -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            messages: Vec::new(),
            active: None,
            finished: Vec::new(),
            settings,
            visualization: VisualizationEngine::new(chart_options),
            next_message_id: 1,
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    #[must_use]
    pub fn active(&self) -> Option<&CorrelationRecord> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn finished_records(&self) -> &[CorrelationRecord] {
        &self.finished
    }

    #[must_use]
    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: UserSettings) {
        self.settings = settings;
    }

    #[must_use]
    pub fn visualization(&self) -> &VisualizationEngine {
        &self.visualization
    }

    /// True when a submission would currently be accepted for a non-empty query.
    #[must_use]
    pub fn accepts_input(&self) -> bool {
        self.connection_state.is_open() && self.active.is_none()
    }

    /// Sends `query` and opens a new correlation record. Rejected with no
    /// network effect when the query is blank, the connection is not open,
    /// or a response is still pending. Returns the response id.
    pub fn submit(
        &mut self,
        query: &str,
        connection: &impl ConnectionCommands,
    ) -> Result<String, SubmissionRejected> {
        let query = query.trim();
        let rejection = if query.is_empty() {
            Some(SubmissionRejected::EmptyQuery)
        } else if !self.connection_state.is_open() {
            Some(SubmissionRejected::NotConnected {
                state: self.connection_state,
            })
        } else {
            self.active
                .as_ref()
                .map(|active| SubmissionRejected::ResponsePending {
                    response_id: active.response_id.clone(),
                })
        };
        if let Some(rejection) = rejection {
            debug!(reason = %rejection, "submission rejected");
            return Err(rejection);
        }

        let frame = OutboundFrame::new(query, self.settings.to_query_config()).encode()?;

        let message_id = self.next_message_id.to_string();
        let response_id = format!("{message_id}-response");
        self.next_message_id += 1;

        self.messages
            .push(ChatMessage::new(message_id, Sender::User, query));
        self.messages.push(ChatMessage {
            is_loading: true,
            ..ChatMessage::new(response_id.clone(), Sender::Assistant, "")
        });
        self.active = Some(CorrelationRecord {
            response_id: response_id.clone(),
            query: query.to_string(),
            status: ResponseStatus::Pending,
            accumulated_text: String::new(),
            result: None,
        });

        info!(response_id = %response_id, "query submitted");
        connection.send(frame);
        Ok(response_id)
    }

    pub fn apply_connection_event(&mut self, event: &ConnectionEvent) -> InboundOutcome {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.connection_state = *state;
                InboundOutcome::Updated
            }
            ConnectionEvent::Inbound(payload) => self.handle_inbound(payload),
        }
    }

    /// Routes one inbound frame to the active record. Undecodable frames,
    /// unknown events and frames with no active record are logged and
    /// dropped.
    pub fn handle_inbound(&mut self, payload: &InboundPayload) -> InboundOutcome {
        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                return InboundOutcome::Ignored;
            }
        };

        if let ProtocolEvent::Unrecognized(name) = &event {
            warn!(event = %name, "dropping frame with unknown event");
            return InboundOutcome::Ignored;
        }

        let Some(record) = self.active.as_mut() else {
            debug!(event = event.name(), "dropping frame; no active response");
            return InboundOutcome::Ignored;
        };
        let response_id = record.response_id.clone();

        match event {
            ProtocolEvent::Prompt {
                stream: true,
                message,
            } => {
                record.accumulated_text.push_str(&message);
                record.status = ResponseStatus::Streaming;
                let content = record.accumulated_text.clone();
                self.update_message(&response_id, |placeholder| {
                    placeholder.content = content;
                    placeholder.is_loading = true;
                });
            }
            ProtocolEvent::Prompt {
                stream: false,
                message,
            } => {
                record.accumulated_text.clone_from(&message);
                record.status = ResponseStatus::Complete;
                self.update_message(&response_id, |placeholder| {
                    placeholder.content = message;
                    placeholder.is_loading = false;
                });
            }
            ProtocolEvent::Error { message, kind } => {
                warn!(
                    response_id = %response_id,
                    kind = kind.as_deref().unwrap_or("unknown"),
                    "backend reported an error"
                );
                record.status = ResponseStatus::Errored;
                let content = message.unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
                self.update_message(&response_id, |placeholder| {
                    placeholder.sender = Sender::Error;
                    placeholder.content = content;
                    placeholder.is_loading = false;
                });
            }
            ProtocolEvent::DbResult {
                sql_query,
                rows,
                columns,
            } => {
                let result = QueryResult {
                    sql_query,
                    table: TabularResult::from_records(&rows, columns),
                };
                record.result = Some(result.clone());
                let chart_type = self
                    .visualization
                    .analysis(&response_id, &result.table)
                    .default_chart_type;
                debug!(
                    response_id = %response_id,
                    rows = result.table.row_count(),
                    columns = result.table.column_count(),
                    chart_type = ?chart_type,
                    "result attached"
                );
                self.update_message(&response_id, |placeholder| {
                    placeholder.content.clear();
                    placeholder.result = Some(result);
                    placeholder.chart_type = Some(chart_type);
                    placeholder.is_loading = false;
                });
            }
            ProtocolEvent::System { message } => {
                let id = format!("{response_id}-system-{}", self.messages.len());
                self.messages
                    .push(ChatMessage::new(id, Sender::System, message));
            }
            ProtocolEvent::Completion => {
                record.status = ResponseStatus::Complete;
                self.update_message(&response_id, |placeholder| {
                    placeholder.is_loading = false;
                });
            }
            ProtocolEvent::Unrecognized(_) => return InboundOutcome::Ignored,
        }

        self.release_if_terminal()
    }

    fn update_message(&mut self, id: &str, apply: impl FnOnce(&mut ChatMessage)) {
        if let Some(message) = self.messages.iter_mut().find(|message| message.id == id) {
            apply(message);
        }
    }

    fn release_if_terminal(&mut self) -> InboundOutcome {
        let terminal = self
            .active
            .as_ref()
            .is_some_and(|record| record.status.is_terminal());
        if !terminal {
            return InboundOutcome::Updated;
        }

        if let Some(record) = self.active.take() {
            info!(response_id = %record.response_id, status = ?record.status, "response finished");
            self.finished.push(record);
        }
        InboundOutcome::Finished
    }

    pub fn chart_options(&mut self, message_id: &str) -> Result<Vec<ChartType>, ChartTypeError> {
        let message = self
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .ok_or_else(|| ChartTypeError::UnknownMessage(message_id.to_string()))?;
        let Some(result) = &message.result else {
            return Err(ChartTypeError::UnknownMessage(message_id.to_string()));
        };
        Ok(self
            .visualization
            .analysis(&message.id, &result.table)
            .chart_options
            .clone())
    }

    /// User override of a result's chart type. Axes are not re-inferred.
    pub fn set_chart_type(
        &mut self,
        message_id: &str,
        chart_type: ChartType,
    ) -> Result<(), ChartTypeError> {
        if !self.chart_options(message_id)?.contains(&chart_type) {
            return Err(ChartTypeError::NotOffered { chart_type });
        }
        self.update_message(message_id, |message| message.chart_type = Some(chart_type));
        Ok(())
    }

    pub fn chart_spec(&mut self, message_id: &str) -> Result<ChartSpec, ChartTypeError> {
        let message = self
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .ok_or_else(|| ChartTypeError::UnknownMessage(message_id.to_string()))?;
        let Some(result) = &message.result else {
            return Err(ChartTypeError::UnknownMessage(message_id.to_string()));
        };

        let chart_type = match message.chart_type {
            Some(chart_type) => chart_type,
            None => {
                self.visualization
                    .analysis(&message.id, &result.table)
                    .default_chart_type
            }
        };
        self.visualization
            .chart_spec(&message.id, &result.table, chart_type)
    }

    /// Clears messages and every correlation record.
    pub fn reset(&mut self) {
        info!(messages = self.messages.len(), "chat reset");
        self.messages.clear();
        self.active = None;
        self.finished.clear();
        self.visualization.clear();
    }

    /// Result turns have no text of their own and are saved as their SQL.
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|message| !message.is_loading)
            .map(|message| HistoryEntry {
                sender: message.sender.as_str().to_string(),
                text: history_text(message),
            })
            .collect()
    }

    /// Replaces the message list with persisted history. Restored messages
    /// carry no result payload.
    pub fn restore_history(&mut self, entries: &[HistoryEntry]) {
        self.reset();
        self.messages = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let sender = Sender::parse(&entry.sender).unwrap_or(Sender::System);
                ChatMessage::new(format!("history-{index}"), sender, entry.text.clone())
            })
            .collect();
    }
}

fn history_text(message: &ChatMessage) -> String {
    match &message.result {
        Some(result) if message.content.is_empty() => {
            if result.sql_query.is_empty() {
                format!("[{} rows]", result.table.row_count())
            } else {
                result.sql_query.clone()
            }
        }
        _ => message.content.clone(),
    }
}
