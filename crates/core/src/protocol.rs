use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const RAW_PREVIEW_CHARS: usize = 120;

/// Optional per-query backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryConfig {
    #[serde(rename = "DATABASE", skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(rename = "LLM_BACKEND", skip_serializing_if = "Option::is_none")]
    pub llm_backend: Option<String>,
}

impl QueryConfig {
    /// Blank settings are left out; `None` when nothing is set.
    #[must_use]
    pub fn from_settings(database: &str, llm_backend: &str) -> Option<Self> {
        let non_blank = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let config = Self {
            database: non_blank(database),
            llm_backend: non_blank(llm_backend),
        };
        (!config.is_empty()).then_some(config)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.database.is_none() && self.llm_backend.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<QueryConfig>,
}

impl OutboundFrame {
    #[must_use]
    pub fn new(query: impl Into<String>, config: Option<QueryConfig>) -> Self {
        Self {
            query: query.into(),
            config: config.filter(|config| !config.is_empty()),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An inbound frame after a best-effort JSON parse. Text that is not JSON
/// is passed through untouched so the consumer can log it.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Json(Value),
    Raw(String),
}

impl InboundPayload {
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            // Some backends double-encode the frame as a JSON string.
            Ok(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
                Ok(value @ Value::Object(_)) => Self::Json(value),
                _ => Self::Json(Value::String(inner)),
            },
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {preview}")]
    InvalidJson { preview: String },
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no `event` tag")]
    MissingEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Prompt {
        stream: bool,
        message: String,
    },
    Error {
        message: Option<String>,
        kind: Option<String>,
    },
    DbResult {
        sql_query: String,
        rows: Vec<Map<String, Value>>,
        columns: Option<Vec<String>>,
    },
    System {
        message: String,
    },
    Completion,
    Unrecognized(String),
}

impl ProtocolEvent {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Prompt { .. } => "prompt",
            Self::Error { .. } => "error",
            Self::DbResult { .. } => "db_result",
            Self::System { .. } => "system",
            Self::Completion => "completion",
            Self::Unrecognized(event) => event,
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(RAW_PREVIEW_CHARS).collect()
}

fn text_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    match object.get(field)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn column_names(data: &Map<String, Value>) -> Option<Vec<String>> {
    let columns = data.get("columns")?.as_array()?;
    let names = columns
        .iter()
        .filter_map(|column| match column {
            Value::Object(column) => text_field(column, "name"),
            Value::String(name) => Some(name.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    (!names.is_empty()).then_some(names)
}

/// Classifies a decoded frame `{event, setting, data}` by its `event` tag.
/// Unknown tags come back as [`ProtocolEvent::Unrecognized`].
pub fn decode_event(payload: &InboundPayload) -> Result<ProtocolEvent, DecodeError> {
    let value = match payload {
        InboundPayload::Raw(text) => {
            return Err(DecodeError::InvalidJson {
                preview: preview(text),
            })
        }
        InboundPayload::Json(value) => value,
    };

    let Value::Object(frame) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let event = frame
        .get("event")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingEvent)?;

    let empty = Map::new();
    let data = frame
        .get("data")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let setting = frame
        .get("setting")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let event = match event {
        "prompt" => ProtocolEvent::Prompt {
            stream: setting.get("stream").and_then(Value::as_bool) == Some(true),
            message: text_field(data, "message").unwrap_or_default(),
        },
        "error" => ProtocolEvent::Error {
            message: text_field(data, "message").filter(|message| !message.is_empty()),
            kind: text_field(data, "type"),
        },
        "db_result" => ProtocolEvent::DbResult {
            sql_query: text_field(data, "sql_query").unwrap_or_default(),
            rows: data
                .get("rows")
                .and_then(Value::as_array)
                .map(|rows| rows.iter().filter_map(Value::as_object).cloned().collect())
                .unwrap_or_default(),
            columns: column_names(data),
        },
        "system" => ProtocolEvent::System {
            message: text_field(data, "message").unwrap_or_default(),
        },
        "completion" => ProtocolEvent::Completion,
        other => ProtocolEvent::Unrecognized(other.to_string()),
    };
    Ok(event)
}
