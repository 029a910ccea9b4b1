use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Which asynchronous server job a handle tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Import,
    Export,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Import => write!(f, "import"),
            JobKind::Export => write!(f, "export"),
        }
    }
}

/// Tracking reference returned when the server accepts a job (HTTP 201).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    kind: JobKind,
    url: String,
}

impl JobHandle {
    pub fn new(kind: JobKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Status URL to poll.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// One observation of a job's status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Processing,
    /// Full status payload; it carries the result reference.
    Complete(Value),
    /// Terminal failure. `status` is the server's value when it sent a string,
    /// `None` when the field was missing or not a string.
    Failed {
        status: Option<String>,
        reason: String,
    },
}

impl JobStatus {
    pub fn from_payload(payload: Value) -> Self {
        let status = match payload.get("status") {
            Some(Value::String(status)) => status.clone(),
            Some(other) => {
                return JobStatus::Failed {
                    status: None,
                    reason: format!("status field is not a string: {other}"),
                };
            }
            None => {
                return JobStatus::Failed {
                    status: None,
                    reason: "status field is missing".to_string(),
                };
            }
        };

        match status.as_str() {
            "processing" => JobStatus::Processing,
            "complete" => JobStatus::Complete(payload),
            _ => {
                let reason = server_detail(&payload)
                    .unwrap_or_else(|| "the server gave no further detail".to_string());
                JobStatus::Failed {
                    status: Some(status),
                    reason,
                }
            }
        }
    }
}

/// Human-readable error text the server attached to a failed job, if any.
fn server_detail(payload: &Value) -> Option<String> {
    ["/messages/error", "/messages/detail", "/detail", "/error"]
        .iter()
        .filter_map(|pointer| payload.pointer(pointer))
        .find_map(|value| match value {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Array(items) if !items.is_empty() => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Value::Object(_) => Some(value.to_string()),
            _ => None,
        })
}
