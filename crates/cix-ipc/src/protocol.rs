//! Frame definitions for CIX driver communication.
//!
//! Bodies are MessagePack with named fields; JSON bodies are accepted on
//! input so a driver can be poked with `nc` or `socat`.

use cix_indexer::{Completion, Definition, ScanError, UpdateStats};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A request from the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Caller-chosen id echoed on the response
    pub id: u64,
    /// Queue priority override, lower is sooner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(flatten)]
    pub command: Command,
}

impl RequestFrame {
    pub fn new(id: u64, command: Command) -> Self {
        Self {
            id,
            priority: None,
            command,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Driver commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Scan one file into a CIX document
    Scan {
        path: PathBuf,
        /// Buffer contents; read from `path` when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Detected from the path when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        /// Absorb the result into this project's cache
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<PathBuf>,
    },

    /// Rebuild a project's basename index
    UpdateIndex {
        project: PathBuf,
        /// Split the rebuild into low-priority chunks
        #[serde(default)]
        nice: bool,
    },

    /// Members of a dotted expression
    GetCompletions {
        project: PathBuf,
        language: String,
        expr: String,
        #[serde(default)]
        prefix: String,
    },

    /// Definition site of a dotted expression
    GetDefinition {
        project: PathBuf,
        language: String,
        expr: String,
    },

    /// A blob as a CIX document
    GetBlob {
        project: PathBuf,
        language: String,
        name: String,
    },

    /// Persist a project's index now
    SaveIndex { project: PathBuf },

    /// Drop a queued request
    Cancel { target: u64 },

    /// Driver status
    Status,

    /// Health check
    Ping,

    /// Finish queued work, persist and exit
    Shutdown,
}

impl Command {
    /// Wire name of the command, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Scan { .. } => "scan",
            Command::UpdateIndex { .. } => "update_index",
            Command::GetCompletions { .. } => "get_completions",
            Command::GetDefinition { .. } => "get_definition",
            Command::GetBlob { .. } => "get_blob",
            Command::SaveIndex { .. } => "save_index",
            Command::Cancel { .. } => "cancel",
            Command::Status => "status",
            Command::Ping => "ping",
            Command::Shutdown => "shutdown",
        }
    }

    /// Default queue priority, or `None` for commands answered inline.
    pub fn default_priority(&self) -> Option<u32> {
        match self {
            Command::GetCompletions { .. }
            | Command::GetDefinition { .. }
            | Command::GetBlob { .. } => Some(5),
            Command::Scan { .. } => Some(10),
            Command::SaveIndex { .. } => Some(20),
            Command::UpdateIndex { .. } => Some(50),
            Command::Cancel { .. } | Command::Status | Command::Ping | Command::Shutdown => None,
        }
    }
}

/// A response, tagged with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseFrame {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

/// Response from driver to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Success with optional data
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },

    /// Error response
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create a success response with no data
    pub fn ok() -> Self {
        Response::Ok { data: None }
    }

    /// Create a success response with data
    pub fn ok_with(data: ResponseData) -> Self {
        Response::Ok { data: Some(data) }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Scan result as a CIX document
    Scan {
        language: String,
        cix: String,
        errors: Vec<ScanError>,
    },

    /// Index rebuilt
    IndexUpdated { stats: UpdateStats },

    Completions { items: Vec<Completion> },

    Definition { definition: Option<Definition> },

    /// Blob as a CIX document, absent when not found
    Blob { cix: Option<String> },

    /// Index save result
    Saved { saved: bool },

    /// Whether the target was still queued
    Cancelled { cancelled: bool },

    /// Driver status
    Status {
        version: String,
        uptime_secs: u64,
        queue_depth: usize,
        zones_loaded: usize,
        workers: usize,
        /// Total requests handled
        #[serde(default)]
        requests_total: u64,
        #[serde(default)]
        requests_failed: u64,
        /// Average request latency in milliseconds
        #[serde(default)]
        avg_latency_ms: u64,
    },

    /// Pong response
    Pong { timestamp: i64 },
}

/// Error codes for error responses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request format is invalid
    InvalidRequest,
    /// No scanner for the language
    UnsupportedLanguage,
    /// Project or file does not exist
    NotFound,
    /// Request exceeded a resource limit
    ResourceExhausted,
    /// Internal driver error
    InternalError,
    /// Driver is shutting down
    ShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cix_indexer::NodeKind;

    #[test]
    fn test_request_serialization() {
        let req = RequestFrame::new(
            7,
            Command::GetCompletions {
                project: PathBuf::from("/test/path"),
                language: "Python".into(),
                expr: "os.path".into(),
                prefix: String::new(),
            },
        )
        .with_priority(2);

        // JSON for debugging
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"command\":\"get_completions\""));
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("/test/path"));

        let msgpack = rmp_serde::to_vec_named(&req).unwrap();
        let decoded: RequestFrame = rmp_serde::from_slice(&msgpack).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_unit_commands_from_json() {
        let frame: RequestFrame = serde_json::from_str(r#"{"id":1,"command":"ping"}"#).unwrap();
        assert_eq!(frame.command, Command::Ping);
        assert_eq!(frame.priority, None);

        let frame: RequestFrame =
            serde_json::from_str(r#"{"id":2,"command":"cancel","target":1}"#).unwrap();
        assert_eq!(frame.command, Command::Cancel { target: 1 });

        let frame: RequestFrame = serde_json::from_str(
            r#"{"id":3,"command":"update_index","project":"/p","priority":90}"#,
        )
        .unwrap();
        assert_eq!(frame.priority, Some(90));
        assert_eq!(
            frame.command,
            Command::UpdateIndex {
                project: "/p".into(),
                nice: false
            }
        );
    }

    #[test]
    fn test_response_serialization() {
        let resp = ResponseFrame::new(
            9,
            Response::ok_with(ResponseData::Completions {
                items: vec![Completion {
                    name: "foo".into(),
                    kind: NodeKind::Method,
                }],
            }),
        );

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"type\":\"completions\""));

        let msgpack = rmp_serde::to_vec_named(&resp).unwrap();
        let decoded: ResponseFrame = rmp_serde::from_slice(&msgpack).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_error_response() {
        let resp = ResponseFrame::new(
            3,
            Response::error(ErrorCode::UnsupportedLanguage, "no scanner for COBOL"),
        );
        assert!(resp.response.is_error());

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("unsupported_language"));

        let msgpack = rmp_serde::to_vec_named(&resp).unwrap();
        let decoded: ResponseFrame = rmp_serde::from_slice(&msgpack).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_inline_commands_have_no_priority() {
        assert_eq!(Command::Ping.default_priority(), None);
        assert_eq!(Command::Cancel { target: 1 }.default_priority(), None);
        let scan = Command::Scan {
            path: "a.py".into(),
            content: None,
            language: None,
            project: None,
        };
        let completions = Command::GetCompletions {
            project: "/p".into(),
            language: "Python".into(),
            expr: String::new(),
            prefix: String::new(),
        };
        assert!(completions.default_priority() < scan.default_priority());
    }
}
