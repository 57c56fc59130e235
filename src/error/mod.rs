use thiserror::Error;

/// Fatal startup failures. Everything past startup resolves per-connection
/// (close with reason, targeted error reply, or silent drop) and never
/// surfaces as a process error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated unexpectedly: {0}")]
    Serve(#[source] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Why an upgrade on an unrecognized path is being refused. The string form
/// goes into the close frame the client sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidPathFormat,
    InvalidAction,
}

impl RejectReason {
    /// Classify a path that matched no route. Two segments with a bad verb
    /// is an action problem; every other shape is a path-format problem.
    pub fn classify(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [action, _room] if *action != "publish" && *action != "subscribe" => {
                RejectReason::InvalidAction
            }
            _ => RejectReason::InvalidPathFormat,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidPathFormat => "Invalid path format",
            RejectReason::InvalidAction => "Invalid action",
        }
    }
}
