use thiserror::Error;

/// Typed error taxonomy for every Storm REST call. Reconcilers branch on
/// the `is_*` predicates rather than matching variants directly, so a new
/// permanent-failure subclass can be added here without touching call sites.
#[derive(Error, Debug)]
pub enum StormApiError {
    #[error("storm resource not found: {0}")]
    NotFound(String),

    #[error("failed to reach storm endpoint: {0}")]
    Connection(String),

    #[error("storm authentication rejected (status {0})")]
    Auth(u16),

    #[error("storm endpoint reported a transient failure (status {status}): {body}")]
    Transient { status: u16, body: String },

    #[error("storm endpoint reported a permanent failure (status {status}): {body}")]
    Permanent { status: u16, body: String },

    #[error("failed to decode storm response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StormApiError>;

impl StormApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StormApiError::NotFound(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, StormApiError::Connection(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, StormApiError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StormApiError::Transient { .. })
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, StormApiError::Permanent { .. })
    }

    /// Low-cardinality label used for the `storm_controller_reconciliation_errors_total` metric.
    pub fn metric_label(&self) -> &'static str {
        match self {
            StormApiError::NotFound(_) => "not_found",
            StormApiError::Connection(_) => "connection",
            StormApiError::Auth(_) => "auth",
            StormApiError::Transient { .. } => "transient",
            StormApiError::Permanent { .. } => "permanent",
            StormApiError::Decode(_) => "decode",
        }
    }

    /// Maps an HTTP status + body into the taxonomy. `not_found_predicate` lets
    /// callers recognize Storm's own "no such topology" 500-with-body
    /// convention in addition to a bare 404.
    pub(crate) fn from_response(status: reqwest::StatusCode, body: String, is_not_found: bool) -> Self {
        if is_not_found || status == reqwest::StatusCode::NOT_FOUND {
            return StormApiError::NotFound(body);
        }
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                StormApiError::Auth(status.as_u16())
            }
            s if s.is_server_error() || s.as_u16() == 429 => StormApiError::Transient {
                status: status.as_u16(),
                body,
            },
            s if s.is_client_error() => StormApiError::Permanent {
                status: status.as_u16(),
                body,
            },
            _ => StormApiError::Transient {
                status: status.as_u16(),
                body,
            },
        }
    }
}

impl From<reqwest::Error> for StormApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            StormApiError::Connection(e.to_string())
        } else {
            StormApiError::Connection(e.to_string())
        }
    }
}
