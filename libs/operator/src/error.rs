/// All errors possible to occur during reconciliation of any of the three
/// Storm custom resources, plus the ambient failures (telemetry init,
/// JAR extraction, checksum validation) that surface through the same
/// reconcile loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate.
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    /// Error in user input or CR definition: missing namespace, conflicting
    /// JAR sources, an unparseable reference. Maps to the `Validation`
    /// error class: surfaced in `conditions`, never retried until the spec
    /// changes.
    #[error("invalid spec: {0}")]
    UserInputError(String),

    /// A permanent failure: the topology phase transitions to `Failed` and
    /// the message is copied into `status.lastError`.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// A referenced object (cluster, topology, Job) could not be found when
    /// expected to exist already.
    #[error("referenced object not found: {0}")]
    NotFound(String),

    /// Wraps the Storm API client's own typed taxonomy so reconcilers can
    /// still branch on `is_transient()`/`is_permanent()` after the `?`
    /// conversion.
    #[error("storm api error: {source}")]
    StormApi {
        #[from]
        source: storm_client::StormApiError,
    },

    #[error("json (de)serialization error: {source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },

    #[error("json patch error: {source}")]
    JsonPatch {
        #[from]
        source: json_patch::PatchError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("reconcile exceeded its wall-clock ceiling")]
    ReconcileTimeout,

    /// Not a failure: an external precondition (cluster readiness, a
    /// pending kill) hasn't converged yet. Always transient; exists so a
    /// `finalizer::Event::Cleanup` handler can signal "not done yet"
    /// without the finalizer being stripped early (the `finalizer`
    /// combinator only removes it once `Cleanup` returns `Ok`).
    #[error("waiting on external state to converge: {0}")]
    Pending(String),

    #[error("invalid trace id")]
    InvalidTraceId,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Low-cardinality label for `storm_controller_reconciliation_errors_total`.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError { .. } => "kube",
            Error::UserInputError(_) => "validation",
            Error::Permanent(_) => "permanent",
            Error::NotFound(_) => "not_found",
            Error::StormApi { source } => source.metric_label(),
            Error::SerdeJson { .. } => "serde",
            Error::JsonPatch { .. } => "patch",
            Error::Io { .. } => "io",
            Error::ReconcileTimeout => "timeout",
            Error::InvalidTraceId => "invalid_trace_id",
            Error::Pending(_) => "pending",
        }
    }

    /// True for errors the reconciler should requeue with exponential
    /// backoff rather than surface as a terminal `Failed` phase.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::KubeError { source } => matches!(
                source,
                kube::Error::Api(e) if e.code == 409 || e.code >= 500
            ),
            Error::StormApi { source } => source.is_transient() || source.is_auth(),
            Error::ReconcileTimeout => true,
            Error::Pending(_) => true,
            _ => false,
        }
    }
}
