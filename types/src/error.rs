use displaydoc::Display;

/// Failure taxonomy of the event-flow engine.
///
/// Fan-out callers never bubble a single adapter failure up through this type;
/// per-adapter results are aggregated into [`AdapterOutcome`](crate::response::AdapterOutcome)
/// rows and only the all-failed case becomes an error.
#[derive(Debug, Display)]
pub enum EngineError {
    /// invalid request: {0}
    Validation(String),
    /// dataLocation carries no usable `hl` query parameter
    MissingGlobalId,
    /// adapter `{0}` is unavailable: {1}
    AdapterUnavailable(String, String),
    /// adapter `{0}` rejected the request: {1}
    AdapterRejected(String, String),
    /// cache unavailable: {0}
    CacheUnavailable(String),
    /// every configured adapter failed the operation
    AllAdaptersFailed,
    /// consumer webhook delivery failed: {0}
    ConsumerWebhookFailed(String),
    /// internal error: {0}
    Internal(String),
}

impl std::error::Error for EngineError {}
