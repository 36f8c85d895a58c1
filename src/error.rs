// =============================================================================
// Error taxonomy — crate-wide fallible boundary
// =============================================================================
//
// Internal plumbing (config parsing, broker adapters, HTTP clients) returns
// `anyhow::Result` the way the rest of the engine does. At the Execution
// Supervisor boundary, failures are classified into one of the kinds below so
// the supervisor can decide whether to retry, degrade, or surface a
// SignalRejected/Error event. Strategies and analyzers never return an error
// at all — they return HOLD with a reason code, keeping the signal pipeline
// total (see the propagation policy notes below each call site).
// =============================================================================

use thiserror::Error;

/// Retcode-like classification carried by every broker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// Transient failure (busy, requote, timeout). Safe to retry once.
    Retryable,
    /// Broker rejected the request outright (bad stops, invalid symbol, etc).
    Rejected,
    SymbolInvalid,
    InsufficientMargin,
    SpreadBlocked,
    Disconnected,
}

impl BrokerErrorKind {
    /// Whether the supervisor should attempt a retry for this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable | Self::Disconnected)
    }
}

impl std::fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Retryable => "Retryable",
            Self::Rejected => "Rejected",
            Self::SymbolInvalid => "SymbolInvalid",
            Self::InsufficientMargin => "InsufficientMargin",
            Self::SpreadBlocked => "SpreadBlocked",
            Self::Disconnected => "Disconnected",
        };
        write!(f, "{s}")
    }
}

/// Top-level engine error, classified for the Execution Supervisor's
/// propagation policy.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("broker disconnected: {0}")]
    BrokerDisconnected(String),

    #[error("broker call failed (retryable, kind={kind}): {message}")]
    Broker {
        kind: BrokerErrorKind,
        message: String,
    },

    #[error("insufficient data: {0}")]
    DataInsufficient(String),

    #[error("news/calendar fetch failed: {0}")]
    NewsFetchFailed(String),

    #[error("notifier delivery failed: {0}")]
    NotifierFailed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn broker(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self::Broker {
            kind,
            message: message.into(),
        }
    }

    /// Whether the supervisor should retry the operation that produced this
    /// error within the same tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Broker { kind, .. } => kind.is_retryable(),
            Self::BrokerDisconnected(_) => true,
            _ => false,
        }
    }
}
