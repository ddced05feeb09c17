use thiserror::Error;

/// Errors surfaced by the market core. Invariant violations in the bid
/// algebra are programming errors and propagate to the caller; telemetry
/// failures are recovered locally and never reach this type's callers
/// inside the simulation loop (see `telemetry::TelemetrySink`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("invalid bid: {0}")]
    InvalidBid(String),

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),

    #[error("telemetry write failed: {0}")]
    Telemetry(String),
}

pub type MarketResult<T> = Result<T, MarketError>;
