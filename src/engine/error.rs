use crate::model::Ts;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(String),
    AlreadyExists(String),
    InvalidSpan { since: Ts, until: Ts },
    InvalidEmail(String),
    LimitExceeded(&'static str),
    /// The store holds something the booking rules forbid. A defect, not an outcome.
    InvariantViolation(String),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::InvalidSpan { since, until } => {
                write!(f, "invalid span: {since} is after {until}")
            }
            EngineError::InvalidEmail(email) => write!(f, "email not accepted: {email}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::InvariantViolation(msg) => write!(f, "invariant violated: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(key) => EngineError::AlreadyExists(key),
            StoreError::Journal(e) => EngineError::Storage(e),
        }
    }
}
