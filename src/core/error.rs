use thiserror::Error;

/// Failure kinds surfaced by the state engine.
///
/// None of them is retried internally; the message always names the offending
/// values or shapes so the caller can diagnose without peeking at internals.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QError {
    #[error("Initialization Error: {0}")]
    Initialization(String),
    #[error("Dimension Error: {0}")]
    Dimension(String),
    #[error("Illegal Operation: {0}")]
    IllegalOperation(String),
    #[error("Not Allowed: {0}")]
    NotAllowed(String),
    #[error("Incomprehensible State: {0}")]
    Incomprehensible(String),
}

pub type Result<T> = std::result::Result<T, QError>;

impl QError {
    pub fn init(message: impl Into<String>) -> Self { QError::Initialization(message.into()) }
    pub fn dimension(message: impl Into<String>) -> Self { QError::Dimension(message.into()) }
    pub fn illegal(message: impl Into<String>) -> Self { QError::IllegalOperation(message.into()) }
    pub fn not_allowed(message: impl Into<String>) -> Self { QError::NotAllowed(message.into()) }
    pub fn incomprehensible(message: impl Into<String>) -> Self { QError::Incomprehensible(message.into()) }

    /// Initialization failure caused by `cause`; renders as `"<context>, raised by <cause>"`.
    pub fn init_caused_by(context: &str, cause: QError) -> Self {
        QError::Initialization(format!("{context}, raised by {cause}"))
    }

    /// The error raised by every cheat-gated operation while cheating is disabled.
    pub fn cheating() -> Self { QError::not_allowed("Cheating is not allowed!") }

    pub fn is_not_allowed(&self) -> bool { matches!(self, QError::NotAllowed(_)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test] fn test_initialization_error() {
        let err = QError::init("Matrix not unitary");
        assert_eq!(format!("{}", err), "Initialization Error: Matrix not unitary");
    }
    #[test] fn test_dimension_error() {
        let err = QError::dimension("expected 4 got 2");
        assert_eq!(format!("{}", err), "Dimension Error: expected 4 got 2");
    }
    #[test] fn test_illegal_operation_error() {
        let err = QError::illegal("This state is in entanglement");
        assert_eq!(format!("{}", err), "Illegal Operation: This state is in entanglement");
    }
    #[test] fn test_not_allowed_error() {
        let err = QError::cheating();
        assert!(err.is_not_allowed());
        assert_eq!(format!("{}", err), "Not Allowed: Cheating is not allowed!");
    }
    #[test] fn test_caused_by_chain() {
        let err = QError::init_caused_by("Error to initialize Qbit", QError::illegal("norm 2"));
        assert_eq!(
            format!("{}", err),
            "Initialization Error: Error to initialize Qbit, raised by Illegal Operation: norm 2"
        );
    }
}
