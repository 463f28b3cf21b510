use thiserror::Error;

/// Error taxonomy for all scs operations.
///
/// Every kind carries a message aimed at the operator; user-facing layers
/// print it to stderr and exit non-zero. Mutating operations must not
/// commit any state when returning an error.
#[derive(Debug, Error)]
pub enum ScsError {
    /// Invalid argument, malformed record, ambiguous lookup, or a missing
    /// required field. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// Key already exists, IP already assigned, or the repository lock is
    /// held by another user. Nothing was mutated.
    #[error("{0}")]
    Conflict(String),

    /// A referenced entity does not exist.
    #[error("{0}")]
    MissingReference(String),

    /// SSH/SCP/remote command failure or unreachable host.
    #[error("{0}")]
    Remote(String),

    /// Missing variable in strict mode, or a patch that does not apply.
    /// Fatal to a release compilation.
    #[error("{0}")]
    Template(String),

    /// An invariant was broken on load (e.g. a build parent cycle).
    #[error("{0}")]
    Integrity(String),

    /// The abort sentinel appeared; the running task must stop.
    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScsError>;

impl ScsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Self::MissingReference(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Process exit code for this kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Conflict(_) => 3,
            Self::MissingReference(_) => 4,
            Self::Remote(_) => 5,
            Self::Template(_) => 6,
            Self::Integrity(_) => 7,
            Self::Aborted(_) => 8,
            Self::Io(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_bare_message() {
        let err = ScsError::conflict("ip 10.0.0.5 is assigned to sys1");
        assert_eq!(err.to_string(), "ip 10.0.0.5 is assigned to sys1");
    }

    #[test]
    fn test_aborted_prefix() {
        let err = ScsError::aborted("sentinel present");
        assert_eq!(err.to_string(), "aborted: sentinel present");
    }

    #[test]
    fn test_exit_codes_nonzero() {
        let errs = [
            ScsError::validation("v"),
            ScsError::conflict("c"),
            ScsError::missing("m"),
            ScsError::remote("r"),
            ScsError::template("t"),
            ScsError::integrity("i"),
            ScsError::aborted("a"),
        ];
        for e in errs {
            assert!(e.exit_code() > 0);
        }
    }

    #[test]
    fn test_io_conversion() {
        fn read_missing() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/scs/path")?)
        }
        assert!(matches!(read_missing(), Err(ScsError::Io(_))));
    }
}
