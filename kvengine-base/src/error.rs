// Error plumbing for the whole engine. We want:
// 1. A way to create a new error with a backtrace.
// 2. A discriminated kind so callers can match without parsing messages.
// 3. A place to log errors as they cross from a library back into us.

use std::borrow::Cow;
use std::fmt;

use backtrace_error::DynBacktraceError;
use tracing::error;

/// The discriminated error kinds used across the engine.
/// `AllocFail` and `IntegrityViolation` are fatal by policy;
/// callers of this crate should treat any other kind as a normal result to
/// handle, not a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AllocFail,
    WrongType,
    NotFound,
    EncodingOverflow,
    DuplicateKey,
    IntegrityViolation,
    OutOfRange,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::AllocFail => "alloc-fail",
            ErrorKind::WrongType => "wrong-type",
            ErrorKind::NotFound => "not-found",
            ErrorKind::EncodingOverflow => "encoding-overflow",
            ErrorKind::DuplicateKey => "duplicate-key",
            ErrorKind::IntegrityViolation => "integrity-violation",
            ErrorKind::OutOfRange => "out-of-range",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        error!(target: "kvengine", kind = %kind, "{:?}", err);
        Error {
            kind,
            inner: DynBacktraceError::from(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::AllocFail | ErrorKind::IntegrityViolation)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.inner)
    }
}
impl std::error::Error for Error {}

/// Build an `Other`-kind error from a message.
pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Other, SimpleErr(msg.into()))
}

/// Build an error of a specific kind from a message.
pub fn err_kind(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_error_kind_roundtrips() {
        let e = err_kind(ErrorKind::WrongType, "wrong type for key");
        assert_eq!(e.kind(), ErrorKind::WrongType);
        assert!(!e.is_fatal());
        let e = err_kind(ErrorKind::IntegrityViolation, "corrupt ziplist");
        assert!(e.is_fatal());
    }

    #[test]
    fn test_plain_err() {
        let e = err("plain message");
        assert_eq!(e.kind(), ErrorKind::Other);
    }
}
