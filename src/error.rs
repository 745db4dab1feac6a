use std::{borrow::Cow, fmt::Display};

pub type Result<T> = ::std::result::Result<T, Error>;

/// The five kinds of failure the cross-partition ORDER BY stage can surface.
///
/// `MalformedContinuation` and `InternalInvariant` are bugs or bad input and must not be
/// retried. `Cancelled` leaves the last-issued continuation token resumable. `PartitionGone`
/// is handled internally by the merge engine's split protocol and should never actually
/// reach a caller. `TransientFetch` is surfaced only once the paginator has exhausted its
/// own retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A continuation token failed to parse, or a resumed cursor's RID didn't match the
    /// token's database/collection.
    MalformedContinuation,

    /// The document container reported that a partition key range is gone (HTTP 410,
    /// partition-key-range-gone). Handled internally by the split protocol; never surfaced.
    PartitionGone,

    /// A retryable fetch failure surfaced after the paginator exhausted its own retries.
    TransientFetch,

    /// A cancellation signal was observed while a fetch was suspended.
    Cancelled,

    /// An invariant of the merge engine was violated: sort-key arity mismatch, a target
    /// range missing from the active range set, a disjoint-range violation, and so on.
    /// Indicates a bug, not bad input.
    InternalInvariant,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ErrorKind::MalformedContinuation => write!(f, "malformed continuation token"),
            ErrorKind::PartitionGone => write!(f, "partition key range is gone"),
            ErrorKind::TransientFetch => write!(f, "transient fetch failure"),
            ErrorKind::Cancelled => write!(f, "operation was cancelled"),
            ErrorKind::InternalInvariant => write!(f, "internal invariant violated"),
        }
    }
}

impl ErrorKind {
    pub fn with_source(self, source: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::from(self).with_source(source)
    }

    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::from(self).with_message(message)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    message: Option<Cow<'static, str>>,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            message: None,
        }
    }
}

impl Error {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn into_source(self) -> Option<Box<dyn std::error::Error + Send + Sync>> {
        self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}"),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(&**source)
    }
}
