//! Error types and result definitions for index operations.
//!
//! [`IndexError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, the originating error, and the call site that raised it. Several errors can
//! be aggregated into one, which is how per-column failures of a partition-wide rebuild are
//! reported.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for fallible index operations.
pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error returned by the index engine and its collaborators.
///
/// Use [`crate::index_error!`] to build one and [`crate::bail!`] to return one early.
#[derive(Debug, Clone)]
pub struct IndexError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<IndexError>,
        location: &'static Location<'static>,
    },
}

/// Classification of index failures.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A create or delete request that does not name a usable column, or invalid settings.
    ConfigurationError,
    /// The targeted partition or column has no index.
    NoIndex,
    /// A compound query without criteria, or without any criterion on an indexed column.
    BadQuery,
    /// The request targets a partition that is never indexed.
    PartitionExcluded,

    // Failures reported by the underlying store while scanning a partition.
    SourcePartitionBusy,
    SourceNotServing,
    SourceIoError,

    /// An operation was invoked on objects in a state that does not allow it.
    InvalidState,
    IoError,
    Unknown,
}

impl ErrorKind {
    /// Returns true for failures raised by the store's scan during a rebuild.
    pub fn is_source_scan_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::SourcePartitionBusy | ErrorKind::SourceNotServing | ErrorKind::SourceIoError
        )
    }
}

impl IndexError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.description.as_ref(),
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("no inner errors"),
        }
    }

    /// Returns the dynamic detail if one was attached.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns true if this error, or any aggregated error, came from a failed source scan.
    pub fn is_source_scan_error(&self) -> bool {
        self.kinds().iter().any(ErrorKind::is_source_scan_error)
    }

    /// Returns the number of single errors contained in this error.
    pub fn len(&self) -> usize {
        match self.repr {
            ErrorRepr::Single(_) => 1,
            ErrorRepr::Many { ref errors, .. } => errors.iter().map(IndexError::len).sum(),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        IndexError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for IndexError {
    fn eq(&self, other: &IndexError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                let rendered_backtrace = payload.backtrace.to_string();
                if !rendered_backtrace.trim().is_empty() {
                    write!(f, "\n  Backtrace:")?;
                    for line in rendered_backtrace.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for IndexError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for IndexError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> IndexError {
        IndexError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for IndexError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> IndexError {
        IndexError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates several errors. A single error is returned as is.
impl<E> From<Vec<E>> for IndexError
where
    E: Into<IndexError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> IndexError {
        let location = Location::caller();
        let mut errors: Vec<IndexError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.remove(0);
        }

        IndexError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for IndexError {
    #[track_caller]
    fn from(err: std::io::Error) -> IndexError {
        let detail = err.to_string();
        IndexError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
