//! Error types and result definitions for bulk loading operations.
//!
//! Provides a kind-classified error system with captured callsite metadata. The
//! [`BulkError`] type carries a static description, optional dynamic detail and an
//! optional source error, and is cheap to clone so that a single worker failure can
//! be surfaced to any number of producers.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for bulk loading operations using [`BulkError`] as the error type.
pub type BulkResult<T> = Result<T, BulkError>;

/// Main error type for bulk loading operations.
///
/// [`BulkError`] classifies failures by [`ErrorKind`] and records where they were
/// raised. The stored source error is shared behind an [`Arc`], which keeps the
/// type [`Clone`] even when the underlying error is not.
#[derive(Debug, Clone)]
pub struct BulkError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Specific categories of errors that can occur while driving the pipeline.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The database connection could not be opened or was lost.
    ConnectionFailed,
    /// Beginning, writing to or ending a copy stream failed.
    CopyFailed,
    /// The batched delete statement failed.
    DeleteFailed,
    /// A producer-facing call was made after the pipeline finished cleanly.
    PipelineClosed,
    /// The protocol state machine was driven out of order.
    InvalidState,
    /// The worker task panicked.
    WorkerPanic,
}

impl BulkError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`BulkError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        BulkError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
        }
    }
}

impl PartialEq for BulkError {
    /// Compares errors by [`ErrorKind`] only, which is what callers match on.
    fn eq(&self, other: &BulkError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let location = self.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, "\n  Detail: {detail}")?;
        }

        Ok(())
    }
}

impl error::Error for BulkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`BulkError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for BulkError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> BulkError {
        BulkError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`BulkError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for BulkError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> BulkError {
        BulkError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}
