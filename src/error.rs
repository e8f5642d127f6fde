//! Common error types.
//!
//! See [`UpdateError`] and [`UpdateErrorKind`] for details.
use std::fmt::Display;

/// Boxed error returned by distributors and callbacks.
pub type BoxError = Box<dyn std::error::Error + 'static + Send + Sync>;

/// Main error type for this crate.
///
/// Errors reported to the error callback of an update cycle carry one of the
/// cycle error kinds so the application can tell at which step the cycle
/// stopped.
#[derive(Debug, thiserror::Error)]
pub struct UpdateError {
    kind: UpdateErrorKind,
    context: String,
    source: Option<BoxError>,
}

impl UpdateError {
    /// Creates a new error with the given error kind.
    pub fn new(kind: UpdateErrorKind) -> Self {
        Self {
            kind,
            context: String::new(),
            source: None,
        }
    }

    /// Adds a source error.
    pub fn with_source<S>(mut self, source: S) -> Self
    where
        S: std::error::Error + 'static + Send + Sync,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Adds an already boxed source error.
    pub fn with_boxed_source(mut self, source: BoxError) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a string with a contextual description of the error.
    pub fn with_context<C>(mut self, value: C) -> Self
    where
        C: AsRef<str>,
    {
        if !self.context.is_empty() {
            self.context.push_str(": ");
        }
        self.context.push_str(value.as_ref());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &UpdateErrorKind {
        &self.kind
    }

    /// Returns the contextual description.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Returns a copy of this error with a different kind.
    ///
    /// Used by the state machine to classify library errors by the step
    /// they occurred in. The original error becomes the source.
    pub(crate) fn reclassify(self, kind: UpdateErrorKind) -> Self {
        if self.kind == kind {
            self
        } else {
            Self::new(kind).with_source(self)
        }
    }

    /// Returns whether the error kind is [`UpdateErrorKind::Io`].
    pub fn is_io(&self) -> bool {
        self.as_io().is_some()
    }

    /// Returns a reference to the IO error when the kind is [`UpdateErrorKind::Io`].
    pub fn as_io(&self) -> Option<&std::io::Error> {
        if self.kind.is_io() {
            if let Some(source) = &self.source {
                if let Some(error) = source.downcast_ref() {
                    return Some(error);
                }
            }
        }
        None
    }
}

impl Display for UpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.context.is_empty() {
            f.write_str(&self.context)?;
            f.write_str(": ")?;
        }

        self.kind.fmt(f)?;

        Ok(())
    }
}

impl From<UpdateErrorKind> for UpdateError {
    fn from(value: UpdateErrorKind) -> Self {
        Self::new(value)
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(value: std::io::Error) -> Self {
        Self::new(UpdateErrorKind::Io).with_source(value)
    }
}

impl From<AdditionalContext> for UpdateError {
    fn from(value: AdditionalContext) -> Self {
        Self::new(UpdateErrorKind::Other).with_source(value)
    }
}

/// Error category for [`UpdateError`].
///
/// The first group of kinds are the steps of an update cycle. The remaining
/// kinds describe failures of individual library operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum UpdateErrorKind {
    /// The running installation does not look like a runtime image.
    ///
    /// No update is attempted.
    #[error("current installation is not a valid runtime image")]
    CurrentImageInvalid,

    /// The distributor failed to find the latest version.
    #[error("latest version check failed")]
    LatestVersionCheck,

    /// The distributor failed to download the archive.
    #[error("download failed")]
    Download,

    /// The acceptance callback failed or never made a decision.
    #[error("update verification failed")]
    VerifyUpdate,

    /// The archive could not be extracted into the staging directory.
    #[error("unpacking the update failed")]
    Unpack,

    /// The unpacked archive does not look like a runtime image.
    #[error("update is not a valid runtime image")]
    UpgradeImageInvalid,

    /// The archive could not be deleted after unpacking.
    ///
    /// The installer is still handed to the done callback.
    #[error("cannot remove update archive")]
    CannotRemoveArchive,

    /// Building the installer handle failed.
    #[error("cannot create installer")]
    CreateInstallDescriptor,

    /// The no-update callback failed.
    #[error("no-update callback failed")]
    NoUpdateCallback,

    /// The done callback failed.
    #[error("done callback failed")]
    DoneCallback,

    /// An install action was already performed with this installer.
    #[error("install action already performed")]
    AlreadyPerformed,

    /// Input/Output error usually from [`std::io::Error`].
    #[error("input/output error")]
    Io,

    /// Invalid input or argument type to a function.
    #[error("invalid input or argument")]
    InvalidInput,

    /// Unsupported OS family ("windows", "unix", etc.).
    #[error("unsupported OS family")]
    UnsupportedOsFamily,

    /// Environment variable was missing or malformed.
    #[error("invalid environment variable")]
    InvalidEnvironmentVariable,

    /// Any other error.
    #[error("other")]
    Other,
}

impl UpdateErrorKind {
    /// Returns whether it is the Io variant.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io)
    }
}

/// Contains a contextual description of an error.
///
/// This isn't a real error, but allows injecting context in the error stack.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct AdditionalContext {
    message: String,
    #[source]
    source: BoxError,
}

impl AdditionalContext {
    /// Creates a new context error with the given message and source error.
    pub fn new<E>(message: String, source: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self {
            message,
            source: Box::new(source),
        }
    }
}

/// Trait for wrapping errors in Result with descriptive context strings.
pub trait AddContext<T, E, A> {
    /// Map the error with an error containing the context string.
    fn with_context<C>(self, context: C) -> Result<T, A>
    where
        C: Into<String>;

    /// Map the error with an error containing the context string evaluated from a function.
    fn with_contextc<C, CT>(self, context: C) -> Result<T, A>
    where
        C: FnOnce(&E) -> CT,
        CT: Into<String>;
}

impl<T, E> AddContext<T, E, AdditionalContext> for Result<T, E>
where
    E: std::error::Error + Sync + Send + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T, AdditionalContext>
    where
        C: Into<String>,
    {
        self.map_err(|error| AdditionalContext::new(context.into(), error))
    }

    fn with_contextc<C, CT>(self, context: C) -> Result<T, AdditionalContext>
    where
        C: FnOnce(&E) -> CT,
        CT: Into<String>,
    {
        self.map_err(|error| AdditionalContext::new(context(&error).into(), error))
    }
}

/// Error used when a callback or distributor panicked.
#[derive(Debug, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self { message }
    }

    /// Returns the panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Formats the error and each of its sources on separate lines.
pub fn format_error<E>(error: &E) -> String
where
    E: std::error::Error + ?Sized,
{
    let mut buf = error.to_string();

    let mut current: Option<&dyn std::error::Error> = error.source();

    while let Some(source) = current {
        buf.push_str("\n↳");
        buf.push_str(&source.to_string());
        current = source.source();
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_context() {
        let error = UpdateError::new(UpdateErrorKind::Download)
            .with_context("version v2")
            .with_context("mirror 1");

        assert_eq!(error.to_string(), "version v2: mirror 1: download failed");
    }

    #[test]
    fn test_format_error_chain() {
        let io = std::io::Error::other("disk on fire");
        let error = UpdateError::from(io).reclassify(UpdateErrorKind::Unpack);

        let text = format_error(&error);
        assert_eq!(
            text,
            "unpacking the update failed\n↳input/output error\n↳disk on fire"
        );
    }

    #[test]
    fn test_reclassify_same_kind_keeps_error() {
        let error = UpdateError::new(UpdateErrorKind::Unpack).with_context("a");
        let error = error.reclassify(UpdateErrorKind::Unpack);

        assert_eq!(error.context(), "a");
        assert!(std::error::Error::source(&error).is_none());
    }

    #[test]
    fn test_as_io() {
        let error = UpdateError::from(std::io::Error::from(std::io::ErrorKind::NotFound));

        assert!(error.is_io());
        assert_eq!(
            error.as_io().map(|error| error.kind()),
            Some(std::io::ErrorKind::NotFound)
        );
    }

    #[test]
    fn test_panic_error_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(PanicError::from_payload(payload).message(), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(PanicError::from_payload(payload).message(), "bang");
    }
}
