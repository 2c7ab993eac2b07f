//! src/error.rs
//! Error taxonomy shared by every pipeline stage.

use std::io;
use std::path::PathBuf;

/// Everything that can stop a packaging run.
///
/// Components only construct and propagate these; the orchestrator is the
/// single place that reports them and runs cleanup.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Missing or invalid project configuration. Raised before any filesystem mutation.
    #[error("{0}")]
    Configuration(String),

    /// The operator refused to overwrite an existing staging directory.
    #[error("{} already exists and was left untouched", .0.display())]
    Declined(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("could not extract {}: {reason}", archive.display())]
    Extract { archive: PathBuf, reason: String },

    #[error("could not download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("could not start {}: {source}", tool.display())]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The builder ran but exited non-zero. A build result, not a crash.
    #[error("{tool} exited with status {code}")]
    BuildFailure { tool: String, code: i32 },

    /// The builder exited 0 without producing the image.
    #[error("{tool} reported success but {} was not created", image.display())]
    MissingImage { tool: String, image: PathBuf },
}

impl PackError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PackError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn extract(archive: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PackError::Extract {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    pub fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        PackError::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Short marker printed next to the error so configuration mistakes are
    /// distinguishable from tool failures.
    pub fn kind(&self) -> &'static str {
        match self {
            PackError::Configuration(_) => "config",
            PackError::Declined(_) => "declined",
            PackError::Io { .. } => "io",
            PackError::Extract { .. } => "extract",
            PackError::Download { .. } => "download",
            PackError::Spawn { .. } => "spawn",
            PackError::BuildFailure { .. } | PackError::MissingImage { .. } => "build",
        }
    }

    /// Process exit status for this error. Never zero.
    pub fn exit_code(&self) -> u8 {
        match self {
            PackError::BuildFailure { code, .. } => {
                u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1)
            }
            _ => 1,
        }
    }
}

/// Attaches a human-readable context to `io::Result`s.
pub trait IoContext<T> {
    fn io_context<F, S>(self, context: F) -> Result<T, PackError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, context: F) -> Result<T, PackError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| PackError::io(context(), e))
    }
}
