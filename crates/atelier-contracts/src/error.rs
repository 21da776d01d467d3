use std::path::PathBuf;

/// Failure taxonomy for generation, edit, and decomposition requests.
///
/// A poll that times out is not represented here: an empty artifact list is
/// a valid outcome the caller turns into a user-visible message.
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error("could not decode image {name}: {reason}")]
    Decode { name: String, reason: String },

    #[error("image file not found: {0}")]
    NotFound(String),

    #[error("image file not found: {0}")]
    SourceNotFound(String),

    #[error("failed to generate any images: {0}")]
    Generation(String),

    #[error("generated {succeeded} of {requested} composite(s)")]
    PartialFailure {
        produced: Vec<String>,
        succeeded: usize,
        requested: usize,
    },

    #[error("failed to edit image: {0}")]
    Edit(String),

    #[error(
        "no image available to edit. Please provide image_filename or generate an image first."
    )]
    NoTarget,

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StudioError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// True when the caller can fix the request by naming a different image.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::SourceNotFound(_) | Self::NoTarget
        )
    }
}
