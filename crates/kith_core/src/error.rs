//! Error taxonomy shared across the workspace.
//!
//! Library crates return `KithError`; leaf call sites that only need to
//! annotate an underlying failure keep using `anyhow` and convert at the
//! boundary via the `Storage` variant.

#[derive(thiserror::Error, Debug)]
pub enum KithError {
    /// Input rejected before any oracle or storage work.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Extraction produced no actors and no interactions.
    #[error("extraction produced no entities")]
    ExtractionEmpty,

    /// The oracle returned an empty or whitespace-only completion.
    #[error("oracle returned an empty response during {0}")]
    OracleEmpty(String),

    /// The oracle returned text that could not be parsed into the
    /// expected shape, even after salvaging an embedded JSON object.
    #[error("oracle returned a malformed response: {0}")]
    OracleMalformed(String),

    /// A write would violate a uniqueness rule (canonical names, the
    /// single self profile).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A live simulation session has exhausted its turn budget.
    #[error("session reached the maximum of {0} turns")]
    MaxTurnsReached(usize),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KithError>;
