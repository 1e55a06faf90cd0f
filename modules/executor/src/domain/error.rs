use std::io;

/// Platform-side execution fault.
///
/// These are the failures the retry policy acts on; a module's own non-zero
/// exit code is reported through [`super::model::ExecResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("input/output marshalling failed: {0}")]
    Marshal(#[from] serde_json::Error),
}
