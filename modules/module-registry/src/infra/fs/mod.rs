mod store;

pub use store::{ArtifactStore, RUNTIME_SUBDIR};
