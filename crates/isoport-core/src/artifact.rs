use std::path::PathBuf;

/// Where a backend finds the thing that actually does the inference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelArtifact {
    OnnxPath(PathBuf),
}
