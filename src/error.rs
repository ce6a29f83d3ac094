//! Planning errors: problems found before any job runs.

use crate::file::FileType;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no input files")]
    NoInputs,
    #[error("{0}: unknown input file type")]
    UnknownInputType(String),
    #[error("{0}: no such file or directory")]
    MissingInput(String),
    #[error("{0}: input file given more than once")]
    DuplicateInput(String),
    #[error("unable to find {tool} for {purpose} (searched {searched})")]
    MissingTool {
        tool: String,
        purpose: &'static str,
        searched: String,
    },
    #[error("unsupported target {0:?}")]
    UnsupportedTarget(String),
    #[error("bad target triple {0:?}")]
    BadTriple(String),
    #[error("output file map {path}: {msg}")]
    OutputFileMap { path: String, msg: String },
    #[error("{0}")]
    InvalidOption(String),
    #[error("{path}: {file_type} input cannot be used here")]
    UnexpectedInput { path: String, file_type: FileType },
}
