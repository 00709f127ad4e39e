mod case;
mod runner;
mod source;

pub use case::{ExpectedStep, GlobalSeed, TestCase, CASE_SCHEMA_V1};
pub use runner::{run_case, run_case_dir, run_case_file, CaseReport};
pub use source::{find_case_files, read_case_script, read_test_case};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StToolError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse case {path}: {source}")]
    ParseCase {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid case schema version \"{found}\", expected \"{expected}\".")]
    InvalidSchemaVersion { expected: String, found: String },
    #[error("Case {path} names neither \"script\" nor \"source\".")]
    MissingScript { path: PathBuf },
    #[error("Case {path} names both \"script\" and \"source\"; pick one.")]
    AmbiguousScript { path: PathBuf },
    #[error("No .json case files under {path}.")]
    CasesEmpty { path: PathBuf },
    #[error("Case {path} does not compile: {details}")]
    Compile { path: PathBuf, details: String },
    #[error("Outcome mismatch: expected {expected}, got {actual}.")]
    OutcomeMismatch { expected: String, actual: String },
    #[error("Step count mismatch: expected {expected}, actual {actual}. observed={observed}")]
    StepCountMismatch {
        expected: usize,
        actual: usize,
        observed: String,
    },
    #[error("Step mismatch at index {index}. expected={expected} actual={actual}")]
    StepMismatch {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("Expected global \"{name}\" is absent after the run.")]
    GlobalMissing { name: String },
    #[error("Global \"{name}\" mismatch. expected={expected} actual={actual}")]
    GlobalMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("Failed to serialize result for diff: {0}")]
    ResultSerialize(serde_json::Error),
}
