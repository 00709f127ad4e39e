use serde::{Deserialize, Serialize};

use st_core::{RunOutcome, ScalarValue, StepStatus};

pub const CASE_SCHEMA_V1: &str = "steplang.case.v1";

/// A recorded expectation against one script run: the script (inline source
/// or a path relative to the case file), seeded globals, the run options,
/// and what the trail and global tier must look like afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestCase {
    pub schema_version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub globals: Vec<GlobalSeed>,
    #[serde(default)]
    pub fail_step: Option<String>,
    #[serde(default)]
    pub continue_on_fail: bool,
    pub expected_outcome: RunOutcome,
    #[serde(default)]
    pub expected_steps: Vec<ExpectedStep>,
    #[serde(default)]
    pub expected_globals: Vec<GlobalSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GlobalSeed {
    pub name: String,
    pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExpectedStep {
    pub step: String,
    pub status: StepStatus,
    #[serde(default)]
    pub message_contains: Option<String>,
}
