use std::path::Path;
use std::sync::Arc;

use st_api::{compile_script, create_engine, CreateEngineOptions};
use st_core::{RunOutcome, StepResult, TypedVariable};
use st_runtime::StepRegistry;

use crate::source::{find_case_files, read_case_script, read_test_case};
use crate::{StToolError, TestCase};

#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    pub name: String,
    pub outcome: RunOutcome,
    pub results: Vec<StepResult>,
}

/// Runs a parsed case and checks every expectation it carries.
pub fn run_case(
    case: &TestCase,
    case_path: &Path,
    registry: Arc<StepRegistry>,
) -> Result<CaseReport, StToolError> {
    let script = read_case_script(case, case_path)?;
    let program = compile_script(&script, registry.as_ref()).map_err(|issues| {
        let details = issues
            .iter()
            .map(|issue| format!("line {}: {}", issue.line.number, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        StToolError::Compile {
            path: case_path.to_path_buf(),
            details,
        }
    })?;
    let mut options = CreateEngineOptions::new(Arc::new(program), registry);
    options.fail_step = case.fail_step.clone();
    options.continue_on_fail = case.continue_on_fail;
    for seed in &case.globals {
        options
            .globals
            .push(TypedVariable::new(seed.name.clone(), seed.value.clone()));
    }
    let mut engine = create_engine(options);
    let report = engine.run();

    if report.outcome != case.expected_outcome {
        return Err(StToolError::OutcomeMismatch {
            expected: case.expected_outcome.as_str().to_string(),
            actual: report.outcome.as_str().to_string(),
        });
    }

    if !case.expected_steps.is_empty() {
        if report.results.len() != case.expected_steps.len() {
            let observed = serde_json::to_string_pretty(&report.results)
                .map_err(StToolError::ResultSerialize)?;
            return Err(StToolError::StepCountMismatch {
                expected: case.expected_steps.len(),
                actual: report.results.len(),
                observed,
            });
        }
        for (index, (expected, actual)) in case
            .expected_steps
            .iter()
            .zip(report.results.iter())
            .enumerate()
        {
            let name_matches = expected.step == actual.step_name;
            let status_matches = expected.status == actual.status;
            let message_matches = match &expected.message_contains {
                Some(fragment) => actual
                    .error_message
                    .as_deref()
                    .is_some_and(|message| message.contains(fragment)),
                None => true,
            };
            if !(name_matches && status_matches && message_matches) {
                let expected =
                    serde_json::to_string(expected).map_err(StToolError::ResultSerialize)?;
                let actual =
                    serde_json::to_string(actual).map_err(StToolError::ResultSerialize)?;
                return Err(StToolError::StepMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
    }

    for expected in &case.expected_globals {
        let actual = engine
            .store()
            .get_global(&expected.name)
            .ok_or_else(|| StToolError::GlobalMissing {
                name: expected.name.clone(),
            })?;
        if actual.value != expected.value {
            let expected_json =
                serde_json::to_string(&expected.value).map_err(StToolError::ResultSerialize)?;
            let actual_json =
                serde_json::to_string(&actual.value).map_err(StToolError::ResultSerialize)?;
            return Err(StToolError::GlobalMismatch {
                name: expected.name.clone(),
                expected: expected_json,
                actual: actual_json,
            });
        }
    }

    Ok(CaseReport {
        name: case_name(case, case_path),
        outcome: report.outcome,
        results: report.results,
    })
}

/// Parses, runs, and checks a single case file.
pub fn run_case_file(
    case_path: &Path,
    registry: Arc<StepRegistry>,
) -> Result<CaseReport, StToolError> {
    let case = read_test_case(case_path)?;
    run_case(&case, case_path, registry)
}

/// Checks every case file under a directory. Failures do not stop the
/// sweep; each file gets its own verdict.
pub fn run_case_dir(
    dir: &Path,
    registry: Arc<StepRegistry>,
) -> Result<Vec<(std::path::PathBuf, Result<CaseReport, StToolError>)>, StToolError> {
    let mut verdicts = Vec::new();
    for case_path in find_case_files(dir)? {
        let verdict = run_case_file(&case_path, Arc::clone(&registry));
        verdicts.push((case_path, verdict));
    }
    Ok(verdicts)
}

fn case_name(case: &TestCase, case_path: &Path) -> String {
    if let Some(name) = &case.name {
        return name.clone();
    }
    case_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| case_path.display().to_string())
}
