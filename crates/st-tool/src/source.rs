use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{StToolError, TestCase, CASE_SCHEMA_V1};

pub fn read_test_case(case_path: &Path) -> Result<TestCase, StToolError> {
    let raw = fs::read_to_string(case_path).map_err(|source| StToolError::ReadFile {
        path: case_path.to_path_buf(),
        source,
    })?;
    let parsed: TestCase = serde_json::from_str(&raw).map_err(|source| StToolError::ParseCase {
        path: case_path.to_path_buf(),
        source,
    })?;

    if parsed.schema_version != CASE_SCHEMA_V1 {
        return Err(StToolError::InvalidSchemaVersion {
            expected: CASE_SCHEMA_V1.to_string(),
            found: parsed.schema_version,
        });
    }
    match (&parsed.script, &parsed.source) {
        (None, None) => {
            return Err(StToolError::MissingScript {
                path: case_path.to_path_buf(),
            })
        }
        (Some(_), Some(_)) => {
            return Err(StToolError::AmbiguousScript {
                path: case_path.to_path_buf(),
            })
        }
        _ => {}
    }

    Ok(parsed)
}

/// Script text for a case: inline source wins, otherwise the `script` path
/// is read relative to the case file's directory.
pub fn read_case_script(case: &TestCase, case_path: &Path) -> Result<String, StToolError> {
    if let Some(source) = &case.source {
        return Ok(source.clone());
    }
    let script = case.script.as_deref().ok_or_else(|| StToolError::MissingScript {
        path: case_path.to_path_buf(),
    })?;
    let base = case_path.parent().unwrap_or_else(|| Path::new("."));
    let script_path = base.join(script);
    fs::read_to_string(&script_path).map_err(|source| StToolError::ReadFile {
        path: script_path,
        source,
    })
}

/// Every `.json` file under the directory, in path order.
pub fn find_case_files(dir: &Path) -> Result<Vec<PathBuf>, StToolError> {
    let mut cases = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) == Some("json") {
            cases.push(entry.path().to_path_buf());
        }
    }
    cases.sort();
    if cases.is_empty() {
        return Err(StToolError::CasesEmpty {
            path: dir.to_path_buf(),
        });
    }
    Ok(cases)
}
