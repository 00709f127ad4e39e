use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::TypedVariable;

pub const TOTAL_ARGUMENTS_NAME: &str = "TotalArguments";

pub fn argument_name(index: usize) -> String {
    format!("Argument{}", index)
}

pub fn return_value_name(index: usize) -> String {
    format!("ReturnValue{}", index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineKind {
    Comment,
    Blank,
    End,
    Function,
    Goto,
    Call,
    Return,
    LeftBracket,
    RightBracket,
    ScriptIf,
    If,
    Label,
    Evaluate,
    WhileLoop,
    Break,
    Continue,
    Step,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLine {
    pub text: String,
    pub normalized: String,
    pub number: usize,
    pub kind: LineKind,
    pub arguments: Vec<TypedVariable>,
    pub output_variables: Vec<String>,
    pub step_name: Option<String>,
    pub breakpoint: bool,
}

impl ScriptLine {
    pub fn argument(&self, index: usize) -> Option<&TypedVariable> {
        self.arguments.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpan {
    pub start: usize,
    pub end: usize,
}

impl LoopSpan {
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptProgram {
    pub lines: Vec<ScriptLine>,
    pub functions: BTreeMap<String, FunctionSpan>,
    pub labels: BTreeMap<String, usize>,
    pub loops: BTreeMap<usize, LoopSpan>,
}

impl ScriptProgram {
    pub fn line(&self, index: usize) -> Option<&ScriptLine> {
        self.lines.get(index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Breakpoints are configured before the program is shared with engines;
    /// the executor itself never mutates lines.
    pub fn set_breakpoint(&mut self, line_number: usize, enabled: bool) -> bool {
        let Some(index) = line_number.checked_sub(1) else {
            return false;
        };
        match self.lines.get_mut(index) {
            Some(line) => {
                line.breakpoint = enabled;
                true
            }
            None => false,
        }
    }

    /// Index of the closing bracket matching the block opened immediately
    /// after the line at `header`. `None` when the scan runs off the end or
    /// meets a stray closing bracket first.
    pub fn block_skip(&self, header: usize) -> Option<usize> {
        block_skip(&self.lines, header + 1)
    }

    pub fn function_containing(&self, index: usize) -> Option<&FunctionSpan> {
        self.functions
            .values()
            .find(|span| span.start <= index && index <= span.end)
    }
}

pub fn block_skip(lines: &[ScriptLine], from: usize) -> Option<usize> {
    let mut level = 0usize;
    for (index, line) in lines.iter().enumerate().skip(from) {
        match line.kind {
            LineKind::LeftBracket => level += 1,
            LineKind::RightBracket => {
                if level <= 1 {
                    return if level == 1 { Some(index) } else { None };
                }
                level -= 1;
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileIssue {
    pub message: String,
    pub line: ScriptLine,
}

impl CompileIssue {
    pub fn new(message: impl Into<String>, line: &ScriptLine) -> Self {
        Self {
            message: message.into(),
            line: line.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptStatus {
    Ready,
    Running,
    AtBreakpoint,
    Paused,
    Finished,
    Error,
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::AtBreakpoint => "atBreakpoint",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    NotRun,
    Pass,
    Fail,
    Abort,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRun => "notRun",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Abort => "abort",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    Pass,
    Fail,
    Abort,
    Error,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Abort => "abort",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_name: String,
    pub description: String,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub line_number: usize,
    pub elapsed_ms: u64,
    pub total_elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub cell_id: u32,
    pub status: ScriptStatus,
    pub outcome: RunOutcome,
    pub results: Vec<StepResult>,
    pub error: Option<crate::error::StepLangError>,
    pub total_elapsed_ms: u64,
}

pub trait StepCatalog: Send + Sync {
    fn has_step(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct FixedCatalog {
    names: BTreeSet<String>,
}

impl FixedCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl StepCatalog for FixedCatalog {
    fn has_step(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}
