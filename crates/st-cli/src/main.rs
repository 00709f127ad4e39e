use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use st_api::{
    compile_script, default_registry, parse_scalar_literal, run_concurrent, RunObserver,
    RunOutcome, RunReport, RunScriptOptions, ScalarValue, StepLangError, StepOutcome,
    StepRegistry, TypedVariable,
};
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "st-cli")]
#[command(about = "steplang compiler and runner CLI")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Compile scripts and report findings without running anything.
    Compile(CompileArgs),
    /// Run scripts, one concurrent cell per file.
    Run(RunArgs),
    /// Check recorded test cases against their expectations.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct CompileArgs {
    /// Script file to compile (repeatable).
    #[arg(long = "script", required = true)]
    scripts: Vec<String>,
    /// Admit an extra step name into the catalog (repeatable).
    #[arg(long = "step")]
    steps: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Script file; each one becomes a cell (repeatable).
    #[arg(long = "script")]
    scripts: Vec<String>,
    /// Run every .st file under this directory instead.
    #[arg(long = "dir")]
    dir: Option<String>,
    /// Seed a global before the run, as NAME=VALUE (repeatable).
    #[arg(long = "global")]
    globals: Vec<String>,
    /// Step to invoke when a step fails.
    #[arg(long = "fail-step")]
    fail_step: Option<String>,
    /// Keep running a cell after a step fails.
    #[arg(long = "continue-on-fail")]
    continue_on_fail: bool,
    /// Print EVENT: lines for observer notifications.
    #[arg(long = "trace")]
    trace: bool,
    /// Print the reports as JSON instead of line output.
    #[arg(long = "json")]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Case file to check (repeatable).
    #[arg(long = "case")]
    cases: Vec<String>,
    /// Check every .json case under this directory instead.
    #[arg(long = "dir")]
    dir: Option<String>,
}

struct TraceObserver;

impl RunObserver for TraceObserver {
    fn event(&self, name: &str, message: &str) {
        println!("EVENT:{}|{}", name, message);
    }
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, StepLangError> {
    match cli.command {
        Mode::Compile(args) => run_compile(args),
        Mode::Run(args) => run_run(args),
        Mode::Check(args) => run_check(args),
    }
}

fn run_compile(args: CompileArgs) -> Result<i32, StepLangError> {
    let registry = registry_with_extra_steps(&args.steps);
    let mut total_issues = 0usize;
    for script in &args.scripts {
        let source = read_file(Path::new(script))?;
        if let Err(issues) = compile_script(&source, registry.as_ref()) {
            for issue in &issues {
                println!("ISSUE:{}|{}|{}", script, issue.line.number, issue.message);
            }
            total_issues += issues.len();
        }
    }
    if total_issues == 0 {
        println!("COMPILE:OK");
        Ok(0)
    } else {
        Ok(1)
    }
}

fn run_run(args: RunArgs) -> Result<i32, StepLangError> {
    let scripts = collect_inputs(args.scripts, args.dir.as_deref(), "st")?;
    let mut sources = Vec::with_capacity(scripts.len());
    for script in &scripts {
        sources.push(read_file(script)?);
    }
    let mut options = RunScriptOptions::new(sources.remove(0), default_registry());
    options.sources.extend(sources);
    options.fail_step = args.fail_step;
    options.continue_on_fail = args.continue_on_fail;
    for seed in &args.globals {
        options.globals.push(parse_global_seed(seed)?);
    }
    if args.trace {
        options.observer = Some(Arc::new(TraceObserver));
    }
    let reports = run_concurrent(options)?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).map_err(|error| StepLangError::new(
                "CLI_REPORT_SERIALIZE",
                error.to_string()
            ))?
        );
    } else {
        for report in &reports {
            emit_report(report);
        }
    }

    let worst = reports
        .iter()
        .map(|report| report.outcome)
        .max_by_key(|outcome| outcome_rank(*outcome))
        .unwrap_or(RunOutcome::Pass);
    println!("SUMMARY:{}", worst.as_str());
    Ok(match worst {
        RunOutcome::Pass => 0,
        RunOutcome::Fail | RunOutcome::Abort => 1,
        RunOutcome::Error => 2,
    })
}

fn run_check(args: CheckArgs) -> Result<i32, StepLangError> {
    let cases = collect_inputs(args.cases, args.dir.as_deref(), "json")?;
    let registry = default_registry();
    let mut failures = 0usize;
    for case_path in &cases {
        match st_tool::run_case_file(case_path, Arc::clone(&registry)) {
            Ok(report) => println!("CASE:{}|pass", report.name),
            Err(error) => {
                failures += 1;
                println!("CASE:{}|fail", case_display_name(case_path));
                println!("DETAIL:{}", error);
            }
        }
    }
    if failures == 0 {
        Ok(0)
    } else {
        Ok(1)
    }
}

fn case_display_name(case_path: &Path) -> String {
    case_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| case_path.display().to_string())
}

fn emit_report(report: &RunReport) {
    for result in &report.results {
        println!(
            "STEP:{}|{}|{}|{}",
            result.line_number,
            result.step_name,
            result.status.as_str(),
            result.elapsed_ms
        );
        if let Some(message) = &result.error_message {
            println!("STEP_MSG:{}", message);
        }
    }
    if let Some(error) = &report.error {
        println!("CELL_ERROR:{}|{}", report.cell_id, error);
    }
    println!(
        "RESULT:{}|{}|{}",
        report.cell_id,
        report.outcome.as_str(),
        report.total_elapsed_ms
    );
}

fn outcome_rank(outcome: RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Pass => 0,
        RunOutcome::Fail => 1,
        RunOutcome::Abort => 2,
        RunOutcome::Error => 3,
    }
}

/// The builtin library plus pass-through placeholders for step names the
/// caller vouches for; lets scripts that use host-specific steps validate.
fn registry_with_extra_steps(extra: &[String]) -> Arc<StepRegistry> {
    let mut registry = StepRegistry::new();
    st_api::register_builtin_steps(&mut registry);
    for name in extra {
        registry.register_fn(name.clone(), "externally provided step", |_ctx| {
            StepOutcome::pass()
        });
    }
    Arc::new(registry)
}

/// `NAME=VALUE` with the value typed like a script literal; bare words fall
/// back to plain strings.
fn parse_global_seed(seed: &str) -> Result<TypedVariable, StepLangError> {
    let (name, raw) = seed.split_once('=').ok_or_else(|| {
        StepLangError::new(
            "CLI_GLOBAL_SYNTAX",
            format!("global seed '{}' is not NAME=VALUE", seed),
        )
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(StepLangError::new(
            "CLI_GLOBAL_SYNTAX",
            format!("global seed '{}' has an empty name", seed),
        ));
    }
    let value = parse_scalar_literal(raw.trim())
        .unwrap_or_else(|| ScalarValue::String(raw.trim().to_string()));
    Ok(TypedVariable::new(name, value))
}

fn collect_inputs(
    explicit: Vec<String>,
    dir: Option<&str>,
    extension: &str,
) -> Result<Vec<PathBuf>, StepLangError> {
    if let Some(dir) = dir {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|ext| ext.to_str()) == Some(extension)
            {
                found.push(entry.path().to_path_buf());
            }
        }
        found.sort();
        if found.is_empty() {
            return Err(StepLangError::new(
                "CLI_NO_INPUT",
                format!("no .{} files under {}", extension, dir),
            ));
        }
        return Ok(found);
    }
    if explicit.is_empty() {
        return Err(StepLangError::new(
            "CLI_NO_INPUT",
            "pass input files or --dir",
        ));
    }
    Ok(explicit.into_iter().map(PathBuf::from).collect())
}

fn read_file(path: &Path) -> Result<String, StepLangError> {
    fs::read_to_string(path).map_err(|error| {
        StepLangError::new(
            "CLI_READ_FILE",
            format!("failed to read {}: {}", path.display(), error),
        )
    })
}

fn emit_error(error: StepLangError) -> i32 {
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    2
}
