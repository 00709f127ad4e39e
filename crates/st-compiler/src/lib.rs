use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use st_core::{
    argument_name, block_skip, CompileIssue, FunctionSpan, LineKind, LoopSpan, ScalarValue,
    ScriptLine, ScriptProgram, StepCatalog, TypedVariable,
};
use st_lexer::{
    mask_quoted, split_arguments, split_assignment, strip_comment, tokenize, unescape_quoted, Token,
    TokenKind, TokenizerOptions,
};

fn function_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*\)$")
            .expect("function header regex must compile")
    })
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Label\s+([A-Za-z_][A-Za-z0-9_]*):$").expect("label regex must compile")
    })
}

fn goto_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^goto\s+([A-Za-z_][A-Za-z0-9_]*)\s*;?$").expect("goto regex must compile")
    })
}

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^call\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(.*\)\s*;?$")
            .expect("call regex must compile")
    })
}

fn output_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$[A-Za-z_][A-Za-z0-9_]*$").expect("output name regex must compile")
    })
}

/// Literal priority: quoted string, integer, float, boolean, `$`-reference.
pub fn parse_scalar_literal(text: &str) -> Option<ScalarValue> {
    let trimmed = text.trim();
    if trimmed.starts_with('"') {
        return unescape_quoted(trimmed).map(ScalarValue::String);
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(ScalarValue::Integer(value));
    }
    let numeric_start = trimmed
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.');
    if numeric_start {
        if let Ok(value) = trimmed.parse::<f64>() {
            return Some(ScalarValue::Float(value));
        }
    }
    match trimmed {
        "true" => return Some(ScalarValue::Boolean(true)),
        "false" => return Some(ScalarValue::Boolean(false)),
        _ => {}
    }
    if let Some(name) = trimmed.strip_prefix('$') {
        if !name.is_empty() && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Some(ScalarValue::VariableRef(name.to_string()));
        }
    }
    None
}

struct AnalyzedLine {
    line: ScriptLine,
    problems: Vec<String>,
}

/// Classifies one source line. The first matching predicate wins; the order
/// of the probes is part of the language contract.
pub fn classify_line(text: &str, number: usize, catalog: &dyn StepCatalog) -> ScriptLine {
    analyze_line(text, number, catalog).line
}

fn analyze_line(text: &str, number: usize, catalog: &dyn StepCatalog) -> AnalyzedLine {
    let mut line = ScriptLine {
        text: text.to_string(),
        normalized: strip_comment(text).trim().to_string(),
        number,
        kind: LineKind::Unknown,
        arguments: Vec::new(),
        output_variables: Vec::new(),
        step_name: None,
        breakpoint: false,
    };
    let mut problems = Vec::new();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        line.kind = LineKind::Blank;
        return AnalyzedLine { line, problems };
    }
    if trimmed.starts_with("//") {
        line.kind = LineKind::Comment;
        return AnalyzedLine { line, problems };
    }

    let normalized = line.normalized.clone();
    let masked = mask_quoted(&normalized);

    if normalized.starts_with("End") {
        line.kind = LineKind::End;
        return AnalyzedLine { line, problems };
    }
    if normalized.starts_with("return") {
        line.kind = LineKind::Return;
        return AnalyzedLine { line, problems };
    }
    if normalized.starts_with("break") {
        line.kind = LineKind::Break;
        return AnalyzedLine { line, problems };
    }
    if normalized.starts_with("continue") {
        line.kind = LineKind::Continue;
        return AnalyzedLine { line, problems };
    }

    if let Some(shape) = step_shape(&normalized, catalog) {
        line.kind = LineKind::Step;
        line.step_name = Some(shape.name);
        line.output_variables = shape.outputs;
        bind_arguments(&shape.argument_text, &mut line, &mut problems);
        return AnalyzedLine { line, problems };
    }

    if let Some(captures) = function_header_regex().captures(&normalized) {
        line.kind = LineKind::Function;
        bind_structural_name(&mut line, &captures[1]);
        return AnalyzedLine { line, problems };
    }
    if let Some(captures) = label_regex().captures(&normalized) {
        line.kind = LineKind::Label;
        bind_structural_name(&mut line, &captures[1]);
        return AnalyzedLine { line, problems };
    }
    if normalized.starts_with("goto ") {
        line.kind = LineKind::Goto;
        if let Some(captures) = goto_regex().captures(&normalized) {
            bind_structural_name(&mut line, &captures[1]);
        }
        return AnalyzedLine { line, problems };
    }
    if normalized.starts_with("call ") {
        line.kind = LineKind::Call;
        if let Some(captures) = call_regex().captures(&normalized) {
            bind_structural_name(&mut line, &captures[1]);
        }
        return AnalyzedLine { line, problems };
    }
    if normalized == "}" {
        line.kind = LineKind::RightBracket;
        return AnalyzedLine { line, problems };
    }
    if normalized == "{" {
        line.kind = LineKind::LeftBracket;
        return AnalyzedLine { line, problems };
    }

    if normalized.starts_with("ScriptIf(") {
        line.kind = LineKind::ScriptIf;
        match parenthesized_text(&normalized) {
            Some(inner) => bind_arguments(&inner, &mut line, &mut problems),
            None => problems.push("ScriptIf line is missing its argument list".to_string()),
        }
        return AnalyzedLine { line, problems };
    }
    if let Some(condition) = conditional_shape("if", &normalized, &masked) {
        line.kind = LineKind::If;
        bind_structural_name(&mut line, &condition);
        return AnalyzedLine { line, problems };
    }
    if let Some(condition) = conditional_shape("while", &normalized, &masked) {
        line.kind = LineKind::WhileLoop;
        bind_structural_name(&mut line, &condition);
        return AnalyzedLine { line, problems };
    }

    if evaluate_shape(&normalized, &mut line) {
        return AnalyzedLine { line, problems };
    }

    line.kind = LineKind::Unknown;
    AnalyzedLine { line, problems }
}

/// Structural lines carry their parsed text (target name, condition,
/// right-hand expression) as `Argument0`.
fn bind_structural_name(line: &mut ScriptLine, value: &str) {
    line.arguments.push(TypedVariable::new(
        argument_name(0),
        ScalarValue::String(value.to_string()),
    ));
}

fn bind_arguments(argument_text: &str, line: &mut ScriptLine, problems: &mut Vec<String>) {
    for (index, piece) in split_arguments(argument_text).iter().enumerate() {
        match parse_scalar_literal(piece) {
            Some(value) => line
                .arguments
                .push(TypedVariable::new(argument_name(index), value)),
            None => problems.push(format!(
                "argument {} is not a literal or variable reference: '{}'",
                index, piece
            )),
        }
    }
}

struct StepShape {
    name: String,
    argument_text: String,
    outputs: Vec<String>,
}

fn token_is_symbol(token: &Token, text: &str) -> bool {
    token.kind == TokenKind::Symbol && token.text == text
}

fn shape_tokens(normalized: &str) -> Vec<Token> {
    let options = TokenizerOptions {
        emit_whitespace: true,
        ..TokenizerOptions::default()
    };
    tokenize(normalized, options)
}

/// `[$out[, $out…] =] Name(args…)[;]` with `Name` present in the catalog.
/// Quoted bodies are opaque to the shape because they are single tokens.
fn step_shape(normalized: &str, catalog: &dyn StepCatalog) -> Option<StepShape> {
    let tokens = shape_tokens(normalized);
    let significant: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| token.kind != TokenKind::Whitespace)
        .map(|(index, _)| index)
        .collect();
    if significant.is_empty() {
        return None;
    }

    let mut upper = significant.len();
    if token_is_symbol(&tokens[significant[upper - 1]], ";") {
        upper -= 1;
    }
    if upper < 3 {
        return None;
    }
    let close_raw = significant[upper - 1];
    if !token_is_symbol(&tokens[close_raw], ")") {
        return None;
    }

    let mut cursor = 0usize;
    let mut outputs = Vec::new();
    if tokens[significant[0]].kind == TokenKind::VariableName {
        let mut probe = 0usize;
        loop {
            let token = &tokens[significant[probe]];
            if token.kind != TokenKind::VariableName {
                return None;
            }
            outputs.push(token.text.trim_start_matches('$').to_string());
            probe += 1;
            if probe >= upper {
                return None;
            }
            if token_is_symbol(&tokens[significant[probe]], ",") {
                probe += 1;
                if probe >= upper {
                    return None;
                }
                continue;
            }
            if token_is_symbol(&tokens[significant[probe]], "=") {
                probe += 1;
                break;
            }
            return None;
        }
        if probe + 2 >= upper {
            return None;
        }
        cursor = probe;
    }

    let name_token = &tokens[significant[cursor]];
    if name_token.kind != TokenKind::Word {
        return None;
    }
    let open_raw = significant[cursor + 1];
    if !token_is_symbol(&tokens[open_raw], "(") || open_raw >= close_raw {
        return None;
    }
    if !catalog.has_step(&name_token.text) {
        return None;
    }

    let argument_text: String = tokens[open_raw + 1..close_raw]
        .iter()
        .map(|token| token.text.as_str())
        .collect();
    Some(StepShape {
        name: name_token.text.clone(),
        argument_text,
        outputs,
    })
}

/// Text between the first `(` and the last `)`, quoted bodies opaque.
fn parenthesized_text(normalized: &str) -> Option<String> {
    let tokens = shape_tokens(normalized);
    let open = tokens.iter().position(|token| token_is_symbol(token, "("))?;
    let close = tokens
        .iter()
        .rposition(|token| token_is_symbol(token, ")"))?;
    if close <= open {
        return None;
    }
    Some(
        tokens[open + 1..close]
            .iter()
            .map(|token| token.text.as_str())
            .collect(),
    )
}

fn conditional_shape(keyword: &str, normalized: &str, masked: &str) -> Option<String> {
    if !normalized.starts_with(keyword) {
        return None;
    }
    if masked.contains(';') || !masked.contains('(') || !normalized.ends_with(')') {
        return None;
    }
    parenthesized_text(normalized)
}

fn evaluate_shape(normalized: &str, line: &mut ScriptLine) -> bool {
    let Some((lhs, rhs)) = split_assignment(normalized) else {
        return false;
    };
    if !normalized.ends_with(';') {
        return false;
    }
    if !lhs.starts_with('$') {
        return false;
    }
    let pieces = split_arguments(&lhs);
    if pieces.is_empty()
        || pieces
            .iter()
            .any(|piece| !output_name_regex().is_match(piece))
    {
        return false;
    }

    let expression = rhs.strip_suffix(';').unwrap_or(&rhs).trim().to_string();

    line.kind = LineKind::Evaluate;
    line.output_variables = pieces
        .iter()
        .map(|piece| piece.trim_start_matches('$').to_string())
        .collect();
    bind_structural_name(line, &expression);
    true
}

/// Classifies every line, runs the eight structural checks accumulating all
/// failures, then assembles the program index.
pub fn compile(source: &str, catalog: &dyn StepCatalog) -> Result<ScriptProgram, Vec<CompileIssue>> {
    let mut lines = Vec::new();
    let mut issues = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let analyzed = analyze_line(raw, index + 1, catalog);
        for message in &analyzed.problems {
            issues.push(CompileIssue::new(message.clone(), &analyzed.line));
        }
        lines.push(analyzed.line);
    }

    check_known_kinds(&lines, &mut issues);
    let function_names = check_duplicate_functions(&lines, &mut issues);
    let label_names = check_duplicate_labels(&lines, &mut issues);
    check_conditional_openers(&lines, &mut issues);
    check_function_openers(&lines, &mut issues);
    check_bracket_balance(&lines, &mut issues);
    check_call_targets(&lines, &function_names, &mut issues);
    check_goto_targets(&lines, &label_names, &mut issues);
    if !issues.is_empty() {
        return Err(issues);
    }

    let functions = resolve_function_spans(&lines, &mut issues);
    let loops = resolve_loop_spans(&lines, &mut issues);
    if !issues.is_empty() {
        return Err(issues);
    }

    let labels = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.kind == LineKind::Label)
        .filter_map(|(index, line)| structural_name(line).map(|name| (name.to_string(), index)))
        .collect();

    Ok(ScriptProgram {
        lines,
        functions,
        labels,
        loops,
    })
}

fn structural_name(line: &ScriptLine) -> Option<&str> {
    line.arguments.first().and_then(|entry| entry.value.as_str())
}

fn check_known_kinds(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) {
    for line in lines {
        if line.kind == LineKind::Unknown {
            issues.push(CompileIssue::new(
                format!("line cannot be classified: '{}'", line.normalized),
                line,
            ));
        }
    }
}

fn check_duplicate_functions(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for line in lines {
        if line.kind != LineKind::Function {
            continue;
        }
        let Some(name) = structural_name(line) else {
            continue;
        };
        if !names.insert(name.to_string()) {
            issues.push(CompileIssue::new(
                format!("duplicate function name '{}'", name),
                line,
            ));
        }
    }
    names
}

fn check_duplicate_labels(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for line in lines {
        if line.kind != LineKind::Label {
            continue;
        }
        let Some(name) = structural_name(line) else {
            continue;
        };
        if !names.insert(name.to_string()) {
            issues.push(CompileIssue::new(
                format!("duplicate label '{}'", name),
                line,
            ));
        }
    }
    names
}

fn check_conditional_openers(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) {
    for (index, line) in lines.iter().enumerate() {
        if !matches!(line.kind, LineKind::If | LineKind::WhileLoop) {
            continue;
        }
        let follower = lines.get(index + 1).map(|next| next.kind);
        if follower != Some(LineKind::LeftBracket) {
            issues.push(CompileIssue::new(
                "conditional must be immediately followed by an opening bracket",
                line,
            ));
        }
    }
}

fn check_function_openers(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) {
    for (index, line) in lines.iter().enumerate() {
        if line.kind != LineKind::Function {
            continue;
        }
        let follower = lines.get(index + 1).map(|next| next.kind);
        if follower != Some(LineKind::LeftBracket) {
            issues.push(CompileIssue::new(
                "function body must open with a bracket on the next line",
                line,
            ));
        }
    }
}

fn check_bracket_balance(lines: &[ScriptLine], issues: &mut Vec<CompileIssue>) {
    let mut level = 0usize;
    for line in lines {
        match line.kind {
            LineKind::LeftBracket => level += 1,
            LineKind::RightBracket => {
                if level == 0 {
                    issues.push(CompileIssue::new(
                        "closing bracket without a matching opener",
                        line,
                    ));
                } else {
                    level -= 1;
                }
            }
            _ => {}
        }
    }
    if level > 0 {
        if let Some(last) = lines.last() {
            issues.push(CompileIssue::new(
                format!("script ends with {} unclosed brackets", level),
                last,
            ));
        }
    }
}

fn check_call_targets(
    lines: &[ScriptLine],
    functions: &BTreeSet<String>,
    issues: &mut Vec<CompileIssue>,
) {
    for line in lines {
        if line.kind != LineKind::Call {
            continue;
        }
        match structural_name(line) {
            None => issues.push(CompileIssue::new("call line is missing a function name", line)),
            Some(name) if !functions.contains(name) => issues.push(CompileIssue::new(
                format!("call target '{}' is not a defined function", name),
                line,
            )),
            Some(_) => {}
        }
    }
}

fn check_goto_targets(
    lines: &[ScriptLine],
    labels: &BTreeSet<String>,
    issues: &mut Vec<CompileIssue>,
) {
    for line in lines {
        if line.kind != LineKind::Goto {
            continue;
        }
        match structural_name(line) {
            None => issues.push(CompileIssue::new("goto line is missing a label name", line)),
            Some(name) if !labels.contains(name) => issues.push(CompileIssue::new(
                format!("goto target '{}' is not a defined label", name),
                line,
            )),
            Some(_) => {}
        }
    }
}

fn resolve_function_spans(
    lines: &[ScriptLine],
    issues: &mut Vec<CompileIssue>,
) -> BTreeMap<String, FunctionSpan> {
    let mut functions = BTreeMap::new();
    for (index, line) in lines.iter().enumerate() {
        if line.kind != LineKind::Function {
            continue;
        }
        let Some(name) = structural_name(line) else {
            continue;
        };
        match block_skip(lines, index + 1) {
            Some(end) => {
                functions.insert(
                    name.to_string(),
                    FunctionSpan {
                        name: name.to_string(),
                        start: index,
                        end,
                    },
                );
            }
            None => issues.push(CompileIssue::new("function body is never closed", line)),
        }
    }
    functions
}

fn resolve_loop_spans(
    lines: &[ScriptLine],
    issues: &mut Vec<CompileIssue>,
) -> BTreeMap<usize, LoopSpan> {
    let mut loops = BTreeMap::new();
    for (index, line) in lines.iter().enumerate() {
        if line.kind != LineKind::WhileLoop {
            continue;
        }
        match block_skip(lines, index + 1) {
            Some(end) => {
                loops.insert(index, LoopSpan { start: index, end });
            }
            None => issues.push(CompileIssue::new("while block is never closed", line)),
        }
    }
    loops
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::FixedCatalog;

    fn catalog() -> FixedCatalog {
        FixedCatalog::new(["Echo", "Wait", "ReadTemp", "EnterCritical", "LeaveCritical"])
    }

    fn classify(text: &str) -> ScriptLine {
        classify_line(text, 1, &catalog())
    }

    fn compile_source(source: &str) -> Result<ScriptProgram, Vec<CompileIssue>> {
        compile(source, &catalog())
    }

    fn messages(issues: &[CompileIssue]) -> Vec<String> {
        issues.iter().map(|issue| issue.message.clone()).collect()
    }

    #[test]
    fn classifies_each_line_shape() {
        let cases = [
            ("", LineKind::Blank),
            ("   ", LineKind::Blank),
            ("// note", LineKind::Comment),
            ("End", LineKind::End),
            ("return;", LineKind::Return),
            ("break;", LineKind::Break),
            ("continue;", LineKind::Continue),
            ("Echo(\"hi\");", LineKind::Step),
            ("function Setup()", LineKind::Function),
            ("Label Top:", LineKind::Label),
            ("goto Top;", LineKind::Goto),
            ("call Setup();", LineKind::Call),
            ("}", LineKind::RightBracket),
            ("{", LineKind::LeftBracket),
            ("ScriptIf($ok, \"GOTO\", \"Top\", \"\");", LineKind::ScriptIf),
            ("if ($x > 1)", LineKind::If),
            ("while ($x < 3)", LineKind::WhileLoop),
            ("$x = 1 + 2;", LineKind::Evaluate),
            ("garbage here", LineKind::Unknown),
        ];
        for (text, expected) in cases {
            assert_eq!(classify(text).kind, expected, "text: {:?}", text);
        }
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "$r = ReadTemp(2, $probe);";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn quoted_equals_does_not_make_a_step_an_evaluate() {
        let line = classify("Echo(\"a=b\");");
        assert_eq!(line.kind, LineKind::Step);
        assert_eq!(line.step_name.as_deref(), Some("Echo"));
    }

    #[test]
    fn unregistered_call_with_assignment_falls_to_evaluate() {
        let line = classify("$x = Nope(1);");
        assert_eq!(line.kind, LineKind::Evaluate);
        assert_eq!(line.output_variables, vec!["x".to_string()]);
    }

    #[test]
    fn comment_suffix_is_stripped_before_classification() {
        let line = classify("goto Top; // loop again");
        assert_eq!(line.kind, LineKind::Goto);
        assert_eq!(line.arguments[0].value.as_str(), Some("Top"));
    }

    #[test]
    fn step_outputs_and_arguments_are_bound_at_compile_time() {
        let line = classify("$temp, $ok = ReadTemp(2, 3.5, true, \"probe A\", $unit);");
        assert_eq!(line.kind, LineKind::Step);
        assert_eq!(line.step_name.as_deref(), Some("ReadTemp"));
        assert_eq!(
            line.output_variables,
            vec!["temp".to_string(), "ok".to_string()]
        );
        let values: Vec<&ScalarValue> = line.arguments.iter().map(|arg| &arg.value).collect();
        assert_eq!(values[0], &ScalarValue::Integer(2));
        assert_eq!(values[1], &ScalarValue::Float(3.5));
        assert_eq!(values[2], &ScalarValue::Boolean(true));
        assert_eq!(values[3], &ScalarValue::String("probe A".to_string()));
        assert_eq!(values[4], &ScalarValue::VariableRef("unit".to_string()));
        assert_eq!(line.arguments[0].name, "Argument0");
        assert_eq!(line.arguments[4].name, "Argument4");
    }

    #[test]
    fn conditional_condition_text_is_stored() {
        let line = classify("if ($count < 3 && $name == \"x\")");
        assert_eq!(line.kind, LineKind::If);
        assert_eq!(
            line.arguments[0].value.as_str(),
            Some("$count < 3 && $name == \"x\"")
        );
    }

    #[test]
    fn evaluate_stores_expression_without_terminator() {
        let line = classify("$total = $total + 1;");
        assert_eq!(line.kind, LineKind::Evaluate);
        assert_eq!(line.arguments[0].value.as_str(), Some("$total + 1"));
        assert_eq!(line.output_variables, vec!["total".to_string()]);
    }

    #[test]
    fn comparison_only_line_is_not_an_evaluate() {
        assert_eq!(classify("$x == 3;").kind, LineKind::Unknown);
    }

    #[test]
    fn assignment_splits_before_a_comparison_in_the_expression() {
        let line = classify("$flag = $mode == \"fast\";");
        assert_eq!(line.kind, LineKind::Evaluate);
        assert_eq!(line.output_variables, vec!["flag".to_string()]);
        assert_eq!(line.arguments[0].value.as_str(), Some("$mode == \"fast\""));
    }

    #[test]
    fn script_if_binds_four_arguments() {
        let line = classify("ScriptIf($ok, \"CALL\", \"Setup\", \"Recover\");");
        assert_eq!(line.kind, LineKind::ScriptIf);
        assert_eq!(line.arguments.len(), 4);
        assert_eq!(
            line.arguments[0].value,
            ScalarValue::VariableRef("ok".to_string())
        );
        assert_eq!(
            line.arguments[1].value,
            ScalarValue::String("CALL".to_string())
        );
    }

    #[test]
    fn parse_scalar_literal_priority() {
        assert_eq!(
            parse_scalar_literal("\"5\""),
            Some(ScalarValue::String("5".to_string()))
        );
        assert_eq!(parse_scalar_literal("5"), Some(ScalarValue::Integer(5)));
        assert_eq!(parse_scalar_literal("-5"), Some(ScalarValue::Integer(-5)));
        assert_eq!(parse_scalar_literal("5.25"), Some(ScalarValue::Float(5.25)));
        assert_eq!(parse_scalar_literal("true"), Some(ScalarValue::Boolean(true)));
        assert_eq!(
            parse_scalar_literal("$probe"),
            Some(ScalarValue::VariableRef("probe".to_string()))
        );
        assert_eq!(parse_scalar_literal("bare"), None);
        assert_eq!(parse_scalar_literal("inf"), None);
    }

    #[test]
    fn bare_word_argument_is_a_compile_issue() {
        let issues = compile_source("Echo(probe);\nEnd\n").expect_err("bad argument");
        assert!(messages(&issues)
            .iter()
            .any(|message| message.contains("argument 0")));
    }

    #[test]
    fn unknown_line_is_reported_with_its_text() {
        let issues = compile_source("what is this\nEnd\n").expect_err("unknown line");
        assert!(messages(&issues)
            .iter()
            .any(|message| message.contains("what is this")));
    }

    #[test]
    fn duplicate_function_and_label_are_reported() {
        let source = "function A()\n{\n}\nfunction A()\n{\n}\nLabel T:\nLabel T:\ngoto T;\nEnd\n";
        let issues = compile_source(source).expect_err("duplicates");
        let texts = messages(&issues);
        assert!(texts.iter().any(|m| m.contains("duplicate function name 'A'")));
        assert!(texts.iter().any(|m| m.contains("duplicate label 'T'")));
    }

    #[test]
    fn conditional_without_bracket_is_reported() {
        let source = "if ($x > 1)\nEcho(\"x\");\nEnd\n";
        let issues = compile_source(source).expect_err("missing bracket");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("immediately followed by an opening bracket")));
    }

    #[test]
    fn function_without_bracket_is_reported() {
        let source = "function F()\nreturn;\nEnd\n";
        let issues = compile_source(source).expect_err("missing bracket");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("function body must open with a bracket")));
    }

    #[test]
    fn stray_closing_bracket_is_reported_not_panicked() {
        let source = "}\nEnd\n";
        let issues = compile_source(source).expect_err("stray bracket");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("closing bracket without a matching opener")));
    }

    #[test]
    fn unclosed_bracket_at_end_is_reported() {
        let source = "if (true)\n{\nEcho(\"x\");\nEnd\n";
        let issues = compile_source(source).expect_err("unclosed");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("unclosed bracket")));
    }

    #[test]
    fn unresolved_goto_names_the_target() {
        let issues = compile_source("goto Nowhere;\nEnd\n").expect_err("bad goto");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("'Nowhere'")));
    }

    #[test]
    fn unresolved_call_names_the_target() {
        let issues = compile_source("call Missing();\nEnd\n").expect_err("bad call");
        assert!(messages(&issues)
            .iter()
            .any(|m| m.contains("'Missing'")));
    }

    #[test]
    fn all_issues_are_accumulated_in_one_pass() {
        let source = "goto Nowhere;\ncall Missing();\njunk\nEnd\n";
        let issues = compile_source(source).expect_err("many issues");
        assert!(issues.len() >= 3);
    }

    #[test]
    fn successful_compile_builds_all_indexes() {
        let source = "\
// demo
$count = 0;
while ($count < 3)
{
    $count = $count + 1;
}
call Work();
goto Finish;
Label Finish:
End

function Work()
{
    Echo(\"working\");
    return;
}
";
        let program = compile_source(source).expect("compiles");
        assert_eq!(program.lines[0].kind, LineKind::Comment);

        let work = program.functions.get("Work").expect("function span");
        assert_eq!(program.lines[work.start].kind, LineKind::Function);
        assert_eq!(program.lines[work.end].kind, LineKind::RightBracket);
        assert_eq!(work.start, 11);
        assert_eq!(work.end, 15);

        let loop_span = program.loops.get(&2).expect("loop span");
        assert_eq!(loop_span.end, 5);

        assert_eq!(program.labels.get("Finish"), Some(&8));
    }

    #[test]
    fn block_skip_matches_outer_bracket_over_nested_blocks() {
        let source = "\
if (true)
{
    if (false)
    {
        Echo(\"inner\");
    }
    Echo(\"outer\");
}
End
";
        let program = compile_source(source).expect("compiles");
        assert_eq!(program.block_skip(0), Some(7));
        assert_eq!(program.block_skip(2), Some(5));
    }

    #[test]
    fn empty_script_compiles_to_empty_program() {
        let program = compile_source("").expect("empty compiles");
        assert!(program.is_empty());
    }

    #[test]
    fn goto_resolution_is_case_sensitive() {
        let issues = compile_source("goto top;\nLabel Top:\nEnd\n").expect_err("case mismatch");
        assert!(messages(&issues).iter().any(|m| m.contains("'top'")));
    }
}
