use rhai::{Dynamic, Engine, ImmutableString, FLOAT, INT};

use st_core::{ScalarValue, StepLangError};
use st_lexer::{escape_into_quoted, tokenize, TokenKind, TokenizerOptions};

/// Renders a stored value as literal expression text the evaluator can
/// re-read with the same type: strings re-quoted and re-escaped, booleans
/// lowercase, whole-valued floats with a trailing `.0`.
pub fn render_scalar_literal(value: &ScalarValue) -> Result<String, StepLangError> {
    match value {
        ScalarValue::String(text) => Ok(escape_into_quoted(text)),
        ScalarValue::Integer(number) => Ok(number.to_string()),
        ScalarValue::Float(number) => Ok(if number.fract() == 0.0 && number.is_finite() {
            format!("{:.1}", number)
        } else {
            number.to_string()
        }),
        ScalarValue::Boolean(flag) => Ok(flag.to_string()),
        ScalarValue::VariableRef(name) => Err(StepLangError::new(
            "EVAL_UNRESOLVED_REF",
            format!("variable '{}' holds an unresolved reference", name),
        )),
    }
}

/// Rewrites expression text by replacing every `$name` token with the
/// literal rendering of its current local value; all other tokens pass
/// through verbatim.
pub fn substitute_variables(
    store: &crate::VariableStore,
    text: &str,
) -> Result<String, StepLangError> {
    let options = TokenizerOptions {
        emit_whitespace: true,
        ..TokenizerOptions::default()
    };
    let mut rewritten = String::with_capacity(text.len());
    for token in tokenize(text, options) {
        if token.kind != TokenKind::VariableName {
            rewritten.push_str(&token.text);
            continue;
        }
        let name = token.text.trim_start_matches('$');
        let variable = store.get(name).ok_or_else(|| {
            StepLangError::new(
                "EVAL_VARIABLE_MISSING",
                format!("variable '{}' is not defined", name),
            )
        })?;
        rewritten.push_str(&render_scalar_literal(&variable.value)?);
    }
    Ok(rewritten)
}

/// Substitutes variables, hands the text to a fresh strict evaluator, and
/// probes the result back into a scalar. String results keep their type
/// even when the content looks numeric.
pub fn evaluate_expression(
    store: &crate::VariableStore,
    text: &str,
) -> Result<ScalarValue, StepLangError> {
    let rewritten = substitute_variables(store, text)?;
    let mut engine = Engine::new();
    engine.set_strict_variables(true);
    let value = engine
        .eval::<Dynamic>(&format!("({})", rewritten))
        .map_err(|error| {
            StepLangError::new(
                "EVAL_EXPRESSION",
                format!("expression '{}' failed: {}", text, error),
            )
        })?;
    scalar_from_dynamic(value)
}

pub fn evaluate_boolean(store: &crate::VariableStore, text: &str) -> Result<bool, StepLangError> {
    match evaluate_expression(store, text)? {
        ScalarValue::Boolean(flag) => Ok(flag),
        other => Err(StepLangError::new(
            "EVAL_BOOLEAN_EXPECTED",
            format!(
                "condition '{}' evaluated to {} instead of boolean",
                text,
                other.type_name()
            ),
        )),
    }
}

/// Probe order: boolean, integer, float, string.
fn scalar_from_dynamic(value: Dynamic) -> Result<ScalarValue, StepLangError> {
    if value.is::<bool>() {
        return Ok(ScalarValue::Boolean(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(ScalarValue::Integer(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        return Ok(ScalarValue::Float(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(ScalarValue::String(
            value.cast::<ImmutableString>().to_string(),
        ));
    }
    Err(StepLangError::new(
        "EVAL_VALUE_UNSUPPORTED",
        format!("expression produced an unsupported {} value", value.type_name()),
    ))
}
