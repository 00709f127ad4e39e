pub const DEFAULT_SYMBOLS: &str = "+-*/%=<>!&|(),;:.{}[]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Number,
    QuotedString,
    VariableName,
    Symbol,
    Whitespace,
    Eol,
    Unknown,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct TokenizerOptions {
    pub symbols: String,
    pub emit_whitespace: bool,
}

impl Default for TokenizerOptions {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.to_string(),
            emit_whitespace: false,
        }
    }
}

/// Total scanner: every input produces a token stream ending in `Eof`,
/// unrecognized characters come back as `Unknown` tokens.
pub struct Tokenizer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    options: TokenizerOptions,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self::with_options(source, TokenizerOptions::default())
    }

    pub fn with_options(source: &'a str, options: TokenizerOptions) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            options,
            finished: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut rest = self.source[self.pos..].chars();
        rest.next();
        rest.next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn token(&self, kind: TokenKind, start: usize, line: usize) -> Token {
        Token {
            kind,
            text: self.source[start..self.pos].to_string(),
            line,
        }
    }

    pub fn next_token(&mut self) -> Token {
        loop {
            let start = self.pos;
            let line = self.line;
            let Some(ch) = self.peek() else {
                self.finished = true;
                return Token {
                    kind: TokenKind::Eof,
                    text: String::new(),
                    line,
                };
            };

            if ch == '\n' {
                self.bump();
                self.line += 1;
                return self.token(TokenKind::Eol, start, line);
            }
            if ch == ' ' || ch == '\t' || ch == '\r' {
                while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
                    self.bump();
                }
                if self.options.emit_whitespace {
                    return self.token(TokenKind::Whitespace, start, line);
                }
                continue;
            }
            if ch == '"' {
                return self.scan_quoted(start, line);
            }
            if ch == '$' {
                if self.peek_second().is_some_and(is_word_char) {
                    self.bump();
                    while self.peek().is_some_and(is_word_char) {
                        self.bump();
                    }
                    return self.token(TokenKind::VariableName, start, line);
                }
                self.bump();
                return self.token(TokenKind::Unknown, start, line);
            }
            if ch.is_ascii_alphabetic() || ch == '_' {
                while self.peek().is_some_and(is_word_char) {
                    self.bump();
                }
                return self.token(TokenKind::Word, start, line);
            }
            if ch.is_ascii_digit() {
                return self.scan_number(start, line);
            }
            if self.options.symbols.contains(ch) {
                self.bump();
                return self.token(TokenKind::Symbol, start, line);
            }
            self.bump();
            return self.token(TokenKind::Unknown, start, line);
        }
    }

    fn scan_number(&mut self, start: usize, line: usize) -> Token {
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_second().is_some_and(|ch| ch.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                self.bump();
            }
        }
        self.token(TokenKind::Number, start, line)
    }

    fn scan_quoted(&mut self, start: usize, line: usize) -> Token {
        self.bump();
        loop {
            match self.bump() {
                None => return self.token(TokenKind::Unknown, start, line),
                Some('\\') => {
                    self.bump();
                }
                Some('\n') => self.line += 1,
                Some('"') => return self.token(TokenKind::QuotedString, start, line),
                Some(_) => {}
            }
        }
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Collects the whole stream, `Eof` excluded.
pub fn tokenize(source: &str, options: TokenizerOptions) -> Vec<Token> {
    let mut tokenizer = Tokenizer::with_options(source, options);
    let mut tokens = Vec::new();
    loop {
        let token = tokenizer.next_token();
        if token.kind == TokenKind::Eof {
            return tokens;
        }
        tokens.push(token);
    }
}

/// Replaces the contents of every quoted segment with spaces (one per
/// character, quote marks kept) so structural probes ignore string bodies.
/// Char count is preserved, which keeps char indexes aligned with the input.
pub fn mask_quoted(text: &str) -> String {
    let mut masked = String::with_capacity(text.len());
    let mut in_quote = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_quote {
            if escaped {
                escaped = false;
                masked.push(' ');
            } else if ch == '\\' {
                escaped = true;
                masked.push(' ');
            } else if ch == '"' {
                in_quote = false;
                masked.push('"');
            } else {
                masked.push(' ');
            }
        } else if ch == '"' {
            in_quote = true;
            masked.push('"');
        } else {
            masked.push(ch);
        }
    }
    masked
}

/// Cuts a `//` comment when the marker sits outside quotes.
pub fn strip_comment(text: &str) -> &str {
    let mut in_quote = false;
    let mut escaped = false;
    let mut previous_slash: Option<usize> = None;
    for (index, ch) in text.char_indices() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quote = false;
            }
            previous_slash = None;
            continue;
        }
        match ch {
            '"' => {
                in_quote = true;
                previous_slash = None;
            }
            '/' => {
                if let Some(slash_index) = previous_slash {
                    return &text[..slash_index];
                }
                previous_slash = Some(index);
            }
            _ => previous_slash = None,
        }
    }
    text
}

/// Splits on top-level commas; commas inside quotes are not split points.
/// Each piece is trimmed. Empty input yields no pieces.
pub fn split_arguments(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_quote = false;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '"' => {
                in_quote = true;
                current.push(ch);
            }
            ',' => {
                pieces.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    pieces.push(current.trim().to_string());
    pieces
}

/// Decodes a double-quoted lexeme. `None` when the text is not a complete
/// quoted literal.
pub fn unescape_quoted(lexeme: &str) -> Option<String> {
    let inner = lexeme.strip_prefix('"')?.strip_suffix('"')?;
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            value.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('t') => value.push('\t'),
            Some('r') => value.push('\r'),
            Some('\\') => value.push('\\'),
            Some('"') => value.push('"'),
            Some(other) => {
                value.push('\\');
                value.push(other);
            }
            None => value.push('\\'),
        }
    }
    Some(value)
}

/// Char index of the assignment `=` sitting outside quotes, skipping the
/// comparison operators `==`, `!=`, `<=`, `>=`.
pub fn find_assignment(text: &str) -> Option<usize> {
    let chars: Vec<char> = mask_quoted(text).chars().collect();
    for (index, ch) in chars.iter().enumerate() {
        if *ch != '=' {
            continue;
        }
        if chars.get(index + 1) == Some(&'=') {
            continue;
        }
        if index > 0 && matches!(chars[index - 1], '=' | '!' | '<' | '>') {
            continue;
        }
        return Some(index);
    }
    None
}

/// Splits `lhs = rhs` at the assignment `=`, both sides trimmed.
pub fn split_assignment(text: &str) -> Option<(String, String)> {
    let index = find_assignment(text)?;
    let chars: Vec<char> = text.chars().collect();
    let lhs: String = chars[..index].iter().collect();
    let rhs: String = chars[index + 1..].iter().collect();
    Some((lhs.trim().to_string(), rhs.trim().to_string()))
}

pub fn escape_into_quoted(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, TokenizerOptions::default())
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn scans_words_numbers_and_symbols() {
        let tokens = tokenize("count + 12 * 3.5", TokenizerOptions::default());
        let texts: Vec<&str> = tokens.iter().map(|token| token.text.as_str()).collect();
        assert_eq!(texts, vec!["count", "+", "12", "*", "3.5"]);
        assert_eq!(
            kinds("count + 12 * 3.5"),
            vec![
                TokenKind::Word,
                TokenKind::Symbol,
                TokenKind::Number,
                TokenKind::Symbol,
                TokenKind::Number
            ]
        );
    }

    #[test]
    fn number_takes_at_most_one_decimal_point() {
        let tokens = tokenize("1.2.3", TokenizerOptions::default());
        let texts: Vec<&str> = tokens.iter().map(|token| token.text.as_str()).collect();
        assert_eq!(texts, vec!["1.2", ".", "3"]);
    }

    #[test]
    fn scans_variable_names_with_prefix() {
        let tokens = tokenize("$total_count + $x2", TokenizerOptions::default());
        assert_eq!(tokens[0].kind, TokenKind::VariableName);
        assert_eq!(tokens[0].text, "$total_count");
        assert_eq!(tokens[2].kind, TokenKind::VariableName);
        assert_eq!(tokens[2].text, "$x2");
    }

    #[test]
    fn lone_dollar_is_unknown() {
        let tokens = tokenize("$ + 1", TokenizerOptions::default());
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].text, "$");
    }

    #[test]
    fn quoted_string_keeps_raw_lexeme_and_escapes() {
        let tokens = tokenize(r#"Echo("a \"b\", c")"#, TokenizerOptions::default());
        let quoted = tokens
            .iter()
            .find(|token| token.kind == TokenKind::QuotedString)
            .expect("quoted token");
        assert_eq!(quoted.text, r#""a \"b\", c""#);
    }

    #[test]
    fn embedded_newline_counts_lines() {
        let mut tokenizer = Tokenizer::new("\"a\nb\" x");
        let quoted = tokenizer.next_token();
        assert_eq!(quoted.kind, TokenKind::QuotedString);
        assert_eq!(quoted.line, 1);
        let word = tokenizer.next_token();
        assert_eq!(word.kind, TokenKind::Word);
        assert_eq!(word.line, 2);
    }

    #[test]
    fn unterminated_quote_is_unknown_not_panic() {
        let tokens = tokenize("\"abc", TokenizerOptions::default());
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
    }

    #[test]
    fn eol_tokens_are_always_emitted() {
        assert_eq!(
            kinds("a\nb"),
            vec![TokenKind::Word, TokenKind::Eol, TokenKind::Word]
        );
    }

    #[test]
    fn whitespace_emission_is_optional() {
        let options = TokenizerOptions {
            emit_whitespace: true,
            ..TokenizerOptions::default()
        };
        let tokens = tokenize("a  b", options);
        assert_eq!(
            tokens.iter().map(|token| token.kind).collect::<Vec<_>>(),
            vec![TokenKind::Word, TokenKind::Whitespace, TokenKind::Word]
        );
        assert_eq!(tokens[1].text, "  ");
    }

    #[test]
    fn unrecognized_character_is_unknown() {
        let tokens = tokenize("a # b", TokenizerOptions::default());
        assert_eq!(tokens[1].kind, TokenKind::Unknown);
        assert_eq!(tokens[1].text, "#");
    }

    #[test]
    fn eof_repeats_after_end() {
        let mut tokenizer = Tokenizer::new("x");
        assert_eq!(tokenizer.next_token().kind, TokenKind::Word);
        assert_eq!(tokenizer.next_token().kind, TokenKind::Eof);
        assert_eq!(tokenizer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn mask_quoted_hides_structural_characters() {
        assert_eq!(mask_quoted(r#"Echo("a=b")"#), r#"Echo("   ")"#);
        assert_eq!(mask_quoted(r#"$x = "y;";"#), r#"$x = "  ";"#);
    }

    #[test]
    fn mask_quoted_preserves_char_count() {
        let text = r#"if ($s == "do(ne)")"#;
        assert_eq!(mask_quoted(text).chars().count(), text.chars().count());
    }

    #[test]
    fn mask_quoted_handles_escaped_quote() {
        let masked = mask_quoted(r#"Echo("a\"b") = 1"#);
        assert!(masked.contains("= 1"));
        assert!(!masked.contains("a\\"));
    }

    #[test]
    fn strip_comment_outside_quotes() {
        assert_eq!(strip_comment("goto Top; // jump back"), "goto Top; ");
        assert_eq!(strip_comment("// whole line"), "");
    }

    #[test]
    fn strip_comment_ignores_slashes_inside_quotes() {
        let text = r#"Echo("http://host/path")"#;
        assert_eq!(strip_comment(text), text);
    }

    #[test]
    fn split_arguments_respects_quotes() {
        assert_eq!(
            split_arguments(r#""a, b", 2, $x"#),
            vec![r#""a, b""#.to_string(), "2".to_string(), "$x".to_string()]
        );
    }

    #[test]
    fn split_arguments_empty_input() {
        assert!(split_arguments("   ").is_empty());
    }

    #[test]
    fn split_arguments_keeps_empty_pieces() {
        assert_eq!(
            split_arguments("a,,b"),
            vec!["a".to_string(), String::new(), "b".to_string()]
        );
    }

    #[test]
    fn find_assignment_skips_comparison_operators() {
        assert_eq!(find_assignment("$x == 3;"), None);
        assert_eq!(find_assignment("$x <= 3;"), None);
        assert_eq!(find_assignment("$x != 3;"), None);
        assert_eq!(find_assignment("$x = $y == 3;"), Some(3));
    }

    #[test]
    fn find_assignment_ignores_quoted_equals() {
        let text = r#"$msg = "a=b";"#;
        assert_eq!(find_assignment(text), Some(5));
    }

    #[test]
    fn split_assignment_trims_both_sides() {
        let (lhs, rhs) = split_assignment("$total =  $a + 1; ").expect("assignment");
        assert_eq!(lhs, "$total");
        assert_eq!(rhs, "$a + 1;");
    }

    #[test]
    fn unescape_and_escape_round_trip() {
        let lexeme = r#""line\none\ttab \"q\" back\\slash""#;
        let value = unescape_quoted(lexeme).expect("decodes");
        assert_eq!(value, "line\none\ttab \"q\" back\\slash");
        assert_eq!(escape_into_quoted(&value), lexeme);
    }

    #[test]
    fn unescape_rejects_bare_text() {
        assert!(unescape_quoted("abc").is_none());
        assert!(unescape_quoted("\"unterminated").is_none());
    }
}
