//! SQL tokenizer shared by the definition parser and the dependent-object
//! rewriter.
//!
//! The lexer understands just enough SQLite syntax to find identifier
//! boundaries reliably: quoted identifiers (`"x"`, `` `x` ``, `[x]`), string
//! and blob literals, numbers, comments, and multi-character operators.
//! Comments and whitespace never produce tokens.

use super::parser::ParseError;

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare word: keyword or unquoted identifier.
    Word,
    /// Identifier in double quotes, backticks, or square brackets.
    QuotedIdent,
    /// Single-quoted string literal.
    String,
    /// `X'..'` blob literal.
    Blob,
    /// Numeric literal.
    Number,
    /// Operator or punctuation.
    Punct,
}

/// A token with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text, including quotes.
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Token {
    /// Identifier value with quoting removed, for words and quoted identifiers.
    pub fn ident(&self) -> Option<String> {
        match self.kind {
            TokenKind::Word => Some(self.text.clone()),
            TokenKind::QuotedIdent => Some(unquote(&self.text)),
            _ => None,
        }
    }

    /// Case-insensitive keyword test. Quoted identifiers are never keywords.
    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    /// True when this token names `name` (case-insensitive, quoting ignored).
    pub fn names(&self, name: &str) -> bool {
        self.ident()
            .map(|ident| ident.eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }
}

const MULTI_CHAR_PUNCT: &[&str] = &["->>", "->", "||", "<=", ">=", "<>", "!=", "==", "<<", ">>"];

/// Split SQL text into tokens.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c == b'-' && bytes.get(i + 1) == Some(&b'-') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }

        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            match sql[i + 2..].find("*/") {
                Some(offset) => i = i + 2 + offset + 2,
                None => i = bytes.len(),
            }
            continue;
        }

        let start = i;
        let kind = match c {
            b'\'' => {
                i = scan_quoted(sql, i, b'\'', b'\'')?;
                TokenKind::String
            }
            b'"' => {
                i = scan_quoted(sql, i, b'"', b'"')?;
                TokenKind::QuotedIdent
            }
            b'`' => {
                i = scan_quoted(sql, i, b'`', b'`')?;
                TokenKind::QuotedIdent
            }
            b'[' => {
                i = scan_quoted(sql, i, b'[', b']')?;
                TokenKind::QuotedIdent
            }
            b'x' | b'X' if bytes.get(i + 1) == Some(&b'\'') => {
                i = scan_quoted(sql, i + 1, b'\'', b'\'')?;
                TokenKind::Blob
            }
            b'0'..=b'9' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            b'.' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            _ if is_word_byte(c) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                let rest = &sql[i..];
                let len = MULTI_CHAR_PUNCT
                    .iter()
                    .find(|p| rest.starts_with(*p))
                    .map(|p| p.len())
                    .unwrap_or_else(|| rest.chars().next().map(char::len_utf8).unwrap_or(1));
                i += len;
                TokenKind::Punct
            }
        };

        tokens.push(Token {
            kind,
            text: sql[start..i].to_string(),
            start,
            end: i,
        });
    }

    Ok(tokens)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Scan a quoted run starting at `start` (the opening quote). A doubled
/// closing quote is an escape. Returns the index one past the closing quote.
fn scan_quoted(sql: &str, start: usize, open: u8, close: u8) -> Result<usize, ParseError> {
    let bytes = sql.as_bytes();
    debug_assert_eq!(bytes[start], open);
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if close != b']' && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(ParseError::new("unterminated quoted text", start))
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x') | Some(b'X')) {
        i += 2;
        while i < bytes.len() && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if matches!(bytes.get(i), Some(b'e') | Some(b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
            j += 1;
        }
        if bytes.get(j).is_some_and(u8::is_ascii_digit) {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

/// Remove identifier quoting and unescape doubled quotes.
pub fn unquote(text: &str) -> String {
    let Some(first) = text.chars().next() else {
        return String::new();
    };
    let (close, doubled) = match first {
        '"' => ('"', "\"\""),
        '`' => ('`', "``"),
        '[' => (']', "]"),
        '\'' => ('\'', "''"),
        _ => return text.to_string(),
    };
    if text.len() < 2 || !text.ends_with(close) {
        return text.to_string();
    }
    let inner = &text[1..text.len() - 1];
    if first == '[' {
        inner.to_string()
    } else {
        inner.replace(doubled, &doubled[..1])
    }
}

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Whether any identifier token in `sql` names `name`.
///
/// String literals never match, and neither do identifiers that merely
/// contain `name` as a substring.
pub fn references_identifier(sql: &str, name: &str) -> Result<bool, ParseError> {
    Ok(tokenize(sql)?.iter().any(|t| t.names(name)))
}

/// Replace every identifier token naming `from` with `to`, keeping the rest
/// of the text byte-for-byte.
pub fn replace_identifier(sql: &str, from: &str, to: &str) -> Result<String, ParseError> {
    let tokens = tokenize(sql)?;
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for token in tokens.iter().filter(|t| t.names(from)) {
        out.push_str(&sql[cursor..token.start]);
        if token.kind == TokenKind::Word && is_bare_identifier(to) {
            out.push_str(to);
        } else {
            out.push_str(&quote_ident(to));
        }
        cursor = token.end;
    }
    out.push_str(&sql[cursor..]);
    Ok(out)
}

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render tokens back to text with normalized spacing.
///
/// Used for expressions captured from a definition (defaults, checks, types)
/// so that comments and line breaks inside them cannot leak into generated
/// single-line DDL.
pub fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (index, token) in tokens.iter().enumerate() {
        if index > 0 {
            let prev = &tokens[index - 1];
            let glue = token.is_punct(")")
                || token.is_punct(",")
                || token.is_punct(".")
                || prev.is_punct("(")
                || prev.is_punct(".")
                || (token.is_punct("(")
                    && prev.kind == TokenKind::Word
                    && !is_operator_word(&prev.text))
                || is_unary_sign(tokens, index - 1);
            if !glue {
                out.push(' ');
            }
        }
        out.push_str(&token.text);
    }
    out
}

/// A sign is unary when it opens the expression or follows `(`, `,`, or an
/// operator.
fn is_unary_sign(tokens: &[Token], index: usize) -> bool {
    let token = &tokens[index];
    if !(token.is_punct("-") || token.is_punct("+")) {
        return false;
    }
    if index == 0 {
        return true;
    }
    let before = &tokens[index - 1];
    (before.kind == TokenKind::Punct && !before.is_punct(")"))
        || (before.kind == TokenKind::Word && is_operator_word(&before.text))
}

fn is_operator_word(word: &str) -> bool {
    const OPERATOR_WORDS: &[&str] = &[
        "AND", "OR", "NOT", "IN", "IS", "LIKE", "GLOB", "BETWEEN", "WHEN", "THEN", "ELSE",
        "CASE", "DEFAULT", "CHECK", "AS", "ON", "MATCH", "REGEXP",
    ];
    OPERATOR_WORDS.iter().any(|w| w.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_skips_comments() {
        let tokens = tokenize("a -- trailing\n/* block */ b").unwrap();
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_tokenize_quoted_forms() {
        let tokens = tokenize(r#""a""b" `c` [d e] 'it''s' X'00ff'"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedIdent);
        assert_eq!(tokens[0].ident().as_deref(), Some("a\"b"));
        assert_eq!(tokens[1].ident().as_deref(), Some("c"));
        assert_eq!(tokens[2].ident().as_deref(), Some("d e"));
        assert_eq!(tokens[3].kind, TokenKind::String);
        assert_eq!(tokens[4].kind, TokenKind::Blob);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("SELECT 'open").unwrap_err();
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn test_references_identifier_is_token_exact() {
        let sql = "CREATE VIEW v AS SELECT * FROM users_legacy_backup u WHERE u.note = 'users'";
        assert!(references_identifier(sql, "users_legacy_backup").unwrap());
        assert!(!references_identifier(sql, "users").unwrap());
        assert!(references_identifier(sql, "USERS_LEGACY_BACKUP").unwrap());
    }

    #[test]
    fn test_replace_identifier_preserves_text() {
        let sql = "CREATE VIEW v AS\n  SELECT r.id FROM \"users_legacy_backup\" AS r -- keep\n  JOIN users_legacy_backup_x x";
        let out = replace_identifier(sql, "users_legacy_backup", "users").unwrap();
        assert_eq!(
            out,
            "CREATE VIEW v AS\n  SELECT r.id FROM \"users\" AS r -- keep\n  JOIN users_legacy_backup_x x"
        );
    }

    #[test]
    fn test_render_tokens_spacing() {
        let tokens = tokenize("length( endpoint_url )>=1 AND x IN ('a','b')").unwrap();
        assert_eq!(
            render_tokens(&tokens),
            "length(endpoint_url) >= 1 AND x IN ('a', 'b')"
        );

        let tokens = tokenize("- 1").unwrap();
        assert_eq!(render_tokens(&tokens), "-1");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(unquote(&quote_ident("a\"b")), "a\"b");
    }
}
