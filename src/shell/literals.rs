//! Extended-literal normalization.
//!
//! Shell commands may contain literal wrappers that are not JSON, such as
//! `ObjectId("...")` or `NumberLong(42)`. This pre-lexing pass rewrites them
//! into plain JSON-compatible text before arguments are parsed. Text inside
//! string literals is copied untouched.

/// What a wrapper is reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralRule {
    /// The wrapped value becomes a JSON string.
    String,
    /// The wrapped value becomes a bare JSON number.
    Number,
    /// The bare keyword becomes `null`.
    Null,
}

/// Mapping table of recognized wrappers and keywords.
pub const LITERAL_RULES: &[(&str, LiteralRule)] = &[
    ("ObjectId", LiteralRule::String),
    ("ISODate", LiteralRule::String),
    ("NumberLong", LiteralRule::Number),
    ("NumberInt", LiteralRule::Number),
    ("undefined", LiteralRule::Null),
];

/// Looks up the rule for an identifier.
#[must_use]
pub fn rule_for(ident: &str) -> Option<LiteralRule> {
    LITERAL_RULES
        .iter()
        .find(|(name, _)| *name == ident)
        .map(|(_, rule)| *rule)
}

/// Rewrites extended literals into JSON-compatible text.
///
/// Wrappers whose argument is not a single string or number are left as they
/// are; the argument parser then reports them.
///
/// # Example
///
/// ```rust,ignore
/// let text = normalize_literals(r#"{"_id": ObjectId("64b0c1"), "n": NumberLong(7)}"#);
/// assert_eq!(text, r#"{"_id": "64b0c1", "n": 7}"#);
/// ```
#[must_use]
pub fn normalize_literals(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' || c == '\'' {
            let end = skip_string(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        if is_ident_start(c) && (i == 0 || !is_ident_char(chars[i - 1])) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();

            match rule_for(&ident) {
                Some(LiteralRule::Null) => out.push_str("null"),
                Some(rule) => match rewrite_wrapper(&chars, i, rule) {
                    Some((replacement, next)) => {
                        out.push_str(&replacement);
                        i = next;
                    },
                    None => out.push_str(&ident),
                },
                None => out.push_str(&ident),
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Rewrites `(<arg>)` starting at `pos`. Returns the replacement and the
/// index just past the closing parenthesis.
fn rewrite_wrapper(chars: &[char], pos: usize, rule: LiteralRule) -> Option<(String, usize)> {
    let mut i = skip_whitespace(chars, pos);
    if chars.get(i) != Some(&'(') {
        return None;
    }
    i = skip_whitespace(chars, i + 1);

    let (inner, next) = match chars.get(i)? {
        '"' | '\'' => {
            let quote = chars[i];
            let end = skip_string(chars, i);
            if end - i < 2 || chars[end - 1] != quote {
                return None;
            }
            (unescape(&chars[i + 1..end - 1]), end)
        },
        _ => {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '-' | '+' | '.')) {
                i += 1;
            }
            if start == i {
                return None;
            }
            (chars[start..i].iter().collect(), i)
        },
    };

    let close = skip_whitespace(chars, next);
    if chars.get(close) != Some(&')') {
        return None;
    }

    let replacement = match rule {
        LiteralRule::String => serde_json::Value::String(inner).to_string(),
        LiteralRule::Number => {
            let trimmed = inner.trim();
            trimmed.parse::<serde_json::Number>().ok()?;
            trimmed.to_string()
        },
        LiteralRule::Null => "null".to_string(),
    };
    Some((replacement, close + 1))
}

/// Returns the index just past the string literal starting at `start`.
///
/// An unterminated literal runs to the end of input.
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Decodes backslash escapes inside a quoted wrapper argument.
fn unescape(body: &[char]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut iter = body.iter();
    while let Some(&c) = iter.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match iter.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(&other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"ObjectId("507f1f77bcf86cd799439011")"#, r#""507f1f77bcf86cd799439011""# ; "object id")]
    #[test_case(r"ObjectId('507f1f77bcf86cd799439011')", r#""507f1f77bcf86cd799439011""# ; "single quoted object id")]
    #[test_case(r#"ISODate("2024-01-01T00:00:00Z")"#, r#""2024-01-01T00:00:00Z""# ; "iso date")]
    #[test_case("NumberLong(42)", "42" ; "number long")]
    #[test_case(r#"NumberLong("9007199254740993")"#, "9007199254740993" ; "quoted number long")]
    #[test_case("NumberInt( -7 )", "-7" ; "number int")]
    #[test_case("undefined", "null" ; "undefined")]
    fn test_wrapper_rewrites(input: &str, expected: &str) {
        assert_eq!(normalize_literals(input), expected);
    }

    #[test]
    fn test_rewrites_inside_documents() {
        let input = r#"{"_id": ObjectId("abc"), "n": NumberLong(7), "x": undefined}"#;
        assert_eq!(
            normalize_literals(input),
            r#"{"_id": "abc", "n": 7, "x": null}"#
        );
    }

    #[test]
    fn test_string_contents_untouched() {
        let input = r#"{"note": "undefined ObjectId(\"x\")"}"#;
        assert_eq!(normalize_literals(input), input);
    }

    #[test]
    fn test_identifier_prefixes_untouched() {
        assert_eq!(normalize_literals("undefinedValue"), "undefinedValue");
        assert_eq!(normalize_literals("myObjectId(1)"), "myObjectId(1)");
    }

    #[test]
    fn test_malformed_wrapper_left_verbatim() {
        assert_eq!(normalize_literals("ObjectId()"), "ObjectId()");
        assert_eq!(normalize_literals("NumberLong(abc)"), "NumberLong(abc)");
        assert_eq!(normalize_literals("ObjectId"), "ObjectId");
    }

    #[test]
    fn test_string_escapes_in_wrapper() {
        assert_eq!(normalize_literals(r#"ISODate("a\"b")"#), r#""a\"b""#);
    }

    #[test]
    fn test_rule_table() {
        assert_eq!(rule_for("ObjectId"), Some(LiteralRule::String));
        assert_eq!(rule_for("NumberInt"), Some(LiteralRule::Number));
        assert_eq!(rule_for("Date"), None);
    }
}
