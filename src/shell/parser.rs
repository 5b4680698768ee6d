//! Recursive-descent parser for shell commands.
//!
//! Grammar, tried in priority order:
//!
//! ```text
//! command  := "use" NAME
//!           | "show" ("dbs" | "databases" | "collections" | "users")
//!           | "db" "." NAME "." METHOD "(" args? ")" ";"?
//! args     := value ("," value)* ","?
//! value    := object | array | STRING | NUMBER | true | false | null
//! object   := "{" (key ":" value ("," key ":" value)* ","?)? "}"
//! key      := STRING | IDENT | NUMBER
//! array    := "[" (value ("," value)* ","?)? "]"
//! ```
//!
//! Arguments first go through [`normalize_literals`], are then parsed as a
//! JSON array, and only on failure fall back to the relaxed grammar above
//! (unquoted keys, single quotes, trailing commas).

use super::command::{CollectionOp, ShellCommand};
use super::lexer::{Token, TokenKind, fragment_at, tokenize};
use super::literals::normalize_literals;
use crate::{Error, Result};
use serde_json::{Map, Number, Value};

/// Parses one shell command.
///
/// # Errors
///
/// Returns [`Error::Syntax`] for anything outside the grammar, naming the
/// offending fragment.
///
/// # Example
///
/// ```rust,ignore
/// let command = parse_command(r#"db.users.find({"age": {"$gt": 21}})"#)?;
/// ```
pub fn parse_command(input: &str) -> Result<ShellCommand> {
    let text = input.trim();
    let text = text.strip_suffix(';').map_or(text, str::trim_end);

    let mut words = text.split_whitespace();
    match words.next() {
        Some("use") => parse_use(text, words.collect()),
        Some("show") => parse_show(text, &words.collect::<Vec<_>>()),
        _ if text.starts_with("db.") => parse_collection_call(text),
        _ => Err(Error::syntax(
            "unsupported command; expected `use`, `show` or `db.<collection>.<method>(...)`",
            fragment_at(text, 0),
        )),
    }
}

fn parse_use(text: &str, rest: Vec<&str>) -> Result<ShellCommand> {
    match rest.as_slice() {
        [name] if is_word(name) => Ok(ShellCommand::Use {
            database: (*name).to_string(),
        }),
        _ => Err(Error::syntax("invalid use command", text)),
    }
}

fn parse_show(text: &str, rest: &[&str]) -> Result<ShellCommand> {
    match rest {
        ["dbs" | "databases"] => Ok(ShellCommand::ShowDatabases),
        ["collections"] => Ok(ShellCommand::ShowCollections),
        ["users"] => Ok(ShellCommand::ShowUsers),
        _ => Err(Error::syntax("unsupported show command", text)),
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn parse_collection_call(text: &str) -> Result<ShellCommand> {
    let tokens = tokenize(text)?;

    let (collection, method, open) = match tokens.as_slice() {
        [
            Token { kind: TokenKind::Ident(db), .. },
            Token { kind: TokenKind::Dot, .. },
            Token { kind: TokenKind::Ident(collection), .. },
            Token { kind: TokenKind::Dot, .. },
            Token { kind: TokenKind::Ident(method), .. },
            open @ Token { kind: TokenKind::LParen, .. },
            ..,
        ] if db == "db" => (collection.clone(), method.clone(), open.offset),
        _ => {
            return Err(Error::syntax(
                "expected db.<collection>.<method>(<args>)",
                fragment_at(text, 0),
            ));
        },
    };

    let close = match tokens.last() {
        Some(Token { kind: TokenKind::RParen, offset }) if tokens.len() > 6 => *offset,
        Some(last) => {
            return Err(Error::syntax(
                "expected `)` to close the method call",
                fragment_at(text, last.offset),
            ));
        },
        None => return Err(Error::syntax("empty command", text)),
    };

    let args = parse_arguments(&text[open + 1..close])?;
    let op = CollectionOp::from_call(&method, args)?;
    Ok(ShellCommand::Collection { collection, op })
}

/// Parses a comma-separated argument list.
///
/// # Errors
///
/// Returns [`Error::Syntax`] when neither the JSON nor the relaxed grammar
/// accepts the text.
pub fn parse_arguments(args: &str) -> Result<Vec<Value>> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = normalize_literals(trimmed);
    if let Ok(values) = serde_json::from_str::<Vec<Value>>(&format!("[{normalized}]")) {
        return Ok(values);
    }

    let tokens = tokenize(&normalized).map_err(|e| match e {
        Error::Syntax { message, .. } => Error::syntax(
            format!("cannot parse arguments: {message}"),
            trimmed,
        ),
        other => other,
    })?;
    LiteralParser::new(&normalized, &tokens).parse_list()
}

/// Relaxed literal parser over a token slice.
struct LiteralParser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    const fn new(source: &'a str, tokens: &'a [Token]) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    fn parse_list(mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while self.peek().is_some() {
            values.push(self.value()?);
            match self.peek() {
                None => break,
                Some(TokenKind::Comma) => self.pos += 1,
                Some(_) => return Err(self.error("expected `,` between arguments")),
            }
        }
        Ok(values)
    }

    fn peek(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<&'a TokenKind> {
        let kind = self.peek();
        self.pos += 1;
        kind
    }

    fn error(&self, message: &str) -> Error {
        let offset = self
            .tokens
            .get(self.pos)
            .map_or(self.source.len(), |t| t.offset);
        let fragment = fragment_at(self.source, offset);
        Error::syntax(
            format!("cannot parse arguments: {message}"),
            if fragment.is_empty() { "<end of input>".to_string() } else { fragment },
        )
    }

    fn value(&mut self) -> Result<Value> {
        match self.peek() {
            Some(TokenKind::LBrace) => self.object(),
            Some(TokenKind::LBracket) => self.array(),
            Some(TokenKind::Str(s)) => {
                self.pos += 1;
                Ok(Value::String(s.clone()))
            },
            Some(TokenKind::Number(n)) => {
                let value = parse_number(n).ok_or_else(|| self.error("invalid number"))?;
                self.pos += 1;
                Ok(Value::Number(value))
            },
            Some(TokenKind::Ident(ident)) => {
                let value = match ident.as_str() {
                    "true" | "True" => Value::Bool(true),
                    "false" | "False" => Value::Bool(false),
                    "null" | "None" => Value::Null,
                    _ => return Err(self.error("unexpected identifier")),
                };
                self.pos += 1;
                Ok(value)
            },
            _ => Err(self.error("expected a value")),
        }
    }

    fn object(&mut self) -> Result<Value> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            let key = match self.advance() {
                Some(TokenKind::RBrace) => break,
                Some(TokenKind::Str(s) | TokenKind::Ident(s) | TokenKind::Number(s)) => s.clone(),
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected a key"));
                },
            };
            if self.advance() != Some(&TokenKind::Colon) {
                self.pos -= 1;
                return Err(self.error("expected `:` after key"));
            }
            let value = self.value()?;
            map.insert(key, value);
            match self.advance() {
                Some(TokenKind::Comma) => {},
                Some(TokenKind::RBrace) => break,
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected `,` or `}`"));
                },
            }
        }
        Ok(Value::Object(map))
    }

    fn array(&mut self) -> Result<Value> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&TokenKind::RBracket) {
                self.pos += 1;
                break;
            }
            items.push(self.value()?);
            match self.advance() {
                Some(TokenKind::Comma) => {},
                Some(TokenKind::RBracket) => break,
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected `,` or `]`"));
                },
            }
        }
        Ok(Value::Array(items))
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    if let Ok(i) = unsigned.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = unsigned.parse::<u64>() {
        return Some(Number::from(u));
    }
    unsigned.parse::<f64>().ok().and_then(Number::from_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::command::{Document, IndexTarget};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_find_with_operator_filter() {
        let command = parse_command(r#"db.users.find({"age": {"$gt": 21}})"#).unwrap();
        assert_eq!(
            command,
            ShellCommand::Collection {
                collection: "users".to_string(),
                op: CollectionOp::Find {
                    filter: doc(json!({"age": {"$gt": 21}})),
                    projection: None,
                },
            }
        );
    }

    #[test]
    fn test_object_id_becomes_plain_string() {
        let command =
            parse_command(r#"db.users.findOne({_id: ObjectId("507f1f77bcf86cd799439011")})"#)
                .unwrap();
        let ShellCommand::Collection { op: CollectionOp::FindOne { filter, .. }, .. } = command
        else {
            panic!("expected findOne");
        };
        assert_eq!(filter.get("_id"), Some(&json!("507f1f77bcf86cd799439011")));
    }

    #[test]
    fn test_use_and_show() {
        assert_eq!(
            parse_command("use shop").unwrap(),
            ShellCommand::Use {
                database: "shop".to_string()
            }
        );
        assert_eq!(parse_command("show dbs").unwrap(), ShellCommand::ShowDatabases);
        assert_eq!(parse_command("show   databases").unwrap(), ShellCommand::ShowDatabases);
        assert_eq!(parse_command("show collections;").unwrap(), ShellCommand::ShowCollections);
        assert_eq!(parse_command("show users").unwrap(), ShellCommand::ShowUsers);
    }

    #[test]
    fn test_use_requires_one_name() {
        assert!(parse_command("use").is_err());
        assert!(parse_command("use a b").is_err());
        assert!(parse_command("use a.b").is_err());
    }

    #[test]
    fn test_unsupported_show() {
        let err = parse_command("show tables").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref fragment, .. } if fragment == "show tables"));
    }

    #[test]
    fn test_other_forms_are_syntax_errors() {
        for input in [
            "SELECT * FROM users",
            "db.users",
            "db.users.find",
            "db.users.find({}).limit(5)",
            "db[\"users\"].find()",
            "",
        ] {
            let err = parse_command(input).unwrap_err();
            assert!(matches!(err, Error::Syntax { .. }), "{input}: {err}");
        }
    }

    #[test]
    fn test_unknown_method_is_syntax_error() {
        let err = parse_command("db.users.explode()").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref message, .. } if message.contains("explode")));
    }

    #[test]
    fn test_relaxed_arguments() {
        let args = parse_arguments("{name: 'Ann', tags: ['a', 'b',], n: NumberLong(3),}").unwrap();
        assert_eq!(args, vec![json!({"name": "Ann", "tags": ["a", "b"], "n": 3})]);
    }

    #[test]
    fn test_python_style_literals_accepted() {
        let args = parse_arguments("{'active': True, 'deleted': None}").unwrap();
        assert_eq!(args, vec![json!({"active": true, "deleted": null})]);
    }

    #[test]
    fn test_unparseable_arguments() {
        let err = parse_arguments("{name: }").unwrap_err();
        assert!(matches!(err, Error::Syntax { ref message, .. } if message.starts_with("cannot parse arguments")));
        assert!(parse_arguments("{a: 1} {b: 2}").is_err());
        assert!(parse_arguments("{a: foo}").is_err());
    }

    #[test]
    fn test_aggregate_pipeline_is_single_argument() {
        let command =
            parse_command(r#"db.orders.aggregate([{"$match": {"x": 1}}, {"$limit": 2}])"#).unwrap();
        let ShellCommand::Collection { op: CollectionOp::Aggregate { pipeline }, .. } = command
        else {
            panic!("expected aggregate");
        };
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn test_create_and_drop_index() {
        let command =
            parse_command(r#"db.users.createIndex({"email": 1}, {"unique": true})"#).unwrap();
        assert!(matches!(
            command,
            ShellCommand::Collection { op: CollectionOp::CreateIndex { ref options, .. }, .. }
                if options.get("unique") == Some(&json!(true))
        ));

        let command = parse_command(r#"db.users.dropIndex("email_1")"#).unwrap();
        assert!(matches!(
            command,
            ShellCommand::Collection { op: CollectionOp::DropIndex { index: IndexTarget::Name(ref n) }, .. }
                if n == "email_1"
        ));
    }

    #[test]
    fn test_multiline_arguments() {
        let command = parse_command("db.users.updateOne(\n  {_id: 1},\n  {$set: {name: \"x\"}}\n);")
            .unwrap();
        assert_eq!(
            command.to_string(),
            r#"db.users.updateOne({"_id":1}, {"$set":{"name":"x"}})"#
        );
    }

    #[test]
    fn test_display_reparses_to_same_command() {
        let original = parse_command("db.items.distinct('sku', {qty: {$gte: 5}})").unwrap();
        let reparsed = parse_command(&original.to_string()).unwrap();
        assert_eq!(original, reparsed);
    }
}
