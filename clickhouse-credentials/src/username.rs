//! Username templates.
//!
//! A template is literal text with `{{ ... }}` actions. An action is a
//! pipeline of commands separated by `|`; the result of each stage is
//! appended as the last argument of the next one:
//!
//! ```text
//! {{ printf "v-%s-%s" (.DisplayName | truncate 8) (random 20) | truncate 63 }}
//! ```
//!
//! Operands are `.DisplayName`, `.RoleName`, string literals (`"..."` or
//! raw back-quoted), integers, parenthesised pipelines and calls to niladic
//! functions. Templates are compiled once when the plugin is initialized
//! and rendered for every new user.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use chrono::format::{Item, StrftimeItems};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Template used when the configuration does not provide one.
pub const DEFAULT_USERNAME_TEMPLATE: &str = r#"{{ printf "v-%s-%s-%s-%s" (.DisplayName | truncate 8) (.RoleName | truncate 8) (random 20) (unix_time) | truncate 63 }}"#;

/// Longest identifier ClickHouse accepts for a user name, in bytes.
pub const MAX_USERNAME_LENGTH: usize = 63;

/// Longest token `random` will generate.
pub const MAX_RANDOM_LENGTH: usize = MAX_USERNAME_LENGTH * 16;

/// Errors from compiling or rendering a username template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template text is malformed
    #[error("template: {offset}: {message}")]
    Compile {
        /// Byte offset into the template source
        offset: usize,
        /// What is wrong
        message: String,
    },

    /// The template compiled but could not be evaluated
    #[error("template: render failed: {0}")]
    Render(String),
}

impl TemplateError {
    fn compile(offset: usize, message: impl Into<String>) -> Self {
        Self::Compile {
            offset,
            message: message.into(),
        }
    }

    fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }
}

type CompileResult<T> = Result<T, TemplateError>;

/// Request metadata a username is rendered from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsernameMetadata {
    /// Display name of the entity requesting the credential
    pub display_name: String,
    /// Name of the role the credential is issued for
    pub role_name: String,
}

impl UsernameMetadata {
    /// Build metadata from a display name and role name.
    #[must_use]
    pub fn new(display_name: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            role_name: role_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    DisplayName,
    RoleName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Printf,
    Truncate,
    TruncateSha256,
    Random,
    UnixTime,
    UnixTimeMillis,
    Timestamp,
    Uppercase,
    Lowercase,
    Replace,
    Sha256,
    Base64,
    Uuid,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "printf" => Self::Printf,
            "truncate" => Self::Truncate,
            "truncate_sha256" => Self::TruncateSha256,
            "random" => Self::Random,
            "unix_time" => Self::UnixTime,
            "unix_time_millis" => Self::UnixTimeMillis,
            "timestamp" => Self::Timestamp,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "replace" => Self::Replace,
            "sha256" => Self::Sha256,
            "base64" => Self::Base64,
            "uuid" => Self::Uuid,
            _ => return None,
        })
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Printf => "printf",
            Self::Truncate => "truncate",
            Self::TruncateSha256 => "truncate_sha256",
            Self::Random => "random",
            Self::UnixTime => "unix_time",
            Self::UnixTimeMillis => "unix_time_millis",
            Self::Timestamp => "timestamp",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Replace => "replace",
            Self::Sha256 => "sha256",
            Self::Base64 => "base64",
            Self::Uuid => "uuid",
        }
    }

    /// Exact argument count; `None` for variadic `printf`.
    const fn arity(self) -> Option<usize> {
        match self {
            Self::Printf => None,
            Self::UnixTime | Self::UnixTimeMillis | Self::Uuid => Some(0),
            Self::Random
            | Self::Timestamp
            | Self::Uppercase
            | Self::Lowercase
            | Self::Sha256
            | Self::Base64 => Some(1),
            Self::Truncate | Self::TruncateSha256 => Some(2),
            Self::Replace => Some(3),
        }
    }

    fn check_arity(self, given: usize, offset: usize) -> CompileResult<()> {
        let ok = match self.arity() {
            Some(n) => n == given,
            None => given >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(TemplateError::compile(
                offset,
                format!("wrong number of args for {}: got {given}", self.name()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Int(i64),
}

impl Value {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Operand {
    Field(Field),
    Str(String),
    Int(i64),
    Call(Func),
    Pipeline(Box<Pipeline>),
}

#[derive(Debug, Clone)]
enum Command {
    Value(Operand),
    Call(Func, Vec<Operand>),
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Pipe,
    Field(String),
    Ident(String),
    Str(String),
    Int(i64),
}

/// Result of lexing one action.
struct Action {
    tokens: Vec<(Token, usize)>,
    /// Offset just past the closing delimiter
    end: usize,
    trim_right: bool,
    is_comment: bool,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex_action(src: &str, start: usize) -> CompileResult<Action> {
    let mut tokens = Vec::new();
    let mut i = start;

    // {{/* comment */}}
    let body = src[i..].trim_start();
    if body.starts_with("/*") {
        let comment_start = src.len() - body.len();
        let Some(close) = src[comment_start..].find("*/") else {
            return Err(TemplateError::compile(comment_start, "unclosed comment"));
        };
        let after = comment_start + close + 2;
        let rest = src[after..].trim_start();
        let ws_end = src.len() - rest.len();
        if rest.starts_with("}}") {
            return Ok(Action {
                tokens,
                end: ws_end + 2,
                trim_right: false,
                is_comment: true,
            });
        }
        if rest.starts_with("-}}") && ws_end > after {
            return Ok(Action {
                tokens,
                end: ws_end + 3,
                trim_right: true,
                is_comment: true,
            });
        }
        return Err(TemplateError::compile(after, "comment ends before closing delimiter"));
    }

    loop {
        let rest = &src[i..];
        let Some(c) = rest.chars().next() else {
            return Err(TemplateError::compile(start, "unclosed action"));
        };
        if rest.starts_with("}}") {
            return Ok(Action {
                tokens,
                end: i + 2,
                trim_right: false,
                is_comment: false,
            });
        }
        if c.is_whitespace() {
            let trimmed = rest.trim_start();
            let j = src.len() - trimmed.len();
            if trimmed.starts_with("-}}") {
                return Ok(Action {
                    tokens,
                    end: j + 3,
                    trim_right: true,
                    is_comment: false,
                });
            }
            i = j;
            continue;
        }
        match c {
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '|' => {
                tokens.push((Token::Pipe, i));
                i += 1;
            }
            '.' => {
                let name: String = rest[1..].chars().take_while(|c| is_ident_char(*c)).collect();
                if name.is_empty() {
                    return Err(TemplateError::compile(i, "bare '.' is not supported"));
                }
                tokens.push((Token::Field(name.clone()), i));
                i += 1 + name.len();
            }
            '"' => {
                let (value, len) = lex_quoted(&rest[1..]).ok_or_else(|| {
                    TemplateError::compile(i, "unterminated quoted string")
                })?;
                tokens.push((Token::Str(value), i));
                i += 1 + len;
            }
            '`' => {
                let Some(close) = rest[1..].find('`') else {
                    return Err(TemplateError::compile(i, "unterminated raw string"));
                };
                tokens.push((Token::Str(rest[1..=close].to_string()), i));
                i += close + 2;
            }
            c if c.is_ascii_digit() || (c == '-' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) => {
                let len = 1 + rest[1..].chars().take_while(char::is_ascii_digit).count();
                let number = rest[..len]
                    .parse::<i64>()
                    .map_err(|e| TemplateError::compile(i, format!("bad number: {e}")))?;
                tokens.push((Token::Int(number), i));
                i += len;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let name: String = rest.chars().take_while(|c| is_ident_char(*c)).collect();
                let len = name.len();
                tokens.push((Token::Ident(name), i));
                i += len;
            }
            other => {
                return Err(TemplateError::compile(
                    i,
                    format!("unexpected {other:?} in action"),
                ));
            }
        }
    }
}

/// Decode a double-quoted literal body. Returns the value and the number
/// of bytes consumed including the closing quote.
fn lex_quoted(body: &str) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((out, idx + 1)),
            '\n' => return None,
            '\\' => {
                let (_, escaped) = chars.next()?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    _ => return None,
                });
            }
            _ => out.push(c),
        }
    }
    None
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    idx: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.idx).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.idx).map_or(self.end, |(_, o)| *o)
    }

    fn at_stage_end(&self) -> bool {
        matches!(self.peek(), None | Some(Token::Pipe | Token::RParen))
    }

    fn parse_pipeline(&mut self) -> CompileResult<Pipeline> {
        let mut commands = Vec::new();
        loop {
            let offset = self.offset();
            let command = self.parse_command()?;
            if !commands.is_empty() {
                match &command {
                    Command::Value(_) => {
                        return Err(TemplateError::compile(
                            offset,
                            "can't give argument to non-function",
                        ));
                    }
                    Command::Call(func, args) => func.check_arity(args.len() + 1, offset)?,
                }
            } else if let Command::Call(func, args) = &command {
                func.check_arity(args.len(), offset)?;
            }
            commands.push(command);
            if self.peek() == Some(&Token::Pipe) {
                self.idx += 1;
            } else {
                return Ok(Pipeline { commands });
            }
        }
    }

    fn parse_command(&mut self) -> CompileResult<Command> {
        let offset = self.offset();
        if self.at_stage_end() {
            return Err(TemplateError::compile(offset, "missing value for command"));
        }
        if let Some(Token::Ident(name)) = self.peek() {
            let func = Func::lookup(name).ok_or_else(|| {
                TemplateError::compile(offset, format!("function {name:?} not defined"))
            })?;
            self.idx += 1;
            let mut args = Vec::new();
            while !self.at_stage_end() {
                args.push(self.parse_operand()?);
            }
            return Ok(Command::Call(func, args));
        }
        let operand = self.parse_operand()?;
        if !self.at_stage_end() {
            return Err(TemplateError::compile(
                self.offset(),
                "can't give argument to non-function",
            ));
        }
        Ok(Command::Value(operand))
    }

    fn parse_operand(&mut self) -> CompileResult<Operand> {
        let offset = self.offset();
        let Some((token, _)) = self.tokens.get(self.idx).cloned() else {
            return Err(TemplateError::compile(offset, "unexpected end of action"));
        };
        self.idx += 1;
        match token {
            Token::Field(name) => match name.as_str() {
                "DisplayName" => Ok(Operand::Field(Field::DisplayName)),
                "RoleName" => Ok(Operand::Field(Field::RoleName)),
                _ => Err(TemplateError::compile(
                    offset,
                    format!("can't evaluate field {name}"),
                )),
            },
            Token::Str(s) => Ok(Operand::Str(s)),
            Token::Int(i) => Ok(Operand::Int(i)),
            Token::Ident(name) => {
                let func = Func::lookup(&name).ok_or_else(|| {
                    TemplateError::compile(offset, format!("function {name:?} not defined"))
                })?;
                func.check_arity(0, offset)?;
                Ok(Operand::Call(func))
            }
            Token::LParen => {
                let inner = self.parse_pipeline()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(TemplateError::compile(self.offset(), "unclosed left paren"));
                }
                self.idx += 1;
                Ok(Operand::Pipeline(Box::new(inner)))
            }
            Token::RParen => Err(TemplateError::compile(offset, "unexpected right paren")),
            Token::Pipe => Err(TemplateError::compile(offset, "missing value for command")),
        }
    }
}

fn parse_action(action: Action) -> CompileResult<Pipeline> {
    let mut parser = Parser {
        tokens: action.tokens,
        idx: 0,
        end: action.end,
    };
    let pipeline = parser.parse_pipeline()?;
    if parser.idx < parser.tokens.len() {
        return Err(TemplateError::compile(parser.offset(), "unexpected right paren"));
    }
    Ok(pipeline)
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn sha256_hex(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn expect_str(func: Func, value: Value) -> Result<String, TemplateError> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Int(i) => Err(TemplateError::render(format!(
            "{}: expected string; got int {i}",
            func.name()
        ))),
    }
}

fn expect_len(func: Func, value: Value) -> Result<usize, TemplateError> {
    match value {
        Value::Int(i) if i > 0 => usize::try_from(i)
            .map_err(|_| TemplateError::render(format!("{}: length out of range", func.name()))),
        Value::Int(i) => Err(TemplateError::render(format!(
            "{}: length must be > 0 but was {i}",
            func.name()
        ))),
        Value::Str(s) => Err(TemplateError::render(format!(
            "{}: expected int; got string {s:?}",
            func.name()
        ))),
    }
}

fn printf(format: &str, args: Vec<Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.into_iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s' | 'v') => {
                let arg = args
                    .next()
                    .ok_or_else(|| TemplateError::render("printf: missing argument"))?;
                out.push_str(&arg.into_string());
            }
            Some('d') => match args.next() {
                Some(Value::Int(i)) => {
                    let _ = write!(out, "{i}");
                }
                Some(Value::Str(s)) => {
                    return Err(TemplateError::render(format!(
                        "printf: %d given string {s:?}"
                    )));
                }
                None => return Err(TemplateError::render("printf: missing argument")),
            },
            Some(verb) => {
                return Err(TemplateError::render(format!(
                    "printf: unsupported verb %{verb}"
                )));
            }
            None => return Err(TemplateError::render("printf: trailing %")),
        }
    }
    if args.next().is_some() {
        return Err(TemplateError::render("printf: too many arguments"));
    }
    Ok(out)
}

fn timestamp(layout: &str) -> Result<String, TemplateError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(layout).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::render(format!(
            "timestamp: invalid layout {layout:?}"
        )));
    }
    let mut out = String::new();
    write!(out, "{}", Utc::now().format_with_items(items.into_iter()))
        .map_err(|_| TemplateError::render(format!("timestamp: cannot format {layout:?}")))?;
    Ok(out)
}

impl Func {
    fn call(self, args: Vec<Value>) -> Result<Value, TemplateError> {
        let mut args = args.into_iter();
        let mut next = || {
            args.next()
                .ok_or_else(|| TemplateError::render(format!("{}: missing argument", self.name())))
        };
        let value = match self {
            Self::Printf => {
                let format = expect_str(self, next()?)?;
                let rest: Vec<Value> = std::iter::from_fn(|| next().ok()).collect();
                printf(&format, rest)?
            }
            Self::Truncate => {
                let max = expect_len(self, next()?)?;
                let s = expect_str(self, next()?)?;
                truncate_bytes(&s, max).to_string()
            }
            Self::TruncateSha256 => {
                let max = expect_len(self, next()?)?;
                let s = expect_str(self, next()?)?;
                if max <= 8 {
                    return Err(TemplateError::render(format!(
                        "truncate_sha256: max length must be > 8 but was {max}"
                    )));
                }
                if s.len() <= max {
                    s
                } else {
                    let head = truncate_bytes(&s, max - 8);
                    let hash = sha256_hex(&s[head.len()..]);
                    format!("{head}{}", &hash[..8])
                }
            }
            Self::Random => {
                let len = expect_len(self, next()?)?;
                if len > MAX_RANDOM_LENGTH {
                    return Err(TemplateError::render(format!(
                        "random: length must be <= {MAX_RANDOM_LENGTH} but was {len}"
                    )));
                }
                random_alphanumeric(len)
            }
            Self::UnixTime => Utc::now().timestamp().to_string(),
            Self::UnixTimeMillis => Utc::now().timestamp_millis().to_string(),
            Self::Timestamp => timestamp(&expect_str(self, next()?)?)?,
            Self::Uppercase => expect_str(self, next()?)?.to_uppercase(),
            Self::Lowercase => expect_str(self, next()?)?.to_lowercase(),
            Self::Replace => {
                let from = expect_str(self, next()?)?;
                let to = expect_str(self, next()?)?;
                let s = expect_str(self, next()?)?;
                s.replace(&from, &to)
            }
            Self::Sha256 => sha256_hex(&expect_str(self, next()?)?),
            Self::Base64 => STANDARD.encode(expect_str(self, next()?)?),
            Self::Uuid => uuid::Uuid::new_v4().to_string(),
        };
        Ok(Value::Str(value))
    }
}

/// A compiled username template.
#[derive(Debug, Clone)]
pub struct UsernameTemplate {
    source: String,
    nodes: Vec<Node>,
}

impl UsernameTemplate {
    /// Compile a template.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut pos = 0;
        let mut trim_next_text = false;

        loop {
            let Some(rel) = source[pos..].find("{{") else {
                let mut text = &source[pos..];
                if trim_next_text {
                    text = text.trim_start();
                }
                if !text.is_empty() {
                    nodes.push(Node::Text(text.to_string()));
                }
                break;
            };
            let open = pos + rel;
            let mut body = open + 2;
            let mut text = &source[pos..open];
            if trim_next_text {
                text = text.trim_start();
            }
            let after_open = &source[body..];
            if after_open.starts_with('-') && after_open[1..].starts_with(char::is_whitespace) {
                text = text.trim_end();
                body += 1;
            }
            if !text.is_empty() {
                nodes.push(Node::Text(text.to_string()));
            }

            let action = lex_action(source, body)?;
            pos = action.end;
            trim_next_text = action.trim_right;
            if !action.is_comment {
                nodes.push(Node::Action(parse_action(action)?));
            }
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    /// The template source this was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render a username for the given request metadata.
    ///
    /// Surrounding whitespace is trimmed from the result.
    pub fn generate(&self, metadata: &UsernameMetadata) -> Result<String, TemplateError> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    out.push_str(&eval_pipeline(pipeline, metadata)?.into_string());
                }
            }
        }
        Ok(out.trim().to_string())
    }
}

fn eval_operand(operand: &Operand, metadata: &UsernameMetadata) -> Result<Value, TemplateError> {
    Ok(match operand {
        Operand::Field(Field::DisplayName) => Value::Str(metadata.display_name.clone()),
        Operand::Field(Field::RoleName) => Value::Str(metadata.role_name.clone()),
        Operand::Str(s) => Value::Str(s.clone()),
        Operand::Int(i) => Value::Int(*i),
        Operand::Call(func) => func.call(Vec::new())?,
        Operand::Pipeline(inner) => eval_pipeline(inner, metadata)?,
    })
}

fn eval_pipeline(pipeline: &Pipeline, metadata: &UsernameMetadata) -> Result<Value, TemplateError> {
    let mut piped: Option<Value> = None;
    for command in &pipeline.commands {
        let value = match command {
            Command::Value(operand) => eval_operand(operand, metadata)?,
            Command::Call(func, args) => {
                let mut values = args
                    .iter()
                    .map(|arg| eval_operand(arg, metadata))
                    .collect::<Result<Vec<_>, _>>()?;
                values.extend(piped.take());
                func.call(values)?
            }
        };
        piped = Some(value);
    }
    piped.ok_or_else(|| TemplateError::render("empty pipeline"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &str, metadata: &UsernameMetadata) -> String {
        UsernameTemplate::compile(template)
            .unwrap()
            .generate(metadata)
            .unwrap()
    }

    #[test]
    fn test_default_template_shape() {
        let metadata = UsernameMetadata::new("svc", "ops");
        let username = render(DEFAULT_USERNAME_TEMPLATE, &metadata);

        let parts: Vec<&str> = username.split('-').collect();
        assert_eq!(parts.len(), 5, "{username}");
        assert_eq!(parts[0], "v");
        assert_eq!(parts[1], "svc");
        assert_eq!(parts[2], "ops");
        assert_eq!(parts[3].len(), 20);
        assert!(parts[3].chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(parts[4].chars().all(|c| c.is_ascii_digit()));
        assert!(username.len() <= MAX_USERNAME_LENGTH);
    }

    #[test]
    fn test_default_template_truncates_segments() {
        let metadata = UsernameMetadata::new("a-very-long-display-name", "role-name-that-is-long");
        let username = render(DEFAULT_USERNAME_TEMPLATE, &metadata);
        assert!(username.starts_with("v-a-very-l-role-nam-"), "{username}");
        assert!(username.len() <= MAX_USERNAME_LENGTH);
    }

    #[test]
    fn test_default_template_empty_metadata() {
        let username = render(DEFAULT_USERNAME_TEMPLATE, &UsernameMetadata::default());
        assert!(username.starts_with("v---"));
    }

    #[test]
    fn test_literal_text_and_fields() {
        let metadata = UsernameMetadata::new("Alice", "Reader");
        assert_eq!(
            render("user_{{.RoleName | lowercase}}_{{ .DisplayName }}", &metadata),
            "user_reader_Alice"
        );
    }

    #[test]
    fn test_string_functions() {
        let metadata = UsernameMetadata::new("my.app", "r");
        assert_eq!(render(r#"{{ .DisplayName | replace "." "_" | uppercase }}"#, &metadata), "MY_APP");
        assert_eq!(render(r#"{{ "abc" | base64 }}"#, &metadata), "YWJj");
        assert_eq!(
            render(r#"{{ sha256 "abc" }}"#, &metadata),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_truncate_sha256() {
        let metadata = UsernameMetadata::new("abcdefghijklmnopqrstuvwxyz", "");
        let out = render("{{ .DisplayName | truncate_sha256 12 }}", &metadata);
        assert_eq!(out.len(), 12);
        assert!(out.starts_with("abcd"));
        assert_eq!(render("{{ \"short\" | truncate_sha256 12 }}", &metadata), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let metadata = UsernameMetadata::new("ééééé", "");
        let out = render("{{ .DisplayName | truncate 3 }}", &metadata);
        assert_eq!(out, "é");
    }

    #[test]
    fn test_uuid_and_timestamp() {
        let metadata = UsernameMetadata::default();
        assert_eq!(render("{{ uuid }}", &metadata).len(), 36);
        assert_eq!(render(r#"{{ timestamp "%Y" }}"#, &metadata).len(), 4);
        assert!(render("{{ unix_time_millis }}", &metadata).parse::<i64>().is_ok());
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let metadata = UsernameMetadata::new("x", "y");
        assert_eq!(render("a  {{- .DisplayName -}}  b", &metadata), "axb");
        assert_eq!(render("a{{/* note */}}b", &metadata), "ab");
    }

    #[test]
    fn test_printf_verbs() {
        let metadata = UsernameMetadata::default();
        assert_eq!(render(r#"{{ printf "%d%%-%s" 42 "x" }}"#, &metadata), "42%-x");
    }

    #[test]
    fn test_compile_errors() {
        for bad in [
            "{{ .DisplayName ",
            "{{ nope 1 }}",
            "{{ .Unknown }}",
            "{{ (random 3 }}",
            "{{ random 3) }}",
            "{{ truncate 8 }}",
            "{{ \"a\" \"b\" }}",
            "{{ .RoleName | \"x\" }}",
            "{{ }}",
            "{{ \"open }}",
        ] {
            let err = UsernameTemplate::compile(bad).unwrap_err();
            assert!(matches!(err, TemplateError::Compile { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn test_render_errors() {
        let metadata = UsernameMetadata::new("x", "y");
        for bad in [
            "{{ random 0 }}",
            "{{ random 4000000000 }}",
            "{{ truncate \"8\" .RoleName }}",
            "{{ .RoleName | truncate -1 }}",
            "{{ printf \"%d\" .RoleName }}",
            "{{ printf \"%q\" .RoleName }}",
            "{{ 5 | uppercase }}",
            "{{ .RoleName | truncate_sha256 4 }}",
        ] {
            let template = UsernameTemplate::compile(bad).unwrap();
            let err = template.generate(&metadata).unwrap_err();
            assert!(matches!(err, TemplateError::Render(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn test_random_is_fresh() {
        let template = UsernameTemplate::compile("{{ random 20 }}").unwrap();
        let a = template.generate(&UsernameMetadata::default()).unwrap();
        let b = template.generate(&UsernameMetadata::default()).unwrap();
        assert_ne!(a, b);
    }
}
