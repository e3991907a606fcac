//! Lexical analysis: turns the raw input bytes into a vector of tokens.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond classifying pending byte runs. Multi-character operators are
//! matched before single-character delimiters to avoid ambiguity, and the
//! finished stream is wrapped in a cursor terminated by an `Eof` marker so
//! lookahead never runs off the end.

use crate::error::{CompileResult, UnexpectedEofSnafu, UnrecognizedTokenSnafu};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  /// Reserved builtin function names: `exit`, `print`.
  StdFunction,
  Return,
  /// Mutability keywords; both `mut` and `const` carry this kind.
  Mutable,
  /// Type keywords: `int`, `char`.
  Type,
  Identifier,
  IntLiteral,
  CharLiteral,
  OpenParen,
  CloseParen,
  OpenBrace,
  CloseBrace,
  Comma,
  Equal,
  Newline,
  Plus,
  Minus,
  Star,
  Slash,
  PlusPlus,
  MinusMinus,
  Eof,
}

impl TokenKind {
  /// Binding strength for precedence climbing. Operator-ness is decided
  /// by kind, not text; `++`/`--` only ever drive statements and are not
  /// expression operators.
  pub fn precedence(self) -> i32 {
    match self {
      TokenKind::Plus | TokenKind::Minus => 1,
      TokenKind::Star | TokenKind::Slash => 2,
      _ => -1,
    }
  }

  pub fn is_operator(self) -> bool {
    matches!(
      self,
      TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash
    )
  }
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  /// Parsed value of an integer literal.
  pub value: Option<i64>,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
    Self {
      kind,
      text: text.into(),
      value: None,
    }
  }

  /// Decode the payload of a character literal, unescaping `\n`.
  pub fn char_value(&self) -> Option<char> {
    if self.kind != TokenKind::CharLiteral || self.text.len() < 2 {
      return None;
    }
    let inner = &self.text[1..self.text.len() - 1];
    if inner == "\\n" {
      return Some('\n');
    }
    let mut chars = inner.chars();
    match (chars.next(), chars.next()) {
      (Some(c), None) => Some(c),
      _ => None,
    }
  }
}

/// Keyword and punctuation dictionary; exact matches take priority over
/// every other classification rule.
fn keyword_kind(text: &str) -> Option<TokenKind> {
  let kind = match text {
    "exit" | "print" => TokenKind::StdFunction,
    "return" => TokenKind::Return,
    "mut" | "const" => TokenKind::Mutable,
    "int" | "char" => TokenKind::Type,
    "(" => TokenKind::OpenParen,
    ")" => TokenKind::CloseParen,
    "{" => TokenKind::OpenBrace,
    "}" => TokenKind::CloseBrace,
    "," => TokenKind::Comma,
    "=" => TokenKind::Equal,
    "\n" => TokenKind::Newline,
    "+" => TokenKind::Plus,
    "-" => TokenKind::Minus,
    "*" => TokenKind::Star,
    "/" => TokenKind::Slash,
    _ => return None,
  };
  Some(kind)
}

/// Classify a non-empty pending run and append the resulting token.
fn flush(tokens: &mut Vec<Token>, run: &str) -> CompileResult<()> {
  if run.is_empty() {
    return Ok(());
  }

  if let Some(kind) = keyword_kind(run) {
    tokens.push(Token::new(kind, run));
    return Ok(());
  }

  let first = run.as_bytes()[0];
  if first.is_ascii_digit() {
    let value = run
      .parse::<i64>()
      .ok()
      .filter(|v| *v >= 0)
      .ok_or_else(|| UnrecognizedTokenSnafu { text: run }.build())?;
    let mut token = Token::new(TokenKind::IntLiteral, run);
    token.value = Some(value);
    tokens.push(token);
    return Ok(());
  }

  if run.len() >= 2 && run.starts_with('\'') && run.ends_with('\'') {
    let token = Token::new(TokenKind::CharLiteral, run);
    if token.char_value().is_none() {
      return UnrecognizedTokenSnafu { text: run }.fail();
    }
    tokens.push(token);
    return Ok(());
  }

  if run.chars().all(|c| c.is_alphabetic()) {
    tokens.push(Token::new(TokenKind::Identifier, run));
    return Ok(());
  }

  UnrecognizedTokenSnafu { text: run }.fail()
}

/// Lex the input into a token cursor.
///
/// The scan keeps `last` at the start of the pending run and walks `i`
/// byte by byte; delimiters flush the run and may emit themselves.
pub fn tokenize(input: &str) -> CompileResult<TokenStream> {
  let bytes = input.as_bytes();
  let mut tokens = Vec::new();
  let mut last = 0;
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    // Line comment: skip to the newline so it terminates the statement
    // as usual. A comment that reaches EOF ends the scan.
    if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
      flush(&mut tokens, &input[last..i])?;
      match input[i..].find('\n') {
        Some(offset) => {
          i += offset;
          last = i;
        }
        None => return Ok(TokenStream::new(tokens)),
      }
      continue;
    }

    // `++` and `--` before the single-character arms.
    if (c == b'+' || c == b'-') && bytes.get(i + 1) == Some(&c) {
      flush(&mut tokens, &input[last..i])?;
      let kind = if c == b'+' {
        TokenKind::PlusPlus
      } else {
        TokenKind::MinusMinus
      };
      tokens.push(Token::new(kind, &input[i..i + 2]));
      i += 2;
      last = i;
      continue;
    }

    // Character literal: the pending run swallows both quotes and is
    // classified as a unit.
    if c == b'\'' {
      flush(&mut tokens, &input[last..i])?;
      let close = input[i + 1..]
        .find('\'')
        .ok_or_else(|| UnrecognizedTokenSnafu { text: &input[i..] }.build())?;
      let end = i + 1 + close + 1;
      flush(&mut tokens, &input[i..end])?;
      i = end;
      last = i;
      continue;
    }

    match c {
      b'(' | b')' | b'{' | b'}' | b',' | b'\n' => {
        flush(&mut tokens, &input[last..i])?;
        flush(&mut tokens, &input[i..i + 1])?;
        i += 1;
        last = i;
      }
      b' ' | b'\t' => {
        flush(&mut tokens, &input[last..i])?;
        i += 1;
        last = i;
      }
      _ => i += 1,
    }
  }

  flush(&mut tokens, &input[last..])?;
  Ok(TokenStream::new(tokens))
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: &Token) -> String {
  match token.kind {
    TokenKind::Eof => "end of input".to_string(),
    TokenKind::Newline => "newline".to_string(),
    _ => token.text.clone(),
  }
}

/// Random-access cursor over the token vector.
///
/// Positions are zero-based and `peek(0)` is `top()`. The stream is
/// always terminated by an `Eof` marker so `top()` stays valid; only
/// advancing past that marker is an error.
#[derive(Debug)]
pub struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  pub fn new(mut tokens: Vec<Token>) -> Self {
    tokens.push(Token::new(TokenKind::Eof, ""));
    Self { tokens, pos: 0 }
  }

  pub fn top(&self) -> &Token {
    &self.tokens[self.pos]
  }

  /// Look `offset` tokens ahead; lookahead past the end sees `Eof`.
  pub fn peek(&self, offset: usize) -> &Token {
    match self.tokens.get(self.pos + offset) {
      Some(token) => token,
      None => &self.tokens[self.tokens.len() - 1],
    }
  }

  /// Advance and return the new top.
  pub fn next(&mut self) -> CompileResult<&Token> {
    if self.pos + 1 >= self.tokens.len() {
      return UnexpectedEofSnafu.fail();
    }
    self.pos += 1;
    Ok(self.top())
  }

  /// Remaining tokens, the `Eof` marker included.
  pub fn len(&self) -> usize {
    self.tokens.len() - self.pos
  }

  pub fn is_empty(&self) -> bool {
    self.is_eof()
  }

  pub fn is_eof(&self) -> bool {
    self.top().kind == TokenKind::Eof
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CompileError;

  fn kinds(input: &str) -> Vec<TokenKind> {
    let mut stream = tokenize(input).unwrap();
    let mut kinds = vec![stream.top().kind];
    while !stream.is_eof() {
      kinds.push(stream.next().unwrap().kind);
    }
    kinds
  }

  #[test]
  fn declaration_with_initializer() {
    assert_eq!(
      kinds("mut int x = 5\n"),
      vec![
        TokenKind::Mutable,
        TokenKind::Type,
        TokenKind::Identifier,
        TokenKind::Equal,
        TokenKind::IntLiteral,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn braces_commas_and_tabs_are_delimiters() {
    assert_eq!(
      kinds("int add(int a,int b){\n\treturn a + b\n}"),
      vec![
        TokenKind::Type,
        TokenKind::Identifier,
        TokenKind::OpenParen,
        TokenKind::Type,
        TokenKind::Identifier,
        TokenKind::Comma,
        TokenKind::Type,
        TokenKind::Identifier,
        TokenKind::CloseParen,
        TokenKind::OpenBrace,
        TokenKind::Newline,
        TokenKind::Return,
        TokenKind::Identifier,
        TokenKind::Plus,
        TokenKind::Identifier,
        TokenKind::Newline,
        TokenKind::CloseBrace,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn increment_splits_identifier_and_operator() {
    assert_eq!(
      kinds("x++\n"),
      vec![
        TokenKind::Identifier,
        TokenKind::PlusPlus,
        TokenKind::Newline,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn integer_literal_records_its_value() {
    let stream = tokenize("42").unwrap();
    let token = stream.top();
    assert_eq!(token.kind, TokenKind::IntLiteral);
    assert_eq!(token.value, Some(42));
  }

  #[test]
  fn char_literal_keeps_quotes_and_decodes() {
    let stream = tokenize("print('A')").unwrap();
    let literal = stream.peek(2);
    assert_eq!(literal.kind, TokenKind::CharLiteral);
    assert_eq!(literal.text, "'A'");
    assert_eq!(literal.char_value(), Some('A'));

    let stream = tokenize("'\\n'").unwrap();
    assert_eq!(stream.top().char_value(), Some('\n'));
  }

  #[test]
  fn comments_run_to_end_of_line() {
    assert_eq!(
      kinds("exit(1) // the answer\nexit(2)"),
      vec![
        TokenKind::StdFunction,
        TokenKind::OpenParen,
        TokenKind::IntLiteral,
        TokenKind::CloseParen,
        TokenKind::Newline,
        TokenKind::StdFunction,
        TokenKind::OpenParen,
        TokenKind::IntLiteral,
        TokenKind::CloseParen,
        TokenKind::Eof,
      ]
    );
    // A trailing comment without a newline simply ends the scan.
    assert_eq!(kinds("exit(1) // done"), vec![
      TokenKind::StdFunction,
      TokenKind::OpenParen,
      TokenKind::IntLiteral,
      TokenKind::CloseParen,
      TokenKind::Eof,
    ]);
  }

  #[test]
  fn unterminated_char_literal_is_rejected() {
    let err = tokenize("print('A").unwrap_err();
    assert!(matches!(err, CompileError::UnrecognizedToken { .. }));
  }

  #[test]
  fn glued_operators_do_not_lex() {
    // `=` is not a delimiter, so a glued run is a single unrecognized
    // token rather than three.
    let err = tokenize("x=5\n").unwrap_err();
    assert!(matches!(err, CompileError::UnrecognizedToken { text } if text == "x=5"));
  }

  #[test]
  fn mixed_alphanumeric_runs_are_rejected() {
    let err = tokenize("12ab\n").unwrap_err();
    assert!(matches!(err, CompileError::UnrecognizedToken { .. }));
  }

  #[test]
  fn operator_precedence_is_decided_by_kind() {
    assert_eq!(TokenKind::Plus.precedence(), 1);
    assert_eq!(TokenKind::Minus.precedence(), 1);
    assert_eq!(TokenKind::Star.precedence(), 2);
    assert_eq!(TokenKind::Slash.precedence(), 2);
    assert_eq!(TokenKind::PlusPlus.precedence(), -1);
    assert_eq!(TokenKind::Identifier.precedence(), -1);
    assert!(!TokenKind::PlusPlus.is_operator());
  }

  #[test]
  fn cursor_refuses_to_advance_past_the_end() {
    let mut stream = tokenize("exit").unwrap();
    assert_eq!(stream.len(), 2);
    assert_eq!(stream.peek(0).kind, stream.top().kind);
    assert_eq!(stream.peek(5).kind, TokenKind::Eof);
    stream.next().unwrap();
    assert!(stream.is_eof());
    assert!(matches!(stream.next(), Err(CompileError::UnexpectedEof)));
  }
}
