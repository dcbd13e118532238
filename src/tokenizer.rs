//! Lexical analysis: a pull-based token source over a borrowed buffer.
//!
//! Tokens borrow their text from the source, so the buffer must outlive every
//! token and every AST node built from them. Quoted literals are not tokenised
//! character by character; the lexer scans their raw body with
//! [`Lexer::raw_until`] and leaves escape handling to the parser.

use snafu::ensure;

use crate::error::{CompileResult, Position, SyntaxSnafu};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Ident,
  Keyword,
  Num,
  Str,
  Punctuator,
  Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
  pub kind: TokenKind,
  pub text: &'src str,
  pub position: Position,
  pub value: Option<i64>,
}

pub const PRIMITIVE_KEYWORDS: [&str; 6] = ["void", "bool", "char", "short", "int", "long"];

const KEYWORDS: [&str; 6] = ["class", "return", "asm", "public", "protected", "private"];

// Longest first so `->` wins over `-`.
const PUNCTUATORS: [&str; 10] = ["->", "{", "}", "(", ")", ";", ",", "=", "*", ":"];

pub fn is_primitive_keyword(text: &str) -> bool {
  PRIMITIVE_KEYWORDS.contains(&text)
}

pub struct Lexer<'src> {
  source: &'src str,
  offset: usize,
  line: u32,
  column: u32,
}

impl<'src> Lexer<'src> {
  pub fn new(source: &'src str) -> Self {
    Self {
      source,
      offset: 0,
      line: 1,
      column: 1,
    }
  }

  fn position(&self) -> Position {
    Position::new(self.offset, self.line, self.column)
  }

  fn rest(&self) -> &'src str {
    &self.source[self.offset..]
  }

  fn bump(&mut self, len: usize) {
    for c in self.source[self.offset..self.offset + len].chars() {
      if c == '\n' {
        self.line += 1;
        self.column = 1;
      } else {
        self.column += 1;
      }
    }
    self.offset += len;
  }

  fn skip_trivia(&mut self) {
    loop {
      let rest = self.rest();
      let whitespace = rest.len() - rest.trim_start().len();
      if whitespace > 0 {
        self.bump(whitespace);
        continue;
      }
      if rest.starts_with("//") {
        let len = rest.find('\n').unwrap_or(rest.len());
        self.bump(len);
        continue;
      }
      break;
    }
  }

  /// Consume raw text up to (not including) the next unescaped `delimiter`,
  /// then consume the delimiter itself.
  pub fn raw_until(&mut self, delimiter: char) -> CompileResult<&'src str> {
    let start = self.position();
    let rest = self.rest();
    let mut escaped = false;
    let end = rest.char_indices().find_map(|(i, c)| {
      if escaped {
        escaped = false;
        None
      } else if c == '\\' {
        escaped = true;
        None
      } else if c == delimiter {
        Some(i)
      } else {
        None
      }
    });

    let Some(end) = end else {
      return SyntaxSnafu {
        position: start,
        message: format!("unterminated literal, expected `{delimiter}`"),
      }
      .fail();
    };

    let raw = &rest[..end];
    self.bump(end + delimiter.len_utf8());
    Ok(raw)
  }

  /// Produce the next token; `Eof` is returned forever once input runs out.
  pub fn next_token(&mut self) -> CompileResult<Token<'src>> {
    self.skip_trivia();
    let position = self.position();
    let rest = self.rest();

    let Some(c) = rest.chars().next() else {
      return Ok(Token {
        kind: TokenKind::Eof,
        text: "",
        position,
        value: None,
      });
    };

    if c.is_ascii_digit() {
      let len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
      let text = &rest[..len];
      let value = text.parse::<i64>().map_err(|err| {
        SyntaxSnafu {
          position,
          message: format!("invalid number: {err}"),
        }
        .build()
      })?;
      self.bump(len);
      return Ok(Token {
        kind: TokenKind::Num,
        text,
        position,
        value: Some(value),
      });
    }

    if c.is_ascii_alphabetic() || c == '_' {
      let len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
      let text = &rest[..len];
      self.bump(len);
      let kind = if KEYWORDS.contains(&text) || is_primitive_keyword(text) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      return Ok(Token {
        kind,
        text,
        position,
        value: None,
      });
    }

    if c == '"' {
      self.bump(1);
      let text = self.raw_until('"')?;
      return Ok(Token {
        kind: TokenKind::Str,
        text,
        position,
        value: None,
      });
    }

    let punct = PUNCTUATORS.into_iter().find(|p| rest.starts_with(p));
    ensure!(
      punct.is_some(),
      SyntaxSnafu {
        position,
        message: format!("invalid token: '{c}'"),
      }
    );
    let text = &rest[..punct.map_or(0, str::len)];
    self.bump(text.len());
    Ok(Token {
      kind: TokenKind::Punctuator,
      text,
      position,
      value: None,
    })
  }
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: &Token<'_>) -> String {
  match token.kind {
    TokenKind::Eof => "EOF".to_string(),
    TokenKind::Str => format!("\"{}\"", token.text),
    _ => token.text.to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(source: &str) -> Vec<(TokenKind, &str)> {
    let mut lexer = Lexer::new(source);
    let mut out = Vec::new();
    loop {
      let token = lexer.next_token().expect("lexing failed");
      out.push((token.kind, token.text));
      if token.kind == TokenKind::Eof {
        break;
      }
    }
    out
  }

  #[test]
  fn classifies_tokens() {
    use TokenKind::*;
    assert_eq!(
      kinds("int f(){ return p->x; } // done"),
      vec![
        (Keyword, "int"),
        (Ident, "f"),
        (Punctuator, "("),
        (Punctuator, ")"),
        (Punctuator, "{"),
        (Keyword, "return"),
        (Ident, "p"),
        (Punctuator, "->"),
        (Ident, "x"),
        (Punctuator, ";"),
        (Punctuator, "}"),
        (Eof, ""),
      ]
    );
  }

  #[test]
  fn string_body_is_raw() {
    let mut lexer = Lexer::new(r#""mov \"x\"\n" tail"#);
    let token = lexer.next_token().unwrap();
    assert_eq!(token.kind, TokenKind::Str);
    assert_eq!(token.text, r#"mov \"x\"\n"#);
    assert_eq!(lexer.next_token().unwrap().text, "tail");
  }

  #[test]
  fn positions_track_lines() {
    let mut lexer = Lexer::new("int\n  x");
    lexer.next_token().unwrap();
    let x = lexer.next_token().unwrap();
    assert_eq!(x.position, Position::new(6, 2, 3));
  }

  #[test]
  fn unterminated_string_is_a_syntax_error() {
    let mut lexer = Lexer::new("\"nop");
    let err = lexer.next_token().unwrap_err();
    assert!(matches!(err, crate::error::CompileError::Syntax { .. }));
  }

  #[test]
  fn rejects_unknown_characters() {
    let mut lexer = Lexer::new("@");
    assert!(lexer.next_token().is_err());
  }
}
