//! Shared error utilities used across the compilation pipeline.
//!
//! User-facing faults are values of [`CompileError`] and stop compilation at
//! the first one. Broken compiler invariants are not the user's fault and go
//! through [`internal_error`], which aborts loudly instead.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Location of a token in the source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
  pub offset: usize,
  pub line: u32,
  pub column: u32,
}

impl Position {
  pub fn new(offset: usize, line: u32, column: u32) -> Self {
    Self {
      offset,
      line,
      column,
    }
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("{position}: syntax error: {message}"))]
  Syntax { position: Position, message: String },

  #[snafu(display("{position}: unknown type `{name}`"))]
  UnknownType { position: Position, name: String },

  #[snafu(display("{position}: use of undeclared variable `{name}`"))]
  UndeclaredVariable { position: Position, name: String },

  #[snafu(display("{position}: call to undeclared function `{name}`"))]
  UndeclaredFunction { position: Position, name: String },

  #[snafu(display("{position}: `{name}` is already declared in this scope"))]
  DuplicateDeclaration { position: Position, name: String },

  #[snafu(display("{position}: `{member}` is {visibility} in class `{class}`"))]
  AccessViolation {
    position: Position,
    member: String,
    class: String,
    visibility: String,
  },

  #[snafu(display("{position}: unknown register `{name}`"))]
  UnknownRegister { position: Position, name: String },

  #[snafu(display("{position}: register `{name}` is reserved for the stack frame"))]
  ReservedRegister { position: Position, name: String },

  #[snafu(display("{position}: register `{register}` is bound more than once"))]
  DuplicateRegisterBinding { position: Position, register: String },

  #[snafu(display("{position}: type error: {message}"))]
  Type { position: Position, message: String },
}

impl CompileError {
  pub fn position(&self) -> Position {
    match self {
      Self::Syntax { position, .. }
      | Self::UnknownType { position, .. }
      | Self::UndeclaredVariable { position, .. }
      | Self::UndeclaredFunction { position, .. }
      | Self::DuplicateDeclaration { position, .. }
      | Self::AccessViolation { position, .. }
      | Self::UnknownRegister { position, .. }
      | Self::ReservedRegister { position, .. }
      | Self::DuplicateRegisterBinding { position, .. }
      | Self::Type { position, .. } => *position,
    }
  }

  /// Render the error with the offending source line and a caret under the
  /// column.
  pub fn render(&self, source: &str) -> String {
    let position = self.position();
    let line = source
      .lines()
      .nth(position.line.saturating_sub(1) as usize)
      .unwrap_or_default();
    let marker = format!("{}^", " ".repeat(position.column.saturating_sub(1) as usize));
    format!("{line}\n{marker} {self}")
  }
}

/// Abort on a violated compiler invariant, such as reading a description
/// slot that decoration never filled.
#[track_caller]
pub fn internal_error(message: impl fmt::Display) -> ! {
  panic!("internal compiler error: {message}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn render_points_at_column() {
    let err = SyntaxSnafu {
      position: Position::new(9, 2, 3),
      message: "expected \";\"",
    }
    .build();
    let rendered = err.render("int f(){\n  return 1\n}");
    assert_eq!(
      rendered,
      "  return 1\n  ^ 2:3: syntax error: expected \";\""
    );
  }

  #[test]
  #[should_panic(expected = "internal compiler error: slot unset")]
  fn internal_errors_panic() {
    internal_error("slot unset");
  }
}
