//! Recursive-descent parser producing a [`TranslationUnit`].
//!
//! Every comma or semicolon delimited construct goes through
//! [`TokenStream::parse_list`], parameterised by its separator, its
//! trailing-separator policy and the token that closes the list.

use snafu::ensure;

use crate::ast::{
  Attribute, BindingRequest, Class, Declaration, Expression, Function, FunctionCall,
  FunctionParameter, FunctionParameterList, InlineAsmStatement, Instruction, InstructionList,
  MemberAccess, Method, NumberLiteral, ReturnStatement, StringLiteral, TranslationUnit, Type,
  Variable, Visibility,
};
use crate::error::{CompileError, CompileResult, Position, SyntaxSnafu};
use crate::tokenizer::{Lexer, Token, TokenKind, describe_token, is_primitive_keyword};

/// Whether the last element of a list may, must, or must not be followed by
/// the separator before the closing token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trailing {
  Forbidden,
  Optional,
  Required,
}

/// Parse a whole source buffer. The buffer must outlive the returned tree.
pub fn parse(source: &str) -> CompileResult<TranslationUnit<'_>> {
  let mut stream = TokenStream::new(source)?;
  stream.parse_translation_unit()
}

/// Cursor over the lexer with one token of lookahead.
pub struct TokenStream<'src> {
  lexer: Lexer<'src>,
  current: Token<'src>,
}

impl<'src> TokenStream<'src> {
  pub fn new(source: &'src str) -> CompileResult<Self> {
    let mut lexer = Lexer::new(source);
    let current = lexer.next_token()?;
    Ok(Self { lexer, current })
  }

  pub fn peek(&self) -> Token<'src> {
    self.current
  }

  fn advance(&mut self) -> CompileResult<Token<'src>> {
    let token = self.current;
    if token.kind != TokenKind::Eof {
      self.current = self.lexer.next_token()?;
    }
    Ok(token)
  }

  /// True if the current token is the punctuator or keyword `text`.
  fn is(&self, text: &str) -> bool {
    matches!(self.current.kind, TokenKind::Punctuator | TokenKind::Keyword)
      && self.current.text == text
  }

  /// Consume the current token if it is `text`.
  fn equal(&mut self, text: &str) -> CompileResult<bool> {
    if self.is(text) {
      self.advance()?;
      return Ok(true);
    }
    Ok(false)
  }

  fn skip(&mut self, text: &str) -> CompileResult<Token<'src>> {
    if self.is(text) {
      return self.advance();
    }
    Err(self.expected(&format!("\"{text}\"")))
  }

  fn expected(&self, what: &str) -> CompileError {
    SyntaxSnafu {
      position: self.current.position,
      message: format!("expected {what}, but got \"{}\"", describe_token(&self.current)),
    }
    .build()
  }

  pub fn is_eof(&self) -> bool {
    self.current.kind == TokenKind::Eof
  }

  fn get_ident(&mut self) -> CompileResult<(&'src str, Position)> {
    if self.current.kind != TokenKind::Ident {
      return Err(self.expected("an identifier"));
    }
    let token = self.advance()?;
    Ok((token.text, token.position))
  }

  fn get_number(&mut self) -> CompileResult<NumberLiteral> {
    if let Token {
      kind: TokenKind::Num,
      value: Some(value),
      position,
      ..
    } = self.current
    {
      self.advance()?;
      return Ok(NumberLiteral { value, position });
    }
    Err(self.expected("a number"))
  }

  /// Parse `element`s separated by `separator`.
  ///
  /// With a `breaker` the loop runs until the breaker is the current token;
  /// the breaker itself is left for the caller. Without one it runs until an
  /// element is not followed by the separator, and `trailing` has no effect.
  pub fn parse_list<T>(
    &mut self,
    separator: &str,
    trailing: Trailing,
    breaker: Option<&str>,
    mut element: impl FnMut(&mut Self) -> CompileResult<T>,
  ) -> CompileResult<Vec<T>> {
    let mut items = Vec::new();

    let Some(breaker) = breaker else {
      loop {
        items.push(element(self)?);
        if !self.equal(separator)? {
          return Ok(items);
        }
      }
    };

    while !self.is(breaker) {
      items.push(element(self)?);

      if self.is(separator) {
        let separator_token = self.advance()?;
        ensure!(
          trailing != Trailing::Forbidden || !self.is(breaker),
          SyntaxSnafu {
            position: separator_token.position,
            message: format!("trailing \"{separator}\" before \"{breaker}\" is not allowed"),
          }
        );
        continue;
      }

      match trailing {
        Trailing::Required => return Err(self.expected(&format!("\"{separator}\""))),
        Trailing::Optional | Trailing::Forbidden => break,
      }
    }

    Ok(items)
  }

  pub fn parse_translation_unit(&mut self) -> CompileResult<TranslationUnit<'src>> {
    let mut unit = TranslationUnit::default();
    while !self.is_eof() {
      if self.is("class") {
        unit.classes.push(self.parse_class()?);
      } else {
        let return_type = self.parse_type()?;
        unit.functions.push(self.parse_function(return_type)?);
      }
    }
    Ok(unit)
  }

  fn parse_type(&mut self) -> CompileResult<Type<'src>> {
    let token = self.current;
    let is_type_name = token.kind == TokenKind::Ident
      || (token.kind == TokenKind::Keyword && is_primitive_keyword(token.text));
    if !is_type_name {
      return Err(self.expected("a type"));
    }
    self.advance()?;
    self.parse_pointer_suffix(token.text, token.position)
  }

  fn parse_pointer_suffix(
    &mut self,
    name: &'src str,
    position: Position,
  ) -> CompileResult<Type<'src>> {
    let mut depth = 0;
    while self.equal("*")? {
      depth += 1;
    }
    Ok(Type::new(name, depth, position))
  }

  fn parse_function(&mut self, return_type: Type<'src>) -> CompileResult<Function<'src>> {
    let (name, position) = self.get_ident()?;
    self.parse_function_rest(return_type, name, position)
  }

  fn parse_function_rest(
    &mut self,
    return_type: Type<'src>,
    name: &'src str,
    position: Position,
  ) -> CompileResult<Function<'src>> {
    self.skip("(")?;
    let parameters = self.parse_list(",", Trailing::Forbidden, Some(")"), |s| {
      let ty = s.parse_type()?;
      let position = s.peek().position;
      let name = if s.peek().kind == TokenKind::Ident {
        Some(s.get_ident()?.0)
      } else {
        None
      };
      Ok(FunctionParameter::new(ty, name, position))
    })?;
    self.skip(")")?;
    let body = self.parse_block()?;

    Ok(Function::new(
      return_type,
      name,
      position,
      FunctionParameterList { parameters },
      body,
    ))
  }

  fn parse_block(&mut self) -> CompileResult<InstructionList<'src>> {
    self.skip("{")?;
    let instructions =
      self.parse_list(";", Trailing::Required, Some("}"), Self::parse_statement)?;
    self.skip("}")?;
    Ok(InstructionList { instructions })
  }

  fn parse_statement(&mut self) -> CompileResult<Instruction<'src>> {
    if self.is("return") {
      let position = self.advance()?.position;
      let expression = self.parse_expression()?;
      return Ok(Instruction::Return(ReturnStatement {
        expression,
        position,
      }));
    }

    if self.is("asm") {
      return Ok(Instruction::InlineAsm(self.parse_inline_asm()?));
    }

    if self.is("{") {
      return Ok(Instruction::Block(self.parse_block()?));
    }

    // Only a primitive keyword starts a declaration. An identifier could
    // equally start an expression or a class-typed declaration.
    if self.current.kind == TokenKind::Keyword && is_primitive_keyword(self.current.text) {
      let ty = self.parse_type()?;
      let (name, position) = self.get_ident()?;
      let initializer = if self.equal("=")? {
        Some(self.parse_expression()?)
      } else {
        None
      };
      return Ok(Instruction::Declaration(Declaration {
        ty,
        variable: Variable::new(name, position),
        initializer,
      }));
    }

    Err(self.expected("a statement"))
  }

  fn parse_inline_asm(&mut self) -> CompileResult<InlineAsmStatement<'src>> {
    self.skip("asm")?;
    self.skip("(")?;
    let body = self.parse_string_literal()?;
    let bindings = if self.equal(":")? {
      self.parse_list(",", Trailing::Optional, Some(")"), Self::parse_binding)?
    } else {
      Vec::new()
    };
    self.skip(")")?;
    Ok(InlineAsmStatement { body, bindings })
  }

  fn parse_binding(&mut self) -> CompileResult<BindingRequest<'src>> {
    let position = self.current.position;
    self.equal("=")?;
    let literal = self.parse_string_literal()?;
    let Some(register_name) = literal.content.strip_prefix('=') else {
      return SyntaxSnafu {
        position: literal.position,
        message: format!(
          "register binding \"{}\" must start with '='",
          literal.content
        ),
      }
      .fail();
    };
    let register_name = register_name.to_string();

    self.skip("(")?;
    let (name, variable_position) = self.get_ident()?;
    self.skip(")")?;
    Ok(BindingRequest::new(
      register_name,
      Variable::new(name, variable_position),
      position,
    ))
  }

  /// Adjacent string tokens concatenate; escapes are replaced here.
  fn parse_string_literal(&mut self) -> CompileResult<StringLiteral> {
    if self.current.kind != TokenKind::Str {
      return Err(self.expected("a string literal"));
    }
    let position = self.current.position;
    let mut content = String::new();
    while self.current.kind == TokenKind::Str {
      let token = self.advance()?;
      unescape_into(&mut content, token.text, token.position)?;
    }
    Ok(StringLiteral { content, position })
  }

  fn parse_expression(&mut self) -> CompileResult<Expression<'src>> {
    if self.current.kind == TokenKind::Num {
      return Ok(Expression::Number(self.get_number()?));
    }
    if self.current.kind != TokenKind::Ident {
      return Err(self.expected("an expression"));
    }

    let (name, position) = self.get_ident()?;
    if self.is("(") {
      let arguments = self.parse_arguments()?;
      return Ok(Expression::Call(FunctionCall::new(
        None, name, position, arguments,
      )));
    }

    if self.equal("->")? {
      let object = Variable::new(name, position);
      let (member, member_position) = self.get_ident()?;
      if self.is("(") {
        let arguments = self.parse_arguments()?;
        return Ok(Expression::Call(FunctionCall::new(
          Some(object),
          member,
          member_position,
          arguments,
        )));
      }
      return Ok(Expression::Member(MemberAccess::new(
        object,
        member,
        member_position,
      )));
    }

    Ok(Expression::Variable(Variable::new(name, position)))
  }

  fn parse_arguments(&mut self) -> CompileResult<Vec<Expression<'src>>> {
    self.skip("(")?;
    let arguments = self.parse_list(",", Trailing::Forbidden, Some(")"), Self::parse_expression)?;
    self.skip(")")?;
    Ok(arguments)
  }

  fn parse_class(&mut self) -> CompileResult<Class<'src>> {
    self.skip("class")?;
    let (class_name, class_position) = self.get_ident()?;
    self.skip("{")?;

    let mut attributes = Vec::new();
    let mut methods = Vec::new();
    let mut visibility = Visibility::Private;

    while !self.is("}") {
      if let Some(level) = self.access_label() {
        self.advance()?;
        self.skip(":")?;
        visibility = level;
        continue;
      }

      // The class name starts either a constructor or a self-typed member.
      let ty = if self.current.kind == TokenKind::Ident && self.current.text == class_name {
        let token = self.advance()?;
        if self.is("(") {
          let void = Type::new("void", 0, token.position);
          let function = self.parse_function_rest(void, class_name, token.position)?;
          methods.push((
            Method {
              function,
              is_constructor: true,
            },
            visibility,
          ));
          continue;
        }
        self.parse_pointer_suffix(token.text, token.position)?
      } else {
        self.parse_type()?
      };

      let (name, position) = self.get_ident()?;
      if self.is("(") {
        let function = self.parse_function_rest(ty, name, position)?;
        methods.push((
          Method {
            function,
            is_constructor: false,
          },
          visibility,
        ));
      } else {
        self.skip(";")?;
        attributes.push((Attribute::new(ty, name, position), visibility));
      }
    }

    self.skip("}")?;
    self.skip(";")?;
    Ok(Class::new(class_name, class_position, attributes, methods))
  }

  fn access_label(&self) -> Option<Visibility> {
    if self.current.kind != TokenKind::Keyword {
      return None;
    }
    match self.current.text {
      "public" => Some(Visibility::Public),
      "protected" => Some(Visibility::Protected),
      "private" => Some(Visibility::Private),
      _ => None,
    }
  }
}

fn unescape_into(out: &mut String, raw: &str, position: Position) -> CompileResult<()> {
  let mut chars = raw.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    let replaced = match chars.next() {
      Some('n') => '\n',
      Some('t') => '\t',
      Some('r') => '\r',
      Some('0') => '\0',
      Some('\\') => '\\',
      Some('"') => '"',
      other => {
        return SyntaxSnafu {
          position,
          message: format!(
            "unknown escape sequence \"\\{}\"",
            other.map(String::from).unwrap_or_default()
          ),
        }
        .fail();
      }
    };
    out.push(replaced);
  }
  Ok(())
}
