//! Abstract syntax tree.
//!
//! Nodes are built once by the parser and borrow names from the source
//! buffer. Nodes that name something carry a description slot that
//! decoration fills with an id into the [`SymbolTable`](crate::scope::SymbolTable);
//! reading a slot before decoration is a compiler bug and aborts.
//!
//! `decorate` lives in [`crate::decorate`], `emit` and
//! `load_value_in_register` in [`crate::codegen`].

use std::fmt;

use crate::error::{Position, internal_error};
use crate::register::Register;
use crate::scope::{FunctionId, TypeId, VarId};
use crate::ty::ResolvedType;

fn slot<T: Copy>(slot: Option<T>, node: &str, name: &str) -> T {
  match slot {
    Some(value) => value,
    None => internal_error(format!("{node} `{name}` read before decoration")),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Public,
  Protected,
  Private,
}

impl fmt::Display for Visibility {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Visibility::Public => "public",
      Visibility::Protected => "protected",
      Visibility::Private => "private",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type<'src> {
  pub name: &'src str,
  pub pointer_depth: u32,
  pub position: Position,
  description: Option<ResolvedType>,
}

impl<'src> Type<'src> {
  pub fn new(name: &'src str, pointer_depth: u32, position: Position) -> Self {
    Self {
      name,
      pointer_depth,
      position,
      description: None,
    }
  }

  pub fn full_name(&self) -> String {
    format!("{}{}", self.name, "*".repeat(self.pointer_depth as usize))
  }

  pub fn type_description(&self) -> ResolvedType {
    slot(self.description, "type", self.name)
  }

  pub(crate) fn set_description(&mut self, description: ResolvedType) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable<'src> {
  pub name: &'src str,
  pub position: Position,
  description: Option<VarId>,
}

impl<'src> Variable<'src> {
  pub fn new(name: &'src str, position: Position) -> Self {
    Self {
      name,
      position,
      description: None,
    }
  }

  pub fn variable_description(&self) -> VarId {
    slot(self.description, "variable", self.name)
  }

  pub(crate) fn set_description(&mut self, description: VarId) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberLiteral {
  pub value: i64,
  pub position: Position,
}

/// Concatenated, escape-processed string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLiteral {
  pub content: String,
  pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression<'src> {
  Number(NumberLiteral),
  Variable(Variable<'src>),
  Call(FunctionCall<'src>),
  Member(MemberAccess<'src>),
}

impl Expression<'_> {
  pub fn position(&self) -> Position {
    match self {
      Expression::Number(literal) => literal.position,
      Expression::Variable(variable) => variable.position,
      Expression::Call(call) => call.position,
      Expression::Member(access) => access.position,
    }
  }

  pub fn contains_call(&self) -> bool {
    match self {
      Expression::Call(_) => true,
      Expression::Number(_) | Expression::Variable(_) | Expression::Member(_) => false,
    }
  }
}

/// `name(args)`, or `object->name(args)` when `receiver` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall<'src> {
  pub receiver: Option<Variable<'src>>,
  pub name: &'src str,
  pub position: Position,
  pub arguments: Vec<Expression<'src>>,
  description: Option<FunctionId>,
}

impl<'src> FunctionCall<'src> {
  pub fn new(
    receiver: Option<Variable<'src>>,
    name: &'src str,
    position: Position,
    arguments: Vec<Expression<'src>>,
  ) -> Self {
    Self {
      receiver,
      name,
      position,
      arguments,
      description: None,
    }
  }

  pub fn function_description(&self) -> FunctionId {
    slot(self.description, "function", self.name)
  }

  pub(crate) fn set_description(&mut self, description: FunctionId) {
    self.description = Some(description);
  }
}

/// `object->member`, where `object` is a pointer to a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAccess<'src> {
  pub object: Variable<'src>,
  pub member: &'src str,
  pub position: Position,
  description: Option<VarId>,
}

impl<'src> MemberAccess<'src> {
  pub fn new(object: Variable<'src>, member: &'src str, position: Position) -> Self {
    Self {
      object,
      member,
      position,
      description: None,
    }
  }

  pub fn field_description(&self) -> VarId {
    slot(self.description, "member", self.member)
  }

  pub(crate) fn set_description(&mut self, description: VarId) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'src> {
  pub ty: Type<'src>,
  pub variable: Variable<'src>,
  pub initializer: Option<Expression<'src>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnStatement<'src> {
  pub expression: Expression<'src>,
  pub position: Position,
}

/// `"=reg"(variable)`: load `variable` into `reg` before the raw text runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest<'src> {
  pub register_name: String,
  pub variable: Variable<'src>,
  pub position: Position,
  register: Option<Register>,
}

impl<'src> BindingRequest<'src> {
  pub fn new(register_name: String, variable: Variable<'src>, position: Position) -> Self {
    Self {
      register_name,
      variable,
      position,
      register: None,
    }
  }

  pub fn register(&self) -> Register {
    slot(self.register, "binding", &self.register_name)
  }

  pub(crate) fn set_register(&mut self, register: Register) {
    self.register = Some(register);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAsmStatement<'src> {
  pub body: StringLiteral,
  pub bindings: Vec<BindingRequest<'src>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction<'src> {
  Return(ReturnStatement<'src>),
  InlineAsm(InlineAsmStatement<'src>),
  Declaration(Declaration<'src>),
  Block(InstructionList<'src>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstructionList<'src> {
  pub instructions: Vec<Instruction<'src>>,
}

impl InstructionList<'_> {
  pub fn ends_with_return(&self) -> bool {
    matches!(self.instructions.last(), Some(Instruction::Return(_)))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionParameter<'src> {
  pub ty: Type<'src>,
  pub name: Option<&'src str>,
  pub position: Position,
  description: Option<VarId>,
}

impl<'src> FunctionParameter<'src> {
  pub fn new(ty: Type<'src>, name: Option<&'src str>, position: Position) -> Self {
    Self {
      ty,
      name,
      position,
      description: None,
    }
  }

  /// `None` for unnamed parameters, which get no storage.
  pub fn variable_description(&self) -> Option<VarId> {
    self.description
  }

  pub(crate) fn set_description(&mut self, description: VarId) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionParameterList<'src> {
  pub parameters: Vec<FunctionParameter<'src>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'src> {
  pub ty: Type<'src>,
  pub name: &'src str,
  pub position: Position,
  description: Option<VarId>,
}

impl<'src> Attribute<'src> {
  pub fn new(ty: Type<'src>, name: &'src str, position: Position) -> Self {
    Self {
      ty,
      name,
      position,
      description: None,
    }
  }

  pub fn variable_description(&self) -> VarId {
    slot(self.description, "attribute", self.name)
  }

  pub(crate) fn set_description(&mut self, description: VarId) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function<'src> {
  pub return_type: Type<'src>,
  pub name: &'src str,
  pub position: Position,
  pub parameters: FunctionParameterList<'src>,
  pub body: InstructionList<'src>,
  description: Option<FunctionId>,
}

impl<'src> Function<'src> {
  pub fn new(
    return_type: Type<'src>,
    name: &'src str,
    position: Position,
    parameters: FunctionParameterList<'src>,
    body: InstructionList<'src>,
  ) -> Self {
    Self {
      return_type,
      name,
      position,
      parameters,
      body,
      description: None,
    }
  }

  pub fn function_description(&self) -> FunctionId {
    slot(self.description, "function", self.name)
  }

  pub(crate) fn set_description(&mut self, description: FunctionId) {
    self.description = Some(description);
  }

  pub(crate) fn description_slot(&self) -> Option<FunctionId> {
    self.description
  }
}

/// A function declared inside a class; it receives `this` implicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method<'src> {
  pub function: Function<'src>,
  pub is_constructor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class<'src> {
  pub name: &'src str,
  pub position: Position,
  pub attributes: Vec<(Attribute<'src>, Visibility)>,
  pub methods: Vec<(Method<'src>, Visibility)>,
  description: Option<TypeId>,
}

impl<'src> Class<'src> {
  pub fn new(
    name: &'src str,
    position: Position,
    attributes: Vec<(Attribute<'src>, Visibility)>,
    methods: Vec<(Method<'src>, Visibility)>,
  ) -> Self {
    Self {
      name,
      position,
      attributes,
      methods,
      description: None,
    }
  }

  pub fn type_description(&self) -> TypeId {
    slot(self.description, "class", self.name)
  }

  pub(crate) fn set_description(&mut self, description: TypeId) {
    self.description = Some(description);
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranslationUnit<'src> {
  pub functions: Vec<Function<'src>>,
  pub classes: Vec<Class<'src>>,
}

impl TranslationUnit<'_> {
  /// Indented, one-node-per-line rendering of the tree.
  pub fn dump(&self) -> String {
    let mut out = Dumper::default();
    out.line("TranslationUnit");
    out.nested(|out| {
      for class in &self.classes {
        dump_class(out, class);
      }
      for function in &self.functions {
        dump_function(out, "Function", function);
      }
    });
    out.text
  }
}

#[derive(Default)]
struct Dumper {
  text: String,
  depth: usize,
}

impl Dumper {
  fn line(&mut self, line: impl AsRef<str>) {
    self.text.push_str(&"  ".repeat(self.depth));
    self.text.push_str(line.as_ref());
    self.text.push('\n');
  }

  fn nested(&mut self, body: impl FnOnce(&mut Self)) {
    self.depth += 1;
    body(self);
    self.depth -= 1;
  }
}

fn dump_class(out: &mut Dumper, class: &Class<'_>) {
  out.line(format!("Class {}", class.name));
  out.nested(|out| {
    for (attribute, visibility) in &class.attributes {
      out.line(format!(
        "Attribute {visibility} {} {}",
        attribute.ty.full_name(),
        attribute.name
      ));
    }
    for (method, visibility) in &class.methods {
      let kind = if method.is_constructor {
        format!("Constructor {visibility}")
      } else {
        format!("Method {visibility}")
      };
      dump_function(out, &kind, &method.function);
    }
  });
}

fn dump_function(out: &mut Dumper, kind: &str, function: &Function<'_>) {
  out.line(format!(
    "{kind} {} {}",
    function.return_type.full_name(),
    function.name
  ));
  out.nested(|out| {
    for parameter in &function.parameters.parameters {
      out.line(format!(
        "Parameter {} {}",
        parameter.ty.full_name(),
        parameter.name.unwrap_or("_")
      ));
    }
    dump_instructions(out, &function.body);
  });
}

fn dump_instructions(out: &mut Dumper, list: &InstructionList<'_>) {
  out.line("InstructionList");
  out.nested(|out| {
    for instruction in &list.instructions {
      match instruction {
        Instruction::Return(statement) => {
          out.line("ReturnStatement");
          out.nested(|out| dump_expression(out, &statement.expression));
        }
        Instruction::InlineAsm(statement) => {
          out.line(format!("InlineAsmStatement {:?}", statement.body.content));
          out.nested(|out| {
            for binding in &statement.bindings {
              out.line(format!(
                "Binding {} <- {}",
                binding.register_name, binding.variable.name
              ));
            }
          });
        }
        Instruction::Declaration(declaration) => {
          out.line(format!(
            "Declaration {} {}",
            declaration.ty.full_name(),
            declaration.variable.name
          ));
          if let Some(initializer) = &declaration.initializer {
            out.nested(|out| dump_expression(out, initializer));
          }
        }
        Instruction::Block(block) => dump_instructions(out, block),
      }
    }
  });
}

fn dump_expression(out: &mut Dumper, expression: &Expression<'_>) {
  match expression {
    Expression::Number(literal) => out.line(format!("NumberLiteral {}", literal.value)),
    Expression::Variable(variable) => out.line(format!("Variable {}", variable.name)),
    Expression::Member(access) => out.line(format!(
      "MemberAccess {}->{}",
      access.object.name, access.member
    )),
    Expression::Call(call) => {
      match &call.receiver {
        Some(receiver) => out.line(format!("FunctionCall {}->{}", receiver.name, call.name)),
        None => out.line(format!("FunctionCall {}", call.name)),
      }
      out.nested(|out| {
        for argument in &call.arguments {
          dump_expression(out, argument);
        }
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_name_appends_stars() {
    let ty = Type::new("char", 2, Position::default());
    assert_eq!(ty.full_name(), "char**");
  }

  #[test]
  #[should_panic(expected = "read before decoration")]
  fn unset_description_is_an_internal_error() {
    Variable::new("x", Position::default()).variable_description();
  }

  #[test]
  fn dump_renders_nested_nodes() {
    let body = InstructionList {
      instructions: vec![Instruction::Return(ReturnStatement {
        expression: Expression::Number(NumberLiteral {
          value: 1,
          position: Position::default(),
        }),
        position: Position::default(),
      })],
    };
    let unit = TranslationUnit {
      functions: vec![Function::new(
        Type::new("int", 0, Position::default()),
        "f",
        Position::default(),
        FunctionParameterList::default(),
        body,
      )],
      classes: vec![],
    };
    assert_eq!(
      unit.dump(),
      "TranslationUnit\n  Function int f\n    InstructionList\n      ReturnStatement\n        NumberLiteral 1\n"
    );
  }
}
