//! Symbol tables for decoration.
//!
//! Description records live in a [`SymbolTable`] arena and are addressed by
//! typed ids. The [`ScopeStack`] only holds the name maps of the lexical
//! scopes currently open; popping a scope forgets its names but never frees
//! its records, because AST nodes keep ids into the arena until code
//! generation has finished.

use std::collections::HashMap;

use snafu::ensure;

use crate::ast::Visibility;
use crate::error::{
  AccessViolationSnafu, CompileResult, DuplicateDeclarationSnafu, Position, internal_error,
};
use crate::register::Gpr;
use crate::ty::{ClassLayout, ResolvedType, TypeDescription, TypeKind, primitive};
use crate::tokenizer::PRIMITIVE_KEYWORDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(usize);

/// Canonical home of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
  /// Offset from `rbp`; negative for locals, positive for stack-passed
  /// parameters.
  Stack { offset: i32 },
  /// Offset inside an instance of the owning class.
  Field { offset: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescription<'src> {
  pub name: &'src str,
  pub ty: ResolvedType,
  pub storage: Storage,
  /// Declaring class, for attributes.
  pub owner: Option<TypeId>,
  pub visibility: Visibility,
  pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescription<'src> {
  pub name: &'src str,
  pub label: String,
  pub return_type: ResolvedType,
  /// Declared parameters, without the implicit receiver.
  pub parameters: Vec<ResolvedType>,
  /// Class of the implicit `this` receiver, for methods.
  pub receiver: Option<TypeId>,
  pub visibility: Visibility,
  pub position: Position,
  /// Bytes of local storage below `rbp`.
  pub frame_size: u32,
  /// Callee-saved registers written by inline assembly in the body.
  pub saved_registers: Vec<Gpr>,
  pub this: Option<VarId>,
}

/// Arena owning every description record created during decoration.
#[derive(Debug, Default)]
pub struct SymbolTable<'src> {
  types: Vec<TypeDescription<'src>>,
  variables: Vec<VariableDescription<'src>>,
  functions: Vec<FunctionDescription<'src>>,
}

impl<'src> SymbolTable<'src> {
  pub fn ty(&self, id: TypeId) -> &TypeDescription<'src> {
    self
      .types
      .get(id.0)
      .unwrap_or_else(|| internal_error(format!("dangling {id:?}")))
  }

  pub fn ty_mut(&mut self, id: TypeId) -> &mut TypeDescription<'src> {
    self
      .types
      .get_mut(id.0)
      .unwrap_or_else(|| internal_error(format!("dangling {id:?}")))
  }

  pub fn variable(&self, id: VarId) -> &VariableDescription<'src> {
    self
      .variables
      .get(id.0)
      .unwrap_or_else(|| internal_error(format!("dangling {id:?}")))
  }

  pub fn function(&self, id: FunctionId) -> &FunctionDescription<'src> {
    self
      .functions
      .get(id.0)
      .unwrap_or_else(|| internal_error(format!("dangling {id:?}")))
  }

  pub fn function_mut(&mut self, id: FunctionId) -> &mut FunctionDescription<'src> {
    self
      .functions
      .get_mut(id.0)
      .unwrap_or_else(|| internal_error(format!("dangling {id:?}")))
  }

  pub fn class_layout(&self, id: TypeId) -> Option<&ClassLayout> {
    self.ty(id).class_layout()
  }

  pub fn field(&self, class: TypeId, name: &str) -> Option<VarId> {
    self
      .class_layout(class)?
      .fields
      .iter()
      .copied()
      .find(|&field| self.variable(field).name == name)
  }

  pub fn method(&self, class: TypeId, name: &str) -> Option<FunctionId> {
    self
      .class_layout(class)?
      .methods
      .iter()
      .copied()
      .find(|&method| self.function(method).name == name)
  }

  fn add_type(&mut self, description: TypeDescription<'src>) -> TypeId {
    self.types.push(description);
    TypeId(self.types.len() - 1)
  }

  fn add_variable(&mut self, description: VariableDescription<'src>) -> VarId {
    self.variables.push(description);
    VarId(self.variables.len() - 1)
  }

  fn add_function(&mut self, description: FunctionDescription<'src>) -> FunctionId {
    self.functions.push(description);
    FunctionId(self.functions.len() - 1)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
  Root,
  Class(TypeId),
  Function(FunctionId),
  Block,
}

/// Names visible in one lexical scope.
#[derive(Debug)]
pub struct Scope<'src> {
  pub kind: ScopeKind,
  types: HashMap<&'src str, TypeId>,
  variables: HashMap<&'src str, VarId>,
  functions: HashMap<&'src str, FunctionId>,
}

impl<'src> Scope<'src> {
  fn new(kind: ScopeKind) -> Self {
    Self {
      kind,
      types: HashMap::new(),
      variables: HashMap::new(),
      functions: HashMap::new(),
    }
  }

  fn declares(&self, name: &str) -> bool {
    self.types.contains_key(name)
      || self.variables.contains_key(name)
      || self.functions.contains_key(name)
  }
}

#[derive(Debug)]
struct Frame {
  function: FunctionId,
  size: u32,
}

#[derive(Debug)]
pub struct ScopeStack<'src> {
  symbols: SymbolTable<'src>,
  scopes: Vec<Scope<'src>>,
  frame: Option<Frame>,
}

impl Default for ScopeStack<'_> {
  fn default() -> Self {
    Self::new()
  }
}

impl<'src> ScopeStack<'src> {
  /// A stack holding only the root scope, with the primitive types declared.
  pub fn new() -> Self {
    let mut symbols = SymbolTable::default();
    let mut root = Scope::new(ScopeKind::Root);
    for name in PRIMITIVE_KEYWORDS {
      let Some(description) = primitive(name) else {
        internal_error(format!("primitive `{name}` has no description"));
      };
      root.types.insert(name, symbols.add_type(description));
    }

    Self {
      symbols,
      scopes: vec![root],
      frame: None,
    }
  }

  pub fn symbols(&self) -> &SymbolTable<'src> {
    &self.symbols
  }

  pub fn symbols_mut(&mut self) -> &mut SymbolTable<'src> {
    &mut self.symbols
  }

  /// Give up the name maps and keep the records for code generation.
  pub fn into_symbols(self) -> SymbolTable<'src> {
    self.symbols
  }

  pub fn push(&mut self, kind: ScopeKind) {
    if let ScopeKind::Function(function) = kind {
      if self.frame.is_some() {
        internal_error("nested function frames");
      }
      self.frame = Some(Frame { function, size: 0 });
    }
    self.scopes.push(Scope::new(kind));
  }

  /// Push a member scope for an already decorated class, binding its
  /// attributes and methods again without creating new records.
  pub fn reopen_class(&mut self, class: TypeId) {
    let Some(layout) = self.symbols.class_layout(class) else {
      internal_error(format!("{class:?} is not a class"));
    };
    let mut scope = Scope::new(ScopeKind::Class(class));
    for &field in &layout.fields {
      scope.variables.insert(self.symbols.variable(field).name, field);
    }
    for &method in &layout.methods {
      scope.functions.insert(self.symbols.function(method).name, method);
    }
    self.scopes.push(scope);
  }

  pub fn pop(&mut self) {
    let Some(scope) = self.scopes.pop() else {
      internal_error("popped an empty scope stack");
    };
    if scope.kind == ScopeKind::Root {
      internal_error("popped the root scope");
    }
    if let ScopeKind::Function(function) = scope.kind
      && let Some(frame) = self.frame.take()
    {
      self.symbols.function_mut(function).frame_size = frame.size.next_multiple_of(16);
    }
  }

  fn current(&mut self) -> &mut Scope<'src> {
    match self.scopes.last_mut() {
      Some(scope) => scope,
      None => internal_error("scope stack is empty"),
    }
  }

  fn ensure_fresh(&self, name: &'src str, position: Position) -> CompileResult<()> {
    let taken = self.scopes.last().is_some_and(|scope| scope.declares(name));
    ensure!(!taken, DuplicateDeclarationSnafu { position, name });
    Ok(())
  }

  pub fn current_function(&self) -> Option<FunctionId> {
    self.frame.as_ref().map(|frame| frame.function)
  }

  /// The class whose member scope lexically encloses the current scope.
  pub fn enclosing_class(&self) -> Option<TypeId> {
    self.scopes.iter().rev().find_map(|scope| match scope.kind {
      ScopeKind::Class(class) => Some(class),
      _ => None,
    })
  }

  pub fn declare_type(
    &mut self,
    name: &'src str,
    position: Position,
    kind: TypeKind,
  ) -> CompileResult<TypeId> {
    self.ensure_fresh(name, position)?;
    let id = self.symbols.add_type(TypeDescription { name, kind });
    self.current().types.insert(name, id);
    Ok(id)
  }

  pub fn lookup_type(&self, name: &str) -> Option<TypeId> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.types.get(name).copied())
  }

  pub fn declare_variable(
    &mut self,
    description: VariableDescription<'src>,
  ) -> CompileResult<VarId> {
    self.ensure_fresh(description.name, description.position)?;
    let name = description.name;
    let id = self.symbols.add_variable(description);
    self.current().variables.insert(name, id);
    Ok(id)
  }

  /// Declare a function-local variable and give it a fresh frame slot.
  pub fn declare_local(
    &mut self,
    name: &'src str,
    position: Position,
    ty: ResolvedType,
  ) -> CompileResult<VarId> {
    self.ensure_fresh(name, position)?;
    let offset = self.allocate_slot(ty);
    self.declare_variable(VariableDescription {
      name,
      ty,
      storage: Storage::Stack { offset },
      owner: None,
      visibility: Visibility::Public,
      position,
    })
  }

  fn allocate_slot(&mut self, ty: ResolvedType) -> i32 {
    let size = ty.size(&self.symbols).max(1);
    let align = ty.align(&self.symbols).max(1);
    let Some(frame) = self.frame.as_mut() else {
      internal_error("local declared outside a function frame");
    };
    frame.size = (frame.size + size).next_multiple_of(align);
    -(frame.size as i32)
  }

  pub fn lookup_variable(&self, name: &str) -> Option<VarId> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.variables.get(name).copied())
  }

  pub fn declare_function(
    &mut self,
    description: FunctionDescription<'src>,
  ) -> CompileResult<FunctionId> {
    self.ensure_fresh(description.name, description.position)?;
    let clash = self
      .symbols
      .functions
      .iter()
      .any(|function| function.label == description.label);
    ensure!(
      !clash,
      DuplicateDeclarationSnafu {
        position: description.position,
        name: description.label.as_str(),
      }
    );
    let name = description.name;
    let id = self.symbols.add_function(description);
    self.current().functions.insert(name, id);
    Ok(id)
  }

  pub fn lookup_function(&self, name: &str) -> Option<FunctionId> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.functions.get(name).copied())
  }

  /// Protected and private members are only reachable from inside the
  /// declaring class. No inheritance exists, so protected behaves as private.
  pub fn check_access(
    &self,
    owner: TypeId,
    member: &str,
    visibility: Visibility,
    position: Position,
  ) -> CompileResult<()> {
    let allowed = match visibility {
      Visibility::Public => true,
      Visibility::Protected | Visibility::Private => self.enclosing_class() == Some(owner),
    };
    ensure!(
      allowed,
      AccessViolationSnafu {
        position,
        member,
        class: self.symbols.ty(owner).name,
        visibility: visibility.to_string(),
      }
    );
    Ok(())
  }

  /// Remember that the current function's inline assembly writes `gpr`.
  pub fn record_written_register(&mut self, gpr: Gpr) {
    if !gpr.is_callee_saved() {
      return;
    }
    let Some(function) = self.current_function() else {
      internal_error("inline assembly outside a function");
    };
    let saved = &mut self.symbols.function_mut(function).saved_registers;
    if !saved.contains(&gpr) {
      saved.push(gpr);
      saved.sort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn int(scopes: &ScopeStack<'_>) -> ResolvedType {
    ResolvedType::new(scopes.lookup_type("int").unwrap(), 0)
  }

  fn function<'a>(scopes: &mut ScopeStack<'a>, name: &'a str) -> FunctionId {
    let return_type = int(scopes);
    scopes
      .declare_function(FunctionDescription {
        name,
        label: name.to_string(),
        return_type,
        parameters: vec![],
        receiver: None,
        visibility: Visibility::Public,
        position: Position::default(),
        frame_size: 0,
        saved_registers: vec![],
        this: None,
      })
      .unwrap()
  }

  #[test]
  fn primitives_live_in_the_root() {
    let scopes = ScopeStack::new();
    for name in PRIMITIVE_KEYWORDS {
      assert!(scopes.lookup_type(name).is_some(), "{name}");
    }
    assert!(scopes.lookup_type("A").is_none());
  }

  #[test]
  fn inner_declarations_shadow_until_popped() {
    let mut scopes = ScopeStack::new();
    let f = function(&mut scopes, "f");
    scopes.push(ScopeKind::Function(f));
    let ty = int(&scopes);
    let outer = scopes.declare_local("x", Position::default(), ty).unwrap();

    scopes.push(ScopeKind::Block);
    let inner = scopes.declare_local("x", Position::default(), ty).unwrap();
    assert_ne!(outer, inner);
    assert_eq!(scopes.lookup_variable("x"), Some(inner));
    scopes.pop();

    assert_eq!(scopes.lookup_variable("x"), Some(outer));
    scopes.pop();
    assert_eq!(scopes.lookup_variable("x"), None);
    // Records outlive their scope.
    assert_eq!(scopes.symbols().variable(inner).name, "x");
  }

  #[test]
  fn duplicates_in_one_scope_are_rejected() {
    let mut scopes = ScopeStack::new();
    let f = function(&mut scopes, "f");
    scopes.push(ScopeKind::Function(f));
    let ty = int(&scopes);
    scopes.declare_local("x", Position::default(), ty).unwrap();
    let err = scopes
      .declare_local("x", Position::new(7, 1, 8), ty)
      .unwrap_err();
    assert!(matches!(
      err,
      crate::error::CompileError::DuplicateDeclaration { ref name, .. } if name == "x"
    ));
  }

  #[test]
  fn frame_slots_are_aligned_and_rounded() {
    let mut scopes = ScopeStack::new();
    let f = function(&mut scopes, "f");
    scopes.push(ScopeKind::Function(f));
    let char_ty = ResolvedType::new(scopes.lookup_type("char").unwrap(), 0);
    let long_ty = ResolvedType::new(scopes.lookup_type("long").unwrap(), 0);
    let c = scopes.declare_local("c", Position::default(), char_ty).unwrap();
    let l = scopes.declare_local("l", Position::default(), long_ty).unwrap();
    assert_eq!(scopes.symbols().variable(c).storage, Storage::Stack { offset: -1 });
    assert_eq!(scopes.symbols().variable(l).storage, Storage::Stack { offset: -16 });
    scopes.pop();
    assert_eq!(scopes.symbols().function(f).frame_size, 16);
  }

  #[test]
  fn private_members_are_visible_only_inside_their_class() {
    let mut scopes = ScopeStack::new();
    let class = scopes
      .declare_type("A", Position::default(), TypeKind::Class(ClassLayout::default()))
      .unwrap();
    let err = scopes
      .check_access(class, "x", Visibility::Private, Position::default())
      .unwrap_err();
    assert!(matches!(err, crate::error::CompileError::AccessViolation { .. }));
    assert!(
      scopes
        .check_access(class, "x", Visibility::Public, Position::default())
        .is_ok()
    );

    scopes.push(ScopeKind::Class(class));
    assert!(
      scopes
        .check_access(class, "x", Visibility::Protected, Position::default())
        .is_ok()
    );
  }
}
