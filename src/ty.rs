//! Type descriptions produced by decoration.
//!
//! A [`TypeDescription`] is owned by the symbol arena; AST `Type` nodes point
//! at it through a [`ResolvedType`], which adds the pointer depth written at
//! the use site.

use crate::scope::{FunctionId, SymbolTable, TypeId, VarId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
  Void,
  Integer { size: u32 },
  Class(ClassLayout),
}

/// Members of a class, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassLayout {
  pub fields: Vec<VarId>,
  pub methods: Vec<FunctionId>,
  pub size: u32,
  pub align: u32,
  /// False while the class's own members are being decorated.
  pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescription<'src> {
  pub name: &'src str,
  pub kind: TypeKind,
}

impl TypeDescription<'_> {
  pub fn size(&self) -> u32 {
    match &self.kind {
      TypeKind::Void => 0,
      TypeKind::Integer { size } => *size,
      TypeKind::Class(layout) => layout.size,
    }
  }

  pub fn align(&self) -> u32 {
    match &self.kind {
      TypeKind::Void => 1,
      TypeKind::Integer { size } => *size,
      TypeKind::Class(layout) => layout.align.max(1),
    }
  }

  pub fn class_layout(&self) -> Option<&ClassLayout> {
    match &self.kind {
      TypeKind::Class(layout) => Some(layout),
      _ => None,
    }
  }
}

/// Built-in types registered in the root scope.
pub fn primitive(name: &'static str) -> Option<TypeDescription<'static>> {
  let kind = match name {
    "void" => TypeKind::Void,
    "bool" | "char" => TypeKind::Integer { size: 1 },
    "short" => TypeKind::Integer { size: 2 },
    "int" => TypeKind::Integer { size: 4 },
    "long" => TypeKind::Integer { size: 8 },
    _ => return None,
  };
  Some(TypeDescription { name, kind })
}

/// A base type plus the number of `*` applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvedType {
  pub base: TypeId,
  pub pointer_depth: u32,
}

impl ResolvedType {
  pub fn new(base: TypeId, pointer_depth: u32) -> Self {
    Self {
      base,
      pointer_depth,
    }
  }

  pub fn is_pointer(self) -> bool {
    self.pointer_depth > 0
  }

  pub fn size(self, symbols: &SymbolTable<'_>) -> u32 {
    if self.is_pointer() {
      8
    } else {
      symbols.ty(self.base).size()
    }
  }

  pub fn align(self, symbols: &SymbolTable<'_>) -> u32 {
    if self.is_pointer() {
      8
    } else {
      symbols.ty(self.base).align()
    }
  }

  pub fn is_void(self, symbols: &SymbolTable<'_>) -> bool {
    !self.is_pointer() && matches!(symbols.ty(self.base).kind, TypeKind::Void)
  }

  pub fn is_integer(self, symbols: &SymbolTable<'_>) -> bool {
    !self.is_pointer() && matches!(symbols.ty(self.base).kind, TypeKind::Integer { .. })
  }

  /// Values that fit a general purpose register.
  pub fn is_scalar(self, symbols: &SymbolTable<'_>) -> bool {
    self.is_pointer() || self.is_integer(symbols)
  }

  /// The class this is a single pointer to, if any.
  pub fn pointee_class(self) -> Option<TypeId> {
    (self.pointer_depth == 1).then_some(self.base)
  }

  pub fn full_name(self, symbols: &SymbolTable<'_>) -> String {
    format!(
      "{}{}",
      symbols.ty(self.base).name,
      "*".repeat(self.pointer_depth as usize)
    )
  }
}

/// Static type of an expression after decoration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
  /// An integer literal; fits a pointer or an integer wide enough for it.
  Literal(i64),
  Typed(ResolvedType),
}

impl ValueType {
  pub fn assignable_to(self, target: ResolvedType, symbols: &SymbolTable<'_>) -> bool {
    match self {
      ValueType::Literal(_) if target.is_pointer() => true,
      ValueType::Literal(value) => {
        target.is_integer(symbols) && literal_fits(value, target.size(symbols))
      }
      ValueType::Typed(value) if value.is_integer(symbols) => target.is_integer(symbols),
      ValueType::Typed(value) if value.is_pointer() => value == target,
      ValueType::Typed(_) => false,
    }
  }

  pub fn describe(self, symbols: &SymbolTable<'_>) -> String {
    match self {
      ValueType::Literal(value) => format!("integer literal {value}"),
      ValueType::Typed(ty) => ty.full_name(symbols),
    }
  }
}

/// Whether `value` survives a store into `size` signed bytes.
fn literal_fits(value: i64, size: u32) -> bool {
  if size >= 8 {
    return true;
  }
  let half = 1i64 << (8 * size - 1);
  (-half..half).contains(&value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scope::ScopeStack;

  #[test]
  fn primitive_sizes() {
    assert_eq!(primitive("int").map(|t| t.size()), Some(4));
    assert_eq!(primitive("char").map(|t| t.size()), Some(1));
    assert_eq!(primitive("void").map(|t| t.size()), Some(0));
    assert!(primitive("float").is_none());
  }

  #[test]
  fn pointers_are_eight_bytes_and_named_with_stars() {
    let scopes = ScopeStack::new();
    let char_id = scopes.lookup_type("char").unwrap();
    let ptr = ResolvedType::new(char_id, 2);
    assert_eq!(ptr.size(scopes.symbols()), 8);
    assert_eq!(ptr.full_name(scopes.symbols()), "char**");
  }

  #[test]
  fn assignability_rules() {
    let scopes = ScopeStack::new();
    let symbols = scopes.symbols();
    let int = ResolvedType::new(scopes.lookup_type("int").unwrap(), 0);
    let long = ResolvedType::new(scopes.lookup_type("long").unwrap(), 0);
    let int_ptr = ResolvedType::new(int.base, 1);
    let void = ResolvedType::new(scopes.lookup_type("void").unwrap(), 0);

    assert!(ValueType::Literal(0).assignable_to(int_ptr, symbols));
    assert!(ValueType::Typed(long).assignable_to(int, symbols));
    assert!(ValueType::Typed(int_ptr).assignable_to(int_ptr, symbols));
    assert!(!ValueType::Typed(int_ptr).assignable_to(long, symbols));
    assert!(!ValueType::Typed(int).assignable_to(int_ptr, symbols));
    assert!(!ValueType::Literal(0).assignable_to(void, symbols));
  }

  #[test]
  fn literals_must_fit_their_integer_slot() {
    let scopes = ScopeStack::new();
    let symbols = scopes.symbols();
    let char = ResolvedType::new(scopes.lookup_type("char").unwrap(), 0);
    let int = ResolvedType::new(scopes.lookup_type("int").unwrap(), 0);
    let long = ResolvedType::new(scopes.lookup_type("long").unwrap(), 0);

    assert!(ValueType::Literal(127).assignable_to(char, symbols));
    assert!(!ValueType::Literal(300).assignable_to(char, symbols));
    assert!(ValueType::Literal(2147483647).assignable_to(int, symbols));
    assert!(!ValueType::Literal(5000000000).assignable_to(int, symbols));
    assert!(ValueType::Literal(5000000000).assignable_to(long, symbols));
  }
}
