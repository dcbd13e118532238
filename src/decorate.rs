//! Scope and type resolution.
//!
//! One depth-first walk that resolves every name against the [`ScopeStack`],
//! allocates description records and stores their ids in the nodes. Code
//! generation may only start once the whole translation unit is decorated.

use snafu::{OptionExt, ensure};

use crate::ast::{
  Attribute, BindingRequest, Class, Declaration, Expression, Function, FunctionCall,
  InlineAsmStatement, Instruction, InstructionList, MemberAccess, ReturnStatement,
  TranslationUnit, Type, Variable, Visibility,
};
use crate::error::{
  CompileResult, DuplicateRegisterBindingSnafu, Position, ReservedRegisterSnafu, TypeSnafu,
  UndeclaredFunctionSnafu, UndeclaredVariableSnafu, UnknownRegisterSnafu, UnknownTypeSnafu,
  internal_error,
};
use crate::register::{ARGUMENT_REGISTERS, Gpr, Register};
use crate::scope::{
  FunctionDescription, FunctionId, ScopeKind, ScopeStack, Storage, SymbolTable, TypeId,
  VariableDescription,
};
use crate::ty::{ClassLayout, ResolvedType, TypeKind, ValueType};

/// Locals, parameters and return values must fit a register.
fn ensure_scalar(
  ty: ResolvedType,
  symbols: &SymbolTable<'_>,
  position: Position,
  what: &str,
) -> CompileResult<()> {
  ensure!(
    !ty.is_void(symbols),
    TypeSnafu {
      position,
      message: format!("{what} cannot have type void"),
    }
  );
  ensure!(
    ty.is_scalar(symbols),
    TypeSnafu {
      position,
      message: format!(
        "{what} of class type `{}` must be passed by pointer",
        ty.full_name(symbols)
      ),
    }
  );
  Ok(())
}

fn ensure_assignable(
  value: ValueType,
  target: ResolvedType,
  symbols: &SymbolTable<'_>,
  position: Position,
) -> CompileResult<()> {
  ensure!(
    value.assignable_to(target, symbols),
    TypeSnafu {
      position,
      message: format!(
        "cannot use {} as `{}`",
        value.describe(symbols),
        target.full_name(symbols)
      ),
    }
  );
  Ok(())
}

/// The class `ty` points to, for `->` and method calls.
fn pointee_class(
  ty: ResolvedType,
  symbols: &SymbolTable<'_>,
  position: Position,
) -> CompileResult<TypeId> {
  ty.pointee_class()
    .filter(|&class| symbols.class_layout(class).is_some())
    .context(TypeSnafu {
      position,
      message: format!(
        "`->` needs a pointer to a class, found `{}`",
        ty.full_name(symbols)
      ),
    })
}

impl<'src> TranslationUnit<'src> {
  /// Class names first, then class members and every signature, then bodies,
  /// so that types and functions may be used before their definition.
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    for class in &mut self.classes {
      class.declare(scopes)?;
    }
    for class in &mut self.classes {
      class.decorate_members(scopes)?;
    }
    for function in &mut self.functions {
      function.declare(scopes, None, Visibility::Public)?;
    }
    for class in &mut self.classes {
      class.decorate_methods(scopes)?;
    }
    for function in &mut self.functions {
      function.decorate_body(scopes)?;
    }
    Ok(())
  }
}

impl<'src> Type<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<ResolvedType> {
    let base = scopes.lookup_type(self.name).context(UnknownTypeSnafu {
      position: self.position,
      name: self.name,
    })?;
    let resolved = ResolvedType::new(base, self.pointer_depth);
    self.set_description(resolved);
    Ok(resolved)
  }
}

impl<'src> Variable<'src> {
  /// Declaration site: a new local in the current scope.
  pub fn declare(
    &mut self,
    scopes: &mut ScopeStack<'src>,
    ty: ResolvedType,
  ) -> CompileResult<()> {
    let id = scopes.declare_local(self.name, self.position, ty)?;
    self.set_description(id);
    Ok(())
  }

  /// Use site: resolve through the scope chain.
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<ValueType> {
    let id = scopes
      .lookup_variable(self.name)
      .context(UndeclaredVariableSnafu {
        position: self.position,
        name: self.name,
      })?;
    let description = scopes.symbols().variable(id);
    if let Some(owner) = description.owner {
      scopes.check_access(owner, self.name, description.visibility, self.position)?;
    }
    let ty = description.ty;
    self.set_description(id);
    Ok(ValueType::Typed(ty))
  }
}

impl<'src> Expression<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<ValueType> {
    match self {
      Expression::Number(literal) => Ok(ValueType::Literal(literal.value)),
      Expression::Variable(variable) => variable.decorate(scopes),
      Expression::Call(call) => call.decorate(scopes),
      Expression::Member(access) => access.decorate(scopes),
    }
  }
}

impl<'src> MemberAccess<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<ValueType> {
    let ValueType::Typed(object_type) = self.object.decorate(scopes)? else {
      internal_error("variable decorated to a literal");
    };
    let class = pointee_class(object_type, scopes.symbols(), self.object.position)?;
    let field = scopes
      .symbols()
      .field(class, self.member)
      .context(UndeclaredVariableSnafu {
        position: self.position,
        name: format!("{}::{}", scopes.symbols().ty(class).name, self.member),
      })?;
    let description = scopes.symbols().variable(field);
    scopes.check_access(class, self.member, description.visibility, self.position)?;
    let ty = description.ty;
    self.set_description(field);
    Ok(ValueType::Typed(ty))
  }
}

impl<'src> FunctionCall<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<ValueType> {
    let function = match &mut self.receiver {
      Some(receiver) => {
        let ValueType::Typed(receiver_type) = receiver.decorate(scopes)? else {
          internal_error("variable decorated to a literal");
        };
        let class = pointee_class(receiver_type, scopes.symbols(), receiver.position)?;
        let method = scopes
          .symbols()
          .method(class, self.name)
          .context(UndeclaredFunctionSnafu {
            position: self.position,
            name: format!("{}::{}", scopes.symbols().ty(class).name, self.name),
          })?;
        let visibility = scopes.symbols().function(method).visibility;
        scopes.check_access(class, self.name, visibility, self.position)?;
        method
      }
      None => scopes
        .lookup_function(self.name)
        .context(UndeclaredFunctionSnafu {
          position: self.position,
          name: self.name,
        })?,
    };

    let description = scopes.symbols().function(function);
    let parameters = description.parameters.clone();
    let return_type = description.return_type;
    ensure!(
      parameters.len() == self.arguments.len(),
      TypeSnafu {
        position: self.position,
        message: format!(
          "`{}` takes {} argument(s) but {} were given",
          self.name,
          parameters.len(),
          self.arguments.len()
        ),
      }
    );

    for (argument, parameter) in self.arguments.iter_mut().zip(parameters) {
      let value = argument.decorate(scopes)?;
      ensure_assignable(value, parameter, scopes.symbols(), argument.position())?;
    }

    self.set_description(function);
    Ok(ValueType::Typed(return_type))
  }
}

impl<'src> Declaration<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let ty = self.ty.decorate(scopes)?;
    ensure_scalar(ty, scopes.symbols(), self.variable.position, "a variable")?;
    if let Some(initializer) = &mut self.initializer {
      let value = initializer.decorate(scopes)?;
      ensure_assignable(value, ty, scopes.symbols(), initializer.position())?;
    }
    self.variable.declare(scopes, ty)
  }
}

impl<'src> ReturnStatement<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let Some(function) = scopes.current_function() else {
      internal_error("return statement outside a function");
    };
    let return_type = scopes.symbols().function(function).return_type;
    let value = self.expression.decorate(scopes)?;
    ensure!(
      !return_type.is_void(scopes.symbols()),
      TypeSnafu {
        position: self.position,
        message: "a void function cannot return a value",
      }
    );
    ensure_assignable(value, return_type, scopes.symbols(), self.expression.position())
  }
}

impl<'src> BindingRequest<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<Register> {
    let register = Register::from_name(&self.register_name).context(UnknownRegisterSnafu {
      position: self.position,
      name: self.register_name.as_str(),
    })?;
    ensure!(
      !register.gpr.is_frame_register(),
      ReservedRegisterSnafu {
        position: self.position,
        name: self.register_name.as_str(),
      }
    );
    let ValueType::Typed(ty) = self.variable.decorate(scopes)? else {
      internal_error("variable decorated to a literal");
    };
    ensure_scalar(ty, scopes.symbols(), self.variable.position, "a bound variable")?;
    self.set_register(register);
    Ok(register)
  }
}

impl<'src> InlineAsmStatement<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let mut bound: Vec<Gpr> = Vec::with_capacity(self.bindings.len());
    for binding in &mut self.bindings {
      let register = binding.decorate(scopes)?;
      ensure!(
        !bound.contains(&register.gpr),
        DuplicateRegisterBindingSnafu {
          position: binding.position,
          register: register.gpr.at(crate::register::Width::Qword).name(),
        }
      );
      bound.push(register.gpr);
      scopes.record_written_register(register.gpr);
    }
    Ok(())
  }
}

impl<'src> Instruction<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    match self {
      Instruction::Return(statement) => statement.decorate(scopes),
      Instruction::InlineAsm(statement) => statement.decorate(scopes),
      Instruction::Declaration(declaration) => declaration.decorate(scopes),
      Instruction::Block(block) => {
        scopes.push(ScopeKind::Block);
        let result = block.decorate(scopes);
        scopes.pop();
        result
      }
    }
  }
}

impl<'src> InstructionList<'src> {
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    self
      .instructions
      .iter_mut()
      .try_for_each(|instruction| instruction.decorate(scopes))
  }
}

impl<'src> Function<'src> {
  /// Register the signature in the current scope.
  pub fn declare(
    &mut self,
    scopes: &mut ScopeStack<'src>,
    receiver: Option<TypeId>,
    visibility: Visibility,
  ) -> CompileResult<FunctionId> {
    let return_type = self.return_type.decorate(scopes)?;
    if !return_type.is_void(scopes.symbols()) {
      ensure_scalar(return_type, scopes.symbols(), self.position, "a return value")?;
    }

    let mut parameters = Vec::with_capacity(self.parameters.parameters.len());
    for parameter in &mut self.parameters.parameters {
      let ty = parameter.ty.decorate(scopes)?;
      ensure_scalar(ty, scopes.symbols(), parameter.position, "a parameter")?;
      parameters.push(ty);
    }

    let mut label = match receiver {
      Some(class) => format!("{}__{}", scopes.symbols().ty(class).name, self.name),
      None => self.name.to_string(),
    };
    // NASM reads a bare register name as the register.
    if Register::from_name(&label).is_some() {
      label.insert(0, '$');
    }
    let id = scopes.declare_function(FunctionDescription {
      name: self.name,
      label,
      return_type,
      parameters,
      receiver,
      visibility,
      position: self.position,
      frame_size: 0,
      saved_registers: Vec::new(),
      this: None,
    })?;
    self.set_description(id);
    Ok(id)
  }

  /// Open the function scope, bind parameters to their slots and decorate
  /// the body.
  pub fn decorate_body(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let id = self.function_description();
    scopes.push(ScopeKind::Function(id));
    let result = self.decorate_parameters_and_body(scopes, id);
    scopes.pop();
    result
  }

  fn decorate_parameters_and_body(
    &mut self,
    scopes: &mut ScopeStack<'src>,
    id: FunctionId,
  ) -> CompileResult<()> {
    let receiver = scopes.symbols().function(id).receiver;
    let mut abi_index = 0;

    if let Some(class) = receiver {
      let this = scopes.declare_local("this", self.position, ResolvedType::new(class, 1))?;
      scopes.symbols_mut().function_mut(id).this = Some(this);
      abi_index += 1;
    }

    for parameter in &mut self.parameters.parameters {
      let index = abi_index;
      abi_index += 1;
      let Some(name) = parameter.name else {
        continue;
      };
      let ty = parameter.ty.type_description();
      let variable = if index < ARGUMENT_REGISTERS.len() {
        scopes.declare_local(name, parameter.position, ty)?
      } else {
        let stack_index = (index - ARGUMENT_REGISTERS.len()) as i32;
        scopes.declare_variable(VariableDescription {
          name,
          ty,
          storage: Storage::Stack {
            offset: 16 + 8 * stack_index,
          },
          owner: None,
          visibility: Visibility::Public,
          position: parameter.position,
        })?
      };
      parameter.set_description(variable);
    }

    self.body.decorate(scopes)
  }

  /// Declare the function in the current scope and decorate its body.
  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    if self.description_slot().is_none() {
      self.declare(scopes, None, Visibility::Public)?;
    }
    self.decorate_body(scopes)
  }
}

impl<'src> Attribute<'src> {
  /// Lay the attribute out at the end of `layout`.
  pub fn decorate(
    &mut self,
    scopes: &mut ScopeStack<'src>,
    class: TypeId,
    visibility: Visibility,
    layout: &mut ClassLayout,
  ) -> CompileResult<()> {
    let ty = self.ty.decorate(scopes)?;
    let symbols = scopes.symbols();
    ensure!(
      !ty.is_void(symbols),
      TypeSnafu {
        position: self.position,
        message: format!("attribute `{}` cannot have type void", self.name),
      }
    );
    let complete = ty.is_scalar(symbols)
      || symbols
        .class_layout(ty.base)
        .is_some_and(|layout| layout.complete);
    ensure!(
      complete,
      TypeSnafu {
        position: self.position,
        message: format!(
          "attribute `{}` has incomplete type `{}`",
          self.name,
          ty.full_name(symbols)
        ),
      }
    );

    let align = ty.align(symbols);
    let offset = layout.size.next_multiple_of(align);
    layout.size = offset + ty.size(symbols);
    layout.align = layout.align.max(align);

    let id = scopes.declare_variable(VariableDescription {
      name: self.name,
      ty,
      storage: Storage::Field { offset },
      owner: Some(class),
      visibility,
      position: self.position,
    })?;
    layout.fields.push(id);
    self.set_description(id);
    Ok(())
  }
}

impl<'src> Class<'src> {
  /// Register the class name so its members may refer to it.
  pub fn declare(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<TypeId> {
    let id = scopes.declare_type(
      self.name,
      self.position,
      TypeKind::Class(ClassLayout::default()),
    )?;
    self.set_description(id);
    Ok(id)
  }

  /// Lay out attributes and declare method signatures.
  pub fn decorate_members(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let id = self.type_description();
    scopes.push(ScopeKind::Class(id));
    let result = self.decorate_members_in_scope(scopes, id);
    scopes.pop();
    result
  }

  fn decorate_members_in_scope(
    &mut self,
    scopes: &mut ScopeStack<'src>,
    id: TypeId,
  ) -> CompileResult<()> {
    let mut layout = ClassLayout::default();
    for (attribute, visibility) in &mut self.attributes {
      attribute.decorate(scopes, id, *visibility, &mut layout)?;
    }
    layout.align = layout.align.max(1);
    layout.size = layout.size.next_multiple_of(layout.align);
    layout.complete = true;
    scopes.symbols_mut().ty_mut(id).kind = TypeKind::Class(layout);

    for (method, visibility) in &mut self.methods {
      let method_id = method.function.declare(scopes, Some(id), *visibility)?;
      match &mut scopes.symbols_mut().ty_mut(id).kind {
        TypeKind::Class(layout) => layout.methods.push(method_id),
        _ => internal_error(format!("class `{}` lost its layout", self.name)),
      }
    }
    Ok(())
  }

  /// Decorate method bodies inside the reopened member scope.
  pub fn decorate_methods(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    let id = self.type_description();
    scopes.reopen_class(id);
    let result = self
      .methods
      .iter_mut()
      .try_for_each(|(method, _)| method.function.decorate_body(scopes));
    scopes.pop();
    result
  }

  pub fn decorate(&mut self, scopes: &mut ScopeStack<'src>) -> CompileResult<()> {
    self.declare(scopes)?;
    self.decorate_members(scopes)?;
    self.decorate_methods(scopes)
  }
}
