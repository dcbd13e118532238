//! Code generation: lower the decorated AST into NASM x86-64 assembly.
//!
//! Every variable has a canonical stack slot that is written through on
//! declaration, so memory always holds the current value. On top of that the
//! generator remembers which register last received each variable and reuses
//! it instead of reloading. Anything that overwrites a register spills its
//! occupant, which only has to update the bookkeeping. Inline assembly and
//! calls are opaque, so afterwards every residency is forgotten and the next
//! read goes back to memory.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{
  Declaration, Expression, Function, FunctionCall, InlineAsmStatement, Instruction,
  InstructionList, MemberAccess, ReturnStatement, TranslationUnit, Variable,
};
use crate::error::internal_error;
use crate::register::{ALL_GPRS, ARGUMENT_REGISTERS, Gpr, Register, Width};
use crate::scope::{FunctionId, Storage, SymbolTable, VarId};

/// Where the generator believes a variable's value currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
  /// Declared without an initializer; the slot holds garbage.
  Uninitialized,
  /// Held in the register as well as in the slot.
  Resident(Gpr),
  /// Only the slot is authoritative.
  Spilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
  Register(Register),
  Memory { base: Gpr, offset: i32, width: Width },
  Immediate(i64),
}

impl Operand {
  fn width(self) -> Width {
    match self {
      Operand::Register(register) => register.width,
      Operand::Memory { width, .. } => width,
      Operand::Immediate(_) => Width::Qword,
    }
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Register(register) => write!(f, "{register}"),
      Operand::Immediate(value) => write!(f, "{value}"),
      Operand::Memory {
        base,
        offset,
        width,
      } => {
        let base = base.at(Width::Qword);
        match offset {
          0 => write!(f, "{} [{base}]", width.keyword()),
          o if *o > 0 => write!(f, "{} [{base}+{o}]", width.keyword()),
          o => write!(f, "{} [{base}{o}]", width.keyword()),
        }
      }
    }
  }
}

/// Value to place in an argument register.
enum Argument<'e, 'src> {
  Variable(VarId),
  Expression(&'e Expression<'src>),
}

pub struct CodeGenerator<'a, 'src> {
  symbols: &'a SymbolTable<'src>,
  asm: String,
  locations: HashMap<VarId, Location>,
  occupants: [Option<VarId>; 16],
  function: Option<FunctionId>,
  /// Bytes pushed below the frame by argument evaluation.
  pushed: u32,
}

impl<'a, 'src> CodeGenerator<'a, 'src> {
  pub fn new(symbols: &'a SymbolTable<'src>) -> Self {
    Self {
      symbols,
      asm: String::from("section .text\n"),
      locations: HashMap::new(),
      occupants: [None; 16],
      function: None,
      pushed: 0,
    }
  }

  pub fn finish(self) -> String {
    self.asm
  }

  pub fn location(&self, variable: VarId) -> Location {
    self
      .locations
      .get(&variable)
      .copied()
      .unwrap_or(Location::Spilled)
  }

  fn emit(&mut self, instruction: impl AsRef<str>) {
    self.asm.push_str("    ");
    self.asm.push_str(instruction.as_ref());
    self.asm.push('\n');
  }

  fn emit_label(&mut self, label: &str) {
    self.asm.push('\n');
    self.asm.push_str(label);
    self.asm.push_str(":\n");
  }

  /// Copy raw assembly text into the output untouched.
  fn splice(&mut self, text: &str) {
    self.asm.push_str(text);
    if !text.ends_with('\n') {
      self.asm.push('\n');
    }
  }

  fn current_function(&self) -> FunctionId {
    match self.function {
      Some(function) => function,
      None => internal_error("statement emitted outside a function"),
    }
  }

  fn width_of(&self, variable: VarId) -> Width {
    Width::from_size(self.symbols.variable(variable).ty.size(self.symbols))
  }

  /// The register is about to be overwritten: its occupant falls back to
  /// its slot.
  fn spill(&mut self, gpr: Gpr) {
    if let Some(variable) = self.occupants[gpr.index()].take() {
      self.locations.insert(variable, Location::Spilled);
    }
  }

  /// Forget every register residency.
  pub fn invalidate_registers(&mut self) {
    for gpr in ALL_GPRS {
      self.spill(gpr);
    }
  }

  fn make_resident(&mut self, variable: VarId, gpr: Gpr) {
    self.spill(gpr);
    if let Location::Resident(previous) = self.location(variable) {
      self.occupants[previous.index()] = None;
    }
    self.occupants[gpr.index()] = Some(variable);
    self.locations.insert(variable, Location::Resident(gpr));
  }

  fn slot(&self, variable: VarId) -> Operand {
    let description = self.symbols.variable(variable);
    match description.storage {
      Storage::Stack { offset } => Operand::Memory {
        base: Gpr::Rbp,
        offset,
        width: self.width_of(variable),
      },
      Storage::Field { .. } => {
        internal_error(format!("attribute `{}` has no stack slot", description.name))
      }
    }
  }

  /// Move `source` into `target`, sign-extending when widening and taking
  /// the low part when narrowing.
  fn emit_move(&mut self, target: Register, source: Operand) {
    self.spill(target.gpr);
    match source {
      Operand::Immediate(value) => self.emit(format!("mov {target}, {value}")),
      Operand::Register(register) if register == target => {}
      Operand::Register(register) if target.width < register.width => {
        let low = register.gpr.at(target.width);
        if low != target {
          self.emit(format!("mov {target}, {low}"));
        }
      }
      Operand::Memory {
        base,
        offset,
        width,
      } if target.width < width => {
        let narrowed = Operand::Memory {
          base,
          offset,
          width: target.width,
        };
        self.emit(format!("mov {target}, {narrowed}"));
      }
      _ if target.width == source.width() => self.emit(format!("mov {target}, {source}")),
      _ if source.width() == Width::Dword => self.emit(format!("movsxd {target}, {source}")),
      _ => self.emit(format!("movsx {target}, {source}")),
    }
  }

  fn emit_store(&mut self, variable: VarId, source: Gpr) {
    let slot = self.slot(variable);
    let width = self.width_of(variable);
    self.emit(format!("mov {slot}, {}", source.at(width)));
  }

  pub fn emit_load_number_literal(&mut self, target: Register, value: i64) {
    self.emit_move(target, Operand::Immediate(value));
  }

  /// Load a variable, reusing its register copy when there is one.
  pub fn load_variable(&mut self, variable: VarId, target: Register) {
    let description = self.symbols.variable(variable);
    if let Storage::Field { offset } = description.storage {
      let Some(this) = self.symbols.function(self.current_function()).this else {
        internal_error(format!("attribute `{}` read outside a method", description.name));
      };
      self.load_variable(this, target.gpr.at(Width::Qword));
      self.emit_field_load(target, offset, self.width_of(variable));
      return;
    }

    let width = self.width_of(variable);
    match self.location(variable) {
      Location::Resident(gpr) => {
        self.emit_move(target, Operand::Register(gpr.at(width)));
        if gpr == target.gpr {
          self.make_resident(variable, gpr);
        }
      }
      Location::Spilled | Location::Uninitialized => {
        let slot = self.slot(variable);
        self.emit_move(target, slot);
        if target.width >= width {
          self.make_resident(variable, target.gpr);
        }
      }
    }
  }

  /// Load a variable from its slot even if a register holds it, for
  /// inline-asm bindings.
  fn materialize(&mut self, variable: VarId, target: Register) {
    let on_stack = matches!(self.symbols.variable(variable).storage, Storage::Stack { .. });
    if on_stack && let Location::Resident(gpr) = self.location(variable) {
      self.occupants[gpr.index()] = None;
      self.locations.insert(variable, Location::Spilled);
    }
    self.load_variable(variable, target);
  }

  /// `target.gpr` holds an object address; replace it with the field.
  fn emit_field_load(&mut self, target: Register, offset: u32, width: Width) {
    self.emit_move(
      target,
      Operand::Memory {
        base: target.gpr,
        offset: offset as i32,
        width,
      },
    );
  }

  fn emit_push(&mut self, gpr: Gpr) {
    self.emit(format!("push {}", gpr.at(Width::Qword)));
    self.pushed += 8;
  }

  fn emit_pop(&mut self, gpr: Gpr) {
    self.spill(gpr);
    self.emit(format!("pop {}", gpr.at(Width::Qword)));
    self.pushed -= 8;
  }

  fn emit_return_sequence(&mut self) {
    let description = self.symbols.function(self.current_function());
    let saved = description.saved_registers.clone();
    if !saved.is_empty() {
      let below = frame_size(description.frame_size, saved.len()) + 8 * saved.len() as u32;
      self.emit(format!("lea rsp, [rbp-{below}]"));
      for gpr in saved.into_iter().rev() {
        self.emit(format!("pop {}", gpr.at(Width::Qword)));
      }
    }
    self.emit("mov rsp, rbp");
    self.emit("pop rbp");
    self.emit("ret");
  }
}

/// Local area below `rbp`, padded so that `rsp` stays 16-byte aligned once
/// `saved` callee-saved registers are pushed under it.
fn frame_size(locals: u32, saved: usize) -> u32 {
  let saved = 8 * saved as u32;
  (locals + saved).next_multiple_of(16) - saved
}

/// Emit assembly for a decorated translation unit.
pub fn generate(unit: &TranslationUnit<'_>, symbols: &SymbolTable<'_>) -> String {
  let mut generator = CodeGenerator::new(symbols);
  unit.emit(&mut generator);
  generator.finish()
}

impl TranslationUnit<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    for class in &self.classes {
      for (method, _) in &class.methods {
        method.function.emit(generator);
      }
    }
    for function in &self.functions {
      function.emit(generator);
    }
  }
}

impl Function<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    let id = self.function_description();
    let symbols = generator.symbols;
    let description = symbols.function(id);

    generator.function = Some(id);
    generator.locations.clear();
    generator.occupants = [None; 16];
    generator.pushed = 0;

    generator.emit_label(&description.label);
    generator.emit("push rbp");
    generator.emit("mov rbp, rsp");
    let frame = frame_size(description.frame_size, description.saved_registers.len());
    if frame > 0 {
      generator.emit(format!("sub rsp, {frame}"));
    }
    for gpr in &description.saved_registers {
      generator.emit(format!("push {}", gpr.at(Width::Qword)));
    }

    let receiver = description.this.into_iter().map(Some);
    let parameters = self
      .parameters
      .parameters
      .iter()
      .map(|parameter| parameter.variable_description());
    for (variable, gpr) in receiver.chain(parameters).zip(ARGUMENT_REGISTERS) {
      if let Some(variable) = variable {
        generator.emit_store(variable, gpr);
        generator.make_resident(variable, gpr);
      }
    }

    self.body.emit(generator);
    if !self.body.ends_with_return() {
      generator.emit_return_sequence();
    }
    generator.function = None;
  }
}

impl InstructionList<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    for instruction in &self.instructions {
      instruction.emit(generator);
    }
  }
}

impl Instruction<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    match self {
      Instruction::Return(statement) => statement.emit(generator),
      Instruction::InlineAsm(statement) => statement.emit(generator),
      Instruction::Declaration(declaration) => declaration.emit(generator),
      Instruction::Block(block) => block.emit(generator),
    }
  }
}

impl Declaration<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    let variable = self.variable.variable_description();
    let Some(initializer) = &self.initializer else {
      generator.locations.insert(variable, Location::Uninitialized);
      return;
    };
    let target = Gpr::Rax.at(generator.width_of(variable));
    initializer.load_value_in_register(generator, target);
    generator.emit_store(variable, Gpr::Rax);
    generator.make_resident(variable, Gpr::Rax);
  }
}

impl ReturnStatement<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    let symbols = generator.symbols;
    let function = symbols.function(generator.current_function());
    let width = Width::from_size(function.return_type.size(symbols));
    self
      .expression
      .load_value_in_register(generator, Gpr::Rax.at(width));
    generator.emit_return_sequence();
  }
}

impl InlineAsmStatement<'_> {
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    for binding in &self.bindings {
      generator.materialize(binding.variable.variable_description(), binding.register());
    }
    generator.splice(&self.body.content);
    generator.invalidate_registers();
  }
}

impl Expression<'_> {
  pub fn load_value_in_register(&self, generator: &mut CodeGenerator<'_, '_>, target: Register) {
    match self {
      Expression::Number(literal) => generator.emit_load_number_literal(target, literal.value),
      Expression::Variable(variable) => variable.load_value_in_register(generator, target),
      Expression::Member(access) => access.load_value_in_register(generator, target),
      Expression::Call(call) => call.load_value_in_register(generator, target),
    }
  }
}

impl Variable<'_> {
  pub fn load_value_in_register(&self, generator: &mut CodeGenerator<'_, '_>, target: Register) {
    generator.load_variable(self.variable_description(), target);
  }
}

impl MemberAccess<'_> {
  pub fn load_value_in_register(&self, generator: &mut CodeGenerator<'_, '_>, target: Register) {
    let symbols = generator.symbols;
    let field = symbols.variable(self.field_description());
    let Storage::Field { offset } = field.storage else {
      internal_error(format!("member `{}` is not an attribute", self.member));
    };
    let width = Width::from_size(field.ty.size(symbols));
    generator.load_variable(
      self.object.variable_description(),
      target.gpr.at(Width::Qword),
    );
    generator.emit_field_load(target, offset, width);
  }
}

impl FunctionCall<'_> {
  pub fn load_value_in_register(&self, generator: &mut CodeGenerator<'_, '_>, target: Register) {
    let symbols = generator.symbols;
    let description = symbols.function(self.function_description());
    let result = Width::from_size(description.return_type.size(symbols));
    self.emit(generator);
    generator.emit_move(target, Operand::Register(Gpr::Rax.at(result)));
  }

  /// System V call: the receiver, then arguments; the seventh and later
  /// are pushed right to left.
  pub fn emit(&self, generator: &mut CodeGenerator<'_, '_>) {
    let symbols = generator.symbols;
    let description = symbols.function(self.function_description());
    let mut arguments: Vec<(Argument<'_, '_>, Width)> = Vec::new();
    if let Some(receiver) = &self.receiver {
      arguments.push((Argument::Variable(receiver.variable_description()), Width::Qword));
    } else if description.receiver.is_some() {
      let Some(this) = symbols.function(generator.current_function()).this else {
        internal_error(format!("method `{}` called without a receiver", self.name));
      };
      arguments.push((Argument::Variable(this), Width::Qword));
    }
    for (argument, parameter) in self.arguments.iter().zip(&description.parameters) {
      let width = Width::from_size(parameter.size(symbols));
      arguments.push((Argument::Expression(argument), width));
    }

    let split = arguments.len().min(ARGUMENT_REGISTERS.len());
    let (in_registers, on_stack) = arguments.split_at(split);

    let stack_bytes = 8 * on_stack.len() as u32;
    let padding = (generator.pushed + stack_bytes) % 16;
    if padding != 0 {
      generator.emit(format!("sub rsp, {padding}"));
      generator.pushed += padding;
    }
    for (argument, width) in on_stack.iter().rev() {
      load_argument(generator, argument, Gpr::Rax.at(*width));
      generator.emit_push(Gpr::Rax);
    }

    let nested = in_registers.iter().any(|(argument, _)| {
      matches!(argument, Argument::Expression(expression) if expression.contains_call())
    });
    if nested {
      for (argument, width) in in_registers {
        load_argument(generator, argument, Gpr::Rax.at(*width));
        generator.emit_push(Gpr::Rax);
      }
      for gpr in ARGUMENT_REGISTERS[..in_registers.len()].iter().rev() {
        generator.emit_pop(*gpr);
      }
    } else {
      for ((argument, width), gpr) in in_registers.iter().zip(ARGUMENT_REGISTERS) {
        load_argument(generator, argument, gpr.at(*width));
      }
    }

    generator.emit(format!("call {}", description.label));
    let cleanup = stack_bytes + padding;
    if cleanup > 0 {
      generator.emit(format!("add rsp, {cleanup}"));
      generator.pushed -= cleanup;
    }
    generator.invalidate_registers();
  }
}

fn load_argument(
  generator: &mut CodeGenerator<'_, '_>,
  argument: &Argument<'_, '_>,
  target: Register,
) {
  match argument {
    Argument::Variable(variable) => generator.load_variable(*variable, target),
    Argument::Expression(expression) => expression.load_value_in_register(generator, target),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::scope::ScopeStack;

  fn compile(source: &str) -> String {
    let mut unit = parse(source).expect("parse failed");
    let mut scopes = ScopeStack::new();
    unit.decorate(&mut scopes).expect("decoration failed");
    let symbols = scopes.into_symbols();
    generate(&unit, &symbols)
  }

  fn body(asm: &str) -> Vec<&str> {
    asm
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .collect()
  }

  #[test]
  fn operands_render_in_nasm_syntax() {
    let slot = Operand::Memory {
      base: Gpr::Rbp,
      offset: -4,
      width: Width::Dword,
    };
    assert_eq!(slot.to_string(), "DWORD [rbp-4]");
    let field = Operand::Memory {
      base: Gpr::Rdi,
      offset: 8,
      width: Width::Qword,
    };
    assert_eq!(field.to_string(), "QWORD [rdi+8]");
  }

  #[test]
  fn frame_padding_accounts_for_saved_registers() {
    assert_eq!(frame_size(0, 0), 0);
    assert_eq!(frame_size(16, 0), 16);
    assert_eq!(frame_size(16, 1), 24);
    assert_eq!(frame_size(0, 2), 0);
  }

  #[test]
  fn parameters_stay_resident_in_argument_registers() {
    let asm = compile("long f(long a, int b){ return a; }");
    assert_eq!(
      body(&asm),
      vec![
        "section .text",
        "f:",
        "push rbp",
        "mov rbp, rsp",
        "sub rsp, 16",
        "mov QWORD [rbp-8], rdi",
        "mov DWORD [rbp-12], esi",
        "mov rax, rdi",
        "mov rsp, rbp",
        "pop rbp",
        "ret",
      ]
    );
  }

  #[test]
  fn widening_loads_sign_extend() {
    let asm = compile("long f(){ int x = 3; char c = 1; long y = x; return c; }");
    let lines = body(&asm);
    assert!(lines.contains(&"movsxd rax, DWORD [rbp-4]"), "{asm}");
    assert!(lines.contains(&"movsx rax, BYTE [rbp-5]"), "{asm}");
  }

  #[test]
  fn a_second_declaration_spills_the_first() {
    let asm = compile("int f(){ int x = 1; int y = 2; return x; }");
    let lines = body(&asm);
    assert_eq!(
      &lines[5..10],
      &[
        "mov eax, 1",
        "mov DWORD [rbp-4], eax",
        "mov eax, 2",
        "mov DWORD [rbp-8], eax",
        "mov eax, DWORD [rbp-4]",
      ]
    );
  }

  #[test]
  fn inline_asm_invalidates_every_register() {
    let asm = compile(
      r#"long f(long a){ long x = 7; asm("xor rdi, rdi" : "=rcx"(x)); long y = a; return x; }"#,
    );
    let lines = body(&asm);
    let splice = lines.iter().position(|l| *l == "xor rdi, rdi").unwrap();
    assert_eq!(lines[splice - 1], "mov rcx, QWORD [rbp-16]");
    assert_eq!(lines[splice + 1], "mov rax, QWORD [rbp-8]");
    assert_eq!(lines[splice + 3], "mov rax, QWORD [rbp-16]");
  }

  #[test]
  fn fields_are_read_through_this() {
    let asm = compile("class A { int x; long y; public: long get(){ return y; } };");
    let lines = body(&asm);
    assert_eq!(lines[1], "A__get:");
    assert!(lines.contains(&"mov QWORD [rbp-8], rdi"));
    assert!(lines.contains(&"mov rax, rdi"));
    assert!(lines.contains(&"mov rax, QWORD [rax+8]"));
  }

  #[test]
  fn calls_pass_arguments_in_registers() {
    let asm = compile("int g(int a, int b){ return b; } int f(){ return g(1, 2); }");
    let lines = body(&asm);
    let call = lines.iter().position(|l| *l == "call g").unwrap();
    assert_eq!(&lines[call - 2..call], &["mov edi, 1", "mov esi, 2"]);
  }

  #[test]
  fn method_calls_pass_the_receiver_first() {
    let asm = compile(
      "class A { public: int get(int k){ return k; } }; int f(A* a){ return a->get(5); }",
    );
    let lines = body(&asm);
    let call = lines.iter().position(|l| *l == "call A__get").unwrap();
    assert_eq!(lines[call - 1], "mov esi, 5");
    assert!(!lines.contains(&"mov rdi, rdi"), "{asm}");
  }

  #[test]
  fn nested_calls_stage_arguments_on_the_stack() {
    let asm = compile(
      "int g(int a, int b){ return a; } int f(){ return g(1, g(2, 3)); }",
    );
    let lines = body(&asm);
    let last = lines.iter().rposition(|l| *l == "call g").unwrap();
    assert_eq!(&lines[last - 2..last], &["pop rsi", "pop rdi"]);
  }

  #[test]
  fn seventh_argument_goes_on_the_stack() {
    let asm = compile(
      "int g(int a, int b, int c, int d, int e, int h, int i){ return i; } \
       int f(){ return g(1, 2, 3, 4, 5, 6, 7); }",
    );
    let lines = body(&asm);
    assert!(lines.contains(&"mov eax, DWORD [rbp+16]"), "{asm}");
    let call = lines.iter().position(|l| *l == "call g").unwrap();
    assert_eq!(&lines[call - 9..call - 6], &["sub rsp, 8", "mov eax, 7", "push rax"]);
    assert_eq!(lines[call + 1], "add rsp, 16");
  }

  #[test]
  fn callee_saved_bindings_are_preserved() {
    let asm = compile(r#"int f(){ int x = 1; asm("inc ebx" : "=ebx"(x)); return x; }"#);
    let lines = body(&asm);
    assert_eq!(&lines[4..6], &["sub rsp, 24", "push rbx"]);
    let ret = lines.iter().position(|l| *l == "ret").unwrap();
    assert_eq!(&lines[ret - 4..ret], &["lea rsp, [rbp-32]", "pop rbx", "mov rsp, rbp", "pop rbp"]);
  }

  #[test]
  fn void_functions_get_an_epilogue() {
    let asm = compile("void f(){ }");
    assert_eq!(
      body(&asm),
      vec!["section .text", "f:", "push rbp", "mov rbp, rsp", "mov rsp, rbp", "pop rbp", "ret"]
    );
  }
}
