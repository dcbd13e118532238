//! End-to-end tests: source text through parsing, decoration and emission.

use scc::{CompileError, dump_ast, generate_assembly};

fn compile(source: &str) -> String {
  generate_assembly(source).expect("compilation failed")
}

fn lines(asm: &str) -> Vec<&str> {
  asm
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect()
}

#[test]
fn returns_a_literal() {
  let source = "int f(){return 1;}";
  assert_eq!(
    dump_ast(source).unwrap(),
    "TranslationUnit\n  Function int f\n    InstructionList\n      ReturnStatement\n        NumberLiteral 1\n"
  );
  assert_eq!(
    lines(&compile(source)),
    vec![
      "section .text",
      "f:",
      "push rbp",
      "mov rbp, rsp",
      "mov eax, 1",
      "mov rsp, rbp",
      "pop rbp",
      "ret",
    ]
  );
}

#[test]
fn returns_a_variable_from_its_tracked_register() {
  let asm = compile("int f(){int x = 2; return x;}");
  let lines = lines(&asm);
  assert_eq!(
    &lines[4..],
    &[
      "sub rsp, 16",
      "mov eax, 2",
      "mov DWORD [rbp-4], eax",
      "mov rsp, rbp",
      "pop rbp",
      "ret",
    ]
  );
}

#[test]
fn inline_asm_binding_materializes_and_forgets() {
  let asm = compile(r#"int f(){int x = 5; asm("nop" : ="=eax"(x)); return x;}"#);
  let lines = lines(&asm);
  let nop = lines.iter().position(|line| *line == "nop").unwrap();
  assert_eq!(lines[nop - 1], "mov eax, DWORD [rbp-4]");
  assert_eq!(lines[nop + 1], "mov eax, DWORD [rbp-4]");
}

#[test]
fn inline_asm_text_is_spliced_verbatim() {
  let asm = compile(
    "void f(){ asm(\"  mov rax, 60\\n\" \"  syscall\"); }",
  );
  assert!(asm.contains("\n  mov rax, 60\n  syscall\n"), "{asm}");
}

#[test]
fn private_attribute_is_hidden_outside_its_class() {
  let err = generate_assembly("class A { int x; public: A(){} }; int f(A* a){ return a->x; }")
    .unwrap_err();
  assert!(
    matches!(&err, CompileError::AccessViolation { member, .. } if member == "x"),
    "{err}"
  );
}

#[test]
fn trailing_comma_in_parameters_is_a_syntax_error() {
  let err = generate_assembly("int f(int a,){return 1;}").unwrap_err();
  assert!(matches!(err, CompileError::Syntax { .. }), "{err}");
  assert_eq!(err.position().line, 1);
  assert_eq!(err.position().column, 12);
}

#[test]
fn shadowed_variables_keep_separate_slots() {
  let asm = compile("int f(){ int x = 1; { int x = 2; }; return x; }");
  let lines = lines(&asm);
  assert!(lines.contains(&"mov DWORD [rbp-4], eax"));
  assert!(lines.contains(&"mov DWORD [rbp-8], eax"));
  let ret = lines.iter().position(|line| *line == "ret").unwrap();
  assert_eq!(lines[ret - 3], "mov eax, DWORD [rbp-4]");
}

#[test]
fn methods_and_calls_link_by_label() {
  let asm = compile(
    "class Counter {
       long count;
     public:
       long get(){ return count; }
       long twice(){ return get(); }
     };
     long read(Counter* c){ return c->twice(); }",
  );
  for label in ["Counter__get:", "Counter__twice:", "read:"] {
    assert!(asm.contains(label), "missing {label} in\n{asm}");
  }
  assert!(asm.contains("call Counter__get"));
  assert!(asm.contains("call Counter__twice"));
}

#[test]
fn unknown_register_is_reported() {
  let err = generate_assembly(r#"int f(){ int x = 1; asm("" : "=xmm0"(x)); return x; }"#)
    .unwrap_err();
  assert!(matches!(err, CompileError::UnknownRegister { .. }), "{err}");
}

#[test]
fn error_rendering_points_into_the_source() {
  let source = "int f(){\n  return y;\n}";
  let err = generate_assembly(source).unwrap_err();
  let rendered = err.render(source);
  assert!(rendered.starts_with("  return y;\n         ^ 2:10:"), "{rendered}");
}

#[test]
fn method_labels_cannot_collide_with_free_functions() {
  let source = "long A__get(){return 1;} class A { public: long get(){ return 2; } };";
  let err = generate_assembly(source).unwrap_err();
  assert!(matches!(err, CompileError::DuplicateDeclaration { .. }), "{err}");
}

#[test]
fn register_named_functions_assemble() {
  let asm = compile("long rax(){ return 1; } long f(){ return rax(); }");
  let lines = lines(&asm);
  assert!(lines.contains(&"$rax:"), "{asm}");
  assert!(lines.contains(&"call $rax"), "{asm}");
  assert!(!lines.contains(&"rax:"), "{asm}");
}

#[test]
fn literals_wider_than_their_slot_are_rejected() {
  let err = generate_assembly("int f(){ char c = 300; return c; }").unwrap_err();
  assert!(matches!(err, CompileError::Type { .. }), "{err}");
  let err = generate_assembly("int f(){ int i = 5000000000; return i; }").unwrap_err();
  assert!(matches!(err, CompileError::Type { .. }), "{err}");
  assert!(compile("long f(){ return 5000000000; }").contains("mov rax, 5000000000"));
}
