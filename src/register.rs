//! x86-64 general purpose registers and their canonical NASM names.
//!
//! A [`Register`] is a physical register ([`Gpr`]) viewed at an access
//! [`Width`]; `eax` and `rax` name the same physical register.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Gpr {
  Rax = 0,
  Rcx = 1,
  Rdx = 2,
  Rbx = 3,
  Rsp = 4,
  Rbp = 5,
  Rsi = 6,
  Rdi = 7,
  R8 = 8,
  R9 = 9,
  R10 = 10,
  R11 = 11,
  R12 = 12,
  R13 = 13,
  R14 = 14,
  R15 = 15,
}

pub const ALL_GPRS: [Gpr; 16] = [
  Gpr::Rax,
  Gpr::Rcx,
  Gpr::Rdx,
  Gpr::Rbx,
  Gpr::Rsp,
  Gpr::Rbp,
  Gpr::Rsi,
  Gpr::Rdi,
  Gpr::R8,
  Gpr::R9,
  Gpr::R10,
  Gpr::R11,
  Gpr::R12,
  Gpr::R13,
  Gpr::R14,
  Gpr::R15,
];

/// System V integer argument registers, in argument order.
pub const ARGUMENT_REGISTERS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

impl Gpr {
  pub fn index(self) -> usize {
    self as usize
  }

  /// Registers a callee must restore before returning (System V).
  pub fn is_callee_saved(self) -> bool {
    matches!(
      self,
      Gpr::Rbx | Gpr::Rbp | Gpr::R12 | Gpr::R13 | Gpr::R14 | Gpr::R15
    )
  }

  /// `rsp` and `rbp` hold the stack frame and may never be bound.
  pub fn is_frame_register(self) -> bool {
    matches!(self, Gpr::Rsp | Gpr::Rbp)
  }

  pub fn at(self, width: Width) -> Register {
    Register { gpr: self, width }
  }

  // [qword, dword, word, byte]
  fn names(self) -> [&'static str; 4] {
    match self {
      Gpr::Rax => ["rax", "eax", "ax", "al"],
      Gpr::Rcx => ["rcx", "ecx", "cx", "cl"],
      Gpr::Rdx => ["rdx", "edx", "dx", "dl"],
      Gpr::Rbx => ["rbx", "ebx", "bx", "bl"],
      Gpr::Rsp => ["rsp", "esp", "sp", "spl"],
      Gpr::Rbp => ["rbp", "ebp", "bp", "bpl"],
      Gpr::Rsi => ["rsi", "esi", "si", "sil"],
      Gpr::Rdi => ["rdi", "edi", "di", "dil"],
      Gpr::R8 => ["r8", "r8d", "r8w", "r8b"],
      Gpr::R9 => ["r9", "r9d", "r9w", "r9b"],
      Gpr::R10 => ["r10", "r10d", "r10w", "r10b"],
      Gpr::R11 => ["r11", "r11d", "r11w", "r11b"],
      Gpr::R12 => ["r12", "r12d", "r12w", "r12b"],
      Gpr::R13 => ["r13", "r13d", "r13w", "r13b"],
      Gpr::R14 => ["r14", "r14d", "r14w", "r14b"],
      Gpr::R15 => ["r15", "r15d", "r15w", "r15b"],
    }
  }
}

/// Access width of a register or memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
  Byte,
  Word,
  Dword,
  Qword,
}

const WIDTHS: [Width; 4] = [Width::Qword, Width::Dword, Width::Word, Width::Byte];

impl Width {
  /// Width used to move a value of `size` bytes. Zero-sized values never
  /// reach a register; they are treated as a qword.
  pub fn from_size(size: u32) -> Self {
    match size {
      1 => Width::Byte,
      2 => Width::Word,
      4 => Width::Dword,
      _ => Width::Qword,
    }
  }

  /// NASM size keyword for memory operands.
  pub fn keyword(self) -> &'static str {
    match self {
      Width::Byte => "BYTE",
      Width::Word => "WORD",
      Width::Dword => "DWORD",
      Width::Qword => "QWORD",
    }
  }

  fn slot(self) -> usize {
    match self {
      Width::Qword => 0,
      Width::Dword => 1,
      Width::Word => 2,
      Width::Byte => 3,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
  pub gpr: Gpr,
  pub width: Width,
}

impl Register {
  /// Look up a canonical register mnemonic (`rax`, `eax`, `r8d`, `sil`, ...).
  pub fn from_name(name: &str) -> Option<Self> {
    let name = name.to_ascii_lowercase();
    ALL_GPRS.into_iter().find_map(|gpr| {
      WIDTHS
        .into_iter()
        .find(|width| gpr.names()[width.slot()] == name)
        .map(|width| gpr.at(width))
    })
  }

  pub fn name(self) -> &'static str {
    self.gpr.names()[self.width.slot()]
  }
}

impl fmt::Display for Register {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}
