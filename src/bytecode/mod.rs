use std::fmt::Write as _;

use crate::ast::Position;
use crate::value::Value;

pub mod codec;

// ── Opcodes ──────────────────────────────────────────────────────────
//
// Every instruction is [OP:8 | OPERAND:32]. Ops that take no operand carry 0.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Const = 0,
    Pop = 1,
    LoadLocal = 2,
    StoreLocal = 3,
    Add = 4,
    Sub = 5,
    Mul = 6,
    Div = 7,
    Mod = 8,
    Neg = 9,
    Not = 10,
    Eq = 11,
    Ne = 12,
    Lt = 13,
    Le = 14,
    Gt = 15,
    Ge = 16,
    Jump = 17,
    JumpIfFalse = 18,
    JumpIfFalseKeep = 19,
    JumpIfTrueKeep = 20,
    Call = 21,
    Return = 22,
    Print = 23,
    Halt = 24,
}

/// What an instruction's operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Constant,
    Slot,
    Target,
    ArgCount,
}

impl Op {
    pub fn from_byte(b: u8) -> Option<Op> {
        let op = match b {
            0 => Op::Const,
            1 => Op::Pop,
            2 => Op::LoadLocal,
            3 => Op::StoreLocal,
            4 => Op::Add,
            5 => Op::Sub,
            6 => Op::Mul,
            7 => Op::Div,
            8 => Op::Mod,
            9 => Op::Neg,
            10 => Op::Not,
            11 => Op::Eq,
            12 => Op::Ne,
            13 => Op::Lt,
            14 => Op::Le,
            15 => Op::Gt,
            16 => Op::Ge,
            17 => Op::Jump,
            18 => Op::JumpIfFalse,
            19 => Op::JumpIfFalseKeep,
            20 => Op::JumpIfTrueKeep,
            21 => Op::Call,
            22 => Op::Return,
            23 => Op::Print,
            24 => Op::Halt,
            _ => return None,
        };
        Some(op)
    }

    pub fn operand_kind(self) -> OperandKind {
        match self {
            Op::Const => OperandKind::Constant,
            Op::LoadLocal | Op::StoreLocal => OperandKind::Slot,
            Op::Jump | Op::JumpIfFalse | Op::JumpIfFalseKeep | Op::JumpIfTrueKeep => {
                OperandKind::Target
            }
            Op::Call => OperandKind::ArgCount,
            _ => OperandKind::None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Const => "CONST",
            Op::Pop => "POP",
            Op::LoadLocal => "LOAD",
            Op::StoreLocal => "STORE",
            Op::Add => "ADD",
            Op::Sub => "SUB",
            Op::Mul => "MUL",
            Op::Div => "DIV",
            Op::Mod => "MOD",
            Op::Neg => "NEG",
            Op::Not => "NOT",
            Op::Eq => "EQ",
            Op::Ne => "NE",
            Op::Lt => "LT",
            Op::Le => "LE",
            Op::Gt => "GT",
            Op::Ge => "GE",
            Op::Jump => "JMP",
            Op::JumpIfFalse => "JMPF",
            Op::JumpIfFalseKeep => "JMPF_KEEP",
            Op::JumpIfTrueKeep => "JMPT_KEEP",
            Op::Call => "CALL",
            Op::Return => "RET",
            Op::Print => "PRINT",
            Op::Halt => "HALT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub operand: u32,
}

impl Instruction {
    pub const WIDTH: usize = 5;

    pub fn new(op: Op, operand: u32) -> Self {
        Instruction { op, operand }
    }

    pub fn simple(op: Op) -> Self {
        Instruction { op, operand: 0 }
    }
}

// ── Module ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub entry: u32,
    pub arity: u32,
}

/// A compiled program: constant pool, linear code, function table and a
/// per-instruction source position side table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub constants: Vec<Value>,
    pub code: Vec<Instruction>,
    pub functions: Vec<FunctionEntry>,
    /// `positions[i]` is the source position that produced `code[i]`.
    pub positions: Vec<Position>,
}

impl Module {
    pub fn position_of(&self, ip: usize) -> Option<Position> {
        self.positions.get(ip).copied()
    }

    /// Human-readable listing of the constant pool, function table and code.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "constants ({}):", self.constants.len());
        for (i, c) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "  #{:<4} {:<8} {}", i, c.type_name(), render_constant(c));
        }
        let _ = writeln!(out, "functions ({}):", self.functions.len());
        for f in &self.functions {
            let _ = writeln!(out, "  {}/{} @ {:04}", f.name, f.arity, f.entry);
        }
        let _ = writeln!(out, "code ({}):", self.code.len());
        for (ip, inst) in self.code.iter().enumerate() {
            if let Some(f) = self.functions.iter().find(|f| f.entry as usize == ip) {
                let _ = writeln!(out, "{}:", f.name);
            }
            let line = self.position_of(ip).map(|p| p.line).unwrap_or(0);
            let operand = match inst.op.operand_kind() {
                OperandKind::None => String::new(),
                OperandKind::Constant => match self.constants.get(inst.operand as usize) {
                    Some(c) => format!("#{} ({})", inst.operand, render_constant(c)),
                    None => format!("#{} (?)", inst.operand),
                },
                OperandKind::Slot => format!("${}", inst.operand),
                OperandKind::Target => format!("-> {:04}", inst.operand),
                OperandKind::ArgCount => format!("argc={}", inst.operand),
            };
            let _ = writeln!(
                out,
                "  {:04} {:>4} {:<10} {}",
                ip,
                line,
                inst.op.mnemonic(),
                operand
            );
        }
        // Trailing spaces from operand-less instructions
        out.lines().map(str::trim_end).collect::<Vec<_>>().join("\n") + "\n"
    }
}

fn render_constant(c: &Value) -> String {
    match c {
        Value::Str(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for b in 0..=24u8 {
            let op = Op::from_byte(b).expect("defined opcode");
            assert_eq!(op as u8, b);
        }
        assert!(Op::from_byte(25).is_none());
        assert!(Op::from_byte(255).is_none());
    }

    #[test]
    fn operand_kinds() {
        assert_eq!(Op::Const.operand_kind(), OperandKind::Constant);
        assert_eq!(Op::StoreLocal.operand_kind(), OperandKind::Slot);
        assert_eq!(Op::JumpIfTrueKeep.operand_kind(), OperandKind::Target);
        assert_eq!(Op::Call.operand_kind(), OperandKind::ArgCount);
        assert_eq!(Op::Add.operand_kind(), OperandKind::None);
    }

    #[test]
    fn disassemble_lists_everything() {
        let module = Module {
            constants: vec![Value::Int(7), Value::str("hi")],
            code: vec![
                Instruction::new(Op::Const, 0),
                Instruction::simple(Op::Print),
                Instruction::new(Op::Const, 1),
                Instruction::simple(Op::Print),
                Instruction::simple(Op::Halt),
            ],
            functions: vec![],
            positions: vec![Position { line: 1, column: 1, offset: 0 }; 5],
        };
        let text = module.disassemble();
        assert!(text.contains("constants (2):"), "{text}");
        assert!(text.contains("CONST      #0 (7)"), "{text}");
        assert!(text.contains("\"hi\""), "{text}");
        assert!(text.contains("HALT"), "{text}");
        assert!(text.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn disassemble_labels_function_entries() {
        let module = Module {
            constants: vec![],
            code: vec![Instruction::new(Op::Jump, 2), Instruction::simple(Op::Return), Instruction::simple(Op::Halt)],
            functions: vec![FunctionEntry { name: "f".into(), entry: 1, arity: 0 }],
            positions: vec![Position::default(); 3],
        };
        let text = module.disassemble();
        assert!(text.contains("f/0 @ 0001"), "{text}");
        assert!(text.contains("\nf:\n"), "{text}");
        assert!(text.contains("-> 0002"), "{text}");
    }
}
