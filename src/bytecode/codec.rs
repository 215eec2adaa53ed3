//! The `.zyi` artifact format.
//!
//! ```text
//! magic "ZYI\0" | version u32
//! constants : len u32 | count u32 | (tag u8, payload)*
//! code      : len u32 | (op u8, operand u32)*
//! functions : len u32 | count u32 | (name_len u32, name, entry u32, arity u32)*
//! positions : len u32 | (line u32, column u32, offset u32)*   one per instruction
//! ```
//!
//! All integers are little-endian. Serialisation is deterministic, so equal
//! modules always produce equal bytes.

use std::rc::Rc;

use super::{FunctionEntry, Instruction, Module, Op, OperandKind};
use crate::ast::Position;
use crate::config::Config;
use crate::value::Value;

pub const MAGIC: [u8; 4] = *b"ZYI\0";
pub const FORMAT_VERSION: u32 = 1;

const TAG_NIL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_FUNCTION: u8 = 5;

const POSITION_WIDTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("not a .zyi module (bad magic marker)")]
    BadMagic,
    #[error("unsupported .zyi format version {found} (this build reads version {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("truncated {section} section: {needed} more bytes expected")]
    Truncated { section: &'static str, needed: usize },
    #[error("{section} section declares {declared} bytes, over the {cap}-byte limit")]
    SectionTooLarge { section: &'static str, declared: u32, cap: u32 },
    #[error("{section} section declares {declared} bytes but its content ends after {used}")]
    SectionLengthMismatch { section: &'static str, declared: usize, used: usize },
    #[error("{count} trailing bytes after the last section")]
    TrailingBytes { count: usize },
    #[error("unknown constant tag {tag}")]
    UnknownTag { tag: u8 },
    #[error("unknown opcode {op} at instruction {index}")]
    UnknownOpcode { op: u8, index: usize },
    #[error("invalid UTF-8 in {section} section")]
    InvalidUtf8 { section: &'static str },
    #[error("invalid module: {0}")]
    Invalid(String),
}

impl FormatError {
    pub fn code(&self) -> &'static str {
        match self {
            FormatError::BadMagic => "ZY-F001",
            FormatError::UnsupportedVersion { .. } => "ZY-F002",
            FormatError::Truncated { .. } => "ZY-F003",
            FormatError::SectionTooLarge { .. } => "ZY-F004",
            FormatError::SectionLengthMismatch { .. } | FormatError::TrailingBytes { .. } => {
                "ZY-F005"
            }
            FormatError::UnknownTag { .. }
            | FormatError::UnknownOpcode { .. }
            | FormatError::InvalidUtf8 { .. }
            | FormatError::Invalid(_) => "ZY-F006",
        }
    }
}

type Result<T> = std::result::Result<T, FormatError>;

/// Does `bytes` start with the `.zyi` magic marker?
pub fn looks_like_module(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

// ── Writing ──────────────────────────────────────────────────────────

fn wr_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn wr_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

// Lengths past u32::MAX cannot come out of the compiler; if one did, the
// saturated prefix makes the reader reject the artifact rather than misread it.
fn wr_len(out: &mut Vec<u8>, n: usize) {
    wr_u32(out, u32::try_from(n).unwrap_or(u32::MAX));
}

fn wr_str(out: &mut Vec<u8>, s: &str) {
    wr_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn write_section(out: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>)) {
    let mut buf = Vec::new();
    body(&mut buf);
    wr_len(out, buf.len());
    out.extend_from_slice(&buf);
}

fn write_constant(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Nil => wr_u8(out, TAG_NIL),
        Value::Int(n) => {
            wr_u8(out, TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(n) => {
            wr_u8(out, TAG_FLOAT);
            out.extend_from_slice(&n.to_bits().to_le_bytes());
        }
        Value::Bool(b) => {
            wr_u8(out, TAG_BOOL);
            wr_u8(out, *b as u8);
        }
        Value::Str(s) => {
            wr_u8(out, TAG_STR);
            wr_str(out, s);
        }
        Value::Function { entry, arity } => {
            wr_u8(out, TAG_FUNCTION);
            wr_u32(out, *entry);
            wr_u32(out, *arity);
        }
    }
}

pub fn serialize_module(module: &Module) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    wr_u32(&mut out, FORMAT_VERSION);

    write_section(&mut out, |buf| {
        wr_len(buf, module.constants.len());
        for c in &module.constants {
            write_constant(buf, c);
        }
    });
    write_section(&mut out, |buf| {
        for inst in &module.code {
            wr_u8(buf, inst.op as u8);
            wr_u32(buf, inst.operand);
        }
    });
    write_section(&mut out, |buf| {
        wr_len(buf, module.functions.len());
        for f in &module.functions {
            wr_str(buf, &f.name);
            wr_u32(buf, f.entry);
            wr_u32(buf, f.arity);
        }
    });
    write_section(&mut out, |buf| {
        for p in &module.positions {
            wr_u32(buf, p.line);
            wr_u32(buf, p.column);
            wr_u32(buf, p.offset);
        }
    });

    tracing::debug!(bytes = out.len(), "serialized module");
    out
}

// ── Reading ──────────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], section: &'static str) -> Self {
        Reader { bytes, pos: 0, section }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(FormatError::Truncated {
                section: self.section,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn rd_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn rd_u8(&mut self) -> Result<u8> {
        Ok(self.rd_array::<1>()?[0])
    }

    fn rd_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.rd_array()?))
    }

    fn rd_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.rd_array()?))
    }

    fn rd_str(&mut self) -> Result<String> {
        let len = self.rd_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| FormatError::InvalidUtf8 { section: self.section })
    }

    /// Reads the length prefix of the next section and returns a reader over its body.
    fn section(&mut self, name: &'static str, cap: u32) -> Result<Reader<'a>> {
        let declared = self.rd_u32()?;
        if declared > cap {
            return Err(FormatError::SectionTooLarge { section: name, declared, cap });
        }
        let section = self.section;
        self.section = name;
        let body = self.take(declared as usize);
        self.section = section;
        Ok(Reader::new(body?, name))
    }

    /// Every declared section byte must be consumed by its content.
    fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(FormatError::SectionLengthMismatch {
                section: self.section,
                declared: self.bytes.len(),
                used: self.pos,
            });
        }
        Ok(())
    }
}

fn read_constant(r: &mut Reader<'_>) -> Result<Value> {
    let tag = r.rd_u8()?;
    let value = match tag {
        TAG_NIL => Value::Nil,
        TAG_INT => Value::Int(r.rd_u64()? as i64),
        TAG_FLOAT => Value::Float(f64::from_bits(r.rd_u64()?)),
        TAG_BOOL => match r.rd_u8()? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            other => return Err(FormatError::Invalid(format!("bool constant with byte {other}"))),
        },
        TAG_STR => Value::Str(Rc::from(r.rd_str()?)),
        TAG_FUNCTION => Value::Function {
            entry: r.rd_u32()?,
            arity: r.rd_u32()?,
        },
        tag => return Err(FormatError::UnknownTag { tag }),
    };
    Ok(value)
}

/// Decode and validate a `.zyi` artifact.
pub fn deserialize_module(bytes: &[u8], config: &Config) -> Result<Module> {
    if !looks_like_module(bytes) {
        return Err(FormatError::BadMagic);
    }
    let mut r = Reader::new(&bytes[MAGIC.len()..], "header");
    let version = r.rd_u32()?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion { found: version, expected: FORMAT_VERSION });
    }
    let cap = config.max_section_bytes;

    let mut s = r.section("constants", cap)?;
    let count = s.rd_u32()? as usize;
    // Each constant takes at least one byte; never pre-allocate past the section
    let mut constants = Vec::with_capacity(count.min(s.remaining()));
    for _ in 0..count {
        constants.push(read_constant(&mut s)?);
    }
    s.finish()?;

    let mut s = r.section("code", cap)?;
    if s.remaining() % Instruction::WIDTH != 0 {
        return Err(FormatError::Invalid(format!(
            "code section of {} bytes is not a whole number of {}-byte instructions",
            s.remaining(),
            Instruction::WIDTH
        )));
    }
    let mut code = Vec::with_capacity(s.remaining() / Instruction::WIDTH);
    while s.remaining() > 0 {
        let byte = s.rd_u8()?;
        let op = Op::from_byte(byte).ok_or(FormatError::UnknownOpcode { op: byte, index: code.len() })?;
        code.push(Instruction::new(op, s.rd_u32()?));
    }
    s.finish()?;

    let mut s = r.section("functions", cap)?;
    let count = s.rd_u32()? as usize;
    let mut functions = Vec::with_capacity(count.min(s.remaining()));
    for _ in 0..count {
        functions.push(FunctionEntry {
            name: s.rd_str()?,
            entry: s.rd_u32()?,
            arity: s.rd_u32()?,
        });
    }
    s.finish()?;

    let mut s = r.section("positions", cap)?;
    if s.remaining() % POSITION_WIDTH != 0 {
        return Err(FormatError::Invalid(format!(
            "positions section of {} bytes is not a whole number of entries",
            s.remaining()
        )));
    }
    let mut positions = Vec::with_capacity(s.remaining() / POSITION_WIDTH);
    while s.remaining() > 0 {
        positions.push(Position {
            line: s.rd_u32()?,
            column: s.rd_u32()?,
            offset: s.rd_u32()?,
        });
    }
    s.finish()?;

    if r.remaining() != 0 {
        return Err(FormatError::TrailingBytes { count: r.remaining() });
    }

    let module = Module { constants, code, functions, positions };
    validate(&module)?;
    tracing::debug!(
        constants = module.constants.len(),
        instructions = module.code.len(),
        functions = module.functions.len(),
        "deserialized module"
    );
    Ok(module)
}

/// Check that every operand points inside the module.
pub fn validate(module: &Module) -> Result<()> {
    let len = module.code.len();
    if module.positions.len() != len {
        return Err(FormatError::Invalid(format!(
            "{} positions for {} instructions",
            module.positions.len(),
            len
        )));
    }
    for (ip, inst) in module.code.iter().enumerate() {
        let operand = inst.operand as usize;
        match inst.op.operand_kind() {
            OperandKind::Constant if operand >= module.constants.len() => {
                return Err(FormatError::Invalid(format!(
                    "instruction {ip} references constant #{operand} of {}",
                    module.constants.len()
                )));
            }
            OperandKind::Target if operand >= len => {
                return Err(FormatError::Invalid(format!(
                    "instruction {ip} jumps to {operand}, past the end of the code"
                )));
            }
            _ => {}
        }
    }
    let entry_ok = |entry: u32| (entry as usize) < len;
    for f in &module.functions {
        if !entry_ok(f.entry) {
            return Err(FormatError::Invalid(format!(
                "function '{}' enters at {}, past the end of the code",
                f.name, f.entry
            )));
        }
    }
    for c in &module.constants {
        if let Value::Function { entry, .. } = c {
            if !entry_ok(*entry) {
                return Err(FormatError::Invalid(format!(
                    "function constant enters at {entry}, past the end of the code"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Module {
        let at = |line| Position { line, column: 1, offset: 0 };
        Module {
            constants: vec![
                Value::Int(-42),
                Value::Float(2.5),
                Value::Bool(true),
                Value::str("héllo"),
                Value::Nil,
                Value::Function { entry: 1, arity: 2 },
            ],
            code: vec![
                Instruction::new(Op::Jump, 3),
                Instruction::new(Op::LoadLocal, 0),
                Instruction::simple(Op::Return),
                Instruction::new(Op::Const, 3),
                Instruction::simple(Op::Print),
                Instruction::simple(Op::Halt),
            ],
            functions: vec![FunctionEntry { name: "f".into(), entry: 1, arity: 2 }],
            positions: (1..=6).map(at).collect(),
        }
    }

    fn decode(bytes: &[u8]) -> Result<Module> {
        deserialize_module(bytes, &Config::default())
    }

    #[test]
    fn round_trip_is_identity() {
        let m = sample();
        let bytes = serialize_module(&m);
        let back = decode(&bytes).unwrap();
        assert_eq!(back, m);
        assert_eq!(serialize_module(&back), bytes);
    }

    #[test]
    fn serialization_is_deterministic() {
        assert_eq!(serialize_module(&sample()), serialize_module(&sample()));
    }

    #[test]
    fn header_layout() {
        let bytes = serialize_module(&Module::default());
        assert_eq!(&bytes[..4], b"ZYI\0");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        // constants: len 4, count 0 | code: len 0 | functions: len 4, count 0 | positions: len 0
        assert_eq!(bytes.len(), 8 + (4 + 4) + 4 + (4 + 4) + 4);
    }

    #[test]
    fn instruction_encoding_is_fixed_width() {
        let m = Module {
            code: vec![Instruction::new(Op::Const, 0x0102_0304)],
            constants: vec![Value::Nil; 1],
            positions: vec![Position::default()],
            ..Module::default()
        };
        let bytes = serialize_module(&m);
        // header 8, constants section 4 + 4 + 1
        let code_at = 8 + 9;
        assert_eq!(&bytes[code_at..code_at + 4], &5u32.to_le_bytes());
        assert_eq!(&bytes[code_at + 4..code_at + 9], &[0, 4, 3, 2, 1]);
    }

    #[test]
    fn bad_magic_rejected() {
        assert_eq!(decode(b"NOPE\x01\0\0\0").unwrap_err(), FormatError::BadMagic);
        assert_eq!(decode(b"").unwrap_err(), FormatError::BadMagic);
        assert_eq!(decode(b"print 1;").unwrap_err(), FormatError::BadMagic);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = serialize_module(&sample());
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            decode(&bytes).unwrap_err(),
            FormatError::UnsupportedVersion { found: 2, expected: 1 }
        );
    }

    #[test]
    fn truncation_rejected_at_every_length() {
        let bytes = serialize_module(&sample());
        for cut in 4..bytes.len() {
            let err = decode(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, FormatError::Truncated { .. }),
                "cut at {cut}: unexpected {err:?}"
            );
        }
    }

    #[test]
    fn oversized_section_rejected() {
        let mut bytes = serialize_module(&sample());
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FormatError::SectionTooLarge { section: "constants", .. }));

        let tight = Config { max_section_bytes: 8, ..Config::default() };
        let err = deserialize_module(&serialize_module(&sample()), &tight).unwrap_err();
        assert!(matches!(err, FormatError::SectionTooLarge { .. }));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = serialize_module(&sample());
        bytes.push(0);
        assert_eq!(decode(&bytes).unwrap_err(), FormatError::TrailingBytes { count: 1 });
    }

    #[test]
    fn unknown_opcode_rejected() {
        let m = Module {
            code: vec![Instruction::simple(Op::Halt)],
            positions: vec![Position::default()],
            ..Module::default()
        };
        let mut bytes = serialize_module(&m);
        let code_at = 8 + 8 + 4;
        bytes[code_at] = 200;
        assert_eq!(decode(&bytes).unwrap_err(), FormatError::UnknownOpcode { op: 200, index: 0 });
    }

    #[test]
    fn unknown_constant_tag_rejected() {
        let m = Module { constants: vec![Value::Nil], ..Module::default() };
        let mut bytes = serialize_module(&m);
        bytes[8 + 8] = 9;
        assert_eq!(decode(&bytes).unwrap_err(), FormatError::UnknownTag { tag: 9 });
    }

    #[test]
    fn section_length_must_match_content() {
        // Declare one constant too few: the Nil byte is left over inside the section
        let m = Module { constants: vec![Value::Nil, Value::Nil], ..Module::default() };
        let mut bytes = serialize_module(&m);
        bytes[12..16].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            FormatError::SectionLengthMismatch { section: "constants", .. }
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let m = Module { constants: vec![Value::str("ab")], ..Module::default() };
        let mut bytes = serialize_module(&m);
        let str_at = 8 + 8 + 1 + 4;
        bytes[str_at] = 0xFF;
        assert_eq!(decode(&bytes).unwrap_err(), FormatError::InvalidUtf8 { section: "constants" });
    }

    #[test]
    fn out_of_range_operands_rejected() {
        let mut m = sample();
        m.code[3] = Instruction::new(Op::Const, 99);
        assert!(matches!(decode(&serialize_module(&m)).unwrap_err(), FormatError::Invalid(_)));

        let mut m = sample();
        m.code[0] = Instruction::new(Op::Jump, 6);
        assert!(matches!(decode(&serialize_module(&m)).unwrap_err(), FormatError::Invalid(_)));

        let mut m = sample();
        m.constants[5] = Value::Function { entry: 40, arity: 0 };
        assert!(matches!(decode(&serialize_module(&m)).unwrap_err(), FormatError::Invalid(_)));

        let mut m = sample();
        m.positions.pop();
        assert!(matches!(decode(&serialize_module(&m)).unwrap_err(), FormatError::Invalid(_)));
    }

    #[test]
    fn huge_declared_count_does_not_preallocate() {
        // count says 4 billion constants but the section holds none
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes).unwrap_err(), FormatError::Truncated { .. }));
    }

    #[test]
    fn error_codes() {
        assert_eq!(FormatError::BadMagic.code(), "ZY-F001");
        assert_eq!(FormatError::TrailingBytes { count: 1 }.code(), "ZY-F005");
    }
}
