use std::io::Write;

use crate::ast::Position;
use crate::bytecode::{Module, Op};
use crate::config::Config;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expected {expected} arguments but got {found}")]
    ArityMismatch { expected: u32, found: u32 },
    #[error("value of type {0} is not callable")]
    NotCallable(&'static str),
    #[error("stack overflow: more than {limit} nested calls")]
    StackOverflow { limit: usize },
    #[error("read of local slot {0} before it was assigned")]
    UndefinedVariable(u32),
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("corrupt module: {0}")]
    CorruptModule(String),
    #[error("cannot write output: {0}")]
    Output(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Runtime error at {position}: {kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Index of the failing instruction.
    pub ip: usize,
    pub position: Position,
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self.kind {
            RuntimeErrorKind::TypeMismatch(_) => "ZY-R001",
            RuntimeErrorKind::DivisionByZero => "ZY-R002",
            RuntimeErrorKind::ArityMismatch { .. } => "ZY-R003",
            RuntimeErrorKind::NotCallable(_) => "ZY-R004",
            RuntimeErrorKind::StackOverflow { .. } => "ZY-R005",
            RuntimeErrorKind::UndefinedVariable(_) => "ZY-R006",
            RuntimeErrorKind::IntegerOverflow => "ZY-R007",
            RuntimeErrorKind::CorruptModule(_) => "ZY-R008",
            RuntimeErrorKind::Output(_) => "ZY-R009",
        }
    }
}

type VmResult<T> = Result<T, RuntimeErrorKind>;

// ── Output sinks ─────────────────────────────────────────────────────

/// Receives one event per executed `print`.
pub trait Output {
    fn print(&mut self, line: &str) -> std::io::Result<()>;
}

impl Output for Vec<String> {
    fn print(&mut self, line: &str) -> std::io::Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Writes each event as a line to any `io::Write`, flushing per line so
/// output interleaves correctly with diagnostics.
pub struct LineWriter<W: Write>(pub W);

impl<W: Write> Output for LineWriter<W> {
    fn print(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.0, "{line}")?;
        self.0.flush()
    }
}

/// Result of running a module to completion: everything printed, and the
/// error that stopped execution if there was one. Output produced before an
/// error is kept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Execution {
    pub output: Vec<String>,
    pub error: Option<RuntimeError>,
}

impl Execution {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ── Machine ──────────────────────────────────────────────────────────

struct Frame {
    ip: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame {
    fn new(ip: usize, locals: Vec<Value>) -> Self {
        Frame { ip, stack: Vec::with_capacity(16), locals }
    }
}

pub struct Vm<'a> {
    module: &'a Module,
    config: &'a Config,
    frames: Vec<Frame>,
}

impl<'a> Vm<'a> {
    pub fn new(module: &'a Module, config: &'a Config) -> Self {
        Vm { module, config, frames: Vec::with_capacity(64) }
    }

    /// Execute from instruction 0 until `Halt`, streaming prints to `out`.
    /// On error every frame is dropped before returning.
    pub fn run_with(&mut self, out: &mut dyn Output) -> Result<(), RuntimeError> {
        self.frames.clear();
        self.frames.push(Frame::new(0, Vec::new()));
        let result = self.execute(out);
        self.frames.clear();
        result.map_err(|(kind, ip)| RuntimeError {
            kind,
            ip,
            position: self.module.position_of(ip).unwrap_or_default(),
        })
    }

    fn frame(&mut self) -> VmResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeErrorKind::CorruptModule("no active frame".into()))
    }

    fn push(&mut self, v: Value) -> VmResult<()> {
        let limit = self.config.max_stack_size;
        let frame = self.frame()?;
        if frame.stack.len() >= limit {
            return Err(RuntimeErrorKind::CorruptModule(format!(
                "operand stack grew past {limit} values"
            )));
        }
        frame.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.frame()?
            .stack
            .pop()
            .ok_or_else(|| RuntimeErrorKind::CorruptModule("operand stack underflow".into()))
    }

    fn peek(&mut self) -> VmResult<&Value> {
        self.frame()?
            .stack
            .last()
            .ok_or_else(|| RuntimeErrorKind::CorruptModule("operand stack underflow".into()))
    }

    fn execute(&mut self, out: &mut dyn Output) -> Result<(), (RuntimeErrorKind, usize)> {
        let module = self.module;
        loop {
            let ip = match self.frames.last() {
                Some(f) => f.ip,
                None => return Err((RuntimeErrorKind::CorruptModule("no active frame".into()), 0)),
            };
            let Some(&inst) = module.code.get(ip) else {
                return Err((RuntimeErrorKind::CorruptModule(format!("ran past the end of the code at {ip}")), ip));
            };
            tracing::trace!(ip, op = inst.op.mnemonic(), operand = inst.operand, depth = self.frames.len(), "dispatch");
            if let Some(f) = self.frames.last_mut() {
                f.ip = ip + 1;
            }
            match self.step(inst.op, inst.operand, out) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(kind) => return Err((kind, ip)),
            }
        }
    }

    /// Execute one instruction. Returns `true` on `Halt`.
    fn step(&mut self, op: Op, operand: u32, out: &mut dyn Output) -> VmResult<bool> {
        match op {
            Op::Const => {
                let v = self
                    .module
                    .constants
                    .get(operand as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::CorruptModule(format!("no constant #{operand}")))?;
                self.push(v)?;
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::LoadLocal => {
                let v = self
                    .frame()?
                    .locals
                    .get(operand as usize)
                    .cloned()
                    .ok_or(RuntimeErrorKind::UndefinedVariable(operand))?;
                self.push(v)?;
            }
            Op::StoreLocal => {
                let v = self.pop()?;
                let locals = &mut self.frame()?.locals;
                let slot = operand as usize;
                if slot >= locals.len() {
                    locals.resize(slot + 1, Value::Nil);
                }
                locals[slot] = v;
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(arith(op, a, b)?)?;
            }
            Op::Neg => {
                let v = match self.pop()? {
                    Value::Int(n) => Value::Int(n.checked_neg().ok_or(RuntimeErrorKind::IntegerOverflow)?),
                    Value::Float(n) => Value::Float(-n),
                    other => return Err(mismatch(format!("cannot negate {}", other.type_name()))),
                };
                self.push(v)?;
            }
            Op::Not => {
                let b = expect_bool(self.pop()?, "'not'")?;
                self.push(Value::Bool(!b))?;
            }
            Op::Eq | Op::Ne => {
                let b = self.pop()?;
                let a = self.pop()?;
                let eq = values_equal(&a, &b);
                self.push(Value::Bool(if op == Op::Eq { eq } else { !eq }))?;
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(compare(op, &a, &b)?))?;
            }
            Op::Jump => self.frame()?.ip = operand as usize,
            Op::JumpIfFalse => {
                if !expect_bool(self.pop()?, "a condition")? {
                    self.frame()?.ip = operand as usize;
                }
            }
            Op::JumpIfFalseKeep | Op::JumpIfTrueKeep => {
                let what = if op == Op::JumpIfFalseKeep { "'and'" } else { "'or'" };
                let b = expect_bool(self.peek()?.clone(), what)?;
                if b == (op == Op::JumpIfTrueKeep) {
                    self.frame()?.ip = operand as usize;
                }
            }
            Op::Call => self.call(operand)?,
            Op::Return => {
                let result = self.pop()?;
                if self.frames.len() <= 1 {
                    return Err(RuntimeErrorKind::CorruptModule("return from the top level".into()));
                }
                self.frames.pop();
                tracing::trace!(depth = self.frames.len(), "return");
                self.push(result)?;
            }
            Op::Print => {
                let v = self.pop()?;
                out.print(&v.to_string())
                    .map_err(|e| RuntimeErrorKind::Output(e.to_string()))?;
            }
            Op::Halt => return Ok(true),
        }
        Ok(false)
    }

    fn call(&mut self, argc: u32) -> VmResult<()> {
        let frame = self.frame()?;
        let argc_len = argc as usize;
        if frame.stack.len() <= argc_len {
            return Err(RuntimeErrorKind::CorruptModule("operand stack underflow".into()));
        }
        let callee_at = frame.stack.len() - argc_len - 1;
        let (entry, arity) = match &frame.stack[callee_at] {
            Value::Function { entry, arity } => (*entry, *arity),
            other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
        };
        if arity != argc {
            return Err(RuntimeErrorKind::ArityMismatch { expected: arity, found: argc });
        }
        let args = frame.stack.split_off(callee_at + 1);
        frame.stack.pop();
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeErrorKind::StackOverflow { limit: self.config.max_call_depth });
        }
        tracing::trace!(entry, arity, depth = self.frames.len() + 1, "call");
        self.frames.push(Frame::new(entry as usize, args));
        Ok(())
    }
}

/// Run a module to completion, collecting its output.
pub fn run(module: &Module, config: &Config) -> Execution {
    let mut output = Vec::new();
    let error = Vm::new(module, config).run_with(&mut output).err();
    tracing::debug!(lines = output.len(), failed = error.is_some(), "execution finished");
    Execution { output, error }
}

// ── Operations ───────────────────────────────────────────────────────

fn mismatch(msg: String) -> RuntimeErrorKind {
    RuntimeErrorKind::TypeMismatch(msg)
}

fn expect_bool(v: Value, what: &str) -> VmResult<bool> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(mismatch(format!("{what} expects a bool, found {}", other.type_name()))),
    }
}

fn symbol(op: Op) -> &'static str {
    match op {
        Op::Add => "+",
        Op::Sub => "-",
        Op::Mul => "*",
        Op::Div => "/",
        Op::Mod => "%",
        Op::Lt => "<",
        Op::Le => "<=",
        Op::Gt => ">",
        Op::Ge => ">=",
        _ => op.mnemonic(),
    }
}

fn operand_mismatch(op: Op, a: &Value, b: &Value) -> RuntimeErrorKind {
    mismatch(format!("cannot apply '{}' to {} and {}", symbol(op), a.type_name(), b.type_name()))
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

fn arith(op: Op, a: Value, b: Value) -> VmResult<Value> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            if matches!(op, Op::Div | Op::Mod) && y == 0 {
                return Err(RuntimeErrorKind::DivisionByZero);
            }
            let r = match op {
                Op::Add => x.checked_add(y),
                Op::Sub => x.checked_sub(y),
                Op::Mul => x.checked_mul(y),
                Op::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            r.map(Value::Int).ok_or(RuntimeErrorKind::IntegerOverflow)
        }
        (Value::Str(x), Value::Str(y)) if op == Op::Add => {
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            Ok(Value::str(&s))
        }
        _ => {
            let (Some(x), Some(y)) = (as_float(&a), as_float(&b)) else {
                return Err(operand_mismatch(op, &a, &b));
            };
            if matches!(op, Op::Div | Op::Mod) && y == 0.0 {
                return Err(RuntimeErrorKind::DivisionByZero);
            }
            let r = match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => x / y,
                _ => x % y,
            };
            Ok(Value::Float(r))
        }
    }
}

/// Numbers compare by value across Int and Float; other kinds only equal their own kind.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => as_float(a) == as_float(b),
        _ => a == b,
    }
}

fn compare(op: Op, a: &Value, b: &Value) -> VmResult<bool> {
    let ord = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.partial_cmp(y),
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Err(operand_mismatch(op, a, b)),
        },
    };
    // NaN compares false to everything
    let Some(ord) = ord else { return Ok(false) };
    Ok(match op {
        Op::Lt => ord.is_lt(),
        Op::Le => ord.is_le(),
        Op::Gt => ord.is_gt(),
        _ => ord.is_ge(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;

    fn exec(source: &str) -> Execution {
        exec_with(source, &Config::default())
    }

    fn exec_with(source: &str, config: &Config) -> Execution {
        let module = crate::compile_source(source, config).unwrap();
        run(&module, config)
    }

    fn output(source: &str) -> Vec<String> {
        let ex = exec(source);
        assert!(ex.is_ok(), "unexpected error: {:?}", ex.error);
        ex.output
    }

    fn error(source: &str) -> RuntimeError {
        exec(source).error.expect("expected a runtime error")
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(output("let x = 1 + 2 * 3; print x;"), vec!["7"]);
        assert_eq!(output("print (1 + 2) * 3;"), vec!["9"]);
        assert_eq!(output("print 7 % 3; print -7 / 2;"), vec!["1", "-3"]);
    }

    #[test]
    fn float_promotion_and_printing() {
        assert_eq!(output("print 1 + 0.5; print 2.0 * 2; print 1.5;"), vec!["1.5", "4.0", "1.5"]);
        assert_eq!(output("print 1 == 1.0; print 1 < 1.5;"), vec!["true", "true"]);
    }

    #[test]
    fn string_concat_and_compare() {
        assert_eq!(output(r#"print "ab" + "cd"; print "a" < "b";"#), vec!["abcd", "true"]);
    }

    #[test]
    fn cross_kind_equality_is_false() {
        assert_eq!(output(r#"print 1 == "1"; print nil != false; print nil == nil;"#), vec![
            "false", "true", "true"
        ]);
    }

    #[test]
    fn division_by_zero() {
        let e = error("print 1 / 0;");
        assert_eq!(e.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(e.position.line, 1);
        assert_eq!(e.position.column, 7);
        assert_eq!(error("print 1.0 % 0.0;").kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(error("print 5 % 0;").kind, RuntimeErrorKind::DivisionByZero);
    }

    #[test]
    fn output_before_error_is_kept() {
        let ex = exec("print 1; print 2; print 1 / 0; print 3;");
        assert_eq!(ex.output, vec!["1", "2"]);
        assert_eq!(ex.error.unwrap().kind, RuntimeErrorKind::DivisionByZero);
    }

    #[test]
    fn type_mismatch() {
        let e = error(r#"print "a" + true;"#);
        assert!(matches!(e.kind, RuntimeErrorKind::TypeMismatch(ref m) if m.contains("string and bool")), "{e}");
        assert!(matches!(error("if 1 { }").kind, RuntimeErrorKind::TypeMismatch(_)));
        assert!(matches!(error("print not 1;").kind, RuntimeErrorKind::TypeMismatch(_)));
        assert!(matches!(error("print true and 1;").kind, RuntimeErrorKind::TypeMismatch(_)));
        assert!(matches!(error("print -\"x\";").kind, RuntimeErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn integer_overflow_is_checked() {
        assert_eq!(error("print 9223372036854775807 + 1;").kind, RuntimeErrorKind::IntegerOverflow);
        assert_eq!(error("let m = -9223372036854775807 - 1; print m / -1;").kind, RuntimeErrorKind::IntegerOverflow);
    }

    #[test]
    fn if_else_and_while() {
        assert_eq!(output("if true { print 1; } else { print 2; }"), vec!["1"]);
        assert_eq!(output("if false { print 1; } else if true { print 2; }"), vec!["2"]);
        assert_eq!(output("let i = 0; while i < 3 { print i; i = i + 1; }"), vec!["0", "1", "2"]);
    }

    #[test]
    fn short_circuit_skips_right_side() {
        assert_eq!(output("print false and 1 / 0 == 0;"), vec!["false"]);
        assert_eq!(output("print true or 1 / 0 == 0;"), vec!["true"]);
        assert_eq!(output("print true and false; print false or true;"), vec!["false", "true"]);
    }

    #[test]
    fn functions_and_recursion() {
        assert_eq!(output("fn add(a, b) { return a + b; } print add(2, 3);"), vec!["5"]);
        assert_eq!(
            output("fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); } print fib(15);"),
            vec!["610"]
        );
        assert_eq!(output("fn f() { } print f();"), vec!["nil"]);
        assert_eq!(output("fn f() { } print f;"), vec!["<fn@1/0>"]);
        assert_eq!(output("fn f(x) { return x * 2; } let g = f; print g(4);"), vec!["8"]);
    }

    #[test]
    fn call_errors() {
        let e = error("fn f(a) { return a; } print f(1, 2);");
        assert_eq!(e.kind, RuntimeErrorKind::ArityMismatch { expected: 1, found: 2 });
        assert_eq!(error("let x = 3; x();").kind, RuntimeErrorKind::NotCallable("int"));
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let config = Config::default().with_max_call_depth(50);
        let ex = exec_with("fn f(n) { return f(n + 1); } f(0);", &config);
        assert_eq!(ex.error.unwrap().kind, RuntimeErrorKind::StackOverflow { limit: 50 });
    }

    #[test]
    fn execution_is_deterministic() {
        let module = crate::compile_source("let i = 0; while i < 5 { print i * i; i = i + 1; } print 1 / 0;", &Config::default()).unwrap();
        assert_eq!(run(&module, &Config::default()), run(&module, &Config::default()));
    }

    #[test]
    fn corrupt_modules_fail_cleanly() {
        let config = Config::default();
        let empty = Module::default();
        assert!(matches!(run(&empty, &config).error.unwrap().kind, RuntimeErrorKind::CorruptModule(_)));

        let underflow = Module {
            code: vec![Instruction::simple(Op::Pop), Instruction::simple(Op::Halt)],
            positions: vec![Position::default(); 2],
            ..Module::default()
        };
        assert!(matches!(run(&underflow, &config).error.unwrap().kind, RuntimeErrorKind::CorruptModule(_)));

        let unset = Module {
            code: vec![Instruction::new(Op::LoadLocal, 3), Instruction::simple(Op::Halt)],
            positions: vec![Position::default(); 2],
            ..Module::default()
        };
        assert_eq!(run(&unset, &config).error.unwrap().kind, RuntimeErrorKind::UndefinedVariable(3));
    }

    #[test]
    fn line_writer_streams() {
        let module = crate::compile_source(r#"print "a"; print 2;"#, &Config::default()).unwrap();
        let config = Config::default();
        let mut sink = LineWriter(Vec::new());
        Vm::new(&module, &config).run_with(&mut sink).unwrap();
        assert_eq!(String::from_utf8(sink.0).unwrap(), "a\n2\n");
    }

    #[test]
    fn error_codes() {
        assert_eq!(error("print 1 / 0;").code(), "ZY-R002");
    }
}
