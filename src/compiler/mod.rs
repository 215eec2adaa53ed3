use crate::ast::*;
use crate::bytecode::{FunctionEntry, Instruction, Module, Op};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("'return' outside of a function")]
    ReturnOutsideFunction,
    #[error("duplicate parameter '{name}'")]
    DuplicateParameter { name: String, first: Span },
    #[error("too many {0} in one module")]
    Limit(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Compile error at {position}: {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
    pub position: Position,
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self.kind {
            CompileErrorKind::UndefinedVariable(_) => "ZY-C001",
            CompileErrorKind::InvalidAssignmentTarget => "ZY-C002",
            CompileErrorKind::ReturnOutsideFunction => "ZY-C003",
            CompileErrorKind::DuplicateParameter { .. } => "ZY-C004",
            CompileErrorKind::Limit(_) => "ZY-C005",
        }
    }
}

type Result<T> = std::result::Result<T, CompileError>;

// ── Scopes ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Binding {
    Local(u32),
    Function { entry: u32, arity: u32 },
}

struct Scope {
    names: Vec<(String, Binding)>,
    /// First slot owned by this scope; everything from here up is released on exit.
    base_slot: u32,
}

/// One per function body being compiled, plus one for the top level.
struct FunctionCtx {
    scopes: Vec<Scope>,
    next_slot: u32,
    in_function: bool,
}

impl FunctionCtx {
    fn new(in_function: bool) -> Self {
        FunctionCtx {
            scopes: vec![Scope { names: Vec::new(), base_slot: 0 }],
            next_slot: 0,
            in_function,
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.names.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, b)| *b)
    }
}

// ── Compiler ─────────────────────────────────────────────────────────

struct Compiler<'a> {
    module: Module,
    map: &'a SourceMap,
    contexts: Vec<FunctionCtx>,
    /// Span attributed to instructions emitted right now.
    span: Span,
}

impl<'a> Compiler<'a> {
    fn new(map: &'a SourceMap) -> Self {
        Compiler {
            module: Module::default(),
            map,
            contexts: vec![FunctionCtx::new(false)],
            span: Span::UNKNOWN,
        }
    }

    fn error(&self, kind: CompileErrorKind, span: Span) -> CompileError {
        CompileError { kind, span, position: self.map.position(span.start) }
    }

    fn ctx(&mut self) -> &mut FunctionCtx {
        // The top-level context is pushed in `new` and never popped
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }

    // ── Emission ─────────────────────────────────────────────────────

    fn emit(&mut self, op: Op, operand: u32) -> usize {
        let idx = self.module.code.len();
        self.module.code.push(Instruction::new(op, operand));
        self.module.positions.push(self.map.position(self.span.start));
        idx
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op, 0)
    }

    fn here(&self) -> Result<u32> {
        u32::try_from(self.module.code.len())
            .map_err(|_| self.error(CompileErrorKind::Limit("instructions"), self.span))
    }

    /// Point the jump at `jump_pos` to the next instruction to be emitted.
    fn patch_jump(&mut self, jump_pos: usize) -> Result<()> {
        let target = self.here()?;
        self.module.code[jump_pos].operand = target;
        Ok(())
    }

    fn add_const(&mut self, val: Value) -> Result<u32> {
        if let Some(i) = self.module.constants.iter().position(|c| c.same_constant(&val)) {
            return Ok(i as u32);
        }
        let idx = u32::try_from(self.module.constants.len())
            .map_err(|_| self.error(CompileErrorKind::Limit("constants"), self.span))?;
        self.module.constants.push(val);
        Ok(idx)
    }

    fn emit_const(&mut self, val: Value) -> Result<()> {
        let idx = self.add_const(val)?;
        self.emit(Op::Const, idx);
        Ok(())
    }

    // ── Scopes ───────────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        let ctx = self.ctx();
        let base_slot = ctx.next_slot;
        ctx.scopes.push(Scope { names: Vec::new(), base_slot });
    }

    fn end_scope(&mut self) {
        let ctx = self.ctx();
        if let Some(scope) = ctx.scopes.pop() {
            ctx.next_slot = scope.base_slot;
        }
    }

    fn declare(&mut self, name: &str, binding: Binding) {
        if let Some(scope) = self.ctx().scopes.last_mut() {
            scope.names.push((name.to_string(), binding));
        }
    }

    fn alloc_slot(&mut self, span: Span) -> Result<u32> {
        let ctx = self.ctx();
        let slot = ctx.next_slot;
        match slot.checked_add(1) {
            Some(next) => {
                ctx.next_slot = next;
                Ok(slot)
            }
            None => Err(self.error(CompileErrorKind::Limit("locals"), span)),
        }
    }

    /// Locals come from the current function only; enclosing functions
    /// contribute function names but their locals are out of reach.
    fn resolve(&self, name: &str, span: Span) -> Result<Binding> {
        let undefined = || self.error(CompileErrorKind::UndefinedVariable(name.to_string()), span);
        let (current, enclosing) = self.contexts.split_last().ok_or_else(undefined)?;
        if let Some(b) = current.lookup(name) {
            return Ok(b);
        }
        match enclosing.iter().rev().find_map(|ctx| ctx.lookup(name)) {
            Some(b @ Binding::Function { .. }) => Ok(b),
            _ => Err(undefined()),
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn compile_program(mut self, program: &Program) -> Result<Module> {
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        self.emit(Op::Halt, 0);
        Ok(self.module)
    }

    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<()> {
        self.begin_scope();
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        self.end_scope();
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        self.span = stmt.span;
        match &stmt.node {
            StmtKind::Let { name, value } => {
                // The initializer sees the previous binding of `name`, if any
                self.compile_expr(value)?;
                let slot = self.alloc_slot(stmt.span)?;
                self.span = stmt.span;
                self.emit(Op::StoreLocal, slot);
                self.declare(name, Binding::Local(slot));
            }
            StmtKind::Assign { target, value } => {
                let slot = match &target.node {
                    ExprKind::Variable(name) => match self.resolve(name, target.span)? {
                        Binding::Local(slot) => slot,
                        Binding::Function { .. } => {
                            return Err(self.error(CompileErrorKind::InvalidAssignmentTarget, target.span));
                        }
                    },
                    _ => return Err(self.error(CompileErrorKind::InvalidAssignmentTarget, target.span)),
                };
                self.compile_expr(value)?;
                self.span = stmt.span;
                self.emit(Op::StoreLocal, slot);
            }
            StmtKind::If { condition, then_block, else_block } => {
                self.compile_expr(condition)?;
                self.span = stmt.span;
                let else_jump = self.emit_jump(Op::JumpIfFalse);
                self.compile_block(then_block)?;
                match else_block {
                    Some(else_block) => {
                        self.span = stmt.span;
                        let end_jump = self.emit_jump(Op::Jump);
                        self.patch_jump(else_jump)?;
                        self.compile_block(else_block)?;
                        self.patch_jump(end_jump)?;
                    }
                    None => self.patch_jump(else_jump)?,
                }
            }
            StmtKind::While { condition, body } => {
                let loop_start = self.here()?;
                self.compile_expr(condition)?;
                self.span = stmt.span;
                let exit_jump = self.emit_jump(Op::JumpIfFalse);
                self.compile_block(body)?;
                self.span = stmt.span;
                self.emit(Op::Jump, loop_start);
                self.patch_jump(exit_jump)?;
            }
            StmtKind::Print(expr) => {
                self.compile_expr(expr)?;
                self.span = stmt.span;
                self.emit(Op::Print, 0);
            }
            StmtKind::Function { name, params, body } => {
                self.compile_function(name, params, body, stmt.span)?;
            }
            StmtKind::Return(value) => {
                if !self.ctx().in_function {
                    return Err(self.error(CompileErrorKind::ReturnOutsideFunction, stmt.span));
                }
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => self.emit_const(Value::Nil)?,
                }
                self.span = stmt.span;
                self.emit(Op::Return, 0);
            }
            StmtKind::Block(stmts) => self.compile_block(stmts)?,
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.span = stmt.span;
                self.emit(Op::Pop, 0);
            }
        }
        Ok(())
    }

    /// The body is emitted inline and skipped over by a jump; the name is
    /// bound before the body so the function can call itself.
    fn compile_function(&mut self, name: &str, params: &[Param], body: &[Stmt], span: Span) -> Result<()> {
        for (i, p) in params.iter().enumerate() {
            if let Some(first) = params[..i].iter().find(|q| q.name == p.name) {
                let kind = CompileErrorKind::DuplicateParameter { name: p.name.clone(), first: first.span };
                return Err(self.error(kind, p.span));
            }
        }
        let arity = u32::try_from(params.len())
            .map_err(|_| self.error(CompileErrorKind::Limit("parameters"), span))?;

        let skip = self.emit_jump(Op::Jump);
        let entry = self.here()?;
        self.declare(name, Binding::Function { entry, arity });
        self.module.functions.push(FunctionEntry { name: name.to_string(), entry, arity });
        tracing::trace!(name, entry, arity, "compiling function");

        self.contexts.push(FunctionCtx::new(true));
        for (slot, p) in (0u32..).zip(params) {
            self.declare(&p.name, Binding::Local(slot));
        }
        self.ctx().next_slot = arity;
        self.ctx().scopes[0].base_slot = arity;

        let compiled = body.iter().try_for_each(|stmt| self.compile_stmt(stmt));
        self.contexts.pop();
        compiled?;

        self.span = span;
        self.emit_const(Value::Nil)?;
        self.emit(Op::Return, 0);
        self.patch_jump(skip)?;
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn compile_expr(&mut self, expr: &Expr) -> Result<()> {
        self.span = expr.span;
        match &expr.node {
            ExprKind::Literal(lit) => {
                let val = match lit {
                    Literal::Int(n) => Value::Int(*n),
                    Literal::Float(n) => Value::Float(*n),
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Str(s) => Value::str(s),
                    Literal::Nil => Value::Nil,
                };
                self.emit_const(val)?;
            }
            ExprKind::Variable(name) => match self.resolve(name, expr.span)? {
                Binding::Local(slot) => {
                    self.emit(Op::LoadLocal, slot);
                }
                Binding::Function { entry, arity } => self.emit_const(Value::Function { entry, arity })?,
            },
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.span = expr.span;
                let op = match op {
                    UnaryOp::Negate => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.emit(op, 0);
            }
            ExprKind::Binary { op: op @ (BinOp::And | BinOp::Or), left, right } => {
                let keep = if *op == BinOp::And { Op::JumpIfFalseKeep } else { Op::JumpIfTrueKeep };
                self.compile_expr(left)?;
                self.span = expr.span;
                let short = self.emit_jump(keep);
                self.emit(Op::Pop, 0);
                self.compile_expr(right)?;
                self.span = expr.span;
                // Jumps to the next instruction either way; only type-checks the right operand
                let check = self.emit_jump(keep);
                self.patch_jump(check)?;
                self.patch_jump(short)?;
            }
            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.span = expr.span;
                let op = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Subtract => Op::Sub,
                    BinOp::Multiply => Op::Mul,
                    BinOp::Divide => Op::Div,
                    BinOp::Modulo => Op::Mod,
                    BinOp::Equals => Op::Eq,
                    BinOp::NotEquals => Op::Ne,
                    BinOp::Less => Op::Lt,
                    BinOp::LessOrEqual => Op::Le,
                    BinOp::Greater => Op::Gt,
                    BinOp::GreaterOrEqual => Op::Ge,
                    BinOp::And | BinOp::Or => unreachable!("short-circuit operators handled above"),
                };
                self.emit(op, 0);
            }
            ExprKind::Call { callee, args } => {
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.span = expr.span;
                let argc = u32::try_from(args.len())
                    .map_err(|_| self.error(CompileErrorKind::Limit("arguments"), expr.span))?;
                self.emit(Op::Call, argc);
            }
        }
        Ok(())
    }
}

/// Lower a parsed program into a module. Stops at the first error.
pub fn compile(program: &Program, map: &SourceMap) -> Result<Module> {
    let module = Compiler::new(map).compile_program(program)?;
    tracing::debug!(
        instructions = module.code.len(),
        constants = module.constants.len(),
        functions = module.functions.len(),
        "compiled module"
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{lexer, parser};

    fn try_compile(source: &str) -> Result<Module> {
        let tokens = lexer::lex(source).unwrap();
        let program = parser::parse(tokens, &Config::default()).unwrap();
        compile(&program, &SourceMap::new(source))
    }

    fn compile_ok(source: &str) -> Module {
        match try_compile(source) {
            Ok(m) => m,
            Err(e) => panic!("compile error for {source:?}: {e}"),
        }
    }

    fn compile_err(source: &str) -> CompileError {
        match try_compile(source) {
            Ok(m) => panic!("expected a compile error, got:\n{}", m.disassemble()),
            Err(e) => e,
        }
    }

    fn ops(m: &Module) -> Vec<Op> {
        m.code.iter().map(|i| i.op).collect()
    }

    #[test]
    fn let_and_print() {
        let m = compile_ok("let x = 1 + 2 * 3; print x;");
        assert_eq!(
            ops(&m),
            vec![
                Op::Const, Op::Const, Op::Const, Op::Mul, Op::Add,
                Op::StoreLocal, Op::LoadLocal, Op::Print, Op::Halt,
            ]
        );
        assert_eq!(m.constants, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(m.positions.len(), m.code.len());
    }

    #[test]
    fn constants_are_deduplicated() {
        let m = compile_ok(r#"print 1; print 1; print "a"; print "a"; print 1.0;"#);
        assert_eq!(m.constants, vec![Value::Int(1), Value::str("a"), Value::Float(1.0)]);
    }

    #[test]
    fn undefined_variable() {
        let e = compile_err("print y;");
        assert_eq!(e.kind, CompileErrorKind::UndefinedVariable("y".into()));
        assert_eq!(e.position.line, 1);
        assert_eq!(e.position.column, 7);
        assert_eq!(e.code(), "ZY-C001");
    }

    #[test]
    fn block_scope_ends_visibility() {
        let e = compile_err("{ let a = 1; } print a;");
        assert_eq!(e.kind, CompileErrorKind::UndefinedVariable("a".into()));
    }

    #[test]
    fn sibling_blocks_reuse_slots() {
        let m = compile_ok("{ let a = 1; print a; } { let b = 2; print b; }");
        let stores: Vec<u32> = m.code.iter().filter(|i| i.op == Op::StoreLocal).map(|i| i.operand).collect();
        assert_eq!(stores, vec![0, 0]);
    }

    #[test]
    fn shadowing_gets_fresh_slot() {
        let m = compile_ok("let a = 1; let a = a + 1; print a;");
        let stores: Vec<u32> = m.code.iter().filter(|i| i.op == Op::StoreLocal).map(|i| i.operand).collect();
        assert_eq!(stores, vec![0, 1]);
        // the second initializer reads the first binding
        assert_eq!(m.code[1], Instruction::new(Op::LoadLocal, 0));
    }

    #[test]
    fn assignment_targets() {
        compile_ok("let a = 1; a = 2;");
        let e = compile_err("1 = 2;");
        assert_eq!(e.kind, CompileErrorKind::InvalidAssignmentTarget);
        let e = compile_err("fn f() {} f = 1;");
        assert_eq!(e.kind, CompileErrorKind::InvalidAssignmentTarget);
        let e = compile_err("b = 1;");
        assert_eq!(e.kind, CompileErrorKind::UndefinedVariable("b".into()));
    }

    #[test]
    fn return_outside_function() {
        let e = compile_err("return 1;");
        assert_eq!(e.kind, CompileErrorKind::ReturnOutsideFunction);
        let e = compile_err("{ return; }");
        assert_eq!(e.kind, CompileErrorKind::ReturnOutsideFunction);
    }

    #[test]
    fn duplicate_parameter() {
        let e = compile_err("fn f(a, b, a) { }");
        assert_eq!(
            e.kind,
            CompileErrorKind::DuplicateParameter { name: "a".into(), first: Span::new(5, 6) }
        );
        assert_eq!(e.position.column, 12);
    }

    #[test]
    fn function_layout() {
        let m = compile_ok("fn add(a, b) { return a + b; } print add(2, 3);");
        assert_eq!(m.functions, vec![FunctionEntry { name: "add".into(), entry: 1, arity: 2 }]);
        assert_eq!(m.code[0].op, Op::Jump);
        let skip_to = m.code[0].operand as usize;
        assert_eq!(&ops(&m)[1..skip_to], &[
            Op::LoadLocal, Op::LoadLocal, Op::Add, Op::Return, Op::Const, Op::Return,
        ]);
        assert!(m.constants.contains(&Value::Function { entry: 1, arity: 2 }));
        assert_eq!(*ops(&m).last().unwrap(), Op::Halt);
    }

    #[test]
    fn recursion_resolves_but_forward_reference_does_not() {
        compile_ok("fn f(n) { if n > 0 { return f(n - 1); } return 0; } print f(3);");
        let e = compile_err("print g(); fn g() { return 1; }");
        assert_eq!(e.kind, CompileErrorKind::UndefinedVariable("g".into()));
    }

    #[test]
    fn no_capture_of_enclosing_locals() {
        let e = compile_err("let x = 1; fn f() { return x; }");
        assert_eq!(e.kind, CompileErrorKind::UndefinedVariable("x".into()));
        // but enclosing function names are visible
        compile_ok("fn a() { return 1; } fn b() { return a(); }");
    }

    #[test]
    fn if_else_jumps_are_patched() {
        let m = compile_ok("if true { print 1; } else { print 2; }");
        for inst in &m.code {
            if inst.op.operand_kind() == crate::bytecode::OperandKind::Target {
                assert!((inst.operand as usize) < m.code.len(), "{}", m.disassemble());
                assert_ne!(inst.operand, 0);
            }
        }
    }

    #[test]
    fn while_loops_back() {
        let m = compile_ok("let i = 0; while i < 3 { i = i + 1; }");
        let back = m.code.iter().rev().find(|i| i.op == Op::Jump).unwrap();
        // loop start is the condition's first instruction, just after `let`
        assert_eq!(back.operand, 2);
    }

    #[test]
    fn short_circuit_shape() {
        let m = compile_ok("print true and false;");
        assert_eq!(
            ops(&m),
            vec![Op::Const, Op::JumpIfFalseKeep, Op::Pop, Op::Const, Op::JumpIfFalseKeep, Op::Print, Op::Halt]
        );
        assert_eq!(m.code[1].operand, 5);
        assert_eq!(m.code[4].operand, 5);
    }

    #[test]
    fn expression_statements_pop() {
        let m = compile_ok("fn f() {} f();");
        let tail: Vec<Op> = ops(&m).into_iter().rev().take(3).collect();
        assert_eq!(tail, vec![Op::Halt, Op::Pop, Op::Call]);
    }

    #[test]
    fn positions_follow_source_lines() {
        let m = compile_ok("let a = 1;\nprint a / 0;");
        let div = m.code.iter().position(|i| i.op == Op::Div).unwrap();
        assert_eq!(m.positions[div].line, 2);
        assert_eq!(m.positions[div].column, 7);
    }
}
