use std::rc::Rc;

/// A runtime value, and the payload of a constant-pool entry.
///
/// There are no container types, so values never form cycles; strings are
/// reference-counted so copies on the operand stack stay cheap.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Nil,
    Function { entry: u32, arity: u32 },
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Nil => "nil",
            Value::Function { .. } => "function",
        }
    }

    /// Constant-pool identity: same kind and same bits. `1` and `1.0` stay
    /// distinct, as do `0.0` and `-0.0`.
    pub fn same_constant(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (
                Value::Function { entry: e1, arity: a1 },
                Value::Function { entry: e2, arity: a2 },
            ) => e1 == e2 && a1 == a2,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.is_finite() && n.fract() == 0.0 {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Nil => write!(f, "nil"),
            Value::Function { entry, arity } => write!(f, "<fn@{}/{}>", entry, arity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_numbers() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "inf");
    }

    #[test]
    fn display_other_kinds() {
        assert_eq!(Value::str("hi").to_string(), "hi");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Function { entry: 4, arity: 2 }.to_string(), "<fn@4/2>");
    }

    #[test]
    fn constant_identity_distinguishes_kinds() {
        assert!(Value::Int(1).same_constant(&Value::Int(1)));
        assert!(!Value::Int(1).same_constant(&Value::Float(1.0)));
        assert!(!Value::Float(0.0).same_constant(&Value::Float(-0.0)));
        assert!(Value::str("a").same_constant(&Value::str("a")));
        assert!(!Value::Bool(true).same_constant(&Value::Bool(false)));
    }
}
