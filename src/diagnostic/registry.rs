/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    pub short: &'static str,
    pub long: &'static str,
}

/// Every stable diagnostic code zy can emit.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Lexer ────────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZY-L001",
        short: "illegal character",
        long: r#"## ZY-L001: illegal character

A character that is not part of the language appeared outside a string
or comment. Lexing stops at the first one.

**Example:**

    let a = 1 & 2;

Use the keywords `and`, `or` and `not` for logic. Strings use double
quotes only.
"#,
    },
    ErrorEntry {
        code: "ZY-L002",
        short: "unterminated string literal",
        long: r#"## ZY-L002: unterminated string literal

A string was opened with `"` but the file ended before the closing quote.
The error points at the opening quote.

**Example:**

    let x = "unterminated

**Fix:**

    let x = "terminated";
"#,
    },
    ErrorEntry {
        code: "ZY-L003",
        short: "invalid escape sequence",
        long: r#"## ZY-L003: invalid escape sequence

Inside a string, `\` must be followed by one of `n`, `t`, `r`, `0`, `\`
or `"`.

**Example:**

    print "C:\path";

**Fix:**

    print "C:\\path";
"#,
    },
    ErrorEntry {
        code: "ZY-L004",
        short: "integer literal too large",
        long: r#"## ZY-L004: integer literal too large

Integers are signed 64-bit. A literal above 9223372036854775807 cannot be
represented. Write it as a float (`1e20`) if an approximation is fine.

A leading `-` is an operator applied after the literal is read, so the
smallest integer has to be written as `-9223372036854775807 - 1`.
"#,
    },

    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZY-P001",
        short: "expected token missing",
        long: r#"## ZY-P001: expected token missing

The parser needed a specific token, most often `;` after a statement or
`}` closing a block, and found something else.

**Example:**

    print 1
    print 2;

After reporting, the parser skips ahead to the next statement and keeps
going, so one run shows every syntax error in the file.
"#,
    },
    ErrorEntry {
        code: "ZY-P002",
        short: "unexpected token",
        long: r#"## ZY-P002: unexpected token

A token appeared where no statement or expression can start.

**Example:**

    print );
"#,
    },
    ErrorEntry {
        code: "ZY-P003",
        short: "nesting too deep",
        long: r#"## ZY-P003: nesting too deep

Expressions or blocks are nested beyond the parser's limit (64 levels by
default, `--max-nesting-depth` to change it). Every operator in a chain
like `a + b + c` and every call in `f()()` counts as one level. Break the
expression up with intermediate `let` bindings.
"#,
    },

    // ── Compiler ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZY-C001",
        short: "undefined variable",
        long: r#"## ZY-C001: undefined variable

A name was used that has no visible declaration. Variables are visible
from their `let` to the end of the enclosing block. Functions are visible
from their declaration onward, so a function can call itself but not one
declared later.

Function bodies do not see the locals of the code around them.

**Example:**

    let x = 1;
    fn f() { return x; }   # 'x' is not visible inside f
"#,
    },
    ErrorEntry {
        code: "ZY-C002",
        short: "invalid assignment target",
        long: r#"## ZY-C002: invalid assignment target

Only variables declared with `let` (or parameters) can be assigned to.

**Example:**

    f() = 3;
    1 = 2;
"#,
    },
    ErrorEntry {
        code: "ZY-C003",
        short: "return outside of a function",
        long: r#"## ZY-C003: return outside of a function

`return` is only meaningful inside a function body. At the top level the
program ends when it runs out of statements.
"#,
    },
    ErrorEntry {
        code: "ZY-C004",
        short: "duplicate parameter",
        long: r#"## ZY-C004: duplicate parameter

Two parameters of the same function share a name.

**Example:**

    fn f(a, a) { return a; }
"#,
    },
    ErrorEntry {
        code: "ZY-C005",
        short: "module limit exceeded",
        long: r#"## ZY-C005: module limit exceeded

The program needs more constants, locals, parameters, arguments or
instructions than a 32-bit operand can address.
"#,
    },

    // ── Artifact format ──────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZY-F001",
        short: "not a .zyi module",
        long: r#"## ZY-F001: not a .zyi module

The file does not start with the `ZYI\0` marker. `zy interpret` expects
the output of `zy compile`; use `zy run` for source files.
"#,
    },
    ErrorEntry {
        code: "ZY-F002",
        short: "unsupported format version",
        long: r#"## ZY-F002: unsupported format version

The module was written by a zy build using a different artifact version.
Recompile the source with this build.
"#,
    },
    ErrorEntry {
        code: "ZY-F003",
        short: "truncated module",
        long: r#"## ZY-F003: truncated module

The file ended inside a header, section or entry. It was probably cut
short while being copied or written.
"#,
    },
    ErrorEntry {
        code: "ZY-F004",
        short: "section too large",
        long: r#"## ZY-F004: section too large

A section declares a length above the size cap (16 MiB by default). The
file is corrupt or was not produced by zy.
"#,
    },
    ErrorEntry {
        code: "ZY-F005",
        short: "section length mismatch",
        long: r#"## ZY-F005: section length mismatch

A section's declared byte length disagrees with its content, or bytes
follow the last section.
"#,
    },
    ErrorEntry {
        code: "ZY-F006",
        short: "malformed module content",
        long: r#"## ZY-F006: malformed module content

The module contains an unknown constant tag or opcode, invalid UTF-8, or
an operand that points outside the module (a constant index, jump target
or function entry).
"#,
    },

    // ── Runtime ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "ZY-R001",
        short: "type mismatch",
        long: r#"## ZY-R001: type mismatch

An operator was applied to values it does not accept.

- `+` adds numbers or concatenates two strings
- `- * / %` need numbers; an int mixed with a float gives a float
- `< <= > >=` compare two numbers or two strings
- conditions, `not`, `and` and `or` need booleans

**Example:**

    print "a" + true;
"#,
    },
    ErrorEntry {
        code: "ZY-R002",
        short: "division by zero",
        long: r#"## ZY-R002: division by zero

The right operand of `/` or `%` was zero (integer or float).

**Example:**

    print 1 / 0;

Output printed before the error is kept.
"#,
    },
    ErrorEntry {
        code: "ZY-R003",
        short: "wrong number of arguments",
        long: r#"## ZY-R003: wrong number of arguments

A function was called with a different number of arguments than it
declares parameters.

**Example:**

    fn add(a, b) { return a + b; }
    print add(1);
"#,
    },
    ErrorEntry {
        code: "ZY-R004",
        short: "value is not callable",
        long: r#"## ZY-R004: value is not callable

Only functions can be called.

**Example:**

    let x = 3;
    x();
"#,
    },
    ErrorEntry {
        code: "ZY-R005",
        short: "stack overflow",
        long: r#"## ZY-R005: stack overflow

Calls nested deeper than the call-depth limit (1024 by default,
`--max-call-depth` to change it). Usually a recursive function that never
reaches its base case.
"#,
    },
    ErrorEntry {
        code: "ZY-R006",
        short: "local read before assignment",
        long: r#"## ZY-R006: local read before assignment

The VM read a local slot that was never written. Compiled programs never
do this; the module was hand-built or corrupted.
"#,
    },
    ErrorEntry {
        code: "ZY-R007",
        short: "integer overflow",
        long: r#"## ZY-R007: integer overflow

Integer arithmetic left the signed 64-bit range. Integers never wrap.
Use floats for values that large.
"#,
    },
    ErrorEntry {
        code: "ZY-R008",
        short: "corrupt module",
        long: r#"## ZY-R008: corrupt module

The VM hit an impossible state, such as an empty operand stack or a jump
past the end of the code. This indicates a broken module or a compiler
bug, not an error in the program.
"#,
    },
    ErrorEntry {
        code: "ZY-R009",
        short: "output failed",
        long: r#"## ZY-R009: output failed

Writing the output of `print` failed, for example because stdout was
closed.
"#,
    },
];

/// Look up an error entry by code (e.g. `"ZY-R002"`). Case-insensitive.
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::codec::FormatError;
    use crate::lexer::LexErrorKind;

    #[test]
    fn lookup_known_code() {
        let e = lookup("ZY-R002").expect("ZY-R002 should be in registry");
        assert_eq!(e.short, "division by zero");
        assert!(e.long.contains("ZY-R002"));
        assert!(lookup("zy-c001").is_some());
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("ZY-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let len_before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), len_before, "duplicate codes in registry");
    }

    #[test]
    fn long_text_names_its_code() {
        for entry in REGISTRY {
            assert!(!entry.short.is_empty(), "{} missing short description", entry.code);
            assert!(entry.long.contains(entry.code), "{} long text does not mention its code", entry.code);
        }
    }

    #[test]
    fn emitted_codes_are_registered() {
        let lex = [
            LexErrorKind::IllegalCharacter,
            LexErrorKind::UnterminatedString,
            LexErrorKind::InvalidEscape,
            LexErrorKind::IntegerTooLarge,
        ];
        for kind in lex {
            assert!(lookup(kind.code()).is_some(), "{}", kind.code());
        }
        let format = [
            FormatError::BadMagic,
            FormatError::UnsupportedVersion { found: 2, expected: 1 },
            FormatError::Truncated { section: "code", needed: 1 },
            FormatError::SectionTooLarge { section: "code", declared: 9, cap: 1 },
            FormatError::TrailingBytes { count: 1 },
            FormatError::Invalid(String::new()),
        ];
        for e in format {
            assert!(lookup(e.code()).is_some(), "{}", e.code());
        }
        for n in 1..=3 {
            assert!(lookup(&format!("ZY-P00{n}")).is_some());
        }
        for n in 1..=5 {
            assert!(lookup(&format!("ZY-C00{n}")).is_some());
        }
        for n in 1..=9 {
            assert!(lookup(&format!("ZY-R00{n}")).is_some());
        }
    }
}
