/// Static limits threaded through compilation, decoding and execution.
///
/// There is no process-wide state: every entry point takes a `&Config`, so two
/// pipelines in the same process can run with different limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Deepest allowed nesting of expressions and blocks in the parser.
    pub max_nesting_depth: usize,
    /// Parsing stops collecting diagnostics after this many.
    pub max_parse_errors: usize,
    /// Deepest allowed call stack in the VM.
    pub max_call_depth: usize,
    /// Per-frame operand stack cap. Compiled code never gets near it.
    pub max_stack_size: usize,
    /// Largest section a `.zyi` artifact may declare.
    pub max_section_bytes: u32,
}

pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;
pub const DEFAULT_MAX_PARSE_ERRORS: usize = 20;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;
pub const DEFAULT_MAX_STACK_SIZE: usize = 65_536;
pub const DEFAULT_MAX_SECTION_BYTES: u32 = 16 * 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Config {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_parse_errors: DEFAULT_MAX_PARSE_ERRORS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
            max_section_bytes: DEFAULT_MAX_SECTION_BYTES,
        }
    }
}

impl Config {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
