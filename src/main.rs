use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;

use zy::bytecode::codec::{FORMAT_VERSION, looks_like_module};
use zy::config::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_NESTING_DEPTH};
use zy::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use zy::vm::{LineWriter, Vm};
use zy::{Config, Module};

#[derive(Parser)]
#[command(name = "zy", about = "Compile, inspect and run zy programs")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print diagnostics as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Deepest call stack the VM allows
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_call_depth: usize,

    /// Deepest expression/block nesting the parser allows
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_NESTING_DEPTH)]
    max_nesting_depth: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the zy and .zyi format versions
    Version,
    /// Compile and execute a source file
    Run { file: PathBuf },
    /// Compile a source file to a .zyi module
    Compile {
        file: PathBuf,
        /// Output path (defaults to the source path with a .zyi extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Execute a .zyi module
    Interpret { file: PathBuf },
    /// Print the parsed syntax tree as JSON
    Ast { file: PathBuf },
    /// List the constants, functions and code of a source file or .zyi module
    Disasm { file: PathBuf },
    /// Explain a diagnostic code such as ZY-R002
    Explain { code: String },
}

/// Renders diagnostics to stderr in the selected format.
struct Reporter {
    json: bool,
    color: bool,
}

impl Reporter {
    fn report(&self, d: Diagnostic, source: Option<&str>) {
        let d = match source {
            Some(s) => d.with_source(s),
            None => d,
        };
        if self.json {
            eprintln!("{}", json::render(&d));
        } else {
            eprint!("{}", AnsiRenderer { use_color: self.color }.render(&d));
        }
    }

    fn invalid_file(&self, path: &Path, err: std::io::Error) -> ExitCode {
        self.report(Diagnostic::error(format!("invalid file {}: {}", path.display(), err)), None);
        ExitCode::FAILURE
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::default()
        .with_max_call_depth(cli.max_call_depth)
        .with_max_nesting_depth(cli.max_nesting_depth);
    let reporter = Reporter {
        json: cli.json,
        color: std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    };

    match cli.command {
        Command::Version => {
            println!("zy {}", zy::VERSION);
            println!(".zyi format version {}", FORMAT_VERSION);
            ExitCode::SUCCESS
        }
        Command::Run { file } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => return reporter.invalid_file(&file, e),
            };
            match compile(&source, &config, &reporter) {
                Some(module) => execute(&module, &config, &reporter, Some(&source)),
                None => ExitCode::FAILURE,
            }
        }
        Command::Compile { file, output } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => return reporter.invalid_file(&file, e),
            };
            let Some(module) = compile(&source, &config, &reporter) else {
                return ExitCode::FAILURE;
            };
            let out_path = output.unwrap_or_else(|| file.with_extension("zyi"));
            let bytes = zy::serialize_module(&module);
            if let Err(e) = std::fs::write(&out_path, &bytes) {
                return reporter.invalid_file(&out_path, e);
            }
            tracing::info!(path = %out_path.display(), bytes = bytes.len(), "wrote module");
            ExitCode::SUCCESS
        }
        Command::Interpret { file } => {
            let bytes = match std::fs::read(&file) {
                Ok(b) => b,
                Err(e) => return reporter.invalid_file(&file, e),
            };
            match zy::deserialize_module(&bytes, &config) {
                Ok(module) => execute(&module, &config, &reporter, None),
                Err(e) => {
                    reporter.report(Diagnostic::from(&e), None);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Ast { file } => {
            let source = match std::fs::read_to_string(&file) {
                Ok(s) => s,
                Err(e) => return reporter.invalid_file(&file, e),
            };
            match zy::parse_source(&source, &config) {
                Ok(program) => match serde_json::to_string_pretty(&program) {
                    Ok(json) => {
                        println!("{json}");
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        reporter.report(Diagnostic::error(format!("cannot serialize syntax tree: {e}")), None);
                        ExitCode::FAILURE
                    }
                },
                Err(failure) => {
                    for d in failure.diagnostics() {
                        reporter.report(d, Some(&source));
                    }
                    ExitCode::FAILURE
                }
            }
        }
        Command::Disasm { file } => {
            let bytes = match std::fs::read(&file) {
                Ok(b) => b,
                Err(e) => return reporter.invalid_file(&file, e),
            };
            let module = if looks_like_module(&bytes) {
                match zy::deserialize_module(&bytes, &config) {
                    Ok(m) => m,
                    Err(e) => {
                        reporter.report(Diagnostic::from(&e), None);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                let source = match String::from_utf8(bytes) {
                    Ok(s) => s,
                    Err(e) => {
                        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, e);
                        return reporter.invalid_file(&file, err);
                    }
                };
                match compile(&source, &config, &reporter) {
                    Some(m) => m,
                    None => return ExitCode::FAILURE,
                }
            };
            print!("{}", module.disassemble());
            ExitCode::SUCCESS
        }
        Command::Explain { code } => match registry::lookup(&code) {
            Some(entry) => {
                print!("{}", entry.long);
                ExitCode::SUCCESS
            }
            None => {
                reporter.report(
                    Diagnostic::error(format!("unknown diagnostic code '{code}'"))
                        .with_suggestion("codes look like ZY-L001, ZY-P001, ZY-C001, ZY-F001 or ZY-R001"),
                    None,
                );
                ExitCode::FAILURE
            }
        },
    }
}

/// Compile source, reporting every diagnostic on failure.
fn compile(source: &str, config: &Config, reporter: &Reporter) -> Option<Module> {
    match zy::compile_source(source, config) {
        Ok(module) => Some(module),
        Err(failure) => {
            for d in failure.diagnostics() {
                reporter.report(d, Some(source));
            }
            None
        }
    }
}

/// Run a module, streaming its output to stdout.
fn execute(module: &Module, config: &Config, reporter: &Reporter, source: Option<&str>) -> ExitCode {
    let mut out = LineWriter(std::io::stdout().lock());
    match Vm::new(module, config).run_with(&mut out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.report(Diagnostic::from(&e), source);
            ExitCode::FAILURE
        }
    }
}
