//! Ridge command-line runner
//!
//! Runs script files, or starts an interactive shell when none are given.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;
use ridge::vm::InterpreterConfig;
use ridge::{Context, ContextOptions, EvalError};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ridge", version, about = "Run ridge scripts")]
struct Cli {
    /// Script files, run in order in one context
    files: Vec<PathBuf>,

    /// Start the interactive shell after running the files
    #[arg(short, long)]
    interactive: bool,

    /// Print the bytecode of every compiled program
    #[arg(long)]
    dump: bool,

    /// Log every executed instruction (shown with RIDGE_LOG=trace)
    #[arg(long)]
    trace: bool,

    /// Compile only, do not execute
    #[arg(long)]
    dry_run: bool,

    /// Print the syntax tree of each file
    #[arg(long)]
    print_ast: bool,

    /// Maximum call nesting
    #[arg(long, default_value_t = 512)]
    max_depth: usize,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("RIDGE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = ContextOptions {
        interpreter: InterpreterConfig {
            max_call_depth: cli.max_depth,
            trace_execution: cli.trace,
            ..InterpreterConfig::default()
        },
        dump_bytecode: cli.dump,
    };
    let mut ctx = Context::with_options(options);

    for path in &cli.files {
        if let Err(e) = run_file(&mut ctx, &cli, path) {
            report(&e);
            return ExitCode::FAILURE;
        }
    }
    if !cli.dry_run {
        if let Err(e) = ctx.run_event_loop() {
            report(&e);
            return ExitCode::FAILURE;
        }
    }

    if cli.files.is_empty() || cli.interactive {
        run_repl(&mut ctx);
    }
    ExitCode::SUCCESS
}

fn run_file(ctx: &mut Context, cli: &Cli, path: &PathBuf) -> Result<(), EvalError> {
    let source = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
        path: path.clone(),
        source,
    })?;

    if cli.print_ast {
        println!("{:#?}", ctx.parse(&source)?);
    }
    if cli.dry_run {
        ctx.compile(&source)?;
        return Ok(());
    }
    ctx.eval(&source)?;
    Ok(())
}

fn report(error: &EvalError) {
    eprintln!("{} {}", "error:".red().bold(), error);
}

fn run_repl(ctx: &mut Context) {
    println!("{} {}", "ridge".bold(), env!("CARGO_PKG_VERSION").dimmed());
    println!("Ctrl+D to exit.\n");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{} cannot start line editor: {}", "error:".red().bold(), e);
            return;
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match ctx.eval(line) {
                    Ok(result) if result.is_undefined() => {
                        println!("{}", result.as_string().dimmed());
                    }
                    Ok(result) => println!("{}", result.as_string().green()),
                    Err(e) => report(&e),
                }
                if let Err(e) = ctx.run_ready_timers() {
                    report(&e);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{} {}", "error:".red().bold(), e);
                break;
            }
        }
    }
}
