use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::{env, io::IsTerminal};

use clap::{CommandFactory, Parser, Subcommand};

use impc_vm::{Machine, MachineIo};

#[derive(Debug, Parser)]
#[command(
    name = "impc",
    version,
    about = "Compiler for a small imperative language targeting a minimal register machine",
    long_about = None,
    override_usage = "impc [COMMAND] [INPUT]",
    after_help = "Examples:\n  impc path/to/input.imp\n  impc compile path/to/input.imp -o out.mr\n  impc run path/to/out.mr\n  impc --help"
)]
struct Cli {
    /// Optional explicit subcommand.
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compile a source file into a machine program.
    Compile(CompileArgs),
    /// Execute a compiled machine program.
    Run(RunArgs),
}

#[derive(Debug, Parser)]
struct CompileArgs {
    /// Input source file (.imp).
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// Output program path.
    #[arg(short = 'o', long = "output", value_name = "PROGRAM_FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Compiled program file (.mr).
    #[arg(value_name = "PROGRAM_FILE")]
    program: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Compile(args)) => compile_command(args),
        Some(Commands::Run(args)) => run_command(args),
        None => {
            let Some(input_path) = cli.input else {
                print_banner();
                println!();
                let mut command = Cli::command();
                command.print_help()?;
                println!();
                return Ok(());
            };
            build_command(input_path)
        }
    }
}

fn print_banner() {
    println!("impc, version {}.", env!("CARGO_PKG_VERSION"));
    println!("Compiles imperative source programs to register-machine code.");
}

fn compile_source_file(input_path: &Path) -> anyhow::Result<impc_core::CompileOutput> {
    let is_imp = input_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("imp"));
    if !is_imp {
        anyhow::bail!(
            "invalid input extension for '{}': expected .imp source file",
            input_path.display()
        );
    }

    let source = std::fs::read_to_string(input_path)?;
    impc_core::compile_source_with_options(
        &input_path.display().to_string(),
        &source,
        impc_core::CompileRenderOptions {
            color: stderr_supports_color(),
        },
    )
    .map_err(|error| anyhow::anyhow!(error.rendered))
}

fn stderr_supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if let Some(force) = env::var_os("CLICOLOR_FORCE") {
        return force != "0";
    }

    if let Some(choice) = env::var_os("CLICOLOR") {
        if choice == "0" {
            return false;
        }
    }

    std::io::stderr().is_terminal()
}

fn default_program_path_for_input(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("out");
    let parent = input_path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}.mr"))
}

fn compile_command(args: CompileArgs) -> anyhow::Result<()> {
    let output = compile_source_file(&args.input)?;
    let out_path = args
        .output
        .unwrap_or_else(|| default_program_path_for_input(&args.input));
    std::fs::write(out_path, output.text)?;
    Ok(())
}

fn build_command(input_path: PathBuf) -> anyhow::Result<()> {
    let output = compile_source_file(&input_path)?;
    let out_path = default_program_path_for_input(&input_path);
    std::fs::write(out_path, output.text)?;
    Ok(())
}

/// Stdin/stdout connection for `impc run`: one decimal number per READ,
/// one output line per WRITE.
struct StdMachineIo {
    pending: Vec<u64>,
}

impl StdMachineIo {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }
}

impl MachineIo for StdMachineIo {
    fn read(&mut self) -> Option<u64> {
        loop {
            if let Some(value) = self.pending.pop() {
                return Some(value);
            }
            let mut line = String::new();
            if std::io::stdin().lock().read_line(&mut line).ok()? == 0 {
                return None;
            }
            // Values are whitespace separated; queue the whole line in
            // reverse so pop() hands them out in order.
            let mut values = Vec::new();
            for word in line.split_whitespace() {
                values.push(word.parse::<u64>().ok()?);
            }
            values.reverse();
            self.pending = values;
        }
    }

    fn write(&mut self, value: u64) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{value}");
    }
}

fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.program)?;
    let program = impc_isa::parse_program(&text)
        .map_err(|error| anyhow::anyhow!("{}: {error}", args.program.display()))?;

    let mut io = StdMachineIo::new();
    Machine::new(&program)
        .run(&mut io)
        .map_err(|error| anyhow::anyhow!("{}: {error}", args.program.display()))?;
    Ok(())
}
