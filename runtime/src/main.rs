use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use std::{
    fs,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
};

use bytecode::SourceMap;
use log::{LevelFilter, info};
use runtime::{RunError, Runtime, compile_source};
use vm::{Unit, Value, VmConfig, VmError};

/// Native stack for the interpreter thread; deep guest recursion nests host
/// calls through blocks and native methods.
const STACK_SIZE: usize = 64 << 20;

/// Guest recursion may use all but this much of the interpreter thread's
/// stack; the rest is left for unwinding and error reporting.
const STACK_RESERVE: usize = 8 << 20;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and run an s-expression source file
    Run {
        file: PathBuf,
        /// Object bound to `self` at the top level
        #[arg(long, value_enum, default_value_t = Receiver::Main)]
        receiver: Receiver,
        /// Frame depth at which calls raise SystemStackError
        #[arg(long, default_value_t = VmConfig::default().max_depth)]
        max_depth: usize,
        /// Log every executed instruction (needs -vvv)
        #[arg(long)]
        trace: bool,
    },
    /// Compile a source file to bytecode plus a `.map` source map
    Compile {
        file: PathBuf,
        /// Output path; defaults to the input with a `.gbc` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify and run compiled bytecode
    Exec {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Receiver::Main)]
        receiver: Receiver,
        #[arg(long, default_value_t = VmConfig::default().max_depth)]
        max_depth: usize,
    },
    /// Print the instructions of a source (`.gb`) or bytecode (`.gbc`) file
    Disasm { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Receiver {
    Main,
    Nil,
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let worker = thread::Builder::new()
        .name("garnet".into())
        .stack_size(STACK_SIZE)
        .spawn(move || execute(cli.command));
    let status = match worker.map(|handle| handle.join()) {
        Ok(Ok(status)) => status,
        Ok(Err(_)) => {
            eprintln!("internal error: interpreter panicked");
            70
        }
        Err(err) => {
            eprintln!("failed to start interpreter thread: {err}");
            71
        }
    };
    process::exit(status);
}

fn execute(command: Command) -> i32 {
    let rt = Runtime::new();
    let result = match command {
        Command::Run { file, receiver, max_depth, trace } => {
            let config = VmConfig { max_depth, trace, native_stack: STACK_SIZE - STACK_RESERVE };
            load_source(&file).and_then(|unit| run(&rt, unit, receiver, config))
        }
        Command::Compile { file, output } => compile(&file, output),
        Command::Exec { file, receiver, max_depth } => {
            let config = VmConfig { max_depth, native_stack: STACK_SIZE - STACK_RESERVE, ..VmConfig::default() };
            load_bytecode(&file).and_then(|unit| run(&rt, unit, receiver, config))
        }
        Command::Disasm { file } => disasm(&file),
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            match &err {
                RunError::Vm(VmError::Uncaught(raised)) => eprintln!("{}", rt.describe_uncaught(raised)),
                other => eprintln!("{other}"),
            }
            err.exit_code()
        }
    }
}

fn run(rt: &Arc<Runtime>, unit: Unit, receiver: Receiver, config: VmConfig) -> Result<(), RunError> {
    let receiver = match receiver {
        Receiver::Main => rt.main().clone(),
        Receiver::Nil => Value::Nil,
    };
    let mut vm = rt.vm(config);
    vm.run(Arc::new(unit), receiver)?;
    Ok(())
}

fn unit_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn map_path(path: &Path) -> PathBuf {
    path.with_extension("map")
}

fn load_source(path: &Path) -> Result<Unit, RunError> {
    let source = fs::read_to_string(path).map_err(|err| RunError::io(path, err))?;
    let program = compile_source(&source)?;
    Ok(Unit::new(unit_name(path), program.code, program.source_map))
}

/// The source map is optional; without it backtraces carry no lines.
fn load_bytecode(path: &Path) -> Result<Unit, RunError> {
    let code = fs::read(path).map_err(|err| RunError::io(path, err))?;
    bytecode::verify::verify(&code)?;
    let map_file = map_path(path);
    let source_map = match fs::read(&map_file) {
        Ok(bytes) => SourceMap::decode(&bytes)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => SourceMap::new(),
        Err(err) => return Err(RunError::io(map_file, err)),
    };
    Ok(Unit::new(unit_name(path), code, source_map))
}

fn compile(path: &Path, output: Option<PathBuf>) -> Result<(), RunError> {
    let unit = load_source(path)?;
    let output = output.unwrap_or_else(|| path.with_extension("gbc"));
    fs::write(&output, &unit.code).map_err(|err| RunError::io(&output, err))?;
    let map_file = map_path(&output);
    fs::write(&map_file, unit.source_map.encode()).map_err(|err| RunError::io(&map_file, err))?;
    info!("wrote {} bytes to {}", unit.code.len(), output.display());
    Ok(())
}

fn disasm(path: &Path) -> Result<(), RunError> {
    let code = if path.extension().is_some_and(|ext| ext == "gbc") {
        fs::read(path).map_err(|err| RunError::io(path, err))?
    } else {
        load_source(path)?.code
    };
    print!("{}", bytecode::disassemble(&code)?);
    Ok(())
}
