use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quarantine::{Policy, Repl, Sandbox, SandboxError};

#[derive(Parser)]
#[command(author, version, about = "Run untrusted scripts in a restricted namespace")]
struct Args {
    /// TOML file overriding the denied capabilities and allowed modules
    #[arg(long, global = true, value_name = "FILE")]
    policy: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file, or standard input when FILE is omitted or `-`
    Run { script: Option<PathBuf> },
    /// Start an interactive session
    Repl,
    /// Evaluate a single expression and print its value
    Eval { source: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("quarantine=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Args) -> Result<(), SandboxError> {
    let policy = match &args.policy {
        Some(path) => {
            debug!(path = %path.display(), "loading policy");
            Policy::load(path)?
        }
        None => Policy::standard(),
    };
    let sandbox = Sandbox::new(Arc::new(policy));

    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let source = read_script(script)?;
            sandbox.run(&source, None)?;
            Ok(())
        }
        Command::Repl => Repl::new(sandbox).run(),
        Command::Eval { source } => {
            let value = sandbox.evaluate(&source, None)?;
            println!("{}", value.repr());
            Ok(())
        }
    }
}

fn read_script(path: Option<PathBuf>) -> Result<String, SandboxError> {
    match path {
        Some(path) if path.as_os_str() != "-" => Ok(fs::read_to_string(path)?),
        _ => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}
