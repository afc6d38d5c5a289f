use std::io::Write;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(about = "Nirvana language interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Repl(ReplArgs { debug: false }))
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a source file
    Run(RunArgs),
    /// Start an interactive session
    Repl(ReplArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    file: String,
    /// Dump tokens, syntax tree, bytecode and VM state
    #[arg(short, long)]
    debug: bool,
}

#[derive(Debug, Clone, Args)]
struct ReplArgs {
    /// Start with debug dumps enabled
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let args = Cli::parse();

    match args.command() {
        Command::Repl(args) => repl_command(args.debug),
        Command::Run(args) => run_command(&args),
    }
}

fn repl_command(mut debug: bool) {
    println!("Nirvana REPL");
    println!("Type 'debug' to toggle dumps, 'exit' or EOF to quit.");

    let mut input = String::new();
    loop {
        print!("> ");
        if let Err(e) = std::io::stdout().flush() {
            eprintln!("Failed to flush stdout: {e}");
            break;
        }

        input.clear();
        match std::io::stdin().read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Failed to read input: {e}");
                break;
            }
        }

        match input.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "debug" => {
                debug = !debug;
                println!("debug {}", if debug { "on" } else { "off" });
            }
            source => {
                if let Err(e) = nirvana::run_program(source, debug) {
                    println!("Error: {e}");
                }
            }
        }
    }
}

fn run_command(args: &RunArgs) {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read {}: {e}", args.file);
            std::process::exit(1);
        }
    };

    if let Err(e) = nirvana::run_program(&source, args.debug) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
