pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod parser;
pub mod span;
pub mod tokenizer;
pub mod vm;

use std::{cell::RefCell, io::Write, rc::Rc};

use compiler::CompileError;
use parser::ParseError;
use tokenizer::TokenizeErrors;
use vm::{RuntimeError, Vm};

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeErrors),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs a whole program, printing to stdout.
pub fn run_program(source: &str, debug: bool) -> Result<(), InterpretError> {
    run_program_with_output(source, debug, Rc::new(RefCell::new(std::io::stdout())))
}

/// Runs a whole program on a fresh VM. With `debug` set, the token stream,
/// syntax tree, bytecode and final VM state are written to `output` as well.
pub fn run_program_with_output(
    source: &str,
    debug: bool,
    output: Rc<RefCell<dyn Write>>,
) -> Result<(), InterpretError> {
    let stream = tokenizer::tokenize(source);
    if debug {
        let mut out = output.borrow_mut();
        writeln!(out, "== tokens ==")?;
        for token in &stream.tokens {
            writeln!(out, "{}", token)?;
        }
    }
    let tokens = stream.into_result()?;

    let program = parser::parse(&tokens)?;
    if debug {
        let mut out = output.borrow_mut();
        writeln!(out, "== ast ==")?;
        write!(out, "{}", program)?;
    }

    let compiled = compiler::compile(&program)?;
    if debug {
        write!(output.borrow_mut(), "{}", compiled)?;
    }

    let mut vm = Vm::new(output.clone());
    let result = vm.run(&compiled);

    if debug {
        let mut out = output.borrow_mut();
        let registers = compiled.main().map_or(0, |main| main.max_registers);
        vm.dump_registers(&mut *out, registers)?;
        vm.dump_globals(&mut *out)?;
    }

    Ok(result?)
}
