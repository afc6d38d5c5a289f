use crate::{
    ast::{
        Expression, ExpressionKind, InfixOperator, Literal, Program, Statement, StatementKind,
        UnaryOperator,
    },
    bytecode::{CompiledProgram, FunctionProto, Instruction, OpCode, MAX_REGISTERS},
    vm::{FunctionRef, Value},
};

const MAIN_NAME: &str = "main";
const PRINT_NAMES: [&str; 2] = ["print", "cetak"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("[line {line}] Function '{function}' needs more than {} registers", MAX_REGISTERS)]
    RegisterOverflow { function: String, line: usize },
    #[error("[line {line}] Too many constants in function '{function}'")]
    TooManyConstants { function: String, line: usize },
    #[error("[line {line}] Jump distance too large")]
    JumpTooLarge { line: usize },
    #[error("[line {line}] Cannot return from top-level code")]
    ReturnOutsideFunction { line: usize },
    #[error("[line {line}] Too many arguments for '{name}'")]
    TooManyArguments { name: String, line: usize },
}

pub fn compile(program: &Program) -> Result<CompiledProgram, CompileError> {
    let compiler = Compiler::new();
    compiler.compile(program)
}

struct FunctionState {
    proto: FunctionProto,
    next_register: usize,
    /// Registers below this hold locals and are never released.
    local_floor: usize,
    locals: Vec<(String, u8)>,
    is_main: bool,
}

impl FunctionState {
    fn main() -> Self {
        Self {
            proto: FunctionProto::new(MAIN_NAME, 0),
            next_register: 0,
            local_floor: 0,
            locals: Vec::new(),
            is_main: true,
        }
    }

    fn function(name: &str, params: &[String]) -> Self {
        Self {
            proto: FunctionProto::new(name, params.len()),
            next_register: params.len(),
            local_floor: params.len(),
            locals: params
                .iter()
                .enumerate()
                .map(|(register, name)| (name.clone(), register as u8))
                .collect(),
            is_main: false,
        }
    }
}

struct Compiler {
    /// Slot 0 is filled with the top-level body once it is finished.
    functions: Vec<FunctionProto>,
    current: FunctionState,
}

impl Compiler {
    fn new() -> Self {
        Self {
            functions: vec![FunctionProto::new(MAIN_NAME, 0)],
            current: FunctionState::main(),
        }
    }

    fn compile(mut self, program: &Program) -> Result<CompiledProgram, CompileError> {
        let mut line = 1;
        for statement in &program.0 {
            self.statement(statement)?;
            line = statement.line;
        }
        self.emit(Instruction::abc(OpCode::Halt, 0, 0, 0), line);

        self.functions[0] = self.current.proto;
        let program = CompiledProgram {
            functions: self.functions,
        };

        #[cfg(feature = "disassemble")]
        print!("{}", program);

        Ok(program)
    }

    fn emit(&mut self, instruction: Instruction, line: usize) -> usize {
        self.current.proto.add_instruction(instruction, line)
    }

    fn allocate(&mut self, line: usize) -> Result<u8, CompileError> {
        let register = self.current.next_register;
        if register >= MAX_REGISTERS {
            return Err(CompileError::RegisterOverflow {
                function: self.current.proto.name.clone(),
                line,
            });
        }
        self.current.next_register += 1;
        self.current.proto.max_registers =
            self.current.proto.max_registers.max(self.current.next_register);
        Ok(register as u8)
    }

    fn release(&mut self, mark: usize) {
        self.current.next_register = mark.max(self.current.local_floor);
    }

    fn constant(&mut self, value: Value, line: usize) -> Result<u16, CompileError> {
        self.current
            .proto
            .add_constant(value)
            .ok_or_else(|| CompileError::TooManyConstants {
                function: self.current.proto.name.clone(),
                line,
            })
    }

    fn name_constant(&mut self, name: &str, line: usize) -> Result<u16, CompileError> {
        self.constant(Value::Str(name.to_string()), line)
    }

    fn local(&self, name: &str) -> Option<u8> {
        self.current
            .locals
            .iter()
            .rev()
            .find(|(local, _)| local == name)
            .map(|(_, register)| *register)
    }

    /// Places a new local above every register the function has used so far,
    /// so no earlier code (a loop condition, say) can still treat it as scratch.
    fn declare_local(&mut self, name: &str, line: usize) -> Result<u8, CompileError> {
        self.current.next_register = self.current.next_register.max(self.current.proto.max_registers);
        let register = self.allocate(line)?;
        self.current.locals.push((name.to_string(), register));
        self.current.local_floor = self.current.next_register;
        Ok(register)
    }

    fn emit_jump(&mut self, op: OpCode, condition: u8, line: usize) -> usize {
        self.emit(Instruction::asbx(op, condition, 0), line)
    }

    fn jump_offset(from: usize, to: usize, line: usize) -> Result<i16, CompileError> {
        let offset = to as i64 - (from as i64 + 1);
        i16::try_from(offset).map_err(|_| CompileError::JumpTooLarge { line })
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    fn patch_jump(&mut self, at: usize, line: usize) -> Result<(), CompileError> {
        let offset = Self::jump_offset(at, self.current.proto.code.len(), line)?;
        let code = &mut self.current.proto.code;
        code[at] = code[at].with_sbx(offset);
        Ok(())
    }

    fn emit_loop(&mut self, start: usize, line: usize) -> Result<(), CompileError> {
        let offset = Self::jump_offset(self.current.proto.code.len(), start, line)?;
        self.emit(Instruction::asbx(OpCode::Jmp, 0, offset), line);
        Ok(())
    }

    /// Binds the value in `register` to `name`: a global at top level, a
    /// local inside a function.
    fn assign(&mut self, name: &str, register: u8, line: usize) -> Result<u8, CompileError> {
        if self.current.is_main {
            let k = self.name_constant(name, line)?;
            self.emit(Instruction::abx(OpCode::SetGlobal, register, k), line);
            return Ok(register);
        }

        let local = match self.local(name) {
            Some(local) => local,
            None => self.declare_local(name, line)?,
        };
        if local != register {
            self.emit(Instruction::abc(OpCode::Move, local, register, 0), line);
        }
        Ok(local)
    }

    /// Compiles one statement and returns the register holding its value, if
    /// it has one. Temporaries are released afterwards but the value register
    /// stays intact until the next allocation.
    fn statement(&mut self, statement: &Statement) -> Result<Option<u8>, CompileError> {
        let mark = self.current.next_register;
        let line = statement.line;

        let value = match &statement.kind {
            StatementKind::Expression(expr) => Some(self.expression(expr)?),
            StatementKind::Assign { name, value } => {
                let register = self.expression(value)?;
                Some(self.assign(name, register, line)?)
            }
            StatementKind::IndexAssign { name, index, value } => {
                Some(self.index_assign(name, index, value, line)?)
            }
            StatementKind::Block(statements) => {
                let mut last = None;
                for statement in statements {
                    last = self.statement(statement)?;
                }
                last
            }
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => Some(self.if_statement(condition, then_branch, else_branch.as_deref(), line)?),
            StatementKind::While { condition, body } => {
                self.while_statement(condition, body, line)?;
                None
            }
            StatementKind::For {
                variable,
                iterable,
                body,
            } => {
                self.for_statement(variable, iterable, body, line)?;
                None
            }
            StatementKind::Function { name, params, body } => {
                self.function(name, params, body, line)?;
                None
            }
            StatementKind::Return(value) => {
                if self.current.is_main {
                    return Err(CompileError::ReturnOutsideFunction { line });
                }
                match value {
                    Some(value) => {
                        let register = self.expression(value)?;
                        self.emit(Instruction::abc(OpCode::Return, register, 1, 0), line);
                    }
                    None => {
                        self.emit(Instruction::abc(OpCode::Return, 0, 0, 0), line);
                    }
                }
                None
            }
        };

        self.release(mark);
        Ok(value)
    }

    fn index_assign(
        &mut self,
        name: &str,
        index: &Expression,
        value: &Expression,
        line: usize,
    ) -> Result<u8, CompileError> {
        let (array, global) = match self.local(name) {
            Some(local) => (local, None),
            None => {
                let k = self.name_constant(name, line)?;
                let register = self.allocate(line)?;
                self.emit(Instruction::abx(OpCode::GetGlobal, register, k), line);
                (register, Some(k))
            }
        };

        let index = self.expression(index)?;
        let value = self.expression(value)?;
        self.emit(Instruction::abc(OpCode::SetElem, array, index, value), line);

        if let Some(k) = global {
            self.emit(Instruction::abx(OpCode::SetGlobal, array, k), line);
        }
        Ok(value)
    }

    fn if_statement(
        &mut self,
        condition: &Expression,
        then_branch: &Statement,
        else_branch: Option<&Statement>,
        line: usize,
    ) -> Result<u8, CompileError> {
        let result = self.allocate(line)?;
        self.emit(Instruction::abc(OpCode::LoadNil, result, 0, 0), line);

        let condition = self.expression(condition)?;
        let skip_then = self.emit_jump(OpCode::JmpIfNot, condition, line);
        self.release(result as usize + 1);

        self.branch(then_branch, result)?;

        match else_branch {
            Some(else_branch) => {
                let skip_else = self.emit_jump(OpCode::Jmp, 0, line);
                self.patch_jump(skip_then, line)?;
                self.branch(else_branch, result)?;
                self.patch_jump(skip_else, line)?;
            }
            None => self.patch_jump(skip_then, line)?,
        }

        Ok(result)
    }

    fn branch(&mut self, branch: &Statement, result: u8) -> Result<(), CompileError> {
        if let Some(value) = self.statement(branch)? {
            if value != result {
                self.emit(
                    Instruction::abc(OpCode::Move, result, value, 0),
                    branch.line,
                );
            }
        }
        Ok(())
    }

    /// The condition sits after the body: one JMP enters the loop at the
    /// condition and a JMPIF branches back to the body while it holds.
    fn while_statement(
        &mut self,
        condition: &Expression,
        body: &Statement,
        line: usize,
    ) -> Result<(), CompileError> {
        let enter = self.emit_jump(OpCode::Jmp, 0, line);
        let start = self.current.proto.code.len();

        self.statement(body)?;
        self.patch_jump(enter, line)?;

        let mark = self.current.next_register;
        let condition = self.expression(condition)?;
        let offset = Self::jump_offset(self.current.proto.code.len(), start, line)?;
        self.emit(Instruction::asbx(OpCode::JmpIf, condition, offset), line);
        self.release(mark);
        Ok(())
    }

    fn for_statement(
        &mut self,
        variable: &str,
        iterable: &Expression,
        body: &Statement,
        line: usize,
    ) -> Result<(), CompileError> {
        let mut array = self.expression(iterable)?;
        if (array as usize) < self.current.local_floor {
            // iterate over a snapshot so reassigning the local is harmless
            let copy = self.allocate(line)?;
            self.emit(Instruction::abc(OpCode::Move, copy, array, 0), line);
            array = copy;
        }

        let zero = self.constant(Value::Int(0), line)?;
        let one = self.constant(Value::Int(1), line)?;

        let index = self.allocate(line)?;
        self.emit(Instruction::abx(OpCode::LoadK, index, zero), line);
        let step = self.allocate(line)?;
        self.emit(Instruction::abx(OpCode::LoadK, step, one), line);
        let length = self.allocate(line)?;
        self.emit(Instruction::abc(OpCode::Len, length, array, 0), line);

        let element = if self.current.is_main {
            self.allocate(line)?
        } else {
            match self.local(variable) {
                Some(local) => local,
                None => self.declare_local(variable, line)?,
            }
        };
        let condition = self.allocate(line)?;

        let start = self.current.proto.code.len();
        self.emit(
            Instruction::abc(OpCode::Lt, condition, index, length),
            line,
        );
        let exit = self.emit_jump(OpCode::JmpIfNot, condition, line);
        self.emit(
            Instruction::abc(OpCode::GetElem, element, array, index),
            line,
        );
        if self.current.is_main {
            let k = self.name_constant(variable, line)?;
            self.emit(Instruction::abx(OpCode::SetGlobal, element, k), line);
        }

        self.statement(body)?;

        self.emit(Instruction::abc(OpCode::Add, index, index, step), line);
        self.emit_loop(start, line)?;
        self.patch_jump(exit, line)
    }

    fn function(
        &mut self,
        name: &str,
        params: &[String],
        body: &Statement,
        line: usize,
    ) -> Result<(), CompileError> {
        if params.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments {
                name: name.to_string(),
                line,
            });
        }

        let enclosing = std::mem::replace(&mut self.current, FunctionState::function(name, params));
        let result = self.function_body(body);
        let function = std::mem::replace(&mut self.current, enclosing);
        result?;

        let index = self.functions.len();
        self.functions.push(function.proto);

        let k = self.constant(
            Value::Function(FunctionRef {
                index,
                name: name.to_string(),
            }),
            line,
        )?;
        let register = self.allocate(line)?;
        self.emit(Instruction::abx(OpCode::LoadK, register, k), line);
        let name = self.name_constant(name, line)?;
        self.emit(Instruction::abx(OpCode::SetGlobal, register, name), line);
        Ok(())
    }

    fn function_body(&mut self, body: &Statement) -> Result<(), CompileError> {
        let value = self.statement(body)?;
        let instruction = match value {
            Some(register) => Instruction::abc(OpCode::Return, register, 1, 0),
            None => Instruction::abc(OpCode::Return, 0, 0, 0),
        };
        self.emit(instruction, body.line);
        Ok(())
    }

    fn expression(&mut self, expression: &Expression) -> Result<u8, CompileError> {
        let line = expression.line;
        match &expression.kind {
            ExpressionKind::Literal(literal) => self.literal(literal, line),
            ExpressionKind::Array(elements) => {
                let array = self.allocate(line)?;
                let capacity = elements.len().min(u8::MAX as usize) as u8;
                self.emit(Instruction::abc(OpCode::NewArray, array, capacity, 0), line);
                let mark = self.current.next_register;
                for element in elements {
                    let value = self.expression(element)?;
                    self.emit(Instruction::abc(OpCode::Append, array, value, 0), line);
                    self.release(mark);
                }
                Ok(array)
            }
            ExpressionKind::Identifier(name) => match self.local(name) {
                Some(local) => Ok(local),
                None => {
                    let k = self.name_constant(name, line)?;
                    let register = self.allocate(line)?;
                    self.emit(Instruction::abx(OpCode::GetGlobal, register, k), line);
                    Ok(register)
                }
            },
            ExpressionKind::Binary(left, operator, right) => {
                let left = self.expression(left)?;
                let right = self.expression(right)?;
                let register = self.allocate(line)?;
                let (op, b, c) = match operator {
                    InfixOperator::Or => (OpCode::Or, left, right),
                    InfixOperator::And => (OpCode::And, left, right),
                    InfixOperator::Equal => (OpCode::Eq, left, right),
                    InfixOperator::NotEqual => (OpCode::Ne, left, right),
                    InfixOperator::LessThan => (OpCode::Lt, left, right),
                    InfixOperator::LessThanOrEqual => (OpCode::Le, left, right),
                    InfixOperator::GreaterThan => (OpCode::Lt, right, left),
                    InfixOperator::GreaterThanOrEqual => (OpCode::Le, right, left),
                    InfixOperator::Plus => (OpCode::Add, left, right),
                    InfixOperator::Minus => (OpCode::Sub, left, right),
                    InfixOperator::Multiply => (OpCode::Mul, left, right),
                    InfixOperator::Divide => (OpCode::Div, left, right),
                    InfixOperator::Modulo => (OpCode::Mod, left, right),
                    InfixOperator::Power => (OpCode::Pow, left, right),
                };
                self.emit(Instruction::abc(op, register, b, c), line);
                Ok(register)
            }
            ExpressionKind::Unary(operator, operand) => {
                let operand = self.expression(operand)?;
                let register = self.allocate(line)?;
                let op = match operator {
                    UnaryOperator::Negate => OpCode::Neg,
                    UnaryOperator::Not => OpCode::Not,
                };
                self.emit(Instruction::abc(op, register, operand, 0), line);
                Ok(register)
            }
            ExpressionKind::Call { name, args } => self.call(name, args, line),
            ExpressionKind::Index { target, index } => {
                let target = self.expression(target)?;
                let index = self.expression(index)?;
                let register = self.allocate(line)?;
                self.emit(
                    Instruction::abc(OpCode::GetElem, register, target, index),
                    line,
                );
                Ok(register)
            }
        }
    }

    fn literal(&mut self, literal: &Literal, line: usize) -> Result<u8, CompileError> {
        let value = match literal {
            Literal::Integer(n) => Value::Int(*n),
            Literal::Float(n) => Value::Float(*n),
            Literal::String(s) => Value::Str(s.clone()),
            Literal::Boolean(b) => {
                let register = self.allocate(line)?;
                self.emit(
                    Instruction::abc(OpCode::LoadBool, register, *b as u8, 0),
                    line,
                );
                return Ok(register);
            }
            Literal::Null => {
                let register = self.allocate(line)?;
                self.emit(Instruction::abc(OpCode::LoadNil, register, 0, 0), line);
                return Ok(register);
            }
        };

        let k = self.constant(value, line)?;
        let register = self.allocate(line)?;
        self.emit(Instruction::abx(OpCode::LoadK, register, k), line);
        Ok(register)
    }

    fn call(&mut self, name: &str, args: &[Expression], line: usize) -> Result<u8, CompileError> {
        if args.len() > u8::MAX as usize {
            return Err(CompileError::TooManyArguments {
                name: name.to_string(),
                line,
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.expression(arg)?);
        }

        let base = self.current.next_register;
        for value in values {
            let slot = self.allocate(line)?;
            self.emit(Instruction::abc(OpCode::Move, slot, value, 0), line);
        }
        let argc = args.len() as u8;
        let base_register = base.min(MAX_REGISTERS - 1) as u8;

        if PRINT_NAMES.contains(&name) && self.local(name).is_none() {
            self.emit(Instruction::abc(OpCode::Print, base_register, argc, 0), line);
            self.release(base);
            let result = self.allocate(line)?;
            self.emit(Instruction::abc(OpCode::LoadNil, result, 0, 0), line);
            return Ok(result);
        }

        let callee = self.allocate(line)?;
        match self.local(name) {
            Some(local) => {
                self.emit(Instruction::abc(OpCode::Move, callee, local, 0), line);
            }
            None => {
                let k = self.name_constant(name, line)?;
                self.emit(Instruction::abx(OpCode::GetGlobal, callee, k), line);
            }
        }
        self.emit(
            Instruction::abc(OpCode::Call, callee, base_register, argc),
            line,
        );
        Ok(callee)
    }
}
