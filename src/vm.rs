mod native;
mod registers;
mod value;

use std::{cell::RefCell, io::Write, rc::Rc};

use rustc_hash::FxHashMap;

use crate::bytecode::{CompiledProgram, FunctionProto, Instruction, OpCode, OpCodeFromU8Error};

use self::registers::{Registers, MAX_FRAMES};
pub use self::value::{FunctionRef, Native, Value};

#[derive(Debug, thiserror::Error)]
#[error("[line {line}] {kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub line: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read instruction: {0}")]
    OpCodeFromU8(#[from] OpCodeFromU8Error),
    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("Invalid operands for '{operator}': {left} and {right}")]
    InvalidOperands {
        operator: &'static str,
        left: Value,
        right: Value,
    },
    #[error("Invalid operand for '{operator}': {operand}")]
    InvalidOperand {
        operator: &'static str,
        operand: Value,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Modulo by zero")]
    ModuloByZero,
    #[error("Modulo requires integer operands, found {0} and {1}")]
    ModuloRequiresIntegers(Value, Value),
    #[error("Index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i64, length: usize },
    #[error("Array index must be an integer, found {0}")]
    InvalidIndex(Value),
    #[error("Cannot index into {0}")]
    NotAnArray(&'static str),
    #[error("Function '{name}' expects {expected} arguments but got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Cannot call {0}")]
    NotCallable(&'static str),
    #[error("Stack overflow")]
    StackOverflow,
    #[error("range expects one or two integers spanning at most 4194304 values")]
    InvalidRangeArguments,
    #[error("Invalid constant index {0}")]
    InvalidConstant(u16),
    #[error("No compiled function at index {0}")]
    InvalidFunction(usize),
}

/// One active call. The caller's frame sits directly below it.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    function: usize,
    return_pc: usize,
    base: usize,
    /// Absolute register receiving the return value.
    destination: usize,
}

enum Flow {
    Continue,
    Halt,
}

pub struct Vm {
    registers: Registers,
    frames: Vec<CallFrame>,
    globals: FxHashMap<String, Value>,
    stdout: Rc<RefCell<dyn Write>>,
}

impl Vm {
    pub fn new(stdout: Rc<RefCell<dyn Write>>) -> Self {
        let mut globals = FxHashMap::default();
        globals.insert("print".to_string(), Value::Native(Native::Print));
        globals.insert("cetak".to_string(), Value::Native(Native::Print));
        globals.insert("range".to_string(), Value::Native(Native::Range));

        Self {
            registers: Registers::new(),
            frames: Vec::new(),
            globals,
            stdout,
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn register(&self, index: usize) -> &Value {
        self.registers.get(index)
    }

    pub fn run(&mut self, program: &CompiledProgram) -> Result<(), RuntimeError> {
        let result = self.execute(program);
        if result.is_err() {
            self.frames.clear();
        }
        result
    }

    fn execute(&mut self, program: &CompiledProgram) -> Result<(), RuntimeError> {
        let Some(main) = program.main() else {
            return Ok(());
        };

        self.frames.clear();
        self.registers.clear();
        if !self.registers.open_window(0, main.max_registers) {
            return Err(RuntimeError {
                kind: RuntimeErrorKind::StackOverflow,
                line: 0,
            });
        }
        self.frames.push(CallFrame {
            function: 0,
            return_pc: 0,
            base: 0,
            destination: 0,
        });

        let mut pc = 0;
        loop {
            let Some(frame) = self.frames.last().copied() else {
                return Ok(());
            };
            let Some(proto) = program.functions.get(frame.function) else {
                return Err(RuntimeError {
                    kind: RuntimeErrorKind::InvalidFunction(frame.function),
                    line: 0,
                });
            };

            let Some(instruction) = proto.code.get(pc).copied() else {
                // ran off the end of the body
                match self.return_from_call(Value::Nil, &mut pc) {
                    Flow::Continue => continue,
                    Flow::Halt => return Ok(()),
                }
            };

            #[cfg(feature = "trace")]
            {
                eprintln!(
                    "{}",
                    self.registers.display_window(frame.base, proto.max_registers)
                );
                eprintln!("{}", proto.disassemble_instruction(pc));
            }

            let line = proto.line(pc);
            pc += 1;

            match self.step(program, proto, frame.base, instruction, &mut pc) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(kind) => return Err(RuntimeError { kind, line }),
            }
        }
    }

    fn step(
        &mut self,
        program: &CompiledProgram,
        proto: &FunctionProto,
        base: usize,
        instruction: Instruction,
        pc: &mut usize,
    ) -> Result<Flow, RuntimeErrorKind> {
        let a = base + instruction.a() as usize;
        let b = base + instruction.b() as usize;
        let c = base + instruction.c() as usize;

        match instruction.op()? {
            OpCode::LoadK => {
                let value = constant(proto, instruction.bx())?.clone();
                self.registers.set(a, value);
            }
            OpCode::LoadBool => self.registers.set(a, Value::Bool(instruction.b() != 0)),
            OpCode::LoadNil => self.registers.set(a, Value::Nil),
            OpCode::Move => {
                let value = self.registers.get(b).clone();
                self.registers.set(a, value);
            }
            OpCode::Add => self.binary_op(a, b, c, |l, r| arithmetic("+", l, r, i64::wrapping_add, |x, y| x + y))?,
            OpCode::Sub => self.binary_op(a, b, c, |l, r| arithmetic("-", l, r, i64::wrapping_sub, |x, y| x - y))?,
            OpCode::Mul => self.binary_op(a, b, c, |l, r| arithmetic("*", l, r, i64::wrapping_mul, |x, y| x * y))?,
            OpCode::Div => self.binary_op(a, b, c, divide)?,
            OpCode::Mod => self.binary_op(a, b, c, modulo)?,
            OpCode::Pow => self.binary_op(a, b, c, |l, r| {
                let (x, y) = numbers("^", l, r)?;
                Ok(Value::Float(x.powf(y)))
            })?,
            OpCode::Neg => {
                let value = match self.registers.get(b) {
                    Value::Int(n) => Value::Int(n.wrapping_neg()),
                    Value::Float(n) => Value::Float(-n),
                    operand => match operand.to_number() {
                        Some(n) => Value::Float(-n),
                        None => {
                            return Err(RuntimeErrorKind::InvalidOperand {
                                operator: "-",
                                operand: operand.clone(),
                            })
                        }
                    },
                };
                self.registers.set(a, value);
            }
            OpCode::Eq => self.binary_op(a, b, c, |l, r| Ok(Value::Bool(l == r)))?,
            OpCode::Ne => self.binary_op(a, b, c, |l, r| Ok(Value::Bool(l != r)))?,
            OpCode::Lt => self.binary_op(a, b, c, |l, r| compare("<", l, r, |o| o.is_lt()))?,
            OpCode::Le => self.binary_op(a, b, c, |l, r| compare("<=", l, r, |o| o.is_le()))?,
            OpCode::And => self.binary_op(a, b, c, |l, r| Ok(Value::Bool(l.is_truthy() && r.is_truthy())))?,
            OpCode::Or => self.binary_op(a, b, c, |l, r| Ok(Value::Bool(l.is_truthy() || r.is_truthy())))?,
            OpCode::Not => {
                let value = Value::Bool(!self.registers.get(b).is_truthy());
                self.registers.set(a, value);
            }
            OpCode::Jmp => jump(pc, instruction.sbx()),
            OpCode::JmpIf => {
                if self.registers.get(a).is_truthy() {
                    jump(pc, instruction.sbx());
                }
            }
            OpCode::JmpIfNot => {
                if !self.registers.get(a).is_truthy() {
                    jump(pc, instruction.sbx());
                }
            }
            OpCode::Call => {
                let argc = instruction.c() as usize;
                self.call(program, proto, base, a, b, argc, pc)?;
            }
            OpCode::Return => {
                let value = if instruction.b() > 0 {
                    self.registers.get(a).clone()
                } else {
                    Value::Nil
                };
                return Ok(self.return_from_call(value, pc));
            }
            OpCode::GetGlobal => {
                let name = global_name(proto, instruction.bx())?;
                let value = self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))?;
                self.registers.set(a, value);
            }
            OpCode::SetGlobal => {
                let name = global_name(proto, instruction.bx())?;
                let value = self.registers.get(a).clone();
                self.globals.insert(name.to_string(), value);
            }
            OpCode::NewArray => self
                .registers
                .set(a, Value::Array(Vec::with_capacity(instruction.b() as usize))),
            OpCode::GetElem => {
                let value = match self.registers.get(b) {
                    Value::Array(items) => {
                        let index = element_index(self.registers.get(c), items.len())?;
                        items[index].clone()
                    }
                    other => return Err(RuntimeErrorKind::NotAnArray(other.type_name())),
                };
                self.registers.set(a, value);
            }
            OpCode::SetElem => {
                let index = self.registers.get(b).clone();
                let value = self.registers.get(c).clone();
                match self.registers.get_mut(a) {
                    Some(Value::Array(items)) => {
                        let index = element_index(&index, items.len())?;
                        items[index] = value;
                    }
                    other => {
                        let type_name = other.map(|v| v.type_name()).unwrap_or("nil");
                        return Err(RuntimeErrorKind::NotAnArray(type_name));
                    }
                }
            }
            OpCode::Append => {
                let value = self.registers.get(b).clone();
                match self.registers.get_mut(a) {
                    Some(Value::Array(items)) => items.push(value),
                    other => {
                        let type_name = other.map(|v| v.type_name()).unwrap_or("nil");
                        return Err(RuntimeErrorKind::NotAnArray(type_name));
                    }
                }
            }
            OpCode::Len => {
                let length = match self.registers.get(b) {
                    Value::Array(items) => items.len(),
                    Value::Str(s) => s.chars().count(),
                    operand => {
                        return Err(RuntimeErrorKind::InvalidOperand {
                            operator: "len",
                            operand: operand.clone(),
                        })
                    }
                };
                self.registers.set(a, Value::Int(length as i64));
            }
            OpCode::Print => {
                let args = self.registers.window(a, instruction.b() as usize);
                native::print(args, &self.stdout)?;
            }
            OpCode::Halt => return Ok(Flow::Halt),
            OpCode::Sentinel => unreachable!("Sentinel is never decoded from bytecode"),
        }

        Ok(Flow::Continue)
    }

    fn binary_op(
        &mut self,
        a: usize,
        b: usize,
        c: usize,
        op: impl Fn(&Value, &Value) -> Result<Value, RuntimeErrorKind>,
    ) -> Result<(), RuntimeErrorKind> {
        let value = op(self.registers.get(b), self.registers.get(c))?;
        self.registers.set(a, value);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn call(
        &mut self,
        program: &CompiledProgram,
        caller: &FunctionProto,
        base: usize,
        callee: usize,
        args: usize,
        argc: usize,
        pc: &mut usize,
    ) -> Result<(), RuntimeErrorKind> {
        match self.registers.get(callee) {
            Value::Function(function) => {
                let index = function.index;
                let proto = program
                    .functions
                    .get(index)
                    .ok_or(RuntimeErrorKind::InvalidFunction(index))?;
                if proto.arity != argc {
                    return Err(RuntimeErrorKind::ArityMismatch {
                        name: function.name.clone(),
                        expected: proto.arity,
                        found: argc,
                    });
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(RuntimeErrorKind::StackOverflow);
                }

                let new_base = base + caller.max_registers;
                if !self.registers.open_window(new_base, proto.max_registers.max(argc)) {
                    return Err(RuntimeErrorKind::StackOverflow);
                }
                for i in 0..argc {
                    let value = self.registers.get(args + i).clone();
                    self.registers.set(new_base + i, value);
                }

                self.frames.push(CallFrame {
                    function: index,
                    return_pc: *pc,
                    base: new_base,
                    destination: callee,
                });
                *pc = 0;
            }
            Value::Native(native) => {
                let native = *native;
                let result = native::call(native, self.registers.window(args, argc), &self.stdout)?;
                self.registers.set(callee, result);
            }
            other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
        Ok(())
    }

    fn return_from_call(&mut self, value: Value, pc: &mut usize) -> Flow {
        let Some(frame) = self.frames.pop() else {
            return Flow::Halt;
        };
        if self.frames.is_empty() {
            // returning from the top-level body ends the program
            self.frames.push(frame);
            return Flow::Halt;
        }
        self.registers.close_window(frame.base);
        self.registers.set(frame.destination, value);
        *pc = frame.return_pc;
        Flow::Continue
    }

    /// Writes every non-nil register of the top-level window.
    pub fn dump_registers(&self, out: &mut dyn Write, count: usize) -> std::io::Result<()> {
        writeln!(out, "== registers ==")?;
        for (index, value) in self.registers.window(0, count).iter().enumerate() {
            if *value != Value::Nil {
                writeln!(out, "R{:<3} = {}", index, value)?;
            }
        }
        Ok(())
    }

    /// Writes every global, sorted by name.
    pub fn dump_globals(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "== globals ==")?;
        let mut globals: Vec<_> = self.globals.iter().collect();
        globals.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (name, value) in globals {
            writeln!(out, "{} = {}", name, value)?;
        }
        Ok(())
    }
}

fn constant(proto: &FunctionProto, index: u16) -> Result<&Value, RuntimeErrorKind> {
    proto
        .constant(index)
        .ok_or(RuntimeErrorKind::InvalidConstant(index))
}

fn global_name(proto: &FunctionProto, index: u16) -> Result<&str, RuntimeErrorKind> {
    match constant(proto, index)? {
        Value::Str(name) => Ok(name),
        _ => Err(RuntimeErrorKind::InvalidConstant(index)),
    }
}

fn jump(pc: &mut usize, offset: i16) {
    *pc = pc.saturating_add_signed(offset as isize);
}

fn numbers(
    operator: &'static str,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), RuntimeErrorKind> {
    match (left.to_number(), right.to_number()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(RuntimeErrorKind::InvalidOperands {
            operator,
            left: left.clone(),
            right: right.clone(),
        }),
    }
}

fn arithmetic(
    operator: &'static str,
    left: &Value,
    right: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, RuntimeErrorKind> {
    if let (Value::Int(x), Value::Int(y)) = (left, right) {
        return Ok(Value::Int(int_op(*x, *y)));
    }
    let (x, y) = numbers(operator, left, right)?;
    Ok(Value::Float(float_op(x, y)))
}

fn divide(left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    let (x, y) = numbers("/", left, right)?;
    if y == 0.0 {
        return Err(RuntimeErrorKind::DivisionByZero);
    }
    Ok(Value::Float(x / y))
}

fn modulo(left: &Value, right: &Value) -> Result<Value, RuntimeErrorKind> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeErrorKind::ModuloByZero),
        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_rem(*y))),
        _ => Err(RuntimeErrorKind::ModuloRequiresIntegers(
            left.clone(),
            right.clone(),
        )),
    }
}

fn compare(
    operator: &'static str,
    left: &Value,
    right: &Value,
    test: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, RuntimeErrorKind> {
    if let (Value::Int(x), Value::Int(y)) = (left, right) {
        return Ok(Value::Bool(test(x.cmp(y))));
    }
    let (x, y) = numbers(operator, left, right)?;
    // NaN orders as neither less nor equal
    Ok(Value::Bool(x.partial_cmp(&y).map(test).unwrap_or(false)))
}

fn element_index(index: &Value, length: usize) -> Result<usize, RuntimeErrorKind> {
    match index {
        Value::Int(i) if *i >= 0 && (*i as usize) < length => Ok(*i as usize),
        Value::Int(i) => Err(RuntimeErrorKind::IndexOutOfBounds { index: *i, length }),
        other => Err(RuntimeErrorKind::InvalidIndex(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(program: &CompiledProgram) -> (Vm, Result<(), RuntimeError>, String) {
        let output = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::new(output.clone());
        let result = vm.run(program);
        let text = String::from_utf8(output.take()).unwrap();
        (vm, result, text)
    }

    fn main_with(
        constants: Vec<Value>,
        code: Vec<Instruction>,
        max_registers: usize,
    ) -> CompiledProgram {
        let mut main = FunctionProto::new("main", 0);
        main.lines = (1..=code.len()).collect();
        main.constants = constants;
        main.code = code;
        main.max_registers = max_registers;
        CompiledProgram {
            functions: vec![main],
        }
    }

    #[test]
    fn test_arithmetic_and_print() {
        let program = main_with(
            vec![Value::Int(7), Value::Float(0.5)],
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abx(OpCode::LoadK, 1, 1),
                Instruction::abc(OpCode::Add, 2, 0, 1),
                Instruction::abc(OpCode::Mul, 3, 0, 0),
                Instruction::abc(OpCode::Print, 2, 2, 0),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            4,
        );
        let (vm, result, output) = run(&program);
        result.unwrap();
        assert_eq!(output, "7.5 49\n");
        assert_eq!(vm.register(3), &Value::Int(49));
    }

    #[test]
    fn test_division_by_zero_reports_line() {
        let program = main_with(
            vec![Value::Int(5), Value::Int(0)],
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abx(OpCode::LoadK, 1, 1),
                Instruction::abc(OpCode::Div, 2, 0, 1),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            3,
        );
        let (vm, result, _) = run(&program);
        let error = result.unwrap_err();
        assert!(matches!(error.kind, RuntimeErrorKind::DivisionByZero));
        assert_eq!(error.line, 3);
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn test_modulo() {
        assert_eq!(modulo(&Value::Int(7), &Value::Int(3)).unwrap(), Value::Int(1));
        assert_eq!(modulo(&Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(-1));
        assert!(matches!(
            modulo(&Value::Int(7), &Value::Int(0)),
            Err(RuntimeErrorKind::ModuloByZero)
        ));
        assert!(matches!(
            modulo(&Value::Float(7.0), &Value::Int(2)),
            Err(RuntimeErrorKind::ModuloRequiresIntegers(..))
        ));
    }

    #[test]
    fn test_numeric_strings_coerce_in_arithmetic() {
        let result = arithmetic(
            "+",
            &Value::Str("2".to_string()),
            &Value::Int(1),
            i64::wrapping_add,
            |x, y| x + y,
        );
        assert_eq!(result.unwrap(), Value::Float(3.0));
        assert!(matches!(
            arithmetic("+", &Value::Nil, &Value::Int(1), i64::wrapping_add, |x, y| x + y),
            Err(RuntimeErrorKind::InvalidOperands { operator: "+", .. })
        ));
        assert_eq!(
            arithmetic("+", &Value::Int(i64::MAX), &Value::Int(1), i64::wrapping_add, |x, y| x + y)
                .unwrap(),
            Value::Int(i64::MIN)
        );
    }

    #[test]
    fn test_comparison() {
        assert_eq!(
            compare("<", &Value::Int(1), &Value::Float(1.5), |o| o.is_lt()).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            compare("<=", &Value::Int(2), &Value::Int(2), |o| o.is_le()).unwrap(),
            Value::Bool(true)
        );
        assert!(compare("<", &Value::Array(vec![]), &Value::Int(1), |o| o.is_lt()).is_err());
    }

    #[test]
    fn test_backward_jump_loop() {
        // r0 = 3; while r0 { print r0; r0 = r0 - 1 }
        let program = main_with(
            vec![Value::Int(3), Value::Int(1)],
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abx(OpCode::LoadK, 1, 1),
                Instruction::asbx(OpCode::JmpIfNot, 0, 3),
                Instruction::abc(OpCode::Print, 0, 1, 0),
                Instruction::abc(OpCode::Sub, 0, 0, 1),
                Instruction::asbx(OpCode::Jmp, 0, -4),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            2,
        );
        let (_, result, output) = run(&program);
        result.unwrap();
        assert_eq!(output, "3\n2\n1\n");
    }

    #[test]
    fn test_call_and_return() {
        let mut double = FunctionProto::new("double", 1);
        double.code = vec![
            Instruction::abc(OpCode::Add, 1, 0, 0),
            Instruction::abc(OpCode::Return, 1, 1, 0),
        ];
        double.lines = vec![1, 1];
        double.max_registers = 2;

        let mut program = main_with(
            vec![
                Value::Function(FunctionRef {
                    index: 1,
                    name: "double".to_string(),
                }),
                Value::Int(21),
            ],
            vec![
                Instruction::abx(OpCode::LoadK, 1, 1),
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abc(OpCode::Call, 0, 1, 1),
                Instruction::abc(OpCode::Print, 0, 1, 0),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            2,
        );
        program.functions.push(double);

        let (vm, result, output) = run(&program);
        result.unwrap();
        assert_eq!(output, "42\n");
        assert!(vm.frames.len() == 1);
    }

    #[test]
    fn test_arity_mismatch() {
        let mut f = FunctionProto::new("f", 2);
        f.code = vec![Instruction::abc(OpCode::Return, 0, 0, 0)];
        f.lines = vec![1];

        let mut program = main_with(
            vec![Value::Function(FunctionRef {
                index: 1,
                name: "f".to_string(),
            })],
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abc(OpCode::Call, 0, 1, 0),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            1,
        );
        program.functions.push(f);

        let (_, result, _) = run(&program);
        assert!(matches!(
            result.unwrap_err().kind,
            RuntimeErrorKind::ArityMismatch {
                expected: 2,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_unbounded_recursion_overflows() {
        // function 1 calls itself through the global "f"
        let mut f = FunctionProto::new("f", 0);
        f.constants = vec![Value::Str("f".to_string())];
        f.code = vec![
            Instruction::abx(OpCode::GetGlobal, 0, 0),
            Instruction::abc(OpCode::Call, 0, 1, 0),
            Instruction::abc(OpCode::Return, 0, 1, 0),
        ];
        f.lines = vec![1, 1, 1];
        f.max_registers = 1;

        let mut program = main_with(
            vec![
                Value::Function(FunctionRef {
                    index: 1,
                    name: "f".to_string(),
                }),
                Value::Str("f".to_string()),
            ],
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abx(OpCode::SetGlobal, 0, 1),
                Instruction::abc(OpCode::Call, 0, 1, 0),
                Instruction::abc(OpCode::Halt, 0, 0, 0),
            ],
            1,
        );
        program.functions.push(f);

        let (vm, result, _) = run(&program);
        assert!(matches!(
            result.unwrap_err().kind,
            RuntimeErrorKind::StackOverflow
        ));
        assert!(vm.frames.is_empty());
    }

    #[test]
    fn test_undefined_global() {
        let program = main_with(
            vec![Value::Str("missing".to_string())],
            vec![Instruction::abx(OpCode::GetGlobal, 0, 0)],
            1,
        );
        let (_, result, _) = run(&program);
        assert!(matches!(
            result.unwrap_err().kind,
            RuntimeErrorKind::UndefinedVariable(name) if name == "missing"
        ));
    }

    #[test]
    fn test_array_operations() {
        let program = main_with(
            vec![Value::Int(10), Value::Int(0), Value::Int(5)],
            vec![
                Instruction::abc(OpCode::NewArray, 0, 1, 0),
                Instruction::abx(OpCode::LoadK, 1, 0),
                Instruction::abc(OpCode::Append, 0, 1, 0),
                Instruction::abx(OpCode::LoadK, 2, 1),
                Instruction::abx(OpCode::LoadK, 3, 2),
                Instruction::abc(OpCode::SetElem, 0, 2, 3),
                Instruction::abc(OpCode::GetElem, 4, 0, 2),
                Instruction::abc(OpCode::Len, 5, 0, 0),
                Instruction::abc(OpCode::Print, 4, 2, 0),
                Instruction::abc(OpCode::GetElem, 4, 0, 1),
            ],
            6,
        );
        let (_, result, output) = run(&program);
        assert_eq!(output, "5 1\n");
        assert!(matches!(
            result.unwrap_err().kind,
            RuntimeErrorKind::IndexOutOfBounds {
                index: 10,
                length: 1
            }
        ));
    }

    #[test]
    fn test_natives_are_preloaded() {
        let vm = Vm::new(Rc::new(RefCell::new(Vec::new())));
        assert_eq!(vm.global("cetak"), Some(&Value::Native(Native::Print)));
        assert_eq!(vm.global("range"), Some(&Value::Native(Native::Range)));
    }

    #[test]
    fn test_dump_globals_sorted() {
        let vm = Vm::new(Rc::new(RefCell::new(Vec::new())));
        let mut out = Vec::new();
        vm.dump_globals(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "== globals ==\ncetak = <native print>\nprint = <native print>\nrange = <native range>\n"
        );
    }
}
