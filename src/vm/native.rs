use std::{cell::RefCell, io::Write};

use super::{Native, RuntimeErrorKind, Value};

pub fn call(
    native: Native,
    args: &[Value],
    stdout: &RefCell<dyn Write>,
) -> Result<Value, RuntimeErrorKind> {
    match native {
        Native::Print => {
            print(args, stdout)?;
            Ok(Value::Nil)
        }
        Native::Range => range(args),
    }
}

/// Writes the values separated by single spaces and ends the line.
pub fn print(args: &[Value], stdout: &RefCell<dyn Write>) -> Result<(), RuntimeErrorKind> {
    let line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(stdout.borrow_mut(), "{}", line)?;
    Ok(())
}

/// Longest array `range` will build.
const MAX_RANGE_LENGTH: i64 = 1 << 22;

fn range(args: &[Value]) -> Result<Value, RuntimeErrorKind> {
    let (start, end) = match args {
        [Value::Int(end)] => (0, *end),
        [Value::Int(start), Value::Int(end)] => (*start, *end),
        _ => return Err(RuntimeErrorKind::InvalidRangeArguments),
    };
    match end.checked_sub(start) {
        Some(length) if length <= MAX_RANGE_LENGTH => {}
        _ => return Err(RuntimeErrorKind::InvalidRangeArguments),
    }
    Ok(Value::Array((start..end).map(Value::Int).collect()))
}
