//! Number methods and the `Math` object

use crate::builtins::{add_methods, define_frozen, number_arg, this_of};
use crate::runtime::function::{Arguments, NativeFn};
use crate::runtime::object::ObjectType;
use crate::util::dtoa::{number_to_fixed, number_to_radix_string};
use crate::value::Value;
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

const METHODS: &[(&str, &[&str], NativeFn)] = &[
    ("toString", &["radix"], to_string),
    ("toFixed", &["digits"], to_fixed),
];

const MATH: &[(&str, &[&str], NativeFn)] = &[
    ("floor", &["x"], floor),
    ("ceil", &["x"], ceil),
    ("abs", &["x"], abs),
    ("sqrt", &["x"], sqrt),
    ("pow", &["x", "y"], pow),
    ("max", &[], max),
    ("min", &[], min),
];

pub fn install(interp: &mut Interpreter) {
    add_methods(&interp.intrinsics().number, METHODS);

    let math = Value::object();
    add_methods(&math, MATH);
    math.set_property("PI", Value::number(std::f64::consts::PI));
    math.set_property("E", Value::number(std::f64::consts::E));
    define_frozen(interp, "Math", math);
}

fn this_number(args: &Arguments, method: &str) -> InterpreterResult<f64> {
    let this = this_of(args, ObjectType::Number, method)?;
    Ok(this.as_number().unwrap_or(f64::NAN))
}

fn to_string(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let n = this_number(args, "toString")?;
    let radix = number_arg(args, 0, 10.0, "toString")?;
    number_to_radix_string(n, radix as u32)
        .filter(|_| radix.fract() == 0.0)
        .map(Value::string)
        .ok_or_else(|| {
            InterpreterError::RangeError("toString() radix must be between 2 and 36".to_string())
        })
}

fn to_fixed(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let n = this_number(args, "toFixed")?;
    let digits = number_arg(args, 0, 0.0, "toFixed")?;
    if !(0.0..=100.0).contains(&digits) {
        return Err(InterpreterError::RangeError(
            "toFixed() digits argument must be between 0 and 100".to_string(),
        ));
    }
    Ok(Value::string(number_to_fixed(n, digits as usize)))
}

/// Arguments that are not numbers read as NaN
fn math_arg(args: &Arguments, index: usize) -> f64 {
    args.at(index).as_number().unwrap_or(f64::NAN)
}

fn floor(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::number(math_arg(args, 0).floor()))
}

fn ceil(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::number(math_arg(args, 0).ceil()))
}

fn abs(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::number(math_arg(args, 0).abs()))
}

fn sqrt(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::number(math_arg(args, 0).sqrt()))
}

fn pow(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::number(math_arg(args, 0).powf(math_arg(args, 1))))
}

fn max(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let mut result = f64::NEG_INFINITY;
    for i in 0..args.len() {
        let n = math_arg(args, i);
        if n.is_nan() {
            return Ok(Value::number(f64::NAN));
        }
        result = result.max(n);
    }
    Ok(Value::number(result))
}

fn min(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let mut result = f64::INFINITY;
    for i in 0..args.len() {
        let n = math_arg(args, i);
        if n.is_nan() {
            return Ok(Value::number(f64::NAN));
        }
        result = result.min(n);
    }
    Ok(Value::number(result))
}
