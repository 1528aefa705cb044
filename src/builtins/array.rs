//! `Array` constructor and array methods

use crate::builtins::{add_methods, define_frozen, function_arg, number_arg, this_of};
use crate::runtime::array::{JsArray, MAX_ARRAY_LENGTH};
use crate::runtime::function::{Arguments, Function, NativeFn};
use crate::runtime::object::{ObjectKind, ObjectType};
use crate::runtime::operators;
use crate::runtime::string::relative_index;
use crate::value::{PROTOTYPE, Value};
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

const METHODS: &[(&str, &[&str], NativeFn)] = &[
    ("push", &[], push),
    ("pop", &[], pop),
    ("shift", &[], shift),
    ("unshift", &[], unshift),
    ("concat", &[], concat),
    ("join", &["separator"], join),
    ("slice", &["start", "end"], slice),
    ("reverse", &[], reverse),
    ("indexOf", &["value"], index_of),
    ("sort", &["compare"], sort),
    ("map", &["callback", "thisArg"], map),
];

pub fn install(interp: &mut Interpreter) {
    let constructor = Value::function(Function::native("Array", &["length"], construct));
    add_methods(&constructor.get_property(PROTOTYPE), METHODS);
    add_methods(&interp.intrinsics().array, METHODS);
    define_frozen(interp, "Array", constructor);
}

/// `Array(n)` has length `n`; any other argument list becomes the elements
fn construct(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    if args.len() == 1 {
        if let Some(length) = args.at(0).as_number() {
            if length < 0.0 || length.fract() != 0.0 || length > MAX_ARRAY_LENGTH as f64 {
                return Err(InterpreterError::invalid_array_length());
            }
            let holes =
                JsArray::with_length(length as usize).ok_or_else(InterpreterError::invalid_array_length)?;
            let array = Value::array(Vec::new());
            if let Some(elements) = array.borrow_mut().as_array_mut() {
                *elements = holes;
            }
            return Ok(array);
        }
    }
    Ok(Value::array(args.values().to_vec()))
}

/// Run `f` on the receiver's elements
fn with_elements<T>(
    args: &Arguments,
    method: &str,
    f: impl FnOnce(&mut JsArray) -> T,
) -> InterpreterResult<T> {
    let this = this_of(args, ObjectType::Array, method)?;
    let mut object = this.borrow_mut();
    match object.kind_mut() {
        ObjectKind::Array(elements) => Ok(f(elements)),
        _ => Err(InterpreterError::TypeError(format!("{} called on a non-array", method))),
    }
}

fn push(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let len = with_elements(args, "push", |elements| {
        args.values()
            .iter()
            .try_fold(elements.len(), |_, value| elements.push(value.clone()))
    })?
    .ok_or_else(InterpreterError::invalid_array_length)?;
    Ok(Value::number(len as f64))
}

fn pop(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let popped = with_elements(args, "pop", |elements| elements.pop())?;
    Ok(popped.unwrap_or_else(Value::undefined))
}

fn shift(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let shifted = with_elements(args, "shift", |elements| elements.shift())?;
    Ok(shifted.unwrap_or_else(Value::undefined))
}

fn unshift(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let len = with_elements(args, "unshift", |elements| {
        elements.unshift(args.values().to_vec())
    })?
    .ok_or_else(InterpreterError::invalid_array_length)?;
    Ok(Value::number(len as f64))
}

/// New array of the receiver's elements followed by each argument; array
/// arguments contribute their elements
fn concat(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let mut combined = with_elements(args, "concat", |e| e.values())?;
    for value in args.values() {
        match value.borrow().as_array() {
            Some(array) => combined.extend(array.iter()),
            None => combined.push(value.clone()),
        }
        if combined.len() > MAX_ARRAY_LENGTH {
            return Err(InterpreterError::invalid_array_length());
        }
    }
    Ok(Value::array(combined))
}

fn join(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let separator = args.at(0);
    let separator = if separator.is_undefined() {
        ",".to_string()
    } else {
        separator.to_string()
    };
    let this = this_of(args, ObjectType::Array, "join")?;
    // A self-reference joins as empty
    let elements = with_elements(args, "join", |e| e.values())?;
    let parts: Vec<String> = elements
        .iter()
        .map(|v| {
            if v.is_nullish() || v.ptr_eq(&this) {
                String::new()
            } else {
                v.to_string()
            }
        })
        .collect();
    Ok(Value::string(parts.join(&separator)))
}

fn slice(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let elements = with_elements(args, "slice", |e| e.values())?;
    let len = elements.len();
    let start = relative_index(number_arg(args, 0, 0.0, "slice")?, len);
    let end = relative_index(number_arg(args, 1, len as f64, "slice")?, len);
    let picked = if start < end {
        elements[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(Value::array(picked))
}

fn reverse(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    with_elements(args, "reverse", |elements| elements.reverse())?;
    Ok(args.this())
}

fn index_of(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let needle = args.at(0);
    let elements = with_elements(args, "indexOf", |e| e.values())?;
    let position = elements
        .iter()
        .position(|v| operators::equals(v, &needle))
        .map_or(-1.0, |i| i as f64);
    Ok(Value::number(position))
}

/// Stable in-place sort. Without a comparator elements compare by their
/// string form; undefined always sorts last.
fn sort(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let comparator = args.at(0);
    if !comparator.is_undefined() && !comparator.is_function() {
        return Err(InterpreterError::TypeError(
            "sort: comparator must be a function".to_string(),
        ));
    }
    let elements = with_elements(args, "sort", |e| e.values())?;
    let sorted = merge_sort(elements, &mut |a, b| sorts_after(interp, &comparator, a, b))?;
    with_elements(args, "sort", |e| e.replace(sorted))?;
    Ok(args.this())
}

fn sorts_after(
    interp: &mut Interpreter,
    comparator: &Value,
    a: &Value,
    b: &Value,
) -> InterpreterResult<bool> {
    if a.is_undefined() || b.is_undefined() {
        return Ok(a.is_undefined() && !b.is_undefined());
    }
    if comparator.is_undefined() {
        return Ok(a.to_string() > b.to_string());
    }
    let order = interp.call_function(comparator, None, vec![a.clone(), b.clone()])?;
    Ok(order.to_number().is_some_and(|n| n > 0.0))
}

/// Merge sort with a fallible ordering; the comparator may run script code
fn merge_sort<F>(mut values: Vec<Value>, after: &mut F) -> InterpreterResult<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> InterpreterResult<bool>,
{
    if values.len() <= 1 {
        return Ok(values);
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(values, after)?;
    let right = merge_sort(right, after)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => after(l, r)?,
            _ => break,
        };
        merged.extend(if take_right { right.next() } else { left.next() });
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

/// `map(callback, thisArg)`: callback receives element, index and array
fn map(interp: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let this = this_of(args, ObjectType::Array, "map")?;
    let callback = function_arg(args, 0, "map")?;
    let receiver = Some(args.at(1)).filter(|v| !v.is_undefined());
    let elements = with_elements(args, "map", |e| e.values())?;

    let mut mapped = Vec::with_capacity(elements.len());
    for (i, element) in elements.into_iter().enumerate() {
        let call_args = vec![element, Value::number(i as f64), this.clone()];
        mapped.push(interp.call_function(&callback, receiver.clone(), call_args)?);
    }
    Ok(Value::array(mapped))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: NativeFn, this: &Value, args: Vec<Value>) -> InterpreterResult<Value> {
        let mut interp = Interpreter::new();
        f(&mut interp, &Arguments::new(&[], args, this.clone()))
    }

    fn numbers(values: &[f64]) -> Value {
        Value::array(values.iter().map(|n| Value::number(*n)).collect())
    }

    fn descending(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
        let a = args.at(0).as_number().unwrap_or(0.0);
        let b = args.at(1).as_number().unwrap_or(0.0);
        Ok(Value::number(b - a))
    }

    fn index_times_ten(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
        let index = args.at(1).as_number().unwrap_or(f64::NAN);
        Ok(Value::number(index * 10.0))
    }

    fn native(name: &str, f: NativeFn) -> Value {
        Value::function(Function::native(name, &[], f))
    }

    #[test]
    fn test_construct() {
        let a = call(construct, &Value::null(), vec![Value::number(3.0)]).unwrap();
        assert_eq!(a.get_property("length").to_string(), "3");
        assert!(a.get_property("0").is_undefined());

        let a = call(construct, &Value::null(), vec![Value::number(1.0), Value::string("x")]).unwrap();
        assert_eq!(a.to_string(), "1,x");

        let err = call(construct, &Value::null(), vec![Value::number(-1.0)]).unwrap_err();
        assert!(matches!(err, InterpreterError::RangeError(_)));
    }

    #[test]
    fn test_construct_refuses_huge_length() {
        let err = call(construct, &Value::null(), vec![Value::number(1_073_741_823.0)]).unwrap_err();
        assert_eq!(err, InterpreterError::invalid_array_length());
    }

    #[test]
    fn test_push_pop() {
        let a = numbers(&[1.0]);
        let len = call(push, &a, vec![Value::number(2.0), Value::number(3.0)]).unwrap();
        assert_eq!(len.to_string(), "3");
        assert_eq!(call(pop, &a, vec![]).unwrap().to_string(), "3");
        assert_eq!(a.to_string(), "1,2");
    }

    #[test]
    fn test_shift_unshift() {
        let a = numbers(&[3.0]);
        let len = call(unshift, &a, vec![Value::number(1.0), Value::number(2.0)]).unwrap();
        assert_eq!(len.to_string(), "3");
        assert_eq!(a.to_string(), "1,2,3");
        assert_eq!(call(shift, &a, vec![]).unwrap().to_string(), "1");
        assert_eq!(a.to_string(), "2,3");
        assert!(call(shift, &numbers(&[]), vec![]).unwrap().is_undefined());
    }

    #[test]
    fn test_concat() {
        let a = numbers(&[1.0]);
        let joined = call(concat, &a, vec![numbers(&[2.0, 3.0]), Value::string("x")]).unwrap();
        assert_eq!(joined.to_string(), "1,2,3,x");
        assert!(!joined.ptr_eq(&a));
        assert_eq!(a.to_string(), "1");
    }

    #[test]
    fn test_join_and_slice() {
        let a = numbers(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(call(join, &a, vec![]).unwrap().to_string(), "1,2,3,4");
        assert_eq!(call(join, &a, vec![Value::string("-")]).unwrap().to_string(), "1-2-3-4");
        let s = call(slice, &a, vec![Value::number(1.0), Value::number(-1.0)]).unwrap();
        assert_eq!(s.to_string(), "2,3");
    }

    #[test]
    fn test_reverse_and_index_of() {
        let a = numbers(&[1.0, 2.0, 3.0]);
        let r = call(reverse, &a, vec![]).unwrap();
        assert!(r.ptr_eq(&a));
        assert_eq!(a.to_string(), "3,2,1");
        assert_eq!(call(index_of, &a, vec![Value::number(1.0)]).unwrap().to_string(), "2");
        assert_eq!(call(index_of, &a, vec![Value::string("1")]).unwrap().to_string(), "-1");
    }

    #[test]
    fn test_sort_default_order() {
        let a = Value::array(vec![
            Value::number(10.0),
            Value::undefined(),
            Value::number(9.0),
            Value::string("a"),
            Value::number(1.0),
        ]);
        let sorted = call(sort, &a, vec![]).unwrap();
        assert!(sorted.ptr_eq(&a));
        // String order, undefined last
        assert_eq!(a.as_string(), r#"[ 1, 10, 9, "a", undefined ]"#);
    }

    #[test]
    fn test_sort_with_comparator() {
        let a = numbers(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
        call(sort, &a, vec![native("descending", descending)]).unwrap();
        assert_eq!(a.to_string(), "9,6,5,4,3,2,1,1");

        let err = call(sort, &a, vec![Value::number(1.0)]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }

    #[test]
    fn test_map() {
        let a = numbers(&[7.0, 8.0, 9.0]);
        let mapped = call(map, &a, vec![native("f", index_times_ten)]).unwrap();
        assert_eq!(mapped.to_string(), "0,10,20");
        assert_eq!(a.to_string(), "7,8,9");

        let err = call(map, &a, vec![]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }

    #[test]
    fn test_wrong_receiver() {
        let err = call(push, &Value::number(1.0), vec![]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }
}
