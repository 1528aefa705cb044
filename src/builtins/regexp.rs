//! `RegExp` constructor and regular expression methods

use crate::builtins::{add_methods, define_frozen, this_of};
use crate::runtime::function::{Arguments, Function, NativeFn};
use crate::runtime::object::ObjectType;
use crate::runtime::regexp::JsRegExp;
use crate::runtime::string::{byte_offset, char_count, char_position};
use crate::value::{LAST_INDEX, Value};
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

const METHODS: &[(&str, &[&str], NativeFn)] = &[("exec", &["string"], exec), ("test", &["string"], test)];

pub fn install(interp: &mut Interpreter) {
    let constructor = Value::function(Function::native("RegExp", &["pattern", "flags"], construct));
    add_methods(&interp.intrinsics().regexp, METHODS);
    define_frozen(interp, "RegExp", constructor);
}

/// `RegExp(pattern, flags)`. A regular expression argument is copied, keeping
/// its flags unless new ones are given.
fn construct(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let pattern = args.at(0);
    let (source, flags) = match pattern.borrow().as_regexp() {
        Some(re) => (re.source().to_string(), re.flags().to_string()),
        None if pattern.is_undefined() => (String::new(), String::new()),
        None => (pattern.to_string(), String::new()),
    };
    let flags = match args.at(1) {
        f if f.is_undefined() => flags,
        f => f.to_string(),
    };
    Ok(Value::regexp(JsRegExp::new(&source, &flags)?))
}

fn exec(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let this = this_of(args, ObjectType::RegExp, "exec")?;
    exec_on(&this, &args.at(0).to_string())
}

fn test(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let this = this_of(args, ObjectType::RegExp, "test")?;
    let found = exec_on(&this, &args.at(0).to_string())?;
    Ok(Value::bool(!found.is_null()))
}

/// Next match of `re` in `text`: an array of the match and its groups with
/// `index` and `input` properties, or null. Global patterns search from
/// `lastIndex` and move it past the match, or back to 0 when nothing is left.
pub(crate) fn exec_on(re: &Value, text: &str) -> InterpreterResult<Value> {
    let (regex, global) = {
        let object = re.borrow();
        let pattern = object.as_regexp().ok_or_else(|| {
            InterpreterError::TypeError("exec called on a non-regexp".to_string())
        })?;
        (pattern.regex().clone(), pattern.global())
    };

    let start = if global { last_index(re) } else { 0 };
    let captures = (start <= char_count(text))
        .then(|| regex.captures_at(text, byte_offset(text, start)))
        .flatten();
    let Some((captures, whole)) = captures.and_then(|c| c.get(0).map(|m| (c, m))) else {
        if global {
            re.set_property(LAST_INDEX, Value::number(0.0));
        }
        return Ok(Value::null());
    };

    let groups = captures
        .iter()
        .map(|group| group.map_or_else(Value::undefined, |m| Value::string(m.as_str())))
        .collect();
    let result = Value::array(groups);
    result.set_property("index", Value::number(char_position(text, whole.start()) as f64));
    result.set_property("input", Value::string(text));
    if global {
        re.set_property(LAST_INDEX, Value::number(char_position(text, whole.end()) as f64));
    }
    Ok(result)
}

fn last_index(re: &Value) -> usize {
    re.get_property(LAST_INDEX)
        .to_number()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map_or(0, |n| n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regexp(source: &str, flags: &str) -> Value {
        Value::regexp(JsRegExp::new(source, flags).unwrap())
    }

    fn call(f: NativeFn, this: &Value, args: Vec<Value>) -> InterpreterResult<Value> {
        let mut interp = Interpreter::new();
        f(&mut interp, &Arguments::new(&[], args, this.clone()))
    }

    #[test]
    fn test_construct() {
        let re = call(construct, &Value::undefined(), vec![Value::string("a+"), Value::string("g")]).unwrap();
        assert_eq!(re.get_type(), ObjectType::RegExp);
        assert_eq!(re.to_string(), "/a+/g");
        assert_eq!(re.get_property(LAST_INDEX).to_string(), "0");

        let copy = call(construct, &Value::undefined(), vec![re.clone()]).unwrap();
        assert!(!copy.ptr_eq(&re));
        assert_eq!(copy.get_property("flags").to_string(), "g");

        let err = call(construct, &Value::undefined(), vec![Value::string("[")]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }

    #[test]
    fn test_exec() {
        let re = regexp("(\\d+)-(\\d+)", "");
        let m = call(exec, &re, vec![Value::string("tel 555-123")]).unwrap();
        assert_eq!(m.to_string(), "555-123,555,123");
        assert_eq!(m.get_property("index").to_string(), "4");
        assert_eq!(m.get_property("input").to_string(), "tel 555-123");
        assert!(call(exec, &re, vec![Value::string("none")]).unwrap().is_null());
    }

    #[test]
    fn test_global_exec_advances_last_index() {
        let re = regexp("o", "g");
        let text = Value::string("föo bo");
        let first = call(exec, &re, vec![text.clone()]).unwrap();
        assert_eq!(first.get_property("index").to_string(), "2");
        assert_eq!(re.get_property(LAST_INDEX).to_string(), "3");

        let second = call(exec, &re, vec![text.clone()]).unwrap();
        assert_eq!(second.get_property("index").to_string(), "5");

        assert!(call(exec, &re, vec![text]).unwrap().is_null());
        assert_eq!(re.get_property(LAST_INDEX).to_string(), "0");
    }

    #[test]
    fn test_test() {
        let re = regexp("^h", "i");
        assert_eq!(call(test, &re, vec![Value::string("Hello")]).unwrap().to_string(), "1");
        assert_eq!(call(test, &re, vec![Value::string("oh")]).unwrap().to_string(), "0");

        let err = call(test, &Value::object(), vec![]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }
}
