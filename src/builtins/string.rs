//! String methods
//!
//! `replace` and `match` take a `RegExp` object or the source of a regular
//! expression as a string; the pattern syntax is that of the `regex` crate.

use regex::Regex;

use crate::builtins::{add_methods, number_arg, string_arg, this_of};
use crate::runtime::function::{Arguments, NativeFn};
use crate::runtime::object::ObjectType;
use crate::runtime::string::{
    char_at, char_count, index_of as find_chars, last_index_of as rfind_chars, relative_index,
    slice_chars,
};
use crate::value::{LAST_INDEX, Value};
use crate::vm::{Interpreter, InterpreterError, InterpreterResult};

const METHODS: &[(&str, &[&str], NativeFn)] = &[
    ("charAt", &["index"], char_at_method),
    ("charCodeAt", &["index"], char_code_at),
    ("indexOf", &["search"], index_of),
    ("lastIndexOf", &["search"], last_index_of),
    ("includes", &["search"], includes),
    ("endsWith", &["search", "length"], ends_with),
    ("concat", &[], concat),
    ("slice", &["start", "end"], slice),
    ("substr", &["start", "length"], substr),
    ("split", &["separator"], split),
    ("trim", &[], trim),
    ("trimLeft", &[], trim_left),
    ("trimRight", &[], trim_right),
    ("toUpperCase", &[], to_upper_case),
    ("toLowerCase", &[], to_lower_case),
    ("replace", &["pattern", "replacement"], replace),
    ("match", &["pattern"], match_pattern),
];

pub fn install(interp: &mut Interpreter) {
    add_methods(&interp.intrinsics().string, METHODS);
}

fn this_string(args: &Arguments, method: &str) -> InterpreterResult<String> {
    let this = this_of(args, ObjectType::String, method)?;
    Ok(this.string_value().unwrap_or_default())
}

fn compile_pattern(pattern: &str) -> InterpreterResult<Regex> {
    Regex::new(pattern).map_err(|e| {
        InterpreterError::TypeError(format!("invalid regular expression '{}': {}", pattern, e))
    })
}

fn char_at_method(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "charAt")?;
    let index = number_arg(args, 0, 0.0, "charAt")?;
    if index < 0.0 || index.is_nan() {
        return Ok(Value::string(""));
    }
    Ok(Value::string(char_at(&s, index as usize).unwrap_or_default()))
}

/// Code point of the character at `index`, NaN out of range
fn char_code_at(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "charCodeAt")?;
    let index = number_arg(args, 0, 0.0, "charCodeAt")?;
    let code = (index >= 0.0)
        .then(|| s.chars().nth(index as usize))
        .flatten()
        .map_or(f64::NAN, |c| u32::from(c) as f64);
    Ok(Value::number(code))
}

fn index_of(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "indexOf")?;
    let needle = args.at(0).to_string();
    let position = find_chars(&s, &needle).map_or(-1.0, |i| i as f64);
    Ok(Value::number(position))
}

fn last_index_of(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "lastIndexOf")?;
    let needle = args.at(0).to_string();
    let position = rfind_chars(&s, &needle).map_or(-1.0, |i| i as f64);
    Ok(Value::number(position))
}

fn includes(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "includes")?;
    Ok(Value::bool(s.contains(&args.at(0).to_string())))
}

/// `endsWith(search, length)`: only the first `length` characters count
fn ends_with(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "endsWith")?;
    let len = char_count(&s);
    let end = relative_index(number_arg(args, 1, len as f64, "endsWith")?.max(0.0), len);
    let head = slice_chars(&s, 0, end);
    Ok(Value::bool(head.ends_with(&args.at(0).to_string())))
}

fn concat(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let mut s = this_string(args, "concat")?;
    for value in args.values() {
        s.push_str(&value.to_string());
    }
    Ok(Value::string(s))
}

fn slice(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "slice")?;
    let len = char_count(&s);
    let start = relative_index(number_arg(args, 0, 0.0, "slice")?, len);
    let end = relative_index(number_arg(args, 1, len as f64, "slice")?, len);
    Ok(Value::string(slice_chars(&s, start, end)))
}

/// `substr(start, length)`; a negative start counts from the end
fn substr(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "substr")?;
    let len = char_count(&s);
    let start = relative_index(number_arg(args, 0, 0.0, "substr")?, len);
    let count = number_arg(args, 1, len as f64, "substr")?;
    if count.is_nan() || count <= 0.0 {
        return Ok(Value::string(""));
    }
    let end = start.saturating_add(count.min(len as f64) as usize).min(len);
    Ok(Value::string(slice_chars(&s, start, end)))
}

fn split(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "split")?;
    let separator = args.at(0);
    let parts: Vec<Value> = if separator.is_undefined() {
        vec![Value::string(s)]
    } else {
        let separator = separator.to_string();
        if separator.is_empty() {
            s.chars().map(|c| Value::string(c.to_string())).collect()
        } else {
            s.split(separator.as_str()).map(Value::string).collect()
        }
    };
    Ok(Value::array(parts))
}

fn trim(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(this_string(args, "trim")?.trim()))
}

fn trim_left(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(this_string(args, "trimLeft")?.trim_start()))
}

fn trim_right(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(this_string(args, "trimRight")?.trim_end()))
}

fn to_upper_case(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(this_string(args, "toUpperCase")?.to_uppercase()))
}

fn to_lower_case(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    Ok(Value::string(this_string(args, "toLowerCase")?.to_lowercase()))
}

/// The pattern argument and whether it is global
fn pattern_arg(args: &Arguments, method: &str) -> InterpreterResult<(Regex, bool)> {
    let pattern = args.at(0);
    if let Some(re) = pattern.borrow().as_regexp() {
        return Ok((re.regex().clone(), re.global()));
    }
    Ok((compile_pattern(&string_arg(args, 0, method)?)?, false))
}

/// Replace the first match, or every match for a global `RegExp`. `$1`-style
/// group references are expanded.
fn replace(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "replace")?;
    let (pattern, global) = pattern_arg(args, "replace")?;
    let replacement = args.at(1).to_string();
    let replaced = if global {
        pattern.replace_all(&s, replacement.as_str())
    } else {
        pattern.replace(&s, replacement.as_str())
    };
    Ok(Value::string(replaced.into_owned()))
}

/// First match and its groups, or null. A global `RegExp` yields every
/// match instead and resets its `lastIndex`.
fn match_pattern(_: &mut Interpreter, args: &Arguments) -> InterpreterResult<Value> {
    let s = this_string(args, "match")?;
    let (pattern, global) = pattern_arg(args, "match")?;
    if global {
        args.at(0).set_property(LAST_INDEX, Value::number(0.0));
        let matches: Vec<Value> = pattern.find_iter(&s).map(|m| Value::string(m.as_str())).collect();
        if matches.is_empty() {
            return Ok(Value::null());
        }
        return Ok(Value::array(matches));
    }
    let Some(captures) = pattern.captures(&s) else {
        return Ok(Value::null());
    };
    let groups = captures
        .iter()
        .map(|group| match group {
            Some(m) => Value::string(m.as_str()),
            None => Value::undefined(),
        })
        .collect();
    Ok(Value::array(groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: NativeFn, this: &str, args: Vec<Value>) -> InterpreterResult<Value> {
        let mut interp = Interpreter::new();
        f(&mut interp, &Arguments::new(&[], args, Value::string(this)))
    }

    fn text(f: NativeFn, this: &str, args: Vec<Value>) -> String {
        call(f, this, args).unwrap().to_string()
    }

    #[test]
    fn test_char_at_and_index_of() {
        assert_eq!(text(char_at_method, "hello", vec![Value::number(1.0)]), "e");
        assert_eq!(text(char_at_method, "hello", vec![Value::number(9.0)]), "");
        assert_eq!(text(index_of, "hello", vec![Value::string("ll")]), "2");
        assert_eq!(text(index_of, "hello", vec![Value::string("z")]), "-1");
    }

    #[test]
    fn test_slice_and_split() {
        assert_eq!(text(slice, "hello", vec![Value::number(1.0), Value::number(3.0)]), "el");
        assert_eq!(text(slice, "hello", vec![Value::number(-3.0)]), "llo");
        assert_eq!(text(split, "a,b,c", vec![Value::string(",")]), "a,b,c");
        let parts = call(split, "abc", vec![Value::string("")]).unwrap();
        assert_eq!(parts.get_property("length").to_string(), "3");
    }

    #[test]
    fn test_case() {
        assert_eq!(text(to_upper_case, "MiXed", vec![]), "MIXED");
        assert_eq!(text(to_lower_case, "MiXed", vec![]), "mixed");
    }

    #[test]
    fn test_replace_and_match() {
        assert_eq!(
            text(replace, "a1b22", vec![Value::string("[0-9]+"), Value::string("#")]),
            "a#b22"
        );
        assert_eq!(
            text(replace, "john smith", vec![Value::string("(\\w+) (\\w+)"), Value::string("$2 $1")]),
            "smith john"
        );
        let m = call(match_pattern, "key=value", vec![Value::string("(\\w+)=(\\w+)")]).unwrap();
        assert_eq!(m.to_string(), "key=value,key,value");
        assert!(call(match_pattern, "abc", vec![Value::string("z")]).unwrap().is_null());
    }

    fn regexp(source: &str, flags: &str) -> Value {
        Value::regexp(crate::runtime::regexp::JsRegExp::new(source, flags).unwrap())
    }

    #[test]
    fn test_search_methods() {
        assert_eq!(text(last_index_of, "abcabc", vec![Value::string("bc")]), "4");
        assert_eq!(text(last_index_of, "abc", vec![Value::string("x")]), "-1");
        assert_eq!(text(includes, "haystack", vec![Value::string("st")]), "1");
        assert_eq!(text(includes, "haystack", vec![Value::string("ts")]), "0");
        assert_eq!(text(ends_with, "file.rs", vec![Value::string(".rs")]), "1");
        assert_eq!(text(ends_with, "file.rs", vec![Value::string("file"), Value::number(4.0)]), "1");
        assert_eq!(text(char_code_at, "aé", vec![Value::number(1.0)]), "233");
        assert_eq!(text(char_code_at, "a", vec![Value::number(5.0)]), "NaN");
    }

    #[test]
    fn test_concat_substr_trim() {
        assert_eq!(text(concat, "a", vec![Value::string("b"), Value::number(1.0)]), "ab1");
        assert_eq!(text(substr, "hello", vec![Value::number(1.0), Value::number(3.0)]), "ell");
        assert_eq!(text(substr, "hello", vec![Value::number(-3.0)]), "llo");
        assert_eq!(text(substr, "hello", vec![Value::number(1.0), Value::number(-1.0)]), "");
        assert_eq!(text(trim, "  x y \n", vec![]), "x y");
        assert_eq!(text(trim_left, "  x ", vec![]), "x ");
        assert_eq!(text(trim_right, "  x ", vec![]), "  x");
    }

    #[test]
    fn test_regexp_patterns() {
        let global = regexp("o", "g");
        assert_eq!(
            text(replace, "foo boo", vec![global.clone(), Value::string("0")]),
            "f00 b00"
        );
        assert_eq!(text(replace, "foo", vec![regexp("O", "i"), Value::string("0")]), "f0o");

        global.set_property(LAST_INDEX, Value::number(3.0));
        let all = call(match_pattern, "foo boo", vec![global.clone()]).unwrap();
        assert_eq!(all.to_string(), "o,o,o,o");
        assert_eq!(global.get_property(LAST_INDEX).to_string(), "0");
        assert!(call(match_pattern, "xyz", vec![global]).unwrap().is_null());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = call(replace, "abc", vec![Value::string("("), Value::string("")]).unwrap_err();
        assert!(matches!(err, InterpreterError::TypeError(_)));
    }
}
