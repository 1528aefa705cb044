//! Regular expression payload
//!
//! Patterns use the syntax of the `regex` crate. Supported flags are `g`
//! (global), `i` (ignore case) and `m` (multiline).

use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::vm::{InterpreterError, InterpreterResult};

#[derive(Debug, Clone)]
pub struct JsRegExp {
    regex: Regex,
    source: String,
    flags: String,
}

impl JsRegExp {
    pub fn new(source: &str, flags: &str) -> InterpreterResult<Self> {
        let mut builder = RegexBuilder::new(source);
        for flag in flags.chars() {
            match flag {
                'g' => {}
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                _ => {
                    return Err(InterpreterError::TypeError(format!(
                        "invalid regular expression flags '{}'",
                        flags
                    )));
                }
            }
        }
        let regex = builder.build().map_err(|e| {
            InterpreterError::TypeError(format!("invalid regular expression '{}': {}", source, e))
        })?;
        Ok(JsRegExp {
            regex,
            source: source.to_string(),
            flags: flags.to_string(),
        })
    }

    #[inline]
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn global(&self) -> bool {
        self.flags.contains('g')
    }

    pub fn ignore_case(&self) -> bool {
        self.flags.contains('i')
    }

    pub fn multiline(&self) -> bool {
        self.flags.contains('m')
    }
}

/// `/source/flags`
impl fmt::Display for JsRegExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.source, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let re = JsRegExp::new("ab+c", "gi").unwrap();
        assert!(re.global());
        assert!(re.ignore_case());
        assert!(!re.multiline());
        assert!(re.regex().is_match("xABBC"));
        assert_eq!(re.to_string(), "/ab+c/gi");
    }

    #[test]
    fn test_multiline() {
        let re = JsRegExp::new("^b", "m").unwrap();
        assert!(re.regex().is_match("a\nb"));
        let re = JsRegExp::new("^b", "").unwrap();
        assert!(!re.regex().is_match("a\nb"));
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(JsRegExp::new("(", ""), Err(InterpreterError::TypeError(_))));
        assert!(matches!(JsRegExp::new("a", "x"), Err(InterpreterError::TypeError(_))));
    }
}
