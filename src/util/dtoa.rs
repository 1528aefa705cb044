//! Double to ASCII conversion
//!
//! Canonical number formatting used by `ToString`, plus the radix and
//! fixed-point variants behind the number intrinsics.

/// Largest magnitude printed without an exponent.
const EXPONENT_THRESHOLD: i32 = 21;
/// Smallest decimal exponent printed without an exponent.
const MIN_PLAIN_EXPONENT: i32 = -6;

/// Format a number in its canonical decimal form.
///
/// Integers print without a fraction, other values use the shortest digit
/// string that round-trips. Values outside `[1e-6, 1e21)` switch to
/// exponent notation (`1e+21`, `1.5e-7`).
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let negative = value < 0.0;
    let (digits, point) = shortest_digits(value.abs());
    let k = digits.len() as i32;

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }

    if k <= point && point <= EXPONENT_THRESHOLD {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (point - k) as usize));
    } else if 0 < point && point <= EXPONENT_THRESHOLD {
        let (int_part, frac_part) = digits.split_at(point as usize);
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_part);
    } else if MIN_PLAIN_EXPONENT < point && point <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-point) as usize));
        out.push_str(&digits);
    } else {
        let (first, rest) = digits.split_at(1);
        out.push_str(first);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        let exp = point - 1;
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&exp.abs().to_string());
    }
    out
}

/// Split a positive finite number into its shortest round-trip digit string
/// and the position of the decimal point relative to the first digit.
fn shortest_digits(value: f64) -> (String, i32) {
    // `{:e}` yields the shortest round-trip mantissa, e.g. "1.2345e3"
    let formatted = format!("{:e}", value);
    let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = digits.trim_end_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };
    (digits.to_string(), exponent + 1)
}

/// Convert an unsigned integer to string with given radix (2-36)
pub fn u64_to_str_radix(buf: &mut [u8], mut val: u64, radix: u32) -> usize {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if buf.is_empty() || !(2..=36).contains(&radix) {
        return 0;
    }

    let mut i = 0;
    while i < buf.len() {
        buf[i] = DIGITS[(val % radix as u64) as usize];
        i += 1;
        val /= radix as u64;
        if val == 0 {
            break;
        }
    }

    buf[..i].reverse();
    i
}

/// Format a number in the given radix.
///
/// Radix 10 defers to [`number_to_string`]. Fractions are expanded to at
/// most 20 digits.
pub fn number_to_radix_string(value: f64, radix: u32) -> Option<String> {
    if !(2..=36).contains(&radix) {
        return None;
    }
    if radix == 10 || !value.is_finite() {
        return Some(number_to_string(value));
    }

    let negative = value < 0.0;
    let magnitude = value.abs();
    let int_part = magnitude.trunc();
    let mut frac = magnitude - int_part;

    let mut buf = [0u8; 64];
    let n = u64_to_str_radix(&mut buf, int_part as u64, radix);
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(std::str::from_utf8(&buf[..n]).unwrap_or("0"));

    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= radix as f64;
            let digit = frac.trunc() as u32;
            out.push(char::from_digit(digit, radix).unwrap_or('0'));
            frac -= digit as f64;
            if frac == 0.0 {
                break;
            }
        }
    }
    Some(out)
}

/// Fixed-point formatting with `digits` fraction digits (0-100).
pub fn number_to_fixed(value: f64, digits: usize) -> String {
    if !value.is_finite() || value.abs() >= 1e21 {
        return number_to_string(value);
    }
    format!("{:.*}", digits, value)
}
