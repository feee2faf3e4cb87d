//! Bra-ket text: parsing `"+a|s1> -b|s2>"` and rendering amplitudes the same way.
use std::borrow::Cow;

use num_complex::Complex64 as C64;

use super::types::{c, Amplitudes};
use crate::core::error::{QError, Result};

/// Terms of a bra-ket expression as `(symbol, coefficient)`, first-seen order,
/// repeated symbols summed.
pub fn parse_kets(text: &str) -> Result<Vec<(String, C64)>> {
    let mut terms: Vec<(String, C64)> = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let bar = rest
            .find('|')
            .ok_or_else(|| QError::incomprehensible(format!("expected '|' before {rest:?}")))?;
        let close = rest[bar..]
            .find('>')
            .map(|k| bar + k)
            .ok_or_else(|| QError::incomprehensible(format!("unterminated ket in {text:?}")))?;
        let symbol = rest[bar + 1..close].trim();
        if symbol.is_empty() || symbol.contains('|') {
            return Err(QError::incomprehensible(format!("malformed ket in {text:?}")));
        }
        let coef = parse_coefficient(&rest[..bar])?;
        match terms.iter_mut().find(|(s, _)| s == symbol) {
            Some((_, acc)) => *acc += coef,
            None => terms.push((symbol.to_string(), coef)),
        }
        rest = rest[close + 1..].trim_start();
    }
    if terms.is_empty() {
        return Err(QError::incomprehensible("no ket found"));
    }
    Ok(terms)
}

fn parse_coefficient(prefix: &str) -> Result<C64> {
    let s: String = prefix.chars().filter(|ch| !ch.is_whitespace()).collect();
    let (sign, body) = match s.chars().next() {
        Some('-') => (-1.0, &s[1..]),
        Some('+') => (1.0, &s[1..]),
        _ => (1.0, s.as_str()),
    };
    if body.is_empty() {
        return Ok(c(sign, 0.0));
    }
    Ok(parse_complex(body)? * sign)
}

/// `"0.5"`, `"-2j"`, `"0.5+0.5j"`, `"(1-1j)"`.
pub fn parse_complex(text: &str) -> Result<C64> {
    let s = text.trim().trim_start_matches('(').trim_end_matches(')');
    let bad = || QError::incomprehensible(format!("cannot read {text:?} as a complex number"));
    let num = |t: &str| -> Result<f64> {
        match t {
            "" | "+" => Ok(1.0),
            "-" => Ok(-1.0),
            _ => t.parse::<f64>().map_err(|_| bad()),
        }
    };
    let Some(body) = s.strip_suffix('j') else {
        return s.parse::<f64>().map(|re| c(re, 0.0)).map_err(|_| bad());
    };
    // the sign separating real and imaginary parts, skipping exponent signs
    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&k| matches!(bytes[k], b'+' | b'-') && !matches!(bytes[k - 1], b'e' | b'E'));
    match split {
        Some(k) => {
            let re = body[..k].parse::<f64>().map_err(|_| bad())?;
            Ok(c(re, num(&body[k..])?))
        }
        None => Ok(c(0.0, num(body)?)),
    }
}

/// Fixed-point with `digits` decimals, trailing zeros trimmed.
fn format_real(x: f64, digits: usize, signed: bool) -> String {
    let s = if signed { format!("{:+.*}", digits, x) } else { format!("{:.*}", digits, x) };
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// `+0.70711`, `-0.5j`, `+(0.5-0.5j)`.
pub fn format_amplitude(z: C64, digits: usize, tol: f64) -> String {
    if z.im.abs() <= tol {
        format_real(z.re, digits, true)
    } else if z.re.abs() <= tol {
        format!("{}j", format_real(z.im, digits, true))
    } else {
        format!("+({}{}j)", format_real(z.re, digits, false), format_real(z.im, digits, true))
    }
}

/// Non-zero coordinates as `"+a|s> +b|t>"`. With `sign_unknown` every sign is `±`.
pub fn format_ket<'a, F>(coords: &Amplitudes, symbol: F, digits: usize, tol: f64, sign_unknown: bool) -> String
where
    F: Fn(usize) -> Cow<'a, str>,
{
    coords
        .iter()
        .enumerate()
        .filter(|(_, z)| z.norm() > tol)
        .map(|(i, z)| {
            let mut amp = format_amplitude(*z, digits, tol);
            if sign_unknown {
                amp = amp.replace(['+', '-'], "±");
            }
            format!("{amp}|{}>", symbol(i))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One `"|s>: p%"` line per coordinate.
pub fn format_probs<'a, F>(coords: &Amplitudes, symbol: F, digits: usize) -> String
where
    F: Fn(usize) -> Cow<'a, str>,
{
    coords
        .iter()
        .enumerate()
        .map(|(i, z)| format!("|{}>: {}%\n", symbol(i), format_real(z.norm_sqr() * 100.0, digits, false)))
        .collect()
}
