//! Human-formatted numbers to scaled integers.
//!
//! Two conventions are used:
//!
//! - **fixed** (`×100`): prices, changes, percentages, ratios, beta, EPS, PE.
//!   `"$150.25"` is `15025`, `"(+1.2%)"` is `120`.
//! - **magnitude** (whole units): market cap, volume, AUM, shares outstanding.
//!   `"2.5M"` is `2_500_000`; fractional units are truncated.
//!
//! [`normalize`] picks the convention from the text: a `K`/`M`/`B`/`T`
//! suffix means magnitude, anything else is fixed.
//!
//! Parsing is done on the decimal digits directly, never through `f64`.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::NormalizeError;

/// Tokens pages use in place of a value.
const PLACEHOLDERS: &[&str] = &["N/A", "-", "--"];

/// Characters dropped before parsing.
const DECORATION: &[char] = &['$', '€', '£', '¥', ',', '%', '(', ')', '+', ' ', '\u{a0}'];

static PARENTHESIZED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]+)\)").unwrap());

/// True for blank text and placeholder tokens.
pub fn is_empty(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Content of the first parenthesised group, e.g. the `1.2%` in `"0.96 (1.2%)"`.
pub fn extract_parenthesized(value: &str) -> Option<&str> {
    PARENTHESIZED
        .captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Scaled by the suffix for `K`/`M`/`B`/`T`, otherwise `×100`.
pub fn normalize(value: &str) -> Result<i64, NormalizeError> {
    let trimmed = value.trim();
    match trimmed.chars().last() {
        Some(c) if multiplier(c).is_some() => parse_magnitude(trimmed),
        _ => parse_fixed(trimmed),
    }
}

/// Two fractional digits kept as an integer; the third digit rounds half away from zero.
pub fn parse_fixed(value: &str) -> Result<i64, NormalizeError> {
    let number = Decimal::parse(value)?;
    number.scaled(2, true).ok_or_else(|| overflow(value))
}

/// Whole units, with an optional `K`/`M`/`B`/`T` multiplier. Fractions are truncated.
pub fn parse_magnitude(value: &str) -> Result<i64, NormalizeError> {
    let trimmed = value.trim();
    let (body, exponent) = match trimmed.chars().last().and_then(multiplier) {
        Some(exp) => (&trimmed[..trimmed.len() - 1], exp),
        None => (trimmed, 0),
    };
    let number = Decimal::parse(body)?;
    number.scaled(exponent, false).ok_or_else(|| overflow(value))
}

/// Whole-number count such as `"12,345"` or a holding size.
pub fn parse_count(value: &str) -> Result<i64, NormalizeError> {
    let number = Decimal::parse(value)?;
    if number.scale != 0 {
        return Err(NormalizeError::NotNumeric(value.to_string()));
    }
    number.scaled(0, false).ok_or_else(|| overflow(value))
}

fn multiplier(c: char) -> Option<u32> {
    match c.to_ascii_uppercase() {
        'K' => Some(3),
        'M' => Some(6),
        'B' => Some(9),
        'T' => Some(12),
        _ => None,
    }
}

fn overflow(value: &str) -> NormalizeError {
    NormalizeError::Overflow(value.to_string())
}

/// Digits without a decimal point plus how many of them were fractional.
#[derive(Debug)]
struct Decimal {
    negative: bool,
    digits: i128,
    scale: u32,
}

impl Decimal {
    fn parse(raw: &str) -> Result<Self, NormalizeError> {
        if is_empty(raw) {
            return Err(NormalizeError::Empty);
        }

        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !DECORATION.contains(c))
            .map(|c| if c == '\u{2212}' { '-' } else { c })
            .collect();

        let (negative, body) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };

        let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
        let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !valid(whole) || !valid(fraction) {
            return Err(NormalizeError::NotNumeric(raw.to_string()));
        }

        // 38 digits fit in an i128; anything longer is not a quote.
        if whole.len() + fraction.len() > 38 {
            return Err(overflow(raw));
        }
        let digits: i128 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| NormalizeError::NotNumeric(raw.to_string()))?;

        Ok(Self {
            negative,
            digits,
            scale: fraction.len() as u32,
        })
    }

    /// Value × 10^`exponent`, as an integer.
    fn scaled(&self, exponent: u32, round: bool) -> Option<i64> {
        let magnitude = if exponent >= self.scale {
            self.digits.checked_mul(10i128.checked_pow(exponent - self.scale)?)?
        } else {
            let divisor = 10i128.checked_pow(self.scale - exponent)?;
            let quotient = self.digits / divisor;
            let remainder = self.digits % divisor;
            if round && remainder * 2 >= divisor {
                quotient + 1
            } else {
                quotient
            }
        };

        let signed = if self.negative { -magnitude } else { magnitude };
        i64::try_from(signed).ok()
    }
}
