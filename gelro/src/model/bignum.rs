//! Arbitrary precision numeric domain values.
//!
//! Both types are canonical decimal strings under the hood. The wire
//! format is base-10000 digit groups, and converting between groups and a
//! decimal string is exact string math, so no precision is ever lost to
//! floating point on either path.
use std::{fmt, str::FromStr};

use crate::common::unit_error;

unit_error! {
    /// A string that does not parse as a decimal number.
    pub struct ParseNumberError("invalid decimal number literal");
}

/// An arbitrary precision integer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BigInt {
    negative: bool,
    /// Decimal digits, no sign, no leading zeros, `"0"` for zero.
    digits: String,
}

impl BigInt {
    pub(crate) fn from_parts(negative: bool, digits: String) -> Self {
        let digits = strip_leading_zeros(digits);
        Self { negative: negative && digits != "0", digits }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Decimal digits without the sign.
    pub fn digits(&self) -> &str {
        &self.digits
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self {
        Self {
            negative: value < 0,
            digits: value.unsigned_abs().to_string(),
        }
    }
}

impl FromStr for BigInt {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, digits) = split_sign(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumberError);
        }
        Ok(Self::from_parts(negative, digits.to_owned()))
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.digits)
    }
}

impl fmt::Debug for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigInt({self})")
    }
}

/// An arbitrary precision decimal.
///
/// The fractional digit count is significant and round-trips through the
/// wire format as the decimal scale, `1.500` stays `1.500`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    /// Integral decimal digits, no leading zeros, `"0"` for zero.
    int: String,
    /// Fractional decimal digits, possibly empty, trailing zeros kept.
    frac: String,
}

impl Decimal {
    pub(crate) fn from_parts(negative: bool, int: String, frac: String) -> Self {
        let int = strip_leading_zeros(int);
        let zero = int == "0" && frac.bytes().all(|b| b == b'0');
        Self { negative: negative && !zero, int, frac }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn int_digits(&self) -> &str {
        &self.int
    }

    pub fn frac_digits(&self) -> &str {
        &self.frac
    }

    /// Number of fractional digits (the wire decimal scale).
    pub fn scale(&self) -> u16 {
        self.frac.len() as u16
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Self {
            negative: value < 0,
            int: value.unsigned_abs().to_string(),
            frac: String::new(),
        }
    }
}

impl FromStr for Decimal {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negative, rest) = split_sign(s);
        let (int, frac) = match rest.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (rest, ""),
        };
        if int.is_empty() || !int.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumberError);
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseNumberError);
        }
        Ok(Self::from_parts(negative, int.to_owned(), frac.to_owned()))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        f.write_str(&self.int)?;
        if !self.frac.is_empty() {
            write!(f, ".{}", self.frac)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decimal({self})")
    }
}

fn split_sign(s: &str) -> (bool, &str) {
    match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn strip_leading_zeros(digits: String) -> String {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_owned()
    } else if stripped.len() == digits.len() {
        digits
    } else {
        stripped.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bigint_parse() {
        let n: BigInt = "-00123".parse().unwrap();
        assert_eq!(n.to_string(), "-123");
        let n: BigInt = "+42".parse().unwrap();
        assert_eq!(n.to_string(), "42");
        assert_eq!("-0".parse::<BigInt>().unwrap().to_string(), "0");
        assert!("12a".parse::<BigInt>().is_err());
        assert!("".parse::<BigInt>().is_err());
    }

    #[test]
    fn decimal_parse() {
        let n: Decimal = "-12.3400".parse().unwrap();
        assert_eq!(n.to_string(), "-12.3400");
        assert_eq!(n.scale(), 4);
        assert_eq!("-0.00".parse::<Decimal>().unwrap().to_string(), "0.00");
        assert!(".5".parse::<Decimal>().is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
    }
}
