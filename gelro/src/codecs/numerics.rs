//! Arbitrary precision numeric codecs.
//!
//! PostgreSQL-compatible NUMERIC wire format: sign flag, decimal scale and
//! base-10000 digit groups weighted by position. Both paths are exact
//! string math, nothing round-trips through floating point.
use std::fmt::Write;

use super::scalar;
use crate::{
    error::{DecodeError, EncodeError},
    model::{BigInt, Decimal, Value},
};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;

/// Base-10000 groups of a decimal digit string, most significant first.
///
/// The first group absorbs the left padding, trailing zero digits stay in
/// the last group.
fn digit_groups(digits: &str) -> Vec<u16> {
    let bytes = digits.as_bytes();
    let mut groups = Vec::with_capacity(bytes.len().div_ceil(4));
    let mut group = 0u16;
    let mut filled = (4 - bytes.len() % 4) % 4;
    for &b in bytes {
        group = group * 10 + (b - b'0') as u16;
        filled += 1;
        if filled == 4 {
            groups.push(group);
            group = 0;
            filled = 0;
        }
    }
    groups
}

/// Fractional digits as base-10000 groups, the last group padded right.
fn frac_groups(digits: &str, out: &mut Vec<u16>) {
    for chunk in digits.as_bytes().chunks(4) {
        let mut group = 0u16;
        for &b in chunk {
            group = group * 10 + (b - b'0') as u16;
        }
        out.push(group * 10u16.pow(4 - chunk.len() as u32));
    }
}

fn read_sign(sign: u16) -> Result<bool, DecodeError> {
    match sign {
        NUMERIC_POS => Ok(false),
        NUMERIC_NEG => Ok(true),
        _ => Err(DecodeError::BadSign),
    }
}

/// Integral digit string for groups `0..=weight`.
fn integral_digits(groups: &[u16], weight: i32) -> String {
    if weight < 0 {
        return "0".to_owned();
    }
    let mut digits = String::with_capacity(4 * (weight as usize + 1));
    let mut itoa = itoa::Buffer::new();
    for i in 0..=weight as usize {
        let group = groups.get(i).copied().unwrap_or(0);
        if i == 0 {
            digits.push_str(itoa.format(group));
        } else {
            let _ = write!(digits, "{group:04}");
        }
    }
    digits
}

/// Fractional digit string, `dscale` digits taken from the groups below
/// the decimal point.
fn fractional_digits(groups: &[u16], weight: i32, dscale: usize) -> String {
    let mut digits = String::with_capacity(dscale + 4);
    let mut k = 1;
    while digits.len() < dscale {
        let i = weight + k;
        let group = match usize::try_from(i) {
            Ok(i) => groups.get(i).copied().unwrap_or(0),
            Err(_) => 0,
        };
        let _ = write!(digits, "{group:04}");
        k += 1;
    }
    digits.truncate(dscale);
    digits
}

scalar! {
    /// `std::bigint`, NUMERIC with a zero decimal scale.
    struct BigIntCodec;

    fn encode(&self, buf, value) {
        let Value::BigInt(v) = value else {
            return Err(EncodeError::Unexpected { expected: "bigint", got: value.kind_name() });
        };

        if v.digits() == "0" {
            buf.write_i32(8);
            buf.write_u16(0); // ndigits
            buf.write_i16(0); // weight
            buf.write_u16(NUMERIC_POS);
            buf.write_u16(0); // dscale
            return Ok(());
        }

        let groups = digit_groups(v.digits());
        buf.write_i32(8 + 2 * groups.len() as i32);
        buf.write_u16(groups.len() as u16);
        buf.write_i16(groups.len() as i16 - 1);
        buf.write_u16(if v.is_negative() { NUMERIC_NEG } else { NUMERIC_POS });
        buf.write_u16(0);
        for group in groups {
            buf.write_u16(group);
        }
        Ok(())
    }

    fn decode(buf) {
        let ndigits = buf.read_u16()? as usize;
        let weight = buf.read_i16()? as i32;
        let negative = read_sign(buf.read_u16()?)?;
        if buf.read_u16()? != 0 {
            return Err(DecodeError::FractionalBigInt);
        }

        let mut groups = Vec::with_capacity(ndigits);
        for _ in 0..ndigits {
            groups.push(buf.read_u16()?);
        }
        if ndigits == 0 {
            return Ok(Value::BigInt(BigInt::from(0)));
        }

        let digits = integral_digits(&groups, weight);
        Ok(Value::BigInt(BigInt::from_parts(negative, digits)))
    }
}

scalar! {
    /// `std::decimal`, fractional digit count rides the decimal scale.
    struct DecimalCodec;

    fn encode(&self, buf, value) {
        let Value::Decimal(v) = value else {
            return Err(EncodeError::Unexpected { expected: "decimal", got: value.kind_name() });
        };

        let mut groups = digit_groups(v.int_digits());
        let mut weight = groups.len() as i32 - 1;
        frac_groups(v.frac_digits(), &mut groups);

        while groups.first() == Some(&0) {
            groups.remove(0);
            weight -= 1;
        }
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        buf.write_i32(8 + 2 * groups.len() as i32);
        buf.write_u16(groups.len() as u16);
        buf.write_i16(weight as i16);
        buf.write_u16(if v.is_negative() { NUMERIC_NEG } else { NUMERIC_POS });
        buf.write_u16(v.scale());
        for group in groups {
            buf.write_u16(group);
        }
        Ok(())
    }

    fn decode(buf) {
        let ndigits = buf.read_u16()? as usize;
        let weight = buf.read_i16()? as i32;
        let negative = read_sign(buf.read_u16()?)?;
        let dscale = buf.read_u16()? as usize;

        let mut groups = Vec::with_capacity(ndigits);
        for _ in 0..ndigits {
            groups.push(buf.read_u16()?);
        }

        let int = integral_digits(&groups, weight);
        let frac = fractional_digits(&groups, weight, dscale);
        Ok(Value::Decimal(Decimal::from_parts(negative, int, frac)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{buffer::{ReadBuf, WriteBuffer}, codecs::Codec};
    use uuid::Uuid;

    fn round_trip(codec: &dyn Codec, value: Value) -> Value {
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &value).unwrap();
        let mut read = ReadBuf::new(buf.take());
        let len = read.read_i32().unwrap() as usize;
        let mut payload = read.slice(len).unwrap();
        let decoded = codec.decode(&mut payload).unwrap();
        payload.finish().unwrap();
        decoded
    }

    fn bigint(s: &str) -> Value {
        Value::BigInt(s.parse().unwrap())
    }

    fn decimal(s: &str) -> Value {
        Value::Decimal(s.parse().unwrap())
    }

    #[test]
    fn bigint_round_trip() {
        let codec = BigIntCodec::new(Uuid::from_u128(0x110));
        for v in [
            "0", "-1", "1", "9999", "10000", "-10001",
            "123456789012345678901234567890",
            "-340282366920938463463374607431768211456",
        ] {
            assert_eq!(round_trip(&*codec, bigint(v)), bigint(v));
        }
    }

    #[test]
    fn bigint_rejects_fractional_data() {
        let codec = BigIntCodec::new(Uuid::from_u128(0x110));
        // ndigits=1, weight=0, sign=pos, dscale=2, digit 5
        let raw = [0u8, 1, 0, 0, 0, 0, 0, 2, 0, 5];
        let mut buf = ReadBuf::new(bytes::Bytes::copy_from_slice(&raw));
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::FractionalBigInt),
        ));
    }

    #[test]
    fn bigint_rejects_bad_sign() {
        let codec = BigIntCodec::new(Uuid::from_u128(0x110));
        let raw = [0u8, 1, 0, 0, 0x7f, 0xff, 0, 0, 0, 5];
        let mut buf = ReadBuf::new(bytes::Bytes::copy_from_slice(&raw));
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::BadSign)));
    }

    #[test]
    fn decimal_round_trip() {
        let codec = DecimalCodec::new(Uuid::from_u128(0x108));
        for v in [
            "0", "1", "-1", "1.5", "-12.3400", "0.00001234",
            "99999999.99999999", "10000.0001",
            "123456789012345678901234567890.000000000001",
        ] {
            assert_eq!(round_trip(&*codec, decimal(v)), decimal(v));
        }
    }

    #[test]
    fn decimal_scale_survives() {
        let codec = DecimalCodec::new(Uuid::from_u128(0x108));
        let Value::Decimal(decoded) = round_trip(&*codec, decimal("1.500")) else {
            panic!("expected a decimal");
        };
        assert_eq!(decoded.to_string(), "1.500");
        assert_eq!(decoded.scale(), 3);
    }
}
