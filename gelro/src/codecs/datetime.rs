//! Date/time base scalar codecs.
//!
//! The protocol epoch is 2000-01-01, timestamps travel as microsecond
//! offsets from it.
use time::{Date, PrimitiveDateTime, Time, UtcDateTime};

use super::scalar;
use crate::{
    error::{DecodeError, EncodeError},
    model::{ConfigMemory, DateDuration, Duration, RelativeDuration, Value},
};

/// Julian day of 2000-01-01.
const EPOCH_JULIAN_DAY: i32 = 2_451_545;

const PRIMITIVE_EPOCH: PrimitiveDateTime = {
    let date = match Date::from_julian_day(EPOCH_JULIAN_DAY) {
        Ok(ok) => ok,
        Err(_) => panic!("invalid epoch"),
    };
    PrimitiveDateTime::new(date, Time::MIDNIGHT)
};

const UTC_EPOCH: UtcDateTime = {
    let date = match Date::from_julian_day(EPOCH_JULIAN_DAY) {
        Ok(ok) => ok,
        Err(_) => panic!("invalid epoch"),
    };
    UtcDateTime::new(date, Time::MIDNIGHT)
};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

scalar! {
    /// `std::datetime`, UTC microseconds since the protocol epoch.
    struct DatetimeCodec;

    fn encode(&self, buf, value) {
        let Value::Datetime(v) = value else {
            return Err(EncodeError::Unexpected { expected: "datetime", got: value.kind_name() });
        };
        let micros = (*v - UTC_EPOCH).whole_microseconds() as i64;
        buf.write_i32(8);
        buf.write_i64(micros);
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        let value = UTC_EPOCH
            .checked_add(time::Duration::microseconds(micros))
            .ok_or(DecodeError::OutOfRange("datetime"))?;
        Ok(Value::Datetime(value))
    }
}

scalar! {
    /// `cal::local_datetime`, wall-clock microseconds since the epoch.
    struct LocalDatetimeCodec;

    fn encode(&self, buf, value) {
        let Value::LocalDatetime(v) = value else {
            return Err(EncodeError::Unexpected {
                expected: "local_datetime",
                got: value.kind_name(),
            });
        };
        let micros = (*v - PRIMITIVE_EPOCH).whole_microseconds() as i64;
        buf.write_i32(8);
        buf.write_i64(micros);
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        let value = PRIMITIVE_EPOCH
            .checked_add(time::Duration::microseconds(micros))
            .ok_or(DecodeError::OutOfRange("local_datetime"))?;
        Ok(Value::LocalDatetime(value))
    }
}

scalar! {
    /// `cal::local_date`, days since the epoch.
    struct LocalDateCodec;

    fn encode(&self, buf, value) {
        let Value::LocalDate(v) = value else {
            return Err(EncodeError::Unexpected { expected: "local_date", got: value.kind_name() });
        };
        buf.write_i32(4);
        buf.write_i32(v.to_julian_day() - EPOCH_JULIAN_DAY);
        Ok(())
    }

    fn decode(buf) {
        let days = buf.read_i32()?;
        let value = EPOCH_JULIAN_DAY
            .checked_add(days)
            .and_then(|day| Date::from_julian_day(day).ok())
            .ok_or(DecodeError::OutOfRange("local_date"))?;
        Ok(Value::LocalDate(value))
    }
}

scalar! {
    /// `cal::local_time`, microseconds since midnight.
    struct LocalTimeCodec;

    fn encode(&self, buf, value) {
        let Value::LocalTime(v) = value else {
            return Err(EncodeError::Unexpected { expected: "local_time", got: value.kind_name() });
        };
        let seconds = v.hour() as i64 * 3600 + v.minute() as i64 * 60 + v.second() as i64;
        let micros = seconds * MICROS_PER_SECOND + v.microsecond() as i64;
        buf.write_i32(8);
        buf.write_i64(micros);
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        if !(0..MICROS_PER_DAY).contains(&micros) {
            return Err(DecodeError::OutOfRange("local_time"));
        }
        let seconds = micros / MICROS_PER_SECOND;
        let value = Time::from_hms_micro(
            (seconds / 3600) as u8,
            (seconds / 60 % 60) as u8,
            (seconds % 60) as u8,
            (micros % MICROS_PER_SECOND) as u32,
        )
        .map_err(|_| DecodeError::OutOfRange("local_time"))?;
        Ok(Value::LocalTime(value))
    }
}

scalar! {
    /// `std::duration`, an absolute microsecond count plus two reserved
    /// zero fields.
    ///
    /// A `Duration` carrying calendar components cannot be represented
    /// here and is rejected, `cal::relative_duration` carries those.
    struct DurationCodec;

    fn encode(&self, buf, value) {
        let Value::Duration(v) = value else {
            return Err(EncodeError::Unexpected { expected: "duration", got: value.kind_name() });
        };
        if let Some(field) = v.calendar_component() {
            return Err(EncodeError::CalendarComponent(field));
        }
        buf.write_i32(16);
        buf.write_i64(v.absolute_micros());
        buf.write_i32(0);
        buf.write_i32(0);
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        let days = buf.read_i32()?;
        let months = buf.read_i32()?;
        if days != 0 || months != 0 {
            return Err(DecodeError::ReservedDuration);
        }
        Ok(Value::Duration(Duration::from_micros(micros)))
    }
}

scalar! {
    /// `cal::relative_duration`, microseconds plus day and month counts.
    struct RelativeDurationCodec;

    fn encode(&self, buf, value) {
        let Value::RelativeDuration(v) = value else {
            return Err(EncodeError::Unexpected {
                expected: "relative_duration",
                got: value.kind_name(),
            });
        };
        buf.write_i32(16);
        buf.write_i64(v.micros());
        buf.write_i32(v.days());
        buf.write_i32(v.months());
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        let days = buf.read_i32()?;
        let months = buf.read_i32()?;
        Ok(Value::RelativeDuration(RelativeDuration::new(micros, days, months)))
    }
}

scalar! {
    /// `cal::date_duration`, whole days and months, the microsecond field
    /// stays zero.
    struct DateDurationCodec;

    fn encode(&self, buf, value) {
        let Value::DateDuration(v) = value else {
            return Err(EncodeError::Unexpected {
                expected: "date_duration",
                got: value.kind_name(),
            });
        };
        buf.write_i32(16);
        buf.write_i64(0);
        buf.write_i32(v.days());
        buf.write_i32(v.months());
        Ok(())
    }

    fn decode(buf) {
        let micros = buf.read_i64()?;
        let days = buf.read_i32()?;
        let months = buf.read_i32()?;
        if micros != 0 {
            return Err(DecodeError::ReservedDuration);
        }
        Ok(Value::DateDuration(DateDuration::new(days, months)))
    }
}

scalar! {
    /// `cfg::memory`, a byte count.
    struct ConfigMemoryCodec;

    fn encode(&self, buf, value) {
        let Value::ConfigMemory(v) = value else {
            return Err(EncodeError::Unexpected { expected: "memory", got: value.kind_name() });
        };
        buf.write_i32(8);
        buf.write_i64(v.bytes());
        Ok(())
    }

    fn decode(buf) {
        Ok(Value::ConfigMemory(ConfigMemory::new(buf.read_i64()?)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{buffer::{ReadBuf, WriteBuffer}, codecs::Codec};
    use time::Month;
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

    #[test]
    fn datetime_epoch_shift() {
        let codec = DatetimeCodec::new(Uuid::from_u128(0x10a));
        // the protocol epoch itself encodes as zero micros
        let epoch = Value::Datetime(UTC_EPOCH);
        let mut buf = WriteBuffer::new();
        codec.encode(&mut buf, &epoch).unwrap();
        let mut read = ReadBuf::new(buf.take());
        assert_eq!(read.read_i32().unwrap(), 8);
        assert_eq!(read.read_i64().unwrap(), 0);

        let date = Date::from_calendar_date(2024, Month::July, 1).unwrap();
        let value = Value::Datetime(UtcDateTime::new(date, Time::from_hms(13, 37, 1).unwrap()));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn local_date_round_trip() {
        let codec = LocalDateCodec::new(Uuid::from_u128(0x10c));
        for (y, m, d) in [(2000, Month::January, 1), (1969, Month::December, 31), (2100, Month::March, 15)] {
            let value = Value::LocalDate(Date::from_calendar_date(y, m, d).unwrap());
            assert_eq!(round_trip(&*codec, value.clone()), value);
        }
    }

    #[test]
    fn local_time_round_trip() {
        let codec = LocalTimeCodec::new(Uuid::from_u128(0x10d));
        let value = Value::LocalTime(Time::from_hms_micro(23, 59, 59, 999_999).unwrap());
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn duration_rejects_calendar_components() {
        let codec = DurationCodec::new(Uuid::from_u128(0x10e));
        let with_years = Duration::new(1, 0, 0, 0, 2, 0, 0, 0).unwrap();
        let mut buf = WriteBuffer::new();
        let err = codec.encode(&mut buf, &Value::Duration(with_years)).unwrap_err();
        assert!(err.to_string().contains("years"));

        // the same logical value goes through the relative duration codec
        let relative = RelativeDuration::from_components(1, 0, 0, 0, 2, 0, 0, 0);
        let codec = RelativeDurationCodec::new(Uuid::from_u128(0x111));
        let value = Value::RelativeDuration(relative);
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn duration_round_trip() {
        let codec = DurationCodec::new(Uuid::from_u128(0x10e));
        let value = Value::Duration(Duration::from_micros(-3_723_000_004));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn duration_rejects_reserved_bytes() {
        let codec = DurationCodec::new(Uuid::from_u128(0x10e));
        let mut raw = Vec::new();
        raw.extend_from_slice(&0i64.to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&0i32.to_be_bytes());
        let mut buf = ReadBuf::new(bytes::Bytes::from(raw));
        assert!(matches!(
            codec.decode(&mut buf),
            Err(DecodeError::ReservedDuration),
        ));
    }

    #[test]
    fn date_duration_round_trip() {
        let codec = DateDurationCodec::new(Uuid::from_u128(0x112));
        let value = Value::DateDuration(DateDuration::from_components(1, 2, 0, 3));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }

    #[test]
    fn memory_round_trip() {
        let codec = ConfigMemoryCodec::new(Uuid::from_u128(0x130));
        let value = Value::ConfigMemory(ConfigMemory::new(5 << 30));
        assert_eq!(round_trip(&*codec, value.clone()), value);
    }
}
