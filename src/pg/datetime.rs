//! Date/time values and their wire layouts.
//!
//! PostgreSQL counts dates and timestamps from 2000-01-01. Binary timestamps
//! are either 64-bit microseconds or 64-bit float seconds from that epoch,
//! depending on the server's `integer_datetimes` setting; dates are always a
//! 32-bit day count.
//!
//! PostgreSQL accepts `24:00:00` as a `time`. chrono cannot represent it, so
//! such cells fail with `FormatMismatch::Unrepresentable` in both formats
//! (a `timetz` of `24:00:00` with a non-zero zone still normalizes fine).

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::error::{FormatMismatch, PgError, PgResult};
use super::types::Oid;

// ============================================================================
// Constants
// ============================================================================

/// Days between the Unix epoch and the PostgreSQL epoch (2000-01-01).
pub const PG_EPOCH_UNIX_DAYS: i64 = 10_957;

/// Seconds between the Unix epoch and the PostgreSQL epoch.
pub const PG_EPOCH_UNIX_SECS: i64 = PG_EPOCH_UNIX_DAYS * 86_400;

const PG_EPOCH_UNIX_MICROS: i64 = PG_EPOCH_UNIX_SECS * USECS_PER_SEC;

/// `NaiveDate::num_days_from_ce` of 2000-01-01.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.6f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

// Parsing accepts any fraction length and an hour-only or hour:minute offset.
const TIME_PARSE: &str = "%H:%M:%S%.f";
const TIMESTAMP_PARSE: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_PARSE: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

// ============================================================================
// Datetime mode
// ============================================================================

/// How the server session lays out binary date/time values.
///
/// Learned once when a connection opens and passed to every encode/decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatetimeMode {
    /// 64-bit microsecond counts (`integer_datetimes = on`).
    #[default]
    Integer,
    /// 64-bit float seconds (`integer_datetimes = off`).
    Float,
}

impl DatetimeMode {
    /// Interpret the `integer_datetimes` session parameter.
    ///
    /// Servers that do not report it have used integer datetimes since 8.4.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("off") || v.eq_ignore_ascii_case("false") => {
                DatetimeMode::Float
            }
            _ => DatetimeMode::Integer,
        }
    }

    pub fn is_integer(self) -> bool {
        self == DatetimeMode::Integer
    }
}

// ============================================================================
// Temporal values
// ============================================================================

/// An application-level point in time, tagged by its date/time sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Temporal {
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Temporal {
    /// Convert into the sub-type a wire type expects.
    ///
    /// Dates widen to midnight timestamps, timestamps narrow to their date or
    /// time of day. Naive timestamps are taken as UTC. A bare time of day has
    /// no date and cannot become one.
    pub fn coerce_to(self, oid: Oid) -> PgResult<Temporal> {
        let coerced = match (oid, self) {
            (Oid::DATE, Temporal::Date(d)) => Temporal::Date(d),
            (Oid::DATE, Temporal::Timestamp(ts)) => Temporal::Date(ts.date()),
            (Oid::DATE, Temporal::TimestampTz(dt)) => Temporal::Date(dt.date_naive()),

            (Oid::TIME | Oid::TIMETZ, Temporal::Time(t)) => Temporal::Time(t),
            (Oid::TIME | Oid::TIMETZ, Temporal::Timestamp(ts)) => Temporal::Time(ts.time()),
            (Oid::TIME | Oid::TIMETZ, Temporal::TimestampTz(dt)) => Temporal::Time(dt.time()),

            (Oid::TIMESTAMP, Temporal::Date(d)) => Temporal::Timestamp(d.and_time(NaiveTime::MIN)),
            (Oid::TIMESTAMP, Temporal::Timestamp(ts)) => Temporal::Timestamp(ts),
            (Oid::TIMESTAMP, Temporal::TimestampTz(dt)) => Temporal::Timestamp(dt.naive_utc()),

            (Oid::TIMESTAMPTZ, Temporal::Date(d)) => {
                Temporal::TimestampTz(d.and_time(NaiveTime::MIN).and_utc())
            }
            (Oid::TIMESTAMPTZ, Temporal::Timestamp(ts)) => Temporal::TimestampTz(ts.and_utc()),
            (Oid::TIMESTAMPTZ, Temporal::TimestampTz(dt)) => Temporal::TimestampTz(dt),

            (_, value) => {
                return Err(PgError::unsupported(
                    oid,
                    FormatMismatch::Unrepresentable(format!("{:?} as {}", value, oid)),
                ))
            }
        };
        Ok(coerced)
    }
}

// ============================================================================
// Text layout
// ============================================================================

/// Format a temporal value as the server's ISO text for `oid`.
pub fn encode_text(value: Temporal, oid: Oid) -> PgResult<String> {
    let text = match value.coerce_to(oid)? {
        Temporal::Date(d) => d.format(DATE_FORMAT).to_string(),
        Temporal::Time(t) if oid == Oid::TIMETZ => format!("{}+00", t.format(TIME_FORMAT)),
        Temporal::Time(t) => t.format(TIME_FORMAT).to_string(),
        Temporal::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        Temporal::TimestampTz(dt) => format!("{}+00", dt.format(TIMESTAMP_FORMAT)),
    };
    Ok(text)
}

/// Parse the server's ISO text for `oid`. Empty text is an absent value.
pub fn decode_text(text: &str, oid: Oid) -> PgResult<Option<Temporal>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let malformed = |e: chrono::ParseError| {
        PgError::unsupported(
            oid,
            FormatMismatch::Unrepresentable(format!("{:?}: {}", text, e)),
        )
    };

    let value = match oid {
        Oid::DATE => Temporal::Date(NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(malformed)?),
        Oid::TIME => Temporal::Time(NaiveTime::parse_from_str(text, TIME_PARSE).map_err(malformed)?),
        Oid::TIMETZ => {
            // Borrow the timestamptz parser with a dummy date to read the offset
            let stamped = format!("2000-01-01 {}", text);
            let dt = DateTime::parse_from_str(&stamped, TIMESTAMPTZ_PARSE).map_err(malformed)?;
            Temporal::Time(dt.with_timezone(&Utc).time())
        }
        Oid::TIMESTAMP => Temporal::Timestamp(
            NaiveDateTime::parse_from_str(text, TIMESTAMP_PARSE).map_err(malformed)?,
        ),
        Oid::TIMESTAMPTZ => Temporal::TimestampTz(
            DateTime::parse_from_str(text, TIMESTAMPTZ_PARSE)
                .map_err(malformed)?
                .with_timezone(&Utc),
        ),
        _ => {
            return Err(PgError::unsupported(
                oid,
                FormatMismatch::Unrepresentable("not a date/time type".to_string()),
            ))
        }
    };
    Ok(Some(value))
}

// ============================================================================
// Binary layout
// ============================================================================

/// Encode a temporal value in the binary layout for `oid` and `mode`.
pub fn encode_binary(value: Temporal, oid: Oid, mode: DatetimeMode) -> PgResult<Vec<u8>> {
    let out_of_range = || PgError::unsupported(oid, FormatMismatch::OutOfRange);

    let bytes = match value.coerce_to(oid)? {
        Temporal::Date(d) => date_to_days(d).to_be_bytes().to_vec(),
        Temporal::Time(t) => {
            let mut buf = encode_micros(time_to_micros(t), mode);
            if oid == Oid::TIMETZ {
                // Zone offset in seconds west of UTC
                buf.extend_from_slice(&0i32.to_be_bytes());
            }
            buf
        }
        Temporal::Timestamp(ts) => encode_micros(timestamp_to_micros(ts).ok_or_else(out_of_range)?, mode),
        Temporal::TimestampTz(dt) => {
            encode_micros(timestamp_to_micros(dt.naive_utc()).ok_or_else(out_of_range)?, mode)
        }
    };
    Ok(bytes)
}

/// Decode the binary layout for `oid` and `mode`.
pub fn decode_binary(data: &[u8], oid: Oid, mode: DatetimeMode) -> PgResult<Temporal> {
    let expected = oid.binary_width().unwrap_or(8);
    if data.len() != expected {
        return Err(PgError::unsupported(
            oid,
            FormatMismatch::Length {
                expected,
                actual: data.len(),
            },
        ));
    }

    let unrepresentable =
        |what: &str| PgError::unsupported(oid, FormatMismatch::Unrepresentable(what.to_string()));

    match oid {
        Oid::DATE => {
            let days = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            days_to_date(days)
                .map(Temporal::Date)
                .ok_or_else(|| unrepresentable("date outside supported range"))
        }
        Oid::TIME => {
            let micros = decode_micros(&data[..8], mode).ok_or_else(|| unrepresentable("time"))?;
            micros_to_time(micros)
                .map(Temporal::Time)
                .ok_or_else(|| unrepresentable("time of day outside 00:00-24:00"))
        }
        Oid::TIMETZ => {
            let micros = decode_micros(&data[..8], mode).ok_or_else(|| unrepresentable("time"))?;
            if !(0..=USECS_PER_DAY).contains(&micros) {
                return Err(unrepresentable("time of day outside 00:00-24:00"));
            }
            // |zone| * 10^6 stays far inside i64
            let zone_west = i32::from_be_bytes([data[8], data[9], data[10], data[11]]) as i64;
            let utc = (micros + zone_west * USECS_PER_SEC).rem_euclid(USECS_PER_DAY);
            micros_to_time(utc)
                .map(Temporal::Time)
                .ok_or_else(|| unrepresentable("time of day outside 00:00-24:00"))
        }
        Oid::TIMESTAMP | Oid::TIMESTAMPTZ => {
            let micros = decode_micros(data, mode).ok_or_else(|| unrepresentable("timestamp"))?;
            if micros == i64::MAX || micros == i64::MIN {
                return Err(unrepresentable("infinite timestamp"));
            }
            let ts = micros_to_timestamp(micros)
                .ok_or_else(|| unrepresentable("timestamp outside supported range"))?;
            Ok(if oid == Oid::TIMESTAMPTZ {
                Temporal::TimestampTz(ts.and_utc())
            } else {
                Temporal::Timestamp(ts)
            })
        }
        _ => Err(unrepresentable("not a date/time type")),
    }
}

// ============================================================================
// Epoch arithmetic
// ============================================================================

/// Days since 2000-01-01.
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(PG_EPOCH_DAYS_FROM_CE)?)
}

/// Microseconds since midnight.
pub fn time_to_micros(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * USECS_PER_SEC + (time.nanosecond() / 1_000) as i64
}

/// Time of day from microseconds since midnight.
///
/// `NaiveTime` stops just short of midnight, so the server's `24:00:00` has
/// no equivalent here and yields `None`.
pub fn micros_to_time(micros: i64) -> Option<NaiveTime> {
    if !(0..USECS_PER_DAY).contains(&micros) {
        return None;
    }
    NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / USECS_PER_SEC) as u32,
        ((micros % USECS_PER_SEC) * 1_000) as u32,
    )
}

/// Microseconds since 2000-01-01 00:00:00.
pub fn timestamp_to_micros(ts: NaiveDateTime) -> Option<i64> {
    ts.and_utc().timestamp_micros().checked_sub(PG_EPOCH_UNIX_MICROS)
}

pub fn micros_to_timestamp(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros.checked_add(PG_EPOCH_UNIX_MICROS)?).map(|dt| dt.naive_utc())
}

fn encode_micros(micros: i64, mode: DatetimeMode) -> Vec<u8> {
    match mode {
        DatetimeMode::Integer => micros.to_be_bytes().to_vec(),
        DatetimeMode::Float => (micros as f64 / USECS_PER_SEC as f64).to_be_bytes().to_vec(),
    }
}

fn decode_micros(data: &[u8], mode: DatetimeMode) -> Option<i64> {
    let raw: [u8; 8] = data.try_into().ok()?;
    match mode {
        DatetimeMode::Integer => Some(i64::from_be_bytes(raw)),
        DatetimeMode::Float => {
            let secs = f64::from_be_bytes(raw);
            if secs.is_infinite() {
                return Some(if secs > 0.0 { i64::MAX } else { i64::MIN });
            }
            if !secs.is_finite() {
                return None;
            }
            Some((secs * USECS_PER_SEC as f64).round() as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_epoch_offsets() {
        assert_eq!(date_to_days(date(2000, 1, 1)), 0);
        assert_eq!(date_to_days(date(1970, 1, 1)), -(PG_EPOCH_UNIX_DAYS as i32));
        assert_eq!(days_to_date(1), Some(date(2000, 1, 2)));
        assert_eq!(
            timestamp_to_micros(date(2000, 1, 1).and_hms_opt(0, 0, 1).unwrap()),
            Some(1_000_000)
        );
    }

    #[test]
    fn test_date_integer_mode_roundtrip() {
        let value = Temporal::Date(date(2019, 1, 8));
        let bytes = encode_binary(value, Oid::DATE, DatetimeMode::Integer).unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(
            decode_binary(&bytes, Oid::DATE, DatetimeMode::Integer).unwrap(),
            value
        );
    }

    #[test]
    fn test_timestamp_float_mode_roundtrip() {
        let ts = date(2021, 6, 30)
            .and_hms_micro_opt(13, 45, 10, 123_456)
            .unwrap();
        let bytes = encode_binary(Temporal::Timestamp(ts), Oid::TIMESTAMP, DatetimeMode::Float).unwrap();
        let decoded = decode_binary(&bytes, Oid::TIMESTAMP, DatetimeMode::Float).unwrap();
        assert_eq!(decoded, Temporal::Timestamp(ts));
    }

    #[test]
    fn test_timetz_binary_normalizes_zone() {
        // 10:00 at UTC-05:00 is 15:00 UTC; the zone is stored as seconds west
        let mut data = (10 * 3_600 * USECS_PER_SEC).to_be_bytes().to_vec();
        data.extend_from_slice(&(5 * 3_600i32).to_be_bytes());
        let decoded = decode_binary(&data, Oid::TIMETZ, DatetimeMode::Integer).unwrap();
        assert_eq!(decoded, Temporal::Time(NaiveTime::from_hms_opt(15, 0, 0).unwrap()));
    }

    #[test]
    fn test_timetz_out_of_range_is_an_error() {
        let mut data = i64::MAX.to_be_bytes().to_vec();
        data.extend_from_slice(&1i32.to_be_bytes());
        let err = decode_binary(&data, Oid::TIMETZ, DatetimeMode::Integer).unwrap_err();
        assert!(err.is_unsupported_data_format());

        // Infinite float seconds
        let mut data = f64::INFINITY.to_be_bytes().to_vec();
        data.extend_from_slice(&(-3_600i32).to_be_bytes());
        assert!(decode_binary(&data, Oid::TIMETZ, DatetimeMode::Float).is_err());

        let mut data = (-1i64).to_be_bytes().to_vec();
        data.extend_from_slice(&0i32.to_be_bytes());
        assert!(decode_binary(&data, Oid::TIMETZ, DatetimeMode::Integer).is_err());
    }

    #[test]
    fn test_end_of_day_time_is_unrepresentable() {
        assert!(matches!(
            decode_text("24:00:00", Oid::TIME),
            Err(PgError::UnsupportedDataFormat {
                reason: FormatMismatch::Unrepresentable(_),
                ..
            })
        ));
        let data = USECS_PER_DAY.to_be_bytes();
        assert!(matches!(
            decode_binary(&data, Oid::TIME, DatetimeMode::Integer),
            Err(PgError::UnsupportedDataFormat {
                reason: FormatMismatch::Unrepresentable(_),
                ..
            })
        ));

        // 24:00 five hours west of UTC is 05:00 UTC
        let mut data = USECS_PER_DAY.to_be_bytes().to_vec();
        data.extend_from_slice(&(5 * 3_600i32).to_be_bytes());
        assert_eq!(
            decode_binary(&data, Oid::TIMETZ, DatetimeMode::Integer).unwrap(),
            Temporal::Time(NaiveTime::from_hms_opt(5, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_infinite_timestamp_rejected() {
        let data = i64::MAX.to_be_bytes();
        let err = decode_binary(&data, Oid::TIMESTAMP, DatetimeMode::Integer).unwrap_err();
        assert!(err.is_unsupported_data_format());
    }

    #[test]
    fn test_text_layouts() {
        let ts = date(2019, 1, 8).and_hms_micro_opt(9, 5, 7, 250).unwrap();
        assert_eq!(
            encode_text(Temporal::Date(date(2019, 1, 8)), Oid::DATE).unwrap(),
            "2019-01-08"
        );
        assert_eq!(
            encode_text(Temporal::Timestamp(ts), Oid::TIMESTAMP).unwrap(),
            "2019-01-08 09:05:07.000250"
        );
        assert_eq!(
            encode_text(Temporal::Timestamp(ts), Oid::TIMESTAMPTZ).unwrap(),
            "2019-01-08 09:05:07.000250+00"
        );
        assert_eq!(
            encode_text(Temporal::Timestamp(ts), Oid::TIME).unwrap(),
            "09:05:07.000250"
        );
    }

    #[test]
    fn test_decode_server_text() {
        assert_eq!(
            decode_text("2019-01-08 10:00:00+05:30", Oid::TIMESTAMPTZ).unwrap(),
            Some(Temporal::TimestampTz(
                date(2019, 1, 8).and_hms_opt(4, 30, 0).unwrap().and_utc()
            ))
        );
        assert_eq!(
            decode_text("2019-01-08 10:00:00", Oid::TIMESTAMP).unwrap(),
            Some(Temporal::Timestamp(date(2019, 1, 8).and_hms_opt(10, 0, 0).unwrap()))
        );
        assert_eq!(
            decode_text("23:59:59.5-02", Oid::TIMETZ).unwrap(),
            Some(Temporal::Time(
                NaiveTime::from_hms_milli_opt(1, 59, 59, 500).unwrap()
            ))
        );
        assert_eq!(decode_text("", Oid::DATE).unwrap(), None);
        assert!(decode_text("infinity", Oid::TIMESTAMP).is_err());
    }

    #[test]
    fn test_bare_time_cannot_become_date() {
        let t = Temporal::Time(NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert!(t.coerce_to(Oid::DATE).is_err());
        assert!(t.coerce_to(Oid::TIMESTAMP).is_err());
        assert_eq!(t.coerce_to(Oid::TIMETZ).unwrap(), t);
    }

    #[test]
    fn test_mode_from_setting() {
        assert_eq!(DatetimeMode::from_setting(Some("on")), DatetimeMode::Integer);
        assert_eq!(DatetimeMode::from_setting(Some("off")), DatetimeMode::Float);
        assert_eq!(DatetimeMode::from_setting(None), DatetimeMode::Integer);
    }
}
