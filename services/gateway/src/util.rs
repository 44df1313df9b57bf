//! Small pure helpers shared by the terminal and network-management
//! dispatch paths.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

/// Fowler/Meeus Julian Day Number for a UTC instant's calendar date.
pub fn julian_day_number(now: DateTime<Utc>) -> i64 {
    let (mut year, mut month, day) = (now.year(), now.month() as i64, now.day() as i64);
    if month <= 2 {
        year -= 1;
        month += 12;
    }
    let a = year / 100;
    let b = 2 - a + a / 4;
    (365.25 * (year + 4716) as f64) as i64 + (30.6001 * (month + 1) as f64) as i64 + day + b - 1524
}

/// Masks a PAN to its first and last `len/4` digits, asterisking the rest
/// — transaction history stores the masked PAN, never the clear one.
pub fn mask_pan(pan: &str) -> String {
    if pan.is_empty() {
        return String::new();
    }
    let len = pan.len();
    let visible = len / 4;
    let hidden = len - visible * 2;
    format!("{}{}{}", &pan[..visible], "*".repeat(hidden), &pan[len - visible..])
}

/// Parses ISO 8583 fields 12 (`HHMMSS`) and 13 (`MMDD`) into a Jakarta
/// local timestamp, carrying the current wall-clock year forward. This
/// misfires for a transaction dated near a year boundary — intentionally
/// not fixed here, see the test below.
pub fn parse_trx_date(bit12: Option<&str>, bit13: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let bit12 = bit12.filter(|s| !s.is_empty())?;
    let bit13 = bit13.filter(|s| !s.is_empty())?;
    if bit12.len() < 6 || bit13.len() < 4 {
        return None;
    }

    let year = Utc::now().year();
    let month: u32 = bit13[0..2].parse().ok()?;
    let day: u32 = bit13[2..4].parse().ok()?;
    let hour: u32 = bit12[0..2].parse().ok()?;
    let min: u32 = bit12[2..4].parse().ok()?;
    let sec: u32 = bit12[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, min, sec)?;
    let jakarta = FixedOffset::east_opt(7 * 3600)?;
    jakarta.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn julian_day_number_matches_a_known_date() {
        // 2000-01-01 has JDN 2451545 (standard reference value).
        let date = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(julian_day_number(date), 2451545);
    }

    #[test]
    fn mask_pan_keeps_first_and_last_quarter() {
        let masked = mask_pan("4111111111111111");
        assert_eq!(masked, "4111********1111");
    }

    #[test]
    fn mask_pan_of_empty_is_empty() {
        assert_eq!(mask_pan(""), "");
    }

    #[test]
    fn trx_date_parses_into_jakarta_offset() {
        let parsed = parse_trx_date(Some("153045"), Some("0228")).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 7 * 3600);
        assert_eq!(parsed.month(), 2);
        assert_eq!(parsed.day(), 28);
    }

    #[test]
    fn trx_date_absent_fields_yield_none() {
        assert!(parse_trx_date(Some(""), Some("")).is_none());
        assert!(parse_trx_date(None, None).is_none());
    }
}
