use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Us,
    India,
}

impl Market {
    pub fn parse(s: &str) -> Market {
        if s.eq_ignore_ascii_case("india") || s.eq_ignore_ascii_case("in") {
            Market::India
        } else {
            Market::Us
        }
    }

    fn timezone(&self) -> Tz {
        match self {
            Market::Us => chrono_tz::America::New_York,
            Market::India => chrono_tz::Asia::Kolkata,
        }
    }

    fn window(&self) -> (NaiveTime, NaiveTime) {
        match self {
            Market::Us => (
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            ),
            Market::India => (
                NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
                NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            ),
        }
    }
}

/// Whether `at` falls inside the market's weekday trading window, evaluated
/// in the market's local timezone.
pub fn is_market_hours_at(market: Market, at: DateTime<Utc>) -> bool {
    let local = at.with_timezone(&market.timezone());

    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let (open, close) = market.window();
    let time = local.time();
    time >= open && time <= close
}

pub fn is_market_hours(market: Market) -> bool {
    is_market_hours_at(market, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn kolkata(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_us_open_midday_weekday() {
        // Wednesday 2026-07-01 12:00 ET
        assert!(is_market_hours_at(Market::Us, ny(2026, 7, 1, 12, 0)));
    }

    #[test]
    fn test_us_closed_before_open_and_after_close() {
        assert!(!is_market_hours_at(Market::Us, ny(2026, 7, 1, 9, 29)));
        assert!(is_market_hours_at(Market::Us, ny(2026, 7, 1, 9, 30)));
        assert!(is_market_hours_at(Market::Us, ny(2026, 7, 1, 16, 0)));
        assert!(!is_market_hours_at(Market::Us, ny(2026, 7, 1, 16, 1)));
    }

    #[test]
    fn test_weekend_closed() {
        // Saturday 2026-07-04
        assert!(!is_market_hours_at(Market::Us, ny(2026, 7, 4, 12, 0)));
        // Sunday 2026-07-05
        assert!(!is_market_hours_at(Market::India, kolkata(2026, 7, 5, 11, 0)));
    }

    #[test]
    fn test_india_window() {
        assert!(is_market_hours_at(Market::India, kolkata(2026, 7, 1, 9, 15)));
        assert!(is_market_hours_at(Market::India, kolkata(2026, 7, 1, 15, 30)));
        assert!(!is_market_hours_at(Market::India, kolkata(2026, 7, 1, 15, 31)));
        assert!(!is_market_hours_at(Market::India, kolkata(2026, 7, 1, 9, 0)));
    }

    #[test]
    fn test_market_parse() {
        assert_eq!(Market::parse("India"), Market::India);
        assert_eq!(Market::parse("IN"), Market::India);
        assert_eq!(Market::parse("US"), Market::Us);
        assert_eq!(Market::parse("anything"), Market::Us);
    }
}
