// =============================================================================
// Market timing — trading sessions by UTC hour
// =============================================================================
//
// A fixed table mapping the current UTC hour onto the Tokyo / London /
// New York session structure, with the London-NY overlap marked as the
// high-activity window. Week timing flags the thin Monday open and the
// pre-weekend Friday wind-down.
// =============================================================================

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActivityLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSession {
    pub session: String,
    pub activity_level: ActivityLevel,
    pub week_timing: String,
    pub recommendation: String,
}

/// Classify `now` against the fixed session table.
pub fn market_session(now: DateTime<Utc>) -> MarketSession {
    let hour = now.hour();

    let (session, activity_level) = match hour {
        22 => ("Rollover", ActivityLevel::Low),
        23 | 0..=6 => ("Tokyo", ActivityLevel::Medium),
        7..=11 => ("London", ActivityLevel::Medium),
        12..=16 => ("London/NY overlap", ActivityLevel::High),
        _ => ("New York", ActivityLevel::Medium),
    };

    let weekday = now.weekday();
    let week_timing = match weekday {
        Weekday::Sat | Weekday::Sun => "weekend",
        Weekday::Mon if hour < 7 => "monday open",
        Weekday::Fri if hour >= 17 => "friday close",
        _ => "midweek",
    };

    let recommendation = match (weekday, activity_level) {
        (Weekday::Sat | Weekday::Sun, _) => "Market closed; no trading.",
        (Weekday::Fri, _) if hour >= 17 => {
            "Liquidity fading into the weekend; reduce exposure."
        }
        (Weekday::Mon, _) if hour < 7 => {
            "Thin Monday liquidity; gaps possible, trade small."
        }
        (_, ActivityLevel::High) => "Peak liquidity window; full strategy set active.",
        (_, ActivityLevel::Medium) => "Normal liquidity; trend strategies preferred.",
        (_, ActivityLevel::Low) => "Rollover hour; spreads widen, avoid entries.",
    };

    MarketSession {
        session: session.to_string(),
        activity_level,
        week_timing: week_timing.to_string(),
        recommendation: recommendation.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(weekday_date: &str, hour: u32) -> DateTime<Utc> {
        // weekday_date like "2024-01-03" (a Wednesday).
        let (y, m, d) = {
            let mut parts = weekday_date.split('-').map(|p| p.parse::<u32>().unwrap());
            (
                parts.next().unwrap() as i32,
                parts.next().unwrap(),
                parts.next().unwrap(),
            )
        };
        Utc.with_ymd_and_hms(y, m, d, hour, 30, 0).unwrap()
    }

    #[test]
    fn tokyo_hours() {
        let s = market_session(at("2024-01-03", 2));
        assert_eq!(s.session, "Tokyo");
        assert_eq!(s.activity_level, ActivityLevel::Medium);
    }

    #[test]
    fn london_ny_overlap_is_high_activity() {
        let s = market_session(at("2024-01-03", 14));
        assert_eq!(s.session, "London/NY overlap");
        assert_eq!(s.activity_level, ActivityLevel::High);
    }

    #[test]
    fn rollover_hour_is_quiet() {
        let s = market_session(at("2024-01-03", 22));
        assert_eq!(s.session, "Rollover");
        assert_eq!(s.activity_level, ActivityLevel::Low);
    }

    #[test]
    fn weekend_flags() {
        let s = market_session(at("2024-01-06", 14)); // Saturday
        assert_eq!(s.week_timing, "weekend");
        assert!(s.recommendation.contains("closed"));
    }

    #[test]
    fn monday_open_and_friday_close() {
        let mon = market_session(at("2024-01-01", 3)); // Monday
        assert_eq!(mon.week_timing, "monday open");

        let fri = market_session(at("2024-01-05", 19)); // Friday
        assert_eq!(fri.week_timing, "friday close");

        let fri_noon = market_session(at("2024-01-05", 12));
        assert_eq!(fri_noon.week_timing, "midweek");
    }
}
