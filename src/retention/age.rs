//! Relative age strings such as `"2 weeks"` or `"1 month 3 days"`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Months, Utc};
use thiserror::Error;

/// Calendar or fixed-length unit of a relative age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Fortnight,
    Month,
    Year,
}

impl AgeUnit {
    fn parse(token: &str) -> Option<Self> {
        let unit = match token {
            "s" | "sec" | "secs" | "second" | "seconds" => AgeUnit::Second,
            "min" | "mins" | "minute" | "minutes" => AgeUnit::Minute,
            "h" | "hr" | "hrs" | "hour" | "hours" => AgeUnit::Hour,
            "d" | "day" | "days" => AgeUnit::Day,
            "w" | "wk" | "wks" | "week" | "weeks" => AgeUnit::Week,
            "fortnight" | "fortnights" => AgeUnit::Fortnight,
            "mon" | "mons" | "month" | "months" => AgeUnit::Month,
            "y" | "yr" | "yrs" | "year" | "years" => AgeUnit::Year,
            _ => return None,
        };
        Some(unit)
    }

    fn name(&self) -> &'static str {
        match self {
            AgeUnit::Second => "second",
            AgeUnit::Minute => "minute",
            AgeUnit::Hour => "hour",
            AgeUnit::Day => "day",
            AgeUnit::Week => "week",
            AgeUnit::Fortnight => "fortnight",
            AgeUnit::Month => "month",
            AgeUnit::Year => "year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgeParseError {
    #[error("relative age is empty")]
    Empty,

    #[error("expected a number, found '{0}'")]
    ExpectedNumber(String),

    #[error("number '{0}' is out of range")]
    NumberOutOfRange(String),

    #[error("missing unit after '{0}'")]
    MissingUnit(String),

    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
}

/// A relative duration counted back from "now".
///
/// Parts are applied in the order written. Months and years follow the
/// calendar (clamping to the end of shorter months); every other unit is a
/// fixed number of seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeAge {
    parts: Vec<(u32, AgeUnit)>,
}

impl RelativeAge {
    pub fn parts(&self) -> &[(u32, AgeUnit)] {
        &self.parts
    }

    /// The instant `self` before `now`, or `None` if it falls outside the
    /// representable range.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.parts
            .iter()
            .try_fold(now, |at, &(amount, unit)| subtract(at, amount, unit))
    }
}

fn subtract(at: DateTime<Utc>, amount: u32, unit: AgeUnit) -> Option<DateTime<Utc>> {
    let amount_i64 = i64::from(amount);
    let fixed = match unit {
        AgeUnit::Month => return at.checked_sub_months(Months::new(amount)),
        AgeUnit::Year => return at.checked_sub_months(Months::new(amount.checked_mul(12)?)),
        AgeUnit::Second => Duration::try_seconds(amount_i64)?,
        AgeUnit::Minute => Duration::try_minutes(amount_i64)?,
        AgeUnit::Hour => Duration::try_hours(amount_i64)?,
        AgeUnit::Day => Duration::try_days(amount_i64)?,
        AgeUnit::Week => Duration::try_weeks(amount_i64)?,
        AgeUnit::Fortnight => Duration::try_weeks(amount_i64.checked_mul(2)?)?,
    };
    at.checked_sub_signed(fixed)
}

impl FromStr for RelativeAge {
    type Err = AgeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let lowered = input.trim().to_ascii_lowercase();
        let mut tokens = lowered
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty() && *t != "and")
            .peekable();

        if tokens.peek().is_none() {
            return Err(AgeParseError::Empty);
        }

        let mut parts = Vec::new();
        while let Some(token) = tokens.next() {
            let token = token.strip_prefix('+').unwrap_or(token);
            let digits_end = token
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(token.len());
            if digits_end == 0 {
                return Err(AgeParseError::ExpectedNumber(token.to_string()));
            }

            let (number, attached_unit) = token.split_at(digits_end);
            let amount: u32 = number
                .parse()
                .map_err(|_| AgeParseError::NumberOutOfRange(number.to_string()))?;

            // "2weeks" carries its unit; "2 weeks" takes the next token
            let unit_token = if attached_unit.is_empty() {
                tokens
                    .next()
                    .ok_or_else(|| AgeParseError::MissingUnit(number.to_string()))?
            } else {
                attached_unit
            };

            let unit = AgeUnit::parse(unit_token)
                .ok_or_else(|| AgeParseError::UnknownUnit(unit_token.to_string()))?;
            parts.push((amount, unit));
        }

        Ok(Self { parts })
    }
}

impl fmt::Display for RelativeAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (amount, unit)) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let plural = if *amount == 1 { "" } else { "s" };
            write!(f, "{} {}{}", amount, unit.name(), plural)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[rstest]
    #[case("2 weeks", at(2025, 3, 15), at(2025, 3, 1))]
    #[case("1 fortnight", at(2025, 3, 15), at(2025, 3, 1))]
    #[case("3 days", at(2025, 3, 15), at(2025, 3, 12))]
    #[case("1 month", at(2025, 3, 15), at(2025, 2, 15))]
    #[case("1 month", at(2025, 3, 31), at(2025, 2, 28))]
    #[case("1 year", at(2024, 2, 29), at(2023, 2, 28))]
    #[case("1 month 3 days", at(2025, 3, 15), at(2025, 2, 12))]
    #[case("1 month, 3 days", at(2025, 3, 15), at(2025, 2, 12))]
    #[case("1 month and 3 days", at(2025, 3, 15), at(2025, 2, 12))]
    #[case("2Weeks", at(2025, 3, 15), at(2025, 3, 1))]
    #[case("  +2 WEEKS  ", at(2025, 3, 15), at(2025, 3, 1))]
    #[case("0 days", at(2025, 3, 15), at(2025, 3, 15))]
    fn test_cutoff(
        #[case] input: &str,
        #[case] now: DateTime<Utc>,
        #[case] expected: DateTime<Utc>,
    ) {
        let age: RelativeAge = input.parse().unwrap();
        assert_eq!(age.cutoff(now), Some(expected));
    }

    #[test]
    fn test_fixed_units() {
        let now = at(2025, 3, 15);
        let age: RelativeAge = "1 hour 30 mins 15 secs".parse().unwrap();
        assert_eq!(
            age.cutoff(now),
            Some(now - Duration::seconds(3600 + 30 * 60 + 15))
        );
    }

    #[rstest]
    #[case("", AgeParseError::Empty)]
    #[case("   ", AgeParseError::Empty)]
    #[case("weeks", AgeParseError::ExpectedNumber("weeks".into()))]
    #[case("-2 weeks", AgeParseError::ExpectedNumber("-2".into()))]
    #[case("2", AgeParseError::MissingUnit("2".into()))]
    #[case("2 fortnites", AgeParseError::UnknownUnit("fortnites".into()))]
    #[case("99999999999 days", AgeParseError::NumberOutOfRange("99999999999".into()))]
    fn test_parse_errors(#[case] input: &str, #[case] expected: AgeParseError) {
        assert_eq!(input.parse::<RelativeAge>().unwrap_err(), expected);
    }

    #[test]
    fn test_cutoff_out_of_range() {
        let age: RelativeAge = "4000000000 years".parse().unwrap();
        assert_eq!(age.cutoff(at(2025, 1, 1)), None);
    }

    #[test]
    fn test_display_normalizes() {
        let age: RelativeAge = "1 MONTH,3 d".parse().unwrap();
        assert_eq!(age.to_string(), "1 month 3 days");
    }
}
