use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Regular US equity session length (09:30-16:00).
pub const SESSION_SECONDS: f64 = 23_400.0;

pub const DAY: i64 = 86_400;
pub const WEEK: i64 = 7 * DAY;
/// Nominal month used for labels and spacing inference; resampling uses calendar months.
pub const MONTH: i64 = 30 * DAY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeframe {
    pub label: String,
    pub step_seconds: i64,
}

impl Timeframe {
    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_lowercase();
        let label = match normalized.as_str() {
            "1m" | "1min" => "1min",
            "5m" | "5min" => "5min",
            "15m" | "15min" => "15min",
            "30m" | "30min" => "30min",
            "1h" | "1hour" => "1hour",
            "4h" | "4hour" => "4hour",
            "1d" | "1day" | "daily" => "1day",
            "1w" | "1week" | "weekly" => "1week",
            "1mo" | "1month" | "monthly" => "1month",
            _ => return Err(format!("unsupported timeframe: {value}")),
        };

        let step_seconds = parse_duration_like_seconds(label)?;
        Ok(Self {
            label: label.to_string(),
            step_seconds,
        })
    }

    pub fn parse_seconds(value: &str) -> Result<Self, String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("empty timeframe".to_string());
        }
        let seconds: i64 = trimmed
            .parse()
            .map_err(|_| format!("invalid timeframe seconds: {value}"))?;
        Self::from_step_seconds(seconds)
    }

    pub fn parse_or_seconds(value: &str) -> Result<Self, String> {
        Self::parse(value).or_else(|_| Self::parse_seconds(value))
    }

    pub fn from_step_seconds(seconds: i64) -> Result<Self, String> {
        if seconds <= 0 {
            return Err(format!("invalid timeframe seconds: {seconds}"));
        }
        Ok(Self {
            label: format!("{seconds}s"),
            step_seconds: seconds,
        })
    }

    /// Classifies a typical bar spacing. Daily trading data has weekend and holiday gaps,
    /// so anything from one day up to five days is still treated as daily.
    pub fn from_spacing(median_seconds: i64) -> Option<Self> {
        if median_seconds <= 0 {
            return None;
        }
        let label = if median_seconds >= 25 * DAY {
            "1month"
        } else if median_seconds >= 5 * DAY {
            "1week"
        } else if median_seconds >= DAY {
            "1day"
        } else {
            return Self::from_step_seconds(median_seconds).ok();
        };
        Self::parse(label).ok()
    }

    /// Sampling periods per year used to annualize returns and volatility.
    pub fn periods_per_year(&self) -> f64 {
        match self.step_seconds {
            s if s >= MONTH => 12.0,
            s if s >= WEEK => 52.0,
            s if s >= DAY => TRADING_DAYS_PER_YEAR,
            s => TRADING_DAYS_PER_YEAR * (SESSION_SECONDS / s as f64).max(1.0),
        }
    }
}

pub fn parse_duration_like_seconds(value: &str) -> Result<i64, String> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(seconds);
    }

    let (number_part, unit) = if let Some(stripped) = trimmed.strip_suffix("month") {
        (stripped, "month")
    } else if let Some(stripped) = trimmed.strip_suffix("mo") {
        (stripped, "month")
    } else if let Some(stripped) = trimmed.strip_suffix("min") {
        (stripped, "min")
    } else if let Some(stripped) = trimmed.strip_suffix("hour") {
        (stripped, "hour")
    } else if let Some(stripped) = trimmed.strip_suffix("day") {
        (stripped, "day")
    } else if let Some(stripped) = trimmed.strip_suffix("week") {
        (stripped, "week")
    } else {
        trimmed.split_at(trimmed.len().saturating_sub(1))
    };

    let multiplier = match unit {
        "s" => 1,
        "m" | "min" => 60,
        "h" | "hour" => 3600,
        "d" | "day" => DAY,
        "w" | "week" => WEEK,
        "month" => MONTH,
        _ => return Err(format!("unsupported duration unit: {unit}")),
    };

    let number: i64 = number_part
        .parse()
        .map_err(|_| format!("invalid duration: {value}"))?;
    Ok(number * multiplier)
}

/// Parses epoch seconds, RFC3339, `YYYY-MM-DD HH:MM:SS` (UTC) or `YYYY-MM-DD` (midnight UTC).
pub fn parse_timestamp_like(value: &str) -> Result<i64, String> {
    let trimmed = value.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%z") {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    Err(format!("unsupported timestamp format: {value}"))
}

pub fn format_timestamp(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.to_rfc3339(),
        _ => timestamp.to_string(),
    }
}
