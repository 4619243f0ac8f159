use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use phf::phf_map;
use serde::{Deserialize, Serialize};

use crate::WorkoutRecord;

/// A measurement that can be charted on the history screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Calories,
    Distance,
    Duration,
    AvgSpeed,
    AvgHeartRate,
}

pub const ALL_METRICS: [Metric; 5] = [
    Metric::Calories,
    Metric::Distance,
    Metric::Duration,
    Metric::AvgSpeed,
    Metric::AvgHeartRate,
];

/// Aggregation period used to bucket the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

pub const ALL_GRANULARITIES: [Granularity; 3] = [
    Granularity::Daily,
    Granularity::Weekly,
    Granularity::Monthly,
];

/// How far back the store query reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistoryRange {
    #[default]
    All,
    LastWeek,
    LastMonth,
    LastQuarter,
    LastYear,
}

pub const ALL_RANGES: [HistoryRange; 5] = [
    HistoryRange::All,
    HistoryRange::LastWeek,
    HistoryRange::LastMonth,
    HistoryRange::LastQuarter,
    HistoryRange::LastYear,
];

/// Static display and extraction rules for one [`Metric`].
#[derive(Debug, Clone, Copy)]
pub struct MetricDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    /// Bar color as RGB.
    pub color: [u8; 3],
    pub extract: fn(&WorkoutRecord) -> Option<f64>,
    pub format: fn(f64) -> String,
    pub y_label: Option<&'static str>,
}

static DESCRIPTORS: [MetricDescriptor; 5] = [
    MetricDescriptor {
        key: "calories",
        label: "Calories",
        color: [0xf9, 0x73, 0x16],
        extract: |w| w.calories,
        format: |v| format_num(Some(v), None),
        y_label: None,
    },
    MetricDescriptor {
        key: "distanceMiles",
        label: "Distance (mi)",
        color: [0x4f, 0x8c, 0xff],
        extract: |w| w.distance_miles,
        format: |v| format_num(Some(v), Some("mi")),
        y_label: None,
    },
    MetricDescriptor {
        key: "elapsedTimeSeconds",
        label: "Duration",
        color: [0xa7, 0x8b, 0xfa],
        extract: |w| w.elapsed_time_seconds.map(|s| s / 60.0),
        format: |v| format_duration(Some(v * 60.0)),
        y_label: Some("Minutes"),
    },
    MetricDescriptor {
        key: "avgSpeedMph",
        label: "Avg Speed (mph)",
        color: [0x34, 0xd3, 0x99],
        extract: |w| w.avg_speed_mph,
        format: |v| format_num(Some(v), Some("mph")),
        y_label: None,
    },
    MetricDescriptor {
        key: "avgHeartRate",
        label: "Avg Heart Rate",
        color: [0xf8, 0x71, 0x71],
        extract: |w| w.avg_heart_rate,
        format: |v| format_heart_rate(Some(v)),
        y_label: None,
    },
];

static METRIC_KEYS: phf::Map<&'static str, Metric> = phf_map! {
    "calories" => Metric::Calories,
    "distanceMiles" => Metric::Distance,
    "elapsedTimeSeconds" => Metric::Duration,
    "avgSpeedMph" => Metric::AvgSpeed,
    "avgHeartRate" => Metric::AvgHeartRate,
};

static GRANULARITY_KEYS: phf::Map<&'static str, Granularity> = phf_map! {
    "daily" => Granularity::Daily,
    "weekly" => Granularity::Weekly,
    "monthly" => Granularity::Monthly,
};

impl Metric {
    pub fn descriptor(self) -> &'static MetricDescriptor {
        let idx = match self {
            Metric::Calories => 0,
            Metric::Distance => 1,
            Metric::Duration => 2,
            Metric::AvgSpeed => 3,
            Metric::AvgHeartRate => 4,
        };
        &DESCRIPTORS[idx]
    }

    pub fn key(self) -> &'static str {
        self.descriptor().key
    }

    pub fn label(self) -> &'static str {
        self.descriptor().label
    }

    /// Resolve a persisted metric key. Unknown keys yield `None`.
    pub fn from_key(key: &str) -> Option<Metric> {
        METRIC_KEYS.get(key).copied()
    }

    /// Value used for the chart, `None` when the field was not observed.
    pub fn extract(self, record: &WorkoutRecord) -> Option<f64> {
        (self.descriptor().extract)(record)
    }

    pub fn format(self, value: f64) -> String {
        (self.descriptor().format)(value)
    }
}

impl Granularity {
    pub fn key(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Granularity::Daily => "Daily",
            Granularity::Weekly => "Weekly",
            Granularity::Monthly => "Monthly",
        }
    }

    pub fn from_key(key: &str) -> Option<Granularity> {
        GRANULARITY_KEYS.get(key).copied()
    }
}

impl HistoryRange {
    pub fn days(self) -> Option<i64> {
        match self {
            HistoryRange::All => None,
            HistoryRange::LastWeek => Some(7),
            HistoryRange::LastMonth => Some(30),
            HistoryRange::LastQuarter => Some(90),
            HistoryRange::LastYear => Some(365),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HistoryRange::All => "All time",
            HistoryRange::LastWeek => "Last 7 days",
            HistoryRange::LastMonth => "Last 30 days",
            HistoryRange::LastQuarter => "Last 90 days",
            HistoryRange::LastYear => "Last 365 days",
        }
    }

    /// Lower bound for the store query: local midnight `days()` before `today`.
    pub fn since(self, today: NaiveDate) -> Option<DateTime<Local>> {
        let days = self.days()?;
        let day = today - Duration::days(days);
        Local
            .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
            .earliest()
    }
}

/// Format a number with up to two decimals, dropping trailing zeros.
pub fn format_num(value: Option<f64>, unit: Option<&str>) -> String {
    let Some(v) = value else {
        return "--".into();
    };
    let fixed = format!("{v:.2}");
    let trimmed = if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.')
    } else {
        fixed.as_str()
    };
    match unit {
        Some(u) => format!("{trimmed} {u}"),
        None => trimmed.to_string(),
    }
}

/// Format seconds as `MM:SS`, or `H:MM:SS` once an hour is reached.
pub fn format_duration(total_seconds: Option<f64>) -> String {
    let Some(total) = total_seconds else {
        return "--".into();
    };
    let rounded = total.round().max(0.0) as u64;
    let h = rounded / 3600;
    let m = (rounded % 3600) / 60;
    let s = rounded % 60;
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Format a pace in seconds per mile as `M:SS / mi`.
pub fn format_pace(seconds_per_mile: Option<f64>) -> String {
    let Some(pace) = seconds_per_mile else {
        return "--".into();
    };
    let rounded = pace.round().max(0.0) as u64;
    format!("{}:{:02} / mi", rounded / 60, rounded % 60)
}

pub fn format_heart_rate(bpm: Option<f64>) -> String {
    bpm.map(|v| format!("{} bpm", v.round()))
        .unwrap_or_else(|| "--".into())
}
