// Module for bucketing workout history and computing detail aggregates
use crate::WorkoutRecord;
use crate::metrics::{Granularity, Metric};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One bar on the history chart: an inclusive calendar range and the workouts
/// that fall inside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub workouts: Vec<WorkoutRecord>,
    pub value: f64,
    pub label: String,
}

impl Bucket {
    pub fn has_workouts(&self) -> bool {
        !self.workouts.is_empty()
    }

    /// Number of calendar days spanned, both ends included.
    pub fn total_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1).max(0) as usize
    }

    /// Count of distinct calendar days holding a workout.
    pub fn present_days(&self) -> usize {
        self.workouts
            .iter()
            .map(WorkoutRecord::date_key)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn range_label(&self) -> String {
        if self.start.year() == self.end.year() {
            format!(
                "{} - {}",
                self.start.format("%b %-d"),
                self.end.format("%b %-d, %Y")
            )
        } else {
            format!(
                "{} - {}",
                self.start.format("%b %-d, %Y"),
                self.end.format("%b %-d, %Y")
            )
        }
    }
}

/// Buckets plus the parallel label/value arrays fed to the chart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySeries {
    pub buckets: Vec<Bucket>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl HistorySeries {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Join records to calendar days.
///
/// Iteration follows the slice order and the first record seen for a day
/// wins; later records on the same day are dropped, including from weekly and
/// monthly sums. Callers pass the store order (newest-first).
pub fn records_by_day(records: &[WorkoutRecord]) -> BTreeMap<NaiveDate, &WorkoutRecord> {
    let mut map: BTreeMap<NaiveDate, &WorkoutRecord> = BTreeMap::new();
    for r in records {
        map.entry(r.date_key()).or_insert(r);
    }
    map
}

/// Build a gap-free bucket sequence from the earliest record's day through
/// `today`.
///
/// `today` must be supplied by the caller for every call; two calls with the
/// same inputs and the same `today` produce identical output. If a record is
/// dated after `today` the sequence is extended to cover it.
pub fn build_series(
    records: &[WorkoutRecord],
    granularity: Granularity,
    metric: Metric,
    today: NaiveDate,
) -> HistorySeries {
    let by_day = records_by_day(records);
    let (Some(&start), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back()) else {
        return HistorySeries::default();
    };
    let end = today.max(last);

    let buckets = match granularity {
        Granularity::Daily => daily_buckets(&by_day, metric, start, end),
        Granularity::Weekly => weekly_buckets(&by_day, metric, start, end),
        Granularity::Monthly => monthly_buckets(&by_day, metric, start, end),
    };

    log::debug!(
        "Built {} {} buckets for {} from {} to {}",
        buckets.len(),
        granularity.key(),
        metric.key(),
        start,
        end
    );

    let labels = buckets.iter().map(|b| b.label.clone()).collect();
    let values = buckets.iter().map(|b| b.value).collect();
    HistorySeries {
        buckets,
        labels,
        values,
    }
}

/// Sum the metric over the recorded days in `start..=end` and divide by
/// `divisor`. Absent values are skipped, not counted as zero.
fn period_bucket(
    by_day: &BTreeMap<NaiveDate, &WorkoutRecord>,
    metric: Metric,
    start: NaiveDate,
    end: NaiveDate,
    divisor: f64,
    label: String,
) -> Bucket {
    let mut sum = 0.0;
    let mut workouts = Vec::new();
    for (_, w) in by_day.range(start..=end) {
        if let Some(v) = metric.extract(w) {
            sum += v;
        }
        workouts.push((*w).clone());
    }
    Bucket {
        start,
        end,
        workouts,
        value: sum / divisor,
        label,
    }
}

fn daily_buckets(
    by_day: &BTreeMap<NaiveDate, &WorkoutRecord>,
    metric: Metric,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Bucket> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(|d| period_bucket(by_day, metric, d, d, 1.0, d.format("%b %-d").to_string()))
        .collect()
}

fn weekly_buckets(
    by_day: &BTreeMap<NaiveDate, &WorkoutRecord>,
    metric: Metric,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    let mut week_start = monday_on_or_before(start);
    while week_start <= end {
        let week_end = week_start + Duration::days(6);
        let label = week_start.format("%b %-d").to_string();
        buckets.push(period_bucket(by_day, metric, week_start, week_end, 7.0, label));
        week_start += Duration::days(7);
    }
    buckets
}

fn monthly_buckets(
    by_day: &BTreeMap<NaiveDate, &WorkoutRecord>,
    metric: Metric,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    let mut month_start = first_of_month(start);
    while month_start <= end {
        let Some(next) = first_of_next_month(month_start) else {
            break;
        };
        let month_end = next - Duration::days(1);
        let days = days_in_month(month_start) as f64;
        let label = month_start.format("%b %Y").to_string();
        buckets.push(period_bucket(by_day, metric, month_start, month_end, days, label));
        month_start = next;
    }
    buckets
}

pub fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

fn first_of_next_month(first: NaiveDate) -> Option<NaiveDate> {
    if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    }
}

pub fn days_in_month(date: NaiveDate) -> i64 {
    let first = first_of_month(date);
    first_of_next_month(first)
        .map(|next| (next - first).num_days())
        .unwrap_or(31)
}

/// Numeric workout fields shown in the detail panel. `None` renders as
/// "no data".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FieldValues {
    pub elapsed_time_seconds: Option<f64>,
    pub calories: Option<f64>,
    pub distance_miles: Option<f64>,
    pub distance_climbed_feet: Option<f64>,
    pub avg_speed_mph: Option<f64>,
    pub avg_pace_seconds_per_mile: Option<f64>,
    pub avg_heart_rate: Option<f64>,
}

impl FieldValues {
    pub fn from_record(w: &WorkoutRecord) -> Self {
        Self {
            elapsed_time_seconds: w.elapsed_time_seconds,
            calories: w.calories,
            distance_miles: w.distance_miles,
            distance_climbed_feet: w.distance_climbed_feet,
            avg_speed_mph: w.avg_speed_mph,
            avg_pace_seconds_per_mile: w.avg_pace_seconds_per_mile,
            avg_heart_rate: w.avg_heart_rate,
        }
    }

    /// Per-field mean over the records where that field is present.
    pub fn mean_of(records: &[WorkoutRecord]) -> Self {
        fn mean<'a>(
            records: &'a [WorkoutRecord],
            field: impl Fn(&'a WorkoutRecord) -> Option<f64>,
        ) -> Option<f64> {
            let (sum, count) = records
                .iter()
                .filter_map(field)
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            (count > 0).then(|| sum / count as f64)
        }

        Self {
            elapsed_time_seconds: mean(records, |w| w.elapsed_time_seconds),
            calories: mean(records, |w| w.calories),
            distance_miles: mean(records, |w| w.distance_miles),
            distance_climbed_feet: mean(records, |w| w.distance_climbed_feet),
            avg_speed_mph: mean(records, |w| w.avg_speed_mph),
            avg_pace_seconds_per_mile: mean(records, |w| w.avg_pace_seconds_per_mile),
            avg_heart_rate: mean(records, |w| w.avg_heart_rate),
        }
    }
}

/// What the detail panel shows for the selected bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailView {
    /// No bucket selected, or the bucket holds no workouts.
    Empty,
    /// Daily granularity: the day's record, verbatim.
    Day {
        date_label: String,
        fields: FieldValues,
    },
    /// Weekly or monthly granularity: averages over the recorded days.
    Period {
        range_label: String,
        averages: FieldValues,
        present_days: usize,
        total_days: usize,
    },
}

impl DetailView {
    /// "`P` of `T` days" for period views.
    pub fn days_summary(&self) -> Option<String> {
        match self {
            DetailView::Period {
                present_days,
                total_days,
                ..
            } => Some(format!("{present_days} of {total_days} days")),
            _ => None,
        }
    }
}

/// Compute the detail view model for the selected bucket.
pub fn compute_detail(bucket: Option<&Bucket>, granularity: Granularity) -> DetailView {
    let Some(bucket) = bucket.filter(|b| b.has_workouts()) else {
        return DetailView::Empty;
    };
    match granularity {
        Granularity::Daily => {
            let record = &bucket.workouts[0];
            DetailView::Day {
                date_label: record.date_key().format("%a, %b %-d, %Y").to_string(),
                fields: FieldValues::from_record(record),
            }
        }
        Granularity::Weekly | Granularity::Monthly => DetailView::Period {
            range_label: bucket.range_label(),
            averages: FieldValues::mean_of(&bucket.workouts),
            present_days: bucket.present_days(),
            total_days: bucket.total_days(),
        },
    }
}
