use crate::{WorkoutRecord, analysis::HistorySeries};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One exported chart bar.
#[derive(Debug, Serialize)]
struct BucketRow<'a> {
    label: &'a str,
    start: String,
    end: String,
    value: f64,
    workouts: usize,
}

fn bucket_rows(series: &HistorySeries) -> Vec<BucketRow<'_>> {
    series
        .buckets
        .iter()
        .map(|b| BucketRow {
            label: &b.label,
            start: b.start.format("%Y-%m-%d").to_string(),
            end: b.end.format("%Y-%m-%d").to_string(),
            value: b.value,
            workouts: b.workouts.len(),
        })
        .collect()
}

pub fn write_json<T: Serialize + ?Sized, P: AsRef<Path>>(
    value: &T,
    path: P,
) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

pub fn write_csv<T: Serialize>(writer: impl Write, records: &[T]) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.flush().map_err(Into::into)
}

pub fn save_series_csv<P: AsRef<Path>>(path: P, series: &HistorySeries) -> csv::Result<()> {
    write_csv(std::fs::File::create(path)?, &bucket_rows(series))
}

pub fn save_series_json<P: AsRef<Path>>(path: P, series: &HistorySeries) -> std::io::Result<()> {
    write_json(&bucket_rows(series), path)
}

pub fn save_records_csv<P: AsRef<Path>>(path: P, records: &[WorkoutRecord]) -> csv::Result<()> {
    write_csv(std::fs::File::create(path)?, records)
}

pub fn save_records_json<P: AsRef<Path>>(
    path: P,
    records: &[WorkoutRecord],
) -> std::io::Result<()> {
    write_json(records, path)
}
