use crate::{analysis::HistorySeries, metrics::Metric};
use maud::{Markup, html};
use plotters::prelude::*;
use std::path::Path;

pub fn export_html_report<P: AsRef<Path>>(
    path: P,
    series: &HistorySeries,
    metric: Metric,
) -> std::io::Result<()> {
    let path = path.as_ref();
    let chart_path = path.with_extension("png");
    let chart_file = match generate_series_chart(series, metric, &chart_path) {
        Ok(_) => chart_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("")),
        Err(e) => {
            log::error!("Failed to generate chart: {}", e);
            std::ffi::OsStr::new("")
        }
    };
    let markup = build_html(series, metric, chart_file);
    std::fs::write(path, markup.into_string())
}

fn generate_series_chart(
    series: &HistorySeries,
    metric: Metric,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (800, 400)).into_drawing_area();
    root.fill(&WHITE)?;
    if series.is_empty() {
        root.present()?;
        return Ok(());
    }
    let max = series
        .values
        .iter()
        .copied()
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let [r, g, b] = metric.descriptor().color;
    let color = RGBColor(r, g, b);
    let labels = series.labels.clone();
    let mut chart = ChartBuilder::on(&root)
        .caption(metric.label(), ("sans-serif", 25))
        .margin(5)
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d((0..series.len()).into_segmented(), 0f64..max * 1.1)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_label_formatter(&|x| match x {
            SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .y_desc(metric.descriptor().y_label.unwrap_or(metric.label()))
        .draw()?;
    chart.draw_series(
        Histogram::vertical(&chart)
            .style(color.filled())
            .margin(4)
            .data(series.values.iter().enumerate().map(|(i, v)| (i, *v))),
    )?;
    root.present()?;
    Ok(())
}

fn build_html(series: &HistorySeries, metric: Metric, chart_file: &std::ffi::OsStr) -> Markup {
    html! {
        html {
            head { meta charset="utf-8"; title { "Workout History Report" } }
            body {
                h1 { (metric.label()) }
                @if chart_file.is_empty() {
                    p { "Chart unavailable" }
                } @else {
                    img src=(chart_file.to_string_lossy());
                }
                h1 { "Buckets" }
                @if series.is_empty() {
                    p { "No workouts logged yet" }
                } @else {
                    table border="1" {
                        tr { th { "Period" } th { "Range" } th { "Value" } th { "Workouts" } }
                        @for b in &series.buckets {
                            tr {
                                td { (b.label) }
                                td { (b.range_label()) }
                                td { (metric.format(b.value)) }
                                td { (b.workouts.len()) }
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkoutRecord;
    use crate::analysis::build_series;
    use crate::metrics::Granularity;
    use chrono::{Local, NaiveDate, TimeZone};
    use std::ffi::OsStr;

    fn series() -> HistorySeries {
        let record = WorkoutRecord {
            id: "a".into(),
            timestamp: Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            elapsed_time_seconds: Some(2400.0),
            calories: Some(300.0),
            distance_miles: None,
            distance_climbed_feet: None,
            avg_speed_mph: None,
            avg_pace_seconds_per_mile: None,
            avg_heart_rate: None,
        };
        build_series(
            &[record],
            Granularity::Daily,
            Metric::Duration,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
    }

    #[test]
    fn build_html_lists_buckets_with_formatter() {
        let output = build_html(&series(), Metric::Duration, OsStr::new("chart.png")).into_string();

        assert!(output.contains("<h1>Duration</h1>"));
        assert!(output.contains("Jan 1"));
        assert!(output.contains("40:00"));
        assert!(output.contains("00:00"));
        assert!(output.contains("<img src=\"chart.png\">"));
    }

    #[test]
    fn build_html_handles_empty_chart_file() {
        let output = build_html(&HistorySeries::default(), Metric::Calories, OsStr::new(""));
        let output = output.into_string();

        assert!(output.contains("Chart unavailable"));
        assert!(output.contains("No workouts logged yet"));
        assert!(!output.contains("<img"));
    }
}
