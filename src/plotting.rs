use egui::Color32;
use egui_plot::{Bar, BarChart, Plot, VLine};

use crate::analysis::HistorySeries;
use crate::history::Selection;
use crate::metrics::Metric;

/// Width of one bar in plot units; bars sit at integer x positions.
pub const BAR_WIDTH: f64 = 0.8;

pub fn metric_color(metric: Metric) -> Color32 {
    let [r, g, b] = metric.descriptor().color;
    Color32::from_rgb(r, g, b)
}

/// Hover text for one bar: its bucket label and the formatted value.
pub fn bar_hover_text(bar: &Bar, metric: Metric) -> String {
    format!("{}\n{}", bar.name, metric.format(bar.value))
}

/// One bar per bucket at x = bucket index, filled in the metric color.
pub fn history_bars(series: &HistorySeries, metric: Metric) -> Vec<Bar> {
    let color = metric_color(metric);
    series
        .values
        .iter()
        .zip(&series.labels)
        .enumerate()
        .map(|(idx, (value, label))| {
            Bar::new(idx as f64, *value)
                .width(BAR_WIDTH)
                .name(label)
                .fill(color.gamma_multiply(0.8))
        })
        .collect()
}

pub fn history_bar_chart(series: &HistorySeries, metric: Metric) -> BarChart {
    BarChart::new(history_bars(series, metric))
        .name(metric.label())
        .color(metric_color(metric))
        .element_formatter(Box::new(move |bar, _chart| bar_hover_text(bar, metric)))
}

/// Where to draw the selected-bucket marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionMarker {
    pub x: f64,
    pub visible: bool,
}

pub fn selection_marker(len: usize, selection: Selection) -> SelectionMarker {
    match selection.index() {
        Some(idx) if idx < len => SelectionMarker {
            x: idx as f64,
            visible: true,
        },
        _ => SelectionMarker {
            x: 0.0,
            visible: false,
        },
    }
}

/// Resolve a click at plot x-coordinate `x` to a bar index, or `None` when
/// the click fell between or outside the bars.
pub fn bar_index_at(x: f64, len: usize) -> Option<usize> {
    let nearest = x.round();
    if !nearest.is_finite() || nearest < 0.0 || nearest >= len as f64 {
        return None;
    }
    if (x - nearest).abs() > BAR_WIDTH / 2.0 {
        return None;
    }
    Some(nearest as usize)
}

/// Axis tick text: the bucket label at integer ticks, blank elsewhere.
pub fn axis_label(labels: &[String], value: f64) -> String {
    let idx = value.round();
    if (value - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

/// Draw the history bar chart and return the bar index the user clicked this
/// frame.
pub fn show_history_plot(
    ui: &mut egui::Ui,
    series: &HistorySeries,
    metric: Metric,
    selection: Selection,
    height: f32,
) -> Option<usize> {
    let labels = series.labels.clone();
    let len = series.len();
    let chart = history_bar_chart(series, metric);
    let marker = selection_marker(len, selection);
    let mut plot = Plot::new("history_plot")
        .height(height)
        .allow_drag(false)
        .allow_zoom(false)
        .allow_scroll(false)
        .include_y(0.0)
        .x_axis_formatter(move |mark, _chars, _| axis_label(&labels, mark.value));
    if let Some(y_label) = metric.descriptor().y_label {
        plot = plot.y_axis_label(y_label);
    }
    plot.show(ui, |plot_ui| {
        plot_ui.bar_chart(chart);
        if marker.visible {
            plot_ui.vline(
                VLine::new(marker.x)
                    .color(Color32::WHITE)
                    .width(1.5)
                    .name("Selected"),
            );
        }
        if plot_ui.response().clicked() {
            plot_ui
                .pointer_coordinate()
                .and_then(|p| bar_index_at(p.x, len))
        } else {
            None
        }
    })
    .inner
}
