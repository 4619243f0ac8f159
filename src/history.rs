use chrono::NaiveDate;

use crate::WorkoutRecord;
use crate::analysis::{Bucket, DetailView, HistorySeries, build_series, compute_detail};
use crate::metrics::{Granularity, Metric};

/// Which bucket drives the detail panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Only reachable when there are no buckets.
    #[default]
    Unselected,
    SelectedAt(usize),
}

impl Selection {
    /// Selection after the series was rebuilt: the last bucket holding a
    /// workout, else the last bucket.
    pub fn after_rebuild(buckets: &[Bucket]) -> Selection {
        if buckets.is_empty() {
            return Selection::Unselected;
        }
        let idx = buckets
            .iter()
            .rposition(Bucket::has_workouts)
            .unwrap_or(buckets.len() - 1);
        Selection::SelectedAt(idx)
    }

    /// Selection after the user clicked bucket `index`. Empty buckets are
    /// selectable; indices outside the sequence leave the selection as is.
    pub fn user_select(self, index: usize, len: usize) -> Selection {
        if index < len {
            Selection::SelectedAt(index)
        } else {
            self
        }
    }

    pub fn index(self) -> Option<usize> {
        match self {
            Selection::Unselected => None,
            Selection::SelectedAt(i) => Some(i),
        }
    }
}

/// Aggregation state owned by the history screen.
///
/// Holds the cached store result and everything derived from it. Every
/// mutation rebuilds the series and re-derives the selection, except
/// [`HistoryContext::select`].
#[derive(Debug, Clone)]
pub struct HistoryContext {
    records: Vec<WorkoutRecord>,
    granularity: Granularity,
    metric: Metric,
    series: HistorySeries,
    selection: Selection,
}

impl HistoryContext {
    pub fn new(granularity: Granularity, metric: Metric) -> Self {
        Self {
            records: Vec::new(),
            granularity,
            metric,
            series: HistorySeries::default(),
            selection: Selection::Unselected,
        }
    }

    /// Replace the cached records (newest-first) and rebuild.
    pub fn set_records(&mut self, records: Vec<WorkoutRecord>, today: NaiveDate) {
        self.records = records;
        self.rebuild(today);
    }

    pub fn set_granularity(&mut self, granularity: Granularity, today: NaiveDate) {
        self.granularity = granularity;
        self.rebuild(today);
    }

    pub fn set_metric(&mut self, metric: Metric, today: NaiveDate) {
        self.metric = metric;
        self.rebuild(today);
    }

    /// Apply persisted control keys. Returns `false` and leaves the view
    /// untouched if either key is unknown.
    pub fn apply_keys(&mut self, granularity: &str, metric: &str, today: NaiveDate) -> bool {
        match (Granularity::from_key(granularity), Metric::from_key(metric)) {
            (Some(g), Some(m)) => {
                self.granularity = g;
                self.metric = m;
                self.rebuild(today);
                true
            }
            _ => {
                log::warn!("Ignoring unknown history controls: {granularity}/{metric}");
                false
            }
        }
    }

    /// Rebuild against the cached records for a new `today`. A record dated
    /// after `today` extends the series to that record's day.
    pub fn rebuild(&mut self, today: NaiveDate) {
        self.series = build_series(&self.records, self.granularity, self.metric, today);
        self.selection = Selection::after_rebuild(&self.series.buckets);
    }

    pub fn select(&mut self, index: usize) {
        self.selection = self.selection.user_select(index, self.series.len());
    }

    pub fn records(&self) -> &[WorkoutRecord] {
        &self.records
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn series(&self) -> &HistorySeries {
        &self.series
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn selected_bucket(&self) -> Option<&Bucket> {
        self.selection.index().and_then(|i| self.series.buckets.get(i))
    }

    pub fn detail(&self) -> DetailView {
        compute_detail(self.selected_bucket(), self.granularity)
    }
}
