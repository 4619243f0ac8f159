//! Cardio history screen and persistent user settings.

use dirs_next as dirs;
use eframe::{App, Frame, NativeOptions, egui};
use rfd::FileDialog;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{Receiver, Sender, channel};

use chrono::{DateTime, Local, NaiveDate};
use log::info;

mod analysis;
use analysis::{DetailView, FieldValues};
mod history;
use history::HistoryContext;
mod metrics;
use metrics::{
    ALL_GRANULARITIES, ALL_METRICS, ALL_RANGES, Granularity, HistoryRange, Metric, format_duration,
    format_heart_rate, format_num, format_pace,
};
mod plotting;
use plotting::show_history_plot;
mod sync;
use sync::{DEFAULT_COLLECTION, FetchOutcome, FirestoreStore, resolve_api_key, spawn_fetch};
mod export;
use export::{save_records_csv, save_records_json, save_series_csv, save_series_json};
mod report;

/// One logged cardio session as stored in the cloud collection.
///
/// Every numeric field may be absent when the machine display did not show
/// it; absent is not zero.
#[derive(Debug, Deserialize, Clone, Serialize, PartialEq)]
struct WorkoutRecord {
    id: String,
    timestamp: DateTime<Local>,
    elapsed_time_seconds: Option<f64>,
    calories: Option<f64>,
    distance_miles: Option<f64>,
    distance_climbed_feet: Option<f64>,
    avg_speed_mph: Option<f64>,
    avg_pace_seconds_per_mile: Option<f64>,
    avg_heart_rate: Option<f64>,
}

impl WorkoutRecord {
    /// Calendar day of the workout in the local time zone.
    fn date_key(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

fn default_plot_height() -> f32 {
    240.0
}

/// Persistent configuration for the store connection and history controls.
///
/// Serialized to a JSON file; fields missing from an older file take their
/// default values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct Settings {
    username: String,
    project_id: String,
    api_key: Option<String>,
    collection: String,
    /// Metric key, see [`Metric::from_key`].
    metric: String,
    range: HistoryRange,
    show_workout_list: bool,
    #[serde(default = "default_plot_height")]
    plot_height: f32,
}

impl Settings {
    const FILE: &'static str = "cardio_log_settings.json";

    fn path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|p| p.join(Self::FILE))
    }

    /// Load settings from the JSON configuration file, falling back to
    /// defaults when it is missing or unreadable.
    fn load() -> Self {
        if let Some(path) = Self::path() {
            if let Ok(data) = std::fs::read_to_string(&path) {
                match serde_json::from_str(&data) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("Ignoring invalid settings in {}: {e}", path.display()),
                }
            }
        }
        Self::default()
    }

    fn save(&self) {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match serde_json::to_string_pretty(self) {
                Ok(data) => {
                    if let Err(e) = std::fs::write(&path, data) {
                        log::error!("Failed to save settings: {e}");
                    }
                }
                Err(e) => log::error!("Failed to serialize settings: {e}"),
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.username.trim().is_empty() {
            return Err("Please enter a username.".into());
        }
        if self.project_id.trim().is_empty() {
            return Err("Please enter the Firebase project id.".into());
        }
        Ok(())
    }

    fn store(&self) -> FirestoreStore {
        let collection = if self.collection.trim().is_empty() {
            DEFAULT_COLLECTION
        } else {
            self.collection.trim()
        };
        FirestoreStore::new(
            self.project_id.trim(),
            collection,
            self.username.trim(),
            resolve_api_key(self.api_key.as_deref()),
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            project_id: String::new(),
            api_key: None,
            collection: DEFAULT_COLLECTION.to_string(),
            metric: Metric::Calories.key().to_string(),
            range: HistoryRange::All,
            show_workout_list: true,
            plot_height: default_plot_height(),
        }
    }
}

fn field_text(value: Option<f64>, missing: &str, fmt: impl Fn(Option<f64>) -> String) -> String {
    match value {
        Some(_) => fmt(value),
        None => missing.to_string(),
    }
}

/// Label/value pairs for the detail panel. `missing` replaces absent values.
fn detail_lines(fields: &FieldValues, missing: &str) -> Vec<(&'static str, String)> {
    vec![
        ("Duration", field_text(fields.elapsed_time_seconds, missing, format_duration)),
        ("Calories", field_text(fields.calories, missing, |v| format_num(v, None))),
        ("Distance", field_text(fields.distance_miles, missing, |v| format_num(v, Some("mi")))),
        ("Avg Speed", field_text(fields.avg_speed_mph, missing, |v| format_num(v, Some("mph")))),
        ("Climbed", field_text(fields.distance_climbed_feet, missing, |v| format_num(v, Some("ft")))),
        ("Pace", field_text(fields.avg_pace_seconds_per_mile, missing, format_pace)),
        ("Heart Rate", field_text(fields.avg_heart_rate, missing, format_heart_rate)),
    ]
}

struct MyApp {
    settings: Settings,
    history: HistoryContext,
    today: NaiveDate,
    fetch_tx: Sender<FetchOutcome>,
    fetch_rx: Receiver<FetchOutcome>,
    next_request: u64,
    pending_fetches: usize,
    needs_refresh: bool,
    last_loaded: Option<DateTime<Local>>,
    show_settings: bool,
    settings_draft: Settings,
    settings_error: Option<String>,
    settings_dirty: bool,
}

impl Default for MyApp {
    fn default() -> Self {
        let settings = Settings::load();
        let today = Local::now().date_naive();
        let mut history = HistoryContext::new(Granularity::Daily, Metric::Calories);
        // Granularity always starts daily; only the metric survives restarts.
        history.apply_keys(Granularity::Daily.key(), &settings.metric, today);
        let (fetch_tx, fetch_rx) = channel();
        let show_settings = settings.validate().is_err();
        Self {
            settings_draft: settings.clone(),
            settings,
            history,
            today,
            fetch_tx,
            fetch_rx,
            next_request: 0,
            pending_fetches: 0,
            needs_refresh: true,
            last_loaded: None,
            show_settings,
            settings_error: None,
            settings_dirty: false,
        }
    }
}

impl MyApp {
    /// Start a background fetch for the configured range. Earlier fetches
    /// keep running; whichever finishes last wins.
    fn refresh(&mut self, ctx: &egui::Context) {
        let since = self.settings.range.since(self.today);
        let request_id = self.next_request;
        self.next_request += 1;
        self.pending_fetches += 1;
        info!(
            "Refreshing history ({}) as request {request_id}",
            self.settings.range.label()
        );
        let ctx = ctx.clone();
        spawn_fetch(
            self.settings.store(),
            since,
            request_id,
            self.fetch_tx.clone(),
            move || ctx.request_repaint(),
        );
    }

    /// Apply finished fetches in arrival order.
    fn poll_fetches(&mut self) {
        while let Ok(outcome) = self.fetch_rx.try_recv() {
            self.pending_fetches = self.pending_fetches.saturating_sub(1);
            self.apply_fetch(outcome);
        }
    }

    fn apply_fetch(&mut self, outcome: FetchOutcome) {
        match outcome.result {
            Ok(records) => {
                info!(
                    "Loaded {} workouts (request {})",
                    records.len(),
                    outcome.request_id
                );
                self.history.set_records(records, self.today);
                self.last_loaded = Some(Local::now());
            }
            Err(e) => {
                log::error!("Failed to load workouts: {e}");
                self.history.set_records(Vec::new(), self.today);
            }
        }
    }

    fn roll_day(&mut self, today: NaiveDate) {
        if today != self.today {
            self.today = today;
            self.history.rebuild(today);
        }
    }

    fn set_granularity(&mut self, granularity: Granularity) {
        self.history.set_granularity(granularity, self.today);
    }

    fn set_metric(&mut self, metric: Metric) {
        self.history.set_metric(metric, self.today);
        self.settings.metric = metric.key().to_string();
        self.settings_dirty = true;
    }

    fn controls_ui(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let mut metric = self.history.metric();
            egui::ComboBox::from_id_source("metric_select")
                .selected_text(metric.label())
                .show_ui(ui, |ui| {
                    for m in ALL_METRICS {
                        ui.selectable_value(&mut metric, m, m.label());
                    }
                });
            if metric != self.history.metric() {
                self.set_metric(metric);
            }

            let mut granularity = self.history.granularity();
            egui::ComboBox::from_id_source("granularity_select")
                .selected_text(granularity.label())
                .show_ui(ui, |ui| {
                    for g in ALL_GRANULARITIES {
                        ui.selectable_value(&mut granularity, g, g.label());
                    }
                });
            if granularity != self.history.granularity() {
                self.set_granularity(granularity);
            }

            let mut range = self.settings.range;
            egui::ComboBox::from_id_source("range_select")
                .selected_text(range.label())
                .show_ui(ui, |ui| {
                    for r in ALL_RANGES {
                        ui.selectable_value(&mut range, r, r.label());
                    }
                });
            if range != self.settings.range {
                self.settings.range = range;
                self.settings_dirty = true;
                self.refresh(ctx);
            }

            if ui.button("Refresh").clicked() {
                self.refresh(ctx);
            }
            if self.pending_fetches > 0 {
                ui.spinner();
            } else if let Some(ts) = self.last_loaded {
                ui.label(format!("Updated {}", ts.format("%H:%M")));
            }
        });
    }

    fn detail_ui(&self, ui: &mut egui::Ui) {
        let detail = self.history.detail();
        let (heading, summary, fields, missing) = match &detail {
            DetailView::Empty => {
                ui.label("No workout logged for this period.");
                return;
            }
            DetailView::Day { date_label, fields } => (date_label.clone(), None, fields, "--"),
            DetailView::Period {
                range_label,
                averages,
                ..
            } => (range_label.clone(), detail.days_summary(), averages, "no data"),
        };
        ui.heading(heading);
        if let Some(summary) = summary {
            ui.label(format!("{summary} · averages per workout"));
        }
        egui::Grid::new("detail_grid")
            .num_columns(2)
            .striped(true)
            .show(ui, |ui| {
                for (label, value) in detail_lines(fields, missing) {
                    ui.label(label);
                    ui.label(value);
                    ui.end_row();
                }
            });
    }

    fn workout_list_ui(&self, ui: &mut egui::Ui) {
        let records = self.history.records();
        if records.is_empty() {
            return;
        }
        let row_height = ui.text_style_height(&egui::TextStyle::Body);
        let headers = [
            "Date",
            "Duration",
            "Calories",
            "Distance",
            "Avg Speed",
            "Climbed",
            "Pace",
            "Heart Rate",
        ];
        let mut table = egui_extras::TableBuilder::new(ui)
            .striped(true)
            .resizable(true)
            .vscroll(false);
        for _ in headers {
            table = table.column(egui_extras::Column::auto());
        }
        table
            .header(row_height, |mut header| {
                for h in headers {
                    header.col(|ui| {
                        ui.strong(h);
                    });
                }
            })
            .body(|mut body| {
                for w in records {
                    body.row(row_height, |mut row| {
                        row.col(|ui| {
                            ui.label(w.timestamp.format("%b %-d, %Y").to_string());
                        });
                        for (_, value) in detail_lines(&FieldValues::from_record(w), "--") {
                            row.col(|ui| {
                                ui.label(value.as_str());
                            });
                        }
                    });
                }
            });
    }

    fn export_series(&self) {
        if let Some(path) = FileDialog::new()
            .add_filter("JSON", &["json"])
            .add_filter("CSV", &["csv"])
            .save_file()
        {
            let series = self.history.series();
            match path
                .extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_lowercase())
            {
                Some(ext) if ext == "csv" => {
                    if let Err(e) = save_series_csv(&path, series) {
                        log::error!("Failed to export series: {e}");
                    }
                }
                _ => {
                    if let Err(e) = save_series_json(&path, series) {
                        log::error!("Failed to export series: {e}");
                    }
                }
            }
        }
    }

    fn export_records(&self) {
        if let Some(path) = FileDialog::new()
            .add_filter("JSON", &["json"])
            .add_filter("CSV", &["csv"])
            .save_file()
        {
            let records = self.history.records();
            match path
                .extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_lowercase())
            {
                Some(ext) if ext == "csv" => {
                    if let Err(e) = save_records_csv(&path, records) {
                        log::error!("Failed to export workouts: {e}");
                    }
                }
                _ => {
                    if let Err(e) = save_records_json(&path, records) {
                        log::error!("Failed to export workouts: {e}");
                    }
                }
            }
        }
    }

    fn export_report(&self) {
        if let Some(path) = FileDialog::new().add_filter("HTML", &["html"]).save_file() {
            match report::export_html_report(&path, self.history.series(), self.history.metric()) {
                Ok(()) => info!("Wrote report to {}", path.display()),
                Err(e) => log::error!("Failed to export report: {e}"),
            }
        }
    }

    fn settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings;
        let mut save = false;
        let mut cancel = false;
        let draft = &mut self.settings_draft;
        egui::Window::new("Settings")
            .open(&mut open)
            .collapsible(false)
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .show(ui, |ui| {
                        ui.label("Username");
                        ui.text_edit_singleline(&mut draft.username);
                        ui.end_row();

                        ui.label("Firebase project");
                        ui.text_edit_singleline(&mut draft.project_id);
                        ui.end_row();

                        ui.label("Collection");
                        ui.text_edit_singleline(&mut draft.collection);
                        ui.end_row();

                        ui.label("API key");
                        let mut key = draft.api_key.clone().unwrap_or_default();
                        if ui
                            .add(egui::TextEdit::singleline(&mut key).password(true))
                            .changed()
                        {
                            draft.api_key = (!key.is_empty()).then_some(key);
                        }
                        ui.end_row();

                        ui.label("Chart height");
                        ui.add(egui::Slider::new(&mut draft.plot_height, 120.0..=600.0));
                        ui.end_row();
                    });
                if let Some(err) = &self.settings_error {
                    ui.colored_label(egui::Color32::LIGHT_RED, err);
                }
                ui.horizontal(|ui| {
                    save = ui.button("Save").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if save {
            match self.settings_draft.validate() {
                Ok(()) => {
                    let mut next = self.settings_draft.clone();
                    next.metric = self.settings.metric.clone();
                    next.range = self.settings.range;
                    next.show_workout_list = self.settings.show_workout_list;
                    self.settings = next;
                    self.settings_error = None;
                    self.settings_dirty = true;
                    open = false;
                    self.refresh(ctx);
                }
                Err(msg) => self.settings_error = Some(msg),
            }
        }
        if cancel {
            self.settings_draft = self.settings.clone();
            self.settings_error = None;
            open = false;
        }
        self.show_settings = open;
    }
}

impl App for MyApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.roll_day(Local::now().date_naive());
        self.poll_fetches();
        if self.needs_refresh {
            self.needs_refresh = false;
            self.refresh(ctx);
        }

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Settings").clicked() {
                        self.settings_draft = self.settings.clone();
                        self.show_settings = true;
                        ui.close_menu();
                    }
                    if ui.button("Refresh").clicked() {
                        self.refresh(ctx);
                        ui.close_menu();
                    }
                    if ui
                        .checkbox(&mut self.settings.show_workout_list, "Workout List")
                        .changed()
                    {
                        self.settings_dirty = true;
                    }
                    ui.separator();
                    if ui.button("Export Series").clicked() {
                        self.export_series();
                        ui.close_menu();
                    }
                    if ui.button("Export Workouts").clicked() {
                        self.export_records();
                        ui.close_menu();
                    }
                    if ui.button("Export Report").clicked() {
                        self.export_report();
                        ui.close_menu();
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.controls_ui(ctx, ui);
            ui.separator();
            egui::ScrollArea::vertical().show(ui, |ui| {
                if self.history.series().is_empty() {
                    ui.label("No workouts logged yet.");
                }
                if let Some(idx) = show_history_plot(
                    ui,
                    self.history.series(),
                    self.history.metric(),
                    self.history.selection(),
                    self.settings.plot_height,
                ) {
                    self.history.select(idx);
                }
                if !self.history.series().is_empty() {
                    ui.separator();
                    self.detail_ui(ui);
                }
                if self.settings.show_workout_list {
                    ui.separator();
                    self.workout_list_ui(ui);
                }
            });
        });

        if self.show_settings {
            self.settings_window(ctx);
        }

        if self.settings_dirty {
            self.settings.save();
            self.settings_dirty = false;
        }
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();
    let options = NativeOptions::default();
    eframe::run_native(
        "Cardio Log",
        options,
        Box::new(|_cc| Box::new(MyApp::default())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use history::Selection;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use sync::SyncError;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Run `f` with the config directory pointed at a scratch dir.
    fn with_config_dir<T>(f: impl FnOnce() -> T) -> T {
        use std::env;

        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let prev_config = env::var_os("XDG_CONFIG_HOME");
        unsafe {
            env::set_var("XDG_CONFIG_HOME", dir.path());
        }
        let out = f();
        if let Some(val) = prev_config {
            unsafe {
                env::set_var("XDG_CONFIG_HOME", val);
            }
        } else {
            unsafe {
                env::remove_var("XDG_CONFIG_HOME");
            }
        }
        out
    }

    fn record(id: &str, d: u32, calories: f64) -> WorkoutRecord {
        WorkoutRecord {
            id: id.into(),
            timestamp: Local.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap(),
            elapsed_time_seconds: Some(1200.0),
            calories: Some(calories),
            distance_miles: None,
            distance_climbed_feet: None,
            avg_speed_mph: None,
            avg_pace_seconds_per_mile: None,
            avg_heart_rate: None,
        }
    }

    fn test_app() -> MyApp {
        let mut app = with_config_dir(MyApp::default);
        app.roll_day(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap());
        app
    }

    #[test]
    fn settings_roundtrip() {
        let mut s = Settings::default();
        s.username = "sam".into();
        s.project_id = "workout-log".into();
        s.api_key = Some("abc".into());
        s.metric = "avgHeartRate".into();
        s.range = HistoryRange::LastQuarter;
        s.show_workout_list = false;
        s.plot_height = 300.0;

        let json = serde_json::to_string(&s).unwrap();
        let loaded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(s, loaded);
    }

    #[test]
    fn settings_persist_and_default_missing_fields() {
        with_config_dir(|| {
            let mut s = Settings::default();
            s.username = "sam".into();
            s.metric = "distanceMiles".into();
            s.save();
            let loaded = Settings::load();
            assert_eq!(loaded, s);

            let path = Settings::path().unwrap();
            std::fs::write(&path, r#"{"username":"alex"}"#).unwrap();
            let partial = Settings::load();
            assert_eq!(partial.username, "alex");
            assert_eq!(partial.collection, "workouts");
            assert_eq!(partial.metric, "calories");
            assert_eq!(partial.plot_height, 240.0);

            std::fs::write(&path, "not json").unwrap();
            assert_eq!(Settings::load(), Settings::default());
        });
    }

    #[test]
    fn settings_validation() {
        let mut s = Settings::default();
        assert!(s.validate().is_err());
        s.username = "  ".into();
        s.project_id = "p".into();
        assert!(s.validate().is_err());
        s.username = "sam".into();
        assert!(s.validate().is_ok());
        assert_eq!(s.store().collection, "workouts");
        assert_eq!(s.store().username, "sam");
    }

    #[test]
    fn unknown_persisted_keys_keep_defaults() {
        let app = with_config_dir(|| {
            let mut s = Settings::default();
            s.metric = "steps".into();
            s.save();
            MyApp::default()
        });
        assert_eq!(app.history.granularity(), Granularity::Daily);
        assert_eq!(app.history.metric(), Metric::Calories);
    }

    #[test]
    fn fetch_result_rebuilds_history() {
        let mut app = test_app();
        app.apply_fetch(FetchOutcome {
            request_id: 0,
            result: Ok(vec![record("b", 3, 200.0), record("a", 1, 300.0)]),
        });
        assert_eq!(app.history.series().len(), 7);
        assert_eq!(app.history.selection(), Selection::SelectedAt(2));
        assert!(app.last_loaded.is_some());

        app.set_granularity(Granularity::Weekly);
        assert!(!app.settings_dirty);
        assert_eq!(
            app.history.detail().days_summary().as_deref(),
            Some("2 of 7 days")
        );
    }

    #[test]
    fn fetch_failure_fails_closed_to_empty() {
        let mut app = test_app();
        app.apply_fetch(FetchOutcome {
            request_id: 0,
            result: Ok(vec![record("a", 1, 300.0)]),
        });
        app.apply_fetch(FetchOutcome {
            request_id: 1,
            result: Err(SyncError::Unauthorized("denied".into())),
        });
        assert!(app.history.records().is_empty());
        assert!(app.history.series().is_empty());
        assert_eq!(app.history.selection(), Selection::Unselected);
    }

    #[test]
    fn last_resolved_fetch_wins() {
        let mut app = test_app();
        app.pending_fetches = 2;
        app.fetch_tx
            .send(FetchOutcome {
                request_id: 1,
                result: Ok(vec![record("new", 5, 100.0)]),
            })
            .unwrap();
        app.fetch_tx
            .send(FetchOutcome {
                request_id: 0,
                result: Ok(vec![record("old", 2, 100.0)]),
            })
            .unwrap();
        app.poll_fetches();
        assert_eq!(app.pending_fetches, 0);
        assert_eq!(app.history.records()[0].id, "old");
    }

    #[test]
    fn day_rollover_extends_series() {
        let mut app = test_app();
        app.apply_fetch(FetchOutcome {
            request_id: 0,
            result: Ok(vec![record("a", 1, 300.0)]),
        });
        assert_eq!(app.history.series().len(), 7);
        app.roll_day(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
        assert_eq!(app.history.series().len(), 8);
        assert_eq!(app.history.selection(), Selection::SelectedAt(0));
    }

    #[test]
    fn detail_lines_mark_missing_fields() {
        let fields = FieldValues {
            elapsed_time_seconds: Some(1800.0),
            calories: Some(250.0),
            avg_pace_seconds_per_mile: Some(531.0),
            ..FieldValues::default()
        };
        let lines = detail_lines(&fields, "no data");
        assert_eq!(lines[0], ("Duration", "30:00".to_string()));
        assert_eq!(lines[1], ("Calories", "250".to_string()));
        assert_eq!(lines[2], ("Distance", "no data".to_string()));
        assert_eq!(lines[5], ("Pace", "8:51 / mi".to_string()));
        assert_eq!(lines[6], ("Heart Rate", "no data".to_string()));
    }

    #[test]
    fn record_date_key_uses_local_calendar() {
        let r = record("a", 3, 1.0);
        assert_eq!(r.date_key(), NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }
}
