use crate::WorkoutRecord;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::{Map, Value, json};
use std::sync::mpsc::Sender;

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_COLLECTION: &str = "workouts";

/// Determine the API key to use for store requests.
///
/// If the `FIREBASE_API_KEY` environment variable is set, its value takes
/// precedence over any key provided in the application settings.
pub fn resolve_api_key(settings_key: Option<&str>) -> Option<String> {
    std::env::var("FIREBASE_API_KEY")
        .ok()
        .or_else(|| settings_key.filter(|s| !s.is_empty()).map(|s| s.to_string()))
}

#[derive(Debug)]
pub enum SyncError {
    NotConfigured(String),
    Unauthorized(String),
    Forbidden(String),
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotConfigured(what) => write!(f, "Store not configured: {what}"),
            SyncError::Unauthorized(body) => write!(f, "Unauthorized: {body}"),
            SyncError::Forbidden(body) => write!(f, "Forbidden: {body}"),
            SyncError::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::NotConfigured(_) | SyncError::Unauthorized(_) | SyncError::Forbidden(_) => {
                None
            }
            SyncError::Other(e) => Some(&**e),
        }
    }
}

/// Pull interface over the per-user workout store.
pub trait WorkoutStore {
    /// All workouts for the current user at or after `since` (unbounded when
    /// `None`), newest-first.
    fn fetch_all(&self, since: Option<DateTime<Local>>) -> Result<Vec<WorkoutRecord>, SyncError>;
}

/// Workout store backed by a Firestore collection, queried over REST.
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    pub base_url: String,
    pub project_id: String,
    pub collection: String,
    pub username: String,
    pub api_key: Option<String>,
}

impl FirestoreStore {
    pub fn new(project_id: &str, collection: &str, username: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: FIRESTORE_URL.to_string(),
            project_id: project_id.to_string(),
            collection: collection.to_string(),
            username: username.to_string(),
            api_key,
        }
    }

    fn query_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents:runQuery",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }

    fn query_body(&self, since: Option<DateTime<Local>>) -> Value {
        let user_filter = json!({
            "fieldFilter": {
                "field": { "fieldPath": "username" },
                "op": "EQUAL",
                "value": { "stringValue": self.username },
            }
        });
        let filter = match since {
            Some(ts) => json!({
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        user_filter,
                        {
                            "fieldFilter": {
                                "field": { "fieldPath": "timestamp" },
                                "op": "GREATER_THAN_OR_EQUAL",
                                "value": {
                                    "timestampValue": ts
                                        .with_timezone(&Utc)
                                        .to_rfc3339_opts(SecondsFormat::Secs, true)
                                },
                            }
                        }
                    ],
                }
            }),
            None => user_filter,
        };
        json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": filter,
                "orderBy": [{
                    "field": { "fieldPath": "timestamp" },
                    "direction": "DESCENDING",
                }],
            }
        })
    }
}

impl WorkoutStore for FirestoreStore {
    fn fetch_all(&self, since: Option<DateTime<Local>>) -> Result<Vec<WorkoutRecord>, SyncError> {
        if self.username.is_empty() {
            return Ok(Vec::new());
        }
        if self.project_id.is_empty() {
            return Err(SyncError::NotConfigured("project id".into()));
        }
        log::info!(
            "Fetching workouts for {} since {}",
            self.username,
            since.map(|s| s.to_rfc3339()).unwrap_or_else(|| "the beginning".into())
        );

        let mut req = ureq::post(&self.query_url()).set("Accept", "application/json");
        if let Some(key) = self.api_key.as_deref() {
            req = req.query("key", key);
        }
        let resp = match req.send_json(self.query_body(since)) {
            Ok(r) => r.into_string().map_err(|e| SyncError::Other(Box::new(e)))?,
            Err(ureq::Error::Status(401, r)) => {
                let body = r.into_string().unwrap_or_default();
                return Err(SyncError::Unauthorized(body));
            }
            Err(ureq::Error::Status(403, r)) => {
                let body = r.into_string().unwrap_or_default();
                return Err(SyncError::Forbidden(body));
            }
            Err(e) => return Err(SyncError::Other(Box::new(e))),
        };
        let json: Value = serde_json::from_str(&resp).map_err(|e| SyncError::Other(Box::new(e)))?;
        let records = parse_query_response(&json);
        log::info!("Fetched {} workouts", records.len());
        Ok(records)
    }
}

/// Map a `runQuery` response into records, keeping the server order.
///
/// Result rows without a `document` (Firestore sends a bare `readTime` row
/// for empty results) are skipped.
pub fn parse_query_response(json: &Value) -> Vec<WorkoutRecord> {
    let mut records = Vec::new();
    if let Some(rows) = json.as_array() {
        for row in rows {
            if let Some(doc) = row.get("document") {
                records.push(parse_document(doc));
            }
        }
    }
    records
}

fn parse_document(doc: &Value) -> WorkoutRecord {
    let id = doc
        .get("name")
        .and_then(|v| v.as_str())
        .and_then(|name| name.rsplit('/').next())
        .unwrap_or("")
        .to_string();
    let empty = Map::new();
    let fields = doc.get("fields").and_then(|v| v.as_object()).unwrap_or(&empty);
    let number = |key: &str| fields.get(key).and_then(decode_number);
    let timestamp = fields
        .get("timestamp")
        .and_then(|v| v.get("timestampValue"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(|| {
            log::warn!("Workout {id} has no usable timestamp, using now");
            Local::now()
        });

    WorkoutRecord {
        timestamp,
        elapsed_time_seconds: number("elapsedTimeSeconds"),
        calories: number("calories"),
        distance_miles: number("distanceMiles"),
        distance_climbed_feet: number("distanceClimbedFeet"),
        avg_speed_mph: number("avgSpeedMph"),
        avg_pace_seconds_per_mile: number("avgPaceSecondsPerMile"),
        avg_heart_rate: number("avgHeartRate"),
        id,
    }
}

/// Decode a Firestore typed value into a number. `nullValue` and non-numeric
/// values are absent.
fn decode_number(value: &Value) -> Option<f64> {
    if let Some(d) = value.get("doubleValue") {
        return d.as_f64();
    }
    if let Some(i) = value.get("integerValue") {
        return match i {
            Value::String(s) => s.parse::<i64>().ok().map(|n| n as f64),
            other => other.as_f64(),
        };
    }
    None
}

/// Result of one background fetch.
#[derive(Debug)]
pub struct FetchOutcome {
    pub request_id: u64,
    pub result: Result<Vec<WorkoutRecord>, SyncError>,
}

/// Run `store.fetch_all` on a worker thread and send the outcome to `tx`.
///
/// Fetches are not cancelable; concurrent calls all report back and the
/// receiver applies them in arrival order. `on_done` runs after the send, for
/// example to wake the UI.
pub fn spawn_fetch<S, F>(
    store: S,
    since: Option<DateTime<Local>>,
    request_id: u64,
    tx: Sender<FetchOutcome>,
    on_done: F,
) where
    S: WorkoutStore + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(move || {
        let result = store.fetch_all(since);
        if tx.send(FetchOutcome { request_id, result }).is_err() {
            log::debug!("Fetch {request_id} finished after the receiver closed");
        }
        on_done();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use httpmock::prelude::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const QUERY_PATH: &str = "/projects/demo/databases/(default)/documents:runQuery";

    fn store(server: &MockServer, username: &str) -> FirestoreStore {
        let mut s = FirestoreStore::new("demo", DEFAULT_COLLECTION, username, Some("key".into()));
        s.base_url = server.base_url();
        s
    }

    fn sample_response() -> Value {
        json!([
            {
                "document": {
                    "name": "projects/demo/databases/(default)/documents/workouts/doc2",
                    "fields": {
                        "username": { "stringValue": "sam" },
                        "timestamp": { "timestampValue": "2024-01-03T12:00:00Z" },
                        "elapsedTimeSeconds": { "integerValue": "1800" },
                        "calories": { "integerValue": "200" },
                        "distanceMiles": { "doubleValue": 2.5 },
                        "distanceClimbedFeet": { "nullValue": null },
                        "avgSpeedMph": { "doubleValue": 5.0 },
                        "avgHeartRate": { "integerValue": "141" }
                    }
                },
                "readTime": "2024-01-07T00:00:00Z"
            },
            {
                "document": {
                    "name": "projects/demo/databases/(default)/documents/workouts/doc1",
                    "fields": {
                        "timestamp": { "timestampValue": "2024-01-01T12:00:00Z" },
                        "calories": { "doubleValue": 300.5 }
                    }
                },
                "readTime": "2024-01-07T00:00:00Z"
            }
        ])
    }

    #[test]
    fn parses_documents_in_server_order() {
        let records = parse_query_response(&sample_response());
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.id, "doc2");
        assert_eq!(first.elapsed_time_seconds, Some(1800.0));
        assert_eq!(first.calories, Some(200.0));
        assert_eq!(first.distance_miles, Some(2.5));
        assert_eq!(first.distance_climbed_feet, None);
        assert_eq!(first.avg_pace_seconds_per_mile, None);
        assert_eq!(first.avg_heart_rate, Some(141.0));
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
        );
        assert_eq!(records[1].id, "doc1");
        assert_eq!(records[1].calories, Some(300.5));
        assert_eq!(records[1].elapsed_time_seconds, None);
    }

    #[test]
    fn empty_result_row_is_skipped() {
        let json = json!([{ "readTime": "2024-01-07T00:00:00Z" }]);
        assert!(parse_query_response(&json).is_empty());
    }

    #[test]
    fn missing_timestamp_falls_back_to_now() {
        let before = Local::now();
        let json = json!([{ "document": { "name": "x/y/z", "fields": {} } }]);
        let records = parse_query_response(&json);
        assert_eq!(records[0].id, "z");
        assert!(records[0].timestamp >= before);
    }

    #[test]
    fn fetch_sends_user_filter_and_key() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path(QUERY_PATH)
                .query_param("key", "key")
                .json_body_partial(
                    r#"{"structuredQuery":{"from":[{"collectionId":"workouts"}],"where":{"fieldFilter":{"value":{"stringValue":"sam"}}}}}"#,
                );
            then.status(200).json_body(sample_response());
        });

        let records = store(&server, "sam").fetch_all(None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "doc2");
        m.assert();
    }

    #[test]
    fn since_adds_timestamp_filter() {
        let since = Utc
            .with_ymd_and_hms(2024, 1, 1, 5, 0, 0)
            .unwrap()
            .with_timezone(&Local);
        let body = FirestoreStore::new("demo", "workouts", "sam", None).query_body(Some(since));
        let filters = &body["structuredQuery"]["where"]["compositeFilter"]["filters"];
        assert_eq!(filters.as_array().map(|a| a.len()), Some(2));
        assert_eq!(
            filters[1]["fieldFilter"]["value"]["timestampValue"],
            "2024-01-01T05:00:00Z"
        );
        assert_eq!(
            body["structuredQuery"]["orderBy"][0]["direction"],
            "DESCENDING"
        );
    }

    #[test]
    fn maps_403_to_forbidden() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(403).body("forbidden body");
        });

        let err = store(&server, "sam").fetch_all(None).unwrap_err();
        match err {
            SyncError::Forbidden(body) => assert_eq!(body, "forbidden body"),
            e => panic!("unexpected error: {e:?}"),
        }

        m.assert();
    }

    #[test]
    fn maps_401_to_unauthorized() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(401).body("unauthorized body");
        });

        let err = store(&server, "sam").fetch_all(None).unwrap_err();
        match err {
            SyncError::Unauthorized(body) => assert_eq!(body, "unauthorized body"),
            e => panic!("unexpected error: {e:?}"),
        }

        m.assert();
    }

    #[test]
    fn empty_username_skips_request() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(500);
        });

        let records = store(&server, "").fetch_all(None).unwrap();
        assert!(records.is_empty());
        m.assert_hits(0);
    }

    #[test]
    fn missing_project_is_not_configured() {
        let s = FirestoreStore::new("", "workouts", "sam", None);
        assert!(matches!(s.fetch_all(None), Err(SyncError::NotConfigured(_))));
    }

    #[test]
    fn spawn_fetch_delivers_outcome() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(QUERY_PATH);
            then.status(200).json_body(sample_response());
        });

        let (tx, rx) = channel();
        spawn_fetch(store(&server, "sam"), None, 7, tx, || {});
        let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(outcome.request_id, 7);
        let records = outcome.result.unwrap();
        assert_eq!(
            records[1].timestamp.with_timezone(&Utc).date_naive(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn env_var_overrides_settings_key() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var("FIREBASE_API_KEY", "forced");
        }

        let key = resolve_api_key(Some("settings_key"));
        assert_eq!(key.as_deref(), Some("forced"));

        // Ensure the selected key is sent in the request
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(POST)
                .path(QUERY_PATH)
                .query_param("key", "forced");
            then.status(200).body("[]");
        });

        let mut s = store(&server, "sam");
        s.api_key = key;
        s.fetch_all(None).unwrap();

        m.assert();

        unsafe {
            std::env::remove_var("FIREBASE_API_KEY");
        }
        assert_eq!(
            resolve_api_key(Some("settings_key")).as_deref(),
            Some("settings_key")
        );
        assert_eq!(resolve_api_key(Some("")), None);
    }
}
