//! JSON output envelope for the CLI.
//!
//! All stdout output is JSON only; tracing logs go to stderr. Every response
//! carries `schema_version`, `ok` and `type` so callers can dispatch without
//! guessing.

use serde::Serialize;

use crate::job::JobSnapshot;

pub const SCHEMA_VERSION: &str = "0.1";

/// Serialize `value` to a single JSON line on stdout. This is the one place stdout
/// is written, keeping the stdout-is-JSON-only contract in one spot.
fn print_json_to_stdout(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).expect("JSON serialization failed")
    );
}

/// Top-level envelope used for every successful response.
#[derive(Debug, Serialize)]
pub struct Response<T: Serialize> {
    pub schema_version: &'static str,
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Response<T> {
    pub fn new(kind: &'static str, data: T) -> Self {
        Response {
            schema_version: SCHEMA_VERSION,
            ok: true,
            kind,
            data,
        }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

/// Top-level envelope for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub schema_version: &'static str,
    pub ok: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    /// Whether retrying the same invocation could succeed. `false` for
    /// permanent failures such as an invalid preset.
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        ErrorResponse {
            schema_version: SCHEMA_VERSION,
            ok: false,
            kind: "error",
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                retryable,
            },
        }
    }

    pub fn print(&self) {
        print_json_to_stdout(self);
    }
}

// ---------- Command-specific response payloads ----------

/// One job in the `run` summary.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub uuid: String,
    pub task: String,
    pub name: String,
    pub filename: String,
    pub status: String,
    pub priority: i32,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependson: Option<String>,
    pub log: String,
}

impl From<JobSnapshot> for JobReport {
    fn from(snapshot: JobSnapshot) -> Self {
        JobReport {
            uuid: snapshot.uuid.to_string(),
            task: snapshot.task_id,
            name: snapshot.name,
            filename: snapshot.filename,
            status: snapshot.status.as_str().to_string(),
            priority: snapshot.priority,
            created_at: snapshot.created_at,
            dependson: snapshot.dependson.map(|d| d.to_string()),
            log: snapshot.log,
        }
    }
}

/// Response for the `run` command.
#[derive(Debug, Serialize)]
pub struct RunData {
    pub preset: String,
    pub submitted: usize,
    pub jobs: Vec<JobReport>,
}

/// Response for the `check` command.
#[derive(Debug, Serialize)]
pub struct CheckData {
    pub preset: String,
    pub name: String,
    pub tasks: usize,
}

/// One entry in the `presets` listing.
#[derive(Debug, Serialize)]
pub struct PresetSummary {
    pub file: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for the `presets` command.
#[derive(Debug, Serialize)]
pub struct PresetsData {
    pub dir: String,
    pub presets: Vec<PresetSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_flattens_payload() {
        let response = Response::new(
            "check",
            CheckData {
                preset: "p.json".into(),
                name: "Proxies".into(),
                tasks: 2,
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["schema_version"], "0.1");
        assert_eq!(json["ok"], true);
        assert_eq!(json["type"], "check");
        assert_eq!(json["name"], "Proxies");
        assert_eq!(json["tasks"], 2);
    }

    #[test]
    fn error_envelope_has_code_message_retryable() {
        let response = ErrorResponse::new("preset_invalid", "missing id", false);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["code"], "preset_invalid");
        assert_eq!(json["error"]["retryable"], false);
    }

    #[test]
    fn job_report_from_snapshot() {
        let job = crate::job::Job::new();
        job.set_task_id("prores");
        job.set_name("ProRes proxy");
        let report = JobReport::from(job.snapshot());
        assert_eq!(report.task, "prores");
        assert_eq!(report.status, "Waiting");
        assert!(report.dependson.is_none());
    }
}
