//! Parser for the engine's line-oriented event log (one JSON listener event
//! per line). Produces a normalized, write-once summary of application and
//! shuffle timing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to read event log {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed event log {} at line {line}: {source}", .path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("event log {} contains no application start event", .path.display())]
    MissingApplicationStart { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_id: i64,
    pub name: Option<String>,
    pub submission_time_ms: Option<i64>,
    pub completion_time_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub num_tasks: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogSummary {
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub app_start_ts_ms: Option<i64>,
    pub app_end_ts_ms: Option<i64>,
    pub app_duration_ms: Option<i64>,
    pub tasks_total: u64,
    pub tasks_failed: u64,
    pub executor_run_time_ms_sum: i64,
    pub jvm_gc_time_ms_sum: i64,
    pub shuffle_write_bytes_sum: i64,
    pub shuffle_write_records_sum: i64,
    pub shuffle_write_time_ns_sum: i64,
    pub shuffle_read_remote_bytes_sum: i64,
    pub shuffle_read_local_bytes_sum: i64,
    pub shuffle_read_bytes_sum: i64,
    pub shuffle_read_records_sum: i64,
    pub shuffle_read_fetch_wait_ms_sum: i64,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Default)]
struct StageAcc {
    name: Option<String>,
    submission_time_ms: Option<i64>,
    completion_time_ms: Option<i64>,
    num_tasks: Option<i64>,
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn as_str(value: Option<&Value>) -> Option<String> {
    value.and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Parse one event log into a summary. Blank lines are tolerated; a line
/// that is not valid JSON fails the whole parse, as does a log with no
/// application start event.
pub fn parse_eventlog(path: &Path) -> Result<EventLogSummary, EventLogError> {
    let data = fs::read_to_string(path).map_err(|source| EventLogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut summary = EventLogSummary::default();
    let mut saw_app_start = false;
    let mut stages: BTreeMap<i64, StageAcc> = BTreeMap::new();

    for (idx, raw) in data.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let evt: Value = serde_json::from_str(line).map_err(|source| EventLogError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;

        match evt.get("Event").and_then(|v| v.as_str()) {
            Some("SparkListenerApplicationStart") => {
                saw_app_start = true;
                if let Some(ts) = as_i64(evt.get("Timestamp")) {
                    summary.app_start_ts_ms = Some(ts);
                }
                if let Some(id) = as_str(evt.get("App ID")) {
                    summary.app_id = Some(id);
                }
                if let Some(name) = as_str(evt.get("App Name")) {
                    summary.app_name = Some(name);
                }
            }
            Some("SparkListenerApplicationEnd") => {
                if let Some(ts) = as_i64(evt.get("Timestamp")) {
                    summary.app_end_ts_ms = Some(ts);
                }
            }
            Some("SparkListenerStageSubmitted") => {
                let info = evt.get("Stage Info");
                if let Some(sid) = as_i64(info.and_then(|i| i.get("Stage ID"))) {
                    let acc = stages.entry(sid).or_default();
                    if let Some(name) = as_str(info.and_then(|i| i.get("Stage Name"))) {
                        acc.name = Some(name);
                    }
                    if let Some(ts) = as_i64(info.and_then(|i| i.get("Submission Time"))) {
                        acc.submission_time_ms = Some(ts);
                    }
                }
            }
            Some("SparkListenerStageCompleted") => {
                let info = evt.get("Stage Info");
                if let Some(sid) = as_i64(info.and_then(|i| i.get("Stage ID"))) {
                    let acc = stages.entry(sid).or_default();
                    if let Some(name) = as_str(info.and_then(|i| i.get("Stage Name"))) {
                        acc.name = Some(name);
                    }
                    if let Some(ts) = as_i64(info.and_then(|i| i.get("Completion Time"))) {
                        acc.completion_time_ms = Some(ts);
                    }
                    if let Some(n) = as_i64(info.and_then(|i| i.get("Number of Tasks"))) {
                        acc.num_tasks = Some(n);
                    }
                }
            }
            Some("SparkListenerTaskEnd") => {
                summary.tasks_total += 1;
                let reason = evt.get("Task End Reason").and_then(|r| r.get("Reason"));
                if let Some(r) = reason.and_then(|v| v.as_str()) {
                    if r != "Success" {
                        summary.tasks_failed += 1;
                    }
                }

                let metrics = evt.get("Task Metrics");
                summary.executor_run_time_ms_sum +=
                    as_i64(metrics.and_then(|m| m.get("Executor Run Time"))).unwrap_or(0);
                summary.jvm_gc_time_ms_sum +=
                    as_i64(metrics.and_then(|m| m.get("JVM GC Time"))).unwrap_or(0);

                let sw = metrics.and_then(|m| m.get("Shuffle Write Metrics"));
                summary.shuffle_write_bytes_sum +=
                    as_i64(sw.and_then(|m| m.get("Shuffle Bytes Written"))).unwrap_or(0);
                summary.shuffle_write_records_sum +=
                    as_i64(sw.and_then(|m| m.get("Shuffle Records Written"))).unwrap_or(0);
                summary.shuffle_write_time_ns_sum +=
                    as_i64(sw.and_then(|m| m.get("Shuffle Write Time"))).unwrap_or(0);

                let sr = metrics.and_then(|m| m.get("Shuffle Read Metrics"));
                summary.shuffle_read_remote_bytes_sum +=
                    as_i64(sr.and_then(|m| m.get("Remote Bytes Read"))).unwrap_or(0);
                summary.shuffle_read_local_bytes_sum +=
                    as_i64(sr.and_then(|m| m.get("Local Bytes Read"))).unwrap_or(0);
                summary.shuffle_read_records_sum +=
                    as_i64(sr.and_then(|m| m.get("Records Read"))).unwrap_or(0);
                summary.shuffle_read_fetch_wait_ms_sum +=
                    as_i64(sr.and_then(|m| m.get("Fetch Wait Time"))).unwrap_or(0);
            }
            _ => {}
        }
    }

    if !saw_app_start {
        return Err(EventLogError::MissingApplicationStart {
            path: path.to_path_buf(),
        });
    }

    summary.shuffle_read_bytes_sum =
        summary.shuffle_read_remote_bytes_sum + summary.shuffle_read_local_bytes_sum;
    if let (Some(start), Some(end)) = (summary.app_start_ts_ms, summary.app_end_ts_ms) {
        if end >= start {
            summary.app_duration_ms = Some(end - start);
        }
    }

    summary.stages = stages
        .into_iter()
        .map(|(stage_id, acc)| {
            let duration_ms = match (acc.submission_time_ms, acc.completion_time_ms) {
                (Some(sub), Some(comp)) if comp >= sub => Some(comp - sub),
                _ => None,
            };
            StageSummary {
                stage_id,
                name: acc.name,
                submission_time_ms: acc.submission_time_ms,
                completion_time_ms: acc.completion_time_ms,
                duration_ms,
                num_tasks: acc.num_tasks,
            }
        })
        .collect();

    Ok(summary)
}

/// Pick the event log to summarize from the engine's event-log directory:
/// completed logs win over `*.inprogress`, newest mtime breaks ties.
pub fn find_latest_eventlog(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut finished: Vec<PathBuf> = Vec::new();
    let mut inprogress: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".inprogress") {
            inprogress.push(path);
        } else {
            finished.push(path);
        }
    }
    newest(finished).or_else(|| newest(inprogress))
}

fn newest(mut candidates: Vec<PathBuf>) -> Option<PathBuf> {
    if candidates.len() <= 1 {
        return candidates.pop();
    }
    candidates
        .into_iter()
        .max_by_key(|p| p.metadata().and_then(|m| m.modified()).ok())
}
