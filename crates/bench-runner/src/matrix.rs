//! Ablation/sensitivity matrix execution: cross product of
//! {variant | sweep value} x {repeat}, one blocking submission per
//! combination, one run record per attempt, one CSV row per run.

use crate::cluster::ClusterControl;
use crate::submit::submit_groupby;
use crate::variants::{registry, resolve_variants, Sweep, BASELINE_VARIANT};
use anyhow::{anyhow, Result};
use bench_core::{
    atomic_write_json_pretty, ensure_dir, rewrite_kv_conf, timestamp_id, BenchEnv,
};
use bench_eventlog::{find_latest_eventlog, parse_eventlog, EventLogSummary};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const ABLATION_HEADER: [&str; 9] = [
    "variant",
    "repeat",
    "exit_code",
    "submit_elapsed_s",
    "app_duration_ms",
    "shuffle_write_bytes",
    "shuffle_read_bytes",
    "eventlog",
    "notes",
];

const SENSITIVITY_HEADER: [&str; 9] = [
    "sweep",
    "value",
    "repeat",
    "exit_code",
    "submit_elapsed_s",
    "app_duration_ms",
    "shuffle_write_bytes",
    "shuffle_read_bytes",
    "eventlog",
];

#[derive(Debug, Clone)]
pub struct MatrixOptions {
    /// Results root; defaults to a timestamped directory under the
    /// environment's results root.
    pub out: Option<PathBuf>,
    pub repeats: usize,
    pub restart_cluster: bool,
    pub workload_args: Vec<String>,
}

impl Default for MatrixOptions {
    fn default() -> Self {
        Self {
            out: None,
            repeats: 3,
            restart_cluster: true,
            workload_args: crate::variants::DEFAULT_WORKLOAD_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct MatrixOutcome {
    pub results_root: PathBuf,
    pub csv_path: PathBuf,
    pub runs: usize,
    pub failed_runs: usize,
}

/// One execution attempt: finalized when the subprocess exits, never
/// mutated afterwards. The CSV is re-derivable from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub sweep: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub repeat: usize,
    pub run_dir: String,
    pub submit_cmd: Vec<String>,
    pub spark_submit_extra_args: String,
    pub scache_conf_dir: String,
    /// Daemon conf keys rewritten into the overlay for this run (sweeps
    /// only; empty for ablation variants, which use their dir as-is).
    #[serde(default)]
    pub scache_conf_updates: BTreeMap<String, String>,
    pub restart_cluster: bool,
    pub exit_code: i32,
    pub submit_elapsed_s: f64,
    #[serde(default)]
    pub eventlog: Option<String>,
    #[serde(default)]
    pub eventlog_error: Option<String>,
    #[serde(default)]
    pub eventlog_summary: Option<EventLogSummary>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: String,
}

pub fn run_ablation(
    env: &BenchEnv,
    requested: &[String],
    opts: &MatrixOptions,
) -> Result<MatrixOutcome> {
    let variants = resolve_variants(&env.conf_root, requested)?;
    let results_root = resolve_results_root(env, opts)?;
    let csv_path = results_root.join("ablation.csv");
    let control = ClusterControl::from_env(env);

    let mut runs = 0usize;
    let mut failed_runs = 0usize;
    for variant in &variants {
        let variant_dir = results_root.join("ablation").join(&variant.name);
        ensure_dir(&variant_dir)?;

        if opts.restart_cluster {
            control.stop(&variant.scache_conf_dir, &variant_dir, "cluster-stop")?;
            control.start(&variant.scache_conf_dir, &variant_dir, "cluster-start")?;
        }

        for repeat in 0..opts.repeats {
            let run_dir = next_run_dir(&variant_dir)?;
            tracing::info!(
                variant = %variant.name,
                repeat,
                run_dir = %run_dir.display(),
                "submitting"
            );
            let outcome = execute_run(
                env,
                &format!("ablation-{}", variant.name),
                &variant.spark_conf_overrides,
                &opts.workload_args,
                &run_dir,
            )?;
            runs += 1;
            if outcome.exit_code != 0 {
                failed_runs += 1;
            }
            let record = RunRecord {
                variant: Some(variant.name.clone()),
                sweep: None,
                value: None,
                repeat,
                run_dir: run_dir.to_string_lossy().to_string(),
                submit_cmd: outcome.submit_cmd,
                spark_submit_extra_args: outcome.extra_args,
                scache_conf_dir: variant.scache_conf_dir.to_string_lossy().to_string(),
                scache_conf_updates: BTreeMap::new(),
                restart_cluster: opts.restart_cluster,
                exit_code: outcome.exit_code,
                submit_elapsed_s: outcome.elapsed_s,
                eventlog: outcome.eventlog.map(|p| p.to_string_lossy().to_string()),
                eventlog_error: outcome.eventlog_error,
                eventlog_summary: outcome.summary,
                notes: Some(variant.notes.clone()),
                created_at: Utc::now().to_rfc3339(),
            };
            atomic_write_json_pretty(&run_dir.join("run.json"), &serde_json::to_value(&record)?)?;
            append_csv_row(&csv_path, &ABLATION_HEADER, &ablation_fields(&record))?;
        }
    }

    Ok(MatrixOutcome {
        results_root,
        csv_path,
        runs,
        failed_runs,
    })
}

pub fn run_sensitivity(
    env: &BenchEnv,
    sweep: Sweep,
    values: &[String],
    opts: &MatrixOptions,
) -> Result<MatrixOutcome> {
    if values.is_empty() {
        return Err(anyhow!("empty_sweep_values: {}", sweep.as_str()));
    }
    let base = registry(&env.conf_root)
        .remove(BASELINE_VARIANT)
        .ok_or_else(|| anyhow!("unknown_variant: {}", BASELINE_VARIANT))?;
    let base_conf = base.scache_conf_dir.join("scache.conf");
    let needs_conf = values
        .iter()
        .any(|v| !sweep.conf_updates(v).is_empty());
    if needs_conf && !base_conf.is_file() {
        return Err(anyhow!("missing_base_conf: {}", base_conf.display()));
    }

    let results_root = resolve_results_root(env, opts)?;
    let sweep_root = results_root.join(format!("sensitivity-{}", sweep.as_str()));
    ensure_dir(&sweep_root)?;
    let csv_path = sweep_root.join("sensitivity.csv");
    let control = ClusterControl::from_env(env);

    let mut runs = 0usize;
    let mut failed_runs = 0usize;
    for value in values {
        let updates = sweep.conf_updates(value);
        let workload_args = sweep.apply_workload_args(value, &opts.workload_args)?;

        let conf_dir = if updates.is_empty() {
            base.scache_conf_dir.clone()
        } else {
            let generated = sweep_root.join("generated-conf").join(value);
            ensure_dir(&generated)?;
            rewrite_kv_conf(&base_conf, &generated.join("scache.conf"), &updates)?;
            let base_slaves = base.scache_conf_dir.join("slaves");
            if base_slaves.is_file() {
                fs::copy(&base_slaves, generated.join("slaves"))?;
            }
            generated
        };

        if opts.restart_cluster {
            control.stop(&conf_dir, &sweep_root, &format!("cluster-stop.{}", value))?;
            control.start(&conf_dir, &sweep_root, &format!("cluster-start.{}", value))?;
        }

        let value_dir = sweep_root.join("runs").join(value);
        ensure_dir(&value_dir)?;
        for repeat in 0..opts.repeats {
            let run_dir = next_run_dir(&value_dir)?;
            tracing::info!(
                sweep = sweep.as_str(),
                value = %value,
                repeat,
                run_dir = %run_dir.display(),
                "submitting"
            );
            let outcome = execute_run(
                env,
                &format!("sensitivity-{}-{}", sweep.as_str(), value),
                &BTreeMap::new(),
                &workload_args,
                &run_dir,
            )?;
            runs += 1;
            if outcome.exit_code != 0 {
                failed_runs += 1;
            }
            let record = RunRecord {
                variant: None,
                sweep: Some(sweep.as_str().to_string()),
                value: Some(value.clone()),
                repeat,
                run_dir: run_dir.to_string_lossy().to_string(),
                submit_cmd: outcome.submit_cmd,
                spark_submit_extra_args: outcome.extra_args,
                scache_conf_dir: conf_dir.to_string_lossy().to_string(),
                scache_conf_updates: updates.clone(),
                restart_cluster: opts.restart_cluster,
                exit_code: outcome.exit_code,
                submit_elapsed_s: outcome.elapsed_s,
                eventlog: outcome.eventlog.map(|p| p.to_string_lossy().to_string()),
                eventlog_error: outcome.eventlog_error,
                eventlog_summary: outcome.summary,
                notes: None,
                created_at: Utc::now().to_rfc3339(),
            };
            atomic_write_json_pretty(&run_dir.join("run.json"), &serde_json::to_value(&record)?)?;
            append_csv_row(&csv_path, &SENSITIVITY_HEADER, &sensitivity_fields(&record))?;
        }
    }

    Ok(MatrixOutcome {
        results_root,
        csv_path,
        runs,
        failed_runs,
    })
}

struct RunOutcome {
    exit_code: i32,
    elapsed_s: f64,
    submit_cmd: Vec<String>,
    extra_args: String,
    eventlog: Option<PathBuf>,
    eventlog_error: Option<String>,
    summary: Option<EventLogSummary>,
}

fn execute_run(
    env: &BenchEnv,
    app_name: &str,
    extra_overrides: &BTreeMap<String, String>,
    workload_args: &[String],
    run_dir: &Path,
) -> Result<RunOutcome> {
    let eventlog_dir = run_dir.join("spark-events");
    ensure_dir(&eventlog_dir)?;

    let mut overrides = BTreeMap::new();
    overrides.insert("spark.app.name".to_string(), app_name.to_string());
    overrides.insert("spark.eventLog.enabled".to_string(), "true".to_string());
    overrides.insert(
        "spark.eventLog.dir".to_string(),
        format!("file://{}", eventlog_dir.display()),
    );
    overrides.insert("spark.eventLog.compress".to_string(), "false".to_string());
    for (k, v) in extra_overrides {
        overrides.insert(k.clone(), v.clone());
    }

    let submission = submit_groupby(env, workload_args, &overrides, run_dir)?;

    let eventlog = find_latest_eventlog(&eventlog_dir);
    let (summary, eventlog_error) = match &eventlog {
        Some(path) => match parse_eventlog(path) {
            Ok(summary) => {
                atomic_write_json_pretty(
                    &run_dir.join("eventlog.summary.json"),
                    &serde_json::to_value(&summary)?,
                )?;
                (Some(summary), None)
            }
            Err(e) => {
                tracing::warn!(eventlog = %path.display(), error = %e, "event log did not parse");
                (None, Some(e.to_string()))
            }
        },
        None => (None, None),
    };

    Ok(RunOutcome {
        exit_code: submission.result.exit_code,
        elapsed_s: submission.result.elapsed_s,
        submit_cmd: submission.submit_cmd,
        extra_args: submission.extra_args,
        eventlog,
        eventlog_error,
        summary,
    })
}

fn resolve_results_root(env: &BenchEnv, opts: &MatrixOptions) -> Result<PathBuf> {
    let root = opts
        .out
        .clone()
        .unwrap_or_else(|| env.results_root.join(timestamp_id()));
    ensure_dir(&root)?;
    Ok(root)
}

/// First unused `run-NNN` under `parent`; existing attempts are never reused,
/// so re-running a matrix into the same root cannot overwrite anything.
fn next_run_dir(parent: &Path) -> Result<PathBuf> {
    ensure_dir(parent)?;
    let mut next = 0usize;
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(idx) = name
            .to_str()
            .and_then(|n| n.strip_prefix("run-"))
            .and_then(|n| n.parse::<usize>().ok())
        {
            next = next.max(idx + 1);
        }
    }
    let run_dir = parent.join(format!("run-{:03}", next));
    ensure_dir(&run_dir)?;
    Ok(run_dir)
}

fn metric_i64(summary: Option<&EventLogSummary>, pick: impl Fn(&EventLogSummary) -> Option<i64>) -> String {
    summary.and_then(pick).map(|v| v.to_string()).unwrap_or_default()
}

fn ablation_fields(record: &RunRecord) -> Vec<String> {
    let summary = record.eventlog_summary.as_ref();
    vec![
        record.variant.clone().unwrap_or_default(),
        record.repeat.to_string(),
        record.exit_code.to_string(),
        format!("{:.3}", record.submit_elapsed_s),
        metric_i64(summary, |s| s.app_duration_ms),
        metric_i64(summary, |s| Some(s.shuffle_write_bytes_sum)),
        metric_i64(summary, |s| Some(s.shuffle_read_bytes_sum)),
        record.eventlog.clone().unwrap_or_default(),
        record.notes.clone().unwrap_or_default(),
    ]
}

fn sensitivity_fields(record: &RunRecord) -> Vec<String> {
    let summary = record.eventlog_summary.as_ref();
    vec![
        record.sweep.clone().unwrap_or_default(),
        record.value.clone().unwrap_or_default(),
        record.repeat.to_string(),
        record.exit_code.to_string(),
        format!("{:.3}", record.submit_elapsed_s),
        metric_i64(summary, |s| s.app_duration_ms),
        metric_i64(summary, |s| Some(s.shuffle_write_bytes_sum)),
        metric_i64(summary, |s| Some(s.shuffle_read_bytes_sum)),
        record.eventlog.clone().unwrap_or_default(),
    ]
}

fn append_csv_row(csv_path: &Path, header: &[&str], fields: &[String]) -> Result<()> {
    if let Some(parent) = csv_path.parent() {
        ensure_dir(parent)?;
    }
    let exists = csv_path.exists();
    let file = fs::OpenOptions::new().create(true).append(true).open(csv_path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if !exists {
        writer.write_record(header)?;
    }
    writer.write_record(fields)?;
    writer.flush()?;
    Ok(())
}

/// Regenerate the matrix CSVs purely from the per-run `run.json` artifacts.
/// Rows are emitted in path order, which is stable across rebuilds.
pub fn rebuild_matrix_csv(results_root: &Path) -> Result<Vec<(PathBuf, usize)>> {
    let mut ablation: Vec<RunRecord> = Vec::new();
    let mut by_sweep: BTreeMap<String, Vec<RunRecord>> = BTreeMap::new();

    for entry in WalkDir::new(results_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != "run.json" {
            continue;
        }
        let record: RunRecord = serde_json::from_slice(&fs::read(entry.path())?)
            .map_err(|e| anyhow!("invalid_run_record: {}: {}", entry.path().display(), e))?;
        match (&record.variant, &record.sweep) {
            (Some(_), _) => ablation.push(record),
            (None, Some(sweep)) => by_sweep.entry(sweep.clone()).or_default().push(record),
            (None, None) => {
                return Err(anyhow!(
                    "invalid_run_record: {}: neither variant nor sweep",
                    entry.path().display()
                ))
            }
        }
    }

    let mut written = Vec::new();
    if !ablation.is_empty() {
        let csv_path = results_root.join("ablation.csv");
        write_csv(&csv_path, &ABLATION_HEADER, ablation.iter().map(ablation_fields))?;
        written.push((csv_path, ablation.len()));
    }
    for (sweep, records) in &by_sweep {
        let csv_path = results_root
            .join(format!("sensitivity-{}", sweep))
            .join("sensitivity.csv");
        write_csv(
            &csv_path,
            &SENSITIVITY_HEADER,
            records.iter().map(sensitivity_fields),
        )?;
        written.push((csv_path, records.len()));
    }
    Ok(written)
}

fn write_csv(
    csv_path: &Path,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<()> {
    if let Some(parent) = csv_path.parent() {
        ensure_dir(parent)?;
    }
    let file = fs::File::create(csv_path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SPAWN_FAILURE_CODE;
    use bench_core::parse_kv_conf;
    use std::os::unix::fs::PermissionsExt;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "usbench_matrix_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).expect("script");
        let mut perms = fs::metadata(path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("chmod");
    }

    /// Submit stub: recover the event-log dir from the extra-args token and
    /// drop a minimal completed event log there.
    const EVENTLOG_WRITER: &str = r#"dir=$(printf %s "$SPARK_SUBMIT_EXTRA_ARGS" | tr ' ' '\n' | sed -n 's,^spark.eventLog.dir=file://,,p')
mkdir -p "$dir"
printf '%s\n%s\n' '{"Event":"SparkListenerApplicationStart","App ID":"app-1","App Name":"t","Timestamp":1000}' '{"Event":"SparkListenerApplicationEnd","Timestamp":3000}' > "$dir/app-1"
exit 0"#;

    fn fake_env(root: &Path, submit_body: &str) -> BenchEnv {
        let start = root.join("start.sh");
        let stop = root.join("stop.sh");
        let submit = root.join("submit.sh");
        write_script(&start, "exit 0");
        write_script(&stop, "exit 0");
        write_script(&submit, submit_body);
        ensure_dir(&root.join("spark")).expect("spark");
        BenchEnv {
            root: root.to_path_buf(),
            spark_home: root.join("spark"),
            hibench_home: None,
            start_script: start,
            stop_script: stop,
            submit_script: submit,
            conf_root: root.join("conf"),
            results_root: root.join("results"),
            tpcds_runner: None,
            tpcds_query_dir: None,
            nodes: 1,
            node_start_script: None,
        }
    }

    fn opts(out: &Path, repeats: usize) -> MatrixOptions {
        MatrixOptions {
            out: Some(out.to_path_buf()),
            repeats,
            restart_cluster: false,
            ..MatrixOptions::default()
        }
    }

    #[test]
    fn sweep_produces_values_times_repeats_unique_run_dirs() {
        let root = temp_root("cross");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let out = root.join("out");
        let values = vec!["100000".to_string(), "200000".to_string()];

        let outcome =
            run_sensitivity(&env, Sweep::WorkingSetFit, &values, &opts(&out, 2)).expect("run");
        assert_eq!(outcome.runs, 4);
        assert_eq!(outcome.failed_runs, 0);

        let sweep_root = out.join("sensitivity-working-set-fit");
        let mut run_dirs = Vec::new();
        for value in &values {
            for rep in 0..2 {
                let dir = sweep_root
                    .join("runs")
                    .join(value)
                    .join(format!("run-{:03}", rep));
                assert!(dir.is_dir(), "missing {}", dir.display());
                assert!(dir.join("run.json").is_file());
                assert!(dir.join("eventlog.summary.json").is_file());
                run_dirs.push(dir);
            }
        }
        run_dirs.sort();
        run_dirs.dedup();
        assert_eq!(run_dirs.len(), 4);

        let record: RunRecord = serde_json::from_slice(
            &fs::read(sweep_root.join("runs/100000/run-000/run.json")).expect("read"),
        )
        .expect("record");
        assert_eq!(record.value.as_deref(), Some("100000"));
        assert_eq!(record.exit_code, 0);
        assert_eq!(
            record.eventlog_summary.as_ref().and_then(|s| s.app_duration_ms),
            Some(2000)
        );
        // working-set-fit rewrites numKVPairs in the forwarded args.
        assert_eq!(record.submit_cmd[2], "100000");

        let csv = fs::read_to_string(&outcome.csv_path).expect("csv");
        assert_eq!(csv.lines().count(), 5, "header + 4 rows: {}", csv);
        assert!(csv.lines().next().unwrap().starts_with("sweep,value,repeat"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn rerunning_into_the_same_root_never_overwrites() {
        let root = temp_root("rerun");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let out = root.join("out");
        let values = vec!["100000".to_string()];
        let o = opts(&out, 1);

        run_sensitivity(&env, Sweep::WorkingSetFit, &values, &o).expect("first");
        let first_record =
            fs::read(out.join("sensitivity-working-set-fit/runs/100000/run-000/run.json"))
                .expect("first record");
        run_sensitivity(&env, Sweep::WorkingSetFit, &values, &o).expect("second");

        let value_dir = out.join("sensitivity-working-set-fit/runs/100000");
        assert!(value_dir.join("run-000").is_dir());
        assert!(value_dir.join("run-001").is_dir());
        let reread = fs::read(value_dir.join("run-000/run.json")).expect("reread");
        assert_eq!(first_record, reread, "prior artifacts were touched");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn failed_submission_is_a_row_not_an_abort() {
        let root = temp_root("failrow");
        let mut env = fake_env(&root, EVENTLOG_WRITER);
        env.submit_script = root.join("no-such-submit.sh");
        let out = root.join("out");
        let requested = vec![
            "ultrashuffle-full".to_string(),
            "no-remote-cache".to_string(),
        ];

        let outcome = run_ablation(&env, &requested, &opts(&out, 1)).expect("matrix completes");
        assert_eq!(outcome.runs, 2);
        assert_eq!(outcome.failed_runs, 2);

        for name in &requested {
            let record: RunRecord = serde_json::from_slice(
                &fs::read(out.join("ablation").join(name).join("run-000/run.json"))
                    .expect("record"),
            )
            .expect("parse record");
            assert_eq!(record.exit_code, SPAWN_FAILURE_CODE);
            assert_eq!(record.eventlog, None);
        }
        let csv = fs::read_to_string(&outcome.csv_path).expect("csv");
        assert_eq!(csv.lines().count(), 3, "header + 2 rows: {}", csv);
        let _ = fs::remove_dir_all(root);
    }

    /// Submit stub that leaves an event log no parser will accept.
    const MALFORMED_EVENTLOG_WRITER: &str = r#"dir=$(printf %s "$SPARK_SUBMIT_EXTRA_ARGS" | tr ' ' '\n' | sed -n 's,^spark.eventLog.dir=file://,,p')
mkdir -p "$dir"
printf '%s\n%s\n' '{"Event":"SparkListenerApplicationStart","App ID":"app-1","App Name":"t","Timestamp":1000}' '{truncated' > "$dir/app-1"
exit 0"#;

    #[test]
    fn unparseable_event_log_is_recorded_not_dropped() {
        let root = temp_root("badlog");
        let env = fake_env(&root, MALFORMED_EVENTLOG_WRITER);
        let out = root.join("out");

        let outcome = run_ablation(
            &env,
            &["ultrashuffle-full".to_string()],
            &opts(&out, 2),
        )
        .expect("matrix completes");
        assert_eq!(outcome.runs, 2, "parse failure must not stop the matrix");
        assert_eq!(outcome.failed_runs, 0, "the submission itself succeeded");

        let variant_dir = out.join("ablation/ultrashuffle-full");
        for rep in 0..2 {
            let run_dir = variant_dir.join(format!("run-{:03}", rep));
            let record: RunRecord =
                serde_json::from_slice(&fs::read(run_dir.join("run.json")).expect("record"))
                    .expect("parse record");
            assert_eq!(record.exit_code, 0);
            assert!(record.eventlog.is_some(), "log path still recorded");
            let err = record.eventlog_error.expect("parse failure recorded");
            assert!(err.contains("line 2"), "got: {}", err);
            assert!(record.eventlog_summary.is_none());
            assert!(!run_dir.join("eventlog.summary.json").exists());
        }

        let csv = fs::read_to_string(&outcome.csv_path).expect("csv");
        let row = csv.lines().nth(1).expect("first data row");
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields.len(), 9, "got: {}", row);
        assert_eq!(fields[4], "", "app_duration_ms must stay empty");
        assert_eq!(fields[5], "", "shuffle_write_bytes must stay empty");
        assert_eq!(fields[6], "", "shuffle_read_bytes must stay empty");
        assert_ne!(fields[7], "", "eventlog path column still set");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_variant_fails_before_any_run() {
        let root = temp_root("unknown");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let out = root.join("out");
        let err = run_ablation(&env, &["typo-variant".to_string()], &opts(&out, 1))
            .expect_err("should fail");
        assert!(err.to_string().contains("unknown_variant"), "got: {}", err);
        assert!(!out.join("ablation").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn capacity_sweep_materializes_overlay_with_slaves() {
        let root = temp_root("overlay");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let base = env.conf_root.join("ultrashuffle-full");
        ensure_dir(&base).expect("base conf dir");
        fs::write(
            base.join("scache.conf"),
            "# pool sizing\nscache.memory.offHeap.size = 256m\n",
        )
        .expect("base conf");
        fs::write(base.join("slaves"), "node-1\nnode-2\n").expect("slaves");

        let out = root.join("out");
        run_sensitivity(
            &env,
            Sweep::CxlCapacity,
            &["512m".to_string()],
            &opts(&out, 1),
        )
        .expect("run");

        let generated = out.join("sensitivity-cxl-capacity/generated-conf/512m");
        let parsed = parse_kv_conf(&generated.join("scache.conf")).expect("parse overlay");
        assert_eq!(
            parsed.get("scache.memory.offHeap.size").map(String::as_str),
            Some("512m")
        );
        assert_eq!(
            parsed
                .get("scache.storage.cxl.shared.pool.size")
                .map(String::as_str),
            Some("512m")
        );
        assert_eq!(
            fs::read_to_string(generated.join("slaves")).expect("slaves copy"),
            "node-1\nnode-2\n"
        );

        // The run record keeps the applied rewrites, so a rebuilt record
        // still says which keys this value changed.
        let record: RunRecord = serde_json::from_slice(
            &fs::read(out.join("sensitivity-cxl-capacity/runs/512m/run-000/run.json"))
                .expect("record"),
        )
        .expect("parse record");
        assert_eq!(
            record
                .scache_conf_updates
                .get("scache.memory.offHeap.size")
                .map(String::as_str),
            Some("512m")
        );
        assert_eq!(record.scache_conf_updates.len(), 2);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn capacity_sweep_without_base_conf_is_fatal() {
        let root = temp_root("nobase");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let out = root.join("out");
        let err = run_sensitivity(
            &env,
            Sweep::CxlCapacity,
            &["512m".to_string()],
            &opts(&out, 1),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("missing_base_conf"), "got: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn csv_is_rebuildable_from_run_records() {
        let root = temp_root("rebuild");
        let env = fake_env(&root, EVENTLOG_WRITER);
        let out = root.join("out");
        let values = vec!["100000".to_string(), "200000".to_string()];
        let outcome =
            run_sensitivity(&env, Sweep::WorkingSetFit, &values, &opts(&out, 2)).expect("run");
        let original = fs::read_to_string(&outcome.csv_path).expect("csv");

        fs::remove_file(&outcome.csv_path).expect("drop csv");
        let written = rebuild_matrix_csv(&out).expect("rebuild");
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, outcome.csv_path);
        assert_eq!(written[0].1, 4);

        let rebuilt = fs::read_to_string(&outcome.csv_path).expect("rebuilt csv");
        let mut original_rows: Vec<&str> = original.lines().collect();
        let mut rebuilt_rows: Vec<&str> = rebuilt.lines().collect();
        original_rows.sort_unstable();
        rebuilt_rows.sort_unstable();
        assert_eq!(original_rows, rebuilt_rows);
        let _ = fs::remove_dir_all(root);
    }
}
