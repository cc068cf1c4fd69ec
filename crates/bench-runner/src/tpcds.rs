//! TPC-DS submission: resolve a query selection against the on-disk query
//! directory, hand the whole batch to the external runner application, and
//! fold its per-query results file back into the run record.

use crate::process::run_captured;
use anyhow::{anyhow, Result};
use bench_core::BenchEnv;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

fn query_name_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[qQ](\d+)(.*)$").unwrap())
}

fn numeric_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^(\d+)(.*)$").unwrap())
}

/// Natural ordering for query stems: q9 before q10, q14a before q14b,
/// non-conforming names after everything numeric.
pub fn query_sort_key(stem: &str) -> (u8, u64, String) {
    if let Some(caps) = query_name_re().captures(stem) {
        let num = caps[1].parse::<u64>().unwrap_or(u64::MAX);
        return (0, num, caps[2].to_ascii_lowercase());
    }
    if let Some(caps) = numeric_re().captures(stem) {
        let num = caps[1].parse::<u64>().unwrap_or(u64::MAX);
        return (0, num, caps[2].to_ascii_lowercase());
    }
    (1, 0, stem.to_ascii_lowercase())
}

/// All `.sql` stems under the query directory, naturally sorted.
pub fn list_query_files(query_dir: &Path) -> Result<Vec<String>> {
    let mut stems = Vec::new();
    for entry in WalkDir::new(query_dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    if stems.is_empty() {
        return Err(anyhow!("no_queries: no .sql files under {}", query_dir.display()));
    }
    stems.sort_by_key(|s| query_sort_key(s));
    stems.dedup();
    Ok(stems)
}

/// Resolve a user selection against the available stems. Each requested name
/// matches, in order of preference, an exact stem, a bare number (`14` means
/// `q14`), a `qN` name, or a unique stem prefix (`q14` picks up `q14a` and
/// `q14b`). Unknown names are fatal. An empty selection means every query.
pub fn pick_queries(available: &[String], requested: &[String]) -> Result<Vec<String>> {
    if requested.is_empty() {
        return Ok(available.to_vec());
    }
    let mut picked = Vec::new();
    for want in requested {
        let mut matched: Vec<&String> = available.iter().filter(|s| *s == want).collect();
        if matched.is_empty() {
            let normalized = if want.chars().all(|c| c.is_ascii_digit()) {
                format!("q{}", want)
            } else {
                want.clone()
            };
            matched = available.iter().filter(|s| **s == normalized).collect();
            if matched.is_empty() {
                matched = available
                    .iter()
                    .filter(|s| s.starts_with(&normalized))
                    .collect();
            }
        }
        if matched.is_empty() {
            let mut known: Vec<&str> = available.iter().map(String::as_str).collect();
            known.truncate(20);
            return Err(anyhow!(
                "unknown_query: {} (known: {}{})",
                want,
                known.join(", "),
                if available.len() > 20 { ", ..." } else { "" }
            ));
        }
        for stem in matched {
            if !picked.contains(stem) {
                picked.push(stem.clone());
            }
        }
    }
    Ok(picked)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpcdsQueryResult {
    pub query: String,
    pub iteration: u32,
    pub elapsed_ms: i64,
    pub rows: i64,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TpcdsOutcome {
    pub exit_code: i32,
    pub elapsed_s: f64,
    pub submit_cmd: Vec<String>,
    pub queries: Vec<String>,
    pub results: Vec<TpcdsQueryResult>,
    pub ok_queries: usize,
    pub failed_queries: usize,
    pub total_query_elapsed_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TpcdsRequest {
    pub base_uri: String,
    pub format: String,
    pub queries: Vec<String>,
    pub iterations: u32,
}

/// Submit the TPC-DS runner application and read back its results file.
pub fn run_tpcds(env: &BenchEnv, request: &TpcdsRequest, run_dir: &Path) -> Result<TpcdsOutcome> {
    let runner = env
        .tpcds_runner
        .as_ref()
        .ok_or_else(|| anyhow!("missing_tpcds_runner: set tpcds_runner in bench.yaml"))?;
    let query_dir = env
        .tpcds_query_dir
        .as_ref()
        .ok_or_else(|| anyhow!("missing_tpcds_query_dir: set tpcds_query_dir in bench.yaml"))?;

    let available = list_query_files(query_dir)?;
    let queries = pick_queries(&available, &request.queries)?;

    let out_dir = run_dir.join("tpcds-out");
    let mut submit_cmd = vec![
        env.spark_submit().to_string_lossy().to_string(),
        runner.to_string_lossy().to_string(),
    ];
    for (flag, value) in [
        ("--mode", "run".to_string()),
        ("--base-uri", request.base_uri.clone()),
        ("--format", request.format.clone()),
        ("--query-dir", query_dir.to_string_lossy().to_string()),
        ("--queries", queries.join(",")),
        ("--out-dir", out_dir.to_string_lossy().to_string()),
        ("--iterations", request.iterations.to_string()),
    ] {
        submit_cmd.push(flag.to_string());
        submit_cmd.push(value);
    }

    let result = run_captured(
        &submit_cmd,
        &env.root,
        &[],
        &run_dir.join("tpcds.stdout.log"),
        &run_dir.join("tpcds.stderr.log"),
    )?;

    let results = if result.ok() {
        read_results_csv(&out_dir.join("results.csv"))?
    } else {
        Vec::new()
    };
    let ok_queries = results.iter().filter(|r| r.ok).count();
    let failed_queries = results.len() - ok_queries;
    let total_query_elapsed_ms = results.iter().map(|r| r.elapsed_ms).sum();

    Ok(TpcdsOutcome {
        exit_code: result.exit_code,
        elapsed_s: result.elapsed_s,
        submit_cmd,
        queries,
        results,
        ok_queries,
        failed_queries,
        total_query_elapsed_ms,
    })
}

fn read_results_csv(path: &Path) -> Result<Vec<TpcdsQueryResult>> {
    if !path.is_file() {
        return Err(anyhow!("missing_tpcds_results: {}", path.display()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut out = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |idx: usize| row.get(idx).unwrap_or("").to_string();
        out.push(TpcdsQueryResult {
            query: field(0),
            iteration: field(1).parse().unwrap_or(0),
            elapsed_ms: field(2).parse().unwrap_or(-1),
            rows: field(3).parse().unwrap_or(-1),
            ok: matches!(field(4).as_str(), "True" | "true"),
            error: {
                let e = field(5);
                if e.is_empty() {
                    None
                } else {
                    Some(e)
                }
            },
        });
    }
    Ok(out)
}
