//! Harness environment resolution: where the engine installation, the
//! cluster scripts, the overlay roots, and the results tree live.
//!
//! Environment variables win over `bench.yaml`, which wins over defaults
//! relative to the harness root.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_ROOT: &str = "USBENCH_ROOT";
pub const ENV_SPARK_HOME: &str = "SPARK_HOME";
pub const ENV_HIBENCH_HOME: &str = "HIBENCH_HOME";
pub const ENV_RESULTS_ROOT: &str = "USBENCH_RESULTS";

const BENCH_FILE: &str = "bench.yaml";
const START_SCRIPT: &str = "start-standalone-multinode.sh";
const STOP_SCRIPT: &str = "stop-standalone-multinode.sh";
const SUBMIT_SCRIPT: &str = "submit-groupbytest-mn.sh";

#[derive(Debug, Clone)]
pub struct BenchEnv {
    pub root: PathBuf,
    pub spark_home: PathBuf,
    pub hibench_home: Option<PathBuf>,
    pub start_script: PathBuf,
    pub stop_script: PathBuf,
    pub submit_script: PathBuf,
    pub conf_root: PathBuf,
    pub results_root: PathBuf,
    pub tpcds_runner: Option<PathBuf>,
    pub tpcds_query_dir: Option<PathBuf>,
    pub nodes: usize,
    pub node_start_script: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BenchFile {
    #[serde(default)]
    spark_home: Option<String>,
    #[serde(default)]
    hibench_home: Option<String>,
    #[serde(default)]
    start_script: Option<String>,
    #[serde(default)]
    stop_script: Option<String>,
    #[serde(default)]
    submit_script: Option<String>,
    #[serde(default)]
    conf_root: Option<String>,
    #[serde(default)]
    results_root: Option<String>,
    #[serde(default)]
    nodes: Option<usize>,
    #[serde(default)]
    node_start_script: Option<String>,
    #[serde(default)]
    tpcds: Option<TpcdsFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TpcdsFile {
    #[serde(default)]
    runner_script: Option<String>,
    #[serde(default)]
    query_dir: Option<String>,
}

impl BenchEnv {
    pub fn resolve(root: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(ENV_ROOT) {
                Ok(v) if !v.is_empty() => PathBuf::from(v),
                _ => std::env::current_dir()?,
            },
        };
        let root = root.canonicalize().unwrap_or(root);
        tracing::debug!(root = %root.display(), "resolving harness environment");

        let file = load_bench_file(&root.join(BENCH_FILE))?;
        let resolve_rel = |s: &str| {
            let p = PathBuf::from(s);
            if p.is_absolute() {
                p
            } else {
                root.join(p)
            }
        };

        let spark_home = std::env::var(ENV_SPARK_HOME)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| file.spark_home.as_deref().map(resolve_rel))
            .ok_or_else(|| {
                anyhow!(
                    "missing_spark_home: set {} or spark_home in {}",
                    ENV_SPARK_HOME,
                    BENCH_FILE
                )
            })?;
        if !spark_home.is_dir() {
            return Err(anyhow!(
                "missing_spark_home: not a directory: {}",
                spark_home.display()
            ));
        }

        let hibench_home = std::env::var(ENV_HIBENCH_HOME)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| file.hibench_home.as_deref().map(resolve_rel));

        let start_script = file
            .start_script
            .as_deref()
            .map(resolve_rel)
            .unwrap_or_else(|| root.join(START_SCRIPT));
        let stop_script = file
            .stop_script
            .as_deref()
            .map(resolve_rel)
            .unwrap_or_else(|| root.join(STOP_SCRIPT));
        let submit_script = file
            .submit_script
            .as_deref()
            .map(resolve_rel)
            .unwrap_or_else(|| root.join(SUBMIT_SCRIPT));
        for script in [&start_script, &stop_script, &submit_script] {
            if !script.is_file() {
                return Err(anyhow!("missing_script: {}", script.display()));
            }
        }

        let conf_root = file
            .conf_root
            .as_deref()
            .map(resolve_rel)
            .unwrap_or_else(|| root.join("conf").join("scache-multinode"));

        let results_root = std::env::var(ENV_RESULTS_ROOT)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| file.results_root.as_deref().map(resolve_rel))
            .unwrap_or_else(|| root.join("results"));

        let tpcds_runner = file
            .tpcds
            .as_ref()
            .and_then(|t| t.runner_script.as_deref())
            .map(resolve_rel);
        let tpcds_query_dir = file
            .tpcds
            .as_ref()
            .and_then(|t| t.query_dir.as_deref())
            .map(resolve_rel);

        let node_start_script = file.node_start_script.as_deref().map(resolve_rel);

        Ok(BenchEnv {
            root,
            spark_home,
            hibench_home,
            start_script,
            stop_script,
            submit_script,
            conf_root,
            results_root,
            nodes: file.nodes.unwrap_or(1),
            node_start_script,
            tpcds_runner,
            tpcds_query_dir,
        })
    }

    pub fn spark_submit(&self) -> PathBuf {
        self.spark_home.join("bin").join("spark-submit")
    }
}

fn load_bench_file(path: &Path) -> Result<BenchFile> {
    if !path.exists() {
        return Ok(BenchFile::default());
    }
    let raw = fs::read_to_string(path)?;
    serde_yaml::from_str(&raw)
        .map_err(|e| anyhow!("invalid_bench_file: {}: {}", path.display(), e))
}
