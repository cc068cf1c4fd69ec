//! Lifecycle control for the external cluster and caching daemons. The
//! daemons themselves are opaque start/stop scripts; this layer decides when
//! to invoke them and which overlay directory they see.

use crate::process::{run_captured, CapturedRun};
use anyhow::{anyhow, Result};
use bench_core::{atomic_write_json_pretty, conf_dir_digest, ensure_dir, BenchEnv};
use chrono::Utc;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONF_OVERRIDE_ENV: &str = "SCACHE_CONF_OVERRIDE_DIR";
const MARKER_FILE: &str = "cluster_state.json";

pub struct ClusterControl {
    root: PathBuf,
    start_script: PathBuf,
    stop_script: PathBuf,
}

impl ClusterControl {
    pub fn from_env(env: &BenchEnv) -> Self {
        Self {
            root: env.root.clone(),
            start_script: env.start_script.clone(),
            stop_script: env.stop_script.clone(),
        }
    }

    fn script_env(conf_dir: &Path) -> Vec<(String, String)> {
        vec![(
            CONF_OVERRIDE_ENV.to_string(),
            conf_dir.to_string_lossy().to_string(),
        )]
    }

    /// Best-effort stop: daemons that are not running make the script fail,
    /// which is fine before a fresh start.
    pub fn stop(&self, conf_dir: &Path, log_dir: &Path, stem: &str) -> Result<CapturedRun> {
        let result = run_captured(
            &[self.stop_script.to_string_lossy().to_string()],
            &self.root,
            &Self::script_env(conf_dir),
            &log_dir.join(format!("{}.stdout.log", stem)),
            &log_dir.join(format!("{}.stderr.log", stem)),
        )?;
        if !result.ok() {
            tracing::warn!(rc = result.exit_code, "cluster stop exited non-zero");
        }
        Ok(result)
    }

    /// Start only; never stops anything first. A successful start records
    /// the active overlay digest in the marker file.
    pub fn start(&self, conf_dir: &Path, log_dir: &Path, stem: &str) -> Result<CapturedRun> {
        let stderr_path = log_dir.join(format!("{}.stderr.log", stem));
        let result = run_captured(
            &[self.start_script.to_string_lossy().to_string()],
            &self.root,
            &Self::script_env(conf_dir),
            &log_dir.join(format!("{}.stdout.log", stem)),
            &stderr_path,
        )?;
        if !result.ok() {
            return Err(anyhow!(
                "cluster_start_failed: rc={} (see {})",
                result.exit_code,
                stderr_path.display()
            ));
        }
        self.write_marker(conf_dir)?;
        Ok(result)
    }

    pub fn restart(&self, conf_dir: &Path, log_dir: &Path, stem: &str) -> Result<()> {
        self.stop(conf_dir, log_dir, &format!("{}-stop", stem))?;
        self.start(conf_dir, log_dir, &format!("{}-start", stem))?;
        Ok(())
    }

    /// Compare-and-restart: a marker file next to the daemons' working state
    /// records the digest of the overlay that was active at the last start.
    /// A matching digest is a no-op; anything else restarts. Returns whether
    /// a restart happened.
    pub fn ensure_running(&self, conf_dir: &Path, log_dir: &Path) -> Result<bool> {
        let digest = conf_dir_digest(conf_dir)
            .map_err(|e| anyhow!("missing_conf_dir: {}: {}", conf_dir.display(), e))?;
        if let Some(previous) = self.read_marker()? {
            let prev_digest = previous
                .pointer("/conf_digest")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if prev_digest == digest {
                tracing::info!(conf_dir = %conf_dir.display(), "cluster already running with this overlay");
                return Ok(false);
            }
        }
        self.restart(conf_dir, log_dir, "cluster")?;
        Ok(true)
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(".usbench").join(MARKER_FILE)
    }

    fn read_marker(&self) -> Result<Option<Value>> {
        let path = self.marker_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes).ok())
    }

    fn write_marker(&self, conf_dir: &Path) -> Result<()> {
        let payload = json!({
            "conf_dir": conf_dir.to_string_lossy(),
            "conf_digest": conf_dir_digest(conf_dir)?,
            "started_at": Utc::now().to_rfc3339(),
        });
        atomic_write_json_pretty(&self.marker_path(), &payload)
    }

    /// Fan out one start script per simulated node and wait for all of them.
    /// Nodes are independent processes partitioned by index-derived
    /// directories; any failure fails the whole start.
    pub fn start_nodes(
        &self,
        node_script: &Path,
        nodes: usize,
        conf_dir: &Path,
        log_dir: &Path,
    ) -> Result<()> {
        if nodes == 0 {
            return Err(anyhow!("invalid_node_count: 0"));
        }
        ensure_dir(log_dir)?;
        let mut children = Vec::with_capacity(nodes);
        for idx in 0..nodes {
            let work_dir = log_dir.join(format!("node-{}", idx));
            ensure_dir(&work_dir)?;
            let stdout = fs::File::create(work_dir.join("start.stdout.log"))?;
            let stderr = fs::File::create(work_dir.join("start.stderr.log"))?;
            let child = std::process::Command::new(node_script)
                .current_dir(&self.root)
                .env(CONF_OVERRIDE_ENV, conf_dir)
                .env("SCACHE_NODE_INDEX", idx.to_string())
                .env("SCACHE_NODE_DIR", &work_dir)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::from(stdout))
                .stderr(std::process::Stdio::from(stderr))
                .spawn()
                .map_err(|e| anyhow!("node_start_failed: node {}: {}", idx, e))?;
            children.push((idx, child));
        }
        let mut failed = Vec::new();
        for (idx, mut child) in children {
            let status = child.wait()?;
            if !status.success() {
                failed.push(format!("node {} rc={}", idx, status.code().unwrap_or(-1)));
            }
        }
        if !failed.is_empty() {
            return Err(anyhow!("node_start_failed: {}", failed.join(", ")));
        }
        Ok(())
    }
}
