//! Shell-out-and-capture: run one external command with stdout/stderr
//! redirected to files, and fold spawn failures into a recorded exit status
//! so matrix iteration can treat them as data.

use anyhow::{anyhow, Result};
use bench_core::ensure_dir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

/// Recorded status when the child could not be spawned at all
/// (nonexistent binary, permission denied). Shell convention.
pub const SPAWN_FAILURE_CODE: i32 = 127;

#[derive(Debug, Clone)]
pub struct CapturedRun {
    pub exit_code: i32,
    pub elapsed_s: f64,
}

impl CapturedRun {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

pub fn run_captured(
    command: &[String],
    cwd: &Path,
    envs: &[(String, String)],
    stdout_path: &Path,
    stderr_path: &Path,
) -> Result<CapturedRun> {
    if command.is_empty() {
        return Err(anyhow!("empty_command"));
    }
    for path in [stdout_path, stderr_path] {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
    }
    let stdout = fs::File::create(stdout_path)?;
    let stderr = fs::File::create(stderr_path)?;

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    for (k, v) in envs {
        cmd.env(k, v);
    }

    tracing::debug!(command = %command.join(" "), cwd = %cwd.display(), "spawning");
    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let mut f = OpenOptions::new().append(true).open(stderr_path)?;
            writeln!(f, "spawn failed: {}: {}", command[0], e)?;
            return Ok(CapturedRun {
                exit_code: SPAWN_FAILURE_CODE,
                elapsed_s: start.elapsed().as_secs_f64(),
            });
        }
    };
    let status = child.wait()?;
    Ok(CapturedRun {
        // Termination by signal has no code; -1 keeps the row non-zero.
        exit_code: status.code().unwrap_or(-1),
        elapsed_s: start.elapsed().as_secs_f64(),
    })
}
