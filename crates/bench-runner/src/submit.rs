//! Job-submission wrappers: translate per-run configuration into an
//! invocation of the external submission tooling, with captured stdio.

use crate::process::{run_captured, CapturedRun};
use anyhow::{anyhow, Result};
use bench_core::{shell_join, BenchEnv};
use std::collections::BTreeMap;
use std::path::Path;

pub const EXTRA_ARGS_ENV: &str = "SPARK_SUBMIT_EXTRA_ARGS";

/// Render conf overrides as `--conf key=value` pairs, quoted for the shell
/// since the submit script splats this variable into its own command line.
pub fn spark_submit_extra_args(overrides: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::with_capacity(overrides.len() * 2);
    for (k, v) in overrides {
        parts.push("--conf".to_string());
        parts.push(format!("{}={}", k, v));
    }
    shell_join(&parts)
}

pub struct GroupBySubmission {
    pub result: CapturedRun,
    pub submit_cmd: Vec<String>,
    pub extra_args: String,
}

/// Submit the fixed GroupByTest example job through the wrapper script.
pub fn submit_groupby(
    env: &BenchEnv,
    workload_args: &[String],
    overrides: &BTreeMap<String, String>,
    run_dir: &Path,
) -> Result<GroupBySubmission> {
    let extra_args = spark_submit_extra_args(overrides);
    let mut submit_cmd = vec![env.submit_script.to_string_lossy().to_string()];
    submit_cmd.extend(workload_args.iter().cloned());
    let result = run_captured(
        &submit_cmd,
        &env.root,
        &[(EXTRA_ARGS_ENV.to_string(), extra_args.clone())],
        &run_dir.join("submit.stdout.log"),
        &run_dir.join("submit.stderr.log"),
    )?;
    Ok(GroupBySubmission {
        result,
        submit_cmd,
        extra_args,
    })
}

/// Run a named benchmark-suite workload (`<suite>/bin/workloads/<name>/spark/run.sh`).
pub fn submit_hibench(env: &BenchEnv, workload: &str, run_dir: &Path) -> Result<CapturedRun> {
    let hibench_home = env
        .hibench_home
        .as_ref()
        .ok_or_else(|| anyhow!("missing_hibench_home: set HIBENCH_HOME or hibench_home in bench.yaml"))?;
    let script = hibench_home
        .join("bin")
        .join("workloads")
        .join(workload)
        .join("spark")
        .join("run.sh");
    if !script.is_file() {
        return Err(anyhow!("missing_hibench_workload: {}", script.display()));
    }
    run_captured(
        &[script.to_string_lossy().to_string()],
        &env.root,
        &[],
        &run_dir.join("hibench.stdout.log"),
        &run_dir.join("hibench.stderr.log"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::ensure_dir;
    use chrono::Utc;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "usbench_submit_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn fake_env(root: &Path) -> BenchEnv {
        for name in [
            "start-standalone-multinode.sh",
            "stop-standalone-multinode.sh",
        ] {
            fs::write(root.join(name), "#!/bin/sh\nexit 0\n").expect("script");
        }
        let submit = root.join("submit-groupbytest-mn.sh");
        fs::write(
            &submit,
            "#!/bin/sh\nprintf 'args=%s extra=%s' \"$*\" \"$SPARK_SUBMIT_EXTRA_ARGS\"\n",
        )
        .expect("submit script");
        let mut perms = fs::metadata(&submit).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&submit, perms).expect("chmod");
        ensure_dir(&root.join("spark")).expect("spark");
        BenchEnv {
            root: root.to_path_buf(),
            spark_home: root.join("spark"),
            hibench_home: None,
            start_script: root.join("start-standalone-multinode.sh"),
            stop_script: root.join("stop-standalone-multinode.sh"),
            submit_script: submit,
            conf_root: root.join("conf").join("scache-multinode"),
            results_root: root.join("results"),
            tpcds_runner: None,
            tpcds_query_dir: None,
            nodes: 1,
            node_start_script: None,
        }
    }

    #[test]
    fn extra_args_render_as_quoted_conf_pairs() {
        let mut overrides = BTreeMap::new();
        overrides.insert("spark.eventLog.enabled".to_string(), "true".to_string());
        overrides.insert("spark.app.name".to_string(), "ablation run".to_string());
        let rendered = spark_submit_extra_args(&overrides);
        assert_eq!(
            rendered,
            "--conf 'spark.app.name=ablation run' --conf spark.eventLog.enabled=true"
        );
    }

    #[test]
    fn groupby_submission_forwards_args_and_env() {
        let root = temp_root("groupby");
        let env = fake_env(&root);
        let run_dir = root.join("run-000");
        let mut overrides = BTreeMap::new();
        overrides.insert("spark.eventLog.enabled".to_string(), "true".to_string());
        let args: Vec<String> = ["32", "200000", "1024", "32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let submission = submit_groupby(&env, &args, &overrides, &run_dir).expect("submit");
        assert_eq!(submission.result.exit_code, 0);
        let stdout = fs::read_to_string(run_dir.join("submit.stdout.log")).expect("stdout");
        assert!(stdout.contains("args=32 200000 1024 32"), "got: {}", stdout);
        assert!(
            stdout.contains("--conf spark.eventLog.enabled=true"),
            "got: {}",
            stdout
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn hibench_without_installation_is_a_config_error() {
        let root = temp_root("hibench");
        let env = fake_env(&root);
        let err = submit_hibench(&env, "micro/wordcount", &root.join("run"))
            .expect_err("should fail");
        assert!(err.to_string().contains("missing_hibench_home"), "got: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn hibench_missing_workload_script_is_fatal() {
        let root = temp_root("hibench2");
        let mut env = fake_env(&root);
        env.hibench_home = Some(root.join("HiBench"));
        ensure_dir(&root.join("HiBench")).expect("hibench home");
        let err = submit_hibench(&env, "micro/terasort", &root.join("run"))
            .expect_err("should fail");
        assert!(
            err.to_string().contains("missing_hibench_workload"),
            "got: {}",
            err
        );
        let _ = fs::remove_dir_all(root);
    }
}
