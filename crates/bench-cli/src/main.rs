use anyhow::{anyhow, Result};
use bench_core::{timestamp_id, BenchEnv};
use bench_runner::matrix::{MatrixOptions, MatrixOutcome};
use bench_runner::tpcds::TpcdsRequest;
use bench_runner::variants::{registry, resolve_variants, Sweep, VARIANT_NAMES};
use bench_runner::ClusterControl;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "usbench", version, about = "UltraShuffle benchmark harness")]
struct Cli {
    /// Harness root directory; defaults to USBENCH_ROOT, then the cwd.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ablation matrix (all variants unless named explicitly).
    Ablation {
        #[arg(long = "variant")]
        variants: Vec<String>,
        #[arg(long, default_value_t = 3)]
        repeats: usize,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        no_restart: bool,
        /// GroupByTest args: numMappers numKVPairs valSize numReducers.
        #[arg(long, num_args = 4)]
        workload_args: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    /// Run one sensitivity sweep over the baseline variant.
    Sensitivity {
        sweep: String,
        #[arg(long = "value", required = true)]
        values: Vec<String>,
        #[arg(long, default_value_t = 3)]
        repeats: usize,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        no_restart: bool,
        #[arg(long, num_args = 4)]
        workload_args: Option<Vec<String>>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize one Spark event log as JSON on stdout.
    ParseEventlog {
        eventlog: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Regenerate matrix CSVs from the per-run records under a results root.
    Aggregate {
        results_root: PathBuf,
        #[arg(long)]
        json: bool,
    },
    ClusterStart {
        #[arg(long, default_value = "ultrashuffle-full")]
        variant: String,
        #[arg(long)]
        json: bool,
    },
    ClusterStop {
        #[arg(long, default_value = "ultrashuffle-full")]
        variant: String,
        #[arg(long)]
        json: bool,
    },
    /// Restart the daemons only if the overlay changed since the last start.
    ClusterEnsure {
        #[arg(long, default_value = "ultrashuffle-full")]
        variant: String,
        #[arg(long)]
        json: bool,
    },
    /// One GroupByTest submission outside the matrix.
    SubmitGroupby {
        #[arg(long, default_value = "ultrashuffle-full")]
        variant: String,
        #[arg(long, num_args = 4)]
        workload_args: Option<Vec<String>>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    SubmitTpcds {
        #[arg(long)]
        base_uri: String,
        #[arg(long, default_value = "parquet")]
        format: String,
        /// Query names, bare numbers, or prefixes; empty means all.
        #[arg(long = "query")]
        queries: Vec<String>,
        #[arg(long, default_value_t = 1)]
        iterations: u32,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    SubmitHibench {
        workload: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List the known ablation variants and sweeps.
    Variants {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.root.as_deref(), cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(root: Option<&std::path::Path>, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Ablation {
            variants,
            repeats,
            out,
            no_restart,
            workload_args,
            json,
        } => {
            let env = BenchEnv::resolve(root)?;
            let opts = matrix_options(out, repeats, no_restart, workload_args);
            let outcome = bench_runner::run_ablation(&env, &variants, &opts)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "ablation",
                    "matrix": matrix_to_json(&outcome),
                })));
            }
            print_matrix(&outcome);
        }
        Commands::Sensitivity {
            sweep,
            values,
            repeats,
            out,
            no_restart,
            workload_args,
            json,
        } => {
            let env = BenchEnv::resolve(root)?;
            let sweep = Sweep::parse(&sweep)?;
            let opts = matrix_options(out, repeats, no_restart, workload_args);
            let outcome = bench_runner::run_sensitivity(&env, sweep, &values, &opts)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "sensitivity",
                    "sweep": sweep.as_str(),
                    "matrix": matrix_to_json(&outcome),
                })));
            }
            println!("sweep: {}", sweep.as_str());
            print_matrix(&outcome);
        }
        Commands::ParseEventlog { eventlog, pretty } => {
            let summary = bench_eventlog::parse_eventlog(&eventlog)?;
            let value = serde_json::to_value(&summary)?;
            if pretty {
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", serde_json::to_string(&value)?);
            }
        }
        Commands::Aggregate { results_root, json } => {
            let written = bench_runner::rebuild_matrix_csv(&results_root)?;
            if written.is_empty() {
                return Err(anyhow!(
                    "no_run_records: nothing under {}",
                    results_root.display()
                ));
            }
            if json {
                let files: Vec<Value> = written
                    .iter()
                    .map(|(path, rows)| {
                        json!({"csv": path.to_string_lossy(), "rows": rows})
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "aggregate",
                    "files": files,
                })));
            }
            for (path, rows) in &written {
                println!("csv: {} ({} rows)", path.display(), rows);
            }
        }
        Commands::ClusterStart { variant, json } => {
            let env = BenchEnv::resolve(root)?;
            let conf_dir = variant_conf_dir(&env, &variant)?;
            let log_dir = cluster_log_dir(&env);
            let control = ClusterControl::from_env(&env);
            control.start(&conf_dir, &log_dir, "cluster-start")?;
            if let Some(node_script) = &env.node_start_script {
                control.start_nodes(node_script, env.nodes, &conf_dir, &log_dir.join("nodes"))?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "cluster-start",
                    "variant": variant,
                    "conf_dir": conf_dir.to_string_lossy(),
                    "nodes": env.nodes,
                })));
            }
            println!("started: {}", variant);
            println!("conf_dir: {}", conf_dir.display());
            println!("nodes: {}", env.nodes);
        }
        Commands::ClusterStop { variant, json } => {
            let env = BenchEnv::resolve(root)?;
            let conf_dir = variant_conf_dir(&env, &variant)?;
            let log_dir = cluster_log_dir(&env);
            let result = ClusterControl::from_env(&env).stop(&conf_dir, &log_dir, "cluster-stop")?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "cluster-stop",
                    "variant": variant,
                    "exit_code": result.exit_code,
                })));
            }
            println!("stopped: {} (rc={})", variant, result.exit_code);
        }
        Commands::ClusterEnsure { variant, json } => {
            let env = BenchEnv::resolve(root)?;
            let conf_dir = variant_conf_dir(&env, &variant)?;
            let log_dir = cluster_log_dir(&env);
            let restarted = ClusterControl::from_env(&env).ensure_running(&conf_dir, &log_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "cluster-ensure",
                    "variant": variant,
                    "restarted": restarted,
                })));
            }
            println!("variant: {}", variant);
            println!("restarted: {}", restarted);
        }
        Commands::SubmitGroupby {
            variant,
            workload_args,
            out,
            json,
        } => {
            let env = BenchEnv::resolve(root)?;
            let picked = resolve_variants(&env.conf_root, &[variant.clone()])?;
            let picked = &picked[0];
            let run_dir = out.unwrap_or_else(|| {
                env.results_root.join(format!("manual-{}", timestamp_id()))
            });
            let args = workload_args.unwrap_or_else(default_workload_args);
            let submission = bench_runner::submit::submit_groupby(
                &env,
                &args,
                &picked.spark_conf_overrides,
                &run_dir,
            )?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit-groupby",
                    "variant": variant,
                    "run_dir": run_dir.to_string_lossy(),
                    "exit_code": submission.result.exit_code,
                    "elapsed_s": submission.result.elapsed_s,
                })));
            }
            println!("run_dir: {}", run_dir.display());
            println!("exit_code: {}", submission.result.exit_code);
            println!("elapsed_s: {:.3}", submission.result.elapsed_s);
        }
        Commands::SubmitTpcds {
            base_uri,
            format,
            queries,
            iterations,
            out,
            json,
        } => {
            let env = BenchEnv::resolve(root)?;
            let run_dir = out.unwrap_or_else(|| {
                env.results_root.join(format!("tpcds-{}", timestamp_id()))
            });
            let request = TpcdsRequest {
                base_uri,
                format,
                queries,
                iterations,
            };
            let outcome = bench_runner::run_tpcds(&env, &request, &run_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit-tpcds",
                    "run_dir": run_dir.to_string_lossy(),
                    "outcome": serde_json::to_value(&outcome)?,
                })));
            }
            println!("run_dir: {}", run_dir.display());
            println!("exit_code: {}", outcome.exit_code);
            println!("queries: {}", outcome.queries.len());
            println!("ok_queries: {}", outcome.ok_queries);
            println!("failed_queries: {}", outcome.failed_queries);
            println!("total_query_elapsed_ms: {}", outcome.total_query_elapsed_ms);
        }
        Commands::SubmitHibench { workload, out, json } => {
            let env = BenchEnv::resolve(root)?;
            let run_dir = out.unwrap_or_else(|| {
                env.results_root.join(format!("hibench-{}", timestamp_id()))
            });
            let result = bench_runner::submit::submit_hibench(&env, &workload, &run_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "submit-hibench",
                    "workload": workload,
                    "run_dir": run_dir.to_string_lossy(),
                    "exit_code": result.exit_code,
                    "elapsed_s": result.elapsed_s,
                })));
            }
            println!("workload: {}", workload);
            println!("run_dir: {}", run_dir.display());
            println!("exit_code: {}", result.exit_code);
        }
        Commands::Variants { json } => {
            if json {
                let reg = registry(std::path::Path::new(""));
                let variants: Vec<Value> = VARIANT_NAMES
                    .iter()
                    .map(|name| {
                        let v = &reg[*name];
                        json!({
                            "name": v.name,
                            "spark_conf_overrides": v.spark_conf_overrides,
                            "notes": v.notes,
                        })
                    })
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "variants",
                    "variants": variants,
                    "sweeps": Sweep::NAMES,
                })));
            }
            let reg = registry(std::path::Path::new(""));
            for name in VARIANT_NAMES {
                let v = &reg[name];
                println!("variant: {}", v.name);
                for (k, val) in &v.spark_conf_overrides {
                    println!("  conf: {}={}", k, val);
                }
                println!("  notes: {}", v.notes);
            }
            for name in Sweep::NAMES {
                println!("sweep: {}", name);
            }
        }
    }
    Ok(None)
}

fn default_workload_args() -> Vec<String> {
    bench_runner::variants::DEFAULT_WORKLOAD_ARGS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn matrix_options(
    out: Option<PathBuf>,
    repeats: usize,
    no_restart: bool,
    workload_args: Option<Vec<String>>,
) -> MatrixOptions {
    MatrixOptions {
        out,
        repeats,
        restart_cluster: !no_restart,
        workload_args: workload_args.unwrap_or_else(default_workload_args),
    }
}

fn variant_conf_dir(env: &BenchEnv, variant: &str) -> Result<PathBuf> {
    let picked = resolve_variants(&env.conf_root, &[variant.to_string()])?;
    Ok(picked[0].scache_conf_dir.clone())
}

fn cluster_log_dir(env: &BenchEnv) -> PathBuf {
    env.root.join(".usbench").join("cluster-logs")
}

fn matrix_to_json(outcome: &MatrixOutcome) -> Value {
    json!({
        "results_root": outcome.results_root.to_string_lossy(),
        "csv": outcome.csv_path.to_string_lossy(),
        "runs": outcome.runs,
        "failed_runs": outcome.failed_runs,
    })
}

// Failed runs are rows in the CSV, not a process failure; the exit code
// stays zero so sweep drivers can keep going.
fn print_matrix(outcome: &MatrixOutcome) {
    println!("results_root: {}", outcome.results_root.display());
    println!("csv: {}", outcome.csv_path.display());
    println!("runs: {}", outcome.runs);
    println!("failed_runs: {}", outcome.failed_runs);
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Ablation { json, .. }
        | Commands::Sensitivity { json, .. }
        | Commands::Aggregate { json, .. }
        | Commands::ClusterStart { json, .. }
        | Commands::ClusterStop { json, .. }
        | Commands::ClusterEnsure { json, .. }
        | Commands::SubmitGroupby { json, .. }
        | Commands::SubmitTpcds { json, .. }
        | Commands::SubmitHibench { json, .. }
        | Commands::Variants { json } => *json,
        Commands::ParseEventlog { .. } => false,
    }
}
