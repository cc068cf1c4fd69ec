pub mod cluster;
pub mod matrix;
pub mod process;
pub mod submit;
pub mod tpcds;
pub mod variants;

pub use cluster::ClusterControl;
pub use matrix::{rebuild_matrix_csv, run_ablation, run_sensitivity, MatrixOptions, MatrixOutcome};
pub use process::{run_captured, CapturedRun, SPAWN_FAILURE_CODE};
pub use tpcds::{pick_queries, run_tpcds, TpcdsOutcome, TpcdsRequest};
pub use variants::{Sweep, Variant};
