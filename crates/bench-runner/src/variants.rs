//! The ablation vocabulary: an explicit registry of named configuration
//! overlays and single-parameter sweeps. Unknown names are configuration
//! errors, never silently treated as new conditions.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// GroupByTest positional args: numMappers numKVPairs valSize numReducers.
pub const DEFAULT_WORKLOAD_ARGS: [&str; 4] = ["32", "200000", "1024", "32"];

/// Registry order; also the default run order for `ablation`.
pub const VARIANT_NAMES: [&str; 5] = [
    "ultrashuffle-full",
    "no-partition-homes",
    "no-remote-cache",
    "service-mediated-fetch",
    "per-block-files",
];

pub const BASELINE_VARIANT: &str = "ultrashuffle-full";

#[derive(Debug, Clone)]
pub struct Variant {
    pub name: String,
    pub scache_conf_dir: PathBuf,
    pub spark_conf_overrides: BTreeMap<String, String>,
    pub notes: String,
}

pub fn registry(conf_root: &Path) -> BTreeMap<String, Variant> {
    let mut out = BTreeMap::new();
    let mut insert = |name: &str, overrides: &[(&str, &str)], notes: &str| {
        out.insert(
            name.to_string(),
            Variant {
                name: name.to_string(),
                scache_conf_dir: conf_root.join(name),
                spark_conf_overrides: overrides
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                notes: notes.to_string(),
            },
        );
    };
    insert(
        "ultrashuffle-full",
        &[],
        "Pool slices + partition homes + remote caching + shared CXL pool.",
    );
    insert(
        "no-partition-homes",
        &[],
        "Requires optional SCache patch to take effect (otherwise same as full).",
    );
    insert(
        "no-remote-cache",
        &[],
        "Disables caching for non-local blocks (remote=DISK_ONLY).",
    );
    insert(
        "service-mediated-fetch",
        &[],
        "Disables shared CXL pool; uses client-to-client fetch.",
    );
    // The no-local-files upload path expects pool slices; per-block IPC files
    // run with the engine's own shuffle files kept (sidecar mode).
    insert(
        "per-block-files",
        &[("spark.scache.shuffle.noLocalFiles", "false")],
        "Per-block IPC files; runs the engine in sidecar mode (noLocalFiles=false).",
    );
    out
}

/// Resolve requested variant names against the registry, preserving request
/// order. An empty request means all variants in registry order.
pub fn resolve_variants(conf_root: &Path, requested: &[String]) -> Result<Vec<Variant>> {
    let all = registry(conf_root);
    let names: Vec<String> = if requested.is_empty() {
        VARIANT_NAMES.iter().map(|s| s.to_string()).collect()
    } else {
        requested.to_vec()
    };
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let variant = all.get(&name).ok_or_else(|| {
            anyhow!(
                "unknown_variant: {} (known: {})",
                name,
                VARIANT_NAMES.join(", ")
            )
        })?;
        out.push(variant.clone());
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Shared pool capacity; value is a size string (512m, 1g).
    CxlCapacity,
    /// Pool slice alignment; value is a byte count (4096, 65536).
    Align,
    /// GroupByTest numKVPairs; value replaces the second workload arg.
    WorkingSetFit,
}

impl Sweep {
    pub const NAMES: [&'static str; 3] = ["cxl-capacity", "align", "working-set-fit"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sweep::CxlCapacity => "cxl-capacity",
            Sweep::Align => "align",
            Sweep::WorkingSetFit => "working-set-fit",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cxl-capacity" => Ok(Sweep::CxlCapacity),
            "align" => Ok(Sweep::Align),
            "working-set-fit" => Ok(Sweep::WorkingSetFit),
            other => Err(anyhow!(
                "unknown_sweep: {} (known: {})",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Daemon conf keys rewritten for this sweep value. Empty for sweeps
    /// that only change workload arguments.
    pub fn conf_updates(&self, value: &str) -> BTreeMap<String, String> {
        let mut updates = BTreeMap::new();
        match self {
            Sweep::CxlCapacity => {
                updates.insert("scache.memory.offHeap.size".to_string(), value.to_string());
                updates.insert(
                    "scache.storage.cxl.shared.pool.size".to_string(),
                    value.to_string(),
                );
            }
            Sweep::Align => {
                updates.insert(
                    "scache.daemon.ipc.pool.align".to_string(),
                    value.to_string(),
                );
                updates.insert(
                    "scache.storage.cxl.shared.pool.align".to_string(),
                    value.to_string(),
                );
            }
            Sweep::WorkingSetFit => {}
        }
        updates
    }

    pub fn apply_workload_args(&self, value: &str, args: &[String]) -> Result<Vec<String>> {
        let mut args = args.to_vec();
        if let Sweep::WorkingSetFit = self {
            if args.len() < 2 {
                return Err(anyhow!(
                    "invalid_workload_args: working-set-fit needs the numKVPairs position"
                ));
            }
            args[1] = value.to_string();
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_declared_name() {
        let reg = registry(Path::new("/conf"));
        for name in VARIANT_NAMES {
            let v = reg.get(name).expect(name);
            assert_eq!(v.name, name);
            assert!(v.scache_conf_dir.ends_with(name));
        }
        assert_eq!(reg.len(), VARIANT_NAMES.len());
    }

    #[test]
    fn per_block_files_forces_sidecar_mode() {
        let reg = registry(Path::new("/conf"));
        let v = reg.get("per-block-files").expect("variant");
        assert_eq!(
            v.spark_conf_overrides
                .get("spark.scache.shuffle.noLocalFiles")
                .map(String::as_str),
            Some("false")
        );
    }

    #[test]
    fn empty_request_resolves_to_all_in_registry_order() {
        let resolved = resolve_variants(Path::new("/conf"), &[]).expect("resolve");
        let names: Vec<&str> = resolved.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, VARIANT_NAMES.to_vec());
    }

    #[test]
    fn unknown_variant_is_fatal_and_lists_known_names() {
        let err = resolve_variants(Path::new("/conf"), &["ultrashufle-full".to_string()])
            .expect_err("should fail");
        let msg = err.to_string();
        assert!(msg.contains("unknown_variant"), "got: {}", msg);
        assert!(msg.contains("ultrashuffle-full"), "got: {}", msg);
    }

    #[test]
    fn sweep_names_round_trip() {
        for name in Sweep::NAMES {
            assert_eq!(Sweep::parse(name).expect(name).as_str(), name);
        }
        assert!(Sweep::parse("cxl").is_err());
    }

    #[test]
    fn capacity_sweep_sets_both_pool_keys() {
        let updates = Sweep::CxlCapacity.conf_updates("512m");
        assert_eq!(
            updates.get("scache.memory.offHeap.size").map(String::as_str),
            Some("512m")
        );
        assert_eq!(
            updates
                .get("scache.storage.cxl.shared.pool.size")
                .map(String::as_str),
            Some("512m")
        );
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn working_set_sweep_rewrites_num_kv_pairs_only() {
        let args: Vec<String> = DEFAULT_WORKLOAD_ARGS.iter().map(|s| s.to_string()).collect();
        assert!(Sweep::WorkingSetFit.conf_updates("100000").is_empty());
        let rewritten = Sweep::WorkingSetFit
            .apply_workload_args("100000", &args)
            .expect("apply");
        assert_eq!(rewritten, vec!["32", "100000", "1024", "32"]);
        // Other sweeps leave the workload untouched.
        let same = Sweep::Align.apply_workload_args("4096", &args).expect("apply");
        assert_eq!(same, args);
    }
}
