//! HOCON-style `key = value` overlay files, rewritten without a full HOCON
//! parser: comments and unknown lines pass through untouched.

use crate::atomic_write_bytes;
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

fn key_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\s*)([A-Za-z0-9_.-]+)(\s*=\s*)(.*?)(\s*)$").expect("key line regex")
    })
}

fn is_comment(line: &str) -> bool {
    let stripped = line.trim_start();
    stripped.starts_with('#') || stripped.starts_with("//")
}

/// Rewrite `src` into `dst` with `updates` applied: every occurrence of an
/// updated key is rewritten in place (whitespace preserved), keys not present
/// in `src` are appended at the end.
pub fn rewrite_kv_conf(src: &Path, dst: &Path, updates: &BTreeMap<String, String>) -> Result<()> {
    let text = fs::read_to_string(src)?;
    let mut out: Vec<String> = Vec::new();
    let mut seen: BTreeMap<&str, ()> = BTreeMap::new();

    for line in text.lines() {
        if is_comment(line) {
            out.push(line.to_string());
            continue;
        }
        match key_line_re().captures(line) {
            Some(caps) => {
                let key = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                if let Some((k, v)) = updates.get_key_value(key) {
                    out.push(format!(
                        "{}{}{}{}{}",
                        &caps[1], key, &caps[3], v, &caps[5]
                    ));
                    seen.insert(k.as_str(), ());
                } else {
                    out.push(line.to_string());
                }
            }
            None => out.push(line.to_string()),
        }
    }

    for (k, v) in updates {
        if !seen.contains_key(k.as_str()) {
            out.push(format!("{}={}", k, v));
        }
    }

    let mut joined = out.join("\n");
    joined.push('\n');
    atomic_write_bytes(dst, joined.as_bytes())
}

/// Read a key=value file back into a map. Comments and lines that do not
/// match the key pattern are skipped; later occurrences win.
pub fn parse_kv_conf(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    let mut map = BTreeMap::new();
    for line in text.lines() {
        if is_comment(line) {
            continue;
        }
        if let Some(caps) = key_line_re().captures(line) {
            map.insert(caps[2].to_string(), caps[4].to_string());
        }
    }
    Ok(map)
}
