// Copyright (c) 2026 Loom Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Layered YAML config loading: system-wide, XDG/home, workspace-local,
//! and an optional explicit `--config` path, each overriding the last.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/loom/config.yaml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/loom/config.yaml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("loom/config.yaml"));
    }

    paths.push(PathBuf::from(".loom/config.yaml"));
    paths.push(PathBuf::from("loom.yaml"));

    paths
}

/// Loads configuration by merging every discovered YAML layer, lowest to
/// highest priority, with `extra` (e.g. a `--config` flag) applied last.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        merge_yaml(&mut dst, val("x: 2"));
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        merge_yaml(&mut dst, val("b: 99"));
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("http:\n  token_file: /a\nbuffers:\n  soft_flush_ms: 400");
        merge_yaml(&mut dst, val("buffers:\n  soft_flush_ms: 900"));
        assert_eq!(dst["http"]["token_file"].as_str(), Some("/a"));
        assert_eq!(dst["buffers"]["soft_flush_ms"].as_i64(), Some(900));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/loom_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.http.bind.port(), 8787);
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "http:\n  bind: \"127.0.0.1:9999\"").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.http.bind.port(), 9999);
    }
}
