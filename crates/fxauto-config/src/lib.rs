//! Layered engine configuration: merge base + environment-override YAML/JSON
//! documents, reject unknown keys, and fingerprint the result so every audit
//! record can cite the exact config that produced it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The full set of runtime-tunable engine parameters (spec §6). Every field
/// here must appear in at least one layer; unknown keys in any layer are a
/// hard load-time error rather than a silently ignored typo.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub base_lot: f64,
    pub pip_scale: i64,
    pub layer1_period_ms: u64,
    pub layer2a_period_s: u64,
    pub layer2b_period_s: u64,
    pub layer3a_period_s: u64,
    pub daily_close_hhmm: String,
    pub tick_staleness_threshold_ms: u64,
    pub advisory_timeout_periodic_ms: u64,
    pub advisory_timeout_emergency_ms: u64,
    pub weekend_start: String,
    pub weekend_end: String,
}

/// A config loaded from one or more layered sources, with its canonical
/// fingerprint for audit correlation.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub fingerprint: String,
}

/// Load and deep-merge YAML or JSON documents in order (later layers win on
/// key conflicts), then parse the merged document into [`EngineConfig`].
/// Paths are tried in order given; a typical call passes a base config path
/// followed by an optional environment-override path.
pub fn load_layered(paths: &[&Path]) -> Result<LoadedConfig> {
    let mut merged = serde_json::Value::Object(Default::default());
    for path in paths {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config layer {}", path.display()))?;
        let layer: serde_json::Value = parse_layer(&text, path)?;
        deep_merge(&mut merged, layer);
    }
    let canonical = canonicalize_json(&merged);
    let fingerprint = fingerprint_json(&canonical);
    let config: EngineConfig = serde_json::from_value(canonical)
        .context("merged config does not match EngineConfig schema")?;
    Ok(LoadedConfig { config, fingerprint })
}

fn parse_layer(text: &str, path: &Path) -> Result<serde_json::Value> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(text).with_context(|| format!("parsing YAML layer {}", path.display()))
    } else {
        serde_json::from_str(text).with_context(|| format!("parsing JSON layer {}", path.display()))
    }
}

/// Merge `overlay` into `base` in place. Objects merge key-by-key recursively;
/// any other value type in `overlay` replaces the corresponding value in `base`
/// wholesale (arrays are not concatenated).
fn deep_merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// Recursively sort object keys so the JSON encoding is stable regardless of
/// field-insertion order across layers.
fn canonicalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize_json(v)))
                .collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_json).collect())
        }
        other => other.clone(),
    }
}

fn fingerprint_json(canonical: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(canonical).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Parse `HH:MM` into `(hour, minute)`, rejecting anything else.
pub fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .with_context(|| format!("expected HH:MM, got '{s}'"))?;
    let h: u32 = h.parse().with_context(|| format!("invalid hour in '{s}'"))?;
    let m: u32 = m.parse().with_context(|| format!("invalid minute in '{s}'"))?;
    if h > 23 || m > 59 {
        bail!("HH:MM out of range: '{s}'");
    }
    Ok((h, m))
}
