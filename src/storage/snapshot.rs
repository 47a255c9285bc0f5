//! Durable JSON document holding every baseline accumulator.
//!
//! Layout: `mode -> target -> vantage point -> metric -> {n, mean, M2}`.
//! Writes go to a sibling temp file which is then renamed over the
//! document, so an interrupted write never truncates prior history.

use crate::detect::baseline::BaselineTree;
use crate::detect::moments::MomentAccumulator;
use crate::detect::DetectError;
use chrono::Utc;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load the document. A missing file is an empty store.
pub fn load(path: &Path) -> Result<BaselineTree, DetectError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BaselineTree::new()),
        Err(source) => {
            return Err(DetectError::SnapshotRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(BaselineTree::new());
    }
    let doc: Value = serde_json::from_str(&content)?;
    match doc {
        Value::Object(modes) => Ok(decode_tree(&modes)),
        other => Err(DetectError::SnapshotShape(json_kind(&other))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Keep every `mode/target/node/metric` entry that decodes as an
/// accumulator; anything else, at any level, is skipped.
fn decode_tree(modes: &Map<String, Value>) -> BaselineTree {
    let mut tree = BaselineTree::new();
    for (mode, targets) in modes {
        let Some(targets) = targets.as_object() else {
            debug!(key = %mode, "Skipping non-baseline entry");
            continue;
        };
        for (target, nodes) in targets.iter().filter_map(|(k, v)| Some((k, v.as_object()?))) {
            for (node, metrics) in nodes.iter().filter_map(|(k, v)| Some((k, v.as_object()?))) {
                for (metric, raw) in metrics {
                    let Some(acc) = decode_accumulator(raw) else {
                        debug!(%mode, %target, %node, %metric, "Skipping undecodable accumulator");
                        continue;
                    };
                    tree.entry(mode.clone())
                        .or_default()
                        .entry(target.clone())
                        .or_default()
                        .entry(node.clone())
                        .or_default()
                        .insert(metric.clone(), acc);
                }
            }
        }
    }
    tree
}

fn decode_accumulator(raw: &Value) -> Option<MomentAccumulator> {
    // Every field defaults, so demand a mean before trusting the object.
    raw.get("mean")?.as_f64()?;
    serde_json::from_value(raw.clone()).ok()
}

/// Move an unreadable document aside so write-through cannot replace it.
pub fn quarantine(path: &Path) -> Result<PathBuf, DetectError> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
    let aside = PathBuf::from(aside);
    std::fs::rename(path, &aside).map_err(|source| DetectError::SnapshotWrite {
        path: aside.clone(),
        source,
    })?;
    Ok(aside)
}

/// Replace the document with `tree`.
pub fn save(path: &Path, tree: &BaselineTree) -> Result<(), DetectError> {
    let write_err = |source| DetectError::SnapshotWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(write_err)?;
    }

    let json = serde_json::to_vec_pretty(tree)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    std::fs::write(tmp, json).map_err(write_err)?;
    std::fs::rename(tmp, path).map_err(write_err)?;
    Ok(())
}
