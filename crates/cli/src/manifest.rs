//! Load manifest files: multi-document YAML (or JSON), `kind: List` flattened, directories expanded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Expand directories (one level, sorted) into the manifest files they contain.
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e))
                })
                .collect();
            entries.sort();
            out.extend(entries);
        } else {
            out.push(path.clone());
        }
    }
    Ok(out)
}

pub fn parse_documents(text: &str, origin: &Path) -> Result<Vec<Json>> {
    let mut out = Vec::new();
    for (idx, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Json::deserialize(doc).with_context(|| format!("{}: document {} is not valid YAML", origin.display(), idx + 1))?;
        flatten(value, &mut out);
    }
    Ok(out)
}

fn flatten(value: Json, out: &mut Vec<Json>) {
    match value {
        Json::Null => {}
        Json::Object(ref map) if map.get("kind").and_then(Json::as_str) == Some("List") => {
            if let Some(Json::Array(items)) = map.get("items") {
                for item in items {
                    flatten(item.clone(), out);
                }
            }
        }
        other => out.push(other),
    }
}

pub fn load(paths: &[PathBuf]) -> Result<Vec<Json>> {
    let mut out = Vec::new();
    for path in expand_paths(paths)? {
        let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        out.extend(parse_documents(&text, &path)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_documents_and_flattens_lists() {
        let text = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: a
---
---
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: Secret
    metadata:
      name: b
  - apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: c
"#;
        let docs = parse_documents(text, Path::new("inline.yaml")).unwrap();
        let kinds: Vec<_> = docs.iter().map(|d| d["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Secret", "Deployment"]);
    }

    #[test]
    fn reports_the_broken_document() {
        let err = parse_documents("kind: ConfigMap\n---\n: [oops\n", Path::new("bad.yaml")).unwrap_err();
        assert!(err.to_string().starts_with("bad.yaml: document"), "{}", err);
    }

    #[test]
    fn directories_expand_to_sorted_manifests() {
        let dir = std::env::temp_dir().join(format!("vigil-manifests-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.yaml"), "kind: ConfigMap\nmetadata: {name: b}\n").unwrap();
        fs::write(dir.join("a.json"), r#"{"kind": "Secret", "metadata": {"name": "a"}}"#).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let docs = load(&[dir.clone()]).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d["metadata"]["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "b"]);
        fs::remove_dir_all(dir).unwrap();
    }
}
