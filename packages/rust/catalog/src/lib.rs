//! Catalog store: the JSON document listing every managed app.
//!
//! The [`Catalog`] keeps two views of the same data:
//! - the raw document, so keys the pipeline never touches round-trip
//!   unchanged and in their original order;
//! - typed [`App`] entries parsed from it, which the pipeline reads.
//!
//! Mutations go through [`Catalog::set_download_url`] and
//! [`Catalog::record_tweak_versions`], which update both views.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use tweakforge_shared::{App, Result, TweakforgeError};

const APPS_KEY: &str = "apps";

/// Loaded catalog document plus its parsed apps.
#[derive(Debug, Clone)]
pub struct Catalog {
    document: Map<String, Value>,
    apps: Vec<App>,
}

impl Catalog {
    /// Read and parse the catalog at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TweakforgeError::config(format!("cannot read catalog {}: {e}", path.display()))
        })?;

        let catalog = Self::from_json_str(&content).map_err(|e| match e {
            TweakforgeError::Config { message } => {
                TweakforgeError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;

        info!(path = %path.display(), apps = catalog.apps.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Parse a catalog from an in-memory JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| TweakforgeError::config(format!("malformed catalog: {e}")))?;

        let Value::Object(document) = root else {
            return Err(TweakforgeError::config("catalog root must be an object"));
        };

        let entries = match document.get(APPS_KEY) {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(TweakforgeError::config("`apps` must be an array")),
            None => return Err(TweakforgeError::config("catalog has no `apps` array")),
        };

        let apps = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                serde_json::from_value::<App>(entry.clone())
                    .map_err(|e| TweakforgeError::config(format!("apps[{i}]: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { document, apps })
    }

    /// Parsed apps in catalog order.
    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Record the published link for the app at `index`.
    pub fn set_download_url(&mut self, index: usize, url: &str) -> Result<()> {
        self.entry_mut(index)?
            .insert("download_url".into(), Value::String(url.to_string()));
        self.apps[index].download_url = Some(url.to_string());
        Ok(())
    }

    /// Merge release tags into the app's `tweak_versions` map.
    pub fn record_tweak_versions(
        &mut self,
        index: usize,
        versions: &BTreeMap<String, String>,
    ) -> Result<()> {
        if versions.is_empty() {
            return Ok(());
        }

        let mut merged = self.apps.get(index).map(|a| a.tweak_versions.clone()).unwrap_or_default();
        merged.extend(versions.iter().map(|(k, v)| (k.clone(), v.clone())));

        let value: Map<String, Value> = merged
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.entry_mut(index)?
            .insert("tweak_versions".into(), Value::Object(value));
        self.apps[index].tweak_versions = merged;
        Ok(())
    }

    /// Serialize the full document (pretty JSON, trailing newline).
    pub fn to_json_string(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(&self.document)
            .map_err(|e| TweakforgeError::config(format!("failed to serialize catalog: {e}")))?;
        out.push('\n');
        Ok(out)
    }

    /// Write the catalog to `path` atomically (temp file in the same directory, then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json_string()?;
        let tmp = temp_path(path);

        std::fs::write(&tmp, content).map_err(|e| TweakforgeError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            TweakforgeError::io(path, e)
        })?;

        debug!(path = %path.display(), "catalog saved");
        Ok(())
    }

    fn entry_mut(&mut self, index: usize) -> Result<&mut Map<String, Value>> {
        self.document
            .get_mut(APPS_KEY)
            .and_then(Value::as_array_mut)
            .and_then(|entries| entries.get_mut(index))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                TweakforgeError::validation(format!("no catalog entry at index {index}"))
            })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".into());
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  "apps": [
    {
      "name": "Foo",
      "bundle_id": "com.example.foo",
      "ipa_source": "http://x/f.ipa",
      "tweaks": [
        {
          "type": "direct",
          "url": "http://x/t.deb"
        }
      ],
      "notes": "keep me"
    },
    {
      "name": "Bar",
      "app_store_url": "https://apps.apple.com/app/id42",
      "download_url": "https://pixeldrain.com/u/old",
      "tweaks": []
    }
  ],
  "updated_by": "ci"
}
"#;

    #[test]
    fn loads_apps_in_order() {
        let catalog = Catalog::from_json_str(SAMPLE).expect("parse");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.apps()[0].name, "Foo");
        assert_eq!(catalog.apps()[1].download_url.as_deref(), Some("https://pixeldrain.com/u/old"));
    }

    #[test]
    fn untouched_document_roundtrips_verbatim() {
        let catalog = Catalog::from_json_str(SAMPLE).expect("parse");
        assert_eq!(catalog.to_json_string().unwrap(), SAMPLE);
    }

    #[test]
    fn download_url_update_keeps_key_order() {
        let mut catalog = Catalog::from_json_str(SAMPLE).expect("parse");
        catalog.set_download_url(1, "https://pixeldrain.com/u/new").unwrap();
        catalog.set_download_url(0, "https://pixeldrain.com/u/foo").unwrap();

        let out = catalog.to_json_string().unwrap();
        // Existing key is replaced in place, new key is appended after `notes`.
        assert!(out.contains(r#""download_url": "https://pixeldrain.com/u/new""#));
        assert!(!out.contains("/u/old"));
        let notes = out.find("keep me").unwrap();
        let foo_link = out.find("/u/foo").unwrap();
        assert!(notes < foo_link);
        let bar_link = out.find("/u/new").unwrap();
        let bar_tweaks = out.rfind(r#""tweaks": []"#).unwrap();
        assert!(bar_link < bar_tweaks);

        assert_eq!(catalog.apps()[0].download_url.as_deref(), Some("https://pixeldrain.com/u/foo"));
    }

    #[test]
    fn tweak_versions_merge() {
        let mut catalog = Catalog::from_json_str(SAMPLE).expect("parse");
        let mut versions = BTreeMap::new();
        versions.insert("owner/Rocket".to_string(), "v1.2".to_string());
        catalog.record_tweak_versions(0, &versions).unwrap();

        let reparsed = Catalog::from_json_str(&catalog.to_json_string().unwrap()).unwrap();
        let recorded = reparsed.apps()[0].tweak_versions.get("owner/Rocket");
        assert_eq!(recorded.map(String::as_str), Some("v1.2"));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut catalog = Catalog::from_json_str(SAMPLE).expect("parse");
        assert!(catalog.set_download_url(7, "https://x").is_err());
    }

    #[test]
    fn malformed_documents_are_config_errors() {
        for bad in [
            "not json",
            "[]",
            r#"{"apps": {}}"#,
            r#"{"other": []}"#,
            r#"{"apps": [{"tweaks": []}]}"#,
            r#"{"apps": [{"name": "X", "tweaks": [{"type": "svn"}]}]}"#,
        ] {
            let err = Catalog::from_json_str(bad).unwrap_err();
            assert!(matches!(err, TweakforgeError::Config { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Catalog::load(&dir.path().join("apps.json")).unwrap_err();
        assert!(matches!(err, TweakforgeError::Config { .. }));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut catalog = Catalog::load(&path).unwrap();
        catalog.set_download_url(0, "https://pixeldrain.com/u/abc").unwrap();
        catalog.save(&path).unwrap();

        let first = std::fs::read_to_string(&path).unwrap();
        Catalog::load(&path).unwrap().save(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
        assert!(!dir.path().join(".apps.json.tmp").exists());
    }
}
