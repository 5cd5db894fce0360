//! File-backed [`IntegrationStore`].
//!
//! Layout under the data directory:
//!
//! - `integrations/<id>.json`: one integration record, manifest included
//! - `actors/<id>.json`: one actor record
//! - `manual_access.json`: list of `{actor_id, integration_id, revoked}` entries
//!
//! Writes patch only the affected fields so hand-written manifests keep their layout.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use provisio_engine::{IntegrationStore, ManualAccess, parse_integration};
use provisio_types::{Actor, CredentialState, IntegrationConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManualAccessEntry {
    actor_id: u64,
    integration_id: u64,
    #[serde(default)]
    revoked: bool,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn integration_path(&self, integration_id: u64) -> PathBuf {
        self.root.join("integrations").join(format!("{integration_id}.json"))
    }

    pub fn actor_path(&self, actor_id: u64) -> PathBuf {
        self.root.join("actors").join(format!("{actor_id}.json"))
    }

    fn manual_access_path(&self) -> PathBuf {
        self.root.join("manual_access.json")
    }

    fn patch_record(&self, path: &Path, fields: Map<String, Value>) -> Result<()> {
        let mut record = read_json_file(path)?.with_context(|| format!("{} does not exist", path.display()))?;
        let Some(object) = record.as_object_mut() else {
            bail!("{} does not hold a JSON object", path.display());
        };
        for (key, value) in fields {
            object.insert(key, value);
        }
        write_json_file(path, &record)
    }
}

impl IntegrationStore for FileStore {
    fn save_credentials(&self, integration_id: u64, state: &CredentialState) -> Result<()> {
        let fields = match serde_json::to_value(state)? {
            Value::Object(fields) => fields,
            _ => bail!("credential state did not serialize to an object"),
        };
        debug!(integration_id, "saving credentials");
        self.patch_record(&self.integration_path(integration_id), fields)
    }

    fn save_actor_fields(&self, actor_id: u64, fields: &Map<String, Value>) -> Result<()> {
        let mut patch = Map::new();
        patch.insert("extra_fields".into(), Value::Object(fields.clone()));
        self.patch_record(&self.actor_path(actor_id), patch)
    }

    fn load_integration(&self, integration_id: u64) -> Result<IntegrationConfig> {
        let path = self.integration_path(integration_id);
        let text = fs::read_to_string(&path).with_context(|| format!("could not read {}", path.display()))?;
        let integration = parse_integration(&text).with_context(|| format!("invalid integration in {}", path.display()))?;
        if integration.id != integration_id {
            bail!(
                "{} holds integration {} instead of {}",
                path.display(),
                integration.id,
                integration_id
            );
        }
        Ok(integration)
    }

    fn load_actor(&self, actor_id: u64) -> Result<Actor> {
        let path = self.actor_path(actor_id);
        let text = fs::read_to_string(&path).with_context(|| format!("could not read {}", path.display()))?;
        let actor: Actor = serde_json::from_str(&text).with_context(|| format!("invalid actor in {}", path.display()))?;
        if actor.id != actor_id {
            bail!("{} holds actor {} instead of {}", path.display(), actor.id, actor_id);
        }
        Ok(actor)
    }

    fn manual_access(&self, actor_id: u64, integration_id: u64) -> Result<Option<ManualAccess>> {
        let Some(entries) = read_json_file(&self.manual_access_path())? else {
            return Ok(None);
        };
        let entries: Vec<ManualAccessEntry> = serde_json::from_value(entries).context("invalid manual_access.json")?;
        Ok(entries
            .iter()
            .find(|entry| entry.actor_id == actor_id && entry.integration_id == integration_id)
            .map(|entry| ManualAccess { revoked: entry.revoked }))
    }
}

/// Read a JSON document. A missing file yields `None`.
pub(crate) fn read_json_file(path: &Path) -> Result<Option<Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error).with_context(|| format!("could not read {}", path.display())),
    };
    let value = serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(Some(value))
}

/// Write a JSON document through a temporary file and a rename.
pub(crate) fn write_json_file(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("could not create {}", parent.display()))?;
    }
    let temporary = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    fs::write(&temporary, text).with_context(|| format!("could not write {}", temporary.display()))?;
    fs::rename(&temporary, path).with_context(|| format!("could not replace {}", path.display()))?;
    Ok(())
}
