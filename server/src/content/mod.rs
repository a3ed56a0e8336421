//! Read-only game content loaded at startup.
//!
//! The server only starts once the content under its data root loads and
//! passes [`validate`]. Nothing in the network core reads content afterwards.

pub mod models;
pub mod validation;

pub use validation::{validate, ValidationIssue, ValidationReport};

use log::debug;
use models::{CombatConfig, DataManifest, DropTable, DropsConfig, ItemDef, ItemsDoc, MobDef, MobsDoc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("data root {0} does not exist or is not a directory")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Loaded content with id lookups.
///
/// Definitions are kept in file order so validation can see duplicates;
/// lookups resolve to the first definition with a given id.
#[derive(Debug, Clone)]
pub struct ContentStore {
    items: Vec<ItemDef>,
    mobs: Vec<MobDef>,
    combat: CombatConfig,
    drops: DropsConfig,
    items_by_id: HashMap<String, usize>,
    mobs_by_id: HashMap<String, usize>,
}

impl ContentStore {
    pub fn new(
        items: Vec<ItemDef>,
        mobs: Vec<MobDef>,
        combat: CombatConfig,
        drops: DropsConfig,
    ) -> Self {
        let mut items_by_id = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            items_by_id.entry(item.id.clone()).or_insert(index);
        }
        let mut mobs_by_id = HashMap::new();
        for (index, mob) in mobs.iter().enumerate() {
            mobs_by_id.entry(mob.id.clone()).or_insert(index);
        }

        Self {
            items,
            mobs,
            combat,
            drops,
            items_by_id,
            mobs_by_id,
        }
    }

    pub fn item(&self, id: &str) -> Option<&ItemDef> {
        self.items_by_id.get(id).map(|&index| &self.items[index])
    }

    pub fn mob(&self, id: &str) -> Option<&MobDef> {
        self.mobs_by_id.get(id).map(|&index| &self.mobs[index])
    }

    pub fn drop_table(&self, id: &str) -> Option<&DropTable> {
        self.drops.tables.iter().find(|table| table.id == id)
    }

    pub fn items(&self) -> &[ItemDef] {
        &self.items
    }

    pub fn mobs(&self) -> &[MobDef] {
        &self.mobs
    }

    pub fn combat(&self) -> &CombatConfig {
        &self.combat
    }

    pub fn drops(&self) -> &DropsConfig {
        &self.drops
    }

    #[cfg(test)]
    pub(crate) fn drops_mut(&mut self) -> &mut DropsConfig {
        &mut self.drops
    }
}

/// Loads the manifest and the four documents it names from `root`.
pub fn load_all(root: impl AsRef<Path>) -> Result<ContentStore, ContentError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ContentError::MissingRoot(root.to_path_buf()));
    }

    let manifest: DataManifest = read_json(&root.join(MANIFEST_FILE))?;
    let items: ItemsDoc = read_json(&root.join(&manifest.items))?;
    let mobs: MobsDoc = read_json(&root.join(&manifest.mobs))?;
    let combat: CombatConfig = read_json(&root.join(&manifest.combat))?;
    let drops: DropsConfig = read_json(&root.join(&manifest.drops))?;

    debug!(
        "Loaded content from {}: {} items, {} mobs, {} drop tables",
        root.display(),
        items.items.len(),
        mobs.mobs.len(),
        drops.tables.len()
    );

    Ok(ContentStore::new(items.items, mobs.mobs, combat, drops))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ContentError> {
    let text = std::fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ContentError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../data")
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "keepnet-content-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_bundled_content_loads_and_validates() {
        let store = load_all(data_root()).unwrap();

        assert!(!store.items().is_empty());
        assert!(!store.mobs().is_empty());
        let report = validate(&store);
        assert!(report.is_ok(), "{:?}", report.issues());
    }

    #[test]
    fn test_lookups() {
        let store = load_all(data_root()).unwrap();

        let first_item = store.items()[0].clone();
        assert_eq!(store.item(&first_item.id), Some(&first_item));
        assert!(store.item("no-such-item").is_none());
        assert!(store.mob("no-such-mob").is_none());

        let first_table = store.drops().tables[0].id.clone();
        assert!(store.drop_table(&first_table).is_some());
        assert!(store.drop_table("no-such-table").is_none());
    }

    #[test]
    fn test_lookup_prefers_first_duplicate() {
        let store = ContentStore::new(
            vec![
                ItemDef {
                    id: "a".to_string(),
                    name: "First".to_string(),
                    max_stack: 1,
                },
                ItemDef {
                    id: "a".to_string(),
                    name: "Second".to_string(),
                    max_stack: 1,
                },
            ],
            Vec::new(),
            CombatConfig::default(),
            DropsConfig::default(),
        );
        assert_eq!(store.item("a").map(|i| i.name.as_str()), Some("First"));
    }

    #[test]
    fn test_missing_root() {
        let err = load_all("/definitely/not/a/data/root").unwrap_err();
        assert!(matches!(err, ContentError::MissingRoot(_)));
    }

    #[test]
    fn test_missing_document_is_read_error() {
        let dir = scratch_dir("missing-doc");
        std::fs::write(dir.join(MANIFEST_FILE), "{}").unwrap();

        let err = load_all(&dir).unwrap_err();
        assert!(matches!(err, ContentError::Read { .. }));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let dir = scratch_dir("malformed");
        std::fs::write(dir.join(MANIFEST_FILE), "{}").unwrap();
        std::fs::write(dir.join("items.json"), "[ this is not json").unwrap();

        let err = load_all(&dir).unwrap_err();
        assert!(matches!(err, ContentError::Parse { .. }));
    }
}
