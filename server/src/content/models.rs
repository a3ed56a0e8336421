//! Serde models for the content documents under the data root.
//!
//! Field names follow the camelCase keys used in the JSON files. Missing
//! fields fall back to the same defaults the content authoring tools assume.

use serde::{Deserialize, Serialize};

/// `manifest.json`: file names of the four content documents, relative to the data root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataManifest {
    pub items: String,
    pub mobs: String,
    pub combat: String,
    pub drops: String,
}

impl Default for DataManifest {
    fn default() -> Self {
        Self {
            items: "items.json".to_string(),
            mobs: "mobs.json".to_string(),
            combat: "combat.json".to_string(),
            drops: "drops.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    pub max_stack: i32,
}

impl Default for ItemDef {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            max_stack: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsDoc {
    pub items: Vec<ItemDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobDef {
    pub id: String,
    pub name: String,
    pub hp: i32,
    pub attack: i32,
}

impl Default for MobDef {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            hp: 1,
            attack: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobsDoc {
    pub mobs: Vec<MobDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerCombat {
    pub base_hp: i32,
    pub base_attack: i32,
}

impl Default for PlayerCombat {
    fn default() -> Self {
        Self {
            base_hp: 1,
            base_attack: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CombatRules {
    /// Probability in `0..=1`
    pub crit_chance: f64,
    /// Damage multiplier, at least 1
    pub crit_multiplier: f64,
}

impl Default for CombatRules {
    fn default() -> Self {
        Self {
            crit_chance: 0.0,
            crit_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub player: PlayerCombat,
    pub rules: CombatRules,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DropEntry {
    pub item_id: String,
    pub min: i32,
    pub max: i32,
    pub chance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropTable {
    pub id: String,
    pub entries: Vec<DropEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MobDropLink {
    pub mob_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DropsConfig {
    pub tables: Vec<DropTable>,
    pub mob_to_table: Vec<MobDropLink>,
}
