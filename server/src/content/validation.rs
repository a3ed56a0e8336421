//! Consistency rules for loaded content.
//!
//! Validation never stops at the first problem; every rule runs and each
//! violation is collected into the [`ValidationReport`].

use super::models::{CombatConfig, DropsConfig, ItemDef, MobDef};
use super::ContentStore;
use std::collections::HashSet;
use std::fmt;

/// One rule violation: a stable code, the path of the offending value and a readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    fn add(&mut self, code: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            code,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Runs every rule against the store.
pub fn validate(store: &ContentStore) -> ValidationReport {
    let mut report = ValidationReport::default();

    validate_items(store.items(), &mut report);
    validate_mobs(store.mobs(), &mut report);
    validate_combat(store.combat(), &mut report);
    validate_drops(store.drops(), store, &mut report);

    report
}

fn non_empty(value: &str) -> bool {
    !value.trim().is_empty()
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn validate_items(items: &[ItemDef], report: &mut ValidationReport) {
    let mut seen = HashSet::new();

    for item in items {
        let path = format!("items[{}]", item.id);

        if !non_empty(&item.id) {
            report.add("ITEM_ID_EMPTY", &path, "item id is empty");
        }
        if !seen.insert(item.id.as_str()) {
            report.add("ITEM_ID_DUP", &path, format!("duplicate item id '{}'", item.id));
        }
        if !non_empty(&item.name) {
            report.add("ITEM_NAME_EMPTY", &path, format!("item '{}' has no name", item.id));
        }
        if item.max_stack < 1 {
            report.add(
                "ITEM_MAXSTACK_RANGE",
                &path,
                format!("item '{}' maxStack must be >= 1", item.id),
            );
        }
    }
}

fn validate_mobs(mobs: &[MobDef], report: &mut ValidationReport) {
    let mut seen = HashSet::new();

    for mob in mobs {
        let path = format!("mobs[{}]", mob.id);

        if !non_empty(&mob.id) {
            report.add("MOB_ID_EMPTY", &path, "mob id is empty");
        }
        if !seen.insert(mob.id.as_str()) {
            report.add("MOB_ID_DUP", &path, format!("duplicate mob id '{}'", mob.id));
        }
        if !non_empty(&mob.name) {
            report.add("MOB_NAME_EMPTY", &path, format!("mob '{}' has no name", mob.id));
        }
        if mob.hp < 1 {
            report.add("MOB_HP_RANGE", &path, format!("mob '{}' hp must be >= 1", mob.id));
        }
        if mob.attack < 0 {
            report.add(
                "MOB_ATK_RANGE",
                &path,
                format!("mob '{}' attack must be >= 0", mob.id),
            );
        }
    }
}

fn validate_combat(combat: &CombatConfig, report: &mut ValidationReport) {
    if combat.player.base_hp < 1 {
        report.add("COMBAT_PLAYER_HP", "combat.player.baseHp", "baseHp must be >= 1");
    }
    if combat.player.base_attack < 0 {
        report.add(
            "COMBAT_PLAYER_ATK",
            "combat.player.baseAttack",
            "baseAttack must be >= 0",
        );
    }
    if !in_unit_range(combat.rules.crit_chance) {
        report.add(
            "COMBAT_CRIT_CHANCE",
            "combat.rules.critChance",
            "critChance must be within 0..1",
        );
    }
    if combat.rules.crit_multiplier < 1.0 {
        report.add(
            "COMBAT_CRIT_MULT",
            "combat.rules.critMultiplier",
            "critMultiplier must be >= 1.0",
        );
    }
}

fn validate_drops(drops: &DropsConfig, store: &ContentStore, report: &mut ValidationReport) {
    let mut seen_tables = HashSet::new();

    for table in &drops.tables {
        let table_path = format!("drops.tables[{}]", table.id);

        if !non_empty(&table.id) {
            report.add("DROP_TABLE_ID_EMPTY", &table_path, "drop table id is empty");
        }
        if !seen_tables.insert(table.id.as_str()) {
            report.add(
                "DROP_TABLE_ID_DUP",
                &table_path,
                format!("duplicate drop table id '{}'", table.id),
            );
        }

        for (i, entry) in table.entries.iter().enumerate() {
            let entry_path = format!("{}.entries[{}]", table_path, i);

            if !non_empty(&entry.item_id) {
                report.add("DROP_ITEMID_EMPTY", &entry_path, "itemId is empty");
            } else if store.item(&entry.item_id).is_none() {
                report.add(
                    "DROP_ITEMID_REF",
                    &entry_path,
                    format!("unknown itemId '{}'", entry.item_id),
                );
            }
            if entry.min < 0 || entry.max < 0 || entry.min > entry.max {
                report.add(
                    "DROP_MINMAX_RANGE",
                    &entry_path,
                    format!("invalid min/max (min={}, max={})", entry.min, entry.max),
                );
            }
            if !in_unit_range(entry.chance) {
                report.add(
                    "DROP_CHANCE_RANGE",
                    &entry_path,
                    format!("chance must be within 0..1 (chance={})", entry.chance),
                );
            }
        }
    }

    for link in &drops.mob_to_table {
        let link_path = format!("drops.mobToTable[{}->{}]", link.mob_id, link.table_id);

        if !non_empty(&link.mob_id) || !non_empty(&link.table_id) {
            report.add("DROP_LINK_EMPTY", &link_path, "mobId or tableId is empty");
        }
        if non_empty(&link.mob_id) && store.mob(&link.mob_id).is_none() {
            report.add(
                "DROP_LINK_MOB_REF",
                &link_path,
                format!("unknown mobId '{}'", link.mob_id),
            );
        }
        if non_empty(&link.table_id) && store.drop_table(&link.table_id).is_none() {
            report.add(
                "DROP_LINK_TABLE_REF",
                &link_path,
                format!("unknown tableId '{}'", link.table_id),
            );
        }
    }
}
