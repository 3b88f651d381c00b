//! Casino knowledge base tables

use super::formula;
use crate::db::Database;
use crate::error::{BotError, BotResult};
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Seed file layout
#[derive(Debug, Deserialize)]
pub struct CasinoSeed {
    #[serde(default)]
    pub casinos: Vec<CasinoEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CasinoEntry {
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub tiers: Vec<TierEntry>,
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
    #[serde(default)]
    pub general_information: Vec<InfoEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TierEntry {
    pub name: String,
    pub level_range: Option<String>,
    #[serde(default)]
    pub levels: Vec<LevelEntry>,
}

#[derive(Debug, Deserialize)]
pub struct LevelEntry {
    pub level_name: String,
    /// Seeds mix numbers and strings here
    pub bonus_amount: Option<Value>,
    pub xp_requirement: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct FeatureEntry {
    pub name: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub calculation_formula: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InfoEntry {
    pub key: String,
    pub value: Value,
}

fn value_text(value: &Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CasinoSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Level {
    pub level_name: String,
    pub bonus_amount: Option<String>,
    pub xp_requirement: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tier {
    pub name: String,
    pub level_range: Option<String>,
    pub levels: Vec<Level>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feature {
    pub name: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub calculation_formula: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CasinoData {
    #[serde(flatten)]
    pub summary: CasinoSummary,
    pub tiers: Vec<Tier>,
    pub features: Vec<Feature>,
    pub general_info: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureMatch {
    pub casino: String,
    pub feature: String,
    pub description: Option<String>,
    pub requirements: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BonusLine {
    pub feature: String,
    pub formula: String,
    pub value: f64,
}

pub struct CasinoStore {
    db: Arc<Database>,
}

impl CasinoStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Import a seed document. Each named casino is replaced wholesale.
    /// Returns the number of casinos loaded.
    pub fn load_json(&self, json: &str) -> BotResult<usize> {
        let seed: CasinoSeed = serde_json::from_str(json)?;
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let mut loaded = 0;
        for casino in &seed.casinos {
            if casino.name.trim().is_empty() {
                warn!("Skipping casino with empty name");
                continue;
            }
            insert_casino(&tx, casino)?;
            loaded += 1;
        }
        tx.commit()?;
        info!("Loaded {} casino(s)", loaded);
        Ok(loaded)
    }

    fn find_summary(&self, name: &str) -> BotResult<Option<CasinoSummary>> {
        let summary = self
            .db
            .conn()
            .query_row(
                "SELECT id, name, description, website FROM casinos WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    /// Full record by name, case-insensitive
    pub fn casino(&self, name: &str) -> BotResult<Option<CasinoData>> {
        let Some(summary) = self.find_summary(name)? else {
            return Ok(None);
        };
        let conn = self.db.conn();

        let mut tiers = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, name, level_range FROM casino_tiers WHERE casino_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![summary.id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
            })?;
            let tier_rows = rows.collect::<Result<Vec<_>, _>>()?;

            let mut level_stmt = conn.prepare(
                "SELECT level_name, bonus_amount, xp_requirement FROM casino_levels
                 WHERE tier_id = ?1 ORDER BY id",
            )?;
            for (tier_id, name, level_range) in tier_rows {
                let levels = level_stmt
                    .query_map(params![tier_id], |row| {
                        Ok(Level {
                            level_name: row.get(0)?,
                            bonus_amount: row.get(1)?,
                            xp_requirement: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                tiers.push(Tier {
                    name,
                    level_range,
                    levels,
                });
            }
        }

        let features = {
            let mut stmt = conn.prepare(
                "SELECT name, description, requirements, calculation_formula
                 FROM casino_features WHERE casino_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![summary.id], |row| {
                Ok(Feature {
                    name: row.get(0)?,
                    description: row.get(1)?,
                    requirements: row.get(2)?,
                    calculation_formula: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let general_info = {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM casino_general_info WHERE casino_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![summary.id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(Some(CasinoData {
            summary,
            tiers,
            features,
            general_info,
        }))
    }

    pub fn all_casinos(&self) -> BotResult<Vec<CasinoSummary>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare("SELECT id, name, description, website FROM casinos ORDER BY name")?;
        let rows = stmt.query_map([], row_to_summary)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn search_features(&self, query: &str) -> BotResult<Vec<FeatureMatch>> {
        let like = format!("%{}%", query.trim());
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT c.name, f.name, f.description, f.requirements
             FROM casino_features f JOIN casinos c ON c.id = f.casino_id
             WHERE f.name LIKE ?1 OR f.description LIKE ?1
             ORDER BY c.name, f.id",
        )?;
        let rows = stmt.query_map(params![like], |row| {
            Ok(FeatureMatch {
                casino: row.get(0)?,
                feature: row.get(1)?,
                description: row.get(2)?,
                requirements: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Evaluate every feature formula of `name` for `wager`. Formulas that
    /// fail to evaluate are logged and left out.
    pub fn calculate_bonus(&self, name: &str, wager: f64) -> BotResult<Vec<BonusLine>> {
        let data = self
            .casino(name)?
            .ok_or_else(|| BotError::not_found(format!("casino '{}'", name.trim())))?;
        let mut lines = Vec::new();
        for feature in data.features {
            let Some(formula_text) = feature.calculation_formula else {
                continue;
            };
            match formula::evaluate_wager(&formula_text, wager) {
                Ok(value) => lines.push(BonusLine {
                    feature: feature.name,
                    formula: formula_text,
                    value,
                }),
                Err(e) => warn!("Formula for '{}' failed: {}", feature.name, e),
            }
        }
        Ok(lines)
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<CasinoSummary> {
    Ok(CasinoSummary {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        website: row.get(3)?,
    })
}

fn insert_casino(tx: &Transaction<'_>, casino: &CasinoEntry) -> rusqlite::Result<()> {
    // Child rows go with it through ON DELETE CASCADE
    tx.execute("DELETE FROM casinos WHERE name = ?1", params![casino.name])?;
    tx.execute(
        "INSERT INTO casinos (name, description, website) VALUES (?1, ?2, ?3)",
        params![casino.name, casino.description, casino.website],
    )?;
    let casino_id = tx.last_insert_rowid();

    for tier in &casino.tiers {
        tx.execute(
            "INSERT INTO casino_tiers (casino_id, name, level_range) VALUES (?1, ?2, ?3)",
            params![casino_id, tier.name, tier.level_range],
        )?;
        let tier_id = tx.last_insert_rowid();
        for level in &tier.levels {
            tx.execute(
                "INSERT INTO casino_levels (tier_id, level_name, bonus_amount, xp_requirement)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tier_id,
                    level.level_name,
                    value_text(&level.bonus_amount),
                    value_text(&level.xp_requirement)
                ],
            )?;
        }
    }

    for feature in &casino.features {
        tx.execute(
            "INSERT INTO casino_features (casino_id, name, description, requirements, calculation_formula)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                casino_id,
                feature.name,
                feature.description,
                feature.requirements,
                feature.calculation_formula
            ],
        )?;
    }

    for info in &casino.general_information {
        tx.execute(
            "INSERT INTO casino_general_info (casino_id, key, value) VALUES (?1, ?2, ?3)",
            params![casino_id, info.key, value_text(&Some(info.value.clone())).unwrap_or_default()],
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SEED: &str = r#"{
      "casinos": [
        {
          "name": "Stake",
          "description": "Crypto casino",
          "website": "https://stake.com",
          "tiers": [
            {"name": "Bronze", "level_range": "1-10", "levels": [
              {"level_name": "Bronze 1", "bonus_amount": 10, "xp_requirement": "1000"},
              {"level_name": "Bronze 2", "bonus_amount": "25", "xp_requirement": 5000}
            ]}
          ],
          "features": [
            {"name": "Weekly Bonus", "description": "Paid every Saturday", "calculation_formula": "wager * 0.5"},
            {"name": "Rakeback", "description": "Instant rakeback", "calculation_formula": "min(wager * 0.25, 100)"},
            {"name": "Broken", "description": "bad formula", "calculation_formula": "wager ** 2"},
            {"name": "Reload", "description": "Daily reload"}
          ],
          "general_information": [{"key": "license", "value": "Curacao"}, {"key": "founded", "value": 2017}]
        },
        {"name": "Gamba", "description": "Sweepstakes", "features": [
          {"name": "Weekly Race", "description": "Leaderboard prizes"}
        ]}
      ]
    }"#;

    pub(crate) fn seeded() -> CasinoStore {
        let store = CasinoStore::new(Arc::new(Database::open_in_memory().unwrap()));
        assert_eq!(store.load_json(SEED).unwrap(), 2);
        store
    }

    #[test]
    fn test_load_and_read_back() {
        let store = seeded();
        let stake = store.casino("stake").unwrap().unwrap();
        assert_eq!(stake.summary.name, "Stake");
        assert_eq!(stake.tiers.len(), 1);
        assert_eq!(stake.tiers[0].levels[0].bonus_amount.as_deref(), Some("10"));
        assert_eq!(stake.tiers[0].levels[1].xp_requirement.as_deref(), Some("5000"));
        assert_eq!(stake.features.len(), 4);
        assert!(stake.general_info.contains(&("founded".to_string(), "2017".to_string())));
        assert!(store.casino("nope").unwrap().is_none());
    }

    #[test]
    fn test_reload_replaces_children() {
        let store = seeded();
        store.load_json(SEED).unwrap();
        let stake = store.casino("Stake").unwrap().unwrap();
        assert_eq!(stake.features.len(), 4);
        assert_eq!(stake.tiers.len(), 1);
        assert_eq!(store.all_casinos().unwrap().len(), 2);
    }

    #[test]
    fn test_search_features() {
        let store = seeded();
        let hits = store.search_features("weekly").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].casino, "Gamba");
    }

    #[test]
    fn test_calculate_bonus_skips_bad_formulas() {
        let store = seeded();
        let lines = store.calculate_bonus("Stake", 1000.0).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].value, 500.0);
        assert_eq!(lines[1].value, 100.0);
        assert!(store.calculate_bonus("Nowhere", 1.0).is_err());
    }

    #[test]
    fn test_bad_json_is_rejected() {
        let store = CasinoStore::new(Arc::new(Database::open_in_memory().unwrap()));
        assert!(store.load_json("{not json").is_err());
        assert!(store.all_casinos().unwrap().is_empty());
    }
}
