use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kith_core::graph::SocialGraph;
use kith_core::profile::{
    GlobalActorsSnapshot, GroupProfile, GroupTraitSet, IndividualProfile, IndividualTraitSet,
};
use kith_core::scenario::{Scenario, ScenarioExtraction, SummaryKind, MAX_SUBMISSIONS};
use kith_core::simulation::Turn;
use kith_core::KithError;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

/// A profile row the aggregator has fully resolved: update in place when
/// `id` is set, insert otherwise.
#[derive(Debug, Clone)]
pub struct ResolvedProfileWrite<T> {
    pub id: Option<i64>,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub traits: T,
}

/// An interaction row joined with its actor's mention name.
#[derive(Debug, Clone)]
pub struct StoredInteraction {
    pub behavior_id: String,
    pub actor_name: String,
    pub description: String,
    pub env: Option<String>,
}

/// A relation row with participant mention names resolved.
#[derive(Debug, Clone)]
pub struct StoredRelation {
    pub relation_description: String,
    pub relationship_status: Option<String>,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedSimulation {
    pub id: i64,
    pub user_id: String,
    pub actors: Vec<String>,
    pub scenario_text: String,
    pub transcript: Vec<Turn>,
    pub profile_lines: Vec<String>,
    pub relation_lines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub actors: Vec<String>,
    pub scenario_text: String,
    pub transcript: Vec<Turn>,
    pub profile_lines: Vec<String>,
    pub relation_lines: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scenarios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                submitted_at INTEGER NOT NULL,
                submission_count INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create scenarios table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scenario_id INTEGER NOT NULL,
                ref_id TEXT NOT NULL,
                name_or_alias TEXT NOT NULL,
                kind TEXT NOT NULL,
                UNIQUE(scenario_id, ref_id),
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create actors table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS individual_traits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scenario_id INTEGER NOT NULL,
                actor_id INTEGER NOT NULL,
                traits_json TEXT NOT NULL,
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE,
                FOREIGN KEY(actor_id) REFERENCES actors(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create individual_traits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_traits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scenario_id INTEGER NOT NULL,
                actor_id INTEGER NOT NULL,
                traits_json TEXT NOT NULL,
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE,
                FOREIGN KEY(actor_id) REFERENCES actors(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create group_traits table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scenario_id INTEGER NOT NULL,
                actor_id INTEGER NOT NULL,
                behavior_id TEXT NOT NULL,
                description TEXT NOT NULL,
                env TEXT,
                UNIQUE(scenario_id, behavior_id),
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE,
                FOREIGN KEY(actor_id) REFERENCES actors(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create interactions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interaction_relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scenario_id INTEGER NOT NULL,
                source_interaction INTEGER NOT NULL,
                target_interaction INTEGER NOT NULL,
                relation_description TEXT NOT NULL,
                relationship_status TEXT,
                participants_json TEXT NOT NULL,
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE,
                FOREIGN KEY(source_interaction) REFERENCES interactions(id) ON DELETE CASCADE,
                FOREIGN KEY(target_interaction) REFERENCES interactions(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create interaction_relations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS individual_profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                canonical_name TEXT NOT NULL,
                aliases_json TEXT NOT NULL,
                traits_json TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                UNIQUE(user_id, canonical_name)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create individual_profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                canonical_name TEXT NOT NULL,
                aliases_json TEXT NOT NULL,
                traits_json TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                UNIQUE(user_id, canonical_name)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create group_profiles table")?;

        // Single row per user, replaced wholesale.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS global_actor_profiles (
                user_id TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create global_actor_profiles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS graph_cache (
                user_id TEXT PRIMARY KEY,
                graph_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create graph_cache table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scenario_summaries (
                scenario_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scenario_id, kind),
                FOREIGN KEY(scenario_id) REFERENCES scenarios(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create scenario_summaries table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generated_simulations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                actors_json TEXT NOT NULL,
                scenario_text TEXT NOT NULL,
                transcript_json TEXT NOT NULL,
                profiles_json TEXT NOT NULL,
                relations_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create generated_simulations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS live_simulations (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                actors_json TEXT NOT NULL,
                scenario_text TEXT NOT NULL,
                transcript_json TEXT NOT NULL,
                profiles_json TEXT NOT NULL,
                relations_json TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create live_simulations table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scenarios_user ON scenarios(user_id)")
            .execute(&self.pool)
            .await
            .context("Failed to create scenarios user index")?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relations_scenario ON interaction_relations(scenario_id)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create relations scenario index")?;

        Ok(())
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    pub async fn insert_scenario(&self, user_id: &str, text: &str) -> Result<Scenario> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO scenarios (user_id, text, submitted_at, submission_count) VALUES (?, ?, ?, 1)",
        )
        .bind(user_id)
        .bind(text)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert scenario")?;

        Ok(Scenario {
            id: result.last_insert_rowid(),
            user_id: user_id.to_string(),
            text: text.to_string(),
            submitted_at: now,
            submission_count: 1,
        })
    }

    pub async fn get_scenario(&self, id: i64) -> Result<Option<Scenario>> {
        let row = sqlx::query(
            "SELECT id, user_id, text, submitted_at, submission_count FROM scenarios WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load scenario")?;

        Ok(row.map(scenario_from_row).transpose()?)
    }

    /// Replace a scenario's text, counting the revision. A scenario may be
    /// submitted at most twice in total.
    pub async fn revise_scenario(
        &self,
        id: i64,
        user_id: &str,
        text: &str,
    ) -> kith_core::Result<Scenario> {
        let existing = self
            .get_scenario(id)
            .await?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| KithError::NotFound(format!("scenario {id}")))?;

        if existing.submission_count >= MAX_SUBMISSIONS {
            return Err(KithError::Conflict(format!(
                "scenario {id} has already been revised"
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE scenarios SET text = ?, submitted_at = ?, submission_count = submission_count + 1 WHERE id = ?",
        )
        .bind(text)
        .bind(now.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to revise scenario")?;

        Ok(Scenario {
            text: text.to_string(),
            submitted_at: now,
            submission_count: existing.submission_count + 1,
            ..existing
        })
    }

    /// Delete a scenario; every scenario-scoped row goes with it.
    pub async fn delete_scenario(&self, id: i64, user_id: &str) -> kith_core::Result<()> {
        let result = sqlx::query("DELETE FROM scenarios WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete scenario")?;
        if result.rows_affected() == 0 {
            return Err(KithError::NotFound(format!("scenario {id}")));
        }
        Ok(())
    }

    // =========================================================================
    // Extraction persistence
    // =========================================================================

    /// Persist an extraction in one transaction, replacing any rows from an
    /// earlier submission of the same scenario.
    pub async fn replace_extraction(
        &self,
        scenario_id: i64,
        extraction: &ScenarioExtraction,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Revisions re-extract from scratch. Actor deletes cascade into
        // trait rows, interaction deletes into relations.
        sqlx::query("DELETE FROM interactions WHERE scenario_id = ?")
            .bind(scenario_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM actors WHERE scenario_id = ?")
            .bind(scenario_id)
            .execute(&mut *tx)
            .await?;

        let mut actor_ids: HashMap<&str, i64> = HashMap::new();
        let mut actor_names: HashMap<&str, &str> = HashMap::new();
        for actor in &extraction.actors {
            let result = sqlx::query(
                "INSERT INTO actors (scenario_id, ref_id, name_or_alias, kind) VALUES (?, ?, ?, ?)",
            )
            .bind(scenario_id)
            .bind(&actor.ref_id)
            .bind(&actor.name_or_alias)
            .bind(actor.kind.to_string())
            .execute(&mut *tx)
            .await?;
            actor_ids.insert(&actor.ref_id, result.last_insert_rowid());
            actor_names.insert(&actor.ref_id, &actor.name_or_alias);
        }

        for traits in &extraction.individual_traits {
            let actor_id = actor_ids
                .get(traits.actor_ref_id.as_str())
                .context("individual traits reference a missing actor")?;
            sqlx::query(
                "INSERT INTO individual_traits (scenario_id, actor_id, traits_json) VALUES (?, ?, ?)",
            )
            .bind(scenario_id)
            .bind(actor_id)
            .bind(serde_json::to_string(&traits.traits)?)
            .execute(&mut *tx)
            .await?;
        }

        for traits in &extraction.group_traits {
            let actor_id = actor_ids
                .get(traits.actor_ref_id.as_str())
                .context("group traits reference a missing actor")?;
            sqlx::query(
                "INSERT INTO group_traits (scenario_id, actor_id, traits_json) VALUES (?, ?, ?)",
            )
            .bind(scenario_id)
            .bind(actor_id)
            .bind(serde_json::to_string(&traits.traits)?)
            .execute(&mut *tx)
            .await?;
        }

        let mut interaction_ids: HashMap<&str, i64> = HashMap::new();
        for interaction in &extraction.interactions {
            let actor_id = actor_ids
                .get(interaction.actor_ref_id.as_str())
                .context("interaction references a missing actor")?;
            let result = sqlx::query(
                "INSERT INTO interactions (scenario_id, actor_id, behavior_id, description, env) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(scenario_id)
            .bind(actor_id)
            .bind(&interaction.behavior_id)
            .bind(&interaction.description)
            .bind(&interaction.env)
            .execute(&mut *tx)
            .await?;
            interaction_ids.insert(&interaction.behavior_id, result.last_insert_rowid());
        }

        for relation in &extraction.relations {
            let source = interaction_ids
                .get(relation.source_behavior_id.as_str())
                .context("relation references a missing source behavior")?;
            let target = interaction_ids
                .get(relation.target_behavior_id.as_str())
                .context("relation references a missing target behavior")?;
            // Participants are stored by mention name; canonical resolution
            // happens at aggregation time against the profiles of that day.
            let participant_names: Vec<&str> = relation
                .participants
                .iter()
                .filter_map(|r| actor_names.get(r.as_str()).copied())
                .collect();
            sqlx::query(
                "INSERT INTO interaction_relations \
                 (scenario_id, source_interaction, target_interaction, relation_description, relationship_status, participants_json) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(scenario_id)
            .bind(source)
            .bind(target)
            .bind(&relation.relation_description)
            .bind(&relation.relationship_status)
            .bind(serde_json::to_string(&participant_names)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to commit extraction")?;
        Ok(())
    }

    /// Trait observations of one scenario, keyed by the mention name.
    pub async fn trait_observations(
        &self,
        scenario_id: i64,
    ) -> Result<(
        Vec<(String, IndividualTraitSet)>,
        Vec<(String, GroupTraitSet)>,
    )> {
        let rows = sqlx::query(
            "SELECT a.name_or_alias, t.traits_json FROM individual_traits t \
             JOIN actors a ON a.id = t.actor_id WHERE t.scenario_id = ? ORDER BY t.id",
        )
        .bind(scenario_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load individual trait rows")?;
        let mut individuals = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let json: String = row.try_get(1)?;
            individuals.push((name, serde_json::from_str(&json)?));
        }

        let rows = sqlx::query(
            "SELECT a.name_or_alias, t.traits_json FROM group_traits t \
             JOIN actors a ON a.id = t.actor_id WHERE t.scenario_id = ? ORDER BY t.id",
        )
        .bind(scenario_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load group trait rows")?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let json: String = row.try_get(1)?;
            groups.push((name, serde_json::from_str(&json)?));
        }

        Ok((individuals, groups))
    }

    pub async fn interactions(&self, scenario_id: i64) -> Result<Vec<StoredInteraction>> {
        let rows = sqlx::query(
            "SELECT i.behavior_id, a.name_or_alias, i.description, i.env FROM interactions i \
             JOIN actors a ON a.id = i.actor_id WHERE i.scenario_id = ? ORDER BY i.id",
        )
        .bind(scenario_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load interactions")?;

        rows.into_iter()
            .map(|row| {
                Ok(StoredInteraction {
                    behavior_id: row.try_get(0)?,
                    actor_name: row.try_get(1)?,
                    description: row.try_get(2)?,
                    env: row.try_get(3)?,
                })
            })
            .collect()
    }

    pub async fn relations(&self, scenario_id: i64) -> Result<Vec<StoredRelation>> {
        let rows = sqlx::query(
            "SELECT relation_description, relationship_status, participants_json \
             FROM interaction_relations WHERE scenario_id = ? ORDER BY id",
        )
        .bind(scenario_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load relations")?;
        rows.into_iter().map(relation_from_row).collect()
    }

    /// Every relation across all of a user's scenarios, for relationship
    /// aggregation.
    pub async fn user_relations(&self, user_id: &str) -> Result<Vec<StoredRelation>> {
        let rows = sqlx::query(
            "SELECT r.relation_description, r.relationship_status, r.participants_json \
             FROM interaction_relations r JOIN scenarios s ON s.id = r.scenario_id \
             WHERE s.user_id = ? ORDER BY r.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load user relations")?;
        rows.into_iter().map(relation_from_row).collect()
    }

    // =========================================================================
    // Canonical profiles
    // =========================================================================

    pub async fn individual_profiles(&self, user_id: &str) -> Result<Vec<IndividualProfile>> {
        let rows = sqlx::query(
            "SELECT id, user_id, canonical_name, aliases_json, traits_json, last_updated \
             FROM individual_profiles WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load individual profiles")?;

        rows.into_iter()
            .map(|row| {
                Ok(IndividualProfile {
                    id: row.try_get(0)?,
                    user_id: row.try_get(1)?,
                    canonical_name: row.try_get(2)?,
                    aliases: serde_json::from_str(&row.try_get::<String, _>(3)?)?,
                    traits: serde_json::from_str(&row.try_get::<String, _>(4)?)?,
                    last_updated: DateTime::from_timestamp(row.try_get(5)?, 0)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    pub async fn group_profiles(&self, user_id: &str) -> Result<Vec<GroupProfile>> {
        let rows = sqlx::query(
            "SELECT id, user_id, canonical_name, aliases_json, traits_json, last_updated \
             FROM group_profiles WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load group profiles")?;

        rows.into_iter()
            .map(|row| {
                Ok(GroupProfile {
                    id: row.try_get(0)?,
                    user_id: row.try_get(1)?,
                    canonical_name: row.try_get(2)?,
                    aliases: serde_json::from_str(&row.try_get::<String, _>(3)?)?,
                    traits: serde_json::from_str(&row.try_get::<String, _>(4)?)?,
                    last_updated: DateTime::from_timestamp(row.try_get(5)?, 0)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Apply a resolved individual merge as one transaction. Either every
    /// write lands or none do.
    pub async fn apply_individual_merge(
        &self,
        user_id: &str,
        writes: &[ResolvedProfileWrite<IndividualTraitSet>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();
        for write in writes {
            let aliases_json = serde_json::to_string(&write.aliases)?;
            let traits_json = serde_json::to_string(&write.traits)?;
            match write.id {
                Some(id) => {
                    sqlx::query(
                        "UPDATE individual_profiles SET canonical_name = ?, aliases_json = ?, traits_json = ?, last_updated = ? \
                         WHERE id = ? AND user_id = ?",
                    )
                    .bind(&write.canonical_name)
                    .bind(&aliases_json)
                    .bind(&traits_json)
                    .bind(now)
                    .bind(id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO individual_profiles (user_id, canonical_name, aliases_json, traits_json, last_updated) \
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(user_id)
                    .bind(&write.canonical_name)
                    .bind(&aliases_json)
                    .bind(&traits_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit()
            .await
            .context("Failed to commit individual merge")?;
        Ok(())
    }

    pub async fn apply_group_merge(
        &self,
        user_id: &str,
        writes: &[ResolvedProfileWrite<GroupTraitSet>],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();
        for write in writes {
            let aliases_json = serde_json::to_string(&write.aliases)?;
            let traits_json = serde_json::to_string(&write.traits)?;
            match write.id {
                Some(id) => {
                    sqlx::query(
                        "UPDATE group_profiles SET canonical_name = ?, aliases_json = ?, traits_json = ?, last_updated = ? \
                         WHERE id = ? AND user_id = ?",
                    )
                    .bind(&write.canonical_name)
                    .bind(&aliases_json)
                    .bind(&traits_json)
                    .bind(now)
                    .bind(id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO group_profiles (user_id, canonical_name, aliases_json, traits_json, last_updated) \
                         VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(user_id)
                    .bind(&write.canonical_name)
                    .bind(&aliases_json)
                    .bind(&traits_json)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await.context("Failed to commit group merge")?;
        Ok(())
    }

    /// Remove an actor from both profile tables by canonical name,
    /// case-insensitively. Returns the number of rows deleted.
    pub async fn delete_actor_profiles(&self, user_id: &str, name: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let a = sqlx::query(
            "DELETE FROM individual_profiles WHERE user_id = ? AND LOWER(canonical_name) = LOWER(?)",
        )
        .bind(user_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let b = sqlx::query(
            "DELETE FROM group_profiles WHERE user_id = ? AND LOWER(canonical_name) = LOWER(?)",
        )
        .bind(user_id)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        tx.commit()
            .await
            .context("Failed to commit profile deletion")?;
        Ok(a.rows_affected() + b.rows_affected())
    }

    // =========================================================================
    // Global snapshot and graph cache
    // =========================================================================

    pub async fn global_snapshot(&self, user_id: &str) -> Result<Option<GlobalActorsSnapshot>> {
        let row = sqlx::query("SELECT snapshot_json FROM global_actor_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load global snapshot")?;
        row.map(|r| {
            let json: String = r.try_get(0)?;
            Ok(serde_json::from_str(&json)?)
        })
        .transpose()
    }

    pub async fn upsert_global_snapshot(
        &self,
        user_id: &str,
        snapshot: &GlobalActorsSnapshot,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO global_actor_profiles (user_id, snapshot_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET snapshot_json = excluded.snapshot_json, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(serde_json::to_string(snapshot)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert global snapshot")?;
        Ok(())
    }

    pub async fn graph(&self, user_id: &str) -> Result<Option<SocialGraph>> {
        let row = sqlx::query("SELECT graph_json FROM graph_cache WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load graph cache")?;
        row.map(|r| {
            let json: String = r.try_get(0)?;
            Ok(serde_json::from_str(&json)?)
        })
        .transpose()
    }

    pub async fn upsert_graph(&self, user_id: &str, graph: &SocialGraph) -> Result<()> {
        sqlx::query(
            "INSERT INTO graph_cache (user_id, graph_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET graph_json = excluded.graph_json, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(serde_json::to_string(graph)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert graph cache")?;
        Ok(())
    }

    // =========================================================================
    // Scenario summaries
    // =========================================================================

    pub async fn upsert_summary(
        &self,
        scenario_id: i64,
        kind: SummaryKind,
        content: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO scenario_summaries (scenario_id, kind, content, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(scenario_id, kind) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        )
        .bind(scenario_id)
        .bind(kind.as_str())
        .bind(content)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to upsert scenario summary")?;
        Ok(())
    }

    pub async fn summaries(&self, scenario_id: i64) -> Result<Vec<(SummaryKind, String)>> {
        let rows = sqlx::query(
            "SELECT kind, content FROM scenario_summaries WHERE scenario_id = ? ORDER BY kind",
        )
        .bind(scenario_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load scenario summaries")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get(0)?;
            let kind = kind
                .parse::<SummaryKind>()
                .map_err(|e| anyhow::anyhow!(e))?;
            out.push((kind, row.try_get(1)?));
        }
        Ok(out)
    }

    // =========================================================================
    // Simulations
    // =========================================================================

    pub async fn insert_generated_simulation(
        &self,
        user_id: &str,
        actors: &[String],
        scenario_text: &str,
        transcript: &[Turn],
        profile_lines: &[String],
        relation_lines: &[String],
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO generated_simulations \
             (user_id, actors_json, scenario_text, transcript_json, profiles_json, relations_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(serde_json::to_string(actors)?)
        .bind(scenario_text)
        .bind(serde_json::to_string(transcript)?)
        .bind(serde_json::to_string(profile_lines)?)
        .bind(serde_json::to_string(relation_lines)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert generated simulation")?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_generated_simulation(
        &self,
        id: i64,
        user_id: &str,
    ) -> kith_core::Result<GeneratedSimulation> {
        let row = sqlx::query(
            "SELECT id, user_id, actors_json, scenario_text, transcript_json, profiles_json, relations_json, created_at \
             FROM generated_simulations WHERE id = ? AND user_id = ?",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load generated simulation")?
        .ok_or_else(|| KithError::NotFound(format!("simulation {id}")))?;

        Ok(GeneratedSimulation {
            id: row.try_get(0).context("bad simulation row")?,
            user_id: row.try_get(1).context("bad simulation row")?,
            actors: parse_json_column(&row, 2)?,
            scenario_text: row.try_get(3).context("bad simulation row")?,
            transcript: parse_json_column(&row, 4)?,
            profile_lines: parse_json_column(&row, 5)?,
            relation_lines: parse_json_column(&row, 6)?,
            created_at: DateTime::from_timestamp(
                row.try_get(7).context("bad simulation row")?,
                0,
            )
            .unwrap_or_default(),
        })
    }

    pub async fn create_live_session(
        &self,
        user_id: &str,
        actors: &[String],
        scenario_text: &str,
        transcript: &[Turn],
        profile_lines: &[String],
        relation_lines: &[String],
    ) -> Result<LiveSession> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO live_simulations \
             (session_id, user_id, actors_json, scenario_text, transcript_json, profiles_json, relations_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(user_id)
        .bind(serde_json::to_string(actors)?)
        .bind(scenario_text)
        .bind(serde_json::to_string(transcript)?)
        .bind(serde_json::to_string(profile_lines)?)
        .bind(serde_json::to_string(relation_lines)?)
        .bind(now.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create live session")?;

        Ok(LiveSession {
            session_id,
            user_id: user_id.to_string(),
            actors: actors.to_vec(),
            scenario_text: scenario_text.to_string(),
            transcript: transcript.to_vec(),
            profile_lines: profile_lines.to_vec(),
            relation_lines: relation_lines.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_live_session(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> kith_core::Result<LiveSession> {
        let row = sqlx::query(
            "SELECT session_id, user_id, actors_json, scenario_text, transcript_json, profiles_json, relations_json, created_at, updated_at \
             FROM live_simulations WHERE session_id = ? AND user_id = ?",
        )
        .bind(session_id.to_string())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load live session")?
        .ok_or_else(|| KithError::NotFound(format!("live session {session_id}")))?;

        let raw_id: String = row.try_get(0).context("bad live session row")?;
        Ok(LiveSession {
            session_id: raw_id.parse().context("bad live session id")?,
            user_id: row.try_get(1).context("bad live session row")?,
            actors: parse_json_column(&row, 2)?,
            scenario_text: row.try_get(3).context("bad live session row")?,
            transcript: parse_json_column(&row, 4)?,
            profile_lines: parse_json_column(&row, 5)?,
            relation_lines: parse_json_column(&row, 6)?,
            created_at: DateTime::from_timestamp(
                row.try_get(7).context("bad live session row")?,
                0,
            )
            .unwrap_or_default(),
            updated_at: DateTime::from_timestamp(
                row.try_get(8).context("bad live session row")?,
                0,
            )
            .unwrap_or_default(),
        })
    }

    pub async fn update_live_transcript(
        &self,
        session_id: Uuid,
        transcript: &[Turn],
    ) -> Result<()> {
        sqlx::query(
            "UPDATE live_simulations SET transcript_json = ?, updated_at = ? WHERE session_id = ?",
        )
        .bind(serde_json::to_string(transcript)?)
        .bind(Utc::now().timestamp())
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update live transcript")?;
        Ok(())
    }
}

fn scenario_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Scenario> {
    Ok(Scenario {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        text: row.try_get(2)?,
        submitted_at: DateTime::from_timestamp(row.try_get(3)?, 0).unwrap_or_default(),
        submission_count: row.try_get(4)?,
    })
}

fn relation_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StoredRelation> {
    let participants_json: String = row.try_get(2)?;
    Ok(StoredRelation {
        relation_description: row.try_get(0)?,
        relationship_status: row.try_get(1)?,
        participants: serde_json::from_str(&participants_json)?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    index: usize,
) -> Result<T> {
    let json: String = row.try_get(index).context("bad JSON column")?;
    serde_json::from_str(&json).context("failed to decode JSON column")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kith_core::scenario::{
        ActorKind, ExtractedActor, ExtractedIndividualTraits, ExtractedInteraction,
        ExtractedRelation,
    };

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("test.db")).await.unwrap();
        (dir, store)
    }

    fn sample_extraction() -> ScenarioExtraction {
        ScenarioExtraction {
            actors: vec![
                ExtractedActor {
                    ref_id: "A1".into(),
                    name_or_alias: "Me".into(),
                    kind: ActorKind::Individual,
                },
                ExtractedActor {
                    ref_id: "A2".into(),
                    name_or_alias: "John".into(),
                    kind: ActorKind::Individual,
                },
            ],
            individual_traits: vec![ExtractedIndividualTraits {
                actor_ref_id: "A2".into(),
                traits: IndividualTraitSet {
                    personality: Some("direct".into()),
                    ..Default::default()
                },
            }],
            group_traits: vec![],
            interactions: vec![
                ExtractedInteraction {
                    behavior_id: "B1".into(),
                    actor_ref_id: "A1".into(),
                    description: "asked for advice".into(),
                    env: Some("office".into()),
                },
                ExtractedInteraction {
                    behavior_id: "B2".into(),
                    actor_ref_id: "A2".into(),
                    description: "gave advice".into(),
                    env: None,
                },
            ],
            relations: vec![ExtractedRelation {
                source_behavior_id: "B1".into(),
                target_behavior_id: "B2".into(),
                relation_description: "mentoring exchange".into(),
                participants: vec!["A1".into(), "A2".into()],
                relationship_status: Some("mentor and mentee".into()),
            }],
        }
    }

    #[tokio::test]
    async fn test_scenario_revision_cap() {
        let (_dir, store) = temp_store().await;
        let scenario = store.insert_scenario("u1", "first draft").await.unwrap();
        assert_eq!(scenario.submission_count, 1);

        let revised = store
            .revise_scenario(scenario.id, "u1", "second draft")
            .await
            .unwrap();
        assert_eq!(revised.submission_count, 2);

        let err = store
            .revise_scenario(scenario.id, "u1", "third draft")
            .await
            .unwrap_err();
        assert!(matches!(err, KithError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_revise_foreign_scenario_is_not_found() {
        let (_dir, store) = temp_store().await;
        let scenario = store.insert_scenario("u1", "text").await.unwrap();
        let err = store
            .revise_scenario(scenario.id, "someone-else", "text")
            .await
            .unwrap_err();
        assert!(matches!(err, KithError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_extraction_round_trip_and_replace() {
        let (_dir, store) = temp_store().await;
        let scenario = store.insert_scenario("u1", "text").await.unwrap();
        store
            .replace_extraction(scenario.id, &sample_extraction())
            .await
            .unwrap();

        let (individuals, groups) = store.trait_observations(scenario.id).await.unwrap();
        assert_eq!(individuals.len(), 1);
        assert_eq!(individuals[0].0, "John");
        assert!(groups.is_empty());

        let relations = store.relations(scenario.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].participants, vec!["Me", "John"]);

        // A revision replaces everything.
        let mut second = sample_extraction();
        second.relations.clear();
        store.replace_extraction(scenario.id, &second).await.unwrap();
        assert!(store.relations(scenario.id).await.unwrap().is_empty());
        assert_eq!(store.interactions(scenario.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_scenario_cascades() {
        let (_dir, store) = temp_store().await;
        let scenario = store.insert_scenario("u1", "text").await.unwrap();
        store
            .replace_extraction(scenario.id, &sample_extraction())
            .await
            .unwrap();
        store.delete_scenario(scenario.id, "u1").await.unwrap();

        assert!(store.get_scenario(scenario.id).await.unwrap().is_none());
        assert!(store.interactions(scenario.id).await.unwrap().is_empty());
        assert!(store.user_relations("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profile_merge_insert_then_update() {
        let (_dir, store) = temp_store().await;
        store
            .apply_individual_merge(
                "u1",
                &[ResolvedProfileWrite {
                    id: None,
                    canonical_name: "John".into(),
                    aliases: vec!["John".into()],
                    traits: IndividualTraitSet::default(),
                }],
            )
            .await
            .unwrap();

        let profiles = store.individual_profiles("u1").await.unwrap();
        assert_eq!(profiles.len(), 1);

        store
            .apply_individual_merge(
                "u1",
                &[ResolvedProfileWrite {
                    id: Some(profiles[0].id),
                    canonical_name: "John".into(),
                    aliases: vec!["John".into(), "Johnny".into()],
                    traits: IndividualTraitSet {
                        family: Some("two kids".into()),
                        ..Default::default()
                    },
                }],
            )
            .await
            .unwrap();

        let profiles = store.individual_profiles("u1").await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].aliases, vec!["John", "Johnny"]);
        assert_eq!(profiles[0].traits.family.as_deref(), Some("two kids"));
    }

    #[tokio::test]
    async fn test_delete_actor_profiles_case_insensitive() {
        let (_dir, store) = temp_store().await;
        store
            .apply_individual_merge(
                "u1",
                &[ResolvedProfileWrite {
                    id: None,
                    canonical_name: "John".into(),
                    aliases: vec!["John".into()],
                    traits: IndividualTraitSet::default(),
                }],
            )
            .await
            .unwrap();
        let deleted = store.delete_actor_profiles("u1", "JOHN").await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.individual_profiles("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_upsert_overwrites() {
        let (_dir, store) = temp_store().await;
        let scenario = store.insert_scenario("u1", "text").await.unwrap();
        store
            .upsert_summary(scenario.id, SummaryKind::Actors, "first")
            .await
            .unwrap();
        store
            .upsert_summary(scenario.id, SummaryKind::Actors, "second")
            .await
            .unwrap();

        let summaries = store.summaries(scenario.id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].1, "second");
    }

    #[tokio::test]
    async fn test_live_session_round_trip() {
        let (_dir, store) = temp_store().await;
        let session = store
            .create_live_session(
                "u1",
                &["Me".into(), "John".into()],
                "a charged dinner conversation about money and plans",
                &[],
                &["Me: calm".into()],
                &[],
            )
            .await
            .unwrap();

        let err = store
            .get_live_session(session.session_id, "other-user")
            .await
            .unwrap_err();
        assert!(matches!(err, KithError::NotFound(_)));

        let turns = vec![Turn::speech("Me", "Shall we start?")];
        store
            .update_live_transcript(session.session_id, &turns)
            .await
            .unwrap();
        let loaded = store
            .get_live_session(session.session_id, "u1")
            .await
            .unwrap();
        assert_eq!(loaded.transcript.len(), 1);
        assert_eq!(loaded.transcript[0].content, "Shall we start?");
    }

    #[tokio::test]
    async fn test_snapshot_and_graph_upsert() {
        let (_dir, store) = temp_store().await;
        assert!(store.global_snapshot("u1").await.unwrap().is_none());

        let snapshot = GlobalActorsSnapshot::default();
        store.upsert_global_snapshot("u1", &snapshot).await.unwrap();
        store.upsert_global_snapshot("u1", &snapshot).await.unwrap();
        assert!(store.global_snapshot("u1").await.unwrap().is_some());

        let graph = SocialGraph::default();
        store.upsert_graph("u1", &graph).await.unwrap();
        assert_eq!(store.graph("u1").await.unwrap().unwrap(), graph);
    }
}
