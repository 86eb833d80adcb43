//! Pipeline orchestration.
//!
//! Submission is synchronous: validate, persist the scenario, extract,
//! persist the extraction. Derivation fans out afterwards: the five
//! summary stages run as independent tasks, while the aggregation chord
//! runs both profile merges, then rebuilds the global snapshot, then the
//! graph. Merges for one user are serialized behind a per-user lock.

use crate::aggregate::{aggregate_groups, aggregate_individuals};
use crate::graph::build_graph;
use crate::relations::aggregate_statuses;
use kith_core::graph::SocialGraph;
use kith_core::profile::{flatten_entries, GlobalActorsSnapshot};
use kith_core::scenario::{Scenario, SummaryKind};
use kith_core::validation::{validate_scenario_text, Language};
use kith_core::{KithError, Result};
use kith_oracle::extraction::extract_scenario;
use kith_oracle::summaries::{categorize_actors, scenario_summary, SummaryInputs};
use kith_oracle::{LlmClient, SemanticRetrieval};
use kith_store::SqliteStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-stage outcome of one derivation run.
#[derive(Debug, Default)]
pub struct StageReport {
    pub completed: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl StageReport {
    fn record(&mut self, stage: &str, result: std::result::Result<(), String>) {
        match result {
            Ok(()) => self.completed.push(stage.to_string()),
            Err(e) => {
                tracing::warn!("stage {stage} failed: {e}");
                self.failures.push((stage.to_string(), e));
            }
        }
    }

    pub fn all_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: SqliteStore,
    llm: Arc<dyn LlmClient>,
    retrieval: Arc<dyn SemanticRetrieval>,
    language: Language,
    user_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Pipeline {
    pub fn new(
        store: SqliteStore,
        llm: Arc<dyn LlmClient>,
        retrieval: Arc<dyn SemanticRetrieval>,
        language: Language,
    ) -> Self {
        Self {
            store,
            llm,
            retrieval,
            language,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // One lock per user, kept for the life of the process; nothing evicts
    // an entry, so the map grows with the number of distinct users seen.
    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // =========================================================================
    // Submission (synchronous phase)
    // =========================================================================

    /// Validate, persist, and extract a new scenario. The scenario row
    /// survives an extraction failure; its entities are all-or-nothing.
    pub async fn submit_scenario(&self, user_id: &str, text: &str) -> Result<Scenario> {
        validate_scenario_text(text, self.language)?;
        let scenario = self.store.insert_scenario(user_id, text).await?;
        tracing::info!(scenario_id = scenario.id, user_id, "scenario submitted");
        self.extract_and_store(&scenario).await?;
        Ok(scenario)
    }

    /// Revise a scenario's text (allowed once) and re-extract.
    pub async fn revise_scenario(
        &self,
        scenario_id: i64,
        user_id: &str,
        text: &str,
    ) -> Result<Scenario> {
        validate_scenario_text(text, self.language)?;
        let scenario = self.store.revise_scenario(scenario_id, user_id, text).await?;
        self.extract_and_store(&scenario).await?;
        Ok(scenario)
    }

    async fn extract_and_store(&self, scenario: &Scenario) -> Result<()> {
        let extraction = extract_scenario(self.llm.as_ref(), &scenario.text, self.language).await?;
        self.store.replace_extraction(scenario.id, &extraction).await?;
        tracing::info!(
            scenario_id = scenario.id,
            actors = extraction.actors.len(),
            interactions = extraction.interactions.len(),
            "extraction persisted"
        );
        Ok(())
    }

    /// Delete a scenario and everything scoped to it.
    pub async fn delete_scenario(&self, scenario_id: i64, user_id: &str) -> Result<()> {
        self.store.delete_scenario(scenario_id, user_id).await
    }

    // =========================================================================
    // Derivation (async phase)
    // =========================================================================

    /// Run every derived stage for a scenario: the five summaries fan out
    /// as independent tasks; the aggregation chord merges profiles, then
    /// rebuilds the snapshot and graph. Individual stage failures are
    /// reported, not propagated; later chord steps still run.
    pub async fn run_derivations(&self, scenario_id: i64) -> Result<StageReport> {
        let scenario = self
            .store
            .get_scenario(scenario_id)
            .await?
            .ok_or_else(|| KithError::NotFound(format!("scenario {scenario_id}")))?;

        let inputs = self.summary_inputs(&scenario).await?;
        let mut handles = Vec::new();
        for kind in SummaryKind::ALL {
            let pipeline = self.clone();
            let user_id = scenario.user_id.clone();
            let inputs = inputs.clone();
            handles.push(tokio::spawn(async move {
                let result = pipeline
                    .run_summary_stage(scenario_id, &user_id, kind, &inputs)
                    .await;
                (format!("summary:{}", kind.as_str()), result)
            }));
        }

        let mut report = StageReport::default();
        self.run_aggregation_chord(&scenario, &mut report).await;

        for handle in handles {
            match handle.await {
                Ok((stage, result)) => report.record(&stage, result),
                Err(e) => report.record("summary", Err(format!("task panicked: {e}"))),
            }
        }
        Ok(report)
    }

    async fn run_summary_stage(
        &self,
        scenario_id: i64,
        user_id: &str,
        kind: SummaryKind,
        inputs: &SummaryInputs,
    ) -> std::result::Result<(), String> {
        let summary = scenario_summary(
            self.llm.as_ref(),
            self.retrieval.as_ref(),
            user_id,
            kind,
            inputs,
        )
        .await
        .map_err(|e| e.to_string())?;
        self.store
            .upsert_summary(scenario_id, kind, &summary)
            .await
            .map_err(|e| e.to_string())
    }

    /// join(individual merge, group merge) -> snapshot -> graph. Branch
    /// failures are recorded and the later steps run over whatever
    /// profiles exist.
    async fn run_aggregation_chord(&self, scenario: &Scenario, report: &mut StageReport) {
        let lock = self.user_lock(&scenario.user_id).await;
        let _guard = lock.lock().await;

        report.record(
            "aggregate:individuals",
            aggregate_individuals(&self.store, self.llm.as_ref(), &scenario.user_id, scenario.id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        );
        report.record(
            "aggregate:groups",
            aggregate_groups(&self.store, self.llm.as_ref(), &scenario.user_id, scenario.id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        );
        report.record(
            "snapshot",
            self.rebuild_snapshot(&scenario.user_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        );
        report.record(
            "graph",
            self.rebuild_graph(&scenario.user_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
        );
    }

    async fn summary_inputs(&self, scenario: &Scenario) -> Result<SummaryInputs> {
        let (individuals, groups) = self.store.trait_observations(scenario.id).await?;
        let mut trait_lines = Vec::new();
        for (name, traits) in &individuals {
            trait_lines.push(flatten_entries(name, &traits.entries()));
        }
        for (name, traits) in &groups {
            trait_lines.push(flatten_entries(name, &traits.entries()));
        }

        let interaction_lines = self
            .store
            .interactions(scenario.id)
            .await?
            .into_iter()
            .map(|i| match i.env {
                Some(env) => format!("{} {}: {} (env: {env})", i.behavior_id, i.actor_name, i.description),
                None => format!("{} {}: {}", i.behavior_id, i.actor_name, i.description),
            })
            .collect();

        let relation_lines = self
            .store
            .relations(scenario.id)
            .await?
            .into_iter()
            .map(|r| {
                let status = r.relationship_status.as_deref().unwrap_or("unknown");
                format!(
                    "{} [{status}] participants: {}",
                    r.relation_description,
                    r.participants.join(", ")
                )
            })
            .collect();

        Ok(SummaryInputs {
            scenario_text: scenario.text.clone(),
            trait_lines,
            interaction_lines,
            relation_lines,
        })
    }

    // =========================================================================
    // Snapshot and graph rebuilds
    // =========================================================================

    pub async fn rebuild_snapshot(&self, user_id: &str) -> Result<GlobalActorsSnapshot> {
        let individuals = self.store.individual_profiles(user_id).await?;
        let groups = self.store.group_profiles(user_id).await?;

        let individual_lines: Vec<String> = individuals
            .iter()
            .map(|p| flatten_entries(&p.canonical_name, &p.traits.entries()))
            .collect();
        let group_lines: Vec<String> = groups
            .iter()
            .map(|p| flatten_entries(&p.canonical_name, &p.traits.entries()))
            .collect();

        let snapshot = categorize_actors(self.llm.as_ref(), &individual_lines, &group_lines).await?;
        self.store.upsert_global_snapshot(user_id, &snapshot).await?;
        Ok(snapshot)
    }

    pub async fn rebuild_graph(&self, user_id: &str) -> Result<SocialGraph> {
        let snapshot = self
            .store
            .global_snapshot(user_id)
            .await?
            .unwrap_or_default();
        let relations = self.store.user_relations(user_id).await?;
        let individuals = self.store.individual_profiles(user_id).await?;
        let groups = self.store.group_profiles(user_id).await?;

        let statuses = aggregate_statuses(&relations, &individuals, &groups);
        let graph = build_graph(self.llm.as_ref(), &snapshot, &statuses).await;
        self.store.upsert_graph(user_id, &graph).await?;
        Ok(graph)
    }

    // =========================================================================
    // Actor removal
    // =========================================================================

    /// Remove one actor everywhere: both profile tables, the snapshot
    /// buckets, and the cached graph get an optimistic edit first, then
    /// both derived artifacts are rebuilt from what remains.
    pub async fn remove_actor(&self, user_id: &str, name: &str) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let deleted = self.store.delete_actor_profiles(user_id, name).await?;
        if deleted == 0 {
            return Err(KithError::NotFound(format!("actor {name}")));
        }

        if let Some(mut snapshot) = self.store.global_snapshot(user_id).await? {
            snapshot.remove_actor(name);
            self.store.upsert_global_snapshot(user_id, &snapshot).await?;
        }
        if let Some(mut graph) = self.store.graph(user_id).await? {
            graph.remove_actor(name);
            self.store.upsert_graph(user_id, &graph).await?;
        }

        self.rebuild_snapshot(user_id).await?;
        self.rebuild_graph(user_id).await?;
        Ok(())
    }
}
