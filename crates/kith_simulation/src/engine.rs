//! Simulation engine.
//!
//! Both modes freeze the participants' profiles and the relations fully
//! contained in the selection at start time; later profile merges never
//! reach a running simulation.

use kith_core::profile::{flatten_entries, SELF_NAME};
use kith_core::simulation::{Turn, MAX_BATCH_TURNS, MAX_LIVE_TURNS};
use kith_core::validation::{validate_actor_selection, validate_simulation_text};
use kith_core::{KithError, Result};
use kith_oracle::simulate::{generate_transcript, next_turns};
use kith_oracle::LlmClient;
use kith_pipeline::relations::resolve_canonical;
use kith_store::{GeneratedSimulation, LiveSession, SqliteStore};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub struct SimulationEngine {
    store: SqliteStore,
    llm: Arc<dyn LlmClient>,
}

impl SimulationEngine {
    pub fn new(store: SqliteStore, llm: Arc<dyn LlmClient>) -> Self {
        Self { store, llm }
    }

    /// Profile lines for the selected actors (individuals first, then
    /// groups) and the relations whose entire resolved participant set
    /// falls inside the selection.
    async fn freeze(&self, user_id: &str, actors: &[String]) -> Result<(Vec<String>, Vec<String>)> {
        let individuals = self.store.individual_profiles(user_id).await?;
        let groups = self.store.group_profiles(user_id).await?;

        let mut profile_lines = Vec::with_capacity(actors.len());
        for actor in actors {
            if let Some(p) = individuals.iter().find(|p| &p.canonical_name == actor) {
                profile_lines.push(flatten_entries(actor, &p.traits.entries()));
            } else if let Some(p) = groups.iter().find(|p| &p.canonical_name == actor) {
                profile_lines.push(flatten_entries(actor, &p.traits.entries()));
            } else {
                // Unknown names still take part, just without history.
                profile_lines.push(actor.clone());
            }
        }

        let selection: HashSet<&str> = actors.iter().map(String::as_str).collect();
        let relation_lines = self
            .store
            .user_relations(user_id)
            .await?
            .into_iter()
            .filter_map(|r| {
                let resolved: Vec<String> = r
                    .participants
                    .iter()
                    .map(|p| resolve_canonical(p, &individuals, &groups))
                    .collect();
                if resolved.is_empty()
                    || !resolved.iter().all(|p| selection.contains(p.as_str()))
                {
                    return None;
                }
                let status = r.relationship_status.as_deref().unwrap_or("unknown");
                Some(format!(
                    "{} [{status}] between {}",
                    r.relation_description,
                    resolved.join(", ")
                ))
            })
            .collect();

        Ok((profile_lines, relation_lines))
    }

    // =========================================================================
    // Batch mode
    // =========================================================================

    /// Generate and persist a one-shot simulation. The transcript is
    /// truncated to the batch cap before it is stored.
    pub async fn run_batch(
        &self,
        user_id: &str,
        actors: &[String],
        scenario_text: &str,
    ) -> Result<GeneratedSimulation> {
        validate_actor_selection(actors)?;
        validate_simulation_text(scenario_text)?;

        let (profile_lines, relation_lines) = self.freeze(user_id, actors).await?;
        let mut transcript =
            generate_transcript(self.llm.as_ref(), scenario_text, &profile_lines, &relation_lines)
                .await?;
        if transcript.len() > MAX_BATCH_TURNS {
            tracing::debug!(
                "truncating batch transcript from {} to {MAX_BATCH_TURNS} turns",
                transcript.len()
            );
            transcript.truncate(MAX_BATCH_TURNS);
        }

        let id = self
            .store
            .insert_generated_simulation(
                user_id,
                actors,
                scenario_text,
                &transcript,
                &profile_lines,
                &relation_lines,
            )
            .await?;
        self.store.get_generated_simulation(id, user_id).await
    }

    // =========================================================================
    // Live mode
    // =========================================================================

    /// Open a live session with frozen snapshots and an empty transcript.
    pub async fn start_session(
        &self,
        user_id: &str,
        actors: &[String],
        scenario_text: &str,
    ) -> Result<LiveSession> {
        validate_actor_selection(actors)?;
        validate_simulation_text(scenario_text)?;

        let (profile_lines, relation_lines) = self.freeze(user_id, actors).await?;
        let session = self
            .store
            .create_live_session(
                user_id,
                actors,
                scenario_text,
                &[],
                &profile_lines,
                &relation_lines,
            )
            .await?;
        tracing::info!(session_id = %session.session_id, user_id, "live session opened");
        Ok(session)
    }

    /// Play one live exchange: append the user's speech turn, ask the
    /// oracle for responses, append them capped at the session limit. An
    /// oracle failure appends a single error turn instead; the user's turn
    /// is preserved either way.
    pub async fn take_turn(
        &self,
        user_id: &str,
        session_id: Uuid,
        user_actor: &str,
        message: &str,
    ) -> Result<LiveSession> {
        if message.trim().is_empty() {
            return Err(KithError::Validation("message must not be empty".into()));
        }
        let mut session = self.store.get_live_session(session_id, user_id).await?;
        if user_actor != SELF_NAME && !session.actors.iter().any(|a| a == user_actor) {
            return Err(KithError::Validation(format!(
                "{user_actor} is not part of this simulation"
            )));
        }
        if session.transcript.len() >= MAX_LIVE_TURNS {
            return Err(KithError::MaxTurnsReached(MAX_LIVE_TURNS));
        }

        session.transcript.push(Turn::speech(user_actor, message));

        let room = MAX_LIVE_TURNS - session.transcript.len();
        match next_turns(
            self.llm.as_ref(),
            &session.scenario_text,
            &session.profile_lines,
            &session.relation_lines,
            user_actor,
            &session.transcript,
        )
        .await
        {
            Ok(turns) => {
                session.transcript.extend(turns.into_iter().take(room));
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, "live turn oracle failure: {e}");
                if room > 0 {
                    session
                        .transcript
                        .push(Turn::error(format!("simulation interrupted: {e}")));
                }
            }
        }

        self.store
            .update_live_transcript(session_id, &session.transcript)
            .await?;
        Ok(session)
    }
}
