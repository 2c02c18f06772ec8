//! The round orchestrator: a strict generation → publication → notification
//! pipeline with a persistence checkpoint after every status transition.
//!
//! Rounds for different projects run concurrently; rounds for the same
//! project are serialized by an in-flight guard held for the duration of
//! `submit_round`. A second submission for a busy project fails immediately
//! with `Conflict` rather than queueing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::errors::{OrchestratorError, StoreError};
use crate::gateway::{
    Attachment, GenerationGateway, GenerationRequest, Notification, NotificationGateway,
    PublicationGateway, PublishRequest,
};
use crate::store::{
    DbHandle, FailureReason, Project, Round, RoundResult, RoundStatus, StatusTransition,
};

/// Inbound round request: the instruction plus optional evaluation criteria
/// and attachments forwarded to the generation backend.
#[derive(Debug, Clone, Default)]
pub struct RoundRequest {
    pub instruction: String,
    pub checks: Vec<String>,
    pub attachments: Vec<Attachment>,
}

impl RoundRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }
}

/// Exclusive per-project marker, released when the round reaches a terminal
/// status (or the pipeline unwinds on a store error).
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    project_id: String,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<String>>>, project_id: &str) -> Option<Self> {
        let mut guard = match in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !guard.insert(project_id.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            project_id: project_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(&self.project_id);
    }
}

pub struct RoundOrchestrator {
    db: DbHandle,
    generation: GenerationGateway,
    publication: PublicationGateway,
    notification: NotificationGateway,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RoundOrchestrator {
    pub fn new(
        db: DbHandle,
        generation: GenerationGateway,
        publication: PublicationGateway,
        notification: NotificationGateway,
    ) -> Self {
        Self {
            db,
            generation,
            publication,
            notification,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run one round for a project, driving the pipeline to a terminal
    /// status. Gateway failures terminate the round, not the call: they are
    /// reported through the returned `RoundResult`, attributed to exactly
    /// one stage. Only `Conflict`, invalid input, and store errors are
    /// surfaced as `Err`.
    pub async fn submit_round(
        &self,
        project_id: &str,
        request: RoundRequest,
    ) -> Result<RoundResult, OrchestratorError> {
        if request.instruction.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "instruction must not be empty".to_string(),
            ));
        }

        let _guard = InFlightGuard::acquire(&self.in_flight, project_id).ok_or_else(|| {
            OrchestratorError::Conflict {
                project_id: project_id.to_string(),
            }
        })?;

        let project = {
            let id = project_id.to_string();
            self.db.call(move |db| db.get_or_create_project(&id)).await?
        };
        let number = {
            let id = project_id.to_string();
            self.db
                .call(move |db| db.next_round_number(&id))
                .await
                .map_err(|e| match e {
                    // A round left non-terminal by a crash blocks new rounds
                    // until reconciled; callers see it as a conflict.
                    StoreError::RoundInFlight { project_id, .. } => {
                        OrchestratorError::Conflict { project_id }
                    }
                    other => other.into(),
                })?
        };

        tracing::info!(project_id, round = number, "round accepted");

        let mut round = Round::new(project_id, number, &request.instruction);
        self.checkpoint(&round).await?;

        // Stage 1: generation.
        round.transition(RoundStatus::Generating);
        self.checkpoint(&round).await?;

        let prior_bundle = if number > 1 {
            let id = project_id.to_string();
            match self.db.call(move |db| db.latest_bundle_ref(&id)).await? {
                Some(reference) => {
                    let reference_owned = reference.clone();
                    Some(
                        self.db
                            .call(move |db| db.load_bundle(&reference_owned))
                            .await?,
                    )
                }
                None => None,
            }
        } else {
            None
        };

        let generation_request = GenerationRequest {
            instruction: request.instruction,
            checks: request.checks,
            attachments: request.attachments,
            prior_bundle,
        };

        let bundle = match self.generation.generate(&generation_request).await {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::error!(project_id, round = number, error = %e, "generation failed");
                round.fail(FailureReason::GenerationFailed, e.to_string());
                self.checkpoint(&round).await?;
                return Ok(RoundResult::from(&round));
            }
        };

        {
            let bundle = bundle.clone();
            self.db.call(move |db| db.save_bundle(&bundle)).await?;
        }
        round.bundle_ref = Some(bundle.reference.clone());
        round.transition(RoundStatus::Generated);
        self.checkpoint(&round).await?;

        // Stage 2: publication. The target is reused once established,
        // chosen fresh by the backend on an initial deployment.
        round.transition(RoundStatus::Publishing);
        self.checkpoint(&round).await?;

        let publish_request = PublishRequest {
            bundle,
            target: project.published_target.clone(),
            slug: project_id.to_string(),
        };

        let target = match self.publication.publish(&publish_request).await {
            Ok(target) => target,
            Err(e) => {
                // The generated bundle is retained in the artifact store so
                // a later round can revise it without regeneration.
                tracing::error!(project_id, round = number, error = %e, "publication failed");
                round.fail(FailureReason::PublicationFailed, e.to_string());
                self.checkpoint(&round).await?;
                return Ok(RoundResult::from(&round));
            }
        };

        round.published_target = Some(target.clone());
        round.transition(RoundStatus::Published);
        self.checkpoint(&round).await?;

        // Stage 3: notification. The artifact is already live here; a
        // failure is reported on the round record, never rolled back.
        round.transition(RoundStatus::Notifying);
        self.checkpoint(&round).await?;

        let notification = Notification {
            project_id: project_id.to_string(),
            round_number: number,
            target: target.clone(),
            bundle_ref: round.bundle_ref.clone().unwrap_or_default(),
        };

        match self.notification.notify(&notification).await {
            Ok(()) => {
                round.transition(RoundStatus::Completed);
                self.checkpoint(&round).await?;
                let id = project_id.to_string();
                self.db
                    .call(move |db| db.update_published_target(&id, &target))
                    .await?;
                tracing::info!(
                    project_id,
                    round = number,
                    target = %round.published_target.as_deref().unwrap_or_default(),
                    "round completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    project_id,
                    round = number,
                    target = %target,
                    error = %e,
                    "notification failed; artifact is live but the evaluator was not told"
                );
                round.fail(FailureReason::NotificationFailed, e.to_string());
                self.checkpoint(&round).await?;
            }
        }

        Ok(RoundResult::from(&round))
    }

    async fn checkpoint(&self, round: &Round) -> Result<(), StoreError> {
        let round = round.clone();
        self.db.call(move |db| db.save(&round)).await
    }

    // ── Read side, used by the HTTP surface ───────────────────────────

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>, StoreError> {
        let id = project_id.to_string();
        self.db.call(move |db| db.get_project(&id)).await
    }

    pub async fn get_round(&self, project_id: &str, number: i64) -> Result<Round, StoreError> {
        let id = project_id.to_string();
        self.db.call(move |db| db.load(&id, number)).await
    }

    pub async fn list_rounds(&self, project_id: &str) -> Result<Vec<Round>, StoreError> {
        let id = project_id.to_string();
        self.db.call(move |db| db.list(&id)).await
    }

    pub async fn round_transitions(
        &self,
        project_id: &str,
        number: i64,
    ) -> Result<Vec<StatusTransition>, StoreError> {
        let id = project_id.to_string();
        self.db
            .call(move |db| db.list_transitions(&id, number))
            .await
    }
}
