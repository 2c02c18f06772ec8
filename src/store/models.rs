use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A logical application under development. Created on the first round
/// request for a new identifier, never deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub created_at: String,
    /// Target of the most recent round with status `completed`.
    /// Null until the first successful round.
    pub published_target: Option<String>,
}

/// Lifecycle of a round. `Completed` and `Failed` are terminal: a round in
/// a terminal status is never mutated again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Generating,
    Generated,
    Publishing,
    Published,
    Notifying,
    Completed,
    Failed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Notifying => "notifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "generated" => Ok(Self::Generated),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "notifying" => Ok(Self::Notifying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid round status: {}", s)),
        }
    }
}

/// Which pipeline stage a failed round died in. Exactly one per failed
/// round, so operators can distinguish "nothing happened" from "it's live
/// but the evaluator wasn't told".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    GenerationFailed,
    PublicationFailed,
    NotificationFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerationFailed => "generation_failed",
            Self::PublicationFailed => "publication_failed",
            Self::NotificationFailed => "notification_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation_failed" => Ok(Self::GenerationFailed),
            "publication_failed" => Ok(Self::PublicationFailed),
            "notification_failed" => Ok(Self::NotificationFailed),
            _ => Err(format!("Invalid failure reason: {}", s)),
        }
    }
}

/// One generation → publish → notify cycle for a project.
///
/// Mutated only by the round orchestrator; immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub project_id: String,
    /// 1-based, gapless within a project.
    pub number: i64,
    pub instruction: String,
    pub status: RoundStatus,
    pub bundle_ref: Option<String>,
    pub published_target: Option<String>,
    pub failure_reason: Option<FailureReason>,
    /// Human-readable detail for a failed round (gateway error text).
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl Round {
    pub fn new(project_id: &str, number: i64, instruction: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            number,
            instruction: instruction.to_string(),
            status: RoundStatus::Pending,
            bundle_ref: None,
            published_target: None,
            failure_reason: None,
            error: None,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    /// Advance to a new status. Terminal statuses also stamp `completed_at`.
    pub fn transition(&mut self, status: RoundStatus) {
        self.status = status;
        if status.is_terminal() {
            self.completed_at = Some(Utc::now().to_rfc3339());
        }
    }

    /// Terminate the round at a specific stage with the failure detail.
    pub fn fail(&mut self, reason: FailureReason, error: impl Into<String>) {
        self.failure_reason = Some(reason);
        self.error = Some(error.into());
        self.transition(RoundStatus::Failed);
    }
}

/// One persisted status change of a round. The transition log is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub project_id: String,
    pub round_number: i64,
    pub status: RoundStatus,
    pub at: String,
}

/// The generated code artifact for a round: a set of files addressed by a
/// content digest. Publishing the same reference to the same target twice
/// is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub reference: String,
    /// Filename → full file content. BTreeMap so the digest is stable.
    pub files: BTreeMap<String, String>,
}

impl Bundle {
    /// Build a bundle from generated files, deriving the reference from a
    /// SHA-256 digest over the sorted (name, content) pairs.
    pub fn from_files(files: BTreeMap<String, String>) -> Self {
        let mut hasher = Sha256::new();
        for (name, content) in &files {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        let reference = hex::encode(hasher.finalize());
        Self { reference, files }
    }
}

/// Outcome of `submit_round`, exposed to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResult {
    pub project_id: String,
    pub round_number: i64,
    pub status: RoundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Round> for RoundResult {
    fn from(round: &Round) -> Self {
        Self {
            project_id: round.project_id.clone(),
            round_number: round.number,
            status: round.status,
            published_target: round.published_target.clone(),
            failure_reason: round.failure_reason,
            error: round.error.clone(),
        }
    }
}
