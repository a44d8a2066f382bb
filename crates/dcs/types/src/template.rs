use crate::hash::ContentHash;
use crate::ids::{ActorId, TemplateId, TemplateRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    UnderReview,
    Approved,
    /// Soft-disabled. Still retrievable, no longer usable for new contracts.
    Deprecated,
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::UnderReview => "under_review",
            TemplateStatus::Approved => "approved",
            TemplateStatus::Deprecated => "deprecated",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub creator: ActorId,
    pub contributors: Vec<ActorId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewNote {
    pub reviewer: ActorId,
    pub decision: ReviewDecision,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

/// One immutable version of a template. Edits always produce a new version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub version: u32,
    pub name: String,
    pub schema_ref: String,
    pub body: Value,
    pub content_hash: ContentHash,
    pub status: TemplateStatus,
    pub provenance: Provenance,
    pub reviews: Vec<ReviewNote>,
}

impl Template {
    pub fn reference(&self) -> TemplateRef {
        TemplateRef {
            template_id: self.id.clone(),
            version: self.version,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == TemplateStatus::Approved
    }
}
