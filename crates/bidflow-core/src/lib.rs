//! Core domain model for the bid-automation assistant.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub const CRATE_NAME: &str = "bidflow-core";

/// Project categories the generator knows how to pitch for.
pub const PROJECT_TYPES: &[&str] = &[
    "web_app",
    "mobile_app",
    "api_backend",
    "ecommerce",
    "wordpress",
    "shopify",
    "odoo_erp",
    "scraping",
    "automation",
    "data_analysis",
    "ai_ml",
    "consulting",
    "bug_fix",
    "other",
];

pub const LANGUAGES: &[&str] = &["auto", "en", "de", "es"];
pub const TONES: &[&str] = &["auto", "formal", "friendly", "neutral"];

/// Milestone sizing bucket derived from the project budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneSize {
    Small,
    Medium,
    Large,
    #[default]
    Unknown,
}

impl MilestoneSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Unknown => "unknown",
        }
    }
}

/// One milestone entry in a generated plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Structured milestone plan stored as a JSON sub-document on a bid record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestonePlan {
    pub size: MilestoneSize,
    pub count: u32,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

/// Before/after diff stored when the operator edits a generated proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDiff {
    pub original: String,
    #[serde(rename = "final")]
    pub final_text: String,
}

/// JSON sub-document embedded as text in a ledger column.
///
/// Readers parse lazily; text that fails to parse is handed back verbatim
/// instead of raising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredJson<T> {
    Parsed(T),
    Raw(String),
}

impl<T: DeserializeOwned> StoredJson<T> {
    pub fn from_column(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(value) => Self::Parsed(value),
            Err(_) => Self::Raw(text.to_string()),
        }
    }
}

impl<T> StoredJson<T> {
    pub fn parsed(&self) -> Option<&T> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Raw(_) => None,
        }
    }
}

/// Discrete rating events applied to a bid record.
///
/// `Bad`/`Regular`/`Good` set the rating outright; `Winning` stacks a +10
/// bonus on top of whatever judgment was already recorded and forces the
/// won flag, since an actual win is a fact rather than an opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingKind {
    Bad,
    Regular,
    Good,
    Winning,
}

impl RatingKind {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "bad" => Some(Self::Bad),
            "regular" => Some(Self::Regular),
            "good" => Some(Self::Good),
            "winning" => Some(Self::Winning),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bad => "bad",
            Self::Regular => "regular",
            Self::Good => "good",
            Self::Winning => "winning",
        }
    }
}

/// Origin tag for bids imported as training material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSource {
    MyWin,
    OtherFreelancer,
    Liked,
}

impl UploadSource {
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "my_win" => Some(Self::MyWin),
            "other_freelancer" => Some(Self::OtherFreelancer),
            "liked" => Some(Self::Liked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MyWin => "my_win",
            Self::OtherFreelancer => "other_freelancer",
            Self::Liked => "liked",
        }
    }

    /// Learning-priority rating tier: competitor wins outrank everything
    /// else we import.
    pub fn rating(&self) -> i64 {
        match self {
            Self::OtherFreelancer => 20,
            Self::MyWin | Self::Liked => 15,
        }
    }
}

/// Project context captured alongside a generated bid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: Option<i64>,
    pub title: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub project_type: Option<String>,
    pub language: Option<String>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
}

/// Input contract for persisting a freshly generated bid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBid {
    pub project: ProjectInfo,
    pub bid_text: String,
    pub milestone_plan: Option<MilestonePlan>,
    pub prompt_version: String,
    pub model_used: Option<String>,
    pub tone: Option<String>,
}

/// Full persisted bid record with outcome and rating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project: ProjectInfo,
    pub bid_text: String,
    pub milestone_plan: Option<StoredJson<MilestonePlan>>,
    pub prompt_version: String,
    pub model_used: Option<String>,
    pub tone: Option<String>,
    pub outcome: String,
    pub outcome_updated_at: Option<DateTime<Utc>>,
    pub outcome_notes: Option<String>,
    pub was_viewed: bool,
    pub was_engaged: bool,
    pub was_won: bool,
    pub was_high_rank: bool,
    pub rating: i64,
    pub is_uploaded: bool,
    pub upload_source: Option<String>,
    pub final_bid_text: Option<String>,
    pub user_edits: Option<StoredJson<EditDiff>>,
    pub feedback_notes: Option<String>,
}

impl BidRecord {
    /// Text the learning context should quote: the operator's final edit
    /// when one exists, otherwise the generated proposal.
    pub fn effective_text(&self) -> &str {
        self.final_bid_text.as_deref().unwrap_or(&self.bid_text)
    }
}

/// Outcome update applied to an existing bid record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeUpdate {
    pub outcome: String,
    pub was_viewed: bool,
    pub was_engaged: bool,
    pub was_won: bool,
    pub was_high_rank: bool,
    pub notes: Option<String>,
}

/// Named generation template tracked with aggregate success statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub version_key: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_approved: bool,
    pub total_bids: i64,
    pub won_bids: i64,
    pub engaged_bids: i64,
    pub viewed_bids: i64,
    pub success_rate: f64,
}
