use serde::{Deserialize, Serialize};

/// Rejection taxonomy shared by every core operation. Callers map each kind
/// to their own transport status; the core never reasons about HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Validation(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    LimitExceeded(String),
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "ERR_INVALID_PARAMS",
            CoreError::NotFound(_) => "ERR_NOT_FOUND",
            CoreError::Forbidden(_) => "ERR_FORBIDDEN",
            CoreError::Conflict(_) => "ERR_CONFLICT",
            CoreError::LimitExceeded(_) => "ERR_LIMIT_EXCEEDED",
            CoreError::Internal(_) => "ERR_INTERNAL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CoreError::Validation(m)
            | CoreError::NotFound(m)
            | CoreError::Forbidden(m)
            | CoreError::Conflict(m)
            | CoreError::LimitExceeded(m)
            | CoreError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for CoreError {}

/// The resolved identity of the caller, threaded explicitly through every
/// core call. `None` at the gateway means anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
}

/// Closed set of listing sort orders. Every order carries an implicit
/// secondary key of petition id ascending, so the total order is
/// deterministic even among equal titles, costs, or timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortOrder {
    AlphabeticalAsc,
    AlphabeticalDesc,
    CostAsc,
    CostDesc,
    CreatedAsc,
    CreatedDesc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ALPHABETICAL_ASC" => Some(SortOrder::AlphabeticalAsc),
            "ALPHABETICAL_DESC" => Some(SortOrder::AlphabeticalDesc),
            "COST_ASC" => Some(SortOrder::CostAsc),
            "COST_DESC" => Some(SortOrder::CostDesc),
            "CREATED_ASC" => Some(SortOrder::CreatedAsc),
            "CREATED_DESC" => Some(SortOrder::CreatedDesc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::AlphabeticalAsc => "ALPHABETICAL_ASC",
            SortOrder::AlphabeticalDesc => "ALPHABETICAL_DESC",
            SortOrder::CostAsc => "COST_ASC",
            SortOrder::CostDesc => "COST_DESC",
            SortOrder::CreatedAsc => "CREATED_ASC",
            SortOrder::CreatedDesc => "CREATED_DESC",
        }
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::CreatedAsc
    }
}

/// Multi-dimensional listing request. Filters are conjunctive and each is
/// independently optional; `None` means "unset", not "match nothing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetitionSearchQuery {
    pub q: Option<String>,
    pub category_ids: Vec<i64>,
    pub supporting_cost: Option<i64>,
    pub owner_id: Option<i64>,
    pub supporter_id: Option<i64>,
    pub sort_by: SortOrder,
    pub start_index: i64,
    pub count: Option<i64>,
}

impl Default for PetitionSearchQuery {
    fn default() -> Self {
        Self {
            q: None,
            category_ids: Vec::new(),
            supporting_cost: None,
            owner_id: None,
            supporter_id: None,
            sort_by: SortOrder::default(),
            start_index: 0,
            count: None,
        }
    }
}

impl PetitionSearchQuery {
    /// Domain checks that need no store access. Category-id existence is
    /// checked separately by the service against the category collection.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start_index < 0 {
            return Err(CoreError::Validation(
                "startIndex must be >= 0".to_string(),
            ));
        }
        if self.count.is_some_and(|c| c < 0) {
            return Err(CoreError::Validation("count must be >= 0".to_string()));
        }
        if self.supporting_cost.is_some_and(|c| c < 0) {
            return Err(CoreError::Validation(
                "supportingCost must be >= 0".to_string(),
            ));
        }
        if self.q.as_deref().is_some_and(str::is_empty) {
            return Err(CoreError::Validation("q must be non-empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetitionSummary {
    pub petition_id: i64,
    pub title: String,
    pub category_id: i64,
    pub owner_id: i64,
    pub owner_first_name: String,
    pub owner_last_name: String,
    pub number_of_supporters: i64,
    pub creation_date: String,
    pub supporting_cost: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetitionPage {
    pub petitions: Vec<PetitionSummary>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTier {
    pub support_tier_id: i64,
    pub title: String,
    pub description: String,
    pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetitionDetail {
    #[serde(flatten)]
    pub summary: PetitionSummary,
    pub description: String,
    pub money_raised: Option<i64>,
    pub support_tiers: Vec<SupportTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub category_id: i64,
    pub name: String,
}

/// An immutable pledge record. There is no edit or delete operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupporterRecord {
    pub support_id: i64,
    pub support_tier_id: i64,
    pub supporter_id: i64,
    pub supporter_first_name: String,
    pub supporter_last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewSupportTier {
    pub title: String,
    pub description: String,
    pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewPetition {
    pub title: String,
    pub description: String,
    pub category_id: i64,
    pub support_tiers: Vec<NewSupportTier>,
}

/// Merge patch for petition edits: absent fields keep the stored value.
/// Resolved once against the current row, validated as a whole, written once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PetitionPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
}

impl PetitionPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.category_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SupportTierPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cost: Option<i64>,
}

impl SupportTierPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.cost.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewSupporter {
    pub support_tier_id: i64,
    #[serde(default)]
    pub message: Option<String>,
}
