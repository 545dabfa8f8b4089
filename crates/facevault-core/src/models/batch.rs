use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Caller-owned set of files to vectorize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub file_ids: Vec<String>,
    /// When set, only files owned by this user are eligible.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Also admit files that already completed (re-vectorization).
    #[serde(default)]
    pub force: bool,
}

impl BatchRequest {
    pub fn new<I, S>(file_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            file_ids: file_ids.into_iter().map(Into::into).collect(),
            user_id: None,
            force: false,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// File ids with duplicates collapsed, in first-seen order.
    pub fn unique_file_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.file_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    UnsupportedType,
    TooSmall,
    AlreadyProcessed,
    InFlight,
    QuotaExceeded,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SkipReason::NotFound => write!(f, "not_found"),
            SkipReason::UnsupportedType => write!(f, "unsupported_type"),
            SkipReason::TooSmall => write!(f, "too_small"),
            SkipReason::AlreadyProcessed => write!(f, "already_processed"),
            SkipReason::InFlight => write!(f, "in_flight"),
            SkipReason::QuotaExceeded => write!(f, "quota_exceeded"),
        }
    }
}

/// Why an eligible file could not be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchError {
    /// The dispatch queue is at its maximum depth.
    Overloaded,
    /// The queued write could not reach the file record store.
    StoreUnavailable,
    /// The dispatch queue is draining and takes no new work.
    ShuttingDown,
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DispatchError::Overloaded => write!(f, "overloaded"),
            DispatchError::StoreUnavailable => write!(f, "store_unavailable"),
            DispatchError::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Submission-time outcome for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "lowercase")]
pub enum Disposition {
    Accepted { attempt: u32 },
    Skipped { reason: SkipReason },
    Failed { error: DispatchError },
}

impl Disposition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Disposition::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: Uuid,
    /// Exactly one entry per distinct requested file id.
    pub results: BTreeMap<String, Disposition>,
}

impl BatchResult {
    pub fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            results: BTreeMap::new(),
        }
    }

    pub fn get(&self, file_id: &str) -> Option<&Disposition> {
        self.results.get(file_id)
    }

    pub fn accepted_count(&self) -> usize {
        self.results.values().filter(|d| d.is_accepted()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_collapse_in_first_seen_order() {
        let request = BatchRequest::new(["b", "a", "b", "c", "a"]);
        assert_eq!(request.unique_file_ids(), vec!["b", "a", "c"]);
    }

    #[test]
    fn request_defaults_when_optional_fields_missing() {
        let request: BatchRequest = serde_json::from_str(r#"{"fileIds":["x"]}"#).unwrap();
        assert_eq!(request.file_ids, vec!["x"]);
        assert!(request.user_id.is_none());
        assert!(!request.force);
    }

    #[test]
    fn dispositions_serialize_with_tag() {
        let accepted = serde_json::to_value(Disposition::Accepted { attempt: 1 }).unwrap();
        assert_eq!(accepted, serde_json::json!({"disposition": "accepted", "attempt": 1}));

        let skipped = serde_json::to_value(Disposition::Skipped {
            reason: SkipReason::TooSmall,
        })
        .unwrap();
        assert_eq!(
            skipped,
            serde_json::json!({"disposition": "skipped", "reason": "too_small"})
        );

        let failed = serde_json::to_value(Disposition::Failed {
            error: DispatchError::Overloaded,
        })
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({"disposition": "failed", "error": "overloaded"})
        );
    }
}
