//! Core data model shared across components (§3).

use serde::{Deserialize, Serialize};

pub const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Text,
    Ref,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInput {
    pub name: String,
    pub kind: FileKind,
    pub content: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeRequest {
    pub directory_path: String,
    pub files: Vec<FileInput>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub strategy_guidance: Option<String>,
}

/// Maximum serialized request size (§3).
pub const MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub group_name: String,
    pub description: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TruncationStats {
    pub applied: bool,
    pub total_original_tokens: u64,
    pub target_tokens: u64,
    pub deficit: i64,
    pub protection_mode_used: bool,
    pub protected_count: usize,
    pub truncated_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizePlan {
    pub groups: Vec<Group>,
    pub ungrouped: Vec<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Returns `true` when `name` contains none of the filesystem-unsafe
/// characters named in §3, and is not empty or all-whitespace.
pub fn is_filesystem_safe_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && !trimmed.contains(FORBIDDEN_NAME_CHARS)
}

/// A string ending in `/` is treated as a directory path, never a filename
/// (§4.D constraint iii, §4.E reconciliation step 2).
pub fn is_directory_path(value: &str) -> bool {
    value.ends_with('/')
}

// ---------------------------------------------------------------------
// Entity store model (external, §3/§6)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub tip: String,
    pub ver: u64,
    pub components: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}

// ---------------------------------------------------------------------
// Batch processor model (§3, persisted)
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Pending,
    Processing,
    Publishing,
    Callback,
    Done,
    Error,
}

impl BatchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchPhase::Pending => "pending",
            BatchPhase::Processing => "processing",
            BatchPhase::Publishing => "publishing",
            BatchPhase::Callback => "callback",
            BatchPhase::Done => "done",
            BatchPhase::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchPhase::Done | BatchPhase::Error)
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => BatchPhase::Pending,
            "processing" => BatchPhase::Processing,
            "publishing" => BatchPhase::Publishing,
            "callback" => BatchPhase::Callback,
            "done" => BatchPhase::Done,
            "error" => BatchPhase::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Fetching,
    Processing,
    Publishing,
    Done,
    Error,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Fetching => "fetching",
            ItemStatus::Processing => "processing",
            ItemStatus::Publishing => "publishing",
            ItemStatus::Done => "done",
            ItemStatus::Error => "error",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => ItemStatus::Pending,
            "fetching" => ItemStatus::Fetching,
            "processing" => ItemStatus::Processing,
            "publishing" => ItemStatus::Publishing,
            "done" => ItemStatus::Done,
            "error" => ItemStatus::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreated {
    pub group_name: String,
    pub id: String,
    pub files: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemState {
    pub id: String,
    pub status: ItemStatus,
    pub retry_count: u32,
    #[serde(default)]
    pub tip: Option<String>,
    #[serde(default)]
    pub directory_path: Option<String>,
    #[serde(default)]
    pub files: Option<Vec<FileInput>>,
    #[serde(default)]
    pub components: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub plan: Option<OrganizePlan>,
    #[serde(default)]
    pub groups_created: Option<Vec<GroupCreated>>,
    #[serde(default)]
    pub new_parent_tip: Option<String>,
    #[serde(default)]
    pub new_parent_version: Option<u64>,
    #[serde(default)]
    pub ungrouped: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ItemState {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: ItemStatus::Pending,
            retry_count: 0,
            tip: None,
            directory_path: None,
            files: None,
            components: None,
            plan: None,
            groups_created: None,
            new_parent_tip: None,
            new_parent_version: None,
            ungrouped: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub batch_id: String,
    pub chunk_id: String,
    pub phase: BatchPhase,
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    pub callback_retry_count: u32,
    pub items: Vec<ItemState>,
    #[serde(default)]
    pub global_error: Option<String>,
    /// Carried through from `submit` (§6 `/process` body) and applied to
    /// every item's organize call; not itemized in §3's data model since
    /// it's batch-wide, not per-item.
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub fetching: usize,
    pub processing: usize,
    pub publishing: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn from_items(items: &[ItemState]) -> Self {
        let mut counts = StatusCounts {
            total: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Fetching => counts.fetching += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Publishing => counts.publishing += 1,
                ItemStatus::Done => counts.done += 1,
                ItemStatus::Error => counts.failed += 1,
            }
        }
        counts
    }
}
