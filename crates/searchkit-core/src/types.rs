use crate::error::{SearchkitError, SearchkitResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entity in one language: the unit of lexical documents and dirty markers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Host-defined entity type (e.g. `"gallery"`).
    pub entity_type: String,
    /// Host-defined entity id.
    pub entity_id: String,
    /// Language code of the document.
    pub language: String,
}

impl EntityRef {
    /// Creates a new entity reference.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            language: language.into(),
        }
    }

    /// True when any identity field is blank.
    pub fn is_blank(&self) -> bool {
        self.entity_type.trim().is_empty()
            || self.entity_id.trim().is_empty()
            || self.language.trim().is_empty()
    }

    /// The task identity of this entity for `model`.
    pub fn with_model(&self, model: impl Into<String>) -> TaskKey {
        TaskKey {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            model: model.into(),
            language: self.language.clone(),
        }
    }
}

/// Identity of an embedding task, a stored vector and a dead-letter record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Host-defined entity type.
    pub entity_type: String,
    /// Host-defined entity id.
    pub entity_id: String,
    /// Embedding model name.
    pub model: String,
    /// Language code.
    pub language: String,
}

impl TaskKey {
    /// Creates a new task identity.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            model: model.into(),
            language: language.into(),
        }
    }

    /// Rejects identities with blank fields.
    pub fn validate(&self) -> SearchkitResult<()> {
        if self.entity_type.trim().is_empty()
            || self.entity_id.trim().is_empty()
            || self.model.trim().is_empty()
            || self.language.trim().is_empty()
        {
            return Err(SearchkitError::Validation(format!(
                "task identity requires entity_type, entity_id, model and language: {self}"
            )));
        }
        Ok(())
    }

    /// The entity this task embeds, without the model.
    pub fn entity(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            language: self.language.clone(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.entity_type, self.entity_id, self.model, self.language
        )
    }
}

/// A row of the live task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identity.
    pub key: TaskKey,
    /// Why the task was enqueued (`"dirty"`, `"model_backfill"`, ...).
    pub reason: String,
    /// Number of prior failures.
    pub attempts: u32,
    /// Schedule time, and the lease token once claimed.
    pub next_run_at: DateTime<Utc>,
    /// First time any worker claimed the task.
    pub started_at: Option<DateTime<Utc>>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The fencing token a worker must present to settle this task.
    pub fn lease_token(&self) -> DateTime<Utc> {
        self.next_run_at
    }
}

/// Terminal record for a task that exhausted retries or failed permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Identity of the failed task.
    pub key: TaskKey,
    /// Reason carried over from the task.
    pub reason: String,
    /// Final error text.
    pub error: String,
    /// Attempts counted including the final one.
    pub attempts: u32,
    /// When the task was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Lifecycle of one backfill partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    /// More pages remain.
    Running,
    /// The pager signalled exhaustion.
    Done,
    /// The pager failed; requires an explicit reset.
    Failed,
}

impl BackfillStatus {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            BackfillStatus::Running => "running",
            BackfillStatus::Done => "done",
            BackfillStatus::Failed => "failed",
        }
    }

    /// Parses the stored representation; unknown values read as running.
    pub fn parse(value: &str) -> Self {
        match value {
            "done" => BackfillStatus::Done,
            "failed" => BackfillStatus::Failed,
            _ => BackfillStatus::Running,
        }
    }
}

/// Resumable cursor state for one backfill partition.
///
/// `model` is `None` for lexical-document backfill, which is keyed by
/// `(entity_type, language)` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillState {
    /// Model being backfilled, or `None` for lexical documents.
    pub model: Option<String>,
    /// Entity type of the partition.
    pub entity_type: String,
    /// Language of the partition.
    pub language: String,
    /// Opaque host cursor; empty before the first page.
    pub cursor: String,
    /// Current lifecycle state.
    pub state: BackfillStatus,
    /// Last pager error, cleared by a successful page.
    pub last_error: Option<String>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Change notification produced by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirtyMarker {
    /// The changed entity.
    pub entity: EntityRef,
    /// True when the entity was deleted.
    pub is_deleted: bool,
    /// Free-form reason supplied by the host.
    pub reason: String,
    /// When the marker was last written.
    pub updated_at: DateTime<Utc>,
}

/// Input modality of an embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text only.
    Text,
    /// Vision-language: text plus asset URLs.
    Vl,
}

impl Modality {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Vl => "vl",
        }
    }
}

impl std::str::FromStr for Modality {
    type Err = SearchkitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "vl" => Ok(Modality::Vl),
            other => Err(SearchkitError::Validation(format!(
                "unknown modality '{other}'"
            ))),
        }
    }
}

/// An embedding model known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model name; the primary key across tasks, vectors and backfill state.
    pub name: String,
    /// Fixed output dimension.
    pub dims: usize,
    /// Input modality.
    pub modality: Modality,
}

impl ModelSpec {
    /// Creates a model spec.
    pub fn new(name: impl Into<String>, dims: usize, modality: Modality) -> Self {
        Self {
            name: name.into(),
            dims,
            modality,
        }
    }

    /// Checks the name is non-blank and the dimension positive.
    pub fn validate(&self) -> SearchkitResult<()> {
        if self.name.trim().is_empty() {
            return Err(SearchkitError::Validation("model name is required".into()));
        }
        if self.dims == 0 {
            return Err(SearchkitError::Validation(format!(
                "model '{}' dims must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}
