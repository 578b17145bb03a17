//! Wire and domain types: batches, field mutations, filters, roster stats.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ── BatchStatus ─────────────────────────────────────────────────────

/// Lifecycle state of a batch.
///
/// The backend speaks `NS` / `FS` / `S`; older records still carry the
/// Spanish labels `pendiente` / `en-progreso` / `completado`, which are
/// read as the same three states and always written back canonically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    #[default]
    NotStarted,
    Partial,
    Done,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NS",
            Self::Partial => "FS",
            Self::Done => "S",
        }
    }

    /// Parse a canonical code or a legacy alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "NS" | "pendiente" => Some(Self::NotStarted),
            "FS" | "en-progreso" => Some(Self::Partial),
            "S" | "completado" => Some(Self::Done),
            _ => None,
        }
    }

    /// Human label used by list views.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotStarted => "Pending",
            Self::Partial => "Partial",
            Self::Done => "Segmented",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BatchStatus {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BatchStatus {
    /// Missing, null or unrecognized codes read as `NS`, the backend default.
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(Self::parse).unwrap_or_default())
    }
}

// ── Batch ───────────────────────────────────────────────────────────

/// Nested `metadata` object of a batch.
///
/// Only `due_date` is edited client-side; everything else the server
/// stores there (priority, assigned_at, ...) is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BatchMetadata {
    pub fn is_empty(&self) -> bool {
        self.due_date.is_none() && self.extra.is_empty()
    }
}

/// A unit of assignable work, as returned by `GET /batches`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "BatchMetadata::is_empty")]
    pub metadata: BatchMetadata,
    /// Server fields this client does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Batch {
    /// A bare batch with only an id, status `NS`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assignee: None,
            status: BatchStatus::NotStarted,
            folder: None,
            comments: None,
            metadata: BatchMetadata::default(),
            extra: Map::new(),
        }
    }

    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn is_unassigned(&self) -> bool {
        self.assignee.is_none()
    }

    /// Current value of one editable field, rendered as text.
    pub fn field_text(&self, field: BatchField) -> String {
        match field {
            BatchField::Assignee => self.assignee.clone().unwrap_or_default(),
            BatchField::Status => self.status.as_str().to_string(),
            BatchField::Folder => self.folder.clone().unwrap_or_default(),
            BatchField::DueDate => self.metadata.due_date.clone().unwrap_or_default(),
            BatchField::Comments => self.comments.clone().unwrap_or_default(),
        }
    }
}

fn blank_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

// ── Field mutations ─────────────────────────────────────────────────

/// The inline-editable columns of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BatchField {
    Assignee,
    Status,
    Folder,
    DueDate,
    Comments,
}

impl BatchField {
    pub const ALL: [BatchField; 5] = [
        Self::Assignee,
        Self::Status,
        Self::Folder,
        Self::DueDate,
        Self::Comments,
    ];

    /// Key used in the `PUT /batches/{id}` body.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignee => "assignee",
            Self::Status => "status",
            Self::Folder => "folder",
            Self::DueDate => "due_date",
            Self::Comments => "comments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for BatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single-field edit. One mutation is one `PUT` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchMutation {
    /// `None` unassigns.
    SetAssignee(Option<String>),
    SetStatus(BatchStatus),
    SetFolder(String),
    SetDueDate(String),
    SetComments(String),
}

impl BatchMutation {
    /// Build a mutation from a field name and raw text, as typed into a cell.
    pub fn parse(field: &str, value: &str) -> Result<Self, String> {
        let field = BatchField::parse(field).ok_or_else(|| format!("unknown field '{}'", field))?;
        Ok(match field {
            BatchField::Assignee => {
                let v = value.trim();
                Self::SetAssignee((!v.is_empty()).then(|| v.to_string()))
            }
            BatchField::Status => Self::SetStatus(
                BatchStatus::parse(value).ok_or_else(|| format!("unknown status '{}'", value))?,
            ),
            BatchField::Folder => Self::SetFolder(value.to_string()),
            BatchField::DueDate => Self::SetDueDate(value.to_string()),
            BatchField::Comments => Self::SetComments(value.to_string()),
        })
    }

    pub fn field(&self) -> BatchField {
        match self {
            Self::SetAssignee(_) => BatchField::Assignee,
            Self::SetStatus(_) => BatchField::Status,
            Self::SetFolder(_) => BatchField::Folder,
            Self::SetDueDate(_) => BatchField::DueDate,
            Self::SetComments(_) => BatchField::Comments,
        }
    }

    /// Write this mutation into a record. `due_date` nests under `metadata`.
    pub fn apply(&self, batch: &mut Batch) {
        match self {
            Self::SetAssignee(v) => batch.assignee = v.clone(),
            Self::SetStatus(v) => batch.status = *v,
            Self::SetFolder(v) => batch.folder = Some(v.clone()),
            Self::SetDueDate(v) => batch.metadata.due_date = Some(v.clone()),
            Self::SetComments(v) => batch.comments = Some(v.clone()),
        }
    }

    /// The `{field: value}` request body.
    pub fn to_body(&self) -> Value {
        let value = match self {
            Self::SetAssignee(v) => v.clone().map(Value::String).unwrap_or(Value::Null),
            Self::SetStatus(v) => Value::String(v.as_str().to_string()),
            Self::SetFolder(v) | Self::SetDueDate(v) | Self::SetComments(v) => Value::String(v.clone()),
        };
        let mut body = Map::new();
        body.insert(self.field().as_str().to_string(), value);
        Value::Object(body)
    }

    /// Whether applying this mutation would leave `batch` unchanged.
    pub fn is_noop_for(&self, batch: &Batch) -> bool {
        let mut probe = batch.clone();
        self.apply(&mut probe);
        probe == *batch
    }
}

// ── Create ──────────────────────────────────────────────────────────

/// `POST /batches` body. Absent fields take server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "BatchMetadata::is_empty")]
    pub metadata: BatchMetadata,
}

// ── Bulk operations ─────────────────────────────────────────────────

/// Filter for `POST /batches/delete-by-filter`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteFilter {
    pub id_pattern: String,
    pub status: Option<BatchStatus>,
    pub assignee: String,
    pub unassigned_only: bool,
}

impl DeleteFilter {
    /// True when no criterion is set; such a request must never be sent.
    pub fn is_empty(&self) -> bool {
        self.id_pattern.trim().is_empty()
            && self.status.is_none()
            && self.assignee.trim().is_empty()
            && !self.unassigned_only
    }
}

impl Serialize for DeleteFilter {
    /// Unset criteria go over the wire as empty strings.
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut st = s.serialize_struct("DeleteFilter", 4)?;
        st.serialize_field("id_pattern", self.id_pattern.trim())?;
        st.serialize_field("status", self.status.map(|v| v.as_str()).unwrap_or(""))?;
        // The assignee selector is disabled while "unassigned only" is ticked.
        let assignee = if self.unassigned_only { "" } else { self.assignee.trim() };
        st.serialize_field("assignee", assignee)?;
        st.serialize_field("unassigned_only", &self.unassigned_only)?;
        st.end()
    }
}

/// How an uploaded snapshot combines with existing data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    #[default]
    Merge,
    Replace,
}

impl UploadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }

    /// Replace wipes existing batches and needs typed confirmation.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Replace)
    }
}

// ── Derived statistics ──────────────────────────────────────────────

/// Dashboard metric cards computed over a set of batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTally {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
}

impl StatusTally {
    pub fn of<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Self {
        let mut tally = Self::default();
        for b in batches {
            tally.total += 1;
            match b.status {
                BatchStatus::Done => tally.completed += 1,
                BatchStatus::Partial => tally.in_progress += 1,
                BatchStatus::NotStarted => tally.pending += 1,
            }
        }
        tally
    }
}

/// A roster entry with counts derived from the batch list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMember {
    pub name: String,
    pub batches: usize,
    pub completed: usize,
}

impl TeamMember {
    /// Count assigned and completed batches per roster name.
    ///
    /// Batches assigned to someone outside the roster are ignored.
    pub fn tally<'a>(names: &[String], batches: impl IntoIterator<Item = &'a Batch>) -> Vec<Self> {
        let mut members: Vec<Self> = names
            .iter()
            .map(|n| Self { name: n.clone(), batches: 0, completed: 0 })
            .collect();
        for b in batches {
            let Some(assignee) = b.assignee.as_deref() else { continue };
            if let Some(m) = members.iter_mut().find(|m| m.name == assignee) {
                m.batches += 1;
                if b.status == BatchStatus::Done {
                    m.completed += 1;
                }
            }
        }
        members
    }
}
