use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use ulid::Ulid;

mod annotate;
mod assemble;
mod flatten;
mod index;
mod matrix;
mod merge;
mod workspace;

pub use annotate::{annotate, Annotated};
pub use assemble::{assemble_assessment_detail, AssembledDetail};
pub use flatten::{diagnose_themes, flatten_criteria_ids, flatten_criteria_ids_with_weightage};
pub use index::{build_indices, QuestionIndex};
pub use matrix::{diagnose_criteria, resolve_matrices, MatrixReport};
pub use merge::{build_submission_skeleton, merge_evidence_methods};
pub use workspace::{EvidenceWorkspace, QuestionSlot, SectionId};

/// Opaque document fields carried through the pipeline untouched.
pub type Document = serde_json::Map<String, Value>;

pub const MATRIX_RESPONSE_TYPE: &str = "matrix";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DetailError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct CriteriaId(pub String);

impl CriteriaId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CriteriaId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct QuestionId(pub String);

impl QuestionId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for QuestionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubmissionId(pub Ulid);

impl SubmissionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a submission id from its canonical ULID text form.
    ///
    /// # Errors
    /// Returns [`DetailError::MalformedInput`] when `value` is not a valid ULID.
    pub fn parse(value: &str) -> Result<Self, DetailError> {
        Ulid::from_string(value)
            .map(Self)
            .map_err(|err| DetailError::MalformedInput(format!("invalid submission id {value}: {err}")))
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SubmissionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Framework {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub themes: Vec<Theme>,
    #[serde(flatten)]
    pub extra: Document,
}

/// One node of a framework's theme hierarchy, as stored.
///
/// Both `children` and `criteria` are kept so a node round-trips unchanged;
/// [`Theme::node`] decides which one drives traversal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Theme {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Theme>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<Vec<CriteriaRef>>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Theme {
    #[must_use]
    pub fn branch(name: impl Into<String>, children: Vec<Theme>) -> Self {
        Self { name: name.into(), children: Some(children), criteria: None, extra: Document::new() }
    }

    #[must_use]
    pub fn leaf(name: impl Into<String>, criteria: Vec<CriteriaRef>) -> Self {
        Self { name: name.into(), children: None, criteria: Some(criteria), extra: Document::new() }
    }

    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self { name: name.into(), children: None, criteria: None, extra: Document::new() }
    }

    /// `children` wins over `criteria` when a stored node carries both.
    #[must_use]
    pub fn node(&self) -> ThemeNode<'_> {
        match (&self.children, &self.criteria) {
            (Some(children), _) => ThemeNode::Branch(children),
            (None, Some(criteria)) => ThemeNode::Leaf(criteria),
            (None, None) => ThemeNode::Empty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThemeNode<'a> {
    Branch(&'a [Theme]),
    Leaf(&'a [CriteriaRef]),
    Empty,
}

/// A criteria reference carrying its weightage verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedCriteria {
    pub criteria_id: CriteriaId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weightage: Option<Value>,
    #[serde(flatten)]
    pub extra: Document,
}

/// Entry of a leaf theme's `criteria` list.
///
/// Entries with no usable id are kept as `Unrecognized` rather than failing
/// the whole node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CriteriaRef {
    Weighted(WeightedCriteria),
    Bare(CriteriaId),
    Unrecognized(Value),
}

impl CriteriaRef {
    #[must_use]
    pub fn criteria_id(&self) -> Option<&CriteriaId> {
        match self {
            Self::Weighted(weighted) => Some(&weighted.criteria_id),
            Self::Bare(id) => Some(id),
            Self::Unrecognized(_) => None,
        }
    }

    #[must_use]
    pub fn weightage(&self) -> Option<&Value> {
        match self {
            Self::Weighted(weighted) => weighted.weightage.as_ref(),
            Self::Bare(_) | Self::Unrecognized(_) => None,
        }
    }
}

/// A stored timestamp: RFC3339 when it parses, otherwise kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Timestamp {
    Rfc3339(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Raw(Value),
}

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self::Rfc3339(OffsetDateTime::now_utc())
    }

    #[must_use]
    pub fn as_datetime(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Rfc3339(value) => Some(*value),
            Self::Raw(_) => None,
        }
    }
}

impl From<OffsetDateTime> for Timestamp {
    fn from(value: OffsetDateTime) -> Self {
        Self::Rfc3339(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Criteria {
    #[serde(alias = "_id")]
    pub id: CriteriaId,
    #[serde(default)]
    pub evidences: Vec<EvidenceMethod>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMethod {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub not_applicable: bool,
    #[serde(default = "default_can_be_not_allowed")]
    pub can_be_not_allowed: bool,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub submissions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_submitted: Option<bool>,
    #[serde(flatten)]
    pub extra: Document,
}

fn default_can_be_not_allowed() -> bool {
    true
}

impl EvidenceMethod {
    /// Reset the per-request flags; stored values are never inherited.
    pub fn reset_instance_flags(&mut self) {
        self.not_applicable = false;
        self.can_be_not_allowed = true;
        self.remarks = String::new();
        self.submissions = Vec::new();
    }

    #[must_use]
    pub fn status(&self) -> EvidenceStatus {
        EvidenceStatus {
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            not_applicable: self.not_applicable,
            can_be_not_allowed: self.can_be_not_allowed,
            remarks: self.remarks.clone(),
            submissions: self.submissions.clone(),
            extra: self.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(alias = "_id")]
    pub id: QuestionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria_id: Option<CriteriaId>,
    #[serde(default)]
    pub response_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_questions: Option<InstanceQuestions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<QuestionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Value>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Question {
    #[must_use]
    pub fn is_matrix(&self) -> bool {
        self.response_type == MATRIX_RESPONSE_TYPE
    }
}

/// Declared ids on the way in, nested question objects once a matrix is resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InstanceQuestions {
    Ids(Vec<QuestionId>),
    Resolved(Vec<Question>),
    Malformed(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPayload {
    pub criteria_id: Option<CriteriaId>,
    pub response_type: String,
    pub evidence_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_submitted: Option<bool>,
    #[serde(default)]
    pub submissions: Vec<Submission>,
    #[serde(flatten)]
    pub extra: Document,
}

impl SubmissionRecord {
    /// Fresh progress state for an evidence method nobody has started yet.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            start_time: None,
            end_time: None,
            is_submitted: Some(false),
            submissions: Vec::new(),
            extra: Document::new(),
        }
    }
}

/// Evidence-level metadata without question bodies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceStatus {
    pub external_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub not_applicable: bool,
    #[serde(default = "default_can_be_not_allowed")]
    pub can_be_not_allowed: bool,
    #[serde(default)]
    pub remarks: String,
    #[serde(default)]
    pub submissions: Vec<Value>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaSummary {
    #[serde(alias = "_id")]
    pub id: CriteriaId,
    #[serde(flatten)]
    pub extra: Document,
}

/// What the submission lookup needs to find or create a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSkeleton {
    pub evidences: indexmap::IndexMap<String, EvidenceStatus>,
    pub evidences_status: Vec<EvidenceStatus>,
    pub criteria: Vec<CriteriaSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionContext {
    pub entity_id: String,
    pub framework_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDocument {
    #[serde(alias = "_id")]
    pub id: SubmissionId,
    pub entity_id: String,
    pub framework_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub evidences: BTreeMap<String, SubmissionRecord>,
    #[serde(default)]
    pub evidences_status: Vec<EvidenceStatus>,
    #[serde(default)]
    pub criteria: Vec<CriteriaSummary>,
    #[serde(flatten)]
    pub extra: Document,
}
