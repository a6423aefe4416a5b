use anyhow::{Context, Result};
use assessment_detail_core::{
    assemble_assessment_detail, build_submission_skeleton, diagnose_criteria, diagnose_themes,
    flatten_criteria_ids, flatten_criteria_ids_with_weightage, AssembledDetail, Criteria,
    CriteriaId, DetailError, Framework, SubmissionContext, SubmissionDocument, SubmissionId,
    SubmissionSkeleton, WeightedCriteria,
};
use assessment_detail_store::DocumentStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Source of framework documents.
pub trait FrameworkStore {
    /// # Errors
    /// Fails with [`DetailError::NotFound`] when no framework matches `id`.
    fn get_framework(&self, id: &str) -> Result<Framework>;
}

/// Source of criteria documents with their evidence methods.
pub trait CriteriaStore {
    /// # Errors
    /// Returns an error when the backing store cannot be queried.
    fn get_by_ids(&self, ids: &[CriteriaId]) -> Result<Vec<Criteria>>;
}

/// Finds or creates the submission a detail request reports progress from.
pub trait SubmissionLookup {
    /// # Errors
    /// Returns an error when the backing store cannot be queried or updated.
    fn find_or_create(
        &mut self,
        skeleton: &SubmissionSkeleton,
        context: &SubmissionContext,
    ) -> Result<SubmissionDocument>;

    /// # Errors
    /// Fails with [`DetailError::NotFound`] when no submission has `id`.
    fn get_submission(&self, id: SubmissionId) -> Result<SubmissionDocument>;

    /// Flush pending writes; stores without durable state need not override it.
    ///
    /// # Errors
    /// Returns an error when pending writes cannot be persisted.
    fn persist(&mut self) -> Result<()> {
        Ok(())
    }
}

impl FrameworkStore for DocumentStore {
    fn get_framework(&self, id: &str) -> Result<Framework> {
        self.framework(id)?
            .ok_or_else(|| DetailError::NotFound(format!("framework {id}")).into())
    }
}

impl CriteriaStore for DocumentStore {
    fn get_by_ids(&self, ids: &[CriteriaId]) -> Result<Vec<Criteria>> {
        self.criteria_by_ids(ids)
    }
}

impl SubmissionLookup for DocumentStore {
    fn find_or_create(
        &mut self,
        skeleton: &SubmissionSkeleton,
        context: &SubmissionContext,
    ) -> Result<SubmissionDocument> {
        self.find_or_create_submission(skeleton, context)
    }

    fn get_submission(&self, id: SubmissionId) -> Result<SubmissionDocument> {
        self.submission(id)?
            .ok_or_else(|| DetailError::NotFound(format!("submission {id}")).into())
    }

    fn persist(&mut self) -> Result<()> {
        self.save()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetailRequest {
    pub framework_id: String,
    pub entity_id: String,
    pub program_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailResult {
    pub contract_version: String,
    pub digest: String,
    pub detail: AssembledDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FlattenedCriteria {
    Ids(Vec<CriteriaId>),
    Weighted(Vec<WeightedCriteria>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlattenResult {
    pub contract_version: String,
    pub framework_id: String,
    pub count: usize,
    pub criteria: FlattenedCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LintResult {
    pub contract_version: String,
    pub framework_id: String,
    pub clean: bool,
    pub issues: Vec<String>,
}

#[derive(Debug)]
pub struct AssessmentDetailApi<S> {
    store: S,
}

impl<S> AssessmentDetailApi<S>
where
    S: FrameworkStore + CriteriaStore + SubmissionLookup,
{
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    /// Assemble the detail payload for one entity against one framework.
    ///
    /// # Errors
    /// Returns [`DetailError::NotFound`] for an unknown framework, or any
    /// collaborator failure unchanged.
    pub fn detail(&mut self, request: &DetailRequest) -> Result<DetailResult> {
        let framework = self.store.get_framework(&request.framework_id)?;
        let criteria_ids = flatten_criteria_ids(&framework.themes);
        let criteria = self.store.get_by_ids(&criteria_ids)?;
        debug!(
            framework = %framework.id,
            requested = criteria_ids.len(),
            loaded = criteria.len(),
            "loaded framework criteria"
        );

        let skeleton = build_submission_skeleton(&criteria);
        let context = SubmissionContext {
            entity_id: request.entity_id.clone(),
            framework_id: framework.id.clone(),
            program_id: request.program_id.clone(),
        };
        let submission = self.store.find_or_create(&skeleton, &context)?;

        let detail = assemble_assessment_detail(&framework, criteria, &submission);
        self.store.persist().context("failed to persist submission state")?;

        Ok(DetailResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            digest: compute_detail_digest(&detail)?,
            detail,
        })
    }

    /// Criteria ids of a framework's theme tree, optionally with weightage.
    ///
    /// # Errors
    /// Returns [`DetailError::NotFound`] for an unknown framework.
    pub fn flatten(&self, framework_id: &str, weighted: bool) -> Result<FlattenResult> {
        let framework = self.store.get_framework(framework_id)?;
        let criteria = if weighted {
            FlattenedCriteria::Weighted(flatten_criteria_ids_with_weightage(&framework.themes))
        } else {
            FlattenedCriteria::Ids(flatten_criteria_ids(&framework.themes))
        };
        let count = match &criteria {
            FlattenedCriteria::Ids(ids) => ids.len(),
            FlattenedCriteria::Weighted(weighted) => weighted.len(),
        };

        Ok(FlattenResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            framework_id: framework.id,
            count,
            criteria,
        })
    }

    /// Report malformed themes and matrix questions without assembling anything.
    ///
    /// # Errors
    /// Returns [`DetailError::NotFound`] for an unknown framework.
    pub fn lint(&self, framework_id: &str) -> Result<LintResult> {
        let framework = self.store.get_framework(framework_id)?;
        let criteria = self.store.get_by_ids(&flatten_criteria_ids(&framework.themes))?;

        let issues = diagnose_themes(&framework.themes)
            .into_iter()
            .chain(diagnose_criteria(&criteria))
            .map(|issue| issue.to_string())
            .collect::<Vec<_>>();
        for issue in &issues {
            warn!(framework = %framework.id, "{issue}");
        }

        Ok(LintResult {
            contract_version: API_CONTRACT_VERSION.to_string(),
            framework_id: framework.id,
            clean: issues.is_empty(),
            issues,
        })
    }

    /// Load one stored submission.
    ///
    /// # Errors
    /// Returns [`DetailError::MalformedInput`] for an invalid id, or
    /// [`DetailError::NotFound`] when nothing is stored under it.
    pub fn submission_show(&self, submission_id: &str) -> Result<SubmissionDocument> {
        let id = SubmissionId::parse(submission_id)?;
        self.store.get_submission(id)
    }
}

/// `sha256:<hex>` over the compact JSON encoding of `detail`.
///
/// # Errors
/// Returns an error when the detail cannot be serialized.
pub fn compute_detail_digest(detail: &AssembledDetail) -> Result<String> {
    let bytes = serde_json::to_vec(detail).context("failed to serialize assessment detail")?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("sha256:{digest:x}"))
}
