use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    annotate, build_indices, merge_evidence_methods, resolve_matrices, Criteria, EvidenceMethod,
    Framework, Submission, SubmissionDocument, SubmissionId,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssembledDetail {
    pub name: String,
    pub description: String,
    pub external_id: String,
    pub submission_id: SubmissionId,
    pub evidences: Vec<EvidenceMethod>,
    pub submissions: BTreeMap<String, Submission>,
}

/// Run merge, index, matrix resolution and annotation over one request's documents.
///
/// `criteria` is consumed: its evidence methods become the working set and
/// nothing else of it survives into the payload.
#[must_use]
pub fn assemble_assessment_detail(
    framework: &Framework,
    criteria: Vec<Criteria>,
    submission: &SubmissionDocument,
) -> AssembledDetail {
    let criteria_count = criteria.len();
    let mut workspace = merge_evidence_methods(criteria);
    let index = build_indices(&mut workspace);
    let report = resolve_matrices(&mut workspace, &index);
    let annotated = annotate(workspace.into_evidence_methods(), &submission.evidences);

    info!(
        framework = %framework.external_id,
        submission = %submission.id,
        criteria = criteria_count,
        evidences = annotated.evidences.len(),
        questions = index.len(),
        matrices = report.matrices,
        skipped_instances = report.skipped_instances.len(),
        "assembled assessment detail"
    );

    AssembledDetail {
        name: framework.name.clone(),
        description: framework.description.clone(),
        external_id: framework.external_id.clone(),
        submission_id: submission.id,
        evidences: annotated.evidences,
        submissions: annotated.submissions,
    }
}
