use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Criteria, DetailError, EvidenceWorkspace, InstanceQuestions, QuestionId, QuestionIndex,
    QuestionSlot, SectionId,
};

/// Outcome counters for one [`resolve_matrices`] pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixReport {
    pub matrices: usize,
    pub resolved_instances: usize,
    pub skipped_instances: Vec<QuestionId>,
    pub malformed_matrices: Vec<QuestionId>,
}

/// Nest each matrix question's instance questions under it.
///
/// Instance ids are looked up through `index`; ids without an owning section
/// are skipped. Removals from sections are gathered for the whole pass and
/// applied afterwards, one `retain` per section, matching on question id.
pub fn resolve_matrices(workspace: &mut EvidenceWorkspace, index: &QuestionIndex) -> MatrixReport {
    let mut report = MatrixReport::default();
    let mut removals: BTreeMap<SectionId, HashSet<QuestionId>> = BTreeMap::new();
    let mut resolutions: Vec<(QuestionId, Vec<QuestionSlot>)> = Vec::new();

    for (matrix_id, slot) in index.iter() {
        let Some(question) = workspace.question(slot) else {
            continue;
        };
        if !question.is_matrix() {
            continue;
        }
        report.matrices += 1;

        let declared = match &question.instance_questions {
            Some(InstanceQuestions::Ids(ids)) => ids.clone(),
            Some(InstanceQuestions::Resolved(_)) => {
                debug!(matrix = %matrix_id, "matrix already carries nested questions; leaving as-is");
                continue;
            }
            Some(InstanceQuestions::Malformed(_)) | None => {
                warn!(matrix = %matrix_id, "matrix question has no instance id list; resolving to empty");
                report.malformed_matrices.push(matrix_id.clone());
                resolutions.push((matrix_id.clone(), Vec::new()));
                continue;
            }
        };

        let mut resolved = Vec::with_capacity(declared.len());
        for instance_id in declared {
            let (Some(section), Some(instance_slot)) =
                (index.owning_section(&instance_id), index.question_slot(&instance_id))
            else {
                debug!(matrix = %matrix_id, instance = %instance_id, "instance question not indexed; skipping");
                report.skipped_instances.push(instance_id);
                continue;
            };
            resolved.push(instance_slot);
            removals.entry(section).or_default().insert(instance_id);
        }

        report.resolved_instances += resolved.len();
        resolutions.push((matrix_id.clone(), resolved));
    }

    for (section, ids) in &removals {
        workspace.remove_from_section(*section, ids);
    }
    workspace.resolved_instances.extend(resolutions);

    report
}

/// Report matrix questions whose `instanceQuestions` is not a list of ids.
#[must_use]
pub fn diagnose_criteria(criteria: &[Criteria]) -> Vec<DetailError> {
    let mut issues = Vec::new();
    for item in criteria {
        for method in &item.evidences {
            for section in &method.sections {
                for question in section.questions.iter().filter(|question| question.is_matrix()) {
                    if matches!(question.instance_questions, Some(InstanceQuestions::Ids(_))) {
                        continue;
                    }
                    issues.push(DetailError::MalformedInput(format!(
                        "matrix question `{}` in criteria `{}` ({} / {}) has no instance id list",
                        question.id, item.id, method.external_id, section.name
                    )));
                }
            }
        }
    }
    issues
}
