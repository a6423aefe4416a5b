use indexmap::IndexMap;
use tracing::debug;

use crate::workspace::EvidenceNode;
use crate::{
    Criteria, CriteriaSummary, EvidenceMethod, EvidenceStatus, EvidenceWorkspace,
    SubmissionSkeleton,
};

/// Criteria fields that never reach the submission skeleton.
const SKELETON_OMITTED_CRITERIA_FIELDS: [&str; 5] =
    ["resourceType", "language", "keywords", "concepts", "createdFor"];

/// Union evidence methods by external id, then sections by name.
///
/// The first occurrence of an external id is kept with all of its sections.
/// Later occurrences append their questions to the same-named section, or add
/// the section whole when no section of that name exists yet. Question ids
/// are not deduplicated here.
#[must_use]
pub fn merge_evidence_methods(criteria: Vec<Criteria>) -> EvidenceWorkspace {
    let mut workspace = EvidenceWorkspace::default();
    for criteria in criteria {
        for mut method in criteria.evidences {
            method.reset_instance_flags();
            merge_one(&mut workspace, method);
        }
    }
    workspace
}

fn merge_one(workspace: &mut EvidenceWorkspace, mut method: EvidenceMethod) {
    let incoming_sections = std::mem::take(&mut method.sections);

    if !workspace.evidences.contains_key(&method.external_id) {
        let sections = incoming_sections
            .into_iter()
            .map(|section| workspace.push_section(section))
            .collect();
        workspace
            .evidences
            .insert(method.external_id.clone(), EvidenceNode { header: method, sections });
        return;
    }

    for section in incoming_sections {
        let existing = workspace.evidences.get(&method.external_id).and_then(|node| {
            node.sections
                .iter()
                .copied()
                .find(|id| workspace.sections[id.0].name == section.name)
        });

        match existing {
            Some(section_id) => {
                debug!(
                    evidence = %method.external_id,
                    section = %section.name,
                    questions = section.questions.len(),
                    "appending questions to existing section"
                );
                for question in section.questions {
                    let slot = workspace.push_question(question);
                    workspace.sections[section_id.0].questions.push(slot);
                }
            }
            None => {
                let section_id = workspace.push_section(section);
                if let Some(node) = workspace.evidences.get_mut(&method.external_id) {
                    node.sections.push(section_id);
                }
            }
        }
    }

    if let Some(node) = workspace.evidences.get_mut(&method.external_id) {
        node.header.not_applicable = method.not_applicable;
        node.header.can_be_not_allowed = method.can_be_not_allowed;
        node.header.remarks = method.remarks;
        node.header.submissions = method.submissions;
    }
}

/// Evidence metadata and criteria summaries handed to the submission lookup.
///
/// Every evidence occurrence is recorded after its flags are reset; the last
/// occurrence of an external id wins while keeping its first-seen position.
#[must_use]
pub fn build_submission_skeleton(criteria: &[Criteria]) -> SubmissionSkeleton {
    let mut evidences: IndexMap<String, EvidenceStatus> = IndexMap::new();
    let mut summaries = Vec::with_capacity(criteria.len());

    for item in criteria {
        let mut extra = item.extra.clone();
        for field in SKELETON_OMITTED_CRITERIA_FIELDS {
            extra.remove(field);
        }
        summaries.push(CriteriaSummary { id: item.id.clone(), extra });

        for method in &item.evidences {
            let mut status = method.status();
            status.not_applicable = false;
            status.can_be_not_allowed = true;
            status.remarks = String::new();
            status.submissions = Vec::new();
            evidences.insert(status.external_id.clone(), status);
        }
    }

    let evidences_status = evidences.values().cloned().collect();
    SubmissionSkeleton { evidences, evidences_status, criteria: summaries }
}
