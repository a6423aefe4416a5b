use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{EvidenceWorkspace, QuestionId, QuestionPayload, QuestionSlot, SectionId};

/// Lookups over every question reachable from a merged workspace.
///
/// Both maps keep the last occurrence of a repeated question id. Ids iterate
/// in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct QuestionIndex {
    question_by_id: IndexMap<QuestionId, QuestionSlot>,
    section_of_question: HashMap<QuestionId, SectionId>,
}

impl QuestionIndex {
    #[must_use]
    pub fn len(&self) -> usize {
        self.question_by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.question_by_id.is_empty()
    }

    #[must_use]
    pub fn question_slot(&self, id: &QuestionId) -> Option<QuestionSlot> {
        self.question_by_id.get(id).copied()
    }

    #[must_use]
    pub fn owning_section(&self, id: &QuestionId) -> Option<SectionId> {
        self.section_of_question.get(id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QuestionId, QuestionSlot)> {
        self.question_by_id.iter().map(|(id, slot)| (id, *slot))
    }
}

/// Stamp every question with its payload and index it by id.
///
/// `criteriaId` moves into the payload, and the question timing fields are
/// reset to empty placeholders until a submission fills them.
pub fn build_indices(workspace: &mut EvidenceWorkspace) -> QuestionIndex {
    let mut index = QuestionIndex::default();

    for (external_id, node) in &workspace.evidences {
        for section_id in &node.sections {
            for slot in &workspace.sections[section_id.0].questions {
                let question = &mut workspace.questions[slot.0];
                question.payload = Some(QuestionPayload {
                    criteria_id: question.criteria_id.take(),
                    response_type: question.response_type.clone(),
                    evidence_method: external_id.clone(),
                });
                question.start_time = Some(Value::String(String::new()));
                question.end_time = Some(Value::String(String::new()));

                index.question_by_id.insert(question.id.clone(), *slot);
                index.section_of_question.insert(question.id.clone(), *section_id);
            }
        }
    }

    index
}
