use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::warn;

use crate::{Document, EvidenceMethod, InstanceQuestions, Question, QuestionId, Section};

/// Stable handle of a section inside an [`EvidenceWorkspace`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SectionId(pub(crate) usize);

/// Stable handle of one question occurrence inside an [`EvidenceWorkspace`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QuestionSlot(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct SectionNode {
    pub(crate) name: String,
    pub(crate) extra: Document,
    pub(crate) questions: Vec<QuestionSlot>,
}

#[derive(Debug, Clone)]
pub(crate) struct EvidenceNode {
    /// Evidence fields with `sections` emptied; section content lives in the arena.
    pub(crate) header: EvidenceMethod,
    pub(crate) sections: Vec<SectionId>,
}

/// Merged evidence methods keyed by external id, in first-seen order.
///
/// Sections and questions are owned by flat arenas and referenced by
/// [`SectionId`] / [`QuestionSlot`], so every index built over the workspace
/// observes removals applied to a section.
#[derive(Debug, Clone, Default)]
pub struct EvidenceWorkspace {
    pub(crate) evidences: IndexMap<String, EvidenceNode>,
    pub(crate) sections: Vec<SectionNode>,
    pub(crate) questions: Vec<Question>,
    pub(crate) resolved_instances: HashMap<QuestionId, Vec<QuestionSlot>>,
}

impl EvidenceWorkspace {
    #[must_use]
    pub fn len(&self) -> usize {
        self.evidences.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evidences.is_empty()
    }

    pub fn external_ids(&self) -> impl Iterator<Item = &str> {
        self.evidences.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, external_id: &str) -> bool {
        self.evidences.contains_key(external_id)
    }

    /// Section handles of one evidence method, in section order.
    #[must_use]
    pub fn section_ids(&self, external_id: &str) -> Vec<SectionId> {
        self.evidences.get(external_id).map(|node| node.sections.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn section_name(&self, section: SectionId) -> Option<&str> {
        self.sections.get(section.0).map(|node| node.name.as_str())
    }

    /// Questions currently listed directly in `section`.
    #[must_use]
    pub fn section_questions(&self, section: SectionId) -> Vec<&Question> {
        self.sections
            .get(section.0)
            .map(|node| node.questions.iter().map(|slot| &self.questions[slot.0]).collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn question(&self, slot: QuestionSlot) -> Option<&Question> {
        self.questions.get(slot.0)
    }

    pub(crate) fn push_section(&mut self, section: Section) -> SectionId {
        let Section { name, questions, extra } = section;
        let slots = questions.into_iter().map(|question| self.push_question(question)).collect();
        self.sections.push(SectionNode { name, extra, questions: slots });
        SectionId(self.sections.len() - 1)
    }

    pub(crate) fn push_question(&mut self, question: Question) -> QuestionSlot {
        self.questions.push(question);
        QuestionSlot(self.questions.len() - 1)
    }

    /// Drop every listed question id from one section in a single pass.
    pub(crate) fn remove_from_section(&mut self, section: SectionId, ids: &HashSet<QuestionId>) {
        let questions = &self.questions;
        if let Some(node) = self.sections.get_mut(section.0) {
            node.questions.retain(|slot| !ids.contains(&questions[slot.0].id));
        }
    }

    /// Rebuild owned evidence methods, nesting resolved matrix instances.
    #[must_use]
    pub fn into_evidence_methods(self) -> Vec<EvidenceMethod> {
        self.evidences
            .values()
            .map(|node| {
                let mut method = node.header.clone();
                method.sections = node
                    .sections
                    .iter()
                    .map(|section| self.materialize_section(*section))
                    .collect();
                method
            })
            .collect()
    }

    fn materialize_section(&self, section: SectionId) -> Section {
        let node = &self.sections[section.0];
        let mut stack = Vec::new();
        Section {
            name: node.name.clone(),
            questions: node
                .questions
                .iter()
                .map(|slot| self.materialize_question(*slot, &mut stack))
                .collect(),
            extra: node.extra.clone(),
        }
    }

    fn materialize_question(&self, slot: QuestionSlot, stack: &mut Vec<QuestionId>) -> Question {
        let mut question = self.questions[slot.0].clone();
        let Some(instances) = self.resolved_instances.get(&question.id) else {
            return question;
        };

        stack.push(question.id.clone());
        let mut nested = Vec::with_capacity(instances.len());
        for instance in instances {
            let instance_id = &self.questions[instance.0].id;
            if stack.contains(instance_id) {
                warn!(
                    matrix = %question.id,
                    instance = %instance_id,
                    "matrix instance cycle detected; dropping repeated question"
                );
                continue;
            }
            nested.push(self.materialize_question(*instance, stack));
        }
        stack.pop();

        question.instance_questions = Some(InstanceQuestions::Resolved(nested));
        question
    }
}
