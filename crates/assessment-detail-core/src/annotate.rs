use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EvidenceMethod, Submission, SubmissionRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotated {
    pub evidences: Vec<EvidenceMethod>,
    pub submissions: BTreeMap<String, Submission>,
}

/// Sort evidences by name and copy each one's progress from its submission record.
///
/// The sort is stable and ordinal. Record timing and `isSubmitted` are copied
/// as stored, so a missing record or field leaves them absent. For every evidence the last valid entry
/// of its record's `submissions` is kept.
#[must_use]
pub fn annotate(
    mut evidences: Vec<EvidenceMethod>,
    records: &BTreeMap<String, SubmissionRecord>,
) -> Annotated {
    evidences.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));

    let mut submissions = BTreeMap::new();
    for evidence in &mut evidences {
        let Some(record) = records.get(&evidence.external_id) else {
            debug!(evidence = %evidence.external_id, "no submission record for evidence method");
            evidence.start_time = None;
            evidence.end_time = None;
            evidence.is_submitted = None;
            continue;
        };

        evidence.start_time.clone_from(&record.start_time);
        evidence.end_time.clone_from(&record.end_time);
        evidence.is_submitted = record.is_submitted;

        if let Some(last_valid) = record.submissions.iter().rev().find(|entry| entry.is_valid) {
            submissions.insert(evidence.external_id.clone(), last_valid.clone());
        }
    }

    Annotated { evidences, submissions }
}
