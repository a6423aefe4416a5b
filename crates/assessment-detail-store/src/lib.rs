use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use assessment_detail_core::{
    Criteria, CriteriaId, Document, Framework, SubmissionContext, SubmissionDocument,
    SubmissionId, SubmissionRecord, SubmissionSkeleton, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Everything the store persists, as one JSON document.
///
/// Documents are held as stored and only decoded when a lookup returns them,
/// so saving never rewrites fields the typed model does not know about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentBundle {
    #[serde(default)]
    pub frameworks: Vec<Value>,
    #[serde(default)]
    pub criteria: Vec<Value>,
    #[serde(default)]
    pub submissions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub frameworks: usize,
    pub criteria: usize,
    pub submissions: usize,
}

#[derive(Debug)]
pub struct DocumentStore {
    path: Option<PathBuf>,
    bundle: DocumentBundle,
    dirty: bool,
}

fn document_id(document: &Value) -> Option<&str> {
    document.get("_id").or_else(|| document.get("id")).and_then(Value::as_str)
}

fn str_field<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    document.get(field).and_then(Value::as_str)
}

fn matches_context(document: &Value, context: &SubmissionContext) -> bool {
    str_field(document, "entityId") == Some(context.entity_id.as_str())
        && str_field(document, "frameworkId") == Some(context.framework_id.as_str())
        && str_field(document, "programId") == context.program_id.as_deref()
}

/// Insert a pending record for every skeleton evidence the document lacks.
fn add_pending_records(document: &mut Value, skeleton: &SubmissionSkeleton) -> Result<usize> {
    let Some(object) = document.as_object_mut() else {
        bail!("submission document is not a JSON object");
    };
    let evidences = object.entry("evidences").or_insert_with(|| Value::Object(Document::new()));
    if evidences.is_null() {
        *evidences = Value::Object(Document::new());
    }
    let Some(evidences) = evidences.as_object_mut() else {
        bail!("submission `evidences` is not a JSON object");
    };

    let pending =
        serde_json::to_value(SubmissionRecord::pending()).context("failed to encode pending record")?;
    let mut added = 0_usize;
    for external_id in skeleton.evidences.keys() {
        if !evidences.contains_key(external_id) {
            evidences.insert(external_id.clone(), pending.clone());
            added += 1;
        }
    }
    Ok(added)
}

impl DocumentStore {
    /// Load a document bundle from `path`; a missing file opens an empty store.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let bundle = if path.exists() {
            let file = File::open(path)
                .with_context(|| format!("failed to open document bundle {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("failed to parse document bundle {}", path.display()))?
        } else {
            debug!(path = %path.display(), "document bundle not found; starting empty");
            DocumentBundle::default()
        };

        Ok(Self { path: Some(path.to_path_buf()), bundle, dirty: false })
    }

    /// Store backed by nothing; [`DocumentStore::save`] is a no-op.
    #[must_use]
    pub fn in_memory(bundle: DocumentBundle) -> Self {
        Self { path: None, bundle, dirty: false }
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            frameworks: self.bundle.frameworks.len(),
            criteria: self.bundle.criteria.len(),
            submissions: self.bundle.submissions.len(),
        }
    }

    /// Look a framework up by id, falling back to its external id.
    ///
    /// # Errors
    /// Returns an error when the matching document does not decode as a framework.
    pub fn framework(&self, id: &str) -> Result<Option<Framework>> {
        let frameworks = &self.bundle.frameworks;
        frameworks
            .iter()
            .find(|document| document_id(document) == Some(id))
            .or_else(|| frameworks.iter().find(|document| str_field(document, "externalId") == Some(id)))
            .map(|document| {
                serde_json::from_value(document.clone())
                    .with_context(|| format!("failed to parse framework {id}"))
            })
            .transpose()
    }

    /// Criteria documents whose id is in `ids`, in stored order, each once.
    ///
    /// # Errors
    /// Returns an error when a matching document does not decode as criteria.
    pub fn criteria_by_ids(&self, ids: &[CriteriaId]) -> Result<Vec<Criteria>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let wanted = ids.iter().map(CriteriaId::as_str).collect::<HashSet<_>>();
        let found = self
            .bundle
            .criteria
            .iter()
            .filter_map(|document| document_id(document).filter(|id| wanted.contains(id)).map(|id| (id, document)))
            .map(|(id, document)| {
                serde_json::from_value(document.clone())
                    .with_context(|| format!("failed to parse criteria {id}"))
            })
            .collect::<Result<Vec<Criteria>>>()?;
        if found.len() < wanted.len() {
            debug!(requested = wanted.len(), found = found.len(), "some criteria ids have no document");
        }
        Ok(found)
    }

    /// # Errors
    /// Returns an error when the matching document does not decode as a submission.
    pub fn submission(&self, id: SubmissionId) -> Result<Option<SubmissionDocument>> {
        let id = id.to_string();
        self.bundle
            .submissions
            .iter()
            .find(|document| document_id(document) == Some(id.as_str()))
            .map(|document| {
                serde_json::from_value(document.clone())
                    .with_context(|| format!("failed to parse submission {id}"))
            })
            .transpose()
    }

    /// Return the submission for `context`, creating it from `skeleton` if needed.
    ///
    /// An existing submission gains a pending record for every skeleton
    /// evidence it does not track yet; nothing else in it is rewritten.
    ///
    /// # Errors
    /// Returns an error when the existing document is malformed.
    pub fn find_or_create_submission(
        &mut self,
        skeleton: &SubmissionSkeleton,
        context: &SubmissionContext,
    ) -> Result<SubmissionDocument> {
        let existing =
            self.bundle.submissions.iter_mut().find(|document| matches_context(document, context));

        if let Some(document) = existing {
            let added = add_pending_records(document, skeleton)?;
            if added > 0 {
                self.dirty = true;
            }
            let submission: SubmissionDocument = serde_json::from_value(document.clone())
                .context("failed to parse existing submission")?;
            debug!(submission = %submission.id, added, "reusing existing submission");
            return Ok(submission);
        }

        let submission = SubmissionDocument {
            id: SubmissionId::new(),
            entity_id: context.entity_id.clone(),
            framework_id: context.framework_id.clone(),
            program_id: context.program_id.clone(),
            created_at: Some(Timestamp::now()),
            evidences: skeleton
                .evidences
                .keys()
                .map(|external_id| (external_id.clone(), SubmissionRecord::pending()))
                .collect(),
            evidences_status: skeleton.evidences_status.clone(),
            criteria: skeleton.criteria.clone(),
            extra: Document::new(),
        };
        let document = serde_json::to_value(&submission).context("failed to encode submission")?;
        info!(
            submission = %submission.id,
            entity = %submission.entity_id,
            framework = %submission.framework_id,
            "created submission"
        );
        self.bundle.submissions.push(document);
        self.dirty = true;
        Ok(submission)
    }

    /// Persist pending changes by writing a sibling temp file and renaming it.
    ///
    /// # Errors
    /// Returns an error when the bundle cannot be serialized or written.
    pub fn save(&mut self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let temp_path = path.with_extension(format!("tmp-{}", ulid::Ulid::new()));
        {
            let file = File::create(&temp_path)
                .with_context(|| format!("failed to create {}", temp_path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &self.bundle)
                .context("failed to serialize document bundle")?;
            writer.write_all(b"\n").context("failed to finish document bundle")?;
            writer.flush().context("failed to flush document bundle")?;
        }
        fs::rename(&temp_path, path).with_context(|| {
            format!("failed to move {} into place at {}", temp_path.display(), path.display())
        })?;

        self.dirty = false;
        Ok(())
    }
}
