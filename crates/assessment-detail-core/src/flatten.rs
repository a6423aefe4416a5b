use crate::{CriteriaId, CriteriaRef, DetailError, Document, Theme, ThemeNode, WeightedCriteria};

/// Collect criteria ids from a theme tree in pre-order, per-node order preserved.
#[must_use]
pub fn flatten_criteria_ids(themes: &[Theme]) -> Vec<CriteriaId> {
    let mut ids = Vec::new();
    visit_criteria(themes, &mut |id, _| ids.push(id.clone()));
    ids
}

/// Same traversal as [`flatten_criteria_ids`], keeping each reference's weightage.
///
/// Bare ids carry no weightage and are emitted with `weightage: None`; the
/// weightage value is copied as stored, whatever its JSON type.
#[must_use]
pub fn flatten_criteria_ids_with_weightage(themes: &[Theme]) -> Vec<WeightedCriteria> {
    let mut weighted = Vec::new();
    visit_criteria(themes, &mut |id, criteria| {
        weighted.push(WeightedCriteria {
            criteria_id: id.clone(),
            weightage: criteria.weightage().cloned(),
            extra: Document::new(),
        });
    });
    weighted
}

/// Entries without a usable id are skipped; [`diagnose_themes`] reports them.
fn visit_criteria(themes: &[Theme], emit: &mut impl FnMut(&CriteriaId, &CriteriaRef)) {
    for theme in themes {
        match theme.node() {
            ThemeNode::Branch(children) => visit_criteria(children, emit),
            ThemeNode::Leaf(criteria) => {
                for entry in criteria {
                    if let Some(id) = entry.criteria_id() {
                        emit(id, entry);
                    }
                }
            }
            ThemeNode::Empty => {}
        }
    }
}

/// Report every theme that has neither `children` nor `criteria`, and every
/// leaf entry with no usable criteria id.
///
/// Neither contributes to flattening; the report names them by their
/// slash-joined theme path so authors can fix the framework.
#[must_use]
pub fn diagnose_themes(themes: &[Theme]) -> Vec<DetailError> {
    let mut issues = Vec::new();
    let mut path = Vec::new();
    collect_empty_themes(themes, &mut path, &mut issues);
    issues
}

fn collect_empty_themes<'a>(
    themes: &'a [Theme],
    path: &mut Vec<&'a str>,
    issues: &mut Vec<DetailError>,
) {
    for theme in themes {
        path.push(theme.name.as_str());
        match theme.node() {
            ThemeNode::Branch(children) => collect_empty_themes(children, path, issues),
            ThemeNode::Leaf(criteria) => {
                for (position, entry) in criteria.iter().enumerate() {
                    if let CriteriaRef::Unrecognized(value) = entry {
                        issues.push(DetailError::MalformedInput(format!(
                            "theme `{}` criteria entry {position} has no criteria id: {value}",
                            path.join("/")
                        )));
                    }
                }
            }
            ThemeNode::Empty => issues.push(DetailError::MalformedInput(format!(
                "theme `{}` has neither children nor criteria",
                path.join("/")
            ))),
        }
        path.pop();
    }
}
