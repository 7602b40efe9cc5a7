use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum::{Display, EnumString};

use super::{error::EngineError, expr::ast::FilterExpr, expr::parser};

#[derive(
    Debug, Serialize, Deserialize, Hash, Eq, PartialEq, Clone, Copy, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Read,
    Update,
    Delete,
    /// Grants every action on the view
    All,
}

/// One row-level grant. `criteria` is a filter expression over the view's
/// root type; an absent or blank criteria grants unrestricted access.
/// `mask` arrives from the permission source but field-level masking is not
/// implemented; it is carried and ignored.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub view: String,
    pub action: Action,
    pub criteria: Option<String>,
    pub mask: Option<String>,
}

impl Permission {
    fn matches(&self, view: &str, action: Action) -> bool {
        self.view == view && (self.action == action || self.action == Action::All)
    }
}

/// Folds the caller's criteria for `view`/`action` into one filter.
///
/// Returns `None` when any matching grant is unrestricted, `Forbidden` when
/// no grant matches. The criteria fold left to right so a malformed criteria
/// is always reported deterministically, earliest first. The caller ANDs the
/// result outside the request's own filter; the request can never widen it.
pub fn build_permission_filter(
    permissions: &[Permission],
    view: &str,
    action: Action,
) -> Result<Option<FilterExpr>, EngineError> {
    let matching: Vec<&Permission> = permissions
        .iter()
        .filter(|permission| permission.matches(view, action))
        .collect();

    if matching.is_empty() {
        return Err(EngineError::Forbidden);
    }
    if matching
        .iter()
        .any(|permission| match &permission.criteria {
            None => true,
            Some(criteria) => criteria.trim().is_empty(),
        })
    {
        return Ok(None);
    }

    let mut composite: Option<FilterExpr> = None;
    for permission in matching {
        let criteria = permission.criteria.as_deref().unwrap_or_default();
        let parsed = parser::parse_filter(criteria)?;
        composite = Some(match composite {
            None => parsed,
            Some(filter) => filter.or(parsed),
        });
    }
    Ok(composite)
}
