//! Label selector string construction.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Equality selector matching every label in `labels`.
#[must_use]
pub fn selector_from_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render a workload's `LabelSelector` as a selector string.
///
/// An empty selector renders as the empty string, which matches everything.
pub fn selector_from_label_selector(selector: &LabelSelector) -> Result<String> {
    let mut terms = Vec::new();

    if let Some(labels) = &selector.match_labels {
        terms.push(selector_from_labels(labels));
    }

    for expr in selector.match_expressions.iter().flatten() {
        let values = || expr.values.clone().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values()),
            "NotIn" => format!("{} notin ({})", expr.key, values()),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            op => {
                return Err(Error::resolution(format!(
                    "invalid label selector operator {op:?} for key {}",
                    expr.key
                )))
            }
        };
        terms.push(term);
    }

    Ok(terms
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(","))
}
