//! Plain and typed tags.
//!
//! A typed tag is `"<type>:<value>"` with the type restricted to `[a-z0-9]+`,
//! e.g. `year:2020` or `topic:Machine Learning`. Anything else is a plain
//! label.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static TYPED_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-z0-9]+):(.+)$").unwrap());

/// Build a typed tag.
pub fn typed(tag_type: &str, value: &str) -> String {
    format!("{}:{}", tag_type.trim().to_lowercase(), value.trim())
}

/// Split a typed tag into `(type, value)`. The value is everything after the
/// first `:`.
pub fn split_typed(tag: &str) -> Option<(&str, &str)> {
    let caps = TYPED_TAG.captures(tag)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Normalize one tag; `None` for blank input.
///
/// Typed tags get a lowercased type and keep their value verbatim. Plain
/// labels are lowercased with whitespace runs turned into `-`.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if tag.is_empty() {
        return None;
    }
    if let Some((tag_type, value)) = tag.split_once(':') {
        let tag_type = tag_type.trim().to_lowercase();
        let value = value.trim();
        if !tag_type.is_empty()
            && !value.is_empty()
            && tag_type.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Some(format!("{tag_type}:{value}"));
        }
    }
    Some(tag.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-"))
}

/// Normalize and de-duplicate, keeping first occurrences in order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .filter_map(|t| normalize_tag(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Append `new` to `existing` with set semantics.
pub fn union(existing: &mut Vec<String>, new: impl IntoIterator<Item = String>) {
    let mut seen: HashSet<String> = existing.iter().cloned().collect();
    for tag in new {
        if seen.insert(tag.clone()) {
            existing.push(tag);
        }
    }
}

/// All values of typed tags of `tag_type`, or `None` when there are none.
pub fn values_of_type(tags: &[String], tag_type: &str) -> Option<Vec<String>> {
    let values: Vec<String> = tags
        .iter()
        .filter_map(|t| split_typed(t))
        .filter(|(ty, _)| *ty == tag_type)
        .map(|(_, value)| value.to_string())
        .collect();
    (!values.is_empty()).then_some(values)
}
