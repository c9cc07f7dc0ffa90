//! Bucket lifecycle rules and reconciliation of the store's expiration rule.
//!
//! The store owns exactly one rule on its bucket, identified by
//! [`EXPIRATION_RULE_ID`]. Every other rule is foreign and must survive
//! reconciliation untouched.

use serde::{Deserialize, Serialize};

use crate::models::attributes::{DELETED_TAG_KEY, DELETED_TAG_VALUE};

/// Id of the one lifecycle rule this store manages on its bucket.
pub const EXPIRATION_RULE_ID: &str = "blobstore-soft-delete-expiration";

/// Tag-scoped filter restricting which objects a rule applies to.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

/// Storage-class transition step within a rule.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Transition {
    pub days: u32,
    pub storage_class: String,
}

/// One bucket lifecycle rule, backend-neutral.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct LifecycleRule {
    pub id: String,
    pub enabled: bool,
    /// Objects the rule applies to; `None` means the whole bucket.
    pub filter: Option<TagFilter>,
    /// Days until matching objects are hard-expired by the backend.
    pub expiration_days: Option<u32>,
    pub transitions: Vec<Transition>,
}

impl LifecycleRule {
    /// The store's own expiration rule: hard-expire objects carrying the
    /// soft-delete tag after `days`.
    pub fn soft_delete_expiration(days: u32) -> Self {
        Self {
            id: EXPIRATION_RULE_ID.to_string(),
            enabled: true,
            filter: Some(TagFilter {
                key: DELETED_TAG_KEY.to_string(),
                value: DELETED_TAG_VALUE.to_string(),
            }),
            expiration_days: Some(days),
            transitions: Vec::new(),
        }
    }
}

/// Merge the store's expiration rule into the bucket's current rule set.
///
/// Any prior rule with the reserved id is superseded; foreign rules pass
/// through unchanged. `expiration_days == 0` disables backend expiration, so
/// the reserved rule is removed and not re-added. Returns `Some(next)` only
/// when the merged set differs from `current`; the caller skips the
/// write-back otherwise, which avoids policy churn when another actor
/// mutated unrelated rules concurrently.
pub fn reconcile(current: &[LifecycleRule], expiration_days: u32) -> Option<Vec<LifecycleRule>> {
    let mut next: Vec<LifecycleRule> = current
        .iter()
        .filter(|rule| rule.id != EXPIRATION_RULE_ID)
        .cloned()
        .collect();
    if expiration_days > 0 {
        next.push(LifecycleRule::soft_delete_expiration(expiration_days));
    }
    if rule_sets_equal(current, &next) {
        None
    } else {
        Some(next)
    }
}

/// Set equality over rule id and content, ignoring order.
fn rule_sets_equal(a: &[LifecycleRule], b: &[LifecycleRule]) -> bool {
    a.len() == b.len() && a.iter().all(|rule| b.contains(rule))
}
