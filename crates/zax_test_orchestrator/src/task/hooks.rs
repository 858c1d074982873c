//! Lifecycle hook registrations.

use super::Location;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

/// A registered hook. The callback itself lives in the worker; the tree only
/// records that it exists and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Hook {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSet {
    #[serde(default)]
    pub before_all: Vec<Hook>,
    #[serde(default)]
    pub after_all: Vec<Hook>,
    #[serde(default)]
    pub before_each: Vec<Hook>,
    #[serde(default)]
    pub after_each: Vec<Hook>,
}

impl HookSet {
    pub fn push(&mut self, kind: HookKind, hook: Hook) {
        self.slot(kind).push(hook);
    }

    /// Appends every hook of `other` after the ones already registered.
    pub fn merge(&mut self, other: &HookSet) {
        self.before_all.extend(other.before_all.iter().cloned());
        self.after_all.extend(other.after_all.iter().cloned());
        self.before_each.extend(other.before_each.iter().cloned());
        self.after_each.extend(other.after_each.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.before_all.len()
            + self.after_all.len()
            + self.before_each.len()
            + self.after_each.len()
    }

    fn slot(&mut self, kind: HookKind) -> &mut Vec<Hook> {
        match kind {
            HookKind::BeforeAll => &mut self.before_all,
            HookKind::AfterAll => &mut self.after_all,
            HookKind::BeforeEach => &mut self.before_each,
            HookKind::AfterEach => &mut self.after_each,
        }
    }
}
