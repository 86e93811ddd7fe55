//! Provider fallback ordering.
//!
//! # Responsibilities
//! - Describe interchangeable providers (`ProviderDescriptor`)
//! - Pick the next untried provider by priority
//!
//! # Design Decisions
//! - Fallback order is data (priority), not branching on provider names
//! - Equal priorities keep registration order

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// Conventional capability tags for AI model roles, in fallback order.
pub mod roles {
    pub const MAIN: &str = "main";
    pub const FALLBACK: &str = "fallback";
    pub const PRD: &str = "prd";
    pub const RESEARCH: &str = "research";

    pub const ORDER: [&str; 4] = [MAIN, FALLBACK, PRD, RESEARCH];
}

/// An interchangeable upstream dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,

    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, priority: u32) -> Self {
        Self {
            id: id.into(),
            priority,
            capabilities: BTreeSet::new(),
        }
    }

    /// Descriptor for an AI model role; priority follows `roles::ORDER`.
    pub fn for_role(id: impl Into<String>, role: &str) -> Self {
        let priority = roles::ORDER
            .iter()
            .position(|r| *r == role)
            .unwrap_or(roles::ORDER.len()) as u32;
        Self::new(id, priority).with_capability(role)
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.insert(tag.into());
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }
}

/// Selects providers in priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFallbackChain;

impl ProviderFallbackChain {
    pub fn new() -> Self {
        Self
    }

    /// Next candidate, or `None` when every eligible provider was tried.
    pub fn next<'a>(
        &self,
        tried: &HashSet<String>,
        descriptors: &'a [ProviderDescriptor],
        required_capability: Option<&str>,
    ) -> Option<&'a ProviderDescriptor> {
        descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| required_capability.map_or(true, |tag| d.has_capability(tag)))
            .filter(|(_, d)| !tried.contains(&d.id))
            .min_by_key(|(index, d)| (d.priority, *index))
            .map(|(_, d)| d)
    }

    /// Every eligible provider in the order `next` would return them.
    pub fn ordered<'a>(
        &self,
        descriptors: &'a [ProviderDescriptor],
        required_capability: Option<&str>,
    ) -> Vec<&'a ProviderDescriptor> {
        let mut tried = HashSet::new();
        let mut ordered = Vec::new();
        while let Some(next) = self.next(&tried, descriptors, required_capability) {
            tried.insert(next.id.clone());
            ordered.push(next);
        }
        ordered
    }
}
