//! Attribute schema — typed name→kind lookup for the event extractor
//!
//! Built once at startup from the configured attribute list and
//! immutable thereafter. Message fields whose names are not in the
//! schema are ignored during extraction, which keeps the sidecar
//! forward-compatible with producers that emit wider records.

use crate::config::{AttributeDef, AttributeKind};
use a_tree::AttributeDefinition;
use std::collections::HashMap;

/// Precomputed attribute name → kind lookup
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    kinds: HashMap<String, AttributeKind>,
}

impl AttributeSchema {
    /// Build the lookup from the ordered attribute list
    pub fn new(defs: &[AttributeDef]) -> Self {
        let kinds = defs
            .iter()
            .map(|d| (d.name.clone(), d.kind))
            .collect();
        Self { kinds }
    }

    /// Look up the declared kind for an attribute name
    pub fn lookup(&self, name: &str) -> Option<AttributeKind> {
        self.kinds.get(name).copied()
    }

    /// Number of declared attributes
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Convert the configured attributes into matching-tree definitions
pub fn tree_definitions(defs: &[AttributeDef]) -> Vec<AttributeDefinition> {
    defs.iter()
        .map(|d| match d.kind {
            AttributeKind::Boolean => AttributeDefinition::boolean(&d.name),
            AttributeKind::Integer => AttributeDefinition::integer(&d.name),
            AttributeKind::Float => AttributeDefinition::float(&d.name),
            AttributeKind::String => AttributeDefinition::string(&d.name),
            AttributeKind::StringList => AttributeDefinition::string_list(&d.name),
            AttributeKind::IntegerList => AttributeDefinition::integer_list(&d.name),
        })
        .collect()
}
