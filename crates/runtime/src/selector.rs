//! Choosing which function declarations to send upstream for a prompt.

use serde::Serialize;

use crate::schema::FunctionDeclaration;

/// One tool's declarations, in the order they should be offered.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub tool: String,
    pub declarations: Vec<FunctionDeclaration>,
}

impl CatalogEntry {
    /// Case-insensitive substring match on the tool or any function name.
    /// `prompt` must already be lower-cased.
    fn matches(&self, prompt: &str) -> bool {
        let mentions = |name: &str| !name.is_empty() && prompt.contains(&name.to_lowercase());
        mentions(&self.tool) || self.declarations.iter().any(|d| mentions(&d.name))
    }
}

/// Declarations of every tool the prompt mentions, in catalog order,
/// truncated to `max`.
///
/// A prompt that mentions no tool gets no declarations.
pub fn select(prompt: &str, catalog: &[CatalogEntry], max: usize) -> Vec<FunctionDeclaration> {
    let prompt = prompt.to_lowercase();
    catalog
        .iter()
        .filter(|entry| entry.matches(&prompt))
        .flat_map(|entry| entry.declarations.iter().cloned())
        .take(max)
        .collect()
}
