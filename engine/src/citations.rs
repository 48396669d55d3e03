//! Per-turn citation collection.

use fieldhand_types::{Citation, CitationKind};

/// Citations of the current turn, in arrival order, plus the guidebook subset.
///
/// Duplicates are kept; the assistant may legitimately cite a page twice.
#[derive(Debug, Default)]
pub struct CitationCollector {
    all: Vec<Citation>,
    guidebook: Vec<Citation>,
}

impl CitationCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, citation: Citation) {
        if citation.kind == CitationKind::Guidebook {
            self.guidebook.push(citation.clone());
        }
        self.all.push(citation);
    }

    pub fn reset(&mut self) {
        self.all.clear();
        self.guidebook.clear();
    }

    #[must_use]
    pub fn all(&self) -> &[Citation] {
        &self.all
    }

    #[must_use]
    pub fn guidebook(&self) -> &[Citation] {
        &self.guidebook
    }

    pub fn by_kind(&self, kind: CitationKind) -> impl Iterator<Item = &Citation> {
        self.all.iter().filter(move |c| c.kind == kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}
