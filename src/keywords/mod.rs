//! Keyword categorisation.
//!
//! A [`KeywordMap`] is an ordered list of categories, each holding a list of
//! canonical terms. It is persisted as one JSON file and rewritten atomically
//! (temp file + rename) after every successful admin edit.
//!
//! Chunks carry keyword tags of the form `category:term`, stored joined by
//! [`DELIMITER`]. Terms come from two places:
//!
//! - ingestion asks the model for 3-5 terms ([`TermExtractor`]) and
//!   classifies each with [`KeywordMap::categorize`];
//! - [`backfill`] fills chunks that have no tags yet by plain substring
//!   matching of known terms, without any model call.

mod backfill;
mod extract;

pub use backfill::{backfill, BackfillReport};
pub use extract::{parse_terms, TermExtractor, MIN_TEXT_CHARS};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Error, Result};

/// Separator between stored keyword tags.
pub const DELIMITER: &str = ",";

/// Category assigned to terms no category claims.
pub const GENERIC: &str = "generic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub terms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordMap {
    categories: Vec<Category>,
    path: Option<PathBuf>,
}

impl KeywordMap {
    /// Load the mapping from `path`. A missing file is an empty mapping.
    pub fn load(path: &Path) -> Result<Self> {
        let categories = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            categories,
            path: Some(path.to_path_buf()),
        })
    }

    /// A mapping that is never written to disk.
    pub fn in_memory(categories: Vec<Category>) -> Self {
        Self {
            categories,
            path: None,
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn terms(&self, category: &str) -> Option<&[String]> {
        self.find(category).map(|c| c.terms.as_slice())
    }

    fn find(&self, category: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == category)
    }

    fn find_mut(&mut self, category: &str) -> Option<&mut Category> {
        self.categories.iter_mut().find(|c| c.name == category)
    }

    /// Returns `false` when the category already exists.
    pub fn add_category(&mut self, name: &str) -> Result<bool> {
        let name = name.trim();
        reject_delimiter(name)?;
        if name.is_empty() || self.find(name).is_some() {
            return Ok(false);
        }
        self.categories.push(Category {
            name: name.to_string(),
            terms: Vec::new(),
        });
        self.save()?;
        Ok(true)
    }

    /// Returns `false` when the category does not exist.
    pub fn remove_category(&mut self, name: &str) -> Result<bool> {
        let before = self.categories.len();
        self.categories.retain(|c| c.name != name);
        if self.categories.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Add `term` to `category`, creating the category when missing.
    /// Returns `false` when the term is already present.
    pub fn add_term(&mut self, category: &str, term: &str) -> Result<bool> {
        let (category, term) = (category.trim(), term.trim());
        if category.is_empty() || term.is_empty() {
            return Ok(false);
        }
        reject_delimiter(category)?;
        reject_delimiter(term)?;
        if self.find(category).is_none() {
            self.categories.push(Category {
                name: category.to_string(),
                terms: Vec::new(),
            });
        }
        let Some(entry) = self.find_mut(category) else {
            return Ok(false);
        };
        if entry.terms.iter().any(|t| t == term) {
            return Ok(false);
        }
        entry.terms.push(term.to_string());
        self.save()?;
        Ok(true)
    }

    /// Returns `false` when the category or term does not exist.
    pub fn remove_term(&mut self, category: &str, term: &str) -> Result<bool> {
        let Some(entry) = self.find_mut(category) else {
            return Ok(false);
        };
        let before = entry.terms.len();
        entry.terms.retain(|t| t != term);
        if entry.terms.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// First category (in insertion order) whose term list contains `term`
    /// exactly, or [`GENERIC`].
    pub fn classify(&self, term: &str) -> &str {
        self.categories
            .iter()
            .find(|c| c.terms.iter().any(|t| t == term))
            .map(|c| c.name.as_str())
            .unwrap_or(GENERIC)
    }

    /// Classify each term into a `category:term` tag, dropping duplicates.
    pub fn categorize(&self, terms: &[String]) -> Vec<String> {
        dedup(
            terms
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(|t| format!("{}:{}", self.classify(t), t)),
        )
    }

    /// Tags for every known term that occurs in `text` (case-sensitive
    /// substring match), in category then term order.
    pub fn match_text(&self, text: &str) -> Vec<String> {
        dedup(self.categories.iter().flat_map(|c| {
            c.terms
                .iter()
                .filter(|t| !t.is_empty() && text.contains(t.as_str()))
                .map(move |t| format!("{}:{}", c.name, t))
        }))
    }

    /// Persist the whole mapping: write a sibling temp file, then rename over
    /// the target. In-memory maps are not persisted.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_string_pretty(&self.categories)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), categories = self.categories.len(), "saved keyword mapping");
        Ok(())
    }
}

/// Names containing [`DELIMITER`] would split apart in the stored tag field.
fn reject_delimiter(name: &str) -> Result<()> {
    if name.contains(DELIMITER) {
        return Err(Error::Config(format!(
            "keyword names cannot contain '{}': {}",
            DELIMITER, name
        )));
    }
    Ok(())
}

fn dedup(tags: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.filter(|t| seen.insert(t.clone())).collect()
}

/// Join tags for storage.
pub fn join_keywords(tags: &[String]) -> String {
    tags.join(DELIMITER)
}

/// Split a stored keyword field back into tags.
pub fn split_keywords(stored: &str) -> Vec<String> {
    stored
        .split(DELIMITER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
