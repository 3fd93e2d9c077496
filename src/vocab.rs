use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Label vocabulary from `labelvocabulary.csv`: one `idx,label` row per
/// class, header skipped, file order preserved.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    labels: Vec<(usize, String)>,
}

impl Vocabulary {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Metadata(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut labels = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if lineno == 0 || line.trim().is_empty() {
                continue;
            }
            let (idx, label) = line.split_once(',').ok_or_else(|| {
                Error::Metadata(format!(
                    "{} line {}: expected idx,label",
                    path.display(),
                    lineno + 1
                ))
            })?;
            let idx: usize = idx.trim().parse().map_err(|_| {
                Error::Metadata(format!(
                    "{} line {}: bad index {idx:?}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            labels.push((idx, label.trim().to_string()));
        }
        Ok(Vocabulary { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Conventional fallback class: the last row of the vocabulary file.
    pub fn default_label(&self) -> Option<&str> {
        self.labels.last().map(|(_, label)| label.as_str())
    }

    pub fn label(&self, idx: usize) -> Option<&str> {
        self.labels
            .iter()
            .find(|(i, _)| *i == idx)
            .map(|(_, label)| label.as_str())
    }
}
