use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Storage-state snapshot captured for one authenticated browser session.
/// Shape mirrors a Playwright/Chrome DevTools `storageState` document plus
/// a human-facing label; the identity-capture sub-feature produces these
/// files, this crate only ever reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDocument {
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    #[serde(default)]
    pub origins: Vec<serde_json::Value>,
    #[serde(default)]
    pub account_name: Option<String>,
}

impl IdentityDocument {
    fn is_valid_shape(&self) -> bool {
        !self.cookies.is_empty() || !self.origins.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IdentityEntry {
    pub index: u32,
    pub path: PathBuf,
    pub document: IdentityDocument,
}

/// A read-only snapshot of the identity directory as last scanned.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    valid: BTreeMap<u32, IdentityEntry>,
    /// Every index found on disk, valid or not, for status reporting.
    initial_indices: Vec<u32>,
}

impl IdentityRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scans `dir` for `auth-<index>.<ext>` files and parses each as an
    /// [`IdentityDocument`]. Files that fail to parse or fail the shape
    /// check are dropped from the valid set but kept in `initial_indices`.
    pub fn scan(dir: &Path) -> std::io::Result<Self> {
        let mut valid = BTreeMap::new();
        let mut initial_indices = Vec::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(index) = parse_identity_index(&path) else {
                continue;
            };
            initial_indices.push(index);

            match std::fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<IdentityDocument>(&bytes) {
                    Ok(document) if document.is_valid_shape() => {
                        valid.insert(
                            index,
                            IdentityEntry {
                                index,
                                path,
                                document,
                            },
                        );
                    }
                    Ok(_) => {
                        tracing::warn!(index, path = %path.display(), "identity file has no usable cookies or storage");
                    }
                    Err(err) => {
                        tracing::warn!(index, path = %path.display(), %err, "failed to parse identity file");
                    }
                },
                Err(err) => {
                    tracing::warn!(index, path = %path.display(), %err, "failed to read identity file");
                }
            }
        }

        initial_indices.sort_unstable();
        Ok(Self {
            valid,
            initial_indices,
        })
    }

    pub fn valid_indices(&self) -> Vec<u32> {
        self.valid.keys().copied().collect()
    }

    pub fn initial_indices(&self) -> &[u32] {
        &self.initial_indices
    }

    pub fn get(&self, index: u32) -> Option<&IdentityEntry> {
        self.valid.get(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.valid.is_empty()
    }

    pub fn first_valid(&self) -> Option<u32> {
        self.valid.keys().next().copied()
    }

    /// Successor of `index` in sorted order, modulo the valid set. If `index`
    /// itself is no longer valid, returns the first valid index at or after it.
    pub fn next_after(&self, index: u32) -> Option<u32> {
        if self.valid.is_empty() {
            return None;
        }
        self.valid
            .range((std::ops::Bound::Excluded(index), std::ops::Bound::Unbounded))
            .next()
            .map(|(k, _)| *k)
            .or_else(|| self.first_valid())
    }

    /// First valid index greater than or equal to `index`, used when the
    /// cursor's exact index disappeared from the set after a reload.
    pub fn nearest_at_or_after(&self, index: u32) -> Option<u32> {
        self.valid
            .range(index..)
            .next()
            .map(|(k, _)| *k)
            .or_else(|| self.first_valid())
    }
}

fn parse_identity_index(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.strip_prefix("auth-")?;
    digits.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_identity_filename() {
        assert_eq!(parse_identity_index(Path::new("auth-0.json")), Some(0));
        assert_eq!(parse_identity_index(Path::new("auth-12.json")), Some(12));
        assert_eq!(parse_identity_index(Path::new("auth-x.json")), None);
        assert_eq!(parse_identity_index(Path::new("other.json")), None);
    }

    #[test]
    fn scan_missing_directory_is_empty_not_error() {
        let registry = IdentityRegistry::scan(Path::new("/nonexistent/does-not-exist")).unwrap();
        assert!(registry.is_empty());
        assert!(registry.initial_indices().is_empty());
    }

    #[test]
    fn next_after_wraps_around_sorted_set() {
        let mut valid = BTreeMap::new();
        for index in [0u32, 2, 5] {
            valid.insert(
                index,
                IdentityEntry {
                    index,
                    path: PathBuf::new(),
                    document: IdentityDocument {
                        cookies: vec![serde_json::json!({})],
                        origins: vec![],
                        account_name: None,
                    },
                },
            );
        }
        let registry = IdentityRegistry {
            valid,
            initial_indices: vec![0, 2, 5],
        };
        assert_eq!(registry.next_after(0), Some(2));
        assert_eq!(registry.next_after(2), Some(5));
        assert_eq!(registry.next_after(5), Some(0));
    }
}
