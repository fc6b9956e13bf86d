//! Project map
//!
//! Walks the mission directory, estimates every text document's token count
//! and classifies it against the size thresholds. Maps are rebuilt wholesale
//! on every relevant file change and never patched in place.

pub mod watcher;

pub use watcher::{FileEvent, FileEventKind, MapWatcher};

use crate::config::MapperSettings;
use crate::tokens::{HeuristicCounter, TokenCounter};
use crate::{CadenceError, Result};
use chrono::{DateTime, Utc};
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Documents below this are OK
pub const OK_THRESHOLD: usize = 6000;

/// Documents at or above this are TOO_LONG
pub const TOO_LONG_THRESHOLD: usize = 12000;

/// Size class of one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Ok,
    Long,
    TooLong,
}

impl DocumentStatus {
    fn marker(&self) -> &'static str {
        match self {
            Self::Ok => "✅",
            Self::Long => "⚠️",
            Self::TooLong => "❌",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Long => write!(f, "LONG"),
            Self::TooLong => write!(f, "TOO_LONG"),
        }
    }
}

/// One mapped document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    /// Relative to the mapped root
    pub path: PathBuf,
    pub token_count: usize,
    pub status: DocumentStatus,
}

/// Snapshot of every tracked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMap {
    pub entries: Vec<DocumentEntry>,
    pub total_tokens: usize,
    pub generated_at: DateTime<Utc>,
}

impl ProjectMap {
    /// Build a map from entries, ordering them by path and summing the total
    pub fn from_entries(mut entries: Vec<DocumentEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let total_tokens = entries.iter().map(|e| e.token_count).sum();
        Self {
            entries,
            total_tokens,
            generated_at: Utc::now(),
        }
    }

    /// Map with no documents
    pub fn empty() -> Self {
        Self::from_entries(Vec::new())
    }

    /// Entries classified TOO_LONG
    pub fn too_long(&self) -> impl Iterator<Item = &DocumentEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == DocumentStatus::TooLong)
    }

    /// Count of entries with `status`
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Relative paths of every entry
    pub fn paths(&self) -> HashSet<PathBuf> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Find an entry by relative path
    pub fn get(&self, path: &Path) -> Option<&DocumentEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Markdown rendering
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# Project Map\n\n");
        out.push_str(&format!(
            "Generated {} | {} documents | {} tokens | {} OK, {} long, {} too long\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.entries.len(),
            self.total_tokens,
            self.count(DocumentStatus::Ok),
            self.count(DocumentStatus::Long),
            self.count(DocumentStatus::TooLong),
        ));

        if self.entries.is_empty() {
            out.push_str("_No documents._\n");
            return out;
        }

        out.push_str("| Document | Tokens | Status |\n");
        out.push_str("|----------|-------:|--------|\n");
        for entry in &self.entries {
            out.push_str(&format!(
                "| {} | {} | {} {} |\n",
                entry.path.display(),
                entry.token_count,
                entry.status.marker(),
                entry.status,
            ));
        }
        out
    }

    /// Write the markdown rendering to `path`
    pub fn save_markdown(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        Ok(())
    }
}

/// Thresholds and traversal policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    pub ok_threshold: usize,
    pub too_long_threshold: usize,
    /// Gitignore-style patterns, relative to the root
    pub ignore: Vec<String>,
    pub respect_gitignore: bool,
}

impl MapperConfig {
    pub fn classify(&self, token_count: usize) -> DocumentStatus {
        if token_count < self.ok_threshold {
            DocumentStatus::Ok
        } else if token_count < self.too_long_threshold {
            DocumentStatus::Long
        } else {
            DocumentStatus::TooLong
        }
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::from(&MapperSettings::default())
    }
}

impl From<&MapperSettings> for MapperConfig {
    fn from(settings: &MapperSettings) -> Self {
        Self {
            ok_threshold: settings.ok_threshold,
            too_long_threshold: settings.too_long_threshold,
            ignore: settings.ignore.clone(),
            respect_gitignore: settings.respect_gitignore,
        }
    }
}

/// Builds [`ProjectMap`]s
#[derive(Clone)]
pub struct Mapper {
    config: MapperConfig,
    counter: Arc<dyn TokenCounter>,
}

impl Mapper {
    pub fn new(config: MapperConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self { config, counter }
    }

    /// Mapper for configured settings with the heuristic counter
    pub fn from_settings(settings: &MapperSettings) -> Self {
        Self::new(
            MapperConfig::from(settings),
            Arc::new(HeuristicCounter::new(settings.chars_per_token)),
        )
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Also skip `pattern` (gitignore syntax) on every walk
    pub fn ignore(mut self, pattern: impl Into<String>) -> Self {
        self.config.ignore.push(pattern.into());
        self
    }

    /// Walk `root` and map every readable text document
    ///
    /// Fails only if `root` itself is missing or not a directory. Unreadable
    /// files are skipped with a warning and binary files are skipped silently.
    pub fn compute_map(&self, root: &Path) -> Result<ProjectMap> {
        let meta = std::fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(CadenceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            )));
        }

        let mut overrides = OverrideBuilder::new(root);
        for pattern in &self.config.ignore {
            overrides
                .add(&format!("!{}", pattern))
                .map_err(|e| CadenceError::Config(format!("Invalid ignore pattern '{}': {}", pattern, e)))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CadenceError::Config(format!("Invalid ignore patterns: {}", e)))?;

        let walker = WalkBuilder::new(root)
            .hidden(true)
            .parents(false)
            .git_ignore(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .git_global(false)
            .require_git(false)
            .overrides(overrides)
            .build();

        let mut entries = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable path during map build");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let Some(text) = read_text(path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            let token_count = self.counter.count(&text);
            entries.push(DocumentEntry {
                status: self.config.classify(token_count),
                path: relative,
                token_count,
            });
        }

        let map = ProjectMap::from_entries(entries);
        tracing::debug!(
            root = %root.display(),
            documents = map.entries.len(),
            tokens = map.total_tokens,
            "Project map computed"
        );
        Ok(map)
    }
}

/// Read a file as UTF-8 text; `None` for unreadable or binary files
fn read_text(path: &Path) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
            return None;
        }
    };
    if bytes.contains(&0) {
        tracing::debug!(path = %path.display(), "Skipping binary file");
        return None;
    }
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(_) => {
            tracing::debug!(path = %path.display(), "Skipping non-UTF-8 file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mapper() -> Mapper {
        Mapper::new(MapperConfig::default(), Arc::new(HeuristicCounter::default()))
    }

    fn write(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_classification_boundaries() {
        let config = MapperConfig::default();
        assert_eq!(config.classify(0), DocumentStatus::Ok);
        assert_eq!(config.classify(5999), DocumentStatus::Ok);
        assert_eq!(config.classify(6000), DocumentStatus::Long);
        assert_eq!(config.classify(11_999), DocumentStatus::Long);
        assert_eq!(config.classify(12_000), DocumentStatus::TooLong);
    }

    #[test]
    fn test_compute_map_sums_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "docs/b.md", &[b'x'; 40]);
        write(dir.path(), "docs/a.md", &[b'x'; 4]);
        write(dir.path(), "README.md", &[b'x'; 30_000]);

        let map = mapper().compute_map(dir.path()).unwrap();
        let paths: Vec<_> = map.entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("docs/a.md"),
                PathBuf::from("docs/b.md"),
            ]
        );
        assert_eq!(map.total_tokens, 7500 + 1 + 10);
        assert_eq!(map.get(Path::new("README.md")).unwrap().status, DocumentStatus::Long);
    }

    #[test]
    fn test_skips_binary_and_ignored() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "docs/a.md", b"hello");
        write(dir.path(), "image.png", &[0x89, b'P', b'N', b'G', 0, 0, 1]);
        write(dir.path(), "bad.txt", &[0xff, 0xfe, 0xfd]);
        write(dir.path(), "target/debug/out.txt", b"build output");
        write(dir.path(), "node_modules/pkg/index.js", b"module");

        let map = mapper().compute_map(dir.path()).unwrap();
        assert_eq!(map.paths(), HashSet::from([PathBuf::from("docs/a.md")]));
    }

    #[test]
    fn test_respects_gitignore_and_extra_ignores() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".gitignore", b"drafts/\n");
        write(dir.path(), "drafts/wip.md", b"wip");
        write(dir.path(), "scratch/notes.md", b"notes");
        write(dir.path(), "docs/a.md", b"hello");

        let map = mapper().ignore("scratch/").compute_map(dir.path()).unwrap();
        assert_eq!(map.paths(), HashSet::from([PathBuf::from("docs/a.md")]));
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let err = mapper().compute_map(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CadenceError::Io(_)));

        write(dir.path(), "file.md", b"x");
        assert!(mapper().compute_map(&dir.path().join("file.md")).is_err());
    }

    #[test]
    fn test_sum_invariant_after_edits() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", &[b'x'; 100]);
        write(dir.path(), "b.md", &[b'x'; 200]);

        let m = mapper();
        for round in 0..5 {
            write(dir.path(), &format!("new{}.md", round), &[b'y'; 77]);
            write(dir.path(), "a.md", &vec![b'x'; 100 * (round + 2)]);
            if round == 3 {
                std::fs::remove_file(dir.path().join("b.md")).unwrap();
            }
            let map = m.compute_map(dir.path()).unwrap();
            let sum: usize = map.entries.iter().map(|e| e.token_count).sum();
            assert_eq!(map.total_tokens, sum);
        }
    }

    #[test]
    fn test_render() {
        let map = ProjectMap::from_entries(vec![
            DocumentEntry {
                path: PathBuf::from("docs/big.md"),
                token_count: 15_000,
                status: DocumentStatus::TooLong,
            },
            DocumentEntry {
                path: PathBuf::from("docs/a.md"),
                token_count: 10,
                status: DocumentStatus::Ok,
            },
        ]);
        let text = map.render();
        assert!(text.starts_with("# Project Map"));
        assert!(text.contains("15010 tokens"));
        assert!(text.contains("| docs/big.md | 15000 | ❌ TOO_LONG |"));
        assert!(text.find("docs/a.md").unwrap() < text.find("docs/big.md").unwrap());
        assert_eq!(map.too_long().count(), 1);

        assert!(ProjectMap::empty().render().contains("_No documents._"));
    }
}
