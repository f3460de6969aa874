//! Filesystem corpus scanner — the local stand-in for the fetcher boundary.
//!
//! Walks the configured corpus root and turns matching files into
//! [`Document`]s. Files are assumed to be already-normalized text (markup
//! stripped upstream); nothing here re-parses content. Results are sorted by
//! source URI so ingestion order — and therefore fragment insertion order in
//! the index — is deterministic.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Document;

/// Scan the corpus root into documents.
///
/// # Errors
///
/// [`Error::InvalidConfig`] if no corpus is configured or the root does not
/// exist; [`Error::Storage`] for filesystem failures during the walk.
pub fn scan_corpus(config: &Config) -> Result<Vec<Document>> {
    let corpus = config
        .corpus
        .as_ref()
        .ok_or_else(|| Error::InvalidConfig("no [corpus] section configured".to_string()))?;

    let root = &corpus.root;
    if !root.exists() {
        return Err(Error::InvalidConfig(format!(
            "corpus root does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut documents = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = entry.map_err(|e| Error::Storage(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        documents.push(file_to_document(path)?);
    }

    documents.sort_by(|a, b| a.source_uri.cmp(&b.source_uri));

    tracing::info!(
        root = %root.display(),
        documents = documents.len(),
        "corpus scan complete"
    );
    Ok(documents)
}

fn file_to_document(path: &Path) -> Result<Document> {
    let raw_text =
        std::fs::read_to_string(path).map_err(|e| Error::Storage(e.to_string()))?;

    let metadata = std::fs::metadata(path).map_err(|e| Error::Storage(e.to_string()))?;
    let fetched_at = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let source_uri = format!("file://{}", path.display());
    Ok(Document::new(source_uri, raw_text, fetched_at))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::InvalidConfig(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorpusConfig, IndexConfig};

    fn config_for(root: &Path) -> Config {
        Config {
            index: IndexConfig {
                path: root.join("index.sqlite"),
            },
            corpus: Some(CorpusConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            }),
            chunking: Default::default(),
            retrieval: Default::default(),
            context: Default::default(),
            embedding: Default::default(),
            generator: Default::default(),
            session: Default::default(),
        }
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.md"), "beta").unwrap();
        std::fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        std::fs::write(tmp.path().join("skip.rs"), "fn main() {}").unwrap();

        let docs = scan_corpus(&config_for(tmp.path())).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].source_uri.ends_with("a.md"));
        assert!(docs[1].source_uri.ends_with("b.md"));
        assert_eq!(docs[0].raw_text, "alpha");
    }

    #[test]
    fn test_missing_root_is_invalid_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = config_for(tmp.path());
        if let Some(corpus) = config.corpus.as_mut() {
            corpus.root = tmp.path().join("nope");
        }
        assert!(matches!(
            scan_corpus(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_no_corpus_section_is_invalid_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = config_for(tmp.path());
        config.corpus = None;
        assert!(matches!(
            scan_corpus(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
