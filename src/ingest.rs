//! `cqa ingest`: files and directories into the index.
//!
//! Directories are walked with `walkdir` and filtered by
//! `ingest.include_globs` / `ingest.exclude_globs` (matched against the path
//! relative to the directory, which also becomes the document id). Files
//! named explicitly are ingested regardless of the globs, under their file
//! name. Documents are processed concurrently, up to `ingest.concurrency` at
//! a time; a failure is reported per document and does not stop the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use context_qa_core::ingest::{IngestReport, Ingestor};
use context_qa_core::models::DocumentKind;
use context_qa_core::Error;

use crate::app::{App, IndexLoad};
use crate::config::{Config, IngestConfig};
use crate::extract::{detect_kind, extract_file, extract_text};

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub document_id: String,
}

/// Options given on the command line.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Document id override; only valid for a single file.
    pub id: Option<String>,
    /// Kind override; otherwise inferred from each file's extension.
    pub kind: Option<DocumentKind>,
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub ingested: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub chunks: usize,
}

pub async fn run_ingest(config: &Config, paths: &[PathBuf], options: IngestOptions) -> Result<()> {
    let mut files = collect_files(paths, &config.ingest)?;
    if let Some(id) = &options.id {
        if files.len() != 1 || paths.len() != 1 || paths[0].is_dir() {
            bail!("--id can only be used with a single file");
        }
        files[0].document_id = id.clone();
    }
    if files.is_empty() {
        println!("No matching files found.");
        return Ok(());
    }

    let app = App::open(config, IndexLoad::Restore).await?;
    let summary = ingest_files(
        app.ingestor.clone(),
        files,
        options.kind,
        options.force,
        config.ingest.concurrency,
        config.ingest.max_file_bytes,
    )
    .await;
    app.close().await;

    println!("ingest");
    println!("  ingested: {}", summary.ingested);
    println!("  unchanged: {}", summary.unchanged);
    println!("  failed: {}", summary.failed);
    println!("  chunks written: {}", summary.chunks);
    if summary.failed > 0 {
        bail!("{} document(s) failed to ingest", summary.failed);
    }
    println!("ok");
    Ok(())
}

/// Ingest `files` concurrently, printing one line per document.
pub async fn ingest_files(
    ingestor: Arc<Ingestor>,
    files: Vec<SourceFile>,
    kind: Option<DocumentKind>,
    force: bool,
    concurrency: usize,
    max_file_bytes: u64,
) -> IngestSummary {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for file in files {
        let ingestor = ingestor.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = ingest_file(&ingestor, &file, kind, force, max_file_bytes).await;
            (file, result)
        });
    }

    let mut summary = IngestSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let (file, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "ingest task failed");
                summary.failed += 1;
                continue;
            }
        };
        match result {
            Ok(report) if report.skipped => {
                summary.unchanged += 1;
                println!("  unchanged {}", report.document_id);
            }
            Ok(report) => {
                summary.ingested += 1;
                summary.chunks += report.chunks;
                let verb = if report.replaced { "replaced" } else { "ingested" };
                println!("  {} {} ({} chunks)", verb, report.document_id, report.chunks);
            }
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(path = %file.path.display(), error = %e, "ingest failed");
                println!("  failed {}: {}", file.document_id, e);
            }
        }
    }
    summary
}

async fn ingest_file(
    ingestor: &Ingestor,
    file: &SourceFile,
    kind: Option<DocumentKind>,
    force: bool,
    max_file_bytes: u64,
) -> context_qa_core::Result<IngestReport> {
    let extraction_error = |source| Error::Extraction {
        document_id: file.document_id.clone(),
        source,
    };
    let kind = match kind {
        Some(kind) => kind,
        None => detect_kind(&file.path).map_err(extraction_error)?,
    };

    let path = file.path.clone();
    let text = tokio::task::spawn_blocking(move || extract_file(&path, kind, max_file_bytes))
        .await
        .map_err(Error::storage)?
        .map_err(extraction_error)?;

    ingestor
        .ingest_text(&file.document_id, kind, &text, force)
        .await
}

/// Extract `bytes` of `kind` and ingest them as `document_id`.
pub async fn ingest_bytes(
    ingestor: &Ingestor,
    document_id: &str,
    kind: DocumentKind,
    bytes: Vec<u8>,
    force: bool,
) -> context_qa_core::Result<IngestReport> {
    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, kind))
        .await
        .map_err(Error::storage)?
        .map_err(|source| Error::Extraction {
            document_id: document_id.to_string(),
            source,
        })?;
    ingestor.ingest_text(document_id, kind, &text, force).await
}

/// Expand `paths` into the files to ingest, sorted by document id.
pub fn collect_files(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<SourceFile>> {
    let include_set = build_globset(&config.include_globs)?;
    let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            files.push(SourceFile {
                path: root.clone(),
                document_id: file_name(root),
            });
            continue;
        }
        if !root.is_dir() {
            bail!("Path does not exist: {}", root.display());
        }

        for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            files.push(SourceFile {
                path: path.to_path_buf(),
                document_id: rel_str,
            });
        }
    }

    files.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    files.dedup_by(|a, b| a.document_id == b.document_id);
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use context_qa_core::chunk::ChunkParams;
    use context_qa_core::embedding::HashEmbedder;
    use context_qa_core::index::VectorIndex;
    use context_qa_core::store::memory::InMemoryStore;

    fn ids(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.document_id.as_str()).collect()
    }

    fn ingestor() -> Arc<Ingestor> {
        Arc::new(Ingestor::new(
            ChunkParams::new(200, 20).unwrap(),
            Arc::new(HashEmbedder::new(64).unwrap()),
            Arc::new(VectorIndex::new()),
            Arc::new(InMemoryStore::new()),
        ))
    }

    #[test]
    fn test_collect_files_applies_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cvs/old")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("cvs/alice.txt"), "a").unwrap();
        std::fs::write(dir.path().join("cvs/old/bob.md"), "b").unwrap();
        std::fs::write(dir.path().join("cvs/photo.png"), "c").unwrap();
        std::fs::write(dir.path().join(".git/config.txt"), "d").unwrap();

        let files = collect_files(&[dir.path().to_path_buf()], &IngestConfig::default()).unwrap();
        assert_eq!(ids(&files), vec!["cvs/alice.txt", "cvs/old/bob.md"]);

        let config = IngestConfig {
            exclude_globs: vec!["**/old/**".to_string()],
            ..IngestConfig::default()
        };
        let files = collect_files(&[dir.path().to_path_buf()], &config).unwrap();
        assert_eq!(ids(&files), vec!["cvs/alice.txt"]);
    }

    #[test]
    fn test_explicit_file_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.csv");
        std::fs::write(&path, "x").unwrap();
        let files = collect_files(&[path], &IngestConfig::default()).unwrap();
        assert_eq!(ids(&files), vec!["notes.csv"]);
    }

    #[test]
    fn test_missing_path_errors() {
        let missing = PathBuf::from("/definitely/not/here");
        assert!(collect_files(&[missing], &IngestConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_ingest_files_reports_failures_per_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.txt"), "Rust engineer with SQLite experience.").unwrap();
        std::fs::write(dir.path().join("blank.txt"), "   \n").unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b").unwrap();
        let files = vec![
            SourceFile {
                path: dir.path().join("good.txt"),
                document_id: "good.txt".to_string(),
            },
            SourceFile {
                path: dir.path().join("blank.txt"),
                document_id: "blank.txt".to_string(),
            },
            SourceFile {
                path: dir.path().join("data.csv"),
                document_id: "data.csv".to_string(),
            },
        ];

        let ingestor = ingestor();
        let summary = ingest_files(ingestor.clone(), files.clone(), None, false, 2, 1024).await;
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.failed, 2);
        assert!(ingestor.index().contains("good.txt"));

        let again = ingest_files(ingestor, files[..1].to_vec(), None, false, 2, 1024).await;
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn test_ingest_bytes_maps_extraction_errors() {
        let ingestor = ingestor();
        let err = ingest_bytes(&ingestor, "cv.pdf", DocumentKind::Pdf, b"junk".to_vec(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction { ref document_id, .. } if document_id == "cv.pdf"));

        let report = ingest_bytes(
            &ingestor,
            "cv.txt",
            DocumentKind::Txt,
            b"Ten years of backend work.".to_vec(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(report.chunks, 1);
    }
}
