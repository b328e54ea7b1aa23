use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use prefetch_core::{
    MaterializedKey, PrefetchError, PrefetchResult, QuestionSource, RetrievedPassage, Retriever,
};

const FORMAT_VERSION: u32 = 2;

/// How a [`MemoryRetriever`] got its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    Loaded,
    Drained,
}

#[derive(Serialize, Deserialize)]
struct MaterializedCache {
    format_version: u32,
    key: String,
    k_build: usize,
    created_at: DateTime<Utc>,
    entries: HashMap<String, Vec<RetrievedPassage>>,
}

/// Holds every question of one dataset split in memory.
///
/// Built once by draining a backing retriever at `k_build` passages per
/// question, then persisted so later runs load the file instead. Because the
/// mapping covers the whole split, an unknown question means the file is
/// stale and is reported as an error.
#[derive(Debug)]
pub struct MemoryRetriever {
    key: MaterializedKey,
    entries: HashMap<String, Vec<RetrievedPassage>>,
    created_at: DateTime<Utc>,
    origin: CacheOrigin,
}

impl MemoryRetriever {
    pub fn cache_path(cache_dir: &Path, key: &MaterializedKey) -> PathBuf {
        cache_dir.join(key.file_name())
    }

    /// Load the cache file for `key`, or drain `questions` through the
    /// retriever produced by `backing` and write the file.
    ///
    /// Neither `questions` nor `backing` is touched when the file exists.
    pub fn open<R, F>(
        cache_dir: &Path,
        key: MaterializedKey,
        questions: &dyn QuestionSource,
        backing: F,
    ) -> PrefetchResult<Self>
    where
        R: Retriever,
        F: FnOnce() -> PrefetchResult<R>,
    {
        let path = Self::cache_path(cache_dir, &key);
        if path.exists() {
            return Self::load(&path, key);
        }

        info!("creating in-memory prefetch cache {}", path.display());
        let retriever = backing()?;
        let entries = drain(questions, &retriever, key.k_build)?;
        let this = Self {
            key,
            entries,
            created_at: Utc::now(),
            origin: CacheOrigin::Drained,
        };
        fs::create_dir_all(cache_dir)?;
        this.save(&path)?;
        Ok(this)
    }

    /// Read a cache file, checking it was built for `key`.
    pub fn load(path: &Path, key: MaterializedKey) -> PrefetchResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let cache: MaterializedCache = bincode::deserialize_from(reader)
            .map_err(|e| PrefetchError::Cache(format!("{}: {e}", path.display())))?;

        if cache.format_version != FORMAT_VERSION {
            return Err(PrefetchError::Cache(format!(
                "{}: format version {} (expected {FORMAT_VERSION}); delete it to rebuild",
                path.display(),
                cache.format_version
            )));
        }
        if cache.key != key.to_string() || cache.k_build != key.k_build {
            return Err(PrefetchError::Cache(format!(
                "{} was built for {} (k={}), not {key}",
                path.display(),
                cache.key,
                cache.k_build
            )));
        }

        info!(
            "loaded {} cached questions from {}",
            cache.entries.len(),
            path.display()
        );
        Ok(Self {
            key,
            entries: cache.entries,
            created_at: cache.created_at,
            origin: CacheOrigin::Loaded,
        })
    }

    /// Write to a sibling temp file and rename over `path`.
    fn save(&self, path: &Path) -> PrefetchResult<()> {
        let cache = MaterializedCache {
            format_version: FORMAT_VERSION,
            key: self.key.to_string(),
            k_build: self.key.k_build,
            created_at: self.created_at,
            entries: self.entries.clone(),
        };
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        if let Err(e) = write_cache(&tmp, &cache).and_then(|()| Ok(fs::rename(&tmp, path)?)) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        info!(
            "wrote {} questions to {}",
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    pub fn key(&self) -> &MaterializedKey {
        &self.key
    }

    pub fn k_build(&self) -> usize {
        self.key.k_build
    }

    pub fn origin(&self) -> CacheOrigin {
        self.origin
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fetch(&self, question: &str) -> PrefetchResult<&[RetrievedPassage]> {
        self.entries
            .get(question)
            .map(Vec::as_slice)
            .ok_or_else(|| PrefetchError::StaleCache(question.to_string()))
    }

    fn check_top_k(&self, top_k: usize) -> PrefetchResult<()> {
        if top_k > self.key.k_build {
            return Err(PrefetchError::Usage(format!(
                "top-k {top_k} exceeds the cache ceiling {}",
                self.key.k_build
            )));
        }
        Ok(())
    }
}

impl Retriever for MemoryRetriever {
    fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>> {
        self.check_top_k(top_k)?;
        let stored = self.fetch(question)?;
        Ok(stored[..top_k.min(stored.len())].to_vec())
    }

    fn retrieve_batch(
        &self,
        questions: &[&str],
        top_k: usize,
    ) -> PrefetchResult<Vec<Vec<RetrievedPassage>>> {
        self.check_top_k(top_k)?;
        questions.iter().map(|q| self.retrieve(q, top_k)).collect()
    }
}

fn write_cache(path: &Path, cache: &MaterializedCache) -> PrefetchResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, cache)
        .map_err(|e| PrefetchError::Cache(format!("{}: {e}", path.display())))?;
    writer.flush()?;
    Ok(())
}

/// Query every question of the split once at `k_build`.
fn drain<R: Retriever>(
    questions: &dyn QuestionSource,
    retriever: &R,
    k_build: usize,
) -> PrefetchResult<HashMap<String, Vec<RetrievedPassage>>> {
    let mut entries = HashMap::new();
    let mut seen = 0usize;
    for record in questions.questions()? {
        let record = record?;
        let passages = retriever.retrieve(&record.question, k_build)?;
        entries.insert(record.question, passages);
        seen += 1;
        if seen % 10_000 == 0 {
            info!("drained {seen} questions");
        }
    }
    info!("drained {seen} questions ({} unique)", entries.len());
    Ok(entries)
}
