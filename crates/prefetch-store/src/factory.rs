//! Selects and builds the retriever variant an experiment asks for.

use std::path::PathBuf;

use prefetch_core::{
    ArchiveKey, DatasetSplit, FetchDepth, MaterializedKey, PrefetchResult, QuestionSource,
    RetrievedPassage, Retriever, RetrieverKind,
};

use crate::disk::DiskRetriever;
use crate::fetch::ArchiveFetcher;
use crate::memory::MemoryRetriever;
use crate::resolver::CacheKeyResolver;

/// Settings that pick the archive and the retriever variant.
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    pub checkpoint_dir: PathBuf,
    pub dataset: String,
    pub split: DatasetSplit,
    /// `None` runs without retrieval.
    pub retriever: Option<RetrieverKind>,
    pub depth: FetchDepth,
    /// Build-time ceiling for the in-memory variant.
    pub top_k: usize,
    pub load_in_memory: bool,
}

impl RetrieverOptions {
    pub fn archive_key(&self) -> Option<ArchiveKey> {
        self.retriever
            .map(|kind| ArchiveKey::new(self.dataset.clone(), kind, self.depth))
    }

    pub fn materialized_key(&self) -> Option<MaterializedKey> {
        self.archive_key().map(|archive| MaterializedKey {
            archive,
            split: self.split,
            k_build: self.top_k,
        })
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.checkpoint_dir.join("cache")
    }
}

/// The closed set of prefetched retriever variants.
#[derive(Debug)]
pub enum PrefetchedRetriever {
    Disk(DiskRetriever),
    Memory(MemoryRetriever),
}

impl PrefetchedRetriever {
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Disk(_) => "disk",
            Self::Memory(_) => "memory",
        }
    }
}

impl Retriever for PrefetchedRetriever {
    fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>> {
        match self {
            Self::Disk(r) => r.retrieve(question, top_k),
            Self::Memory(r) => r.retrieve(question, top_k),
        }
    }

    fn retrieve_batch(
        &self,
        questions: &[&str],
        top_k: usize,
    ) -> PrefetchResult<Vec<Vec<RetrievedPassage>>> {
        match self {
            Self::Disk(r) => r.retrieve_batch(questions, top_k),
            Self::Memory(r) => r.retrieve_batch(questions, top_k),
        }
    }
}

/// Build the configured retriever, or `None` when retrieval is disabled.
///
/// The archive key and split are validated up front in both variants, so a
/// misconfigured run fails before any question is processed even when a
/// materialized cache already exists. `questions` is only walked when the
/// in-memory cache has to be built.
pub fn open_retriever(
    options: &RetrieverOptions,
    resolver: &CacheKeyResolver,
    fetcher: &dyn ArchiveFetcher,
    questions: &dyn QuestionSource,
) -> PrefetchResult<Option<PrefetchedRetriever>> {
    let Some(key) = options.archive_key() else {
        return Ok(None);
    };
    resolver.resolve_split(&key, options.split)?;

    if !options.load_in_memory {
        let disk = DiskRetriever::open(
            &key,
            options.split,
            resolver,
            fetcher,
            &options.checkpoint_dir,
        )?;
        return Ok(Some(PrefetchedRetriever::Disk(disk)));
    }

    let materialized = MaterializedKey {
        archive: key.clone(),
        split: options.split,
        k_build: options.top_k,
    };
    let memory = MemoryRetriever::open(&options.cache_dir(), materialized, questions, || {
        DiskRetriever::open(
            &key,
            options.split,
            resolver,
            fetcher,
            &options.checkpoint_dir,
        )
    })?;
    Ok(Some(PrefetchedRetriever::Memory(memory)))
}
