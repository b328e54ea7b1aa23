use std::path::{Path, PathBuf};

use tracing::info;

use prefetch_core::{
    ArchiveKey, ContextRecord, DatasetSplit, PrefetchError, PrefetchResult, RetrievedPassage,
    Retriever,
};

use crate::archive::ArchiveMember;
use crate::fetch::ArchiveFetcher;
use crate::index::ArchiveOffsetIndex;
use crate::resolver::CacheKeyResolver;

/// Serves prefetched passages by seeking into the archive on every call.
///
/// Questions the archive does not cover yield an empty list, not an error.
/// The archive is reopened per lookup so no handle outlives a call.
#[derive(Debug)]
pub struct DiskRetriever {
    index: ArchiveOffsetIndex,
}

impl DiskRetriever {
    /// Resolve, fetch if needed, and index the archive for `key` and `split`.
    /// Every configuration problem surfaces here, before the first query.
    pub fn open(
        key: &ArchiveKey,
        split: DatasetSplit,
        resolver: &CacheKeyResolver,
        fetcher: &dyn ArchiveFetcher,
        checkpoint_dir: &Path,
    ) -> PrefetchResult<Self> {
        let resolved = resolver.resolve_split(key, split)?;
        let path = resolved.location.ensure_local(checkpoint_dir, fetcher)?;
        info!(
            "scanning prefetched documents in {} [{} split]",
            key.file_name(),
            split
        );
        Self::from_archive(path, resolved.member, &checkpoint_dir.join("spill"))
    }

    /// Index a local archive member directly. Deflated members are inflated
    /// once into `spill_dir`.
    pub fn from_archive(
        path: impl Into<PathBuf>,
        member: impl Into<String>,
        spill_dir: &Path,
    ) -> PrefetchResult<Self> {
        let index = ArchiveOffsetIndex::build(ArchiveMember::new(path, member), spill_dir)?;
        Ok(Self { index })
    }

    pub fn index(&self) -> &ArchiveOffsetIndex {
        &self.index
    }

    /// Exact stored line for `question`, without the newline.
    pub fn raw_record(&self, question: &str) -> PrefetchResult<Option<Vec<u8>>> {
        self.index.read_raw(question)
    }

    /// Every stored passage for `question`, in stored order.
    pub fn fetch_documents(&self, question: &str) -> PrefetchResult<Vec<RetrievedPassage>> {
        let Some(raw) = self.raw_record(question)? else {
            return Ok(Vec::new());
        };
        let record = ContextRecord::from_line(&raw).map_err(|e| PrefetchError::CorruptArchive {
            line: 0,
            reason: format!("record for \"{question}\" unreadable: {e}"),
        })?;
        if record.question != question {
            return Err(PrefetchError::CorruptArchive {
                line: 0,
                reason: format!(
                    "offset for \"{question}\" points at \"{}\"; archive changed since indexing",
                    record.question
                ),
            });
        }
        Ok(record.context)
    }
}

impl Retriever for DiskRetriever {
    fn retrieve(&self, question: &str, top_k: usize) -> PrefetchResult<Vec<RetrievedPassage>> {
        let mut passages = self.fetch_documents(question)?;
        passages.truncate(top_k);
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveWriter, MemberCompression};
    use crate::fetch::OfflineFetcher;
    use crate::registry::{ArchiveSource, MemberLayout, Registry};
    use prefetch_core::{FetchDepth, PassageId, RetrieverKind};

    fn passage(id: &str, rank: u32, score: f64, has_answer: bool) -> RetrievedPassage {
        RetrievedPassage::new(id, rank, format!("title {id}"), format!("text {id}"), score, has_answer)
    }

    fn scenario_archive(path: &Path, member: &str) {
        let mut w = ArchiveWriter::create(path, MemberCompression::Deflated).unwrap();
        w.start_member(member).unwrap();
        w.write_record(&ContextRecord::new(
            "what is x?",
            vec![passage("a", 1, 3.0, true), passage("b", 2, 1.0, false)],
        ))
        .unwrap();
        w.write_record(&ContextRecord::new(
            "who is y?",
            vec![passage("c", 1, 9.5, false)],
        ))
        .unwrap();
        w.write_record(&ContextRecord::new("where is z?", Vec::new()))
            .unwrap();
        w.finish().unwrap();
    }

    #[test]
    fn test_end_to_end_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TOY_bm25_2.zip");
        scenario_archive(&path, "data.jsonl");

        let retriever = DiskRetriever::from_archive(&path, "data.jsonl", dir.path()).unwrap();
        assert_eq!(retriever.index().len(), 3);

        let one = retriever.retrieve("what is x?", 1).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "a");

        let all = retriever.retrieve("what is x?", 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "b");
        assert_eq!(all[0].score, 3.0);
        assert!(all[0].has_answer);
    }

    #[test]
    fn test_truncation_is_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        let stored: Vec<RetrievedPassage> = (1..=6)
            .map(|r| passage(&format!("p{r}"), r, 10.0 - r as f64, r % 2 == 0))
            .collect();
        let mut w = ArchiveWriter::create(&path, MemberCompression::Stored).unwrap();
        w.start_member("data.jsonl").unwrap();
        w.write_record(&ContextRecord::new("q?", stored.clone())).unwrap();
        w.finish().unwrap();

        let retriever = DiskRetriever::from_archive(&path, "data.jsonl", dir.path()).unwrap();
        for k in 0..10 {
            let got = retriever.retrieve("q?", k).unwrap();
            assert_eq!(got.len(), k.min(stored.len()));
            assert_eq!(got[..], stored[..got.len()]);
        }
    }

    #[test]
    fn test_unseen_question_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        scenario_archive(&path, "data.jsonl");
        let retriever = DiskRetriever::from_archive(&path, "data.jsonl", dir.path()).unwrap();
        assert!(retriever.retrieve("never asked?", 5).unwrap().is_empty());
        assert!(retriever.retrieve("where is z?", 5).unwrap().is_empty());
    }

    #[test]
    fn test_batch_matches_single() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        scenario_archive(&path, "data.jsonl");
        let retriever = DiskRetriever::from_archive(&path, "data.jsonl", dir.path()).unwrap();

        let batch = retriever
            .retrieve_batch(&["who is y?", "missing?", "what is x?"], 1)
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0][0].id, "c");
        assert!(batch[1].is_empty());
        assert_eq!(batch[2][0].id, "a");
    }

    #[test]
    fn test_open_through_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.zip");
        scenario_archive(&path, "dev.jsonl");

        let resolver = CacheKeyResolver::new(
            Registry::empty()
                .with_archive("TOY_bm25_2.zip", ArchiveSource::Local(path.clone()))
                .with_dataset("TOY", MemberLayout::PerSplit(vec![DatasetSplit::Dev])),
        );
        let key = ArchiveKey::new("TOY", RetrieverKind::Bm25, FetchDepth::Fixed(2));

        let retriever =
            DiskRetriever::open(&key, DatasetSplit::Dev, &resolver, &OfflineFetcher, dir.path())
                .unwrap();
        assert_eq!(retriever.retrieve("what is x?", 2).unwrap().len(), 2);

        let err = DiskRetriever::open(&key, DatasetSplit::Train, &resolver, &OfflineFetcher, dir.path())
            .unwrap_err();
        assert!(matches!(err, PrefetchError::Configuration(_)));

        let unknown = ArchiveKey::new("TOY", RetrieverKind::Bm25, FetchDepth::Fixed(5));
        let err = DiskRetriever::open(&unknown, DatasetSplit::Dev, &resolver, &OfflineFetcher, dir.path())
            .unwrap_err();
        assert!(matches!(err, PrefetchError::Configuration(_)));
    }

    #[test]
    fn test_raw_record_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        scenario_archive(&path, "data.jsonl");
        let retriever = DiskRetriever::from_archive(&path, "data.jsonl", dir.path()).unwrap();
        let raw = retriever.raw_record("who is y?").unwrap().unwrap();
        let record = ContextRecord::from_line(&raw).unwrap();
        assert_eq!(record.to_line().unwrap().as_bytes(), &raw[..]);
    }

    #[test]
    fn test_numbered_passage_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EntityQuestions_spel_varying.zip");
        let line = r#"{"question":"who is ada?","context":[{"id":0,"rank":1,"title":"Ada Lovelace","text":"Ada was a mathematician.","score":"1.0","has_answer":true}]}"#;
        let mut w = ArchiveWriter::create(&path, MemberCompression::Deflated).unwrap();
        w.start_member("dev.jsonl").unwrap();
        w.write_line(line).unwrap();
        w.finish().unwrap();

        let retriever = DiskRetriever::from_archive(&path, "dev.jsonl", dir.path()).unwrap();
        let passages = retriever.retrieve("who is ada?", 4).unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id, PassageId::Number(0));
        assert!(passages[0].has_answer);
        assert_eq!(retriever.raw_record("who is ada?").unwrap().unwrap(), line.as_bytes());
    }
}
