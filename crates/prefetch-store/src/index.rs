use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::{debug, info};

use prefetch_core::{PrefetchError, PrefetchResult};

use crate::archive::{ArchiveMember, MemberLocator};

/// Counters gathered during one index scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Non-blank lines indexed.
    pub lines: usize,
    pub blank_lines: usize,
    /// Lines whose question had already been seen; the later offset wins.
    pub duplicates: usize,
    /// Decompressed bytes scanned.
    pub bytes: u64,
}

// Only the question is needed to index a line; the context must be present
// but is skipped without being materialized.
#[derive(Deserialize)]
struct IndexedLine<'a> {
    #[serde(borrow)]
    question: Cow<'a, str>,
    #[allow(dead_code)]
    context: IgnoredAny,
}

/// Question -> byte offset of its line within one archive member.
///
/// Built by a single sequential scan and never updated afterwards; a
/// changed archive needs a fresh build.
#[derive(Debug, Clone)]
pub struct ArchiveOffsetIndex {
    member: ArchiveMember,
    locator: MemberLocator,
    offsets: HashMap<String, u64>,
    stats: IndexStats,
}

impl ArchiveOffsetIndex {
    /// Index `member`. A deflated member is inflated once into `spill_dir`
    /// so later lookups seek instead of decompressing.
    pub fn build(member: ArchiveMember, spill_dir: &Path) -> PrefetchResult<Self> {
        info!(
            "indexing {} in {}",
            member.name(),
            member.path().display()
        );
        let (locator, (offsets, stats)) = member.scan(spill_dir, |reader| Self::scan(reader))?;
        info!(
            "indexed {} questions from {} lines ({} duplicates, {} blank)",
            offsets.len(),
            stats.lines,
            stats.duplicates,
            stats.blank_lines
        );
        Ok(Self {
            member,
            locator,
            offsets,
            stats,
        })
    }

    /// Scan a JSONL stream, recording where each line starts.
    ///
    /// Any malformed non-blank line aborts the whole scan.
    pub fn scan<R: BufRead + ?Sized>(
        reader: &mut R,
    ) -> PrefetchResult<(HashMap<String, u64>, IndexStats)> {
        let mut offsets = HashMap::new();
        let mut stats = IndexStats::default();
        let mut buf = Vec::new();
        let mut offset = 0u64;
        let mut line_no = 0usize;

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let start = offset;
            offset += read as u64;

            if buf.iter().all(u8::is_ascii_whitespace) {
                stats.blank_lines += 1;
                continue;
            }

            let line: IndexedLine =
                serde_json::from_slice(&buf).map_err(|e| PrefetchError::CorruptArchive {
                    line: line_no,
                    reason: e.to_string(),
                })?;
            stats.lines += 1;
            if let Some(previous) = offsets.insert(line.question.into_owned(), start) {
                stats.duplicates += 1;
                debug!("duplicate question at line {line_no}, replacing offset {previous}");
            }
        }

        stats.bytes = offset;
        Ok((offsets, stats))
    }

    pub fn offset(&self, question: &str) -> Option<u64> {
        self.offsets.get(question).copied()
    }

    pub fn contains(&self, question: &str) -> bool {
        self.offsets.contains_key(question)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.offsets.keys().map(String::as_str)
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn member(&self) -> &ArchiveMember {
        &self.member
    }

    /// Raw bytes of the question's line, or `None` for an unseen question.
    pub fn read_raw(&self, question: &str) -> PrefetchResult<Option<Vec<u8>>> {
        match self.offset(question) {
            Some(offset) => Ok(Some(self.member.read_line_at(&self.locator, offset)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveWriter, MemberCompression};

    fn line(q: &str) -> String {
        format!(
            r#"{{"question":{},"context":[{{"id":"1","rank":1,"title":"t","text":"x","score":"1.0","has_answer":false}}]}}"#,
            serde_json::to_string(q).unwrap()
        )
    }

    fn write_member(path: &Path, lines: &[String], compression: MemberCompression) {
        let mut w = ArchiveWriter::create(path, compression).unwrap();
        w.start_member("data.jsonl").unwrap();
        for l in lines {
            w.write_line(l).unwrap();
        }
        w.finish().unwrap();
    }

    #[test]
    fn test_scan_offsets() {
        let text = format!("{}\n{}\n{}\n", line("a?"), line("b?"), line("c?"));
        let (offsets, stats) = ArchiveOffsetIndex::scan(&mut text.as_bytes()).unwrap();
        assert_eq!(offsets.len(), 3);
        assert_eq!(offsets["a?"], 0);
        assert_eq!(offsets["b?"], line("a?").len() as u64 + 1);
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.bytes, text.len() as u64);
    }

    #[test]
    fn test_scan_without_trailing_newline() {
        let text = format!("{}\n{}", line("a?"), line("b?"));
        let (offsets, _) = ArchiveOffsetIndex::scan(&mut text.as_bytes()).unwrap();
        assert_eq!(offsets.len(), 2);
    }

    #[test]
    fn test_duplicate_keeps_last_offset() {
        let lines: Vec<String> = ["q1?", "q2?", "dup?", "q4?", "q5?", "q6?", "dup?"]
            .iter()
            .map(|q| line(q))
            .collect();
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let (offsets, stats) = ArchiveOffsetIndex::scan(&mut text.as_bytes()).unwrap();

        let seventh: u64 = lines[..6].iter().map(|l| l.len() as u64 + 1).sum();
        assert_eq!(offsets["dup?"], seventh);
        assert_eq!(offsets.len(), 6);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        let text = format!("{}\n{{\"question\": \"broken\n{}\n", line("a?"), line("c?"));
        let err = ArchiveOffsetIndex::scan(&mut text.as_bytes()).unwrap_err();
        match err {
            PrefetchError::CorruptArchive { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_context_is_fatal() {
        let text = "{\"question\":\"a?\"}\n";
        assert!(matches!(
            ArchiveOffsetIndex::scan(&mut text.as_bytes()),
            Err(PrefetchError::CorruptArchive { line: 1, .. })
        ));
    }

    #[test]
    fn test_blank_lines_counted_but_skipped() {
        let text = format!("{}\n\n{}\n", line("a?"), line("b?"));
        let (offsets, stats) = ArchiveOffsetIndex::scan(&mut text.as_bytes()).unwrap();
        assert_eq!(stats.blank_lines, 1);
        assert_eq!(offsets["b?"], line("a?").len() as u64 + 2);
    }

    #[test]
    fn test_empty_member() {
        let (offsets, stats) = ArchiveOffsetIndex::scan(&mut "".as_bytes()).unwrap();
        assert!(offsets.is_empty());
        assert_eq!(stats, IndexStats::default());
    }

    #[test]
    fn test_build_reproduces_lines_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..50)
            .map(|i| line(&format!("question number {i} with \\\"quotes\\\" ünïcode?")))
            .collect();
        for compression in [MemberCompression::Stored, MemberCompression::Deflated] {
            let path = dir.path().join(format!("{compression:?}.zip"));
            write_member(&path, &lines, compression);
            let index =
                ArchiveOffsetIndex::build(ArchiveMember::new(&path, "data.jsonl"), dir.path())
                    .unwrap();
            assert_eq!(index.len(), lines.len());
            for (i, l) in lines.iter().enumerate() {
                let q = format!("question number {i} with \\\"quotes\\\" ünïcode?");
                let raw = index.read_raw(&q).unwrap().unwrap();
                assert_eq!(raw, l.as_bytes());
            }
            assert!(index.read_raw("never asked?").unwrap().is_none());
        }
    }
}
