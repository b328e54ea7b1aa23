//! Zip container access: locating a JSONL member, reading one line at a
//! decompressed byte offset, and writing fixture/packed archives.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use prefetch_core::{ContextRecord, PrefetchError, PrefetchResult};

// ---------------------------------------------------------------------------
// ArchiveMember
// ---------------------------------------------------------------------------

/// A named JSONL member inside a zip archive on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    path: PathBuf,
    name: String,
}

/// How to reach a decompressed offset inside a member.
///
/// Stored members are seeked directly in the archive. Deflated members have
/// no random access, so they are inflated once into a plain spill file while
/// being indexed and lookups seek there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLocator {
    Stored { data_start: u64, size: u64 },
    Spilled { path: PathBuf, size: u64 },
}

impl MemberLocator {
    pub fn size(&self) -> u64 {
        match self {
            Self::Stored { size, .. } | Self::Spilled { size, .. } => *size,
        }
    }
}

impl ArchiveMember {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn open_archive(&self) -> PrefetchResult<ZipArchive<File>> {
        let file = File::open(&self.path)?;
        ZipArchive::new(file).map_err(|e| self.zip_error(e))
    }

    /// Open the member and hand a buffered reader over its decompressed
    /// bytes to `f`.
    pub fn with_reader<T>(
        &self,
        f: impl FnOnce(&mut dyn BufRead) -> PrefetchResult<T>,
    ) -> PrefetchResult<T> {
        let mut archive = self.open_archive()?;
        let member = archive.by_name(&self.name).map_err(|e| self.zip_error(e))?;
        let result = f(&mut BufReader::new(member));
        result
    }

    /// Stream the member through `f` and report where its lines can be read
    /// back afterwards.
    ///
    /// A deflated member is copied to `spill_dir` as it streams, so the
    /// member is inflated exactly once. The spill file is replaced by rename
    /// and never left half written.
    pub fn scan<T>(
        &self,
        spill_dir: &Path,
        f: impl FnOnce(&mut dyn BufRead) -> PrefetchResult<T>,
    ) -> PrefetchResult<(MemberLocator, T)> {
        let mut archive = self.open_archive()?;
        let mut member = archive.by_name(&self.name).map_err(|e| self.zip_error(e))?;
        let size = member.size();

        if member.compression() == CompressionMethod::Stored {
            let locator = MemberLocator::Stored {
                data_start: member.data_start(),
                size,
            };
            let out = f(&mut BufReader::new(member))?;
            return Ok((locator, out));
        }

        fs::create_dir_all(spill_dir)?;
        let path = spill_dir.join(self.spill_name());
        let part = spill_dir.join(format!("{}.part.{}", self.spill_name(), std::process::id()));
        let spilled = spill_through(&mut member, &part, f).and_then(|out| {
            fs::rename(&part, &path)?;
            Ok(out)
        });
        match spilled {
            Ok(out) => {
                debug!("inflated {} ({size} bytes) to {}", self.name, path.display());
                Ok((MemberLocator::Spilled { path, size }, out))
            }
            Err(e) => {
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }

    /// Read the line starting at `offset`, without its line terminator.
    pub fn read_line_at(&self, locator: &MemberLocator, offset: u64) -> PrefetchResult<Vec<u8>> {
        let (file_path, start, size) = match locator {
            MemberLocator::Stored { data_start, size } => (self.path.as_path(), *data_start, *size),
            MemberLocator::Spilled { path, size } => (path.as_path(), 0, *size),
        };
        if offset >= size {
            return Err(PrefetchError::CorruptArchive {
                line: 0,
                reason: format!("offset {offset} past end of {} ({size} bytes)", self.name),
            });
        }

        let mut file = File::open(file_path)?;
        file.seek(SeekFrom::Start(start + offset))?;
        let mut line = Vec::new();
        BufReader::new(file.take(size - offset)).read_until(b'\n', &mut line)?;
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(line)
    }

    /// `{archive file}.{member}` with path separators flattened.
    fn spill_name(&self) -> String {
        let archive = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let member = self.name.replace(|c: char| c == '/' || c == '\\', "_");
        format!("{archive}.{member}")
    }

    fn zip_error(&self, e: ZipError) -> PrefetchError {
        match e {
            ZipError::FileNotFound => PrefetchError::Configuration(format!(
                "archive {} has no member {}",
                self.path.display(),
                self.name
            )),
            ZipError::Io(e) => PrefetchError::Io(e),
            other => PrefetchError::Archive(format!("{}: {other}", self.path.display())),
        }
    }
}

/// Copies everything read from `inner` into `copy`.
struct Tee<R, W> {
    inner: R,
    copy: W,
}

impl<R: Read, W: Write> Read for Tee<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.copy.write_all(&buf[..n])?;
        Ok(n)
    }
}

fn spill_through<T>(
    member: &mut dyn Read,
    part: &Path,
    f: impl FnOnce(&mut dyn BufRead) -> PrefetchResult<T>,
) -> PrefetchResult<T> {
    let mut tee = Tee {
        inner: member,
        copy: BufWriter::new(File::create(part)?),
    };
    let mut reader = BufReader::new(&mut tee);
    let out = f(&mut reader)?;
    // Whatever `f` left unread still belongs in the spill.
    io::copy(&mut reader, &mut io::sink())?;
    drop(reader);
    tee.copy.flush()?;
    Ok(out)
}

/// Member names present in an archive, in container order.
pub fn member_names(path: &Path) -> PrefetchResult<Vec<String>> {
    let file = File::open(path)?;
    let archive = ZipArchive::new(file)
        .map_err(|e| PrefetchError::Archive(format!("{}: {e}", path.display())))?;
    Ok(archive.file_names().map(str::to_string).collect())
}

// ---------------------------------------------------------------------------
// ArchiveWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemberCompression {
    Stored,
    #[default]
    Deflated,
}

impl MemberCompression {
    fn method(self) -> CompressionMethod {
        match self {
            Self::Stored => CompressionMethod::Stored,
            Self::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Writes context records as JSONL members of a new zip archive.
pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    options: FileOptions,
    lines: usize,
}

impl ArchiveWriter {
    pub fn create(path: &Path, compression: MemberCompression) -> PrefetchResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            zip: ZipWriter::new(file),
            options: FileOptions::default()
                .compression_method(compression.method())
                .large_file(true),
            lines: 0,
        })
    }

    /// Begin a new member; subsequent writes go to it.
    pub fn start_member(&mut self, name: &str) -> PrefetchResult<()> {
        self.zip
            .start_file(name, self.options)
            .map_err(|e| PrefetchError::Archive(e.to_string()))
    }

    pub fn write_record(&mut self, record: &ContextRecord) -> PrefetchResult<()> {
        record.validate_ranks().map_err(|e| match e {
            PrefetchError::CorruptArchive { reason, .. } => PrefetchError::Usage(reason),
            other => other,
        })?;
        let line = record.to_line()?;
        self.write_line(&line)
    }

    /// Append one line verbatim. The caller guarantees it holds no newline.
    pub fn write_line(&mut self, line: &str) -> PrefetchResult<()> {
        self.zip.write_all(line.as_bytes())?;
        self.zip.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Copy a JSONL stream into the current member, skipping blank lines.
    pub fn copy_lines(&mut self, reader: impl BufRead) -> PrefetchResult<usize> {
        let mut copied = 0;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            self.write_line(line)?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Finish the archive and return the number of lines written.
    pub fn finish(mut self) -> PrefetchResult<usize> {
        self.zip
            .finish()
            .map_err(|e| PrefetchError::Archive(e.to_string()))?;
        Ok(self.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefetch_core::RetrievedPassage;

    fn sample(question: &str) -> ContextRecord {
        ContextRecord::new(
            question,
            vec![
                RetrievedPassage::new("a", 1, "A", "alpha", 2.0, true),
                RetrievedPassage::new("b", 2, "B", "beta", 1.0, false),
            ],
        )
    }

    fn write_archive(path: &Path, compression: MemberCompression) -> Vec<String> {
        let mut w = ArchiveWriter::create(path, compression).unwrap();
        w.start_member("data.jsonl").unwrap();
        let mut lines = Vec::new();
        for q in ["first?", "second?", "third?"] {
            let rec = sample(q);
            lines.push(rec.to_line().unwrap());
            w.write_record(&rec).unwrap();
        }
        assert_eq!(w.finish().unwrap(), 3);
        lines
    }

    fn offsets(lines: &[String]) -> Vec<u64> {
        let mut out = Vec::new();
        let mut pos = 0u64;
        for l in lines {
            out.push(pos);
            pos += l.len() as u64 + 1;
        }
        out
    }

    #[test]
    fn test_read_line_at_both_compressions() {
        let dir = tempfile::tempdir().unwrap();
        let spill = dir.path().join("spill");
        for compression in [MemberCompression::Stored, MemberCompression::Deflated] {
            let path = dir.path().join(format!("{compression:?}.zip"));
            let lines = write_archive(&path, compression);
            let member = ArchiveMember::new(&path, "data.jsonl");
            let (locator, _) = member.scan(&spill, |_| Ok(())).unwrap();
            match compression {
                MemberCompression::Stored => {
                    assert!(matches!(locator, MemberLocator::Stored { .. }))
                }
                MemberCompression::Deflated => {
                    assert!(matches!(locator, MemberLocator::Spilled { .. }))
                }
            }
            for (line, off) in lines.iter().zip(offsets(&lines)) {
                let got = member.read_line_at(&locator, off).unwrap();
                assert_eq!(got, line.as_bytes());
            }
        }
        // Only the deflated member needed a spill.
        assert_eq!(fs::read_dir(&spill).unwrap().count(), 1);
    }

    #[test]
    fn test_deflated_lookup_never_reinflates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        let lines = write_archive(&path, MemberCompression::Deflated);
        let member = ArchiveMember::new(&path, "data.jsonl");
        let (locator, first) = member
            .scan(dir.path(), |reader| {
                let mut first = String::new();
                reader.read_line(&mut first)?;
                Ok(first)
            })
            .unwrap();
        assert_eq!(first.trim_end(), lines[0]);

        // With the archive gone, lookups can only be served from the spill.
        fs::write(&path, b"no longer a zip").unwrap();
        let last = offsets(&lines)[2];
        assert_eq!(member.read_line_at(&locator, last).unwrap(), lines[2].as_bytes());
        match &locator {
            MemberLocator::Spilled { path, size } => {
                assert_eq!(fs::metadata(path).unwrap().len(), *size)
            }
            other => panic!("unexpected locator: {other:?}"),
        }
    }

    #[test]
    fn test_failed_scan_leaves_no_spill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_archive(&path, MemberCompression::Deflated);
        let spill = dir.path().join("spill");
        let member = ArchiveMember::new(&path, "data.jsonl");
        let err = member
            .scan(&spill, |_| -> PrefetchResult<()> {
                Err(PrefetchError::CorruptArchive {
                    line: 1,
                    reason: "bad".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, PrefetchError::CorruptArchive { line: 1, .. }));
        assert_eq!(fs::read_dir(&spill).unwrap().count(), 0);
    }

    #[test]
    fn test_offset_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_archive(&path, MemberCompression::Deflated);
        let member = ArchiveMember::new(&path, "data.jsonl");
        let (locator, _) = member.scan(dir.path(), |_| Ok(())).unwrap();
        let err = member.read_line_at(&locator, 1 << 30).unwrap_err();
        assert!(matches!(err, PrefetchError::CorruptArchive { .. }));
    }

    #[test]
    fn test_missing_member_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_archive(&path, MemberCompression::Deflated);
        let member = ArchiveMember::new(&path, "dev.jsonl");
        let err = member.with_reader(|_| Ok(())).unwrap_err();
        assert!(matches!(err, PrefetchError::Configuration(_)));
        assert_eq!(member_names(&path).unwrap(), vec!["data.jsonl".to_string()]);
    }

    #[test]
    fn test_write_record_rejects_bad_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ArchiveWriter::create(&dir.path().join("a.zip"), MemberCompression::Stored)
            .unwrap();
        w.start_member("data.jsonl").unwrap();
        let rec = ContextRecord::new(
            "q?",
            vec![RetrievedPassage::new("a", 2, "", "", 1.0, false)],
        );
        assert!(matches!(w.write_record(&rec), Err(PrefetchError::Usage(_))));
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();
        let err = ArchiveMember::new(&path, "data.jsonl").open_archive().unwrap_err();
        assert!(matches!(err, PrefetchError::Archive(_)));
    }

    #[test]
    fn test_copy_lines_skips_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packed.zip");
        let input = "{\"question\":\"q?\",\"context\":[]}\n\n  \n{\"question\":\"r?\",\"context\":[]}\n";
        let mut w = ArchiveWriter::create(&path, MemberCompression::Deflated).unwrap();
        w.start_member("train.jsonl").unwrap();
        assert_eq!(w.copy_lines(input.as_bytes()).unwrap(), 2);
        assert_eq!(w.finish().unwrap(), 2);
    }
}
