use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PrefetchError;

// ---------------------------------------------------------------------------
// DatasetSplit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSplit {
    Train,
    Dev,
    Test,
}

impl DatasetSplit {
    pub const ALL: [DatasetSplit; 3] = [Self::Train, Self::Dev, Self::Test];

    /// Member file holding this split in per-split archives.
    pub fn member_name(self) -> &'static str {
        match self {
            Self::Train => "train.jsonl",
            Self::Dev => "dev.jsonl",
            Self::Test => "test.jsonl",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Dev => write!(f, "dev"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for DatasetSplit {
    type Err = PrefetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "dev" | "val" | "validation" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            _ => Err(PrefetchError::Configuration(format!("invalid split: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// RetrieverKind
// ---------------------------------------------------------------------------

/// Upstream retriever that produced an archive.
///
/// `Spel` and `Oracle` archives hold the lead passages of the salient
/// entities in each question, so their per-question result count varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverKind {
    Bm25,
    Dpr,
    Ance,
    Dkrr,
    Spel,
    Oracle,
}

impl RetrieverKind {
    pub fn is_entity_based(self) -> bool {
        matches!(self, Self::Spel | Self::Oracle)
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bm25 => write!(f, "bm25"),
            Self::Dpr => write!(f, "dpr"),
            Self::Ance => write!(f, "ance"),
            Self::Dkrr => write!(f, "dkrr"),
            Self::Spel => write!(f, "spel"),
            Self::Oracle => write!(f, "oracle"),
        }
    }
}

impl std::str::FromStr for RetrieverKind {
    type Err = PrefetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bm25" => Ok(Self::Bm25),
            "dpr" => Ok(Self::Dpr),
            "ance" => Ok(Self::Ance),
            "dkrr" => Ok(Self::Dkrr),
            "spel" => Ok(Self::Spel),
            "oracle" => Ok(Self::Oracle),
            _ => Err(PrefetchError::Configuration(format!(
                "invalid retriever type: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FetchDepth
// ---------------------------------------------------------------------------

/// Passages stored per question when the archive was built.
///
/// `Varying` archives carry however many passages the question's entities
/// produced: possibly none, possibly more than any requested top-k.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchDepth {
    Fixed(usize),
    Varying,
}

impl fmt::Display for FetchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(k) => write!(f, "{k}"),
            Self::Varying => write!(f, "varying"),
        }
    }
}

impl std::str::FromStr for FetchDepth {
    type Err = PrefetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("varying") {
            return Ok(Self::Varying);
        }
        match s.parse::<usize>() {
            Ok(0) => Err(PrefetchError::Configuration(
                "fetch depth must be positive".into(),
            )),
            Ok(k) => Ok(Self::Fixed(k)),
            Err(_) => Err(PrefetchError::Configuration(format!(
                "invalid fetch depth: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ArchiveKey
// ---------------------------------------------------------------------------

/// Identifies one precomputed archive. Different depths are different
/// archives; there is no interpolation between them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    pub dataset: String,
    pub retriever: RetrieverKind,
    pub depth: FetchDepth,
}

impl ArchiveKey {
    pub fn new(dataset: impl Into<String>, retriever: RetrieverKind, depth: FetchDepth) -> Self {
        Self {
            dataset: dataset.into(),
            retriever,
            depth,
        }
    }

    /// Archive file name, also the registry lookup key.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.zip", self.dataset, self.retriever, self.depth)
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.dataset, self.retriever, self.depth)
    }
}

// ---------------------------------------------------------------------------
// MaterializedKey
// ---------------------------------------------------------------------------

/// Key of a memory-resident cache file: the archive, the split that was
/// drained and the build-time ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterializedKey {
    pub archive: ArchiveKey,
    pub split: DatasetSplit,
    pub k_build: usize,
}

impl MaterializedKey {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}.cache.bin",
            self.archive.dataset, self.split, self.archive.retriever, self.archive.depth, self.k_build
        )
    }
}

impl fmt::Display for MaterializedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.archive.dataset, self.split, self.archive.retriever, self.archive.depth, self.k_build
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_aliases() {
        assert_eq!("train".parse::<DatasetSplit>().unwrap(), DatasetSplit::Train);
        assert_eq!("VAL".parse::<DatasetSplit>().unwrap(), DatasetSplit::Dev);
        assert_eq!("validation".parse::<DatasetSplit>().unwrap(), DatasetSplit::Dev);
        assert_eq!("Test".parse::<DatasetSplit>().unwrap(), DatasetSplit::Test);
        assert!(matches!(
            "holdout".parse::<DatasetSplit>(),
            Err(PrefetchError::Configuration(_))
        ));
    }

    #[test]
    fn test_depth_parse() {
        assert_eq!("100".parse::<FetchDepth>().unwrap(), FetchDepth::Fixed(100));
        assert_eq!("Varying".parse::<FetchDepth>().unwrap(), FetchDepth::Varying);
        assert!("0".parse::<FetchDepth>().is_err());
        assert!("ten".parse::<FetchDepth>().is_err());
    }

    #[test]
    fn test_archive_file_name() {
        let key = ArchiveKey::new("FACTOIDQA", "BM25".parse().unwrap(), FetchDepth::Fixed(100));
        assert_eq!(key.file_name(), "FACTOIDQA_bm25_100.zip");

        let oracle = ArchiveKey::new("FACTOIDQA", RetrieverKind::Oracle, FetchDepth::Varying);
        assert_eq!(oracle.file_name(), "FACTOIDQA_oracle_varying.zip");
        assert!(oracle.retriever.is_entity_based());
    }

    #[test]
    fn test_materialized_file_name() {
        let key = MaterializedKey {
            archive: ArchiveKey::new("STRATEGYQA", RetrieverKind::Dpr, FetchDepth::Fixed(100)),
            split: DatasetSplit::Dev,
            k_build: 4,
        };
        assert_eq!(key.file_name(), "STRATEGYQA_dev_dpr_100_4.cache.bin");
    }
}
