use std::path::{Path, PathBuf};

use tracing::debug;

use prefetch_core::{ArchiveKey, DatasetSplit, PrefetchError, PrefetchResult};

use crate::fetch::ArchiveFetcher;
use crate::registry::{ArchiveSource, MemberLayout, Registry};

/// Where a resolved archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    Local(PathBuf),
    Remote {
        url: String,
        file_name: String,
        sha256: Option<String>,
    },
}

impl ArchiveLocation {
    /// Make sure the archive exists on local disk and return its path.
    /// Remote archives are downloaded into `checkpoint_dir` once.
    pub fn ensure_local(
        &self,
        checkpoint_dir: &Path,
        fetcher: &dyn ArchiveFetcher,
    ) -> PrefetchResult<PathBuf> {
        match self {
            Self::Local(path) => {
                if !path.is_file() {
                    return Err(PrefetchError::Configuration(format!(
                        "archive {} does not exist",
                        path.display()
                    )));
                }
                Ok(path.clone())
            }
            Self::Remote {
                url,
                file_name,
                sha256,
            } => {
                let dest = checkpoint_dir.join(file_name);
                fetcher.fetch(url, &dest, sha256.as_deref())?;
                Ok(dest)
            }
        }
    }
}

/// An archive location together with the member holding the wanted split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArchive {
    pub key: ArchiveKey,
    pub split: DatasetSplit,
    pub location: ArchiveLocation,
    pub member: String,
}

/// Maps experiment settings onto archive locations.
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    registry: Registry,
}

impl CacheKeyResolver {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn resolve(&self, key: &ArchiveKey) -> PrefetchResult<ArchiveLocation> {
        let file_name = key.file_name();
        debug!("resolving archive {file_name}");
        match self.registry.archive(&file_name) {
            Some(ArchiveSource::Local(path)) => Ok(ArchiveLocation::Local(path.clone())),
            Some(ArchiveSource::Remote { url, sha256 }) => Ok(ArchiveLocation::Remote {
                url: url.clone(),
                file_name,
                sha256: sha256.clone(),
            }),
            None => Err(PrefetchError::Configuration(format!(
                "invalid prefetched retriever configuration ({}/{}) for {}",
                key.retriever, key.depth, key.dataset
            ))),
        }
    }

    /// Member of the dataset's archives that holds `split`.
    pub fn member(&self, dataset: &str, split: DatasetSplit) -> PrefetchResult<String> {
        match self.registry.dataset(dataset) {
            Some(MemberLayout::Single(name)) => Ok(name.clone()),
            Some(MemberLayout::PerSplit(splits)) if splits.contains(&split) => {
                Ok(split.member_name().to_string())
            }
            Some(MemberLayout::PerSplit(_)) => Err(PrefetchError::Configuration(format!(
                "split {split} is not available for {dataset}"
            ))),
            None => Err(PrefetchError::Configuration(format!(
                "unknown dataset: {dataset}"
            ))),
        }
    }

    pub fn resolve_split(
        &self,
        key: &ArchiveKey,
        split: DatasetSplit,
    ) -> PrefetchResult<ResolvedArchive> {
        let member = self.member(&key.dataset, split)?;
        let location = self.resolve(key)?;
        Ok(ResolvedArchive {
            key: key.clone(),
            split,
            location,
            member,
        })
    }
}
