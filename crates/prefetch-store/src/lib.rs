pub mod archive;
pub mod coverage;
pub mod dataset;
pub mod disk;
pub mod factory;
pub mod fetch;
pub mod index;
pub mod memory;
pub mod registry;
pub mod resolver;

pub use archive::{ArchiveMember, ArchiveWriter, MemberCompression, MemberLocator};
pub use coverage::CoverageReport;
pub use dataset::{QuestionFile, QuestionFormat};
pub use disk::DiskRetriever;
pub use factory::{open_retriever, PrefetchedRetriever, RetrieverOptions};
pub use fetch::{ArchiveFetcher, HttpFetcher, OfflineFetcher};
pub use index::{ArchiveOffsetIndex, IndexStats};
pub use memory::{CacheOrigin, MemoryRetriever};
pub use registry::{ArchiveSource, MemberLayout, Registry};
pub use resolver::{ArchiveLocation, CacheKeyResolver, ResolvedArchive};
