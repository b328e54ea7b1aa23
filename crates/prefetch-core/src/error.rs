use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrefetchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("corrupt archive at line {line}: {reason}")]
    CorruptArchive { line: usize, reason: String },

    #[error("question not found in materialized cache: \"{0}\"")]
    StaleCache(String),

    #[error("usage error: {0}")]
    Usage(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("cache file error: {0}")]
    Cache(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PrefetchResult<T> = Result<T, PrefetchError>;
