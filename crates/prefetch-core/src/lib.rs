pub mod answer;
pub mod error;
pub mod key;
pub mod passage;
pub mod question;
pub mod retriever;

pub use answer::{normalize_answer, text_has_answer};
pub use error::{PrefetchError, PrefetchResult};
pub use key::{ArchiveKey, DatasetSplit, FetchDepth, MaterializedKey, RetrieverKind};
pub use passage::{ContextRecord, PassageId, RetrievedPassage};
pub use question::{normalize_question, QuestionRecord, QuestionSource, Questions};
pub use retriever::Retriever;
