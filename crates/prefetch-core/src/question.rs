use serde::{Deserialize, Serialize};

use crate::error::PrefetchResult;

/// One benchmark question with its accepted answer aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    #[serde(default)]
    pub answers: Vec<String>,
}

impl QuestionRecord {
    pub fn new(question: impl Into<String>, answers: Vec<String>) -> Self {
        Self {
            question: question.into(),
            answers,
        }
    }
}

/// Ensure a trailing `?` and lowercase the first character, the form under
/// which questions are keyed in archives.
pub fn normalize_question(question: &str) -> String {
    let mut q = question.to_string();
    if !q.ends_with('?') {
        q.push('?');
    }
    let mut chars = q.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => q,
    }
}

/// Lazy, finite walk over one dataset split.
pub type Questions<'a> = Box<dyn Iterator<Item = PrefetchResult<QuestionRecord>> + 'a>;

/// A dataset split that can be walked from the start any number of times.
///
/// Each call yields a fresh sequence. Implementations skip malformed records
/// with a warning; an `Err` item means the underlying read failed and the
/// walk cannot continue.
pub trait QuestionSource {
    fn questions(&self) -> PrefetchResult<Questions<'_>>;
}

impl QuestionSource for Vec<QuestionRecord> {
    fn questions(&self) -> PrefetchResult<Questions<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}

impl QuestionSource for [QuestionRecord] {
    fn questions(&self) -> PrefetchResult<Questions<'_>> {
        Ok(Box::new(self.iter().cloned().map(Ok)))
    }
}
