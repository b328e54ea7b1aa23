use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PrefetchError, PrefetchResult};

// ---------------------------------------------------------------------------
// PassageId
// ---------------------------------------------------------------------------

/// Passage identifier as the fetch job wrote it.
///
/// Corpus retrievers emit string ids; entity-linked and oracle jobs number
/// their passages. JSON keeps whichever form was stored. Binary formats get
/// an explicit variant tag since they cannot tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PassageId {
    Text(String),
    Number(i64),
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for PassageId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for PassageId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for PassageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl PartialEq<str> for PassageId {
    fn eq(&self, other: &str) -> bool {
        matches!(self, Self::Text(s) if s == other)
    }
}

impl PartialEq<&str> for PassageId {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl Serialize for PassageId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match (self, s.is_human_readable()) {
            (Self::Text(t), true) => s.serialize_str(t),
            (Self::Number(n), true) => s.serialize_i64(*n),
            (Self::Text(t), false) => s.serialize_newtype_variant("PassageId", 0, "Text", t),
            (Self::Number(n), false) => s.serialize_newtype_variant("PassageId", 1, "Number", n),
        }
    }
}

/// Binary layout of [`PassageId`]; must list variants in the same order.
#[derive(Deserialize)]
#[serde(rename = "PassageId")]
enum TaggedId {
    Text(String),
    Number(i64),
}

struct BareIdVisitor;

impl Visitor<'_> for BareIdVisitor {
    type Value = PassageId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer passage id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PassageId, E> {
        Ok(PassageId::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<PassageId, E> {
        Ok(PassageId::Text(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PassageId, E> {
        Ok(PassageId::Number(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PassageId, E> {
        i64::try_from(v)
            .map(PassageId::Number)
            .map_err(|_| E::custom(format!("passage id {v} out of range")))
    }
}

impl<'de> Deserialize<'de> for PassageId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        if d.is_human_readable() {
            d.deserialize_any(BareIdVisitor)
        } else {
            Ok(match TaggedId::deserialize(d)? {
                TaggedId::Text(s) => Self::Text(s),
                TaggedId::Number(n) => Self::Number(n),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// RetrievedPassage
// ---------------------------------------------------------------------------

/// One ranked passage as stored by the upstream fetch job.
///
/// `score` is kept as text in the serialized form and parsed to a number on
/// load. Scales differ between retriever types, so scores are only
/// comparable within one result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub id: PassageId,
    pub rank: u32,
    pub title: String,
    pub text: String,
    #[serde(with = "score_text")]
    pub score: f64,
    pub has_answer: bool,
}

impl RetrievedPassage {
    pub fn new(
        id: impl Into<PassageId>,
        rank: u32,
        title: impl Into<String>,
        text: impl Into<String>,
        score: f64,
        has_answer: bool,
    ) -> Self {
        Self {
            id: id.into(),
            rank,
            title: title.into(),
            text: text.into(),
            score,
            has_answer,
        }
    }

    /// Parse a single JSON passage record.
    pub fn parse(record: &serde_json::Value) -> PrefetchResult<Self> {
        Ok(Self::deserialize(record)?)
    }

    /// Inverse of [`RetrievedPassage::parse`].
    pub fn serialize_record(&self) -> PrefetchResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Scores travel as strings (`"12.5"`). The `Debug` float format keeps a
/// trailing `.0` on integral values and round-trips exactly.
mod score_text {
    use super::*;

    pub fn serialize<S: Serializer>(score: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{score:?}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid score {raw:?}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// ContextRecord
// ---------------------------------------------------------------------------

/// One archive line: a question and its ranked passages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub question: String,
    pub context: Vec<RetrievedPassage>,
}

impl ContextRecord {
    pub fn new(question: impl Into<String>, context: Vec<RetrievedPassage>) -> Self {
        Self {
            question: question.into(),
            context,
        }
    }

    pub fn from_line(line: &[u8]) -> PrefetchResult<Self> {
        Ok(serde_json::from_slice(line)?)
    }

    /// Serialize as a single JSONL line, without the trailing newline.
    pub fn to_line(&self) -> PrefetchResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Ranks must be 1, 2, 3, ... in list order.
    pub fn validate_ranks(&self) -> PrefetchResult<()> {
        for (i, p) in self.context.iter().enumerate() {
            let expected = i as u32 + 1;
            if p.rank != expected {
                return Err(PrefetchError::CorruptArchive {
                    line: 0,
                    reason: format!(
                        "passage {} for \"{}\" has rank {}, expected {expected}",
                        p.id, self.question, p.rank
                    ),
                });
            }
        }
        Ok(())
    }
}
