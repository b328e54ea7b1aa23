//! Question files for draining and coverage runs.
//!
//! Reads JSONL or JSON-array files, plain or inside a zip archive. Records
//! without a usable question are skipped with a warning; read failures end
//! the walk with an error.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

use prefetch_core::{
    normalize_question, PrefetchError, PrefetchResult, QuestionRecord, QuestionSource, Questions,
};

use crate::archive::ArchiveMember;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionFormat {
    /// One JSON object per line.
    Jsonl,
    /// A single top-level array of objects.
    JsonArray,
}

impl QuestionFormat {
    fn from_name(name: &str) -> Self {
        if name.ends_with(".json") {
            Self::JsonArray
        } else {
            Self::Jsonl
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionFile {
    path: PathBuf,
    member: Option<String>,
    format: QuestionFormat,
}

impl QuestionFile {
    /// A plain file; the format follows the extension (`.json` is an array).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = QuestionFormat::from_name(&path.to_string_lossy());
        Self {
            path,
            member: None,
            format,
        }
    }

    /// A member of a zip archive; the format follows the member name.
    pub fn in_archive(path: impl Into<PathBuf>, member: impl Into<String>) -> Self {
        let member = member.into();
        Self {
            path: path.into(),
            format: QuestionFormat::from_name(&member),
            member: Some(member),
        }
    }

    pub fn with_format(mut self, format: QuestionFormat) -> Self {
        self.format = format;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> PrefetchResult<Box<dyn BufRead>> {
        match &self.member {
            None => Ok(Box::new(BufReader::new(File::open(&self.path)?))),
            Some(name) => {
                let member = ArchiveMember::new(&self.path, name.as_str());
                let mut bytes = Vec::new();
                member.with_reader(|reader| Ok(reader.read_to_end(&mut bytes)?))?;
                Ok(Box::new(Cursor::new(bytes)))
            }
        }
    }
}

impl QuestionSource for QuestionFile {
    fn questions(&self) -> PrefetchResult<Questions<'_>> {
        let reader = self.open()?;
        match self.format {
            QuestionFormat::Jsonl => Ok(Box::new(JsonlQuestions {
                reader,
                buf: Vec::new(),
                line_no: 0,
                failed: false,
            })),
            QuestionFormat::JsonArray => {
                let values: Vec<Value> = serde_json::from_reader(reader)?;
                Ok(Box::new(values.into_iter().enumerate().filter_map(
                    |(i, v)| {
                        let record = record_from_value(&v);
                        if record.is_none() {
                            warn!("skipping record {} without a question", i + 1);
                        }
                        record.map(Ok)
                    },
                )))
            }
        }
    }
}

struct JsonlQuestions {
    reader: Box<dyn BufRead>,
    buf: Vec<u8>,
    line_no: usize,
    failed: bool,
}

impl Iterator for JsonlQuestions {
    type Item = PrefetchResult<QuestionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(PrefetchError::Io(e)));
                }
            }
            self.line_no += 1;
            if self.buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Value>(&self.buf) {
                Ok(v) => match record_from_value(&v) {
                    Some(record) => return Some(Ok(record)),
                    None => warn!("skipping line {} without a question", self.line_no),
                },
                Err(e) => warn!("skipping malformed line {}: {e}", self.line_no),
            }
        }
    }
}

/// Pull the question and its answer aliases out of a dataset record.
///
/// `answers` may be a list or a single string; a boolean `answer` maps to
/// `Yes`/`No` aliases.
fn record_from_value(v: &Value) -> Option<QuestionRecord> {
    let question = v.get("question")?.as_str()?;
    if question.trim().is_empty() {
        return None;
    }
    let answers = match (v.get("answers"), v.get("answer")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .filter_map(|a| a.as_str().map(str::to_string))
            .collect(),
        (Some(Value::String(s)), _) | (None, Some(Value::String(s))) => vec![s.clone()],
        (None, Some(Value::Bool(b))) => boolean_aliases(*b),
        _ => Vec::new(),
    };
    Some(QuestionRecord::new(normalize_question(question), answers))
}

fn boolean_aliases(answer: bool) -> Vec<String> {
    let base: [&str; 4] = if answer {
        ["Yes", "Correct", "True", "Positive"]
    } else {
        ["No", "Incorrect", "False", "Negative"]
    };
    let mut out = Vec::with_capacity(base.len() * 4);
    for word in base {
        let lower = word.to_lowercase();
        out.push(word.to_string());
        out.push(lower.clone());
        out.push(format!("{word}."));
        out.push(format!("{lower}."));
    }
    out
}
