use anyhow::{bail, Context, Result};
use hybrid_core::{DocumentSource, SourceDocument};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Fields a record's text may live under, in order of preference.
const TEXT_FIELDS: &[&str] = &["text", "body", "info_text"];

/// Turn one parsed record into a document. `lossy` marks a record that was
/// only readable after replacing invalid UTF-8; its text is dropped so the
/// builder reports the id as skipped instead of indexing mangled words.
fn record(value: Value, lossy: bool) -> Result<SourceDocument, String> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => return Err(format!("expected an object, got {}", kind(&other))),
    };
    let id = match fields.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(format!("document id must be a string or number, got {}", kind(&other))),
        None => return Err("record has no id".into()),
    };
    let text = match first_text(&mut fields) {
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let text = match text {
        Some(t) if lossy && t.contains(char::REPLACEMENT_CHARACTER) => {
            warn!(id = %id, "document text is not valid UTF-8; indexing it without text");
            None
        }
        t => t,
    };
    Ok(SourceDocument { id, text })
}

fn first_text(fields: &mut Map<String, Value>) -> Option<Value> {
    TEXT_FIELDS
        .iter()
        .filter_map(|name| fields.remove(*name))
        .find(|v| !v.is_null())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse strictly, then retry with invalid UTF-8 replaced. The flag tells
/// whether the retry was needed.
fn parse(bytes: &[u8]) -> Result<(Value, bool), serde_json::Error> {
    match serde_json::from_slice(bytes) {
        Ok(v) => Ok((v, false)),
        Err(strict) => match std::str::from_utf8(bytes) {
            // valid UTF-8, so the replacement pass cannot help
            Ok(_) => Err(strict),
            Err(_) => serde_json::from_str(&String::from_utf8_lossy(bytes)).map(|v| (v, true)),
        },
    }
}

/// Reads documents from a JSON array, a single JSON object, a JSONL file,
/// or a directory tree of such files.
///
/// Bad data never stops a build: a record without a usable id or that does
/// not parse is logged and counted in [`rejected`](Self::rejected), and a
/// record whose text is unreadable is passed on without text. Only an input
/// that cannot be found or opened is an error.
pub struct JsonDocumentSource {
    input: PathBuf,
    rejected: AtomicUsize,
}

impl JsonDocumentSource {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self { input: input.into(), rejected: AtomicUsize::new(0) }
    }

    /// Records dropped by the last fetch because no document id could be read.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }

    fn reject(&self, at: &str, reason: &dyn std::fmt::Display) {
        warn!(at, %reason, "skipping unreadable record");
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = Vec::new();
        if self.input.is_dir() {
            for entry in WalkDir::new(&self.input).into_iter().filter_map(|e| e.ok()) {
                let p = entry.path();
                if p.is_file() {
                    if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                        if matches!(ext, "json" | "jsonl") {
                            files.push(p.to_path_buf());
                        }
                    }
                }
            }
            // stable corpus order, so first-wins on duplicate ids is reproducible
            files.sort();
        } else if self.input.is_file() {
            files.push(self.input.clone());
        } else {
            bail!("input {} does not exist", self.input.display());
        }
        Ok(files)
    }

    fn push(&self, docs: &mut Vec<SourceDocument>, value: Value, lossy: bool, at: &str) {
        match record(value, lossy) {
            Ok(doc) => docs.push(doc),
            Err(reason) => self.reject(at, &reason),
        }
    }

    fn read_jsonl(&self, file: &Path, docs: &mut Vec<SourceDocument>) -> Result<()> {
        let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
        let reader = BufReader::new(f);
        for (n, line) in reader.split(b'\n').enumerate() {
            let line = line.with_context(|| format!("reading {}", file.display()))?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let at = format!("{}:{}", file.display(), n + 1);
            match parse(&line) {
                Ok((value, lossy)) => self.push(docs, value, lossy, &at),
                Err(e) => self.reject(&at, &e),
            }
        }
        Ok(())
    }

    fn read_json(&self, file: &Path, docs: &mut Vec<SourceDocument>) -> Result<()> {
        let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        let at = file.display().to_string();
        let (json, lossy) = match parse(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.reject(&at, &e);
                return Ok(());
            }
        };
        match json {
            Value::Array(arr) => {
                for (i, v) in arr.into_iter().enumerate() {
                    self.push(docs, v, lossy, &format!("{at}[{i}]"));
                }
            }
            other => self.push(docs, other, lossy, &at),
        }
        Ok(())
    }
}

impl DocumentSource for JsonDocumentSource {
    fn fetch_all_documents(&self) -> Result<Vec<SourceDocument>> {
        self.rejected.store(0, Ordering::Relaxed);
        let mut docs = Vec::new();
        for file in self.files()? {
            let before = docs.len();
            if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                self.read_jsonl(&file, &mut docs)?;
            } else {
                self.read_json(&file, &mut docs)?;
            }
            debug!(file = %file.display(), docs = docs.len() - before, "read corpus file");
        }
        info!(input = %self.input.display(), docs = docs.len(), rejected = self.rejected(), "corpus loaded");
        Ok(docs)
    }
}
