//! Versioned on-disk form of a [`LexicalIndex`].
//!
//! ```text
//! offset  size  field
//! 0       8     magic "HYBLEX01"
//! 8       4     format version (u32 LE)
//! 12      4     CRC32 of payload (u32 LE)
//! 16      8     payload length in bytes (u64 LE)
//! 24      ..    bincode payload: analysis settings, doc-id list,
//!               doc-length table, term table, postings table
//! ```
//!
//! Document frequencies are the postings lengths and are not stored twice.
//! The header is checked before the payload is decoded, and the decoded tables
//! go through [`LexicalIndex::from_parts`] before anything is served.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

use crate::analyzer::{Category, MorphAnalyzer};
use crate::error::ArtifactError;
use crate::index::{LexicalIndex, Posting};
use crate::tokenizer::{TextPipeline, TokenFilter};

pub const MAGIC: [u8; 8] = *b"HYBLEX01";
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 24;

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn artifact(&self) -> PathBuf { self.root.join("lexical.idx") }
    pub fn manifest(&self) -> PathBuf { self.root.join("manifest.json") }
}

/// How the indexed tokens were produced. Stored in the artifact so the
/// serving process tokenizes queries exactly like the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub analyzer: String,
    pub allowed: Vec<Category>,
}

impl AnalysisSettings {
    pub fn from_pipeline(pipeline: &TextPipeline) -> Self {
        Self {
            analyzer: pipeline.analyzer_name().to_string(),
            allowed: pipeline.filter().allowed().collect(),
        }
    }

    /// Rebuild the query pipeline, refusing an analyzer other than the one
    /// that built the index.
    pub fn pipeline(&self, analyzer: Arc<dyn MorphAnalyzer>) -> Result<TextPipeline, ArtifactError> {
        if analyzer.name() != self.analyzer {
            return Err(ArtifactError::AnalyzerMismatch {
                built_with: self.analyzer.clone(),
                available: analyzer.name().to_string(),
            });
        }
        let filter = TokenFilter::new(self.allowed.iter().copied())
            .map_err(|e| ArtifactError::Inconsistent(e.to_string()))?;
        Ok(TextPipeline::new(analyzer, filter))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexArtifact {
    pub settings: AnalysisSettings,
    pub index: LexicalIndex,
    pub checksum: u32,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    settings: &'a AnalysisSettings,
    doc_ids: &'a [String],
    doc_lengths: &'a [u32],
    terms: &'a [String],
    postings: &'a [Vec<Posting>],
}

#[derive(Deserialize)]
struct Payload {
    settings: AnalysisSettings,
    doc_ids: Vec<String>,
    doc_lengths: Vec<u32>,
    terms: Vec<String>,
    postings: Vec<Vec<Posting>>,
}

/// Serialize header and payload into `w`. Returns the payload checksum.
pub fn write_artifact<W: Write>(
    w: &mut W,
    index: &LexicalIndex,
    settings: &AnalysisSettings,
) -> Result<u32, ArtifactError> {
    let payload = bincode::serialize(&PayloadRef {
        settings,
        doc_ids: index.doc_ids(),
        doc_lengths: index.doc_lengths(),
        terms: index.terms(),
        postings: index.postings_table(),
    })?;
    let checksum = crc32fast::hash(&payload);

    w.write_all(&MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u32::<LittleEndian>(checksum)?;
    w.write_u64::<LittleEndian>(payload.len() as u64)?;
    w.write_all(&payload)?;
    Ok(checksum)
}

pub fn decode_artifact(bytes: &[u8]) -> Result<IndexArtifact, ArtifactError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC {
        return Err(ArtifactError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(ArtifactError::Truncated { declared: HEADER_LEN as u64, actual: bytes.len() as u64 });
    }

    let mut header = Cursor::new(&bytes[MAGIC.len()..HEADER_LEN]);
    let version = header.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(ArtifactError::UnsupportedVersion { found: version, expected: FORMAT_VERSION });
    }
    let expected = header.read_u32::<LittleEndian>()?;
    let declared = header.read_u64::<LittleEndian>()?;

    let payload = &bytes[HEADER_LEN..];
    let actual = payload.len() as u64;
    if actual < declared {
        return Err(ArtifactError::Truncated { declared, actual });
    }
    if actual > declared {
        return Err(ArtifactError::Inconsistent(format!(
            "{} trailing bytes after payload",
            actual - declared
        )));
    }
    let computed = crc32fast::hash(payload);
    if computed != expected {
        return Err(ArtifactError::ChecksumMismatch { expected, computed });
    }

    let p: Payload = bincode::deserialize(payload)?;
    let index = LexicalIndex::from_parts(p.doc_ids, p.doc_lengths, p.terms, p.postings)?;
    Ok(IndexArtifact { settings: p.settings, index, checksum: computed })
}

pub fn read_artifact<R: Read>(r: &mut R) -> Result<IndexArtifact, ArtifactError> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;
    decode_artifact(&buf)
}

/// Publish an artifact atomically: written to a temp file beside `path`,
/// flushed, then renamed over it. Readers see the old file or the new one.
pub fn save_artifact(
    path: &Path,
    index: &LexicalIndex,
    settings: &AnalysisSettings,
) -> Result<u32, ArtifactError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    let checksum = {
        let mut w = std::io::BufWriter::new(tmp.as_file_mut());
        let checksum = write_artifact(&mut w, index, settings)?;
        w.flush()?;
        checksum
    };
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ArtifactError::Io(e.error))?;
    Ok(checksum)
}

pub fn load_artifact(path: &Path) -> Result<IndexArtifact, ArtifactError> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ArtifactError::Missing(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    read_artifact(&mut f)
}

/// Human-readable summary written next to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: u32,
    pub created_at: String,
    pub analyzer: String,
    pub num_docs: usize,
    pub num_skipped: usize,
    pub num_terms: usize,
    pub avg_doc_len: f64,
    pub checksum: String,
}

pub fn save_manifest(paths: &IndexPaths, manifest: &BuildManifest) -> Result<(), ArtifactError> {
    fs::create_dir_all(&paths.root)?;
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| ArtifactError::Inconsistent(e.to_string()))?;
    let mut tmp = NamedTempFile::new_in(&paths.root)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(paths.manifest()).map_err(|e| ArtifactError::Io(e.error))?;
    Ok(())
}

pub fn load_manifest(paths: &IndexPaths) -> Result<BuildManifest, ArtifactError> {
    let mut buf = String::new();
    File::open(paths.manifest())?.read_to_string(&mut buf)?;
    serde_json::from_str(&buf).map_err(|e| ArtifactError::Inconsistent(e.to_string()))
}
