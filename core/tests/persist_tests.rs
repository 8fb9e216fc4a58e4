mod common;

use common::{build, pipeline, WhitespaceAnalyzer};
use hybrid_core::persist::{
    decode_artifact, load_artifact, load_manifest, save_artifact, save_manifest, write_artifact,
    AnalysisSettings, BuildManifest, IndexPaths, FORMAT_VERSION, MAGIC,
};
use hybrid_core::{ArtifactError, IndexHandle, MorphAnalyzer, ScriptAnalyzer};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn encoded() -> Vec<u8> {
    let index = build(&[("d1", "cat dog"), ("d2", "dog bird"), ("d3", "cat bird dog")]);
    let mut bytes = Vec::new();
    write_artifact(&mut bytes, &index, &AnalysisSettings::from_pipeline(&pipeline())).unwrap();
    bytes
}

#[test]
fn save_then_load_reproduces_the_index() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path());
    let index = build(&[("d1", "cat dog"), ("d2", "dog bird"), ("d3", "cat bird dog")]);
    let settings = AnalysisSettings::from_pipeline(&pipeline());

    let checksum = save_artifact(&paths.artifact(), &index, &settings).unwrap();
    let loaded = load_artifact(&paths.artifact()).unwrap();

    assert_eq!(loaded.index, index);
    assert_eq!(loaded.settings, settings);
    assert_eq!(loaded.settings.analyzer, "whitespace");
    assert_eq!(loaded.checksum, checksum);
    assert_eq!(loaded.index.document_frequency("dog"), 3);
    assert_eq!(loaded.index.average_document_length(), index.average_document_length());
}

#[test]
fn header_layout_is_stable() {
    let bytes = encoded();
    assert_eq!(&bytes[..8], &MAGIC);
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), FORMAT_VERSION);
    let declared = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    assert_eq!(declared as usize, bytes.len() - 24);
}

#[test]
fn foreign_files_are_rejected() {
    assert!(matches!(decode_artifact(b"not an index at all"), Err(ArtifactError::BadMagic)));
    assert!(matches!(decode_artifact(b""), Err(ArtifactError::BadMagic)));
}

#[test]
fn unknown_versions_are_rejected() {
    let mut bytes = encoded();
    bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
    assert!(matches!(
        decode_artifact(&bytes),
        Err(ArtifactError::UnsupportedVersion { found: 99, expected: FORMAT_VERSION })
    ));
}

#[test]
fn corrupted_payload_fails_the_checksum() {
    let mut bytes = encoded();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    assert!(matches!(decode_artifact(&bytes), Err(ArtifactError::ChecksumMismatch { .. })));
}

#[test]
fn truncated_files_are_detected() {
    let bytes = encoded();
    let cut = &bytes[..bytes.len() - 5];
    assert!(matches!(decode_artifact(cut), Err(ArtifactError::Truncated { .. })));
    assert!(matches!(decode_artifact(&bytes[..12]), Err(ArtifactError::Truncated { .. })));
}

#[test]
fn missing_artifact_is_reported_as_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.idx");
    assert!(matches!(load_artifact(&path), Err(ArtifactError::Missing(p)) if p == path));
    assert!(IndexHandle::open(&path, Arc::new(WhitespaceAnalyzer)).is_err());
}

#[test]
fn a_different_analyzer_cannot_serve_the_artifact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lexical.idx");
    let index = build(&[("d1", "cat dog")]);
    save_artifact(&path, &index, &AnalysisSettings::from_pipeline(&pipeline())).unwrap();

    let err = IndexHandle::open(&path, Arc::new(ScriptAnalyzer::new())).unwrap_err();
    match err {
        ArtifactError::AnalyzerMismatch { built_with, available } => {
            assert_eq!(built_with, "whitespace");
            assert_eq!(available, ScriptAnalyzer::new().name());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn manifest_round_trips_next_to_the_artifact() {
    let dir = tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("nested"));
    let manifest = BuildManifest {
        version: FORMAT_VERSION,
        created_at: "2026-01-01T00:00:00Z".into(),
        analyzer: "whitespace".into(),
        num_docs: 3,
        num_skipped: 1,
        num_terms: 3,
        avg_doc_len: 7.0 / 3.0,
        checksum: "deadbeef".into(),
    };
    save_manifest(&paths, &manifest).unwrap();
    assert_eq!(load_manifest(&paths).unwrap(), manifest);
}

#[test]
fn handle_reload_swaps_and_failed_reload_keeps_serving() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lexical.idx");
    let settings = AnalysisSettings::from_pipeline(&pipeline());
    save_artifact(&path, &build(&[("old", "cat dog")]), &settings).unwrap();

    let handle = IndexHandle::open(&path, Arc::new(WhitespaceAnalyzer)).unwrap();
    let before = handle.snapshot();
    assert_eq!(before.generation, 1);
    assert_eq!(before.index.doc_ids(), ["old"]);

    save_artifact(&path, &build(&[("new1", "cat"), ("new2", "dog")]), &settings).unwrap();
    let after = handle.reload_from(&path, Arc::new(WhitespaceAnalyzer)).unwrap();
    assert!(after.generation > before.generation);
    assert!(Arc::ptr_eq(&after, &handle.snapshot()));
    assert_eq!(after.index.document_count(), 2);
    // a snapshot taken earlier is unaffected
    assert_eq!(before.index.doc_ids(), ["old"]);

    fs::write(&path, b"garbage").unwrap();
    assert!(handle.reload_from(&path, Arc::new(WhitespaceAnalyzer)).is_err());
    assert_eq!(handle.snapshot().generation, after.generation);
    assert_eq!(handle.snapshot().index.document_count(), 2);
}

#[test]
fn publish_replaces_the_live_index() {
    let handle = IndexHandle::new(build(&[("a", "cat")]), pipeline());
    let previous = handle.publish(build(&[("b", "dog"), ("c", "dog")]), pipeline()).unwrap();
    assert_eq!(previous.generation, 1);
    assert_eq!(handle.generation(), 2);
    assert_eq!(handle.snapshot().index.document_count(), 2);
}
