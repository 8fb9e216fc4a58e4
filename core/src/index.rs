use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ArtifactError;

pub type TermId = u32;
/// Position of a document in the index's sorted document-id list.
pub type DocOrd = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc: DocOrd,
    pub tf: u32,
}

/// Corpus-wide term statistics backing BM25.
///
/// Documents are stored in ascending id order, so ordinal order is id order
/// and ordinal comparisons give the lexicographic tie-break for free. Terms are
/// stored in ascending order too; a term's id is its position. The structure
/// is never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalIndex {
    doc_ids: Vec<String>,
    doc_lengths: Vec<u32>,
    terms: Vec<String>,
    dictionary: HashMap<String, TermId>,
    postings: Vec<Vec<Posting>>, // per term, sorted by doc
    total_tokens: u64,
    avgdl: f64,
}

impl LexicalIndex {
    pub fn empty() -> Self {
        Self {
            doc_ids: Vec::new(),
            doc_lengths: Vec::new(),
            terms: Vec::new(),
            dictionary: HashMap::new(),
            postings: Vec::new(),
            total_tokens: 0,
            avgdl: 0.0,
        }
    }

    /// Assemble an index from its tables, checking every structural invariant:
    /// sorted unique ids and terms, in-range strictly increasing postings with
    /// non-zero term frequencies, and per-document frequency sums equal to the
    /// recorded document lengths.
    pub fn from_parts(
        doc_ids: Vec<String>,
        doc_lengths: Vec<u32>,
        terms: Vec<String>,
        postings: Vec<Vec<Posting>>,
    ) -> Result<Self, ArtifactError> {
        let inconsistent = |msg: String| Err(ArtifactError::Inconsistent(msg));

        if doc_ids.len() != doc_lengths.len() {
            return inconsistent(format!(
                "{} document ids but {} document lengths",
                doc_ids.len(),
                doc_lengths.len()
            ));
        }
        if terms.len() != postings.len() {
            return inconsistent(format!("{} terms but {} postings lists", terms.len(), postings.len()));
        }
        if let Some(w) = doc_ids.windows(2).find(|w| w[0] >= w[1]) {
            return inconsistent(format!("document ids not strictly ascending at `{}`", w[1]));
        }
        if let Some(w) = terms.windows(2).find(|w| w[0] >= w[1]) {
            return inconsistent(format!("terms not strictly ascending at `{}`", w[1]));
        }
        if let Some(pos) = doc_lengths.iter().position(|&len| len == 0) {
            return inconsistent(format!("document `{}` has zero length", doc_ids[pos]));
        }

        let num_docs = doc_ids.len() as u64;
        let mut length_check = vec![0u64; doc_ids.len()];
        for (term, plist) in terms.iter().zip(&postings) {
            if plist.is_empty() {
                return inconsistent(format!("term `{term}` has no postings"));
            }
            let mut prev: Option<DocOrd> = None;
            for p in plist {
                if u64::from(p.doc) >= num_docs || p.tf == 0 || prev.is_some_and(|d| d >= p.doc) {
                    return inconsistent(format!("malformed posting for term `{term}`"));
                }
                length_check[p.doc as usize] += u64::from(p.tf);
                prev = Some(p.doc);
            }
        }
        for (ord, (&expected, &found)) in doc_lengths.iter().zip(&length_check).enumerate() {
            if u64::from(expected) != found {
                return inconsistent(format!(
                    "document `{}` records length {expected} but its postings sum to {found}",
                    doc_ids[ord]
                ));
            }
        }

        let dictionary = terms
            .iter()
            .enumerate()
            .map(|(id, t)| (t.clone(), id as TermId))
            .collect();
        let total_tokens: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avgdl = if doc_ids.is_empty() { 0.0 } else { total_tokens as f64 / doc_ids.len() as f64 };

        Ok(Self { doc_ids, doc_lengths, terms, dictionary, postings, total_tokens, avgdl })
    }

    pub fn document_count(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn average_document_length(&self) -> f64 {
        self.avgdl
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn term_id(&self, term: &str) -> Option<TermId> {
        self.dictionary.get(term).copied()
    }

    /// Documents containing `term`, ascending by ordinal. `None` for unknown terms.
    pub fn postings(&self, term: &str) -> Option<&[Posting]> {
        self.term_id(term).map(|tid| self.postings[tid as usize].as_slice())
    }

    pub fn document_frequency(&self, term: &str) -> u32 {
        self.postings(term).map_or(0, |p| p.len() as u32)
    }

    pub fn term_frequency(&self, doc_id: &str, term: &str) -> u32 {
        let (Some(ord), Some(plist)) = (self.doc_ord(doc_id), self.postings(term)) else {
            return 0;
        };
        plist
            .binary_search_by_key(&ord, |p| p.doc)
            .map_or(0, |i| plist[i].tf)
    }

    pub fn doc_ord(&self, doc_id: &str) -> Option<DocOrd> {
        self.doc_ids
            .binary_search_by(|probe| probe.as_str().cmp(doc_id))
            .ok()
            .map(|i| i as DocOrd)
    }

    pub fn doc_id(&self, ord: DocOrd) -> &str {
        &self.doc_ids[ord as usize]
    }

    pub fn doc_length(&self, ord: DocOrd) -> u32 {
        self.doc_lengths[ord as usize]
    }

    pub fn doc_ids(&self) -> &[String] {
        &self.doc_ids
    }

    pub fn doc_lengths(&self) -> &[u32] {
        &self.doc_lengths
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn postings_table(&self) -> &[Vec<Posting>] {
        &self.postings
    }
}
