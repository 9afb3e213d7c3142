//! Sharded content index: shard key → term → document → snippets.
//!
//! Shards are keyed by the first character of a term. The snapshot stores
//! every shard as its own compressed block behind a small header, so a single
//! shard can be read without touching the others.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::extract::Segment;
use crate::snapshot::{decode_limit, deserialize_bounded, write_atomic};
use crate::tokenizer::{Tokenizer, shard_key};

/// Context snippets recorded for one (term, document) pair.
pub type Snippets = BTreeSet<String>;

/// Document path → snippets.
pub type Postings = BTreeMap<String, Snippets>;

/// Magic bytes identifying a sharded content snapshot.
pub const CONTENT_MAGIC: &[u8; 4] = b"DIXC";
pub const CONTENT_FORMAT_VERSION: u32 = 1;

// ─── Shard ───────────────────────────────────────────────────────────

/// All terms sharing one leading character.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Shard {
    terms: HashMap<String, Postings>,
}

impl Shard {
    pub fn get(&self, term: &str) -> Option<&Postings> {
        self.terms.get(term)
    }

    pub fn insert(&mut self, term: &str, document: &str, snippet: String) {
        self.terms
            .entry(term.to_string())
            .or_default()
            .entry(document.to_string())
            .or_default()
            .insert(snippet);
    }

    /// Drop every posting for `document`; terms left without documents are removed.
    /// Returns the number of terms that referenced the document.
    pub fn remove_document(&mut self, document: &str) -> usize {
        let mut removed = 0;
        self.terms.retain(|_term, postings| {
            if postings.remove(document).is_some() {
                removed += 1;
            }
            !postings.is_empty()
        });
        removed
    }

    /// Terms whose text matches `pattern`, with their postings.
    pub fn matching<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = (&'a String, &'a Postings)> + 'a {
        self.terms.iter().filter(|(term, _)| pattern.is_match(term))
    }

    pub fn terms(&self) -> impl Iterator<Item = &String> {
        self.terms.keys()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn contains_document(&self, document: &str) -> bool {
        self.terms.values().any(|p| p.contains_key(document))
    }
}

// ─── Per-document entries ────────────────────────────────────────────

/// Everything one document contributes to the index, built without holding
/// any lock and then swapped in as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentEntries {
    shards: BTreeMap<char, BTreeMap<String, Snippets>>,
}

impl DocumentEntries {
    /// Noun-like occurrences of `segments` with a `radius`-word snippet each.
    pub fn build(segments: &[Segment], tokenizer: &Tokenizer, radius: usize) -> Self {
        let mut entries = DocumentEntries::default();
        for words in segments {
            for (term, snippet) in tokenizer.occurrences(words, radius) {
                let Some(key) = shard_key(&term) else { continue };
                entries
                    .shards
                    .entry(key)
                    .or_default()
                    .entry(term)
                    .or_default()
                    .insert(snippet);
            }
        }
        entries
    }

    pub fn term_count(&self) -> usize {
        self.shards.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shard_keys(&self) -> impl Iterator<Item = char> + '_ {
        self.shards.keys().copied()
    }
}

// ─── Content index ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentIndex {
    shards: BTreeMap<char, Shard>,
}

impl ContentIndex {
    pub fn shard(&self, key: char) -> Option<&Shard> {
        self.shards.get(&key)
    }

    pub fn shard_keys(&self) -> impl Iterator<Item = char> + '_ {
        self.shards.keys().copied()
    }

    /// Postings for `term` (already lower-cased).
    pub fn get(&self, term: &str) -> Option<&Postings> {
        self.shards.get(&shard_key(term)?)?.get(term)
    }

    /// Purge `document` from every shard, then insert `entries` for it.
    pub fn replace_document(&mut self, document: &str, entries: DocumentEntries) {
        self.remove_document(document);
        for (key, terms) in entries.shards {
            let shard = self.shards.entry(key).or_default();
            for (term, snippets) in terms {
                shard
                    .terms
                    .entry(term)
                    .or_default()
                    .entry(document.to_string())
                    .or_default()
                    .extend(snippets);
            }
        }
    }

    /// Purge `document` from every shard. Returns the number of (term, document)
    /// postings removed.
    pub fn remove_document(&mut self, document: &str) -> usize {
        let removed: usize = self.shards.values_mut().map(|s| s.remove_document(document)).sum();
        self.shards.retain(|_, shard| !shard.is_empty());
        removed
    }

    pub fn contains_document(&self, document: &str) -> bool {
        self.shards.values().any(|s| s.contains_document(document))
    }

    pub fn documents(&self) -> BTreeSet<&str> {
        self.shards
            .values()
            .flat_map(|s| s.terms.values())
            .flat_map(|p| p.keys().map(String::as_str))
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn term_count(&self) -> usize {
        self.shards.values().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Write the whole index as a sharded snapshot.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let start = Instant::now();

        let mut slots = Vec::with_capacity(self.shards.len());
        let mut blobs = Vec::with_capacity(self.shards.len());
        let mut offset = 0u64;
        for (&key, shard) in &self.shards {
            let blob = encode_shard(shard)?;
            slots.push(ShardSlot { key, offset, len: blob.len() as u64 });
            offset += blob.len() as u64;
            blobs.push(blob);
        }
        let header = bincode::serialize(&slots)?;

        write_atomic(path, |writer| {
            writer.write_all(CONTENT_MAGIC)?;
            writer.write_all(&CONTENT_FORMAT_VERSION.to_le_bytes())?;
            writer.write_all(&(header.len() as u64).to_le_bytes())?;
            writer.write_all(&header)?;
            for blob in &blobs {
                writer.write_all(blob)?;
            }
            Ok(())
        })?;

        info!(
            path = %path.display(),
            shards = slots.len(),
            terms = self.term_count(),
            size_kb = (offset + header.len() as u64) / 1024,
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Content snapshot saved"
        );
        Ok(())
    }

    /// Read every shard. `Ok(None)` if no snapshot exists.
    pub fn load(path: &Path) -> Result<Option<ContentIndex>, IndexError> {
        let start = Instant::now();
        let Some(mut file) = SnapshotFile::open(path)? else {
            return Ok(None);
        };
        let mut shards = BTreeMap::new();
        for slot in file.slots.clone() {
            shards.insert(slot.key, file.read_shard(&slot)?);
        }
        let index = ContentIndex { shards };
        info!(
            path = %path.display(),
            shards = index.shard_count(),
            terms = index.term_count(),
            elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
            "Content snapshot loaded"
        );
        Ok(Some(index))
    }

    /// Read the single shard for `key`. A missing snapshot or shard is empty.
    pub fn load_shard(path: &Path, key: char) -> Result<Shard, IndexError> {
        let Some(mut file) = SnapshotFile::open(path)? else {
            return Ok(Shard::default());
        };
        let Some(slot) = file.slots.iter().find(|s| s.key == key).cloned() else {
            debug!(%key, "Shard not present in snapshot");
            return Ok(Shard::default());
        };
        let shard = file.read_shard(&slot)?;
        debug!(%key, terms = shard.len(), "Shard loaded");
        Ok(shard)
    }

    /// Shard keys present in the snapshot at `path`, read from the header only.
    pub fn snapshot_shard_keys(path: &Path) -> Result<Vec<char>, IndexError> {
        Ok(SnapshotFile::open(path)?
            .map(|f| f.slots.iter().map(|s| s.key).collect())
            .unwrap_or_default())
    }
}

// ─── Snapshot layout ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ShardSlot {
    key: char,
    /// Offset from the end of the header
    offset: u64,
    len: u64,
}

fn encode_shard(shard: &Shard) -> Result<Vec<u8>, IndexError> {
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    bincode::serialize_into(&mut encoder, shard)?;
    encoder.finish().map_err(|e| IndexError::Io(std::io::Error::other(e)))
}

struct SnapshotFile {
    path: String,
    reader: BufReader<fs::File>,
    data_start: u64,
    slots: Vec<ShardSlot>,
}

impl SnapshotFile {
    fn open(path: &Path) -> Result<Option<SnapshotFile>, IndexError> {
        let path_str = path.display().to_string();
        let load_err = |message: String| IndexError::SnapshotLoad {
            path: path_str.clone(),
            message,
        };

        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(load_err(format!("cannot open file: {}", e))),
        };
        let mut reader = BufReader::new(file);

        let mut prelude = [0u8; 16];
        reader
            .read_exact(&mut prelude)
            .map_err(|e| load_err(format!("read error (prelude): {}", e)))?;
        if &prelude[..4] != CONTENT_MAGIC {
            return Err(load_err("not a content snapshot (bad magic bytes)".to_string()));
        }
        let version = u32::from_le_bytes([prelude[4], prelude[5], prelude[6], prelude[7]]);
        if version != CONTENT_FORMAT_VERSION {
            return Err(load_err(format!("unsupported format version {}", version)));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&prelude[8..16]);
        let header_len = u64::from_le_bytes(len_bytes);

        let mut header = Vec::new();
        (&mut reader)
            .take(header_len)
            .read_to_end(&mut header)
            .map_err(|e| load_err(format!("read error (header): {}", e)))?;
        if header.len() as u64 != header_len {
            return Err(load_err("truncated header".to_string()));
        }
        let slots: Vec<ShardSlot> = deserialize_bounded(&header[..], header_len)
            .map_err(|e| load_err(format!("header deserialization failed: {}", e)))?;

        Ok(Some(SnapshotFile {
            path: path_str,
            reader,
            data_start: 16 + header_len,
            slots,
        }))
    }

    fn read_shard(&mut self, slot: &ShardSlot) -> Result<Shard, IndexError> {
        let load_err = |message: String| IndexError::SnapshotLoad {
            path: self.path.clone(),
            message,
        };
        self.reader
            .seek(SeekFrom::Start(self.data_start + slot.offset))
            .map_err(|e| load_err(format!("seek error: {}", e)))?;
        let decoder = lz4_flex::frame::FrameDecoder::new((&mut self.reader).take(slot.len));
        deserialize_bounded(decoder, decode_limit(slot.len))
            .map_err(|e| load_err(format!("shard '{}' deserialization failed: {}", slot.key, e)))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_text() -> impl Strategy<Value = String> {
        proptest::collection::vec("[A-Z][a-z]{0,6}|[a-z]{1,6}(tion|ness)?|[a-z]{1,6}", 0..30)
            .prop_map(|words| words.join(" "))
    }

    proptest! {
        /// Re-indexing a document with unchanged content leaves the index unchanged.
        #[test]
        fn reindex_unchanged_is_idempotent(a in arb_text(), b in arb_text()) {
            let tok = Tokenizer::default();
            let mut index = ContentIndex::default();
            index.replace_document("a", DocumentEntries::build(&[tok.words(&a)], &tok, 5));
            index.replace_document("b", DocumentEntries::build(&[tok.words(&b)], &tok, 5));
            let before = index.clone();
            index.replace_document("a", DocumentEntries::build(&[tok.words(&a)], &tok, 5));
            prop_assert_eq!(index, before);
        }

        /// Removing a document leaves no posting behind and never touches others.
        #[test]
        fn remove_leaves_no_trace(a in arb_text(), b in arb_text()) {
            let tok = Tokenizer::default();
            let mut only_b = ContentIndex::default();
            only_b.replace_document("b", DocumentEntries::build(&[tok.words(&b)], &tok, 5));
            let mut both = only_b.clone();
            both.replace_document("a", DocumentEntries::build(&[tok.words(&a)], &tok, 5));
            both.remove_document("a");
            prop_assert_eq!(both, only_b);
        }

        /// Every stored snippet set is non-empty.
        #[test]
        fn snippet_sets_non_empty(a in arb_text()) {
            let tok = Tokenizer::default();
            let mut index = ContentIndex::default();
            index.replace_document("a", DocumentEntries::build(&[tok.words(&a)], &tok, 5));
            for key in index.shard_keys().collect::<Vec<_>>() {
                let shard = index.shard(key).unwrap();
                for term in shard.terms() {
                    for snippets in shard.get(term).unwrap().values() {
                        prop_assert!(!snippets.is_empty());
                    }
                }
            }
        }
    }
}
