//! Query engine over a single cached shard of the content snapshot.
//!
//! Only one shard is materialized at a time: a query whose leading character
//! differs from the cached shard's key discards it and loads the new one.
//! The cache is also dropped when the store has persisted since it was
//! loaded, so results follow reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::content::{ContentIndex, Postings, Shard};
use crate::error::IndexError;
use crate::store::IndexStore;
use crate::tokenizer::shard_key;

/// Document path → snippets.
pub type DocumentHits = BTreeMap<String, BTreeSet<String>>;

/// Term → document path → snippets.
pub type TermHits = BTreeMap<String, DocumentHits>;

struct CachedShard {
    key: char,
    generation: u64,
    shard: Shard,
}

pub struct QueryEngine {
    store: Arc<IndexStore>,
    cached: Option<CachedShard>,
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("loaded_shard", &self.loaded_shard_key())
            .finish_non_exhaustive()
    }
}

impl QueryEngine {
    pub fn new(store: Arc<IndexStore>) -> Self {
        QueryEngine { store, cached: None }
    }

    /// Key of the shard currently held in memory.
    pub fn loaded_shard_key(&self) -> Option<char> {
        self.cached.as_ref().map(|c| c.key)
    }

    // ─── Content queries ────────────────────────────────────────────

    /// Snippets per document for `term` (case-insensitive). Empty if absent.
    pub fn query_exact(&mut self, term: &str) -> Result<DocumentHits, IndexError> {
        let term = term.trim().to_lowercase();
        let Some(key) = shard_key(&term) else {
            return Ok(DocumentHits::new());
        };
        let start = Instant::now();
        let shard = self.ensure_shard(key)?;
        let hits = shard.get(&term).map(to_hits).unwrap_or_default();
        debug!(
            term = %term,
            shard = %key,
            documents = hits.len(),
            elapsed_ms = format_args!("{:.3}", start.elapsed().as_secs_f64() * 1000.0),
            "Exact query"
        );
        Ok(hits)
    }

    /// Terms matching `pattern` (case-insensitive) in one shard.
    ///
    /// A `^`-anchored leading literal (e.g. `^cat`) selects that shard; any
    /// other pattern (e.g. `.*ing` or `^[Cc]at`) searches whichever shard is
    /// loaded.
    /// Use `query_pattern_all_shards` to search every shard.
    pub fn query_pattern(&mut self, pattern: &str) -> Result<TermHits, IndexError> {
        let regex = compile(pattern)?;
        let Some(key) = pattern_shard_key(pattern).or(self.loaded_shard_key()) else {
            debug!(pattern, "Pattern query with no shard loaded");
            return Ok(TermHits::new());
        };
        let shard = self.ensure_shard(key)?;
        Ok(collect_matches(shard, &regex))
    }

    /// Terms matching `pattern` in the shard for `key`.
    pub fn query_pattern_in_shard(&mut self, pattern: &str, key: char) -> Result<TermHits, IndexError> {
        let regex = compile(pattern)?;
        let key = key.to_lowercase().next().unwrap_or(key);
        let shard = self.ensure_shard(key)?;
        Ok(collect_matches(shard, &regex))
    }

    /// Terms matching `pattern` across every shard, loading one at a time.
    pub fn query_pattern_all_shards(&mut self, pattern: &str) -> Result<TermHits, IndexError> {
        let regex = compile(pattern)?;
        let start = Instant::now();
        let keys = ContentIndex::snapshot_shard_keys(&self.store.config().content_snapshot)?;
        let mut hits = TermHits::new();
        for key in &keys {
            let shard = self.ensure_shard(*key)?;
            hits.extend(collect_matches(shard, &regex));
        }
        debug!(
            pattern,
            shards = keys.len(),
            terms = hits.len(),
            elapsed_ms = format_args!("{:.3}", start.elapsed().as_secs_f64() * 1000.0),
            "Cross-shard pattern query"
        );
        Ok(hits)
    }

    // ─── Filename queries ───────────────────────────────────────────

    /// Paths whose basename equals `name` (case-insensitive).
    pub fn query_filename(&self, name: &str) -> Result<Vec<String>, IndexError> {
        self.store.with_filenames(|f| {
            f.get(name.trim())
                .map(|paths| paths.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Basenames matching `pattern` (case-insensitive) with their paths.
    pub fn query_filename_pattern(&self, pattern: &str) -> Result<BTreeMap<String, Vec<String>>, IndexError> {
        let regex = compile(pattern)?;
        self.store.with_filenames(|f| {
            f.matching(&regex)
                .map(|(name, paths)| (name.clone(), paths.keys().cloned().collect()))
                .collect()
        })
    }

    fn ensure_shard(&mut self, key: char) -> Result<&Shard, IndexError> {
        let generation = self.store.generation();
        let cached = match self.cached.take() {
            Some(c) if c.key == key && c.generation == generation => c,
            previous => {
                if let Some(p) = previous {
                    debug!(from = %p.key, to = %key, "Swapping shard");
                }
                let shard = ContentIndex::load_shard(&self.store.config().content_snapshot, key)?;
                CachedShard { key, generation, shard }
            }
        };
        Ok(&self.cached.insert(cached).shard)
    }
}

fn compile(pattern: &str) -> Result<Regex, IndexError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| IndexError::InvalidRegex {
            pattern: pattern.to_string(),
            source: e,
        })
}

fn to_hits(postings: &Postings) -> DocumentHits {
    postings.iter().map(|(doc, snippets)| (doc.clone(), snippets.clone())).collect()
}

fn collect_matches(shard: &Shard, regex: &Regex) -> TermHits {
    shard
        .matching(regex)
        .map(|(term, postings)| (term.clone(), to_hits(postings)))
        .collect()
}

/// Shard implied by a `^`-anchored leading literal, lower-cased.
///
/// Only `^c...` (with optional `(?flags)` groups around the anchor) pins a
/// shard, and only when `c` is a plain alphanumeric that is not optional.
/// Classes, escapes, suffix patterns and top-level alternations yield `None`.
fn pattern_shard_key(pattern: &str) -> Option<char> {
    if has_top_level_alternation(pattern) {
        return None;
    }
    let mut rest = pattern;
    let mut anchored = false;
    loop {
        if let Some(after) = strip_flag_group(rest) {
            rest = after;
        } else if let Some(after) = rest.strip_prefix('^').filter(|_| !anchored) {
            anchored = true;
            rest = after;
        } else {
            break;
        }
    }
    if !anchored {
        return None;
    }
    let mut chars = rest.chars();
    let first = chars.next().filter(|c| c.is_alphanumeric())?;
    if matches!(chars.next(), Some('?' | '*' | '{')) {
        return None;
    }
    first.to_lowercase().next()
}

/// `rest` after a leading inline flag group such as `(?i)` or `(?-u)`.
fn strip_flag_group(rest: &str) -> Option<&str> {
    let inner = rest.strip_prefix("(?")?;
    let close = inner.find(')')?;
    inner[..close]
        .chars()
        .all(|c| c.is_ascii_alphabetic() || c == '-')
        .then(|| &inner[close + 1..])
}

fn has_top_level_alternation(pattern: &str) -> bool {
    let mut depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => depth = depth.saturating_sub(1),
            '|' if !in_class && depth == 0 => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, PathBuf, Arc<IndexStore>) {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("corpus")).unwrap();
        let root = crate::config::canonical_root(&tmp.path().join("corpus"));
        for (name, text) in files {
            fs::write(root.join(name), text).unwrap();
        }
        let config = IndexConfig::for_root(&root).with_snapshot_dir(tmp.path().join("snap"));
        let store = Arc::new(IndexStore::open(config).unwrap());
        store.reindex_all().unwrap();
        (tmp, root, store)
    }

    fn cats_and_dogs() -> (tempfile::TempDir, PathBuf, Arc<IndexStore>) {
        setup(&[
            ("doc1.txt", "Cats sat on mats. Cats purred."),
            ("doc2.txt", "Dogs barked loudly."),
        ])
    }

    fn key(path: &Path) -> String {
        crate::document_key(path)
    }

    #[test]
    fn test_exact_query_cats() {
        let (_tmp, root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(store);
        let hits = engine.query_exact("cats").unwrap();
        assert_eq!(hits.len(), 1);
        let snippets = &hits[&key(&root.join("doc1.txt"))];
        assert!(snippets.iter().any(|s| s.contains("Cats sat on mats Cats purred")));
        assert!(!hits.contains_key(&key(&root.join("doc2.txt"))));
    }

    #[test]
    fn test_exact_query_is_case_insensitive() {
        let (_tmp, _root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(store);
        assert_eq!(engine.query_exact("CATS").unwrap(), engine.query_exact(" cats ").unwrap());
    }

    #[test]
    fn test_exact_query_absent_term() {
        let (_tmp, _root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(store);
        assert!(engine.query_exact("zebras").unwrap().is_empty());
        assert!(engine.query_exact("").unwrap().is_empty());
    }

    #[test]
    fn test_shard_swaps_with_leading_character() {
        let (_tmp, _root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(store);
        assert_eq!(engine.loaded_shard_key(), None);
        engine.query_exact("cats").unwrap();
        assert_eq!(engine.loaded_shard_key(), Some('c'));
        engine.query_exact("dogs").unwrap();
        assert_eq!(engine.loaded_shard_key(), Some('d'));
    }

    #[test]
    fn test_pattern_query_caret_cat() {
        let (_tmp, _root, store) = setup(&[
            ("a.txt", "Cats and Category theory."),
            ("b.txt", "A Dog slept."),
        ]);
        let mut engine = QueryEngine::new(store);
        let hits = engine.query_pattern("^cat").unwrap();
        let terms: Vec<&String> = hits.keys().collect();
        assert_eq!(terms, vec!["category", "cats"]);
    }

    #[test]
    fn test_pattern_without_literal_uses_loaded_shard() {
        let (_tmp, _root, store) = setup(&[("a.txt", "Cats and Category theory. A Dog slept.")]);
        let mut engine = QueryEngine::new(Arc::clone(&store));
        assert!(engine.query_pattern(".*s$").unwrap().is_empty(), "nothing loaded yet");
        engine.query_exact("dog").unwrap();
        assert!(engine.query_pattern(".*s$").unwrap().is_empty());
        engine.query_exact("cats").unwrap();
        assert_eq!(engine.query_pattern(".*s$").unwrap().keys().collect::<Vec<_>>(), vec!["cats"]);
    }

    #[test]
    fn test_pattern_all_shards() {
        let (_tmp, _root, store) = setup(&[("a.txt", "Cats, Dogs and Bats.")]);
        let mut engine = QueryEngine::new(store);
        let hits = engine.query_pattern_all_shards("s$").unwrap();
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["bats", "cats", "dogs"]);
        assert!(engine.query_pattern_in_shard("s$", 'B').unwrap().contains_key("bats"));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let (_tmp, _root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(store);
        assert!(matches!(engine.query_pattern("cat("), Err(IndexError::InvalidRegex { .. })));
    }

    #[test]
    fn test_query_does_not_touch_other_shards() {
        let (_tmp, _root, store) = cats_and_dogs();
        // Break the second LZ4 frame in the snapshot (the 'd' shard).
        let path = store.config().content_snapshot.clone();
        let mut raw = fs::read(&path).unwrap();
        let frames: Vec<usize> = raw
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == [0x04, 0x22, 0x4D, 0x18])
            .map(|(i, _)| i)
            .collect();
        assert_eq!(frames.len(), 2);
        raw[frames[1]..frames[1] + 4].fill(0);
        fs::write(&path, &raw).unwrap();

        let mut engine = QueryEngine::new(store);
        assert_eq!(engine.query_exact("cats").unwrap().len(), 1);
        assert!(engine.query_exact("dogs").is_err());
    }

    #[test]
    fn test_cache_reloads_after_persist() {
        let (_tmp, root, store) = cats_and_dogs();
        let mut engine = QueryEngine::new(Arc::clone(&store));
        assert_eq!(engine.query_exact("cats").unwrap().len(), 1);

        fs::write(root.join("doc3.txt"), "Cats again.").unwrap();
        store.reconcile().unwrap();
        assert_eq!(engine.query_exact("cats").unwrap().len(), 2);
    }

    #[test]
    fn test_deleted_document_disappears_from_filename_query() {
        let (_tmp, root, store) = cats_and_dogs();
        let engine = QueryEngine::new(Arc::clone(&store));
        let doc2 = root.join("doc2.txt");
        assert_eq!(engine.query_filename("doc2.txt").unwrap(), vec![key(&doc2)]);

        fs::remove_file(&doc2).unwrap();
        let stale = store.stale_documents().unwrap();
        assert!(stale.iter().any(|s| s.path == key(&doc2)));
        store.reconcile().unwrap();

        assert!(engine.query_filename("doc2.txt").unwrap().is_empty());
        let mut engine = QueryEngine::new(store);
        assert!(engine.query_exact("dogs").unwrap().is_empty());
    }

    #[test]
    fn test_filename_pattern() {
        let (_tmp, _root, store) = cats_and_dogs();
        let engine = QueryEngine::new(store);
        let hits = engine.query_filename_pattern(r"^DOC\d").unwrap();
        assert_eq!(hits.keys().collect::<Vec<_>>(), vec!["doc1.txt", "doc2.txt"]);
    }

    #[test]
    fn test_unanchored_patterns_search_loaded_shard() {
        let (_tmp, _root, store) = setup(&[("a.txt", "Cats and Category theory. An Apple.")]);
        let mut engine = QueryEngine::new(store);
        engine.query_exact("cats").unwrap();

        let terms = |hits: TermHits| hits.into_keys().collect::<Vec<_>>();
        assert_eq!(terms(engine.query_pattern("^[Cc]at").unwrap()), vec!["category", "cats"]);
        assert_eq!(terms(engine.query_pattern("x?cat").unwrap()), vec!["category", "cats"]);
        assert_eq!(terms(engine.query_pattern("ory$").unwrap()), vec!["category"]);
        assert!(engine.query_pattern("ing$").unwrap().is_empty());
        assert_eq!(engine.loaded_shard_key(), Some('c'));

        assert_eq!(terms(engine.query_pattern("^app").unwrap()), vec!["apple"]);
        assert_eq!(engine.loaded_shard_key(), Some('a'));
    }

    #[test]
    fn test_pattern_shard_key() {
        assert_eq!(pattern_shard_key("^cat"), Some('c'));
        assert_eq!(pattern_shard_key("^Cat+"), Some('c'));
        assert_eq!(pattern_shard_key("(?i)^Dog"), Some('d'));
        assert_eq!(pattern_shard_key("^(?i)dog"), Some('d'));
        assert_eq!(pattern_shard_key("^[Cc]at"), None);
        assert_eq!(pattern_shard_key("^x?cat"), None);
        assert_eq!(pattern_shard_key("^c*at"), None);
        assert_eq!(pattern_shard_key(r"^\bfox"), None);
        assert_eq!(pattern_shard_key("^cat|dog"), None);
        assert_eq!(pattern_shard_key("^(cat|dog)"), None);
        assert_eq!(pattern_shard_key("(?i)Dog"), None);
        assert_eq!(pattern_shard_key("x?cat"), None);
        assert_eq!(pattern_shard_key(".*s$"), None);
        assert_eq!(pattern_shard_key("ing$"), None);
        assert_eq!(pattern_shard_key("cat"), None);
    }
}
