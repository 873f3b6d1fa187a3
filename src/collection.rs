//! Lazily pulled, bounded collection of [`Diff`]s.
//!
//! A [`DiffCollection`] wraps a fallible source of raw records and only
//! pulls as far as a query needs. Every pulled record is counted against
//! the file, line and byte limits; once a limit is crossed the source is
//! dropped and the collection reports its size as a lower bound.

use crate::diff::Diff;
use crate::diff::raw::RawDiff;
use crate::options::{CollectionOptions, Limits};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::Infallible;

/// In-memory record source used by [`DiffCollection::from_records`]
pub type RecordSource<R> = std::iter::Map<std::vec::IntoIter<R>, fn(R) -> Result<R, Infallible>>;

/// Why a collection stopped pulling early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowReason {
    MaxFiles,
    MaxLines,
    MaxBytes,
    /// The source itself reported that it stopped at its own limits
    Marker,
}

/// Safe limits that were crossed, so later diffs got collapsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SafeLimitHits {
    files: bool,
    lines: bool,
    bytes: bool,
}

pub struct DiffCollection<I> {
    /// `None` once exhausted or overflowed
    source: Option<I>,
    options: CollectionOptions,
    limits: Limits,
    entries: Vec<Diff>,
    /// Raw records pulled so far, including hidden ones before the offset
    pulled: usize,
    line_count: usize,
    byte_count: usize,
    overflow: Option<OverflowReason>,
    safe_hits: SafeLimitHits,
    single_entry: bool,
}

impl<'a, R> DiffCollection<RecordSource<R>>
where
    R: Into<RawDiff<'a>>,
{
    /// Collect over an in-memory list of records.
    pub fn from_records(records: Vec<R>, options: CollectionOptions) -> Self {
        let ok: fn(R) -> Result<R, Infallible> = Ok;
        Self::new(records.into_iter().map(ok), options)
    }
}

impl<'a, I, R, E> DiffCollection<I>
where
    I: Iterator<Item = Result<R, E>>,
    R: Into<RawDiff<'a>>,
{
    /// Wrap `source` without pulling anything from it.
    pub fn new(source: impl IntoIterator<IntoIter = I>, options: CollectionOptions) -> Self {
        let source = source.into_iter();
        let hint = source.size_hint();
        let limits = options.resolve_limits();

        DiffCollection {
            source: (hint != (0, Some(0))).then_some(source),
            options,
            limits,
            entries: Vec::new(),
            pulled: 0,
            line_count: 0,
            byte_count: 0,
            overflow: None,
            safe_hits: SafeLimitHits::default(),
            single_entry: hint == (1, Some(1)),
        }
    }

    /// Pull and account for one raw record.
    ///
    /// Returns `false` once the source is exhausted or a limit stopped the
    /// collection. A record before the offset is counted but not stored.
    fn advance(&mut self) -> Result<bool, E> {
        let Some(source) = self.source.as_mut() else {
            return Ok(false);
        };
        let raw: RawDiff<'a> = match source.next() {
            Some(record) => record?.into(),
            None => {
                self.source = None;
                return Ok(false);
            }
        };

        let index = self.pulled;
        self.pulled += 1;

        if raw.is_overflow_marker() {
            self.stop(OverflowReason::Marker);
            return Ok(false);
        }

        let enforce = self.options.limits;
        if enforce && index >= self.limits.max_files {
            self.stop(OverflowReason::MaxFiles);
            return Ok(false);
        }

        let expanded = self.single_entry || !enforce || self.options.expanded;
        let mut diff = Diff::with_policy(raw, expanded, &self.options.patch);

        if let Some(generated_files) = &self.options.generated_files {
            diff.set_generated(generated_files.contains(diff.old_path()));
        }
        if self.options.collapse_generated && diff.generated() == Some(true) {
            diff.collapse();
        }
        if !expanded && self.over_safe_limits(index) && diff.line_count() > 0 {
            tracing::debug!(path = %diff.new_path(), index, "safe limits exceeded, collapsing");
            diff.collapse();
        }

        self.line_count += diff.line_count();
        self.byte_count += diff.original_bytesize();

        // A zero bound overflows on the first record, even one without content.
        if enforce {
            if self.limits.max_lines == 0 || self.line_count > self.limits.max_lines {
                self.stop(OverflowReason::MaxLines);
                return Ok(false);
            }
            if self.limits.max_bytes == 0 || self.byte_count > self.limits.max_bytes {
                self.stop(OverflowReason::MaxBytes);
                return Ok(false);
            }
        }

        if index >= self.options.offset_index {
            self.entries.push(diff);
        }
        Ok(true)
    }

    fn over_safe_limits(&mut self, files: usize) -> bool {
        if files >= self.limits.safe_max_files {
            self.safe_hits.files = true;
        } else if self.line_count > self.limits.safe_max_lines {
            self.safe_hits.lines = true;
        } else if self.byte_count >= self.limits.safe_max_bytes {
            self.safe_hits.bytes = true;
        } else {
            return false;
        }
        true
    }

    fn stop(&mut self, reason: OverflowReason) {
        tracing::debug!(
            ?reason,
            files = self.pulled,
            lines = self.line_count,
            bytes = self.byte_count,
            "diff collection overflowed"
        );
        self.overflow = Some(reason);
        self.source = None;
    }

    fn populate(&mut self) -> Result<(), E> {
        while self.advance()? {}
        Ok(())
    }

    /// The entry at `index`, pulling only as far as needed to reach it.
    pub fn get(&mut self, index: usize) -> Result<Option<&Diff>, E> {
        while self.entries.len() <= index {
            if !self.advance()? {
                break;
            }
        }
        Ok(self.entries.get(index))
    }

    /// Visit every exposed diff in order, replaying cached entries first.
    pub fn each<F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(usize, &Diff),
    {
        let mut index = 0;
        while let Some(diff) = self.get(index)? {
            f(index, diff);
            index += 1;
        }
        Ok(())
    }

    /// Whether any exposed diff matches, stopping at the first match.
    pub fn any<F>(&mut self, mut predicate: F) -> Result<bool, E>
    where
        F: FnMut(&Diff) -> bool,
    {
        let mut index = 0;
        while let Some(diff) = self.get(index)? {
            if predicate(diff) {
                return Ok(true);
            }
            index += 1;
        }
        Ok(false)
    }

    /// Whether the source yielded no records at all.
    ///
    /// Pulls at most one record; a known-empty source is never touched.
    pub fn is_empty(&mut self) -> Result<bool, E> {
        if self.pulled == 0 {
            self.advance()?;
        }
        Ok(self.pulled == 0)
    }

    /// Number of exposed entries once the collection is fully consumed.
    pub fn size(&mut self) -> Result<usize, E> {
        self.populate()?;
        Ok(self.entries.len())
    }

    /// `size` as a string, suffixed with `+` when it is only a lower bound.
    pub fn real_size(&mut self) -> Result<String, E> {
        let size = self.size()?;
        Ok(if self.overflow.is_some() {
            format!("{size}+")
        } else {
            size.to_string()
        })
    }

    pub fn overflow(&mut self) -> Result<bool, E> {
        Ok(self.overflow_reason()?.is_some())
    }

    pub fn overflow_reason(&mut self) -> Result<Option<OverflowReason>, E> {
        self.populate()?;
        Ok(self.overflow)
    }

    pub fn overflow_max_files(&mut self) -> Result<bool, E> {
        Ok(self.overflow_reason()? == Some(OverflowReason::MaxFiles))
    }

    pub fn overflow_max_lines(&mut self) -> Result<bool, E> {
        Ok(self.overflow_reason()? == Some(OverflowReason::MaxLines))
    }

    pub fn overflow_max_bytes(&mut self) -> Result<bool, E> {
        Ok(self.overflow_reason()? == Some(OverflowReason::MaxBytes))
    }

    pub fn collapsed_safe_files(&mut self) -> Result<bool, E> {
        self.populate()?;
        Ok(self.safe_hits.files)
    }

    pub fn collapsed_safe_lines(&mut self) -> Result<bool, E> {
        self.populate()?;
        Ok(self.safe_hits.lines)
    }

    pub fn collapsed_safe_bytes(&mut self) -> Result<bool, E> {
        self.populate()?;
        Ok(self.safe_hits.bytes)
    }

    /// Lines counted across every pulled record, including the one that
    /// tripped an overflow and those hidden before the offset.
    pub fn line_count(&mut self) -> Result<usize, E> {
        self.populate()?;
        Ok(self.line_count)
    }

    /// Replace entries in place; `None` from `f` leaves an entry unchanged.
    ///
    /// Consumes the rest of the source first, so later queries never pull.
    pub fn decorate<F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Diff) -> Option<Diff>,
    {
        self.populate()?;
        for entry in &mut self.entries {
            if let Some(decorated) = f(entry) {
                *entry = decorated;
            }
        }
        Ok(())
    }

    pub fn sort_by<F>(&mut self, compare: F) -> Result<(), E>
    where
        F: FnMut(&Diff, &Diff) -> Ordering,
    {
        self.populate()?;
        self.entries.sort_by(compare);
        Ok(())
    }

    pub fn to_vec(&mut self) -> Result<Vec<Diff>, E> {
        self.populate()?;
        Ok(self.entries.clone())
    }

    pub fn into_vec(mut self) -> Result<Vec<Diff>, E> {
        self.populate()?;
        Ok(self.entries)
    }

    /// Serializable summary of the fully consumed collection.
    pub fn export(&mut self) -> Result<CollectionExport, E> {
        self.populate()?;
        Ok(CollectionExport {
            size: self.entries.len(),
            real_size: self.real_size()?,
            overflow: self.overflow.is_some(),
            overflow_reason: self.overflow,
            line_count: self.line_count,
            diffs: self.entries.iter().map(Diff::export).collect(),
        })
    }
}

impl<I> DiffCollection<I> {
    /// Entries pulled so far, without pulling more.
    pub fn materialized(&self) -> &[Diff] {
        &self.entries
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }
}

impl<I> std::fmt::Debug for DiffCollection<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffCollection")
            .field("entries", &self.entries.len())
            .field("pulled", &self.pulled)
            .field("line_count", &self.line_count)
            .field("byte_count", &self.byte_count)
            .field("overflow", &self.overflow)
            .field("exhausted", &self.source.is_none())
            .finish_non_exhaustive()
    }
}

/// What a renderer needs to know about a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionExport {
    pub size: usize,
    pub real_size: String,
    pub overflow: bool,
    pub overflow_reason: Option<OverflowReason>,
    pub line_count: usize,
    pub diffs: Vec<crate::diff::DiffExport>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::PatchLimits;
    use crate::diff::raw::{DiffFields, WireDiff};
    use crate::diff::stitch::{DiffStitcher, WireChunk};
    use similar_asserts::assert_eq;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    /// A record whose patch is `line_count` lines of `line_length` bytes each
    fn fake_diff(line_length: usize, line_count: usize) -> DiffFields {
        DiffFields {
            patch: format!("{}\n", "a".repeat(line_length)).repeat(line_count),
            ..Default::default()
        }
    }

    fn options(max_files: usize, max_lines: usize) -> CollectionOptions {
        CollectionOptions {
            max_files,
            max_lines,
            ..Default::default()
        }
    }

    fn repeated(count: usize, line_length: usize, line_count: usize) -> Vec<DiffFields> {
        vec![fake_diff(line_length, line_count); count]
    }

    fn chunk(path: &str) -> WireChunk {
        WireChunk {
            from_path: path.as_bytes().to_vec(),
            to_path: path.as_bytes().to_vec(),
            raw_patch_data: b"+x\n".to_vec(),
            ..Default::default()
        }
    }

    fn wire(path: &str, patch: &str) -> WireDiff {
        WireDiff {
            from_path: path.as_bytes().to_vec(),
            to_path: path.as_bytes().to_vec(),
            old_mode: 0o100644,
            new_mode: 0o100644,
            from_id: "357406f3075a57708d0163752905cc1576fceacc".to_string(),
            to_id: "8e5177d718c561d36efde08bad36b43687ee6bf0".to_string(),
            patch: patch.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    /// Source that counts how often it was pulled from
    struct CountingSource {
        remaining: usize,
        pulls: Rc<Cell<usize>>,
    }

    impl Iterator for CountingSource {
        type Item = Result<DiffFields, Infallible>;

        fn next(&mut self) -> Option<Self::Item> {
            self.pulls.set(self.pulls.get() + 1);
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(Ok(fake_diff(1, 1)))
        }
    }

    #[test]
    fn few_files_and_lines() {
        let mut collection = DiffCollection::from_records(repeated(3, 1, 10), options(10, 100));

        assert!(!collection.overflow().unwrap());
        assert!(!collection.is_empty().unwrap());
        assert_eq!(collection.size().unwrap(), 3);
        assert_eq!(collection.real_size().unwrap(), "3");
        assert_eq!(collection.line_count().unwrap(), 30);
        assert!(!collection.overflow_max_files().unwrap());
        assert!(!collection.overflow_max_lines().unwrap());
        assert!(!collection.overflow_max_bytes().unwrap());
    }

    #[test]
    fn size_does_not_change_after_peeking() {
        let mut collection = DiffCollection::from_records(repeated(3, 1, 1), options(10, 100));

        assert!(collection.any(|_| true).unwrap());
        assert_eq!(collection.materialized().len(), 1);
        assert_eq!(collection.size().unwrap(), 3);
    }

    #[test]
    fn too_many_lines_in_one_file() {
        let mut collection = DiffCollection::from_records(repeated(1, 1, 1000), options(10, 100));

        assert!(collection.overflow().unwrap());
        assert!(collection.overflow_max_lines().unwrap());
        assert!(!collection.is_empty().unwrap());
        assert_eq!(collection.real_size().unwrap(), "0+");
        assert_eq!(collection.line_count().unwrap(), 1000);
    }

    #[test]
    fn too_many_files() {
        let mut collection = DiffCollection::from_records(repeated(11, 1, 1), options(10, 100));

        assert!(collection.overflow().unwrap());
        assert!(collection.overflow_max_files().unwrap());
        assert_eq!(collection.size().unwrap(), 10);
        assert_eq!(collection.real_size().unwrap(), "10+");
        assert_eq!(collection.line_count().unwrap(), 10);
    }

    #[test]
    fn too_many_files_and_lines() {
        let mut collection = DiffCollection::from_records(repeated(11, 1, 30), options(10, 100));

        assert!(collection.overflow_max_lines().unwrap());
        assert_eq!(collection.real_size().unwrap(), "3+");
        assert_eq!(collection.line_count().unwrap(), 120);
    }

    #[test]
    fn exactly_max_files_does_not_overflow() {
        let mut collection = DiffCollection::from_records(repeated(10, 1, 1), options(10, 100));

        assert!(!collection.overflow().unwrap());
        assert_eq!(collection.real_size().unwrap(), "10");
    }

    #[test]
    fn too_many_bytes() {
        let mut collection = DiffCollection::from_records(repeated(10, 5200, 1), options(10, 100));

        assert!(collection.overflow_max_bytes().unwrap());
        assert_eq!(collection.real_size().unwrap(), "9+");
        assert_eq!(collection.size().unwrap(), 9);
        assert_eq!(collection.line_count().unwrap(), 10);
    }

    #[test]
    fn disabled_limits_never_overflow() {
        for records in [repeated(11, 1, 30), repeated(10, 5200, 1), repeated(1, 1, 1000)] {
            let count = records.len();
            let mut collection = DiffCollection::from_records(
                records,
                CollectionOptions {
                    limits: false,
                    ..options(10, 100)
                },
            );

            assert!(!collection.overflow().unwrap());
            assert_eq!(collection.real_size().unwrap(), count.to_string());
            assert!(!collection.overflow_max_files().unwrap());
        }
    }

    #[test]
    fn empty_collection() {
        let mut collection =
            DiffCollection::from_records(Vec::<DiffFields>::new(), CollectionOptions::default());

        assert!(collection.is_empty().unwrap());
        assert!(!collection.overflow().unwrap());
        assert_eq!(collection.size().unwrap(), 0);
        assert_eq!(collection.real_size().unwrap(), "0");
        assert_eq!(collection.line_count().unwrap(), 0);
    }

    #[test]
    fn known_empty_source_is_never_pulled() {
        let pulls = Rc::new(Cell::new(0));
        let source = CountingSource {
            remaining: 0,
            pulls: Rc::clone(&pulls),
        };
        // An unknown-length source has to be pulled once to find out.
        let mut collection = DiffCollection::new(source, CollectionOptions::default());
        assert!(collection.is_empty().unwrap());
        assert_eq!(pulls.get(), 1);

        let mut known = DiffCollection::new(
            std::iter::empty::<Result<DiffFields, Infallible>>(),
            CollectionOptions::default(),
        );
        assert!(known.is_empty().unwrap());
        assert_eq!(known.real_size().unwrap(), "0");
    }

    #[test]
    fn zero_limits_overflow_immediately() {
        let mut collection = DiffCollection::from_records(repeated(1, 1, 1), options(0, 100));

        assert!(collection.overflow().unwrap());
        assert_eq!(collection.real_size().unwrap(), "0+");
    }

    fn rename_only() -> DiffFields {
        DiffFields {
            old_path: "old.txt".to_string(),
            new_path: "new.txt".to_string(),
            renamed_file: true,
            ..Default::default()
        }
    }

    #[test]
    fn zero_line_limit_overflows_without_content() {
        let mut collection = DiffCollection::from_records(vec![rename_only()], options(10, 0));

        assert!(collection.overflow_max_lines().unwrap());
        assert_eq!(collection.real_size().unwrap(), "0+");
    }

    #[test]
    fn zero_byte_limit_overflows_without_content() {
        let options = CollectionOptions {
            max_bytes: Some(0),
            ..options(10, 100)
        };
        let mut collection = DiffCollection::from_records(vec![rename_only()], options);

        assert!(collection.overflow_max_bytes().unwrap());
        assert_eq!(collection.real_size().unwrap(), "0+");
    }

    #[test]
    fn transport_too_large_counts_like_a_large_patch() {
        let sent = wire("dump.sql", &"a".repeat(204800));
        let withheld = WireDiff {
            too_large: true,
            ..wire("dump.sql", "")
        };

        for record in [sent, withheld] {
            let mut collection = DiffCollection::from_records(vec![record], options(10, 100));

            assert!(collection.overflow_max_bytes().unwrap());
            assert_eq!(collection.real_size().unwrap(), "0+");
        }
    }

    #[test]
    fn stream_error_mid_diff_does_not_leak_fragments() {
        let chunks: Vec<Result<WireChunk, String>> = vec![
            Ok(WireChunk {
                raw_patch_data: b"+a".to_vec(),
                ..chunk("a.txt")
            }),
            Err("stream reset".to_string()),
            Ok(WireChunk {
                raw_patch_data: b"\n".to_vec(),
                end_of_patch: true,
                ..WireChunk::default()
            }),
            Ok(WireChunk {
                end_of_patch: true,
                ..chunk("b.txt")
            }),
        ];
        let stitcher = DiffStitcher::new(chunks.into_iter());
        let mut collection = DiffCollection::new(stitcher, options(10, 100));

        assert_eq!(collection.size().unwrap_err(), "stream reset");
        assert!(collection.to_vec().unwrap().is_empty());
    }

    #[test]
    fn marker_after_open_diff_overflows() {
        let chunks: Vec<Result<WireChunk, Infallible>> = vec![
            Ok(chunk("a.txt")),
            Ok(WireChunk {
                overflow_marker: true,
                ..WireChunk::default()
            }),
        ];
        let stitcher = DiffStitcher::new(chunks.into_iter());
        let mut collection = DiffCollection::new(stitcher, options(10, 100));

        assert_eq!(collection.overflow_reason().unwrap(), Some(OverflowReason::Marker));
        assert_eq!(collection.real_size().unwrap(), "1+");
        assert_eq!(collection.get(0).unwrap().unwrap().new_path(), "a.txt");
    }

    #[test]
    fn decorate_replaces_entries() {
        let mut collection = DiffCollection::from_records(repeated(3, 1, 1), options(10, 100));
        let mut count = 0;

        collection
            .decorate(|diff| {
                count += 1;
                let mut decorated = diff.clone();
                decorated.set_generated(count % 2 == 0);
                Some(decorated)
            })
            .unwrap();

        assert_eq!(count, 3);
        let generated: Vec<_> = collection.to_vec().unwrap().iter().map(Diff::generated).collect();
        assert_eq!(generated, vec![Some(false), Some(true), Some(false)]);
    }

    #[test]
    fn decorate_none_keeps_entries() {
        let mut collection = DiffCollection::from_records(repeated(2, 1, 1), options(10, 100));
        let before = collection.to_vec().unwrap();

        collection.decorate(|_| None).unwrap();

        assert_eq!(collection.to_vec().unwrap(), before);
    }

    #[test]
    fn decorate_avoids_further_source_iteration() {
        let pulls = Rc::new(Cell::new(0));
        let source = CountingSource {
            remaining: 3,
            pulls: Rc::clone(&pulls),
        };
        let mut collection = DiffCollection::new(source, options(10, 100));

        collection.decorate(|diff| Some(diff.clone())).unwrap();
        let pulled = pulls.get();

        assert!(!collection.overflow().unwrap());
        assert_eq!(collection.size().unwrap(), 3);
        assert_eq!(collection.real_size().unwrap(), "3");
        assert_eq!(pulls.get(), pulled);
    }

    #[test]
    fn cached_entries_survive_overflow() {
        let mut collection = DiffCollection::from_records(repeated(11, 1, 1), options(10, 100));

        let first = collection.get(0).unwrap().cloned();
        assert!(collection.overflow().unwrap());
        assert_eq!(collection.get(0).unwrap().cloned(), first);
        assert!(collection.get(10).unwrap().is_none());
    }

    #[test]
    fn too_large_diffs_are_yielded_pruned() {
        let records = vec![DiffFields {
            patch: "a".repeat(204800),
            ..Default::default()
        }];
        let mut collection = DiffCollection::from_records(records, CollectionOptions::default());
        let diff = collection.get(0).unwrap().unwrap();

        assert!(diff.is_too_large());
        assert_eq!(diff.patch(), "");
    }

    #[test]
    fn pruned_bytes_still_count_against_byte_limit() {
        let records = vec![
            DiffFields {
                patch: "a".repeat(204800),
                ..Default::default()
            },
            fake_diff(1, 1),
        ];
        let mut collection = DiffCollection::from_records(records, options(10, 100));

        assert!(collection.overflow_max_bytes().unwrap());
        assert_eq!(collection.real_size().unwrap(), "0+");
    }

    #[test]
    fn quite_large_diff_kept_when_expanded() {
        let records = vec![fake_diff(1, 1), DiffFields {
            patch: "a".repeat(20480),
            ..Default::default()
        }];
        let mut collection = DiffCollection::from_records(records, CollectionOptions::default());

        assert_eq!(collection.to_vec().unwrap()[1].patch().len(), 20480);
    }

    #[test]
    fn single_file_collection_is_never_collapsed() {
        let records = vec![DiffFields {
            patch: "a".repeat(20480),
            ..Default::default()
        }];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                expanded: false,
                ..Default::default()
            },
        );

        let diff = collection.get(0).unwrap().unwrap();
        assert!(!diff.is_collapsed());
        assert!(diff.is_expanded());
    }

    #[test]
    fn multi_file_collection_collapses_quite_large_diffs() {
        let records = vec![
            DiffFields {
                patch: "b".to_string(),
                ..Default::default()
            },
            DiffFields {
                patch: "a".repeat(20480),
                ..Default::default()
            },
        ];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                expanded: false,
                ..Default::default()
            },
        );

        let diffs = collection.to_vec().unwrap();
        assert_eq!(diffs[0].patch(), "b");
        assert!(diffs[1].is_collapsed());
        assert_eq!(diffs[1].patch(), "");
    }

    #[test]
    fn disabled_limits_keep_quite_large_diffs() {
        let records = vec![fake_diff(1, 1), DiffFields {
            patch: "a".repeat(20480),
            ..Default::default()
        }];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                expanded: false,
                limits: false,
                ..Default::default()
            },
        );

        assert_eq!(collection.to_vec().unwrap()[1].patch().len(), 20480);
    }

    #[test]
    fn safe_file_limit_collapses_later_diffs() {
        let mut collection = DiffCollection::from_records(
            repeated(4, 1, 1),
            CollectionOptions {
                expanded: false,
                safe_max_files: 2,
                ..options(10, 100)
            },
        );

        let patches: Vec<String> = collection
            .to_vec()
            .unwrap()
            .iter()
            .map(|d| d.patch().to_string())
            .collect();
        assert_eq!(patches, vec!["a\n", "a\n", "", ""]);
        assert!(collection.collapsed_safe_files().unwrap());
        assert!(!collection.collapsed_safe_lines().unwrap());
    }

    #[test]
    fn safe_line_limit_collapses_later_diffs() {
        let records = vec![
            fake_diff(1, 45),
            fake_diff(1, 45),
            fake_diff(1, 20480),
            fake_diff(1, 1),
        ];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                expanded: false,
                safe_max_lines: 80,
                ..options(10, 100)
            },
        );

        let diffs = collection.to_vec().unwrap();
        assert_eq!(diffs.len(), 4);
        assert!(diffs[..2].iter().all(|d| !d.patch().is_empty()));
        assert!(diffs[2..].iter().all(|d| d.patch().is_empty()));
        assert!(collection.collapsed_safe_lines().unwrap());
        assert!(!collection.overflow().unwrap());
    }

    #[test]
    fn safe_byte_limit_collapses_later_diffs() {
        let records = vec![
            fake_diff(5, 10),
            fake_diff(5000, 10),
            fake_diff(5, 10),
            fake_diff(5, 10),
        ];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                expanded: false,
                safe_max_files: 4,
                patch: PatchLimits {
                    size_limit: 1024 * 1024,
                    collapse_limit: 100 * 1024,
                    ..Default::default()
                },
                ..options(10, 3000)
            },
        );

        let diffs = collection.to_vec().unwrap();
        assert!(diffs[..2].iter().all(|d| !d.patch().is_empty()));
        assert!(diffs[2..].iter().all(|d| d.is_collapsed()));
        assert!(collection.collapsed_safe_bytes().unwrap());
        assert!(!collection.collapsed_safe_files().unwrap());
    }

    #[test]
    fn offset_hides_leading_diffs() {
        let records = vec![fake_diff(1, 1), fake_diff(2, 2), fake_diff(3, 3), fake_diff(4, 4)];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                offset_index: 2,
                ..options(10, 100)
            },
        );

        let patches: Vec<String> = collection
            .to_vec()
            .unwrap()
            .iter()
            .map(|d| d.patch().to_string())
            .collect();
        assert_eq!(patches, vec![fake_diff(3, 3).patch, fake_diff(4, 4).patch]);
        assert_eq!(collection.line_count().unwrap(), 10);
    }

    #[test]
    fn offset_past_the_end_yields_nothing() {
        let records = vec![wire(".gitmodules", "a"), wire(".gitignore", "b"), wire("README", "c")];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                offset_index: 3,
                ..Default::default()
            },
        );

        assert!(!collection.is_empty().unwrap());
        assert_eq!(collection.size().unwrap(), 0);
        assert_eq!(collection.real_size().unwrap(), "0");
    }

    #[test]
    fn generated_files_are_flagged() {
        let records = vec![
            wire(".gitmodules", "aaaaaaaaaa"),
            wire(".gitignore", "aaaa"),
            wire("README", "aa"),
        ];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                generated_files: Some(BTreeSet::from([".gitmodules".to_string()])),
                ..Default::default()
            },
        );

        let generated: Vec<_> = collection.to_vec().unwrap().iter().map(Diff::generated).collect();
        assert_eq!(generated, vec![Some(true), Some(false), Some(false)]);
    }

    #[test]
    fn generated_stays_unknown_without_a_list() {
        let mut collection =
            DiffCollection::from_records(vec![wire("README", "a")], CollectionOptions::default());
        assert_eq!(collection.get(0).unwrap().unwrap().generated(), None);

        let mut from_fields = DiffCollection::from_records(
            vec![DiffFields {
                patch: "some content".to_string(),
                generated: Some(true),
                ..Default::default()
            }],
            CollectionOptions::default(),
        );
        assert_eq!(from_fields.get(0).unwrap().unwrap().generated(), Some(true));
    }

    #[test]
    fn collapse_generated_collapses_generated_diffs() {
        let records = vec![wire("yarn.lock", "+a\n"), wire("app.rs", "+b\n")];
        let mut collection = DiffCollection::from_records(
            records,
            CollectionOptions {
                generated_files: Some(BTreeSet::from(["yarn.lock".to_string()])),
                collapse_generated: true,
                ..Default::default()
            },
        );

        let diffs = collection.to_vec().unwrap();
        assert!(diffs[0].is_collapsed());
        assert!(!diffs[1].is_collapsed());
    }

    #[test]
    fn overflow_marker_stops_collection() {
        let records = vec![
            wire("a.txt", "+a\n"),
            WireDiff::overflow_marker(),
            wire("b.txt", "+b\n"),
        ];
        let mut collection = DiffCollection::from_records(records, CollectionOptions::default());

        assert_eq!(collection.overflow_reason().unwrap(), Some(OverflowReason::Marker));
        assert_eq!(collection.real_size().unwrap(), "1+");
    }

    #[test]
    fn source_errors_propagate_and_pulling_resumes() {
        let records: Vec<Result<DiffFields, String>> = vec![
            Ok(fake_diff(1, 1)),
            Err("connection reset".to_string()),
            Ok(fake_diff(1, 1)),
        ];
        let mut collection = DiffCollection::new(records, options(10, 100));

        assert!(collection.get(0).unwrap().is_some());
        assert_eq!(collection.size().unwrap_err(), "connection reset");
        assert_eq!(collection.size().unwrap(), 2);
    }

    #[test]
    fn each_replays_cached_entries() {
        let mut collection = DiffCollection::from_records(repeated(3, 1, 1), options(10, 100));
        collection.get(1).unwrap();

        let mut seen = Vec::new();
        collection.each(|index, _| seen.push(index)).unwrap();
        collection.each(|index, _| seen.push(index)).unwrap();

        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn sort_by_reorders_entries() {
        let records = vec![wire("b.txt", "+b\n"), wire("a.txt", "+a\n")];
        let mut collection = DiffCollection::from_records(records, CollectionOptions::default());

        collection.sort_by(|a, b| a.new_path().cmp(b.new_path())).unwrap();

        let paths: Vec<String> = collection
            .into_vec()
            .unwrap()
            .iter()
            .map(|d| d.new_path().to_string())
            .collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn export_summarizes_collection() {
        let mut collection = DiffCollection::from_records(repeated(3, 1, 1), options(2, 100));
        let export = collection.export().unwrap();

        assert_eq!(export.size, 2);
        assert_eq!(export.real_size, "2+");
        assert!(export.overflow);
        assert_eq!(export.overflow_reason, Some(OverflowReason::MaxFiles));
        assert_eq!(export.diffs.len(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn records() -> impl Strategy<Value = Vec<DiffFields>> {
            prop::collection::vec((1usize..200, 0usize..40), 0..40)
                .prop_map(|shapes| {
                    shapes
                        .into_iter()
                        .map(|(len, lines)| fake_diff(len, lines))
                        .collect()
                })
        }

        proptest! {
            #[test]
            fn size_never_exceeds_max_files(
                records in records(),
                max_files in 0usize..20,
                max_lines in 0usize..400,
            ) {
                let options = options(max_files, max_lines);
                let mut collection = DiffCollection::from_records(records, options);
                prop_assert!(collection.size().unwrap() <= max_files);
            }

            #[test]
            fn disabled_limits_expose_everything(records in records(), max_files in 0usize..20) {
                let count = records.len();
                let mut collection = DiffCollection::from_records(
                    records,
                    CollectionOptions { limits: false, ..options(max_files, 10) },
                );
                prop_assert_eq!(collection.size().unwrap(), count);
                prop_assert!(!collection.overflow().unwrap());
            }

            #[test]
            fn real_size_marks_lower_bound(
                records in records(),
                max_files in 0usize..20,
                max_lines in 0usize..400,
            ) {
                let options = options(max_files, max_lines);
                let mut collection = DiffCollection::from_records(records, options);
                let size = collection.size().unwrap();
                let expected = if collection.overflow().unwrap() {
                    format!("{size}+")
                } else {
                    size.to_string()
                };
                prop_assert_eq!(collection.real_size().unwrap(), expected);
            }
        }
    }
}
