//! Bounded, lazily collected per-file git diffs.
//!
//! A [`Diff`] normalizes one file's change from a field mapping, a native
//! patch object or a streamed wire message, and prunes its own patch when it
//! is too large to render. A [`DiffCollection`] pulls diffs from a possibly
//! huge source only as far as it has to, and stops once the file, line or
//! byte limits are crossed.
//!
//! ```
//! use diff_collection::{CollectionOptions, DiffCollection, DiffFields};
//!
//! let records = vec![
//!     DiffFields { patch: "+a\n".into(), new_path: "a.txt".into(), ..Default::default() };
//!     3
//! ];
//! let options = CollectionOptions { max_files: 2, ..Default::default() };
//! let mut diffs = DiffCollection::from_records(records, options);
//!
//! assert_eq!(diffs.real_size().unwrap(), "2+");
//! assert!(diffs.overflow().unwrap());
//! ```

use error_set::error_set;

pub mod collection;
pub mod compare;
pub mod config;
pub mod diff;
#[cfg(feature = "git")]
pub mod git;
pub mod options;
pub mod parse;

pub use collection::{CollectionExport, DiffCollection, OverflowReason};
pub use compare::{
    CommitInfo, CompareError, CompareOptions, Comparison, RevisionCompare, between,
    collect_comparison,
};
pub use config::{Config, ConfigError};
pub use diff::raw::{DiffFields, NativePatch, RawDiff, WireDiff};
pub use diff::stitch::{DiffStitcher, WireChunk};
pub use diff::{COLLAPSE_LIMIT, Diff, DiffExport, PatchLimits, PatchState, SIZE_LIMIT};
#[cfg(feature = "git")]
pub use git::GitCompare;
pub use options::{CollectionOptions, filter_diff_options};
pub use parse::{SourceError, UnifiedDiffReader};

error_set! {
    /// Top-level error for diff-collection operations
    DiffCollectionError := {
        SourceError(SourceError),
        CompareError(CompareError),
        ConfigError(ConfigError),
    } || OutputError

    /// Errors from writing results
    OutputError := {
        #[display("Failed to write output: {message}")]
        Write { message: String },
        #[display("Failed to serialize output: {message}")]
        Serialize { message: String },
    }
}
