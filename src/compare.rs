//! Comparing two revisions and collecting the result.

use crate::collection::DiffCollection;
use crate::diff::raw::RawDiff;
use crate::options::{CollectionOptions, filter_diff_options};
use error_set::error_set;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

error_set! {
    /// Errors from comparing two revisions
    CompareError := {
        /// A revision could not be resolved to a commit
        #[display("Unknown revision '{rev}': {message}")]
        UnknownRevision { rev: String, message: String },
        /// The repository backend failed while diffing
        #[display("Revision comparison failed: {message}")]
        Backend { message: String },
    }
}

/// How two revisions are compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Diff the trees directly instead of diffing against the merge base
    pub straight: bool,
    pub ignore_whitespace_change: bool,
    /// Restrict the diff to these paths; empty means everything
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
}

/// Commits between two revisions and the diff source for their trees.
#[derive(Debug)]
pub struct Comparison<S> {
    /// Newest first
    pub commits: Vec<CommitInfo>,
    pub diffs: S,
}

/// A backend able to compare two revisions of a repository.
///
/// `'r` is how long the raw diffs may borrow from the backend.
pub trait RevisionCompare<'r> {
    type Error;
    type Source: Iterator<Item = Result<RawDiff<'r>, Self::Error>>;

    /// Commits in `head` but not in `base`, plus one raw diff per changed path.
    fn compare(
        &self,
        base: &str,
        head: &str,
        options: &CompareOptions,
    ) -> Result<Comparison<Self::Source>, Self::Error>;
}

/// Compare `base..head` and wrap the diffs in a [`DiffCollection`].
///
/// `options` may carry unrelated keys. `straight` and
/// `ignore_whitespace_change` steer the comparison; the collection only
/// sees the recognized diff options.
pub fn between<'r, C>(
    repo: &C,
    head: &str,
    base: &str,
    options: &Map<String, Value>,
    paths: &[String],
) -> Result<Comparison<DiffCollection<C::Source>>, C::Error>
where
    C: RevisionCompare<'r>,
{
    let flag = |key: &str| options.get(key).and_then(Value::as_bool).unwrap_or(false);
    let compare_options = CompareOptions {
        straight: flag("straight"),
        ignore_whitespace_change: flag("ignore_whitespace_change"),
        paths: paths.to_vec(),
    };
    let collection_options = CollectionOptions::from_map(&filter_diff_options(Some(options), None));

    collect_comparison(repo, base, head, &compare_options, collection_options)
}

/// Typed counterpart of [`between`].
pub fn collect_comparison<'r, C>(
    repo: &C,
    base: &str,
    head: &str,
    compare_options: &CompareOptions,
    collection_options: CollectionOptions,
) -> Result<Comparison<DiffCollection<C::Source>>, C::Error>
where
    C: RevisionCompare<'r>,
{
    let Comparison { commits, diffs } = repo.compare(base, head, compare_options)?;
    tracing::debug!(
        base,
        head,
        commits = commits.len(),
        straight = compare_options.straight,
        "compared revisions"
    );

    Ok(Comparison {
        commits,
        diffs: DiffCollection::new(diffs, collection_options),
    })
}
