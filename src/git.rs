//! Revision comparison backed by `git2`.

use crate::compare::{CommitInfo, CompareError, CompareOptions, Comparison, RevisionCompare};
use crate::diff::raw::{DeltaStatus, DiffFields, NativePatch, RawDiff};
use crate::diff::text;
use git2::{
    Commit, Delta, DiffDelta, DiffFindOptions, DiffOptions, ErrorCode, Patch, Repository, Sort,
};

impl NativePatch for Patch<'_> {
    fn old_path(&self) -> Option<Vec<u8>> {
        self.delta().old_file().path_bytes().map(<[u8]>::to_vec)
    }

    fn new_path(&self) -> Option<Vec<u8>> {
        self.delta().new_file().path_bytes().map(<[u8]>::to_vec)
    }

    fn old_mode(&self) -> u32 {
        u32::from(self.delta().old_file().mode())
    }

    fn new_mode(&self) -> u32 {
        u32::from(self.delta().new_file().mode())
    }

    fn status(&self) -> DeltaStatus {
        delta_status(self.delta().status())
    }

    fn is_binary(&self) -> bool {
        self.delta().flags().is_binary()
    }

    fn line_lengths(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        Box::new((0..self.num_hunks()).flat_map(move |hunk| {
            let lines = self.num_lines_in_hunk(hunk).unwrap_or(0);
            (0..lines).filter_map(move |line| {
                self.line_in_hunk(hunk, line)
                    .ok()
                    .map(|line| line.content().len())
            })
        }))
    }

    fn to_patch(&mut self) -> Option<Vec<u8>> {
        self.to_buf().ok().map(|buf| buf.to_vec())
    }
}

fn delta_status(status: Delta) -> DeltaStatus {
    match status {
        Delta::Added | Delta::Untracked => DeltaStatus::Added,
        Delta::Deleted => DeltaStatus::Deleted,
        Delta::Renamed => DeltaStatus::Renamed,
        Delta::Copied => DeltaStatus::Copied,
        Delta::Typechange => DeltaStatus::TypeChange,
        _ => DeltaStatus::Modified,
    }
}

fn backend(err: git2::Error) -> CompareError {
    CompareError::Backend {
        message: err.message().to_string(),
    }
}

/// Compares revisions of a local repository.
pub struct GitCompare<'r> {
    repo: &'r Repository,
}

impl<'r> GitCompare<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        GitCompare { repo }
    }

    fn resolve(&self, rev: &str) -> Result<Commit<'r>, CompareError> {
        self.repo
            .revparse_single(rev)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| CompareError::UnknownRevision {
                rev: rev.to_string(),
                message: e.message().to_string(),
            })
    }

    /// The commit to diff `head` against: the merge base unless `straight`.
    fn diff_base(
        &self,
        base: Commit<'r>,
        head: &Commit<'r>,
        straight: bool,
    ) -> Result<Commit<'r>, CompareError> {
        if straight {
            return Ok(base);
        }
        match self.repo.merge_base(base.id(), head.id()) {
            Ok(oid) => {
                tracing::debug!(merge_base = %oid, "diffing against merge base");
                self.repo.find_commit(oid).map_err(backend)
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                tracing::warn!(
                    base = %base.id(),
                    head = %head.id(),
                    "no merge base, comparing trees directly"
                );
                Ok(base)
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn commits_between(
        &self,
        base: &Commit<'r>,
        head: &Commit<'r>,
    ) -> Result<Vec<CommitInfo>, CompareError> {
        let mut walk = self.repo.revwalk().map_err(backend)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME).map_err(backend)?;
        walk.push(head.id()).map_err(backend)?;
        walk.hide(base.id()).map_err(backend)?;

        walk.map(|oid| -> Result<CommitInfo, git2::Error> {
            let commit = self.repo.find_commit(oid?)?;
            Ok(CommitInfo {
                id: commit.id().to_string(),
                summary: commit.summary().unwrap_or_default().to_string(),
            })
        })
        .collect::<Result<Vec<_>, git2::Error>>()
        .map_err(backend)
    }
}

impl<'r> RevisionCompare<'r> for GitCompare<'r> {
    type Error = CompareError;
    type Source = TreeDiffSource<'r>;

    fn compare(
        &self,
        base: &str,
        head: &str,
        options: &CompareOptions,
    ) -> Result<Comparison<TreeDiffSource<'r>>, CompareError> {
        let head_commit = self.resolve(head)?;
        let base_commit = self.resolve(base)?;
        let commits = self.commits_between(&base_commit, &head_commit)?;
        let old_commit = self.diff_base(base_commit, &head_commit, options.straight)?;

        let mut diff_options = DiffOptions::new();
        diff_options.ignore_whitespace_change(options.ignore_whitespace_change);
        for path in &options.paths {
            diff_options.pathspec(path);
        }

        let old_tree = old_commit.tree().map_err(backend)?;
        let new_tree = head_commit.tree().map_err(backend)?;
        let mut diff = self
            .repo
            .diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut diff_options))
            .map_err(backend)?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true))).map_err(backend)?;

        tracing::debug!(base, head, deltas = diff.deltas().len(), "computed tree diff");
        Ok(Comparison {
            commits,
            diffs: TreeDiffSource::new(diff),
        })
    }
}

/// Lazily turns each delta of a tree diff into a patch.
pub struct TreeDiffSource<'r> {
    diff: git2::Diff<'r>,
    next: usize,
    len: usize,
}

impl<'r> TreeDiffSource<'r> {
    pub fn new(diff: git2::Diff<'r>) -> Self {
        let len = diff.deltas().len();
        TreeDiffSource { diff, next: 0, len }
    }

    /// Record for a delta git2 produces no patch for (binary or unchanged).
    fn delta_record(&self, index: usize) -> RawDiff<'r> {
        self.diff
            .get_delta(index)
            .map(|delta| fields_from_delta(&delta))
            .unwrap_or_default()
            .into()
    }
}

fn decoded_path(file: git2::DiffFile<'_>) -> String {
    file.path_bytes().map(text::decode_path).unwrap_or_default()
}

fn fields_from_delta(delta: &DiffDelta<'_>) -> DiffFields {
    let old_path = decoded_path(delta.old_file());
    let new_path = decoded_path(delta.new_file());
    let status = delta_status(delta.status());
    let binary = delta.flags().is_binary();

    DiffFields {
        patch: if binary {
            text::binary_message(&old_path, &new_path)
        } else {
            String::new()
        },
        old_mode: format!("{:o}", u32::from(delta.old_file().mode())),
        new_mode: format!("{:o}", u32::from(delta.new_file().mode())),
        new_file: status == DeltaStatus::Added,
        renamed_file: status == DeltaStatus::Renamed,
        deleted_file: status == DeltaStatus::Deleted,
        old_path,
        new_path,
        binary,
        ..Default::default()
    }
}

impl<'r> Iterator for TreeDiffSource<'r> {
    type Item = Result<RawDiff<'r>, CompareError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let index = self.next;
        self.next += 1;

        Some(match Patch::from_diff(&self.diff, index) {
            Ok(Some(patch)) => Ok(RawDiff::native(patch)),
            Ok(None) => Ok(self.delta_record(index)),
            Err(e) => Err(backend(e)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len - self.next;
        (remaining, Some(remaining))
    }
}
