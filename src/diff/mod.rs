//! Normalized single-file diffs.
//!
//! A [`Diff`] is built once from a [`RawDiff`] and then decides, from its
//! own patch size, whether it keeps its content, collapses it, or drops it
//! as too large.

pub mod raw;
pub mod stitch;
pub mod text;

use raw::{DeltaStatus, DiffFields, NativePatch, RawDiff, WireDiff, is_blank_id};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use text::PatchEncoding;

/// Patches above this many bytes are dropped as too large
pub const SIZE_LIMIT: usize = 100 * 1024;
/// Patches above this many bytes are collapsed unless expanded
pub const COLLAPSE_LIMIT: usize = 10 * 1024;
/// Git mode of a gitlink (submodule pointer)
pub const SUBMODULE_MODE: &str = "160000";

/// Byte thresholds for the per-diff size policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchLimits {
    pub size_limit: usize,
    pub collapse_limit: usize,
    /// Hard limits keyed by extension including the dot, e.g. `".lock"`
    pub max_bytes_for_extension: BTreeMap<String, usize>,
}

impl Default for PatchLimits {
    fn default() -> Self {
        Self {
            size_limit: SIZE_LIMIT,
            collapse_limit: COLLAPSE_LIMIT,
            max_bytes_for_extension: BTreeMap::new(),
        }
    }
}

impl PatchLimits {
    /// The hard limit that applies to a file at `path`
    pub fn size_limit_for(&self, path: &str) -> usize {
        Path::new(path)
            .extension()
            .and_then(|ext| {
                self.max_bytes_for_extension
                    .get(&format!(".{}", ext.to_string_lossy()))
            })
            .copied()
            .unwrap_or(self.size_limit)
    }
}

/// What happened to a diff's patch content.
///
/// Transitions only move away from `Intact`, and `TooLarge` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchState {
    #[default]
    Intact,
    Collapsed,
    TooLarge,
}

/// How the size policy should treat a freshly normalized diff
enum SizeCheck {
    ByLength,
    Known(bool),
    Exempt,
}

/// A single file's change between two revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    old_path: String,
    new_path: String,
    old_mode: String,
    new_mode: String,
    new_file: bool,
    renamed_file: bool,
    deleted_file: bool,
    patch: String,
    line_count: usize,
    original_bytesize: usize,
    state: PatchState,
    expanded: bool,
    binary: bool,
    generated: Option<bool>,
}

impl Diff {
    /// Build an expanded diff with the default size limits.
    pub fn new<'a>(raw: impl Into<RawDiff<'a>>) -> Self {
        Self::with_policy(raw, true, &PatchLimits::default())
    }

    /// Build a diff and apply the size policy.
    ///
    /// Already-built diffs are returned unchanged.
    pub fn with_policy<'a>(
        raw: impl Into<RawDiff<'a>>,
        expanded: bool,
        limits: &PatchLimits,
    ) -> Self {
        let (mut diff, check) = match raw.into() {
            RawDiff::Built(diff) => return diff,
            raw => Self::normalize(raw, limits),
        };
        diff.expanded = expanded;
        diff.apply_size_policy(check, limits);
        diff
    }

    /// Build a diff without running the size policy.
    pub fn unpruned<'a>(raw: impl Into<RawDiff<'a>>) -> Self {
        match raw.into() {
            RawDiff::Built(diff) => diff,
            raw => Self::normalize(raw, &PatchLimits::default()).0,
        }
    }

    fn empty() -> Self {
        Diff {
            old_path: String::new(),
            new_path: String::new(),
            old_mode: String::new(),
            new_mode: String::new(),
            new_file: false,
            renamed_file: false,
            deleted_file: false,
            patch: String::new(),
            line_count: 0,
            original_bytesize: 0,
            state: PatchState::Intact,
            expanded: true,
            binary: false,
            generated: None,
        }
    }

    fn normalize(raw: RawDiff<'_>, limits: &PatchLimits) -> (Self, SizeCheck) {
        match raw {
            RawDiff::Fields(fields) => Self::from_fields(fields),
            RawDiff::Native(patch) => Self::from_native(patch, limits),
            RawDiff::Wire(wire) => Self::from_wire(wire),
            RawDiff::Built(diff) => (diff, SizeCheck::Exempt),
        }
    }

    fn from_fields(fields: DiffFields) -> (Self, SizeCheck) {
        let binary = fields.binary || text::has_binary_notice(&fields.patch);
        let check = match fields.too_large {
            Some(too_large) => SizeCheck::Known(too_large),
            None if binary => SizeCheck::Exempt,
            None => SizeCheck::ByLength,
        };

        let mut diff = Diff {
            old_path: fields.old_path,
            new_path: fields.new_path,
            old_mode: fields.old_mode,
            new_mode: fields.new_mode,
            new_file: fields.new_file,
            renamed_file: fields.renamed_file,
            deleted_file: fields.deleted_file,
            binary,
            generated: fields.generated,
            ..Self::empty()
        };
        diff.set_patch(fields.patch);
        (diff, check)
    }

    fn from_native(
        mut patch: Box<dyn NativePatch + '_>,
        limits: &PatchLimits,
    ) -> (Self, SizeCheck) {
        let old_path = patch.old_path().map(|p| text::decode_path(&p));
        let new_path = patch.new_path().map(|p| text::decode_path(&p));
        let status = patch.status();
        let binary = patch.is_binary();

        let mut diff = Diff {
            old_path: old_path.clone().or_else(|| new_path.clone()).unwrap_or_default(),
            new_path: new_path.or(old_path).unwrap_or_default(),
            old_mode: format_mode(patch.old_mode()),
            new_mode: format_mode(patch.new_mode()),
            new_file: status == DeltaStatus::Added,
            renamed_file: status == DeltaStatus::Renamed,
            deleted_file: status == DeltaStatus::Deleted,
            binary,
            ..Self::empty()
        };

        // Binary deltas render as a short notice, so only text is measured.
        if !binary {
            let limit = limits.size_limit_for(&diff.new_path);
            let mut size = 0;
            for len in patch.line_lengths() {
                size += len;
                if size > limit {
                    diff.original_bytesize = size;
                    return (diff, SizeCheck::Known(true));
                }
            }
        }

        let text = match patch.to_patch() {
            Some(bytes) => decode_patch(&bytes, PatchEncoding::Utf8, &diff.new_path),
            None => {
                tracing::warn!(path = %diff.new_path, "native patch could not be rendered");
                String::new()
            }
        };
        diff.set_patch(text::strip_diff_headers(&text).to_string());

        let check = if binary {
            SizeCheck::Exempt
        } else {
            SizeCheck::Known(false)
        };
        (diff, check)
    }

    fn from_wire(wire: WireDiff) -> (Self, SizeCheck) {
        let new_path = text::decode_path(&wire.to_path);
        let patch = decode_patch(&wire.patch, wire.encoding, &new_path);
        let binary =
            wire.binary || text::has_binary_notice(&patch) || text::detect_binary(&wire.patch);

        let mut diff = Diff {
            old_path: text::decode_path(&wire.from_path),
            new_path,
            old_mode: format_mode(wire.old_mode),
            new_mode: format_mode(wire.new_mode),
            new_file: is_blank_id(&wire.from_id),
            renamed_file: wire.from_path != wire.to_path,
            deleted_file: is_blank_id(&wire.to_id),
            binary,
            ..Self::empty()
        };
        diff.set_patch(patch);
        diff.original_bytesize = wire.patch.len();

        if wire.collapsed {
            diff.collapse();
        }

        let check = if wire.too_large {
            SizeCheck::Known(true)
        } else if binary {
            SizeCheck::Exempt
        } else {
            SizeCheck::ByLength
        };
        (diff, check)
    }

    fn set_patch(&mut self, patch: String) {
        self.line_count = text::count_lines(&patch);
        self.original_bytesize = patch.len();
        self.patch = patch;
    }

    fn apply_size_policy(&mut self, check: SizeCheck, limits: &PatchLimits) {
        let limit = limits.size_limit_for(&self.new_path);
        let too_large = match check {
            SizeCheck::Exempt => return,
            SizeCheck::Known(too_large) => too_large,
            SizeCheck::ByLength => self.original_bytesize > limit,
        };

        if too_large {
            // A patch the source refused to send still weighs more than the limit.
            self.original_bytesize = self.original_bytesize.max(limit + 1);
            tracing::debug!(
                path = %self.new_path,
                bytes = self.original_bytesize,
                "patch too large, dropping content"
            );
            self.prune_too_large();
        } else if !self.expanded && self.original_bytesize > limits.collapse_limit {
            tracing::debug!(
                path = %self.new_path,
                bytes = self.original_bytesize,
                "collapsing patch"
            );
            self.collapse();
        }
    }

    /// Drop the patch for good. Wins over a previous collapse.
    pub fn prune_too_large(&mut self) {
        self.patch.clear();
        self.line_count = 0;
        self.state = PatchState::TooLarge;
    }

    /// Drop the patch, leaving room for an explicit "load anyway".
    ///
    /// Has no effect on a diff already marked too large.
    pub fn collapse(&mut self) {
        if self.state == PatchState::TooLarge {
            return;
        }
        self.patch.clear();
        self.line_count = 0;
        self.state = PatchState::Collapsed;
    }

    pub fn old_path(&self) -> &str {
        &self.old_path
    }

    pub fn new_path(&self) -> &str {
        &self.new_path
    }

    pub fn old_mode(&self) -> &str {
        &self.old_mode
    }

    pub fn new_mode(&self) -> &str {
        &self.new_mode
    }

    pub fn is_new_file(&self) -> bool {
        self.new_file
    }

    pub fn is_renamed_file(&self) -> bool {
        self.renamed_file
    }

    pub fn is_deleted_file(&self) -> bool {
        self.deleted_file
    }

    /// Current patch text; empty once pruned
    pub fn patch(&self) -> &str {
        &self.patch
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Byte length of the patch as received, before any pruning
    pub fn original_bytesize(&self) -> usize {
        self.original_bytesize
    }

    pub fn state(&self) -> PatchState {
        self.state
    }

    pub fn is_too_large(&self) -> bool {
        self.state == PatchState::TooLarge
    }

    pub fn is_collapsed(&self) -> bool {
        self.state == PatchState::Collapsed
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn generated(&self) -> Option<bool> {
        self.generated
    }

    pub fn set_generated(&mut self, generated: bool) {
        self.generated = Some(generated);
    }

    pub fn is_binary(&self) -> bool {
        self.binary
            || text::has_binary_notice(&self.patch)
            || text::detect_binary(self.patch.as_bytes())
    }

    /// Either side points at a submodule commit
    pub fn is_submodule_change(&self) -> bool {
        self.old_mode == SUBMODULE_MODE || self.new_mode == SUBMODULE_MODE
    }

    pub fn is_mode_changed(&self) -> bool {
        !self.old_mode.is_empty() && !self.new_mode.is_empty() && self.old_mode != self.new_mode
    }

    /// Patch text that is safe to embed in JSON: binary diffs become a notice.
    pub fn json_safe_patch(&self) -> Cow<'_, str> {
        if self.is_binary() {
            Cow::Owned(text::binary_message(&self.old_path, &self.new_path))
        } else {
            Cow::Borrowed(&self.patch)
        }
    }

    /// The patch with `---`/`+++` file headers, as `git apply` expects.
    pub fn unidiff(&self) -> String {
        if self.patch.is_empty() {
            return String::new();
        }
        if self.is_binary() {
            return self.json_safe_patch().into_owned();
        }
        if self.patch.starts_with("--- ") {
            return self.patch.clone();
        }

        let old_header = if self.new_file {
            "/dev/null".to_string()
        } else {
            format!("a/{}", self.old_path)
        };
        let new_header = if self.deleted_file {
            "/dev/null".to_string()
        } else {
            format!("b/{}", self.new_path)
        };
        format!("--- {old_header}\n+++ {new_header}\n{}", self.patch)
    }

    /// Every attribute, including why the patch may be empty.
    pub fn export(&self) -> DiffExport {
        DiffExport {
            old_path: self.old_path.clone(),
            new_path: self.new_path.clone(),
            old_mode: self.old_mode.clone(),
            new_mode: self.new_mode.clone(),
            new_file: self.new_file,
            renamed_file: self.renamed_file,
            deleted_file: self.deleted_file,
            patch: self.json_safe_patch().into_owned(),
            too_large: self.is_too_large(),
            collapsed: self.is_collapsed(),
            generated: self.generated,
            binary: self.is_binary(),
        }
    }
}

/// Serializable view of a [`Diff`] for UIs and APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffExport {
    pub old_path: String,
    pub new_path: String,
    pub old_mode: String,
    pub new_mode: String,
    pub new_file: bool,
    pub renamed_file: bool,
    pub deleted_file: bool,
    pub patch: String,
    pub too_large: bool,
    pub collapsed: bool,
    pub generated: Option<bool>,
    pub binary: bool,
}

fn format_mode(mode: u32) -> String {
    format!("{mode:o}")
}

fn decode_patch(bytes: &[u8], encoding: PatchEncoding, path: &str) -> String {
    text::decode(bytes, encoding).unwrap_or_else(|| {
        tracing::warn!(
            path,
            bytes = bytes.len(),
            ?encoding,
            "patch could not be transcoded, dropping content"
        );
        String::new()
    })
}
