//! Collection configuration and untyped option filtering.
//!
//! Callers often hold one big option mapping meant for several
//! components. [`filter_diff_options`] keeps only the keys a diff
//! collection understands, and [`CollectionOptions::from_map`] turns what
//! is left into typed options without ever failing.

use crate::diff::PatchLimits;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_MAX_FILES: usize = 100;
pub const DEFAULT_MAX_LINES: usize = 5000;
/// Files shown expanded before the collection starts collapsing
pub const DEFAULT_SAFE_MAX_FILES: usize = 100;
/// Lines shown expanded before the collection starts collapsing
pub const DEFAULT_SAFE_MAX_LINES: usize = 5000;
/// Average patch size budgeted per file when deriving byte limits
pub const BYTES_PER_FILE: usize = 5 * 1024;

/// Option keys a diff collection (or the comparison feeding it) accepts
pub const ALLOWED_OPTIONS: &[&str] = &[
    "ignore_whitespace_change",
    "max_files",
    "max_lines",
    "max_bytes",
    "limits",
    "expanded",
    "collapse_generated",
    "offset_index",
    "generated_files",
    "max_patch_bytes_for_file_extension",
];

/// Merge `options` over `defaults`, keeping only [`ALLOWED_OPTIONS`].
///
/// Unknown keys are dropped silently on both sides.
pub fn filter_diff_options(
    options: Option<&Map<String, Value>>,
    defaults: Option<&Map<String, Value>>,
) -> Map<String, Value> {
    let allowed = |key: &String| ALLOWED_OPTIONS.contains(&key.as_str());

    defaults
        .into_iter()
        .chain(options)
        .flat_map(|map| map.iter())
        .filter(|(key, _)| allowed(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Everything a [`DiffCollection`](crate::DiffCollection) can be configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOptions {
    pub max_files: usize,
    pub max_lines: usize,
    /// Defaults to `max_files * BYTES_PER_FILE`
    pub max_bytes: Option<usize>,
    pub safe_max_files: usize,
    pub safe_max_lines: usize,
    /// Whether hard limits are enforced at all
    pub limits: bool,
    /// When false, large diffs and diffs past the safe limits are collapsed
    pub expanded: bool,
    pub collapse_generated: bool,
    /// Records before this index count against limits but are not exposed
    pub offset_index: usize,
    /// Old paths of generated files; `None` leaves `generated` unknown
    pub generated_files: Option<BTreeSet<String>>,
    pub patch: PatchLimits,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: None,
            safe_max_files: DEFAULT_SAFE_MAX_FILES,
            safe_max_lines: DEFAULT_SAFE_MAX_LINES,
            limits: true,
            expanded: true,
            collapse_generated: false,
            offset_index: 0,
            generated_files: None,
            patch: PatchLimits::default(),
        }
    }
}

impl CollectionOptions {
    /// Build options from an untyped mapping.
    ///
    /// Missing or wrongly typed values keep their defaults and negative
    /// numbers clamp to zero.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut options = Self::default();

        if let Some(n) = map.get("max_files").and_then(non_negative) {
            options.max_files = n;
        }
        if let Some(n) = map.get("max_lines").and_then(non_negative) {
            options.max_lines = n;
        }
        options.max_bytes = map.get("max_bytes").and_then(non_negative);
        if let Some(n) = map.get("offset_index").and_then(non_negative) {
            options.offset_index = n;
        }
        if let Some(flag) = map.get("limits").and_then(Value::as_bool) {
            options.limits = flag;
        }
        if let Some(flag) = map.get("expanded").and_then(Value::as_bool) {
            options.expanded = flag;
        }
        if let Some(flag) = map.get("collapse_generated").and_then(Value::as_bool) {
            options.collapse_generated = flag;
        }
        if let Some(Value::Array(paths)) = map.get("generated_files") {
            options.generated_files = Some(
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(Value::Object(per_ext)) = map.get("max_patch_bytes_for_file_extension") {
            options.patch.max_bytes_for_extension = per_ext
                .iter()
                .filter_map(|(ext, limit)| non_negative(limit).map(|n| (ext.clone(), n)))
                .collect::<BTreeMap<_, _>>();
        }

        options
    }

    /// Resolve the effective hard and safe limits.
    pub fn resolve_limits(&self) -> Limits {
        let safe_max_files = self.max_files.min(self.safe_max_files);
        Limits {
            max_files: self.max_files,
            max_lines: self.max_lines,
            max_bytes: self
                .max_bytes
                .unwrap_or_else(|| self.max_files.saturating_mul(BYTES_PER_FILE)),
            safe_max_files,
            safe_max_lines: self.max_lines.min(self.safe_max_lines),
            safe_max_bytes: safe_max_files.saturating_mul(BYTES_PER_FILE),
        }
    }
}

/// Effective limits of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_files: usize,
    pub max_lines: usize,
    pub max_bytes: usize,
    pub safe_max_files: usize,
    pub safe_max_lines: usize,
    pub safe_max_bytes: usize,
}

fn non_negative(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        Some(usize::try_from(n).unwrap_or(usize::MAX))
    } else {
        value.as_i64().map(|_| 0)
    }
}
