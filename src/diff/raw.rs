//! The raw records a [`Diff`](super::Diff) can be built from.
//!
//! A diff source hands out one of three shapes: a plain field mapping, a
//! patch object from a native diff library, or a message received from a
//! diff-streaming transport. [`RawDiff`] closes over them so the rest of the
//! crate never has to care where a diff came from.

use super::Diff;
use super::text::PatchEncoding;
use serde::{Deserialize, Serialize};

/// Blob id used by transports for the missing side of an added or deleted file
pub const BLANK_ID: &str = "0000000000000000000000000000000000000000";

/// Whether `id` denotes a missing blob (`0000000`, full or abbreviated)
pub fn is_blank_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b == b'0')
}

/// Field mapping form of a diff, e.g. deserialized from cached JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffFields {
    #[serde(alias = "diff")]
    pub patch: String,
    pub old_path: String,
    pub new_path: String,
    #[serde(alias = "a_mode")]
    pub old_mode: String,
    #[serde(alias = "b_mode")]
    pub new_mode: String,
    pub new_file: bool,
    pub renamed_file: bool,
    pub deleted_file: bool,
    /// Overrides the byte-length check when present
    pub too_large: Option<bool>,
    pub generated: Option<bool>,
    pub binary: bool,
}

/// A diff message as delivered by a streaming transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireDiff {
    pub from_path: Vec<u8>,
    pub to_path: Vec<u8>,
    pub old_mode: u32,
    pub new_mode: u32,
    pub from_id: String,
    pub to_id: String,
    pub patch: Vec<u8>,
    pub encoding: PatchEncoding,
    pub binary: bool,
    /// Set by the transport when it refused to send the patch body
    pub too_large: bool,
    pub collapsed: bool,
    /// Sentinel record: the transport stopped because its own limits were hit
    pub overflow_marker: bool,
}

impl WireDiff {
    /// The sentinel record a transport sends after hitting its limits.
    pub fn overflow_marker() -> Self {
        WireDiff {
            overflow_marker: true,
            ..Default::default()
        }
    }
}

/// Kind of change a native delta describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChange,
}

/// Accessors a native diff library's patch object must expose.
pub trait NativePatch {
    fn old_path(&self) -> Option<Vec<u8>>;
    fn new_path(&self) -> Option<Vec<u8>>;
    fn old_mode(&self) -> u32;
    fn new_mode(&self) -> u32;
    fn status(&self) -> DeltaStatus;
    fn is_binary(&self) -> bool;

    /// Byte length of every hunk line's content, in order.
    fn line_lengths(&self) -> Box<dyn Iterator<Item = usize> + '_>;

    /// Full patch text including file headers, `None` if it cannot be rendered.
    fn to_patch(&mut self) -> Option<Vec<u8>>;
}

/// One raw record from a diff source.
///
/// Native patches may borrow from the diff that produced them, hence `'a`.
pub enum RawDiff<'a> {
    Fields(DiffFields),
    Native(Box<dyn NativePatch + 'a>),
    Wire(WireDiff),
    /// An already-normalized diff, passed through untouched
    Built(Diff),
}

impl<'a> RawDiff<'a> {
    pub fn native(patch: impl NativePatch + 'a) -> Self {
        RawDiff::Native(Box::new(patch))
    }

    pub(crate) fn is_overflow_marker(&self) -> bool {
        matches!(self, RawDiff::Wire(wire) if wire.overflow_marker)
    }
}

impl std::fmt::Debug for RawDiff<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawDiff::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            RawDiff::Native(patch) => f
                .debug_struct("Native")
                .field("old_path", &patch.old_path())
                .field("new_path", &patch.new_path())
                .field("status", &patch.status())
                .finish_non_exhaustive(),
            RawDiff::Wire(wire) => f.debug_tuple("Wire").field(wire).finish(),
            RawDiff::Built(diff) => f.debug_tuple("Built").field(diff).finish(),
        }
    }
}

impl From<DiffFields> for RawDiff<'_> {
    fn from(fields: DiffFields) -> Self {
        RawDiff::Fields(fields)
    }
}

impl From<WireDiff> for RawDiff<'_> {
    fn from(wire: WireDiff) -> Self {
        RawDiff::Wire(wire)
    }
}

impl From<Diff> for RawDiff<'_> {
    fn from(diff: Diff) -> Self {
        RawDiff::Built(diff)
    }
}

impl<'a> From<Box<dyn NativePatch + 'a>> for RawDiff<'a> {
    fn from(patch: Box<dyn NativePatch + 'a>) -> Self {
        RawDiff::Native(patch)
    }
}
