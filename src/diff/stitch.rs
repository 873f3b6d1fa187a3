//! Reassembly of diff messages a transport split into several chunks.

use super::raw::{RawDiff, WireDiff};
use super::text::PatchEncoding;

/// One message of a chunked diff stream.
///
/// Metadata is taken from the first chunk of each diff; `raw_patch_data`
/// is concatenated until a chunk with `end_of_patch` arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireChunk {
    pub from_path: Vec<u8>,
    pub to_path: Vec<u8>,
    pub old_mode: u32,
    pub new_mode: u32,
    pub from_id: String,
    pub to_id: String,
    pub raw_patch_data: Vec<u8>,
    pub encoding: PatchEncoding,
    pub binary: bool,
    pub too_large: bool,
    pub collapsed: bool,
    pub overflow_marker: bool,
    pub end_of_patch: bool,
}

impl WireChunk {
    fn into_wire(self) -> WireDiff {
        WireDiff {
            from_path: self.from_path,
            to_path: self.to_path,
            old_mode: self.old_mode,
            new_mode: self.new_mode,
            from_id: self.from_id,
            to_id: self.to_id,
            patch: self.raw_patch_data,
            encoding: self.encoding,
            binary: self.binary,
            too_large: self.too_large,
            collapsed: self.collapsed,
            overflow_marker: self.overflow_marker,
        }
    }
}

/// Iterator adapter turning a chunk stream into complete [`WireDiff`]s.
///
/// A source error is passed through and ends the stream: the diff being
/// assembled is lost and later chunks are never read. A partial diff at the
/// end of the stream is emitted as-is. An overflow marker is complete on its
/// own and closes any diff still open.
pub struct DiffStitcher<I> {
    chunks: I,
    /// Marker that arrived while a diff was still open
    pending: Option<WireDiff>,
    failed: bool,
}

impl<I> DiffStitcher<I> {
    pub fn new(chunks: I) -> Self {
        DiffStitcher {
            chunks,
            pending: None,
            failed: false,
        }
    }
}

impl<I, E> Iterator for DiffStitcher<I>
where
    I: Iterator<Item = Result<WireChunk, E>>,
{
    type Item = Result<RawDiff<'static>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(marker) = self.pending.take() {
            return Some(Ok(marker.into()));
        }
        let mut current: Option<WireDiff> = None;

        loop {
            let chunk = match self.chunks.next() {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => {
                    if let Some(wire) = &current {
                        tracing::warn!(
                            path = %String::from_utf8_lossy(&wire.to_path),
                            "diff stream failed mid-patch"
                        );
                    }
                    self.failed = true;
                    return Some(Err(err));
                }
                None => return current.map(|wire| Ok(wire.into())),
            };

            if chunk.overflow_marker && current.is_some() {
                self.pending = Some(chunk.into_wire());
                return current.map(|wire| Ok(wire.into()));
            }

            let end_of_patch = chunk.end_of_patch || chunk.overflow_marker;
            match current.as_mut() {
                Some(wire) => wire.patch.extend_from_slice(&chunk.raw_patch_data),
                None => current = Some(chunk.into_wire()),
            }

            if end_of_patch {
                return current.map(|wire| Ok(wire.into()));
            }
        }
    }
}
