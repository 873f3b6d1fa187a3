//! Byte-level helpers shared by every diff source: transcoding, line
//! counting and binary detection.

use serde::{Deserialize, Serialize};

/// How many leading bytes are scanned for a NUL when sniffing binary content
const BINARY_SNIFF_LEN: usize = 8000;

const BINARY_NOTICE_PREFIX: &str = "Binary files ";
const BINARY_NOTICE_SUFFIX: &str = " differ";

/// Byte encoding of patch text as delivered by a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
}

/// Transcode patch bytes to a `String`.
///
/// Returns `None` when the bytes are not valid in the declared encoding.
/// Invalid UTF-8 that starts with a UTF-16 byte-order mark is decoded as
/// UTF-16 instead.
pub fn decode(bytes: &[u8], encoding: PatchEncoding) -> Option<String> {
    match encoding {
        PatchEncoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => Some(text.to_string()),
            Err(_) => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                _ => None,
            },
        },
        PatchEncoding::Utf16Le => decode_utf16(strip_bom(bytes, [0xFF, 0xFE]), u16::from_le_bytes),
        PatchEncoding::Utf16Be => decode_utf16(strip_bom(bytes, [0xFE, 0xFF]), u16::from_be_bytes),
        PatchEncoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn strip_bom(bytes: &[u8], bom: [u8; 2]) -> &[u8] {
    bytes.strip_prefix(&bom[..]).unwrap_or(bytes)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }

    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Decode a path; paths are never dropped, invalid bytes are replaced.
pub fn decode_path(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Number of newline-delimited lines (a trailing partial line counts).
pub fn count_lines(text: &str) -> usize {
    text.lines().count()
}

/// Git's heuristic: content with a NUL byte near the start is binary.
pub fn detect_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

/// Whether the patch is a `Binary files A and B differ` notice.
pub fn has_binary_notice(text: &str) -> bool {
    text.lines().next().is_some_and(|line| {
        line.starts_with(BINARY_NOTICE_PREFIX)
            && line.ends_with(BINARY_NOTICE_SUFFIX)
            && line.contains(" and ")
    })
}

/// The notice substituted for binary content in transport-safe output.
pub fn binary_message(old_path: &str, new_path: &str) -> String {
    format!("{BINARY_NOTICE_PREFIX}a/{old_path} and b/{new_path}{BINARY_NOTICE_SUFFIX}\n")
}

/// Drop everything before the first line starting with `---` or `Binary`.
///
/// Text without such a line has no displayable body and yields an empty
/// string.
pub fn strip_diff_headers(text: &str) -> &str {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.starts_with("---") || line.starts_with("Binary") {
            return &text[offset..];
        }
        offset += line.len();
    }
    ""
}
