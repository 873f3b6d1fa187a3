//! Streaming reader for `git diff` output.
//!
//! [`UnifiedDiffReader`] splits the output of `git diff` (or `git log -p`,
//! `git show`) into one [`WireDiff`] per file, reading only as far as the
//! next `diff --git` line. Header lines are recognized with `nom`; the body
//! starting at the first hunk or binary marker is kept byte for byte.
//!
//! ```
//! use diff_collection::parse::UnifiedDiffReader;
//!
//! let text = "diff --git a/a.txt b/a.txt\n\
//!             index 1234567..89abcde 100644\n\
//!             --- a/a.txt\n\
//!             +++ b/a.txt\n\
//!             @@ -1 +1 @@\n\
//!             -old\n\
//!             +new\n";
//! let diffs: Vec<_> = UnifiedDiffReader::new(text.as_bytes())
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//!
//! assert_eq!(diffs.len(), 1);
//! assert_eq!(diffs[0].to_path, b"a.txt");
//! assert_eq!(diffs[0].patch, b"@@ -1 +1 @@\n-old\n+new\n");
//! ```

use crate::diff::raw::{BLANK_ID, WireDiff};
use crate::diff::text;
use error_set::error_set;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{hex_digit1, oct_digit1, space1};
use nom::combinator::{map, map_res, opt, rest};
use nom::sequence::{preceded, separated_pair};
use nom::{IResult, Parser};
use std::io::BufRead;

error_set! {
    /// Errors from reading a raw diff stream
    SourceError := {
        /// The underlying reader failed
        #[display("Failed to read diff input: {message}")]
        Read { message: String },
    }
}

const DIFF_GIT: &[u8] = b"diff --git ";

/// A recognized line in the header block of one file's diff
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderLine<'a> {
    OldMode(u32),
    NewMode(u32),
    NewFileMode(u32),
    DeletedFileMode(u32),
    RenameFrom(&'a str),
    RenameTo(&'a str),
    Index {
        from: &'a str,
        to: &'a str,
        mode: Option<u32>,
    },
    OldPath(&'a str),
    NewPath(&'a str),
    /// First line of the body: a hunk, binary notice or binary patch
    BodyStart { binary: bool },
}

fn mode(input: &str) -> IResult<&str, u32> {
    map_res(oct_digit1, |digits| u32::from_str_radix(digits, 8)).parse(input)
}

fn index_line(input: &str) -> IResult<&str, HeaderLine<'_>> {
    map(
        preceded(
            tag("index "),
            (
                separated_pair(hex_digit1, tag(".."), hex_digit1),
                opt(preceded(space1, mode)),
            ),
        ),
        |((from, to), mode)| HeaderLine::Index { from, to, mode },
    )
    .parse(input)
}

fn header_line(input: &str) -> IResult<&str, HeaderLine<'_>> {
    alt((
        map(preceded(tag("old mode "), mode), HeaderLine::OldMode),
        map(preceded(tag("new mode "), mode), HeaderLine::NewMode),
        map(preceded(tag("new file mode "), mode), HeaderLine::NewFileMode),
        map(preceded(tag("deleted file mode "), mode), HeaderLine::DeletedFileMode),
        map(preceded(alt((tag("rename from "), tag("copy from "))), rest), HeaderLine::RenameFrom),
        map(preceded(alt((tag("rename to "), tag("copy to "))), rest), HeaderLine::RenameTo),
        index_line,
        map(preceded(tag("--- "), rest), HeaderLine::OldPath),
        map(preceded(tag("+++ "), rest), HeaderLine::NewPath),
        map(tag("@@ "), |_| HeaderLine::BodyStart { binary: false }),
        map(alt((tag("Binary files "), tag("GIT binary patch"))), |_| HeaderLine::BodyStart {
            binary: true,
        }),
    ))
    .parse(input)
}

/// Split the `a/… b/…` pair of a `diff --git` line.
///
/// Unquoted paths may contain spaces, so the split that yields two equal
/// paths wins; otherwise the first ` b/` separates them.
fn split_git_paths(pair: &str) -> Option<(Vec<u8>, Vec<u8>)> {
    if pair.starts_with('"') {
        let close = closing_quote(pair)? + 1;
        let (old, new) = pair.split_at(close);
        return Some((path_bytes(old), path_bytes(new.trim_start())));
    }

    let candidates: Vec<usize> = pair.match_indices(" b/").map(|(i, _)| i).collect();
    let split = candidates
        .iter()
        .copied()
        .find(|&i| pair[..i].strip_prefix("a/") == Some(&pair[i + 3..]))
        .or_else(|| candidates.first().copied())?;

    Some((path_bytes(&pair[..split]), path_bytes(&pair[split + 1..])))
}

/// Byte offset of the quote closing the quoted field at the start of `s`.
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, b) in s.bytes().enumerate().skip(1) {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// Path bytes from a header field: unquoted, without `a/`/`b/` prefix.
fn path_bytes(field: &str) -> Vec<u8> {
    let field = field.trim_end_matches(['\t', '\r']);
    let raw = match field.strip_prefix('"').and_then(|f| f.strip_suffix('"')) {
        Some(quoted) => unquote(quoted),
        None => field.as_bytes().to_vec(),
    };

    match raw.strip_prefix(b"a/").or_else(|| raw.strip_prefix(b"b/")) {
        Some(stripped) => stripped.to_vec(),
        None => raw,
    }
}

/// Undo git's C-style path quoting, including `\ooo` octal bytes
fn unquote(quoted: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(quoted.len());
    let mut bytes = quoted.bytes().peekable();

    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(digit @ b'0'..=b'7') => {
                let mut value = u32::from(digit - b'0');
                for _ in 0..2 {
                    match bytes.peek() {
                        Some(&d @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(d - b'0');
                            bytes.next();
                        }
                        _ => break,
                    }
                }
                out.push(u8::try_from(value).unwrap_or(u8::MAX));
            }
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    out
}

/// Lazily yields one [`WireDiff`] per file of `git diff` output.
///
/// Text before the first `diff --git` line (commit headers, stats) is
/// skipped.
pub struct UnifiedDiffReader<R> {
    reader: R,
    /// A `diff --git` line read while finishing the previous file
    pending: Option<Vec<u8>>,
    done: bool,
}

impl<R: BufRead> UnifiedDiffReader<R> {
    pub fn new(reader: R) -> Self {
        UnifiedDiffReader {
            reader,
            pending: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|e| SourceError::Read {
                message: e.to_string(),
            })?;
        Ok((read > 0).then_some(line))
    }

    fn next_file_start(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        while let Some(line) = self.read_line()? {
            if line.starts_with(DIFF_GIT) {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn read_file(&mut self) -> Result<Option<WireDiff>, SourceError> {
        let Some(first) = self.next_file_start()? else {
            return Ok(None);
        };

        let mut wire = WireDiff::default();
        let first = String::from_utf8_lossy(&first);
        if let Some((old, new)) = split_git_paths(first[DIFF_GIT.len()..].trim_end_matches('\n')) {
            wire.from_path = old;
            wire.to_path = new;
        }

        let mut in_body = false;
        while let Some(line) = self.read_line()? {
            if line.starts_with(DIFF_GIT) {
                self.pending = Some(line);
                break;
            }
            if in_body {
                wire.patch.extend_from_slice(&line);
                continue;
            }

            let decoded = String::from_utf8_lossy(&line);
            let Ok((_, header)) = header_line(decoded.trim_end_matches(['\n', '\r'])) else {
                continue;
            };
            match header {
                HeaderLine::OldMode(mode) => wire.old_mode = mode,
                HeaderLine::NewMode(mode) => wire.new_mode = mode,
                HeaderLine::NewFileMode(mode) => {
                    wire.old_mode = 0;
                    wire.new_mode = mode;
                    wire.from_id = BLANK_ID.to_string();
                }
                HeaderLine::DeletedFileMode(mode) => {
                    wire.old_mode = mode;
                    wire.new_mode = 0;
                    wire.to_id = BLANK_ID.to_string();
                }
                HeaderLine::RenameFrom(path) => wire.from_path = path_bytes(path),
                HeaderLine::RenameTo(path) => wire.to_path = path_bytes(path),
                HeaderLine::Index { from, to, mode } => {
                    wire.from_id = from.to_string();
                    wire.to_id = to.to_string();
                    if let Some(mode) = mode {
                        wire.old_mode = mode;
                        wire.new_mode = mode;
                    }
                }
                HeaderLine::OldPath(path) if path != "/dev/null" => {
                    wire.from_path = path_bytes(path)
                }
                HeaderLine::NewPath(path) if path != "/dev/null" => {
                    wire.to_path = path_bytes(path)
                }
                HeaderLine::OldPath(_) | HeaderLine::NewPath(_) => {}
                HeaderLine::BodyStart { binary } => {
                    wire.binary = binary;
                    in_body = true;
                    wire.patch.extend_from_slice(&line);
                }
            }
        }

        if !in_body {
            tracing::debug!(path = %text::decode_path(&wire.to_path), "diff without body");
        }
        Ok(Some(wire))
    }
}

impl<R: BufRead> Iterator for UnifiedDiffReader<R> {
    type Item = Result<WireDiff, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_file() {
            Ok(Some(wire)) => Some(Ok(wire)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => Some(Err(err)),
        }
    }
}
