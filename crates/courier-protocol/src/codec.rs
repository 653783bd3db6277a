//! Stateless text codec.
//!
//! ```text
//! COMMAND
//! key:value
//!
//! body\0
//! ```

use std::collections::BTreeMap;

use crate::frame::Frame;

/// Marks the end of one frame on the wire.
pub const FRAME_TERMINATOR: char = '\0';

/// Decode one frame slice (terminator optional).
///
/// Returns `None` for empty or whitespace-only input, which is "no frame yet"
/// rather than an error. The first `:` splits a header line; when a key repeats
/// the first value wins. Everything after the first blank line is the body,
/// byte-for-byte.
pub fn decode(raw: &str) -> Option<Frame> {
    let raw = raw.strip_suffix(FRAME_TERMINATOR).unwrap_or(raw);
    if raw.trim().is_empty() {
        return None;
    }

    // EOLs between frames act as keep-alives.
    let raw = raw.trim_start_matches(['\r', '\n']);
    let (command_line, mut remainder) = split_line(raw);
    let command = command_line.trim().to_owned();

    let mut headers = BTreeMap::new();
    let body = loop {
        let Some(text) = remainder else {
            break String::new();
        };
        let (line, next) = split_line(text);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break next.unwrap_or_default().to_owned();
        }
        if let Some((key, value)) = line.split_once(':') {
            let _ = headers
                .entry(key.trim().to_owned())
                .or_insert_with(|| value.trim().to_owned());
        }
        remainder = next;
    };

    Some(Frame::from_parts(command, headers, body))
}

/// Encode a frame, terminator included.
pub fn encode(frame: &Frame) -> String {
    let header_len: usize = frame
        .headers()
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    let mut out = String::with_capacity(frame.command().len() + header_len + frame.body().len() + 3);
    out.push_str(frame.command());
    out.push('\n');
    for (key, value) in frame.headers() {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(frame.body());
    out.push(FRAME_TERMINATOR);
    out
}

fn split_line(text: &str) -> (&str, Option<&str>) {
    match text.find('\n') {
        Some(idx) => (&text[..idx], Some(&text[idx + 1..])),
        None => (text, None),
    }
}
