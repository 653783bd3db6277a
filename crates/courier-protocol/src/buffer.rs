//! Per-connection reassembly of frames split across transport messages.

use std::collections::VecDeque;

use crate::codec::{FRAME_TERMINATOR, decode};
use crate::errors::{ProtocolError, Result};
use crate::frame::Frame;

/// Accumulates transport chunks and yields complete frames in arrival order.
///
/// A single chunk may carry several terminated frames, and one frame may
/// arrive over several chunks. The unterminated tail is capped at
/// `max_bytes`; once exceeded the buffer is cleared and the caller is
/// expected to close the connection.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: String,
    ready: VecDeque<Frame>,
    max_bytes: usize,
}

impl FrameBuffer {
    /// New buffer with the given cap on an unterminated frame.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            pending: String::new(),
            ready: VecDeque::new(),
            max_bytes,
        }
    }

    /// Append a chunk, splitting out every frame it completes.
    pub fn push(&mut self, chunk: &str) -> Result<()> {
        // The held tail is known to contain no terminator.
        let mut search_from = self.pending.len();
        self.pending.push_str(chunk);

        while let Some(offset) = self.pending[search_from..].find(FRAME_TERMINATOR) {
            let end = search_from + offset + FRAME_TERMINATOR.len_utf8();
            let rest = self.pending.split_off(end);
            let complete = std::mem::replace(&mut self.pending, rest);
            if let Some(frame) = decode(&complete) {
                self.ready.push_back(frame);
            }
            search_from = 0;
        }

        if self.pending.len() > self.max_bytes {
            self.pending.clear();
            return Err(ProtocolError::FrameTooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Bytes held for a frame whose terminator has not arrived.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use assert_matches::assert_matches;

    fn drain(buffer: &mut FrameBuffer) -> Vec<Frame> {
        std::iter::from_fn(|| buffer.next_frame()).collect()
    }

    #[test]
    fn single_terminated_frame() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.push(&encode(&Frame::disconnect())).unwrap();
        let frames = drain(&mut buffer);
        assert_eq!(frames, vec![Frame::disconnect()]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn frame_split_across_chunks() {
        let wire = encode(&Frame::send("/pub/chat/message", r#"{"roomId":1,"message":"hello"}"#));
        let (head, tail) = wire.split_at(17);
        let mut buffer = FrameBuffer::new(1024);

        buffer.push(head).unwrap();
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.pending_len(), 17);

        buffer.push(tail).unwrap();
        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.body(), r#"{"roomId":1,"message":"hello"}"#);
    }

    #[test]
    fn concatenated_frames_in_one_chunk_keep_order() {
        let wire = [
            Frame::subscribe("/topic/a", "1"),
            Frame::subscribe("/topic/b", "2"),
            Frame::unsubscribe("1"),
        ]
        .iter()
        .map(encode)
        .collect::<String>();

        let mut buffer = FrameBuffer::new(1024);
        buffer.push(&wire).unwrap();
        let commands: Vec<_> = drain(&mut buffer).iter().map(|f| f.command().to_owned()).collect();
        assert_eq!(commands, ["SUBSCRIBE", "SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[test]
    fn byte_by_byte_delivery() {
        let wire = encode(&Frame::connect("tok"));
        let mut buffer = FrameBuffer::new(1024);
        for ch in wire.chars() {
            buffer.push(&ch.to_string()).unwrap();
        }
        assert_eq!(drain(&mut buffer), vec![Frame::connect("tok")]);
    }

    #[test]
    fn unterminated_chunk_without_terminator_is_held() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.push("SEND\ndestination:/a\n\npartial").unwrap();
        assert!(buffer.next_frame().is_none());
    }

    #[test]
    fn empty_slices_between_terminators_are_skipped() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.push("\n\0\0DISCONNECT\n\n\0\n").unwrap();
        assert_eq!(drain(&mut buffer).len(), 1);
    }

    #[test]
    fn overflow_reports_and_clears() {
        let mut buffer = FrameBuffer::new(16);
        let err = buffer.push("SEND\ndestination:/a/very/long/path").unwrap_err();
        assert_matches!(err, ProtocolError::FrameTooLarge { limit: 16 });
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn completed_frames_do_not_count_toward_limit() {
        let mut buffer = FrameBuffer::new(16);
        let big = encode(&Frame::send("/pub/chat/message", "x".repeat(64)));
        buffer.push(&big).unwrap();
        assert!(buffer.next_frame().is_some());
    }

    #[test]
    fn multibyte_body_survives_split() {
        let wire = encode(&Frame::send("/a", "héllo wörld"));
        let mut buffer = FrameBuffer::new(1024);
        let mid = wire.char_indices().nth(20).map(|(i, _)| i).unwrap();
        buffer.push(&wire[..mid]).unwrap();
        buffer.push(&wire[mid..]).unwrap();
        assert_eq!(buffer.next_frame().unwrap().body(), "héllo wörld");
    }

    #[test]
    fn trickled_frames_after_a_complete_one_are_found() {
        let first = encode(&Frame::subscribe("/topic/a", "1"));
        let second = encode(&Frame::send("/topic/a", "y".repeat(200)));
        let mut buffer = FrameBuffer::new(1024);

        buffer.push(&first[..5]).unwrap();
        let mut rest = first[5..].to_owned();
        rest.push_str(&second[..3]);
        buffer.push(&rest).unwrap();
        assert_eq!(buffer.next_frame().map(|f| f.command().to_owned()).as_deref(), Some("SUBSCRIBE"));
        assert_eq!(buffer.pending_len(), 3);

        for ch in second[3..].chars() {
            buffer.push(&ch.to_string()).unwrap();
        }
        let frame = buffer.next_frame().unwrap();
        assert_eq!(frame.body().len(), 200);
        assert_eq!(buffer.pending_len(), 0);
        assert!(buffer.next_frame().is_none());
    }
}
