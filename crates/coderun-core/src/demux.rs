//! Decoder for the container runtime's multiplexed log format.
//!
//! A non-TTY log interleaves stdout and stderr as frames: an 8-byte header
//! (stream tag, three zero bytes, big-endian `u32` payload length) followed by
//! the payload.

pub const HEADER_LEN: usize = 8;

/// Stream tag carried in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTag {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamTag {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamTag::Stdin),
            1 => Some(StreamTag::Stdout),
            2 => Some(StreamTag::Stderr),
            _ => None,
        }
    }
}

/// Parse the header at the start of `bytes`. `None` when fewer than
/// [`HEADER_LEN`] bytes remain or the reserved bytes are not zero.
fn parse_header(bytes: &[u8]) -> Option<(StreamTag, usize)> {
    let header = bytes.get(..HEADER_LEN)?;
    let tag = StreamTag::from_byte(header[0])?;
    if header[1..4] != [0, 0, 0] {
        return None;
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    Some((tag, len as usize))
}

/// Whether `raw` starts with a frame header.
pub fn is_framed(raw: &[u8]) -> bool {
    parse_header(raw).is_some()
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Payload of a well-formed frame. Clamped when the declared length runs
    /// past the end of the input.
    Payload(StreamTag, &'a [u8]),
    /// Bytes that do not start with a valid header, passed through untouched.
    Unframed(&'a [u8]),
}

/// Iterator over the frames of a raw log.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    rest: &'a [u8],
    decoded_any: bool,
}

pub fn frames(raw: &[u8]) -> Frames<'_> {
    Frames {
        rest: raw,
        decoded_any: false,
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match parse_header(self.rest) {
            Some((tag, len)) => {
                let body = &self.rest[HEADER_LEN..];
                let len = len.min(body.len());
                let (payload, rest) = body.split_at(len);
                self.rest = rest;
                self.decoded_any = true;
                Some(Frame::Payload(tag, payload))
            }
            // Trailing partial header after real frames.
            None if self.decoded_any && self.rest.len() < HEADER_LEN => {
                self.rest = &[];
                None
            }
            None => {
                let unframed = std::mem::take(&mut self.rest);
                Some(Frame::Unframed(unframed))
            }
        }
    }
}

/// Strip every frame header and concatenate the payloads in order.
///
/// Total: input without a leading header is returned unchanged, a truncated
/// trailing header is dropped and an oversized length is clamped.
pub fn demux(raw: &[u8]) -> Vec<u8> {
    let mut plain = Vec::with_capacity(raw.len());
    for frame in frames(raw) {
        match frame {
            Frame::Payload(_, payload) | Frame::Unframed(payload) => {
                plain.extend_from_slice(payload)
            }
        }
    }
    plain
}
