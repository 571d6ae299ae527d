//! Exec stream framing
//!
//! Without a TTY the daemon multiplexes stdout and stderr over one stream.
//! Every chunk is prefixed by an 8-byte header:
//!
//! ```text
//! [stream, 0, 0, 0, len3, len2, len1, len0]
//! ```
//!
//! where `stream` is 0 (stdin), 1 (stdout) or 2 (stderr) and the length is a
//! big-endian u32 counting the payload bytes that follow. A response may hold
//! any number of frames.

/// Size of one frame header
pub const HEADER_LEN: usize = 8;

/// Stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// One demultiplexed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub stream: StreamKind,
    pub payload: &'a [u8],
}

/// Parse a frame header, returning the stream and declared payload length
fn parse_header(bytes: &[u8]) -> Option<(StreamKind, usize)> {
    if bytes.len() < HEADER_LEN || bytes[1..4] != [0, 0, 0] {
        return None;
    }
    let stream = StreamKind::from_byte(bytes[0])?;
    let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    Some((stream, len))
}

/// Whether `raw` starts with a frame header
pub fn is_framed(raw: &[u8]) -> bool {
    parse_header(raw).is_some()
}

/// Split a multiplexed response into its frames.
///
/// Returns `None` when the response does not start with a valid header
/// (an unframed stream). A truncated final frame yields the bytes present;
/// trailing bytes that do not form a header become a final stdout frame.
pub fn frames(raw: &[u8]) -> Option<Vec<Frame<'_>>> {
    if !is_framed(raw) {
        return None;
    }

    let mut frames = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        match parse_header(rest) {
            Some((stream, len)) => {
                let body = &rest[HEADER_LEN..];
                let take = len.min(body.len());
                frames.push(Frame {
                    stream,
                    payload: &body[..take],
                });
                rest = &body[take..];
            }
            None => {
                frames.push(Frame {
                    stream: StreamKind::Stdout,
                    payload: rest,
                });
                break;
            }
        }
    }
    Some(frames)
}

/// Strip every frame header and concatenate the payloads in arrival order.
/// Unframed input comes back unchanged.
pub fn demultiplex(raw: &[u8]) -> Vec<u8> {
    match frames(raw) {
        Some(frames) => frames.iter().flat_map(|f| f.payload.iter().copied()).collect(),
        None => raw.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![stream, 0, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_single_frame_header_is_stripped() {
        let raw = frame(1, b"{\"status\": \"ok\"}\n");
        assert_eq!(demultiplex(&raw), b"{\"status\": \"ok\"}\n".to_vec());
    }

    #[test]
    fn test_every_frame_header_is_stripped() {
        // A large payload split across several frames must come back whole,
        // not with only the first header removed
        let mut raw = frame(1, b"{\"status\": \"ok\", \"output\": \"");
        raw.extend(frame(1, &[b'x'; 300]));
        raw.extend(frame(1, b"\", \"error\": \"\"}\n"));

        let mut expected = b"{\"status\": \"ok\", \"output\": \"".to_vec();
        expected.extend_from_slice(&[b'x'; 300]);
        expected.extend_from_slice(b"\", \"error\": \"\"}\n");

        assert_eq!(demultiplex(&raw), expected);
    }

    #[test]
    fn test_interleaved_streams_keep_arrival_order() {
        let mut raw = frame(2, b"warning\n");
        raw.extend(frame(1, b"result\n"));

        let parsed = frames(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].stream, StreamKind::Stderr);
        assert_eq!(parsed[1].stream, StreamKind::Stdout);
        assert_eq!(demultiplex(&raw), b"warning\nresult\n".to_vec());
    }

    #[test]
    fn test_unframed_stream_passes_through() {
        let raw = b"{\"status\": \"ok\", \"output\": \"5\\n\", \"error\": \"\"}\n";
        assert!(!is_framed(raw));
        assert_eq!(demultiplex(raw), raw.to_vec());
    }

    #[test]
    fn test_truncated_frame_keeps_available_bytes() {
        let mut raw = frame(1, b"hello world");
        raw.truncate(HEADER_LEN + 5);
        assert_eq!(demultiplex(&raw), b"hello".to_vec());
    }

    #[test]
    fn test_trailing_garbage_is_kept() {
        let mut raw = frame(1, b"abc");
        raw.extend_from_slice(b"xyz");
        assert_eq!(demultiplex(&raw), b"abcxyz".to_vec());
    }

    #[test]
    fn test_empty_input() {
        assert!(demultiplex(b"").is_empty());
        assert!(frames(b"").is_none());
    }

    #[test]
    fn test_zero_length_frame() {
        let mut raw = frame(1, b"");
        raw.extend(frame(1, b"ok"));
        assert_eq!(demultiplex(&raw), b"ok".to_vec());
    }
}
