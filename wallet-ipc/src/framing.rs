use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upper bound on one frame's payload. A verbose transaction runs tens of
/// kilobytes; anything near this limit means a corrupted length prefix.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    Oversized(usize),
    #[error("malformed frame payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Encodes one message as a self-delimiting frame: u32 big-endian payload
/// length followed by the JSON payload.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, FramingError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FramingError::Oversized(body.len()));
    }
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Incremental frame decoder. Feed it bytes as they arrive; frames are
/// yielded only once complete, so messages split across reads or
/// concatenated within one read decode independently.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame payload, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&self.buf[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FramingError::Oversized(len));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(frame))
    }

    /// Next complete frame decoded as `T`, if one is buffered.
    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FramingError> {
        match self.next_frame()? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TaskErrorKind, TaskResponse};

    #[test]
    fn test_round_trip_single_frame() {
        let response = TaskResponse::ok(3, serde_json::json!("done"));
        let frame = encode_frame(&response).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);
        let decoded: TaskResponse = decoder.decode_next().unwrap().unwrap();
        assert_eq!(decoded, response);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_frame_split_across_reads() {
        let response = TaskResponse::err(9, TaskErrorKind::Internal, "boom");
        let frame = encode_frame(&response).unwrap();
        let mut decoder = FrameDecoder::new();
        for chunk in frame.chunks(3) {
            decoder.extend(chunk);
        }
        // Nothing was yielded early; the complete frame decodes now.
        let decoded: TaskResponse = decoder.decode_next().unwrap().unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_partial_prefix_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let first = TaskResponse::ok(1, serde_json::json!(null));
        let second = TaskResponse::ok(2, serde_json::json!(null));
        let mut bytes = encode_frame(&first).unwrap();
        bytes.extend_from_slice(&encode_frame(&second).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let a: TaskResponse = decoder.decode_next().unwrap().unwrap();
        let b: TaskResponse = decoder.decode_next().unwrap().unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&u32::MAX.to_be_bytes());
        decoder.extend(&[0u8; 16]);
        assert!(matches!(
            decoder.next_frame(),
            Err(FramingError::Oversized(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_a_framing_error() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&3u32.to_be_bytes());
        decoder.extend(b"{!}");
        assert!(matches!(
            decoder.decode_next::<TaskResponse>(),
            Err(FramingError::Payload(_))
        ));
    }
}
