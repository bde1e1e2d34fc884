//! IPC protocol between the host and an artifact module process
//!
//! Frames are `u32` big-endian length, one message-type byte, then a JSON
//! payload. The length counts the type byte plus the payload.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ModuleError, ModuleResult};

/// Upper bound on a single frame, to reject garbage lengths early.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Message types for the module IPC protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    // Host → Module
    Init = 1,
    Call = 2,
    Bind = 3,
    Unbind = 4,
    Shutdown = 5,

    // Module → Host
    Ready = 10,
    Result = 11,
    Error = 12,
    Log = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = ModuleError;

    fn try_from(value: u8) -> Result<Self, ModuleError> {
        match value {
            1 => Ok(MessageType::Init),
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::Bind),
            4 => Ok(MessageType::Unbind),
            5 => Ok(MessageType::Shutdown),
            10 => Ok(MessageType::Ready),
            11 => Ok(MessageType::Result),
            12 => Ok(MessageType::Error),
            13 => Ok(MessageType::Log),
            _ => Err(ModuleError::Ipc(format!("unknown message type: {}", value))),
        }
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn empty(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            payload: Vec::new(),
        }
    }

    /// Build a frame with a JSON payload
    pub fn json<T: Serialize>(msg_type: MessageType, data: &T) -> ModuleResult<Self> {
        let payload = serde_json::to_vec(data)
            .map_err(|e| ModuleError::Ipc(format!("failed to encode payload: {}", e)))?;
        Ok(Self::new(msg_type, payload))
    }

    /// Parse payload as JSON
    pub fn parse_json<T: for<'de> Deserialize<'de>>(&self) -> ModuleResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ModuleError::Ipc(format!("malformed {:?} payload: {}", self.msg_type, e)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub config: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRequest {
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub project: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: String,
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader / Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Writes frames to a byte sink (a child's stdin, or stdout inside a module)
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn send(&mut self, frame: &Frame) -> io::Result<()> {
        let len = (1 + frame.payload.len()) as u32;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&[frame.msg_type as u8])?;
        self.inner.write_all(&frame.payload)?;
        self.inner.flush()
    }

    pub fn send_json<T: Serialize>(&mut self, msg_type: MessageType, data: &T) -> ModuleResult<()> {
        let frame = Frame::json(msg_type, data)?;
        self.send(&frame)?;
        Ok(())
    }
}

/// Reads frames from a byte source
pub struct FrameReader<R: Read> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Receive the next frame; `None` on a clean end of stream.
    pub fn recv(&mut self) -> ModuleResult<Option<Frame>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        if len == 0 {
            return Err(ModuleError::Ipc("empty frame".to_string()));
        }
        if len > MAX_FRAME_LEN {
            return Err(ModuleError::Ipc(format!("frame too large: {} bytes", len)));
        }

        let mut type_buf = [0u8; 1];
        self.inner.read_exact(&mut type_buf)?;
        let msg_type = MessageType::try_from(type_buf[0])?;

        let mut payload = vec![0u8; len - 1];
        if !payload.is_empty() {
            self.inner.read_exact(&mut payload)?;
        }

        Ok(Some(Frame::new(msg_type, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf)
            .send(&Frame::new(MessageType::Call, b"{}".to_vec()))
            .unwrap();

        assert_eq!(&buf[..4], &3u32.to_be_bytes());
        assert_eq!(buf[4], MessageType::Call as u8);
        assert_eq!(&buf[5..], b"{}");
    }

    #[test]
    fn test_reads_consecutive_frames_then_eof() {
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.send(&Frame::empty(MessageType::Ready)).unwrap();
        writer
            .send_json(MessageType::Result, &ResultPayload { value: json!(42) })
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(buf));
        assert_eq!(reader.recv().unwrap().unwrap().msg_type, MessageType::Ready);

        let frame = reader.recv().unwrap().unwrap();
        assert_eq!(frame.parse_json::<ResultPayload>().unwrap().value, json!(42));

        assert!(reader.recv().unwrap().is_none());
    }

    #[test]
    fn test_rejects_unknown_type_and_empty_frame() {
        let mut reader = FrameReader::new(Cursor::new(vec![0, 0, 0, 1, 99]));
        assert!(matches!(reader.recv(), Err(ModuleError::Ipc(_))));

        let mut reader = FrameReader::new(Cursor::new(vec![0, 0, 0, 0]));
        assert!(matches!(reader.recv(), Err(ModuleError::Ipc(_))));
    }
}
