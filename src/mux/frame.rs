use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::MuxError;

/// Fixed mux protocol version. Spec §4.4/§6 pin this for wire compatibility;
/// there is currently nothing to negotiate.
pub const VERSION: u8 = 1;

pub const CMD_SYN: u8 = 0;
pub const CMD_FIN: u8 = 1;
pub const CMD_PSH: u8 = 2;
pub const CMD_NOP: u8 = 3;
pub const CMD_UPD: u8 = 4;

const HEADER_LEN: usize = 8;

/// One smux-style frame: `{ver, cmd, length, stream_id}` header followed by
/// `length` bytes of payload (spec §6).
#[derive(Debug, Clone)]
pub struct Frame {
    pub cmd: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(cmd: u8, stream_id: u32, payload: Bytes) -> Self {
        Self {
            cmd,
            stream_id,
            payload,
        }
    }

    pub fn nop() -> Self {
        Self::new(CMD_NOP, 0, Bytes::new())
    }

    pub fn syn(stream_id: u32) -> Self {
        Self::new(CMD_SYN, stream_id, Bytes::new())
    }

    pub fn fin(stream_id: u32) -> Self {
        Self::new(CMD_FIN, stream_id, Bytes::new())
    }

    pub fn push(stream_id: u32, payload: Bytes) -> Self {
        Self::new(CMD_PSH, stream_id, payload)
    }

    pub fn window_update(stream_id: u32, consumed: u32) -> Self {
        Self::new(CMD_UPD, stream_id, Bytes::copy_from_slice(&consumed.to_be_bytes()))
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        let mut header = [0u8; HEADER_LEN];
        header[0] = VERSION;
        header[1] = self.cmd;
        header[2..4].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        header[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        w.write_all(&header).await?;
        if !self.payload.is_empty() {
            w.write_all(&self.payload).await?;
        }
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(
        r: &mut R,
        max_frame_size: usize,
    ) -> Result<Frame, MuxError> {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header).await?;
        let version = header[0];
        if version != VERSION {
            return Err(MuxError::UnsupportedVersion(version));
        }
        let cmd = header[1];
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let stream_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if len > max_frame_size {
            return Err(MuxError::FrameTooLarge {
                len,
                max: max_frame_size,
            });
        }
        let mut payload = BytesMut::zeroed(len);
        if len > 0 {
            r.read_exact(&mut payload).await?;
        }
        Ok(Frame {
            cmd,
            stream_id,
            payload: payload.freeze(),
        })
    }
}

pub fn decode_window_update(payload: &Bytes) -> u32 {
    if payload.len() < 4 {
        return 0;
    }
    u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_push_frame() {
        let frame = Frame::push(3, Bytes::from_static(b"hello"));
        let mut buf = Vec::new();
        frame.write(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Frame::read(&mut cursor, 64 * 1024).await.unwrap();
        assert_eq!(decoded.cmd, CMD_PSH);
        assert_eq!(decoded.stream_id, 3);
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[tokio::test]
    async fn rejects_oversized_frames() {
        let frame = Frame::push(1, Bytes::from(vec![0u8; 100]));
        let mut buf = Vec::new();
        frame.write(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let err = Frame::read(&mut cursor, 10).await.unwrap_err();
        assert!(matches!(err, MuxError::FrameTooLarge { .. }));
    }

    #[test]
    fn window_update_round_trips() {
        let f = Frame::window_update(7, 1234);
        assert_eq!(decode_window_update(&f.payload), 1234);
    }
}
