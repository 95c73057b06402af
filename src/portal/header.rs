use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::PortalError;

const MAX_FIELD_LEN: usize = 4096;

/// The first bytes a Portal Client writes on every mux stream before any
/// application data (spec §4.6, §6): `{token, mapping_id}`, each a
/// length-prefixed UTF-8 string.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    pub token: String,
    pub mapping_id: String,
}

impl StreamHeader {
    pub fn new(token: impl Into<String>, mapping_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            mapping_id: mapping_id.into(),
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<(), PortalError> {
        write_field(w, self.token.as_bytes()).await?;
        write_field(w, self.mapping_id.as_bytes()).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, PortalError> {
        let token = String::from_utf8(read_field(r).await?)
            .map_err(|_| PortalError::Io(invalid_data("stream header token is not valid utf-8")))?;
        let mapping_id = String::from_utf8(read_field(r).await?)
            .map_err(|_| PortalError::Io(invalid_data("stream header mapping_id is not valid utf-8")))?;
        Ok(Self { token, mapping_id })
    }
}

fn invalid_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

async fn write_field<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    w.write_u16(data.len() as u16).await?;
    w.write_all(data).await
}

async fn read_field<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Vec<u8>> {
    let len = r.read_u16().await? as usize;
    if len > MAX_FIELD_LEN {
        return Err(invalid_data("stream header field too large"));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_header() {
        let header = StreamHeader::new("tok-123", "mapping-a");
        let mut buf = Vec::new();
        header.write(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = StreamHeader::read(&mut cursor).await.unwrap();
        assert_eq!(decoded.token, "tok-123");
        assert_eq!(decoded.mapping_id, "mapping-a");
    }
}
