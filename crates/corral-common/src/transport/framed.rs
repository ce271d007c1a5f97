use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{CorralError, Result};

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Sends one frame with length prefix.
///
/// Wire format: `[4-byte length as u32 big-endian] + [data]`
pub async fn write_frame<W>(stream: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = data.len() as u32;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| CorralError::Connection(format!("failed to write frame length: {}", e)))?;

    stream
        .write_all(data)
        .await
        .map_err(|e| CorralError::Connection(format!("failed to write frame data: {}", e)))?;

    stream
        .flush()
        .await
        .map_err(|e| CorralError::Connection(format!("failed to flush frame: {}", e)))?;

    Ok(())
}

/// Receives one frame with length prefix.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly at a frame
/// boundary. EOF in the middle of a frame is a connection error.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => {
            return Err(CorralError::Connection(format!(
                "failed to read frame length: {}",
                e
            )))
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_SIZE {
        return Err(CorralError::InvalidResponse(format!(
            "frame too large: {} bytes (max {} bytes)",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| CorralError::Connection(format!("failed to read frame data: {}", e)))?;

    Ok(Some(buf))
}
