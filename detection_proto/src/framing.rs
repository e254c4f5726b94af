use crate::message::Message;
use std::io::ErrorKind;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound applied to declared frame lengths unless the caller picks one.
pub const DEFAULT_MAX_MESSAGE_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed in the middle of a message")]
    Truncated,
    #[error("Message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },
    #[error("Message is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("Message is not a valid envelope: {0}")]
    Json(#[from] serde_json::Error),
}

fn truncated_on_eof(err: std::io::Error) -> ProtocolError {
    if err.kind() == ErrorKind::UnexpectedEof {
        ProtocolError::Truncated
    } else {
        ProtocolError::Io(err)
    }
}

/// Reads one `u32` big-endian length-prefixed JSON message.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a message
/// boundary. A stream that ends anywhere else is `ProtocolError::Truncated`.
pub async fn read_message<R>(reader: &mut R, max_len: u32) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader
        .read_exact(&mut len_buf[1..])
        .await
        .map_err(truncated_on_eof)?;

    let len = u32::from_be_bytes(len_buf);
    if len > max_len {
        return Err(ProtocolError::MessageTooLarge {
            len: len as usize,
            max: max_len as usize,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(truncated_on_eof)?;

    let text = String::from_utf8(body)?;
    let message = serde_json::from_str(&text)?;
    Ok(Some(message))
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::MessageTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
