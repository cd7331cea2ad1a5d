//! Identity handshake.
//!
//! Immediately after connecting, a worker writes the 16 raw bytes of its
//! [`AgentIdentity`]. There is no framing and no acknowledgment; framed
//! traffic starts right after.

use quorra_core::AgentIdentity;
use quorra_core::ids::IDENTITY_LEN;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::errors::ProtocolError;

/// Write the identity bytes.
pub async fn write_identity<W>(writer: &mut W, identity: &AgentIdentity) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(identity.as_bytes()).await?;
    writer.flush().await?;
    trace!(agent_id = %identity, "identity sent");
    Ok(())
}

/// Read the identity bytes.
///
/// A connection closed before all 16 bytes arrive is
/// [`ProtocolError::ConnectionClosed`].
pub async fn read_identity<R>(reader: &mut R) -> Result<AgentIdentity, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; IDENTITY_LEN];
    match reader.read_exact(&mut bytes).await {
        Ok(_) => {
            let identity = AgentIdentity::from_bytes(bytes);
            trace!(agent_id = %identity, "identity received");
            Ok(identity)
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            debug!("connection closed during the identity handshake");
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn identity_goes_out_as_raw_bytes() {
        let identity = AgentIdentity::new();
        let mut out = Vec::new();
        write_identity(&mut out, &identity).await.unwrap();
        assert_eq!(out.as_slice(), identity.as_bytes());
    }

    #[tokio::test]
    async fn read_back_matches() {
        let identity = AgentIdentity::new();
        let (mut a, mut b) = tokio::io::duplex(64);
        write_identity(&mut a, &identity).await.unwrap();
        assert_eq!(read_identity(&mut b).await.unwrap(), identity);
    }

    #[tokio::test]
    async fn short_read_is_connection_closed() {
        let mut short: &[u8] = &[1, 2, 3];
        assert_matches!(read_identity(&mut short).await, Err(ProtocolError::ConnectionClosed));
    }
}
