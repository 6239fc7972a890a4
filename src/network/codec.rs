// Length-framed peer wire protocol (spec.md §4.G).
//
// Frame layout: 4-byte big-endian length prefix followed by a
// bincode-serialized `PeerMessage`. Big-endian here (unlike the WAL
// codec's little-endian length) matches network byte order
// convention, since this frame crosses process boundaries over TCP.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::network::types::PeerMessage;

/// Frames larger than this are rejected outright: a well-formed peer
/// never sends a single message this large, so a bigger length prefix
/// indicates either a protocol mismatch or a malicious/corrupt peer.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub fn encode_message(message: &PeerMessage) -> Result<Vec<u8>> {
    let body = bincode::serde::encode_to_vec(message, bincode_config())?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_message(
    writer: &mut (impl tokio::io::AsyncWrite + Unpin),
    message: &PeerMessage,
) -> Result<()> {
    let frame = encode_message(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-framed `PeerMessage` from `reader`. Returns
/// `Ok(None)` on a clean connection close before any bytes of a new
/// frame arrive.
pub async fn read_message(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
) -> Result<Option<PeerMessage>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::from(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(Error::Io(format!("peer frame of {len} bytes exceeds max {MAX_FRAME_BYTES}")));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let (message, _): (PeerMessage, usize) = bincode::serde::decode_from_slice(&body, bincode_config())?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeId;

    #[tokio::test]
    async fn round_trips_through_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let message = PeerMessage::Heartbeat {
            node_id: NodeId::new("node-1"),
            term: 7,
        };
        write_message(&mut client, &message).await.unwrap();
        let decoded = read_message(&mut server).await.unwrap().unwrap();
        match decoded {
            PeerMessage::Heartbeat { node_id, term } => {
                assert_eq!(node_id.as_str(), "node-1");
                assert_eq!(term, 7);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        client.flush().await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        drop(client);
    }
}
