// Chunk Transfer Protocol (C2): the request/response wire protocol run over
// a reliable libp2p stream under `/filezap/chunk/1.0.0`. Generic over any
// `AsyncRead + AsyncWrite` so it can be exercised in tests over
// `tokio::io::duplex` without a real swarm.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use libp2p::request_response;
use libp2p::PeerId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{FileZapError, FileZapResult};
use crate::resilience::with_timeout;

pub const PROTOCOL_ID: &str = "/filezap/chunk/1.0.0";

const MAX_HASH_LEN: usize = 64;
/// Matches `StorageConfig::max_chunk_size`'s default (100 MiB) — a chunk
/// this large is the biggest single body the protocol ever has to carry.
const MAX_BODY_LEN: usize = 100 * 1024 * 1024;
/// Segment size for streaming a success body (§4.2 step 4): "framed as
/// 1 MiB segments until EOF".
const SEGMENT_LEN: usize = 1024 * 1024;
const HASH_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_READ_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_OK: u8 = 0x01;
const STATUS_ERR: u8 = 0x00;

/// Write the request frame: `[hash_len: u8][hash bytes, UTF-8]`.
pub async fn send_request<S: AsyncWriteExt + Unpin>(stream: &mut S, hash: &str) -> FileZapResult<()> {
    if hash.len() > MAX_HASH_LEN {
        return Err(FileZapError::InvalidKey(format!("hash longer than {MAX_HASH_LEN} bytes")));
    }
    stream.write_u8(hash.len() as u8).await?;
    stream.write_all(hash.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a request frame, applying the 10s hash-receive deadline.
pub async fn recv_request<S: AsyncReadExt + Unpin>(stream: &mut S) -> FileZapResult<String> {
    with_timeout(
        async {
            let len = stream.read_u8().await? as usize;
            if len > MAX_HASH_LEN {
                return Err(FileZapError::InvalidKey(format!("hash longer than {MAX_HASH_LEN} bytes")));
            }
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).await?;
            String::from_utf8(buf).map_err(|e| FileZapError::ContentMalformed(e.to_string()))
        },
        HASH_TIMEOUT,
        "recv_request",
    )
    .await?
}

/// Write a success response: `[STATUS_OK]` followed by the body framed as
/// `[segment_len: u32 BE][segment bytes]` pairs of up to `SEGMENT_LEN` each,
/// terminated by a zero-length segment marking EOF.
pub async fn send_success<S: AsyncWriteExt + Unpin>(stream: &mut S, body: &[u8]) -> FileZapResult<()> {
    if body.len() > MAX_BODY_LEN {
        return Err(FileZapError::SizeMismatch { len: body.len() });
    }
    stream.write_u8(STATUS_OK).await?;
    for segment in body.chunks(SEGMENT_LEN) {
        stream.write_u32(segment.len() as u32).await?;
        stream.write_all(segment).await?;
    }
    stream.write_u32(0).await?;
    stream.flush().await?;
    Ok(())
}

/// Write a failure response: `[STATUS_ERR][reason_len: u8][reason, UTF-8]`.
pub async fn send_failure<S: AsyncWriteExt + Unpin>(stream: &mut S, reason: &str) -> FileZapResult<()> {
    let reason_bytes = reason.as_bytes();
    let len = reason_bytes.len().min(u8::MAX as usize);
    stream.write_u8(STATUS_ERR).await?;
    stream.write_u8(len as u8).await?;
    stream.write_all(&reason_bytes[..len]).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a response frame, applying the 5s per-read deadline to each segment
/// (hash-receive deadline is separate; see `recv_request`).
pub async fn recv_response<S: AsyncReadExt + Unpin>(stream: &mut S) -> FileZapResult<Vec<u8>> {
    let status = with_timeout(stream.read_u8(), BODY_READ_TIMEOUT, "recv_response_status").await??;
    match status {
        STATUS_OK => {
            let mut buf = Vec::new();
            loop {
                let seg_len = with_timeout(stream.read_u32(), BODY_READ_TIMEOUT, "recv_response_segment_len").await?? as usize;
                if seg_len == 0 {
                    break;
                }
                if buf.len() + seg_len > MAX_BODY_LEN {
                    return Err(FileZapError::SizeMismatch { len: buf.len() + seg_len });
                }
                let mut segment = vec![0u8; seg_len];
                with_timeout(stream.read_exact(&mut segment), BODY_READ_TIMEOUT, "recv_response_segment_body").await??;
                buf.extend_from_slice(&segment);
            }
            Ok(buf)
        }
        STATUS_ERR => {
            let len = with_timeout(stream.read_u8(), BODY_READ_TIMEOUT, "recv_response_reason_len").await?? as usize;
            let mut buf = vec![0u8; len];
            with_timeout(stream.read_exact(&mut buf), BODY_READ_TIMEOUT, "recv_response_reason").await??;
            let reason = String::from_utf8(buf).unwrap_or_else(|_| "<malformed reason>".to_string());
            Err(FileZapError::ConnectionClosed(reason))
        }
        other => Err(FileZapError::ContentMalformed(format!("unknown status byte {other}"))),
    }
}

/// Request a chunk from `provider` over an already-open stream, refusing
/// self-downloads before touching the network.
pub async fn request_chunk<S: AsyncReadExt + AsyncWriteExt + Unpin>(
    stream: &mut S,
    requester: PeerId,
    provider: PeerId,
    hash: &str,
) -> FileZapResult<Vec<u8>> {
    if requester == provider {
        return Err(FileZapError::SelfDownload);
    }
    send_request(stream, hash).await?;
    let body = recv_response(stream).await?;
    let payload = crate::crypto::chunk_payload(&body)?;
    let actual = crate::crypto::sha256_hex(payload);
    if actual != hash {
        return Err(FileZapError::HashMismatch {
            expected: hash.to_string(),
            actual,
        });
    }
    Ok(body)
}

/// The `/filezap/chunk/1.0.0` protocol name, as used by `libp2p::request_response`.
#[derive(Debug, Clone, Default)]
pub struct ChunkProtocol;

impl AsRef<str> for ChunkProtocol {
    fn as_ref(&self) -> &str {
        PROTOCOL_ID
    }
}

/// A chunk response as seen by the swarm behaviour: either the framed chunk
/// body, or a reason string (e.g. "not held locally").
pub type ChunkResponse = Result<Vec<u8>, String>;

/// Adapts the wire functions above to `request_response::Codec`, so the same
/// framing runs whether it's driven by a real swarm stream or (in the tests
/// below) a `tokio::io::duplex` pair.
#[derive(Debug, Clone, Default)]
pub struct ChunkCodec;

#[async_trait]
impl request_response::Codec for ChunkCodec {
    type Protocol = ChunkProtocol;
    type Request = String;
    type Response = ChunkResponse;

    async fn read_request<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        recv_request(io).await.map_err(to_io_error)
    }

    async fn read_response<T>(&mut self, _: &Self::Protocol, io: &mut T) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        match recv_response(io).await {
            Ok(body) => Ok(Ok(body)),
            Err(FileZapError::ConnectionClosed(reason)) => Ok(Err(reason)),
            Err(e) => Err(to_io_error(e)),
        }
    }

    async fn write_request<T>(&mut self, _: &Self::Protocol, io: &mut T, req: Self::Request) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        send_request(io, &req).await.map_err(to_io_error)
    }

    async fn write_response<T>(&mut self, _: &Self::Protocol, io: &mut T, res: Self::Response) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        match res {
            Ok(body) => send_success(io, &body).await.map_err(to_io_error),
            Err(reason) => send_failure(io, &reason).await.map_err(to_io_error),
        }
    }
}

fn to_io_error(e: FileZapError) -> io::Error {
    io::Error::other(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::format_chunk;

    #[tokio::test]
    async fn round_trips_a_successful_chunk_response() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let payload = b"chunk bytes";
        let hash = crate::crypto::sha256_hex(payload);
        let framed = format_chunk(payload);

        let server_hash = hash.clone();
        let server_task = tokio::spawn(async move {
            let got_hash = recv_request(&mut server).await.unwrap();
            assert_eq!(got_hash, server_hash);
            send_success(&mut server, &framed).await.unwrap();
        });

        let requester = PeerId::random();
        let provider = PeerId::random();
        let body = request_chunk(&mut client, requester, provider, &hash).await.unwrap();
        assert_eq!(crate::crypto::chunk_payload(&body).unwrap(), payload);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn round_trips_a_body_spanning_multiple_1mib_segments() {
        let (mut client, mut server) = tokio::io::duplex(8 * 1024 * 1024);
        let payload = vec![0xABu8; 2 * SEGMENT_LEN + 17];
        let hash = crate::crypto::sha256_hex(&payload);
        let framed = format_chunk(&payload);

        let server_hash = hash.clone();
        let server_task = tokio::spawn(async move {
            let got_hash = recv_request(&mut server).await.unwrap();
            assert_eq!(got_hash, server_hash);
            send_success(&mut server, &framed).await.unwrap();
        });

        let requester = PeerId::random();
        let provider = PeerId::random();
        let body = request_chunk(&mut client, requester, provider, &hash).await.unwrap();
        assert_eq!(crate::crypto::chunk_payload(&body).unwrap(), payload.as_slice());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_self_download_before_touching_the_stream() {
        let (mut client, _server) = tokio::io::duplex(64);
        let peer = PeerId::random();
        let err = request_chunk(&mut client, peer, peer, "anything").await.unwrap_err();
        assert!(matches!(err, FileZapError::SelfDownload));
    }

    #[tokio::test]
    async fn surfaces_hash_mismatch_on_tampered_body() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let hash = crate::crypto::sha256_hex(b"expected");
        let framed = format_chunk(b"not expected");

        let server_task = tokio::spawn(async move {
            let _ = recv_request(&mut server).await.unwrap();
            send_success(&mut server, &framed).await.unwrap();
        });

        let requester = PeerId::random();
        let provider = PeerId::random();
        let err = request_chunk(&mut client, requester, provider, &hash).await.unwrap_err();
        assert!(matches!(err, FileZapError::HashMismatch { .. }));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn failure_response_surfaces_as_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            let _ = recv_request(&mut server).await.unwrap();
            send_failure(&mut server, "not found").await.unwrap();
        });

        let requester = PeerId::random();
        let provider = PeerId::random();
        let err = request_chunk(&mut client, requester, provider, "somehash").await.unwrap_err();
        assert!(matches!(err, FileZapError::ConnectionClosed(_)));
        server_task.await.unwrap();
    }
}
