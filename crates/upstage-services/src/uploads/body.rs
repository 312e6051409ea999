//! Bounded body reading and hashing.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use upstage_core::AppError;
use upstage_storage::StorageError;

/// Read at most `limit` bytes. Reading stops as soon as the limit is reached,
/// so a body longer than `limit` yields exactly `limit` bytes.
pub async fn read_limited<S>(mut body: S, limit: u64) -> Result<Bytes, AppError>
where
    S: Stream<Item = Result<Bytes, AppError>> + Send + Unpin,
{
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let mut buf = BytesMut::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let remaining = limit - buf.len();
        if chunk.len() >= remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            break;
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

/// Size and SHA-256 hex digest of a stored object, reading at most `limit` bytes
pub async fn hash_stream<S>(mut stream: S, limit: u64) -> Result<(i64, String), AppError>
where
    S: Stream<Item = Result<Bytes, StorageError>> + Send + Unpin,
{
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let take = usize::try_from(limit.saturating_sub(total))
            .unwrap_or(usize::MAX)
            .min(chunk.len());
        hasher.update(&chunk[..take]);
        total += take as u64;
        if total >= limit {
            break;
        }
    }

    Ok((
        i64::try_from(total).unwrap_or(i64::MAX),
        hex::encode(hasher.finalize()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, AppError>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn reads_whole_body_under_limit() {
        let body = read_limited(chunks(&[b"abc", b"def"]), 7).await.unwrap();
        assert_eq!(&body[..], b"abcdef");
    }

    #[tokio::test]
    async fn stops_at_limit() {
        let body = read_limited(chunks(&[b"abcd", b"efgh", b"ijkl"]), 6)
            .await
            .unwrap();
        assert_eq!(&body[..], b"abcdef");
    }

    #[tokio::test]
    async fn body_errors_propagate() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(AppError::InvalidInput("connection reset".to_string())),
        ]);
        assert!(matches!(
            read_limited(failing, 10).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn hash_matches_one_shot_digest() {
        let stored = stream::iter(vec![
            Ok::<_, StorageError>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let (size, digest) = hash_stream(stored, 1024).await.unwrap();
        assert_eq!(size, 11);
        assert_eq!(digest, upstage_core::validation::sha256_hex(b"hello world"));
    }
}
