//! File checksums.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_util::io::ReaderStream;

/// Lower-hex SHA-256 and length of a file, streamed in chunks.
pub async fn sha256_file(path: &Path) -> std::io::Result<(String, u64)> {
    let file = tokio::fs::File::open(path).await?;
    let mut stream = ReaderStream::new(file);
    let mut hasher = Sha256::new();
    let mut length = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk: bytes::Bytes = chunk?;
        length += chunk.len() as u64;
        hasher.update(&chunk);
    }

    Ok((format!("{:x}", hasher.finalize()), length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_known_digest() -> std::io::Result<()> {
        let file = NamedTempFile::new()?;
        std::fs::write(file.path(), b"abc")?;

        let (digest, length) = sha256_file(file.path()).await?;
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(length, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file() {
        assert!(sha256_file(Path::new("/nonexistent/file")).await.is_err());
    }
}
