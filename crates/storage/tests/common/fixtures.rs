use bytes::Bytes;
use std::sync::Arc;
use stitch_storage::{BlobStore, FilesystemBackend, MemoryBackend};
use tempfile::TempDir;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// One instance of every bundled backend. Keep the TempDir alive for the
/// duration of the test.
pub async fn backends() -> (TempDir, Vec<Arc<dyn BlobStore>>) {
    let dir = TempDir::new().unwrap();
    let fs = FilesystemBackend::new(dir.path().join("store")).await.unwrap();
    (dir, vec![Arc::new(fs), Arc::new(MemoryBackend::new())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_seeded_bytes_different_seeds() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(43, 1000);
        assert_ne!(data1, data2);
    }
}
