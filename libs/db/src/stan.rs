//! The STAN counter file (`stan.json`), persisted under a lock-guarded
//! `next()` call on every allocation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::DbError;

const WRAP_AT: u64 = 999_999_999_999;

#[derive(Debug, Serialize, Deserialize)]
struct StanFile {
    stan: u64,
}

/// A monotonic 12-digit STAN generator backed by a small JSON file.
pub struct StanAllocator {
    path: PathBuf,
    counter: Mutex<u64>,
}

impl StanAllocator {
    /// Reads the initial counter value from `path`. If the file does not
    /// exist yet, it is created holding `{"stan": 0}` so a fresh
    /// deployment does not need to be seeded by hand.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, DbError> {
        let path = path.into();

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StanFile>(&bytes)?.stan,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let seed = StanFile { stan: 0 };
                write_stan_file(&path, &seed).await?;
                0
            }
            Err(e) => return Err(DbError::Io(e)),
        };

        Ok(StanAllocator {
            path,
            counter: Mutex::new(initial),
        })
    }

    /// Increments the counter (wrapping `999_999_999_999 -> 1`), persists
    /// the new value to the STAN file, and returns it zero-padded to 12
    /// digits. Persisting before returning means a crash between
    /// increment and the next allocation never reuses a STAN the caller
    /// has already seen.
    pub async fn next(&self) -> Result<String, DbError> {
        let mut counter = self.counter.lock().await;
        let next_value = if *counter >= WRAP_AT { 1 } else { *counter + 1 };

        write_stan_file(&self.path, &StanFile { stan: next_value }).await?;
        *counter = next_value;

        Ok(format!("{next_value:012}"))
    }
}

async fn write_stan_file(path: &std::path::Path, stan: &StanFile) -> Result<(), DbError> {
    let serialized = serde_json::to_string_pretty(stan)?;
    tokio::fs::write(path, serialized).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stan.json");
        let allocator = StanAllocator::load(&path).await.unwrap();

        assert_eq!(allocator.next().await.unwrap(), "000000000001");
        assert_eq!(allocator.next().await.unwrap(), "000000000002");
    }

    #[tokio::test]
    async fn wraps_at_the_twelve_digit_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stan.json");
        tokio::fs::write(&path, r#"{"stan": 999999999999}"#)
            .await
            .unwrap();

        let allocator = StanAllocator::load(&path).await.unwrap();
        assert_eq!(allocator.next().await.unwrap(), "000000000001");
    }

    #[tokio::test]
    async fn persists_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stan.json");
        let allocator = StanAllocator::load(&path).await.unwrap();
        allocator.next().await.unwrap();

        let on_disk: StanFile =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk.stan, 1);
    }

    #[tokio::test]
    async fn missing_file_is_seeded_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let allocator = StanAllocator::load(&path).await.unwrap();
        assert_eq!(allocator.next().await.unwrap(), "000000000001");
    }
}
