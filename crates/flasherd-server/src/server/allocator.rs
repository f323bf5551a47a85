//! Request ID allocation.
//!
//! Every invocation is identified by a [`RequestId`] that prefixes the names
//! of the binaries it stages. IDs are never reused within a process and,
//! because the staging directory is scanned on startup, not across restarts
//! either (as long as nobody edits the directory in between).

use flasherd_core::{
    Error, Result,
    types::{INITIAL_REQUEST_ID, RequestId, parse_staged_file_name},
};
use portable_atomic::{AtomicU64, Ordering};
use std::path::Path;

/// Hands out strictly increasing request IDs.
///
/// Constructed once at startup and shared by every invocation handler.
#[derive(Debug)]
pub struct RequestIdAllocator {
    next: AtomicU64,
}

impl RequestIdAllocator {
    /// Creates an allocator whose first ID is `first`.
    pub const fn new(first: RequestId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Creates `staging_dir` if needed and seeds the allocator one past the
    /// highest ID found in it, but never below [`INITIAL_REQUEST_ID`].
    ///
    /// Entries that do not look like `<id>_<name>` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Staging`] if the directory cannot be created or read.
    pub async fn recover(staging_dir: &Path) -> Result<Self> {
        let io_err = |source| Error::Staging {
            path: staging_dir.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(staging_dir).await.map_err(io_err)?;

        let mut max_seen: Option<RequestId> = None;
        let mut entries = tokio::fs::read_dir(staging_dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let file_name = entry.file_name();
            let Some((id, _)) = file_name.to_str().and_then(parse_staged_file_name) else {
                tracing::warn!(
                    "Ignoring unrecognized entry in staging dir: {:?}",
                    file_name
                );
                continue;
            };
            max_seen = max_seen.max(Some(id));
        }

        let first = match max_seen {
            Some(id) => id.saturating_add(1).max(INITIAL_REQUEST_ID),
            None => INITIAL_REQUEST_ID,
        };
        tracing::info!(
            "Request IDs start at {first} (highest staged: {:?})",
            max_seen
        );

        Ok(Self::new(first))
    }

    /// Returns a fresh ID, strictly greater than every ID returned before.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdExhausted`] once the counter reaches `u64::MAX`.
    pub fn next_id(&self) -> Result<RequestId> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| Error::IdExhausted)
    }

    /// The ID the next call to [`Self::next_id`] would return.
    pub fn peek(&self) -> RequestId {
        self.next.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn empty_dir_starts_at_floor() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = RequestIdAllocator::recover(dir.path()).await.unwrap();
        assert_eq!(alloc.next_id().unwrap(), INITIAL_REQUEST_ID);
        assert_eq!(alloc.next_id().unwrap(), INITIAL_REQUEST_ID + 1);
    }

    #[tokio::test]
    async fn missing_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("nested").join("flasherd");
        RequestIdAllocator::recover(&staging).await.unwrap();
        assert!(staging.is_dir());
    }

    #[tokio::test]
    async fn resumes_past_highest_staged_id() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["70_zephyr_hex", "412_payload", "99_payload", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let alloc = RequestIdAllocator::recover(dir.path()).await.unwrap();
        assert_eq!(alloc.next_id().unwrap(), 413);
    }

    #[tokio::test]
    async fn low_staged_ids_are_clamped_to_floor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("3_payload"), b"x").unwrap();
        let alloc = RequestIdAllocator::recover(dir.path()).await.unwrap();
        assert_eq!(alloc.peek(), INITIAL_REQUEST_ID);
    }

    #[test]
    fn exhaustion_is_an_error_not_a_wrap() {
        let alloc = RequestIdAllocator::new(u64::MAX - 1);
        assert_eq!(alloc.next_id().unwrap(), u64::MAX - 1);
        assert!(matches!(alloc.next_id(), Err(Error::IdExhausted)));
        assert!(matches!(alloc.next_id(), Err(Error::IdExhausted)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_never_share_an_id() {
        let alloc = Arc::new(RequestIdAllocator::new(INITIAL_REQUEST_ID));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                tokio::spawn(async move {
                    let mut ids = Vec::with_capacity(500);
                    for _ in 0..500 {
                        ids.push(alloc.next_id().unwrap());
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            for id in ids {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
        assert_eq!(alloc.peek(), INITIAL_REQUEST_ID + 4000);
    }
}
