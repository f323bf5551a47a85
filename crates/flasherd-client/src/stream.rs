//! Builds the outbound frame sequence for one call.
//!
//! Every binary is read in [`CHUNK_SIZE`] blocks and sent as chunk frames,
//! one file after the other in the order given; the command frame goes last.

use crate::error::{ClientError, Result};
use bytes::Bytes;
use flasherd_core::{
    frame::{ChunkFrame, CommandFrame, OutboundFrame},
    types::{CHUNK_SIZE, validate_binary_name},
};
use std::path::{Path, PathBuf};
use tokio::{fs::File, io::AsyncReadExt};

/// A local file to stage under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub name: String,
    pub path: PathBuf,
}

impl Binary {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Splits the file at `path` into chunk frames for `name`.
///
/// Every block but the last is exactly [`CHUNK_SIZE`] bytes. An empty file
/// produces no frames.
pub async fn read_chunks(name: &str, path: &Path) -> Result<Vec<ChunkFrame>> {
    let read_err = |source| ClientError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).await.map_err(read_err)?;
    let mut chunks = Vec::new();
    loop {
        let mut block = Vec::with_capacity(CHUNK_SIZE);
        // `take` keeps reading until the block is full or the file ends, so
        // short reads never produce short blocks mid-file.
        let n = (&mut file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut block)
            .await
            .map_err(read_err)?;
        if n == 0 {
            break;
        }
        chunks.push(ChunkFrame {
            binary_name: name.to_string(),
            data: Bytes::from(block),
        });
    }

    tracing::debug!("Read {} as {} chunks", path.display(), chunks.len());
    Ok(chunks)
}

/// The full outbound sequence: all chunks of each binary in turn, then
/// `command`.
///
/// # Errors
///
/// Fails before anything is sent if a binary name is not a plain file name
/// or a file cannot be read.
pub async fn build_frames(binaries: &[Binary], command: CommandFrame) -> Result<Vec<OutboundFrame>> {
    let mut frames = Vec::new();
    for binary in binaries {
        validate_binary_name(&binary.name)?;
        let chunks = read_chunks(&binary.name, &binary.path).await?;
        frames.extend(chunks.into_iter().map(OutboundFrame::Chunk));
    }
    frames.push(OutboundFrame::Command(command));
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let path = dir.join(name);
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, payload).unwrap();
        path
    }

    #[tokio::test]
    async fn splits_into_full_blocks_and_a_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "fw.hex", CHUNK_SIZE * 3 + 10);

        let chunks = read_chunks("zephyr_hex", &path).await.unwrap();
        let sizes: Vec<_> = chunks.iter().map(|c| c.data.len()).collect();
        assert_eq!(sizes, [CHUNK_SIZE, CHUNK_SIZE, CHUNK_SIZE, 10]);
        assert!(chunks.iter().all(|c| c.binary_name == "zephyr_hex"));

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        assert_eq!(joined, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn exact_multiple_has_no_empty_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "fw.bin", CHUNK_SIZE * 2);
        let chunks = read_chunks("fw", &path).await.unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn empty_file_yields_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "empty", 0);
        assert!(read_chunks("empty", &path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_comes_last_after_each_binary_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_file(dir.path(), "a", CHUNK_SIZE + 1);
        let b = write_file(dir.path(), "b", 5);
        let binaries = [Binary::new("first", a), Binary::new("second", b)];

        let frames = build_frames(&binaries, CommandFrame::everywhere("true"))
            .await
            .unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|f| match f {
                OutboundFrame::Chunk(c) => c.binary_name.as_str(),
                OutboundFrame::Command(_) => "<command>",
            })
            .collect();
        assert_eq!(names, ["first", "first", "second", "<command>"]);
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let binaries = [Binary::new("fw", &missing)];
        let err = build_frames(&binaries, CommandFrame::everywhere("true"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Read { ref path, .. } if *path == missing));
    }

    #[tokio::test]
    async fn rejects_path_like_names_before_reading() {
        let binaries = [Binary::new("../fw", "/does/not/matter")];
        let err = build_frames(&binaries, CommandFrame::everywhere("true"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(flasherd_core::Error::InvalidRequest { .. })
        ));
    }
}
