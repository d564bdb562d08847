//! Reassembly of downloaded segments into one output file.
//!
//! Segments are written in ascending `sequence_index`, whatever order the
//! tasks arrive in. A failed segment is skipped and its index reported; the
//! output is still produced from what succeeded. Each buffer is released as
//! soon as it has been consumed, so a long playlist never holds more than one
//! segment in memory at a time during this stage.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadTask, SegmentBuffer, TaskState};

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Summary of an assembled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyResult {
    /// Where the artifact was written.
    pub output_path: PathBuf,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Number of segments appended.
    pub segments_written: usize,
    /// Indices of segments left out, ascending.
    pub missing_indices: Vec<usize>,
    /// Lowercase hex SHA-256 of the written bytes.
    pub content_hash: String,
}

impl AssemblyResult {
    /// True when every segment made it into the output.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing_indices.is_empty()
    }
}

/// Fatal errors writing the output.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("cannot create output file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed writing output file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Concatenates succeeded segment buffers into `output_path`.
///
/// The output is created (or truncated) once and flushed once. A task that
/// failed, or that is somehow not terminal, is recorded as missing. A buffer
/// file that cannot be read back is also treated as missing.
///
/// # Errors
///
/// Returns [`AssemblyError`] if the output cannot be created or written. A
/// write failure leaves no file at `output_path`.
#[instrument(skip(tasks), fields(tasks = tasks.len(), output = %output_path.display()))]
pub async fn assemble(
    tasks: Vec<DownloadTask>,
    output_path: &Path,
) -> Result<AssemblyResult, AssemblyError> {
    let file = File::create(output_path)
        .await
        .map_err(|source| AssemblyError::Create {
            path: output_path.to_path_buf(),
            source,
        })?;
    assemble_into(BufWriter::new(file), tasks, output_path).await
}

/// Writes `tasks` through `writer`; on a write error the partial file at
/// `output_path` is removed.
async fn assemble_into<W>(
    mut writer: W,
    mut tasks: Vec<DownloadTask>,
    output_path: &Path,
) -> Result<AssemblyResult, AssemblyError>
where
    W: AsyncWrite + Unpin,
{
    tasks.sort_by_key(DownloadTask::index);

    let written = match write_segments(&mut writer, tasks).await {
        Ok(written) => written,
        Err(source) => {
            drop(writer);
            discard_partial(output_path).await;
            return Err(AssemblyError::Write {
                path: output_path.to_path_buf(),
                source,
            });
        }
    };

    let Written {
        bytes_written,
        segments_written,
        missing_indices,
        content_hash,
    } = written;

    if missing_indices.is_empty() {
        info!(bytes_written, segments_written, "assembled output");
    } else {
        warn!(
            bytes_written,
            segments_written,
            missing = missing_indices.len(),
            "assembled output with missing segments"
        );
    }

    Ok(AssemblyResult {
        output_path: output_path.to_path_buf(),
        bytes_written,
        segments_written,
        missing_indices,
        content_hash,
    })
}

struct Written {
    bytes_written: u64,
    segments_written: usize,
    missing_indices: Vec<usize>,
    content_hash: String,
}

async fn write_segments<W>(writer: &mut W, tasks: Vec<DownloadTask>) -> std::io::Result<Written>
where
    W: AsyncWrite + Unpin,
{
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    let mut segments_written = 0usize;
    let mut missing_indices = Vec::new();

    for task in tasks {
        let index = task.index();
        let bytes = match task.into_state() {
            TaskState::Succeeded(buffer) => match take_buffer(buffer).await {
                Some(bytes) => bytes,
                None => {
                    missing_indices.push(index);
                    continue;
                }
            },
            TaskState::Failed(cause) => {
                debug!(index, error = %cause, "skipping failed segment");
                missing_indices.push(index);
                continue;
            }
            state @ (TaskState::Pending | TaskState::InFlight) => {
                warn!(index, %state, "skipping unfinished segment");
                missing_indices.push(index);
                continue;
            }
        };

        writer.write_all(&bytes).await?;
        hasher.update(&bytes);
        bytes_written += bytes.len() as u64;
        segments_written += 1;
    }
    writer.flush().await?;

    Ok(Written {
        bytes_written,
        segments_written,
        missing_indices,
        content_hash: format!("{:x}", hasher.finalize()),
    })
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}

/// Size and lowercase hex SHA-256 of an existing file.
///
/// # Errors
///
/// Returns the underlying IO error if the file cannot be opened or read.
pub async fn hash_file(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; HASH_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = file.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        total += read as u64;
    }

    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Reads a buffer's bytes and releases it. File buffers are deleted.
async fn take_buffer(buffer: SegmentBuffer) -> Option<Bytes> {
    match buffer {
        SegmentBuffer::Memory(bytes) => Some(bytes),
        SegmentBuffer::File { path, .. } => {
            let read = tokio::fs::read(&path).await;
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "failed to remove segment buffer");
            }
            match read {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "segment buffer unreadable; treating as missing");
                    None
                }
            }
        }
    }
}
