//! Incremental reader for an append-only text file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{AppError, Result};

/// Bytes scanned backwards from the end of the file to find backlog lines.
const BACKLOG_SCAN_BYTES: u64 = 64 * 1024;

/// Follows a file by byte offset, yielding only complete lines.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl TailReader {
    /// Open `path` positioned at its end and return the last
    /// `backlog_lines` complete lines.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the file cannot be opened or read.
    pub async fn attach(path: &Path, backlog_lines: usize) -> Result<(Self, Vec<String>)> {
        let mut file = open(path).await?;
        let len = file_len(&file, path).await?;

        let start = len.saturating_sub(BACKLOG_SCAN_BYTES);
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| io_error(path, &err))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|err| io_error(path, &err))?;

        let mut reader = Self {
            path: path.to_owned(),
            offset: start + buf.len() as u64,
            partial: Vec::new(),
        };

        let mut lines = reader.split_lines(&buf);
        if start > 0 && !lines.is_empty() {
            // The scan began mid-line.
            lines.remove(0);
        }
        let skip = lines.len().saturating_sub(backlog_lines);
        Ok((reader, lines.split_off(skip)))
    }

    /// File being followed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current read offset in bytes.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read complete lines appended since the last call.
    ///
    /// A file shorter than the read offset is treated as truncated and is
    /// read again from the start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the file is gone or cannot be read.
    pub async fn read_new(&mut self) -> Result<Vec<String>> {
        let mut file = open(&self.path).await?;
        let len = file_len(&file, &self.path).await?;

        if len < self.offset {
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|err| io_error(&self.path, &err))?;
        let mut buf = Vec::new();
        let read = file
            .read_to_end(&mut buf)
            .await
            .map_err(|err| io_error(&self.path, &err))?;
        self.offset += read as u64;

        Ok(self.split_lines(&buf))
    }

    fn split_lines(&mut self, buf: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(buf);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

async fn open(path: &Path) -> Result<File> {
    File::open(path).await.map_err(|err| io_error(path, &err))
}

async fn file_len(file: &File, path: &Path) -> Result<u64> {
    Ok(file
        .metadata()
        .await
        .map_err(|err| io_error(path, &err))?
        .len())
}

fn io_error(path: &Path, err: &std::io::Error) -> AppError {
    AppError::Monitor(format!("{}: {err}", path.display()))
}
