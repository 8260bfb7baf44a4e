use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crawlq_core::async_trait;
use crawlq_core::error::{Error, Result};
use tokio::sync::Mutex;

use super::{append_frame, frame_size, open_data_file, read_frame_at, read_len, LEN_SIZE};
use crate::QueueBackend;

struct LifoState {
    file: File,
    tail: u64,
    count: usize,
    closed: bool,
}

/// Disk-backed stack of byte records.
///
/// Popping reads the trailing length of the last frame and truncates the
/// data file, so the file always holds exactly the pending records.
pub struct LifoDiskQueue {
    dir: PathBuf,
    state: Mutex<LifoState>,
}

impl LifoDiskQueue {
    /// Open the stack stored in `dir`, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (file, scan) = open_data_file(&dir)?;
        log::debug!(
            "Opened LIFO disk queue {} with {} records",
            dir.display(),
            scan.starts.len()
        );

        Ok(Self {
            dir,
            state: Mutex::new(LifoState {
                file,
                tail: scan.end,
                count: scan.starts.len(),
                closed: false,
            }),
        })
    }

    /// Directory holding this queue
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

fn ensure_open(state: &LifoState) -> Result<()> {
    if state.closed {
        return Err(Error::scheduler("Queue is closed"));
    }
    Ok(())
}

#[async_trait]
impl QueueBackend<Vec<u8>> for LifoDiskQueue {
    async fn push(&self, item: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        let tail = state.tail;
        state.tail = append_frame(&mut state.file, tail, &item)?;
        state.count += 1;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        ensure_open(&state)?;
        if state.count == 0 {
            return Ok(None);
        }

        let tail = state.tail;
        state.file.seek(SeekFrom::Start(tail - LEN_SIZE))?;
        let len = read_len(&mut state.file)?;
        let start = tail - frame_size(len);
        let payload = read_frame_at(&mut state.file, start)?;

        state.file.set_len(start)?;
        state.tail = start;
        state.count -= 1;
        Ok(Some(payload))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.count)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        if state.count == 0 {
            fs::remove_dir_all(&self.dir)?;
        } else {
            state.file.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DATA_FILE;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lifo_order() {
        let dir = TempDir::new().unwrap();
        let queue = LifoDiskQueue::open(dir.path().join("q")).unwrap();

        queue.push(b"a".to_vec()).await.unwrap();
        queue.push(b"bb".to_vec()).await.unwrap();
        queue.push(b"ccc".to_vec()).await.unwrap();

        assert_eq!(queue.pop().await.unwrap(), Some(b"ccc".to_vec()));
        assert_eq!(queue.pop().await.unwrap(), Some(b"bb".to_vec()));
        queue.push(b"d".to_vec()).await.unwrap();
        assert_eq!(queue.pop().await.unwrap(), Some(b"d".to_vec()));
        assert_eq!(queue.pop().await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_after_partial_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q");
        {
            let queue = LifoDiskQueue::open(&path).unwrap();
            queue.push(b"bottom".to_vec()).await.unwrap();
            queue.push(b"top".to_vec()).await.unwrap();
        }
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path.join(DATA_FILE))
                .unwrap();
            file.write_all(&[9, 0, 0, 0, b'p', b'a', b'r']).unwrap();
        }

        let queue = LifoDiskQueue::open(&path).unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.pop().await.unwrap(), Some(b"top".to_vec()));
        assert_eq!(queue.pop().await.unwrap(), Some(b"bottom".to_vec()));
    }

    #[tokio::test]
    async fn test_close_keeps_pending_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q");
        let queue = LifoDiskQueue::open(&path).unwrap();
        queue.push(b"left".to_vec()).await.unwrap();
        queue.close().await.unwrap();
        assert!(path.join(DATA_FILE).exists());

        let queue = LifoDiskQueue::open(&path).unwrap();
        assert_eq!(queue.pop().await.unwrap(), Some(b"left".to_vec()));
        queue.close().await.unwrap();
        assert!(!path.exists());
    }
}
