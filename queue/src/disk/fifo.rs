use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crawlq_core::async_trait;
use crawlq_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{append_frame, frame_size, open_data_file, read_frame_at, write_atomic, DATA_FILE};
use crate::QueueBackend;

/// Name of the read-position file inside a FIFO queue directory
pub const INFO_FILE: &str = "info.json";

/// Compacted copy of the data file, swapped in by rename
const COMPACT_FILE: &str = "q.dat.compact";

/// Consumed space is reclaimed once the head passes this offset
/// and more than half of the data file is dead
const COMPACT_THRESHOLD: u64 = 1024 * 1024;

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueInfo {
    head: u64,

    /// Set once `q.dat.compact` is complete and `head` refers to it
    #[serde(default)]
    compacting: bool,
}

fn read_info(path: &Path) -> Result<QueueInfo> {
    if !path.exists() {
        return Ok(QueueInfo::default());
    }
    serde_json::from_slice(&fs::read(path)?)
        .map_err(|e| Error::config(format!("Corrupt queue state {}: {}", path.display(), e)))
}

/// Finish or roll back a compaction cut short by a crash
fn recover_compaction(dir: &Path, info: &QueueInfo) -> Result<()> {
    let compacted = dir.join(COMPACT_FILE);
    if !compacted.exists() {
        return Ok(());
    }
    if info.compacting {
        log::warn!("Completing interrupted compaction of {}", dir.display());
        fs::rename(&compacted, dir.join(DATA_FILE))?;
    } else {
        fs::remove_file(&compacted)?;
    }
    Ok(())
}

struct FifoState {
    file: File,
    head: u64,
    tail: u64,
    count: usize,
    closed: bool,
}

/// Disk-backed queue of byte records popped in insertion order.
///
/// The read position is kept in `info.json` and rewritten after every pop,
/// so an abrupt stop loses neither consumed nor pending records.
pub struct FifoDiskQueue {
    dir: PathBuf,
    state: Mutex<FifoState>,
}

impl FifoDiskQueue {
    /// Open the queue stored in `dir`, creating it if needed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let info_path = dir.join(INFO_FILE);
        let info = read_info(&info_path)?;
        recover_compaction(&dir, &info)?;
        let (file, scan) = open_data_file(&dir)?;

        // Everything before the head was consumed, including frames the
        // data file no longer holds after a crash during truncation
        let mut head = info.head;
        let count = if head >= scan.end {
            if head > scan.end {
                log::warn!(
                    "Queue state {} is past the end of the data ({} > {}); treating the queue as drained",
                    info_path.display(),
                    head,
                    scan.end
                );
                head = scan.end;
            }
            0
        } else {
            match scan.starts.binary_search(&head) {
                Ok(index) => scan.starts.len() - index,
                Err(_) => {
                    return Err(Error::config(format!(
                        "Queue state {} points inside a record (head={}, end={})",
                        info_path.display(),
                        head,
                        scan.end
                    )))
                }
            }
        };

        if head != info.head || info.compacting {
            let settled = QueueInfo {
                head,
                compacting: false,
            };
            write_atomic(&info_path, &serde_json::to_vec(&settled)?)?;
        }

        log::debug!("Opened FIFO disk queue {} with {} records", dir.display(), count);

        Ok(Self {
            dir,
            state: Mutex::new(FifoState {
                file,
                head,
                tail: scan.end,
                count,
                closed: false,
            }),
        })
    }

    /// Directory holding this queue
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn write_info(&self, info: &QueueInfo) -> Result<()> {
        write_atomic(&self.dir.join(INFO_FILE), &serde_json::to_vec(info)?)?;
        Ok(())
    }

    fn save_info(&self, head: u64) -> Result<()> {
        self.write_info(&QueueInfo {
            head,
            compacting: false,
        })
    }

    /// Move the live records to the front of a fresh data file
    fn compact(&self, state: &mut FifoState) -> Result<()> {
        let data = self.dir.join(DATA_FILE);
        let compacted = self.dir.join(COMPACT_FILE);
        {
            let mut src = OpenOptions::new().read(true).open(&data)?;
            let mut dst = File::create(&compacted)?;
            src.seek(SeekFrom::Start(state.head))?;
            std::io::copy(&mut src, &mut dst)?;
            dst.sync_all()?;
        }
        // the new head is recorded before the swap; open completes the rename
        self.write_info(&QueueInfo {
            head: 0,
            compacting: true,
        })?;
        fs::rename(&compacted, &data)?;
        state.file = OpenOptions::new().read(true).write(true).open(&data)?;
        state.tail -= state.head;
        state.head = 0;
        Ok(())
    }
}

fn ensure_open(state: &FifoState) -> Result<()> {
    if state.closed {
        return Err(Error::scheduler("Queue is closed"));
    }
    Ok(())
}

#[async_trait]
impl QueueBackend<Vec<u8>> for FifoDiskQueue {
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

        let head = state.head;
        let payload = read_frame_at(&mut state.file, head)?;
        state.head += frame_size(payload.len() as u64);
        state.count -= 1;
        self.save_info(state.head)?;

        if state.count == 0 {
            // a saved head past the end reopens as drained
            state.file.set_len(0)?;
            state.head = 0;
            state.tail = 0;
            self.save_info(0)?;
        } else if state.head > COMPACT_THRESHOLD && state.head * 2 > state.tail {
            self.compact(&mut state)?;
            self.save_info(0)?;
        }

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
            self.save_info(state.head)?;
        }
        Ok(())
    }
}
