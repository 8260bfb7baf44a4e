//! Persistent queues stored in a directory.
//!
//! Records are appended to a single data file as length-framed entries:
//! `[u32 LE length][payload][u32 LE length]`. The trailing length lets
//! the LIFO variant pop from the end, and lets both variants recognise a
//! partial last frame left behind by a crash. Such a frame is cut off when
//! the queue is reopened; every complete frame before it is kept.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

mod fifo;
mod lifo;

pub use fifo::FifoDiskQueue;
pub use lifo::LifoDiskQueue;

/// Name of the data file inside a queue directory
pub const DATA_FILE: &str = "q.dat";

const LEN_SIZE: u64 = 4;

/// Bytes taken on disk by a frame around a payload of `len` bytes
fn frame_size(len: u64) -> u64 {
    len + 2 * LEN_SIZE
}

/// Encode a payload as one frame
fn encode_frame(payload: &[u8]) -> io::Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "record larger than 4 GiB")
    })?;
    let mut frame = Vec::with_capacity(payload.len() + 2 * LEN_SIZE as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&len.to_le_bytes());
    Ok(frame)
}

fn read_len(file: &mut File) -> io::Result<u64> {
    let mut buf = [0u8; LEN_SIZE as usize];
    file.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf) as u64)
}

/// Read the frame starting at `offset`, returning its payload
fn read_frame_at(file: &mut File, offset: u64) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let len = read_len(file)?;
    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;
    let trailer = read_len(file)?;
    if trailer != len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame at offset {} has mismatched lengths", offset),
        ));
    }
    Ok(payload)
}

/// Result of walking a data file frame by frame
struct Scan {
    /// Offsets at which complete frames start
    starts: Vec<u64>,

    /// End of the last complete frame
    end: u64,
}

/// Walk the data file and locate every complete frame
fn scan_frames(file: &mut File) -> io::Result<Scan> {
    let file_len = file.metadata()?.len();
    let mut starts = Vec::new();
    let mut offset = 0u64;

    while offset + 2 * LEN_SIZE <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let len = read_len(file)?;
        let next = offset + frame_size(len);
        if next > file_len {
            break;
        }
        file.seek(SeekFrom::Start(next - LEN_SIZE))?;
        if read_len(file)? != len {
            break;
        }
        starts.push(offset);
        offset = next;
    }

    Ok(Scan { starts, end: offset })
}

/// Open (creating if needed) the data file in `dir`, dropping a torn tail
fn open_data_file(dir: &Path) -> io::Result<(File, Scan)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(DATA_FILE);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;

    let scan = scan_frames(&mut file)?;
    let file_len = file.metadata()?.len();
    if scan.end < file_len {
        log::warn!(
            "Discarding {} bytes of incomplete record at the end of {}",
            file_len - scan.end,
            path.display()
        );
        file.set_len(scan.end)?;
        file.sync_all()?;
    }

    Ok((file, scan))
}

/// Append a frame at `offset` (the current end of the file)
fn append_frame(file: &mut File, offset: u64, payload: &[u8]) -> io::Result<u64> {
    let frame = encode_frame(payload)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&frame)?;
    file.flush()?;
    Ok(offset + frame.len() as u64)
}

/// Replace `path` with `contents` through a temporary sibling file
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
