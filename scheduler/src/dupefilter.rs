use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crawlq_core::async_trait;
use crawlq_core::error::Result;
use crawlq_core::request::Request;
use crawlq_core::stats::StatsCollector;
use dashmap::DashSet;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::fingerprint::RequestFingerprinter;

/// Name of the seen-set file inside a job directory
pub const SEEN_FILE: &str = "requests.seen";

/// Prefix of a line that withdraws an earlier fingerprint
const FORGET_PREFIX: char = '-';

/// Tracks which requests were already scheduled
#[async_trait]
pub trait DupeFilter: Send + Sync {
    /// Load persisted state
    async fn open(&self) -> Result<()>;

    /// Record the request; `true` when it was seen before
    async fn request_seen(&self, request: &Request) -> Result<bool>;

    /// Withdraw a request recorded by `request_seen` that was never stored
    async fn forget(&self, request: &Request) -> Result<()>;

    /// Flush and release persisted state
    async fn close(&self, reason: &str) -> Result<()>;

    /// Report a filtered duplicate
    fn log(&self, request: &Request, stats: &dyn StatsCollector);

    /// Number of distinct requests seen so far
    fn seen_count(&self) -> usize;
}

/// Duplicate filter keyed by request fingerprints.
///
/// Fingerprints live in memory and, with a job directory, are appended one
/// per line to `requests.seen` so a resumed crawl keeps filtering them. A
/// forgotten fingerprint is appended again with a leading `-`.
pub struct RequestFingerprintFilter {
    fingerprinter: RequestFingerprinter,
    fingerprints: DashSet<String>,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
    debug: bool,
    log_dupes: AtomicBool,
}

impl RequestFingerprintFilter {
    /// Create a memory-only filter
    pub fn new(fingerprinter: RequestFingerprinter, debug: bool) -> Self {
        Self {
            fingerprinter,
            fingerprints: DashSet::new(),
            path: None,
            file: Mutex::new(None),
            debug,
            log_dupes: AtomicBool::new(true),
        }
    }

    /// Persist fingerprints under `jobdir`
    pub fn with_jobdir<P: AsRef<Path>>(mut self, jobdir: P) -> Self {
        self.path = Some(jobdir.as_ref().join(SEEN_FILE));
        self
    }

    /// Fingerprint used for a request
    pub fn fingerprint(&self, request: &Request) -> String {
        self.fingerprinter.fingerprint(request)
    }

    fn load(&self, path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if path.exists() {
            let contents = fs::read(path)?;
            // A line cut short by a crash is dropped along with its tail
            let complete = contents
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            if complete < contents.len() {
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(complete as u64)?;
            }

            for line in String::from_utf8_lossy(&contents[..complete]).lines() {
                let line = line.trim();
                if let Some(forgotten) = line.strip_prefix(FORGET_PREFIX) {
                    self.fingerprints.remove(forgotten);
                } else if !line.is_empty() {
                    self.fingerprints.insert(line.to_string());
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }
}

#[async_trait]
impl DupeFilter for RequestFingerprintFilter {
    async fn open(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let mut file = self.file.lock().await;
        if file.is_none() {
            *file = Some(self.load(path)?);
            info!(
                "Loaded {} request fingerprints from {}",
                self.fingerprints.len(),
                path.display()
            );
        }
        Ok(())
    }

    async fn request_seen(&self, request: &Request) -> Result<bool> {
        let fingerprint = self.fingerprint(request);
        if !self.fingerprints.insert(fingerprint.clone()) {
            return Ok(true);
        }

        if let Some(file) = self.file.lock().await.as_mut() {
            file.write_all(format!("{}\n", fingerprint).as_bytes())?;
        }
        Ok(false)
    }

    async fn forget(&self, request: &Request) -> Result<()> {
        let fingerprint = self.fingerprint(request);
        if self.fingerprints.remove(&fingerprint).is_none() {
            return Ok(());
        }

        if let Some(file) = self.file.lock().await.as_mut() {
            file.write_all(format!("{}{}\n", FORGET_PREFIX, fingerprint).as_bytes())?;
        }
        debug!("Forgot request fingerprint of {}", request);
        Ok(())
    }

    async fn close(&self, reason: &str) -> Result<()> {
        if let Some(file) = self.file.lock().await.take() {
            file.sync_all()?;
            debug!("Closed duplicate filter ({})", reason);
        }
        Ok(())
    }

    fn log(&self, request: &Request, stats: &dyn StatsCollector) {
        if self.debug {
            debug!("Filtered duplicate request: {}", request);
        } else if self.log_dupes.swap(false, Ordering::Relaxed) {
            debug!(
                "Filtered duplicate request: {} - no more duplicates will be shown \
                 (see DUPEFILTER_DEBUG to show all duplicates)",
                request
            );
        }
        stats.inc_value("dupefilter/filtered", 1);
    }

    fn seen_count(&self) -> usize {
        self.fingerprints.len()
    }
}
