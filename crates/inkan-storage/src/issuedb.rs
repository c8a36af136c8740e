//! Append-only issue journal.
//!
//! The journal is a forward-only sequence of JSON records, one per line.
//! Reserving a serial appends an `IssueInProgress` record; committing the
//! issued PEM appends a second record with the same serial in state
//! `ActiveCertificate`. Readers fold the log per serial under the transition
//! guard `IssueInProgress -> ActiveCertificate`; nothing is ever rewritten or
//! deleted, so a crash between reserve and commit leaves the reservation
//! visible.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One writer mutex per journal path, shared by every handle in the process.
fn write_lock_for(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .entry(path.to_path_buf())
        .or_default()
        .clone()
}

/// State of one issuance within a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueState {
    /// A serial has been reserved but the certificate is not yet committed.
    IssueInProgress,
    /// The certificate has been issued and recorded.
    ActiveCertificate,
}

/// One folded journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueEntry {
    /// Serial number, unique within the profile.
    pub serial: u64,
    /// Lifecycle state.
    pub state: IssueState,
    /// PEM-encoded leaf certificate; empty while in progress.
    #[serde(default)]
    pub pem: String,
    /// When this record was appended.
    pub created_at: DateTime<Utc>,
}

impl IssueEntry {
    /// Parses the recorded PEM into a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry carries no parseable certificate.
    pub fn parse_certificate(&self) -> inkan_pki::Result<inkan_pki::Certificate> {
        inkan_pki::Certificate::from_pem(&self.pem)
    }
}

/// The per-profile issue journal.
#[derive(Debug)]
pub struct IssueDb {
    path: PathBuf,
    /// Serializes appends across every handle to this path; readers are
    /// lock-free.
    write_lock: Arc<Mutex<()>>,
}

impl IssueDb {
    /// Opens a journal at the given path. The file is created on first
    /// append.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let write_lock = write_lock_for(&path);
        Self { path, write_lock }
    }

    /// Creates an empty journal file, leaving an existing one untouched.
    ///
    /// # Errors
    ///
    /// Returns an error on filesystem failure.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            File::create(&path).map_err(|e| Error::io(&path, e))?;
        }
        Ok(Self::open(path))
    }

    /// Returns the journal path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserves a serial by appending an `IssueInProgress` record.
    ///
    /// After a successful return the reservation survives any crash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if any record carries this serial.
    pub fn reserve(&self, serial: u64, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.fold()?.iter().any(|e| e.serial == serial) {
            return Err(Error::AlreadyExists(serial));
        }
        self.append(&IssueEntry {
            serial,
            state: IssueState::IssueInProgress,
            pem: String::new(),
            created_at: now,
        })?;
        debug!(serial, "reserved serial");
        Ok(())
    }

    /// Transitions a reserved serial to `ActiveCertificate`, recording the
    /// issued PEM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReserved`] if no reservation exists and
    /// [`Error::AlreadyCommitted`] if the serial is already active.
    pub fn commit(&self, serial: u64, pem: &str, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let entries = self.fold()?;
        match entries.iter().find(|e| e.serial == serial) {
            None => return Err(Error::NotReserved(serial)),
            Some(entry) if entry.state == IssueState::ActiveCertificate => {
                return Err(Error::AlreadyCommitted(serial));
            }
            Some(_) => {}
        }
        self.append(&IssueEntry {
            serial,
            state: IssueState::ActiveCertificate,
            pem: pem.to_string(),
            created_at: now,
        })?;
        debug!(serial, "committed certificate");
        Ok(())
    }

    /// Returns all entries folded per serial, in order of first appearance.
    ///
    /// # Errors
    ///
    /// Returns `CorruptState` if the journal contains an illegal transition
    /// or an unparseable record.
    pub fn entries(&self) -> Result<Vec<IssueEntry>> {
        self.fold()
    }

    /// Returns the folded entry for one serial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerialNotFound`] if no record carries the serial.
    pub fn entry_by_serial(&self, serial: u64) -> Result<IssueEntry> {
        self.fold()?
            .into_iter()
            .find(|e| e.serial == serial)
            .ok_or(Error::SerialNotFound(serial))
    }

    fn append(&self, entry: &IssueEntry) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| Error::corrupt(&self.path, format!("unencodable record: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| Error::io(&self.path, e))?;
        file.sync_all().map_err(|e| Error::io(&self.path, e))
    }

    fn fold(&self) -> Result<Vec<IssueEntry>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        let mut entries: Vec<IssueEntry> = Vec::new();
        let mut lines = raw.lines().enumerate().peekable();
        while let Some((lineno, line)) = lines.next() {
            if line.trim().is_empty() {
                continue;
            }
            let record: IssueEntry = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    // A torn trailing line is the footprint of a crash during
                    // append; anything earlier is corruption.
                    if lines.peek().is_none() {
                        warn!(
                            path = %self.path.display(),
                            line = lineno + 1,
                            "discarding torn trailing journal record"
                        );
                        break;
                    }
                    return Err(Error::corrupt(
                        &self.path,
                        format!("bad record on line {}: {e}", lineno + 1),
                    ));
                }
            };

            match entries.iter_mut().find(|e| e.serial == record.serial) {
                None => entries.push(record),
                Some(existing) => {
                    let allowed = existing.state == IssueState::IssueInProgress
                        && record.state == IssueState::ActiveCertificate;
                    if !allowed {
                        return Err(Error::corrupt(
                            &self.path,
                            format!(
                                "illegal transition {:?} -> {:?} for serial {}",
                                existing.state, record.state, record.serial
                            ),
                        ));
                    }
                    *existing = record;
                }
            }
        }
        Ok(entries)
    }
}
