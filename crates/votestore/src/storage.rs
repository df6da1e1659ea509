//! Durable vote store backed by an append-only log
//!
//! File layout:
//! - `votes.toon`: header + one record per mutation (see [`crate::parser`])
//!
//! The log is replayed into memory on open; every mutation appends a record.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{NewVote, Vote, VoteType};
use crate::parser::{
    create_header, encode_record, parse_header, parse_records, Record, HEADER_LEN,
    VOTE_LOG_VERSION, VOTE_MAGIC,
};
use crate::store::{VoteStore, VoteTable};

const DATA_FILE: &str = "votes.toon";
const COMPACT_FILE: &str = "votes.toon.compact";
const ID_PREFIX: &str = "vote-";

/// Append-log state guarded by one lock
struct LogFile {
    file: File,
    /// Records in the log, live or not
    record_count: u32,
}

/// FileVoteStore persists votes in a data directory
pub struct FileVoteStore {
    /// Path to the data directory
    path: PathBuf,

    /// Log file handle
    log: RwLock<LogFile>,

    /// Live votes, rebuilt from the log on open
    table: RwLock<VoteTable>,

    /// Next numeric id suffix
    next_id: AtomicU64,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl FileVoteStore {
    /// Open or create a vote store at the given directory
    ///
    /// # Arguments
    /// * `path` - Directory path for the vote log
    ///
    /// # Returns
    /// * `Result<FileVoteStore>` - Store handle with all votes loaded
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let data_path = path.join(DATA_FILE);
        let (file, records) = if data_path.exists() {
            Self::open_existing(&data_path)?
        } else {
            Self::create_new(&data_path)?
        };

        let record_count = u32::try_from(records.len()).map_err(|_| Error::LogFull)?;
        let mut table = VoteTable::default();
        let mut max_id = 0u64;
        for record in records {
            match record {
                Record::Put(vote) => {
                    if let Some(n) = numeric_id(&vote.id) {
                        max_id = max_id.max(n.saturating_add(1));
                    }
                    let id = vote.id.clone();
                    if table.upsert(vote) > 1 {
                        warn!("Vote log puts {} over another vote for the same pair", id);
                    }
                }
                Record::Delete(id) => {
                    if table.remove(&id).is_err() {
                        warn!("Vote log deletes unknown vote {}", id);
                    }
                }
            }
        }

        info!(
            "Opened vote store at {:?}: {} live votes, {} log records",
            path,
            table.len(),
            record_count
        );

        Ok(FileVoteStore {
            path: path.to_path_buf(),
            log: RwLock::new(LogFile { file, record_count }),
            table: RwLock::new(table),
            next_id: AtomicU64::new(max_id),
            closed: RwLock::new(false),
        })
    }

    fn open_existing(data_path: &Path) -> Result<(File, Vec<Record>)> {
        let mut file = OpenOptions::new().read(true).write(true).open(data_path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let header = parse_header(&contents)?;
        if header.version != VOTE_LOG_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported vote log version {}",
                header.version
            )));
        }

        let parsed = parse_records(&contents[HEADER_LEN..])?;
        if parsed.torn_len > 0 {
            warn!(
                "Dropping {} bytes of an unfinished record at the end of {:?}",
                parsed.torn_len, data_path
            );
            file.set_len((HEADER_LEN + parsed.valid_len) as u64)?;
            file.sync_all()?;
        }

        let records = parsed.records;
        if header.record_count as usize != records.len() {
            warn!(
                "Vote log header lists {} records but {} were found (unclean shutdown?)",
                header.record_count,
                records.len()
            );
        }

        Ok((file, records))
    }

    fn create_new(data_path: &Path) -> Result<(File, Vec<Record>)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)?;

        file.write_all(&create_header(VOTE_LOG_VERSION, 0))?;

        Ok((file, Vec::new()))
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn append(&self, record: &Record) -> Result<()> {
        let mut log = self.log.write();
        let count = log.record_count.checked_add(1).ok_or(Error::LogFull)?;
        log.file.seek(SeekFrom::End(0))?;
        log.file.write_all(&encode_record(record))?;
        log.record_count = count;
        Ok(())
    }

    /// Directory this store lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the log, including superseded ones
    pub fn record_count(&self) -> u32 {
        self.log.read().record_count
    }

    /// Flush the log and update the header record count
    pub fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        self.sync_header()
    }

    fn sync_header(&self) -> Result<()> {
        let mut log = self.log.write();
        let count = log.record_count;
        log.file.seek(SeekFrom::Start(VOTE_MAGIC.len() as u64 + 4))?;
        log.file.write_all(&count.to_le_bytes())?;
        log.file.sync_all()?;
        Ok(())
    }

    /// Rewrite the log so it holds exactly one record per live vote
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;

        let table = self.table.read();
        let mut log = self.log.write();

        let mut votes = table.all();
        votes.sort_by(|a, b| a.id.cmp(&b.id));
        let count = u32::try_from(votes.len()).map_err(|_| Error::LogFull)?;

        let compact_path = self.path.join(COMPACT_FILE);
        {
            let mut out = File::create(&compact_path)?;
            out.write_all(&create_header(VOTE_LOG_VERSION, count))?;
            for vote in &votes {
                out.write_all(&encode_record(&Record::Put(vote.clone())))?;
            }
            out.sync_all()?;
        }

        let data_path = self.path.join(DATA_FILE);
        fs::rename(&compact_path, &data_path)?;

        let before = log.record_count;
        log.file = OpenOptions::new().read(true).write(true).open(&data_path)?;
        log.record_count = count;

        info!(
            "Compacted vote log: {} records -> {}",
            before, log.record_count
        );
        Ok(())
    }

    /// Close the store and fsync all changes
    pub fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.sync_header()?;
        *self.closed.write() = true;

        debug!("Closed vote store at {:?}", self.path);
        Ok(())
    }
}

fn numeric_id(id: &str) -> Option<u64> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

impl VoteStore for FileVoteStore {
    fn find(&self, review_id: &str, user_id: &str) -> Result<Option<Vote>> {
        self.ensure_open()?;
        Ok(self.table.read().find(review_id, user_id).cloned())
    }

    fn find_all(&self, review_id: &str, limit: usize) -> Result<Vec<Vote>> {
        self.ensure_open()?;
        Ok(self.table.read().find_all(review_id, limit))
    }

    fn create(&self, vote: NewVote) -> Result<Vote> {
        self.ensure_open()?;

        let mut table = self.table.write();
        table.check_insert(&vote)?;

        let id = format!("{}{}", ID_PREFIX, self.next_id.fetch_add(1, Ordering::Relaxed));
        let vote = vote.into_vote(id);
        self.append(&Record::Put(vote.clone()))?;
        table.insert(vote.clone());

        Ok(vote)
    }

    fn update(&self, id: &str, vote_type: VoteType, voted_at: DateTime<Utc>) -> Result<Vote> {
        self.ensure_open()?;

        let mut table = self.table.write();
        let mut updated = table.get_mut(id)?.clone();
        updated.vote_type = vote_type;
        updated.voted_at = voted_at;

        self.append(&Record::Put(updated.clone()))?;
        *table.get_mut(id)? = updated.clone();

        Ok(updated)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;

        let mut table = self.table.write();
        if !table.contains(id) {
            return Err(Error::NotFound(id.to_string()));
        }

        self.append(&Record::Delete(id.to_string()))?;
        table.remove(id)?;

        Ok(())
    }

    fn len(&self) -> usize {
        self.table.read().len()
    }
}

impl Drop for FileVoteStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
