//! Incremental build state: which inputs changed since the last successful
//! build.
//!
//! The history file records, for each input a successful job consumed, its
//! mtime and a hash of its content.  An input is clean when its mtime is
//! unchanged, or when it was touched but its content hashes the same.
//!
//! Jobs other than compiles also get a record keyed by their primary output:
//! the signature of the command that last produced it.  A link whose inputs
//! or flags changed, or that failed last time, has no matching record and
//! runs again even though none of its dependencies do.
//!
//! On-disk layout, all integers little-endian:
//!
//! ```text
//! "stonehist" u32:version
//! ( u8:0 u16:len path:[u8; len] u64:mtime_nanos u64:hash
//! | u8:1 u16:len output:[u8; len] u64:signature )*
//! ```

use crate::fs::{FileSystem, MTime};
use crate::job::JobCondition;
use anyhow::bail;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::hash::Hasher;
use std::path::{Path, PathBuf};

const MAGIC: &[u8] = b"stonehist";
const VERSION: u32 = 2;

const TAG_FILE: u8 = 0;
const TAG_COMMAND: u8 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub mtime: u64,
    pub hash: u64,
}

/// Persisted path => last-known state of that file, and output => signature
/// of the command that produced it.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildHistory {
    records: FxHashMap<String, FileRecord>,
    commands: FxHashMap<String, u64>,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.buf.len() < n {
            bail!("truncated");
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_str(&mut self) -> anyhow::Result<String> {
        let len = self.read_u16()? as usize;
        Ok(std::str::from_utf8(self.take(len)?)?.to_string())
    }

    fn read_u16(&mut self) -> anyhow::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64(&mut self) -> anyhow::Result<u64> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }
}

impl BuildHistory {
    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn insert(&mut self, path: String, record: FileRecord) {
        self.records.insert(path, record);
    }

    pub fn remove(&mut self, path: &str) {
        self.records.remove(path);
    }

    pub fn command(&self, output: &str) -> Option<u64> {
        self.commands.get(output).copied()
    }

    pub fn insert_command(&mut self, output: String, signature: u64) {
        self.commands.insert(output, signature);
    }

    pub fn remove_command(&mut self, output: &str) {
        self.commands.remove(output);
    }

    pub fn len(&self) -> usize {
        self.records.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.commands.is_empty()
    }

    pub fn parse(buf: &[u8]) -> anyhow::Result<BuildHistory> {
        let mut r = Reader { buf };
        if r.take(MAGIC.len())? != MAGIC {
            bail!("not a history file");
        }
        let version = r.read_u32()?;
        if version != VERSION {
            bail!("history version {}, expected {}", version, VERSION);
        }
        let mut history = BuildHistory::default();
        while !r.buf.is_empty() {
            match r.read_u8()? {
                TAG_FILE => {
                    let path = r.read_str()?;
                    let mtime = r.read_u64()?;
                    let hash = r.read_u64()?;
                    history.insert(path, FileRecord { mtime, hash });
                }
                TAG_COMMAND => {
                    let output = r.read_str()?;
                    let signature = r.read_u64()?;
                    history.insert_command(output, signature);
                }
                tag => bail!("unknown record tag {}", tag),
            }
        }
        Ok(history)
    }

    pub fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        // Sorted, so unchanged history rewrites identically.
        let mut paths: Vec<&String> = self.records.keys().collect();
        paths.sort();
        for path in paths {
            let record = &self.records[path];
            buf.push(TAG_FILE);
            write_str(&mut buf, path)?;
            buf.extend_from_slice(&record.mtime.to_le_bytes());
            buf.extend_from_slice(&record.hash.to_le_bytes());
        }
        let mut outputs: Vec<&String> = self.commands.keys().collect();
        outputs.sort();
        for output in outputs {
            buf.push(TAG_COMMAND);
            write_str(&mut buf, output)?;
            buf.extend_from_slice(&self.commands[output].to_le_bytes());
        }
        Ok(buf)
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> anyhow::Result<()> {
    if s.len() > u16::MAX as usize {
        bail!("path too long for history: {:?}", s);
    }
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn hash_content(content: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(content);
    hasher.write_usize(content.len());
    hasher.finish()
}

/// What we currently know about a file on disk.
#[derive(Debug, Copy, Clone)]
struct Scanned {
    mtime: MTime,
    /// Computed only when the mtime alone can't decide cleanliness.
    hash: Option<u64>,
}

pub struct BuildSystem<'a> {
    fs: &'a dyn FileSystem,
    history_path: PathBuf,
    /// None until start_build(), and when there was no usable history.
    history: Option<BuildHistory>,
    scanned: FxHashMap<String, Scanned>,
    refreshed: FxHashMap<String, FileRecord>,
    refreshed_commands: FxHashMap<String, u64>,
    /// Inputs and outputs of jobs that failed or never ran this build.
    forgotten: FxHashSet<String>,
    forgotten_commands: FxHashSet<String>,
}

impl<'a> BuildSystem<'a> {
    pub fn new(fs: &'a dyn FileSystem, history_path: impl Into<PathBuf>) -> Self {
        BuildSystem {
            fs,
            history_path: history_path.into(),
            history: None,
            scanned: FxHashMap::default(),
            refreshed: FxHashMap::default(),
            refreshed_commands: FxHashMap::default(),
            forgotten: FxHashSet::default(),
            forgotten_commands: FxHashSet::default(),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn history_path_str(&self) -> String {
        self.history_path.to_string_lossy().into_owned()
    }

    /// Loads the history of the previous build.  A missing or unreadable
    /// history just means everything is considered changed.
    pub fn start_build(&mut self) {
        let path = self.history_path_str();
        self.history = match self.fs.read(&path) {
            Ok(buf) => match BuildHistory::parse(&buf) {
                Ok(history) => {
                    tracing::debug!(path = %path, records = history.len(), "loaded build history");
                    Some(history)
                }
                Err(err) => {
                    tracing::warn!("ignoring build history {}: {}", path, err);
                    None
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "no build history");
                None
            }
            Err(err) => {
                tracing::warn!("ignoring build history {}: {}", path, err);
                None
            }
        };
        self.scanned.clear();
        self.refreshed.clear();
        self.refreshed_commands.clear();
        self.forgotten.clear();
        self.forgotten_commands.clear();
    }

    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    pub fn is_recorded(&self, path: &str) -> bool {
        self.record(path).is_some()
    }

    fn record(&self, path: &str) -> Option<&FileRecord> {
        self.history.as_ref()?.get(path)
    }

    fn scan_one(&self, path: &str) -> Scanned {
        let mtime = match self.fs.stat(path) {
            Ok(mtime) => mtime,
            Err(err) => {
                tracing::warn!("stat {}: {}", path, err);
                MTime::Missing
            }
        };
        let hash = match (mtime, self.record(path)) {
            (MTime::Stamp(now), Some(rec)) if now != rec.mtime => {
                self.fs.read(path).ok().map(|content| hash_content(&content))
            }
            _ => None,
        };
        Scanned { mtime, hash }
    }

    /// Stats, and where needed hashes, `paths` in parallel so later
    /// is_dirty() queries don't touch the disk.
    pub fn scan(&mut self, paths: &[String]) {
        let this = &*self;
        let results: Vec<(String, Scanned)> = paths
            .par_iter()
            .filter(|path| !this.scanned.contains_key(path.as_str()))
            .map(|path| (path.clone(), this.scan_one(path)))
            .collect();
        self.scanned.extend(results);
    }

    fn scanned(&mut self, path: &str) -> Scanned {
        if let Some(s) = self.scanned.get(path) {
            return *s;
        }
        let s = self.scan_one(path);
        self.scanned.insert(path.to_string(), s);
        s
    }

    /// Whether `path` changed since the last build that consumed it.
    /// Unrecorded and missing files are dirty.
    pub fn is_dirty(&mut self, path: &str) -> bool {
        let rec = match self.record(path) {
            Some(rec) => *rec,
            None => return true,
        };
        let scanned = self.scanned(path);
        match scanned.mtime {
            MTime::Missing => true,
            MTime::Stamp(mtime) if mtime == rec.mtime => false,
            MTime::Stamp(_) => scanned.hash != Some(rec.hash),
        }
    }

    /// How a job consuming `path` should be run.  `output_exists` says
    /// whether the job's previous outputs are still on disk.
    pub fn condition_for(&mut self, path: &str, output_exists: bool) -> JobCondition {
        if !self.has_history() {
            JobCondition::Always
        } else if !self.is_recorded(path) {
            JobCondition::NewlyAdded
        } else if self.is_dirty(path) || !output_exists {
            JobCondition::RunWithoutCascading
        } else {
            JobCondition::CheckDependencies
        }
    }

    /// How a job producing `output` should be run, judged by whether its
    /// command matches the one that last produced `output` successfully.
    pub fn command_condition(&self, output: &str, signature: u64) -> JobCondition {
        match &self.history {
            None => JobCondition::Always,
            Some(history) if history.command(output) == Some(signature) => {
                JobCondition::CheckDependencies
            }
            Some(_) => JobCondition::RunWithoutCascading,
        }
    }

    /// Remembers the command of a job that succeeded in producing `output`.
    pub fn record_command(&mut self, output: &str, signature: u64) {
        self.forgotten_commands.remove(output);
        self.refreshed_commands.insert(output.to_string(), signature);
    }

    /// Drops what the history knows about a job that failed or never ran,
    /// so the next build runs it whatever its dependencies do.
    pub fn forget(&mut self, inputs: &[String], output: Option<&str>) {
        for path in inputs {
            self.refreshed.remove(path);
            self.forgotten.insert(path.clone());
        }
        if let Some(output) = output {
            self.refreshed_commands.remove(output);
            self.forgotten_commands.insert(output.to_string());
        }
    }

    pub fn output_exists(&self, path: &str) -> bool {
        self.fs.exists(path)
    }

    /// Refreshes the history entries of the inputs of a job that succeeded.
    pub fn record_success(&mut self, paths: &[String]) {
        for path in paths {
            let mtime = match self.fs.stat(path) {
                Ok(MTime::Stamp(mtime)) => mtime,
                _ => continue,
            };
            let content = match self.fs.read(path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            self.forgotten.remove(path);
            self.refreshed.insert(
                path.clone(),
                FileRecord {
                    mtime,
                    hash: hash_content(&content),
                },
            );
        }
    }

    /// Writes the history: previous entries, less forgotten ones and
    /// overridden by this build's refreshed ones.
    pub fn stop_build(&mut self) -> anyhow::Result<()> {
        let mut history = self.history.take().unwrap_or_default();
        for path in self.forgotten.drain() {
            history.remove(&path);
        }
        for output in self.forgotten_commands.drain() {
            history.remove_command(&output);
        }
        for (path, record) in self.refreshed.drain() {
            history.insert(path, record);
        }
        for (output, signature) in self.refreshed_commands.drain() {
            history.insert_command(output, signature);
        }
        let path = self.history_path_str();
        self.fs
            .write(&path, &history.serialize()?)
            .map_err(|err| anyhow::anyhow!("write {}: {}", path, err))?;
        tracing::debug!(path = %path, records = history.len(), "wrote build history");
        self.history = Some(history);
        Ok(())
    }

    /// Forgets all history, forcing the next build to run everything.
    pub fn clean(&mut self) -> anyhow::Result<()> {
        let path = self.history_path_str();
        match self.fs.remove(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => bail!("remove {}: {}", path, err),
        }
        self.history = None;
        self.refreshed.clear();
        self.refreshed_commands.clear();
        self.forgotten.clear();
        self.forgotten_commands.clear();
        Ok(())
    }
}
