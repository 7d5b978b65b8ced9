//! Persisted course state: the JSON file mapping course identifier to record.
//!
//! The store owns every write to the file. Each mutating operation is a full
//! load-modify-save cycle, and `save` goes through a temporary file in the same
//! directory followed by a rename, so a crash mid-write leaves the previous
//! file intact. The store is not safe for concurrent writers; callers that
//! parallelise must serialise access themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};

/// All persisted records keyed by course identifier.
pub type CourseMap = BTreeMap<String, CourseRecord>;

/// A course as discovered on the platform, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCourse {
    pub id: String,
    pub display_name: String,
    pub short_name: String,
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub full_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub url: String,
    /// Last successful archive pass.
    #[serde(default = "epoch", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Pending rename target; empty when none.
    #[serde(default)]
    pub rename: String,
    /// Bound hosted repository name; empty when unbound.
    #[serde(default)]
    pub github_repo: String,
    /// Fields this version does not know about, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CourseRecord {
    pub fn from_discovered(course: &RawCourse, now: DateTime<Utc>) -> Self {
        Self {
            full_name: course.display_name.clone(),
            short_name: course.short_name.clone(),
            term: course.term.clone(),
            url: course.id.clone(),
            timestamp: now,
            rename: String::new(),
            github_repo: String::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn bound_repository(&self) -> Option<&str> {
        Some(self.github_repo.as_str()).filter(|r| !r.is_empty())
    }

    pub fn pending_rename(&self) -> Option<&str> {
        Some(self.rename.as_str()).filter(|r| !r.is_empty())
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// ISO-8601 timestamps. Offset-less values (as written by older tooling) are
/// read as local time.
mod timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = raw.parse::<NaiveDateTime>().ok()?;
        match Local.from_local_datetime(&naive).earliest() {
            Some(local) => Some(local.with_timezone(&Utc)),
            None => Some(naive.and_utc()),
        }
    }
}

/// Whether a record is due for re-sync.
pub fn is_stale(record: &CourseRecord, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
    now.signed_duration_since(record.timestamp) > threshold
}

/// Identifiers of every stale record, in key order.
pub fn stale_ids(map: &CourseMap, now: DateTime<Utc>, threshold: chrono::Duration) -> Vec<String> {
    map.iter()
        .filter(|(_, record)| is_stale(record, now, threshold))
        .map(|(id, _)| id.clone())
        .collect()
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record. A missing or malformed file yields an empty map.
    pub fn load(&self) -> CourseMap {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file yet, starting empty");
                return CourseMap::new();
            }
            Err(e) => {
                warn!(error = ?e, path = %self.path.display(), "Failed to read state file, treating as empty");
                return CourseMap::new();
            }
        };
        match serde_json::from_str::<CourseMap>(&content) {
            Ok(map) => {
                debug!(path = %self.path.display(), records = map.len(), "Loaded state file");
                map
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Malformed state file, treating as empty");
                CourseMap::new()
            }
        }
    }

    /// Write every record, replacing the file atomically.
    pub fn save(&self, map: &CourseMap) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let payload = serde_json::to_vec_pretty(map)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| ArchiveError::Io(e.error))?;
        debug!(path = %self.path.display(), records = map.len(), "Saved state file");
        Ok(())
    }

    /// Add every newly discovered course. Existing identifiers are never
    /// overwritten, so operator edits (pending renames, bound repositories)
    /// survive rediscovery. Returns the merged map and the number added.
    pub fn upsert_discovered(&self, courses: &[RawCourse]) -> Result<(CourseMap, usize)> {
        let mut map = self.load();
        let now = Utc::now();
        let mut added = 0;
        for course in courses {
            if map.contains_key(&course.id) {
                continue;
            }
            map.insert(course.id.clone(), CourseRecord::from_discovered(course, now));
            added += 1;
        }
        if added > 0 {
            self.save(&map)?;
            info!(added, path = %self.path.display(), "Added new course(s) to state file");
        } else {
            info!("No new courses found to add");
        }
        Ok((map, added))
    }

    pub fn get(&self, id: &str) -> Result<CourseRecord> {
        self.load()
            .remove(id)
            .ok_or_else(|| ArchiveError::NotFound(format!("course '{id}' is not in the state file")))
    }

    /// Refresh a record's last-sync timestamp to now.
    pub fn touch(&self, id: &str) -> Result<()> {
        self.update(id, |record| record.timestamp = Utc::now())?;
        debug!(course = id, "Updated course timestamp");
        Ok(())
    }

    /// Apply a completed rename: new display name, no pending rename, fresh timestamp.
    pub fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        self.update(id, |record| {
            record.full_name = new_name.to_string();
            record.rename.clear();
            record.timestamp = Utc::now();
        })?;
        info!(course = id, new_name, "Renamed course in state file");
        Ok(())
    }

    /// Record that `repo` is now the course's hosted mirror.
    pub fn bind_repository(&self, id: &str, repo: &str) -> Result<()> {
        self.update(id, |record| record.github_repo = repo.to_string())
    }

    pub fn clear_repository(&self, id: &str) -> Result<()> {
        self.update(id, |record| record.github_repo.clear())
    }

    pub fn remove(&self, id: &str) -> Result<CourseRecord> {
        let mut map = self.load();
        let removed = map
            .remove(id)
            .ok_or_else(|| ArchiveError::NotFound(format!("course '{id}' is not in the state file")))?;
        self.save(&map)?;
        info!(course = id, "Removed course from state file");
        Ok(removed)
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut CourseRecord)) -> Result<()> {
        let mut map = self.load();
        let record = map
            .get_mut(id)
            .ok_or_else(|| ArchiveError::NotFound(format!("course '{id}' is not in the state file")))?;
        apply(record);
        self.save(&map)
    }
}
