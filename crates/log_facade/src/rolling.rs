//! Size-rotated log files, backed by [`file_rotate`].
//!
//! Rotated files are kept next to the active one as `<file name>.<local timestamp>`, e.g.
//! `app_.log.2024-03-05T07-08-09`. Rotations within the same second get a numeric suffix
//! (`.1`, `.2`, ...).

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, DateFrom, FileLimit, SuffixScheme, TimestampSuffix},
    ContentLimit, FileRotate,
};

/// Sortable, and free of `.` since a trailing `.<n>` marks same-second rotations.
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

const MEGABYTE: u64 = 1024 * 1024;

/// When files rotate and how many rotated files are kept.
///
/// Rotated files are never compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size after which the file is rotated, checked before each record. A file may exceed
    /// it by the record that crossed it, so records are never split. `0` disables rotation.
    pub max_size_bytes: u64,

    /// Number of rotated files to keep, newest first. `0` keeps all of them.
    pub max_backups: usize,

    /// Rotated files older than this are removed. [`Duration::ZERO`] keeps them regardless of age.
    pub max_age: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * MEGABYTE,
            max_backups: 5,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl RotationPolicy {
    fn content_limit(self) -> ContentLimit {
        match usize::try_from(self.max_size_bytes) {
            Ok(0) => ContentLimit::None,
            Ok(bytes) => ContentLimit::BytesSurpassed(bytes),
            Err(_) => ContentLimit::None,
        }
    }

    fn retention(self) -> Retention {
        let by_count = match self.max_backups {
            0 => FileLimit::Unlimited,
            files => FileLimit::MaxFiles(files),
        };
        let by_age = (!self.max_age.is_zero())
            .then(|| chrono::Duration::from_std(self.max_age).ok())
            .flatten()
            .map(|age| {
                AppendTimestamp::with_format(BACKUP_TIME_FORMAT, FileLimit::Age(age), DateFrom::Now)
            });

        Retention {
            by_count: AppendTimestamp::with_format(BACKUP_TIME_FORMAT, by_count, DateFrom::Now),
            by_age,
        }
    }
}

/// Timestamped backups, pruned once they fall outside either the count or the age limit.
struct Retention {
    by_count: AppendTimestamp,
    by_age: Option<AppendTimestamp>,
}

impl SuffixScheme for Retention {
    type Repr = TimestampSuffix;

    fn rotate_file(
        &mut self,
        basepath: &Path,
        newest_suffix: Option<&TimestampSuffix>,
        suffix: &Option<TimestampSuffix>,
    ) -> io::Result<TimestampSuffix> {
        self.by_count.rotate_file(basepath, newest_suffix, suffix)
    }

    fn parse(&self, suffix: &str) -> Option<TimestampSuffix> {
        self.by_count.parse(suffix)
    }

    fn too_old(&self, suffix: &TimestampSuffix, file_number: usize) -> bool {
        self.by_count.too_old(suffix, file_number)
            || self
                .by_age
                .as_ref()
                .is_some_and(|by_age| by_age.too_old(suffix, file_number))
    }
}

/// A [`Write`] implementation over a size-rotated log file.
///
/// The file, and any missing parent directories, are created on first write.
pub struct RollingFile {
    path: PathBuf,
    policy: RotationPolicy,
    inner: Option<FileRotate<Retention>>,
}

impl RollingFile {
    /// Creates a writer for `path`. Nothing touches the filesystem until the first write.
    pub fn new(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
            inner: None,
        }
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The policy this writer enforces.
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Paths of the rotated files, newest first. Empty until the first write.
    pub fn backups(&mut self) -> Vec<PathBuf> {
        let mut paths = self
            .inner
            .as_mut()
            .map(FileRotate::log_paths)
            .unwrap_or_default();
        paths.reverse();
        paths
    }

    fn open(&mut self) -> io::Result<&mut FileRotate<Retention>> {
        if self.inner.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            self.inner = Some(FileRotate::new(
                &self.path,
                self.policy.retention(),
                self.policy.content_limit(),
                Compression::None,
                #[cfg(unix)]
                None,
            ));
        }
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("log file is not open"))
    }
}

impl std::fmt::Debug for RollingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingFile")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self.open()?;
        match file.write(buf) {
            Ok(written) => Ok(written),
            // A rotation whose retention step failed has still opened a fresh file; the
            // record goes there instead of being lost.
            Err(_) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_policy(max_backups: usize) -> RotationPolicy {
        RotationPolicy {
            max_size_bytes: 64,
            max_backups,
            max_age: Duration::ZERO,
        }
    }

    fn record(tag: char) -> Vec<u8> {
        let mut line = vec![u8::try_from(tag).unwrap(); 39];
        line.push(b'\n');
        line
    }

    fn all_contents(file: &mut RollingFile) -> String {
        let mut paths = file.backups();
        paths.reverse();
        paths.push(file.path().to_path_buf());
        paths
            .iter()
            .map(|path| fs::read_to_string(path).unwrap())
            .collect()
    }

    #[test]
    fn creates_missing_directories_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/app_.log");
        let mut file = RollingFile::new(&path, RotationPolicy::default());
        assert!(!path.exists());

        file.write_all(b"first\n").unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\n");
    }

    #[test]
    fn appends_to_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        fs::write(&path, "earlier\n").unwrap();

        let mut file = RollingFile::new(&path, RotationPolicy::default());
        file.write_all(b"later\n").unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
        assert!(file.backups().is_empty());
    }

    #[test]
    fn rotates_once_the_limit_is_passed_without_splitting_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        let mut file = RollingFile::new(&path, small_policy(5));

        for tag in ['a', 'b', 'c'] {
            file.write_all(&record(tag)).unwrap();
        }
        file.flush().unwrap();

        let backups = file.backups();
        assert_eq!(backups.len(), 1);
        let backup_name = backups[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(backup_name.starts_with("app_.log.20"), "{backup_name}");

        let rotated = fs::read_to_string(&backups[0]).unwrap();
        assert_eq!(rotated.as_bytes(), [record('a'), record('b')].concat());
        assert_eq!(fs::read(&path).unwrap(), record('c'));
    }

    #[test]
    fn keeps_only_the_newest_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        let mut file = RollingFile::new(&path, small_policy(2));

        for tag in ['a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i'] {
            file.write_all(&record(tag)).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(file.backups().len(), 2);
        let contents = all_contents(&mut file);
        assert!(!contents.contains('a'));
        assert!(contents.contains('i'));
    }

    #[test]
    fn removes_backups_past_the_age_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        let stale = dir.path().join("app_.log.2001-01-01T00-00-00");
        let unrelated = dir.path().join("other.log.2001-01-01T00-00-00");
        fs::write(&stale, "old\n").unwrap();
        fs::write(&unrelated, "old\n").unwrap();

        let mut file = RollingFile::new(
            &path,
            RotationPolicy {
                max_size_bytes: 64,
                max_backups: 0,
                max_age: Duration::from_secs(24 * 60 * 60),
            },
        );
        for tag in ['a', 'b', 'c'] {
            file.write_all(&record(tag)).unwrap();
        }
        file.flush().unwrap();

        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert_eq!(file.backups().len(), 1);
    }

    #[test]
    fn failed_retention_does_not_lose_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        // A directory cannot be removed as a file, so pruning it fails on every rotation.
        let stale = dir.path().join("app_.log.2001-01-01T00-00-00");
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join("keep"), "pinned\n").unwrap();

        let mut file = RollingFile::new(
            &path,
            RotationPolicy {
                max_size_bytes: 64,
                max_backups: 0,
                max_age: Duration::from_secs(24 * 60 * 60),
            },
        );
        for tag in ['a', 'b', 'c', 'd', 'e'] {
            file.write_all(&record(tag)).unwrap();
        }
        file.flush().unwrap();

        let contents: String = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_file())
            .map(|path| fs::read_to_string(path).unwrap())
            .collect();
        for tag in ['a', 'b', 'c', 'd', 'e'] {
            assert_eq!(contents.matches(tag).count(), 39, "records for {tag:?}");
        }
    }

    #[test]
    fn zero_size_disables_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_.log");
        let mut file = RollingFile::new(
            &path,
            RotationPolicy {
                max_size_bytes: 0,
                ..small_policy(1)
            },
        );

        for tag in ['a', 'b', 'c', 'd'] {
            file.write_all(&record(tag)).unwrap();
        }
        file.flush().unwrap();

        assert!(file.backups().is_empty());
        assert_eq!(fs::read(&path).unwrap().len(), 4 * 40);
    }
}
