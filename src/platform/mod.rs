//! Platform abstraction layer
//!
//! File modification times for hot-reload detection.

use std::cmp::Ordering;
use std::path::Path;
use std::time::SystemTime;

/// Last-write timestamp of a file
pub type FileTime = SystemTime;

/// Last write time of `path`, or `None` if the file is missing or the
/// platform doesn't report modification times
pub fn file_modified(path: impl AsRef<Path>) -> Option<FileTime> {
    std::fs::metadata(path.as_ref())
        .and_then(|m| m.modified())
        .ok()
}

/// Order two file times (`Less` = `a` is older)
pub fn compare_file_time(a: FileTime, b: FileTime) -> Ordering {
    a.cmp(&b)
}

/// Whether a recorded time no longer matches what is on disk
///
/// A file that appeared or disappeared since the last load counts as a change.
pub fn file_changed(recorded: Option<FileTime>, current: Option<FileTime>) -> bool {
    match (recorded, current) {
        (Some(a), Some(b)) => compare_file_time(a, b) != Ordering::Equal,
        (None, None) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_file_has_no_time() {
        assert!(file_modified("/definitely/not/here.png").is_none());
    }

    #[test]
    fn test_existing_file_has_time() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(file_modified(file.path()).is_some());
    }

    #[test]
    fn test_compare_file_time() {
        let a = SystemTime::UNIX_EPOCH;
        let b = a + Duration::from_secs(1);
        assert_eq!(compare_file_time(a, b), Ordering::Less);
        assert_eq!(compare_file_time(b, a), Ordering::Greater);
        assert_eq!(compare_file_time(a, a), Ordering::Equal);
    }

    #[test]
    fn test_file_changed() {
        let a = SystemTime::UNIX_EPOCH;
        let b = a + Duration::from_secs(5);
        assert!(!file_changed(Some(a), Some(a)));
        assert!(file_changed(Some(a), Some(b)));
        assert!(file_changed(None, Some(a)));
        assert!(file_changed(Some(a), None));
        assert!(!file_changed(None, None));
    }
}
