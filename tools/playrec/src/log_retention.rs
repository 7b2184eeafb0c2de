use crate::errors::RecorderError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const JOURNAL_EXTENSION: &str = "jsonl";

/// Keeps the journal at `active` and its rotated siblings
/// (`<stem>.<n>.jsonl`) within `budget_bytes`. An active journal past half
/// the budget is rotated first, then the oldest rotated files are deleted.
/// The active path is never deleted and files with other names are never
/// touched.
pub fn enforce_journal_budget(
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, RecorderError> {
    let Some(dir) = active.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(Vec::new());
    };
    let Some(stem) = active.file_stem().and_then(|stem| stem.to_str()) else {
        return Ok(Vec::new());
    };

    let active_len = fs::metadata(active).map(|meta| meta.len()).unwrap_or(0);
    if active_len > budget_bytes / 2 {
        let rotated = rotated_path(dir, stem);
        fs::rename(active, &rotated)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", active.display())))?;
    }

    let prefix = format!("{stem}.");
    let mut rotated = fs::read_dir(dir)
        .map_err(|e| RecorderError::Io(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path != active && path.is_file() && is_rotated(path, &prefix))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            let modified = meta.modified().unwrap_or(UNIX_EPOCH);
            Some((path, modified, meta.len()))
        })
        .collect::<Vec<_>>();

    rotated.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

    let active_len = fs::metadata(active).map(|meta| meta.len()).unwrap_or(0);
    let mut total = active_len + rotated.iter().map(|(_, _, len)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (path, _, len) in rotated {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&path)
            .map_err(|e| RecorderError::Io(format!("{}: {e}", path.display())))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn rotated_path(dir: &Path, stem: &str) -> PathBuf {
    let mut stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    loop {
        let candidate = dir.join(format!("{stem}.{stamp}.{JOURNAL_EXTENSION}"));
        if !candidate.exists() {
            return candidate;
        }
        stamp += 1;
    }
}

fn is_rotated(path: &Path, prefix: &str) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let Some(middle) = name
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(&format!(".{JOURNAL_EXTENSION}")))
    else {
        return false;
    };
    !middle.is_empty() && middle.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::enforce_journal_budget;
    use std::fs;

    #[test]
    fn prunes_oldest_rotated_journals_and_keeps_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = dir.path().join("journal.jsonl");
        fs::write(dir.path().join("journal.100.jsonl"), vec![b'x'; 40]).expect("old");
        std::thread::sleep(std::time::Duration::from_millis(5));
        fs::write(dir.path().join("journal.200.jsonl"), vec![b'x'; 40]).expect("newer");
        fs::write(&active, vec![b'x'; 5]).expect("active");
        fs::write(dir.path().join("s1_playwright_code.py"), vec![b'x'; 400]).expect("script");
        fs::write(dir.path().join("capture.jsonl"), vec![b'x'; 400]).expect("capture");

        let deleted = enforce_journal_budget(&active, 50).expect("pruned");
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("journal.100.jsonl"));
        assert!(active.exists());
        assert!(dir.path().join("journal.200.jsonl").exists());
        assert!(dir.path().join("s1_playwright_code.py").exists());
        assert!(dir.path().join("capture.jsonl").exists());
    }

    #[test]
    fn oversized_active_journal_is_rotated_not_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = dir.path().join("journal.jsonl");
        fs::write(&active, vec![b'x'; 80]).expect("active");

        let deleted = enforce_journal_budget(&active, 100).expect("rotated");
        assert!(deleted.is_empty());
        assert!(!active.exists());
        let rotated = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("journal."))
            .count();
        assert_eq!(rotated, 1);
    }

    #[test]
    fn names_that_only_share_the_stem_are_not_rotations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let active = dir.path().join("journal.jsonl");
        fs::write(&active, b"x").expect("active");
        fs::write(dir.path().join("journal.capture.jsonl"), vec![b'x'; 400]).expect("capture");

        let deleted = enforce_journal_budget(&active, 10).expect("pruned");
        assert!(deleted.is_empty());
        assert!(dir.path().join("journal.capture.jsonl").exists());
    }
}
