use std::fmt;

use crate::manifest::{Manifest, Version};
use crate::repository::Repository;
use crate::store::ContentStore;

/// date format used in log output
pub const LOG_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y %z";

/// version with how it should be displayed
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub version: Version,
    /// parents are printed when history is not a straight line here
    pub show_parents: bool,
}

/// history of the repository, newest first
pub fn log<S: ContentStore>(repository: &Repository<S>) -> Vec<LogEntry> {
    log_manifest(repository.manifest())
}

/// history of a manifest, newest first
pub fn log_manifest(manifest: &Manifest) -> Vec<LogEntry> {
    let versions = &manifest.versions;
    let mut entries: Vec<LogEntry> = versions
        .iter()
        .enumerate()
        .map(|(i, version)| {
            let show_parents = match version.parents.as_slice() {
                [] => false,
                [only] => i == 0 || *only != versions[i - 1].hash,
                _ => true,
            };
            LogEntry {
                version: version.clone(),
                show_parents,
            }
        })
        .collect();
    entries.reverse();
    entries
}

/// format a log entry for display
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = &self.version;
        // labels padded to the widest one shown, plus two spaces
        let width = if self.show_parents { 10 } else { 9 };

        writeln!(f, "{:<width$}{}", "Hash:", v.hash)?;
        writeln!(f, "{:<width$}{}", "Author:", v.author)?;
        writeln!(f, "{:<width$}{}", "Date:", v.date.format(LOG_DATE_FORMAT))?;
        writeln!(f, "{:<width$}{}", "Type:", v.path_type)?;
        if self.show_parents {
            for (i, parent) in v.parents.iter().enumerate() {
                let label = if i == 0 { "Parents:" } else { "" };
                writeln!(f, "{:<width$}{}", label, parent)?;
            }
        }
        writeln!(f)?;

        for line in v.message.lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::{hash, version};

    #[test]
    fn test_log_newest_first() {
        let manifest = Manifest::new(vec![version(1, 1, &[]), version(2, 2, &[1])]);
        let entries = log_manifest(&manifest);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].version.hash, hash(2));
        assert_eq!(entries[1].version.hash, hash(1));
    }

    #[test]
    fn test_parents_shown_only_off_the_line() {
        let manifest = Manifest::new(vec![
            version(1, 1, &[]),
            version(2, 2, &[1]),
            version(3, 3, &[1]),
            version(4, 4, &[2, 3]),
        ]);
        let shown: Vec<bool> = log_manifest(&manifest)
            .iter()
            .map(|e| e.show_parents)
            .collect();

        // newest first: merge, branch off 1, linear child of 1, root
        assert_eq!(shown, vec![true, true, false, false]);
    }

    #[test]
    fn test_display() {
        let manifest = Manifest::new(vec![version(1, 1, &[])]);
        let entry = &log_manifest(&manifest)[0];

        let expected = format!(
            "Hash:    {}\nAuthor:  Ada <ada@example.com>\nDate:    Mon Jan 01 12:00:00 2024 +0000\nType:    DIRECTORY\n\n    version 1\n",
            hash(1)
        );
        assert_eq!(entry.to_string(), expected);
    }

    #[test]
    fn test_display_with_parents() {
        let manifest = Manifest::new(vec![version(9, 2, &[1, 2])]);
        let text = log_manifest(&manifest)[0].to_string();

        assert!(text.contains(&format!("Parents:  {}\n", hash(1))));
        assert!(text.contains(&format!("\n          {}\n", hash(2))));
    }
}
