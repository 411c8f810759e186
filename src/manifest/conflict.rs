use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::Version;

/// two versions recording the same content with different metadata
///
/// `left` comes from the manifest being merged into, `right` from the
/// incoming one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub left: Version,
    pub right: Version,
}

impl Conflict {
    pub fn new(left: Version, right: Version) -> Self {
        Self { left, right }
    }

    /// (label, left value, right value) rows, in report order
    fn rows(&self) -> Vec<(&'static str, String, String)> {
        let parents = |v: &Version| {
            if v.parents.is_empty() {
                "-".to_string()
            } else {
                v.parents
                    .iter()
                    .map(|p| p.short())
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };

        vec![
            ("Hash", self.left.hash.to_hex(), self.right.hash.to_hex()),
            ("Author", self.left.author.clone(), self.right.author.clone()),
            ("Date", self.left.date.to_rfc3339(), self.right.date.to_rfc3339()),
            ("Message", self.left.message.clone(), self.right.message.clone()),
            (
                "Type",
                self.left.path_type.to_string(),
                self.right.path_type.to_string(),
            ),
            ("Parents", parents(&self.left), parents(&self.right)),
        ]
    }
}

/// side-by-side report, rows that differ marked with `*`
impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self.rows();
        let width = rows
            .iter()
            .map(|(_, l, _)| l.chars().count())
            .max()
            .unwrap_or(0)
            .max("Original".len());

        writeln!(f, "  {:<8} | {:<width$} | New", "", "Original", width = width)?;
        for (label, left, right) in &rows {
            let marker = if left == right { ' ' } else { '*' };
            writeln!(
                f,
                "{} {:<8} | {:<width$} | {}",
                marker,
                label,
                left,
                right,
                width = width
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::version;

    #[test]
    fn test_report_marks_differences() {
        let left = version(7, 1, &[]);
        let mut right = left.clone();
        right.message = "other message".to_string();

        let report = Conflict::new(left, right).to_string();

        let message_line = report.lines().find(|l| l.contains("Message")).unwrap();
        assert!(message_line.starts_with('*'));
        assert!(message_line.contains("version 7"));
        assert!(message_line.contains("other message"));

        let author_line = report.lines().find(|l| l.contains("Author")).unwrap();
        assert!(author_line.starts_with(' '));
    }

    #[test]
    fn test_conflict_json() {
        let left = version(1, 1, &[]);
        let mut right = left.clone();
        right.author = "Bob <bob@example.com>".to_string();

        let conflict = Conflict::new(left, right);
        let json = serde_json::to_string(&conflict).unwrap();
        let parsed: Conflict = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, conflict);
    }
}
