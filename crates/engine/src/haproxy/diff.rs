//! Line diff of deployed artifacts against their archived copies.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DiffLine {
    Removed(String),
    Added(String),
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffLine::Removed(line) => write!(f, "- {}", line),
            DiffLine::Added(line) => write!(f, "+ {}", line),
        }
    }
}

/// Changed lines of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDiff {
    pub file: String,
    pub lines: Vec<DiffLine>,
}

impl fmt::Display for FileDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {}", self.file)?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Lines removed from `old` and added in `new`, in file order
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();

    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Removed(a[i].to_string()));
            i += 1;
        } else {
            out.push(DiffLine::Added(b[j].to_string()));
            j += 1;
        }
    }
    out.extend(a[i..].iter().map(|l| DiffLine::Removed(l.to_string())));
    out.extend(b[j..].iter().map(|l| DiffLine::Added(l.to_string())));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert!(diff_lines("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn test_changed_line() {
        let diff = diff_lines(
            "app.acme.com acme_7_prod\nold.acme.com nocontent\n",
            "app.acme.com acme_7_prod\nnew.acme.com nocontent\n",
        );
        assert_eq!(
            diff,
            vec![
                DiffLine::Removed("old.acme.com nocontent".to_string()),
                DiffLine::Added("new.acme.com nocontent".to_string()),
            ]
        );
    }

    #[test]
    fn test_insert_and_delete() {
        let diff = diff_lines("a\nb\nc\n", "a\nc\nd\n");
        let rendered: Vec<String> = diff.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["- b", "+ d"]);
    }

    #[test]
    fn test_from_empty() {
        let diff = diff_lines("", "x\ny");
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|l| matches!(l, DiffLine::Added(_))));
    }
}
