//! The `ConfigLines` model: an ordered sequence of `.config` text lines.
//!
//! Each line is either `KEY=value` or `# KEY is not set`. Order is
//! preserved on write; removal and append are the only two edit
//! operations the rest of the system performs on a sequence. Duplicate
//! keys are tolerated — the framework's own `oldconfig` pass resolves
//! them by last-occurrence-wins, so this type does not attempt to
//! deduplicate on insertion.

use std::fmt;
use std::path::Path;

/// An ordered, mutable sequence of `.config` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLines {
    lines: Vec<String>,
}

impl ConfigLines {
    /// Construct an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a sequence from raw `.config` text, one entry per line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Read a sequence from a file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Write the sequence to a file on disk, one entry per line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_string())
    }

    /// Append a line to the end of the sequence.
    pub fn append(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Append every line from `other`, preserving order.
    pub fn append_all<I, S>(&mut self, other: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines.extend(other.into_iter().map(Into::into));
    }

    /// Remove every line equal to `line`, preserving the relative order of
    /// the remaining lines. Returns the number of lines removed.
    pub fn remove_exact(&mut self, line: &str) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| l != line);
        before - self.lines.len()
    }

    /// Returns `true` iff some line is exactly equal to `line`.
    #[must_use]
    pub fn contains_exact(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l == line)
    }

    /// Returns `true` iff some line starts with `prefix` (used to test for
    /// `KEY=` regardless of value, or `KEY=y` specifically).
    #[must_use]
    pub fn contains_prefix(&self, prefix: &str) -> bool {
        self.lines.iter().any(|l| l.starts_with(prefix))
    }

    /// Find the index of the last line starting with `prefix`.
    #[must_use]
    pub fn rposition_prefix(&self, prefix: &str) -> Option<usize> {
        self.lines.iter().rposition(|l| l.starts_with(prefix))
    }

    /// Replace the line at `index` with `line`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set_at(&mut self, index: usize, line: impl Into<String>) {
        let Some(slot) = self.lines.get_mut(index) else {
            panic!("index {index} out of bounds");
        };
        *slot = line.into();
    }

    /// Returns `true` iff the given key is set to `y` (enabled), i.e. a
    /// line `KEY=y` is present.
    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.contains_exact(&format!("{key}=y"))
    }

    /// Returns `true` iff the given key is explicitly disabled, i.e. a
    /// line `# KEY is not set` is present.
    #[must_use]
    pub fn is_not_set(&self, key: &str) -> bool {
        self.contains_exact(&format!("# {key} is not set"))
    }

    /// Flip a `# KEY is not set` line to `KEY=y`, if present. Returns
    /// `true` if a substitution was made.
    pub fn enable(&mut self, key: &str) -> bool {
        let not_set = format!("# {key} is not set");
        if let Some(slot) = self.lines.iter_mut().find(|l| *l == &not_set) {
            *slot = format!("{key}=y");
            true
        } else {
            false
        }
    }

    /// Remove every selection line (`KEY=y` or `KEY=<value>`) for `key`.
    /// Returns the number of lines removed.
    pub fn drop_selection(&mut self, key: &str) -> usize {
        let prefix = format!("{key}=");
        let before = self.lines.len();
        self.lines.retain(|l| !l.starts_with(&prefix));
        before - self.lines.len()
    }

    /// Borrow the underlying lines in order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.lines
    }

    /// The last `n` lines, for tail-scanning diagnostics. Returns fewer
    /// than `n` if the sequence is shorter.
    #[must_use]
    pub fn tail(&self, n: usize) -> &[String] {
        let start = self.lines.len().saturating_sub(n);
        self.lines.get(start..).unwrap_or(&[])
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` iff there are no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for ConfigLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
