//! Dataset (queue partition) types.

use serde::{Deserialize, Serialize};

/// Ordered key of a dataset.
///
/// Rendered as underscore-separated segments (`1`, `2`, `1_1`). Ordering is
/// lexicographic by segment, and a prefix sorts before its extensions, so
/// `1 < 1_1 < 1_2 < 2`. This leaves room to insert datasets between two
/// existing ones without renaming anything.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetIndex(Vec<u32>);

impl DatasetIndex {
    /// Index of the first dataset of an empty queue.
    pub fn first() -> Self {
        Self(vec![1])
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    /// Index used when appending after `self`: next top-level segment.
    pub fn next_append(&self) -> Self {
        let top = self.0.first().copied().unwrap_or(0);
        Self(vec![top.saturating_add(1)])
    }

    /// An index strictly between `prev` and `before`.
    ///
    /// With no `prev`, the result sorts before `before`. Returns `None` only
    /// when `before` is the immediate successor of `prev` (`prev` followed by
    /// a single `0` segment), which the engine never produces.
    pub fn between(prev: Option<&DatasetIndex>, before: &DatasetIndex) -> Option<Self> {
        let prev_segments: &[u32] = prev.map_or(&[], |p| p.segments());
        if let Some(p) = prev
            && p >= before
        {
            return None;
        }

        if !before.0.starts_with(prev_segments) {
            // Bump the last segment when that still sorts before `before`.
            if let Some((last, head)) = prev_segments.split_last() {
                let mut bumped = head.to_vec();
                bumped.push(last.saturating_add(1));
                let bumped = Self(bumped);
                if &bumped < before {
                    return Some(bumped);
                }
            }
            let mut child = prev_segments.to_vec();
            child.push(1);
            return Some(Self(child));
        }

        let rest = &before.0[prev_segments.len()..];
        let mut candidate = prev_segments.to_vec();
        match rest {
            [first, ..] if *first > 0 => {
                candidate.push(first - 1);
                Some(Self(candidate))
            }
            [_, _, ..] => {
                candidate.push(0);
                Some(Self(candidate))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for DatasetIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                f.write_str("_")?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

/// Error parsing a dataset index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid dataset index: {0:?}")]
pub struct ParseIndexError(pub String);

impl std::str::FromStr for DatasetIndex {
    type Err = ParseIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIndexError(s.to_string()));
        }
        let segments = s
            .split('_')
            .map(|part| {
                let leading_zero = part.len() > 1 && part.starts_with('0');
                if part.is_empty() || leading_zero || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseIndexError(s.to_string()));
                }
                part.parse::<u32>().map_err(|_| ParseIndexError(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }
}

impl Serialize for DatasetIndex {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DatasetIndex {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which backing table of a dataset a storage table is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Jobs,
    Statuses,
}

/// A queue partition and its two backing tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dataset {
    pub index: DatasetIndex,
    pub jobs_table: String,
    pub status_table: String,
}

impl Dataset {
    /// Dataset named deterministically from the queue prefix and index.
    pub fn new(prefix: &str, index: DatasetIndex) -> Self {
        Self {
            jobs_table: format!("{prefix}_jobs_{index}"),
            status_table: format!("{prefix}_job_status_{index}"),
            index,
        }
    }

    /// Recognize a table named by [`Dataset::new`] for `prefix`.
    pub fn parse_table_name(prefix: &str, table: &str) -> Option<(TableKind, DatasetIndex)> {
        let rest = table.strip_prefix(prefix)?.strip_prefix('_')?;
        let (kind, index) = if let Some(index) = rest.strip_prefix("jobs_") {
            (TableKind::Jobs, index)
        } else if let Some(index) = rest.strip_prefix("job_status_") {
            (TableKind::Statuses, index)
        } else {
            return None;
        };
        index.parse().ok().map(|index| (kind, index))
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.jobs_table)
    }
}
