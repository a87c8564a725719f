//! Greedy size-bounded packing of files into archive bins.
//!
//! Files are sorted by size (largest first) and appended to an open bin until the next file
//! would push it past the cap, at which point the bin is closed and a new one started. A file
//! that is larger than the cap on its own gets a bin to itself and is allowed to exceed it.

use std::path::PathBuf;
use tracing::{info, warn};

const MIB: f64 = 1024.0 * 1024.0;

/// A file found during the inventory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// A group of files destined for one archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    entries: Vec<FileEntry>,
    oversized: bool,
}

impl Bin {
    fn single_oversized(entry: FileEntry) -> Self {
        Self {
            entries: vec![entry],
            oversized: true,
        }
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True for the singleton bin of a file that alone exceeds the cap.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Packs `entries` into bins of at most `max_bin_size` bytes (oversized singletons excepted).
///
/// Ties in size keep their input order. An empty input yields no bins.
pub fn pack(mut entries: Vec<FileEntry>, max_bin_size: u64) -> Vec<Bin> {
    info!(files = entries.len(), max_bin_size, "Packing files into parts");

    entries.sort_by(|a, b| b.size.cmp(&a.size));

    let mut bins = Vec::new();
    let mut current: Vec<FileEntry> = Vec::new();
    let mut current_size: u64 = 0;

    for entry in entries {
        if entry.size > max_bin_size {
            warn!(
                file = %entry.path.display(),
                size_mb = %format!("{:.2}", entry.size as f64 / MIB),
                max_mb = %format!("{:.2}", max_bin_size as f64 / MIB),
                "File is larger than the part limit; it will be archived alone"
            );
            bins.push(Bin::single_oversized(entry));
            continue;
        }

        if current_size + entry.size > max_bin_size && !current.is_empty() {
            bins.push(Bin {
                entries: std::mem::take(&mut current),
                oversized: false,
            });
            current_size = 0;
        }

        current_size += entry.size;
        current.push(entry);
    }

    if !current.is_empty() {
        bins.push(Bin {
            entries: current,
            oversized: false,
        });
    }

    info!(parts = bins.len(), "Files organised into parts");
    bins
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn names(bins: &[Bin]) -> Vec<Vec<String>> {
        bins.iter()
            .map(|b| {
                b.entries()
                    .iter()
                    .map(|e| e.path.display().to_string())
                    .collect()
            })
            .collect()
    }

    fn trio() -> Vec<FileEntry> {
        vec![
            FileEntry::new("B", 600 * MB),
            FileEntry::new("C", 500 * MB),
            FileEntry::new("A", 700 * MB),
        ]
    }

    #[test]
    fn trio_under_1000mb_cap_lands_in_three_bins() {
        let bins = pack(trio(), 1000 * MB);
        assert_eq!(names(&bins), vec![vec!["A"], vec!["B"], vec!["C"]]);
        assert!(bins.iter().all(|b| !b.is_oversized()));
    }

    #[test]
    fn trio_under_2000mb_cap_fits_one_bin() {
        let bins = pack(trio(), 2000 * MB);
        assert_eq!(names(&bins), vec![vec!["A", "B", "C"]]);
        assert_eq!(bins[0].total_size(), 1800 * MB);
    }

    #[test]
    fn empty_input_yields_no_bins() {
        assert!(pack(Vec::new(), 10).is_empty());
    }

    #[test]
    fn oversized_file_gets_its_own_bin() {
        let bins = pack(
            vec![
                FileEntry::new("small", 3),
                FileEntry::new("huge", 50),
                FileEntry::new("mid", 6),
            ],
            10,
        );
        assert_eq!(names(&bins), vec![vec!["huge"], vec!["mid", "small"]]);
        assert!(bins[0].is_oversized());
        assert_eq!(bins[0].total_size(), 50);
        assert!(!bins[1].is_oversized());
    }

    #[test]
    fn file_exactly_at_cap_is_not_oversized() {
        let bins = pack(vec![FileEntry::new("exact", 10), FileEntry::new("x", 1)], 10);
        assert_eq!(names(&bins), vec![vec!["exact"], vec!["x"]]);
        assert!(!bins[0].is_oversized());
    }

    #[test]
    fn equal_sizes_keep_input_order() {
        let bins = pack(
            vec![
                FileEntry::new("first", 4),
                FileEntry::new("second", 4),
                FileEntry::new("third", 4),
            ],
            8,
        );
        assert_eq!(names(&bins), vec![vec!["first", "second"], vec!["third"]]);
    }

    #[test]
    fn zero_byte_files_are_packed() {
        let bins = pack(vec![FileEntry::new("empty", 0), FileEntry::new("one", 1)], 1);
        assert_eq!(names(&bins), vec![vec!["one", "empty"]]);
    }
}
