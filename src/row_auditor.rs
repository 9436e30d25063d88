use crate::range_collection::RangeCollection;
use crate::table::{Row, ROW_COUNT_COLUMN, ROW_INDEX_COLUMN};
use crate::ScanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    /// Accept every row and always report complete
    Off,
    /// A repeated (NullIndex, rowIndex) key is an integrity violation
    #[default]
    Strict,
    /// A repeated key is skipped instead of failing the pass
    Relaxed,
}

/// Tracks which (NullIndex, rowIndex) keys one aggregation pass has read.
///
/// Audited rows carry a `rowIndex` column (range text, usually one integer) and a
/// `rowCount` column giving the batch size N. The pass is complete when every
/// observed NullIndex covers exactly `0..N`.
#[derive(Debug, Clone)]
pub struct RowAuditor {
    mode: AuditMode,
    seen: BTreeMap<i64, RangeCollection>,
    row_count: Option<u64>,
    duplicates: u64,
}

impl RowAuditor {
    pub fn new(mode: AuditMode) -> Self {
        Self {
            mode,
            seen: BTreeMap::new(),
            row_count: None,
            duplicates: 0,
        }
    }

    /// Auditor that already knows N; every row must then agree with it
    pub fn with_row_count(mode: AuditMode, row_count: u64) -> Self {
        Self {
            row_count: Some(row_count),
            ..Self::new(mode)
        }
    }

    pub fn mode(&self) -> AuditMode {
        self.mode
    }

    pub fn row_count(&self) -> Option<u64> {
        self.row_count
    }

    /// Rows skipped as repeats in relaxed mode
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn observed_null_indices(&self) -> impl Iterator<Item = i64> + '_ {
        self.seen.keys().copied()
    }

    /// Record the row's key. Returns false if the key was already seen and the
    /// row should be skipped (relaxed mode only).
    pub fn try_add(&mut self, row: &Row, null_index: i64, source: &str) -> Result<bool, ScanError> {
        if self.mode == AuditMode::Off {
            return Ok(true);
        }

        let row_index_text = row.get(ROW_INDEX_COLUMN).ok_or_else(|| {
            ScanError::Integrity(format!(
                "When auditing tabulation a \"{}\" column is required. (File \"{}\")",
                ROW_INDEX_COLUMN, source
            ))
        })?;
        let row_count_text = row.get(ROW_COUNT_COLUMN).ok_or_else(|| {
            ScanError::Integrity(format!(
                "When auditing tabulation a \"{}\" column is required. (File \"{}\")",
                ROW_COUNT_COLUMN, source
            ))
        })?;

        let row_index: RangeCollection = row_index_text
            .parse()
            .map_err(|e| ScanError::Integrity(format!("bad rowIndex in file \"{}\": {}", source, e)))?;
        let row_count: u64 = row_count_text.trim().parse().map_err(|e| {
            ScanError::Integrity(format!(
                "bad rowCount \"{}\" in file \"{}\": {}",
                row_count_text, source, e
            ))
        })?;

        if row_index.is_empty() || row_count == 0 || !row_index.is_between(0, row_count - 1) {
            return Err(ScanError::Integrity(format!(
                "rowIndex must be at least zero and less than rowCount (rowIndex {}, rowCount {}, file \"{}\")",
                row_index, row_count, source
            )));
        }

        match self.row_count {
            None => self.row_count = Some(row_count),
            Some(expected) if expected != row_count => {
                return Err(ScanError::Integrity(format!(
                    "A different row count ({} instead of {}) was at rowIndex {} in file \"{}\"",
                    row_count, expected, row_index, source
                )));
            }
            Some(_) => {}
        }

        // A rejected row leaves `seen` untouched
        let seen = self.seen.entry(null_index).or_default();
        if !seen.intersects(&row_index) {
            seen.add_range_collection(&row_index);
            return Ok(true);
        }

        match self.mode {
            AuditMode::Relaxed => {
                debug!(
                    "[audit] Skipping repeated rowIndex {} for NullIndex {} in {}",
                    row_index, null_index, source
                );
                self.duplicates += 1;
                Ok(false)
            }
            _ => Err(ScanError::Integrity(format!(
                "rowIndex {} for NullIndex {} was already read before file \"{}\"",
                row_index, null_index, source
            ))),
        }
    }

    pub fn is_complete(&self) -> bool {
        if self.mode == AuditMode::Off {
            return true;
        }
        match self.row_count {
            Some(n) => !self.seen.is_empty() && self.seen.values().all(|rc| rc.is_complete(n)),
            None => false,
        }
    }

    /// Row indices that still have to be produced, as a retry manifest.
    ///
    /// Union over the observed null indices of what each is missing. Empty when
    /// auditing is off or when no row has told us N yet.
    pub fn skip_range_collection(&self) -> RangeCollection {
        let n = match (self.mode, self.row_count) {
            (AuditMode::Off, _) | (_, None) | (_, Some(0)) => return RangeCollection::new(),
            (_, Some(n)) => n,
        };
        if self.seen.is_empty() {
            return RangeCollection::from_range(0, n - 1);
        }

        let mut missing = RangeCollection::new();
        for found in self.seen.values() {
            missing.add_range_collection(&found.complement(0, n - 1));
        }
        missing
    }

    /// Error out unless every needed row was found
    pub fn check_is_complete(&self, input_pattern: &str) -> Result<(), ScanError> {
        if self.is_complete() {
            return Ok(());
        }
        Err(ScanError::Integrity(format!(
            "Not all needed rows were found in {}. Missing row indexes:\n{}",
            input_pattern,
            self.skip_range_collection()
        )))
    }
}
