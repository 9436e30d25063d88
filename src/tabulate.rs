use crate::config::{QValueMethod, TabulateConfig};
use crate::keep_test::{KeepTest, KeepTestRegistry};
use crate::qvalue;
use crate::range_collection::RangeCollection;
use crate::row_auditor::{AuditMode, RowAuditor};
use crate::table::{
    Header, Row, TabFile, tab_line, GROUP_ID_COLUMN, NULL_INDEX_COLUMN, P_VALUE_COLUMN,
    TEST_STATISTIC_COLUMN,
};
use crate::ScanError;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const Q_VALUE_COLUMN: &str = "qValue";
pub const P_VAL_FROM_RANDOMIZATIONS_COLUMN: &str = "pValFromRandomizations";
pub const REAL_NULL_INDEX: i64 = -1;

/// Separator between narrow patterns inside one broad pattern
pub const PATTERN_JOINER: char = '+';

#[derive(Debug, Clone, PartialEq)]
pub enum TabulateOutcome {
    /// The report was written
    Complete { rows_written: usize, randomization_runs: u64 },
    /// Some rows were missing; the output holds the skip range instead of a report
    Incomplete { pattern: String, skip: RangeCollection },
}

impl TabulateOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TabulateOutcome::Complete { .. })
    }
}

/// Which column carries the value being tabulated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueColumn {
    PValue,
    TestStatistic,
}

impl ValueColumn {
    fn from_header(header: &Header) -> Result<Self, ScanError> {
        if header.contains(P_VALUE_COLUMN) {
            Ok(ValueColumn::PValue)
        } else if header.contains(TEST_STATISTIC_COLUMN) {
            Ok(ValueColumn::TestStatistic)
        } else {
            Err(ScanError::Integrity(format!(
                "The header must contain \"{}\" or \"{}\"",
                P_VALUE_COLUMN, TEST_STATISTIC_COLUMN
            )))
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueColumn::PValue => P_VALUE_COLUMN,
            ValueColumn::TestStatistic => TEST_STATISTIC_COLUMN,
        }
    }
}

#[derive(Debug)]
struct RealRow {
    row: Row,
    value: f64,
    group: i64,
}

#[derive(Debug, Default)]
struct SplitBucket {
    real: Vec<RealRow>,
    null_pools: FxHashMap<i64, Vec<f64>>,
    /// Real rows seen, whatever their value; the Storey–Tibshirani `m`
    hypothesis_count: u64,
}

#[derive(Debug)]
struct TabulatedRow {
    row: Row,
    value: f64,
    q_value: f64,
    p_from_randomizations: Option<f64>,
}

#[derive(Debug, Default)]
struct ScanState {
    header: Option<Arc<Header>>,
    value_column: Option<ValueColumn>,
    buckets: Vec<SplitBucket>,
    rows_read: u64,
    null_values_kept: u64,
}

/// One tabulation pass: reads result files, audits them, and writes a q-value report
pub struct FdrAggregator {
    config: TabulateConfig,
    keep_test: KeepTest,
    split_keep_tests: Vec<KeepTest>,
}

impl FdrAggregator {
    pub fn new(config: TabulateConfig) -> Result<Self, ScanError> {
        Self::with_registry(config, &KeepTestRegistry::with_defaults())
    }

    pub fn with_registry(config: TabulateConfig, registry: &KeepTestRegistry) -> Result<Self, ScanError> {
        config.validate()?;
        let (keep_test, split_keep_tests) = config.keep_tests(registry)?;
        Ok(Self {
            config,
            keep_test,
            split_keep_tests,
        })
    }

    pub fn config(&self) -> &TabulateConfig {
        &self.config
    }

    /// Scan every pattern group and write either the report or a skip range to the output path
    pub fn create_tabulate_report(&mut self) -> Result<TabulateOutcome, ScanError> {
        // Created up front so an unwritable path fails before any scanning
        let output_file = File::create(&self.config.output)?;
        let mut out = BufWriter::new(output_file);
        let output_path = fs::canonicalize(&self.config.output)?;

        self.keep_test.reset();
        self.split_keep_tests.iter_mut().for_each(KeepTest::reset);

        let mut state = ScanState {
            buckets: (0..=self.split_keep_tests.len()).map(|_| SplitBucket::default()).collect(),
            ..ScanState::default()
        };
        let mut all_null_indices: BTreeSet<i64> = BTreeSet::new();

        let patterns = self.config.patterns.clone();
        for broad_pattern in &patterns {
            let mut broad_null_indices: BTreeSet<i64> = BTreeSet::new();
            for narrow_pattern in broad_pattern.split(PATTERN_JOINER) {
                let (auditor, null_indices) = self.scan_narrow_pattern(&mut state, narrow_pattern, &output_path)?;

                if !auditor.is_complete() {
                    // Without a row count there is no retry manifest to write
                    if auditor.row_count().is_none() {
                        return Err(ScanError::Integrity(format!(
                            "No audited rows were found for input pattern {} in {}",
                            narrow_pattern,
                            self.config.input_dir.display()
                        )));
                    }
                    let skip = auditor.skip_range_collection();
                    writeln!(out, "{}", skip)?;
                    out.flush()?;
                    info!(
                        "[tabulate] Not all needed rows were found in {}. Missing rows: {}. {} created as skip file.",
                        narrow_pattern,
                        skip,
                        self.config.output.display()
                    );
                    return Ok(TabulateOutcome::Incomplete {
                        pattern: narrow_pattern.to_string(),
                        skip,
                    });
                }

                let overlap: Vec<i64> = broad_null_indices.intersection(&null_indices).copied().collect();
                if !overlap.is_empty() {
                    return Err(ScanError::Integrity(format!(
                        "Within input pattern {}, multiple '+'-connected parts cover the same null index(es): {:?}",
                        broad_pattern, overlap
                    )));
                }
                broad_null_indices.extend(null_indices);
            }

            if self.config.audit != AuditMode::Off && !broad_null_indices.contains(&REAL_NULL_INDEX) {
                return Err(ScanError::Integrity(format!(
                    "The null index {} for the real data was not seen in {}",
                    REAL_NULL_INDEX, broad_pattern
                )));
            }
            all_null_indices.extend(broad_null_indices);
        }

        info!(
            "[tabulate] Read all files: {} rows, {} null values kept",
            state.rows_read, state.null_values_kept
        );

        let randomization_runs = if self.config.method.uses_null_runs() {
            let runs = all_null_indices.iter().filter(|&&i| i >= 0).count() as u64;
            info!("[tabulate] Detected {} randomization runs relative to the real run", runs);
            if runs == 0 {
                return Err(ScanError::Integrity(
                    "No randomization runs detected. Did you mean to use the storey_tibshirani method?".into(),
                ));
            }
            runs
        } else {
            0
        };

        let value_column = state.value_column.unwrap_or(ValueColumn::PValue);
        let mut tabulated = Vec::new();
        for bucket in std::mem::take(&mut state.buckets) {
            tabulated.extend(self.tabulate_bucket(bucket, randomization_runs));
        }
        tabulated.sort_by(|a, b| a.q_value.total_cmp(&b.q_value).then(a.value.total_cmp(&b.value)));

        let header_line = state.header.as_ref().map(|h| h.line().to_string()).unwrap_or_default();
        let mut header_fields: Vec<&str> = Vec::new();
        if !header_line.is_empty() {
            header_fields.push(&header_line);
        }
        if value_column == ValueColumn::TestStatistic {
            header_fields.push(P_VAL_FROM_RANDOMIZATIONS_COLUMN);
        }
        header_fields.push(Q_VALUE_COLUMN);
        writeln!(out, "{}", tab_line(header_fields))?;

        for entry in &tabulated {
            match (value_column, entry.p_from_randomizations) {
                (ValueColumn::TestStatistic, Some(p)) => {
                    writeln!(out, "{}\t{}\t{}", entry.row.line(), p, entry.q_value)?
                }
                _ => writeln!(out, "{}\t{}", entry.row.line(), entry.q_value)?,
            }
        }
        out.flush()?;

        info!(
            "[tabulate] Wrote {} rows to {}",
            tabulated.len(),
            self.config.output.display()
        );
        Ok(TabulateOutcome::Complete {
            rows_written: tabulated.len(),
            randomization_runs,
        })
    }

    fn scan_narrow_pattern(
        &mut self,
        state: &mut ScanState,
        narrow_pattern: &str,
        output_path: &Path,
    ) -> Result<(RowAuditor, BTreeSet<i64>), ScanError> {
        let mut auditor = RowAuditor::new(self.config.audit);
        let mut null_indices = BTreeSet::new();
        let storey = self.config.method == QValueMethod::StoreyTibshirani;
        let local = self.config.method == QValueMethod::LocalRandomization;

        for path in matching_files(&self.config.input_dir, narrow_pattern)? {
            if fs::canonicalize(&path).is_ok_and(|p| p == output_path) {
                continue;
            }
            let file = TabFile::open(&path)?;
            if file.header().is_empty() {
                warn!("[tabulate] Skipping empty file {}", path.display());
                continue;
            }
            let header = Arc::clone(file.header());
            self.check_header(state, &header, &path)?;
            let value_column = ValueColumn::from_header(&header)?;
            let has_null_index = header.contains(NULL_INDEX_COLUMN);
            let source = path.display().to_string();
            debug!("[tabulate] Reading {}", source);

            for row in file {
                let row = row?;
                state.rows_read += 1;

                let null_index = if has_null_index {
                    row.parse_i64(NULL_INDEX_COLUMN)?
                } else if storey {
                    REAL_NULL_INDEX
                } else {
                    return Err(ScanError::Integrity(format!(
                        "file {} has no {} column",
                        source, NULL_INDEX_COLUMN
                    )));
                };
                if null_index < REAL_NULL_INDEX {
                    return Err(ScanError::Integrity(format!(
                        "{} {} in {} is neither {} nor a null run",
                        NULL_INDEX_COLUMN, null_index, source, REAL_NULL_INDEX
                    )));
                }

                if !auditor.try_add(&row, null_index, &source)? || !self.keep_test.test(&row)? {
                    continue;
                }
                null_indices.insert(null_index);

                let value = row.parse_f64(value_column.name())?;
                if value.is_nan() {
                    return Err(ScanError::Integrity(format!(
                        "{} is NaN in {}: {}",
                        value_column.name(),
                        source,
                        row.line()
                    )));
                }

                let split = self.split_index(&row)?;
                let bucket = &mut state.buckets[split];
                if null_index == REAL_NULL_INDEX {
                    bucket.hypothesis_count += 1;
                    if value <= self.config.max_p_value {
                        let group = if local { row.parse_i64(GROUP_ID_COLUMN)? } else { 0 };
                        bucket.real.push(RealRow { row, value, group });
                    }
                } else if !storey && value <= self.config.max_p_value {
                    let group = if local { row.parse_i64(GROUP_ID_COLUMN)? } else { 0 };
                    bucket.null_pools.entry(group).or_default().push(value);
                    state.null_values_kept += 1;
                }
            }
        }

        Ok((auditor, null_indices))
    }

    fn check_header(&self, state: &mut ScanState, header: &Arc<Header>, path: &Path) -> Result<(), ScanError> {
        match &state.header {
            None => {
                let value_column = ValueColumn::from_header(header)?;
                if value_column == ValueColumn::TestStatistic && self.config.method == QValueMethod::StoreyTibshirani {
                    return Err(ScanError::Config(
                        "a TestStatistic column cannot be tabulated with the storey_tibshirani method".into(),
                    ));
                }
                state.value_column = Some(value_column);
                state.header = Some(Arc::clone(header));
                Ok(())
            }
            Some(first) if first.line() != header.line() => Err(ScanError::Integrity(format!(
                "The header for file {} is different from the first file read in",
                path.display()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// First split keep-test the row passes, or the trailing catch-all bucket
    fn split_index(&mut self, row: &Row) -> Result<usize, ScanError> {
        for (i, test) in self.split_keep_tests.iter_mut().enumerate() {
            if test.test(row)? {
                return Ok(i);
            }
        }
        Ok(self.split_keep_tests.len())
    }

    fn tabulate_bucket(&self, bucket: SplitBucket, randomization_runs: u64) -> Vec<TabulatedRow> {
        let values: Vec<f64> = bucket.real.iter().map(|r| r.value).collect();
        let (q_values, p_from_randomizations) = match self.config.method {
            QValueMethod::StoreyTibshirani => {
                let m = self.config.num_tests_override.unwrap_or(bucket.hypothesis_count);
                if let Some(m) = self.config.num_tests_override {
                    info!(
                        "[tabulate] Using {} tests for q-values rather than the observed {}",
                        m, bucket.hypothesis_count
                    );
                }
                (qvalue::storey_tibshirani(&values, m), None)
            }
            QValueMethod::Randomization => {
                let pool = bucket.null_pools.get(&0).map(Vec::as_slice).unwrap_or(&[]);
                let result = qvalue::randomization(&values, pool, randomization_runs);
                (result.q_values, Some(result.p_values_from_randomizations))
            }
            QValueMethod::LocalRandomization => {
                let groups: Vec<i64> = bucket.real.iter().map(|r| r.group).collect();
                let result = qvalue::local_randomization(&values, &groups, &bucket.null_pools);
                (result.q_values, Some(result.p_values_from_randomizations))
            }
        };

        bucket
            .real
            .into_iter()
            .enumerate()
            .map(|(i, real)| TabulatedRow {
                row: real.row,
                value: real.value,
                q_value: q_values[i],
                p_from_randomizations: p_from_randomizations.as_ref().map(|p| p[i]),
            })
            .collect()
    }
}

/// Build an aggregator from `config` with the default keep-tests and run it
pub fn create_tabulate_report(config: &TabulateConfig) -> Result<TabulateOutcome, ScanError> {
    FdrAggregator::new(config.clone())?.create_tabulate_report()
}

/// Files in `dir` matching a glob `pattern`, in sorted path order
pub fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ScanError> {
    let dir_text = dir.to_string_lossy();
    let full_pattern = if dir_text.is_empty() {
        pattern.to_string()
    } else {
        format!("{}/{}", glob::Pattern::escape(dir_text.trim_end_matches('/')), pattern)
    };

    let mut paths = Vec::new();
    for entry in glob::glob(&full_pattern)? {
        let path = entry?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSummary {
    pub files_merged: usize,
    pub rows_written: usize,
}

/// Append every file matched by `patterns` (each possibly '+'-joined) to `output`
/// under a single header, deleting each input once its rows are written.
pub fn merge_files(dir: &Path, patterns: &[String], output: &Path) -> Result<MergeSummary, ScanError> {
    let mut header = existing_header(output)?;
    let mut writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(output)?);
    let output_path = fs::canonicalize(output)?;
    let mut summary = MergeSummary::default();

    for pattern in patterns {
        for narrow_pattern in pattern.split(PATTERN_JOINER) {
            for path in matching_files(dir, narrow_pattern)? {
                if fs::canonicalize(&path).is_ok_and(|p| p == output_path) {
                    continue;
                }
                let file = TabFile::open(&path)?;
                let file_header = file.header().line().to_string();
                if !file_header.is_empty() {
                    if header.as_ref().is_some_and(|expected| *expected != file_header) {
                        return Err(ScanError::Integrity(format!(
                            "The header for file {} is different from the header of {}",
                            path.display(),
                            output.display()
                        )));
                    }

                    // Stage the whole input so a bad row leaves the merged file untouched
                    let mut staged = String::new();
                    let mut rows = 0;
                    for row in file {
                        staged.push_str(row?.line());
                        staged.push('\n');
                        rows += 1;
                    }

                    if header.is_none() {
                        writeln!(writer, "{}", file_header)?;
                        header = Some(file_header);
                    }
                    writer.write_all(staged.as_bytes())?;
                    summary.rows_written += rows;
                }
                writer.flush()?;
                writer.get_ref().sync_data()?;
                fs::remove_file(&path)?;
                summary.files_merged += 1;
                debug!("[merge] Merged and removed {}", path.display());
            }
        }
    }

    info!(
        "[merge] Merged {} files ({} rows) into {}",
        summary.files_merged,
        summary.rows_written,
        output.display()
    );
    Ok(summary)
}

fn existing_header(path: &Path) -> Result<Option<String>, ScanError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    let line = line.trim_end_matches(['\r', '\n']);
    Ok((!line.is_empty()).then(|| line.to_string()))
}

/// Merge the matched files into `merged_file`, then tabulate it with auditing on.
///
/// On success any stale `skip_file` is removed and `true` is returned. Otherwise the
/// skip range written to `report` is moved to `skip_file` and `false` is returned.
/// Keep-tests, splits and method come from `template`.
pub fn merge_then_tabulate_or_create_skip_file(
    dir: &Path,
    pattern: &str,
    merged_file: &Path,
    report: &Path,
    skip_file: &Path,
    template: &TabulateConfig,
) -> Result<bool, ScanError> {
    info!("[merge] Merging files...");
    merge_files(dir, &[pattern.to_string()], merged_file)?;

    let merged_name = merged_file
        .file_name()
        .ok_or_else(|| ScanError::Config(format!("{} is not a file path", merged_file.display())))?
        .to_string_lossy()
        .to_string();
    let mut config = template.clone();
    config.input_dir = merged_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.patterns = vec![glob::Pattern::escape(&merged_name)];
    config.output = report.to_path_buf();
    if config.audit == AuditMode::Off {
        config.audit = AuditMode::Strict;
    }

    match create_tabulate_report(&config)? {
        TabulateOutcome::Complete { .. } => {
            if skip_file.exists() {
                fs::remove_file(skip_file)?;
            }
            Ok(true)
        }
        TabulateOutcome::Incomplete { .. } => {
            info!(
                "[merge] Tabulation incomplete. Missing rows placed in {}",
                skip_file.display()
            );
            fs::rename(report, skip_file)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "rowIndex\trowCount\tNullIndex\tPValue";

    fn write_rows(dir: &Path, name: &str, rows: &[(u64, i64, f64)], row_count: u64) {
        let mut text = format!("{}\n", HEADER);
        for (row_index, null_index, p) in rows {
            text.push_str(&format!("{}\t{}\t{}\t{}\n", row_index, row_count, null_index, p));
        }
        fs::write(dir.join(name), text).unwrap();
    }

    fn report_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_matching_files_sorted() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.log"] {
            fs::write(temp_dir.path().join(name), "x\n").unwrap();
        }
        let files = matching_files(temp_dir.path(), "*.txt").unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_randomization_report() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "r0.txt", &[(0, -1, 0.01), (0, 0, 0.5), (0, 1, 0.6)], 2);
        write_rows(dir, "r1.txt", &[(1, -1, 0.2), (1, 0, 0.1), (1, 1, 0.9)], 2);
        let output = dir.join("out").join("report.tsv");
        fs::create_dir_all(output.parent().unwrap()).unwrap();

        let config = TabulateConfig::new(dir, "r*.txt", &output);
        let outcome = create_tabulate_report(&config).unwrap();
        assert_eq!(
            outcome,
            TabulateOutcome::Complete { rows_written: 2, randomization_runs: 2 }
        );

        let lines = report_lines(&output);
        assert_eq!(lines[0], format!("{}\tqValue", HEADER));
        // 0.01: no null below -> 0 ; 0.2: one null (0.1) below, two real -> 1/(2*2)
        assert_eq!(lines[1], "0\t2\t-1\t0.01\t0");
        assert_eq!(lines[2], "1\t2\t-1\t0.2\t0.25");
    }

    #[test]
    fn test_test_statistic_report_has_randomization_p_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        fs::write(
            dir.join("stats.txt"),
            "NullIndex\tTestStatistic\n-1\t0.3\n0\t0.5\n0\t0.1\n",
        )
        .unwrap();
        let mut config = TabulateConfig::new(dir, "stats.txt", dir.join("report.tsv"));
        config.audit = AuditMode::Off;
        create_tabulate_report(&config).unwrap();

        let lines = report_lines(&dir.join("report.tsv"));
        assert_eq!(lines[0], "NullIndex\tTestStatistic\tpValFromRandomizations\tqValue");
        // one of two null values below 0.3: p = (1+1)/(2+1), fdr = 1/(1*1)
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields[0..2], ["-1", "0.3"]);
        assert!((fields[2].parse::<f64>().unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(fields[3], "1");
    }

    #[test]
    fn test_test_statistic_with_storey_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("stats.txt"), "TestStatistic\n0.3\n").unwrap();
        let mut config = TabulateConfig::new(dir, "stats.txt", dir.join("report.tsv"));
        config.audit = AuditMode::Off;
        config.method = QValueMethod::StoreyTibshirani;
        assert!(matches!(create_tabulate_report(&config), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_storey_counts_all_real_rows_and_ignores_missing_null_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("real.txt"), "PValue\n0.01\n0.04\n0.5\n0.9\n").unwrap();
        let mut config = TabulateConfig::new(dir, "real.txt", dir.join("report.tsv"));
        config.audit = AuditMode::Off;
        config.method = QValueMethod::StoreyTibshirani;
        config.max_p_value = 0.05;

        let outcome = create_tabulate_report(&config).unwrap();
        assert_eq!(outcome, TabulateOutcome::Complete { rows_written: 2, randomization_runs: 0 });
        // m = 4: 0.04 * 4 / 2 = 0.08, 0.01 * 4 / 1 = 0.04
        let lines = report_lines(&dir.join("report.tsv"));
        assert_eq!(lines, vec!["PValue\tqValue", "0.01\t0.04", "0.04\t0.08"]);
    }

    #[test]
    fn test_no_null_runs_is_integrity_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "real.txt", &[(0, -1, 0.01)], 1);
        let config = TabulateConfig::new(dir, "real.txt", dir.join("report.tsv"));
        assert!(matches!(create_tabulate_report(&config), Err(ScanError::Integrity(_))));
    }

    #[test]
    fn test_missing_real_rows_when_audited_is_integrity_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "null.txt", &[(0, 0, 0.01)], 1);
        let config = TabulateConfig::new(dir, "null.txt", dir.join("report.tsv"));
        assert!(matches!(create_tabulate_report(&config), Err(ScanError::Integrity(_))));
    }

    #[test]
    fn test_output_inside_input_dir_is_not_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "a.txt", &[(0, -1, 0.01), (0, 0, 0.5)], 1);
        let config = TabulateConfig::new(dir, "*.txt", dir.join("report.txt"));
        assert!(create_tabulate_report(&config).unwrap().is_complete());
        // Running again must not pick up the previous report
        assert!(create_tabulate_report(&config).unwrap().is_complete());
    }

    #[test]
    fn test_merge_files_appends_and_deletes_inputs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "part1.txt", &[(0, -1, 0.1)], 2);
        write_rows(dir, "part2.txt", &[(1, -1, 0.2)], 2);
        let merged = dir.join("merged.tsv");

        let summary = merge_files(dir, &["part1.txt".to_string()], &merged).unwrap();
        assert_eq!(summary, MergeSummary { files_merged: 1, rows_written: 1 });
        let summary = merge_files(dir, &["part*.txt".to_string()], &merged).unwrap();
        assert_eq!(summary, MergeSummary { files_merged: 1, rows_written: 1 });

        assert!(!dir.join("part1.txt").exists());
        assert!(!dir.join("part2.txt").exists());
        let lines = report_lines(&merged);
        assert_eq!(lines, vec![HEADER, "0\t2\t-1\t0.1", "1\t2\t-1\t0.2"]);
    }

    #[test]
    fn test_merge_files_rejects_different_header() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        write_rows(dir, "part1.txt", &[(0, -1, 0.1)], 2);
        fs::write(dir.join("part2.txt"), "PValue\n0.3\n").unwrap();
        let merged = dir.join("merged.tsv");
        let result = merge_files(dir, &["part1.txt+part2.txt".to_string()], &merged);
        assert!(matches!(result, Err(ScanError::Integrity(_))));
        assert!(dir.join("part2.txt").exists());
    }

    #[test]
    fn test_merge_files_bad_row_leaves_merged_file_unchanged() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        let merged = dir.join("merged.tsv");
        fs::write(dir.join("a.txt"), format!("{}\n0\t2\t-1\t0.1\n1\t2\t-1\n", HEADER)).unwrap();

        let result = merge_files(dir, &["a.txt".to_string()], &merged);
        assert!(matches!(result, Err(ScanError::Integrity(_))));
        assert!(dir.join("a.txt").exists());
        assert_eq!(fs::read_to_string(&merged).unwrap(), "");

        // Fixing the input and retrying must not duplicate the rows read before the failure
        write_rows(dir, "a.txt", &[(0, -1, 0.1), (1, -1, 0.2)], 2);
        let summary = merge_files(dir, &["a.txt".to_string()], &merged).unwrap();
        assert_eq!(summary, MergeSummary { files_merged: 1, rows_written: 2 });
        assert_eq!(report_lines(&merged), vec![HEADER, "0\t2\t-1\t0.1", "1\t2\t-1\t0.2"]);
    }
}
