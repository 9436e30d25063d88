use crate::ScanError;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const NULL_INDEX_COLUMN: &str = "NullIndex";
pub const P_VALUE_COLUMN: &str = "PValue";
pub const TEST_STATISTIC_COLUMN: &str = "TestStatistic";
pub const ROW_INDEX_COLUMN: &str = "rowIndex";
pub const ROW_COUNT_COLUMN: &str = "rowCount";
pub const GROUP_ID_COLUMN: &str = "groupId";
pub const PREDICTOR_VARIABLE_COLUMN: &str = "PredictorVariable";
pub const TARGET_VARIABLE_COLUMN: &str = "TargetVariable";

/// Column names of a tab-delimited file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    line: String,
    columns: Vec<String>,
    positions: FxHashMap<String, usize>,
}

impl Header {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let columns: Vec<String> = line.split('\t').map(str::to_string).collect();
        let positions = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { line, columns, positions }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }
}

/// One data line together with the header it was read under
#[derive(Debug, Clone)]
pub struct Row {
    header: Arc<Header>,
    line: String,
    fields: Vec<String>,
}

impl Row {
    /// Split `line` on tabs; the field count must match the header
    pub fn parse(header: Arc<Header>, line: &str) -> Result<Self, ScanError> {
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
        if fields.len() != header.len() {
            return Err(ScanError::Integrity(format!(
                "line has {} fields but the header has {} columns: {}",
                fields.len(),
                header.len(),
                line
            )));
        }
        Ok(Self { header, line, fields })
    }

    /// Build a row from `(column, value)` pairs, mostly for tests and keep-test checks
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let header_line = pairs.iter().map(|(k, _)| *k).collect::<Vec<_>>().join("\t");
        let line = pairs.iter().map(|(_, v)| *v).collect::<Vec<_>>().join("\t");
        let fields = pairs.iter().map(|(_, v)| v.to_string()).collect();
        Self {
            header: Arc::new(Header::parse(&header_line)),
            line,
            fields,
        }
    }

    /// The original text of the line, without the line terminator
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.header.position(column).map(|i| self.fields[i].as_str())
    }

    pub fn require(&self, column: &str) -> Result<&str, ScanError> {
        self.get(column).ok_or_else(|| {
            ScanError::Integrity(format!("required column \"{}\" is missing", column))
        })
    }

    pub fn parse_f64(&self, column: &str) -> Result<f64, ScanError> {
        let text = self.require(column)?;
        text.trim().parse::<f64>().map_err(|e| {
            ScanError::Integrity(format!("column {} value \"{}\" is not a number: {}", column, text, e))
        })
    }

    pub fn parse_i64(&self, column: &str) -> Result<i64, ScanError> {
        let text = self.require(column)?;
        text.trim().parse::<i64>().map_err(|e| {
            ScanError::Integrity(format!("column {} value \"{}\" is not an integer: {}", column, text, e))
        })
    }
}

/// Streaming reader over a header line followed by tab-delimited rows.
/// Blank lines are skipped.
pub struct TabFile {
    path: PathBuf,
    header: Arc<Header>,
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl TabFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut lines = BufReader::new(file).lines();
        let header_line = match lines.next() {
            Some(line) => line?,
            None => String::new(),
        };
        Ok(Self {
            path,
            header: Arc::new(Header::parse(&header_line)),
            lines,
            line_number: 1,
        })
    }

    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for TabFile {
    type Item = Result<Row, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(ScanError::Io(e))),
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(Row::parse(Arc::clone(&self.header), &line).map_err(|e| match e {
                ScanError::Integrity(msg) => ScanError::Integrity(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    self.line_number,
                    msg
                )),
                other => other,
            }));
        }
    }
}

/// Join fields with tabs
pub fn tab_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push('\t');
        }
        line.push_str(field.as_ref());
    }
    line
}
