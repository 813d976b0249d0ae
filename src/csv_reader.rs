use crate::structs::{RegcovError, Result};
use csv::{ReaderBuilder, Trim};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A numeric table read from a whitespace-delimited text file
///
/// The first line is a header whatever it starts with; it is kept only for
/// naming columns. Later lines starting with `#` are comments.
#[derive(Debug, Clone)]
pub struct NumericTable {
    pub headers: Vec<String>,
    pub data: Array2<f64>,
}

impl NumericTable {
    /// Parse a whitespace-delimited file (tabs, spaces or both), skipping the header line
    ///
    /// # Errors
    /// Returns error if the file cannot be read, a value is not numeric, or
    /// rows have differing lengths.
    pub fn from_whitespace_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let (header_line, body) = content.split_once('\n').unwrap_or((content.as_str(), ""));
        let headers: Vec<String> = header_line
            .trim()
            .trim_start_matches('#')
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .trim(Trim::All)
            .from_reader(body.as_bytes());

        let mut rows: Vec<Vec<f64>> = Vec::new();

        for result in reader.records() {
            let record = result?;
            // Physical line in the file, counting the header
            let line = record.position().map_or(0, |p| p.line() + 1);
            let tokens: Vec<&str> = record.iter().flat_map(str::split_whitespace).collect();
            if tokens.is_empty() {
                continue;
            }

            let row = tokens
                .iter()
                .map(|s| {
                    s.parse::<f64>().map_err(|_| {
                        RegcovError::Dataset(format!(
                            "{}: non-numeric value '{s}' on line {line}",
                            path.display()
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            if let Some(first) = rows.first() {
                if first.len() != row.len() {
                    return Err(RegcovError::ShapeMismatch(format!(
                        "{}: line {line} has {} columns, expected {}",
                        path.display(),
                        row.len(),
                        first.len()
                    )));
                }
            }
            rows.push(row);
        }

        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((n_rows, n_cols), flat)?;

        Ok(Self { headers, data })
    }
}

/// Load a motion-confound table as a (T, n_confounds) matrix
///
/// # Errors
/// Returns error if the file cannot be parsed
pub fn load_confounds(path: &Path) -> Result<Array2<f64>> {
    let table = NumericTable::from_whitespace_file(path)?;
    debug!(
        path = %path.display(),
        columns = ?table.headers,
        rows = table.data.nrows(),
        "motion confounds"
    );
    Ok(table.data)
}
