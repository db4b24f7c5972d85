//! Dataset providers.
//!
//! The engine consumes a header list and a dense `f64` matrix, one row per
//! vector. Where the data comes from is not the engine's concern; anything
//! implementing [`DatasetProvider`] will do.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DetectiveError, Result};

/// A named collection of equal-length numeric vectors.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// One label per vector.
    pub headers: Vec<String>,
    /// One row per vector.
    pub matrix: Vec<Vec<f64>>,
}

impl Dataset {
    /// Number of vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    /// Dimensionality of the vectors.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.matrix.first().map_or(0, Vec::len)
    }

    fn check(self) -> Result<Self> {
        if self.matrix.is_empty() {
            return Err(DetectiveError::Dataset("dataset is empty".into()));
        }
        if self.headers.len() != self.matrix.len() {
            return Err(DetectiveError::Dataset(format!(
                "{} headers for {} vectors",
                self.headers.len(),
                self.matrix.len()
            )));
        }
        let d = self.matrix[0].len();
        if d == 0 {
            return Err(DetectiveError::Dataset("vectors have zero dimensions".into()));
        }
        if let Some(row) = self.matrix.iter().find(|row| row.len() != d) {
            return Err(DetectiveError::Dataset(format!(
                "ragged matrix: expected {d} dimensions, found {}",
                row.len()
            )));
        }
        Ok(self)
    }
}

/// Source of the input dataset.
pub trait DatasetProvider {
    fn load(&self) -> Result<Dataset>;
}

/// Dataset already materialized in memory.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    dataset: Dataset,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new(headers: Vec<String>, matrix: Vec<Vec<f64>>) -> Self {
        Self {
            dataset: Dataset { headers, matrix },
        }
    }

    /// Convenience constructor that labels rows `v0..vn`.
    #[must_use]
    pub fn from_rows(matrix: Vec<Vec<f64>>) -> Self {
        let headers = (0..matrix.len()).map(|i| format!("v{i}")).collect();
        Self::new(headers, matrix)
    }
}

impl DatasetProvider for InMemoryProvider {
    fn load(&self) -> Result<Dataset> {
        self.dataset.clone().check()
    }
}

/// CSV file reader: one vector per line, `label,x1,x2,...`.
///
/// Rows beyond `max_vectors` and columns beyond `max_dimensions` are ignored,
/// which keeps experiments on large dumps cheap.
#[derive(Debug, Clone)]
pub struct CsvFileProvider {
    path: PathBuf,
    max_vectors: Option<usize>,
    max_dimensions: Option<usize>,
}

impl CsvFileProvider {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_vectors: None,
            max_dimensions: None,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, max_vectors: usize, max_dimensions: usize) -> Self {
        self.max_vectors = Some(max_vectors);
        self.max_dimensions = Some(max_dimensions);
        self
    }
}

impl DatasetProvider for CsvFileProvider {
    fn load(&self) -> Result<Dataset> {
        let text = fs::read_to_string(&self.path).map_err(|e| {
            DetectiveError::Dataset(format!("cannot read {}: {e}", self.path.display()))
        })?;

        let mut headers = Vec::new();
        let mut matrix = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(max) = self.max_vectors {
                if matrix.len() >= max {
                    break;
                }
            }
            let mut fields = line.split(',');
            let label = fields
                .next()
                .ok_or_else(|| DetectiveError::Dataset(format!("line {}: empty", lineno + 1)))?;
            let mut row = Vec::new();
            for field in fields {
                if let Some(max) = self.max_dimensions {
                    if row.len() >= max {
                        break;
                    }
                }
                let value: f64 = field.trim().parse().map_err(|e| {
                    DetectiveError::Dataset(format!("line {}: {field:?}: {e}", lineno + 1))
                })?;
                row.push(value);
            }
            headers.push(label.trim().to_string());
            matrix.push(row);
        }

        Dataset { headers, matrix }.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let p = InMemoryProvider::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let d = p.load().unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(d.dimensions(), 2);
        assert_eq!(d.headers, vec!["v0", "v1"]);
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let p = InMemoryProvider::from_rows(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(p.load().is_err());
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let p = InMemoryProvider::from_rows(Vec::new());
        assert!(p.load().is_err());
    }
}
