//! Local dataset index: one functional volume and one motion confound file
//! per subject
//!
//! `<data_dir>/index.tsv` holds a `func<TAB>confounds` header and one row per
//! subject, with paths relative to `data_dir`.

use crate::structs::{RegcovError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.tsv";

/// Files of one subject, resolved against the dataset directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubjectFiles {
    pub func: PathBuf,
    pub confounds: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub root: PathBuf,
    pub subjects: Vec<SubjectFiles>,
}

impl Dataset {
    /// Read `index.tsv` under `data_dir`
    ///
    /// # Errors
    /// Returns error if the index is missing or malformed
    pub fn open(data_dir: &Path) -> Result<Self> {
        let index = data_dir.join(INDEX_FILE);
        if !index.is_file() {
            return Err(RegcovError::Dataset(format!(
                "dataset index not found: {}",
                index.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .from_path(&index)?;

        let subjects = reader
            .deserialize::<SubjectFiles>()
            .map(|row| {
                row.map(|files| SubjectFiles {
                    func: data_dir.join(files.func),
                    confounds: data_dir.join(files.confounds),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            root: data_dir.to_path_buf(),
            subjects,
        })
    }

    #[must_use]
    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    /// Files of the subject at 0-based row `index`
    ///
    /// # Errors
    /// Returns error if `index` is out of range
    pub fn subject(&self, index: usize) -> Result<&SubjectFiles> {
        self.subjects.get(index).ok_or_else(|| {
            RegcovError::Dataset(format!(
                "subject {index} out of range: {} has {} subjects",
                self.root.display(),
                self.subjects.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_index(dir: &Path) {
        fs::write(
            dir.join(INDEX_FILE),
            "func\tconfounds\nsub0/func.nii.gz\tsub0/motion.1D\nsub1/func.nii.gz\tsub1/motion.1D\n",
        )
        .expect("write index");
    }

    #[test]
    fn test_subject_paths_are_resolved() {
        let dir = TempDir::new().expect("create temp dir");
        write_index(dir.path());

        let dataset = Dataset::open(dir.path()).expect("open");
        assert_eq!(dataset.n_subjects(), 2);

        let subject = dataset.subject(1).expect("subject");
        assert_eq!(subject.func, dir.path().join("sub1/func.nii.gz"));
        assert_eq!(subject.confounds, dir.path().join("sub1/motion.1D"));
    }

    #[test]
    fn test_subject_out_of_range() {
        let dir = TempDir::new().expect("create temp dir");
        write_index(dir.path());

        let dataset = Dataset::open(dir.path()).expect("open");
        assert!(matches!(dataset.subject(2), Err(RegcovError::Dataset(_))));
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().expect("create temp dir");
        assert!(matches!(
            Dataset::open(dir.path()),
            Err(RegcovError::Dataset(_))
        ));
    }
}
