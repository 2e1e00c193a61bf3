//! Question catalog loading (C8, §4.8, §6).
//!
//! Loaded once at startup and held read-only thereafter (§5's "the question
//! catalog is read-only after startup"); `NewGame` samples from it.

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::game::Question;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("catalog entry {index} is malformed: fewer than 2 options or correct_index out of bounds")]
    MalformedEntry { index: usize },
}

/// The full, read-only set of questions a game's roster is sampled from.
pub struct Catalog {
    questions: Vec<Question>,
}

impl Catalog {
    /// Reads and validates the catalog file. Any failure here is fatal at
    /// startup (§6): a bad catalog is caught once, not per-game.
    pub fn load(path: &str) -> Result<Catalog, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_string(),
            source,
        })?;
        let questions: Vec<Question> =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.to_string(),
                source,
            })?;

        for (index, question) in questions.iter().enumerate() {
            if !question.is_well_formed() {
                return Err(CatalogError::MalformedEntry { index });
            }
        }

        Ok(Catalog { questions })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// A uniformly random selection of `count` distinct questions, in random
    /// order (§6). Returns fewer than `count` if the catalog itself is
    /// smaller; callers validate `count` against `len()` before calling.
    pub fn sample(&self, count: usize) -> Vec<Question> {
        let mut rng = rand::thread_rng();
        self.questions
            .choose_multiple(&mut rng, count.min(self.questions.len()))
            .cloned()
            .collect()
    }

    /// Builds a catalog directly from an in-memory question list, bypassing
    /// the filesystem. Used by other modules' tests (e.g. the Hub's) that
    /// need a `Catalog` without writing a temp file of their own.
    #[cfg(test)]
    pub(crate) fn test_catalog(questions: Vec<Question>) -> Catalog {
        Catalog { questions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_catalog(json: &str) -> tempfile_path::TempFile {
        tempfile_path::TempFile::new(json)
    }

    // Minimal ad-hoc temp file helper; this crate has no dev-dependency on a
    // tempfile crate, and a handful of catalog tests don't warrant adding one.
    mod tempfile_path {
        use std::io::Write;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct TempFile {
            pub path: std::path::PathBuf,
        }

        impl TempFile {
            pub fn new(contents: &str) -> Self {
                let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
                let mut path = std::env::temp_dir();
                path.push(format!("trivia-catalog-test-{}-{unique}.json", std::process::id()));
                let mut file = std::fs::File::create(&path).unwrap();
                file.write_all(contents.as_bytes()).unwrap();
                TempFile { path }
            }
        }

        impl Drop for TempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn loads_well_formed_catalog() {
        let json = r#"[{"id":"q0","question":"2+2?","options":["3","4"],"correct_index":1}]"#;
        let file = write_catalog(json);
        let catalog = Catalog::load(file.path.to_str().unwrap()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn rejects_entry_with_out_of_bounds_correct_index() {
        let json = r#"[{"id":"q0","question":"2+2?","options":["3","4"],"correct_index":5}]"#;
        let file = write_catalog(json);
        let result = Catalog::load(file.path.to_str().unwrap());
        assert!(matches!(result, Err(CatalogError::MalformedEntry { index: 0 })));
    }

    #[test]
    fn sample_never_returns_more_than_requested() {
        let json = r#"[
            {"id":"q0","question":"a","options":["x","y"],"correct_index":0},
            {"id":"q1","question":"b","options":["x","y"],"correct_index":0}
        ]"#;
        let file = write_catalog(json);
        let catalog = Catalog::load(file.path.to_str().unwrap()).unwrap();
        assert_eq!(catalog.sample(1).len(), 1);
        assert_eq!(catalog.sample(5).len(), 2);
    }
}
