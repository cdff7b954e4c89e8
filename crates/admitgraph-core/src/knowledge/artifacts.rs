//! Startup artifacts for the similarity index
//!
//! - embeddings: a JSON object mapping node name to a number array
//! - node names: newline-delimited names defining corpus order

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

use super::index::SimilarityIndex;

/// Parsed, not yet validated, index inputs
#[derive(Debug, Clone, Default)]
pub struct KnowledgeArtifacts {
    pub vectors_by_name: HashMap<String, Vec<f32>>,
    pub ordered_names: Vec<String>,
}

impl KnowledgeArtifacts {
    /// Read both artifacts from disk
    pub fn from_paths(embeddings_path: &Path, names_path: &Path) -> Result<Self> {
        let embeddings = fs::read_to_string(embeddings_path).map_err(|e| {
            Error::DataLoad(format!("cannot read {}: {}", embeddings_path.display(), e))
        })?;
        let names = fs::read_to_string(names_path)
            .map_err(|e| Error::DataLoad(format!("cannot read {}: {}", names_path.display(), e)))?;

        debug!(
            embeddings = %embeddings_path.display(),
            names = %names_path.display(),
            "Read knowledge artifacts"
        );

        Self::parse(&embeddings, &names)
    }

    /// Parse artifact contents; blank name lines are skipped
    pub fn parse(embeddings_json: &str, names_text: &str) -> Result<Self> {
        let vectors_by_name: HashMap<String, Vec<f32>> = serde_json::from_str(embeddings_json)
            .map_err(|e| Error::DataLoad(format!("embeddings are not a name -> vector map: {}", e)))?;

        let ordered_names = names_text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            vectors_by_name,
            ordered_names,
        })
    }

    /// Validate and load into `index`; a loaded index is left untouched
    pub fn load_into(self, index: &SimilarityIndex) -> Result<bool> {
        index.load(self.vectors_by_name, self.ordered_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_skips_blank_lines() {
        let artifacts =
            KnowledgeArtifacts::parse(r#"{"a": [1, 0], "b": [0.5, 0.5]}"#, "a\n\n  b  \n").unwrap();
        assert_eq!(artifacts.ordered_names, vec!["a", "b"]);
        assert_eq!(artifacts.vectors_by_name["b"], vec![0.5, 0.5]);
    }

    #[test]
    fn test_parse_rejects_non_numeric_vectors() {
        let result = KnowledgeArtifacts::parse(r#"{"a": ["x"]}"#, "a");
        assert!(matches!(result, Err(Error::DataLoad(_))));
    }

    #[test]
    fn test_from_paths_loads_index() {
        let dir = tempfile::tempdir().unwrap();
        let embeddings = dir.path().join("embeddings.json");
        let names = dir.path().join("names.txt");
        fs::File::create(&embeddings)
            .unwrap()
            .write_all(br#"{"admit_rate": [1.0, 0.0], "unit_id": [0.0, 1.0]}"#)
            .unwrap();
        fs::write(&names, "unit_id\nadmit_rate\n").unwrap();

        let index = SimilarityIndex::new();
        let loaded = KnowledgeArtifacts::from_paths(&embeddings, &names)
            .unwrap()
            .load_into(&index)
            .unwrap();

        assert!(loaded);
        assert_eq!(index.names(), ["unit_id".to_string(), "admit_rate".to_string()]);
    }

    #[test]
    fn test_missing_file_is_data_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let result = KnowledgeArtifacts::from_paths(&missing, &missing);
        assert!(matches!(result, Err(Error::DataLoad(_))));
    }
}
