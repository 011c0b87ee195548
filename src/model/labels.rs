//! Class index map
//!
//! Bidirectional lookup between class labels and model output positions,
//! loaded from the `{"label": index}` JSON file written next to the weights.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::utils::error::{DiagnosisError, Result, ResultExt};

/// Immutable `label <-> index` mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassIndexMap {
    /// Labels ordered by output index
    labels: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ClassIndexMap {
    /// Build from `(label, index)` pairs
    ///
    /// The indices must cover `0..n` exactly once and labels must be unique
    /// and non-empty.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, usize)>,
    {
        let pairs: Vec<(String, usize)> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return Err(DiagnosisError::ClassIndex("no classes defined".to_string()));
        }

        let n = pairs.len();
        let mut slots: Vec<Option<String>> = vec![None; n];
        let mut index = HashMap::with_capacity(n);

        for (label, idx) in pairs {
            if label.trim().is_empty() {
                return Err(DiagnosisError::ClassIndex(format!(
                    "empty label for index {}",
                    idx
                )));
            }
            if idx >= n {
                return Err(DiagnosisError::ClassIndex(format!(
                    "index {} for '{}' is out of range for {} classes",
                    idx, label, n
                )));
            }
            if let Some(existing) = &slots[idx] {
                return Err(DiagnosisError::ClassIndex(format!(
                    "index {} assigned to both '{}' and '{}'",
                    idx, existing, label
                )));
            }
            if index.insert(label.clone(), idx).is_some() {
                return Err(DiagnosisError::ClassIndex(format!(
                    "duplicate label '{}'",
                    label
                )));
            }
            slots[idx] = Some(label);
        }

        // n pairs, n slots, no duplicates: every slot is filled
        let labels = slots.into_iter().flatten().collect();

        Ok(Self { labels, index })
    }

    /// Parse the JSON object form `{"Banana_Healthy": 2, ...}`
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, i64> = serde_json::from_str(json)
            .map_err(|e| DiagnosisError::ClassIndex(format!("invalid JSON: {}", e)))?;

        let mut pairs = Vec::with_capacity(raw.len());
        for (label, idx) in raw {
            let idx = usize::try_from(idx).map_err(|_| {
                DiagnosisError::ClassIndex(format!("negative index {} for '{}'", idx, label))
            })?;
            pairs.push((label, idx));
        }

        Self::from_pairs(pairs)
    }

    /// Load from a JSON file on disk
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read class indices {:?}", path))?;
        Self::from_json(&json)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at an output position
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Output position of a label
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Labels in output order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Check that the map matches a model's output width
    pub fn ensure_width(&self, model_width: usize) -> Result<()> {
        if model_width != self.len() {
            return Err(DiagnosisError::ClassIndex(format!(
                "model produces {} scores but the class index defines {} classes",
                model_width,
                self.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANANA: &str = r#"{"Banana_Black_Sigatoka": 0, "Banana_Bract_Mosaic_Virus": 1, "Banana_Healthy": 2}"#;

    #[test]
    fn test_bidirectional_lookup() {
        let map = ClassIndexMap::from_json(BANANA).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.label(2), Some("Banana_Healthy"));
        assert_eq!(map.index_of("Banana_Black_Sigatoka"), Some(0));
        assert_eq!(map.label(3), None);
        assert_eq!(map.index_of("Tomato_Healthy"), None);
        assert_eq!(map.labels()[1], "Banana_Bract_Mosaic_Virus");
    }

    #[test]
    fn test_rejects_gap_in_indices() {
        let err = ClassIndexMap::from_json(r#"{"a": 0, "b": 2}"#).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let err = ClassIndexMap::from_json(r#"{"a": 0, "b": 0}"#).unwrap_err();
        assert!(matches!(err, DiagnosisError::ClassIndex(_)));
    }

    #[test]
    fn test_rejects_negative_and_empty() {
        assert!(ClassIndexMap::from_json(r#"{"a": -1}"#).is_err());
        assert!(ClassIndexMap::from_json("{}").is_err());
        assert!(ClassIndexMap::from_json(r#"{" ": 0}"#).is_err());
        assert!(ClassIndexMap::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_width_validation() {
        let map = ClassIndexMap::from_json(BANANA).unwrap();
        assert!(map.ensure_width(3).is_ok());
        let err = map.ensure_width(4).unwrap_err();
        assert!(err.to_string().contains("4 scores"));
    }

    #[test]
    fn test_missing_file() {
        let err = ClassIndexMap::load(Path::new("/nonexistent/class_indices.json")).unwrap_err();
        assert!(matches!(err, DiagnosisError::PathNotFound(_)));
    }
}
