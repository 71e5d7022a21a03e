//! Matrix expansion: one entry per combination of axis values.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::workflow::Scalar;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(try_from = "RawMatrix")]
pub struct Matrix {
    #[serde(flatten)]
    pub axes: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct RawMatrix {
    #[serde(default)]
    exclude: Vec<BTreeMap<String, Scalar>>,
    #[serde(default)]
    include: Option<serde_yml::Value>,
    #[serde(flatten)]
    axes: BTreeMap<String, Vec<Scalar>>,
}

impl TryFrom<RawMatrix> for Matrix {
    type Error = String;

    fn try_from(raw: RawMatrix) -> std::result::Result<Self, Self::Error> {
        if raw.include.is_some() {
            return Err("matrix 'include' is not supported; list values on an axis instead".to_string());
        }

        Ok(Matrix {
            axes: raw
                .axes
                .into_iter()
                .map(|(axis, values)| (axis, values.into_iter().map(Scalar::into_string).collect()))
                .collect(),
            exclude: raw
                .exclude
                .into_iter()
                .map(|entry| entry.into_iter().map(|(k, v)| (k, v.into_string())).collect())
                .collect(),
        })
    }
}

impl Matrix {
    pub fn single_axis(axis: &str, values: &[&str]) -> Self {
        Matrix {
            axes: BTreeMap::from([(
                axis.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )]),
            exclude: Vec::new(),
        }
    }
}

/// One concrete combination of matrix values. Immutable once expanded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatrixEntry {
    /// Position in the full expansion. Stable under `--only` filtering.
    pub index: usize,
    pub values: BTreeMap<String, String>,
}

impl MatrixEntry {
    /// Values joined in axis order, e.g. `3.11` or `3.11, ubuntu`.
    pub fn label(&self) -> String {
        self.values
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn matches_all(&self, criteria: &BTreeMap<String, String>) -> bool {
        criteria
            .iter()
            .all(|(k, v)| self.values.get(k).is_some_and(|actual| actual == v))
    }
}

/// Expand a matrix into its cartesian product, minus exclusions.
///
/// Axes combine in key order (first axis outermost); values keep their
/// declaration order. An empty matrix yields a single entry with no values.
pub fn expand(matrix: &Matrix) -> Result<Vec<MatrixEntry>> {
    validate(matrix)?;

    let mut combos: Vec<BTreeMap<String, String>> = vec![BTreeMap::new()];
    for (axis, values) in &matrix.axes {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(axis.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    let entries: Vec<MatrixEntry> = combos
        .into_iter()
        .map(|values| MatrixEntry { index: 0, values })
        .filter(|entry| !matrix.exclude.iter().any(|ex| entry.matches_all(ex)))
        .enumerate()
        .map(|(index, entry)| MatrixEntry { index, ..entry })
        .collect();

    if entries.is_empty() {
        return Err(Error::validation_invalid_argument(
            "matrix.exclude",
            "Matrix exclusions remove every combination",
            None,
            None,
        ));
    }

    Ok(entries)
}

fn validate(matrix: &Matrix) -> Result<()> {
    for (axis, values) in &matrix.axes {
        if axis.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "matrix",
                "Matrix axis names cannot be empty",
                None,
                None,
            ));
        }

        if values.is_empty() {
            return Err(Error::validation_invalid_argument(
                "matrix",
                format!("Matrix axis '{}' has no values", axis),
                Some(axis.clone()),
                None,
            ));
        }

        let mut seen = HashSet::new();
        for value in values {
            if !seen.insert(value.as_str()) {
                return Err(Error::validation_invalid_argument(
                    "matrix",
                    format!("Matrix axis '{}' lists '{}' more than once", axis, value),
                    Some(axis.clone()),
                    None,
                ));
            }
        }
    }

    for exclusion in &matrix.exclude {
        for key in exclusion.keys() {
            if !matrix.axes.contains_key(key) {
                return Err(Error::validation_invalid_argument(
                    "matrix.exclude",
                    format!("Exclusion references unknown axis '{}'", key),
                    Some(key.clone()),
                    Some(matrix.axes.keys().cloned().collect()),
                ));
            }
        }
    }

    Ok(())
}

/// Parse a `key=value` matrix selector.
pub fn parse_selector(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw.split_once('=').ok_or_else(|| {
        Error::validation_invalid_argument(
            "only",
            format!("Expected KEY=VALUE, got '{}'", raw),
            None,
            None,
        )
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(Error::validation_invalid_argument(
            "only",
            format!("Selector '{}' has an empty key", raw),
            None,
            None,
        ));
    }

    Ok((key.to_string(), value.trim().to_string()))
}

/// Whether `entry` matches every selector key (any listed value per key).
///
/// An entry without a selected axis does not match. No selectors match everything.
pub fn matches(entry: &MatrixEntry, selectors: &[(String, String)]) -> bool {
    let mut wanted: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (key, value) in selectors {
        wanted.entry(key.as_str()).or_default().push(value.as_str());
    }

    wanted.iter().all(|(key, values)| {
        entry
            .values
            .get(*key)
            .is_some_and(|actual| values.contains(&actual.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSIONS: [&str; 5] = ["3.9", "3.10", "3.11", "3.12", "3.13"];

    #[test]
    fn five_versions_expand_to_five_entries_in_order() {
        let entries = expand(&Matrix::single_axis("python-version", &VERSIONS)).unwrap();
        assert_eq!(entries.len(), 5);
        let labels: Vec<String> = entries.iter().map(MatrixEntry::label).collect();
        assert_eq!(labels, VERSIONS);
        assert!(entries.iter().enumerate().all(|(i, e)| e.index == i));
    }

    #[test]
    fn expansion_is_deterministic() {
        let matrix = Matrix::single_axis("python-version", &VERSIONS);
        assert_eq!(expand(&matrix).unwrap(), expand(&matrix).unwrap());
    }

    #[test]
    fn empty_matrix_is_one_entry() {
        let entries = expand(&Matrix::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_empty());
    }

    #[test]
    fn two_axes_form_cartesian_product() {
        let mut matrix = Matrix::single_axis("python-version", &["3.9", "3.10"]);
        matrix
            .axes
            .insert("os".to_string(), vec!["linux".to_string(), "mac".to_string()]);
        let entries = expand(&matrix).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].values["os"], "linux");
        assert_eq!(entries[0].values["python-version"], "3.9");
        assert_eq!(entries[1].values["python-version"], "3.10");
    }

    #[test]
    fn exclusions_remove_matching_combinations() {
        let mut matrix = Matrix::single_axis("python-version", &VERSIONS);
        matrix.exclude.push(BTreeMap::from([(
            "python-version".to_string(),
            "3.12".to_string(),
        )]));
        let entries = expand(&matrix).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.values["python-version"] != "3.12"));
        assert_eq!(entries[3].index, 3);
    }

    #[test]
    fn excluding_everything_is_an_error() {
        let mut matrix = Matrix::single_axis("python-version", &["3.9"]);
        matrix.exclude.push(BTreeMap::from([(
            "python-version".to_string(),
            "3.9".to_string(),
        )]));
        assert!(expand(&matrix).is_err());
    }

    #[test]
    fn duplicate_and_empty_axes_are_rejected() {
        assert!(expand(&Matrix::single_axis("python-version", &["3.9", "3.9"])).is_err());
        assert!(expand(&Matrix::single_axis("python-version", &[])).is_err());
    }

    #[test]
    fn exclusion_on_unknown_axis_is_rejected() {
        let mut matrix = Matrix::single_axis("python-version", &["3.9"]);
        matrix
            .exclude
            .push(BTreeMap::from([("os".to_string(), "mac".to_string())]));
        let err = expand(&matrix).unwrap_err();
        assert_eq!(err.field(), Some("matrix.exclude"));
    }

    #[test]
    fn yaml_numbers_and_include_handling() {
        let matrix: Matrix = serde_yml::from_str("python-version: [\"3.9\", 3.11]\n").unwrap();
        assert_eq!(matrix.axes["python-version"], vec!["3.9", "3.11"]);

        let err = serde_yml::from_str::<Matrix>("include:\n  - python-version: \"3.14\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn selectors_keep_original_indexes() {
        let entries = expand(&Matrix::single_axis("python-version", &VERSIONS)).unwrap();
        let selectors = vec![
            parse_selector("python-version=3.11").unwrap(),
            parse_selector("python-version=3.13").unwrap(),
        ];
        let kept: Vec<usize> = entries
            .iter()
            .filter(|e| matches(e, &selectors))
            .map(|e| e.index)
            .collect();
        assert_eq!(kept, vec![2, 4]);
    }

    #[test]
    fn selectors_skip_entries_without_the_axis() {
        let entries = expand(&Matrix::default()).unwrap();
        assert!(!matches(&entries[0], &[("python-version".to_string(), "3.9".to_string())]));
        assert!(matches(&entries[0], &[]));
    }

    #[test]
    fn selector_requires_equals_sign() {
        assert!(parse_selector("python-version").is_err());
        assert!(parse_selector("=3.9").is_err());
        assert_eq!(
            parse_selector("python-version = 3.9").unwrap(),
            ("python-version".to_string(), "3.9".to_string())
        );
    }
}
