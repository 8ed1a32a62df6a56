//! Matrix strategy expansion
//!
//! Turns a job's axes plus its include/exclude overrides into the ordered
//! list of concrete cells the job runs for.

use crate::core::{
    error::SpecError,
    job::{JobInstance, JobTemplate},
    value::Value,
};
use serde::{Deserialize, Serialize};

/// Matrix configuration as written in YAML
///
/// Every key other than `include` and `exclude` is an axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixConfig {
    /// Cells to merge into or append to the product
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<serde_yaml::Mapping>,

    /// Cell patterns to remove after includes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<serde_yaml::Mapping>,

    /// Axis name -> ordered values, in declaration order
    #[serde(flatten)]
    pub axes: serde_yaml::Mapping,
}

/// One named dimension of variation
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<Value>,
}

/// Validated matrix of a job template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub axes: Vec<Axis>,
    pub include: Vec<Vec<(String, Value)>>,
    pub exclude: Vec<Vec<(String, Value)>>,
}

impl Matrix {
    /// Validate a YAML matrix for the given job
    pub fn from_config(job: &str, config: &MatrixConfig) -> Result<Self, SpecError> {
        let invalid = |message: String| SpecError::InvalidMatrix {
            job: job.to_string(),
            message,
        };

        let mut axes = Vec::new();
        for (key, values) in &config.axes {
            let name = key
                .as_str()
                .ok_or_else(|| invalid(format!("axis name {:?} is not a string", key)))?;
            let seq = values
                .as_sequence()
                .ok_or_else(|| invalid(format!("axis '{}' must be a list of values", name)))?;
            let values = seq
                .iter()
                .map(|v| {
                    Value::from_yaml(v)
                        .ok_or_else(|| invalid(format!("axis '{}' contains a non-scalar value", name)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            axes.push(Axis {
                name: name.to_string(),
                values,
            });
        }

        let include = config
            .include
            .iter()
            .map(|entry| Self::parse_entry(entry, "include").map_err(&invalid))
            .collect::<Result<Vec<_>, _>>()?;
        let exclude = config
            .exclude
            .iter()
            .map(|entry| Self::parse_entry(entry, "exclude").map_err(&invalid))
            .collect::<Result<Vec<_>, _>>()?;

        let matrix = Matrix {
            axes,
            include,
            exclude,
        };

        // Excludes may only name axes or fields some include introduces
        for entry in &matrix.exclude {
            for (key, _) in entry {
                let introduced = matrix
                    .include
                    .iter()
                    .any(|inc| inc.iter().any(|(k, _)| k == key));
                if !matrix.is_axis(key) && !introduced {
                    return Err(SpecError::UnknownAxis {
                        job: job.to_string(),
                        axis: key.clone(),
                    });
                }
            }
        }

        Ok(matrix)
    }

    fn parse_entry(entry: &serde_yaml::Mapping, kind: &str) -> Result<Vec<(String, Value)>, String> {
        if entry.is_empty() {
            return Err(format!("{} entries must not be empty", kind));
        }
        entry
            .iter()
            .map(|(key, value)| {
                let name = key
                    .as_str()
                    .ok_or_else(|| format!("{} key {:?} is not a string", kind, key))?;
                let value = Value::from_yaml(value)
                    .ok_or_else(|| format!("{} field '{}' must be a scalar", kind, name))?;
                Ok((name.to_string(), value))
            })
            .collect()
    }

    pub fn is_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|a| a.name == name)
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.iter().map(|a| a.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }
}

/// One concrete assignment of values, in display order
///
/// Axis values come first in declaration order, followed by fields injected
/// by include entries. Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixCell {
    entries: Vec<(String, Value)>,
}

impl MatrixCell {
    pub fn from_entries(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert a field, replacing an existing value for the same key
    pub fn set(&mut self, key: &str, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if every field of `pattern` is present with the same value
    pub fn matches(&self, pattern: &[(String, Value)]) -> bool {
        pattern.iter().all(|(k, v)| self.get(k) == Some(v))
    }

    /// Values joined for display, e.g. `ubuntu, 3.9`
    pub fn label(&self) -> String {
        self.entries
            .iter()
            .map(|(_, v)| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for MatrixCell {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len() && self.matches(&other.entries)
    }
}

/// Matrix expander for job templates
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a template into its instances, numbering them from `first_index`
    pub fn expand(template: &JobTemplate, first_index: usize) -> Vec<JobInstance> {
        Self::expand_cells(&template.matrix)
            .into_iter()
            .enumerate()
            .map(|(offset, cell)| JobInstance::new(first_index + offset, &template.id, cell))
            .collect()
    }

    /// Expand a matrix into its cells
    pub fn expand_cells(matrix: &Matrix) -> Vec<MatrixCell> {
        let mut cells = Self::product(matrix);
        let base_len = cells.len();

        for include in &matrix.include {
            let (axis_fields, extra_fields): (Vec<_>, Vec<_>) = include
                .iter()
                .cloned()
                .partition(|(k, _)| matrix.is_axis(k));

            let mut merged = false;
            for cell in cells[..base_len].iter_mut() {
                if cell.matches(&axis_fields) {
                    merged = true;
                    for (key, value) in &extra_fields {
                        cell.set(key, value.clone());
                    }
                }
            }

            if !merged {
                let cell = MatrixCell::from_entries(include.clone());
                if !cells[base_len..].contains(&cell) {
                    cells.push(cell);
                }
            }
        }

        cells.retain(|cell| !matrix.exclude.iter().any(|pattern| cell.matches(pattern)));

        let mut unique: Vec<MatrixCell> = Vec::with_capacity(cells.len());
        for cell in cells {
            if !unique.contains(&cell) {
                unique.push(cell);
            }
        }
        unique
    }

    /// Cartesian product of the axes, first axis varying slowest
    fn product(matrix: &Matrix) -> Vec<MatrixCell> {
        let mut result = vec![MatrixCell::default()];

        for axis in &matrix.axes {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for cell in &result {
                for value in &axis.values {
                    let mut combo = cell.clone();
                    combo.set(&axis.name, value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        result
    }
}
