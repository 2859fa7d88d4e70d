//! In-memory feature table: one source file, one batch.
//!
//! A [`FeatureBatch`] keeps column names and per-row string values side by
//! side with a [`Shape`] per row. Rows remember their 1-based position in the
//! source file so every occurrence counter downstream can rely on original
//! file order regardless of how many rows were removed in between.

use std::collections::BTreeSet;

use geo::MultiPolygon;

use crate::crs::Crs;

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Missing,
    Invalid(String),
    Polygonal(MultiPolygon<f64>),
}

impl Shape {
    pub fn polygonal(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            Shape::Polygonal(shape) => Some(shape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub row: usize,
    pub values: Vec<String>,
    pub shape: Shape,
}

#[derive(Debug, Clone)]
pub struct FeatureBatch {
    pub headers: Vec<String>,
    pub features: Vec<Feature>,
    pub crs: Crs,
    filled: BTreeSet<String>,
}

impl FeatureBatch {
    pub fn new(headers: Vec<String>, crs: Crs) -> Self {
        Self {
            headers,
            features: Vec::new(),
            crs,
            filled: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, mut values: Vec<String>, shape: Shape) {
        values.resize(self.headers.len(), String::new());
        let row = self.features.len() + 1;
        self.features.push(Feature { row, values, shape });
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    /// True when the column exists and carries values from the source rather
    /// than having been added empty to complete the schema.
    pub fn is_sourced(&self, name: &str) -> bool {
        self.column_index(name).is_some() && !self.filled.contains(name)
    }

    pub fn value<'a>(&'a self, feature: &'a Feature, column: &str) -> &'a str {
        self.column_index(column)
            .and_then(|idx| feature.values.get(idx))
            .map(|value| value.as_str())
            .unwrap_or("")
    }

    /// Returns the index of `name`, appending an empty column when absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        self.filled.insert(name.to_string());
        for feature in &mut self.features {
            feature.values.push(String::new());
        }
        self.headers.len() - 1
    }

    /// Appends a column whose values are produced per feature.
    pub fn add_column<F>(&mut self, name: &str, mut produce: F) -> usize
    where
        F: FnMut(&Feature) -> String,
    {
        let idx = self.ensure_column(name);
        self.filled.remove(name);
        for feature in &mut self.features {
            let value = produce(feature);
            feature.values[idx] = value;
        }
        idx
    }

    pub fn rename_column(&mut self, idx: usize, name: &str) {
        let previous = std::mem::replace(&mut self.headers[idx], name.to_string());
        if self.filled.remove(&previous) {
            self.filled.insert(name.to_string());
        }
    }

    /// Keeps only the listed columns, in the listed order. Missing columns are
    /// filled empty.
    pub fn project(&mut self, columns: &[String]) {
        let indices = columns
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Vec<_>>();
        for feature in &mut self.features {
            let projected = indices
                .iter()
                .map(|idx| {
                    idx.and_then(|i| feature.values.get(i).cloned())
                        .unwrap_or_default()
                })
                .collect();
            feature.values = projected;
        }
        self.filled = columns
            .iter()
            .zip(&indices)
            .filter(|(name, idx)| idx.is_none() || self.filled.contains(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect();
        self.headers = columns.to_vec();
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .map(move |feature| feature.values.get(idx).map(|v| v.as_str()).unwrap_or(""))
    }
}
