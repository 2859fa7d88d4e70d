#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{TempDir, tempdir};

pub const CLASSIFICATION: &str = "\
crop_code,crop_name,crop_name_translated,taxonomy_name,taxonomy_code
31,Wheat,wheat,winter_common_soft_wheat,3301010101
31,Weizen,wheat,winter_common_soft_wheat,3301010101
411,Mais,maize,grain_maize,3301010600
,maize,maize,grain_maize,3301010600
,silage_maize,silage maize,green_silo_maize,3301090301
";

/// Binary under test.
pub fn harmonize() -> Command {
    Command::cargo_bin("gsa-harmonize").expect("binary exists")
}

/// Axis-aligned square in metres, as WKT.
pub fn square(x: f64, y: f64, side: f64) -> String {
    format!(
        "POLYGON(({x} {y},{x2} {y},{x2} {y2},{x} {y2},{x} {y}))",
        x2 = x + side,
        y2 = y + side
    )
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes a delimited feature file from rows of `(attributes..., wkt)`.
    pub fn write_features(&self, name: &str, headers: &[&str], rows: &[Vec<String>]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut writer = csv::Writer::from_path(&path).expect("create feature file");
        writer.write_record(headers).expect("write headers");
        for row in rows {
            writer.write_record(row).expect("write row");
        }
        writer.flush().expect("flush feature file");
        path
    }

    pub fn classification(&self) -> PathBuf {
        self.write("classification.csv", CLASSIFICATION)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("out")
    }
}

/// Reads a delimited file into headers and rows.
pub fn read_table(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("open table");
    let headers = reader
        .headers()
        .expect("headers")
        .iter()
        .map(|h| h.to_string())
        .collect();
    let rows = reader
        .records()
        .map(|record| {
            record
                .expect("record")
                .iter()
                .map(|value| value.to_string())
                .collect()
        })
        .collect();
    (headers, rows)
}

/// Values of `column` in a table read with [`read_table`].
pub fn column(headers: &[String], rows: &[Vec<String>], column: &str) -> Vec<String> {
    let idx = headers
        .iter()
        .position(|h| h == column)
        .unwrap_or_else(|| panic!("column {column} missing from {headers:?}"));
    rows.iter().map(|row| row[idx].clone()).collect()
}
