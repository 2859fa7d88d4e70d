//! Plain-text rendering of resolved mappings for the terminal.

use std::fmt::Write as _;

use crate::mapping::{RegionMapping, SourceColumns};

const COLUMN_GAP: &str = "  ";
const NOT_MAPPED: &str = "-";

/// One row per in-use canonical column: its primary source and any
/// repeated sources that become crop parts.
pub fn mapping_rows(mapping: &RegionMapping) -> Vec<Vec<String>> {
    mapping
        .entries
        .iter()
        .map(|entry| {
            let (primary, repeated) = match &entry.sources {
                SourceColumns::None => (NOT_MAPPED.to_string(), String::new()),
                sources => (
                    sources.primary().unwrap_or(NOT_MAPPED).to_string(),
                    sources
                        .secondary()
                        .iter()
                        .map(|(ordinal, column)| format!("{column} (#{ordinal})"))
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            };
            vec![entry.canonical.clone(), primary, repeated]
        })
        .collect()
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(printable(cell).chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat((*w).max(3))).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", printable(cell), width = *width))
        .collect::<Vec<_>>()
        .join(COLUMN_GAP);
    line.trim_end().to_string()
}

fn printable(cell: &str) -> String {
    cell.replace(['\n', '\r', '\t'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingEntry;

    #[test]
    fn mapping_rows_show_primary_and_repeats() {
        let mapping = RegionMapping {
            region: "X".into(),
            year: 2020,
            entries: vec![
                MappingEntry {
                    canonical: "crop_name".into(),
                    sources: SourceColumns::parse("COL_A|COL_B"),
                },
                MappingEntry {
                    canonical: "organic".into(),
                    sources: SourceColumns::parse(""),
                },
            ],
        };
        let rows = mapping_rows(&mapping);
        assert_eq!(rows[0], vec!["crop_name", "COL_A", "COL_B (#2)"]);
        assert_eq!(rows[1], vec!["organic", "-", ""]);
    }

    #[test]
    fn columns_are_aligned() {
        let rendered = render_table(
            &["canonical".to_string(), "source".to_string()],
            &[vec!["id".to_string(), "FLIK".to_string()]],
        );
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "canonical  source");
        assert_eq!(lines[1], "---------  ------");
        assert_eq!(lines[2], "id         FLIK");
    }
}
