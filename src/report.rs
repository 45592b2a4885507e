//! Plain-text rendering of container listings

use crate::model::BlobSummary;
use chrono::Local;
use std::fmt::Write;

const HEADERS: [&str; 4] = ["Name", "Last Modified", "Access tier", "Size"];

/// Width of the line printed between listings
pub const SEPARATOR_WIDTH: usize = 40;

/// Format one listing row: name, local time of last modification, tier, size in KiB
pub fn row(blob: &BlobSummary) -> [String; 4] {
    [
        blob.name.clone(),
        blob.last_modified
            .with_timezone(&Local)
            .format("%H:%M")
            .to_string(),
        blob.access_tier
            .map(|t| t.to_string())
            .unwrap_or_default(),
        format!("{:.2} KiB", blob.size_kib()),
    ]
}

/// Render a table with a header line, one row per blob
pub fn listing_table(blobs: &[BlobSummary]) -> String {
    let rows: Vec<[String; 4]> = blobs.iter().map(row).collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    write_line(&mut out, &HEADERS.map(String::from), &widths);
    for row in &rows {
        write_line(&mut out, row, &widths);
    }
    out
}

fn write_line(out: &mut String, cells: &[String; 4], widths: &[usize; 4]) {
    let last = cells.len() - 1;
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i == last {
            let _ = write!(out, "{}", cell);
        } else {
            let _ = write!(out, "{:<width$}  ", cell, width = width);
        }
    }
    out.push('\n');
}

pub fn separator() -> String {
    "-".repeat(SEPARATOR_WIDTH)
}
