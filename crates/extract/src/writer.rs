//! Delimited output for the catalog's CSV tables.
//!
//! Fields are never quoted. Backslash is the escape character: literal
//! backslashes in text cells are doubled, then the delimiter, the quote
//! character and line breaks are prefixed with a backslash. Nulls are
//! written as empty fields.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use panorama_core::CellValue;

pub const DELIMITER: char = ',';
const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// Escape one text cell.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            ESCAPE => {
                out.push(ESCAPE);
                out.push(ESCAPE);
            }
            DELIMITER | QUOTE | '\n' | '\r' => {
                out.push(ESCAPE);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

pub fn render_cell(value: &CellValue) -> String {
    match value {
        CellValue::Text(s) => escape_text(s),
        other => other.to_string(),
    }
}

pub fn render_row(cells: &[CellValue]) -> String {
    cells
        .iter()
        .map(render_cell)
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}

/// Write a header plus rows. Returns the number of data rows written.
pub fn write_delimited<W: Write>(
    out: W,
    header: &[String],
    rows: &[Vec<CellValue>],
) -> io::Result<usize> {
    let mut w = BufWriter::new(out);
    let head: Vec<String> = header.iter().map(|h| escape_text(h)).collect();
    writeln!(w, "{}", head.join(&DELIMITER.to_string()))?;
    for row in rows {
        writeln!(w, "{}", render_row(row))?;
    }
    w.flush()?;
    Ok(rows.len())
}

/// Like [`write_delimited`], replacing any existing file at `path`.
pub fn write_file(path: &Path, header: &[String], rows: &[Vec<CellValue>]) -> io::Result<usize> {
    let file = File::create(path)?;
    let n = write_delimited(file, header, rows)?;
    tracing::debug!(path = %path.display(), rows = n, "delimited file written");
    Ok(n)
}
