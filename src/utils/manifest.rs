//! Sample sheet -> manifest conversion, and reading the manifest back for
//! fan-out.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::defs::{PipelineError, MANIFEST_COLUMNS, SHEET_COLUMNS};

/// One row of the sample sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub sample: String,
    pub split: String,
    pub r1: PathBuf,
    pub r2: PathBuf,
}

impl SheetRow {
    /// `<sample>_<split>`
    pub fn identifier(&self) -> String {
        format!("{}_{}", self.sample, self.split)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub id: String,
    pub r1: PathBuf,
    pub r2: PathBuf,
}

/// Header-indexed tab-separated table. Blank lines are ignored; every data
/// line must carry at least as many fields as the required columns reach.
struct Table {
    columns: Vec<usize>,
    rows: Vec<(usize, Vec<String>)>,
}

fn read_table(path: &Path, required: &[&str]) -> Result<Table, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line.map_err(|e| PipelineError::io(path, e))?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(PipelineError::format(path, "file is empty")),
        }
    };
    let names: Vec<&str> = header.split('\t').map(str::trim).collect();
    let mut columns = Vec::with_capacity(required.len());
    for column in required {
        let idx = names.iter().position(|n| n == column).ok_or_else(|| {
            PipelineError::format(path, format!("missing required column '{}'", column))
        })?;
        columns.push(idx);
    }
    let width = columns.iter().max().map(|m| m + 1).unwrap_or(0);

    let mut rows = Vec::new();
    for (n, line) in lines {
        let line = line.map_err(|e| PipelineError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(|f| f.trim().to_string()).collect();
        if fields.len() < width {
            return Err(PipelineError::format(
                path,
                format!("line {}: expected at least {} fields, found {}", n + 1, width, fields.len()),
            ));
        }
        rows.push((n + 1, fields));
    }
    Ok(Table { columns, rows })
}

impl Table {
    fn field<'a>(&self, fields: &'a [String], column: usize) -> &'a str {
        &fields[self.columns[column]]
    }
}

/// Relative read paths are taken relative to the sheet's directory.
fn resolve_read_path(base: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() { path } else { base.join(path) }
}

pub fn read_sample_sheet(sheet: &Path) -> Result<Vec<SheetRow>, PipelineError> {
    let table = read_table(sheet, SHEET_COLUMNS)?;
    let base = sheet.parent().unwrap_or(Path::new(""));

    let mut rows = Vec::with_capacity(table.rows.len());
    for (line_no, fields) in &table.rows {
        let row = SheetRow {
            sample: table.field(fields, 0).to_string(),
            split: table.field(fields, 1).to_string(),
            r1: resolve_read_path(base, table.field(fields, 2)),
            r2: resolve_read_path(base, table.field(fields, 3)),
        };
        if row.sample.is_empty() || row.split.is_empty() {
            return Err(PipelineError::format(
                sheet,
                format!("line {}: sample and split must be non-empty", line_no),
            ));
        }
        for read in [&row.r1, &row.r2] {
            if !read.is_file() {
                return Err(PipelineError::format(
                    sheet,
                    format!("line {}: read file {} does not exist", line_no, read.display()),
                ));
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(PipelineError::format(sheet, "no samples listed"));
    }
    Ok(rows)
}

/// Identifiers end up in file names and must round-trip through the
/// `{sample_split}` wildcard, which never spans a path separator.
fn check_identifiers<'a>(
    path: &Path,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), PipelineError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(PipelineError::format(
                path,
                format!("identifier '{}' contains a path separator or whitespace", id),
            ));
        }
        if !seen.insert(id) {
            return Err(PipelineError::format(path, format!("duplicate identifier '{}'", id)));
        }
    }
    Ok(())
}

/// Converts the sample sheet into the manifest, one row per sheet row in
/// sheet order.
pub fn build_manifest(sheet: &Path, manifest: &Path) -> Result<Vec<ManifestRow>, PipelineError> {
    let rows: Vec<ManifestRow> = read_sample_sheet(sheet)?
        .into_iter()
        .map(|row| ManifestRow {
            id: row.identifier(),
            r1: row.r1,
            r2: row.r2,
        })
        .collect();
    check_identifiers(sheet, rows.iter().map(|r| r.id.as_str()))?;

    write_manifest(&rows, manifest)?;
    info!("Wrote manifest with {} sample splits to {}", rows.len(), manifest.display());
    Ok(rows)
}

pub fn write_manifest(rows: &[ManifestRow], manifest: &Path) -> Result<(), PipelineError> {
    let file = File::create(manifest).map_err(|e| PipelineError::io(manifest, e))?;
    let mut writer = BufWriter::new(file);
    let write_all = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
        writeln!(writer, "{}", MANIFEST_COLUMNS.join("\t"))?;
        for row in rows {
            writeln!(writer, "{}\t{}\t{}", row.id, row.r1.display(), row.r2.display())?;
        }
        writer.flush()
    };
    write_all(&mut writer).map_err(|e| PipelineError::io(manifest, e))
}

pub fn read_manifest(manifest: &Path) -> Result<Vec<ManifestRow>, PipelineError> {
    let table = read_table(manifest, MANIFEST_COLUMNS)?;
    let rows: Vec<ManifestRow> = table
        .rows
        .iter()
        .map(|(_, fields)| ManifestRow {
            id: table.field(fields, 0).to_string(),
            r1: PathBuf::from(table.field(fields, 1)),
            r2: PathBuf::from(table.field(fields, 2)),
        })
        .collect();
    if let Some(row) = rows.iter().find(|r| r.id.is_empty()) {
        return Err(PipelineError::format(
            manifest,
            format!("empty identifier for reads {}", row.r1.display()),
        ));
    }
    check_identifiers(manifest, rows.iter().map(|r| r.id.as_str()))?;
    debug!("Read {} identifiers from {}", rows.len(), manifest.display());
    Ok(rows)
}

pub fn identifiers(rows: &[ManifestRow]) -> Vec<String> {
    rows.iter().map(|r| r.id.clone()).collect()
}
