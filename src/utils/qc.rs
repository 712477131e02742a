//! Merge statistics parsing and the cross-sample QC report.
//!
//! A statistics file is a block of `<header> ...<padding>\t<value>` lines
//! ended by the first blank line. Every file must list the same headers in
//! the same order as the first one; nothing is written otherwise.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::defs::{PipelineError, REPORT_ID_COLUMN, STATS_SUFFIX};

const HEADER_MARKER: &str = " ...";

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRecord {
    pub id: String,
    pub path: PathBuf,
    pub fields: Vec<(String, String)>,
}

impl StatsRecord {
    pub fn headers(&self) -> Vec<&str> {
        self.fields.iter().map(|(h, _)| h.as_str()).collect()
    }
}

/// Parses one statistics line into `(header, value)`.
pub fn parse_stats_line(line: &str) -> Option<(String, String)> {
    let (label, value) = line.split_once('\t')?;
    if value.contains('\t') {
        return None;
    }
    let (header, _) = label.split_once(HEADER_MARKER)?;
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    Some((header.to_string(), value.trim().to_string()))
}

pub fn parse_stats(id: &str, path: &Path) -> Result<StatsRecord, PipelineError> {
    let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    let mut fields = Vec::new();
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            break;
        }
        let field = parse_stats_line(line).ok_or_else(|| {
            PipelineError::format(
                path,
                format!("line {}: expected '<header> ...<tab><value>', found '{}'", n + 1, line),
            )
        })?;
        fields.push(field);
    }
    if fields.is_empty() {
        return Err(PipelineError::format(path, "no statistics lines"));
    }
    Ok(StatsRecord {
        id: id.to_string(),
        path: path.to_path_buf(),
        fields,
    })
}

/// `<dir>/<id>_STATS` -> `<id>`
pub fn id_from_stats_path(path: &Path) -> Option<String> {
    path.file_name()?
        .to_str()?
        .strip_suffix(STATS_SUFFIX)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Checks a record against the reference (first) record's header list.
pub fn check_consistency(reference: &StatsRecord, record: &StatsRecord) -> Result<(), PipelineError> {
    let expected = reference.headers();
    let found = record.headers();
    if found != expected {
        return Err(PipelineError::Consistency {
            reference: reference.path.clone(),
            offending: record.path.clone(),
            expected: expected.join(", "),
            found: found.join(", "),
        });
    }
    Ok(())
}

pub fn render_report(records: &[StatsRecord]) -> String {
    let mut report = String::new();
    let Some(reference) = records.first() else {
        report.push_str(REPORT_ID_COLUMN);
        report.push('\n');
        return report;
    };

    let mut header = vec![REPORT_ID_COLUMN];
    header.extend(reference.headers());
    report.push_str(&header.join("\t"));
    report.push('\n');

    for record in records {
        report.push_str(&record.id);
        for (_, value) in &record.fields {
            report.push('\t');
            report.push_str(value);
        }
        report.push('\n');
    }
    report
}

/// Parses every `(id, stats file)` pair in order, checking each against the
/// first as soon as it is read, and only then writes the report.
pub fn aggregate(inputs: &[(String, PathBuf)], report: &Path) -> Result<usize, PipelineError> {
    let mut records: Vec<StatsRecord> = Vec::with_capacity(inputs.len());
    for (id, path) in inputs {
        let record = parse_stats(id, path)?;
        if let Some(reference) = records.first() {
            check_consistency(reference, &record)?;
        }
        records.push(record);
    }

    fs::write(report, render_report(&records)).map_err(|e| PipelineError::io(report, e))?;
    info!("QC report with {} rows written to {}", records.len(), report.display());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STATS_A: &str = "Number of pairs analyzed ........................:\t1000\n\
                           Merged total ......................................:\t900\n\
                           \n\
                           trailing free text\tignored\n";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_stops_at_blank_line() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "a_x_STATS", STATS_A);
        let record = parse_stats("a_x", &path).unwrap();
        assert_eq!(
            record.fields,
            vec![
                ("Number of pairs analyzed".to_string(), "1000".to_string()),
                ("Merged total".to_string(), "900".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_line_names_file() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "a_x_STATS", "Merged total: 900\n");
        let err = parse_stats("a_x", &path).unwrap_err();
        assert!(matches!(err, PipelineError::Format { .. }));
        assert!(err.to_string().contains("a_x_STATS"));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_report_columns_follow_first_file() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a_x_STATS", STATS_A);
        let b = write(
            dir.path(),
            "b_y_STATS",
            "Number of pairs analyzed ...\t20\nMerged total ...\t15\n",
        );
        let report = dir.path().join("qc_report.txt");
        let rows = aggregate(&[("a_x".to_string(), a), ("b_y".to_string(), b)], &report).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            fs::read_to_string(&report).unwrap(),
            "sample_split\tNumber of pairs analyzed\tMerged total\n\
             a_x\t1000\t900\n\
             b_y\t20\t15\n"
        );
    }

    #[test]
    fn test_header_order_mismatch_names_both_files() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a_x_STATS", "A ...\t1\nB ...\t2\n");
        let b = write(dir.path(), "b_y_STATS", "B ...\t2\nA ...\t1\n");
        let report = dir.path().join("qc_report.txt");
        let err = aggregate(&[("a_x".to_string(), a.clone()), ("b_y".to_string(), b.clone())], &report)
            .unwrap_err();
        match &err {
            PipelineError::Consistency { reference, offending, .. } => {
                assert_eq!(reference, &a);
                assert_eq!(offending, &b);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(err.is_fatal());
        assert!(!report.exists());
    }

    #[test]
    fn test_mismatch_reported_before_later_malformed_file() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a_x_STATS", "A ...\t1\nB ...\t2\n");
        let b = write(dir.path(), "b_y_STATS", "A ...\t1\n");
        let c = write(dir.path(), "c_z_STATS", "not a stats line\n");
        let inputs = vec![
            ("a_x".to_string(), a),
            ("b_y".to_string(), b.clone()),
            ("c_z".to_string(), c),
        ];
        let report = dir.path().join("qc_report.txt");
        match aggregate(&inputs, &report).unwrap_err() {
            PipelineError::Consistency { offending, .. } => assert_eq!(offending, b),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!report.exists());
    }

    #[test]
    fn test_rerun_is_byte_identical() {
        let dir = tempdir().unwrap();
        let a = write(dir.path(), "a_x_STATS", STATS_A);
        let inputs = vec![("a_x".to_string(), a)];
        let report = dir.path().join("qc_report.txt");
        aggregate(&inputs, &report).unwrap();
        let first = fs::read(&report).unwrap();
        aggregate(&inputs, &report).unwrap();
        assert_eq!(first, fs::read(&report).unwrap());
    }

    #[test]
    fn test_id_from_stats_path() {
        assert_eq!(
            id_from_stats_path(Path::new("out/merge/sample1_untreated_STATS")),
            Some("sample1_untreated".to_string())
        );
        assert_eq!(id_from_stats_path(Path::new("out/merge/_STATS")), None);
    }
}
