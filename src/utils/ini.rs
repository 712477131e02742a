//! Per-sample merge configuration in the illumina-utils INI layout.

use std::fs;
use std::path::Path;

use crate::config::defs::PipelineError;
use crate::utils::manifest::ManifestRow;

/// Forward / reverse adapter-prefix expressions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterPrefixes {
    pub r1: Option<String>,
    pub r2: Option<String>,
}

impl AdapterPrefixes {
    pub fn is_empty(&self) -> bool {
        self.r1.is_none() && self.r2.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct MergeConfig<'a> {
    pub row: &'a ManifestRow,
    pub output_dir: &'a Path,
    pub researcher_email: Option<&'a str>,
    pub prefixes: &'a AdapterPrefixes,
}

impl MergeConfig<'_> {
    pub fn render(&self) -> String {
        let mut ini = String::new();
        ini.push_str("[general]\n");
        ini.push_str(&format!("project_name = {}\n", self.row.id));
        ini.push_str(&format!(
            "researcher_email = {}\n",
            self.researcher_email.unwrap_or_default()
        ));
        ini.push_str("input_directory = \n");
        ini.push_str(&format!("output_directory = {}\n", self.output_dir.display()));
        ini.push('\n');
        ini.push_str("[files]\n");
        ini.push_str(&format!("pair_1 = {}\n", self.row.r1.display()));
        ini.push_str(&format!("pair_2 = {}\n", self.row.r2.display()));

        if !self.prefixes.is_empty() {
            ini.push('\n');
            ini.push_str("[prefixes]\n");
            if let Some(r1) = &self.prefixes.r1 {
                ini.push_str(&format!("pair_1_prefix = {}\n", r1));
            }
            if let Some(r2) = &self.prefixes.r2 {
                ini.push_str(&format!("pair_2_prefix = {}\n", r2));
            }
        }
        ini
    }

    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        fs::write(path, self.render()).map_err(|e| PipelineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn row() -> ManifestRow {
        ManifestRow {
            id: "sample1_untreated".to_string(),
            r1: PathBuf::from("/data/b1.fq.gz"),
            r2: PathBuf::from("/data/b2.fq.gz"),
        }
    }

    #[test]
    fn test_render_without_prefixes() {
        let row = row();
        let prefixes = AdapterPrefixes::default();
        let config = MergeConfig {
            row: &row,
            output_dir: Path::new("out/merge"),
            researcher_email: None,
            prefixes: &prefixes,
        };
        let text = config.render();
        assert!(text.starts_with("[general]\nproject_name = sample1_untreated\n"));
        assert!(text.contains("output_directory = out/merge\n"));
        assert!(text.contains("[files]\npair_1 = /data/b1.fq.gz\npair_2 = /data/b2.fq.gz\n"));
        assert!(!text.contains("[prefixes]"));
    }

    #[test]
    fn test_render_with_single_prefix() {
        let row = row();
        let prefixes = AdapterPrefixes {
            r1: Some("^....TCCAC".to_string()),
            r2: None,
        };
        let config = MergeConfig {
            row: &row,
            output_dir: Path::new("out/merge"),
            researcher_email: Some("lab@example.org"),
            prefixes: &prefixes,
        };
        let text = config.render();
        assert!(text.contains("researcher_email = lab@example.org\n"));
        assert!(text.ends_with("[prefixes]\npair_1_prefix = ^....TCCAC\n"));
        assert!(!text.contains("pair_2_prefix"));
    }
}
