use std::path::PathBuf;
use std::sync::Arc;

use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

use crate::cli::Arguments;
use crate::config::workflow::PipelineConfig;

// External software
pub const GZIP_EXT: &str = "gz";
pub const IU_MERGE_PAIRS_TAG: &str = "iu-merge-pairs";
pub const REFORMAT_FASTA_TAG: &str = "anvi-script-reformat-fasta";
pub const ANVI_TRNASEQ_TAG: &str = "anvi-trnaseq";

lazy_static! {
    /// Flag each tool answers with its version string.
    pub static ref TOOL_VERSION_FLAGS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(IU_MERGE_PAIRS_TAG, "--version");
        m.insert(REFORMAT_FASTA_TAG, "--version");
        m.insert(ANVI_TRNASEQ_TAG, "--version");
        m
    };
}

// Rule names
pub const MANIFEST_RULE: &str = "make_manifest";
pub const CONFIG_RULE: &str = "gen_merge_config";
pub const MERGE_RULE: &str = "merge_pairs";
pub const REFORMAT_RULE: &str = "reformat_fasta";
pub const IDENTIFY_RULE: &str = "identify_trna";
pub const QC_RULE: &str = "qc_report";

// Wildcard binding every fan-out artifact carries
pub const SAMPLE_SPLIT_WILDCARD: &str = "sample_split";

// Static filenames
pub const MANIFEST_FILE: &str = "manifest.tsv";
pub const QC_REPORT_FILE: &str = "qc_report.txt";
pub const CONFIG_DIR: &str = "configs";
pub const MERGE_DIR: &str = "merge";
pub const REFORMAT_DIR: &str = "reformat";
pub const IDENTIFY_DIR: &str = "identify";
pub const LOG_DIR: &str = "logs";

// Merge tool output suffixes, appended to `<sample_split>`
pub const MERGED_SUFFIX: &str = "_MERGED";
pub const STATS_SUFFIX: &str = "_STATS";
pub const FAILED_SUFFIX: &str = "_FAILED";
pub const FAILED_WITH_NS_SUFFIX: &str = "_FAILED_WITH_Ns";
pub const R1_PREFIX_SUFFIX: &str = "_R1_PREFIX";
pub const R2_PREFIX_SUFFIX: &str = "_R2_PREFIX";

// Reformat outputs
pub const REFORMATTED_SUFFIX: &str = "-reformatted.fa";
pub const REFORMAT_REPORT_SUFFIX: &str = "-reformat-report.txt";

// Identification outputs
pub const TRNASEQ_DB_SUFFIX: &str = "-TRNASEQ.db";
pub const UNCONSERVED_SUPPLEMENT_SUFFIX: &str = "-UNCONSERVED_SUPPLEMENT.txt";
pub const INDEL_SUPPLEMENT_SUFFIX: &str = "-INDEL_SUPPLEMENT.txt";

// Sample sheet / manifest columns
pub const SHEET_COLUMNS: &[&str] = &["sample", "split", "r1", "r2"];
pub const MANIFEST_COLUMNS: &[&str] = &["sample_split_id", "r1", "r2"];
pub const REPORT_ID_COLUMN: &str = "sample_split";

pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "faa", "ffn", "frn"];

/// Lines of a subprocess log quoted back in a failure message.
pub const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error(
        "Statistics headers in {offending} do not match those in {reference}: expected [{expected}], found [{found}]"
    )]
    Consistency {
        reference: PathBuf,
        offending: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Tool {tool} failed to execute: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{tool} exited with {status} (log: {log}):\n{tail}")]
    Subprocess {
        tool: String,
        status: String,
        log: PathBuf,
        tail: String,
    },

    #[error("Task {task} is missing input {path}")]
    DependencyMissing { task: String, path: PathBuf },

    #[error("Task graph error: {0}")]
    Graph(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Run interrupted before all tasks were scheduled")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Errors that halt the whole run rather than a single fan-out branch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfig(_)
                | PipelineError::Format { .. }
                | PipelineError::Consistency { .. }
                | PipelineError::Graph(_)
                | PipelineError::Interrupted
        )
    }

    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PipelineError::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: &std::path::Path, e: std::io::Error) -> Self {
        PipelineError::IOError(format!("{}: {}", path.display(), e))
    }
}

pub struct RunConfig {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub pipeline: Arc<PipelineConfig>,
    pub jobs: usize,
}
