//! Workflow configuration: an optional JSON file merged with command-line
//! overrides, then frozen into the immutable [`PipelineConfig`] every task
//! constructor reads from.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, ANVI_TRNASEQ_TAG, CONFIG_DIR, IDENTIFY_DIR, IU_MERGE_PAIRS_TAG, LOG_DIR,
    MANIFEST_FILE, MERGE_DIR, QC_REPORT_FILE, REFORMAT_DIR, REFORMAT_FASTA_TAG,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    pub jobs: Option<usize>,
    pub tools: ToolPrograms,
    pub merge: MergeSection,
    pub reformat: ReformatSection,
    pub identify: IdentifySection,
}

/// Programs invoked for each external stage. Sites can point these at wrappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPrograms {
    pub merge: String,
    pub reformat: String,
    pub identify: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        ToolPrograms {
            merge: IU_MERGE_PAIRS_TAG.to_string(),
            reformat: REFORMAT_FASTA_TAG.to_string(),
            identify: ANVI_TRNASEQ_TAG.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeSection {
    pub threads: usize,
    pub researcher_email: Option<String>,
    pub gzip_output: bool,
    pub r1_prefix: Option<String>,
    pub r2_prefix: Option<String>,
    pub min_overlap_size: Option<u32>,
    pub max_num_mismatches: Option<u32>,
    pub enforce_q30_check: bool,
    pub marker_gene_stringent: bool,
    pub report_r1_prefix: bool,
    pub report_r2_prefix: bool,
    pub ignore_deflines: bool,
}

impl Default for MergeSection {
    fn default() -> Self {
        MergeSection {
            threads: 1,
            researcher_email: None,
            gzip_output: false,
            r1_prefix: None,
            r2_prefix: None,
            min_overlap_size: None,
            max_num_mismatches: None,
            enforce_q30_check: false,
            marker_gene_stringent: false,
            report_r1_prefix: false,
            report_r2_prefix: false,
            ignore_deflines: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReformatSection {
    pub run: bool,
    pub threads: usize,
    pub gzip_output: bool,
    pub simplify_names: bool,
    pub prefix_with_identifier: bool,
    pub min_len: Option<u32>,
    pub seq_type: Option<String>,
}

impl Default for ReformatSection {
    fn default() -> Self {
        ReformatSection {
            run: false,
            threads: 1,
            gzip_output: false,
            simplify_names: true,
            prefix_with_identifier: false,
            min_len: None,
            seq_type: None,
        }
    }
}

/// Parameters forwarded almost verbatim to the identification tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentifySection {
    pub threads: usize,
    pub description: Option<PathBuf>,
    pub write_buffer_size: Option<u64>,
    pub alignment_target_chunk_size: Option<u64>,
    pub profiling_chunk_size: Option<u64>,
    pub write_checkpoints: bool,
    pub load_checkpoint: Option<String>,
    pub feature_param_file: Option<PathBuf>,
    pub param_3prime_termini: Option<String>,
    pub min_length_long_fiveprime: Option<u32>,
    pub min_trna_fragment_size: Option<u32>,
    pub agglomeration_max_mismatch_freq: Option<f64>,
    pub skip_indel_profiling: bool,
    pub max_indel_freq: Option<f64>,
    pub left_indel_buffer: Option<u32>,
    pub right_indel_buffer: Option<u32>,
    pub fiveprimemost_deletion_start: Option<u32>,
    pub fiveprimemost_deletion_stop: Option<u32>,
    pub threeprimemost_deletion_start: Option<u32>,
    pub threeprimemost_deletion_stop: Option<u32>,
    pub max_distinct_nontemplated_proportion: Option<f64>,
    pub alignment_progress_interval: Option<u64>,
    pub agglomeration_progress_interval: Option<u64>,
    pub overwrite_output_destinations: bool,
}

impl Default for IdentifySection {
    fn default() -> Self {
        IdentifySection {
            threads: 4,
            description: None,
            write_buffer_size: None,
            alignment_target_chunk_size: None,
            profiling_chunk_size: None,
            write_checkpoints: false,
            load_checkpoint: None,
            feature_param_file: None,
            param_3prime_termini: None,
            min_length_long_fiveprime: None,
            min_trna_fragment_size: None,
            agglomeration_max_mismatch_freq: None,
            skip_indel_profiling: false,
            max_indel_freq: None,
            left_indel_buffer: None,
            right_indel_buffer: None,
            fiveprimemost_deletion_start: None,
            fiveprimemost_deletion_stop: None,
            threeprimemost_deletion_start: None,
            threeprimemost_deletion_stop: None,
            max_distinct_nontemplated_proportion: None,
            alignment_progress_interval: None,
            agglomeration_progress_interval: None,
            overwrite_output_destinations: true,
        }
    }
}

impl WorkflowConfig {
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Layers command-line switches over the file values.
    pub fn apply_args(&mut self, args: &Arguments) {
        if args.jobs.is_some() {
            self.jobs = args.jobs;
        }
        if args.reformat {
            self.reformat.run = true;
        }
        if args.gzip_merge_output {
            self.merge.gzip_output = true;
        }
        if args.gzip_reformat_output {
            self.reformat.gzip_output = true;
        }
        if args.r1_prefix.is_some() {
            self.merge.r1_prefix = args.r1_prefix.clone();
        }
        if args.r2_prefix.is_some() {
            self.merge.r2_prefix = args.r2_prefix.clone();
        }
    }
}

/// Output directory layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Directories {
    pub root: PathBuf,
    pub configs: PathBuf,
    pub merge: PathBuf,
    pub reformat: PathBuf,
    pub identify: PathBuf,
    pub logs: PathBuf,
}

impl Directories {
    pub fn new(root: &Path) -> Self {
        Directories {
            root: root.to_path_buf(),
            configs: root.join(CONFIG_DIR),
            merge: root.join(MERGE_DIR),
            reformat: root.join(REFORMAT_DIR),
            identify: root.join(IDENTIFY_DIR),
            logs: root.join(LOG_DIR),
        }
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn qc_report(&self) -> PathBuf {
        self.root.join(QC_REPORT_FILE)
    }
}

/// Immutable, validated configuration handed to every task constructor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_sheet: PathBuf,
    pub dirs: Directories,
    pub tools: ToolPrograms,
    pub merge: MergeSection,
    pub reformat: ReformatSection,
    pub identify: IdentifySection,
}

impl PipelineConfig {
    pub fn new(
        sample_sheet: PathBuf,
        out_dir: &Path,
        workflow: WorkflowConfig,
    ) -> Result<Self, PipelineError> {
        let checks = [
            ("merge", workflow.merge.threads),
            ("reformat", workflow.reformat.threads),
            ("identify", workflow.identify.threads),
        ];
        for (section, threads) in checks {
            if threads == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}.threads must be at least 1",
                    section
                )));
            }
        }

        for prefix in [&workflow.merge.r1_prefix, &workflow.merge.r2_prefix]
            .into_iter()
            .flatten()
        {
            Regex::new(prefix).map_err(|e| {
                PipelineError::InvalidConfig(format!("Invalid adapter prefix '{}': {}", prefix, e))
            })?;
        }

        if workflow.jobs == Some(0) {
            return Err(PipelineError::InvalidConfig("jobs must be at least 1".to_string()));
        }

        Ok(PipelineConfig {
            sample_sheet,
            dirs: Directories::new(out_dir),
            tools: workflow.tools,
            merge: workflow.merge,
            reformat: workflow.reformat,
            identify: workflow.identify,
        })
    }
}
