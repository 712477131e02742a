/// Functions and structs for building tool command lines and running tools

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use anyhow::anyhow;
use log::debug;
use tokio::process::Command;

use crate::config::defs::{
    PipelineError, ANVI_TRNASEQ_TAG, IU_MERGE_PAIRS_TAG, LOG_TAIL_LINES, REFORMAT_FASTA_TAG,
    TOOL_VERSION_FLAGS,
};
use crate::config::workflow::PipelineConfig;
use crate::utils::file::log_tail;

pub mod iu_merge_pairs {
    use std::path::Path;

    use crate::config::workflow::MergeSection;
    use crate::engine::task::Params;

    /// Optional flags forwarded to the merge tool.
    pub fn params(section: &MergeSection) -> Params {
        Params::new()
            .value("--min-overlap-size", section.min_overlap_size)
            .value("--max-num-mismatches", section.max_num_mismatches)
            .flag("--enforce-Q30-check", section.enforce_q30_check)
            .flag("--marker-gene-stringent", section.marker_gene_stringent)
            .flag("--report-r1-prefix", section.report_r1_prefix)
            .flag("--report-r2-prefix", section.report_r2_prefix)
            .flag("--ignore-deflines", section.ignore_deflines)
    }

    pub fn arg_generator(config: &Path, params: &Params) -> Vec<String> {
        let mut args_vec = vec![config.to_string_lossy().to_string()];
        args_vec.extend(params.to_cli());
        args_vec
    }
}

pub mod reformat_fasta {
    use std::path::Path;

    use crate::config::defs::SAMPLE_SPLIT_WILDCARD;
    use crate::config::workflow::ReformatSection;
    use crate::engine::task::Params;

    pub fn params(section: &ReformatSection) -> Params {
        let mut params = Params::new().flag("--simplify-names", section.simplify_names);
        if section.prefix_with_identifier {
            params = params.template("--prefix", &format!("{{{}}}", SAMPLE_SPLIT_WILDCARD));
        }
        params
            .value("-l", section.min_len)
            .value("--seq-type", section.seq_type.as_deref())
    }

    pub fn arg_generator(input: &Path, output: &Path, report: &Path, params: &Params) -> Vec<String> {
        let mut args_vec = vec![
            input.to_string_lossy().to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
            "--report-file".to_string(),
            report.to_string_lossy().to_string(),
        ];
        args_vec.extend(params.to_cli());
        args_vec
    }
}

pub mod anvi_trnaseq {
    use std::path::Path;

    use crate::config::defs::SAMPLE_SPLIT_WILDCARD;
    use crate::config::workflow::IdentifySection;
    use crate::engine::task::Params;

    fn path_value(path: &Option<std::path::PathBuf>) -> Option<String> {
        path.as_ref().map(|p| p.to_string_lossy().to_string())
    }

    pub fn params(section: &IdentifySection) -> Params {
        Params::new()
            .template("-S", &format!("{{{}}}", SAMPLE_SPLIT_WILDCARD))
            .value("-T", Some(section.threads))
            .value("--description", path_value(&section.description))
            .value("--write-buffer-size", section.write_buffer_size)
            .value("--alignment-target-chunk-size", section.alignment_target_chunk_size)
            .value("--profiling-chunk-size", section.profiling_chunk_size)
            .flag("--write-checkpoints", section.write_checkpoints)
            .value("--load-checkpoint", section.load_checkpoint.as_deref())
            .value("--feature-param-file", path_value(&section.feature_param_file))
            .value("--param-3prime-termini", section.param_3prime_termini.as_deref())
            .value("--min-length-long-fiveprime", section.min_length_long_fiveprime)
            .value("--min-trna-fragment-size", section.min_trna_fragment_size)
            .value("--agglomeration-max-mismatch-freq", section.agglomeration_max_mismatch_freq)
            .flag("--skip-INDEL-profiling", section.skip_indel_profiling)
            .value("--max-indel-freq", section.max_indel_freq)
            .value("--left-indel-buffer", section.left_indel_buffer)
            .value("--right-indel-buffer", section.right_indel_buffer)
            .value("--fiveprimemost-deletion-start", section.fiveprimemost_deletion_start)
            .value("--fiveprimemost-deletion-stop", section.fiveprimemost_deletion_stop)
            .value("--threeprimemost-deletion-start", section.threeprimemost_deletion_start)
            .value("--threeprimemost-deletion-stop", section.threeprimemost_deletion_stop)
            .value(
                "--max-distinct-nontemplated-proportion",
                section.max_distinct_nontemplated_proportion,
            )
            .value("--alignment-progress-interval", section.alignment_progress_interval)
            .value("--agglomeration-progress-interval", section.agglomeration_progress_interval)
            .flag("--overwrite-output-destinations", section.overwrite_output_destinations)
    }

    pub fn arg_generator(fasta: &Path, out_dir: &Path, params: &Params) -> Vec<String> {
        let mut args_vec = vec![
            "-f".to_string(),
            fasta.to_string_lossy().to_string(),
            "-o".to_string(),
            out_dir.to_string_lossy().to_string(),
        ];
        args_vec.extend(params.to_cli());
        args_vec
    }
}

/// Program configured for a tool tag.
pub fn program_for<'a>(tool: &str, config: &'a PipelineConfig) -> Result<&'a str, PipelineError> {
    let program = match tool {
        IU_MERGE_PAIRS_TAG => &config.tools.merge,
        REFORMAT_FASTA_TAG => &config.tools.reformat,
        ANVI_TRNASEQ_TAG => &config.tools.identify,
        _ => return Err(PipelineError::Other(anyhow!("Unknown tool: {}", tool))),
    };
    Ok(program.as_str())
}

/// Runs the tool's version flag and returns the first line it prints.
pub async fn check_version(tool: &str, program: &str) -> Result<String, PipelineError> {
    let flag = TOOL_VERSION_FLAGS
        .get(tool)
        .ok_or_else(|| PipelineError::Other(anyhow!("Unknown tool: {}", tool)))?;

    let output = Command::new(program)
        .arg(flag)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: program.to_string(),
            error: format!("Failed to spawn: {}. Is {} installed?", e, tool),
        })?;
    if !output.status.success() {
        return Err(PipelineError::ToolExecution {
            tool: program.to_string(),
            error: format!("{} {} exited with {}", program, flag, output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| PipelineError::ToolExecution {
            tool: program.to_string(),
            error: format!("No output from {} {}", program, flag),
        })?
        .to_string();
    Ok(version)
}

/// Checks every tool the configured run will invoke.
pub async fn check_versions(config: &PipelineConfig) -> Result<Vec<(String, String)>, PipelineError> {
    let mut tools = vec![IU_MERGE_PAIRS_TAG, ANVI_TRNASEQ_TAG];
    if config.reformat.run {
        tools.push(REFORMAT_FASTA_TAG);
    }
    let mut versions = Vec::with_capacity(tools.len());
    for tool in tools {
        let program = program_for(tool, config)?;
        let version = check_version(tool, program).await?;
        versions.push((tool.to_string(), version));
    }
    Ok(versions)
}

/// Spawns `program` with stdout and stderr appended to `log`, waits for it and
/// turns a non-zero exit into [`PipelineError::Subprocess`] quoting the log
/// tail. The child is killed if the returned future is dropped.
pub async fn run_logged(program: &str, args: &[String], log: &Path) -> Result<(), PipelineError> {
    let mut log_file = File::create(log).map_err(|e| PipelineError::io(log, e))?;
    writeln!(log_file, "$ {} {}", program, args.join(" ")).map_err(|e| PipelineError::io(log, e))?;
    let stderr_file = log_file.try_clone().map_err(|e| PipelineError::io(log, e))?;

    debug!("Running {} {}", program, args.join(" "));
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(stderr_file))
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| PipelineError::ToolExecution {
            tool: program.to_string(),
            error: format!("Failed to spawn: {}", e),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(PipelineError::Subprocess {
            tool: program.to_string(),
            status: status.to_string(),
            log: log.to_path_buf(),
            tail: log_tail(log, LOG_TAIL_LINES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workflow::{IdentifySection, MergeSection, ReformatSection};
    use crate::engine::pattern::Wildcards;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn wildcards(id: &str) -> Wildcards {
        Wildcards::from([("sample_split".to_string(), id.to_string())])
    }

    #[test]
    fn test_merge_args_omit_unset_flags() {
        let section = MergeSection {
            max_num_mismatches: Some(3),
            enforce_q30_check: true,
            ..Default::default()
        };
        let args = iu_merge_pairs::arg_generator(
            Path::new("out/configs/s_a.ini"),
            &iu_merge_pairs::params(&section),
        );
        assert_eq!(
            args,
            vec!["out/configs/s_a.ini", "--max-num-mismatches", "3", "--enforce-Q30-check"]
        );
    }

    #[test]
    fn test_reformat_args_with_identifier_prefix() {
        let section = ReformatSection {
            prefix_with_identifier: true,
            min_len: Some(20),
            seq_type: Some("NT".to_string()),
            ..Default::default()
        };
        let params = reformat_fasta::params(&section).resolve(&wildcards("s_a")).unwrap();
        let args = reformat_fasta::arg_generator(
            Path::new("in.fa"),
            Path::new("out.fa"),
            Path::new("report.txt"),
            &params,
        );
        assert_eq!(
            args,
            vec![
                "in.fa", "-o", "out.fa", "--report-file", "report.txt", "--simplify-names",
                "--prefix", "s_a", "-l", "20", "--seq-type", "NT",
            ]
        );
    }

    #[test]
    fn test_identify_defaults() {
        let params = anvi_trnaseq::params(&IdentifySection::default())
            .resolve(&wildcards("s1_untreated"))
            .unwrap();
        let args = anvi_trnaseq::arg_generator(
            Path::new("m.fa"),
            Path::new("identify/s1_untreated"),
            &params,
        );
        assert_eq!(
            args,
            vec![
                "-f", "m.fa", "-o", "identify/s1_untreated", "-S", "s1_untreated", "-T", "4",
                "--overwrite-output-destinations",
            ]
        );
    }

    #[test]
    fn test_identify_pass_through() {
        let section = IdentifySection {
            write_checkpoints: true,
            feature_param_file: Some(PathBuf::from("params.ini")),
            max_indel_freq: Some(0.05),
            overwrite_output_destinations: false,
            ..Default::default()
        };
        let cli = anvi_trnaseq::params(&section).to_cli();
        assert!(cli.contains(&"--write-checkpoints".to_string()));
        let pos = cli.iter().position(|a| a == "--feature-param-file").unwrap();
        assert_eq!(cli[pos + 1], "params.ini");
        let pos = cli.iter().position(|a| a == "--max-indel-freq").unwrap();
        assert_eq!(cli[pos + 1], "0.05");
        assert!(!cli.contains(&"--overwrite-output-destinations".to_string()));
        assert!(!cli.contains(&"--description".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_logged_captures_output() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("task.log");
        let args = vec!["-c".to_string(), "echo hello; echo oops >&2".to_string()];
        run_logged("sh", &args, &log).await.unwrap();
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_logged_failure_quotes_tail() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("task.log");
        let args = vec!["-c".to_string(), "echo 'bad input' >&2; exit 3".to_string()];
        let err = run_logged("sh", &args, &log).await.unwrap_err();
        match err {
            PipelineError::Subprocess { status, tail, log: path, .. } => {
                assert!(status.contains('3'));
                assert!(tail.contains("bad input"));
                assert_eq!(path, log);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let err = check_version(IU_MERGE_PAIRS_TAG, "definitely-not-installed-merge-tool")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolExecution { .. }));
    }
}
