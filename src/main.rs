use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{self, debug, error, info, LevelFilter};

use trnaseq_pipelines::cli::{parse, Arguments};
use trnaseq_pipelines::config::defs::{PipelineError, RunConfig};
use trnaseq_pipelines::config::workflow::{PipelineConfig, WorkflowConfig};
use trnaseq_pipelines::pipelines::trnaseq;
use trnaseq_pipelines::utils::command::check_versions;
use trnaseq_pipelines::utils::system::detect_jobs;

#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&WorkflowConfig::default())?);
        return Ok(());
    }

    info!("\n-------------\n tRNA-seq pipeline\n-------------");

    let dir = env::current_dir()?;
    debug!("The current directory is {:?}", dir);

    if let Err(e) = setup_and_run(args, dir).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    info!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}

async fn setup_and_run(args: Arguments, cwd: PathBuf) -> Result<(), PipelineError> {
    let sample_sheet = match &args.samples {
        Some(sheet) => absolute(Path::new(sheet), &cwd),
        None => {
            return Err(PipelineError::InvalidConfig(
                "A sample sheet is required (--samples)".to_string(),
            ));
        }
    };

    let mut workflow = match &args.config {
        Some(path) => WorkflowConfig::from_file(&absolute(Path::new(path), &cwd))?,
        None => WorkflowConfig::default(),
    };
    workflow.apply_args(&args);
    let jobs = detect_jobs(workflow.jobs).await;

    let out_dir = setup_output_dir(&args, &cwd)?;
    info!("Writing results to {}", out_dir.display());
    let pipeline = Arc::new(PipelineConfig::new(sample_sheet, &out_dir, workflow)?);
    debug!("Effective configuration: {:?}", pipeline);

    if !args.skip_version_check && !args.dry_run {
        for (tool, version) in check_versions(&pipeline).await? {
            info!("{}: {}", tool, version);
        }
    }

    let run_config = Arc::new(RunConfig {
        cwd,
        out_dir,
        args,
        pipeline,
        jobs,
    });
    info!("Running up to {} tasks at once", run_config.jobs);

    trnaseq::run(run_config).await
}

fn absolute(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `trnaseq_YYYYMMDD`.
/// Ensures the directory exists unless this is a dry run.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path) -> Result<PathBuf, PipelineError> {
    let out_dir = match &args.out_dir {
        Some(out) => absolute(Path::new(out), cwd),
        None => {
            let timestamp = chrono::Local::now().format("%Y%m%d").to_string();
            cwd.join(format!("trnaseq_{}", timestamp))
        }
    };
    if !args.dry_run {
        fs::create_dir_all(&out_dir).map_err(|e| PipelineError::io(&out_dir, e))?;
    }
    Ok(out_dir)
}
