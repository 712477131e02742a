//! The tRNA-seq workflow: manifest, per-split merge configuration, read
//! merging, optional reformatting, tRNA identification and the QC report,
//! declared as engine rules and run in two phases (manifest first, then the
//! per-identifier fan-out).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::BoxFuture;
use log::{debug, info};

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, RunConfig, ANVI_TRNASEQ_TAG, CONFIG_RULE, FAILED_SUFFIX, FAILED_WITH_NS_SUFFIX,
    IDENTIFY_RULE, INDEL_SUPPLEMENT_SUFFIX, IU_MERGE_PAIRS_TAG, MANIFEST_RULE, MERGED_SUFFIX,
    MERGE_RULE, QC_RULE, R1_PREFIX_SUFFIX, R2_PREFIX_SUFFIX, REFORMATTED_SUFFIX,
    REFORMAT_FASTA_TAG, REFORMAT_REPORT_SUFFIX, REFORMAT_RULE, SAMPLE_SPLIT_WILDCARD,
    STATS_SUFFIX, TRNASEQ_DB_SUFFIX, UNCONSERVED_SUPPLEMENT_SUFFIX,
};
use crate::config::workflow::PipelineConfig;
use crate::engine::artifact::{ancient, persistent, temp, ArtifactPattern, Lifecycle};
use crate::engine::executor::Executor;
use crate::engine::graph::TaskGraph;
use crate::engine::pattern::{escape, Pattern, Wildcards};
use crate::engine::plan::{plan, PlanOptions};
use crate::engine::rule::Rule;
use crate::engine::task::{TaskAction, TaskSpec};
use crate::utils::command::{anvi_trnaseq, iu_merge_pairs, program_for, reformat_fasta, run_logged};
use crate::utils::file::{gz_path, gzip_file, gzip_in_place, strip_gz, ToolInput};
use crate::utils::ini::{AdapterPrefixes, MergeConfig};
use crate::utils::manifest::{build_manifest, identifiers, read_manifest, read_sample_sheet};
use crate::utils::qc::{aggregate, id_from_stats_path};

/// `{sample_split}`
fn id_wildcard() -> String {
    format!("{{{}}}", SAMPLE_SPLIT_WILDCARD)
}

/// Pattern template for a file under `dir`; the directory part is escaped so
/// braces in user paths are not taken for wildcards.
fn under(dir: &Path, name: &str) -> String {
    format!("{}/{}", escape(&dir.to_string_lossy()), name)
}

/// Runs file-heavy work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Other(anyhow!("Blocking task failed: {}", e)))?
}

/// Paths of the artifacts every stage reads and writes, as templates.
pub struct Layout {
    config: Arc<PipelineConfig>,
}

impl Layout {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Layout { config }
    }

    pub fn manifest(&self) -> String {
        escape(&self.config.dirs.manifest().to_string_lossy())
    }

    pub fn merge_config(&self) -> String {
        under(&self.config.dirs.configs, &format!("{}.ini", id_wildcard()))
    }

    fn merge_file(&self, suffix: &str) -> String {
        under(&self.config.dirs.merge, &format!("{}{}", id_wildcard(), suffix))
    }

    pub fn merged(&self) -> String {
        self.merge_file(MERGED_SUFFIX)
    }

    pub fn stats(&self) -> String {
        self.merge_file(STATS_SUFFIX)
    }

    /// Merged reads as downstream stages consume them.
    pub fn merged_for_downstream(&self) -> String {
        let merged = self.merged();
        if self.config.merge.gzip_output { gz_template(&merged) } else { merged }
    }

    pub fn reformatted(&self) -> String {
        under(&self.config.dirs.reformat, &format!("{}{}", id_wildcard(), REFORMATTED_SUFFIX))
    }

    pub fn reformatted_for_downstream(&self) -> String {
        let reformatted = self.reformatted();
        if self.config.reformat.gzip_output { gz_template(&reformatted) } else { reformatted }
    }

    pub fn reformat_report(&self) -> String {
        under(&self.config.dirs.reformat, &format!("{}{}", id_wildcard(), REFORMAT_REPORT_SUFFIX))
    }

    fn identify_file(&self, suffix: &str) -> String {
        let id = id_wildcard();
        under(&self.config.dirs.identify, &format!("{}/{}{}", id, id, suffix))
    }

    pub fn trnaseq_db(&self) -> String {
        self.identify_file(TRNASEQ_DB_SUFFIX)
    }

    /// Sequences the identification stage reads.
    pub fn identify_input(&self) -> String {
        if self.config.reformat.run {
            self.reformatted_for_downstream()
        } else {
            self.merged_for_downstream()
        }
    }

    pub fn qc_report(&self) -> String {
        escape(&self.config.dirs.qc_report().to_string_lossy())
    }

    fn log(&self, rule: &str) -> String {
        under(&self.config.dirs.logs, &format!("{}_{}.log", rule, id_wildcard()))
    }
}

fn gz_template(template: &str) -> String {
    gz_path(Path::new(template)).to_string_lossy().into_owned()
}

struct ManifestAction;

impl TaskAction for ManifestAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let sheet = task.input("sheet")?.to_path_buf();
            let manifest = task.output("manifest")?.to_path_buf();
            blocking(move || build_manifest(&sheet, &manifest).map(|_| ())).await
        })
    }
}

struct ConfigAction {
    config: Arc<PipelineConfig>,
}

impl TaskAction for ConfigAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let id = task.wildcard(SAMPLE_SPLIT_WILDCARD)?;
            let manifest = task.input("manifest")?;
            let row = read_manifest(manifest)?
                .into_iter()
                .find(|row| row.id == id)
                .ok_or_else(|| {
                    PipelineError::format(manifest, format!("no row for identifier '{}'", id))
                })?;

            let prefixes = AdapterPrefixes {
                r1: self.config.merge.r1_prefix.clone(),
                r2: self.config.merge.r2_prefix.clone(),
            };
            let merge_config = MergeConfig {
                row: &row,
                output_dir: &self.config.dirs.merge,
                researcher_email: self.config.merge.researcher_email.as_deref(),
                prefixes: &prefixes,
            };
            merge_config.write(task.output("config")?)
        })
    }
}

struct MergeAction {
    config: Arc<PipelineConfig>,
}

impl TaskAction for MergeAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let program = program_for(IU_MERGE_PAIRS_TAG, &self.config)?;
            let args = iu_merge_pairs::arg_generator(task.input("config")?, &task.params);
            run_logged(program, &args, task.log_path()?).await?;

            if !self.config.merge.gzip_output {
                return Ok(());
            }
            // merged reads stay until the engine drops them; everything else
            // except the statistics is replaced by its compressed copy
            let merged = task.output("merged")?.to_path_buf();
            let merged_gz = task.output("merged_gz")?.to_path_buf();
            let auxiliaries: Vec<PathBuf> = task
                .outputs
                .iter()
                .filter(|o| o.key == "auxiliary")
                .map(|o| strip_gz(&o.path))
                .collect();
            blocking(move || {
                gzip_file(&merged, &merged_gz, true).map_err(|e| PipelineError::io(&merged, e))?;
                for aux in &auxiliaries {
                    gzip_in_place(aux).map_err(|e| PipelineError::io(aux, e))?;
                }
                Ok(())
            })
            .await
        })
    }
}

struct ReformatAction {
    config: Arc<PipelineConfig>,
}

impl TaskAction for ReformatAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let program = program_for(REFORMAT_FASTA_TAG, &self.config)?;
            let output = task.output("reformatted")?.to_path_buf();
            let input = prepare_input(task.input("fasta")?, &self.config.dirs.reformat).await?;

            let args = reformat_fasta::arg_generator(
                input.path(),
                &output,
                task.output("report")?,
                &task.params,
            );
            let result = run_logged(program, &args, task.log_path()?).await;
            drop(input);
            result?;

            if self.config.reformat.gzip_output {
                let compressed = task.output("reformatted_gz")?.to_path_buf();
                blocking(move || {
                    gzip_file(&output, &compressed, true).map_err(|e| PipelineError::io(&output, e))
                })
                .await?;
            }
            Ok(())
        })
    }
}

struct IdentifyAction {
    config: Arc<PipelineConfig>,
}

impl TaskAction for IdentifyAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let program = program_for(ANVI_TRNASEQ_TAG, &self.config)?;
            let out_dir = task
                .output("db")?
                .parent()
                .ok_or_else(|| PipelineError::Graph(format!("{} has no output directory", task)))?;
            let input = prepare_input(task.input("fasta")?, &self.config.dirs.identify).await?;

            let args = anvi_trnaseq::arg_generator(input.path(), out_dir, &task.params);
            let result = run_logged(program, &args, task.log_path()?).await;
            drop(input);
            result
        })
    }
}

/// Decompresses gzipped input into a scratch file under `scratch_dir`.
async fn prepare_input(src: &Path, scratch_dir: &Path) -> Result<ToolInput, PipelineError> {
    let src = src.to_path_buf();
    let scratch_dir = scratch_dir.to_path_buf();
    let input = blocking(move || {
        ToolInput::prepare(&src, &scratch_dir).map_err(|e| PipelineError::io(&src, e))
    })
    .await?;
    if let ToolInput::Decompressed(scratch) = &input {
        debug!("Decompressed input to scratch file {}", scratch.path().display());
    }
    Ok(input)
}

struct QcAction;

impl TaskAction for QcAction {
    fn run<'a>(&'a self, task: &'a TaskSpec) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            let inputs = task
                .inputs_for("stats")
                .into_iter()
                .map(|path| {
                    let id = id_from_stats_path(path).ok_or_else(|| {
                        PipelineError::format(path, "cannot derive identifier from file name")
                    })?;
                    Ok((id, path.to_path_buf()))
                })
                .collect::<Result<Vec<_>, PipelineError>>()?;
            let report = task.output("report")?.to_path_buf();
            blocking(move || aggregate(&inputs, &report).map(|_| ())).await
        })
    }
}

pub fn manifest_rule(config: &Arc<PipelineConfig>) -> Rule {
    let layout = Layout::new(config.clone());
    Rule::new(MANIFEST_RULE, Arc::new(ManifestAction))
        .input(persistent("sheet", escape(&config.sample_sheet.to_string_lossy())))
        .output(persistent("manifest", layout.manifest()))
}

/// Every rule of the workflow. `ids` are the identifiers read from the
/// manifest; only the QC report needs them, to list its inputs explicitly.
pub fn build_rules(config: &Arc<PipelineConfig>, ids: &[String]) -> Result<Vec<Rule>, PipelineError> {
    let layout = Layout::new(config.clone());
    let merge = &config.merge;
    let reformat = &config.reformat;
    let gzip_merge = merge.gzip_output;
    let gzip_reformat = reformat.gzip_output;

    let auxiliary = |suffix: &str| -> ArtifactPattern {
        let template = layout.merge_file(suffix);
        let template = if gzip_merge { gz_template(&template) } else { template };
        persistent("auxiliary", template)
    };

    let merge_rule = Rule::new(MERGE_RULE, Arc::new(MergeAction { config: config.clone() }))
        .input(persistent("config", layout.merge_config()))
        .output(temp("merged", layout.merged()).lifecycle_if(!gzip_merge, Lifecycle::Persistent))
        .output_if(gzip_merge, persistent("merged_gz", gz_template(&layout.merged())))
        .output(persistent("stats", layout.stats()))
        .output(auxiliary(FAILED_SUFFIX))
        .output(auxiliary(FAILED_WITH_NS_SUFFIX))
        .output_if(merge.report_r1_prefix, auxiliary(R1_PREFIX_SUFFIX))
        .output_if(merge.report_r2_prefix, auxiliary(R2_PREFIX_SUFFIX))
        .params(iu_merge_pairs::params(merge))
        .threads(merge.threads)
        .log(layout.log(MERGE_RULE));

    let reformat_rule =
        Rule::new(REFORMAT_RULE, Arc::new(ReformatAction { config: config.clone() }))
            .input(persistent("fasta", layout.merged_for_downstream()))
            .output(
                temp("reformatted", layout.reformatted())
                    .lifecycle_if(!gzip_reformat, Lifecycle::Persistent),
            )
            .output_if(
                gzip_reformat,
                persistent("reformatted_gz", gz_template(&layout.reformatted())),
            )
            .output(persistent("report", layout.reformat_report()))
            .params(reformat_fasta::params(reformat))
            .threads(reformat.threads)
            .log(layout.log(REFORMAT_RULE));

    let identify_rule =
        Rule::new(IDENTIFY_RULE, Arc::new(IdentifyAction { config: config.clone() }))
            .input(persistent("fasta", layout.identify_input()))
            .output(persistent("db", layout.trnaseq_db()))
            .output(persistent("unconserved", layout.identify_file(UNCONSERVED_SUPPLEMENT_SUFFIX)))
            .output(persistent("indel", layout.identify_file(INDEL_SUPPLEMENT_SUFFIX)))
            .params(anvi_trnaseq::params(&config.identify))
            .threads(config.identify.threads)
            .log(layout.log(IDENTIFY_RULE));

    let stats_pattern = Pattern::new(layout.stats());
    let stats = ids
        .iter()
        .map(|id| {
            let wildcards = Wildcards::from([(SAMPLE_SPLIT_WILDCARD.to_string(), id.clone())]);
            let path = stats_pattern.expand(&wildcards)?;
            Ok(persistent("stats", escape(&path.to_string_lossy())))
        })
        .collect::<Result<Vec<ArtifactPattern>, PipelineError>>()?;
    let qc_rule = Rule::new(QC_RULE, Arc::new(QcAction))
        .inputs(stats)
        .output(persistent("report", layout.qc_report()));

    Ok(vec![
        manifest_rule(config),
        Rule::new(CONFIG_RULE, Arc::new(ConfigAction { config: config.clone() }))
            .input(ancient("manifest", layout.manifest()))
            .output(persistent("config", layout.merge_config())),
        merge_rule,
        reformat_rule,
        identify_rule,
        qc_rule,
    ])
}

/// What a plain run produces: the QC report, every identification database
/// and, when reformatting is switched on, every reformatted FASTA.
pub fn default_targets(config: &PipelineConfig, ids: &[String]) -> Vec<PathBuf> {
    let mut targets = vec![config.dirs.qc_report()];
    for id in ids {
        let identify = config.dirs.identify.join(id);
        targets.push(identify.join(format!("{}{}", id, TRNASEQ_DB_SUFFIX)));
        if config.reformat.run {
            let reformatted = config.dirs.reformat.join(format!("{}{}", id, REFORMATTED_SUFFIX));
            targets.push(if config.reformat.gzip_output { gz_path(&reformatted) } else { reformatted });
        }
    }
    targets
}

/// Explicit `--target` paths, relative ones taken from the working directory.
pub fn explicit_targets(args: &Arguments, cwd: &Path) -> Vec<PathBuf> {
    args.targets
        .iter()
        .map(|t| {
            let path = PathBuf::from(t);
            if path.is_absolute() { path } else { cwd.join(path) }
        })
        .collect()
}

pub fn plan_options(args: &Arguments) -> PlanOptions {
    PlanOptions {
        force_all: args.force,
        force_rules: args.force_tasks.iter().cloned().collect(),
    }
}

/// Forcing applies to the fan-out phase without rebuilding the manifest a
/// second time.
fn fan_out_options(options: &PlanOptions, rules: &[Rule]) -> PlanOptions {
    if !options.force_all {
        let mut options = options.clone();
        options.force_rules.remove(MANIFEST_RULE);
        return options;
    }
    let force_rules: HashSet<String> = rules
        .iter()
        .map(|r| r.name.clone())
        .filter(|name| name != MANIFEST_RULE)
        .collect();
    PlanOptions {
        force_all: false,
        force_rules,
    }
}

fn check_rule_names(options: &PlanOptions) -> Result<(), PipelineError> {
    let known = [MANIFEST_RULE, CONFIG_RULE, MERGE_RULE, REFORMAT_RULE, IDENTIFY_RULE, QC_RULE];
    for rule in &options.force_rules {
        if !known.contains(&rule.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "Unknown task '{}' for --force-task; expected one of: {}",
                rule,
                known.join(", ")
            )));
        }
    }
    Ok(())
}

/// Run function for the tRNA-seq pipeline
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<(), PipelineError>
pub async fn run(config: Arc<RunConfig>) -> Result<(), PipelineError> {
    let pipeline = config.pipeline.clone();
    let options = plan_options(&config.args);
    check_rule_names(&options)?;
    let executor = Executor::new(config.jobs);
    let dry_run = config.args.dry_run;

    // Phase 1: the manifest, whose rows decide the fan-out
    let manifest_rules = vec![manifest_rule(&pipeline)];
    let manifest_path = pipeline.dirs.manifest();
    let manifest_graph = TaskGraph::resolve(&manifest_rules, &[manifest_path.clone()])?;
    let manifest_plan = plan(&manifest_graph, &options)?;

    let ids = if dry_run && !manifest_plan.is_empty() {
        read_sample_sheet(&pipeline.sample_sheet)?
            .iter()
            .map(|row| row.identifier())
            .collect()
    } else {
        if !manifest_plan.is_empty() {
            manifest_plan.log(&manifest_graph);
            executor.execute(&manifest_graph, &manifest_plan).await?.into_result()?;
        }
        identifiers(&read_manifest(&manifest_path)?)
    };
    if ids.is_empty() {
        return Err(PipelineError::format(&manifest_path, "no sample splits listed"));
    }
    info!("{} sample splits: {}", ids.len(), ids.join(", "));

    // Phase 2: one task per identifier and stage
    let rules = build_rules(&pipeline, &ids)?;
    let targets = if config.args.targets.is_empty() {
        default_targets(&pipeline, &ids)
    } else {
        explicit_targets(&config.args, &config.cwd)
    };
    let graph = TaskGraph::resolve(&rules, &targets)?;
    let options = if dry_run { options } else { fan_out_options(&options, &rules) };
    let fan_out = plan(&graph, &options)?;
    fan_out.log(&graph);

    if dry_run {
        info!("Dry run; nothing was executed.");
        return Ok(());
    }

    let report = executor.execute(&graph, &fan_out).await?;
    report.log_summary();
    report.into_result().map(|_| ())
}
