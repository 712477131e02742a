use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "trnaseq-pipelines", version, about = "tRNA-seq read merging, reformatting and identification workflow")]
pub struct Arguments {

    #[arg(short = 's', long = "samples", required_unless_present = "print_config", help = "Tab-separated sample sheet with sample, split, r1 and r2 columns.")]
    pub samples: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named 'trnaseq_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 'c', long = "config", help = "Optional JSON workflow configuration; command-line flags override it.")]
    pub config: Option<String>,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'q', long = "quiet", action, conflicts_with = "verbose")]
    pub quiet: bool,

    #[arg(short = 'j', long = "jobs", help = "Maximum number of tasks running at once. Defaults to the physical core count.")]
    pub jobs: Option<usize>,

    #[arg(long, default_value_t = false, help = "Include the reference reformatting stage in the targets.")]
    pub reformat: bool,

    #[arg(long, default_value_t = false)]
    pub gzip_merge_output: bool,

    #[arg(long, default_value_t = false)]
    pub gzip_reformat_output: bool,

    #[arg(long, help = "Regular expression matching the adapter prefix of R1 reads.")]
    pub r1_prefix: Option<String>,

    #[arg(long, help = "Regular expression matching the adapter prefix of R2 reads.")]
    pub r2_prefix: Option<String>,

    #[arg(long = "target", help = "Explicit target file; may be repeated. Replaces the default targets.")]
    pub targets: Vec<String>,

    #[arg(long, default_value_t = false, help = "Re-run every task regardless of artifact state.")]
    pub force: bool,

    #[arg(long = "force-task", help = "Re-run every instance of the named rule; may be repeated.")]
    pub force_tasks: Vec<String>,

    #[arg(short = 'n', long, default_value_t = false, help = "Print the execution plan without running anything.")]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub skip_version_check: bool,

    #[clap(long, help = "Print the default workflow configuration as JSON and exit.")]
    pub print_config: bool,
}
