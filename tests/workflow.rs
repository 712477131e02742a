//! End-to-end runs of the workflow with shell-script stand-ins for the
//! external tools.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tempfile::{tempdir, TempDir};

use trnaseq_pipelines::cli::Arguments;
use trnaseq_pipelines::config::defs::{PipelineError, RunConfig};
use trnaseq_pipelines::config::workflow::{PipelineConfig, WorkflowConfig};
use trnaseq_pipelines::pipelines::trnaseq;

const FAKE_MERGE: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo "fake-merge 1.0"; exit 0; fi
ini="$1"
name=$(sed -n 's/^project_name = //p' "$ini")
out=$(sed -n 's/^output_directory = //p' "$ini")
case "$name" in
  *fail*) echo "cannot merge $name" >&2; exit 2;;
esac
printf '>read_1\nACGTACGT\n' > "$out/${name}_MERGED"
printf 'Number of pairs analyzed ...\t10\nMerged total ...\t8\n\nfree text\n' > "$out/${name}_STATS"
printf '>bad\nAAAA\n' > "$out/${name}_FAILED"
: > "$out/${name}_FAILED_WITH_Ns"
echo "merged $name"
"#;

const FAKE_REFORMAT: &str = r#"#!/bin/sh
in="$1"; shift
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2;;
    --report-file) report="$2"; shift 2;;
    *) shift;;
  esac
done
grep -q ACGT "$in" || { echo "unreadable input $in" >&2; exit 5; }
cp "$in" "$out"
printf 'read_1\tc_000000000001\n' > "$report"
"#;

const FAKE_IDENTIFY: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -f) fasta="$2"; shift 2;;
    -o) out="$2"; shift 2;;
    -S) id="$2"; shift 2;;
    *) shift;;
  esac
done
grep -q ACGT "$fasta" || { echo "unreadable input $fasta" >&2; exit 4; }
mkdir -p "$out"
echo "$id" > "$out/$id-TRNASEQ.db"
: > "$out/$id-UNCONSERVED_SUPPLEMENT.txt"
: > "$out/$id-INDEL_SUPPLEMENT.txt"
"#;

struct Fixture {
    dir: TempDir,
    workflow: WorkflowConfig,
}

impl Fixture {
    fn new(rows: &[(&str, &str)]) -> Result<Self> {
        let dir = tempdir()?;
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin)?;

        let mut workflow = WorkflowConfig::default();
        workflow.tools.merge = write_script(&bin, "merge", FAKE_MERGE)?;
        workflow.tools.reformat = write_script(&bin, "reformat", FAKE_REFORMAT)?;
        workflow.tools.identify = write_script(&bin, "identify", FAKE_IDENTIFY)?;
        workflow.identify.threads = 1;

        let mut sheet = String::from("sample\tsplit\tr1\tr2\n");
        for (sample, split) in rows {
            for read in ["R1", "R2"] {
                let name = format!("{}_{}_{}.fq", sample, split, read);
                fs::write(dir.path().join(&name), "@r\nACGT\n+\nIIII\n")?;
            }
            sheet.push_str(&format!(
                "{s}\t{p}\t{s}_{p}_R1.fq\t{s}_{p}_R2.fq\n",
                s = sample,
                p = split
            ));
        }
        fs::write(dir.path().join("samples.tsv"), sheet)?;

        Ok(Fixture { dir, workflow })
    }

    fn out(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn run_config(&self, args: Arguments) -> Result<Arc<RunConfig>> {
        let pipeline = PipelineConfig::new(
            self.dir.path().join("samples.tsv"),
            &self.out(),
            self.workflow.clone(),
        )?;
        Ok(Arc::new(RunConfig {
            cwd: self.dir.path().to_path_buf(),
            out_dir: self.out(),
            args,
            pipeline: Arc::new(pipeline),
            jobs: 2,
        }))
    }

    async fn run(&self, args: Arguments) -> Result<(), PipelineError> {
        let config = self.run_config(args).map_err(PipelineError::Other)?;
        trnaseq::run(config).await
    }
}

fn write_script(bin: &Path, name: &str, body: &str) -> Result<String> {
    let path = bin.join(name);
    fs::write(&path, body)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    Ok(path.to_string_lossy().into_owned())
}

fn scratch_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            found.extend(scratch_files(&path)?);
        } else if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with(".scratch-"))
        {
            found.push(path);
        }
    }
    Ok(found)
}

#[tokio::test]
async fn test_full_run_produces_report() -> Result<()> {
    let fixture = Fixture::new(&[("sample1", "demethylase"), ("sample1", "untreated")])?;
    fixture.run(Arguments::default()).await?;

    let out = fixture.out();
    let manifest = fs::read_to_string(out.join("manifest.tsv"))?;
    let ids: Vec<&str> = manifest
        .lines()
        .skip(1)
        .filter_map(|l| l.split('\t').next())
        .collect();
    assert_eq!(ids, vec!["sample1_demethylase", "sample1_untreated"]);

    let ini = fs::read_to_string(out.join("configs/sample1_untreated.ini"))?;
    assert!(ini.contains("project_name = sample1_untreated"));

    assert!(out.join("identify/sample1_untreated/sample1_untreated-TRNASEQ.db").exists());
    assert!(out.join("merge/sample1_untreated_MERGED").exists());
    assert!(out.join("logs/merge_pairs_sample1_untreated.log").exists());
    assert_eq!(
        fs::read_to_string(out.join("qc_report.txt"))?,
        "sample_split\tNumber of pairs analyzed\tMerged total\n\
         sample1_demethylase\t10\t8\n\
         sample1_untreated\t10\t8\n"
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_split_does_not_block_other_split() -> Result<()> {
    let fixture = Fixture::new(&[("s1", "ok"), ("s2", "fail")])?;
    let err = fixture.run(Arguments::default()).await.unwrap_err();
    assert!(err.to_string().contains("merge_pairs[s2_fail]"), "{}", err);

    let out = fixture.out();
    assert!(out.join("identify/s1_ok/s1_ok-TRNASEQ.db").exists());
    assert!(!out.join("identify/s2_fail").exists());
    assert!(!out.join("merge/s2_fail_STATS").exists());
    // the report needs every split
    assert!(!out.join("qc_report.txt").exists());

    let log = fs::read_to_string(out.join("logs/merge_pairs_s2_fail.log"))?;
    assert!(log.contains("cannot merge s2_fail"));
    Ok(())
}

#[tokio::test]
async fn test_compressed_merge_output_is_decompressed_for_identification() -> Result<()> {
    let mut fixture = Fixture::new(&[("s1", "a"), ("s1", "b")])?;
    fixture.workflow.merge.gzip_output = true;
    fixture.run(Arguments::default()).await?;

    let merge = fixture.out().join("merge");
    assert!(merge.join("s1_a_MERGED.gz").exists());
    assert!(!merge.join("s1_a_MERGED").exists());
    assert!(merge.join("s1_a_FAILED.gz").exists());
    assert!(!merge.join("s1_a_FAILED").exists());
    assert!(merge.join("s1_a_STATS").exists());

    assert!(fixture.out().join("identify/s1_b/s1_b-TRNASEQ.db").exists());
    assert!(scratch_files(&fixture.out())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_reformat_with_recompression() -> Result<()> {
    let mut fixture = Fixture::new(&[("s1", "a")])?;
    fixture.workflow.merge.gzip_output = true;
    fixture.workflow.reformat.run = true;
    fixture.workflow.reformat.gzip_output = true;
    fixture.run(Arguments::default()).await?;

    let reformat = fixture.out().join("reformat");
    assert!(reformat.join("s1_a-reformatted.fa.gz").exists());
    assert!(!reformat.join("s1_a-reformatted.fa").exists());
    assert!(reformat.join("s1_a-reformat-report.txt").exists());
    assert!(fixture.out().join("identify/s1_a/s1_a-TRNASEQ.db").exists());
    assert!(scratch_files(&fixture.out())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_scratch_removed_when_tool_fails() -> Result<()> {
    let mut fixture = Fixture::new(&[("s1", "a")])?;
    fixture.workflow.merge.gzip_output = true;
    fixture.workflow.tools.identify =
        write_script(&fixture.dir.path().join("bin"), "broken", "#!/bin/sh\nexit 9\n")?;
    let err = fixture.run(Arguments::default()).await.unwrap_err();
    assert!(err.to_string().contains("identify_trna[s1_a]"));
    assert!(scratch_files(&fixture.out())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_scratch_removed_when_reformat_fails_on_compressed_input() -> Result<()> {
    let mut fixture = Fixture::new(&[("s1", "a")])?;
    fixture.workflow.merge.gzip_output = true;
    fixture.workflow.reformat.run = true;
    fixture.workflow.reformat.gzip_output = false;
    fixture.workflow.tools.reformat =
        write_script(&fixture.dir.path().join("bin"), "broken", "#!/bin/sh\nexit 7\n")?;
    let err = fixture.run(Arguments::default()).await.unwrap_err();
    assert!(err.to_string().contains("reformat_fasta[s1_a]"), "{}", err);

    assert!(fixture.out().join("merge/s1_a_MERGED.gz").exists());
    assert!(!fixture.out().join("reformat/s1_a-reformatted.fa").exists());
    assert!(scratch_files(&fixture.out())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unknown_target_fails() -> Result<()> {
    let fixture = Fixture::new(&[("s1", "a")])?;
    let args = Arguments {
        targets: vec!["out/merge/s1_a_STATZ".to_string()],
        ..Default::default()
    };
    let err = fixture.run(args).await.unwrap_err();
    assert!(matches!(err, PipelineError::Graph(_)), "{}", err);
    assert!(err.to_string().contains("s1_a_STATZ"));
    assert!(!fixture.out().join("merge").exists());
    Ok(())
}

#[tokio::test]
async fn test_requested_temporary_target_survives() -> Result<()> {
    let mut fixture = Fixture::new(&[("s1", "a")])?;
    fixture.workflow.merge.gzip_output = true;
    let args = || Arguments {
        targets: vec!["out/merge/s1_a_MERGED".to_string()],
        ..Default::default()
    };
    fixture.run(args()).await?;
    let merged = fixture.out().join("merge/s1_a_MERGED");
    assert!(merged.exists());

    // rebuilt when it goes missing
    fs::remove_file(&merged)?;
    fixture.run(args()).await?;
    assert!(merged.exists());
    Ok(())
}

#[tokio::test]
async fn test_rerun_is_up_to_date_and_report_identical() -> Result<()> {
    let fixture = Fixture::new(&[("s1", "a"), ("s2", "b")])?;
    fixture.run(Arguments::default()).await?;
    let report = fixture.out().join("qc_report.txt");
    let first = fs::read(&report)?;
    let db = fixture.out().join("identify/s1_a/s1_a-TRNASEQ.db");
    let db_mtime = fs::metadata(&db)?.modified()?;

    fixture.run(Arguments::default()).await?;
    assert_eq!(fs::metadata(&db)?.modified()?, db_mtime);

    let forced = Arguments {
        force_tasks: vec!["qc_report".to_string()],
        ..Default::default()
    };
    fixture.run(forced).await?;
    assert_eq!(fs::read(&report)?, first);
    assert_eq!(fs::metadata(&db)?.modified()?, db_mtime);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_touches_nothing() -> Result<()> {
    let fixture = Fixture::new(&[("s1", "a")])?;
    let args = Arguments {
        dry_run: true,
        ..Default::default()
    };
    fixture.run(args).await?;
    assert!(!fixture.out().join("manifest.tsv").exists());
    assert!(!fixture.out().join("merge").exists());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_identifiers_stop_the_run() -> Result<()> {
    let fixture = Fixture::new(&[("s1", "a"), ("s1", "a")])?;
    let err = fixture.run(Arguments::default()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Format { .. }), "{}", err);
    assert!(!fixture.out().join("manifest.tsv").exists());
    Ok(())
}
