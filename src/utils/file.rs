use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::config::defs::{FASTA_EXTS, GZIP_EXT};

pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// `<path>.gz`
pub fn gz_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(GZIP_EXT);
    PathBuf::from(name)
}

/// Strips a trailing `.gz`, if any.
pub fn strip_gz(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == GZIP_EXT => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

pub fn has_fasta_extension(path: &Path) -> bool {
    strip_gz(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FASTA_EXTS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Compresses `src` into `dst`. With `keep_source == false` the source is
/// removed once the compressed copy is complete.
pub fn gzip_file(src: &Path, dst: &Path, keep_source: bool) -> io::Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create(dst)?);
    let mut encoder = GzEncoder::new(writer, Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?.flush()?;
    if !keep_source {
        fs::remove_file(src)?;
    }
    Ok(())
}

/// Compresses `path` in place, leaving only `<path>.gz`.
pub fn gzip_in_place(path: &Path) -> io::Result<PathBuf> {
    let dst = gz_path(path);
    gzip_file(path, &dst, false)?;
    Ok(dst)
}

/// Decompresses `src` into a scratch file inside `dir`. The scratch file is
/// removed when the returned handle drops, on success and failure alike.
/// Inputs without a FASTA extension get a `.fa` scratch name.
pub fn decompress_to_scratch(src: &Path, dir: &Path) -> io::Result<NamedTempFile> {
    let suffix = match strip_gz(src).extension() {
        Some(ext) if has_fasta_extension(src) => format!(".{}", ext.to_string_lossy()),
        _ => ".fa".to_string(),
    };
    fs::create_dir_all(dir)?;
    let mut scratch = tempfile::Builder::new()
        .prefix(".scratch-")
        .suffix(&suffix)
        .tempfile_in(dir)?;
    {
        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(src)?));
        let mut writer = BufWriter::new(scratch.as_file_mut());
        io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
    }
    Ok(scratch)
}

/// Input handed to an external tool: either the artifact itself or a scratch
/// decompressed copy that lives as long as this value.
pub enum ToolInput {
    Plain(PathBuf),
    Decompressed(NamedTempFile),
}

impl ToolInput {
    pub fn prepare(src: &Path, scratch_dir: &Path) -> io::Result<Self> {
        if is_gzipped(src)? {
            Ok(ToolInput::Decompressed(decompress_to_scratch(src, scratch_dir)?))
        } else {
            Ok(ToolInput::Plain(src.to_path_buf()))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ToolInput::Plain(path) => path,
            ToolInput::Decompressed(tmp) => tmp.path(),
        }
    }
}

/// Last `n` lines of a log file; empty when the log cannot be read.
pub fn log_tail(path: &Path, n: usize) -> String {
    let Ok(content) = fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_gz_path_and_strip() {
        let p = Path::new("out/merge/s1_a_MERGED");
        assert_eq!(gz_path(p), PathBuf::from("out/merge/s1_a_MERGED.gz"));
        assert_eq!(strip_gz(&gz_path(p)), p.to_path_buf());
        assert_eq!(strip_gz(Path::new("x.fa")), PathBuf::from("x.fa"));
    }

    #[test]
    fn test_has_fasta_extension() {
        assert!(has_fasta_extension(Path::new("ref.fa")));
        assert!(has_fasta_extension(Path::new("ref.FASTA.gz")));
        assert!(!has_fasta_extension(Path::new("reads.fq.gz")));
    }

    #[test]
    fn test_gzip_in_place_roundtrip() -> io::Result<()> {
        let dir = tempdir()?;
        let src = dir.path().join("reads_FAILED");
        fs::write(&src, ">r1\nACGT\n")?;
        let gz = gzip_in_place(&src)?;
        assert!(!src.exists());
        assert!(is_gzipped(&gz)?);

        let mut text = String::new();
        MultiGzDecoder::new(File::open(&gz)?).read_to_string(&mut text)?;
        assert_eq!(text, ">r1\nACGT\n");
        Ok(())
    }

    #[test]
    fn test_empty_file_is_not_gzipped() -> io::Result<()> {
        let dir = tempdir()?;
        let empty = dir.path().join("empty");
        fs::write(&empty, b"")?;
        assert!(!is_gzipped(&empty)?);
        Ok(())
    }

    #[test]
    fn test_scratch_removed_on_drop() -> io::Result<()> {
        let dir = tempdir()?;
        let plain = dir.path().join("ref.fa");
        fs::write(&plain, ">t\nGGCC\n")?;
        let gz = gz_path(&plain);
        gzip_file(&plain, &gz, false)?;

        let scratch_path = {
            let input = ToolInput::prepare(&gz, dir.path())?;
            let path = input.path().to_path_buf();
            assert_eq!(fs::read_to_string(&path)?, ">t\nGGCC\n");
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("fa"));
            path
        };
        assert!(!scratch_path.exists());
        Ok(())
    }

    #[test]
    fn test_scratch_name_for_unsuffixed_input() -> io::Result<()> {
        let dir = tempdir()?;
        let merged = dir.path().join("s1_a_MERGED");
        fs::write(&merged, ">r\nACGT\n")?;
        let gz = gzip_in_place(&merged)?;
        let scratch = decompress_to_scratch(&gz, dir.path())?;
        assert!(scratch.path().to_string_lossy().ends_with(".fa"));
        Ok(())
    }

    #[test]
    fn test_log_tail() -> io::Result<()> {
        let dir = tempdir()?;
        let log = dir.path().join("task.log");
        fs::write(&log, "a\nb\nc\nd\n")?;
        assert_eq!(log_tail(&log, 2), "c\nd");
        assert_eq!(log_tail(&dir.path().join("missing.log"), 2), "");
        Ok(())
    }
}
