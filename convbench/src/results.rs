//! Tab-separated result files.
//!
//! Each line of a `.dat` file is one measurement, `<measure>\t<value>`,
//! where `measure` is the filter width and `value` the mean time in
//! seconds. Files are append-only while open.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{ConvBenchError, Result};

/// One parsed line of a result file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResultRecord {
    /// Filter width the measurement was taken at.
    pub measure: usize,
    /// Mean seconds per convolution.
    pub value: f64,
}

/// Writer for one result file.
///
/// Dropping the sink flushes on a best-effort basis; call
/// [`close`][Self::close] to find out whether the data reached the disk.
#[derive(Debug)]
pub struct ResultSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ResultSink {
    /// Remove `dir` with everything in it, then create it again empty.
    ///
    /// # Errors
    /// [`ConvBenchError::Io`] if removal or creation fails.
    pub fn clear_directory(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConvBenchError::io(dir, e)),
        }
        fs::create_dir_all(dir).map_err(|e| ConvBenchError::io(dir, e))?;
        tracing::debug!(dir = %dir.display(), "cleared result directory");
        Ok(())
    }

    /// Create (or truncate) the file at `path`.
    ///
    /// # Errors
    /// [`ConvBenchError::Io`] if the file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| ConvBenchError::io(&path, e))?;
        Ok(ResultSink {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `<measure>\t<value>` line.
    ///
    /// # Errors
    /// [`ConvBenchError::Io`] if the write fails.
    pub fn add(&mut self, measure: usize, value: f64) -> Result<()> {
        writeln!(self.writer, "{}\t{}", measure, value)
            .map_err(|e| ConvBenchError::io(&self.path, e))
    }

    /// Flush every line written so far and sync the file to disk.
    ///
    /// # Errors
    /// [`ConvBenchError::Io`] if flushing or syncing fails.
    pub fn close(mut self) -> Result<()> {
        self.writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all())
            .map_err(|e| ConvBenchError::io(&self.path, e))
    }
}

/// Parse one `<measure>\t<value>` line.
#[must_use]
pub fn parse_record(line: &str) -> Option<ResultRecord> {
    let (measure, value) = line.split_once('\t')?;
    Some(ResultRecord {
        measure: measure.trim().parse().ok()?,
        value: value.trim().parse().ok()?,
    })
}

/// Read every record of a result file, in file order.
///
/// # Errors
/// [`ConvBenchError::Io`] if the file cannot be read or a non-empty line is
/// malformed.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConvBenchError::io(path, e))?;

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ConvBenchError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_record(&line).ok_or_else(|| {
            ConvBenchError::io(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: malformed record {:?}", number + 1, line),
                ),
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_writes_tab_separated_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu_4_threads.dat");

        let mut sink = ResultSink::open(&path).unwrap();
        sink.add(2, 0.5).unwrap();
        sink.add(4, 0.125).unwrap();
        sink.close().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "2\t0.5\n4\t0.125\n");
    }

    #[test]
    fn test_read_back_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.dat");

        let mut sink = ResultSink::open(&path).unwrap();
        sink.add(8, 1.5e-3).unwrap();
        sink.add(16, 0.25).unwrap();
        sink.close().unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(
            records,
            vec![
                ResultRecord {
                    measure: 8,
                    value: 1.5e-3
                },
                ResultRecord {
                    measure: 16,
                    value: 0.25
                },
            ]
        );
    }

    #[test]
    fn test_clear_directory_removes_contents() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("stale.dat"), "1\t1\n").unwrap();

        ResultSink::clear_directory(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        // Missing directories are simply created.
        let fresh = root.path().join("fresh");
        ResultSink::clear_directory(&fresh).unwrap();
        assert!(fresh.is_dir());
    }

    #[test]
    fn test_open_in_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let err = ResultSink::open(root.path().join("missing").join("x.dat")).unwrap_err();
        assert!(matches!(err, ConvBenchError::Io { .. }));
    }

    #[test]
    fn test_parse_record() {
        assert_eq!(
            parse_record("32\t0.001"),
            Some(ResultRecord {
                measure: 32,
                value: 0.001
            })
        );
        assert_eq!(parse_record("32 0.001"), None);
        assert_eq!(parse_record("x\t1"), None);
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dat");
        fs::write(&path, "2\t0.5\nnot a record\n").unwrap();
        assert!(read_records(&path).is_err());
    }
}
