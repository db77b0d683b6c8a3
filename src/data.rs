//! Scan data files.
//!
//! Files are named `<PREFIX>_<NNNN>.txt`; the sequence number is one past the
//! highest existing number for that prefix, determined once when the file is
//! created. Single-process use is assumed — concurrent writers could race the
//! scan of the directory. The format is a block of `# key:\tvalue` comment
//! lines, a blank line, a tab-separated column header and one row per
//! measurement, appended incrementally so a crash loses at most the in-flight
//! row.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use regex::Regex;

use crate::error::RsmResult;

/// Columns of every scan data file: coordinate, then both counters.
pub const COLUMNS: [&str; 3] = ["x_scale", "counter_1", "counter_2"];

/// Next free sequence number for `prefix` in `dir` (max existing + 1).
pub fn next_sequence(dir: &Path, prefix: &str) -> RsmResult<u32> {
    let pattern = Regex::new(&format!(r"^{}_(\d+)\.txt$", regex::escape(prefix)))
        .map_err(|e| crate::error::RsmError::Settings(e.to_string()))?;

    let mut max = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(caps) = name.to_str().and_then(|n| pattern.captures(n)) {
            if let Ok(num) = caps[1].parse::<u32>() {
                max = max.max(num);
            }
        }
    }
    Ok(max + 1)
}

/// One scan output file, opened for incremental appends.
pub struct ScanFile {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ScanFile {
    /// Create the next file for `prefix` in `dir` and write its header block.
    pub fn create(dir: &Path, prefix: &str, metadata: &[(&str, String)]) -> RsmResult<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
        let sequence = next_sequence(dir, prefix)?;
        let path = dir.join(format!("{prefix}_{sequence:04}.txt"));

        let mut file = File::create(&path)?;
        for (key, value) in metadata {
            writeln!(file, "# {key}:\t{value}")?;
        }
        writeln!(file)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(file);
        writer.write_record(COLUMNS)?;
        writer.flush()?;

        info!("scan data file created at '{}'", path.display());
        Ok(Self { path, writer })
    }

    /// Append one measurement row and flush it to disk.
    pub fn append_row(&mut self, coordinate: f64, counter_1: u32, counter_2: u32) -> RsmResult<()> {
        self.writer.write_record(&[
            format!("{coordinate:.3}"),
            counter_1.to_string(),
            counter_2.to_string(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_sequence_starts_at_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_sequence(dir.path(), "DM").unwrap(), 1);
    }

    #[test]
    fn test_next_sequence_is_max_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DM_0003.txt"), "").unwrap();
        std::fs::write(dir.path().join("DM_0012.txt"), "").unwrap();
        std::fs::write(dir.path().join("EN_0200.txt"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        assert_eq!(next_sequence(dir.path(), "DM").unwrap(), 13);
        assert_eq!(next_sequence(dir.path(), "EN").unwrap(), 201);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let meta = [("scan_type", "en_scan".to_string()), ("exposure", "1 s".to_string())];

        let mut file = ScanFile::create(dir.path(), "EN", &meta).unwrap();
        file.append_row(0.5, 120, 7).unwrap();
        file.append_row(0.6, 150, 9).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# scan_type:\ten_scan");
        assert_eq!(lines[1], "# exposure:\t1 s");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "x_scale\tcounter_1\tcounter_2");
        assert_eq!(lines[4], "0.500\t120\t7");
        assert_eq!(lines[5], "0.600\t150\t9");
    }

    #[test]
    fn test_rows_survive_without_finalize() {
        // Rows are flushed as they are appended; dropping the file without any
        // finalize step must leave them on disk.
        let dir = tempfile::tempdir().unwrap();
        let path;
        {
            let mut file = ScanFile::create(dir.path(), "DM", &[]).unwrap();
            file.append_row(1.0, 1, 1).unwrap();
            path = file.path().to_path_buf();
        }
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("1.000\t1\t1"));
    }
}
