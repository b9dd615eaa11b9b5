use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::configuration::types::TimestampFormat;
use crate::data_capture::row_codec::render_record;
use crate::data_capture::types::OutputRow;
use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RowSink;

/// CSV sink backed by a single append-only file.
///
/// No header is ever written and records may have different widths. The file
/// is reopened in append mode for every row, so external rotation or
/// inspection never sees a stale handle.
pub struct FileStorage {
    path: PathBuf,
    timestamp_format: TimestampFormat,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Prepares the sink at `path`, creating the file (and its parent
    /// directories) when missing. Existing content is kept.
    pub fn open<P: AsRef<Path>>(
        path: P,
        timestamp_format: TimestampFormat,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create sink dir {}: {}", parent.display(), e);
                StorageError::OpenFailed(e)
            })?;
        }

        let existed = path.exists();
        Self::open_append(&path)?;
        if existed {
            info!("Appending to existing sink {}", path.display());
        } else {
            info!("Created sink {}", path.display());
        }

        Ok(Self {
            path,
            timestamp_format,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> Result<File, StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                error!("Open append failed {}: {}", path.display(), e);
                StorageError::OpenFailed(e)
            })
    }

    fn encode(&self, row: &OutputRow) -> Result<Vec<u8>, StorageError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_record(render_record(row, self.timestamp_format))
            .map_err(|e| StorageError::EncodeFailed(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| StorageError::EncodeFailed(e.to_string()))
    }
}

/// Append target that can drop bytes past a given length.
trait RowTarget: Write + Seek {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl RowTarget for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes `line` at the end of `target`, or nothing at all.
fn append_whole_line<T: RowTarget>(target: &mut T, line: &[u8]) -> io::Result<()> {
    let start = target.seek(SeekFrom::End(0))?;

    if let Err(e) = target.write_all(line).and_then(|_| target.flush()) {
        if let Err(te) = target.truncate_to(start) {
            warn!("Could not roll back partial row: {}", te);
        }
        return Err(e);
    }
    Ok(())
}

impl RowSink for FileStorage {
    fn append(&self, row: &OutputRow) -> Result<(), StorageError> {
        let line = self.encode(row)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut f = Self::open_append(&self.path)?;

        if let Err(e) = append_whole_line(&mut f, &line) {
            error!("Write failed {}: {}", self.path.display(), e);
            return Err(StorageError::WriteFailed(e));
        }

        debug!(
            "Appended {} column(s), {} byte(s) to {}",
            row.width(),
            line.len(),
            self.path.display()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::decoder::decode_payload;
    use crate::data_capture::row_codec::encode_row;
    use crate::data_capture::types::InboundMessage;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn row(payload: &[u8]) -> OutputRow {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        encode_row(at, decode_payload(payload).unwrap())
    }

    #[test]
    fn creates_file_without_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        let storage = FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        assert_eq!(storage.describe(), path.display().to_string());
    }

    #[test]
    fn never_truncates_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "1.0,1,2,3\n").unwrap();

        let storage = FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap();
        storage.append(&row(br#"{"channel": 4}"#)).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1.0,1,2,3\n1700000000.000000,4,,\n"
        );
    }

    #[test]
    fn writes_variable_width_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let storage = FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap();

        storage
            .append(&row(
                br#"{"channel": 37, "rssi": -62, "sequence": 5, "samples": [1.0, 2.0, 3.0]}"#,
            ))
            .unwrap();
        storage.append(&row(b"{}")).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1700000000.000000,37,-62,5,1.0,2.0,3.0",
                "1700000000.000000,,,",
            ]
        );
    }

    #[test]
    fn quotes_fields_with_commas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let storage = FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap();
        storage
            .append(&row(br#"{"channel": "a,b", "rssi": [1, 2]}"#))
            .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1700000000.000000,\"a,b\",\"[1,2]\",\n"
        );
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let storage = Arc::new(FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap());

        let samples: Vec<serde_json::Number> = (0..512u64).map(Into::into).collect();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                let samples = samples.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let msg = InboundMessage {
                            channel: Some(serde_json::json!(t)),
                            sequence: Some(serde_json::json!(i)),
                            samples: samples.clone(),
                            ..Default::default()
                        };
                        storage.append(&encode_row(Utc::now(), msg)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.split(',').count() == 4 + 512));
    }

    // Lets `budget` bytes through to the real file, then fails.
    struct ShortWriteFile {
        file: File,
        budget: usize,
    }

    impl Write for ShortWriteFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let n = self.file.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl Seek for ShortWriteFile {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.file.seek(pos)
        }
    }

    impl RowTarget for ShortWriteFile {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.file.set_len(len)
        }
    }

    #[test]
    fn failed_write_leaves_no_partial_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let storage = FileStorage::open(&path, TimestampFormat::EpochSeconds).unwrap();
        storage.append(&row(br#"{"channel": 1}"#)).unwrap();
        storage.append(&row(br#"{"channel": 2}"#)).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let line = storage
            .encode(&row(br#"{"channel": 3, "samples": [1.0, 2.0]}"#))
            .unwrap();
        let mut target = ShortWriteFile {
            file: FileStorage::open_append(&path).unwrap(),
            budget: 7,
        };
        let err = append_whole_line(&mut target, &line).unwrap_err();
        assert_eq!(err.to_string(), "no space left on device");
        // part of the row did reach the file before the failure
        assert_eq!(target.budget, 0);

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(
            before,
            "1700000000.000000,1,,\n1700000000.000000,2,,\n"
        );

        storage.append(&row(br#"{"channel": 4}"#)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().last(), Some("1700000000.000000,4,,"));
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn open_fails_on_directory() {
        let dir = TempDir::new().unwrap();
        let err = FileStorage::open(dir.path(), TimestampFormat::EpochSeconds)
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::OpenFailed(_)));
    }
}
