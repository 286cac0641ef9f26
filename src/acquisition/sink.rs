//! Persistence of a run: incremental row-major text plus a final column-major CSV.
//!
//! # File Layout
//!
//! Row-major (`<stamp>_FROG.txt`, tab-separated), written one row per step
//! and flushed immediately, so an interrupted run leaves a valid prefix:
//!
//! ```text
//! #delay/fs  <wl_0>  <wl_1> ...  max_intensity  timestamp
//! 0.00       <i_0>   <i_1>  ...  <max>          2025/01/31 12:00:00.123
//! ```
//!
//! Column-major (`<stamp>_FROG.csv`, comma-separated), written once when the
//! run ends, with one column per recorded delay:
//!
//! ```text
//! Wavelength[nm],0.00,6.67,...
//! <wl_0>,<i_0 at 0.00>,<i_0 at 6.67>,...
//! ```
//!
//! Precision: delays 2 decimals, wavelengths and intensities 4 decimals.

use super::dataset::{Dataset, SpectralFrame, WavelengthAxis};
use super::report::{RunSummary, SinkArtifacts};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File stamp shared by every artifact of a run.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Capture timestamp written in the last row-major column.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// First header cell of the row-major file.
pub const ROW_MAJOR_DELAY_LABEL: &str = "#delay/fs";

/// First header cell of the column-major file.
pub const COLUMN_MAJOR_WAVELENGTH_LABEL: &str = "Wavelength[nm]";

fn fmt_delay(value: f64) -> String {
    format!("{value:.2}")
}

fn fmt_value(value: f64) -> String {
    format!("{value:.4}")
}

/// Destination for the data of one run.
///
/// Call order: `begin` once, `append` once per frame, `finish` once. `finish`
/// must close every destination even when it returns an error.
#[async_trait]
pub trait DatasetSink: Send {
    /// Open the destinations and write what is known before the first frame.
    async fn begin(&mut self, axis: &WavelengthAxis) -> AppResult<()>;

    /// Persist one frame as soon as it is recorded.
    async fn append(&mut self, frame: &SpectralFrame) -> AppResult<()>;

    /// Write the wavelength-major representation and close everything.
    async fn finish(&mut self, dataset: &Dataset, wavelength_major: &[Vec<f64>]) -> AppResult<()>;

    /// Persist the run summary. Sinks without a summary file ignore it.
    async fn write_summary(&mut self, _summary: &RunSummary) -> AppResult<()> {
        Ok(())
    }

    /// Paths written so far.
    fn artifacts(&self) -> SinkArtifacts;
}

/// Writes the row-major, column-major and summary files into one directory.
pub struct TextFileSink {
    dir: PathBuf,
    stamp: String,
    row_major: Option<csv::Writer<File>>,
    column_major: Option<csv::Writer<File>>,
    artifacts: SinkArtifacts,
}

impl TextFileSink {
    /// A sink stamped with the current local time.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_stamp(dir, Local::now().format(STAMP_FORMAT).to_string())
    }

    /// A sink with an explicit file stamp.
    pub fn with_stamp(dir: impl Into<PathBuf>, stamp: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stamp: stamp.into(),
            row_major: None,
            column_major: None,
            artifacts: SinkArtifacts::default(),
        }
    }

    /// Stamp used in every file name.
    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    fn path_for(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}_FROG.{extension}", self.stamp))
    }

    /// Create `path`, refusing to replace an earlier run's file.
    fn create_new(path: &Path) -> AppResult<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => DaqError::Storage(format!(
                    "'{}' already exists; not overwriting it",
                    path.display()
                )),
                _ => DaqError::Storage(format!("Failed to create '{}': {e}", path.display())),
            })
    }

    fn open(path: &Path, delimiter: u8) -> AppResult<csv::Writer<File>> {
        let file = Self::create_new(path)?;
        Ok(csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(file))
    }
}

#[async_trait]
impl DatasetSink for TextFileSink {
    async fn begin(&mut self, axis: &WavelengthAxis) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            DaqError::Storage(format!("Failed to create '{}': {e}", self.dir.display()))
        })?;

        let row_path = self.path_for("txt");
        let column_path = self.path_for("csv");
        if column_path.exists() {
            return Err(DaqError::Storage(format!(
                "'{}' already exists; not overwriting it",
                column_path.display()
            )));
        }

        let mut row = Self::open(&row_path, b'\t')?;
        let mut header = Vec::with_capacity(axis.len() + 3);
        header.push(ROW_MAJOR_DELAY_LABEL.to_string());
        header.extend(axis.values().iter().map(|&wl| fmt_value(wl)));
        header.push("max_intensity".to_string());
        header.push("timestamp".to_string());
        row.write_record(&header)?;
        row.flush()?;
        self.row_major = Some(row);
        self.artifacts.row_major = Some(row_path.clone());

        // Header depends on the delays actually recorded, so it is written at the end
        self.column_major = Some(Self::open(&column_path, b',')?);
        self.artifacts.column_major = Some(column_path.clone());

        tracing::info!(
            row_major = %row_path.display(),
            column_major = %column_path.display(),
            "Measurement data files opened"
        );
        Ok(())
    }

    async fn append(&mut self, frame: &SpectralFrame) -> AppResult<()> {
        let writer = self
            .row_major
            .as_mut()
            .ok_or_else(|| DaqError::Storage("row-major file is not open".to_string()))?;

        let mut record = Vec::with_capacity(frame.intensities.len() + 3);
        record.push(fmt_delay(frame.delay_fs));
        record.extend(frame.intensities.iter().map(|&v| fmt_value(v)));
        record.push(fmt_value(frame.max_intensity));
        record.push(frame.captured_at.format(TIMESTAMP_FORMAT).to_string());
        writer.write_record(&record)?;
        writer.flush()?;
        Ok(())
    }

    async fn finish(&mut self, dataset: &Dataset, wavelength_major: &[Vec<f64>]) -> AppResult<()> {
        let row = self.row_major.take();
        let column = self.column_major.take();

        if let Some(mut row) = row {
            row.flush()?;
        }
        let mut column = column
            .ok_or_else(|| DaqError::Storage("column-major file is not open".to_string()))?;

        let mut header = Vec::with_capacity(dataset.len() + 1);
        header.push(COLUMN_MAJOR_WAVELENGTH_LABEL.to_string());
        header.extend(dataset.delays().into_iter().map(fmt_delay));
        column.write_record(&header)?;

        if !dataset.is_empty() {
            for (wl, values) in dataset.axis().values().iter().zip(wavelength_major) {
                let mut record = Vec::with_capacity(values.len() + 1);
                record.push(fmt_value(*wl));
                record.extend(values.iter().map(|&v| fmt_value(v)));
                column.write_record(&record)?;
            }
        }
        column.flush()?;

        tracing::info!(frames = dataset.len(), "Measurement data files closed");
        Ok(())
    }

    async fn write_summary(&mut self, summary: &RunSummary) -> AppResult<()> {
        let path = self.path_for("json");
        let file = Self::create_new(&path)?;
        serde_json::to_writer_pretty(file, summary)?;
        self.artifacts.summary = Some(path);
        Ok(())
    }

    fn artifacts(&self) -> SinkArtifacts {
        self.artifacts.clone()
    }
}

/// Contents of a row-major file.
#[derive(Debug, Clone, PartialEq)]
pub struct RowMajorTable {
    /// Header axis in nm.
    pub wavelengths: Vec<f64>,
    /// Delay of each row in fs.
    pub delays: Vec<f64>,
    /// One row per delay.
    pub intensities: Vec<Vec<f64>>,
    /// Peak of each row as written.
    pub max_intensity: Vec<f64>,
    /// Capture time of each row, unparsed.
    pub timestamps: Vec<String>,
}

impl RowMajorTable {
    /// Wavelength-major copy of `intensities`.
    pub fn transpose(&self) -> Vec<Vec<f64>> {
        (0..self.wavelengths.len())
            .map(|w| self.intensities.iter().map(|row| row[w]).collect())
            .collect()
    }
}

/// Contents of a column-major file.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMajorTable {
    /// Header labels in fs.
    pub delays: Vec<f64>,
    /// First column, nm.
    pub wavelengths: Vec<f64>,
    /// One row per wavelength, one value per delay.
    pub intensities: Vec<Vec<f64>>,
}

fn parse_cell(cell: &str, path: &Path, line: u64) -> AppResult<f64> {
    cell.trim().parse::<f64>().map_err(|_| {
        DaqError::Storage(format!(
            "{}:{line}: '{cell}' is not a number",
            path.display()
        ))
    })
}

fn record_line(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

/// Parse a row-major file written by [`TextFileSink`].
pub fn read_row_major(path: impl AsRef<Path>) -> AppResult<RowMajorTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)?;

    let header = reader.headers()?.clone();
    if header.len() < 3 || header.get(0) != Some(ROW_MAJOR_DELAY_LABEL) {
        return Err(DaqError::Storage(format!(
            "{}: not a row-major FROG file",
            path.display()
        )));
    }
    let n = header.len() - 3;
    let wavelengths = header
        .iter()
        .skip(1)
        .take(n)
        .map(|cell| parse_cell(cell, path, 1))
        .collect::<AppResult<Vec<_>>>()?;

    let mut table = RowMajorTable {
        wavelengths,
        delays: Vec::new(),
        intensities: Vec::new(),
        max_intensity: Vec::new(),
        timestamps: Vec::new(),
    };
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        table.delays.push(parse_cell(&record[0], path, line)?);
        table.intensities.push(
            record
                .iter()
                .skip(1)
                .take(n)
                .map(|cell| parse_cell(cell, path, line))
                .collect::<AppResult<Vec<_>>>()?,
        );
        table.max_intensity.push(parse_cell(&record[n + 1], path, line)?);
        table.timestamps.push(record[n + 2].to_string());
    }
    Ok(table)
}

/// Parse a column-major file written by [`TextFileSink`].
pub fn read_column_major(path: impl AsRef<Path>) -> AppResult<ColumnMajorTable> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .from_path(path)?;

    let header = reader.headers()?.clone();
    if header.get(0) != Some(COLUMN_MAJOR_WAVELENGTH_LABEL) {
        return Err(DaqError::Storage(format!(
            "{}: not a column-major FROG file",
            path.display()
        )));
    }
    let delays = header
        .iter()
        .skip(1)
        .map(|cell| parse_cell(cell, path, 1))
        .collect::<AppResult<Vec<_>>>()?;

    let mut wavelengths = Vec::new();
    let mut intensities = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        wavelengths.push(parse_cell(&record[0], path, line)?);
        intensities.push(
            record
                .iter()
                .skip(1)
                .map(|cell| parse_cell(cell, path, line))
                .collect::<AppResult<Vec<_>>>()?,
        );
    }
    Ok(ColumnMajorTable {
        delays,
        wavelengths,
        intensities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn dataset_with(frames: &[Vec<f64>]) -> Dataset {
        let axis = Arc::new(WavelengthAxis::new(vec![399.5, 400.25, 401.0]));
        let mut dataset = Dataset::new(axis, 6.6713);
        for (i, values) in frames.iter().enumerate() {
            let frame = SpectralFrame::new(i, i as f64 * 6.6713, values.clone(), Local::now());
            dataset.push(Arc::new(frame)).unwrap();
        }
        dataset
    }

    #[tokio::test]
    async fn test_row_major_is_written_incrementally() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[vec![1.0, 2.0, 3.0], vec![-1.5, 0.0, 7.25]]);
        let mut sink = TextFileSink::with_stamp(dir.path(), "20250101_000000");

        sink.begin(dataset.axis()).await.unwrap();
        sink.append(&dataset.frames()[0]).await.unwrap();

        // Readable before the run finishes
        let path = sink.artifacts().row_major.unwrap();
        let partial = read_row_major(&path).unwrap();
        assert_eq!(partial.delays, vec![0.0]);
        assert_eq!(partial.wavelengths, vec![399.5, 400.25, 401.0]);

        sink.append(&dataset.frames()[1]).await.unwrap();
        sink.finish(&dataset, &dataset.transpose()).await.unwrap();

        let table = read_row_major(&path).unwrap();
        assert_eq!(table.delays, vec![0.0, 6.67]);
        assert_eq!(table.intensities[1], vec![-1.5, 0.0, 7.25]);
        assert_eq!(table.max_intensity, vec![3.0, 7.25]);
        assert_eq!(table.timestamps.len(), 2);
    }

    #[tokio::test]
    async fn test_column_major_matches_transpose() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let mut sink = TextFileSink::with_stamp(dir.path(), "20250101_000001");

        sink.begin(dataset.axis()).await.unwrap();
        for frame in dataset.frames() {
            sink.append(frame).await.unwrap();
        }
        sink.finish(&dataset, &dataset.transpose()).await.unwrap();

        let artifacts = sink.artifacts();
        let text = std::fs::read_to_string(artifacts.column_major.as_ref().unwrap()).unwrap();
        assert_eq!(text.lines().next(), Some("Wavelength[nm],0.00,6.67"));
        assert_eq!(text.lines().nth(1), Some("399.5000,1.0000,4.0000"));

        let table = read_column_major(artifacts.column_major.unwrap()).unwrap();
        assert_eq!(table.intensities, dataset.transpose());
        assert_eq!(table.delays, vec![0.0, 6.67]);
    }

    #[tokio::test]
    async fn test_empty_run_leaves_headers_only() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[]);
        let mut sink = TextFileSink::with_stamp(dir.path(), "20250101_000002");

        sink.begin(dataset.axis()).await.unwrap();
        sink.finish(&dataset, &dataset.transpose()).await.unwrap();

        let artifacts = sink.artifacts();
        let column = std::fs::read_to_string(artifacts.column_major.unwrap()).unwrap();
        assert_eq!(column, "Wavelength[nm]\n");
        let row = read_row_major(artifacts.row_major.unwrap()).unwrap();
        assert!(row.delays.is_empty());
    }

    #[tokio::test]
    async fn test_same_stamp_does_not_overwrite_earlier_run() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[vec![1.0, 2.0, 3.0]]);

        let mut first = TextFileSink::with_stamp(dir.path(), "20250101_000003");
        first.begin(dataset.axis()).await.unwrap();
        first.append(&dataset.frames()[0]).await.unwrap();
        first.finish(&dataset, &dataset.transpose()).await.unwrap();
        let row_path = first.artifacts().row_major.unwrap();
        let before = std::fs::read_to_string(&row_path).unwrap();

        let mut second = TextFileSink::with_stamp(dir.path(), "20250101_000003");
        match second.begin(dataset.axis()).await {
            Err(DaqError::Storage(msg)) => assert!(msg.contains("already exists"), "{msg}"),
            other => panic!("expected storage error, got {other:?}"),
        }
        assert_eq!(second.artifacts(), SinkArtifacts::default());
        assert_eq!(std::fs::read_to_string(&row_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_existing_column_file_is_checked_before_anything_is_created() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[]);
        std::fs::write(dir.path().join("20250101_000004_FROG.csv"), "keep\n").unwrap();

        let mut sink = TextFileSink::with_stamp(dir.path(), "20250101_000004");
        assert!(sink.begin(dataset.axis()).await.is_err());
        assert!(!dir.path().join("20250101_000004_FROG.txt").exists());
    }

    #[tokio::test]
    async fn test_append_before_begin_fails() {
        let dir = tempdir().unwrap();
        let dataset = dataset_with(&[vec![1.0, 2.0, 3.0]]);
        let mut sink = TextFileSink::with_stamp(dir.path(), "x");
        assert!(sink.append(&dataset.frames()[0]).await.is_err());
    }

    #[test]
    fn test_reader_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.txt");
        std::fs::write(&path, "a\tb\tc\n1\t2\t3\n").unwrap();
        assert!(matches!(read_row_major(&path), Err(DaqError::Storage(_))));
    }
}
