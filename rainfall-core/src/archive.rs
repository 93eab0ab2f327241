//! Batch ingestion of raw station archives.
//!
//! Batches are handed to the sink strictly one after another and each is
//! committed before the next is decoded, so a failure only loses the batch
//! in flight.

use std::{fs::File, io, path::Path};

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use crate::{
    decode::{ArchiveScale, DecodedRecord, RawStationRecord},
    error::{PipelineError, PipelineResult},
    model::FeatureVector,
};

/// Destination for decoded archive rows.
pub trait RecordSink {
    fn write_batch(&mut self, batch: &[DecodedRecord]) -> Result<()>;

    fn commit(&mut self) -> Result<()>;
}

/// Writes decoded rows in the `WeatherData` column layout.
pub struct CsvRecordSink<W: io::Write> {
    writer: csv::Writer<W>,
}

impl CsvRecordSink<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        Ok(Self { writer })
    }
}

impl<W: io::Write> CsvRecordSink<W> {
    pub fn from_writer(inner: W) -> Self {
        Self { writer: csv::Writer::from_writer(inner) }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| anyhow!("Failed to flush CSV output: {}", e.error()))
    }
}

impl<W: io::Write> RecordSink for CsvRecordSink<W> {
    fn write_batch(&mut self, batch: &[DecodedRecord]) -> Result<()> {
        for record in batch {
            self.writer.serialize(record).context("Failed to write decoded record")?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush decoded records")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows decoded and committed.
    pub rows: usize,
    /// Rows the CSV reader could not deserialize at all.
    pub skipped: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ArchiveIngest {
    batch_size: usize,
    scale: ArchiveScale,
}

impl ArchiveIngest {
    pub fn new(batch_size: usize, scale: ArchiveScale) -> Self {
        Self { batch_size: batch_size.max(1), scale }
    }

    pub fn run_file(&self, path: &Path, sink: &mut dyn RecordSink) -> Result<IngestReport> {
        info!("ingesting archive {}", path.display());
        let file = File::open(path)
            .with_context(|| format!("Failed to open archive: {}", path.display()))?;
        self.run(file, sink)
    }

    pub fn run<R: io::Read>(&self, input: R, sink: &mut dyn RecordSink) -> Result<IngestReport> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(input);
        let mut report = IngestReport::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        for (line, record) in reader.deserialize::<RawStationRecord>().enumerate() {
            match record {
                Ok(raw) => batch.push(raw.decode(&self.scale)),
                Err(e) => {
                    warn!("skipping archive row {}: {e}", line + 1);
                    report.skipped += 1;
                }
            }

            if batch.len() == self.batch_size {
                self.flush(&mut batch, sink, &mut report)?;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, sink, &mut report)?;
        }

        info!(
            "ingest finished: {} rows in {} batches, {} skipped",
            report.rows, report.batches, report.skipped
        );
        Ok(report)
    }

    fn flush(
        &self,
        batch: &mut Vec<DecodedRecord>,
        sink: &mut dyn RecordSink,
        report: &mut IngestReport,
    ) -> Result<()> {
        let number = report.batches + 1;
        sink.write_batch(batch).with_context(|| format!("Batch {number} failed"))?;
        sink.commit().with_context(|| format!("Commit of batch {number} failed"))?;

        report.rows += batch.len();
        report.batches = number;
        batch.clear();
        Ok(())
    }
}

/// Read a decoded `WeatherData` export back.
pub fn read_decoded(path: &Path) -> PipelineResult<Vec<DecodedRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        PipelineError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })?;

    reader
        .deserialize::<DecodedRecord>()
        .map(|r| r.map_err(|e| PipelineError::InvalidInput(format!("{}: {e}", path.display()))))
        .collect()
}

/// Time-ordered complete feature vectors with their rain labels.
///
/// Rows with any missing or out-of-range field are dropped.
pub fn training_series(records: &[DecodedRecord]) -> (Vec<FeatureVector>, Vec<f64>) {
    let mut complete: Vec<(FeatureVector, f64)> = records
        .iter()
        .filter_map(|r| {
            let label = if r.rained { 1.0 } else { 0.0 };
            r.to_feature_vector().ok().map(|v| (v, label))
        })
        .collect();

    complete.sort_by(|a, b| a.0.timestamp.total_cmp(&b.0.timestamp));
    complete.into_iter().unzip()
}
