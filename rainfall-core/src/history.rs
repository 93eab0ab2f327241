//! Historical observations used when live conditions are unavailable.

use std::{fmt::Debug, fs::File, io, path::PathBuf};

use async_trait::async_trait;
use log::{debug, warn};

use crate::{
    error::{PipelineError, PipelineResult},
    model::HistoricalRow,
};

const SERVICE: &str = "history store";

/// Search radius around the requested point, in degrees.
pub const DEFAULT_TOLERANCE_DEG: f64 = 0.3;

#[async_trait]
pub trait HistoryStore: Send + Sync + Debug {
    /// Up to `limit` rows near `(lat, lon)`, newest first.
    async fn recent_near(&self, lat: f64, lon: f64, limit: usize)
    -> PipelineResult<Vec<HistoricalRow>>;
}

/// Store backed by a CSV export of the `WeatherData` table.
#[derive(Debug, Clone)]
pub struct CsvHistoryStore {
    path: PathBuf,
    tolerance_deg: f64,
}

impl CsvHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), tolerance_deg: DEFAULT_TOLERANCE_DEG }
    }

    pub fn with_tolerance(mut self, tolerance_deg: f64) -> Self {
        self.tolerance_deg = tolerance_deg;
        self
    }

    fn is_near(&self, row: &HistoricalRow, lat: f64, lon: f64) -> bool {
        (row.latitude - lat).abs() < self.tolerance_deg
            && (row.longitude - lon).abs() < self.tolerance_deg
    }

    /// Up to `limit` rows near `(lat, lon)`, newest first, in one pass over `input`.
    ///
    /// Rows outside the window are dropped as they are read and at most
    /// `2 * limit` candidates are held at once. Unparseable rows are skipped
    /// with a warning.
    pub fn scan<R: io::Read>(
        &self,
        input: R,
        lat: f64,
        lon: f64,
        limit: usize,
    ) -> Vec<HistoricalRow> {
        let mut near = Vec::new();
        if limit == 0 {
            return near;
        }
        let high_water = limit.saturating_mul(2);

        let mut reader = csv::Reader::from_reader(input);
        for (line, record) in reader.deserialize::<HistoricalRow>().enumerate() {
            match record {
                Ok(row) if self.is_near(&row, lat, lon) => {
                    near.push(row);
                    if near.len() >= high_water {
                        keep_newest(&mut near, limit);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("skipping history row {}: {e}", line + 1),
            }
        }

        keep_newest(&mut near, limit);
        near
    }
}

/// Stable, so equally dated rows keep file order. Undated rows sort last.
fn keep_newest(rows: &mut Vec<HistoricalRow>, limit: usize) {
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    rows.truncate(limit);
}

#[async_trait]
impl HistoryStore for CsvHistoryStore {
    async fn recent_near(
        &self,
        lat: f64,
        lon: f64,
        limit: usize,
    ) -> PipelineResult<Vec<HistoricalRow>> {
        let store = self.clone();
        let rows = tokio::task::spawn_blocking(move || {
            let file = File::open(&store.path).map_err(|e| {
                PipelineError::upstream(SERVICE, format!("{}: {e}", store.path.display()))
            })?;
            Ok::<_, PipelineError>(store.scan(io::BufReader::new(file), lat, lon, limit))
        })
        .await
        .map_err(|e| PipelineError::upstream(SERVICE, e))??;

        debug!("history store returned {} rows near ({lat}, {lon})", rows.len());
        Ok(rows)
    }
}
