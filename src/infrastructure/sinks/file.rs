use crate::domain::errors::RoutingError;
use crate::domain::message::NormalizedMessage;
use crate::domain::ports::OutputManager;
use crate::domain::records::SchemaRecord;
use crate::domain::series::InstrumentSeries;
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Appends records to `<root>/<destination>/<schema>/<symbol>.csv`
pub struct FileOutputManager {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl FileOutputManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path_for(&self, destination: &str, record: &SchemaRecord) -> PathBuf {
        self.root
            .join(sanitize(destination))
            .join(record.schema().as_str())
            .join(format!("{}.csv", sanitize(record.symbol())))
    }

    fn append(path: &Path, record: &SchemaRecord) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let file_exists = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| e.to_string())?;

        let columns = record.columns();
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !file_exists {
            wtr.write_record(columns.iter().map(|(name, _)| *name))
                .map_err(|e| e.to_string())?;
        }
        wtr.write_record(columns.iter().map(|(_, value)| value.as_deref().unwrap_or("")))
            .map_err(|e| e.to_string())?;
        wtr.flush().map_err(|e| e.to_string())
    }
}

#[async_trait]
impl OutputManager for FileOutputManager {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(
        &self,
        destination: &str,
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> Result<(), RoutingError> {
        let record = SchemaRecord::from_message(series.data_schema(), message)?;
        let path = self.path_for(destination, &record);
        let lock = self.write_lock.clone();

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().map_err(|e| e.to_string())?;
            Self::append(&target, &record)
        })
        .await
        .map_err(|e| RoutingError::sink(destination, e))?
        .map_err(|e| RoutingError::sink(destination, e))?;

        debug!("FileOutputManager: Appended to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::{DataSchema, DataSource, SeriesType};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileOutputManager::new(dir.path());
        let series = InstrumentSeries::builder("ONYX.NAPEW.1")
            .data_source(DataSource::Onyx)
            .data_schema(DataSchema::Ohlcv1d)
            .destination("file_archive")
            .build()
            .unwrap();

        for day in [2, 3] {
            let ts = Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap();
            let message =
                NormalizedMessage::new(SeriesType::Future, DataSource::Onyx, "NAPEW F25", ts)
                    .with_decimal("open", dec!(1))
                    .with_decimal("high", dec!(2))
                    .with_decimal("low", dec!(0.5))
                    .with_decimal("close", dec!(1.5));
            manager.save("file_archive", &message, &series).await.unwrap();
        }

        let path = dir.path().join("file_archive").join("ohlcv-1d").join("NAPEW_F25.csv");
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "vendor,asset_type,symbol,ts_event,open,high,low,close,volume");
        assert!(lines[2].starts_with("onyx,fut,NAPEW F25,2025-01-03"));
        assert!(lines[2].ends_with(",1.5,"));
    }
}
