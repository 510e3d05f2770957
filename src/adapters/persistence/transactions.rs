//! Transaction Logger - Append-only JSONL Order Archive
//!
//! Persists terminal orders to daily JSONL files in the format
//! `transactions/YYYY-MM-DD.jsonl`, partitioned by the record's own
//! timestamp. Each line is a self-contained JSON record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::ports::audit::{TransactionLog, TransactionRecord};

/// Append-only JSONL transaction logger with daily file rotation.
pub struct TransactionLogger {
    /// Directory holding the daily files.
    dir: PathBuf,
    /// Serializes appends so concurrent writers never interleave lines.
    write_lock: Mutex<()>,
}

impl TransactionLogger {
    /// Create a logger under `data_dir/transactions`.
    pub async fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir).join("transactions");
        fs::create_dir_all(&dir)
            .await
            .context("Failed to create transactions directory")?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn day_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Load every record written for `date`, skipping malformed lines.
    #[instrument(skip(self))]
    pub async fn load_day(&self, date: NaiveDate) -> Result<Vec<TransactionRecord>> {
        let path = self.day_path(date);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).await?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TransactionRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        error = %e,
                        "Skipping malformed transaction record"
                    );
                }
            }
        }
        info!(count = records.len(), %date, "Loaded transaction records");
        Ok(records)
    }

    /// Check if the transactions directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let test_path = self.dir.join(".health_check");
        let result = fs::write(&test_path, b"ok").await;
        let _ = fs::remove_file(&test_path).await;
        result.is_ok()
    }
}

#[async_trait]
impl TransactionLog for TransactionLogger {
    #[instrument(skip(self, record), fields(local_id = %record.local_id, status = %record.status))]
    async fn record(&self, record: &TransactionRecord) -> Result<()> {
        let path = self.day_path(record.timestamp.date_naive());

        let mut json =
            serde_json::to_string(record).context("Failed to serialize transaction record")?;
        json.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open transaction log file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write transaction record")?;
        file.flush().await.context("Failed to flush transaction log")?;
        file.sync_data()
            .await
            .context("Failed to sync transaction log")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{LocalOrderId, Order, OrderRole, OrderStatus, Side};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn filled_close(id: u64) -> Order {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut order = Order::new_pending(
            LocalOrderId(id),
            "ETHUSDT".to_string(),
            Side::Sell,
            OrderRole::Close,
            dec!(0.1),
            dec!(2000.40),
            created,
        );
        order.venue_order_id = Some(format!("v{id}"));
        order.status = OrderStatus::Filled;
        order.filled_size = dec!(0.1);
        order.remaining_size = dec!(0);
        order
    }

    #[tokio::test]
    async fn test_record_and_load_day() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TransactionLogger::new(dir.path().to_str().unwrap())
            .await
            .unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();

        logger
            .record(&TransactionRecord::from_order(&filled_close(1), at))
            .await
            .unwrap();
        logger
            .record(&TransactionRecord::from_order(&filled_close(2), at))
            .await
            .unwrap();

        let records = logger.load_day(at.date_naive()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].local_id, LocalOrderId(1));
        assert_eq!(records[1].order_id.as_deref(), Some("v2"));
        assert_eq!(records[0].price, dec!(2000.40));
        assert!(dir.path().join("transactions/2026-03-01.jsonl").exists());
    }

    #[tokio::test]
    async fn test_missing_day_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TransactionLogger::new(dir.path().to_str().unwrap())
            .await
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert!(logger.load_day(day).await.unwrap().is_empty());
        assert!(logger.is_healthy().await);
    }
}
