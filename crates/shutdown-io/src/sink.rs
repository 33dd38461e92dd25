//! Persistence sinks for completed-shutdown records.
//!
//! The session hands each record to a sink and moves on; whatever the sink
//! answers is written back into the run log, never retried.

use shutdown_core::{PersistenceFailure, SimulationRecord};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::info;

pub trait PersistenceSink: Send + Sync + 'static {
    fn persist(
        &self,
        record: SimulationRecord,
    ) -> impl Future<Output = Result<(), PersistenceFailure>> + Send;
}

impl<S: PersistenceSink> PersistenceSink for Arc<S> {
    fn persist(
        &self,
        record: SimulationRecord,
    ) -> impl Future<Output = Result<(), PersistenceFailure>> + Send {
        (**self).persist(record)
    }
}

/// Emits each record as a structured tracing event and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl PersistenceSink for LogSink {
    async fn persist(&self, record: SimulationRecord) -> Result<(), PersistenceFailure> {
        info!(
            input_voltage = record.input_voltage,
            input_current = record.input_current,
            output_voltage = record.output_voltage,
            output_current = record.output_current,
            shutdown_latency_ms = record.shutdown_latency_ms,
            temperature = record.auxiliary.temperature,
            light_intensity = record.auxiliary.light_intensity,
            power_loss_w = record.auxiliary.power_loss_w,
            "Simulation record"
        );
        Ok(())
    }
}

/// Keeps records in memory. Can be switched into a failing mode to exercise
/// the warning path.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SimulationRecord>>>,
    failure: Arc<Mutex<Option<PersistenceFailure>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failure: PersistenceFailure) -> Self {
        let sink = Self::default();
        sink.set_failure(Some(failure));
        sink
    }

    pub fn set_failure(&self, failure: Option<PersistenceFailure>) {
        if let Ok(mut slot) = self.failure.lock() {
            *slot = failure;
        }
    }

    pub fn records(&self) -> Vec<SimulationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl PersistenceSink for MemorySink {
    async fn persist(&self, record: SimulationRecord) -> Result<(), PersistenceFailure> {
        let failure = self
            .failure
            .lock()
            .map_err(|_| PersistenceFailure::Unavailable("memory sink poisoned".into()))?
            .clone();
        if let Some(failure) = failure {
            return Err(failure);
        }
        self.records
            .lock()
            .map_err(|_| PersistenceFailure::Unavailable("memory sink poisoned".into()))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shutdown_core::{OutputLevel, SimulationParameters};

    fn record() -> SimulationRecord {
        SimulationRecord::new(
            &SimulationParameters::default(),
            OutputLevel::new(45.0, 12.0),
            49.0,
            3.0,
        )
    }

    #[tokio::test]
    async fn memory_sink_stores_records() {
        let sink = MemorySink::new();
        sink.persist(record()).await.unwrap();
        assert_eq!(sink.records(), vec![record()]);
    }

    #[tokio::test]
    async fn failing_memory_sink_reports_failure() {
        let sink = MemorySink::failing(PersistenceFailure::Rejected("read-only".into()));
        let err = sink.persist(record()).await.unwrap_err();
        assert_eq!(err, PersistenceFailure::Rejected("read-only".into()));
        assert!(sink.records().is_empty());
    }
}
