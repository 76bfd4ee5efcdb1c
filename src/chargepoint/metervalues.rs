//! Meter values manager
//!
//! Three sampling triggers:
//!
//! - **clock-aligned**: one process-wide timer aligned to the wall clock
//!   (`ClockAlignedDataInterval`), sampling every connector with context
//!   `Sample.Clock`;
//! - **sampled**: one timer per connector, running for the lifetime of its
//!   transaction (`MeterValueSampleInterval`), context `Sample.Periodic`;
//! - **triggered**: an immediate sample with context `Trigger`.
//!
//! While disconnected, values of connectors with an active transaction are
//! queued to the request FIFO, others are discarded. Aligned and sampled
//! values are also accumulated per transaction (bounded by the
//! `StopTxn*MaxLength` keys) for the StopTransaction `transactionData`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chargepoint::connectors::{ConnectorRegistry, CONNECTOR_ID_CHARGE_POINT};
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::fifo::RequestFifo;
use crate::chargepoint::ocppconfig::OcppConfigStore;
use crate::chargepoint::trigger::{TriggerHandler, TriggerSource};
use crate::database::repositories::MeterValuesTxRepository;
use crate::messages::{MeterValuesRequest, OcppRequest};
use crate::rpc::{CallResult, MessageSender};
use crate::support::errors::ChargePointResult;
use crate::types::{
    Location, Measurand, MessageTrigger, MessageTriggerExtended, MeterValue, Phase,
    ReadingContext, SampledValue, ValueFormat,
};

/// Parse a measurand list such as
/// `Current.Import.L1,Current.Import.L2,Energy.Active.Import.Register`.
/// A trailing component naming a phase attaches it to the measurand.
pub fn parse_measurands(list: &str) -> Vec<(Measurand, Option<Phase>)> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            if let Ok(measurand) = item.parse::<Measurand>() {
                return Some((measurand, None));
            }
            let (head, tail) = item.rsplit_once('.')?;
            let measurand = head.parse::<Measurand>().ok()?;
            let phase = tail.parse::<Phase>().ok()?;
            Some((measurand, Some(phase)))
        })
        .collect()
}

pub struct MeterValuesManager {
    ocpp_config: Arc<OcppConfigStore>,
    events: Arc<dyn ChargePointEventsHandler>,
    sender: Arc<MessageSender>,
    connectors: Arc<ConnectorRegistry>,
    repository: MeterValuesTxRepository,
    fifo: Arc<RequestFifo>,
    clock_task: Mutex<Option<JoinHandle<()>>>,
    sampling_tasks: Mutex<HashMap<u32, JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl MeterValuesManager {
    pub fn new(
        ocpp_config: Arc<OcppConfigStore>,
        events: Arc<dyn ChargePointEventsHandler>,
        sender: Arc<MessageSender>,
        connectors: Arc<ConnectorRegistry>,
        repository: MeterValuesTxRepository,
        fifo: Arc<RequestFifo>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|self_ref| Self {
            ocpp_config,
            events,
            sender,
            connectors,
            repository,
            fifo,
            clock_task: Mutex::new(None),
            sampling_tasks: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        });
        manager.start_clock_aligned();
        manager
    }

    // ── Clock-aligned values ───────────────────────────────────

    fn start_clock_aligned(&self) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            loop {
                let interval =
                    i64::from(this.ocpp_config.snapshot().clock_aligned_data_interval);
                if interval == 0 {
                    // disabled; re-check periodically in case the key changes
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    continue;
                }
                let now = Utc::now().timestamp();
                let next = (now / interval + 1) * interval;
                tokio::time::sleep(Duration::from_secs((next - now).max(1) as u64)).await;
                this.clock_aligned_tick().await;
            }
        });
        *self.clock_task.lock().unwrap() = Some(task);
    }

    async fn clock_aligned_tick(&self) {
        let measurands = self.ocpp_config.snapshot().meter_values_aligned_data;
        if measurands.is_empty() {
            return;
        }
        for connector_id in 0..=self.connectors.count() {
            if let Err(e) = self
                .sample_and_send(connector_id, &measurands, ReadingContext::SampleClock)
                .await
            {
                warn!(connector_id, "Clock-aligned sampling failed: {e}");
            }
        }
    }

    // ── Sampled values (per transaction) ───────────────────────

    /// Start the periodic sampling of a connector with a running
    /// transaction. No-op when `MeterValueSampleInterval` is 0.
    pub fn start_sampling(&self, connector_id: u32) {
        let interval = self.ocpp_config.snapshot().meter_value_sample_interval;
        if interval == 0 {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            loop {
                let interval = this.ocpp_config.snapshot().meter_value_sample_interval;
                if interval == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(u64::from(interval))).await;
                let measurands = this.ocpp_config.snapshot().meter_values_sampled_data;
                if measurands.is_empty() {
                    continue;
                }
                if let Err(e) = this
                    .sample_and_send(connector_id, &measurands, ReadingContext::SamplePeriodic)
                    .await
                {
                    warn!(connector_id, "Periodic sampling failed: {e}");
                }
            }
        });
        if let Some(previous) = self
            .sampling_tasks
            .lock()
            .unwrap()
            .insert(connector_id, task)
        {
            previous.abort();
        }
    }

    pub fn stop_sampling(&self, connector_id: u32) {
        if let Some(task) = self.sampling_tasks.lock().unwrap().remove(&connector_id) {
            task.abort();
        }
    }

    // ── Sampling machinery ─────────────────────────────────────

    /// Assemble one MeterValue element from the host-provided samples.
    async fn sample(
        &self,
        connector_id: u32,
        measurands: &str,
        context: ReadingContext,
    ) -> Option<MeterValue> {
        let location = if connector_id == CONNECTOR_ID_CHARGE_POINT {
            Location::Inlet
        } else {
            Location::Outlet
        };

        let mut sampled = Vec::new();
        for (measurand, phase) in parse_measurands(measurands) {
            if let Some(value) = self
                .events
                .get_meter_value(connector_id, measurand, phase)
                .await
            {
                sampled.push(SampledValue {
                    value,
                    context: Some(context),
                    format: Some(ValueFormat::Raw),
                    measurand: Some(measurand),
                    phase,
                    location: Some(location),
                    unit: Some(measurand.unit()),
                });
            }
        }
        if sampled.is_empty() {
            None
        } else {
            Some(MeterValue {
                timestamp: Utc::now(),
                sampled_value: sampled,
            })
        }
    }

    async fn sample_and_send(
        &self,
        connector_id: u32,
        measurands: &str,
        context: ReadingContext,
    ) -> ChargePointResult<()> {
        let Some(value) = self.sample(connector_id, measurands, context).await else {
            return Ok(());
        };

        let transaction_id = match self.connectors.connector(connector_id) {
            Some(connector) => {
                let connector = connector.lock().await;
                (connector.transaction_id != 0).then_some(connector.transaction_id)
            }
            None => None,
        };

        // Accumulate for the StopTransaction transactionData
        if let Some(transaction_id) = transaction_id {
            self.accumulate(connector_id, transaction_id, context, &value)
                .await?;
        }

        let request = MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: vec![value],
        };
        self.send_or_queue(request).await
    }

    async fn accumulate(
        &self,
        connector_id: u32,
        transaction_id: i32,
        context: ReadingContext,
        value: &MeterValue,
    ) -> ChargePointResult<()> {
        let cfg = self.ocpp_config.snapshot();
        let cap = match context {
            ReadingContext::SampleClock if !cfg.stop_txn_aligned_data.is_empty() => {
                u64::from(cfg.stop_txn_aligned_data_max_length)
            }
            ReadingContext::SamplePeriodic if !cfg.stop_txn_sampled_data.is_empty() => {
                u64::from(cfg.stop_txn_sampled_data_max_length)
            }
            _ => return Ok(()),
        };
        let stored = self
            .repository
            .count(connector_id, transaction_id, context)
            .await?;
        if stored < cap {
            self.repository
                .append(connector_id, transaction_id, context, value)
                .await?;
        }
        Ok(())
    }

    async fn send_or_queue(&self, request: MeterValuesRequest) -> ChargePointResult<()> {
        let queued = !self.fifo.is_empty().await?;
        if self.sender.is_connected() && !queued {
            match self.sender.send(&request).await {
                CallResult::Ok(_) => {}
                CallResult::Disconnected | CallResult::Timeout
                    if request.transaction_id.is_some() =>
                {
                    self.queue(&request).await?;
                }
                other => debug!(
                    connector_id = request.connector_id,
                    "MeterValues not delivered: {other:?}"
                ),
            }
        } else if request.transaction_id.is_some() {
            self.queue(&request).await?;
        }
        // values without a transaction are discarded while offline
        Ok(())
    }

    async fn queue(&self, request: &MeterValuesRequest) -> ChargePointResult<()> {
        debug!(
            connector_id = request.connector_id,
            "Queuing meter values for later delivery"
        );
        self.fifo
            .push(
                request.connector_id,
                MeterValuesRequest::ACTION,
                &serde_json::to_value(request)?,
            )
            .await
    }

    // ── Host and transaction hooks ─────────────────────────────

    /// Send host-assembled meter values (host API `sendMeterValues`).
    pub async fn send_meter_values(
        &self,
        connector_id: u32,
        values: Vec<MeterValue>,
    ) -> ChargePointResult<bool> {
        if values.is_empty() || !self.connectors.is_valid(connector_id) {
            return Ok(false);
        }
        let request = MeterValuesRequest {
            connector_id,
            transaction_id: None,
            meter_value: values,
        };
        Ok(self.sender.send(&request).await.is_ok())
    }

    /// Sampled values collected at the instant a transaction stops,
    /// context `Transaction.End`.
    pub async fn stop_transaction_values(&self, connector_id: u32) -> Vec<MeterValue> {
        let measurands = self.ocpp_config.snapshot().stop_txn_sampled_data;
        if measurands.is_empty() {
            return Vec::new();
        }
        self.sample(connector_id, &measurands, ReadingContext::TransactionEnd)
            .await
            .map(|value| vec![value])
            .unwrap_or_default()
    }

    /// Aligned and sampled values accumulated during the transaction,
    /// removed from the store on the way out.
    pub async fn take_tx_meter_values(
        &self,
        connector_id: u32,
        transaction_id: i32,
    ) -> ChargePointResult<Vec<MeterValue>> {
        let values = self.repository.load(connector_id, transaction_id).await?;
        self.repository.clear(connector_id, transaction_id).await?;
        Ok(values)
    }

    /// Rewrite accumulated values after offline id reconciliation.
    pub async fn rewrite_transaction_id(
        &self,
        connector_id: u32,
        offline_id: i32,
        assigned_id: i32,
    ) -> ChargePointResult<()> {
        self.repository
            .rewrite_transaction_id(connector_id, offline_id, assigned_id)
            .await
    }

    pub fn stop(&self) {
        if let Some(task) = self.clock_task.lock().unwrap().take() {
            task.abort();
        }
        for (_, task) in self.sampling_tasks.lock().unwrap().drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl TriggerHandler for MeterValuesManager {
    async fn on_trigger(self: Arc<Self>, source: TriggerSource, connector_id: Option<u32>) -> bool {
        if !matches!(
            source,
            TriggerSource::Standard(MessageTrigger::MeterValues)
                | TriggerSource::Extended(MessageTriggerExtended::MeterValues)
        ) {
            return false;
        }
        let this = Arc::clone(&self);
        tokio::spawn(async move {
            let measurands = this.ocpp_config.snapshot().meter_values_sampled_data;
            if measurands.is_empty() {
                return;
            }
            let ids = match connector_id {
                Some(id) => vec![id],
                None => (0..=this.connectors.count()).collect(),
            };
            for id in ids {
                if let Err(e) = this
                    .sample_and_send(id, &measurands, ReadingContext::Trigger)
                    .await
                {
                    warn!(connector_id = id, "Triggered sampling failed: {e}");
                }
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_measurands_with_phases() {
        let parsed = parse_measurands(
            "Current.Import.L1,Current.Import.L2,Current.Import.L3,Energy.Active.Import.Register",
        );
        assert_eq!(
            parsed,
            vec![
                (Measurand::CurrentImport, Some(Phase::L1)),
                (Measurand::CurrentImport, Some(Phase::L2)),
                (Measurand::CurrentImport, Some(Phase::L3)),
                (Measurand::EnergyActiveImportRegister, None),
            ]
        );
    }

    #[test]
    fn skips_unknown_entries() {
        let parsed = parse_measurands("Voltage, NotAMeasurand, Power.Active.Import.L9,");
        assert_eq!(parsed, vec![(Measurand::Voltage, None)]);
    }

    use crate::config::OcppConfig;
    use crate::database::open_in_memory;
    use crate::database::repositories::RequestFifoRepository;
    use crate::rpc::{MessageDispatcher, RpcClient};
    use crate::types::UnitOfMeasure;
    use std::time::Duration as StdDuration;

    struct MeterStub;

    #[async_trait]
    impl ChargePointEventsHandler for MeterStub {
        async fn get_meter_value(
            &self,
            _connector_id: u32,
            measurand: Measurand,
            phase: Option<Phase>,
        ) -> Option<String> {
            match (measurand, phase) {
                (Measurand::CurrentImport, Some(Phase::L1)) => Some("70".to_string()),
                (Measurand::CurrentImport, Some(Phase::L2)) => Some("80".to_string()),
                (Measurand::CurrentImport, Some(Phase::L3)) => Some("90".to_string()),
                (Measurand::EnergyActiveImportRegister, None) => Some("23".to_string()),
                _ => None,
            }
        }
    }

    const SAMPLED_DATA: &str =
        "Current.Import.L1,Current.Import.L2,Current.Import.L3,Energy.Active.Import.Register";

    /// Two sampling ticks while disconnected, with a transaction running
    /// on connector 2: both samples must be queued for later delivery,
    /// carrying the transaction id and the sampled values in
    /// configuration order.
    #[tokio::test]
    async fn sampled_values_are_queued_while_offline() {
        let db = open_in_memory().await.unwrap();
        let connectors = Arc::new(
            crate::chargepoint::connectors::ConnectorRegistry::open(db.clone(), 2)
                .await
                .unwrap(),
        );
        {
            let connector = connectors.connector(2).unwrap();
            let mut connector = connector.lock().await;
            connector.transaction_id = 12345;
            connectors.save(&connector).await.unwrap();
        }

        // never-started client: the stack is offline
        let rpc = Arc::new(RpcClient::new(
            Arc::new(MessageDispatcher::new()),
            StdDuration::from_secs(1),
            StdDuration::from_secs(1),
        ));
        let fifo = Arc::new(RequestFifo::new(RequestFifoRepository::new(db.clone())));
        let manager = MeterValuesManager::new(
            Arc::new(OcppConfigStore::new(OcppConfig {
                meter_value_sample_interval: 10,
                meter_values_sampled_data: SAMPLED_DATA.to_string(),
                ..OcppConfig::default()
            })),
            Arc::new(MeterStub),
            Arc::new(MessageSender::new(rpc)),
            connectors,
            MeterValuesTxRepository::new(db),
            Arc::clone(&fifo),
        );

        for _ in 0..2 {
            manager
                .sample_and_send(2, SAMPLED_DATA, ReadingContext::SamplePeriodic)
                .await
                .unwrap();
        }

        assert_eq!(fifo.count().await.unwrap(), 2);
        let entry = fifo.front().await.unwrap().unwrap();
        assert_eq!(entry.action, "MeterValues");
        assert_eq!(entry.connector_id, 2);

        let request: MeterValuesRequest = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(request.connector_id, 2);
        assert_eq!(request.transaction_id, Some(12345));
        assert_eq!(request.meter_value.len(), 1);

        let sampled = &request.meter_value[0].sampled_value;
        assert_eq!(sampled.len(), 4);
        let expected = [
            ("70", Some(Phase::L1), UnitOfMeasure::A),
            ("80", Some(Phase::L2), UnitOfMeasure::A),
            ("90", Some(Phase::L3), UnitOfMeasure::A),
            ("23", None, UnitOfMeasure::KWh),
        ];
        for (value, (raw, phase, unit)) in sampled.iter().zip(expected) {
            assert_eq!(value.value, raw);
            assert_eq!(value.phase, phase);
            assert_eq!(value.unit, Some(unit));
            assert_eq!(value.context, Some(ReadingContext::SamplePeriodic));
            assert_eq!(value.format, Some(ValueFormat::Raw));
            assert_eq!(value.location, Some(Location::Outlet));
        }
        manager.stop();
    }
}
