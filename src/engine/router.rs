//! Command ingress and cross-instrument fan-out.

use super::command::{Command, CommandResult};
use super::instrument::{Envelope, InstrumentEngine};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::marketdata::{EventSink, MarketDataPublisher};
use crate::risk::DailyActivity;
use crate::storage::Storage;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

struct InstrumentHandle {
    tx: mpsc::Sender<Envelope>,
    _task: tokio::task::JoinHandle<()>,
}

/// The exchange's command ingress.
///
/// Owns one [`InstrumentEngine`] per registered instrument. Commands for
/// one instrument are serialized through its bounded queue; commands for
/// different instruments run concurrently. A full queue rejects
/// immediately with [`CoreError::Busy`] instead of silently waiting.
pub struct ExchangeRouter {
    engines: DashMap<String, InstrumentHandle>,
    storage: Arc<dyn Storage>,
    publisher: Arc<MarketDataPublisher>,
    config: CoreConfig,
    /// Daily activity counters shared by every instrument loop.
    activity: Arc<DashMap<Uuid, DailyActivity>>,
}

impl ExchangeRouter {
    /// Build a router over the given storage and event sink.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, sink: Arc<dyn EventSink>, config: CoreConfig) -> Self {
        Self {
            engines: DashMap::new(),
            storage,
            publisher: Arc::new(MarketDataPublisher::new(sink)),
            config,
            activity: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the command loop for one instrument. The instrument must
    /// already exist in storage. Must run inside a Tokio runtime.
    pub fn register_instrument(&self, symbol: &str) -> Result<(), CoreError> {
        if self.storage.instrument(symbol).is_none() {
            return Err(CoreError::NotFound(format!("instrument {symbol}")));
        }
        if self.engines.contains_key(symbol) {
            return Err(CoreError::Conflict(format!(
                "instrument {symbol} already registered"
            )));
        }

        let engine = InstrumentEngine::new(
            symbol.to_string(),
            Arc::clone(&self.storage),
            Arc::clone(&self.publisher),
            self.config.clone(),
            Arc::clone(&self.activity),
        );
        let (tx, rx) = mpsc::channel(self.config.max_command_queue);
        let task = engine.spawn(rx);
        self.engines.insert(
            symbol.to_string(),
            InstrumentHandle { tx, _task: task },
        );
        info!(symbol, "instrument registered");
        Ok(())
    }

    /// Symbols with a running instrument loop.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    /// Submit one command and await its result.
    ///
    /// Routing: commands naming a symbol go to that instrument's loop;
    /// order-scoped commands are routed via the order's stored symbol; a
    /// `CancelAll` without a symbol fans out to every loop and sums the
    /// counts.
    pub async fn submit(&self, command: Command) -> Result<CommandResult, CoreError> {
        match &command {
            Command::PlaceOrder(place) => {
                let symbol = place.symbol.clone();
                self.submit_to(&symbol, command).await
            }
            Command::SettleInstrument { symbol, .. }
            | Command::ExpireDayOrders { symbol, .. }
            | Command::Snapshot { symbol, .. } => {
                let symbol = symbol.clone();
                self.submit_to(&symbol, command).await
            }
            Command::CancelOrder { order_id, .. } | Command::ModifyOrder { order_id, .. } => {
                let order = self
                    .storage
                    .order(*order_id)
                    .ok_or_else(|| CoreError::NotFound(format!("order {order_id}")))?;
                self.submit_to(&order.symbol, command).await
            }
            Command::CancelAll {
                symbol: Some(symbol),
                ..
            } => {
                let symbol = symbol.clone();
                self.submit_to(&symbol, command).await
            }
            Command::CancelAll { symbol: None, .. } => self.fan_out_cancel_all(command).await,
        }
    }

    async fn submit_to(
        &self,
        symbol: &str,
        command: Command,
    ) -> Result<CommandResult, CoreError> {
        let rx = self.enqueue(symbol, command)?;
        rx.await
            .map_err(|_| CoreError::Transient(format!("instrument loop {symbol} dropped")))?
    }

    fn enqueue(
        &self,
        symbol: &str,
        command: Command,
    ) -> Result<oneshot::Receiver<Result<CommandResult, CoreError>>, CoreError> {
        let handle = self
            .engines
            .get(symbol)
            .ok_or_else(|| CoreError::NotFound(format!("instrument {symbol}")))?;
        let (respond, rx) = oneshot::channel();
        handle
            .tx
            .try_send(Envelope { command, respond })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => CoreError::Busy {
                    symbol: symbol.to_string(),
                },
                mpsc::error::TrySendError::Closed(_) => CoreError::Halted {
                    symbol: symbol.to_string(),
                },
            })?;
        Ok(rx)
    }

    /// Decompose a user-wide cancel into one command per instrument loop
    /// and await them all.
    async fn fan_out_cancel_all(&self, command: Command) -> Result<CommandResult, CoreError> {
        let Command::CancelAll {
            user_id,
            account_id,
            deadline_ms,
            ..
        } = command
        else {
            return Err(CoreError::Validation("expected cancel-all".to_string()));
        };

        let mut receivers = Vec::new();
        for symbol in self.symbols() {
            let per_instrument = Command::CancelAll {
                user_id,
                account_id,
                symbol: Some(symbol.clone()),
                deadline_ms,
            };
            match self.enqueue(&symbol, per_instrument) {
                Ok(rx) => receivers.push((symbol, rx)),
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "cancel-all skipped instrument");
                }
            }
        }

        let mut cancelled_count = 0;
        for (symbol, rx) in receivers {
            match rx.await {
                Ok(Ok(CommandResult::AllCancelled {
                    cancelled_count: count,
                })) => cancelled_count += count,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(symbol = %symbol, error = %err, "cancel-all failed on instrument");
                }
                Err(_) => {
                    warn!(symbol = %symbol, "cancel-all response dropped");
                }
            }
        }
        Ok(CommandResult::AllCancelled { cancelled_count })
    }

    /// Events published so far, across instruments.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.publisher.publish_count()
    }
}
