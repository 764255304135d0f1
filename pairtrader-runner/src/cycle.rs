//! One decision cycle: gather inputs, decide, execute, record.
//!
//! Collaborator failures never escape a cycle; they are recorded and the
//! cycle holds. The one exception is the ledger: if the anchor cannot be
//! read, or a fill cannot be recorded, the cycle fails with [`CycleError`]
//! rather than deciding from a history it cannot see.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use pairtrader_core::domain::{Forecast, MarketSnapshot, Pair, Trade};
use pairtrader_core::engine::{decide, Action, Decision, DecisionConfig};
use pairtrader_core::ledger::{LedgerError, TradeLedger};
use pairtrader_core::provider::{ExecutionAdapter, ForecastProvider, ProviderError, SnapshotProvider};

use crate::audit::{Collaborator, CollaboratorFailure, DecisionLog, DecisionRecord, ExecutionOutcome};
use crate::timeout::{bounded, bounded_or_late};

/// Ledger failures that stop a cycle. Everything else is reported, not returned.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("ledger unreadable, refusing to decide: {0}")]
    AnchorUnreadable(#[source] LedgerError),

    #[error("order filled but could not be recorded ({trade:?}): {source}")]
    RecordFailed {
        trade: Box<Trade>,
        #[source]
        source: LedgerError,
    },
}

/// Whether a cycle may submit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleMode {
    Execute,
    /// Decide and report only; nothing is submitted or appended.
    DryRun,
}

/// Everything a cycle touches beyond the engine itself.
#[derive(Clone)]
pub struct Collaborators {
    pub snapshot: Arc<dyn SnapshotProvider>,
    pub forecast: Arc<dyn ForecastProvider>,
    pub execution: Arc<dyn ExecutionAdapter>,
    pub ledger: Arc<dyn TradeLedger>,
}

/// Everything one cycle saw, decided, and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub anchor: Option<Trade>,
    pub snapshot: Option<MarketSnapshot>,
    pub forecast: Option<Forecast>,
    pub decision: Option<Decision>,
    pub failures: Vec<CollaboratorFailure>,
    pub execution: ExecutionOutcome,
}

impl CycleReport {
    /// The decided action, `Hold` when the cycle stopped before deciding.
    pub fn action(&self) -> Action {
        self.decision.as_ref().map_or(Action::Hold, |d| d.action)
    }

    /// A cycle is healthy when every collaborator answered.
    pub fn is_healthy(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs decision cycles for one pair against its collaborators.
pub struct Trader {
    config: DecisionConfig,
    collaborators: Collaborators,
    call_timeout: Duration,
    decision_log: Option<DecisionLog>,
    fingerprint: String,
}

impl Trader {
    /// Trader with no audit log; each collaborator call gets `call_timeout`.
    pub fn new(config: DecisionConfig, collaborators: Collaborators, call_timeout: Duration) -> Self {
        Self {
            config,
            collaborators,
            call_timeout,
            decision_log: None,
            fingerprint: String::new(),
        }
    }

    /// Write one [`DecisionRecord`] per cycle, stamped with `fingerprint`.
    pub fn with_decision_log(mut self, log: DecisionLog, fingerprint: impl Into<String>) -> Self {
        self.decision_log = Some(log);
        self.fingerprint = fingerprint.into();
        self
    }

    /// Decision settings in use.
    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// The ledger this trader reads and appends to.
    pub fn ledger(&self) -> &Arc<dyn TradeLedger> {
        &self.collaborators.ledger
    }

    /// Run one cycle as of `now`. In dry-run mode nothing is submitted or appended.
    pub fn run_cycle(&self, now: DateTime<Utc>, mode: CycleMode) -> Result<CycleReport, CycleError> {
        let pair = self.config.pair.clone();

        let anchor = self
            .collaborators
            .ledger
            .last_filled()
            .map_err(|e| {
                error!(%pair, error = %e, "ledger unreadable");
                self.audit_ledger_failure(now, &e);
                CycleError::AnchorUnreadable(e)
            })?;

        let mut failures = Vec::new();

        let snapshot = {
            let provider = Arc::clone(&self.collaborators.snapshot);
            let pair = pair.clone();
            match bounded("snapshot", self.call_timeout, move || provider.snapshot(&pair)) {
                Ok(s) => Some(s),
                Err(e) => {
                    failures.push(failure(Collaborator::Snapshot, &e));
                    None
                }
            }
        };

        // Forecast is only fetched when there is something to decide on.
        let forecast = if snapshot.is_some() {
            let provider = Arc::clone(&self.collaborators.forecast);
            let pair = pair.clone();
            match bounded("forecast", self.call_timeout, move || provider.forecast(&pair, now)) {
                Ok(f) => f,
                Err(e) => {
                    failures.push(failure(Collaborator::Forecast, &e));
                    None
                }
            }
        } else {
            None
        };

        let decision = snapshot
            .as_ref()
            .map(|s| decide(s, anchor.as_ref(), forecast.as_ref(), now, &self.config));

        if let Some(d) = &decision {
            info!(
                %pair,
                action = ?d.action,
                branch = ?d.branch,
                state = ?d.state,
                price = d.inputs.last_price,
                free_base = d.inputs.free_base,
                free_quote = d.inputs.free_quote,
                anchor_price = ?d.inputs.anchor_price,
                forecast_low = ?d.inputs.forecast_low,
                forecast_high = ?d.inputs.forecast_high,
                target = ?d.inputs.target_price,
                "decision"
            );
        } else {
            info!(%pair, action = "hold", "decision skipped: no market snapshot");
        }

        let execution = match (decision.as_ref().map(|d| d.action), mode) {
            (None | Some(Action::Hold), _) => ExecutionOutcome::NotAttempted,
            (Some(_), CycleMode::DryRun) => ExecutionOutcome::DryRun,
            (Some(action), CycleMode::Execute) => self.execute(action, &mut failures)?,
        };

        let report = CycleReport {
            timestamp: now,
            anchor,
            snapshot,
            forecast,
            decision,
            failures,
            execution,
        };
        self.audit(&report);
        Ok(report)
    }

    fn execute(&self, action: Action, failures: &mut Vec<CollaboratorFailure>) -> Result<ExecutionOutcome, CycleError> {
        let (Some(side), Some(base_amount)) = (action.side(), action.base_amount()) else {
            return Ok(ExecutionOutcome::NotAttempted);
        };
        let adapter = Arc::clone(&self.collaborators.execution);
        let pair = self.config.pair.clone();
        let late_ledger = Arc::clone(&self.collaborators.ledger);
        let late_pair = self.config.pair.clone();
        let submitted = bounded_or_late(
            "execution",
            self.call_timeout,
            move || adapter.submit_market_order(&pair, side, base_amount),
            move |late| record_late_fill(late_ledger.as_ref(), &late_pair, late),
        );

        match submitted {
            Ok(trade) => {
                self.collaborators.ledger.append(&trade).map_err(|source| {
                    error!(pair = %self.config.pair, ?trade, error = %source, "filled trade could not be recorded");
                    self.audit_ledger_failure(trade.timestamp, &source);
                    CycleError::RecordFailed {
                        trade: Box::new(trade.clone()),
                        source,
                    }
                })?;
                debug!(pair = %self.config.pair, side = %trade.side, "fill recorded");
                Ok(ExecutionOutcome::Filled { trade })
            }
            Err(ProviderError::Rejected(reason)) => {
                warn!(pair = %self.config.pair, %side, base_amount, %reason, "order rejected");
                Ok(ExecutionOutcome::Rejected { reason })
            }
            Err(e) => {
                if matches!(e, ProviderError::Timeout(_)) {
                    warn!(
                        pair = %self.config.pair,
                        %side,
                        "order timed out; a fill that arrives later is still recorded"
                    );
                }
                failures.push(failure(Collaborator::Execution, &e));
                Ok(ExecutionOutcome::Failed { reason: e.to_string() })
            }
        }
    }

    fn audit(&self, report: &CycleReport) {
        self.write_record(DecisionRecord {
            timestamp: report.timestamp,
            pair: self.config.pair.clone(),
            config_fingerprint: self.fingerprint.clone(),
            decision: report.decision.clone(),
            failures: report.failures.clone(),
            execution: report.execution.clone(),
        });
    }

    fn audit_ledger_failure(&self, timestamp: DateTime<Utc>, e: &LedgerError) {
        self.write_record(DecisionRecord {
            timestamp,
            pair: self.config.pair.clone(),
            config_fingerprint: self.fingerprint.clone(),
            decision: None,
            failures: vec![CollaboratorFailure {
                collaborator: Collaborator::Ledger,
                error: e.to_string(),
                transient: false,
            }],
            execution: ExecutionOutcome::NotAttempted,
        });
    }

    fn write_record(&self, record: DecisionRecord) {
        let Some(log) = &self.decision_log else {
            return;
        };
        if let Err(e) = log.append(&record) {
            warn!(path = %log.path().display(), error = %e, "failed to write decision record");
        }
    }
}

fn failure(collaborator: Collaborator, e: &ProviderError) -> CollaboratorFailure {
    warn!(?collaborator, error = %e, "collaborator failed; holding");
    CollaboratorFailure {
        collaborator,
        error: e.to_string(),
        transient: e.is_transient(),
    }
}

/// Append a fill that arrived after the cycle gave up on the order, so the
/// anchor matches what the venue holds.
fn record_late_fill(ledger: &dyn TradeLedger, pair: &Pair, late: Result<Trade, ProviderError>) {
    match late {
        Ok(trade) => match ledger.append(&trade) {
            Ok(()) => warn!(%pair, side = %trade.side, base = trade.base_amount, "late fill recorded"),
            Err(e) => error!(%pair, ?trade, error = %e, "late fill could not be recorded"),
        },
        Err(e) => debug!(%pair, error = %e, "timed-out order finished without a fill"),
    }
}
