//! Pipeline orchestrator
//!
//! Drives one tick per sample: ingest → filter → derive → detect → publish.
//! Owns the session state, turns transport loss into a reconnect with fresh
//! state, and stops cooperatively between ticks.

use crate::config::ServiceConfig;
use crate::ingest::{Connector, DeviceIngest};
use crate::publisher::Publisher;
use crate::state::PipelineState;
use ecg_core::{Clock, EcgError, EcgResult, OutboundMessage, RawSample};
use ecg_processing::{SessionState, SignalChain};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counters describing one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub samples_processed: u64,
    pub sessions: u64,
    pub reconnects: u64,
    pub malformed_records: u64,
    pub publish_failures: u64,
    pub final_state: PipelineState,
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self {
            samples_processed: 0,
            sessions: 0,
            reconnects: 0,
            malformed_records: 0,
            publish_failures: 0,
            final_state: PipelineState::Starting,
        }
    }
}

/// How a session ended
enum SessionEnd {
    Stopped,
    Lost(EcgError),
}

/// The real-time ECG pipeline
pub struct Pipeline {
    chain: SignalChain,
    ingest: DeviceIngest,
    publisher: Publisher,
    max_consecutive_malformed: u32,
    state: watch::Sender<PipelineState>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build the pipeline; the signal chain is designed here, once
    pub fn new(
        config: &ServiceConfig,
        connector: Box<dyn Connector>,
        clock: Arc<dyn Clock>,
        publisher: Publisher,
    ) -> EcgResult<Self> {
        config.validate()?;
        let chain = SignalChain::new(&config.processing)?;
        let (state, _) = watch::channel(PipelineState::Starting);

        Ok(Self {
            chain,
            ingest: DeviceIngest::new(connector, clock, config.ingest.clone()),
            publisher,
            max_consecutive_malformed: config.ingest.max_consecutive_malformed,
            state,
            cancel: CancellationToken::new(),
        })
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Token that stops the pipeline when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Run until stopped or until reconnection gives up.
    ///
    /// Returns the run's counters on stop, or the fatal error.
    pub async fn run(mut self) -> EcgResult<PipelineReport> {
        let mut report = PipelineReport::default();
        info!(device = %self.ingest.describe(), "Pipeline starting");

        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(self.stop(report)),
            connected = self.ingest.connect() => connected,
        };
        if let Err(e) = first {
            warn!(error = %e, "Initial connection failed");
        }

        loop {
            if !self.ingest.is_connected() {
                self.transition(PipelineState::Reconnecting);
                report.reconnects += 1;

                let reconnected = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(self.stop(report)),
                    reconnected = self.ingest.reconnect() => reconnected,
                };
                match reconnected {
                    Ok(attempts) => debug!(attempts, "Device reconnected"),
                    Err(e) => return Err(self.fail(e, report)),
                }
            }

            let session = self.chain.new_session();
            let span = info_span!("session", id = %session.id);
            report.sessions += 1;
            self.transition(PipelineState::Running { session: session.id });

            match self.run_session(session, &mut report).instrument(span).await {
                SessionEnd::Stopped => return Ok(self.stop(report)),
                SessionEnd::Lost(e) => {
                    warn!(error = %e, "Session lost");
                    self.ingest.mark_lost(&e);
                }
            }
        }
    }

    async fn run_session(&mut self, mut session: SessionState, report: &mut PipelineReport) -> SessionEnd {
        info!("Session started");
        let mut consecutive_malformed = 0u32;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                next = self.ingest.next_sample() => next,
            };

            let raw = match next {
                Ok(raw) => raw,
                Err(e) if e.is_recoverable() => return SessionEnd::Lost(e),
                Err(e) => {
                    report.malformed_records += 1;
                    consecutive_malformed += 1;
                    warn!(error = %e, consecutive = consecutive_malformed, "Skipping malformed record");

                    if consecutive_malformed > self.max_consecutive_malformed {
                        return SessionEnd::Lost(EcgError::disconnected(format!(
                            "{consecutive_malformed} consecutive malformed records"
                        )));
                    }
                    continue;
                }
            };
            consecutive_malformed = 0;

            self.tick(&mut session, &raw, report);
        }
    }

    fn tick(&self, session: &mut SessionState, raw: &RawSample, report: &mut PipelineReport) {
        let output = self.chain.process(session, raw);
        if output.elapsed > self.chain.sample_period() {
            warn!(
                elapsed_us = output.elapsed.as_micros() as u64,
                "Tick exceeded the sample period"
            );
        }

        let messages = [
            OutboundMessage::Raw(*raw),
            OutboundMessage::Filtered {
                leads: output.leads,
                bpm: output.bpm(),
            },
        ];
        for message in &messages {
            if let Err(e) = self.publisher.publish(message) {
                report.publish_failures += 1;
                warn!(topic = %message.topic(), error = %e, "Dropping message");
            }
        }

        report.samples_processed += 1;
    }

    fn transition(&self, next: PipelineState) {
        let current = self.state.borrow().clone();
        if !current.can_transition_to(&next) {
            debug!(from = %current, to = %next, "Unexpected state transition");
        }
        info!(from = %current, to = %next, "Pipeline state changed");
        self.state.send_replace(next);
    }

    fn stop(mut self, mut report: PipelineReport) -> PipelineReport {
        self.ingest.disconnect();
        self.publisher.close();
        self.transition(PipelineState::Stopped);

        report.final_state = PipelineState::Stopped;
        info!(
            samples = report.samples_processed,
            sessions = report.sessions,
            reconnects = report.reconnects,
            malformed = report.malformed_records,
            "Pipeline stopped"
        );
        report
    }

    fn fail(mut self, e: EcgError, report: PipelineReport) -> EcgError {
        self.ingest.disconnect();
        self.publisher.close();
        self.transition(PipelineState::Fatal {
            reason: e.to_string(),
        });

        error!(
            error = %e,
            samples = report.samples_processed,
            sessions = report.sessions,
            reconnects = report.reconnects,
            "Pipeline terminated"
        );
        e
    }
}
