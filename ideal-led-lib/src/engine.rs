use tracing::{info, warn};

use crate::channel::DeviceChannel;
use crate::command::Command;
use crate::config::DiagnosticConfig;
use crate::diagnosis::{Diagnosis, classify};
use crate::error::LedError;
use crate::feedback::{OperatorFacts, OperatorFeedback};
use crate::probe::{Observation, Probe};
use crate::session::DeviceSession;

/// Runs the probe sequence against one session and classifies the result.
#[derive(Debug, Clone)]
pub struct DiagnosticEngine {
    config: DiagnosticConfig,
}

impl DiagnosticEngine {
    pub fn new(config: DiagnosticConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiagnosticConfig {
        &self.config
    }

    /// Probes in the order they run.
    pub fn probes(&self) -> Vec<Probe> {
        vec![
            Probe::IndividualAddress {
                indices: self.config.probe_indices(),
                suspected_limit: self.config.suspected_limit,
            },
            Probe::CountSweep {
                counts: self.config.candidate_counts.clone(),
            },
            Probe::Segment {
                settings: self.config.segment_settings.clone(),
            },
            Probe::ModelIndex {
                indices: self.config.model_indices.clone(),
            },
            Probe::ConfigRead {
                targets: self.config.config_reads.clone(),
            },
        ]
    }

    /// Run every probe (or stop early once the configured confidence is reached), then
    /// fold in `facts` and classify.
    ///
    /// Probe failures only weaken the evidence. The run itself fails only with
    /// [`LedError::Cancelled`] when the session's token fires.
    pub async fn run(
        &self,
        session: &DeviceSession,
        feedback: &mut dyn OperatorFeedback,
        facts: &OperatorFacts,
    ) -> Result<Diagnosis, LedError> {
        let mut evidence: Vec<Observation> = Vec::new();

        for probe in self.probes() {
            if session.is_cancelled() {
                info!("Run cancelled before {} probe", probe.id());
                return Err(LedError::Cancelled {
                    context: format!("before {} probe", probe.id()),
                });
            }

            let observation = probe.execute(session, feedback).await;
            evidence.push(observation);

            if session.is_cancelled() {
                return Err(LedError::Cancelled {
                    context: format!("{} probe", probe.id()),
                });
            }

            let provisional = classify(&evidence);
            info!("After {} probe: {provisional}", probe.id());
            if let Some(threshold) = self.config.early_exit_confidence {
                if provisional.is_decisive(threshold) {
                    info!("Confidence reached {threshold}, skipping remaining probes");
                    break;
                }
            }
        }

        evidence.extend(Observation::from_facts(facts));
        let diagnosis = classify(&evidence);
        info!("Diagnosis: {diagnosis}");
        Ok(diagnosis)
    }
}

/// Connect, prepare the strip, run the engine, and always disconnect.
///
/// Only a failed initial connection is fatal.
pub async fn run_diagnostics(
    channel: Box<dyn DeviceChannel>,
    address: &str,
    config: DiagnosticConfig,
    feedback: &mut dyn OperatorFeedback,
    facts: &OperatorFacts,
) -> Result<Diagnosis, LedError> {
    let session = DeviceSession::new(channel, address, config.session.clone());
    session.connect().await?;

    let result = diagnose(&session, config, feedback, facts).await;
    session.disconnect().await;
    result
}

/// Run the engine on an already connected session. The caller keeps ownership and
/// disconnects.
pub async fn diagnose(
    session: &DeviceSession,
    config: DiagnosticConfig,
    feedback: &mut dyn OperatorFeedback,
    facts: &OperatorFacts,
) -> Result<Diagnosis, LedError> {
    prepare(session, config.advertised_count).await;
    DiagnosticEngine::new(config).run(session, feedback, facts).await
}

/// Power on and claim the full advertised length. Failures here are not fatal.
async fn prepare(session: &DeviceSession, advertised_count: u16) {
    for command in [Command::power(true), Command::led_count(i64::from(advertised_count))] {
        if let Err(e) = session.send_command(&command).await {
            warn!("Preparation step '{command}' failed: {e}");
        }
    }
}
