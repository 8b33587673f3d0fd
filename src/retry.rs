// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Masks transient deployment failures by probing and redeploying until one attempt succeeds.

use crate::cancel::CancelToken;
use crate::deploy::{Deploy, DeploymentResult};
use crate::error::{CancelledSnafu, HarnessError, ReadinessSnafu, RetriesExhaustedSnafu};
use crate::readiness::{wait_until_ready, StatusSource};
use backoff::backoff::Backoff;
use snafu::{IntoError, ResultExt};
use std::time::Duration;

/// Default pause between readiness probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(5000);
/// Default pause before redeploying after a failed attempt.
pub const DEPLOY_RETRY_DELAY: Duration = Duration::from_millis(10_000);

/// Backoff policy returning the same interval every time, optionally a limited number of times.
#[derive(Clone, Debug)]
pub struct FixedInterval {
    interval: Duration,
    max_retries: Option<usize>,
    count: usize,
}

impl FixedInterval {
    /// Retries forever.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
            count: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl Backoff for FixedInterval {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.max_retries.map_or(false, |max| self.count >= max) {
            return None;
        }
        self.count += 1;
        Some(self.interval)
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Runs the readiness probe and then the deployer, repeating both after every failed deployment.
///
/// The probe policy is reset before each probe. Deployment failures are logged and followed by
/// the delay `retry` hands out; when `retry` runs dry the last failure is returned.
pub async fn deploy_with_retry<S, D, P, R>(
    status: &S,
    deployer: &D,
    probe: &mut P,
    retry: &mut R,
    cancel: &CancelToken,
) -> Result<DeploymentResult, HarnessError>
where
    S: StatusSource + ?Sized,
    D: Deploy + ?Sized,
    P: Backoff,
    R: Backoff,
{
    let mut attempts: usize = 0;
    loop {
        probe.reset();
        wait_until_ready(status, probe, cancel)
            .await
            .context(ReadinessSnafu)?;

        attempts += 1;
        match deployer.deploy().await {
            Ok(deployment) => {
                tracing::info!(
                    attempts,
                    contract = %deployment.contract_address,
                    "contract deployed"
                );
                return Ok(deployment);
            }
            Err(err) => {
                tracing::error!(attempts, %err, "deployment failed");
                let Some(delay) = retry.next_backoff() else {
                    return Err(RetriesExhaustedSnafu { attempts }.into_error(err));
                };
                tracing::info!(?delay, "retrying deployment");
                if !cancel.sleep(delay).await {
                    return CancelledSnafu.fail();
                }
            }
        }
    }
}
