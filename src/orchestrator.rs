// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Startup sequence of the harness: wait for the sandbox, deploy, then open the bridge.

use std::{num::NonZeroUsize, time::Duration};

use crate::bridge::{BridgeEvent, BridgeServer, BRIDGE_PORT};
use crate::cancel::CancelToken;
use crate::deploy::{Deploy, DeploymentResult};
use crate::error::{BridgeSnafu, HarnessError};
use crate::readiness::StatusSource;
use crate::retry::{deploy_with_retry, FixedInterval, DEPLOY_RETRY_DELAY, PROBE_INTERVAL};
use crate::Options;
use async_std::channel::Receiver;
use snafu::ResultExt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    pub bridge_host: String,
    pub bridge_port: u16,
    pub probe_interval: Duration,
    pub retry_delay: Duration,
    /// Total number of deployment attempts, including the first. `None` retries forever.
    pub max_deploy_attempts: Option<NonZeroUsize>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bridge_host: "0.0.0.0".to_string(),
            bridge_port: BRIDGE_PORT,
            probe_interval: PROBE_INTERVAL,
            retry_delay: DEPLOY_RETRY_DELAY,
            max_deploy_attempts: None,
        }
    }
}

impl HarnessConfig {
    fn retry_policy(&self) -> FixedInterval {
        let policy = FixedInterval::new(self.retry_delay);
        match self.max_deploy_attempts {
            Some(attempts) => policy.with_max_retries(attempts.get() - 1),
            None => policy,
        }
    }
}

impl From<&Options> for HarnessConfig {
    fn from(opt: &Options) -> Self {
        Self {
            bridge_host: opt.bridge_host.clone(),
            bridge_port: opt.bridge_port,
            probe_interval: opt.probe_interval(),
            retry_delay: opt.retry_delay(),
            max_deploy_attempts: opt.max_deploy_attempts,
        }
    }
}

/// A deployed contract with its bridge bound and ready to serve.
#[derive(Debug)]
pub struct Harness {
    pub deployment: DeploymentResult,
    pub bridge: BridgeServer,
}

impl Harness {
    pub fn bridge_port(&self) -> u16 {
        self.bridge.port()
    }

    pub fn subscribe(&mut self) -> Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }

    /// Serves the bridge until `cancel` fires.
    pub async fn serve(self, cancel: &CancelToken) -> Result<(), HarnessError> {
        tracing::info!(
            port = self.bridge.port(),
            contract = %self.deployment.contract_address,
            "serving bridge"
        );
        self.bridge.serve(cancel).await.context(BridgeSnafu)
    }
}

/// Waits for the sandbox, deploys the contract (retrying as configured) and binds the bridge.
///
/// The bridge is only bound once a deployment has succeeded.
pub async fn start<S, D>(
    status: &S,
    deployer: &D,
    config: &HarnessConfig,
    cancel: &CancelToken,
) -> Result<Harness, HarnessError>
where
    S: StatusSource + ?Sized,
    D: Deploy + ?Sized,
{
    let mut probe = FixedInterval::new(config.probe_interval);
    let mut retry = config.retry_policy();
    let deployment = deploy_with_retry(status, deployer, &mut probe, &mut retry, cancel).await?;

    let bridge = BridgeServer::bind(&config.bridge_host, config.bridge_port)
        .await
        .context(BridgeSnafu)?;
    Ok(Harness { deployment, bridge })
}
