// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.
//
// This file defines the configuration options of the sandbox harness and
// declares the modules that make up the deployment and bridge sequence.

use clap::Parser;
use derive_more::{From, Into};
use serde_json::Value;
use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};
use surf::Url;

pub mod abi;
pub mod bridge;
pub mod cancel;
pub mod deploy;
pub mod error;
pub mod fields;
pub mod interaction;
pub mod orchestrator;
pub mod pxe;
pub mod readiness;
pub mod retry;
pub mod utils;

/// `Options` defines the configuration of the harness.
/// Every parameter can be provided as a command-line argument or an environment variable.
#[derive(Parser, Clone, Debug)]
pub struct Options {
    /// URL of the sandbox's private execution environment (PXE).
    #[clap(long, env = "PXE_URL", default_value = "http://localhost:8080")]
    pub pxe_url: Url,

    /// Interface the WebSocket bridge listens on.
    #[clap(long, env = "BRIDGE_HOST", default_value = "0.0.0.0")]
    pub bridge_host: String,

    /// First port tried for the WebSocket bridge. Occupied ports are skipped.
    #[clap(long, env = "BRIDGE_PORT", default_value = "3002")]
    pub bridge_port: u16,

    /// Pause between two readiness probes of the sandbox, in milliseconds.
    #[clap(long, env = "PROBE_INTERVAL_MS", default_value = "5000")]
    pub probe_interval_ms: u64,

    /// Pause before redeploying after a failed deployment, in milliseconds.
    #[clap(long, env = "DEPLOY_RETRY_DELAY_MS", default_value = "10000")]
    pub retry_delay_ms: u64,

    /// Give up after this many deployment attempts. Retries forever when unset.
    #[clap(long, env = "MAX_DEPLOY_ATTEMPTS")]
    pub max_deploy_attempts: Option<NonZeroUsize>,

    /// Pause between two transaction receipt polls, in milliseconds.
    #[clap(long, env = "RECEIPT_INTERVAL_MS", default_value = "1000")]
    pub receipt_interval_ms: u64,

    /// Compiled contract artifact (JSON) to deploy instead of the built-in storage contract.
    #[clap(long, env = "CONTRACT_ARTIFACT")]
    pub artifact: Option<PathBuf>,

    /// Arguments of the contract's initializer, as a JSON array (e.g. `[1, "0x2a"]`).
    #[clap(long, env = "CONSTRUCTOR_ARGS", default_value = "[]")]
    pub constructor_args: ConstructorArgs,
}

/// Initializer arguments given on the command line as a JSON array.
#[derive(Clone, Debug, Default, PartialEq, Eq, From, Into)]
pub struct ConstructorArgs(pub Vec<Value>);

impl FromStr for ConstructorArgs {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(ConstructorArgs)
    }
}

impl Options {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn receipt_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructor_args_parse_as_json_array() {
        let opt = Options::parse_from(["sandbox-harness"]);
        assert_eq!(opt.constructor_args, ConstructorArgs::default());

        let opt = Options::parse_from(["sandbox-harness", "--constructor-args", r#"[1, "0x2a"]"#]);
        assert_eq!(opt.constructor_args.0, vec![json!(1), json!("0x2a")]);

        assert!(
            Options::try_parse_from(["sandbox-harness", "--constructor-args", r#"{"a": 1}"#])
                .is_err()
        );
    }

    #[test]
    fn zero_deploy_attempts_is_rejected() {
        assert!(Options::try_parse_from(["sandbox-harness", "--max-deploy-attempts", "0"]).is_err());
        let opt = Options::parse_from(["sandbox-harness", "--max-deploy-attempts", "1"]);
        assert_eq!(opt.max_deploy_attempts, NonZeroUsize::new(1));
    }
}
