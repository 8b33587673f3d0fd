// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

use crate::pxe::{TxHash, TxStatus};
use ethers::signers::WalletError;
use snafu::Snafu;
use std::{io, path::PathBuf};

/// A string could not be read as an element of the scalar field.
#[derive(Clone, Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FieldError {
    #[snafu(display("`{input}` is not a valid field element"))]
    Parse { input: String },
}

/// Errors raised while reading contract artifacts or encoding call arguments.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AbiError {
    #[snafu(display("function `{function}` takes {expected} arguments, got {actual}"))]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("argument `{name}` should be {expected}, got {value}"))]
    TypeMismatch {
        name: String,
        expected: String,
        value: String,
    },

    #[snafu(display("argument `{name}` does not fit {abi_type}: {value}"))]
    OutOfRange {
        name: String,
        abi_type: String,
        value: String,
    },

    #[snafu(display("array `{name}` should have {expected} elements, got {actual}"))]
    ArrayLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[snafu(display("argument `{name}`: {source}"))]
    InvalidField { name: String, source: FieldError },

    #[snafu(display("struct argument `{name}` is missing field `{field}`"))]
    MissingStructField { name: String, field: String },

    #[snafu(display("unknown function `{name}`"))]
    UnknownFunction { name: String },

    #[snafu(display("contract `{contract}` has no initializer"))]
    NoInitializer { contract: String },

    #[snafu(display("failed to read artifact {}: {}", path.display(), source))]
    ReadArtifact { path: PathBuf, source: io::Error },

    #[snafu(display("failed to parse artifact {}: {}", path.display(), source))]
    ParseArtifact {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Errors talking to the PXE over HTTP.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PxeError {
    #[snafu(display("request to {url} failed: {reason}"))]
    Http { url: String, reason: String },

    #[snafu(display("PXE returned error for {method}: {error}"))]
    Rpc {
        method: String,
        error: serde_json::Value,
    },

    #[snafu(display("missing `result` field in response to {method}"))]
    MissingResult { method: String },

    #[snafu(display("malformed response to {method}: {source}"))]
    Decode {
        method: String,
        source: serde_json::Error,
    },
}

/// Errors building, signing or confirming a contract call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InteractionError {
    #[snafu(display("failed to encode call: {source}"))]
    Encode { source: AbiError },

    #[snafu(display("failed to sign call: {source}"))]
    Sign { source: WalletError },

    #[snafu(display("sandbox rejected call: {source}"))]
    Submit { source: PxeError },

    #[snafu(display("transaction {hash} ended with status {status}"))]
    TxFailed { hash: TxHash, status: TxStatus },
}

/// Any failure of a single deployment attempt.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeploymentError {
    #[snafu(display("failed to read node info: {source}"))]
    NodeInfo { source: PxeError },

    #[snafu(display("failed to fetch test accounts: {source}"))]
    TestAccounts { source: PxeError },

    #[snafu(display("sandbox has no pre-provisioned test accounts"))]
    NoTestAccounts,

    #[snafu(display("failed to derive signing key: {source}"))]
    SigningKey { source: WalletError },

    #[snafu(display("failed to register account: {source}"))]
    RegisterAccount { source: PxeError },

    #[snafu(display("account deployment failed: {source}"))]
    AccountDeploy { source: InteractionError },

    #[snafu(display("failed to register contract: {source}"))]
    RegisterContract { source: PxeError },

    #[snafu(display("contract deployment failed: {source}"))]
    ContractDeploy { source: InteractionError },

    #[snafu(display("bad contract artifact: {source}"))]
    Artifact { source: AbiError },
}

/// The readiness prober stopped without seeing the service become ready.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReadinessError {
    #[snafu(display("readiness probe cancelled"))]
    ProbeCancelled,

    #[snafu(display("service not ready after {attempts} probes"))]
    GaveUp { attempts: usize },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BridgeError {
    #[snafu(display("failed to bind bridge on {host}:{port}: {source}"))]
    Bind {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[snafu(display("no free bridge port at or above {start}"))]
    PortsExhausted { start: u16 },

    #[snafu(display("failed to read bridge address: {source}"))]
    LocalAddr { source: io::Error },

    #[snafu(display("failed to encode acknowledgement: {source}"))]
    EncodeAck { source: serde_json::Error },
}

/// Fatal conditions that stop the harness.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HarnessError {
    #[snafu(display("{source}"))]
    Readiness { source: ReadinessError },

    #[snafu(display("deployment failed after {attempts} attempts: {source}"))]
    RetriesExhausted {
        attempts: usize,
        source: DeploymentError,
    },

    #[snafu(display("harness cancelled"))]
    Cancelled,

    #[snafu(display("bridge failed: {source}"))]
    Bridge { source: BridgeError },

    #[snafu(display("{source}"))]
    LoadArtifact { source: AbiError },

    #[snafu(display("constructor arguments do not match the initializer: {source}"))]
    ConstructorArgs { source: AbiError },
}
