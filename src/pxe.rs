// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! JSON-RPC client for the sandbox's private execution environment (PXE).

use crate::abi::ContractArtifact;
use crate::error::{DecodeSnafu, HttpSnafu, MissingResultSnafu, PxeError, RpcSnafu};
use crate::fields::Fr;
use crate::readiness::{StatusReport, StatusSource};
use async_trait::async_trait;
use derive_more::{Display, From, Into};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use snafu::{OptionExt, ResultExt};
use surf::Url;

/// Address of an account or contract on the sandbox.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AztecAddress(Fr);

impl AztecAddress {
    pub fn as_field(&self) -> &Fr {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxStatus {
    Dropped,
    Pending,
    Success,
    AppLogicReverted,
    TeardownReverted,
    BothReverted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub block_number: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(default)]
    pub node_version: String,
    pub l1_chain_id: u64,
    #[serde(alias = "protocolVersion")]
    pub rollup_version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteAddress {
    pub address: AztecAddress,
    #[serde(default)]
    pub partial_address: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInstance {
    pub address: AztecAddress,
    pub salt: Fr,
    pub deployer: AztecAddress,
    pub contract_class_id: Fr,
    pub initialization_hash: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gas {
    pub da_gas: u64,
    pub l2_gas: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFees {
    pub fee_per_da_gas: Fr,
    pub fee_per_l2_gas: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSettings {
    pub gas_limits: Gas,
    pub teardown_gas_limits: Gas,
    pub max_fees_per_gas: GasFees,
    pub max_priority_fees_per_gas: GasFees,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            gas_limits: Gas {
                da_gas: 1_000_000_000,
                l2_gas: 1_000_000_000,
            },
            teardown_gas_limits: Gas {
                da_gas: 6_000_000,
                l2_gas: 6_000_000,
            },
            max_fees_per_gas: GasFees {
                fee_per_da_gas: Fr::zero(),
                fee_per_l2_gas: Fr::from(0x2aa8u64),
            },
            max_priority_fees_per_gas: GasFees {
                fee_per_da_gas: Fr::zero(),
                fee_per_l2_gas: Fr::zero(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxContext {
    pub chain_id: Fr,
    pub version: Fr,
    pub gas_settings: GasSettings,
}

/// Call arguments together with the hash that commits to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedValues {
    pub values: Vec<Fr>,
    pub hash: Fr,
}

impl HashedValues {
    pub fn new(values: Vec<Fr>) -> Self {
        let hash = Fr::hash(&values);
        Self { values, hash }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxExecutionRequest {
    pub origin: AztecAddress,
    pub to: AztecAddress,
    pub function_selector: String,
    pub first_call_args_hash: Fr,
    pub tx_context: TxContext,
    pub args_of_calls: Vec<HashedValues>,
    pub auth_witnesses: Vec<String>,
    pub capsules: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_payer: Option<AztecAddress>,
}

/// A read-only call executed by the PXE without creating a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewCall {
    pub function_name: String,
    pub args: Vec<Value>,
    pub to: AztecAddress,
    pub from: AztecAddress,
}

/// The sandbox operations the deployer and contract handles rely on.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn node_info(&self) -> Result<NodeInfo, PxeError>;

    /// Accounts the sandbox provisions and funds at genesis.
    async fn test_accounts(&self) -> Result<Vec<CompleteAddress>, PxeError>;

    async fn register_account(
        &self,
        secret: &Fr,
        partial_address: &Fr,
    ) -> Result<CompleteAddress, PxeError>;

    async fn register_contract(
        &self,
        instance: &ContractInstance,
        artifact: &ContractArtifact,
    ) -> Result<(), PxeError>;

    /// Simulates, proves and submits a transaction.
    async fn send_tx(&self, request: &TxExecutionRequest) -> Result<TxHash, PxeError>;

    async fn view(&self, call: &ViewCall) -> Result<Value, PxeError>;

    async fn tx_receipt(&self, hash: &TxHash) -> Result<TxReceipt, PxeError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct PxeClient {
    url: Url,
    namespace: Option<String>,
    client: surf::Client,
}

impl PxeClient {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            namespace: Some("pxe".to_string()),
            client: surf::Client::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status_url(&self) -> String {
        format!("{}/status", self.url.as_str().trim_end_matches('/'))
    }

    fn method_name(&self, method: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}_{method}"),
            None => method.to_string(),
        }
    }

    /// Sends one JSON-RPC call and returns its `result`, which may legitimately be absent.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Option<Value>, PxeError> {
        let method = self.method_name(method);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        tracing::trace!(%method, "sending PXE request");

        let mut response = self
            .client
            .post(self.url.as_str())
            .body_json(&payload)
            .map_err(|err| self.http_error(err))?
            .await
            .map_err(|err| self.http_error(err))?;
        let text = response
            .body_string()
            .await
            .map_err(|err| self.http_error(err))?;

        let rpc: RpcResponse = serde_json::from_str(&text).context(DecodeSnafu { method: &method })?;
        if let Some(error) = rpc.error {
            return RpcSnafu { method, error }.fail();
        }
        Ok(rpc.result.filter(|v| !v.is_null()))
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, PxeError> {
        let full_method = self.method_name(method);
        let result = self
            .call(method, params)
            .await?
            .context(MissingResultSnafu {
                method: &full_method,
            })?;
        serde_json::from_value(result).context(DecodeSnafu {
            method: full_method,
        })
    }

    fn http_error(&self, err: surf::Error) -> PxeError {
        HttpSnafu {
            url: self.url.as_str(),
            reason: err.to_string(),
        }
        .build()
    }

    pub async fn get_node_info(&self) -> Result<NodeInfo, PxeError> {
        self.request("getNodeInfo", vec![]).await
    }

    pub async fn get_block_number(&self) -> Result<u64, PxeError> {
        self.request("getBlockNumber", vec![]).await
    }

    pub async fn get_registered_accounts(&self) -> Result<Vec<CompleteAddress>, PxeError> {
        self.request("getRegisteredAccounts", vec![]).await
    }

    pub async fn get_contract_metadata(&self, address: &AztecAddress) -> Result<Value, PxeError> {
        let metadata: Value = self
            .request("getContractMetadata", vec![json!(address)])
            .await?;
        if let Some(instance) = metadata.get("contractInstance") {
            tracing::debug!(
                address = %instance["address"],
                class_id = %instance["currentContractClassId"],
                "fetched contract metadata"
            );
        }
        Ok(metadata)
    }

    pub async fn simulate_tx(&self, request: &TxExecutionRequest) -> Result<Value, PxeError> {
        self.request(
            "simulateTx",
            vec![
                json!(request),
                json!(true),
                Value::Null,
                json!(false),
                json!(false),
                Value::Null,
            ],
        )
        .await
    }

    pub async fn prove_tx(
        &self,
        request: &TxExecutionRequest,
        private_execution_result: Value,
    ) -> Result<Value, PxeError> {
        self.request("proveTx", vec![json!(request), private_execution_result])
            .await
    }

    pub async fn get_tx_receipt(&self, hash: &TxHash) -> Result<TxReceipt, PxeError> {
        self.request("getTxReceipt", vec![json!(hash)]).await
    }
}

#[async_trait]
impl Sandbox for PxeClient {
    async fn node_info(&self) -> Result<NodeInfo, PxeError> {
        self.get_node_info().await
    }

    async fn test_accounts(&self) -> Result<Vec<CompleteAddress>, PxeError> {
        self.get_registered_accounts().await
    }

    async fn register_account(
        &self,
        secret: &Fr,
        partial_address: &Fr,
    ) -> Result<CompleteAddress, PxeError> {
        self.request(
            "registerAccount",
            vec![json!(secret), json!(partial_address)],
        )
        .await
    }

    async fn register_contract(
        &self,
        instance: &ContractInstance,
        artifact: &ContractArtifact,
    ) -> Result<(), PxeError> {
        self.call(
            "registerContract",
            vec![json!({ "instance": instance, "artifact": artifact })],
        )
        .await?;
        Ok(())
    }

    async fn send_tx(&self, request: &TxExecutionRequest) -> Result<TxHash, PxeError> {
        let simulation = self.simulate_tx(request).await?;
        let private_execution_result = simulation["privateExecutionResult"].clone();
        let proving = self.prove_tx(request, private_execution_result).await?;
        self.request("sendTx", vec![proving["tx"].clone()]).await
    }

    async fn view(&self, call: &ViewCall) -> Result<Value, PxeError> {
        self.request(
            "simulateUnconstrained",
            vec![
                json!(call.function_name),
                json!(call.args),
                json!(call.to),
                json!(call.from),
            ],
        )
        .await
    }

    async fn tx_receipt(&self, hash: &TxHash) -> Result<TxReceipt, PxeError> {
        self.get_tx_receipt(hash).await
    }
}

/// The HTTP stack does not expose the reason phrase the server sent, so the report carries the
/// canonical phrase of the status code: `200` reads as `OK` whatever text followed it.
#[async_trait]
impl StatusSource for PxeClient {
    async fn status(&self) -> Result<StatusReport, PxeError> {
        let url = self.status_url();
        let response = self
            .client
            .get(&url)
            .await
            .map_err(|err| self.http_error(err))?;
        Ok(StatusReport {
            status_text: response.status().canonical_reason().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves a single connection: reads the request head, then writes `response` or hangs up.
    fn answer_once(response: Option<&'static str>) -> PxeClient {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = vec![];
            let mut buf = [0u8; 512];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            assert!(head.starts_with(b"GET /status "));
            if let Some(response) = response {
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        PxeClient::new(url.parse().unwrap())
    }

    #[async_std::test]
    async fn status_reports_canonical_reason() {
        let ok = answer_once(Some(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));
        let report = ok.status().await.unwrap();
        assert_eq!(report.status_text, "OK");
        assert!(report.is_ready());

        let unavailable = answer_once(Some(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));
        let report = unavailable.status().await.unwrap();
        assert_eq!(report.status_text, "Service Unavailable");
        assert!(!report.is_ready());

        // Any 200 counts as ready, whatever phrase the server put after the code.
        let alive = answer_once(Some(
            "HTTP/1.1 200 Alive\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ));
        assert!(alive.status().await.unwrap().is_ready());
    }

    #[async_std::test]
    async fn status_hang_up_is_a_transport_error() {
        let dropped = answer_once(None);
        let err = dropped.status().await.unwrap_err();
        assert!(matches!(err, PxeError::Http { .. }));
    }

    #[test]
    fn status_url_appends_well_known_path() {
        let pxe = PxeClient::new("http://localhost:8080".parse().unwrap());
        assert_eq!(pxe.status_url(), "http://localhost:8080/status");
        let pxe = PxeClient::new("http://sandbox:9000/".parse().unwrap());
        assert_eq!(pxe.status_url(), "http://sandbox:9000/status");
    }

    #[test]
    fn methods_are_namespaced() {
        let pxe = PxeClient::new("http://localhost:8080".parse().unwrap());
        assert_eq!(pxe.method_name("getNodeInfo"), "pxe_getNodeInfo");
    }

    #[test]
    fn receipts_decode_from_camel_case() {
        let receipt: TxReceipt = serde_json::from_value(json!({
            "txHash": "0x1234",
            "status": "app_logic_reverted",
            "error": "assertion failed",
        }))
        .unwrap();
        assert_eq!(receipt.status, TxStatus::AppLogicReverted);
        assert_eq!(receipt.status.to_string(), "app_logic_reverted");
        assert_eq!(receipt.block_number, None);
    }

    #[test]
    fn node_info_accepts_legacy_version_key() {
        let info: NodeInfo = serde_json::from_value(json!({
            "l1ChainId": 31337,
            "protocolVersion": 1,
        }))
        .unwrap();
        assert_eq!(info.l1_chain_id, 31337);
        assert_eq!(info.rollup_version, 1);
    }

    #[test]
    fn default_gas_settings_serialize_as_hex_fees() {
        let value = serde_json::to_value(GasSettings::default()).unwrap();
        assert_eq!(value["gasLimits"]["l2Gas"], json!(1_000_000_000u64));
        assert!(value["maxFeesPerGas"]["feePerL2Gas"]
            .as_str()
            .unwrap()
            .ends_with("2aa8"));
    }
}
