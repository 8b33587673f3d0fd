// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Calling functions of a deployed contract through an authorised wallet.

use crate::abi::{encode_arguments, AbiParameter, AbiType, ContractArtifact, FunctionArtifact};
use crate::deploy::{DeploymentResult, Wallet};
use crate::error::{EncodeSnafu, InteractionError, SignSnafu, SubmitSnafu};
use crate::fields::Fr;
use crate::pxe::{
    AztecAddress, GasSettings, HashedValues, NodeInfo, Sandbox, TxContext, TxExecutionRequest,
    TxHash, TxReceipt, ViewCall,
};
use crate::utils::{wait_for_tx, RECEIPT_INTERVAL};
use ethers::utils::hex;
use serde_json::{json, Value};
use snafu::ResultExt;
use std::time::Duration;
use strum::IntoEnumIterator;

/// A signature over a request hash, authorising the account contract to act on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthWitness {
    pub request_hash: Fr,
    pub witness: Vec<Fr>,
}

impl AuthWitness {
    /// Serializes as `request_hash || len(u32 BE) || witness...`, every field 32 bytes.
    pub fn to_buffer_hex(&self) -> String {
        let mut buf = Vec::with_capacity(36 + self.witness.len() * 32);
        buf.extend_from_slice(&self.request_hash.to_be_bytes());
        buf.extend_from_slice(&(self.witness.len() as u32).to_be_bytes());
        for field in &self.witness {
            buf.extend_from_slice(&field.to_be_bytes());
        }
        format!("0x{}", hex::encode(buf))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTx {
    pub hash: TxHash,
}

impl SentTx {
    pub async fn wait<S: Sandbox + ?Sized>(
        &self,
        sandbox: &S,
        interval: Duration,
    ) -> Result<TxReceipt, InteractionError> {
        wait_for_tx(sandbox, &self.hash, interval).await
    }
}

pub struct ContractFunctionInteraction<'a> {
    wallet: &'a Wallet,
    contract: AztecAddress,
    function: &'a FunctionArtifact,
    args: Vec<Value>,
    fee_payer: Option<AztecAddress>,
}

impl<'a> ContractFunctionInteraction<'a> {
    pub fn new(
        wallet: &'a Wallet,
        contract: AztecAddress,
        function: &'a FunctionArtifact,
        args: Vec<Value>,
    ) -> Self {
        Self {
            wallet,
            contract,
            function,
            args,
            fee_payer: None,
        }
    }

    /// Has another account pay the fees of this call.
    pub fn with_fee_payer(mut self, fee_payer: AztecAddress) -> Self {
        self.fee_payer = Some(fee_payer);
        self
    }

    pub async fn create_tx_execution_request(
        &self,
        node: &NodeInfo,
    ) -> Result<TxExecutionRequest, InteractionError> {
        let encoded = encode_arguments(self.function, &self.args).context(EncodeSnafu)?;
        let args = HashedValues::new(encoded);
        let selector = self.function.selector();

        let request_hash = Fr::hash(&[
            self.wallet.address().as_field().clone(),
            self.contract.as_field().clone(),
            selector.to_field(),
            args.hash.clone(),
        ]);
        let witness = self
            .wallet
            .create_auth_witness(&request_hash)
            .await
            .context(SignSnafu)?;

        tracing::debug!(
            function = %self.function.name,
            %selector,
            contract = %self.contract,
            "built execution request"
        );
        Ok(TxExecutionRequest {
            origin: self.wallet.address().clone(),
            to: self.contract.clone(),
            function_selector: selector.to_string(),
            first_call_args_hash: args.hash.clone(),
            tx_context: TxContext {
                chain_id: Fr::from(node.l1_chain_id),
                version: Fr::from(node.rollup_version),
                gas_settings: GasSettings::default(),
            },
            args_of_calls: vec![args],
            auth_witnesses: vec![witness.to_buffer_hex()],
            capsules: vec![],
            fee_payer: self.fee_payer.clone(),
        })
    }

    pub async fn send<S: Sandbox + ?Sized>(
        &self,
        sandbox: &S,
        node: &NodeInfo,
    ) -> Result<SentTx, InteractionError> {
        let request = self.create_tx_execution_request(node).await?;
        let hash = sandbox.send_tx(&request).await.context(SubmitSnafu)?;
        tracing::info!(function = %self.function.name, %hash, "transaction sent");
        Ok(SentTx { hash })
    }
}

/// The entry points of the key-value storage contract.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum StorageEntryPoint {
    /// Seeds the scalar slot with 700 and map slot 1 with 1.
    Constructor,
    SetJustField,
    GetJustField,
    SetFieldInMap,
    ReadFieldInMap,
}

impl StorageEntryPoint {
    pub fn parameters(self) -> Vec<AbiParameter> {
        match self {
            Self::Constructor | Self::GetJustField => vec![],
            Self::SetJustField => vec![AbiParameter::new("value", AbiType::Field)],
            Self::SetFieldInMap => vec![
                AbiParameter::new("key", AbiType::Field),
                AbiParameter::new("value", AbiType::Field),
            ],
            Self::ReadFieldInMap => vec![AbiParameter::new("key", AbiType::Field)],
        }
    }

    pub fn artifact(self) -> FunctionArtifact {
        FunctionArtifact {
            name: self.to_string(),
            parameters: self.parameters(),
            is_initializer: self == Self::Constructor,
        }
    }
}

/// Artifact of the storage contract, used when no compiled artifact file is configured.
pub fn storage_artifact() -> ContractArtifact {
    ContractArtifact {
        name: "Storage".to_string(),
        functions: StorageEntryPoint::iter()
            .map(StorageEntryPoint::artifact)
            .collect(),
    }
}

/// Typed handle on a deployed storage contract.
pub struct StorageContract<'a, S: ?Sized> {
    sandbox: &'a S,
    deployment: &'a DeploymentResult,
    artifact: ContractArtifact,
    node: NodeInfo,
    receipt_interval: Duration,
}

impl<'a, S: Sandbox + ?Sized> StorageContract<'a, S> {
    pub async fn at(
        sandbox: &'a S,
        deployment: &'a DeploymentResult,
    ) -> Result<StorageContract<'a, S>, InteractionError> {
        let node = sandbox.node_info().await.context(SubmitSnafu)?;
        Ok(Self {
            sandbox,
            deployment,
            artifact: storage_artifact(),
            node,
            receipt_interval: RECEIPT_INTERVAL,
        })
    }

    pub fn with_receipt_interval(mut self, interval: Duration) -> Self {
        self.receipt_interval = interval;
        self
    }

    fn function(&self, entry: StorageEntryPoint) -> Result<&FunctionArtifact, InteractionError> {
        self.artifact
            .function(&entry.to_string())
            .context(EncodeSnafu)
    }

    async fn send(
        &self,
        entry: StorageEntryPoint,
        args: Vec<Value>,
    ) -> Result<TxReceipt, InteractionError> {
        let function = self.function(entry)?;
        let sent = ContractFunctionInteraction::new(
            &self.deployment.wallet,
            self.deployment.contract_address.clone(),
            function,
            args,
        )
        .send(self.sandbox, &self.node)
        .await?;
        sent.wait(self.sandbox, self.receipt_interval).await
    }

    async fn view(
        &self,
        entry: StorageEntryPoint,
        args: Vec<Value>,
    ) -> Result<Value, InteractionError> {
        let function = self.function(entry)?;
        // Validate the arguments locally before handing them to the PXE.
        encode_arguments(function, &args).context(EncodeSnafu)?;
        let call = ViewCall {
            function_name: function.name.clone(),
            args,
            to: self.deployment.contract_address.clone(),
            from: self.deployment.wallet.address().clone(),
        };
        self.sandbox.view(&call).await.context(SubmitSnafu)
    }

    pub async fn set_just_field(&self, value: impl Into<Fr>) -> Result<TxReceipt, InteractionError> {
        let value: Fr = value.into();
        self.send(StorageEntryPoint::SetJustField, vec![json!(value)])
            .await
    }

    pub async fn get_just_field(&self) -> Result<Value, InteractionError> {
        self.view(StorageEntryPoint::GetJustField, vec![]).await
    }

    pub async fn set_field_in_map(
        &self,
        key: impl Into<Fr>,
        value: impl Into<Fr>,
    ) -> Result<TxReceipt, InteractionError> {
        let (key, value): (Fr, Fr) = (key.into(), value.into());
        self.send(StorageEntryPoint::SetFieldInMap, vec![json!(key), json!(value)])
            .await
    }

    pub async fn read_field_in_map(&self, key: impl Into<Fr>) -> Result<Value, InteractionError> {
        let key: Fr = key.into();
        self.view(StorageEntryPoint::ReadFieldInMap, vec![json!(key)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::FunctionSelector;
    use crate::deploy::tests::{test_deployment, MockSandbox};
    use std::str::FromStr;

    #[test]
    fn storage_artifact_lists_every_entry_point() {
        let artifact = storage_artifact();
        assert_eq!(artifact.functions.len(), 5);
        assert_eq!(artifact.initializer().unwrap().name, "constructor");
        assert_eq!(
            StorageEntryPoint::from_str("read_field_in_map").unwrap(),
            StorageEntryPoint::ReadFieldInMap
        );
        assert_eq!(
            artifact.function("set_field_in_map").unwrap().selector(),
            FunctionSelector::from_signature("set_field_in_map(Field,Field)")
        );
    }

    #[test]
    fn auth_witness_buffer_layout() {
        let witness = AuthWitness {
            request_hash: Fr::from(1u64),
            witness: vec![Fr::from(2u64), Fr::from(3u64)],
        };
        let hex = witness.to_buffer_hex();
        // 0x + (32 + 4 + 2 * 32) bytes
        assert_eq!(hex.len(), 2 + 2 * 100);
        assert_eq!(&hex[66..74], "00000002");
    }

    #[async_std::test]
    async fn execution_request_commits_to_arguments() {
        let deployment = test_deployment();
        let node = NodeInfo {
            node_version: "test".into(),
            l1_chain_id: 31337,
            rollup_version: 1,
        };
        let function = StorageEntryPoint::SetJustField.artifact();
        let request = ContractFunctionInteraction::new(
            &deployment.wallet,
            deployment.contract_address.clone(),
            &function,
            vec![json!(214)],
        )
        .create_tx_execution_request(&node)
        .await
        .unwrap();

        assert_eq!(request.function_selector, function.selector().to_string());
        assert_eq!(request.args_of_calls[0].values, vec![Fr::from(214u64)]);
        assert_eq!(request.first_call_args_hash, Fr::hash(&[Fr::from(214u64)]));
        assert_eq!(request.tx_context.chain_id, Fr::from(31337u64));
        assert_eq!(request.auth_witnesses.len(), 1);
        assert_eq!(request.fee_payer, None);
    }

    #[async_std::test]
    async fn storage_calls_reach_the_sandbox() {
        let sandbox = MockSandbox::new();
        let deployment = test_deployment();
        let storage = StorageContract::at(&sandbox, &deployment)
            .await
            .unwrap()
            .with_receipt_interval(Duration::from_millis(1));

        storage.set_just_field(5u64).await.unwrap();
        storage.set_field_in_map(1u64, 9u64).await.unwrap();
        assert_eq!(storage.get_just_field().await.unwrap(), json!("700"));
        storage.read_field_in_map(1u64).await.unwrap();

        let sent = sandbox.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, deployment.contract_address);
        assert_eq!(sent[1].args_of_calls[0].values, vec![Fr::from(1u64), Fr::from(9u64)]);

        let views = sandbox.views();
        assert_eq!(views[0].function_name, "get_just_field");
        assert_eq!(views[1].function_name, "read_field_in_map");
        assert_eq!(views[1].from, *deployment.wallet.address());
    }

    #[async_std::test]
    async fn view_arguments_are_checked_locally() {
        let sandbox = MockSandbox::new();
        let deployment = test_deployment();
        let storage = StorageContract::at(&sandbox, &deployment).await.unwrap();
        let err = storage
            .view(StorageEntryPoint::ReadFieldInMap, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, InteractionError::Encode { .. }));
        assert!(sandbox.views().is_empty());
    }
}
