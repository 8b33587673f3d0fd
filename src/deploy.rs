// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

use std::{fmt, time::Duration};

use crate::abi::{encode_arguments, AbiParameter, AbiType, ContractArtifact, FunctionArtifact, Sign};
use crate::error::{
    AbiError, AccountDeploySnafu, ArtifactSnafu, ContractDeploySnafu, DeploymentError,
    NoTestAccountsSnafu, NodeInfoSnafu, RegisterAccountSnafu, RegisterContractSnafu,
    SigningKeySnafu, TestAccountsSnafu,
};
use crate::fields::Fr;
use crate::interaction::{AuthWitness, ContractFunctionInteraction};
use crate::pxe::{AztecAddress, ContractInstance, HashedValues, Sandbox};
use crate::utils::RECEIPT_INTERVAL;
use async_trait::async_trait;
use ethers::{
    core::k256::{elliptic_curve::sec1::ToEncodedPoint, AffinePoint},
    signers::{LocalWallet, Signer, WalletError},
    types::Address,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaChaRng;
use serde_json::{json, Value};
use snafu::{OptionExt, ResultExt};

/// Domain separator mixed into the secret when deriving the signing key.
const SIGNING_KEY_DOMAIN: u64 = 0x5349_474e;

/// An account on the sandbox together with the key authorised to act for it.
///
/// This is the handle used for every call to a deployed contract.
#[derive(Clone)]
pub struct Wallet {
    address: AztecAddress,
    signer: LocalWallet,
}

impl Wallet {
    pub fn new(address: AztecAddress, signer: LocalWallet) -> Self {
        Self { address, signer }
    }

    pub fn address(&self) -> &AztecAddress {
        &self.address
    }

    /// Ethereum-style address of the signing key, useful to identify the key in logs.
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    /// Signs `request_hash`; the witness carries the 64 signature bytes `r || s`, one per field.
    pub async fn create_auth_witness(&self, request_hash: &Fr) -> Result<AuthWitness, WalletError> {
        let signature = self.signer.sign_message(request_hash.to_be_bytes()).await?;
        let bytes = signature.to_vec();
        Ok(AuthWitness {
            request_hash: request_hash.clone(),
            witness: bytes[..64].iter().map(|b| Fr::from(*b as u64)).collect(),
        })
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("signer", &self.signer.address())
            .finish()
    }
}

impl PartialEq for Wallet {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.signer.address() == other.signer.address()
    }
}

/// A deployed contract and the wallet authorised to call it.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentResult {
    pub contract_address: AztecAddress,
    pub wallet: Wallet,
}

/// One attempt at producing a fresh contract deployment.
#[async_trait]
pub trait Deploy: Send + Sync {
    async fn deploy(&self) -> Result<DeploymentResult, DeploymentError>;
}

/// Derives a secp256k1 signing key from an account secret.
pub fn derive_signing_key(secret: &Fr) -> Result<LocalWallet, WalletError> {
    let key = Fr::hash(&[secret.clone(), Fr::from(SIGNING_KEY_DOMAIN)]);
    LocalWallet::from_bytes(&key.to_be_bytes())
}

/// Uncompressed public key coordinates of `signer`.
pub fn signing_public_key(signer: &LocalWallet) -> ([u8; 32], [u8; 32]) {
    let affine: &AffinePoint = signer.signer().verifying_key().as_ref();
    let encoded = affine.to_encoded_point(false);
    // Tag byte, then x and y.
    let bytes = encoded.as_bytes();
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&bytes[1..33]);
    y.copy_from_slice(&bytes[33..65]);
    (x, y)
}

/// The ECDSA (secp256k1) account contract every fresh identity is deployed as.
pub fn ecdsa_account_artifact() -> ContractArtifact {
    let coordinate = AbiType::Array {
        length: 32,
        element: Box::new(AbiType::Integer {
            sign: Sign::Unsigned,
            width: 8,
        }),
    };
    ContractArtifact {
        name: "EcdsaKAccount".to_string(),
        functions: vec![FunctionArtifact {
            name: "constructor".to_string(),
            parameters: vec![
                AbiParameter::new("signing_pub_key_x", coordinate.clone()),
                AbiParameter::new("signing_pub_key_y", coordinate),
            ],
            is_initializer: true,
        }],
    }
}

/// Computes where `artifact` lands when `deployer` initializes it with `args` under `salt`.
pub fn contract_instance(
    artifact: &ContractArtifact,
    args: &[Value],
    salt: Fr,
    deployer: &AztecAddress,
) -> Result<ContractInstance, DeploymentError> {
    let initializer = artifact.initializer().context(ArtifactSnafu)?;
    let encoded = encode_arguments(initializer, args).context(ArtifactSnafu)?;
    let contract_class_id = artifact.class_id();
    let initialization_hash = Fr::hash(&[
        initializer.selector().to_field(),
        HashedValues::new(encoded).hash,
    ]);
    let address = Fr::hash(&[
        contract_class_id.clone(),
        salt.clone(),
        deployer.as_field().clone(),
        initialization_hash.clone(),
    ]);
    Ok(ContractInstance {
        address: address.into(),
        salt,
        deployer: deployer.clone(),
        contract_class_id,
        initialization_hash,
    })
}

/// Deploys a fresh account and a fresh instance of `artifact` on every call.
pub struct Deployer<S> {
    sandbox: S,
    artifact: ContractArtifact,
    constructor_args: Vec<Value>,
    receipt_interval: Duration,
}

impl<S: Sandbox> Deployer<S> {
    pub fn new(sandbox: S, artifact: ContractArtifact) -> Self {
        Self {
            sandbox,
            artifact,
            constructor_args: vec![],
            receipt_interval: RECEIPT_INTERVAL,
        }
    }

    pub fn with_constructor_args(mut self, args: Vec<Value>) -> Self {
        self.constructor_args = args;
        self
    }

    pub fn with_receipt_interval(mut self, interval: Duration) -> Self {
        self.receipt_interval = interval;
        self
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    pub fn artifact(&self) -> &ContractArtifact {
        &self.artifact
    }

    /// Checks the constructor arguments against the artifact's initializer.
    pub fn check_constructor_args(&self) -> Result<(), AbiError> {
        let initializer = self.artifact.initializer()?;
        encode_arguments(initializer, &self.constructor_args)?;
        Ok(())
    }

    /// Runs one deployment, drawing the account secret and both salts from `rng`.
    ///
    /// Arguments that cannot initialize the contract fail the attempt before anything is
    /// registered on the sandbox.
    pub async fn deploy_with_rng<R: RngCore + Send>(
        &self,
        rng: &mut R,
    ) -> Result<DeploymentResult, DeploymentError> {
        self.check_constructor_args().context(ArtifactSnafu)?;
        let node = self.sandbox.node_info().await.context(NodeInfoSnafu)?;
        let test_accounts = self
            .sandbox
            .test_accounts()
            .await
            .context(TestAccountsSnafu)?;
        let funder = test_accounts.first().context(NoTestAccountsSnafu)?;
        tracing::debug!(
            funder = %funder.address,
            available = test_accounts.len(),
            "using pre-provisioned test account"
        );

        // Fresh identity: secret, salt and the signing key derived from the secret.
        let secret = Fr::random(rng);
        let salt = Fr::random(rng);
        let signer = derive_signing_key(&secret).context(SigningKeySnafu)?;
        let (pub_x, pub_y) = signing_public_key(&signer);

        let account_artifact = ecdsa_account_artifact();
        let partial_address = Fr::hash(&[
            account_artifact.class_id(),
            salt,
            Fr::from_be_bytes(&pub_x),
            Fr::from_be_bytes(&pub_y),
        ]);
        let account = self
            .sandbox
            .register_account(&secret, &partial_address)
            .await
            .context(RegisterAccountSnafu)?;
        let wallet = Wallet::new(account.address.clone(), signer);

        let account_constructor = account_artifact.initializer().context(ArtifactSnafu)?;
        ContractFunctionInteraction::new(
            &wallet,
            account.address.clone(),
            account_constructor,
            vec![json!(pub_x), json!(pub_y)],
        )
        .with_fee_payer(funder.address.clone())
        .send(&self.sandbox, &node)
        .await
        .context(AccountDeploySnafu)?
        .wait(&self.sandbox, self.receipt_interval)
        .await
        .context(AccountDeploySnafu)?;
        tracing::info!(
            account = %wallet.address(),
            signer = ?wallet.signer_address(),
            "account deployed"
        );

        let instance = contract_instance(
            &self.artifact,
            &self.constructor_args,
            Fr::random(rng),
            wallet.address(),
        )?;
        self.sandbox
            .register_contract(&instance, &self.artifact)
            .await
            .context(RegisterContractSnafu)?;

        let initializer = self.artifact.initializer().context(ArtifactSnafu)?;
        ContractFunctionInteraction::new(
            &wallet,
            instance.address.clone(),
            initializer,
            self.constructor_args.clone(),
        )
        .send(&self.sandbox, &node)
        .await
        .context(ContractDeploySnafu)?
        .wait(&self.sandbox, self.receipt_interval)
        .await
        .context(ContractDeploySnafu)?;
        tracing::info!(
            contract = %instance.address,
            artifact = %self.artifact.name,
            "contract deployed"
        );

        Ok(DeploymentResult {
            contract_address: instance.address,
            wallet,
        })
    }
}

#[async_trait]
impl<S: Sandbox> Deploy for Deployer<S> {
    async fn deploy(&self) -> Result<DeploymentResult, DeploymentError> {
        let mut rng = ChaChaRng::from_entropy();
        self.deploy_with_rng(&mut rng).await
    }
}
