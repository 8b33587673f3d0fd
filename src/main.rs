// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

use async_compatibility_layer::logging::{setup_backtrace, setup_logging};
use clap::Parser;
use sandbox_harness::{
    abi::ContractArtifact,
    cancel::CancelToken,
    deploy::Deployer,
    error::{ConstructorArgsSnafu, HarnessError, LoadArtifactSnafu},
    interaction::{storage_artifact, StorageContract},
    orchestrator::{self, HarnessConfig},
    utils::create_client,
    Options,
};
use snafu::ResultExt;

#[async_std::main]
async fn main() {
    // Set up logging and backtrace for error reporting
    setup_logging();
    setup_backtrace();

    // Parse command-line arguments using the Options struct
    let opt = Options::parse();

    if let Err(err) = run(&opt).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

async fn run(opt: &Options) -> Result<(), HarnessError> {
    // Deploy the compiled artifact if one is configured, otherwise the built-in storage contract.
    let artifact = match &opt.artifact {
        Some(path) => ContractArtifact::from_file(path).context(LoadArtifactSnafu)?,
        None => storage_artifact(),
    };
    let is_storage = opt.artifact.is_none();

    let pxe = create_client(&opt.pxe_url);
    let deployer = Deployer::new(pxe.clone(), artifact)
        .with_constructor_args(opt.constructor_args.clone().into())
        .with_receipt_interval(opt.receipt_interval());
    // Arguments that can never initialize the contract would fail every retry.
    deployer
        .check_constructor_args()
        .context(ConstructorArgsSnafu)?;
    let config = HarnessConfig::from(opt);
    let cancel = CancelToken::new();

    tracing::info!(url = %opt.pxe_url, "waiting for the sandbox before deploying");
    let harness = orchestrator::start(&pxe, &deployer, &config, &cancel).await?;

    let deployment = &harness.deployment;
    tracing::info!(
        contract = %deployment.contract_address,
        wallet = %deployment.wallet.address(),
        "deployment ready"
    );
    match pxe.get_block_number().await {
        Ok(block) => tracing::info!(block, "sandbox block height after deployment"),
        Err(err) => tracing::warn!("failed to read block number: {err}"),
    }
    if let Err(err) = pxe.get_contract_metadata(&deployment.contract_address).await {
        tracing::warn!("failed to fetch contract metadata: {err}");
    }

    // The storage contract seeds its scalar slot at construction; reading it back confirms the
    // wallet can talk to the deployed instance.
    if is_storage {
        let contract = StorageContract::at(&pxe, deployment)
            .await
            .map(|contract| contract.with_receipt_interval(opt.receipt_interval()));
        match contract {
            Ok(contract) => match contract.get_just_field().await {
                Ok(value) => tracing::info!(%value, "initial field value"),
                Err(err) => tracing::warn!("failed to read initial field value: {err}"),
            },
            Err(err) => tracing::warn!("failed to attach to storage contract: {err}"),
        }
    }

    harness.serve(&cancel).await
}
