// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

use std::time::Duration;

use crate::error::{InteractionError, SubmitSnafu, TxFailedSnafu};
use crate::pxe::{PxeClient, Sandbox, TxHash, TxReceipt, TxStatus};
use snafu::ResultExt;
use surf::Url;

/// Default interval between transaction receipt polls.
pub const RECEIPT_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls the receipt of `hash` until the transaction is mined.
///
/// Pending receipts are polled again after `interval`, with no upper bound on the number of
/// polls. Dropped or reverted transactions are errors.
///
/// Arguments:
/// - `sandbox`: The sandbox the transaction was sent to.
/// - `hash`: The hash returned when the transaction was submitted.
/// - `interval`: The pause between two receipt queries.
pub async fn wait_for_tx<S>(
    sandbox: &S,
    hash: &TxHash,
    interval: Duration,
) -> Result<TxReceipt, InteractionError>
where
    S: Sandbox + ?Sized,
{
    loop {
        let receipt = sandbox.tx_receipt(hash).await.context(SubmitSnafu)?;
        match receipt.status {
            TxStatus::Success => {
                tracing::debug!(%hash, block = ?receipt.block_number, "transaction mined");
                return Ok(receipt);
            }
            TxStatus::Pending => {
                tracing::trace!(%hash, "transaction pending");
                async_std::task::sleep(interval).await;
            }
            status => {
                tracing::warn!(%hash, %status, error = ?receipt.error, "transaction failed");
                return TxFailedSnafu {
                    hash: hash.clone(),
                    status,
                }
                .fail();
            }
        }
    }
}

/// Creates a client for the PXE listening at `pxe_url`.
pub fn create_client(pxe_url: &Url) -> PxeClient {
    tracing::debug!(url = %pxe_url, "connecting to PXE");
    PxeClient::new(pxe_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::tests::MockSandbox;

    #[async_std::test]
    async fn waits_through_pending_receipts() {
        let sandbox = MockSandbox::new().with_pending_polls(2);
        let hash = TxHash::from("0xabc".to_string());
        let receipt = wait_for_tx(&sandbox, &hash, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(sandbox.receipt_polls(), 3);
    }

    #[async_std::test]
    async fn dropped_transactions_fail() {
        let sandbox = MockSandbox::new().with_final_status(TxStatus::Dropped);
        let hash = TxHash::from("0xabc".to_string());
        let err = wait_for_tx(&sandbox, &hash, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InteractionError::TxFailed {
                status: TxStatus::Dropped,
                ..
            }
        ));
    }
}
