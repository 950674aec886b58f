//! Multi-step submissions that must land in order.
//!
//! Credit actions usually take more than one transaction: approve the
//! stablecoin, then deposit it; borrow, then transfer the proceeds. Each
//! step is confirmed on-chain before the next card challenge starts, so the
//! user never signs a step whose predecessor might still fail.

use std::future::Future;

use alloy_primitives::B256;
use tracing::{info, warn};

use crate::account::Account;
use crate::error::{Error, Result};
use crate::rpc::{RpcClient, RpcError, RpcErrorKind, TransactionReceipt};
use crate::transaction::TransactionIntent;

/// Sends one transaction and waits until it is mined.
///
/// # Errors
///
/// Returns the errors of [`Account::send_transaction`], or [`Error::Rpc`]
/// with [`RpcErrorKind::Reverted`] if the receipt reports failure.
pub async fn send_and_confirm<A, C>(
    account: &A,
    client: &C,
    intent: &TransactionIntent,
) -> Result<TransactionReceipt>
where
    A: Account + ?Sized,
    C: RpcClient + ?Sized,
{
    send_and_confirm_with(client, account.send_transaction(intent)).await
}

/// Runs `send` and waits until the transaction it broadcast is mined.
///
/// The caller controls how the transaction is signed, e.g. under a
/// cancellable challenge. Nothing is awaited on chain when `send` fails.
///
/// # Errors
///
/// Returns the error of `send`, or [`Error::Rpc`] with
/// [`RpcErrorKind::Reverted`] if the receipt reports failure.
pub async fn send_and_confirm_with<C, F>(client: &C, send: F) -> Result<TransactionReceipt>
where
    C: RpcClient + ?Sized,
    F: Future<Output = Result<B256>>,
{
    let hash = send.await?;
    let receipt = client.wait_for_transaction_receipt(hash).await?;
    ensure_success(hash, receipt)
}

fn ensure_success(hash: B256, receipt: TransactionReceipt) -> Result<TransactionReceipt> {
    if receipt.status() {
        info!(%hash, block = ?receipt.block_number, "transaction confirmed");
        Ok(receipt)
    } else {
        Err(Error::Rpc(RpcError::new(
            RpcErrorKind::Reverted,
            None,
            format!("transaction {hash} reverted"),
        )))
    }
}

/// Sends `intents` one after another, each confirmed before the next.
///
/// Stops at the first failure; earlier steps stay on-chain.
///
/// # Errors
///
/// Returns the first step's error, see [`send_and_confirm`].
pub async fn send_sequence<A, C>(
    account: &A,
    client: &C,
    intents: &[TransactionIntent],
) -> Result<Vec<TransactionReceipt>>
where
    A: Account + ?Sized,
    C: RpcClient + ?Sized,
{
    send_sequence_with(client, intents, |intent| async move {
        account.send_transaction(&intent).await
    })
    .await
}

/// Like [`send_sequence`], with `send` signing and broadcasting each step.
///
/// `send` is called once per step, only after the previous step is
/// confirmed. A step that fails, including one cancelled before its tap,
/// stops the sequence.
///
/// # Errors
///
/// Returns the first step's error, see [`send_and_confirm_with`].
pub async fn send_sequence_with<C, F, Fut>(
    client: &C,
    intents: &[TransactionIntent],
    mut send: F,
) -> Result<Vec<TransactionReceipt>>
where
    C: RpcClient + ?Sized,
    F: FnMut(TransactionIntent) -> Fut,
    Fut: Future<Output = Result<B256>>,
{
    let mut receipts = Vec::with_capacity(intents.len());
    for (step, intent) in intents.iter().enumerate() {
        match send_and_confirm_with(client, send(intent.clone())).await {
            Ok(receipt) => receipts.push(receipt),
            Err(err) => {
                warn!(step, total = intents.len(), %err, "multi-step submission stopped");
                return Err(err);
            }
        }
    }
    Ok(receipts)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use alloy_primitives::{Bytes, U256};
    use async_trait::async_trait;
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::address::Address;
    use crate::eip712::TypedData;
    use crate::rpc::{BlockNumberOrTag, Filter, Log, TransactionRequest};
    use crate::signature::Signature;

    /// Logs every send and every confirmation into one shared journal.
    struct Journal(RefCell<Vec<String>>);

    struct JournalAccount<'a>(&'a Journal);

    #[async_trait(?Send)]
    impl Account for JournalAccount<'_> {
        fn address(&self) -> Address {
            Address::new([1; 20])
        }

        async fn sign_message(&self, _message: &[u8]) -> Result<Signature> {
            unreachable!()
        }

        async fn sign_typed_data(&self, _data: &TypedData) -> Result<Signature> {
            unreachable!()
        }

        async fn sign_transaction(&self, _intent: &TransactionIntent) -> Result<Vec<u8>> {
            unreachable!()
        }

        async fn send_transaction(&self, intent: &TransactionIntent) -> Result<B256> {
            let nonce = intent.nonce.unwrap_or_default();
            self.0.0.borrow_mut().push(format!("send {nonce}"));
            Ok(B256::with_last_byte(u8::try_from(nonce).unwrap()))
        }
    }

    struct JournalClient<'a> {
        journal: &'a Journal,
        reverted: Option<u8>,
    }

    #[async_trait(?Send)]
    impl RpcClient for JournalClient<'_> {
        async fn chain_id(&self) -> Result<u64> {
            Ok(545)
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(0)
        }

        async fn call(&self, _request: &TransactionRequest, _block: BlockNumberOrTag) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64> {
            Ok(0)
        }

        async fn gas_price(&self) -> Result<U256> {
            Ok(U256::ZERO)
        }

        async fn transaction_count(&self, _address: Address, _block: BlockNumberOrTag) -> Result<u64> {
            Ok(0)
        }

        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<B256> {
            unreachable!()
        }

        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<TransactionReceipt>> {
            Ok(None)
        }

        async fn wait_for_transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
            let step = hash[31];
            self.journal.0.borrow_mut().push(format!("mined {step}"));
            let status = if self.reverted == Some(step) { "0x0" } else { "0x1" };
            Ok(serde_json::from_value(json!({
                "type": "0x2",
                "status": status,
                "cumulativeGasUsed": "0x5208",
                "logs": [],
                "logsBloom": format!("0x{}", "00".repeat(256)),
                "transactionHash": hash,
                "blockNumber": format!("0x{step:x}"),
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x1",
                "from": "0x0101010101010101010101010101010101010101",
            }))?)
        }

        async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>> {
            Ok(Vec::new())
        }
    }

    fn intents(n: u64) -> Vec<TransactionIntent> {
        (0..n)
            .map(|nonce| TransactionIntent::new(Address::new([2; 20]), 545).with_nonce(nonce))
            .collect()
    }

    #[test]
    fn steps_are_confirmed_in_order() {
        let journal = Journal(RefCell::new(Vec::new()));
        let client = JournalClient {
            journal: &journal,
            reverted: None,
        };

        let receipts = block_on(send_sequence(&JournalAccount(&journal), &client, &intents(3)))
            .unwrap();
        assert_eq!(receipts.len(), 3);
        assert_eq!(receipts[2].block_number, Some(2));
        assert_eq!(
            *journal.0.borrow(),
            vec!["send 0", "mined 0", "send 1", "mined 1", "send 2", "mined 2"]
        );
    }

    #[test]
    fn revert_stops_the_sequence() {
        let journal = Journal(RefCell::new(Vec::new()));
        let client = JournalClient {
            journal: &journal,
            reverted: Some(1),
        };

        let err = block_on(send_sequence(&JournalAccount(&journal), &client, &intents(3)))
            .unwrap_err();
        assert_eq!(err.rpc_kind(), Some(RpcErrorKind::Reverted));
        assert_eq!(
            *journal.0.borrow(),
            vec!["send 0", "mined 0", "send 1", "mined 1"]
        );
    }

    #[test]
    fn cancelled_step_stops_the_sequence() {
        let journal = Journal(RefCell::new(Vec::new()));
        let client = JournalClient {
            journal: &journal,
            reverted: None,
        };
        let account = JournalAccount(&journal);

        let err = block_on(send_sequence_with(&client, &intents(3), |intent| {
            let account = &account;
            async move {
                if intent.nonce == Some(1) {
                    return Err(Error::Cancelled);
                }
                account.send_transaction(&intent).await
            }
        }))
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(*journal.0.borrow(), vec!["send 0", "mined 0"]);
    }

    #[test]
    fn failed_send_waits_for_nothing() {
        let journal = Journal(RefCell::new(Vec::new()));
        let client = JournalClient {
            journal: &journal,
            reverted: None,
        };

        let err = block_on(send_and_confirm_with(&client, async { Err(Error::Cancelled) }))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(journal.0.borrow().is_empty());
    }
}
