//! Calldata builders for the credit product's contracts.
//!
//! The application talks to four deployed contracts: the stablecoin token,
//! the credit manager, the collateral vault and the lending pool. This
//! module encodes their calls with [`alloy_sol_types`] and turns them into
//! [`TransactionIntent`]s, so a card account signs them like any other
//! transaction.
//!
//! User actions that need several transactions come as ordered call lists,
//! meant for [`crate::flow::send_sequence`].
//!
//! # Example
//!
//! ```
//! use alloy_primitives::U256;
//! use nfc_evm_signer_core::Address;
//! use nfc_evm_signer_core::calls::{Contracts, parse_token_amount};
//!
//! let contracts = Contracts {
//!     token: Address::new([1; 20]),
//!     credit_manager: Address::new([2; 20]),
//!     collateral_vault: Address::new([3; 20]),
//!     lending_pool: Address::new([4; 20]),
//! };
//!
//! let amount = parse_token_amount("25.5").unwrap();
//! assert_eq!(amount, U256::from(25_500_000u64));
//!
//! let steps = contracts.stake_collateral(amount);
//! assert_eq!(steps.len(), 3);
//! let intent = steps[0].clone().into_intent(545);
//! assert_eq!(intent.chain_id, Some(545));
//! ```

use alloy_primitives::utils::{ParseUnits, format_units, parse_units};
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{SolCall, sol};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::rpc::{BlockNumberOrTag, RpcClient, RpcError, RpcErrorKind, message_call};
use crate::transaction::TransactionIntent;

/// Decimals of the stablecoin token.
pub const TOKEN_DECIMALS: u8 = 6;

sol! {
    /// The stablecoin token.
    interface IStablecoin {
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    /// The credit manager.
    interface ICreditManager {
        function openCreditLine(uint256 amount) external;
        function addCollateral(uint256 amount) external;
        function borrow(uint256 amount) external;
        function repay(uint256 principal, uint256 interest) external;
    }

    /// The lending pool.
    interface ILendingPool {
        function deposit(uint256 amount) external;
    }
}

/// Parses a decimal token amount into base units.
///
/// # Errors
///
/// Returns [`Error::Validation`] for malformed, negative or over-precise
/// amounts.
pub fn parse_token_amount(amount: &str) -> Result<U256> {
    match parse_units(amount.trim(), TOKEN_DECIMALS) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(Error::Validation(format!(
            "token amount {amount:?} is negative"
        ))),
        Err(e) => Err(Error::Validation(format!(
            "invalid token amount {amount:?}: {e}"
        ))),
    }
}

/// Formats base units as a decimal token amount.
#[must_use]
pub fn format_token_amount(value: U256) -> String {
    format_units(value, TOKEN_DECIMALS).unwrap_or_else(|_| value.to_string())
}

/// One encoded contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// The contract.
    pub to: Address,
    /// ABI-encoded calldata.
    pub data: Bytes,
    /// Native value sent along.
    pub value: U256,
    /// The Solidity signature, for logs and confirmations.
    pub signature: &'static str,
}

impl ContractCall {
    /// Encodes `call` against the contract at `to`.
    #[must_use]
    pub fn new<C: SolCall>(to: Address, call: &C) -> Self {
        Self {
            to,
            data: call.abi_encode().into(),
            value: U256::ZERO,
            signature: C::SIGNATURE,
        }
    }

    /// Turns the call into a transaction intent on `chain_id`.
    ///
    /// Gas, fees and nonce are left for the account to fill.
    #[must_use]
    pub fn into_intent(self, chain_id: u64) -> TransactionIntent {
        TransactionIntent::new(self.to, chain_id)
            .with_data(self.data)
            .with_value(self.value)
    }
}

/// Addresses of the deployed contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contracts {
    /// The stablecoin token.
    pub token: Address,
    /// The credit manager.
    pub credit_manager: Address,
    /// The collateral vault.
    pub collateral_vault: Address,
    /// The lending pool.
    pub lending_pool: Address,
}

impl Contracts {
    /// `token.approve(spender, amount)`.
    #[must_use]
    pub fn approve(&self, spender: Address, amount: U256) -> ContractCall {
        let call = IStablecoin::approveCall {
            spender: spender.inner(),
            amount,
        };
        ContractCall::new(self.token, &call)
    }

    /// `token.transfer(to, amount)`.
    #[must_use]
    pub fn transfer(&self, to: Address, amount: U256) -> ContractCall {
        let call = IStablecoin::transferCall {
            to: to.inner(),
            amount,
        };
        ContractCall::new(self.token, &call)
    }

    /// `creditManager.openCreditLine(amount)`.
    #[must_use]
    pub fn open_credit_line(&self, amount: U256) -> ContractCall {
        ContractCall::new(
            self.credit_manager,
            &ICreditManager::openCreditLineCall { amount },
        )
    }

    /// `creditManager.addCollateral(amount)`.
    #[must_use]
    pub fn add_collateral(&self, amount: U256) -> ContractCall {
        ContractCall::new(
            self.credit_manager,
            &ICreditManager::addCollateralCall { amount },
        )
    }

    /// `creditManager.borrow(amount)`.
    #[must_use]
    pub fn borrow(&self, amount: U256) -> ContractCall {
        ContractCall::new(self.credit_manager, &ICreditManager::borrowCall { amount })
    }

    /// `creditManager.repay(principal, interest)`.
    #[must_use]
    pub fn repay(&self, principal: U256, interest: U256) -> ContractCall {
        ContractCall::new(
            self.credit_manager,
            &ICreditManager::repayCall {
                principal,
                interest,
            },
        )
    }

    /// `lendingPool.deposit(amount)`.
    #[must_use]
    pub fn deposit(&self, amount: U256) -> ContractCall {
        ContractCall::new(self.lending_pool, &ILendingPool::depositCall { amount })
    }

    /// Approves the credit manager and vault, then opens a credit line
    /// backed by `amount` of collateral.
    #[must_use]
    pub fn stake_collateral(&self, amount: U256) -> Vec<ContractCall> {
        vec![
            self.approve(self.credit_manager, amount),
            self.approve(self.collateral_vault, amount),
            self.open_credit_line(amount),
        ]
    }

    /// Approves the credit manager and vault, then adds `amount` to an
    /// existing credit line.
    #[must_use]
    pub fn top_up_collateral(&self, amount: U256) -> Vec<ContractCall> {
        vec![
            self.approve(self.credit_manager, amount),
            self.approve(self.collateral_vault, amount),
            self.add_collateral(amount),
        ]
    }

    /// Borrows `amount` against the credit line and pays it to `recipient`.
    #[must_use]
    pub fn pay_with_credit(&self, recipient: Address, amount: U256) -> Vec<ContractCall> {
        vec![self.borrow(amount), self.transfer(recipient, amount)]
    }

    /// Approves the credit manager and the lending pool for the total due,
    /// then repays `principal` plus `interest`.
    ///
    /// The lending pool pulls the repaid funds, so it needs the allowance
    /// as well as the credit manager.
    #[must_use]
    pub fn repay_credit(&self, principal: U256, interest: U256) -> Vec<ContractCall> {
        let total = principal.saturating_add(interest);
        vec![
            self.approve(self.credit_manager, total),
            self.approve(self.lending_pool, total),
            self.repay(principal, interest),
        ]
    }

    /// Approves the lending pool, then deposits `amount`.
    #[must_use]
    pub fn lend(&self, amount: U256) -> Vec<ContractCall> {
        vec![self.approve(self.lending_pool, amount), self.deposit(amount)]
    }

    /// Drops the token approvals in `calls` that `owner` has already granted.
    ///
    /// Each approval's allowance is read concurrently; an approval stays
    /// when the current allowance is below the approved amount. Every other
    /// call is kept in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if an allowance read fails.
    pub async fn without_granted_approvals<C: RpcClient + ?Sized>(
        &self,
        client: &C,
        owner: Address,
        calls: Vec<ContractCall>,
    ) -> Result<Vec<ContractCall>> {
        let checks = calls.iter().map(|call| async move {
            match self.approval(call) {
                Some(approve) => {
                    let granted = self
                        .token_allowance(client, owner, approve.spender.into())
                        .await?;
                    Ok::<_, Error>(granted < approve.amount)
                }
                None => Ok(true),
            }
        });
        let keep = try_join_all(checks).await?;

        let before = calls.len();
        let kept: Vec<ContractCall> = calls
            .into_iter()
            .zip(keep)
            .filter_map(|(call, keep)| keep.then_some(call))
            .collect();
        debug!(skipped = before - kept.len(), "approvals already granted");
        Ok(kept)
    }

    fn approval(&self, call: &ContractCall) -> Option<IStablecoin::approveCall> {
        if call.to != self.token || !call.data.starts_with(&IStablecoin::approveCall::SELECTOR) {
            return None;
        }
        IStablecoin::approveCall::abi_decode(&call.data).ok()
    }

    /// Reads `owner`'s token balance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails or its result is not a
    /// `uint256`.
    pub async fn token_balance<C: RpcClient + ?Sized>(
        &self,
        client: &C,
        owner: Address,
    ) -> Result<U256> {
        let call = IStablecoin::balanceOfCall {
            account: owner.inner(),
        };
        read(client, self.token, &call).await
    }

    /// Reads how much `spender` may move from `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the call fails or its result is not a
    /// `uint256`.
    pub async fn token_allowance<C: RpcClient + ?Sized>(
        &self,
        client: &C,
        owner: Address,
        spender: Address,
    ) -> Result<U256> {
        let call = IStablecoin::allowanceCall {
            owner: owner.inner(),
            spender: spender.inner(),
        };
        read(client, self.token, &call).await
    }
}

async fn read<C, S>(client: &C, to: Address, call: &S) -> Result<S::Return>
where
    C: RpcClient + ?Sized,
    S: SolCall,
{
    let request = message_call(to, call.abi_encode().into());
    let output = client.call(&request, BlockNumberOrTag::Latest).await?;
    S::abi_decode_returns(&output).map_err(|e| {
        Error::Rpc(RpcError::new(
            RpcErrorKind::Other,
            None,
            format!("cannot decode {} result: {e}", S::SIGNATURE),
        ))
    })
}
