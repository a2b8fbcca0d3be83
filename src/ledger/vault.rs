//! Custody of Staked Funds
//!
//! The ledger moves value only through [`FundsTransfer`]: stakes are
//! collected into custody on bet placement and paid out on claims.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::debug;

use crate::ledger::state::{AccountId, Amount};

/// Transfer failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Payer wallet cannot cover the stake.
    #[error("{account} holds {available}, needs {needed}")]
    InsufficientBalance {
        /// Payer
        account: AccountId,
        /// Amount requested
        needed: Amount,
        /// Amount available
        available: Amount,
    },

    /// Custody cannot cover the payout.
    #[error("custody holds {held}, payout needs {needed}")]
    InsufficientReserves {
        /// Amount requested
        needed: Amount,
        /// Amount in custody
        held: Amount,
    },

    /// Downstream rejected the transfer.
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Value movement between accounts and ledger custody.
pub trait FundsTransfer: Send + Sync {
    /// Move `amount` from `from` into custody.
    fn collect(&self, from: &AccountId, amount: Amount) -> Result<(), TransferError>;

    /// Move `amount` out of custody to `to`.
    fn pay(&self, to: &AccountId, amount: Amount) -> Result<(), TransferError>;
}

// =============================================================================
// IN-MEMORY VAULT
// =============================================================================

#[derive(Default)]
struct VaultBook {
    wallets: BTreeMap<AccountId, Amount>,
    custody: Amount,
}

/// In-memory [`FundsTransfer`].
///
/// In attached-payment mode (the default) a stake arrives with the call, so
/// collection always succeeds. In wallet mode stakes are debited from
/// pre-funded wallets. Payouts always credit wallets.
#[derive(Default)]
pub struct InMemoryVault {
    book: Mutex<VaultBook>,
    require_wallet: bool,
    reject_payouts: AtomicBool,
}

impl InMemoryVault {
    /// Vault in attached-payment mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Vault that debits pre-funded wallets.
    pub fn with_wallets() -> Self {
        Self {
            require_wallet: true,
            ..Self::default()
        }
    }

    /// Credit a wallet.
    pub fn fund(&self, account: AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut book = self.lock()?;
        let wallet = book.wallets.entry(account).or_insert(0);
        *wallet = wallet.checked_add(amount).ok_or_else(|| TransferError::Rejected("wallet overflow".into()))?;
        Ok(())
    }

    /// Wallet balance.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.lock()
            .map(|b| b.wallets.get(account).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Amount in custody.
    pub fn custody(&self) -> Amount {
        self.lock().map(|b| b.custody).unwrap_or(0)
    }

    /// Make every subsequent payout fail (fault injection).
    pub fn set_reject_payouts(&self, reject: bool) {
        self.reject_payouts.store(reject, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, VaultBook>, TransferError> {
        self.book
            .lock()
            .map_err(|_| TransferError::Rejected("vault lock poisoned".into()))
    }
}

impl FundsTransfer for InMemoryVault {
    fn collect(&self, from: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut book = self.lock()?;
        if self.require_wallet {
            let available = book.wallets.get(from).copied().unwrap_or(0);
            if available < amount {
                return Err(TransferError::InsufficientBalance { account: *from, needed: amount, available });
            }
            book.wallets.insert(*from, available - amount);
        }
        book.custody = book
            .custody
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("custody overflow".into()))?;
        debug!(account = %from, amount, custody = book.custody, "Stake collected");
        Ok(())
    }

    fn pay(&self, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if self.reject_payouts.load(Ordering::SeqCst) {
            return Err(TransferError::Rejected("payouts disabled".into()));
        }
        let mut book = self.lock()?;
        if book.custody < amount {
            return Err(TransferError::InsufficientReserves { needed: amount, held: book.custody });
        }
        book.custody -= amount;
        let wallet = book.wallets.entry(*to).or_insert(0);
        *wallet = wallet.saturating_add(amount);
        debug!(account = %to, amount, custody = book.custody, "Payout sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountId {
        AccountId::from_subject("alice")
    }

    #[test]
    fn test_attached_payment_mode() {
        let vault = InMemoryVault::new();
        vault.collect(&alice(), 100).unwrap();
        assert_eq!(vault.custody(), 100);
        vault.pay(&alice(), 60).unwrap();
        assert_eq!(vault.custody(), 40);
        assert_eq!(vault.balance_of(&alice()), 60);
    }

    #[test]
    fn test_wallet_mode_debits() {
        let vault = InMemoryVault::with_wallets();
        assert_eq!(
            vault.collect(&alice(), 1),
            Err(TransferError::InsufficientBalance { account: alice(), needed: 1, available: 0 })
        );
        vault.fund(alice(), 10).unwrap();
        vault.collect(&alice(), 4).unwrap();
        assert_eq!(vault.balance_of(&alice()), 6);
        assert_eq!(vault.custody(), 4);
    }

    #[test]
    fn test_pay_beyond_custody() {
        let vault = InMemoryVault::new();
        vault.collect(&alice(), 5).unwrap();
        assert_eq!(
            vault.pay(&alice(), 6),
            Err(TransferError::InsufficientReserves { needed: 6, held: 5 })
        );
        assert_eq!(vault.custody(), 5);
    }

    #[test]
    fn test_reject_payouts() {
        let vault = InMemoryVault::new();
        vault.collect(&alice(), 5).unwrap();
        vault.set_reject_payouts(true);
        assert!(vault.pay(&alice(), 1).is_err());
        vault.set_reject_payouts(false);
        assert!(vault.pay(&alice(), 1).is_ok());
    }
}
