//! Gavel Ledger - account store for the Gavel bank
//!
//! The ledger is:
//! - Keyed by the Bank-assigned connection id
//! - Per-account atomic (each operation holds only its own account's lock)
//! - Journaled (every movement is appended to an in-memory entry log)
//!
//! # Invariants
//!
//! 1. `balance` never goes below zero
//! 2. `blocked` never goes below zero
//! 3. A rejected operation moves nothing
//! 4. Funds leave an agent's blocked funds only towards a house account,
//!    or come back to where they were taken from

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gavel_types::{Amount, BalanceInfo, ConnectionId};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account not found: {account}")]
    AccountNotFound { account: ConnectionId },

    #[error("Account already exists: {account}")]
    AccountExists { account: ConnectionId },

    #[error("Account {account} is not an agent account")]
    NotAnAgentAccount { account: ConnectionId },

    #[error("Account {account} is not a house account")]
    NotAHouseAccount { account: ConnectionId },

    #[error("Insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: Amount, required: Amount },

    #[error("Insufficient blocked funds: have {blocked}, need {required}")]
    InsufficientBlocked { blocked: Amount, required: Amount },

    #[error("Balance overflow on account {account}")]
    Overflow { account: ConnectionId },

    #[error("Settlement of {amount} from {agent} stranded: {reason}")]
    SettlementStranded {
        agent: ConnectionId,
        amount: Amount,
        reason: String,
    },
}

impl LedgerError {
    /// Whether this is an ordinary "not enough funds" answer rather than a fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientBalance { .. } | LedgerError::InsufficientBlocked { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// What kind of party owns an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AccountKind {
    /// A bidder; the only kind that can hold blocked funds
    Agent { name: String, blocked: Amount },
    /// Anonymous sink for settled auction proceeds
    House,
}

/// One ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: ConnectionId,
    pub balance: Amount,
    pub kind: AccountKind,
    pub opened_at: DateTime<Utc>,
}

impl Account {
    /// Blocked funds; always zero for house accounts
    pub fn blocked(&self) -> Amount {
        match &self.kind {
            AccountKind::Agent { blocked, .. } => *blocked,
            AccountKind::House => Amount::zero(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            AccountKind::Agent { name, .. } => Some(name),
            AccountKind::House => None,
        }
    }

    pub fn is_house(&self) -> bool {
        matches!(self.kind, AccountKind::House)
    }

    fn blocked_mut(&mut self) -> Result<&mut Amount> {
        match &mut self.kind {
            AccountKind::Agent { blocked, .. } => Ok(blocked),
            AccountKind::House => Err(LedgerError::NotAnAgentAccount { account: self.id }),
        }
    }
}

/// Type of journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    Opened,
    Block,
    Unblock,
    /// Blocked funds leaving an agent account during settlement
    TransferOut,
    Deposit,
    /// Blocked funds restored after a failed settlement credit
    Compensation,
}

/// A single journal entry
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub account: ConnectionId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub balance_after: Amount,
    pub blocked_after: Amount,
    pub created_at: DateTime<Utc>,
}

/// Proof of a completed settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub agent: ConnectionId,
    pub house: ConnectionId,
    pub amount: Amount,
    pub house_balance_after: Amount,
}

/// The Gavel Ledger
///
/// Cheap to clone; clones share the same accounts and journal.
#[derive(Clone, Default)]
pub struct Ledger {
    /// Account states (sharded; one lock per shard)
    accounts: Arc<DashMap<ConnectionId, Account>>,
    /// All entries (append-only)
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
    sequence: Arc<AtomicU64>,
}

impl Ledger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a funded agent account
    pub fn open_agent_account(
        &self,
        id: ConnectionId,
        name: impl Into<String>,
        balance: Amount,
    ) -> Result<()> {
        let account = Account {
            id,
            balance,
            kind: AccountKind::Agent {
                name: name.into(),
                blocked: Amount::zero(),
            },
            opened_at: Utc::now(),
        };
        self.open(account)
    }

    /// Open an empty house account
    pub fn open_house_account(&self, id: ConnectionId) -> Result<()> {
        let account = Account {
            id,
            balance: Amount::zero(),
            kind: AccountKind::House,
            opened_at: Utc::now(),
        };
        self.open(account)
    }

    fn open(&self, account: Account) -> Result<()> {
        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists { account: account.id }),
            Entry::Vacant(slot) => {
                info!(account = %account.id, balance = %account.balance, house = account.is_house(), "Opening account");
                self.record(&account, EntryKind::Opened, account.balance);
                slot.insert(account);
                Ok(())
            }
        }
    }

    /// Reserve `amount` of an agent's balance
    ///
    /// Succeeds iff `balance - amount >= 0`; otherwise nothing moves.
    pub fn block(&self, id: ConnectionId, amount: Amount) -> Result<BalanceInfo> {
        self.with_account(id, |account| {
            let balance = account.balance;
            let blocked = *account.blocked_mut()?;
            let new_balance = balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    available: balance,
                    required: amount,
                })?;
            let new_blocked = blocked
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: id })?;
            account.balance = new_balance;
            *account.blocked_mut()? = new_blocked;
            Ok(EntryKind::Block)
        }, amount)
    }

    /// Release `amount` of an agent's blocked funds back to its balance
    pub fn unblock(&self, id: ConnectionId, amount: Amount) -> Result<BalanceInfo> {
        self.with_account(id, |account| {
            let blocked = *account.blocked_mut()?;
            let new_blocked = blocked
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBlocked {
                    blocked,
                    required: amount,
                })?;
            let new_balance = account
                .balance
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: id })?;
            account.balance = new_balance;
            *account.blocked_mut()? = new_blocked;
            Ok(EntryKind::Unblock)
        }, amount)
    }

    /// Remove `amount` from an agent's blocked funds (agent half of a settlement)
    pub fn transfer_blocked(&self, id: ConnectionId, amount: Amount) -> Result<BalanceInfo> {
        self.with_account(id, |account| {
            let blocked = account.blocked_mut()?;
            *blocked = blocked
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBlocked {
                    blocked: *blocked,
                    required: amount,
                })?;
            Ok(EntryKind::TransferOut)
        }, amount)
    }

    /// Credit any existing account
    pub fn deposit(&self, id: ConnectionId, amount: Amount) -> Result<Amount> {
        self.with_account(id, |account| {
            account.balance = account
                .balance
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: id })?;
            Ok(EntryKind::Deposit)
        }, amount)
        .map(|info| info.balance)
    }

    fn deposit_to_house(&self, id: ConnectionId, amount: Amount) -> Result<Amount> {
        match self.accounts.get(&id) {
            Some(account) if !account.is_house() => {
                return Err(LedgerError::NotAHouseAccount { account: id })
            }
            None => return Err(LedgerError::AccountNotFound { account: id }),
            Some(_) => {}
        }
        self.deposit(id, amount)
    }

    fn restore_blocked(&self, id: ConnectionId, amount: Amount) -> Result<BalanceInfo> {
        self.with_account(id, |account| {
            let blocked = account.blocked_mut()?;
            *blocked = blocked
                .checked_add(amount)
                .ok_or(LedgerError::Overflow { account: id })?;
            Ok(EntryKind::Compensation)
        }, amount)
    }

    /// Settle a won auction: move `amount` of the agent's blocked funds to
    /// the house account
    ///
    /// Runs as a two-step saga. The debit leg failing moves nothing. The
    /// credit leg failing restores the debited blocked funds. If the
    /// restore fails too, the amount is logged as stranded.
    pub fn transfer_funds(
        &self,
        agent: ConnectionId,
        house: ConnectionId,
        amount: Amount,
    ) -> Result<TransferReceipt> {
        info!(%agent, %house, %amount, "Settling blocked funds");
        self.transfer_blocked(agent, amount)?;

        match self.deposit_to_house(house, amount) {
            Ok(house_balance_after) => Ok(TransferReceipt {
                agent,
                house,
                amount,
                house_balance_after,
            }),
            Err(credit_err) => {
                warn!(%agent, %house, %amount, error = %credit_err, "Credit leg failed, compensating");
                match self.restore_blocked(agent, amount) {
                    Ok(_) => Err(credit_err),
                    Err(restore_err) => {
                        error!(
                            %agent, %house, %amount,
                            credit_error = %credit_err,
                            restore_error = %restore_err,
                            "Settlement funds stranded, manual reconciliation required"
                        );
                        Err(LedgerError::SettlementStranded {
                            agent,
                            amount,
                            reason: restore_err.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// Run `op` under the account's lock and journal the result
    fn with_account<F>(&self, id: ConnectionId, op: F, amount: Amount) -> Result<BalanceInfo>
    where
        F: FnOnce(&mut Account) -> Result<EntryKind>,
    {
        let mut guard = self
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound { account: id })?;

        // Operate on a copy so a failure halfway through leaves no trace
        let mut working = guard.clone();
        match op(&mut working) {
            Ok(kind) => {
                *guard = working;
                self.record(&guard, kind, amount);
                debug!(account = %id, ?kind, %amount, balance = %guard.balance, blocked = %guard.blocked(), "Ledger movement");
                Ok(BalanceInfo {
                    balance: guard.balance,
                    blocked_funds: guard.blocked(),
                })
            }
            Err(e) => {
                debug!(account = %id, %amount, error = %e, "Ledger movement rejected");
                Err(e)
            }
        }
    }

    fn record(&self, account: &Account, kind: EntryKind, amount: Amount) {
        let entry = LedgerEntry {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            account: account.id,
            kind,
            amount,
            balance_after: account.balance,
            blocked_after: account.blocked(),
            created_at: Utc::now(),
        };
        self.entries.lock().push(entry);
    }

    /// Snapshot of one account
    pub fn account(&self, id: ConnectionId) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    /// Balance and blocked funds of one account
    pub fn balance_info(&self, id: ConnectionId) -> Option<BalanceInfo> {
        self.accounts.get(&id).map(|a| BalanceInfo {
            balance: a.balance,
            blocked_funds: a.blocked(),
        })
    }

    /// Get all entries for an account
    pub fn entries_for(&self, id: ConnectionId) -> Vec<LedgerEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.account == id)
            .cloned()
            .collect()
    }

    /// Full journal in sequence order
    pub fn journal(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }

    /// Get the total number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Get all account IDs
    pub fn all_accounts(&self) -> Vec<ConnectionId> {
        self.accounts.iter().map(|a| *a.key()).collect()
    }
}
