//! Wallet session
//!
//! One source of truth for the connected account and active chain. Current
//! state is published on a `watch` channel; discrete changes go out on a
//! `broadcast` stream. Updates that change nothing emit nothing, so
//! providers that fire the same event twice are harmless.

use alloy_primitives::{Address, B256};
use eyre::{eyre, Result};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::chains;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub account: Option<Address>,
    pub chain_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
    /// Declined in the wallet
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { account: Address },
    Disconnected { account: Address },
    AccountChanged { from: Address, to: Address },
    ChainChanged { from: u64, to: u64 },
    Transaction { hash: B256, status: TxStatus },
}

pub struct Session {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub fn new(chain_id: u64) -> Self {
        let (state, _) = watch::channel(SessionState { account: None, chain_id });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        debug!("Session event: {:?}", event);
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Connect or switch to `account`. Returns whether anything changed.
    pub fn connect(&self, account: Address) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|state| {
            if state.account == Some(account) {
                return false;
            }
            previous = state.account.replace(account);
            true
        });
        if !changed {
            return false;
        }

        match previous {
            None => {
                info!("🔌 Connected {}", account);
                self.emit(SessionEvent::Connected { account });
            }
            Some(from) => {
                info!("👤 Account changed {} -> {}", from, account);
                self.emit(SessionEvent::AccountChanged { from, to: account });
            }
        }
        true
    }

    pub fn disconnect(&self) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            previous = state.account.take();
            previous.is_some()
        });
        match previous {
            Some(account) => {
                info!("🔌 Disconnected {}", account);
                self.emit(SessionEvent::Disconnected { account });
                true
            }
            None => false,
        }
    }

    pub fn switch_chain(&self, chain_id: u64) -> Result<bool> {
        if !chains::is_supported(chain_id) {
            return Err(eyre!("Unsupported chain {}", chain_id));
        }
        let mut from = chain_id;
        let changed = self.state.send_if_modified(|state| {
            from = state.chain_id;
            state.chain_id = chain_id;
            from != chain_id
        });
        if changed {
            info!("⛓️ Chain changed {} -> {}", from, chain_id);
            self.emit(SessionEvent::ChainChanged { from, to: chain_id });
        }
        Ok(changed)
    }

    pub fn publish_transaction(&self, hash: B256, status: TxStatus) {
        self.emit(SessionEvent::Transaction { hash, status });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{ARBITRUM, ETHEREUM};
    use tokio::sync::broadcast::error::TryRecvError;

    fn account(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_connect_is_idempotent() {
        let session = Session::new(ETHEREUM);
        let mut events = session.subscribe();

        assert!(session.connect(account(1)));
        assert!(!session.connect(account(1)));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Connected { account: account(1) });
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn test_account_change_and_disconnect() {
        let session = Session::new(ETHEREUM);
        session.connect(account(1));
        let mut events = session.subscribe();

        session.connect(account(2));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::AccountChanged { from: account(1), to: account(2) });

        assert!(session.disconnect());
        assert!(!session.disconnect());
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Disconnected { account: account(2) });
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(session.state().account, None);
    }

    #[test]
    fn test_chain_switch() {
        let session = Session::new(ETHEREUM);
        let mut events = session.subscribe();
        let watcher = session.watch();

        assert!(session.switch_chain(ARBITRUM).unwrap());
        assert!(!session.switch_chain(ARBITRUM).unwrap());
        assert!(session.switch_chain(9999).is_err());

        assert_eq!(events.try_recv().unwrap(), SessionEvent::ChainChanged { from: ETHEREUM, to: ARBITRUM });
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(watcher.borrow().chain_id, ARBITRUM);
    }

    #[test]
    fn test_transaction_events() {
        let session = Session::new(ETHEREUM);
        let mut events = session.subscribe();
        session.publish_transaction(B256::repeat_byte(7), TxStatus::Pending);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Transaction { hash: B256::repeat_byte(7), status: TxStatus::Pending }
        );
    }
}
