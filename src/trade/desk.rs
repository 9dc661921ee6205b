//! Quote desk
//!
//! Interactive callers fire a request on every keystroke. The desk debounces
//! them and stamps each with a sequence number; a result is only handed back
//! if no newer request arrived meanwhile, the session is still on the
//! composer's chain and the registry snapshot it used is still current.

use eyre::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::{Quote, QuoteRequest, TradeComposer};
use crate::registry::GateRegistry;
use crate::session::SessionState;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum DeskOutcome {
    Fresh(Box<Quote>),
    /// A newer request took over
    Superseded { sequence: u64 },
    /// Chain or vault data changed while quoting
    Stale { sequence: u64 },
}

impl DeskOutcome {
    pub fn into_quote(self) -> Option<Quote> {
        match self {
            DeskOutcome::Fresh(quote) => Some(*quote),
            DeskOutcome::Superseded { .. } | DeskOutcome::Stale { .. } => None,
        }
    }
}

pub struct QuoteDesk {
    composer: Arc<TradeComposer>,
    registry: Arc<GateRegistry>,
    session: watch::Receiver<SessionState>,
    sequence: AtomicU64,
    debounce: Duration,
}

impl QuoteDesk {
    pub fn new(
        composer: Arc<TradeComposer>,
        registry: Arc<GateRegistry>,
        session: watch::Receiver<SessionState>,
        debounce: Duration,
    ) -> Self {
        Self {
            composer,
            registry,
            session,
            sequence: AtomicU64::new(0),
            debounce,
        }
    }

    fn is_latest(&self, sequence: u64) -> bool {
        self.sequence.load(Ordering::SeqCst) == sequence
    }

    fn on_chain(&self, chain_id: u64) -> bool {
        self.session.borrow().chain_id == chain_id
    }

    pub async fn request(&self, request: QuoteRequest) -> Result<DeskOutcome> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let chain_id = self.composer.chain().chain_id;

        tokio::time::sleep(self.debounce).await;
        if !self.is_latest(sequence) {
            debug!("Quote #{} superseded during debounce", sequence);
            return Ok(DeskOutcome::Superseded { sequence });
        }
        if !self.on_chain(chain_id) {
            return Ok(DeskOutcome::Stale { sequence });
        }

        let (version, vaults) = self.registry.versioned_vaults(chain_id, false).await?;
        let quote = self.composer.quote(&request, &vaults).await?;

        if !self.is_latest(sequence) {
            debug!("Quote #{} superseded while composing", sequence);
            return Ok(DeskOutcome::Superseded { sequence });
        }
        if !self.on_chain(chain_id) || self.registry.version(chain_id).await != version {
            debug!("Quote #{} computed against stale chain state", sequence);
            return Ok(DeskOutcome::Stale { sequence });
        }

        Ok(DeskOutcome::Fresh(Box::new(quote)))
    }
}
