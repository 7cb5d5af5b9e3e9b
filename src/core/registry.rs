//! Instrument registry
//!
//! Holds per-instrument identity plus the latest channel and signal state.
//! Identity is fixed at load time; `channel` and `signal_state` are only
//! written by the breakout monitor that owns the registry.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::adapters::traits::{ExchangeBoardSource, InstrumentCatalog};
use crate::adapters::types::{BoardParams, InstrumentInfo, InstrumentKind, InstrumentRef};
use crate::config::UniverseConfig;
use crate::core::channel::ChannelState;
use crate::core::detector::SignalState;
use crate::error::{AppError, Result};

/// One monitored instrument
#[derive(Debug, Clone)]
pub struct Instrument {
    /// Broker-assigned id (FIGI)
    pub id: String,
    pub ticker: String,
    pub name: String,
    pub kind: InstrumentKind,
    pub board: BoardParams,
    pub channel: Option<ChannelState>,
    pub signal_state: SignalState,
}

impl Instrument {
    pub fn new(id: &str, ticker: &str, name: &str, kind: InstrumentKind) -> Self {
        Self {
            id: id.to_string(),
            ticker: ticker.to_string(),
            name: name.to_string(),
            kind,
            board: kind.board(),
            channel: None,
            signal_state: SignalState::None,
        }
    }

    pub fn reference(&self) -> InstrumentRef {
        InstrumentRef {
            id: self.id.clone(),
            ticker: self.ticker.clone(),
            board: self.board.clone(),
        }
    }
}

impl From<InstrumentInfo> for Instrument {
    fn from(info: InstrumentInfo) -> Self {
        Instrument::new(&info.id, &info.ticker, &info.name, info.kind)
    }
}

/// Instrument universe keyed by broker id, iterated in load order
#[derive(Debug, Clone, Default)]
pub struct InstrumentRegistry {
    instruments: Vec<Instrument>,
    by_id: HashMap<String, usize>,
    by_ticker: HashMap<String, usize>,
}

impl InstrumentRegistry {
    /// Build a registry; later duplicates of an id or ticker are dropped
    pub fn new(instruments: Vec<Instrument>) -> Self {
        let mut registry = Self::default();
        for instrument in instruments {
            if registry.by_id.contains_key(&instrument.id)
                || registry.by_ticker.contains_key(&instrument.ticker)
            {
                warn!(ticker = %instrument.ticker, id = %instrument.id, "Duplicate instrument skipped");
                continue;
            }
            let idx = registry.instruments.len();
            registry.by_id.insert(instrument.id.clone(), idx);
            registry.by_ticker.insert(instrument.ticker.clone(), idx);
            registry.instruments.push(instrument);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Instrument> {
        self.by_id.get(id).map(|&idx| &self.instruments[idx])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Instrument> {
        match self.by_id.get(id) {
            Some(&idx) => self.instruments.get_mut(idx),
            None => None,
        }
    }

    pub fn by_ticker(&self, ticker: &str) -> Option<&Instrument> {
        self.by_ticker.get(ticker).map(|&idx| &self.instruments[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter()
    }

    pub fn references(&self) -> Vec<InstrumentRef> {
        self.instruments.iter().map(Instrument::reference).collect()
    }

    /// Ids of instruments with a computed channel, in load order
    pub fn ids_with_channel(&self) -> Vec<String> {
        self.instruments
            .iter()
            .filter(|i| i.channel.is_some())
            .map(|i| i.id.clone())
            .collect()
    }

    pub fn with_channel_count(&self) -> usize {
        self.instruments.iter().filter(|i| i.channel.is_some()).count()
    }

    /// Replace an instrument's channel wholesale; signal state is kept
    pub fn set_channel(&mut self, id: &str, channel: ChannelState) -> bool {
        match self.get_mut(id) {
            Some(instrument) => {
                instrument.channel = Some(channel);
                true
            }
            None => false,
        }
    }
}

/// Build the monitored universe from both listings
///
/// An instrument is kept only when the broker catalog and the exchange board
/// both know its ticker: the broker supplies the id used for prices and
/// intraday candles, the exchange supplies the history.
pub async fn load_registry<C, B>(
    catalog: &C,
    boards: &B,
    universe: &UniverseConfig,
) -> Result<InstrumentRegistry>
where
    C: InstrumentCatalog + ?Sized,
    B: ExchangeBoardSource + ?Sized,
{
    let mut instruments = Vec::new();

    if universe.shares {
        let listed = catalog.shares(universe.only_rub_shares).await?;
        instruments.extend(intersect(listed, boards, InstrumentKind::Share).await?);
    }
    if universe.futures {
        let listed = catalog
            .futures(universe.exclude_stock_futures, universe.nearest_futures_only)
            .await?;
        instruments.extend(intersect(listed, boards, InstrumentKind::Future).await?);
    }
    if universe.bonds {
        let listed = catalog.bonds().await?;
        instruments.extend(intersect(listed, boards, InstrumentKind::Bond).await?);
    }

    let registry = InstrumentRegistry::new(instruments);
    if registry.is_empty() {
        return Err(AppError::Config(
            "Instrument universe is empty after matching broker and exchange listings".to_string(),
        ));
    }

    info!(instruments = registry.len(), "Instrument registry loaded");
    Ok(registry)
}

async fn intersect<B>(
    listed: Vec<InstrumentInfo>,
    boards: &B,
    kind: InstrumentKind,
) -> Result<Vec<Instrument>>
where
    B: ExchangeBoardSource + ?Sized,
{
    let board = kind.board();
    let exchange: HashSet<String> = boards.board_tickers(&board).await?.into_iter().collect();
    let broker_count = listed.len();

    let matched: Vec<Instrument> = listed
        .into_iter()
        .filter(|info| info.kind == kind && exchange.contains(&info.ticker))
        .map(Instrument::from)
        .collect();

    info!(
        kind = %kind,
        board = %board,
        broker = broker_count,
        exchange = exchange.len(),
        matched = matched.len(),
        "Universe matched"
    );
    Ok(matched)
}
