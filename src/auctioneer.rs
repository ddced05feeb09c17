// The central market clearing engine. Owns the registered agents outright
// (registration order doubles as notification order) and is the only place
// that mutates the shared aggregate curve. Grounded on
// `pythonmatcher/powermatcher.py`'s `Auctioneer`.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::agent::AgentKind;
use crate::bid::Bid;
use crate::error::{MarketError, MarketResult};
use crate::telemetry::Sample;

/// The market-clearing auctioneer: a price band, a registry of agents in
/// registration order, and the cached equilibrium price.
#[derive(Debug)]
pub struct Auctioneer {
    id: String,
    min_price: Decimal,
    max_price: Decimal,
    price: Decimal,
    agents: Vec<AgentKind>,
    index: HashMap<String, usize>,
}

impl Auctioneer {
    pub fn new(id: impl Into<String>, min_price: Decimal, max_price: Decimal) -> Self {
        Self {
            id: id.into(),
            min_price,
            max_price,
            price: (min_price + max_price) / Decimal::from(2),
            agents: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Like `new`, but generates a random id rather than requiring the
    /// caller to supply one — matches `Auctioneer(id=None)` in the original,
    /// which falls back to `uuid.uuid4()`.
    pub fn new_with_generated_id(min_price: Decimal, max_price: Decimal) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), min_price, max_price)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn min_price(&self) -> Decimal {
        self.min_price
    }

    pub fn max_price(&self) -> Decimal {
        self.max_price
    }

    pub fn agents(&self) -> &[AgentKind] {
        &self.agents
    }

    /// Sum of every registered agent's current bid, starting from the zero
    /// curve. Reading bids straight off the agents (rather than a separate
    /// id-keyed map) is safe because the auctioneer owns the agents
    /// outright — see `DESIGN.md`.
    pub fn aggregate(&self) -> Bid {
        self.agents.iter().fold(Bid::zero(self.min_price, self.max_price), |acc, a| {
            (&acc + a.last_bid()).expect(
                "aggregate of valid bids over one price band is always a valid bid",
            )
        })
    }

    /// Registers a new agent, then guarantees it receives exactly one
    /// `on_price_update` notification before returning (seed scenario E6):
    /// whether or not the agent's initial bid shifts the equilibrium,
    /// only the newly registered agent is notified — §4.2 notifies "the
    /// agent" singular, not the whole population. `self.price` (and the
    /// `auctioneer_prices` sample) are still kept in sync when the new
    /// bid does move the equilibrium.
    pub fn register(&mut self, agent: AgentKind, now: DateTime<Utc>) -> MarketResult<Vec<Sample>> {
        let id = agent.id().to_string();
        if self.index.contains_key(&id) {
            return Err(MarketError::DuplicateAgent(id));
        }

        self.agents.push(agent);
        self.index.insert(id, self.agents.len() - 1);
        let last = self.agents.len() - 1;

        let new_price = self.aggregate().equilibrium_price();
        let mut samples = Vec::new();
        if new_price != self.price {
            self.price = new_price;
            samples.push(self.price_sample(now));
        }
        samples.extend(self.agents[last].on_price_update(self.price, &self.id, now));
        Ok(samples)
    }

    /// Removes an agent from the registry. Fails if the agent was never
    /// registered.
    pub fn unregister(&mut self, agent_id: &str) -> MarketResult<()> {
        let idx = *self
            .index
            .get(agent_id)
            .ok_or_else(|| MarketError::UnknownAgent(agent_id.to_string()))?;
        self.agents.remove(idx);
        self.index.clear();
        for (i, a) in self.agents.iter().enumerate() {
            self.index.insert(a.id().to_string(), i);
        }
        Ok(())
    }

    /// Replaces `agent_id`'s bid with `bid` and recomputes the aggregate
    /// curve; if the equilibrium price moved, fans out a price-update
    /// notification to every registered agent in registration order. This
    /// is the one and only path by which an agent's `last_bid` is ever
    /// replaced — `tick` calls it, and so does anything else that wants to
    /// submit a bid on an agent's behalf. Fails if the agent was never
    /// registered.
    pub fn submit_bid(
        &mut self,
        agent_id: &str,
        bid: Bid,
        now: DateTime<Utc>,
    ) -> MarketResult<Vec<Sample>> {
        let idx = *self
            .index
            .get(agent_id)
            .ok_or_else(|| MarketError::UnknownAgent(agent_id.to_string()))?;
        self.agents[idx].set_last_bid(bid);
        Ok(self.reprice(now))
    }

    fn reprice(&mut self, now: DateTime<Utc>) -> Vec<Sample> {
        let new_price = self.aggregate().equilibrium_price();
        if new_price == self.price {
            return Vec::new();
        }
        self.price = new_price;
        let mut samples = vec![self.price_sample(now)];
        for a in self.agents.iter_mut() {
            samples.extend(a.on_price_update(new_price, &self.id, now));
        }
        samples
    }

    fn price_sample(&self, now: DateTime<Utc>) -> Sample {
        Sample::new("auctioneer_prices", now)
            .tag("auctioneer_id", self.id.clone())
            .field("price", self.price.to_f64().unwrap_or(0.0))
    }

    /// One simulated tick: every registered agent, in registration order,
    /// recomputes (and possibly resubmits) its bid; a resubmission triggers
    /// immediate repricing before the next agent is visited, exactly as
    /// §5 requires.
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        interval_secs: f64,
        rng: &mut dyn RngCore,
    ) -> Vec<Sample> {
        let mut samples = Vec::new();
        for i in 0..self.agents.len() {
            let current_price = self.price;
            let auctioneer_id = self.id.clone();
            let outcome = self.agents[i].on_state_update(
                current_price,
                now,
                interval_secs,
                rng,
                &auctioneer_id,
            );
            samples.extend(outcome.samples);
            if let Some(bid) = outcome.new_bid {
                let agent_id = self.agents[i].id().to_string();
                samples.extend(
                    self.submit_bid(&agent_id, bid, now)
                        .expect("agent at a live registry index is always known"),
                );
            }
        }
        samples
    }
}
