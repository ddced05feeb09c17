// Device agents — the demand/supply side of the market. Each kind computes
// its own bid curve from local state and reacts to price notifications by
// recomputing the power level it is actually committed to (its "runlevel"),
// never by submitting a new bid. That asymmetry is what keeps the
// bid -> price -> bid loop from cycling; see `auctioneer.rs`.
//
// Grounded on `pythonmatcher/agents.py` (`LoadAgent`, `ImbalanceAgent`,
// `PVAgent`, `BatteryAgent`, `ChargeState`) and `pythonmatcher/powermatcher.py`
// (`BaseAgent`).
use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::bid::Bid;
use crate::telemetry::Sample;

/// Shared bookkeeping every device agent carries: its id, the last bid it
/// submitted, and the power level implied by that bid at the current price.
#[derive(Debug, Clone)]
pub struct AgentState {
    id: String,
    last_bid: Bid,
    current_power: Decimal,
}

impl AgentState {
    fn new(id: impl Into<String>, last_bid: Bid) -> Self {
        Self {
            id: id.into(),
            last_bid,
            current_power: Decimal::ZERO,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn current_power(&self) -> Decimal {
        self.current_power
    }

    /// Replaces `last_bid` if `bid` differs from the one currently held.
    /// Returns whether a replacement happened, so callers can decide whether
    /// a downstream reprice is warranted.
    fn set_last_bid(&mut self, bid: Bid) -> bool {
        if bid == self.last_bid {
            false
        } else {
            self.last_bid = bid;
            true
        }
    }

    /// Recomputes `current_power` from `last_bid` at `price`, emitting a
    /// sample only when the value actually changes (edge-triggered, per
    /// `BaseAgent.current_power`'s setter in the original).
    fn recompute_power(&mut self, price: Decimal, auctioneer_id: &str, now: DateTime<Utc>) -> Vec<Sample> {
        let new_power = self.last_bid.find_quantity(price);
        if new_power == self.current_power {
            return Vec::new();
        }
        self.current_power = new_power;
        vec![Sample::new("deviceagent_power", now)
            .tag("deviceagent_id", self.id.clone())
            .tag("auctioneer_id", auctioneer_id)
            .field("power", new_power.to_f64().unwrap_or(0.0))]
    }
}

/// What a state-update pass wants to happen next: an optional new bid to
/// hand to the auctioneer, plus any telemetry produced along the way.
pub struct StateUpdateOutcome {
    pub new_bid: Option<Bid>,
    pub samples: Vec<Sample>,
}

/// A constant electrical load with a small amount of multiplicative noise.
/// Grounded on `agents.py`'s `LoadAgent`.
#[derive(Debug, Clone)]
pub struct LoadAgent {
    state: AgentState,
    min_price: Decimal,
    max_price: Decimal,
    base_load: Decimal,
    noise_fraction: Decimal,
}

/// The imbalance market proxy: a fixed two-step bid that never changes once
/// constructed. Grounded on `agents.py`'s `ImbalanceAgent`.
#[derive(Debug, Clone)]
pub struct ImbalanceAgent {
    state: AgentState,
}

/// A rooftop PV installation whose production follows a sinusoidal daily
/// profile. Grounded on `agents.py`'s `PVAgent`.
#[derive(Debug, Clone)]
pub struct PvAgent {
    state: AgentState,
    min_price: Decimal,
    max_price: Decimal,
    peak_power: Decimal,
    noise_fraction: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeState {
    Idle,
    Charging,
    Discharging,
}

/// A battery whose bid ladder depends on state of charge. Grounded on
/// `agents.py`'s `BatteryAgent`.
#[derive(Debug, Clone)]
pub struct BatteryAgent {
    state: AgentState,
    min_price: Decimal,
    max_price: Decimal,
    capacity_kwh: f64,
    max_charge_power: Decimal,
    max_discharge_power: Decimal,
    ladder_steps: u32,
    soc: f64,
    charge_state: ChargeState,
}

const BATTERY_LADDER_STEPS: u32 = 10;

impl LoadAgent {
    pub fn new(
        id: impl Into<String>,
        min_price: Decimal,
        max_price: Decimal,
        base_load: Decimal,
        noise_fraction: Decimal,
    ) -> (AgentKind, Vec<Sample>) {
        let initial_bid = Bid::scalar(base_load, min_price, max_price);
        let agent = LoadAgent {
            state: AgentState::new(id, initial_bid),
            min_price,
            max_price,
            base_load,
            noise_fraction,
        };
        (AgentKind::Load(agent), Vec::new())
    }

    fn compute_bid(&self, rng: &mut dyn rand::RngCore) -> Bid {
        let u = Decimal::from_f64(rng.gen::<f64>()).unwrap_or(Decimal::ZERO);
        let quantity = self.base_load * (dec!(1) + self.noise_fraction * u);
        Bid::scalar(quantity, self.min_price, self.max_price)
    }
}

impl ImbalanceAgent {
    /// Defaults to bidding at 10%/90% of the price band, matching the
    /// original's `consumption_price`/`production_price` defaults.
    /// `consumption_power`/`production_power` are both positive magnitudes;
    /// the ladder negates `production_power` itself.
    pub fn new(
        id: impl Into<String>,
        min_price: Decimal,
        max_price: Decimal,
        consumption_power: Decimal,
        production_power: Decimal,
    ) -> (AgentKind, Vec<Sample>) {
        let span = max_price - min_price;
        let consumption_price = min_price + span * Decimal::new(1, 1);
        let production_price = min_price + span * Decimal::new(9, 1);
        let bid = Bid::new(
            vec![consumption_power, Decimal::ZERO, -production_power],
            vec![consumption_price, production_price],
            min_price,
            max_price,
        )
        .expect("imbalance agent's fixed ladder satisfies the bid invariants by construction");
        let agent = ImbalanceAgent {
            state: AgentState::new(id, bid),
        };
        (AgentKind::Imbalance(agent), Vec::new())
    }
}

impl PvAgent {
    pub fn new(
        id: impl Into<String>,
        min_price: Decimal,
        max_price: Decimal,
        peak_power: Decimal,
        noise_fraction: Decimal,
    ) -> (AgentKind, Vec<Sample>) {
        let agent = PvAgent {
            state: AgentState::new(id, Bid::zero(min_price, max_price)),
            min_price,
            max_price,
            peak_power,
            noise_fraction,
        };
        (AgentKind::Pv(agent), Vec::new())
    }

    /// Sinusoidal production profile: zero at night, peaking at solar noon,
    /// always a pure producer (bid is flat, so it clears at `min_price`
    /// whenever it is producing). `θ` is the time of day in radians
    /// (`0` at midnight, `2π` at the next midnight); matches `agents.py`'s
    /// `PVAgent.handle_state_update`.
    fn compute_bid(&self, now: DateTime<Utc>, rng: &mut dyn rand::RngCore) -> Bid {
        let seconds_since_midnight = now.time().num_seconds_from_midnight() as f64;
        let theta = seconds_since_midnight * 2.0 * std::f64::consts::PI / 86_400.0;
        let daylight = (theta - std::f64::consts::FRAC_PI_2).sin().max(0.0);
        let u = rng.gen::<f64>();
        let noise_fraction = self.noise_fraction.to_f64().unwrap_or(0.0);
        let power_f64 =
            -(self.peak_power.to_f64().unwrap_or(0.0)) * daylight * (1.0 + noise_fraction * u);
        let power = Decimal::from_f64(power_f64).unwrap_or(Decimal::ZERO);
        Bid::scalar(power, self.min_price, self.max_price)
    }
}

impl BatteryAgent {
    pub fn new(
        id: impl Into<String>,
        min_price: Decimal,
        max_price: Decimal,
        capacity_kwh: f64,
        max_charge_power: Decimal,
        max_discharge_power: Decimal,
        initial_soc: f64,
        auctioneer_id: &str,
        now: DateTime<Utc>,
    ) -> (AgentKind, Vec<Sample>) {
        let soc = initial_soc.clamp(0.0, 1.0);
        let mut agent = BatteryAgent {
            state: AgentState::new(id, Bid::zero(min_price, max_price)),
            min_price,
            max_price,
            capacity_kwh,
            max_charge_power,
            max_discharge_power,
            ladder_steps: BATTERY_LADDER_STEPS,
            soc: 0.0,
            charge_state: ChargeState::Idle,
        };
        // The original sets `soc` via its edge-triggered property right
        // after construction, so the very first sample always fires (there
        // is no prior value to compare against). The bid itself stays the
        // zero curve until the first state update, matching the original's
        // `BatteryAgent.__init__` (which never calls `calculate_bid` before
        // the first `handle_state_update`).
        let samples = agent.set_soc(soc, auctioneer_id, now);
        (AgentKind::Battery(agent), samples)
    }

    pub fn soc(&self) -> f64 {
        self.soc
    }

    pub fn charge_state(&self) -> ChargeState {
        self.charge_state
    }

    fn set_soc(&mut self, new_soc: f64, auctioneer_id: &str, now: DateTime<Utc>) -> Vec<Sample> {
        let clamped = new_soc.clamp(0.0, 1.0);
        if clamped == self.soc {
            return Vec::new();
        }
        self.soc = clamped;
        // Field is named "power", not "soc" — matches the original's
        // (slightly misleading but preserved) `influx.write_points` shape.
        vec![Sample::new("deviceagent_soc", now)
            .tag("agent_id", self.state.id.clone())
            .tag("auctioneer_id", auctioneer_id)
            .field("power", clamped)]
    }

    /// Integrates `current_power` over `interval_secs` into state of charge.
    /// Positive power is consumption (charging), negative is production
    /// (discharging) — matches the sign convention used throughout the
    /// bid curves.
    fn integrate_soc(&mut self, interval_secs: f64, auctioneer_id: &str, now: DateTime<Utc>) -> Vec<Sample> {
        let power_w = self.state.current_power.to_f64().unwrap_or(0.0);
        let capacity_ws = self.capacity_kwh * 3_600_000.0;
        let delta = power_w * interval_secs / capacity_ws;
        self.set_soc(self.soc + delta, auctioneer_id, now)
    }

    /// Sets `charge_state` from the sign of `current_power`, matching
    /// `BatteryAgent.do_runlevel_update` in the original, which re-derives
    /// it every time runlevel is recomputed (state *or* price update).
    fn sync_charge_state(&mut self) {
        self.charge_state = if self.state.current_power > Decimal::ZERO {
            ChargeState::Charging
        } else if self.state.current_power < Decimal::ZERO {
            ChargeState::Discharging
        } else {
            ChargeState::Idle
        };
    }

    /// Builds the bid for the current state of charge, per §4.5: a nearly
    /// empty battery bids to charge at any price short of the ceiling, a
    /// nearly full one to discharge at any price short of the floor, and
    /// everything in between bids a ladder skewed towards whichever side
    /// of 50% the state of charge sits on. Grounded on `agents.py`'s
    /// `BatteryAgent.calculate_bid`.
    fn compute_bid(&self, auctioneer_price: Decimal) -> Bid {
        if self.soc <= 0.0 {
            return if auctioneer_price == self.max_price {
                Bid::zero(self.min_price, self.max_price)
            } else {
                Bid::scalar(self.max_charge_power, self.min_price, self.max_price)
            };
        }
        if self.soc >= 1.0 {
            return if auctioneer_price == self.min_price {
                Bid::zero(self.min_price, self.max_price)
            } else {
                Bid::scalar(-self.max_discharge_power, self.min_price, self.max_price)
            };
        }

        let soc = Decimal::from_f64(self.soc).unwrap_or(Decimal::new(5, 1));
        let band = self.max_price - self.min_price;
        let (price_lo, price_hi) = if soc <= dec!(0.5) {
            (
                self.max_price - band * (soc / dec!(0.5)),
                self.max_price,
            )
        } else {
            (
                self.min_price,
                self.min_price + band * dec!(2) * (dec!(1) - soc),
            )
        };

        self.ladder(price_lo, price_hi)
    }

    /// `N = ladder_steps + 1` plateaus from `+max_charge_power` down to
    /// `-max_discharge_power` in equal steps, at `N - 1` break prices
    /// equally spaced strictly between `price_lo` and `price_hi`.
    fn ladder(&self, price_lo: Decimal, price_hi: Decimal) -> Bid {
        let n = Decimal::from(self.ladder_steps + 1);
        let step = (self.max_charge_power + self.max_discharge_power) / n;
        let price_step = (price_hi - price_lo) / n;

        let mut prices = Vec::with_capacity(self.ladder_steps as usize);
        for k in 1..=self.ladder_steps {
            prices.push(price_lo + price_step * Decimal::from(k));
        }

        let mut quantities = Vec::with_capacity(self.ladder_steps as usize + 1);
        let mut q = self.max_charge_power;
        quantities.push(q);
        for _ in 0..self.ladder_steps {
            q -= step;
            quantities.push(q);
        }

        Bid::new(quantities, prices, self.min_price, self.max_price)
            .expect("battery ladder is constructed strictly decreasing by step")
    }
}

/// The closed set of device agent kinds, dispatched statically. Owned
/// directly by the `Auctioneer`'s registry (see `auctioneer.rs`), so no
/// agent holds a reference back to the auctioneer at all.
#[derive(Debug, Clone)]
pub enum AgentKind {
    Load(LoadAgent),
    Imbalance(ImbalanceAgent),
    Pv(PvAgent),
    Battery(BatteryAgent),
}

impl AgentKind {
    pub fn id(&self) -> &str {
        match self {
            AgentKind::Load(a) => a.state.id(),
            AgentKind::Imbalance(a) => a.state.id(),
            AgentKind::Pv(a) => a.state.id(),
            AgentKind::Battery(a) => a.state.id(),
        }
    }

    pub fn last_bid(&self) -> &Bid {
        match self {
            AgentKind::Load(a) => &a.state.last_bid,
            AgentKind::Imbalance(a) => &a.state.last_bid,
            AgentKind::Pv(a) => &a.state.last_bid,
            AgentKind::Battery(a) => &a.state.last_bid,
        }
    }

    /// Replaces this agent's `last_bid` if it differs from `bid`. The
    /// auctioneer calls this as the sole mutation step behind
    /// `Auctioneer::submit_bid` — see `auctioneer.rs`.
    pub(crate) fn set_last_bid(&mut self, bid: Bid) -> bool {
        match self {
            AgentKind::Load(a) => a.state.set_last_bid(bid),
            AgentKind::Imbalance(a) => a.state.set_last_bid(bid),
            AgentKind::Pv(a) => a.state.set_last_bid(bid),
            AgentKind::Battery(a) => a.state.set_last_bid(bid),
        }
    }

    pub fn current_power(&self) -> Decimal {
        match self {
            AgentKind::Load(a) => a.state.current_power(),
            AgentKind::Imbalance(a) => a.state.current_power(),
            AgentKind::Pv(a) => a.state.current_power(),
            AgentKind::Battery(a) => a.state.current_power(),
        }
    }

    /// Recomputes this agent's committed power level for a new price.
    /// Never produces a new bid — this is the half of the loop that must
    /// not feed back into bidding.
    pub fn on_price_update(
        &mut self,
        price: Decimal,
        auctioneer_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<Sample> {
        match self {
            AgentKind::Load(a) => a.state.recompute_power(price, auctioneer_id, now),
            AgentKind::Imbalance(a) => a.state.recompute_power(price, auctioneer_id, now),
            AgentKind::Pv(a) => a.state.recompute_power(price, auctioneer_id, now),
            AgentKind::Battery(a) => {
                let samples = a.state.recompute_power(price, auctioneer_id, now);
                a.sync_charge_state();
                samples
            }
        }
    }

    /// One simulated tick's worth of local state advancement: recompute
    /// this agent's bid curve and, if it differs from the one on file,
    /// return it as a candidate for the auctioneer to submit (see
    /// `StateUpdateOutcome::new_bid`). This method never mutates
    /// `last_bid` itself — only `Auctioneer::submit_bid`
    /// (via `AgentKind::set_last_bid`) does that, so there is exactly one
    /// code path that can ever replace an agent's bid.
    pub fn on_state_update(
        &mut self,
        current_price: Decimal,
        now: DateTime<Utc>,
        interval_secs: f64,
        rng: &mut dyn rand::RngCore,
        auctioneer_id: &str,
    ) -> StateUpdateOutcome {
        let mut samples = Vec::new();
        let new_bid = match self {
            AgentKind::Load(a) => {
                let candidate = a.compute_bid(rng);
                (candidate != a.state.last_bid).then_some(candidate)
            }
            AgentKind::Imbalance(_) => {
                // Technically not necessary to recompute runlevel since a
                // state update never changes this agent's fixed bid, but
                // preserved as a no-op path matching the original's
                // `handle_state_update` override (which only re-syncs
                // runlevel and never a fresh bid).
                log::warn!(
                    "imbalance agent '{}' received a state update it has nothing to recompute",
                    self.id()
                );
                None
            }
            AgentKind::Pv(a) => {
                let candidate = a.compute_bid(now, rng);
                (candidate != a.state.last_bid).then_some(candidate)
            }
            AgentKind::Battery(a) => {
                samples.extend(a.integrate_soc(interval_secs, auctioneer_id, now));
                let candidate = a.compute_bid(current_price);
                (candidate != a.state.last_bid).then_some(candidate)
            }
        };

        samples.extend(match self {
            AgentKind::Load(a) => a.state.recompute_power(current_price, auctioneer_id, now),
            AgentKind::Imbalance(a) => a.state.recompute_power(current_price, auctioneer_id, now),
            AgentKind::Pv(a) => a.state.recompute_power(current_price, auctioneer_id, now),
            AgentKind::Battery(a) => {
                let samples = a.state.recompute_power(current_price, auctioneer_id, now);
                a.sync_charge_state();
                samples
            }
        });

        StateUpdateOutcome { new_bid, samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rust_decimal_macros::dec;

    fn band() -> (Decimal, Decimal) {
        (dec!(0), dec!(1000))
    }

    #[test]
    fn imbalance_agent_bids_at_10_and_90_percent_of_band() {
        let (min, max) = band();
        let (agent, samples) = ImbalanceAgent::new("imb", min, max, dec!(50), dec!(50));
        assert!(samples.is_empty());
        assert_eq!(agent.last_bid().prices(), &[dec!(100), dec!(900)]);
        assert_eq!(agent.last_bid().quantities(), &[dec!(50), dec!(0), dec!(-50)]);
    }

    #[test]
    fn battery_emits_initial_soc_sample() {
        let (min, max) = band();
        let now = Utc::now();
        let (agent, samples) = BatteryAgent::new(
            "bat", min, max, 10.0, dec!(5000), dec!(5000), 0.5, "Sim", now,
        );
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].measurement, "deviceagent_soc");
        match agent {
            AgentKind::Battery(b) => assert_eq!(b.soc(), 0.5),
            _ => panic!("expected battery"),
        }
    }

    #[test]
    fn battery_ladder_is_valid_bid_at_every_soc() {
        let (min, max) = band();
        let now = Utc::now();
        for soc in [0.1, 0.3, 0.5, 0.7, 0.9] {
            let (agent, _) = BatteryAgent::new(
                "bat", min, max, 10.0, dec!(5000), dec!(5000), soc, "Sim", now,
            );
            if let AgentKind::Battery(b) = agent {
                let bid = b.compute_bid(dec!(500));
                assert_eq!(bid.quantities().len(), bid.prices().len() + 1);
            }
        }
    }

    // E5: at soc=0 below the price ceiling the battery always bids to
    // charge; at soc=1 above the floor it always bids to discharge.
    #[test]
    fn e5_extreme_soc_bids_scalar_charge_or_discharge() {
        let (min, max) = band();
        let now = Utc::now();
        let (empty, _) = BatteryAgent::new(
            "bat", min, max, 10.0, dec!(5000), dec!(5000), 0.0, "Sim", now,
        );
        let (full, _) = BatteryAgent::new(
            "bat", min, max, 10.0, dec!(5000), dec!(5000), 1.0, "Sim", now,
        );
        let empty_bid = match empty {
            AgentKind::Battery(b) => b.compute_bid(dec!(500)),
            _ => unreachable!(),
        };
        let full_bid = match full {
            AgentKind::Battery(b) => b.compute_bid(dec!(500)),
            _ => unreachable!(),
        };
        assert!(empty_bid.prices().is_empty());
        assert_eq!(empty_bid.quantities()[0], dec!(5000));
        assert!(full_bid.prices().is_empty());
        assert_eq!(full_bid.quantities()[0], dec!(-5000));
    }

    #[test]
    fn battery_goes_idle_at_the_band_edge_to_avoid_further_losses() {
        let (min, max) = band();
        let now = Utc::now();
        let (empty, _) = BatteryAgent::new(
            "bat", min, max, 10.0, dec!(5000), dec!(5000), 0.0, "Sim", now,
        );
        let (full, _) = BatteryAgent::new(
            "bat", min, max, 10.0, dec!(5000), dec!(5000), 1.0, "Sim", now,
        );
        match empty {
            AgentKind::Battery(b) => assert_eq!(b.compute_bid(max).quantities()[0], dec!(0)),
            _ => unreachable!(),
        }
        match full {
            AgentKind::Battery(b) => assert_eq!(b.compute_bid(min).quantities()[0], dec!(0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn load_agent_bid_stays_within_noise_band() {
        let (min, max) = band();
        let (agent, _) = LoadAgent::new("load", min, max, dec!(100), dec!(0.1));
        let mut rng = StepRng::new(0, 1 << 32);
        if let AgentKind::Load(a) = agent {
            let bid = a.compute_bid(&mut rng);
            let q = bid.quantities()[0];
            assert!(q >= dec!(100) && q <= dec!(110));
        }
    }

    #[test]
    fn pv_agent_is_zero_at_midnight_and_nonpositive_at_noon() {
        let (min, max) = band();
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        let (agent, _) = PvAgent::new("pv", min, max, dec!(3000), dec!(0));
        let mut rng = StepRng::new(0, 1 << 32);
        if let AgentKind::Pv(a) = agent {
            let at_midnight = a.compute_bid(midnight, &mut rng);
            assert_eq!(at_midnight.quantities()[0], dec!(0));
            let noon = a.compute_bid(midnight + chrono::Duration::hours(12), &mut rng);
            assert!(noon.quantities()[0] <= dec!(0));
            assert_ne!(noon.quantities()[0], dec!(0));
        }
    }

    // Invariant 6: soc stays in [0, 1] no matter how large the integrated
    // power/interval product is.
    #[test]
    fn battery_soc_stays_clamped_across_extreme_integration() {
        let (min, max) = band();
        let now = Utc::now();
        let (mut agent, _) = BatteryAgent::new(
            "bat", min, max, 1.0, dec!(5000), dec!(5000), 0.5, "Sim", now,
        );
        if let AgentKind::Battery(b) = &mut agent {
            b.state.current_power = dec!(100_000);
            b.integrate_soc(3_600.0, "Sim", now);
            assert!(b.soc() <= 1.0);
            b.state.current_power = dec!(-100_000);
            b.integrate_soc(3_600.0 * 10.0, "Sim", now);
            assert!(b.soc() >= 0.0);
        }
    }

    #[test]
    fn on_price_update_never_changes_last_bid() {
        let (min, max) = band();
        let (mut agent, _) = LoadAgent::new("load", min, max, dec!(100), dec!(0));
        let before = agent.last_bid().clone();
        agent.on_price_update(dec!(750), "Sim", Utc::now());
        assert_eq!(agent.last_bid(), &before);
    }
}
