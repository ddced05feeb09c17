// Bid curve algebra — piecewise-constant, monotonically non-increasing
// quantity-vs-price functions ("bidding ladders").
//
// A `Bid` carries the price band it was validated against so that
// `equilibrium_price`/`+` don't need that context threaded through every
// call site; the band is not part of curve *identity* though, so
// `PartialEq` only compares prices and quantities, per spec.
use std::ops::Add;

use rust_decimal::Decimal;

use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone)]
pub struct Bid {
    /// Break prices, strictly increasing, each in `(min_price, max_price]`.
    prices: Vec<Decimal>,
    /// Plateau quantities, strictly decreasing. `quantities.len() == prices.len() + 1`.
    quantities: Vec<Decimal>,
    min_price: Decimal,
    max_price: Decimal,
}

impl PartialEq for Bid {
    fn eq(&self, other: &Self) -> bool {
        self.prices == other.prices && self.quantities == other.quantities
    }
}

impl Bid {
    /// Builds a bid from explicit quantity/price sequences, validating every
    /// invariant in §3. Fails naming the first violated rule.
    pub fn new(
        quantities: Vec<Decimal>,
        prices: Vec<Decimal>,
        min_price: Decimal,
        max_price: Decimal,
    ) -> MarketResult<Self> {
        if quantities.len() != prices.len() + 1 {
            return Err(MarketError::InvalidBid(
                "quantities must have exactly one more element than prices".into(),
            ));
        }

        for &p in &prices {
            if p <= min_price || p > max_price {
                return Err(MarketError::InvalidBid(format!(
                    "price {p} outside band ({min_price}, {max_price}]"
                )));
            }
        }

        for w in prices.windows(2) {
            if w[0] >= w[1] {
                return Err(MarketError::InvalidBid(
                    "break prices must be strictly increasing".into(),
                ));
            }
        }

        for w in quantities.windows(2) {
            if w[0] <= w[1] {
                return Err(MarketError::InvalidBid(
                    "plateau quantities must be strictly decreasing".into(),
                ));
            }
        }

        Ok(Self {
            prices,
            quantities,
            min_price,
            max_price,
        })
    }

    /// A flat curve at a single scalar quantity (e.g. a load's instantaneous draw).
    pub fn scalar(quantity: Decimal, min_price: Decimal, max_price: Decimal) -> Self {
        Self {
            prices: Vec::new(),
            quantities: vec![quantity],
            min_price,
            max_price,
        }
    }

    /// The empty/zero bid: flat at zero quantity, the additive identity.
    pub fn zero(min_price: Decimal, max_price: Decimal) -> Self {
        Self::scalar(Decimal::ZERO, min_price, max_price)
    }

    pub fn prices(&self) -> &[Decimal] {
        &self.prices
    }

    pub fn quantities(&self) -> &[Decimal] {
        &self.quantities
    }

    pub fn min_price(&self) -> Decimal {
        self.min_price
    }

    pub fn max_price(&self) -> Decimal {
        self.max_price
    }

    /// The plateau quantity active at `price`. Prices outside the band
    /// saturate to the nearest boundary plateau. Break prices themselves
    /// belong to the plateau below them (`Q(p) = q₀` for `p ≤ p₁`, etc.).
    pub fn find_quantity(&self, price: Decimal) -> Decimal {
        for (i, &p) in self.prices.iter().enumerate() {
            if price <= p {
                return self.quantities[i];
            }
        }
        *self.quantities.last().expect("quantities is never empty")
    }

    /// The lowest price at which the curve crosses or touches zero from
    /// above — the price that clears the market.
    pub fn equilibrium_price(&self) -> Decimal {
        if self.prices.is_empty() {
            return if self.quantities[0] < Decimal::ZERO {
                self.min_price
            } else if self.quantities[0] > Decimal::ZERO {
                self.max_price
            } else {
                self.min_price
            };
        }

        if self.quantities[0] < Decimal::ZERO {
            return self.min_price;
        }

        if *self.quantities.last().expect("non-empty") > Decimal::ZERO {
            return self.max_price;
        }

        let k = self
            .quantities
            .iter()
            .position(|&q| q <= Decimal::ZERO)
            .expect("curve starts non-negative and ends non-positive, so it must cross zero");
        self.prices[k - 1]
    }

    /// Pointwise sum with `other`, producing the merged curve described in §4.1.
    pub fn checked_add(&self, other: &Bid) -> MarketResult<Bid> {
        if self.min_price != other.min_price || self.max_price != other.max_price {
            return Err(MarketError::InvalidBid(
                "cannot add bids validated against different price bands".into(),
            ));
        }

        let mut new_prices = Vec::with_capacity(self.prices.len() + other.prices.len());
        let mut new_quantities = Vec::with_capacity(new_prices.capacity() + 1);

        let mut quantity = self.quantities[0] + other.quantities[0];
        new_quantities.push(quantity);

        let mut i = 0usize;
        let mut j = 0usize;
        loop {
            let self_ended = i >= self.prices.len();
            let other_ended = j >= other.prices.len();
            if self_ended && other_ended {
                break;
            }

            if other_ended || (!self_ended && self.prices[i] < other.prices[j]) {
                quantity -= self.quantities[i] - self.quantities[i + 1];
                new_prices.push(self.prices[i]);
                i += 1;
            } else if self_ended || (!other_ended && other.prices[j] < self.prices[i]) {
                quantity -= other.quantities[j] - other.quantities[j + 1];
                new_prices.push(other.prices[j]);
                j += 1;
            } else {
                quantity -= (self.quantities[i] - self.quantities[i + 1])
                    + (other.quantities[j] - other.quantities[j + 1]);
                new_prices.push(self.prices[i]);
                i += 1;
                j += 1;
            }
            new_quantities.push(quantity);
        }

        Bid::new(new_quantities, new_prices, self.min_price, self.max_price)
    }
}

impl Add for &Bid {
    type Output = MarketResult<Bid>;

    fn add(self, other: &Bid) -> MarketResult<Bid> {
        self.checked_add(other)
    }
}

impl Add for Bid {
    type Output = MarketResult<Bid>;

    fn add(self, other: Bid) -> MarketResult<Bid> {
        self.checked_add(&other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn band() -> (Decimal, Decimal) {
        (dec!(0), dec!(1000))
    }

    fn bid_a() -> Bid {
        let (min, max) = band();
        Bid::new(
            vec![dec!(10), dec!(9), dec!(5), dec!(-5)],
            vec![dec!(1), dec!(3), dec!(5)],
            min,
            max,
        )
        .unwrap()
    }

    fn bid_b() -> Bid {
        let (min, max) = band();
        Bid::new(
            vec![dec!(15), dec!(5), dec!(-10)],
            vec![dec!(1), dec!(2)],
            min,
            max,
        )
        .unwrap()
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let (min, max) = band();
        let err = Bid::new(vec![dec!(1), dec!(2)], vec![], min, max).unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
    }

    #[test]
    fn rejects_out_of_band_price() {
        let (min, max) = band();
        let err = Bid::new(vec![dec!(1), dec!(-1)], vec![dec!(0)], min, max).unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
        let err = Bid::new(vec![dec!(1), dec!(-1)], vec![dec!(1001)], min, max).unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
    }

    #[test]
    fn rejects_non_increasing_prices() {
        let (min, max) = band();
        let err = Bid::new(
            vec![dec!(3), dec!(2), dec!(1)],
            vec![dec!(5), dec!(4)],
            min,
            max,
        )
        .unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
    }

    #[test]
    fn rejects_non_decreasing_quantities() {
        let (min, max) = band();
        let err = Bid::new(
            vec![dec!(1), dec!(1)],
            vec![dec!(5)],
            min,
            max,
        )
        .unwrap_err();
        assert!(matches!(err, MarketError::InvalidBid(_)));
    }

    #[test]
    fn flat_curve_is_legal() {
        let (min, max) = band();
        let bid = Bid::scalar(dec!(500), min, max);
        assert_eq!(bid.quantities(), &[dec!(500)]);
        assert!(bid.prices().is_empty());
    }

    // E1: equilibrium price of a crossing curve.
    #[test]
    fn e1_equilibrium_price() {
        assert_eq!(bid_a().equilibrium_price(), dec!(5));
    }

    // E2: addition merges the equal break price at p=1 into a single point,
    // and the resulting curve is the exact pointwise sum of A and B.
    #[test]
    fn e2_addition_merges_equal_break_prices() {
        let sum = bid_a().checked_add(&bid_b()).unwrap();
        assert_eq!(sum.prices(), &[dec!(1), dec!(2), dec!(3), dec!(5)]);
        assert_eq!(
            sum.quantities(),
            &[dec!(25), dec!(14), dec!(-1), dec!(-5), dec!(-15)]
        );
    }

    // E3: find_quantity saturates at the base/top plateau and reads the
    // plateau immediately above a given price.
    #[test]
    fn e3_find_quantity_on_sum() {
        let sum = bid_a().checked_add(&bid_b()).unwrap();
        assert_eq!(sum.find_quantity(dec!(1.5)), dec!(14));
        assert_eq!(sum.find_quantity(dec!(0)), dec!(25));
    }

    // E4: pure production/consumption scalar curves clear at the band edges.
    #[test]
    fn e4_pure_production_and_consumption() {
        let (min, max) = band();
        let production = Bid::scalar(dec!(-100), min, max);
        assert_eq!(production.equilibrium_price(), min);
        let consumption = Bid::scalar(dec!(100), min, max);
        assert_eq!(consumption.equilibrium_price(), max);
    }

    #[test]
    fn degenerate_flat_zero_pins_to_min_price() {
        let (min, _max) = band();
        let flat_zero = Bid::zero(min, dec!(1000));
        assert_eq!(flat_zero.equilibrium_price(), min);
    }

    #[test]
    fn addition_is_commutative() {
        let a = bid_a();
        let b = bid_b();
        let ab = a.checked_add(&b).unwrap();
        let ba = b.checked_add(&a).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn addition_is_associative() {
        let a = bid_a();
        let b = bid_b();
        let (min, max) = band();
        let c = Bid::scalar(dec!(3), min, max);

        let left = a.checked_add(&b).unwrap().checked_add(&c).unwrap();
        let right = a.checked_add(&b.checked_add(&c).unwrap()).unwrap();
        assert_eq!(left, right);
    }

    #[test]
    fn addition_identity() {
        let a = bid_a();
        let (min, max) = band();
        let zero = Bid::zero(min, max);
        let sum = a.checked_add(&zero).unwrap();
        assert_eq!(sum, a);
    }

    #[test]
    fn find_quantity_is_monotonically_non_increasing() {
        let sum = bid_a().checked_add(&bid_b()).unwrap();
        let probes = [
            dec!(-10),
            dec!(0),
            dec!(1),
            dec!(1.5),
            dec!(2),
            dec!(3),
            dec!(4),
            dec!(5),
            dec!(6),
            dec!(1000),
        ];
        for w in probes.windows(2) {
            assert!(sum.find_quantity(w[0]) >= sum.find_quantity(w[1]));
        }
    }

    #[test]
    fn sum_matches_pointwise_addition() {
        let a = bid_a();
        let b = bid_b();
        let sum = a.checked_add(&b).unwrap();
        let probes = [
            dec!(0),
            dec!(1),
            dec!(1.5),
            dec!(2),
            dec!(2.5),
            dec!(3),
            dec!(4),
            dec!(5),
            dec!(900),
        ];
        for &p in &probes {
            assert_eq!(sum.find_quantity(p), a.find_quantity(p) + b.find_quantity(p));
        }
    }
}
