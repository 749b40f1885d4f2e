//! Property tests for money arithmetic.
//!
//! Splitting must conserve the total exactly for any amount and part count,
//! with parts never differing by more than one minor unit.

use proptest::prelude::*;

use sorrel::interpreter::money::Money;

proptest! {
    #[test]
    fn split_conserves_the_total(amount in -1_000_000_000i64..1_000_000_000, n in 1i64..500) {
        let money = Money::new(amount, "USD", 2);
        let parts = money.split(n).unwrap();
        prop_assert_eq!(parts.len(), n as usize);
        let total: i64 = parts.iter().map(|p| p.amount).sum();
        prop_assert_eq!(total, amount);
    }

    #[test]
    fn split_parts_differ_by_at_most_one_minor_unit(
        amount in -1_000_000_000i64..1_000_000_000,
        n in 1i64..500,
    ) {
        let parts = Money::new(amount, "EUR", 2).split(n).unwrap();
        let min = parts.iter().map(|p| p.amount).min().unwrap();
        let max = parts.iter().map(|p| p.amount).max().unwrap();
        prop_assert!(max - min <= 1);
    }

    #[test]
    fn split_keeps_currency_and_scale(amount in any::<i32>(), n in 1i64..50) {
        let parts = Money::new(amount as i64, "JPY", 0).split(n).unwrap();
        prop_assert!(parts.iter().all(|p| p.currency == "JPY" && p.scale == 0));
    }

    #[test]
    fn negate_round_trips(amount in any::<i64>().prop_filter("avoid overflow", |a| *a != i64::MIN)) {
        let money = Money::new(amount, "USD", 2);
        prop_assert_eq!(money.negate().negate(), money);
    }

    #[test]
    fn add_then_sub_is_identity(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let x = Money::new(a, "GBP", 2);
        let y = Money::new(b, "GBP", 2);
        let back = x.add(&y).unwrap().sub(&y).unwrap();
        prop_assert_eq!(back, x);
    }
}

#[test]
fn split_rejects_non_positive_part_counts() {
    let money = Money::new(100, "USD", 2);
    assert!(money.split(0).is_err());
    assert!(money.split(-3).is_err());
}
