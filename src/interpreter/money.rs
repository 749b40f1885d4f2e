//! Fixed-point money arithmetic.
//!
//! Amounts are stored in minor units (cents for two-decimal currencies) so
//! arithmetic never touches floating point. Mixing currencies in `+`/`-` is a
//! catchable value error; scaling by a number keeps the currency.

use crate::interpreter::error::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Money {
    /// Amount in minor units
    pub amount: i64,
    /// ISO 4217 code ("USD", "GBP", ...)
    pub currency: String,
    /// Decimal places of the minor unit
    pub scale: u8,
}

/// Round to the nearest integer, ties to even (half-even)
fn bankers_round(x: f64) -> i64 {
    let whole = x.floor();
    let frac = x - whole;
    if frac < 0.5 {
        whole as i64
    } else if frac > 0.5 {
        whole as i64 + 1
    } else {
        let whole = whole as i64;
        if whole % 2 == 0 {
            whole
        } else {
            whole + 1
        }
    }
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>, scale: u8) -> Self {
        Self {
            amount,
            currency: currency.into(),
            scale,
        }
    }

    fn check_same_currency(&self, other: &Money) -> Result<(), RuntimeError> {
        if self.currency != other.currency {
            Err(RuntimeError::currency_mismatch(
                &self.currency,
                &other.currency,
            ))
        } else {
            Ok(())
        }
    }

    pub fn add(&self, other: &Money) -> Result<Money, RuntimeError> {
        self.check_same_currency(other)?;
        Ok(Money::new(
            self.amount + other.amount,
            self.currency.clone(),
            self.scale,
        ))
    }

    pub fn sub(&self, other: &Money) -> Result<Money, RuntimeError> {
        self.check_same_currency(other)?;
        Ok(Money::new(
            self.amount - other.amount,
            self.currency.clone(),
            self.scale,
        ))
    }

    pub fn mul_int(&self, n: i64) -> Money {
        Money::new(self.amount * n, self.currency.clone(), self.scale)
    }

    /// Multiply by a float, rounding to minor units with ties to even
    pub fn mul_float(&self, f: f64) -> Money {
        let scaled = bankers_round(self.amount as f64 * f);
        Money::new(scaled, self.currency.clone(), self.scale)
    }

    pub fn div_int(&self, n: i64) -> Result<Money, RuntimeError> {
        if n == 0 {
            return Err(RuntimeError::division_by_zero());
        }
        let scaled = bankers_round(self.amount as f64 / n as f64);
        Ok(Money::new(scaled, self.currency.clone(), self.scale))
    }

    pub fn div_float(&self, f: f64) -> Result<Money, RuntimeError> {
        if f == 0.0 {
            return Err(RuntimeError::division_by_zero());
        }
        let scaled = bankers_round(self.amount as f64 / f);
        Ok(Money::new(scaled, self.currency.clone(), self.scale))
    }

    pub fn negate(&self) -> Money {
        Money::new(-self.amount, self.currency.clone(), self.scale)
    }

    pub fn abs(&self) -> Money {
        Money::new(self.amount.abs(), self.currency.clone(), self.scale)
    }

    /// Split into `n` parts that sum exactly to the original amount.
    ///
    /// Largest-remainder allocation: every part gets the truncated share and
    /// the first `remainder` parts absorb one extra minor unit (with the sign
    /// of the amount), so `$0.01.split(3)` is `[$0.01, $0.00, $0.00]`.
    pub fn split(&self, n: i64) -> Result<Vec<Money>, RuntimeError> {
        if n <= 0 {
            return Err(RuntimeError::user_failure(format!(
                "cannot split money into {} parts",
                n
            )));
        }
        let base = self.amount / n;
        let remainder = (self.amount % n).abs();
        let unit = if self.amount >= 0 { 1 } else { -1 };
        let mut parts = Vec::with_capacity(n as usize);
        for i in 0..n {
            let extra = if i < remainder { unit } else { 0 };
            parts.push(Money::new(
                base + extra,
                self.currency.clone(),
                self.scale,
            ));
        }
        Ok(parts)
    }

    /// Currency symbol, or None for codes rendered as `CODE#amount`
    fn symbol(&self) -> Option<&'static str> {
        match self.currency.as_str() {
            "USD" => Some("$"),
            "GBP" => Some("£"),
            "EUR" => Some("€"),
            "JPY" => Some("¥"),
            _ => None,
        }
    }

    /// Render in literal form: `$12.50`, `¥150`, `CHF#3.00`
    pub fn format(&self) -> String {
        let negative = self.amount < 0;
        let abs = self.amount.unsigned_abs();
        let divisor = 10u64.pow(self.scale as u32);
        let whole = abs / divisor;
        let frac = abs % divisor;
        let digits = if self.scale == 0 {
            whole.to_string()
        } else {
            format!("{}.{:0width$}", whole, frac, width = self.scale as usize)
        };
        let sign = if negative { "-" } else { "" };
        match self.symbol() {
            Some(sym) => format!("{}{}{}", sign, sym, digits),
            None => format!("{}{}#{}", sign, self.currency, digits),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(cents: i64) -> Money {
        Money::new(cents, "USD", 2)
    }

    #[test]
    fn add_same_currency() {
        let total = usd(1250).add(&usd(250)).unwrap();
        assert_eq!(total.amount, 1500);
    }

    #[test]
    fn mixed_currency_is_a_value_error() {
        let err = usd(100).add(&Money::new(100, "EUR", 2)).unwrap_err();
        assert_eq!(err.code, "VAL-0002");
        assert!(err.is_catchable());
    }

    #[test]
    fn split_sums_exactly() {
        let parts = usd(1000).split(3).unwrap();
        let amounts: Vec<i64> = parts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![334, 333, 333]);
        assert_eq!(amounts.iter().sum::<i64>(), 1000);
    }

    #[test]
    fn split_one_cent_three_ways() {
        let parts = usd(1).split(3).unwrap();
        let amounts: Vec<i64> = parts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![1, 0, 0]);
    }

    #[test]
    fn split_negative_amount() {
        let parts = usd(-1000).split(3).unwrap();
        let amounts: Vec<i64> = parts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts.iter().sum::<i64>(), -1000);
        assert_eq!(amounts, vec![-334, -333, -333]);
    }

    #[test]
    fn formats_symbol_and_code_currencies() {
        assert_eq!(usd(1250).format(), "$12.50");
        assert_eq!(usd(-5).format(), "-$0.05");
        assert_eq!(Money::new(150, "JPY", 0).format(), "¥150");
        assert_eq!(Money::new(300, "CHF", 2).format(), "CHF#3.00");
    }

    #[test]
    fn division_by_zero_is_caught() {
        assert_eq!(usd(100).div_int(0).unwrap_err().code, "VAL-0001");
    }

    #[test]
    fn division_rounds_ties_to_even() {
        // 5 / 2 = 2.5 rounds down to 2, 15 / 2 = 7.5 rounds up to 8
        assert_eq!(usd(5).div_int(2).unwrap().amount, 2);
        assert_eq!(usd(15).div_int(2).unwrap().amount, 8);
        assert_eq!(usd(7).div_int(2).unwrap().amount, 4);
        assert_eq!(usd(-5).div_int(2).unwrap().amount, -2);
    }

    #[test]
    fn float_scaling_rounds_ties_to_even() {
        assert_eq!(usd(5).mul_float(0.5).amount, 2);
        assert_eq!(usd(15).mul_float(0.5).amount, 8);
        assert_eq!(usd(100).div_float(3.0).unwrap().amount, 33);
    }
}
