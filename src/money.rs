//! Exact decimal money values.
//!
//! Amounts are fixed-point: an integer mantissa plus a decimal scale of at
//! least two digits. Floats never represent an amount; arithmetic aligns
//! scales and operates on mantissas so results print exactly.

use serde::Serialize;
use serde::ser::SerializeMap;
use thiserror::Error;

/// Supported currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn from_code(code: &str) -> Option<Currency> {
        match code {
            "USD" => Some(Currency::Usd),
            "EUR" => Some(Currency::Eur),
            "GBP" => Some(Currency::Gbp),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },
    #[error("money amount overflow")]
    Overflow,
}

/// A currency-tagged fixed-point amount. `scale` is the number of fractional
/// digits carried by `mantissa`, never less than two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Money {
    currency: Currency,
    mantissa: i64,
    scale: u8,
}

const MIN_SCALE: u8 = 2;

impl Money {
    /// Build from the integer and fractional digit strings of a literal
    /// (underscore separators already stripped). The written fractional
    /// precision is preserved, with a floor of two digits.
    pub fn from_literal_parts(currency: Currency, int_digits: &str, frac_digits: &str) -> Option<Money> {
        let scale = (frac_digits.len() as u8).max(MIN_SCALE);
        let mut mantissa: i64 = 0;
        for c in int_digits.chars().chain(frac_digits.chars()) {
            mantissa = mantissa
                .checked_mul(10)?
                .checked_add(c.to_digit(10)? as i64)?;
        }
        for _ in frac_digits.len() as u8..scale {
            mantissa = mantissa.checked_mul(10)?;
        }
        Some(Money {
            currency,
            mantissa,
            scale,
        })
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Exact decimal rendering, e.g. `"0.00"` or `"-1000.50"`.
    pub fn amount_string(&self) -> String {
        let negative = self.mantissa < 0;
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
        } else {
            digits
        };
        let split = padded.len() - scale;
        let sign = if negative { "-" } else { "" };
        format!("{sign}{}.{}", &padded[..split], &padded[split..])
    }

    fn aligned(self, other: Money) -> Result<(i64, i64, u8), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        let scale = self.scale.max(other.scale);
        let left = rescale(self.mantissa, self.scale, scale).ok_or(MoneyError::Overflow)?;
        let right = rescale(other.mantissa, other.scale, scale).ok_or(MoneyError::Overflow)?;
        Ok((left, right, scale))
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        let (left, right, scale) = self.aligned(other)?;
        let mantissa = left.checked_add(right).ok_or(MoneyError::Overflow)?;
        Ok(Money {
            currency: self.currency,
            mantissa,
            scale,
        })
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        let (left, right, scale) = self.aligned(other)?;
        let mantissa = left.checked_sub(right).ok_or(MoneyError::Overflow)?;
        Ok(Money {
            currency: self.currency,
            mantissa,
            scale,
        })
    }

    /// Scale by a plain number. The mantissa product is rounded half away
    /// from zero at the existing scale, which is deterministic for any
    /// given inputs.
    pub fn scaled_by(self, factor: f64) -> Result<Money, MoneyError> {
        let product = (self.mantissa as f64) * factor;
        if !product.is_finite() || product.abs() >= i64::MAX as f64 {
            return Err(MoneyError::Overflow);
        }
        Ok(Money {
            currency: self.currency,
            mantissa: product.round() as i64,
            scale: self.scale,
        })
    }

    pub fn divided_by(self, divisor: f64) -> Result<Money, MoneyError> {
        if divisor == 0.0 {
            return Err(MoneyError::Overflow);
        }
        self.scaled_by(1.0 / divisor)
    }

    pub fn compare(self, other: Money) -> Result<std::cmp::Ordering, MoneyError> {
        let (left, right, _) = self.aligned(other)?;
        Ok(left.cmp(&right))
    }
}

fn rescale(mantissa: i64, from: u8, to: u8) -> Option<i64> {
    let mut value = mantissa;
    for _ in from..to {
        value = value.checked_mul(10)?;
    }
    Some(value)
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.currency, self.amount_string())
    }
}

impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // String amount, so precision survives the wire.
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("currency", self.currency.code())?;
        map.serialize_entry("amount", &self.amount_string())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(int_digits: &str, frac_digits: &str) -> Money {
        Money::from_literal_parts(Currency::Usd, int_digits, frac_digits).expect("literal")
    }

    #[test]
    fn preserves_written_precision_with_two_digit_floor() {
        assert_eq!(usd("0", "00").amount_string(), "0.00");
        assert_eq!(usd("1", "5").amount_string(), "1.50");
        assert_eq!(usd("1000", "505").amount_string(), "1000.505");
        assert_eq!(usd("7", "").amount_string(), "7.00");
    }

    #[test]
    fn addition_aligns_scales() {
        let sum = usd("1", "50").checked_add(usd("0", "505")).expect("add");
        assert_eq!(sum.amount_string(), "2.005");
    }

    #[test]
    fn rejects_mixed_currencies() {
        let eur = Money::from_literal_parts(Currency::Eur, "1", "00").expect("literal");
        let err = usd("1", "00").checked_add(eur).expect_err("mismatch");
        assert_eq!(
            err,
            MoneyError::CurrencyMismatch {
                left: Currency::Usd,
                right: Currency::Eur
            }
        );
    }

    #[test]
    fn comparison_is_scale_insensitive() {
        assert_eq!(
            usd("1", "50").compare(usd("1", "500")).expect("compare"),
            std::cmp::Ordering::Equal
        );
        assert_eq!(
            usd("2", "00").compare(usd("1", "99")).expect("compare"),
            std::cmp::Ordering::Greater
        );
    }

    #[test]
    fn scaling_rounds_at_existing_scale() {
        let scaled = usd("10", "00").scaled_by(0.125).expect("scale");
        assert_eq!(scaled.amount_string(), "1.25");
    }

    #[test]
    fn serializes_as_currency_and_string_amount() {
        let json = serde_json::to_string(&usd("0", "00")).expect("serialize");
        assert_eq!(json, r#"{"currency":"USD","amount":"0.00"}"#);
    }
}
