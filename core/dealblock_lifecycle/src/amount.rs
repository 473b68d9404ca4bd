//! Conversion between human token amounts (`"5000.5"`) and the token's
//! smallest unit.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::errors::ValidationError;

/// Decimals of the USDC/USDT deployments the contract was built against.
pub const DEFAULT_TOKEN_DECIMALS: u32 = 18;

fn unit_multiplier(decimals: u32) -> Option<Decimal> {
    (0..decimals).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(Decimal::TEN))
}

/// Parse a positive human amount into smallest units.
pub fn parse_token_amount(raw: &str, decimals: u32) -> Result<u128, ValidationError> {
    let invalid = || ValidationError::InvalidAmount(raw.to_string());
    let value = Decimal::from_str(raw.trim()).map_err(|_| invalid())?;
    if value <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    if value.scale() > decimals {
        return Err(invalid());
    }
    let units = unit_multiplier(decimals)
        .and_then(|m| value.checked_mul(m))
        .ok_or_else(invalid)?;
    units.trunc().to_u128().ok_or_else(invalid)
}

/// Render smallest units as a human amount with at most `fraction_digits`
/// decimals and no trailing zeros.
pub fn format_token_amount(amount: u128, decimals: u32, fraction_digits: u32) -> String {
    let whole = |amount: u128| {
        10u128
            .checked_pow(decimals)
            .map(|d| (amount / d).to_string())
            .unwrap_or_else(|| "0".to_string())
    };
    let Ok(mantissa) = i128::try_from(amount) else {
        return whole(amount);
    };
    match Decimal::try_from_i128_with_scale(mantissa, decimals) {
        Ok(value) => value.round_dp(fraction_digits).normalize().to_string(),
        Err(_) => whole(amount),
    }
}
