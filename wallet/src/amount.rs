//! Denomination and fee policy for outputs the wallet asks a mint to sign.
use std::collections::BTreeMap;

use cashu::amount::SplitTarget;
use cashu::Amount;

use crate::errors::{WalletError, WalletResult};

/// Most outputs the wallet puts into a single swap request.
pub const MAX_OUTPUTS: usize = 1_000;

/// Denominations for `amount` under `target`, bounded by [`MAX_OUTPUTS`].
pub fn output_amounts(amount: Amount, target: &SplitTarget) -> WalletResult<Vec<Amount>> {
    if let SplitTarget::Value(value) = target {
        let value = u64::from(*value);
        if value == 0 {
            return Err(WalletError::InvalidAmount(
                "Split target value must be positive".to_string(),
            ));
        }
        // Checked up front so a tiny chunk never builds a huge vector.
        if u64::from(amount) / value > MAX_OUTPUTS as u64 {
            return Err(too_many_outputs(amount));
        }
    }

    let parts = amount.split_targeted(target)?;
    if parts.len() > MAX_OUTPUTS {
        return Err(too_many_outputs(amount));
    }
    Ok(parts)
}

fn too_many_outputs(amount: Amount) -> WalletError {
    WalletError::InvalidAmount(format!(
        "Splitting {} needs more than {} outputs",
        amount, MAX_OUTPUTS
    ))
}

pub fn add_amounts(a: Amount, b: Amount) -> WalletResult<Amount> {
    a.checked_add(b)
        .ok_or_else(|| WalletError::InvalidAmount(format!("{} + {} overflows", a, b)))
}

pub fn sub_amounts(a: Amount, b: Amount) -> WalletResult<Amount> {
    a.checked_sub(b)
        .ok_or_else(|| WalletError::InvalidAmount(format!("{} is less than {}", a, b)))
}

/// Split change so the wallet tends towards `target_count` proofs of each
/// denomination, given the denominations it already holds.
pub fn split_towards_count(
    amount: Amount,
    existing: &BTreeMap<Amount, usize>,
    target_count: usize,
) -> Vec<Amount> {
    let mut parts = Vec::new();
    let mut remaining = u64::from(amount);

    for bit in 0..64 {
        let denomination = 1u64 << bit;
        if denomination > remaining {
            break;
        }
        let held = existing
            .get(&Amount::from(denomination))
            .copied()
            .unwrap_or(0);
        let mut missing = target_count.saturating_sub(held);
        while missing > 0 && remaining >= denomination {
            parts.push(Amount::from(denomination));
            remaining -= denomination;
            missing -= 1;
        }
    }

    parts.extend(Amount::from(remaining).split());
    parts.sort();
    parts
}

/// Fee for spending inputs grouped as `(input_fee_ppk, count)` per key-set:
/// the summed parts-per-thousand, rounded up to a whole unit.
pub fn fee_for_inputs(inputs: &[(u64, usize)]) -> WalletResult<Amount> {
    let overflow = || WalletError::InvalidAmount("Input fee overflows".to_string());
    let mut total_ppk: u64 = 0;
    for (fee_ppk, count) in inputs {
        let keyset_ppk = fee_ppk
            .checked_mul(*count as u64)
            .ok_or_else(overflow)?;
        total_ppk = total_ppk.checked_add(keyset_ppk).ok_or_else(overflow)?;
    }
    Ok(Amount::from(total_ppk.div_ceil(1000)))
}
