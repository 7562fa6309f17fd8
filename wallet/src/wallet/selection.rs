//! Input selection over a wallet's unspent proofs.
use crate::protocol::{Amount, Proof};

fn largest_first(proofs: &[Proof]) -> Vec<&Proof> {
    let mut sorted: Vec<&Proof> = proofs.iter().collect();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
    sorted
}

fn within_limit(count: usize, max_proofs: Option<usize>) -> bool {
    max_proofs.map_or(true, |max| count <= max)
}

/// Proofs summing to exactly `amount`, largest denominations first.
/// Greedy is complete here because mint denominations are powers of two.
pub fn select_exact(
    proofs: &[Proof],
    amount: Amount,
    max_proofs: Option<usize>,
) -> Option<Vec<Proof>> {
    if amount == Amount::ZERO {
        return None;
    }

    let mut remaining = u64::from(amount);
    let mut selected = Vec::new();
    for proof in largest_first(proofs) {
        if u64::from(proof.amount) <= remaining {
            remaining -= u64::from(proof.amount);
            selected.push(proof.clone());
            if remaining == 0 {
                break;
            }
        }
    }

    (remaining == 0 && within_limit(selected.len(), max_proofs)).then_some(selected)
}

/// Proofs covering at least `amount`, preferring few large proofs and a
/// small overshoot: at each step take the smallest proof that covers the
/// remainder on its own, otherwise the largest available.
pub fn select_cover(
    proofs: &[Proof],
    amount: Amount,
    max_proofs: Option<usize>,
) -> Option<Vec<Proof>> {
    if amount == Amount::ZERO {
        return Some(Vec::new());
    }

    let mut available = largest_first(proofs);
    let mut remaining = u64::from(amount);
    let mut selected = Vec::new();

    while remaining > 0 {
        let covering = available
            .iter()
            .rposition(|proof| u64::from(proof.amount) >= remaining);
        let index = match covering {
            Some(index) => index,
            None if available.is_empty() => return None,
            None => 0,
        };
        let proof = available.remove(index);
        remaining = remaining.saturating_sub(u64::from(proof.amount));
        selected.push(proof.clone());
    }

    within_limit(selected.len(), max_proofs).then_some(selected)
}

/// A cover whose total stays within `amount + tolerance`.
pub fn select_within(
    proofs: &[Proof],
    amount: Amount,
    tolerance: Amount,
    max_proofs: Option<usize>,
) -> Option<Vec<Proof>> {
    if let Some(exact) = select_exact(proofs, amount, max_proofs) {
        return Some(exact);
    }
    let ceiling = u64::from(amount).saturating_add(u64::from(tolerance));
    select_cover(proofs, amount, max_proofs).filter(|selected| {
        selected.iter().map(|p| u64::from(p.amount)).sum::<u64>() <= ceiling
    })
}
