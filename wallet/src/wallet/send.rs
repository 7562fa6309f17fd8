//! Spend engine: plan an outgoing token, then confirm or drop it.
//!
//! Planning never talks to the mint about the selected proofs. The plan
//! holds the wallet's writer lock until it is confirmed or dropped, so the
//! proofs it selected cannot be spent by anything else in the meantime.
use tokio::sync::OwnedMutexGuard;

use super::selection::{select_cover, select_exact, select_within};
use super::Wallet;
use crate::amount::{add_amounts, fee_for_inputs, output_amounts, sub_amounts};
use crate::errors::{WalletError, WalletResult};
use crate::protocol::{
    Amount, Id, PreMintSecrets, Proof, ProofsMethods, SpendingConditions, SplitTarget, Token,
};

/// Bound on fee re-estimation; fees settle after one or two rounds.
const MAX_FEE_ROUNDS: usize = 8;

/// How strictly the selected proofs must match the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendKind {
    /// Exact proofs if held, otherwise swap for them.
    #[default]
    OnlineExact,
    /// Accept an overshoot up to the tolerance before swapping.
    OnlineTolerance(Amount),
    /// Only proofs already held, exact match.
    OfflineExact,
    /// Only proofs already held, overshoot up to the tolerance.
    OfflineTolerance(Amount),
}

impl SendKind {
    pub fn is_offline(&self) -> bool {
        matches!(self, SendKind::OfflineExact | SendKind::OfflineTolerance(_))
    }

    fn tolerance(&self) -> Option<Amount> {
        match self {
            SendKind::OnlineTolerance(t) | SendKind::OfflineTolerance(t) => Some(*t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Lock the outgoing proofs, forcing a swap.
    pub conditions: Option<SpendingConditions>,
    pub amount_split_target: SplitTarget,
    pub send_kind: SendKind,
    /// Add the fee the receiver will pay to redeem the token.
    pub include_fee: bool,
    /// Cap on the number of input proofs.
    pub max_proofs: Option<usize>,
}

#[derive(Debug)]
enum SendPlan {
    /// Hand over held proofs as they are.
    Direct { proofs: Vec<Proof> },
    /// Burn `inputs` for fresh outgoing proofs plus change.
    Swap {
        keyset_id: Id,
        inputs: Vec<Proof>,
        send_amounts: Vec<Amount>,
        change: Amount,
    },
}

/// A planned send. Nothing is spent until [`PreparedSend::confirm`];
/// dropping it leaves the ledger as it was.
#[must_use = "a prepared send does nothing until confirmed"]
pub struct PreparedSend<'a> {
    wallet: &'a Wallet,
    _guard: OwnedMutexGuard<()>,
    amount: Amount,
    swap_fee: Amount,
    receiver_fee: Amount,
    conditions: Option<SpendingConditions>,
    plan: SendPlan,
}

impl std::fmt::Debug for PreparedSend<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedSend")
            .field("amount", &self.amount)
            .field("fee", &self.fee())
            .field("plan", &self.plan)
            .finish()
    }
}

impl Wallet {
    /// Select proofs for `amount` and plan how they leave the wallet.
    pub async fn prepare_send(
        &self,
        amount: Amount,
        options: SendOptions,
    ) -> WalletResult<PreparedSend<'_>> {
        if amount == Amount::ZERO {
            return Err(WalletError::InvalidAmount(
                "Send amount must be positive".to_string(),
            ));
        }

        let guard = self.writer.clone().lock_owned().await;
        let proofs = self.ledger.proofs()?;
        let available = proofs.total_amount()?;
        if available < amount {
            return Err(WalletError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        if options.conditions.is_none() {
            if let Some((selected, receiver_fee)) = self.plan_direct(&proofs, amount, &options)? {
                log::debug!(
                    "Send of {} from {} uses {} held proofs",
                    amount,
                    self.mint_url,
                    selected.len()
                );
                return Ok(PreparedSend {
                    wallet: self,
                    _guard: guard,
                    amount,
                    swap_fee: Amount::ZERO,
                    receiver_fee,
                    conditions: None,
                    plan: SendPlan::Direct { proofs: selected },
                });
            }
        }

        if options.send_kind.is_offline() {
            if options.conditions.is_some() {
                return Err(WalletError::ValidationError(
                    "Offline sends cannot lock proofs to a key".to_string(),
                ));
            }
            return Err(WalletError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        let keyset = self.active_keyset().await?;
        let (send_amounts, receiver_fee) = if options.include_fee {
            let mut receiver_fee = Amount::ZERO;
            let mut send_amounts = output_amounts(amount, &options.amount_split_target)?;
            for _ in 0..MAX_FEE_ROUNDS {
                let fee = fee_for_inputs(&[(keyset.input_fee_ppk, send_amounts.len())])?;
                if fee == receiver_fee {
                    break;
                }
                receiver_fee = fee;
                send_amounts = output_amounts(
                    add_amounts(amount, receiver_fee)?,
                    &options.amount_split_target,
                )?;
            }
            (send_amounts, receiver_fee)
        } else {
            (output_amounts(amount, &options.amount_split_target)?, Amount::ZERO)
        };
        let send_total = add_amounts(amount, receiver_fee)?;

        let mut needed = send_total;
        let mut planned = None;
        for _ in 0..MAX_FEE_ROUNDS {
            let inputs = select_cover(&proofs, needed, options.max_proofs)
                .ok_or(WalletError::InsufficientFunds { needed, available })?;
            let swap_fee = self.input_fee(&inputs)?;
            let required = add_amounts(send_total, swap_fee)?;
            if inputs.total_amount()? >= required {
                planned = Some((inputs, swap_fee, required));
                break;
            }
            needed = required;
        }
        let (inputs, swap_fee, required) =
            planned.ok_or(WalletError::InsufficientFunds { needed, available })?;
        let change = sub_amounts(inputs.total_amount()?, required)?;

        log::debug!(
            "Send of {} from {} swaps {} proofs (fee {}, change {})",
            amount,
            self.mint_url,
            inputs.len(),
            swap_fee,
            change
        );
        Ok(PreparedSend {
            wallet: self,
            _guard: guard,
            amount,
            swap_fee,
            receiver_fee,
            conditions: options.conditions,
            plan: SendPlan::Swap {
                keyset_id: keyset.id,
                inputs,
                send_amounts,
                change,
            },
        })
    }

    /// Held proofs matching `amount` under the send kind, with the receiver
    /// fee folded in when requested.
    fn plan_direct(
        &self,
        proofs: &[Proof],
        amount: Amount,
        options: &SendOptions,
    ) -> WalletResult<Option<(Vec<Proof>, Amount)>> {
        let mut target = amount;
        for _ in 0..MAX_FEE_ROUNDS {
            let selected = match options.send_kind.tolerance() {
                Some(tolerance) => select_within(proofs, target, tolerance, options.max_proofs),
                None => select_exact(proofs, target, options.max_proofs),
            };
            let selected = match selected {
                Some(selected) => selected,
                None => return Ok(None),
            };

            let receiver_fee = if options.include_fee {
                self.input_fee(&selected)?
            } else {
                Amount::ZERO
            };
            let required = add_amounts(amount, receiver_fee)?;
            let total = selected.total_amount()?;
            let acceptable = match options.send_kind.tolerance() {
                Some(_) => total >= required,
                None => total == required,
            };
            if acceptable {
                return Ok(Some((selected, receiver_fee)));
            }
            if required == target {
                return Ok(None);
            }
            target = required;
        }
        Ok(None)
    }
}

impl<'a> PreparedSend<'a> {
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Swap fee plus the receiver's redemption fee when included.
    pub fn fee(&self) -> Amount {
        Amount::from(u64::from(self.swap_fee).saturating_add(u64::from(self.receiver_fee)))
    }

    pub fn input_proofs(&self) -> usize {
        match &self.plan {
            SendPlan::Direct { proofs } => proofs.len(),
            SendPlan::Swap { inputs, .. } => inputs.len(),
        }
    }

    pub fn needs_swap(&self) -> bool {
        matches!(self.plan, SendPlan::Swap { .. })
    }

    /// Spend the planned proofs and package the outgoing ones as a token.
    /// The ledger changes in a single commit after the mint has answered.
    pub async fn confirm(self, memo: Option<String>) -> WalletResult<Token> {
        let wallet = self.wallet;
        let outgoing = match self.plan {
            SendPlan::Direct { proofs } => {
                wallet.ledger.debit(&proofs).await?;
                proofs
            }
            SendPlan::Swap {
                keyset_id,
                inputs,
                send_amounts,
                change,
            } => {
                let mut outputs = match &self.conditions {
                    Some(conditions) => PreMintSecrets::with_conditions(
                        keyset_id,
                        Amount::try_sum(send_amounts.iter().copied())?,
                        &SplitTarget::Values(send_amounts),
                        conditions,
                    )?,
                    None => wallet.deterministic_outputs(keyset_id, send_amounts).await?,
                };
                let send_count = outputs.len();
                let change_amounts = wallet.change_amounts(change)?;
                outputs.combine(wallet.deterministic_outputs(keyset_id, change_amounts).await?);

                let mut minted = wallet.swap(inputs.clone(), &outputs).await?;
                let change_proofs = minted.split_off(send_count);
                wallet.ledger.apply(change_proofs, &inputs).await?;
                minted
            }
        };

        let token = Token::new(
            wallet.mint_url.clone(),
            outgoing,
            memo,
            wallet.unit.clone(),
        );
        log::info!("Sent {} from {}", token.value()?, wallet.mint_url);
        Ok(token)
    }

    /// Abandon the send. Equivalent to dropping it.
    pub fn cancel(self) {
        log::debug!("Cancelled send of {} from {}", self.amount, self.wallet.mint_url);
    }
}
