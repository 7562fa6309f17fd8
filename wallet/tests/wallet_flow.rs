mod common;

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use cashu_wallet_lib::protocol::{decode_token, SecretKey};
use cashu_wallet_lib::{
    Amount, CashuActions, CurrencyUnit, SendKind, SendOptions, Token, WalletError,
};
use common::{open_context, open_context_counting, open_context_with_refresh_timeout, FakeMint};

const MINT: &str = "https://mint.example.com";

fn actions(context: Arc<cashu_wallet_lib::WalletContext>) -> CashuActions {
    CashuActions::new(context).unwrap()
}

#[tokio::test]
async fn send_then_receive_moves_value_between_wallets() {
    let mint = FakeMint::new(MINT);
    let (alice_dir, bob_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let alice = actions(open_context(&alice_dir, &[mint.clone()]));
    let bob = actions(open_context(&bob_dir, &[mint.clone()]));

    assert_eq!(alice.receive(&mint.issue_token(&[64, 32, 4]), None).await, Ok(100));
    alice.set_default_mint(MINT).await.unwrap();
    assert_eq!(alice.default_mint().unwrap(), Some(MINT.to_string()));

    let encoded = alice
        .send(30, Some("coffee".to_string()), None)
        .await
        .unwrap();
    assert!(encoded.starts_with("cashuB"));
    let token = decode_token(&encoded).unwrap();
    assert_eq!(token.value().unwrap(), Amount::from(30));
    assert_eq!(token.memo().as_deref(), Some("coffee"));
    assert_eq!(token.mint_url().unwrap().to_string(), MINT);
    assert_eq!(alice.get_balance(None).await, Ok(70));

    let preview = bob.decode_token_preview(&encoded).unwrap();
    assert_eq!(preview.amount, 30);
    assert_eq!(preview.unit, "sat");

    assert_eq!(bob.receive(&encoded, None).await, Ok(30));
    assert_eq!(bob.get_balance(Some(MINT)).await, Ok(30));
    assert_eq!(alice.get_balance(None).await, Ok(70));
}

#[tokio::test]
async fn second_receive_of_same_token_is_rejected() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    let token = mint.issue_token(&[16, 8]);

    assert_eq!(context.receive(&token, None).await.unwrap(), Amount::from(24));
    let err = context.receive(&token, None).await.unwrap_err();
    assert!(matches!(err, WalletError::AlreadySpent(_)), "{:?}", err);
    assert_eq!(context.get_balance(Some(MINT)).await.unwrap(), Amount::from(24));
}

#[tokio::test]
async fn tokens_in_other_units_are_refused_before_any_state_changes() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let wallet = actions(open_context_counting(&dir, &[mint.clone()], calls.clone()));

    let usd = Token::new(
        mint.url().clone(),
        mint.issue(&[4]),
        None,
        CurrencyUnit::Usd,
    )
    .to_string();

    assert_eq!(
        wallet.receive(&usd, None).await,
        Err("unsupported unit: usd. only 'sat' is supported".to_string())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(wallet.list_mints().await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_mint_is_left_out_of_all_balances() {
    let online = FakeMint::new(MINT);
    let offline = FakeMint::new("https://down.example.com");
    let dir = TempDir::new().unwrap();
    let wallet = actions(open_context(&dir, &[online.clone(), offline.clone()]));

    wallet.receive(&online.issue_token(&[8, 2]), None).await.unwrap();
    wallet.receive(&offline.issue_token(&[4]), None).await.unwrap();
    offline.set_online(false);

    let balances = wallet.get_all_balances().await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances.get(MINT), Some(&10));
    assert_eq!(wallet.list_mints().await.unwrap().len(), 2);
}

#[tokio::test]
async fn all_balances_prune_proofs_spent_elsewhere() {
    let mint = FakeMint::new(MINT);
    let dirs: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
    let alice = open_context(&dirs[0], &[mint.clone()]);
    let alice_copy = open_context(&dirs[1], &[mint.clone()]);
    let bob = open_context(&dirs[2], &[mint.clone()]);

    alice.receive(&mint.issue_token(&[8, 4]), None).await.unwrap();
    alice_copy
        .import_mnemonic(&alice.peek_mnemonic().await.unwrap())
        .unwrap();
    assert_eq!(
        alice_copy.restore(Some(MINT)).await.unwrap(),
        Amount::from(12)
    );

    // The copy spends a proof the original still holds.
    alice_copy.set_default_mint(MINT).await.unwrap();
    let token = alice_copy.send(Amount::from(4), None, None).await.unwrap();
    bob.receive(&token.to_string(), None).await.unwrap();
    assert_eq!(alice.get_balance(Some(MINT)).await.unwrap(), Amount::from(12));

    let before = mint.check_state_count();
    let balances = alice.get_all_balances().await.unwrap();
    assert_eq!(balances.get(mint.url()), Some(&Amount::from(8)));
    assert!(mint.check_state_count() > before);
    assert_eq!(alice.get_balance(Some(MINT)).await.unwrap(), Amount::from(8));
}

#[tokio::test]
async fn dropped_or_cancelled_send_leaves_balance_unchanged() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    context.receive(&mint.issue_token(&[64, 32, 4]), None).await.unwrap();
    let wallet = context.wallet(mint.url()).await.unwrap();
    let swaps = mint.swap_count();

    let prepared = wallet
        .prepare_send(Amount::from(10), SendOptions::default())
        .await
        .unwrap();
    assert!(prepared.needs_swap());
    assert_eq!(prepared.amount(), Amount::from(10));
    drop(prepared);
    assert_eq!(wallet.total_balance().unwrap(), Amount::from(100));

    let prepared = wallet
        .prepare_send(Amount::from(36), SendOptions::default())
        .await
        .unwrap();
    assert!(!prepared.needs_swap());
    assert_eq!(prepared.input_proofs(), 2);
    prepared.cancel();

    assert_eq!(wallet.total_balance().unwrap(), Amount::from(100));
    assert_eq!(mint.swap_count(), swaps);
}

#[tokio::test]
async fn failed_swap_keeps_every_proof() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    context.receive(&mint.issue_token(&[64, 32, 4]), None).await.unwrap();
    context.set_default_mint(MINT).await.unwrap();

    mint.set_online(false);
    let err = context.send(Amount::from(10), None, None).await.unwrap_err();
    assert!(matches!(err, WalletError::MintUnavailable(_)), "{:?}", err);
    assert_eq!(context.get_balance(None).await.unwrap(), Amount::from(100));

    mint.set_online(true);
    let token = context.send(Amount::from(10), None, None).await.unwrap();
    assert_eq!(token.value().unwrap(), Amount::from(10));
    assert_eq!(context.get_balance(None).await.unwrap(), Amount::from(90));
}

#[tokio::test]
async fn offline_sends_only_use_held_proofs() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    context.receive(&mint.issue_token(&[8, 4]), None).await.unwrap();
    let wallet = context.wallet(mint.url()).await.unwrap();

    let offline = |kind| SendOptions {
        send_kind: kind,
        ..SendOptions::default()
    };
    let err = wallet
        .prepare_send(Amount::from(5), offline(SendKind::OfflineExact))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));

    let prepared = wallet
        .prepare_send(
            Amount::from(7),
            offline(SendKind::OfflineTolerance(Amount::from(1))),
        )
        .await
        .unwrap();
    assert!(!prepared.needs_swap());
    let token = prepared.confirm(None).await.unwrap();
    assert_eq!(token.value().unwrap(), Amount::from(8));
    assert_eq!(wallet.total_balance().unwrap(), Amount::from(4));

    // Receivers on older clients get the legacy encoding.
    let legacy = wallet.encode_legacy(&token).unwrap();
    assert!(legacy.starts_with("cashuA"));
    let bob_dir = TempDir::new().unwrap();
    let bob = open_context(&bob_dir, &[mint.clone()]);
    assert_eq!(bob.receive(&legacy, None).await.unwrap(), Amount::from(8));
}

#[tokio::test]
async fn sending_more_than_held_is_insufficient() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    context.receive(&mint.issue_token(&[8]), None).await.unwrap();
    context.set_default_mint(MINT).await.unwrap();

    match context.send(Amount::from(9), None, None).await {
        Err(WalletError::InsufficientFunds { needed, available }) => {
            assert_eq!(needed, Amount::from(9));
            assert_eq!(available, Amount::from(8));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn included_fee_lets_receiver_net_the_requested_amount() {
    // One sat per input.
    let mint = FakeMint::with_fee(MINT, 1000);
    let (alice_dir, bob_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let alice = open_context(&alice_dir, &[mint.clone()]);
    let bob = open_context(&bob_dir, &[mint.clone()]);

    let credited = alice
        .receive(&mint.issue_token(&[64, 32, 4]), None)
        .await
        .unwrap();
    assert_eq!(credited, Amount::from(97));
    alice.set_default_mint(MINT).await.unwrap();

    let token = alice.send(Amount::from(10), None, None).await.unwrap();
    assert_eq!(token.value().unwrap(), Amount::from(12));

    let received = bob.receive(&token.to_string(), None).await.unwrap();
    assert_eq!(received, Amount::from(10));
    // 97 held, 12 sent, 1 sat swap fee on the single input.
    assert_eq!(alice.get_balance(None).await.unwrap(), Amount::from(84));
}

#[tokio::test]
async fn key_sets_with_absurd_fees_are_never_used() {
    // Five sats per input: more than any input could be worth to the wallet.
    let mint = FakeMint::with_fee(MINT, 5000);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);

    let err = context
        .receive(&mint.issue_token(&[64]), None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, WalletError::NotFound(_) | WalletError::DecodeError(_)),
        "{:?}",
        err
    );
    assert_eq!(mint.swap_count(), 0);
    assert_eq!(context.get_balance(Some(MINT)).await.unwrap(), Amount::ZERO);
}

#[tokio::test]
async fn locked_token_needs_the_matching_key() {
    let mint = FakeMint::new(MINT);
    let dirs: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
    let alice = actions(open_context(&dirs[0], &[mint.clone()]));
    let bob = actions(open_context(&dirs[1], &[mint.clone()]));
    let carol = actions(open_context(&dirs[2], &[mint.clone()]));

    alice.receive(&mint.issue_token(&[32]), None).await.unwrap();
    alice.set_default_mint(MINT).await.unwrap();

    let bob_key = SecretKey::generate();
    let xonly = bob_key.public_key().to_hex()[2..].to_string();
    let token = alice.send(20, None, Some(&xonly)).await.unwrap();

    let no_key = carol.receive(&token, None).await.unwrap_err();
    assert!(no_key.contains("Spending condition not satisfied"), "{}", no_key);
    let stranger = SecretKey::generate().to_secret_hex();
    let wrong_key = carol.receive(&token, Some(&stranger)).await.unwrap_err();
    assert!(wrong_key.contains("Spending condition not satisfied"), "{}", wrong_key);
    assert_eq!(carol.get_balance(Some(MINT)).await, Ok(0));

    let bob_hex = bob_key.to_secret_hex();
    assert_eq!(bob.receive(&token, Some(&bob_hex)).await, Ok(20));
}

#[tokio::test]
async fn locked_proofs_from_mint_are_redeemable_by_owner() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    let key = SecretKey::generate();
    let token = mint.issue_locked_token(&[4, 2], key.public_key());

    let err = context.receive(&token, None).await.unwrap_err();
    assert!(matches!(err, WalletError::ConditionUnmet(_)));
    let amount = context
        .receive(&token, Some(&key.to_secret_hex()))
        .await
        .unwrap();
    assert_eq!(amount, Amount::from(6));
}

#[tokio::test]
async fn concurrent_resolves_share_one_wallet() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let context = open_context_counting(&dir, &[mint.clone()], calls.clone());
    let url = mint.url().clone();

    let (a, b, c, d) = tokio::join!(
        context.wallet(&url),
        context.wallet(&url),
        context.wallet(&url),
        context.wallet(&url)
    );
    let (a, b, c, d) = (a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &c));
    assert!(Arc::ptr_eq(&a, &d));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_sends_never_spend_the_same_proofs() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let context = open_context(&dir, &[mint.clone()]);
    context.receive(&mint.issue_token(&[64, 32, 4]), None).await.unwrap();
    context.set_default_mint(MINT).await.unwrap();

    // Either send alone fits the balance, both together do not.
    let (first, second) = tokio::join!(
        context.send(Amount::from(60), None, None),
        context.send(Amount::from(60), None, None)
    );
    let (sent, refused): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(Result::is_ok);
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        refused[0],
        Err(WalletError::InsufficientFunds { .. })
    ));

    let token = sent.into_iter().next().unwrap().unwrap();
    assert_eq!(token.value().unwrap(), Amount::from(60));
    assert_eq!(context.get_balance(None).await.unwrap(), Amount::from(40));

    let bob_dir = TempDir::new().unwrap();
    let bob = open_context(&bob_dir, &[mint.clone()]);
    assert_eq!(
        bob.receive(&token.to_string(), None).await.unwrap(),
        Amount::from(60)
    );
}

#[tokio::test]
async fn silent_mint_does_not_block_wallet_creation() {
    let mint = FakeMint::new(MINT);
    mint.set_info_delay(Some(Duration::from_secs(60)));
    let dir = TempDir::new().unwrap();
    let context = open_context_with_refresh_timeout(&dir, &[mint.clone()], 1);
    assert_eq!(context.config().network.refresh_timeout_secs, 1);

    let wallet = tokio::time::timeout(Duration::from_secs(5), context.wallet(mint.url()))
        .await
        .expect("wallet creation waited on the mint")
        .unwrap();
    assert_eq!(wallet.total_balance().unwrap(), Amount::ZERO);
    assert!(wallet.mint_info().unwrap().is_none());

    // Once the mint answers again the wallet works normally.
    mint.set_info_delay(None);
    assert_eq!(
        context.receive(&mint.issue_token(&[8]), None).await.unwrap(),
        Amount::from(8)
    );
}

#[tokio::test]
async fn restore_recovers_unspent_proofs_from_seed() {
    let mint = FakeMint::new(MINT);
    let (alice_dir, bob_dir, fresh_dir) = (
        TempDir::new().unwrap(),
        TempDir::new().unwrap(),
        TempDir::new().unwrap(),
    );
    let alice = open_context(&alice_dir, &[mint.clone()]);
    let bob = open_context(&bob_dir, &[mint.clone()]);

    alice.receive(&mint.issue_token(&[64, 32, 4]), None).await.unwrap();
    alice.set_default_mint(MINT).await.unwrap();
    let token = alice.send(Amount::from(30), None, None).await.unwrap();
    bob.receive(&token.to_string(), None).await.unwrap();
    let mnemonic = alice.peek_mnemonic().await.unwrap();

    let recovered = open_context(&fresh_dir, &[mint.clone()]);
    recovered.import_mnemonic(&mnemonic).unwrap();
    assert_eq!(recovered.peek_mnemonic().await.unwrap(), mnemonic);
    let amount = recovered.restore(Some(MINT)).await.unwrap();
    assert_eq!(amount, Amount::from(70));
    assert_eq!(recovered.get_balance(Some(MINT)).await.unwrap(), Amount::from(70));

    // Counters moved past recovered outputs, so new outputs are not reused.
    let more = recovered
        .receive(&mint.issue_token(&[16]), None)
        .await
        .unwrap();
    assert_eq!(more, Amount::from(16));
}

#[tokio::test]
async fn seed_and_default_mint_survive_reopen() {
    let mint = FakeMint::new(MINT);
    let dir = TempDir::new().unwrap();
    let first = open_context(&dir, &[mint.clone()]);
    first.set_default_mint("https://MINT.example.com/").await.unwrap();
    let mnemonic = first.peek_mnemonic().await.unwrap();
    assert_eq!(mnemonic.split_whitespace().count(), 12);
    assert!(first.import_mnemonic(&mnemonic).is_err());
    drop(first);

    let reopened = open_context(&dir, &[mint.clone()]);
    assert_eq!(reopened.peek_mnemonic().await.unwrap(), mnemonic);
    assert_eq!(
        reopened.default_mint(),
        Some(cashu_wallet_lib::MintUrl::from_str(MINT).unwrap())
    );
    assert_eq!(reopened.get_balance(None).await.unwrap(), Amount::ZERO);
}

#[tokio::test]
async fn balance_without_default_mint_is_zero() {
    let dir = TempDir::new().unwrap();
    let wallet = actions(open_context(&dir, &[]));
    assert_eq!(wallet.get_balance(None).await, Ok(0));
    assert_eq!(wallet.default_mint().unwrap(), None);
    assert!(wallet.send(5, None, None).await.is_err());
}
