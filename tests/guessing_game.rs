#![allow(non_snake_case)]
use dsic_client::{
    ClientError,
    ContractClient,
    MirrorField,
    actions::Action,
    test_helpers::{
        DEFAULT_CONTRACT,
        FakeChain,
        TOKENS_PER_WIN,
        account,
        authorize,
        ether,
        fast_policy,
        game_interface,
    },
};
use ethers::types::U256;

async fn game(chain: FakeChain) -> ContractClient<FakeChain> {
    let (_chain, auth) = authorize(chain).await;
    let client = ContractClient::bind(DEFAULT_CONTRACT, game_interface(), &auth)
        .unwrap()
        .with_policy(fast_policy());
    client.refresh_mirror().await.unwrap();
    client
}

#[tokio::test]
async fn play_game__winning_guess_awards_tokens() {
    // given
    let client = game(FakeChain::guessing_game(account(1), ether("0.01")).with_secret(4)).await;

    // when
    Action::PlayGame { guess: 4 }.run(&client, |_| {}).await.unwrap();

    // then
    let mirror = client.mirror();
    assert_eq!(mirror.get(MirrorField::Tokens), Some(U256::from(TOKENS_PER_WIN)));
    assert_eq!(mirror.get(MirrorField::GameCost), Some(ether("0.01")));
}

#[tokio::test]
async fn play_game__losing_guess_still_pays_the_cost() {
    // given
    let chain = FakeChain::guessing_game(account(1), ether("0.01")).with_secret(4);
    let (chain, auth) = authorize(chain).await;
    let client = ContractClient::bind(DEFAULT_CONTRACT, game_interface(), &auth)
        .unwrap()
        .with_policy(fast_policy());
    let funds_before = chain.funds(account(1));

    // when
    Action::PlayGame { guess: 5 }.run(&client, |_| {}).await.unwrap();

    // then
    assert_eq!(client.mirror().get(MirrorField::Tokens), Some(U256::zero()));
    assert_eq!(chain.funds(account(1)), funds_before - ether("0.01"));
}

#[tokio::test]
async fn claim_tokens__without_winnings_reverts() {
    // given
    let client = game(FakeChain::guessing_game(account(1), ether("0.01"))).await;

    // when
    let result = Action::ClaimTokens.run(&client, |_| {}).await;

    // then
    assert!(matches!(result, Err(ClientError::TransactionReverted { .. })));
}

#[tokio::test]
async fn claim_tokens__clears_the_token_balance() {
    // given
    let client = game(FakeChain::guessing_game(account(1), ether("0.01")).with_secret(9)).await;
    Action::PlayGame { guess: 9 }.run(&client, |_| {}).await.unwrap();

    // when
    Action::ClaimTokens.run(&client, |_| {}).await.unwrap();

    // then
    assert_eq!(client.mirror().get(MirrorField::Tokens), Some(U256::zero()));
}

#[tokio::test]
async fn play_game__paying_the_wrong_cost_reverts() {
    // given
    let client = game(FakeChain::guessing_game(account(1), ether("0.01"))).await;

    // when
    let pending = client
        .submit(
            "playGame",
            &[ethers::abi::Token::Uint(U256::from(7))],
            Some(ether("0.02")),
        )
        .await
        .unwrap();
    let result = client.await_inclusion(pending).await;

    // then
    assert!(matches!(result, Err(ClientError::TransactionReverted { .. })));
    assert_eq!(client.mirror().get(MirrorField::Tokens), Some(U256::zero()));
}
