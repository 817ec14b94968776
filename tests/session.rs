#![allow(non_snake_case)]
use dsic_client::{
    ClientError,
    ContractClient,
    SessionManager,
    SessionState,
    test_helpers::{
        AuthorizationBehavior,
        DEFAULT_CONTRACT,
        FakeChain,
        account,
        club_interface,
        ether,
        fast_policy,
    },
};

#[tokio::test]
async fn session__authorized_account_can_bind_and_query() {
    // given
    let mut session = SessionManager::new(Some(FakeChain::savings_club(account(1), ether("2"))));
    session.detect_provider().unwrap();

    // when
    let account = session.request_authorization().await.unwrap();
    let auth = session.authorization().unwrap();
    let client = ContractClient::bind(DEFAULT_CONTRACT, club_interface(), &auth)
        .unwrap()
        .with_policy(fast_policy());
    let balance = client.query_uint("getBalance", &[]).await.unwrap();

    // then
    assert_eq!(session.state(), SessionState::Authorized(account));
    assert_eq!(client.binding().account(), account);
    assert_eq!(balance, ether("2"));
}

#[tokio::test]
async fn session__denied_authorization_blocks_binding() {
    // given
    let chain = FakeChain::savings_club(account(1), ether("2"))
        .with_authorization(AuthorizationBehavior::Deny);
    let mut session = SessionManager::new(Some(chain));
    session.detect_provider().unwrap();

    // when
    let result = session.request_authorization().await;

    // then
    assert_eq!(result.err(), Some(ClientError::AuthorizationDenied));
    assert_eq!(session.state(), SessionState::ProviderDetected);
    assert_eq!(session.authorization().err(), Some(ClientError::NotAuthorized));
}

#[tokio::test]
async fn session__retry_after_denial_succeeds() {
    // given
    let chain = FakeChain::savings_club(account(1), ether("2"))
        .with_authorization(AuthorizationBehavior::DenyOnce);
    let mut session = SessionManager::new(Some(chain));
    let provider = session.detect_provider().unwrap();
    assert!(session.request_authorization().await.is_err());

    // when
    let authorized = session.request_authorization().await.unwrap();

    // then
    assert_eq!(authorized, account(1));
    assert_eq!(provider.authorization_requests(), 2);
}

#[tokio::test]
async fn session__absent_provider_never_authorizes() {
    // given
    let mut session = SessionManager::<FakeChain>::new(None);

    // when
    let detected = session.detect_provider();
    let authorized = session.request_authorization().await;

    // then
    assert_eq!(detected.err(), Some(ClientError::ProviderAbsent));
    assert_eq!(authorized.err(), Some(ClientError::ProviderAbsent));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn session__revoked_provider_fails_queries_and_submissions() {
    // given
    let mut session = SessionManager::new(Some(FakeChain::savings_club(account(1), ether("2"))));
    let provider = session.detect_provider().unwrap();
    session.request_authorization().await.unwrap();
    let client = ContractClient::bind(
        DEFAULT_CONTRACT,
        club_interface(),
        &session.authorization().unwrap(),
    )
    .unwrap();

    // when
    provider.revoke();
    let queried = client.query_uint("getBalance", &[]).await;
    let submitted = client.submit("deposit", &[], Some(ether("1"))).await;

    // then
    assert_eq!(queried.err(), Some(ClientError::NotAuthorized));
    assert_eq!(submitted.err(), Some(ClientError::NotAuthorized));
}
