//! Agents bidding against each other through a real Bank and House

use std::sync::Arc;
use std::time::Duration;

use gavel_agent::{AgentClient, AgentConfig, AgentError, AgentEvent, ItemKey};
use gavel_bank::{BankConfig, BankServer, BankState};
use gavel_house::{AuctionHouse, BankLink, CatalogItem, HouseConfig, InMemoryCatalog};
use gavel_types::{Amount, BidOutcome, GavelError, HouseRegistration, ItemId, TransferOutcome};

struct Market {
    bank: BankState,
    agent_addr: String,
    house: Arc<AuctionHouse>,
}

async fn market() -> Market {
    let server = BankServer::bind(&BankConfig {
        host: "127.0.0.1".to_string(),
        house_port: 0,
        agent_port: 0,
    })
    .await
    .unwrap();
    let bank_house_addr = server.house_addr().unwrap().to_string();
    let agent_addr = server.agent_addr().unwrap().to_string();
    let bank = server.state();
    tokio::spawn(server.run());

    // Bind first so the directory can carry the real port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = HouseConfig {
        bank_addr: bank_house_addr,
        listen_host: "127.0.0.1".to_string(),
        listen_port: port,
        tick_ms: 20,
        ..HouseConfig::default()
    };
    let link = BankLink::connect(
        &config.bank_addr,
        &HouseRegistration {
            ip: "127.0.0.1".to_string(),
            port,
        },
        config.connect_timeout(),
    )
    .await
    .unwrap();
    let catalog = InMemoryCatalog::new(
        (1..=6)
            .map(|i| CatalogItem {
                item_id: ItemId::new(i),
                title: format!("Lot {}", i),
                category: "ceramics".to_string(),
                reference_price: Amount::new(50),
            })
            .collect(),
    );
    let house = AuctionHouse::start(link.house_id(), config, Arc::new(catalog), Arc::new(link)).await;
    tokio::spawn(house.clone().serve(listener));

    Market {
        bank,
        agent_addr,
        house,
    }
}

async fn agent(market: &Market, name: &str, balance: u64) -> AgentClient {
    let client = AgentClient::connect(AgentConfig {
        bank_addr: market.agent_addr.clone(),
        name: name.to_string(),
        initial_balance: Amount::new(balance),
        connect_timeout_secs: 5,
    })
    .await
    .unwrap();
    assert_eq!(client.refresh_houses().await.unwrap(), vec![market.house.house_id()]);
    client
}

async fn next_event(client: &AgentClient) -> AgentEvent {
    tokio::time::timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("no event within 5s")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_full_auction_round() {
    let m = market().await;
    let alice = agent(&m, "alice", 1000).await;
    let bob = agent(&m, "bob", 1000).await;
    let house_id = m.house.house_id();

    let offered = alice.refresh_auctions().await;
    assert_eq!(offered.len(), 3);
    assert_eq!(offered, m.house.list().await);
    let item = offered[0].item_id;

    assert_eq!(alice.place_bid(house_id, item, Amount::new(40)).await.unwrap(), BidOutcome::Superseded);
    assert_eq!(alice.place_bid(house_id, item, Amount::new(50)).await.unwrap(), BidOutcome::Accepted);
    assert!(matches!(
        alice.ensure_can_shutdown().await,
        Err(AgentError::Gavel(GavelError::ShutdownRefused { .. }))
    ));

    assert_eq!(bob.place_bid(house_id, item, Amount::new(60)).await.unwrap(), BidOutcome::Accepted);
    match next_event(&alice).await {
        AgentEvent::Outbid(key) => assert_eq!(key.item_id, item),
        other => panic!("expected outbid, got {:?}", other),
    }
    alice.ensure_can_shutdown().await.unwrap();

    let won = match next_event(&bob).await {
        AgentEvent::Won(won) => won,
        other => panic!("expected won, got {:?}", other),
    };
    assert_eq!(won.key.item_id, item);
    assert_eq!(won.amount, Amount::new(60));
    assert_eq!(bob.won_items().len(), 1);
    assert!(bob.open_items().iter().all(|s| s.item_id != item));

    assert!(matches!(
        bob.ensure_can_shutdown().await,
        Err(AgentError::Gavel(GavelError::ShutdownRefused { .. }))
    ));
    assert_eq!(bob.pay_for(house_id, item).await.unwrap(), TransferOutcome::Success);
    assert!(matches!(
        bob.pay_for(house_id, item).await,
        Err(AgentError::AlreadyPaid { .. })
    ));

    let balance = bob.balance().await.unwrap();
    assert_eq!(balance.balance, Amount::new(940));
    assert_eq!(balance.blocked_funds, Amount::zero());
    assert_eq!(m.bank.ledger.account(house_id).unwrap().balance, Amount::new(60));

    let alice_balance = alice.balance().await.unwrap();
    assert_eq!(alice_balance.balance, Amount::new(1000));

    bob.shutdown().await.unwrap();
    alice.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unfunded_bid_and_unknown_house() {
    let m = market().await;
    let carol = agent(&m, "carol", 20).await;
    let house_id = m.house.house_id();
    let item = carol.refresh_auctions().await[0].item_id;

    assert_eq!(
        carol.place_bid(house_id, item, Amount::new(50)).await.unwrap(),
        BidOutcome::InsufficientFunds
    );
    assert!(matches!(
        carol.place_bid(gavel_types::ConnectionId::new(999), item, Amount::new(50)).await,
        Err(AgentError::Gavel(GavelError::UnknownHouse { .. }))
    ));
    assert!(matches!(
        carol.pay_for(house_id, item).await,
        Err(AgentError::NotWon { .. })
    ));
    carol.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_house_shutdown_is_seen_by_agent() {
    let m = market().await;
    let dave = agent(&m, "dave", 100).await;
    dave.refresh_auctions().await;

    m.house.attempt_shutdown().await.unwrap();
    assert_eq!(next_event(&dave).await, AgentEvent::HouseClosed(m.house.house_id()));
    assert!(dave.house_ids().is_empty());
}

#[tokio::test]
async fn test_concurrent_payments_settle_an_item_once() {
    let m = market().await;
    let bob = agent(&m, "bob", 1000).await;
    let house_id = m.house.house_id();
    let offered = bob.refresh_auctions().await;
    let (first, second) = (offered[0].item_id, offered[1].item_id);

    assert_eq!(bob.place_bid(house_id, first, Amount::new(60)).await.unwrap(), BidOutcome::Accepted);
    assert_eq!(bob.place_bid(house_id, second, Amount::new(100)).await.unwrap(), BidOutcome::Accepted);
    for _ in 0..2 {
        assert!(matches!(next_event(&bob).await, AgentEvent::Won(_)));
    }
    assert_eq!(bob.balance().await.unwrap().blocked_funds, Amount::new(160));

    let (a, b) = tokio::join!(bob.pay_for(house_id, first), bob.pay_for(house_id, first));
    let successes = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Ok(TransferOutcome::Success)))
        .count();
    assert_eq!(successes, 1, "{:?} {:?}", a, b);
    assert!([&a, &b].iter().any(|r| matches!(
        r,
        Err(AgentError::PaymentInProgress { .. }) | Err(AgentError::AlreadyPaid { .. })
    )));

    let balance = bob.balance().await.unwrap();
    assert_eq!(balance.blocked_funds, Amount::new(100));
    assert_eq!(m.bank.ledger.account(house_id).unwrap().balance, Amount::new(60));

    assert_eq!(bob.pay_for(house_id, second).await.unwrap(), TransferOutcome::Success);
    assert_eq!(bob.balance().await.unwrap().blocked_funds, Amount::zero());
    assert_eq!(m.bank.ledger.account(house_id).unwrap().balance, Amount::new(160));
    bob.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_check_keeps_pending_events() {
    let m = market().await;
    let alice = agent(&m, "alice", 1000).await;
    let bob = agent(&m, "bob", 1000).await;
    let house_id = m.house.house_id();
    let item = alice.refresh_auctions().await[0].item_id;

    assert_eq!(alice.place_bid(house_id, item, Amount::new(50)).await.unwrap(), BidOutcome::Accepted);
    assert_eq!(bob.place_bid(house_id, item, Amount::new(70)).await.unwrap(), BidOutcome::Accepted);

    // refused until the outbid push has been applied
    tokio::time::timeout(Duration::from_secs(5), async {
        while alice.ensure_can_shutdown().await.is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("outbid never applied");

    assert_eq!(
        alice.try_next_event(),
        Some(AgentEvent::Outbid(ItemKey::new(house_id, item)))
    );
    assert_eq!(alice.try_next_event(), None);
}
