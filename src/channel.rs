use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::instrument::PriceQuote;
use crate::store::SharedStore;
use crate::{ClientMessage, PortfolioUpdate, ServerMessage};

pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: u64,
    pub portfolio_id: u64,
}

#[derive(Debug)]
struct Connection {
    tx: Sender<ServerMessage>,
    subscription: Option<Subscription>,
}

#[derive(Debug)]
pub struct Broadcaster {
    store: SharedStore,
    connections: RwLock<BTreeMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    buffer: usize,
}

fn push(id: ConnectionId, tx: &Sender<ServerMessage>, message: ServerMessage) {
    match tx.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("Connection {id} is not keeping up, dropping message");
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Connection {id} is closed, dropping message");
        }
    }
}

impl Broadcaster {
    pub fn new(store: SharedStore, buffer: usize) -> Self {
        Self {
            store,
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a connection and queues its `connected` greeting.
    pub async fn connect(&self) -> (ConnectionId, Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        push(
            id,
            &tx,
            ServerMessage::Connected {
                message: "Connected to portfolio updates".to_string(),
            },
        );
        self.connections.write().await.insert(
            id,
            Connection {
                tx,
                subscription: None,
            },
        );
        info!("Connection {id} opened");
        (id, rx)
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            info!("Connection {id} closed");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscription(&self, id: ConnectionId) -> Option<Subscription> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|connection| connection.subscription)
    }

    /// Parses and handles one inbound text frame. Unparseable frames are
    /// logged and otherwise ignored.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(id, message).await,
            Err(err) => {
                let err = Error::Transport(err.to_string());
                warn!("Connection {id} sent an invalid message : {err}");
            }
        }
    }

    pub async fn handle(&self, id: ConnectionId, message: ClientMessage) {
        trace!("Connection {id} : {:?}", message);
        match message {
            ClientMessage::SubscribePortfolio {
                user_id,
                portfolio_id,
            } => {
                let subscription = Subscription {
                    user_id,
                    portfolio_id,
                };
                {
                    let mut connections = self.connections.write().await;
                    match connections.get_mut(&id) {
                        Some(connection) => connection.subscription = Some(subscription),
                        None => return,
                    }
                }
                if let Some(update) = self.portfolio_update(portfolio_id).await {
                    self.send(id, update).await;
                }
            }
            ClientMessage::SubscribePrices => {
                let update = self.price_update().await;
                self.send(id, update).await;
            }
            ClientMessage::Ping => self.send(id, ServerMessage::Pong).await,
            ClientMessage::Unknown => {}
        }
    }

    async fn send(&self, id: ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.read().await.get(&id) {
            push(id, &connection.tx, message);
        }
    }

    async fn price_update(&self) -> ServerMessage {
        let store = self.store.read().await;
        ServerMessage::PriceUpdate {
            data: store
                .list_instruments()
                .iter()
                .map(PriceQuote::from)
                .collect(),
        }
    }

    async fn portfolio_update(&self, portfolio_id: u64) -> Option<ServerMessage> {
        let snapshot = self.store.write().await.revalue_portfolio(portfolio_id)?;
        Some(ServerMessage::PortfolioUpdate {
            data: PortfolioUpdate {
                portfolio: snapshot.portfolio,
                holdings: snapshot.holdings,
                risk_metrics: snapshot.risk_metrics,
                timestamp: Utc::now(),
            },
        })
    }

    /// Open connections in id order, which is the order a tick serves them.
    async fn recipients(&self) -> Vec<(ConnectionId, Sender<ServerMessage>, Option<Subscription>)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, connection)| (*id, connection.tx.clone(), connection.subscription))
            .collect()
    }

    /// Pushes prices to every connection, then a fresh valuation to each
    /// connection subscribed to a portfolio.
    pub async fn tick(&self) {
        let prices = self.price_update().await;
        let recipients = self.recipients().await;

        for (id, tx, _) in &recipients {
            push(*id, tx, prices.clone());
        }

        let subscribed = recipients
            .into_iter()
            .filter_map(|(id, _, subscription)| subscription.map(|s| (id, s)));
        for (id, subscription) in subscribed {
            match self.portfolio_update(subscription.portfolio_id).await {
                Some(update) => self.send(id, update).await,
                None => debug!(
                    "Portfolio {} of connection {id} no longer exists",
                    subscription.portfolio_id
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::NewInstrument;
    use crate::portfolio::{AssetClass, NewHolding, NewPortfolio};
    use crate::store::Store;
    use crate::user::NewUser;
    use rust_decimal_macros::dec;

    async fn setup() -> (SharedStore, Broadcaster) {
        let mut store = Store::new();
        let user = store.insert_user(NewUser::new("demo", "Demo"));
        store
            .insert_instrument(NewInstrument::new("ABC", "Abc", "IT", dec!(100.00)))
            .unwrap();
        let portfolio = store
            .insert_portfolio(NewPortfolio::new(user.id, "Growth"))
            .unwrap();
        store
            .insert_holding(
                portfolio.id,
                NewHolding::new("ABC", AssetClass::Stocks, dec!(10), dec!(95)),
            )
            .unwrap();
        let store = store.shared();
        let broadcaster = Broadcaster::new(store.clone(), 16);
        (store, broadcaster)
    }

    fn drain(rx: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = vec![];
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_connect_greets() {
        let (_, broadcaster) = setup().await;
        let (_, mut rx) = broadcaster.connect().await;
        let messages = drain(&mut rx);
        assert!(matches!(messages.as_slice(), [ServerMessage::Connected { .. }]));
        assert_eq!(broadcaster.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_ping_pong_and_unknown() {
        let (_, broadcaster) = setup().await;
        let (id, mut rx) = broadcaster.connect().await;
        drain(&mut rx);

        broadcaster.handle_text(id, r#"{"type":"ping"}"#).await;
        broadcaster.handle_text(id, r#"{"type":"dance"}"#).await;
        broadcaster.handle_text(id, "{{{").await;

        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_subscribe_portfolio_sends_immediately() {
        let (store, broadcaster) = setup().await;
        let (id, mut rx) = broadcaster.connect().await;
        drain(&mut rx);

        broadcaster
            .handle(
                id,
                ClientMessage::SubscribePortfolio {
                    user_id: 1,
                    portfolio_id: 1,
                },
            )
            .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::PortfolioUpdate { data } => {
                assert_eq!(data.portfolio.portfolio.total_value.to_string(), "1000.00");
                assert_eq!(data.holdings.len(), 1);
                assert!(data.risk_metrics.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            store.read().await.get_portfolio(1).unwrap().total_value,
            dec!(1000.00)
        );
        assert_eq!(
            broadcaster.subscription(id).await,
            Some(Subscription {
                user_id: 1,
                portfolio_id: 1
            })
        );
    }

    #[tokio::test]
    async fn test_subscribe_missing_portfolio_sends_nothing() {
        let (_, broadcaster) = setup().await;
        let (id, mut rx) = broadcaster.connect().await;
        drain(&mut rx);

        broadcaster
            .handle(
                id,
                ClientMessage::SubscribePortfolio {
                    user_id: 1,
                    portfolio_id: 404,
                },
            )
            .await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_prices_sends_quotes() {
        let (_, broadcaster) = setup().await;
        let (id, mut rx) = broadcaster.connect().await;
        drain(&mut rx);

        broadcaster.handle(id, ClientMessage::SubscribePrices).await;

        match drain(&mut rx).as_slice() {
            [ServerMessage::PriceUpdate { data }] => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].symbol, "ABC");
                assert_eq!(data[0].price, dec!(100.00));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tick_targets_subscribers_only() {
        let (store, broadcaster) = setup().await;
        let (_watcher, mut watcher_rx) = broadcaster.connect().await;
        let (subscriber, mut subscriber_rx) = broadcaster.connect().await;
        broadcaster
            .handle(
                subscriber,
                ClientMessage::SubscribePortfolio {
                    user_id: 1,
                    portfolio_id: 1,
                },
            )
            .await;
        drain(&mut watcher_rx);
        drain(&mut subscriber_rx);

        store.write().await.apply_price("ABC", dec!(110.00)).unwrap();
        broadcaster.tick().await;

        let watcher_messages = drain(&mut watcher_rx);
        assert_eq!(watcher_messages.len(), 1);
        assert!(matches!(watcher_messages[0], ServerMessage::PriceUpdate { .. }));

        let subscriber_messages = drain(&mut subscriber_rx);
        assert_eq!(subscriber_messages.len(), 2);
        assert!(matches!(subscriber_messages[0], ServerMessage::PriceUpdate { .. }));
        match &subscriber_messages[1] {
            ServerMessage::PortfolioUpdate { data } => {
                assert_eq!(data.portfolio.portfolio.total_value, dec!(1100.00));
                assert_eq!(data.portfolio.day_change_percent, dec!(10.00));
                assert_eq!(data.holdings[0].current_value, dec!(1100.00));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tick_serves_connections_in_id_order() {
        let (_, broadcaster) = setup().await;
        let (first, mut rx1) = broadcaster.connect().await;
        let (middle, rx2) = broadcaster.connect().await;
        let (last, mut rx3) = broadcaster.connect().await;
        broadcaster.disconnect(middle).await;
        drop(rx2);
        let (rejoined, mut rx4) = broadcaster.connect().await;

        let order: Vec<ConnectionId> = broadcaster
            .recipients()
            .await
            .into_iter()
            .map(|(id, _, _)| id)
            .collect();
        assert_eq!(order, vec![first, last, rejoined]);

        let subscription = ClientMessage::SubscribePortfolio {
            user_id: 1,
            portfolio_id: 1,
        };
        for id in [rejoined, first, last] {
            broadcaster.handle(id, subscription.clone()).await;
        }
        for rx in [&mut rx1, &mut rx3, &mut rx4] {
            drain(rx);
        }

        broadcaster.tick().await;

        let mut stamps = vec![];
        for rx in [&mut rx1, &mut rx3, &mut rx4] {
            match drain(rx).as_slice() {
                [ServerMessage::PriceUpdate { .. }, ServerMessage::PortfolioUpdate { data }] => {
                    stamps.push(data.timestamp)
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (store, _) = setup().await;
        let broadcaster = Broadcaster::new(store, 2);
        let (id, mut rx) = broadcaster.connect().await;

        for _ in 0..5 {
            broadcaster.handle(id, ClientMessage::Ping).await;
        }

        // greeting plus one pong fit in the queue
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_disconnect_removes_connection() {
        let (_, broadcaster) = setup().await;
        let (first, _rx1) = broadcaster.connect().await;
        let (second, mut rx2) = broadcaster.connect().await;
        assert!(second > first);

        broadcaster.disconnect(first).await;
        broadcaster.disconnect(first).await;
        assert_eq!(broadcaster.connection_count().await, 1);

        drain(&mut rx2);
        broadcaster.tick().await;
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_tolerated() {
        let (_, broadcaster) = setup().await;
        let (id, rx) = broadcaster.connect().await;
        drop(rx);
        broadcaster.tick().await;
        broadcaster.handle(id, ClientMessage::Ping).await;
        assert_eq!(broadcaster.connection_count().await, 1);
    }
}
