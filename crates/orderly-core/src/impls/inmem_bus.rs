//! MemoryBroker - 開発用のメッセージブローカー
//!
//! # 学習ポイント
//! - Mutex + Notify による「待つ」subscription
//! - prefetch による in-flight 数の制限（ack するまで次を渡さない）
//! - 接続断で未 ack のメッセージを ready の先頭に戻す（再配送）
//!
//! RabbitMQ の default exchange に近い振る舞い：未宣言の queue への publish は黙って捨てる。

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};

use crate::ports::{
    BusError, BusSession, ConnectError, Connector, DeliveryLease, Subscription,
};

struct QueueState {
    durable: bool,
    ready: VecDeque<Vec<u8>>,
    /// delivery tag -> body
    unacked: HashMap<u64, Vec<u8>>,
    /// 観測された未 ack 数の最大値（backpressure の検証用）
    peak_unacked: usize,
}

impl QueueState {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            peak_unacked: 0,
        }
    }
}

struct BrokerState {
    queues: HashMap<String, QueueState>,
    online: bool,
    generation: u64,
    next_tag: u64,
    connects: u64,
}

impl BrokerState {
    fn is_alive(&self, generation: u64) -> bool {
        self.online && self.generation == generation
    }

    /// Close every live connection and requeue what they had not acked.
    fn close_connections(&mut self) {
        self.generation += 1;
        for queue in self.queues.values_mut() {
            let mut pending: Vec<(u64, Vec<u8>)> = queue.unacked.drain().collect();
            pending.sort_by_key(|(tag, _)| *tag);
            for (_, body) in pending.into_iter().rev() {
                queue.ready.push_front(body);
            }
        }
    }
}

/// In-process broker with named queues.
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState {
                queues: HashMap::new(),
                online: true,
                generation: 0,
                next_tag: 1,
                connects: 0,
            }),
            notify: Notify::new(),
        })
    }

    pub fn connector(self: &Arc<Self>) -> MemoryBrokerConnector {
        MemoryBrokerConnector {
            broker: Arc::clone(self),
        }
    }

    /// Going offline closes every live connection.
    pub async fn set_online(&self, online: bool) {
        {
            let mut state = self.state.lock().await;
            if !online {
                state.close_connections();
            }
            state.online = online;
        }
        self.notify.notify_waiters();
    }

    /// Broker-initiated connection loss; new connections are still accepted.
    pub async fn drop_connections(&self) {
        self.state.lock().await.close_connections();
        self.notify.notify_waiters();
    }

    pub async fn connect_count(&self) -> u64 {
        self.state.lock().await.connects
    }

    /// `None` when the queue was never declared.
    pub async fn is_durable(&self, queue: &str) -> Option<bool> {
        self.state.lock().await.queues.get(queue).map(|q| q.durable)
    }

    /// Messages waiting to be delivered.
    pub async fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet acknowledged.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    pub async fn peak_unacked(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.peak_unacked)
    }

    /// Snapshot of the ready messages, oldest first.
    pub async fn ready_messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct MemoryBrokerConnector {
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl Connector for MemoryBrokerConnector {
    type Connection = MemoryBusSession;

    fn target(&self) -> &str {
        "memory-broker"
    }

    async fn connect(&self) -> Result<MemoryBusSession, ConnectError> {
        let mut state = self.broker.state.lock().await;
        if !state.online {
            return Err(ConnectError::new(self.target(), "connection refused"));
        }
        state.connects += 1;
        Ok(MemoryBusSession {
            broker: Arc::clone(&self.broker),
            generation: state.generation,
        })
    }
}

pub struct MemoryBusSession {
    broker: Arc<MemoryBroker>,
    generation: u64,
}

fn closed() -> BusError {
    BusError::Channel("connection closed by broker".to_string())
}

#[async_trait]
impl BusSession for MemoryBusSession {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BusError> {
        let mut state = self.broker.state.lock().await;
        if !state.is_alive(self.generation) {
            return Err(closed());
        }
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(durable));
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BusError> {
        {
            let mut state = self.broker.state.lock().await;
            if !state.is_alive(self.generation) {
                return Err(closed());
            }
            if let Some(q) = state.queues.get_mut(queue) {
                q.ready.push_back(body.to_vec());
            }
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let state = self.broker.state.lock().await;
        if !state.is_alive(self.generation) {
            return Err(closed());
        }
        if !state.queues.contains_key(queue) {
            return Err(BusError::UnknownQueue(queue.to_string()));
        }
        Ok(Box::new(MemorySubscription {
            broker: Arc::clone(&self.broker),
            queue: queue.to_string(),
            prefetch,
            generation: self.generation,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }))
    }
}

struct MemorySubscription {
    broker: Arc<MemoryBroker>,
    queue: String,
    /// 0 は無制限（AMQP と同じ）
    prefetch: u16,
    generation: u64,
    in_flight: Arc<AtomicUsize>,
}

impl MemorySubscription {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.in_flight.load(Ordering::SeqCst) < usize::from(self.prefetch)
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn DeliveryLease>, BusError>> {
        loop {
            // 先に Notified を作っておく（lock 中の notify を取りこぼさない）
            let notified = self.broker.notify.notified();
            {
                let mut guard = self.broker.state.lock().await;
                if !guard.is_alive(self.generation) {
                    return None;
                }
                let state = &mut *guard;
                if self.has_capacity()
                    && let Some(q) = state.queues.get_mut(&self.queue)
                    && let Some(body) = q.ready.pop_front()
                {
                    let tag = state.next_tag;
                    state.next_tag += 1;
                    q.unacked.insert(tag, body.clone());
                    q.peak_unacked = q.peak_unacked.max(q.unacked.len());
                    self.in_flight.fetch_add(1, Ordering::SeqCst);

                    return Some(Ok(Box::new(MemoryDelivery {
                        broker: Arc::clone(&self.broker),
                        queue: self.queue.clone(),
                        tag,
                        generation: self.generation,
                        body,
                        in_flight: Arc::clone(&self.in_flight),
                    })));
                }
            }
            notified.await;
        }
    }
}

struct MemoryDelivery {
    broker: Arc<MemoryBroker>,
    queue: String,
    tag: u64,
    generation: u64,
    body: Vec<u8>,
    in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl DeliveryLease for MemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        {
            let mut state = self.broker.state.lock().await;
            if !state.is_alive(self.generation) {
                // 接続断で既に ready に戻されている
                return Err(closed());
            }
            if let Some(q) = state.queues.get_mut(&self.queue) {
                q.unacked.remove(&self.tag);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.broker.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn session(broker: &Arc<MemoryBroker>) -> MemoryBusSession {
        let session = broker.connector().connect().await.unwrap();
        session.declare_queue("orders", true).await.unwrap();
        session
    }

    #[tokio::test]
    async fn prefetch_holds_back_until_ack() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        session.publish("orders", b"one").await.unwrap();
        session.publish("orders", b"two").await.unwrap();

        let mut sub = session.subscribe("orders", 1).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.body(), b"one");

        let blocked = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
        assert!(blocked.is_err(), "second delivery must wait for the ack");

        first.ack().await.unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.body(), b"two");
        assert_eq!(broker.peak_unacked("orders").await, 1);
    }

    #[tokio::test]
    async fn publish_wakes_waiting_subscriber() {
        let broker = MemoryBroker::new();
        let session = Arc::new(session(&broker).await);
        let mut sub = session.subscribe("orders", 1).await.unwrap();

        let waiter = tokio::spawn(async move {
            let lease = sub.next().await.unwrap().unwrap();
            lease.body().to_vec()
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.publish("orders", b"late").await.unwrap();

        assert_eq!(waiter.await.unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn connection_loss_requeues_unacked_and_closes_subscription() {
        let broker = MemoryBroker::new();
        let session = session(&broker).await;
        session.publish("orders", b"one").await.unwrap();
        session.publish("orders", b"two").await.unwrap();
        let mut sub = session.subscribe("orders", 1).await.unwrap();
        let lease = sub.next().await.unwrap().unwrap();

        broker.drop_connections().await;

        assert!(sub.next().await.is_none());
        assert!(lease.ack().await.is_err());
        assert_eq!(
            broker.ready_messages("orders").await,
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert!(session.publish("orders", b"three").await.is_err());
    }

    #[tokio::test]
    async fn undeclared_queue_drops_publishes() {
        let broker = MemoryBroker::new();
        let session = broker.connector().connect().await.unwrap();

        session.publish("nowhere", b"lost").await.unwrap();

        assert_eq!(broker.is_durable("nowhere").await, None);
        assert!(matches!(
            session.subscribe("nowhere", 1).await,
            Err(BusError::UnknownQueue(_))
        ));
    }
}
