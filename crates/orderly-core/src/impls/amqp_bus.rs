//! RabbitMQ backend（lapin）
//!
//! 1 接続 = 1 channel。publish は default exchange に routing key = queue で送る。
//! consumer 側は basic_qos で prefetch を絞り、手動 ack する。

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use ulid::Ulid;

use crate::ports::{
    BusError, BusSession, ConnectError, Connector, DeliveryLease, Subscription,
};

pub struct AmqpConnector {
    url: String,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Connection = AmqpSession;

    fn target(&self) -> &str {
        "rabbitmq"
    }

    async fn connect(&self) -> Result<AmqpSession, ConnectError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|err| ConnectError::new(self.target(), err))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|err| ConnectError::new(self.target(), err))?;
        Ok(AmqpSession {
            _connection: connection,
            channel,
        })
    }
}

pub struct AmqpSession {
    // channel より先に drop されないよう保持するだけ
    _connection: Connection,
    channel: Channel,
}

fn channel_error(err: lapin::Error) -> BusError {
    BusError::Channel(err.to_string())
}

#[async_trait]
impl BusSession for AmqpSession {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BusError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BusError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map_err(channel_error)?
            .await
            .map_err(channel_error)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BusError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(channel_error)?;
        let tag = format!("orderly-{}", Ulid::new());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(channel_error)?;
        Ok(Box::new(AmqpSubscription { consumer }))
    }
}

struct AmqpSubscription {
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn DeliveryLease>, BusError>> {
        let delivery = self.consumer.next().await?;
        Some(
            delivery
                .map(|delivery| Box::new(AmqpDelivery { delivery }) as Box<dyn DeliveryLease>)
                .map_err(channel_error),
        )
    }
}

struct AmqpDelivery {
    delivery: Delivery,
}

#[async_trait]
impl DeliveryLease for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.delivery
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(channel_error)
    }
}
