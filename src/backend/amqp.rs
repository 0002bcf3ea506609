//! RabbitMQ implementation of [`QueueClient`] over `lapin`.
//!
//! Queues are declared durable, messages are published persistent with
//! publisher confirms enabled, and consumption is bounded by `basic_qos`.
//!
//! Each work queue is a quorum queue so deliveries carry `x-delivery-count`,
//! which the consumer's attempt cap depends on. Messages nacked without
//! requeue are dead-lettered through the default exchange to `<queue>.dead`,
//! declared alongside it. A queue that already exists as a classic queue must
//! be deleted first; the broker refuses to redeclare it with new arguments.

use crate::backend::traits::{
    Acknowledger, BackendError, BackendResult, Delivery, DeliveryStream, ErrorKind, QueueClient,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Number of earlier deliveries, set by RabbitMQ quorum queues.
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

const DEAD_LETTER_SUFFIX: &str = ".dead";

pub struct AmqpQueue {
    connection: Connection,
    publisher: Channel,
    consumers: AtomicU64,
}

impl AmqpQueue {
    /// Connect and open a confirm-mode channel for publishing.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker is unreachable or refuses the channel.
    pub async fn connect(url: &str) -> BackendResult<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(map_lapin)?;
        let publisher = connection.create_channel().await.map_err(map_lapin)?;
        publisher
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(map_lapin)?;
        info!("connected to AMQP broker");
        Ok(Self {
            connection,
            publisher,
            consumers: AtomicU64::new(0),
        })
    }

    /// Close the connection, letting unacked deliveries return to their queues.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    pub async fn close(&self) -> BackendResult<()> {
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(map_lapin)
    }
}

/// Name of the queue that receives `queue`'s dead letters.
#[must_use]
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

fn quorum_arguments() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args
}

fn queue_arguments(queue: &str) -> FieldTable {
    let mut args = quorum_arguments();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString("".into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(dead_letter_queue(queue).as_str().into()),
    );
    args
}

async fn declare(channel: &Channel, queue: &str) -> BackendResult<()> {
    let options = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };
    channel
        .queue_declare(&dead_letter_queue(queue), options, quorum_arguments())
        .await
        .map_err(map_lapin)?;
    channel
        .queue_declare(queue, options, queue_arguments(queue))
        .await
        .map_err(map_lapin)?;
    Ok(())
}

#[async_trait]
impl QueueClient for AmqpQueue {
    async fn declare_queue(&self, queue: &str) -> BackendResult<()> {
        declare(&self.publisher, queue).await
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> BackendResult<()> {
        let confirm = self
            .publisher
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(map_lapin)?
            .await
            .map_err(map_lapin)?;
        if confirm.is_nack() {
            return Err(BackendError::new(
                ErrorKind::Unavailable,
                format!("broker nacked publish to {queue}"),
            ));
        }
        debug!(queue, bytes = payload.len(), "published");
        Ok(())
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> BackendResult<DeliveryStream> {
        // Consumers get their own channel so qos and acks don't interfere with publishing.
        let channel = self.connection.create_channel().await.map_err(map_lapin)?;
        declare(&channel, queue).await?;
        channel
            .basic_qos(prefetch.max(1), BasicQosOptions::default())
            .await
            .map_err(map_lapin)?;
        let n = self.consumers.fetch_add(1, Ordering::Relaxed);
        let consumer = channel
            .basic_consume(
                queue,
                &format!("bulkload-{n}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin)?;
        info!(queue, prefetch, "subscribed");

        Ok(deliveries(channel, consumer))
    }
}

/// The stream owns the consumer's channel so it stays open while deliveries
/// flow and closes when the subscriber drops the stream.
fn deliveries(channel: Channel, consumer: Consumer) -> DeliveryStream {
    let stream = stream::unfold((channel, consumer), |(channel, mut consumer)| async move {
        let item = consumer.next().await?;
        Some((to_delivery(item), (channel, consumer)))
    });
    Box::pin(stream)
}

fn to_delivery(item: lapin::Result<lapin::message::Delivery>) -> BackendResult<Delivery> {
    let delivery = item.map_err(map_lapin)?;
    let attempt = delivery_attempt(delivery.properties.headers().as_ref());
    Ok(Delivery::new(
        Bytes::from(delivery.data),
        delivery.redelivered,
        attempt,
        Box::new(AmqpAcker(delivery.acker)),
    ))
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> BackendResult<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(map_lapin)
    }

    async fn nack(&self, requeue: bool) -> BackendResult<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                multiple: false,
            })
            .await
            .map_err(map_lapin)
    }
}

/// Classic queues don't count deliveries, only quorum queues expose the header.
fn delivery_attempt(headers: Option<&FieldTable>) -> Option<u32> {
    let (_, value) = headers?
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)?;
    let previous = match value {
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok()?,
        AMQPValue::LongInt(v) => u32::try_from(*v).ok()?,
        AMQPValue::LongUInt(v) => *v,
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok()?,
        AMQPValue::ShortUInt(v) => u32::from(*v),
        _ => return None,
    };
    Some(previous + 1)
}

fn map_lapin(err: lapin::Error) -> BackendError {
    let kind = match &err {
        lapin::Error::IOError(_) => ErrorKind::Network,
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            ErrorKind::Unavailable
        }
        lapin::Error::ProtocolError(_) => ErrorKind::Rejected,
        _ => ErrorKind::Other,
    };
    BackendError::new(kind, err.to_string())
}
