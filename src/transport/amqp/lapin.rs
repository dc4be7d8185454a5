//! AMQP transport implementation using `lapin`.
//!
//! This module implements the `Transport` trait backed by an AMQP broker
//! connection. It follows an **actor-based concurrency model**: a single
//! background task owns the connection and channel, and all interaction
//! with the AMQP client is serialized through it. This preserves the
//! public `Transport` contract (`Send + Sync`) while respecting the AMQP
//! client's connection semantics.
//!
//! ## Connection behavior
//!
//! Everything is established eagerly in [`create_transport`]: connection,
//! channel, the direct exchange (non-durable), and one exclusive,
//! server-named reply queue private to this connection. The reply queue
//! name is known as soon as the transport exists; there is no hidden
//! first-call setup latency.
//!
//! ## Routing
//!
//! Request envelopes (those carrying a `reply_to`) are published through
//! the configured direct exchange under the service name. Reply envelopes
//! go through the default exchange straight to the reply queue named by
//! their address - exclusive queues are reachable through the default
//! exchange without an explicit binding.
//!
//! ## Message properties
//!
//! Correlation id, reply-to, and application headers ride as native AMQP
//! message properties; the payload carries only the serialized params or
//! reply body. Messages are transient (`delivery_mode` 1) and
//! non-mandatory: a lost message surfaces as a call timeout, not an error.
//!
//! ## Delivery
//!
//! Incoming messages are demultiplexed by queue name and fanned out to
//! all local subscribers registered for that queue, matching the memory
//! transport contract. Service queues are declared non-durable and
//! auto-delete, bound to the exchange under their own name.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        ExchangeDeclareOptions,
        QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
    ExchangeKind,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::response::Headers;
use crate::{
    //
    Address,
    Envelope,
    Error,
    Result,
    RpcConfig,
    Subscription,
    SubscriptionHandle,
    Transport,
    TransportPtr,
};

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<Envelope>>>>>;

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        env: Envelope,
        resp: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        queue: String,
        resp: oneshot::Sender<Result<()>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

/// AMQP transport implementation using lapin.
///
/// Cheap to clone through its `TransportPtr` and safe to use across async
/// boundaries; the actual connection lives in the background actor.
pub struct AmqpTransport {
    // ---
    reply_queue: Address,
    cmd_tx: mpsc::Sender<Cmd>,
    subscribers: SubscriberMap,
    actor_task: Mutex<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Wrap an established connection and channel, spawning the actor.
    fn create(
        config: &RpcConfig,
        connection: Connection,
        channel: Channel,
        reply_queue: Address,
    ) -> TransportPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));

        let actor = Actor {
            node_id: config.node_id.clone(),
            exchange_name: config.exchange_name.clone(),
            reply_queue: reply_queue.clone(),
            connection,
            channel,
            cmd_rx,
            subscribers: Arc::clone(&subscribers),
            consumer_handles: HashMap::new(),
        };

        let handle = tokio::spawn(async move {
            actor.run().await;
        });

        Arc::new(Self {
            reply_queue,
            cmd_tx,
            subscribers,
            actor_task: Mutex::new(Some(handle)),
        })
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    node_id: String,
    exchange_name: String,
    reply_queue: Address,
    connection: Connection,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    subscribers: SubscriberMap,
    consumer_handles: HashMap<String, JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        info!("[{}] AMQP actor started", self.node_id);

        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle_cmd(cmd).await;
        }

        for (_, handle) in self.consumer_handles.drain() {
            handle.abort();
        }

        let _ = self.channel.close(200, "client teardown").await;
        let _ = self.connection.close(200, "client teardown").await;

        info!("[{}] AMQP actor stopped", self.node_id);
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        // ---
        match cmd {
            Cmd::Publish { env, resp } => {
                let result = self.do_publish(env).await;
                let _ = resp.send(result);
            }
            Cmd::Subscribe { queue, resp } => {
                let result = self.do_subscribe(queue).await;
                let _ = resp.send(result);
            }
            Cmd::Close { resp } => {
                let _ = resp.send(Ok(()));
                self.cmd_rx.close();
            }
        }
    }

    async fn do_publish(&mut self, env: Envelope) -> Result<()> {
        // ---
        // Requests travel through the service exchange; replies go through
        // the default exchange straight to the queue named by the address.
        let exchange = if env.reply_to.is_some() {
            self.exchange_name.as_str()
        } else {
            ""
        };

        // delivery_mode 1: transient, per the fire-and-forget contract
        let mut properties = BasicProperties::default()
            .with_delivery_mode(1)
            .with_headers(headers_to_field_table(&env.headers));

        if let Some(id) = &env.correlation_id {
            properties = properties.with_correlation_id(id.as_ref().into());
        }
        if let Some(reply_to) = &env.reply_to {
            properties = properties.with_reply_to(reply_to.0.as_ref().into());
        }

        self.channel
            .basic_publish(
                exchange,
                env.address.0.as_ref(),
                BasicPublishOptions::default(),
                &env.payload,
                properties,
            )
            .await
            .map_err(|e| Error::Transport(format!("amqp: publish failed: {e}")))?;

        debug!("[{}] Published to {}:{}", self.node_id, exchange, env.address);
        Ok(())
    }

    async fn do_subscribe(&mut self, queue: String) -> Result<()> {
        // ---

        // The reply queue already exists (declared exclusively at connect
        // time). Anything else is a service queue that must be declared
        // and bound to the exchange under its own name.
        if queue != self.reply_queue.0.as_ref() {
            let queue_opts = QueueDeclareOptions {
                durable: false,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            };

            self.channel
                .queue_declare(&queue, queue_opts, FieldTable::default())
                .await
                .map_err(|e| Error::Transport(format!("amqp: queue declare failed: {e}")))?;

            self.channel
                .queue_bind(
                    &queue,
                    &self.exchange_name,
                    &queue,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| Error::Transport(format!("amqp: queue bind failed: {e}")))?;

            info!(
                "[{}] Declared queue {queue} bound to exchange {}",
                self.node_id, self.exchange_name
            );
        }

        if self.consumer_handles.contains_key(&queue) {
            debug!("[{}] Already consuming queue: {queue}", self.node_id);
            return Ok(());
        }

        let consumer = self
            .channel
            .basic_consume(
                &queue,
                &format!("{}.{queue}", self.node_id),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Transport(format!("amqp: consume failed: {e}")))?;

        info!("[{}] Started consuming queue: {queue}", self.node_id);

        let queue_clone = queue.clone();
        let node_id = self.node_id.clone();
        let subscribers = Arc::clone(&self.subscribers);

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                            error!("[{node_id}] Failed to ack message: {e}");
                            continue;
                        }

                        let envelope = Envelope {
                            address: Address::from(queue_clone.as_str()),
                            payload: delivery.data.into(),
                            correlation_id: delivery
                                .properties
                                .correlation_id()
                                .as_ref()
                                .map(|id| Arc::from(id.as_str())),
                            reply_to: delivery
                                .properties
                                .reply_to()
                                .as_ref()
                                .map(|queue| Address::from(queue.as_str())),
                            headers: delivery
                                .properties
                                .headers()
                                .as_ref()
                                .map(field_table_to_headers)
                                .unwrap_or_default(),
                        };

                        let subs = subscribers.read().await;
                        if let Some(senders) = subs.get(&queue_clone) {
                            for sender in senders {
                                if let Err(e) = sender.send(envelope.clone()).await {
                                    error!("[{node_id}] Failed to send to subscriber: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("[{node_id}] Consumer error on {queue_clone}: {e}");
                        break;
                    }
                }
            }

            debug!("[{node_id}] Consumer task ended for queue: {queue_clone}");
        });

        self.consumer_handles.insert(queue, handle);

        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    fn reply_queue(&self) -> &Address {
        &self.reply_queue
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        self.cmd_tx
            .send(Cmd::Publish { env, resp: tx })
            .await
            .map_err(|e| Error::Transport(format!("actor command channel closed: {e}")))?;

        rx.await
            .map_err(|e| Error::Transport(format!("actor response channel closed: {e}")))?
    }

    async fn subscribe(&self, sub: Subscription) -> Result<SubscriptionHandle> {
        // ---
        let queue = sub.0.as_ref().to_string();

        let (tx, rx) = mpsc::channel(16);
        {
            let mut map = self.subscribers.write().await;
            map.entry(queue.clone()).or_default().push(tx);
        }

        let (resp_tx, resp_rx) = oneshot::channel();

        self.cmd_tx
            .send(Cmd::Subscribe {
                queue,
                resp: resp_tx,
            })
            .await
            .map_err(|e| Error::Transport(format!("actor command channel closed: {e}")))?;

        resp_rx
            .await
            .map_err(|e| Error::Transport(format!("actor response channel closed: {e}")))??;

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();

        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        // Second close finds nothing to join and returns immediately.
        let handle = match self.actor_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// The connection, channel, direct exchange, and exclusive reply queue
/// are all established before this returns; the transport is ready to
/// publish and subscribe immediately.
///
/// # Errors
///
/// Returns an error if the broker URI is missing, the connection fails,
/// or any of the declarations fail.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let uri = config
        .amqp_uri
        .as_deref()
        .ok_or_else(|| Error::Transport("AMQP transport requires a broker URI".to_string()))?;

    info!("Connecting to AMQP broker: {uri}");

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            error!("{msg}");
            Error::Transport(msg)
        })?;

    let channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        error!("{msg}");
        Error::Transport(msg)
    })?;

    // Non-durable direct exchange: the routing fabric for service requests.
    let exchange_opts = ExchangeDeclareOptions {
        durable: false,
        ..ExchangeDeclareOptions::default()
    };

    channel
        .exchange_declare(
            &config.exchange_name,
            ExchangeKind::Direct,
            exchange_opts,
            FieldTable::default(),
        )
        .await
        .map_err(|e| Error::Transport(format!("amqp: exchange declare failed: {e}")))?;

    // Exclusive server-named reply queue, private to this connection and
    // auto-deleted when it closes.
    let reply_opts = QueueDeclareOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueDeclareOptions::default()
    };

    let reply = channel
        .queue_declare("", reply_opts, FieldTable::default())
        .await
        .map_err(|e| Error::Transport(format!("amqp: reply queue declare failed: {e}")))?;

    let reply_queue = Address::from(reply.name().as_str());

    info!(
        "Connected to AMQP broker, exchange {} declared, reply queue {}",
        config.exchange_name, reply_queue
    );

    Ok(AmqpTransport::create(
        config,
        connection,
        channel,
        reply_queue,
    ))
}

fn headers_to_field_table(headers: &Headers) -> FieldTable {
    // ---
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(key.as_str().into(), json_to_amqp(value));
    }
    table
}

fn json_to_amqp(value: &Value) -> AMQPValue {
    // ---
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(b) => AMQPValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AMQPValue::LongLongInt(i),
            None => AMQPValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => AMQPValue::LongString(s.as_str().into()),
        // Nested structures ride as their JSON text.
        other => AMQPValue::LongString(other.to_string().into()),
    }
}

fn field_table_to_headers(table: &FieldTable) -> Headers {
    // ---
    let mut headers = Headers::new();
    for (key, value) in table.inner() {
        headers.insert(key.as_str().to_string(), amqp_to_json(value));
    }
    headers
}

fn amqp_to_json(value: &AMQPValue) -> Value {
    // ---
    match value {
        AMQPValue::Boolean(b) => Value::from(*b),
        AMQPValue::ShortShortInt(i) => Value::from(*i),
        AMQPValue::ShortShortUInt(i) => Value::from(*i),
        AMQPValue::ShortInt(i) => Value::from(*i),
        AMQPValue::ShortUInt(i) => Value::from(*i),
        AMQPValue::LongInt(i) => Value::from(*i),
        AMQPValue::LongUInt(i) => Value::from(*i),
        AMQPValue::LongLongInt(i) => Value::from(*i),
        AMQPValue::Float(f) => Value::from(*f),
        AMQPValue::Double(d) => Value::from(*d),
        AMQPValue::LongString(s) => Value::from(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::Timestamp(t) => Value::from(*t),
        AMQPValue::Void => Value::Null,
        other => Value::from(format!("{other:?}")),
    }
}
