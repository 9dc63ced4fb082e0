/*!
Mock MQTT client for development without a broker.

Records every publish and subscription, and forwards simulated incoming
messages to a channel so tests can feed them to the aggregator.
*/

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use linkwatch_kernel::models::InboundMessage;
use linkwatch_kernel::mqtt::qos_level;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl MockMessage {
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn to_inbound(&self) -> InboundMessage {
        InboundMessage::new(self.topic.clone(), self.payload.clone(), qos_level(self.qos))
    }
}

/// Anything a sensor node can publish readings through.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_reading(&self, topic: &str, payload: String) -> Result<()>;
}

#[async_trait]
impl Publisher for AsyncClient {
    async fn publish_reading(&self, topic: &str, payload: String) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

/// Stand-in for `rumqttc::AsyncClient`.
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel receiving every simulated incoming message.
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        log::debug!("[mock] published to {}: {} bytes", message.topic, message.payload.len());
        self.published_messages.lock().push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        log::debug!("[mock] subscribed to {}", topic);
        self.subscriptions.lock().push(topic);
        Ok(())
    }

    /// Deliver a message as if the broker had sent it.
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };

        if let Some(sender) = self.message_sender.lock().as_ref() {
            sender
                .send(message.clone())
                .map_err(|e| anyhow::anyhow!("send error: {}", e))?;
        }
        log::debug!("[mock] simulated incoming on {}", message.topic);
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
        self.subscriptions.lock().clear();
    }
}

#[async_trait]
impl Publisher for MockMqttClient {
    async fn publish_reading(&self, topic: &str, payload: String) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await
    }
}
