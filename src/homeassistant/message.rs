use rumqttc::QoS;

/// Things we send to HA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Subscribe to a new topic given as argument. Not a real message.
    Subscribe(String),
    /// Publish a message.
    Publish {
        topic: String,
        payload: String,
        retain: bool,
        qos: QoS,
    },
}

impl Outgoing {
    /// Retained, at-least-once publication. Everything we publish is like that.
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
            qos: QoS::AtLeastOnce,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe(topic) => topic,
            Self::Publish { topic, .. } => topic,
        }
    }
}

/// Things the transport tells us about: connection lifecycle and messages
/// HA sends to us (like: turn on the siren).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Broker accepted the connection; may happen many times.
    Connected,
    /// Connection lost. The broker publishes our last will.
    Disconnected,
    /// Message on one of the subscribed topics.
    Message { topic: String, payload: Vec<u8> },
}
