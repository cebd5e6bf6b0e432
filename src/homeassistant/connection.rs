use super::{Incoming, Outgoing};
use crate::consts;
use rumqttc::{AsyncClient, ConnectReturnCode, EventLoop, LastWill, MqttOptions, QoS};
use rumqttc::{ConnectionError, Event, Packet};
use tokio::sync::mpsc;
use tokio::{sync::Mutex, task};

use tracing::{debug, error, info, warn};

pub struct Initiator {
    client: AsyncClient,
    event_loop: EventLoop,
}

/// HA interfacing via MQTT
pub struct HomeAssistant {
    /// Outgoing event queue: things we sent to HA.
    outgoing: mpsc::Sender<Outgoing>,
    /// Incoming event queue: connection events and commands read from HA.
    incoming: Mutex<mpsc::Receiver<Incoming>>,
}

impl Initiator {
    /// Prepare the client. Nothing is sent until `start`; connection
    /// failures are retried by the receiver loop.
    pub fn new(
        id: &str,
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        will_topic: &str,
    ) -> Self {
        let mut mqttoptions = MqttOptions::new(id, host, port);
        mqttoptions.set_keep_alive(consts::MQTT_KEEP_ALIVE);
        if !username.is_empty() {
            mqttoptions.set_credentials(username, password);
        }
        mqttoptions.set_last_will(LastWill::new(
            will_topic,
            consts::AVAILABILITY_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, event_loop) = AsyncClient::new(mqttoptions, 64);

        Initiator { client, event_loop }
    }

    async fn receiver(mut event_loop: EventLoop, queue: mpsc::Sender<Incoming>) {
        let mut connected = false;
        loop {
            let notification = event_loop.poll().await;
            let failed = notification.is_err();
            let message = lifecycle(notification, &mut connected);
            if failed {
                // Next poll reconnects.
                tokio::time::sleep(consts::MQTT_RECONNECT_BACKOFF).await;
            }
            let Some(message) = message else {
                continue;
            };
            if let Err(err) = queue.send(message).await {
                error!(
                    "Error while sending received message to queue: {:?}. Quitting loop",
                    err
                );
                return;
            }
        }
    }

    async fn sender(client: AsyncClient, mut queue: mpsc::Receiver<Outgoing>) {
        while let Some(command) = queue.recv().await {
            match command {
                Outgoing::Subscribe(topic) => {
                    if let Err(err) = client.subscribe(&topic, QoS::AtMostOnce).await {
                        warn!("Unable to subscribe to a topic {}: {:?}", topic, err);
                    }
                }
                Outgoing::Publish {
                    topic,
                    payload,
                    retain,
                    qos,
                } => {
                    debug!("Publishing to {}: {}", topic, payload);
                    // Lost publications are restored by the resync after reconnect.
                    if let Err(err) = client.publish(&topic, qos, retain, payload).await {
                        warn!("Unable to publish to {}: {:?}", topic, err);
                    }
                }
            }
        }
        // Channel end closed - quit.
    }

    pub fn start(self) -> HomeAssistant {
        let (out_sender, out_receiver) = mpsc::channel::<Outgoing>(64);
        let (in_sender, in_receiver) = mpsc::channel::<Incoming>(16);
        task::spawn(Self::receiver(self.event_loop, in_sender));
        task::spawn(Self::sender(self.client, out_receiver));

        HomeAssistant {
            outgoing: out_sender,
            incoming: Mutex::new(in_receiver),
        }
    }
}

/// Map an event loop notification to what the controller cares about.
/// `connected` tracks the session so a failing reconnect loop reports a
/// single `Disconnected`.
fn lifecycle(
    notification: Result<Event, ConnectionError>,
    connected: &mut bool,
) -> Option<Incoming> {
    match notification {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code != ConnectReturnCode::Success {
                warn!("Broker refused connection: {:?}", ack.code);
                return None;
            }
            info!("Connected to MQTT broker");
            *connected = true;
            Some(Incoming::Connected)
        }
        Ok(Event::Incoming(Packet::Publish(msg))) => {
            debug!("RX message to {} with payload '{:?}'", msg.topic, msg.payload);
            Some(Incoming::Message {
                topic: msg.topic,
                payload: msg.payload.to_vec(),
            })
        }
        Ok(Event::Incoming(Packet::Disconnect)) => {
            warn!("Broker closed the connection");
            disconnected(connected)
        }
        Ok(Event::Outgoing(_))
        | Ok(Event::Incoming(Packet::PingResp))
        | Ok(Event::Incoming(Packet::SubAck(_)))
        | Ok(Event::Incoming(Packet::PubAck(_))) => {
            // Silence common messages
            None
        }
        Ok(other) => {
            debug!("Received other message = {:?}", other);
            None
        }
        Err(err) => {
            warn!("MQTT connection error: {}", err);
            disconnected(connected)
        }
    }
}

fn disconnected(connected: &mut bool) -> Option<Incoming> {
    if !*connected {
        return None;
    }
    *connected = false;
    Some(Incoming::Disconnected)
}

impl HomeAssistant {
    /// Receive incoming event (from MQTT). None means the HA reading loop
    /// finished.
    pub async fn recv(&self) -> Option<Incoming> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await
    }

    /// Queue a message without waiting. When the transport is stuck the
    /// message is dropped; the resync after reconnect restores the state.
    pub fn send(&self, msg: Outgoing) -> anyhow::Result<()> {
        match self.outgoing.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!("MQTT queue full, dropping message to {}", msg.topic());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("MQTT sender finished")
            }
        }
    }

    pub fn send_all(&self, messages: Vec<Outgoing>) -> anyhow::Result<()> {
        for msg in messages {
            self.send(msg)?;
        }
        Ok(())
    }
}
