use super::discovery::{Device, Entity, Platform};
use super::Outgoing;
use crate::alarm::{AlarmCommand, AlarmMachine, AlarmState, Change, SirenState};
use crate::config::Config;
use crate::consts;
use crate::debounce::Channel;
use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info};

const TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S";

/// Decoded message from HA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Time feed tick.
    Time(NaiveDateTime),
    /// Set a siren on or off.
    Siren { siren: usize, state: SirenState },
    /// Arm or disarm.
    Alarm(AlarmCommand),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("malformed time '{0}'")]
    MalformedTime(String),
    #[error("unsupported payload '{payload}' on {topic}")]
    UnknownPayload { topic: String, payload: String },
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

fn alarm_payload(state: AlarmState) -> &'static str {
    match state {
        AlarmState::Disarmed => "disarmed",
        AlarmState::Armed => "armed_away",
        AlarmState::Triggered => "triggered",
    }
}

/// Keeps HA in sync with the controller: discovery, availability, state
/// mirroring and decoding of commands. Produces messages, never sends them.
#[derive(Debug)]
pub struct Bridge {
    device: Device,
    /// One per configured input, in configuration order.
    sensors: Vec<(Entity, bool)>,
    sirens: Vec<Entity>,
    panel: Entity,
    connected: bool,
}

impl Bridge {
    pub fn new(config: &Config) -> Self {
        let device = Device::new(&config.name, &config.uid);
        let sensors = config
            .inputs
            .iter()
            .map(|input| (device.sensor(input), input.enabled))
            .collect();
        let sirens = config.sirens.iter().map(|s| device.siren(s)).collect();
        let panel = device.alarm_panel();
        Self {
            device,
            sensors,
            sirens,
            panel,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Topic the broker should publish "offline" to when we vanish.
    pub fn last_will_topic(&self) -> String {
        self.device.availability_topic(Platform::BinarySensor)
    }

    fn availability(&self) -> [Outgoing; 2] {
        [
            Outgoing::retained(
                self.device.availability_topic(Platform::BinarySensor),
                consts::AVAILABILITY_ONLINE,
            ),
            Outgoing::retained(
                self.device.availability_topic(Platform::Siren),
                consts::AVAILABILITY_ONLINE,
            ),
        ]
    }

    fn discovery(&self, entity: &Entity) -> Outgoing {
        Outgoing::retained(
            entity.config_topic.clone(),
            self.device.document(entity).serialize(),
        )
    }

    /// Full resync after every (re)connection. Safe to repeat: documents are
    /// keyed by the same unique IDs each time.
    pub fn on_connected(&mut self, channels: &[Channel], alarm: &AlarmMachine) -> Vec<Outgoing> {
        self.connected = true;
        let mut out = Vec::new();

        out.push(Outgoing::Subscribe(consts::HA_TIME_TOPIC.to_string()));
        for siren in &self.sirens {
            if let Some(topic) = &siren.command_topic {
                out.push(Outgoing::Subscribe(topic.clone()));
            }
        }
        if let Some(topic) = &self.panel.command_topic {
            out.push(Outgoing::Subscribe(topic.clone()));
        }

        for (entity, enabled) in &self.sensors {
            if *enabled {
                out.push(self.discovery(entity));
            } else {
                // Empty retained config removes a stale entity from HA.
                out.push(Outgoing::retained(entity.config_topic.clone(), ""));
            }
        }
        for siren in &self.sirens {
            out.push(self.discovery(siren));
        }
        out.push(self.discovery(&self.panel));

        out.extend(self.availability());

        for ((entity, enabled), channel) in self.sensors.iter().zip(channels) {
            if *enabled {
                out.push(Outgoing::retained(
                    entity.state_topic.clone(),
                    on_off(channel.is_active()),
                ));
            }
        }
        for (entity, state) in self.sirens.iter().zip(alarm.sirens()) {
            out.push(Outgoing::retained(
                entity.state_topic.clone(),
                on_off(state.is_on()),
            ));
        }
        out.push(Outgoing::retained(
            self.panel.state_topic.clone(),
            alarm_payload(alarm.state()),
        ));

        info!("Connected; resync of {} messages", out.len());
        out
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Inbound, DecodeError> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        let unknown_payload = || DecodeError::UnknownPayload {
            topic: topic.to_string(),
            payload: text.to_string(),
        };

        if topic == consts::HA_TIME_TOPIC {
            return NaiveDateTime::parse_from_str(text, TIME_FORMAT)
                .map(Inbound::Time)
                .map_err(|_| DecodeError::MalformedTime(text.to_string()));
        }

        if let Some(siren) = self
            .sirens
            .iter()
            .position(|s| s.command_topic.as_deref() == Some(topic))
        {
            let state = if text.eq_ignore_ascii_case("ON") {
                SirenState::On
            } else if text.eq_ignore_ascii_case("OFF") {
                SirenState::Off
            } else {
                return Err(unknown_payload());
            };
            return Ok(Inbound::Siren { siren, state });
        }

        if self.panel.command_topic.as_deref() == Some(topic) {
            return match text {
                "ARM_AWAY" | "ARM_HOME" => Ok(Inbound::Alarm(AlarmCommand::Arm)),
                "DISARM" => Ok(Inbound::Alarm(AlarmCommand::Disarm)),
                _ => Err(unknown_payload()),
            };
        }

        Err(DecodeError::UnknownTopic(topic.to_string()))
    }

    /// Time feed doubles as a heartbeat: refresh availability every 10s.
    pub fn heartbeat(&self, time: &NaiveDateTime) -> Vec<Outgoing> {
        if !self.connected || time.second() % 10 != 0 {
            return Vec::new();
        }
        debug!("Heartbeat at {}", time);
        self.availability().into()
    }

    /// Debounced change of the channel at the given position.
    pub fn channel_changed(&self, position: usize, active: bool) -> Vec<Outgoing> {
        let Some((entity, enabled)) = self.sensors.get(position) else {
            return Vec::new();
        };
        if !*enabled {
            info!("Not sending {} as the input is disabled.", entity.name);
            return Vec::new();
        }
        if !self.connected {
            return Vec::new();
        }
        vec![Outgoing::retained(entity.state_topic.clone(), on_off(active))]
    }

    /// Mirror an alarm or siren change.
    pub fn report(&self, change: &Change) -> Vec<Outgoing> {
        if !self.connected {
            return Vec::new();
        }
        match change {
            Change::Alarm(state) => vec![Outgoing::retained(
                self.panel.state_topic.clone(),
                alarm_payload(*state),
            )],
            Change::Siren { siren, state } => match self.sirens.get(*siren) {
                Some(entity) => vec![Outgoing::retained(
                    entity.state_topic.clone(),
                    on_off(state.is_on()),
                )],
                None => Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::Debouncer;
    use crate::io::MemoryIo;
    use chrono::NaiveDate;
    use rumqttc::QoS;
    use std::collections::HashSet;
    use std::time::Duration;
    use test_case::test_case;

    const CONFIG: &str = r#"
name: Home
uid: uid42
inputs:
  - index: 0
    name: HallwayMotion
    label: Hallway Motion
    sense: normally_closed
  - index: 1
    name: Garage
    label: Garage
    sense: normally_open
    enabled: false
sirens:
  - name: ExternalSiren
    label: External Siren
    output: 0
  - name: InternalSiren
    label: Internal Siren
    output: 1
"#;

    fn setup() -> (Bridge, Debouncer, AlarmMachine) {
        let config = Config::from_yaml(CONFIG).unwrap();
        let io = MemoryIo::new(true);
        let engine = Debouncer::new(Duration::from_millis(20), &config.inputs, &io);
        (
            Bridge::new(&config),
            engine,
            AlarmMachine::new(config.sirens.len()),
        )
    }

    fn published<'a>(out: &'a [Outgoing], topic: &str) -> Vec<&'a str> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Publish { topic: t, payload, .. } if t == topic => {
                    Some(payload.as_str())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_resyncs_everything() {
        let (mut bridge, engine, alarm) = setup();
        let out = bridge.on_connected(engine.channels(), &alarm);
        assert!(bridge.is_connected());

        let subscriptions: Vec<&str> = out
            .iter()
            .filter(|o| matches!(o, Outgoing::Subscribe(_)))
            .map(|o| o.topic())
            .collect();
        assert_eq!(
            subscriptions,
            vec![
                "homeassistant/CurrentTime",
                "homeassistant/siren/Home/ExternalSiren/command",
                "homeassistant/siren/Home/InternalSiren/command",
                "homeassistant/alarm_control_panel/Home/command",
            ]
        );

        let hallway = published(&out, "homeassistant/binary_sensor/Home/HallwayMotion/config");
        assert_eq!(hallway.len(), 1);
        assert!(hallway[0].contains("\"unique_id\":\"uid42-0\""));

        assert_eq!(
            published(&out, "homeassistant/binary_sensor/Home/availability"),
            vec!["online"]
        );
        assert_eq!(
            published(&out, "homeassistant/siren/Home/availability"),
            vec!["online"]
        );
        // Normally closed input idling high is inactive.
        assert_eq!(
            published(&out, "homeassistant/binary_sensor/Home/HallwayMotion/state"),
            vec!["OFF"]
        );
        assert_eq!(
            published(&out, "homeassistant/siren/Home/ExternalSiren/state"),
            vec!["OFF"]
        );
        assert_eq!(
            published(&out, "homeassistant/alarm_control_panel/Home/state"),
            vec!["disarmed"]
        );

        // Every publication is retained and at-least-once.
        for o in &out {
            if let Outgoing::Publish { retain, qos, .. } = o {
                assert!(*retain);
                assert_eq!(*qos, QoS::AtLeastOnce);
            }
        }
    }

    #[test]
    fn disabled_input_is_removed_and_silent() {
        let (mut bridge, engine, alarm) = setup();
        let out = bridge.on_connected(engine.channels(), &alarm);
        assert_eq!(
            published(&out, "homeassistant/binary_sensor/Home/Garage/config"),
            vec![""]
        );
        assert!(published(&out, "homeassistant/binary_sensor/Home/Garage/state").is_empty());
        assert!(bridge.channel_changed(1, true).is_empty());
    }

    #[test]
    fn reconnect_is_idempotent() {
        let (mut bridge, engine, alarm) = setup();
        let first = bridge.on_connected(engine.channels(), &alarm);
        bridge.on_disconnected();
        assert!(!bridge.is_connected());
        let second = bridge.on_connected(engine.channels(), &alarm);
        assert_eq!(first, second);

        // No config topic announced twice in one resync.
        let configs: Vec<&str> = first
            .iter()
            .map(|o| o.topic())
            .filter(|t| t.ends_with("/config"))
            .collect();
        let unique: HashSet<&str> = configs.iter().copied().collect();
        assert_eq!(configs.len(), unique.len());
    }

    #[test]
    fn degraded_publishes_nothing() {
        let (bridge, _, _) = setup();
        assert!(bridge.channel_changed(0, true).is_empty());
        assert!(bridge.report(&Change::Alarm(AlarmState::Armed)).is_empty());
        let time = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 10)
            .unwrap();
        assert!(bridge.heartbeat(&time).is_empty());
    }

    #[test]
    fn channel_change_publishes_state() {
        let (mut bridge, engine, alarm) = setup();
        bridge.on_connected(engine.channels(), &alarm);
        assert_eq!(
            bridge.channel_changed(0, true),
            vec![Outgoing::retained(
                "homeassistant/binary_sensor/Home/HallwayMotion/state",
                "ON"
            )]
        );
        assert!(bridge.channel_changed(9, true).is_empty());
    }

    #[test]
    fn reports_alarm_and_siren_changes() {
        let (mut bridge, engine, alarm) = setup();
        bridge.on_connected(engine.channels(), &alarm);
        assert_eq!(
            bridge.report(&Change::Alarm(AlarmState::Triggered)),
            vec![Outgoing::retained(
                "homeassistant/alarm_control_panel/Home/state",
                "triggered"
            )]
        );
        assert_eq!(
            bridge.report(&Change::Siren {
                siren: 1,
                state: SirenState::On
            }),
            vec![Outgoing::retained(
                "homeassistant/siren/Home/InternalSiren/state",
                "ON"
            )]
        );
    }

    #[test_case("2024.01.01 10:00:10" => 2 ; "multiple of ten")]
    #[test_case("2024.01.01 10:00:11" => 0 ; "not a multiple of ten")]
    #[test_case("2024.01.01 10:00:00" => 2 ; "full minute")]
    fn heartbeat_refreshes_availability(payload: &str) -> usize {
        let (mut bridge, engine, alarm) = setup();
        bridge.on_connected(engine.channels(), &alarm);
        let Ok(Inbound::Time(time)) =
            bridge.decode(consts::HA_TIME_TOPIC, payload.as_bytes())
        else {
            panic!("time should decode");
        };
        let out = bridge.heartbeat(&time);
        assert!(out.iter().all(|o| matches!(
            o,
            Outgoing::Publish { payload, .. } if payload == "online"
        )));
        out.len()
    }

    #[test_case("2024-01-01 10:00:10" ; "wrong separators")]
    #[test_case("garbage" ; "garbage")]
    #[test_case("" ; "empty")]
    fn malformed_time_is_rejected(payload: &str) {
        let (bridge, _, _) = setup();
        assert_eq!(
            bridge.decode(consts::HA_TIME_TOPIC, payload.as_bytes()),
            Err(DecodeError::MalformedTime(payload.to_string()))
        );
    }

    #[test_case("ON" => Ok(SirenState::On))]
    #[test_case("off" => Ok(SirenState::Off))]
    #[test_case(" On\n" => Ok(SirenState::On) ; "whitespace")]
    #[test_case("loud" => Err(()))]
    fn decodes_siren_command(payload: &str) -> Result<SirenState, ()> {
        let (bridge, _, _) = setup();
        match bridge.decode(
            "homeassistant/siren/Home/InternalSiren/command",
            payload.as_bytes(),
        ) {
            Ok(Inbound::Siren { siren: 1, state }) => Ok(state),
            _ => Err(()),
        }
    }

    #[test_case("ARM_AWAY" => Some(AlarmCommand::Arm))]
    #[test_case("ARM_HOME" => Some(AlarmCommand::Arm))]
    #[test_case("DISARM" => Some(AlarmCommand::Disarm))]
    #[test_case("ARM_VACATION" => None)]
    fn decodes_panel_command(payload: &str) -> Option<AlarmCommand> {
        let (bridge, _, _) = setup();
        match bridge.decode(
            "homeassistant/alarm_control_panel/Home/command",
            payload.as_bytes(),
        ) {
            Ok(Inbound::Alarm(command)) => Some(command),
            _ => None,
        }
    }

    #[test]
    fn unknown_topic_is_reported() {
        let (bridge, _, _) = setup();
        assert_eq!(
            bridge.decode("homeassistant/siren/Home/Nope/command", b"ON"),
            Err(DecodeError::UnknownTopic(
                "homeassistant/siren/Home/Nope/command".into()
            ))
        );
    }
}
