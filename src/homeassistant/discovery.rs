use crate::config::{InputConfig, SirenConfig};
use crate::consts;
use serde::Serialize;

/// Device identifier
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Stable device UID; the hub groups entities by it.
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub sw_version: String,
}

/// Discovery origin - this software identifier.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    name: String,
    sw_version: String,
    support_url: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
}

impl Availability {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            payload_available: consts::AVAILABILITY_ONLINE.to_string(),
            payload_not_available: consts::AVAILABILITY_OFFLINE.to_string(),
        }
    }
}

/// HA MQTT platforms we announce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Platform {
    BinarySensor,
    Siren,
    AlarmControlPanel,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BinarySensor => "binary_sensor",
            Self::Siren => "siren",
            Self::AlarmControlPanel => "alarm_control_panel",
        }
    }
}

/// Discovery record: identity and topics of a single entity. Derived from
/// configuration, identical on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub platform: Platform,
    pub unique_id: String,
    pub name: String,
    pub config_topic: String,
    pub state_topic: String,
    pub command_topic: Option<String>,
    pub device_class: Option<String>,
}

/// Retained discovery document.
// <discovery_prefix>/<component>/[<node_id>/]<object_id>/config
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub unique_id: String,
    pub name: String,
    pub device: DeviceId,
    pub origin: Origin,
    pub availability: Vec<Availability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_mode: Option<String>,
    pub retain: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    pub state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_arm_required: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supported_features: Vec<String>,
}

impl Document {
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("All should be serializable")
    }
}

/// Builds topics, records and documents for one physical device.
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    uid: String,
}

impl Device {
    pub fn new(name: &str, uid: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.to_string(),
        }
    }

    pub fn availability_topic(&self, platform: Platform) -> String {
        format!(
            "{}/{}/{}/availability",
            consts::HA_DISCOVERY_TOPIC,
            platform.as_str(),
            self.name
        )
    }

    fn base(&self, platform: Platform, object: Option<&str>) -> String {
        match object {
            Some(object) => format!(
                "{}/{}/{}/{}",
                consts::HA_DISCOVERY_TOPIC,
                platform.as_str(),
                self.name,
                object
            ),
            None => format!(
                "{}/{}/{}",
                consts::HA_DISCOVERY_TOPIC,
                platform.as_str(),
                self.name
            ),
        }
    }

    pub fn sensor(&self, input: &InputConfig) -> Entity {
        let base = self.base(Platform::BinarySensor, Some(&input.name));
        Entity {
            platform: Platform::BinarySensor,
            unique_id: format!("{}-{}", self.uid, input.index),
            name: input.label.clone(),
            config_topic: format!("{}/config", base),
            state_topic: format!("{}/state", base),
            command_topic: None,
            device_class: Some(input.device_class.clone()),
        }
    }

    pub fn siren(&self, siren: &SirenConfig) -> Entity {
        let base = self.base(Platform::Siren, Some(&siren.name));
        Entity {
            platform: Platform::Siren,
            unique_id: format!("{}-siren-{}", self.uid, siren.output),
            name: siren.label.clone(),
            config_topic: format!("{}/config", base),
            state_topic: format!("{}/state", base),
            command_topic: Some(format!("{}/command", base)),
            device_class: None,
        }
    }

    pub fn alarm_panel(&self) -> Entity {
        let base = self.base(Platform::AlarmControlPanel, None);
        Entity {
            platform: Platform::AlarmControlPanel,
            unique_id: format!("{}-alarm", self.uid),
            name: "Alarm".to_string(),
            config_topic: format!("{}/config", base),
            state_topic: format!("{}/state", base),
            command_topic: Some(format!("{}/command", base)),
            device_class: None,
        }
    }

    fn device_id(&self) -> DeviceId {
        DeviceId {
            identifiers: vec![self.uid.clone()],
            name: self.name.clone(),
            manufacturer: consts::GATE_MANUFACTURER.to_string(),
            sw_version: consts::GATE_VERSION.to_string(),
        }
    }

    pub fn document(&self, entity: &Entity) -> Document {
        let origin = Origin {
            name: consts::GATE_NAME.to_string(),
            sw_version: consts::GATE_VERSION.to_string(),
            support_url: consts::GATE_URL.to_string(),
        };

        let sensors = Availability::new(&self.availability_topic(Platform::BinarySensor));
        // The last will can only cover one topic, so sirens also follow the
        // sensor availability.
        let (availability, availability_mode) = match entity.platform {
            Platform::Siren => (
                vec![
                    Availability::new(&self.availability_topic(Platform::Siren)),
                    sensors,
                ],
                Some("all".to_string()),
            ),
            Platform::BinarySensor | Platform::AlarmControlPanel => (vec![sensors], None),
        };

        let panel = entity.platform == Platform::AlarmControlPanel;
        Document {
            unique_id: entity.unique_id.clone(),
            name: entity.name.clone(),
            device: self.device_id(),
            origin,
            availability,
            availability_mode,
            retain: true,
            device_class: entity.device_class.clone(),
            state_topic: entity.state_topic.clone(),
            command_topic: entity.command_topic.clone(),
            optimistic: entity.command_topic.as_ref().map(|_| false),
            code_arm_required: panel.then_some(false),
            supported_features: if panel {
                vec!["arm_away".to_string(), "arm_home".to_string()]
            } else {
                Vec::new()
            },
        }
    }
}
