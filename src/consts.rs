use std::time::Duration;

/// Physical input index on the IO board.
pub type InIdx = u8;
/// Physical output index on the IO board.
pub type OutIdx = u8;

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "alarm-gate";
pub const GATE_URL: &str = env!("CARGO_PKG_HOMEPAGE");
pub const GATE_MANUFACTURER: &str = "smartenough";

pub const HA_DISCOVERY_TOPIC: &str = "homeassistant";
/// Time feed published by the hub, `YYYY.MM.DD HH:MM:SS`.
pub const HA_TIME_TOPIC: &str = "homeassistant/CurrentTime";

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

/// Inputs addressable by the IO board level report (u16 bitmask).
pub const INPUT_COUNT: u8 = 16;

pub const DEFAULT_SETTLE_MS: u64 = 20;
pub const DEFAULT_POLL_MS: u64 = 25;

pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);
pub const MQTT_RECONNECT_BACKOFF: Duration = Duration::from_millis(250);
/// Bounded wait for the broker at startup. Afterwards we run degraded.
pub const MQTT_STARTUP_WAIT: Duration = Duration::from_secs(10);

/// Bounded wait for the first level report from the IO board.
pub const IO_STARTUP_WAIT: Duration = Duration::from_secs(1);
