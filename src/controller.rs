use crate::alarm::{AlarmMachine, Change};
use crate::config::Config;
use crate::consts::OutIdx;
use crate::debounce::Debouncer;
use crate::homeassistant::{Bridge, Inbound, Incoming, Outgoing};
use crate::io::DigitalIo;
use tokio::time::Instant;
use tracing::{info, warn};

/// Owns all controller state. Only the control loop touches it; transport
/// events arrive through `handle`.
pub struct Controller<IO> {
    io: IO,
    engine: Debouncer,
    alarm: AlarmMachine,
    bridge: Bridge,
    siren_outputs: Vec<OutIdx>,
}

impl<IO: DigitalIo> Controller<IO> {
    /// Seed the debouncer from current levels and drive all sirens off.
    pub fn new(config: &Config, mut io: IO) -> Self {
        let engine = Debouncer::new(config.timing.settle(), &config.inputs, &io);
        let alarm = AlarmMachine::new(config.sirens.len());
        let siren_outputs: Vec<OutIdx> = config.sirens.iter().map(|s| s.output).collect();
        for (output, state) in siren_outputs.iter().zip(alarm.sirens()) {
            io.write(*output, state.is_on());
        }

        Self {
            io,
            engine,
            alarm,
            bridge: Bridge::new(config),
            siren_outputs,
        }
    }

    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn engine(&self) -> &Debouncer {
        &self.engine
    }

    pub fn alarm(&self) -> &AlarmMachine {
        &self.alarm
    }

    pub fn is_connected(&self) -> bool {
        self.bridge.is_connected()
    }

    pub fn last_will_topic(&self) -> String {
        self.bridge.last_will_topic()
    }

    /// One polling cycle: debounce, drive the alarm, mirror to HA.
    pub fn poll(&mut self, now: Instant) -> Vec<Outgoing> {
        self.engine.update(&self.io, now);

        let mut out = Vec::new();
        let mut changes = Vec::new();
        for (position, channel) in self.engine.changed() {
            let cfg = channel.config();
            let active = channel.is_active();
            info!("Input {} ({}) changed, active: {}", cfg.index, cfg.name, active);

            out.extend(self.bridge.channel_changed(position, active));
            if active && cfg.enabled {
                changes.extend(self.alarm.sensor_active(cfg.bypass));
            }
        }
        out.extend(self.apply(&changes));
        out
    }

    /// Apply a transport event.
    pub fn handle(&mut self, incoming: Incoming) -> Vec<Outgoing> {
        match incoming {
            Incoming::Connected => self.bridge.on_connected(self.engine.channels(), &self.alarm),
            Incoming::Disconnected => {
                warn!("MQTT disconnected; running without publication");
                self.bridge.on_disconnected();
                Vec::new()
            }
            Incoming::Message { topic, payload } => match self.bridge.decode(&topic, &payload) {
                Ok(Inbound::Time(time)) => self.bridge.heartbeat(&time),
                Ok(Inbound::Siren { siren, state }) => {
                    info!("Siren {} set to {:?} by HA", siren, state);
                    let changes = self.alarm.set_siren(siren, state);
                    self.apply(&changes)
                }
                Ok(Inbound::Alarm(command)) => {
                    info!("Alarm command {:?} from HA", command);
                    let changes = self.alarm.command(command);
                    self.apply(&changes)
                }
                Err(err) => {
                    warn!("Discarding message: {}", err);
                    Vec::new()
                }
            },
        }
    }

    /// Drive outputs and report every change exactly once.
    fn apply(&mut self, changes: &[Change]) -> Vec<Outgoing> {
        let mut out = Vec::new();
        for change in changes {
            if let Change::Siren { siren, state } = change {
                if let Some(output) = self.siren_outputs.get(*siren) {
                    self.io.write(*output, state.is_on());
                }
            }
            out.extend(self.bridge.report(change));
        }
        out
    }
}
