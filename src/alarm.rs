use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlarmState {
    Disarmed,
    Armed,
    Triggered,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SirenState {
    On,
    Off,
}

impl SirenState {
    pub fn from_bool(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

/// Commands accepted from the hub.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlarmCommand {
    Arm,
    Disarm,
}

/// Something observable changed. Each change is reported exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Change {
    Alarm(AlarmState),
    Siren { siren: usize, state: SirenState },
}

/// Alarm state plus the state of every configured siren.
#[derive(Debug)]
pub struct AlarmMachine {
    state: AlarmState,
    sirens: Vec<SirenState>,
}

impl AlarmMachine {
    pub fn new(siren_count: usize) -> Self {
        Self {
            state: AlarmState::Disarmed,
            sirens: vec![SirenState::Off; siren_count],
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn sirens(&self) -> &[SirenState] {
        &self.sirens
    }

    pub fn command(&mut self, command: AlarmCommand) -> Vec<Change> {
        match (self.state, command) {
            (AlarmState::Disarmed, AlarmCommand::Arm) => self.set_state(AlarmState::Armed),
            (AlarmState::Armed | AlarmState::Triggered, AlarmCommand::Disarm) => {
                self.set_state(AlarmState::Disarmed)
            }
            (AlarmState::Triggered, AlarmCommand::Arm) => {
                info!("Arm ignored while triggered; disarm first.");
                Vec::new()
            }
            // Already there.
            (AlarmState::Armed, AlarmCommand::Arm)
            | (AlarmState::Disarmed, AlarmCommand::Disarm) => Vec::new(),
        }
    }

    /// A zone reported active. Only an armed system reacts.
    pub fn sensor_active(&mut self, bypassed: bool) -> Vec<Change> {
        match self.state {
            AlarmState::Armed if !bypassed => self.set_state(AlarmState::Triggered),
            _ => Vec::new(),
        }
    }

    /// Move to the given state. Setting the current state is a no-op with no
    /// siren side effects.
    pub fn set_state(&mut self, state: AlarmState) -> Vec<Change> {
        if state == self.state {
            return Vec::new();
        }

        let previous = self.state;
        self.state = state;
        info!("Alarm state {:?} -> {:?}", previous, state);

        let mut changes = vec![Change::Alarm(state)];
        let sirens = match (previous, state) {
            (_, AlarmState::Triggered) => Some(SirenState::On),
            (AlarmState::Triggered, _) => Some(SirenState::Off),
            _ => None,
        };
        if let Some(siren_state) = sirens {
            for siren in 0..self.sirens.len() {
                changes.extend(self.set_siren(siren, siren_state));
            }
        }
        changes
    }

    /// Drive a single siren without touching the alarm state.
    pub fn set_siren(&mut self, siren: usize, state: SirenState) -> Vec<Change> {
        let Some(current) = self.sirens.get_mut(siren) else {
            warn!("Siren {} is not configured", siren);
            return Vec::new();
        };
        if *current == state {
            return Vec::new();
        }
        *current = state;
        vec![Change::Siren { siren, state }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sirens(state: SirenState) -> Vec<Change> {
        vec![
            Change::Siren { siren: 0, state },
            Change::Siren { siren: 1, state },
        ]
    }

    #[test]
    fn starts_disarmed_and_silent() {
        let alarm = AlarmMachine::new(2);
        assert_eq!(alarm.state(), AlarmState::Disarmed);
        assert_eq!(alarm.sirens(), &[SirenState::Off, SirenState::Off]);
    }

    #[test]
    fn disarmed_ignores_sensors() {
        let mut alarm = AlarmMachine::new(2);
        assert!(alarm.sensor_active(false).is_empty());
        assert_eq!(alarm.state(), AlarmState::Disarmed);
    }

    #[test]
    fn armed_sensor_triggers_and_sounds_sirens() {
        let mut alarm = AlarmMachine::new(2);
        assert_eq!(
            alarm.command(AlarmCommand::Arm),
            vec![Change::Alarm(AlarmState::Armed)]
        );

        let mut expected = vec![Change::Alarm(AlarmState::Triggered)];
        expected.extend(sirens(SirenState::On));
        assert_eq!(alarm.sensor_active(false), expected);
        assert_eq!(alarm.sirens(), &[SirenState::On, SirenState::On]);

        // Further sensors do nothing.
        assert!(alarm.sensor_active(false).is_empty());
        assert_eq!(alarm.state(), AlarmState::Triggered);
    }

    #[test]
    fn bypassed_zone_does_not_trigger() {
        let mut alarm = AlarmMachine::new(2);
        alarm.command(AlarmCommand::Arm);
        assert!(alarm.sensor_active(true).is_empty());
        assert_eq!(alarm.state(), AlarmState::Armed);
    }

    #[test]
    fn disarm_from_triggered_silences_sirens() {
        let mut alarm = AlarmMachine::new(2);
        alarm.command(AlarmCommand::Arm);
        alarm.sensor_active(false);

        let mut expected = vec![Change::Alarm(AlarmState::Disarmed)];
        expected.extend(sirens(SirenState::Off));
        assert_eq!(alarm.command(AlarmCommand::Disarm), expected);
        assert_eq!(alarm.sirens(), &[SirenState::Off, SirenState::Off]);
    }

    #[test]
    fn disarm_from_armed_leaves_sirens_alone() {
        let mut alarm = AlarmMachine::new(2);
        alarm.command(AlarmCommand::Arm);
        assert_eq!(
            alarm.command(AlarmCommand::Disarm),
            vec![Change::Alarm(AlarmState::Disarmed)]
        );
    }

    #[test_case(AlarmState::Disarmed, AlarmCommand::Disarm ; "disarm while disarmed")]
    #[test_case(AlarmState::Armed, AlarmCommand::Arm ; "arm while armed")]
    #[test_case(AlarmState::Triggered, AlarmCommand::Arm ; "arm while triggered")]
    fn command_is_noop(state: AlarmState, command: AlarmCommand) {
        let mut alarm = AlarmMachine::new(2);
        alarm.set_state(state);
        let sirens_before = alarm.sirens().to_vec();
        assert!(alarm.command(command).is_empty());
        assert_eq!(alarm.state(), state);
        assert_eq!(alarm.sirens(), sirens_before.as_slice());
    }

    #[test]
    fn setting_same_state_has_no_side_effects() {
        let mut alarm = AlarmMachine::new(2);
        alarm.set_state(AlarmState::Triggered);
        alarm.set_siren(1, SirenState::Off);
        assert!(alarm.set_state(AlarmState::Triggered).is_empty());
        assert_eq!(alarm.sirens(), &[SirenState::On, SirenState::Off]);
    }

    #[test]
    fn manual_siren_keeps_alarm_state() {
        let mut alarm = AlarmMachine::new(2);
        assert_eq!(
            alarm.set_siren(0, SirenState::On),
            vec![Change::Siren {
                siren: 0,
                state: SirenState::On
            }]
        );
        assert_eq!(alarm.state(), AlarmState::Disarmed);
        // Repeating is silent.
        assert!(alarm.set_siren(0, SirenState::On).is_empty());
        // Unknown siren is ignored.
        assert!(alarm.set_siren(7, SirenState::On).is_empty());
    }

    #[test]
    fn trigger_only_reports_sirens_that_change() {
        let mut alarm = AlarmMachine::new(2);
        alarm.set_siren(1, SirenState::On);
        alarm.command(AlarmCommand::Arm);
        assert_eq!(
            alarm.sensor_active(false),
            vec![
                Change::Alarm(AlarmState::Triggered),
                Change::Siren {
                    siren: 0,
                    state: SirenState::On
                }
            ]
        );
    }
}
