//! Per-channel settle-time filter for raw sensor levels.
//!
//! ```text
//!            raw != confirmed               now - since > settle
//!  Idle ─────────────────────► Pending ───────────────────────► Idle
//!                                 │    raw != confirmed: confirm, changed
//!                                 │    raw == confirmed: discard
//! ```
//!
//! A flip seen while pending does not restart the timer; only the level at
//! expiry matters. Inputs flickering faster than the settle time are dropped.

use crate::config::InputConfig;
use crate::io::DigitalIo;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pending { since: Instant },
}

/// One physical sensor input with its debounce state.
#[derive(Debug)]
pub struct Channel {
    config: InputConfig,
    previous: bool,
    current: bool,
    state: State,
    changed: bool,
}

impl Channel {
    pub fn new(config: InputConfig, level: bool) -> Self {
        Self {
            config,
            previous: level,
            current: level,
            state: State::Idle,
            changed: false,
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    /// Confirmed raw level.
    pub fn level(&self) -> bool {
        self.current
    }

    /// Level confirmed before the current one.
    pub fn previous(&self) -> bool {
        self.previous
    }

    /// Confirmed level mapped through the channel polarity.
    pub fn is_active(&self) -> bool {
        self.config.sense.is_active(self.current)
    }

    /// Level changed during the last update. Valid until the next one.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending { .. })
    }

    fn update(&mut self, level: bool, now: Instant, settle: Duration) {
        self.changed = false;

        match self.state {
            State::Idle => {
                if level != self.current {
                    debug!("Input {} changed state, start debouncing.", self.config.index);
                    self.state = State::Pending { since: now };
                }
            }
            State::Pending { since } => {
                if now.saturating_duration_since(since) <= settle {
                    return;
                }
                self.state = State::Idle;
                if level != self.current {
                    debug!("Input {} debounced to {}.", self.config.index, level);
                    self.previous = self.current;
                    self.current = level;
                    self.changed = true;
                } else {
                    debug!(
                        "Input {} didn't change after debounce time.",
                        self.config.index
                    );
                }
            }
        }
    }
}

/// Debounce engine for all configured channels.
#[derive(Debug)]
pub struct Debouncer {
    settle: Duration,
    channels: Vec<Channel>,
}

impl Debouncer {
    /// Create channels in configuration order, seeded with current levels.
    pub fn new(settle: Duration, inputs: &[InputConfig], io: &impl DigitalIo) -> Self {
        let channels = inputs
            .iter()
            .map(|cfg| Channel::new(cfg.clone(), io.read(cfg.index)))
            .collect();
        Self { settle, channels }
    }

    /// Sample every channel once.
    pub fn update(&mut self, io: &impl DigitalIo, now: Instant) {
        for channel in self.channels.iter_mut() {
            let level = io.read(channel.config.index);
            channel.update(level, now, self.settle);
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Channels confirmed during the last update, with their positions.
    pub fn changed(&self) -> impl Iterator<Item = (usize, &Channel)> {
        self.channels.iter().enumerate().filter(|(_, ch)| ch.changed)
    }
}
