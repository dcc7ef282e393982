use log::trace;

/// Output channels as exposed by the GPIO/PWM driver.
pub trait Hardware {
    fn channel_count(&self) -> usize;

    /// Whether `channel` accepts a duty cycle rather than just on/off.
    fn is_intensity_capable(&self, channel: usize) -> bool;

    /// Turn `channel` on, at `duty` (0.0-1.0) when intensity capable.
    fn set_on(&mut self, channel: usize, duty: Option<f32>);

    fn set_off(&mut self, channel: usize);
}

/// One recorded hardware call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelEvent {
    On { channel: usize, duty: Option<f32> },
    Off { channel: usize },
}

/// In-memory stand-in for the driver: tracks the current level of every
/// channel and, optionally, the full call history.
#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    pwm: Vec<bool>,
    levels: Vec<f32>,
    history: Option<Vec<ChannelEvent>>,
}

impl SimulatedHardware {
    pub fn new(channel_count: usize, pwm_channels: &[usize]) -> Self {
        let mut pwm = vec![false; channel_count];
        for &channel in pwm_channels {
            if let Some(slot) = pwm.get_mut(channel) {
                *slot = true;
            }
        }
        Self {
            pwm,
            levels: vec![0.0; channel_count],
            history: None,
        }
    }

    pub fn with_recording(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    /// Current level per channel: the duty cycle, or 1.0 / 0.0 for on/off.
    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    pub fn history(&self) -> &[ChannelEvent] {
        self.history.as_deref().unwrap_or(&[])
    }

    fn record(&mut self, event: ChannelEvent) {
        if let Some(history) = &mut self.history {
            history.push(event);
        }
    }
}

impl Hardware for SimulatedHardware {
    fn channel_count(&self) -> usize {
        self.levels.len()
    }

    fn is_intensity_capable(&self, channel: usize) -> bool {
        self.pwm.get(channel).copied().unwrap_or(false)
    }

    fn set_on(&mut self, channel: usize, duty: Option<f32>) {
        if let Some(level) = self.levels.get_mut(channel) {
            *level = duty.unwrap_or(1.0);
            trace!("channel {} on {:?}", channel, duty);
        }
        self.record(ChannelEvent::On { channel, duty });
    }

    fn set_off(&mut self, channel: usize) {
        if let Some(level) = self.levels.get_mut(channel) {
            *level = 0.0;
            trace!("channel {} off", channel);
        }
        self.record(ChannelEvent::Off { channel });
    }
}
