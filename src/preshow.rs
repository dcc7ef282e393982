use anyhow::Result;

use crate::state::ControlState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreshowOutcome {
    Normal,
    /// A play-now request arrived while the show was running.
    PlayNowInterrupt,
}

/// Something shown before each song (a light pattern, an announcement).
/// Implementations should poll `control.play_now()` and return early with
/// `PlayNowInterrupt` when it becomes non-zero.
pub trait Preshow: Send {
    fn execute(&mut self, control: &dyn ControlState) -> Result<PreshowOutcome>;
}

/// Skips the preshow.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreshow;

impl Preshow for NoPreshow {
    fn execute(&mut self, _control: &dyn ControlState) -> Result<PreshowOutcome> {
        Ok(PreshowOutcome::Normal)
    }
}
