pub mod brightness;
pub mod hardware;

pub use brightness::{brightness, BrightnessController, RollingStats};
pub use hardware::{ChannelEvent, Hardware, SimulatedHardware};
