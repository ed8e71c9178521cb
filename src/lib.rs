pub mod error;
pub mod settings;
pub mod speedtest;

pub use error::{Result, SpeedTestError};
pub use settings::Settings;
