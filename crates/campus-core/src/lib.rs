pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::CampusConfig;
pub use error::{CampusError, Result};
