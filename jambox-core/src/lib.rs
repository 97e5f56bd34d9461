mod config;
mod dispatch;
mod events;
mod extraction;
mod playback;
mod queuing;
mod util;

pub use config::*;
pub use dispatch::*;
pub use events::*;
pub use extraction::*;
pub use playback::*;
pub use queuing::*;
pub use util::*;
