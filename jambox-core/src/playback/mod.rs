mod player;
mod resolution;
mod track;

pub use player::*;
pub use resolution::PendingTrack;
pub use track::*;
