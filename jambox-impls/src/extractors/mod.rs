mod network;
mod socket;
mod ytdlp;

pub use network::*;
pub use socket::*;
pub use ytdlp::*;
