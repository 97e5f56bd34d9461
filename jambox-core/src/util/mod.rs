mod deadline;
mod id;
mod snowflake;

pub use deadline::*;
pub use id::*;
pub use snowflake::*;
