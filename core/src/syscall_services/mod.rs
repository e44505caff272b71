pub mod input;
pub mod net;
pub mod tty;
pub mod video;

pub use input::*;
pub use net::*;
pub use tty::*;
pub use video::*;
