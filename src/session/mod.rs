pub mod listener;
pub mod storage;
pub mod tracker;
pub mod transitions;
pub mod types;


pub use listener::*;
pub use storage::*;
pub use tracker::*;
pub use transitions::*;
pub use types::*;
