pub mod board;
pub mod collection;
pub mod config;
pub mod item;

pub use board::*;
pub use collection::*;
pub use config::*;
pub use item::*;
