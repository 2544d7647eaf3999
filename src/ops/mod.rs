pub mod check;
pub mod position;
pub mod reorder;
