//! Built-in query operations

pub mod count;
pub mod fetch;

pub use count::{CountNode, CountOp, COUNT_TYPE};
pub use fetch::{FetchNode, FetchOp, FETCH_TYPE};
