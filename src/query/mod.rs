//! SQL query results: response decoding, typed rows and tabular frames.

pub mod frame;
pub mod response;
pub mod row;

pub use frame::{Frame, FrameIndex};
pub use response::{Column, ColumnKind, QueryResponse, Rows};
pub use row::Row;
