pub mod error;
pub mod event;
pub mod mapper;
pub mod statement;
pub mod value;

pub use error::CoreError;
pub use event::{ChangeEvent, Cursor, Headers, Offset, Operation, row};
pub use mapper::ColumnMapper;
pub use statement::{Statement, TableRef, build_statement, statement_for_event};
pub use value::{Row, Value};
