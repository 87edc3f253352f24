pub mod cursor;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use cursor::CursorStore;
pub use error::StorageError;
pub use sqlite::SqliteDatabase;
pub use traits::*;
