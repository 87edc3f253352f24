pub mod replica;
pub mod server;

pub use replica::{TestReplica, todo_delete, todo_insert, todo_update};
pub use server::TestShapeServer;

/// Route `tracing` output to the test writer. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
