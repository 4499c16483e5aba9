pub mod dao;
pub mod model;
pub mod schema;

use attest_persistence::executor::DbExecutor;

pub use attest_persistence::executor::Error as DbError;

pub type DbResult<T> = Result<T, DbError>;

embed_migrations!("migrations");

pub fn init(db: &DbExecutor) -> anyhow::Result<()> {
    db.apply_migration(|conn, out| embedded_migrations::run_with_output(conn, out))
}
