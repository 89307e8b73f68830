pub use sea_orm_migration::prelude::*;

mod m20241120_000001_create_logs;
mod m20241120_000002_create_nodes;
mod m20241120_000003_create_system;
mod m20241205_000001_create_sync_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20241120_000001_create_logs::Migration),
            Box::new(m20241120_000002_create_nodes::Migration),
            Box::new(m20241120_000003_create_system::Migration),
            Box::new(m20241205_000001_create_sync_status::Migration),
        ]
    }
}
