use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Singleton crawl cursor; the row itself (id = 1) is created by the indexer on startup
        manager
            .create_table(
                Table::create()
                    .table(System::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(System::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(System::LastRunTimestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(System::LastProcessedBlock)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(System::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum System {
    Table,
    Id,
    LastRunTimestamp,
    LastProcessedBlock,
}
