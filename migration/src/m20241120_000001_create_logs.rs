use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // uint256 fits in 78 decimal digits; SQLite caps decimal precision,
        // so it gets plain NUMERIC affinity instead
        let amount = match manager.get_database_backend() {
            DatabaseBackend::Sqlite => ColumnDef::new(Logs::Amount)
                .custom(Alias::new("numeric"))
                .not_null()
                .to_owned(),
            _ => ColumnDef::new(Logs::Amount)
                .decimal_len(78, 0)
                .not_null()
                .to_owned(),
        };

        manager
            .create_table(
                Table::create()
                    .table(Logs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Logs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Logs::BlockNumber)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Logs::BlockHash).string().not_null())
                    .col(ColumnDef::new(Logs::TransactionHash).string().not_null())
                    .col(ColumnDef::new(Logs::LogIndex).string().not_null())
                    .col(ColumnDef::new(Logs::EventType).string_len(16).not_null())
                    .col(ColumnDef::new(Logs::Guardian).string().not_null())
                    .col(ColumnDef::new(Logs::Operator).string().null())
                    .col(amount)
                    .col(
                        ColumnDef::new(Logs::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Identity key of a log: re-ingesting a window must hit this and do nothing
        manager
            .create_index(
                Index::create()
                    .name("uq_logs_tx_hash_log_index")
                    .table(Logs::Table)
                    .col(Logs::TransactionHash)
                    .col(Logs::LogIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_logs_operator")
                    .table(Logs::Table)
                    .col(Logs::Operator)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Logs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Logs {
    Table,
    Id,
    BlockNumber,
    BlockHash,
    TransactionHash,
    LogIndex,
    EventType,
    Guardian,
    Operator,
    Amount,
    Timestamp,
}
