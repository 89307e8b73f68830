use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Nodes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Nodes::Operator)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    // the monitor may omit any of status, fee, uptime
                    .col(ColumnDef::new(Nodes::Status).boolean().null())
                    .col(ColumnDef::new(Nodes::Rewards).string().not_null())
                    .col(ColumnDef::new(Nodes::Fee).double().null())
                    .col(ColumnDef::new(Nodes::Uptime).double().null())
                    .col(ColumnDef::new(Nodes::NodeText).text().null())
                    .col(
                        ColumnDef::new(Nodes::IsAd)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Nodes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Nodes::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Nodes {
    Table,
    Operator,
    Status,
    Rewards,
    Fee,
    Uptime,
    NodeText,
    IsAd,
    UpdatedAt,
}
