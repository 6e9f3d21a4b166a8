use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EdiPendingExports::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EdiPendingExports::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EdiPendingExports::FacilityId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EdiPendingExports::Kind).string().not_null())
                    .col(ColumnDef::new(EdiPendingExports::Prefix).string().not_null())
                    .col(ColumnDef::new(EdiPendingExports::Content).blob().not_null())
                    .col(
                        ColumnDef::new(EdiPendingExports::QueuedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("edi_pending_exports_queued_at_idx")
                    .table(EdiPendingExports::Table)
                    .col(EdiPendingExports::QueuedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EdiPendingExports::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum EdiPendingExports {
    Table,
    Id,
    FacilityId,
    Kind,
    Prefix,
    Content,
    QueuedAt,
}
