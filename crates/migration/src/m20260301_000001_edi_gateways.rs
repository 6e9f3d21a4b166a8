use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EdiGateways::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EdiGateways::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EdiGateways::FacilityId).uuid().not_null())
                    .col(
                        ColumnDef::new(EdiGateways::FacilityDomainId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(EdiGateways::Kind).string().not_null())
                    .col(
                        ColumnDef::new(EdiGateways::Host)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::Port)
                            .integer()
                            .not_null()
                            .default(22),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::Username)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(EdiGateways::PasswordEnc).text().null())
                    .col(
                        ColumnDef::new(EdiGateways::ImportPath)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::ArchivePath)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::ExportPath)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::TimeoutMs)
                            .big_integer()
                            .not_null()
                            .default(5000),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(EdiGateways::UpdatedAt)
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
                    .name("edi_gateways_facility_kind_idx")
                    .table(EdiGateways::Table)
                    .col(EdiGateways::FacilityId)
                    .col(EdiGateways::Kind)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EdiGateways::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum EdiGateways {
    Table,
    Id,
    FacilityId,
    FacilityDomainId,
    Kind,
    Host,
    Port,
    Username,
    PasswordEnc,
    ImportPath,
    ArchivePath,
    ExportPath,
    TimeoutMs,
    Active,
    CreatedAt,
    UpdatedAt,
}
