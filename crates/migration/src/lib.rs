use sea_orm_migration::prelude::*;

mod m20260301_000001_edi_gateways;
mod m20260301_000002_edi_pending_exports;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_edi_gateways::Migration),
            Box::new(m20260301_000002_edi_pending_exports::Migration),
        ]
    }
}
