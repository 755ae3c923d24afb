use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Students {
    Table,
    FatherPhone,
    MotherPhone,
    GuardianEmail,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .add_column_if_not_exists(
                        ColumnDef::new(Students::FatherPhone).string_len(32).null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .add_column_if_not_exists(
                        ColumnDef::new(Students::MotherPhone).string_len(32).null(),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .add_column_if_not_exists(
                        ColumnDef::new(Students::GuardianEmail)
                            .string_len(255)
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .drop_column(Students::GuardianEmail)
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .drop_column(Students::MotherPhone)
                    .to_owned(),
            )
            .await?;
        manager
            .alter_table(
                Table::alter()
                    .table(Students::Table)
                    .drop_column(Students::FatherPhone)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
