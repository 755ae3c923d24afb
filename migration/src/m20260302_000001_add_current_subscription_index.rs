use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 每个学校同一时刻最多一条生效中的订阅（active/grace_period）；
        // pending 行允许与 active 并存（续费时先下单后核验）
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS uq_subscriptions_current_per_school
                ON subscriptions (school_id)
                WHERE status IN ('active', 'grace_period')
                "#,
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP INDEX IF EXISTS uq_subscriptions_current_per_school")
            .await?;
        Ok(())
    }
}
