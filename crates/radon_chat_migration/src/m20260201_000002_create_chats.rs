use sea_orm_migration::prelude::*;

use super::m20260201_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Chats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Chats::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Chats::UserId).integer().not_null())
                    .col(ColumnDef::new(Chats::WorkspaceId).integer().null())
                    .col(ColumnDef::new(Chats::Title).string().not_null())
                    .col(
                        ColumnDef::new(Chats::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_chats_user_id")
                            .from(Chats::Table, Chats::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 按用户列出对话
        manager
            .create_index(
                Index::create()
                    .name("idx_chats_user_id")
                    .table(Chats::Table)
                    .col(Chats::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Chats::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
pub enum Chats {
    Table,
    Id,
    UserId,
    WorkspaceId,
    Title,
    CreatedAt,
}
