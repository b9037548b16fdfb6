use sea_orm_migration::prelude::*;

use super::m20260201_000002_create_chats::Chats;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::ChatId).integer().not_null())
                    .col(ColumnDef::new(Messages::Role).string().not_null())
                    .col(ColumnDef::new(Messages::Content).text().not_null())
                    .col(ColumnDef::new(Messages::ImageUrl).string().null())
                    .col(ColumnDef::new(Messages::AudioUrl).string().null())
                    .col(ColumnDef::new(Messages::AudioTranscription).text().null())
                    .col(ColumnDef::new(Messages::AudioDuration).integer().null())
                    .col(ColumnDef::new(Messages::FunctionCalls).text().null())
                    .col(ColumnDef::new(Messages::PersonalityUsed).string().null())
                    .col(ColumnDef::new(Messages::ConversationId).string().null())
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Messages::EditedAt).timestamp_with_time_zone().null())
                    .col(
                        ColumnDef::new(Messages::IsEdited)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_messages_chat_id")
                            .from(Messages::Table, Messages::ChatId)
                            .to(Chats::Table, Chats::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 复合索引，加速上下文窗口查询
        manager
            .create_index(
                Index::create()
                    .name("idx_messages_chat_created")
                    .table(Messages::Table)
                    .col(Messages::ChatId)
                    .col(Messages::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Messages::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
pub enum Messages {
    Table,
    Id,
    ChatId,
    Role,
    Content,
    ImageUrl,
    AudioUrl,
    AudioTranscription,
    AudioDuration,
    FunctionCalls,
    PersonalityUsed,
    ConversationId,
    CreatedAt,
    EditedAt,
    IsEdited,
}
