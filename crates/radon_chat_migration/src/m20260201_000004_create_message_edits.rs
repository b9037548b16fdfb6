use sea_orm_migration::prelude::*;

use super::m20260201_000003_create_messages::Messages;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MessageEdits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MessageEdits::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MessageEdits::MessageId).integer().not_null())
                    .col(ColumnDef::new(MessageEdits::PreviousContent).text().not_null())
                    .col(
                        ColumnDef::new(MessageEdits::EditedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_edits_message_id")
                            .from(MessageEdits::Table, MessageEdits::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_edits_message_id")
                    .table(MessageEdits::Table)
                    .col(MessageEdits::MessageId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageEdits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MessageEdits {
    Table,
    Id,
    MessageId,
    PreviousContent,
    EditedAt,
}
