//! 对话、消息与编辑历史的持久化查询

use chrono::Utc;
use radon_chat_entity::message::MessageRole;
use radon_chat_entity::{chat, message, message_edit, user};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

pub async fn find_user(db: &impl ConnectionTrait, auth_id: &str) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find()
        .filter(user::Column::AuthId.eq(auth_id))
        .one(db)
        .await
}

/// 按外部认证 ID 创建或更新用户
pub async fn upsert_user(
    db: &impl ConnectionTrait,
    auth_id: &str,
    email: Option<String>,
    name: Option<String>,
) -> Result<user::Model, DbErr> {
    if let Some(existing) = find_user(db, auth_id).await? {
        if email.is_none() && name.is_none() {
            return Ok(existing);
        }
        let mut active = existing.into_active_model();
        if email.is_some() {
            active.email = Set(email);
        }
        if name.is_some() {
            active.name = Set(name);
        }
        return active.update(db).await;
    }
    user::ActiveModel {
        auth_id: Set(auth_id.to_string()),
        email: Set(email),
        name: Set(name),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

/// 查找属于指定用户的对话，不属于该用户时视为不存在
pub async fn find_owned_chat(
    db: &impl ConnectionTrait,
    chat_id: i32,
    user_id: i32,
) -> Result<Option<chat::Model>, DbErr> {
    chat::Entity::find_by_id(chat_id)
        .filter(chat::Column::UserId.eq(user_id))
        .one(db)
        .await
}

pub async fn create_chat(
    db: &impl ConnectionTrait,
    user_id: i32,
    title: String,
    workspace_id: Option<i32>,
) -> Result<chat::Model, DbErr> {
    chat::ActiveModel {
        user_id: Set(user_id),
        workspace_id: Set(workspace_id),
        title: Set(title),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
}

pub async fn list_chats(db: &impl ConnectionTrait, user_id: i32) -> Result<Vec<chat::Model>, DbErr> {
    chat::Entity::find()
        .filter(chat::Column::UserId.eq(user_id))
        .order_by_desc(chat::Column::CreatedAt)
        .order_by_desc(chat::Column::Id)
        .all(db)
        .await
}

pub async fn delete_chat(db: &impl ConnectionTrait, chat_id: i32) -> Result<(), DbErr> {
    chat::Entity::delete_by_id(chat_id).exec(db).await?;
    Ok(())
}

/// 对话内全部消息，按时间正序
pub async fn chat_messages(db: &impl ConnectionTrait, chat_id: i32) -> Result<Vec<message::Model>, DbErr> {
    message::Entity::find()
        .filter(message::Column::ChatId.eq(chat_id))
        .order_by_asc(message::Column::CreatedAt)
        .order_by_asc(message::Column::Id)
        .all(db)
        .await
}

/// 新消息的基础字段，其余可选字段由调用方补充
pub fn new_message(chat_id: i32, role: MessageRole, content: impl Into<String>) -> message::ActiveModel {
    message::ActiveModel {
        chat_id: Set(chat_id),
        role: Set(role),
        content: Set(content.into()),
        created_at: Set(Utc::now()),
        is_edited: Set(false),
        ..Default::default()
    }
}

/// 最近的 `limit` 条消息，按时间正序返回
///
/// 指定 `before` 时只取严格早于该消息的记录。
pub async fn recent_messages(
    db: &impl ConnectionTrait,
    chat_id: i32,
    limit: u64,
    before: Option<&message::Model>,
) -> Result<Vec<message::Model>, DbErr> {
    let mut query = message::Entity::find().filter(message::Column::ChatId.eq(chat_id));
    if let Some(anchor) = before {
        query = query.filter(
            Condition::any()
                .add(message::Column::CreatedAt.lt(anchor.created_at))
                .add(
                    Condition::all()
                        .add(message::Column::CreatedAt.eq(anchor.created_at))
                        .add(message::Column::Id.lt(anchor.id)),
                ),
        );
    }
    let mut messages = query
        .order_by_desc(message::Column::CreatedAt)
        .order_by_desc(message::Column::Id)
        .limit(limit)
        .all(db)
        .await?;
    messages.reverse();
    Ok(messages)
}

pub async fn find_message(db: &impl ConnectionTrait, message_id: i32) -> Result<Option<message::Model>, DbErr> {
    message::Entity::find_by_id(message_id).one(db).await
}

pub async fn find_message_in_chat(
    db: &impl ConnectionTrait,
    chat_id: i32,
    message_id: i32,
) -> Result<Option<message::Model>, DbErr> {
    message::Entity::find_by_id(message_id)
        .filter(message::Column::ChatId.eq(chat_id))
        .one(db)
        .await
}

/// 编辑消息内容，同一事务内先记录编辑前的内容
pub async fn edit_message<C>(db: &C, original: message::Model, content: String) -> Result<message::Model, DbErr>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = db.begin().await?;
    let now = Utc::now();
    message_edit::ActiveModel {
        message_id: Set(original.id),
        previous_content: Set(original.content.clone()),
        edited_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let mut active = original.into_active_model();
    active.content = Set(content);
    active.is_edited = Set(true);
    active.edited_at = Set(Some(now));
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// 删除消息，编辑历史随外键级联删除
pub async fn delete_message(db: &impl ConnectionTrait, message_id: i32) -> Result<(), DbErr> {
    message::Entity::delete_by_id(message_id).exec(db).await?;
    Ok(())
}

/// 编辑历史，最新的在前
pub async fn edit_history(db: &impl ConnectionTrait, message_id: i32) -> Result<Vec<message_edit::Model>, DbErr> {
    message_edit::Entity::find()
        .filter(message_edit::Column::MessageId.eq(message_id))
        .order_by_desc(message_edit::Column::EditedAt)
        .order_by_desc(message_edit::Column::Id)
        .all(db)
        .await
}

#[cfg(test)]
mod tests {
    use sea_orm::PaginatorTrait;

    use super::*;
    use crate::database::setup_test_database;

    #[tokio::test]
    async fn test_upsert_user_is_idempotent() {
        let db = setup_test_database().await;
        let first = upsert_user(&db, "auth-1", None, None).await.unwrap();
        let second = upsert_user(&db, "auth-1", Some("a@example.com".to_string()), None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.email.as_deref(), Some("a@example.com"));
        assert_eq!(user::Entity::find().count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chat_ownership() {
        let db = setup_test_database().await;
        let alice = upsert_user(&db, "alice", None, None).await.unwrap();
        let bob = upsert_user(&db, "bob", None, None).await.unwrap();
        let chat = create_chat(&db, alice.id, "Alice's chat".to_string(), None).await.unwrap();

        assert!(find_owned_chat(&db, chat.id, alice.id).await.unwrap().is_some());
        assert!(find_owned_chat(&db, chat.id, bob.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_messages_window() {
        let db = setup_test_database().await;
        let owner = upsert_user(&db, "owner", None, None).await.unwrap();
        let chat = create_chat(&db, owner.id, "window".to_string(), None).await.unwrap();
        let mut inserted = Vec::new();
        for i in 0..6 {
            let msg = new_message(chat.id, MessageRole::User, format!("m{}", i))
                .insert(&db)
                .await
                .unwrap();
            inserted.push(msg);
        }

        let recent = recent_messages(&db, chat.id, 3, None).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);

        let before = recent_messages(&db, chat.id, 10, Some(&inserted[2])).await.unwrap();
        let contents: Vec<_> = before.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn test_edit_appends_history_and_cascades() {
        let db = setup_test_database().await;
        let owner = upsert_user(&db, "editor", None, None).await.unwrap();
        let chat = create_chat(&db, owner.id, "edits".to_string(), None).await.unwrap();
        let msg = new_message(chat.id, MessageRole::User, "first").insert(&db).await.unwrap();

        let msg = edit_message(&db, msg, "second".to_string()).await.unwrap();
        let msg = edit_message(&db, msg, "third".to_string()).await.unwrap();
        assert!(msg.is_edited);
        assert_eq!(msg.content, "third");
        assert_eq!(msg.role, MessageRole::User);

        let history = edit_history(&db, msg.id).await.unwrap();
        let previous: Vec<_> = history.iter().map(|h| h.previous_content.as_str()).collect();
        assert_eq!(previous, vec!["second", "first"]);

        delete_chat(&db, chat.id).await.unwrap();
        assert!(find_message(&db, msg.id).await.unwrap().is_none());
        assert_eq!(message_edit::Entity::find().count(&db).await.unwrap(), 0);
    }
}
