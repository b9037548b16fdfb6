use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use radon_chat_migration::{Migrator, MigratorTrait};
use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sea_orm::sqlx::{self, Executor};
use sea_orm::{DatabaseConnection, SqlxSqliteConnector};
use tracing::debug;

/// 创建 SQLite 连接选项
fn create_sqlite_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true)
        .pragma("cache_size", "-16384")
        .pragma("temp_store", "MEMORY")
}

async fn database_connection(path: &Path) -> Result<DatabaseConnection> {
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // 级联删除依赖外键约束，每个连接都需要开启
                conn.execute("PRAGMA foreign_keys = ON;").await?;
                let row: (i64,) = sqlx::query_as("PRAGMA busy_timeout;").fetch_one(&mut *conn).await?;
                tracing::debug!("新数据库连接已创建，busy_timeout = {}ms", row.0);
                Ok(())
            })
        })
        .connect_with(create_sqlite_options(path))
        .await?;

    debug!("SQLite 连接池已创建");
    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}

async fn migrate_database(path: &Path) -> Result<()> {
    if path.exists() {
        debug!("检测到现有数据库文件，将在必要时应用迁移");
    } else {
        debug!("数据库文件不存在，将创建新的数据库");
    }

    // 迁移使用单连接池，避免多连接导致的迁移顺序问题
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(create_sqlite_options(path))
        .await?;
    let connection = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool.clone());

    Migrator::up(&connection, None).await?;

    pool.close().await;
    debug!("迁移完成，已关闭迁移连接池");
    Ok(())
}

/// 进行数据库迁移并获取数据库连接
pub async fn setup_database(path: &Path) -> Result<DatabaseConnection> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("创建数据库目录 {} 失败", parent.display()))?;
    }
    migrate_database(path).await.context("数据库迁移失败")?;
    database_connection(path).await.context("获取数据库连接失败")
}

/// 测试用的内存数据库，单连接保证所有查询看到同一个库
#[cfg(test)]
pub async fn setup_test_database() -> DatabaseConnection {
    let options = "sqlite::memory:"
        .parse::<SqliteConnectOptions>()
        .expect("解析内存数据库地址失败")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("创建内存数据库失败");
    let connection = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);
    Migrator::up(&connection, None).await.expect("内存数据库迁移失败");
    connection
}
