use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{thread, time::Duration};

use crate::models::{ChatSession, FormatType, ProviderProfile, StoredMessage, UserPreferences};

/** \brief app_config 中用户偏好 JSON 的键名。 */
const KEY_USER_PREFERENCES: &str = "user_preferences";

/**
 * \brief 打开默认数据库文件（本地目录下的 termai.db）。
 */
pub fn open_default_db() -> Result<Connection> {
    let conn = Connection::open("termai.db")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS providers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            format_type TEXT NOT NULL DEFAULT 'openai',
            api_url TEXT NOT NULL,
            api_key TEXT NOT NULL DEFAULT '',
            model_name TEXT NOT NULL,
            is_default INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            provider_id INTEGER REFERENCES providers(id),
            created_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            role TEXT NOT NULL,
            content TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
        "#,
        )
    })?;

    ensure_provider_format_column(conn)?;
    ensure_provider_default_column(conn)?;
    Ok(())
}

fn provider_column_exists(conn: &Connection, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare("PRAGMA table_info(providers)")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ensure_provider_format_column(conn: &Connection) -> Result<()> {
    if !provider_column_exists(conn, "format_type")? {
        retry_on_locked(|| {
            conn.execute(
                "ALTER TABLE providers ADD COLUMN format_type TEXT NOT NULL DEFAULT 'openai'",
                [],
            )
        })?;
    }
    Ok(())
}

fn ensure_provider_default_column(conn: &Connection) -> Result<()> {
    if !provider_column_exists(conn, "is_default")? {
        retry_on_locked(|| {
            conn.execute(
                "ALTER TABLE providers ADD COLUMN is_default INTEGER NOT NULL DEFAULT 0",
                [],
            )
        })?;
    }
    Ok(())
}

// ========================= Provider =========================

/**
 * \brief 新增 Provider，返回分配的主键。
 */
pub fn insert_provider(conn: &Connection, profile: &ProviderProfile) -> Result<i64> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO providers (name, format_type, api_url, api_key, model_name, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                profile.name,
                profile.format_type.as_str(),
                profile.api_url,
                profile.api_key,
                profile.model_name,
                profile.is_default as i64,
            ],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 更新 Provider 的数据字段（不触碰 is_default 标志）。
 * \return 是否命中了已有行。
 */
pub fn update_provider(conn: &Connection, profile: &ProviderProfile) -> Result<bool> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE providers SET name=?1, format_type=?2, api_url=?3, api_key=?4, model_name=?5
             WHERE id=?6",
            params![
                profile.name,
                profile.format_type.as_str(),
                profile.api_url,
                profile.api_key,
                profile.model_name,
                profile.id,
            ],
        )
    })?;
    Ok(rows > 0)
}

/**
 * \brief 删除 Provider，并解除引用它的会话关联。
 * \return 是否命中了已有行。
 */
pub fn delete_provider(conn: &Connection, id: i64) -> Result<bool> {
    retry_on_locked(|| {
        conn.execute(
            "UPDATE sessions SET provider_id=NULL WHERE provider_id=?1",
            params![id],
        )
    })?;
    let rows = retry_on_locked(|| conn.execute("DELETE FROM providers WHERE id=?1", params![id]))?;
    Ok(rows > 0)
}

/**
 * \brief 列出所有 Provider（默认项置顶，其余按主键升序）。
 */
pub fn list_providers(conn: &Connection) -> Result<Vec<ProviderProfile>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, format_type, api_url, api_key, model_name, is_default
         FROM providers ORDER BY is_default DESC, id ASC",
    )?;
    let rows = stmt
        .query_map([], row_to_provider)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 按 ID 获取 Provider。
 */
pub fn get_provider_by_id(conn: &Connection, id: i64) -> Result<Option<ProviderProfile>> {
    conn.query_row(
        "SELECT id, name, format_type, api_url, api_key, model_name, is_default
         FROM providers WHERE id=?1",
        params![id],
        row_to_provider,
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 读取默认 Provider。
 * \details 删除默认项之后表中可能暂无默认标志，此时回退为主键最小的一条；
 *          表为空返回 None。
 */
pub fn get_default_provider(conn: &Connection) -> Result<Option<ProviderProfile>> {
    let flagged = conn
        .query_row(
            "SELECT id, name, format_type, api_url, api_key, model_name, is_default
             FROM providers WHERE is_default=1 LIMIT 1",
            [],
            row_to_provider,
        )
        .optional()?;
    if flagged.is_some() {
        return Ok(flagged);
    }
    conn.query_row(
        "SELECT id, name, format_type, api_url, api_key, model_name, is_default
         FROM providers ORDER BY id ASC LIMIT 1",
        [],
        row_to_provider,
    )
    .optional()
    .map_err(Into::into)
}

/**
 * \brief 将指定 Provider 设为唯一默认项（单事务内先清后设）。
 * \return 目标行是否存在；不存在时不产生任何修改。
 */
pub fn set_default_provider(conn: &Connection, id: i64) -> Result<bool> {
    if get_provider_by_id(conn, id)?.is_none() {
        return Ok(false);
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute("UPDATE providers SET is_default=0 WHERE is_default=1", [])?;
    tx.execute("UPDATE providers SET is_default=1 WHERE id=?1", params![id])?;
    tx.commit()?;
    Ok(true)
}

/**
 * \brief Provider 总数。
 */
pub fn provider_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM providers", [], |row| row.get(0))?;
    Ok(count)
}

/**
 * \brief 首次运行时播种默认的 DeepSeek Provider。
 * \details 仅当 providers 表为空时插入；旧版全局 API Key 随播种迁移进来。
 *          由 CLI 的 init 流程调用，migrate 本身不播种。
 */
pub fn seed_default_provider(conn: &Connection, legacy_api_key: &str) -> Result<Option<i64>> {
    if provider_count(conn)? > 0 {
        return Ok(None);
    }
    let seed = ProviderProfile {
        id: 0,
        name: "DeepSeek".to_string(),
        format_type: FormatType::OpenAI,
        api_url: "https://api.deepseek.com/chat/completions".to_string(),
        api_key: legacy_api_key.to_string(),
        model_name: "deepseek-chat".to_string(),
        is_default: true,
    };
    Ok(Some(insert_provider(conn, &seed)?))
}

fn row_to_provider(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderProfile> {
    let format: String = row.get(2)?;
    Ok(ProviderProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        format_type: FormatType::parse(&format),
        api_url: row.get(3)?,
        api_key: row.get(4)?,
        model_name: row.get(5)?,
        is_default: row.get::<_, i64>(6)? == 1,
    })
}

// ========================= App Config =========================

fn set_string_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_string_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_string_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_string_config(conn, key)?
        .map(|s| s == "1")
        .unwrap_or(default))
}

/**
 * \brief 读取用户偏好，未设置过时返回默认值。
 */
pub fn get_user_preferences(conn: &Connection) -> Result<UserPreferences> {
    match get_string_config(conn, KEY_USER_PREFERENCES)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(UserPreferences::default()),
    }
}

/**
 * \brief 持久化用户偏好（整体 JSON 覆盖写入）。
 */
pub fn set_user_preferences(conn: &Connection, prefs: &UserPreferences) -> Result<()> {
    let json = serde_json::to_string(prefs)?;
    set_string_config(conn, KEY_USER_PREFERENCES, &json)
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, "telemetry_enabled", false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, "telemetry_enabled", enabled)
}

// ========================= Session / Message =========================

/**
 * \brief 创建会话。
 */
pub fn create_session(conn: &Connection, title: &str, provider_id: Option<i64>) -> Result<i64> {
    let created_at = time::OffsetDateTime::now_utc().unix_timestamp();
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO sessions (title, provider_id, created_at) VALUES (?1, ?2, ?3)",
            params![title, provider_id, created_at],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 列出会话，可按 Provider 过滤，新会话在前。
 */
pub fn list_sessions(conn: &Connection, provider_id: Option<i64>) -> Result<Vec<ChatSession>> {
    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
        Ok(ChatSession {
            id: row.get(0)?,
            title: row.get(1)?,
            provider_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    let mut results = Vec::new();
    if let Some(pid) = provider_id {
        let mut stmt = conn.prepare(
            "SELECT id, title, provider_id, created_at FROM sessions
             WHERE provider_id=?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![pid], map_row)?;
        for row in rows {
            results.push(row?);
        }
    } else {
        let mut stmt = conn
            .prepare("SELECT id, title, provider_id, created_at FROM sessions ORDER BY id DESC")?;
        let rows = stmt.query_map([], map_row)?;
        for row in rows {
            results.push(row?);
        }
    }
    Ok(results)
}

/**
 * \brief 更新会话标题。
 */
pub fn rename_session(conn: &Connection, session_id: i64, title: &str) -> Result<bool> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE sessions SET title=?1 WHERE id=?2",
            params![title, session_id],
        )
    })?;
    Ok(rows > 0)
}

/**
 * \brief 为指定会话更新 Provider 关联。
 */
pub fn set_session_provider(
    conn: &Connection,
    session_id: i64,
    provider_id: Option<i64>,
) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "UPDATE sessions SET provider_id=?1 WHERE id=?2",
            params![provider_id, session_id],
        )
    })?;
    Ok(())
}

/**
 * \brief 删除会话及其全部消息。
 */
pub fn delete_session(conn: &Connection, session_id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM messages WHERE session_id=?1", params![session_id])?;
    let rows = tx.execute("DELETE FROM sessions WHERE id=?1", params![session_id])?;
    tx.commit()?;
    Ok(rows > 0)
}

/**
 * \brief 插入一条消息。
 */
pub fn insert_message(conn: &Connection, session_id: i64, role: &str, content: &str) -> Result<i64> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO messages (session_id, role, content) VALUES (?1, ?2, ?3)",
            params![session_id, role, content],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/**
 * \brief 读取指定会话的全部消息。
 */
pub fn load_messages(conn: &Connection, session_id: i64) -> Result<Vec<StoredMessage>> {
    let mut stmt =
        conn.prepare("SELECT id, role, content FROM messages WHERE session_id=?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![session_id], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked` 类错误并线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
