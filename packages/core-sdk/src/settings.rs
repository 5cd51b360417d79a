use anyhow::Result;
use rusqlite::Connection;

use crate::db;
use crate::models::UserPreferences;

/**
 * \brief 内置的命令关键字列表，用户清空输入时的回退值。
 */
pub const DEFAULT_COMMAND_LINK: &str = "ls,cd,pwd,cat,grep,apt,pkg,bash,python,git,ssh,curl,wget";

/**
 * \brief 内置系统提示词，未自定义时生效。
 */
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "你是运行在终端里的 AI 助手，回答尽量给出可直接执行的命令。";

/**
 * \brief 用户设置服务：以显式命令方法承接展示层的输入事件。
 * \details 每个方法同步执行加载-修改-保存，替代源应用里散落在
 *          各 TextWatcher/Listener 中的全局状态写入。
 */
pub struct SettingsService<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsService<'a> {
    /** \brief 以已迁移的连接构造。 */
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /**
     * \brief 当前偏好快照。
     */
    pub fn preferences(&self) -> Result<UserPreferences> {
        db::get_user_preferences(self.conn)
    }

    /**
     * \brief 更新命令关键字列表并返回归一化后的文本。
     * \details 全角逗号统一替换为半角；清空输入时回退到内置列表。
     */
    pub fn set_command_link(&self, value: &str) -> Result<String> {
        let normalized = value.replace('，', ",");
        let mut prefs = self.preferences()?;
        prefs.command_link = if normalized.trim().is_empty() {
            None
        } else {
            Some(normalized.clone())
        };
        db::set_user_preferences(self.conn, &prefs)?;
        Ok(normalized)
    }

    /**
     * \brief 生效的命令关键字列表（未设置时为内置值）。
     */
    pub fn effective_command_link(&self) -> Result<String> {
        let prefs = self.preferences()?;
        Ok(prefs
            .command_link
            .unwrap_or_else(|| DEFAULT_COMMAND_LINK.to_string()))
    }

    /**
     * \brief 更新旧版全局 API Key。
     */
    pub fn set_api_key(&self, value: &str) -> Result<()> {
        let mut prefs = self.preferences()?;
        prefs.llm_api_key = value.to_string();
        db::set_user_preferences(self.conn, &prefs)
    }

    /**
     * \brief 更新自定义系统提示词。
     */
    pub fn set_system_prompt(&self, value: &str) -> Result<()> {
        let mut prefs = self.preferences()?;
        prefs.custom_system_prompt = value.to_string();
        db::set_user_preferences(self.conn, &prefs)
    }

    /**
     * \brief 生效的系统提示词（未自定义时为内置值）。
     */
    pub fn effective_system_prompt(&self) -> Result<String> {
        let prefs = self.preferences()?;
        if prefs.custom_system_prompt.trim().is_empty() {
            Ok(DEFAULT_SYSTEM_PROMPT.to_string())
        } else {
            Ok(prefs.custom_system_prompt)
        }
    }

    /**
     * \brief 切换 AI 回复在终端中的可见性。
     */
    pub fn set_ai_visible(&self, enabled: bool) -> Result<()> {
        let mut prefs = self.preferences()?;
        prefs.ai_visible_terminal = enabled;
        db::set_user_preferences(self.conn, &prefs)
    }
}
