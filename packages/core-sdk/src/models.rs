use serde::{Deserialize, Deserializer, Serialize};

/**
 * \brief Provider 接口格式类型（封闭枚举）。
 * \details 存储层与前端传入的未知字符串一律归一化为 openai。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    /** \brief OpenAI Chat Completions 格式（兜底值） */
    #[default]
    OpenAI,
    /** \brief Anthropic Messages 格式 */
    Claude,
    /** \brief Google Gemini 格式 */
    Gemini,
}

impl<'de> Deserialize<'de> for FormatType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // 边界归一化：未识别的值回退为 openai，与 parse 保持一致
        let value = String::deserialize(deserializer)?;
        Ok(FormatType::parse(&value))
    }
}

impl FormatType {
    /** \brief 全部格式类型，按设置界面的展示顺序排列。 */
    pub const ALL: [FormatType; 3] = [FormatType::OpenAI, FormatType::Claude, FormatType::Gemini];

    /**
     * \brief 从存储文本解析格式类型，未识别的值回退为 openai。
     */
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "claude" => FormatType::Claude,
            "gemini" => FormatType::Gemini,
            _ => FormatType::OpenAI,
        }
    }

    /** \brief 存储层使用的标识文本。 */
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::OpenAI => "openai",
            FormatType::Claude => "claude",
            FormatType::Gemini => "gemini",
        }
    }

    /** \brief 该格式类型的公开默认接口地址。 */
    pub fn default_api_url(&self) -> &'static str {
        match self {
            FormatType::OpenAI => "https://api.openai.com/v1/chat/completions",
            FormatType::Claude => "https://api.anthropic.com/v1/messages",
            FormatType::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

impl std::fmt::Display for FormatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
 * \brief URL 自动填充判定。
 * \details 当前 URL 为空或恰好等于某个公开默认地址时视为"未自定义"，
 *          返回目标格式的默认地址；用户手动输入过地址后不再覆盖。
 */
pub fn autofill_api_url(format: FormatType, current: &str) -> Option<&'static str> {
    let current = current.trim();
    let untouched =
        current.is_empty() || FormatType::ALL.iter().any(|f| f.default_api_url() == current);
    untouched.then(|| format.default_api_url())
}

/**
 * \brief AI Provider 配置档案。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /** \brief 自增主键，0 表示尚未入库 */
    #[serde(default)]
    pub id: i64,
    /** \brief 显示名称 */
    pub name: String,
    /** \brief 接口格式类型 */
    #[serde(default)]
    pub format_type: FormatType,
    /** \brief 接口地址 */
    pub api_url: String,
    /** \brief API Key（允许为空） */
    #[serde(default)]
    pub api_key: String,
    /** \brief 模型名 */
    pub model_name: String,
    /** \brief 是否为默认 Provider（全表至多一条为真） */
    #[serde(default)]
    pub is_default: bool,
}

impl ProviderProfile {
    /**
     * \brief 构造一条未入库的档案（id=0，is_default 由注册表在插入时决定）。
     */
    pub fn unsaved(
        name: impl Into<String>,
        format_type: FormatType,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            format_type,
            api_url: api_url.into(),
            api_key: api_key.into(),
            model_name: model_name.into(),
            is_default: false,
        }
    }
}

/**
 * \brief 用户偏好值对象，整体以 JSON 形式持久化在 app_config 表。
 * \details 显式 load/save，替代源应用的进程级可变单例。
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /** \brief 终端蓝色点击识别的命令关键字列表（逗号分隔） */
    #[serde(default)]
    pub command_link: Option<String>,
    /** \brief 旧版全局 API Key（Provider 化之前的遗留字段） */
    #[serde(default)]
    pub llm_api_key: String,
    /** \brief 自定义系统提示词 */
    #[serde(default)]
    pub custom_system_prompt: String,
    /** \brief AI 回复是否直接可见于终端 */
    #[serde(default)]
    pub ai_visible_terminal: bool,
}

/**
 * \brief 会话摘要。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /** \brief 会话主键 */
    pub id: i64,
    /** \brief 会话标题 */
    pub title: String,
    /** \brief 关联的 Provider（Provider 被删除后置空） */
    pub provider_id: Option<i64>,
    /** \brief 创建时间（Unix 秒） */
    pub created_at: i64,
}

/**
 * \brief 带主键的消息结构。
 */
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /** \brief 消息行主键。 */
    pub id: i64,
    /** \brief 消息角色。 */
    pub role: String,
    /** \brief 消息正文。 */
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_falls_back_to_openai() {
        assert_eq!(FormatType::parse("claude"), FormatType::Claude);
        assert_eq!(FormatType::parse("GEMINI"), FormatType::Gemini);
        assert_eq!(FormatType::parse("openai"), FormatType::OpenAI);
        assert_eq!(FormatType::parse("deepseek"), FormatType::OpenAI);
        assert_eq!(FormatType::parse(""), FormatType::OpenAI);
    }

    #[test]
    fn test_format_serde_unknown_string() {
        let parsed: FormatType = serde_json::from_str("\"gemini\"").expect("parse gemini");
        assert_eq!(parsed, FormatType::Gemini);
        let unknown: FormatType = serde_json::from_str("\"whatever\"").expect("parse unknown");
        assert_eq!(unknown, FormatType::OpenAI);
        assert_eq!(
            serde_json::to_string(&FormatType::Claude).expect("serialize"),
            "\"claude\""
        );
    }

    #[test]
    fn test_autofill_on_empty_url() {
        assert_eq!(
            autofill_api_url(FormatType::Gemini, ""),
            Some("https://generativelanguage.googleapis.com/v1beta")
        );
        assert_eq!(
            autofill_api_url(FormatType::OpenAI, "   "),
            Some("https://api.openai.com/v1/chat/completions")
        );
    }

    #[test]
    fn test_autofill_when_url_is_a_known_default() {
        // 在各默认地址之间切换格式时持续自动填充
        assert_eq!(
            autofill_api_url(FormatType::Claude, "https://api.openai.com/v1/chat/completions"),
            Some("https://api.anthropic.com/v1/messages")
        );
        assert_eq!(
            autofill_api_url(FormatType::OpenAI, "https://api.anthropic.com/v1/messages"),
            Some("https://api.openai.com/v1/chat/completions")
        );
    }

    #[test]
    fn test_autofill_stops_on_custom_url() {
        assert_eq!(
            autofill_api_url(FormatType::Claude, "https://my-proxy.example.com/v1"),
            None
        );
    }

    #[test]
    fn test_preferences_json_round_trip() {
        let prefs = UserPreferences {
            command_link: Some("ls,cd".to_string()),
            llm_api_key: "sk-legacy".to_string(),
            custom_system_prompt: "你是终端助手".to_string(),
            ai_visible_terminal: true,
        };
        let json = serde_json::to_string(&prefs).expect("serialize prefs");
        let back: UserPreferences = serde_json::from_str(&json).expect("parse prefs");
        assert_eq!(back, prefs);
    }

    #[test]
    fn test_preferences_defaults_for_missing_fields() {
        let back: UserPreferences = serde_json::from_str("{}").expect("parse empty");
        assert_eq!(back, UserPreferences::default());
    }
}
