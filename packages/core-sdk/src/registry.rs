use anyhow::Result;
use rusqlite::Connection;
use thiserror::Error;

use crate::db;
use crate::models::ProviderProfile;

/**
 * \brief 注册表操作的错误类型，供展示层区分处理。
 */
#[derive(Debug, Error)]
pub enum RegistryError {
    /** \brief 拒绝删除最后一个 Provider。 */
    #[error("cannot delete the last remaining provider")]
    LastProvider,
    /** \brief 目标 id 不存在。 */
    #[error("provider id {id} not found")]
    NotFound {
        /** \brief 未命中的主键 */
        id: i64,
    },
    /** \brief 必填字段为空，由展示层在调用前构造。 */
    #[error("field `{field}` must not be empty")]
    Validation {
        /** \brief 为空的字段名 */
        field: &'static str,
    },
    /** \brief 存储层错误。 */
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/**
 * \brief 注册表消费的持久化契约。
 * \details 命中类操作以 bool 表示目标行是否存在，错误语义由注册表统一赋予。
 */
pub trait ProfileStore {
    /** \brief 按持久化顺序返回全部档案。 */
    fn all(&self) -> Result<Vec<ProviderProfile>>;
    /** \brief 按主键读取。 */
    fn get(&self, id: i64) -> Result<Option<ProviderProfile>>;
    /** \brief 读取默认档案（无标志时回退为最早一条）。 */
    fn get_default(&self) -> Result<Option<ProviderProfile>>;
    /** \brief 插入并返回分配的主键。 */
    fn insert(&self, profile: &ProviderProfile) -> Result<i64>;
    /** \brief 覆盖数据字段，返回是否命中。 */
    fn update(&self, profile: &ProviderProfile) -> Result<bool>;
    /** \brief 独占地设置默认标志，返回是否命中。 */
    fn set_default(&self, id: i64) -> Result<bool>;
    /** \brief 删除行，返回是否命中。 */
    fn delete(&self, id: i64) -> Result<bool>;
    /** \brief 当前行数。 */
    fn count(&self) -> Result<i64>;
}

/**
 * \brief 基于 SQLite 的 ProfileStore 实现，委托 db 模块。
 */
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /** \brief 以已迁移的连接构造。 */
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl ProfileStore for SqliteStore {
    fn all(&self) -> Result<Vec<ProviderProfile>> {
        db::list_providers(&self.conn)
    }

    fn get(&self, id: i64) -> Result<Option<ProviderProfile>> {
        db::get_provider_by_id(&self.conn, id)
    }

    fn get_default(&self) -> Result<Option<ProviderProfile>> {
        db::get_default_provider(&self.conn)
    }

    fn insert(&self, profile: &ProviderProfile) -> Result<i64> {
        db::insert_provider(&self.conn, profile)
    }

    fn update(&self, profile: &ProviderProfile) -> Result<bool> {
        db::update_provider(&self.conn, profile)
    }

    fn set_default(&self, id: i64) -> Result<bool> {
        db::set_default_provider(&self.conn, id)
    }

    fn delete(&self, id: i64) -> Result<bool> {
        db::delete_provider(&self.conn, id)
    }

    fn count(&self) -> Result<i64> {
        db::provider_count(&self.conn)
    }
}

/**
 * \brief 展示层的必填校验：name、api_url、model_name 非空。
 * \details 注册表信任调用方已校验，不在插入/更新路径上重复检查。
 */
pub fn validate_profile(profile: &ProviderProfile) -> Result<(), RegistryError> {
    if profile.name.trim().is_empty() {
        return Err(RegistryError::Validation { field: "name" });
    }
    if profile.api_url.trim().is_empty() {
        return Err(RegistryError::Validation { field: "api_url" });
    }
    if profile.model_name.trim().is_empty() {
        return Err(RegistryError::Validation { field: "model_name" });
    }
    Ok(())
}

/**
 * \brief Provider 档案注册表：会话内档案集合的唯一事实来源。
 * \details 维护三条不变式——主键唯一（存储层自增保证）、非空集合恰有一个
 *          默认项（删除默认项后的过渡态除外）、集合不允许被删空。
 *          所有修改操作同步写穿到存储后才返回。
 */
pub struct ProviderRegistry<S: ProfileStore> {
    store: S,
}

impl<S: ProfileStore> ProviderRegistry<S> {
    /** \brief 以给定存储构造注册表。 */
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /**
     * \brief 按持久化顺序返回当前全部档案，无副作用。
     */
    pub fn list_providers(&self) -> Result<Vec<ProviderProfile>, RegistryError> {
        Ok(self.store.all()?)
    }

    /**
     * \brief 插入新档案并返回分配的主键。
     * \details 首条档案自动成为默认项，之后插入的一律非默认；
     *          调用方提交的 is_default 输入值在此被覆盖。
     */
    pub fn insert_provider(&self, profile: &ProviderProfile) -> Result<i64, RegistryError> {
        let mut row = profile.clone();
        row.is_default = self.store.count()? == 0;
        Ok(self.store.insert(&row)?)
    }

    /**
     * \brief 按 id 覆盖档案的数据字段。
     * \details 不改变默认标志，默认项只能经 set_default_provider 变更。
     */
    pub fn update_provider(&self, profile: &ProviderProfile) -> Result<(), RegistryError> {
        if !self.store.update(profile)? {
            return Err(RegistryError::NotFound { id: profile.id });
        }
        Ok(())
    }

    /**
     * \brief 将指定档案设为唯一默认项。
     * \details id 不存在时静默返回，不视为错误。
     */
    pub fn set_default_provider(&self, id: i64) -> Result<(), RegistryError> {
        self.store.set_default(id)?;
        Ok(())
    }

    /**
     * \brief 删除指定档案。
     * \details 表中仅剩一条时拒绝删除；删除的恰是默认项时不自动提升
     *          其他档案，由展示层提示用户重新选择。
     */
    pub fn delete_provider(&self, id: i64) -> Result<(), RegistryError> {
        if self.store.count()? <= 1 {
            return Err(RegistryError::LastProvider);
        }
        if !self.store.delete(id)? {
            return Err(RegistryError::NotFound { id });
        }
        Ok(())
    }

    /**
     * \brief 当前档案总数。
     */
    pub fn provider_count(&self) -> Result<i64, RegistryError> {
        Ok(self.store.count()?)
    }

    /**
     * \brief 按主键读取档案。
     */
    pub fn get_provider(&self, id: i64) -> Result<Option<ProviderProfile>, RegistryError> {
        Ok(self.store.get(id)?)
    }

    /**
     * \brief 读取当前默认档案。
     */
    pub fn default_provider(&self) -> Result<Option<ProviderProfile>, RegistryError> {
        Ok(self.store.get_default()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FormatType;

    fn mem_registry() -> ProviderRegistry<SqliteStore> {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::migrate(&conn).expect("migrate");
        ProviderRegistry::new(SqliteStore::new(conn))
    }

    fn profile(name: &str) -> ProviderProfile {
        ProviderProfile::unsaved(
            name,
            FormatType::OpenAI,
            "https://api.example.com/v1/chat/completions",
            "sk-test",
            "gpt-4o",
        )
    }

    #[test]
    fn test_first_insert_becomes_default() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let a = registry.get_provider(id_a).expect("get A").unwrap();
        assert!(a.is_default);
        assert_eq!(registry.provider_count().expect("count"), 1);
    }

    #[test]
    fn test_subsequent_inserts_are_not_default() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let id_b = registry.insert_provider(&profile("B")).expect("insert B");

        let a = registry.get_provider(id_a).expect("get A").unwrap();
        let b = registry.get_provider(id_b).expect("get B").unwrap();
        assert!(a.is_default);
        assert!(!b.is_default);
        assert_eq!(registry.provider_count().expect("count"), 2);
    }

    #[test]
    fn test_insert_ignores_caller_default_flag() {
        let registry = mem_registry();
        registry.insert_provider(&profile("A")).expect("insert A");
        let mut sneaky = profile("B");
        sneaky.is_default = true;
        let id_b = registry.insert_provider(&sneaky).expect("insert B");
        assert!(!registry.get_provider(id_b).expect("get B").unwrap().is_default);
    }

    #[test]
    fn test_exactly_one_default_after_each_insert() {
        let registry = mem_registry();
        for name in ["A", "B", "C", "D"] {
            registry.insert_provider(&profile(name)).expect("insert");
            let defaults = registry
                .list_providers()
                .expect("list")
                .iter()
                .filter(|p| p.is_default)
                .count();
            assert_eq!(defaults, 1);
        }
    }

    #[test]
    fn test_set_default_switches_exclusively() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let id_b = registry.insert_provider(&profile("B")).expect("insert B");

        registry.set_default_provider(id_b).expect("set default B");
        let a = registry.get_provider(id_a).expect("get A").unwrap();
        let b = registry.get_provider(id_b).expect("get B").unwrap();
        assert!(!a.is_default);
        assert!(b.is_default);
    }

    #[test]
    fn test_set_default_missing_id_is_silent_noop() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        registry.set_default_provider(id_a + 77).expect("noop");
        let a = registry.get_provider(id_a).expect("get A").unwrap();
        assert!(a.is_default);
    }

    #[test]
    fn test_delete_last_provider_is_rejected() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let err = registry.delete_provider(id_a).expect_err("must refuse");
        assert!(matches!(err, RegistryError::LastProvider));
        assert_eq!(registry.provider_count().expect("count"), 1);
        assert!(registry.get_provider(id_a).expect("get A").is_some());
    }

    #[test]
    fn test_delete_removes_exactly_the_target() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let id_b = registry.insert_provider(&profile("B")).expect("insert B");
        let id_c = registry.insert_provider(&profile("C")).expect("insert C");

        registry.delete_provider(id_b).expect("delete B");
        assert_eq!(registry.provider_count().expect("count"), 2);
        assert!(registry.get_provider(id_b).expect("get B").is_none());
        // 非默认项被删除后，默认状态不受影响
        assert!(registry.get_provider(id_a).expect("get A").unwrap().is_default);
        assert!(!registry.get_provider(id_c).expect("get C").unwrap().is_default);
    }

    #[test]
    fn test_delete_missing_id_reports_not_found() {
        let registry = mem_registry();
        registry.insert_provider(&profile("A")).expect("insert A");
        registry.insert_provider(&profile("B")).expect("insert B");
        let err = registry.delete_provider(999).expect_err("missing id");
        assert!(matches!(err, RegistryError::NotFound { id: 999 }));
    }

    #[test]
    fn test_delete_default_leaves_no_default() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let id_b = registry.insert_provider(&profile("B")).expect("insert B");

        registry.delete_provider(id_a).expect("delete default A");
        // 过渡态：不自动提升，等待用户重新选择
        let list = registry.list_providers().expect("list");
        assert_eq!(list.len(), 1);
        assert!(!list[0].is_default);
        assert_eq!(list[0].id, id_b);
    }

    #[test]
    fn test_update_preserves_default_flag() {
        let registry = mem_registry();
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let id_b = registry.insert_provider(&profile("B")).expect("insert B");

        let mut edit = profile("A-renamed");
        edit.id = id_a;
        edit.format_type = FormatType::Gemini;
        edit.api_url = "https://generativelanguage.googleapis.com/v1beta".to_string();
        edit.api_key = "sk-new".to_string();
        edit.model_name = "gemini-pro".to_string();
        edit.is_default = false; // 输入值不生效
        registry.update_provider(&edit).expect("update A");

        let a = registry.get_provider(id_a).expect("get A").unwrap();
        assert_eq!(a.name, "A-renamed");
        assert_eq!(a.format_type, FormatType::Gemini);
        assert_eq!(a.api_key, "sk-new");
        assert_eq!(a.model_name, "gemini-pro");
        assert!(a.is_default, "update must not clear the default flag");

        let b = registry.get_provider(id_b).expect("get B").unwrap();
        assert!(!b.is_default);
    }

    #[test]
    fn test_update_missing_id_reports_not_found() {
        let registry = mem_registry();
        registry.insert_provider(&profile("A")).expect("insert A");
        let mut ghost = profile("ghost");
        ghost.id = 404;
        let err = registry.update_provider(&ghost).expect_err("missing id");
        assert!(matches!(err, RegistryError::NotFound { id: 404 }));
    }

    #[test]
    fn test_validate_profile_reports_empty_fields() {
        let mut p = profile("A");
        assert!(validate_profile(&p).is_ok());

        p.name = "  ".to_string();
        assert!(matches!(
            validate_profile(&p),
            Err(RegistryError::Validation { field: "name" })
        ));

        p = profile("A");
        p.api_url = String::new();
        assert!(matches!(
            validate_profile(&p),
            Err(RegistryError::Validation { field: "api_url" })
        ));

        p = profile("A");
        p.model_name = String::new();
        assert!(matches!(
            validate_profile(&p),
            Err(RegistryError::Validation { field: "model_name" })
        ));

        // api_key 允许为空
        p = profile("A");
        p.api_key = String::new();
        assert!(validate_profile(&p).is_ok());
    }

    #[test]
    fn test_default_provider_convenience() {
        let registry = mem_registry();
        assert!(registry.default_provider().expect("empty").is_none());
        let id_a = registry.insert_provider(&profile("A")).expect("insert A");
        let def = registry.default_provider().expect("default").unwrap();
        assert_eq!(def.id, id_a);
    }
}
