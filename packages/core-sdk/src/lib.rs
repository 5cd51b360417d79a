pub mod db;
pub mod models;
pub mod registry;
pub mod settings;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::db;
    pub use crate::models;
    pub use crate::registry;
    pub use crate::settings;
    pub use crate::telemetry;
}
