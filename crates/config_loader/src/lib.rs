//! # Config Loader
//!
//! 读取 TOML / JSON 配置文件，生成经过校验的 [`FanoutBlueprint`]。
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("fanout.toml")).unwrap();
//! println!("store: {}", blueprint.store.url);
//! ```

mod parser;
mod validator;

pub use contracts::FanoutBlueprint;
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// 配置加载入口
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从文件加载，格式由扩展名决定
    ///
    /// # Errors
    /// 读取失败、格式不支持、解析失败或校验失败
    pub fn load_from_path(path: &Path) -> Result<FanoutBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content, format)
    }

    /// 从字符串加载
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<FanoutBlueprint, ContractError> {
        let blueprint = format.parse(content)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    pub fn to_toml(blueprint: &FanoutBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Toml.render(blueprint)
    }

    pub fn to_json(blueprint: &FanoutBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Json.render(blueprint)
    }
}
