//! 配置文件格式与 (反) 序列化

use std::path::Path;

use contracts::{ContractError, FanoutBlueprint};

/// 支持的配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 按扩展名识别 (大小写不敏感)
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    /// 按文件路径识别
    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                ContractError::config_parse(format!(
                    "cannot determine config format of {}",
                    path.display()
                ))
            })?;
        Self::from_extension(ext)
            .ok_or_else(|| ContractError::config_parse(format!("unsupported config format: .{ext}")))
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }

    /// 反序列化为蓝图 (不做语义校验)
    pub fn parse(self, content: &str) -> Result<FanoutBlueprint, ContractError> {
        let parsed = match self {
            Self::Toml => toml::from_str(content).map_err(boxed),
            Self::Json => serde_json::from_str(content).map_err(boxed),
        };
        parsed.map_err(|(message, source)| ContractError::ConfigParse {
            message: format!("{} parse error: {message}", self.label()),
            source: Some(source),
        })
    }

    /// 序列化蓝图
    pub fn render(self, blueprint: &FanoutBlueprint) -> Result<String, ContractError> {
        let rendered = match self {
            Self::Toml => toml::to_string_pretty(blueprint).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(blueprint).map_err(|e| e.to_string()),
        };
        rendered.map_err(|e| {
            ContractError::config_parse(format!("{} serialize error: {e}", self.label()))
        })
    }
}

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

fn boxed<E>(e: E) -> (String, BoxedError)
where
    E: std::error::Error + Send + Sync + 'static,
{
    (e.to_string(), Box::new(e))
}
