//! 配置校验模块
//!
//! 校验规则：
//! - 数值范围 (validator derive)
//! - store.url 使用 sqlite 协议
//! - sink instance_id 唯一且非空
//! - sink bit 为 2 的幂且互不重复
//! - sink kind 在内置类型表中

use std::collections::{HashMap, HashSet};

use contracts::{is_valid_bit, ContractError, FanoutBlueprint, SinkKind};
use validator::Validate;

/// 校验 FanoutBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    validate_ranges(blueprint)?;
    validate_store(blueprint)?;
    validate_sink_ids(blueprint)?;
    validate_sink_bits(blueprint)?;
    validate_sink_kinds(blueprint)?;
    Ok(())
}

/// 校验数值范围 (derive 规则)
fn validate_ranges(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        // 报告第一个出错字段，完整信息放在 message 里
        let field = first_field(&errors).unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, errors.to_string())
    })
}

fn first_field(errors: &validator::ValidationErrors) -> Option<String> {
    use validator::ValidationErrorsKind;

    let (name, kind) = errors.errors().iter().next()?;
    let nested = match kind {
        ValidationErrorsKind::Field(_) => None,
        ValidationErrorsKind::Struct(inner) => first_field(inner),
        ValidationErrorsKind::List(items) => items
            .iter()
            .next()
            .and_then(|(idx, inner)| first_field(inner).map(|f| format!("[{idx}].{f}"))),
    };
    Some(match nested {
        Some(rest) if rest.starts_with('[') => format!("{name}{rest}"),
        Some(rest) => format!("{name}.{rest}"),
        None => name.to_string(),
    })
}

/// 校验存储配置
fn validate_store(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    if !blueprint.store.url.starts_with("sqlite:") {
        return Err(ContractError::config_validation(
            "store.url",
            format!(
                "only sqlite URLs are supported, got '{}'",
                blueprint.store.url
            ),
        ));
    }
    Ok(())
}

/// 校验 instance_id 唯一性
fn validate_sink_ids(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in blueprint.sinks.iter().enumerate() {
        if sink.instance_id.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].instance_id", idx),
                "sink instance_id cannot be empty",
            ));
        }
        if !seen.insert(&sink.instance_id) {
            return Err(ContractError::config_validation(
                format!("sinks[instance_id={}]", sink.instance_id),
                "duplicate instance_id",
            ));
        }
    }
    Ok(())
}

/// 校验标志位
fn validate_sink_bits(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    let mut owners: HashMap<u64, &str> = HashMap::new();
    for sink in &blueprint.sinks {
        if !is_valid_bit(sink.bit) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].bit", sink.instance_id),
                format!("bit must be a power of two, got {}", sink.bit),
            ));
        }
        if let Some(owner) = owners.insert(sink.bit, &sink.instance_id) {
            return Err(ContractError::config_validation(
                format!("sinks[{}].bit", sink.instance_id),
                format!("duplicate bit {} (also used by '{}')", sink.bit, owner),
            ));
        }
    }
    Ok(())
}

/// 校验 sink 类型
fn validate_sink_kinds(blueprint: &FanoutBlueprint) -> Result<(), ContractError> {
    for sink in &blueprint.sinks {
        if sink.kind.parse::<SinkKind>().is_err() {
            let known: Vec<_> = SinkKind::ALL.iter().map(SinkKind::as_str).collect();
            return Err(ContractError::config_validation(
                format!("sinks[{}].kind", sink.instance_id),
                format!("unknown kind '{}', expected one of {:?}", sink.kind, known),
            ));
        }
        if !sink.config.is_object() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].config", sink.instance_id),
                "sink config must be a table",
            ));
        }
    }
    Ok(())
}
