//! AOP 配置
//!
//! 对应配置文件中的 `[aop]` 表：
//!
//! ```toml
//! [aop]
//! auto = true
//! proxy-target-class = true
//! include-patterns = ["audit.*"]
//! infrastructure-only = false
//! apply-common-interceptors-first = true
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use weaver_core::{ContainerError, Environment};

use crate::error::AopError;

const PREFIX: &str = "aop";

/// 自动代理相关配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AopProperties {
    /// 是否注册自动代理创建器
    pub auto: bool,
    /// 是否直接代理目标类型（false 时有接口的目标只暴露接口方法）
    pub proxy_target_class: bool,
    /// 切面名称白名单（正则），为空表示全部
    pub include_patterns: Vec<String>,
    /// 只使用基础设施角色的 Advisor
    pub infrastructure_only: bool,
    pub apply_common_interceptors_first: bool,
}

impl Default for AopProperties {
    fn default() -> Self {
        Self {
            auto: true,
            proxy_target_class: true,
            include_patterns: Vec::new(),
            infrastructure_only: false,
            apply_common_interceptors_first: true,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    aop: AopProperties,
}

impl AopProperties {
    /// 解析 TOML 文本中的 `[aop]` 表，没有该表时使用默认值
    pub fn from_toml_str(content: &str) -> Result<Self, AopError> {
        let document: Document = toml::from_str(content).map_err(|e| ContainerError::InvalidConfiguration {
            source_name: "inline".to_string(),
            message: e.to_string(),
        })?;
        Ok(document.aop)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AopError> {
        let path = path.as_ref();
        let invalid = |message: String| ContainerError::InvalidConfiguration {
            source_name: path.to_string_lossy().to_string(),
            message,
        };
        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let document: Document = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        Ok(document.aop)
    }

    /// 从分层配置读取，缺失的键使用默认值
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        let key = |name: &str| format!("{}.{}", PREFIX, name);
        Self {
            auto: env.get_bool_or(&key("auto"), defaults.auto),
            proxy_target_class: env.get_bool_or(&key("proxy-target-class"), defaults.proxy_target_class),
            include_patterns: env
                .get_string_array(&key("include-patterns"))
                .unwrap_or(defaults.include_patterns),
            infrastructure_only: env.get_bool_or(&key("infrastructure-only"), defaults.infrastructure_only),
            apply_common_interceptors_first: env.get_bool_or(
                &key("apply-common-interceptors-first"),
                defaults.apply_common_interceptors_first,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::{ConfigValue, MapPropertySource, TomlPropertySource};

    #[test]
    fn test_defaults_without_aop_table() {
        let props = AopProperties::from_toml_str("[logging]\nlevel = \"info\"\n").unwrap();
        assert_eq!(props, AopProperties::default());
        assert!(props.auto);
        assert!(props.proxy_target_class);
    }

    #[test]
    fn test_parse_aop_table() {
        let props = AopProperties::from_toml_str(
            r#"
            [aop]
            proxy-target-class = false
            include-patterns = ["audit.*", "tx.*"]
            "#,
        )
        .unwrap();
        assert!(!props.proxy_target_class);
        assert_eq!(props.include_patterns, vec!["audit.*", "tx.*"]);
        assert!(props.auto);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let error = AopProperties::from_toml_str("[aop\nauto = ").unwrap_err();
        assert!(matches!(
            error,
            AopError::Container(ContainerError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_from_environment_layers() {
        let file = TomlPropertySource::parse("[aop]\nauto = false\ninfrastructure-only = true\n", "file").unwrap();
        let overrides = MapPropertySource::new("overrides")
            .with_property("aop.auto", ConfigValue::Bool(true))
            .with_property("aop.include-patterns", ConfigValue::String("audit.*, tx.*".to_string()));
        let env = Environment::new()
            .with_property_source(Box::new(file))
            .with_property_source(Box::new(overrides));

        let props = AopProperties::from_environment(&env);
        assert!(props.auto);
        assert!(props.infrastructure_only);
        assert_eq!(props.include_patterns, vec!["audit.*", "tx.*"]);
    }
}
