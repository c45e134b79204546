//! 工具函数

/// 结构体名转换为 Bean 风格的名称
///
/// 例如：AuditAspect -> auditAspect，URLAspect -> URLAspect
pub fn to_camel_case(ident: &str) -> String {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    // 连续大写开头的名称保持原样
    if chars.clone().next().is_some_and(char::is_uppercase) {
        return ident.to_string();
    }
    first.to_lowercase().chain(chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_camel_case() {
        assert_eq!(to_camel_case("AuditAspect"), "auditAspect");
        assert_eq!(to_camel_case("URLAspect"), "URLAspect");
        assert_eq!(to_camel_case("A"), "a");
    }
}
