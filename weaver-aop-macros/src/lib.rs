//! Weaver AOP 过程宏
//!
//! - `#[derive(AspectMetadata)]` - 从 `#[aspect(...)]` 属性生成切面元数据

extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod aspect;
mod utils;

/// `#[derive(AspectMetadata)]`
///
/// 支持的属性：
/// - `name = "..."` 切面名称，默认为结构体名的 camelCase 形式
/// - `order = N` 切面优先级，数字越小越先执行
/// - `per_this = "..."` / `per_target = "..."` 按实例创建切面
/// - `register` 通过 `Default` 登记到全局切面注册表
///
/// ```ignore
/// use weaver_aop::prelude::*;
///
/// #[derive(Default, AspectMetadata)]
/// #[aspect(order = 10, register)]
/// pub struct AuditAspect;
///
/// impl Aspect for AuditAspect {
///     fn declare_advice(advice: &mut AdviceDeclarations<Self>) {
///         advice.before("execution(* app..*Service.*(..))", |_aspect, jp| {
///             tracing::info!("→ {}", jp.signature());
///             Ok(())
///         });
///     }
/// }
/// ```
#[proc_macro_derive(AspectMetadata, attributes(aspect))]
pub fn derive_aspect_metadata(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    aspect::impl_aspect_metadata(&input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
