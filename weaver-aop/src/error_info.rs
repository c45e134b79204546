//! 错误信息结构
//!
//! 把沿拦截器链传播的错误整理成可读的消息和原因链，供跟踪类拦截器记录日志

use std::fmt;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// 顶层错误消息
    pub message: String,

    /// 原因链，不含顶层消息
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_error(error: &anyhow::Error) -> Self {
        let mut chain = error.chain();
        let message = chain.next().map(ToString::to_string).unwrap_or_default();
        Self {
            message,
            source_chain: chain.map(ToString::to_string).collect(),
        }
    }

    /// 最底层的原因，没有原因链时就是顶层消息
    pub fn root_cause(&self) -> &str {
        self.source_chain.last().unwrap_or(&self.message)
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.source_chain {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}
