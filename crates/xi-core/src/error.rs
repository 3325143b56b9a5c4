//! 统一错误类型定义.
//!
//! 所有 Xi crate 共用的错误类型, 支持跨模块传播.
//!
//! 错误分为两类:
//! - 单元内错误 (`OutOfBits`, `MalformedCode`, `Syntax`): 只影响当前 NAL 单元,
//!   由调用方在单元边界捕获并记录为带错误标记的语法节点.
//! - 致命错误 (`Io`): 终止整个后台解析任务.

use thiserror::Error;

/// Xi 统一错误类型
#[derive(Debug, Error)]
pub enum XiError {
    /// 读取超出缓冲区末尾
    #[error("比特数据不足: 需要 {needed} 位, 剩余 {available} 位")]
    OutOfBits { needed: usize, available: usize },

    /// Exp-Golomb 前导零个数超过上限
    #[error("非法 Exp-Golomb 码: 位偏移 {bit_offset} 处前导零超过 {leading_zeros} 个")]
    MalformedCode { bit_offset: usize, leading_zeros: u32 },

    /// 语法错误, 携带 NAL 单元字节偏移与字段名
    #[error("语法错误 (单元偏移 {offset}, 字段 {field}): {message}")]
    Syntax {
        offset: u64,
        field: String,
        message: String,
    },

    /// 起始码扫描失败 (整个输入中没有任何起始码)
    #[error("扫描错误: {0}")]
    Scan(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 状态错误 (如任务运行中再次启动)
    #[error("状态错误: {0}")]
    InvalidState(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),
}

impl XiError {
    /// 构造语法错误, 单元偏移在单元边界处补齐
    pub fn syntax(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset: 0,
            field: field.into(),
            message: message.into(),
        }
    }

    /// 将单元内错误归一化为带单元偏移的语法错误
    ///
    /// `field` 为读取失败的字段名 (若已知). 其他错误原样返回.
    pub fn at_unit(self, unit_offset: u64, field: Option<&str>) -> Self {
        match self {
            Self::Syntax {
                field: f, message, ..
            } => Self::Syntax {
                offset: unit_offset,
                field: f,
                message,
            },
            e @ (Self::OutOfBits { .. } | Self::MalformedCode { .. }) => Self::Syntax {
                offset: unit_offset,
                field: field.unwrap_or("<unknown>").to_string(),
                message: e.to_string(),
            },
            other => other,
        }
    }

    /// 是否为终止整个任务的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Xi 统一 Result 类型
pub type XiResult<T> = Result<T, XiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_unit_wraps_out_of_bits() {
        let err = XiError::OutOfBits {
            needed: 5,
            available: 2,
        }
        .at_unit(128, Some("cpb_size_scale"));
        match err {
            XiError::Syntax {
                offset,
                field,
                message,
            } => {
                assert_eq!(offset, 128);
                assert_eq!(field, "cpb_size_scale");
                assert!(message.contains("需要 5 位"), "消息应包含原始原因: {message}");
            }
            other => panic!("应转换为语法错误, 实际: {other:?}"),
        }
    }

    #[test]
    fn test_at_unit_keeps_syntax_field() {
        let err = XiError::syntax("cpb_cnt_minus1", "超出范围").at_unit(7, Some("other"));
        assert!(
            matches!(err, XiError::Syntax { offset: 7, ref field, .. } if field == "cpb_cnt_minus1"),
            "应保留原字段名"
        );
    }

    #[test]
    fn test_only_io_is_fatal() {
        let io = XiError::from(std::io::Error::other("磁盘故障"));
        assert!(io.is_fatal());
        assert!(!XiError::syntax("a", "b").is_fatal());
        assert!(!XiError::Scan("无起始码".into()).is_fatal());
    }
}
