//! 分析配置.

use serde::{Deserialize, Serialize};
use xi_bitstream::Codec;
use xi_core::{XiError, XiResult};

/// 后台解析配置
///
/// 所有字段都有默认值, JSON 配置文件中可以只写需要覆盖的部分.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// 指定码流类型, 为空时按扩展名或内容探测
    #[serde(default)]
    pub codec: Option<Codec>,
    /// 每次从文件读取的字节数
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// 通知通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 每追加多少个单元发送一次模型更新通知
    #[serde(default = "default_model_batch_size")]
    pub model_batch_size: usize,
    /// 是否为每个字段生成语法节点
    #[serde(default = "default_trace_fields")]
    pub trace_fields: bool,
    /// 单个单元参与语法解析的最大字节数, 读取文件时单元缓冲也以此为上限.
    /// 超过上限的单元被标记为错误
    #[serde(default = "default_max_unit_size")]
    pub max_unit_size: usize,
}

fn default_read_chunk_size() -> usize {
    64 * 1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_model_batch_size() -> usize {
    32
}

fn default_trace_fields() -> bool {
    true
}

fn default_max_unit_size() -> usize {
    4 * 1024 * 1024
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            codec: None,
            read_chunk_size: default_read_chunk_size(),
            channel_capacity: default_channel_capacity(),
            model_batch_size: default_model_batch_size(),
            trace_fields: default_trace_fields(),
            max_unit_size: default_max_unit_size(),
        }
    }
}

impl AnalyzerConfig {
    /// 检查取值是否可用
    pub fn validate(&self) -> XiResult<()> {
        if self.read_chunk_size < 4 {
            return Err(XiError::InvalidArgument(format!(
                "read_chunk_size 过小: {}",
                self.read_chunk_size
            )));
        }
        if self.channel_capacity == 0 {
            return Err(XiError::InvalidArgument("channel_capacity 不能为 0".into()));
        }
        if self.model_batch_size == 0 {
            return Err(XiError::InvalidArgument("model_batch_size 不能为 0".into()));
        }
        if self.max_unit_size == 0 {
            return Err(XiError::InvalidArgument("max_unit_size 不能为 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: AnalyzerConfig =
            serde_json::from_str(r#"{ "codec": "hevc", "model_batch_size": 8 }"#).unwrap();
        assert_eq!(cfg.codec, Some(Codec::Hevc));
        assert_eq!(cfg.model_batch_size, 8);
        assert_eq!(cfg.read_chunk_size, 64 * 1024);
        assert!(cfg.trace_fields);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = AnalyzerConfig {
            channel_capacity: 0,
            ..AnalyzerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(XiError::InvalidArgument(_))));
    }
}
