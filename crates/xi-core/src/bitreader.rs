//! 比特流读取器.
//!
//! 提供从 RBSP 字节缓冲区中按位读取语法元素的能力, 是所有语法解析器 (H.264, H.265,
//! MPEG-2 等) 的基础设施.
//!
//! 按大端位序读取 (MSB first). 带标签的读取方法 (`u`, `flag`, `ue`, `se`) 在挂接了
//! [`TraceSink`] 时会记录每个语法元素的名称、取值与位位置; 记录与否不影响读出的值.

use std::fmt;

use serde::Serialize;

use crate::{XiError, XiResult};

/// Exp-Golomb 前导零个数上限
///
/// 超过该值的码字无法用 32 位无符号整数表示, 视为损坏数据.
pub const MAX_EXP_GOLOMB_LEADING_ZEROS: u32 = 31;

/// 语法元素取值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// 无符号整数 (u(n), ue(v))
    Unsigned(u64),
    /// 有符号整数 (se(v), 派生值)
    Signed(i64),
    /// 标志位
    Flag(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Flag(v) => write!(f, "{}", u8::from(*v)),
        }
    }
}

/// 单条跟踪记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// 语法元素名称
    pub label: String,
    /// 读出的值
    pub value: FieldValue,
    /// 起始位偏移 (相对 RBSP 起点)
    pub bit_offset: usize,
    /// 占用位数
    pub bit_len: usize,
}

/// 跟踪接收器
///
/// 在构造 [`BitReader`] 时注入. 除 `record` 外的方法均有空实现, 平铺列表类接收器
/// 只需实现 `record`.
pub trait TraceSink {
    /// 记录一个已读取的语法元素
    fn record(&mut self, entry: TraceEntry);

    /// 进入一个语法结构 (如 `hrd_parameters()`)
    fn enter(&mut self, _name: &str) {}

    /// 离开当前语法结构
    fn exit(&mut self) {}

    /// 为最近一条记录附加说明 (如语义含义)
    fn annotate(&mut self, _text: &str) {}

    /// 记录不占用比特的派生值 (如 BitRate)
    fn derived(&mut self, _label: &str, _value: FieldValue) {}

    /// 记录读取失败的语法元素
    fn error(&mut self, _label: &str, _message: &str) {}
}

impl TraceSink for Vec<TraceEntry> {
    fn record(&mut self, entry: TraceEntry) {
        self.push(entry);
    }
}

/// 比特流读取器
///
/// 从字节缓冲区中按位读取数据, 使用大端位序 (MSB first). 读取永远不会越过缓冲区末尾,
/// 数据不足时返回 [`XiError::OutOfBits`].
///
/// # 示例
/// ```
/// use xi_core::bitreader::BitReader;
///
/// let data = [0b1011_1001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.read_bits(3).unwrap(), 0b001);
/// ```
pub struct BitReader<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前字节索引
    byte_pos: usize,
    /// 当前字节中的位位置 (0-7, 0 表示最高位)
    bit_pos: u8,
    /// 跟踪接收器
    sink: Option<&'a mut dyn TraceSink>,
    /// 最近一次读取失败的字段名
    failed_field: Option<String>,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器 (不跟踪)
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            sink: None,
            failed_field: None,
        }
    }

    /// 创建挂接跟踪接收器的读取器
    pub fn with_trace(data: &'a [u8], sink: &'a mut dyn TraceSink) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            sink: Some(sink),
            failed_field: None,
        }
    }

    /// 是否挂接了跟踪接收器
    pub fn is_tracing(&self) -> bool {
        self.sink.is_some()
    }

    /// 获取已读取的总位数
    pub fn bits_read(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// 获取剩余可读位数
    pub fn bits_left(&self) -> usize {
        if self.byte_pos >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_pos) * 8 - self.bit_pos as usize
    }

    /// 是否已到达末尾
    pub fn is_eof(&self) -> bool {
        self.bits_left() == 0
    }

    /// 是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// 最近一次带标签读取失败的字段名
    pub fn failed_field(&self) -> Option<&str> {
        self.failed_field.as_deref()
    }

    fn out_of_bits(&self, needed: usize) -> XiError {
        XiError::OutOfBits {
            needed,
            available: self.bits_left(),
        }
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> XiResult<u32> {
        if self.byte_pos >= self.data.len() {
            return Err(self.out_of_bits(1));
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos >= 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(u32::from(bit))
    }

    /// 读取 1 个位作为标志
    pub fn read_flag(&mut self) -> XiResult<bool> {
        Ok(self.read_bit()? != 0)
    }

    /// 读取 N 个位 (最多 32 位)
    ///
    /// 按大端位序读取, 返回值的低 N 位有效.
    pub fn read_bits(&mut self, n: u32) -> XiResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(XiError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(self.out_of_bits(n as usize));
        }

        let mut result: u32 = 0;
        let mut remaining = n;

        while remaining > 0 {
            let available = 8 - self.bit_pos as u32;
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_pos] >> shift) & mask;

            result = (result << to_read) | u32::from(bits);

            self.bit_pos += to_read as u8;
            if self.bit_pos >= 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
            remaining -= to_read;
        }

        Ok(result)
    }

    /// 读取 N 个位 (最多 64 位)
    pub fn read_bits_u64(&mut self, n: u32) -> XiResult<u64> {
        if n <= 32 {
            return self.read_bits(n).map(u64::from);
        }
        if n > 64 {
            return Err(XiError::InvalidArgument(format!(
                "read_bits_u64: n={} 超过 64 位",
                n,
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(self.out_of_bits(n as usize));
        }

        let high = u64::from(self.read_bits(n - 32)?);
        let low = u64::from(self.read_bits(32)?);
        Ok((high << 32) | low)
    }

    /// 读取无符号 Exp-Golomb 码 ue(v)
    ///
    /// 统计前导零个数 k, 再读取 k 位, 值为 `2^k - 1 + bits`.
    pub fn read_ue(&mut self) -> XiResult<u32> {
        let start = self.bits_read();
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > MAX_EXP_GOLOMB_LEADING_ZEROS {
                return Err(XiError::MalformedCode {
                    bit_offset: start,
                    leading_zeros: MAX_EXP_GOLOMB_LEADING_ZEROS,
                });
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        Ok(((1u64 << leading_zeros) - 1 + suffix) as u32)
    }

    /// 读取有符号 Exp-Golomb 码 se(v)
    ///
    /// 码号 k 映射为 `(-1)^(k+1) * ceil(k/2)`: 0, 1, -1, 2, -2, ...
    pub fn read_se(&mut self) -> XiResult<i32> {
        let code = u64::from(self.read_ue()?);
        if code & 1 == 1 {
            Ok(code.div_ceil(2) as i32)
        } else {
            Ok(-((code / 2) as i64) as i32)
        }
    }

    /// 窥视 N 个位 (不移动位置)
    pub fn peek_bits(&mut self, n: u32) -> XiResult<u32> {
        let saved_byte = self.byte_pos;
        let saved_bit = self.bit_pos;
        let result = self.read_bits(n);
        self.byte_pos = saved_byte;
        self.bit_pos = saved_bit;
        result
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: usize) -> XiResult<()> {
        if n > self.bits_left() {
            return Err(self.out_of_bits(n));
        }

        let total_bits = self.bit_pos as usize + n;
        self.byte_pos += total_bits / 8;
        self.bit_pos = (total_bits % 8) as u8;

        Ok(())
    }

    /// 对齐到下一个字节边界
    ///
    /// 如果当前已在字节边界, 则不做任何事.
    pub fn align_to_byte(&mut self) {
        if self.bit_pos > 0 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
    }

    /// 获取当前字节位置
    pub fn byte_position(&self) -> usize {
        self.byte_pos
    }

    /// 从当前位置读取原始字节切片
    ///
    /// 仅在字节对齐时可用.
    pub fn read_bytes(&mut self, n: usize) -> XiResult<&'a [u8]> {
        if self.bit_pos != 0 {
            return Err(XiError::InvalidArgument("read_bytes 需要字节对齐".into()));
        }

        let end = self.byte_pos + n;
        if end > self.data.len() {
            return Err(self.out_of_bits(n * 8));
        }

        let slice = &self.data[self.byte_pos..end];
        self.byte_pos = end;
        Ok(slice)
    }

    /// 获取底层数据的引用
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// 当前位置之后是否还有 RBSP 数据 (rbsp_trailing_bits 之前)
    ///
    /// 最后一个非零字节的最低置位是 rbsp_stop_one_bit, 其前面的位才算数据.
    pub fn more_rbsp_data(&self) -> bool {
        let Some(last) = self.data.iter().rposition(|&b| b != 0) else {
            return false;
        };
        let stop_bit = last * 8 + (7 - self.data[last].trailing_zeros() as usize);
        self.bits_read() < stop_bit
    }

    // ========================
    // 带标签的读取 (语法描述符)
    // ========================

    fn traced<T>(
        &mut self,
        label: &str,
        read: impl FnOnce(&mut Self) -> XiResult<T>,
        to_value: impl FnOnce(&T) -> FieldValue,
    ) -> XiResult<T> {
        let start = self.bits_read();
        match read(self) {
            Ok(v) => {
                let bit_len = self.bits_read() - start;
                if let Some(sink) = self.sink.as_deref_mut() {
                    sink.record(TraceEntry {
                        label: label.to_string(),
                        value: to_value(&v),
                        bit_offset: start,
                        bit_len,
                    });
                }
                Ok(v)
            }
            Err(e) => {
                if let Some(sink) = self.sink.as_deref_mut() {
                    sink.error(label, &e.to_string());
                }
                self.failed_field = Some(label.to_string());
                Err(e)
            }
        }
    }

    /// u(n): 读取 n 位无符号整数 (n <= 32)
    pub fn u(&mut self, label: &str, n: u32) -> XiResult<u32> {
        self.traced(label, |r| r.read_bits(n), |v| FieldValue::Unsigned(u64::from(*v)))
    }

    /// u(n): 读取 n 位无符号整数 (n <= 64)
    pub fn u64_bits(&mut self, label: &str, n: u32) -> XiResult<u64> {
        self.traced(label, |r| r.read_bits_u64(n), |v| FieldValue::Unsigned(*v))
    }

    /// u(1): 读取标志位
    pub fn flag(&mut self, label: &str) -> XiResult<bool> {
        self.traced(label, |r| r.read_flag(), |v| FieldValue::Flag(*v))
    }

    /// ue(v)
    pub fn ue(&mut self, label: &str) -> XiResult<u32> {
        self.traced(label, |r| r.read_ue(), |v| FieldValue::Unsigned(u64::from(*v)))
    }

    /// se(v)
    pub fn se(&mut self, label: &str) -> XiResult<i32> {
        self.traced(label, |r| r.read_se(), |v| FieldValue::Signed(i64::from(*v)))
    }

    /// 进入语法结构
    pub fn enter(&mut self, name: &str) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.enter(name);
        }
    }

    /// 离开语法结构
    pub fn exit(&mut self) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.exit();
        }
    }

    /// 为最近一条记录附加说明
    pub fn annotate(&mut self, text: &str) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.annotate(text);
        }
    }

    /// 记录派生值
    pub fn derive(&mut self, label: &str, value: FieldValue) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.derived(label, value);
        }
    }

    /// 检查取值范围, 超出时返回语法错误
    pub fn check_range(&mut self, label: &str, value: i64, min: i64, max: i64) -> XiResult<()> {
        if value < min || value > max {
            let message = format!("取值 {value} 超出范围 [{min}, {max}]");
            if let Some(sink) = self.sink.as_deref_mut() {
                sink.error(label, &message);
            }
            self.failed_field = Some(label.to_string());
            return Err(XiError::syntax(label, message));
        }
        Ok(())
    }

    /// 检查剩余位数能否容纳 `count` 个至少 `min_bits` 位的元素
    ///
    /// 用于在循环读取数组前拒绝明显越界的声明长度.
    pub fn ensure_bits_for(&mut self, label: &str, count: usize, min_bits: usize) -> XiResult<()> {
        let needed = count.saturating_mul(min_bits);
        if needed > self.bits_left() {
            let message = format!(
                "声明 {count} 个元素至少需要 {needed} 位, 剩余 {} 位",
                self.bits_left()
            );
            if let Some(sink) = self.sink.as_deref_mut() {
                sink.error(label, &message);
            }
            self.failed_field = Some(label.to_string());
            return Err(XiError::syntax(label, message));
        }
        Ok(())
    }
}
