//! 单元边界扫描与 RBSP 提取.
//!
//! # Annex B 格式
//!
//! Annex B 使用起始码 (start code) 分隔单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01` (多出的前导 0 属于前一单元的 trailing_zero_8bits)
//!
//! MPEG-2 视频使用相同的 `00 00 01` 前缀, 因此同一个扫描器适用于三种码流.
//!
//! # 长度前缀格式
//!
//! MP4/MKV 中的 AVC/HEVC 样本使用 1~4 字节大端长度前缀:
//! ```text
//! [length: N bytes BE] [NAL data: length bytes]
//! ```

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use xi_core::{XiError, XiResult};

/// 单元在输入缓冲区中的字节范围 (不含起始码)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    /// 起始偏移
    pub offset: usize,
    /// 长度
    pub len: usize,
}

impl ByteRange {
    /// 结束偏移 (不含)
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// 取出对应的字节切片
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.end()]
    }
}

/// 从 `from` 开始查找下一个 `00 00 01`, 返回第一个 0 的下标
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 2 < data.len() {
        // 第三个字节大于 1 时, 下一个候选至少从 i + 3 开始
        if data[i + 2] > 1 {
            i += 3;
        } else if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            return Some(i);
        } else {
            i += 1;
        }
    }
    None
}

/// 惰性起始码扫描器
///
/// 每次迭代返回一个单元的 [`ByteRange`]. 单元从起始码之后开始, 到下一个起始码之前
/// (去掉尾部的 0 字节) 或缓冲区末尾结束. 第一个起始码之前的字节被忽略, 空单元被跳过.
#[derive(Debug, Clone)]
pub struct StartCodeScanner<'a> {
    data: &'a [u8],
    /// 下一个单元载荷的起始位置
    next: Option<usize>,
}

impl<'a> StartCodeScanner<'a> {
    /// 创建扫描器, 每次调用都从缓冲区起点重新开始
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next: find_start_code(data, 0).map(|p| p + 3),
        }
    }
}

impl Iterator for StartCodeScanner<'_> {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        loop {
            let start = self.next?;
            let next_code = find_start_code(self.data, start);
            let mut end = next_code.unwrap_or(self.data.len());
            self.next = next_code.map(|p| p + 3);

            // 去除尾部的 0 字节 (trailing zeros)
            while end > start && self.data[end - 1] == 0x00 {
                end -= 1;
            }
            if end > start {
                return Some(ByteRange {
                    offset: start,
                    len: end - start,
                });
            }
        }
    }
}

/// 扫描 Annex B 缓冲区中的所有单元
///
/// 没有任何起始码时返回的迭代器为空, 由调用方决定是否报告扫描错误.
pub fn scan_units(data: &[u8]) -> StartCodeScanner<'_> {
    StartCodeScanner::new(data)
}

/// 移除 emulation prevention 字节, 得到 RBSP
///
/// 紧跟在两个连续 0x00 之后的 0x03 被丢弃.
pub fn extract_rbsp(payload: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(payload.len());
    let mut zeros = 0usize;
    for &b in payload {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0x00 { zeros + 1 } else { 0 };
        rbsp.push(b);
    }
    rbsp
}

/// 插入 emulation prevention 字节, 是 [`extract_rbsp`] 的逆操作
///
/// 两个连续 0x00 之后出现 0x00~0x03 时插入 0x03; 以两个 0x00 结尾时追加 0x03.
pub fn insert_emulation_prevention(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 1);
    let mut zeros = 0usize;
    for &b in rbsp {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if b == 0x00 { zeros + 1 } else { 0 };
        out.push(b);
    }
    if zeros >= 2 {
        out.push(0x03);
    }
    out
}

/// 从长度前缀数据中切分单元
///
/// `length_size` 为 1~4 (来自 avcC/hvcC 的 lengthSizeMinusOne + 1).
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> XiResult<Vec<ByteRange>> {
    if !(1..=4).contains(&length_size) {
        return Err(XiError::InvalidArgument(format!(
            "长度前缀字节数非法, length_size={}",
            length_size
        )));
    }

    let mut ranges = Vec::new();
    let mut pos = 0;
    while pos + length_size <= data.len() {
        let unit_len = BigEndian::read_uint(&data[pos..], length_size) as usize;
        pos += length_size;
        if unit_len > data.len() - pos {
            return Err(XiError::Scan(format!(
                "长度前缀声明 {} 字节, 剩余 {} 字节, offset={}",
                unit_len,
                data.len() - pos,
                pos - length_size
            )));
        }
        if unit_len > 0 {
            ranges.push(ByteRange {
                offset: pos,
                len: unit_len,
            });
        }
        pos += unit_len;
    }
    Ok(ranges)
}
