//! 流式 Annex B 单元读取.
//!
//! 按块读取输入, 跨块边界查找起始码, 逐个返回单元负载. 单元的边界规则与
//! [`xi_bitstream::scan_units`] 相同: 负载尾部的 0 字节不属于该单元, 空单元被跳过.
//!
//! 单元缓冲不超过 `max_unit_size`: 超出部分读过即丢弃, 只记录单元的实际长度.

use std::io::Read;

use xi_bitstream::scan::find_start_code;
use xi_core::XiResult;

/// 读取到的一个单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadUnit {
    /// 负载在输入中的偏移
    pub offset: u64,
    /// 负载, 最多 `max_unit_size` 字节
    pub payload: Vec<u8>,
    /// 负载的实际长度
    pub len: u64,
}

impl ReadUnit {
    /// 负载是否因超过上限而被截断
    pub fn is_truncated(&self) -> bool {
        self.len > self.payload.len() as u64
    }
}

/// 超过上限的单元: 已保留的开头与已丢弃的字节数
#[derive(Debug)]
struct Oversized {
    offset: u64,
    head: Vec<u8>,
    skipped: u64,
}

/// 从 [`Read`] 中逐个读取单元
pub struct AnnexBReader<R> {
    inner: R,
    buf: Vec<u8>,
    /// buf[0] 在输入中的偏移
    base: u64,
    /// 当前单元负载在 buf 中的起点
    unit_start: Option<usize>,
    /// 下次查找起始码的位置
    scan_from: usize,
    chunk_size: usize,
    max_unit_size: usize,
    oversized: Option<Oversized>,
    eof: bool,
    /// 已返回单元覆盖到的输入位置
    position: u64,
}

impl<R: Read> AnnexBReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            base: 0,
            unit_start: None,
            scan_from: 0,
            chunk_size: chunk_size.max(4),
            max_unit_size: usize::MAX,
            oversized: None,
            eof: false,
            position: 0,
        }
    }

    /// 设置单元负载的保留上限
    pub fn with_max_unit_size(mut self, max: usize) -> Self {
        self.max_unit_size = max.max(1);
        self
    }

    /// 已处理到的输入字节位置, 用于计算进度
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 读取下一个单元
    ///
    /// 第一个起始码之前的字节被忽略. 只有 I/O 错误会返回 Err.
    pub fn next_unit(&mut self) -> XiResult<Option<ReadUnit>> {
        loop {
            let Some(start) = self.unit_start else {
                match find_start_code(&self.buf, self.scan_from) {
                    Some(p) => {
                        self.unit_start = Some(p + 3);
                        self.scan_from = p + 3;
                    }
                    None if self.eof => {
                        self.position = self.base + self.buf.len() as u64;
                        return Ok(None);
                    }
                    None => {
                        // 保留末尾 2 字节, 它们可能是被块边界切开的起始码
                        let keep_from = self.buf.len().saturating_sub(2);
                        self.discard_before(keep_from);
                        self.fill()?;
                    }
                }
                continue;
            };

            match find_start_code(&self.buf, self.scan_from.max(start)) {
                Some(p) => {
                    self.unit_start = Some(p + 3);
                    self.scan_from = p + 3;
                    self.position = self.base + p as u64;
                    if let Some(unit) = self.take(start, p) {
                        return Ok(Some(unit));
                    }
                }
                None if self.eof => {
                    let end = self.buf.len();
                    self.unit_start = None;
                    self.scan_from = end;
                    self.position = self.base + end as u64;
                    if let Some(unit) = self.take(start, end) {
                        return Ok(Some(unit));
                    }
                }
                None => {
                    self.scan_from = self.buf.len().saturating_sub(2).max(start);
                    if self.buf.len() - start > self.max_unit_size {
                        self.spill(start);
                    } else {
                        self.discard_before(start);
                    }
                    self.fill()?;
                }
            }
        }
    }

    /// 取出 buf[start..end], 去掉尾部 0 字节; 空单元返回 None
    fn take(&mut self, start: usize, end: usize) -> Option<ReadUnit> {
        let mut end = end;
        while end > start && self.buf[end - 1] == 0x00 {
            end -= 1;
        }
        let tail = &self.buf[start..end];
        let (offset, mut payload, skipped) = match self.oversized.take() {
            Some(over) => (over.offset, over.head, over.skipped),
            None if tail.is_empty() => return None,
            None => (self.base + start as u64, Vec::new(), 0),
        };
        let room = self.max_unit_size.saturating_sub(payload.len());
        payload.extend_from_slice(&tail[..tail.len().min(room)]);
        Some(ReadUnit {
            offset,
            payload,
            len: skipped + tail.len() as u64,
        })
    }

    /// 当前单元超过上限: 保留开头, 丢弃 buf 中除末尾 2 字节外的其余部分
    fn spill(&mut self, start: usize) {
        let keep_from = self.buf.len().saturating_sub(2).max(start);
        let offset = self.base + start as u64;
        let over = self.oversized.get_or_insert_with(|| Oversized {
            offset,
            head: Vec::new(),
            skipped: 0,
        });
        let room = self.max_unit_size.saturating_sub(over.head.len());
        let kept = room.min(keep_from - start);
        over.head.extend_from_slice(&self.buf[start..start + kept]);
        over.skipped += (keep_from - start) as u64;
        self.unit_start = Some(keep_from);
        self.discard_before(keep_from);
    }

    /// 丢弃 buf 中 `at` 之前的字节并调整下标
    fn discard_before(&mut self, at: usize) {
        if at == 0 {
            return;
        }
        self.buf.drain(..at);
        self.base += at as u64;
        self.scan_from = self.scan_from.saturating_sub(at);
        if let Some(start) = self.unit_start.as_mut() {
            *start -= at;
        }
    }

    fn fill(&mut self) -> XiResult<()> {
        let old_len = self.buf.len();
        self.buf.resize(old_len + self.chunk_size, 0);
        let n = loop {
            match self.inner.read(&mut self.buf[old_len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old_len);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(old_len + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}
