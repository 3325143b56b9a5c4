//! 语法树.
//!
//! 每个 NAL 单元解析后得到一棵 [`SyntaxNode`] 树: 子节点按语法顺序排列, 由父节点按值
//! 持有. 树由 [`SyntaxTreeBuilder`] 在解析过程中通过 [`TraceSink`] 回调逐步构建.

use std::fmt;

use serde::Serialize;
use xi_core::bitreader::{FieldValue, TraceEntry, TraceSink};

/// 语法节点取值
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SyntaxValue {
    /// 无符号整数
    Unsigned(u64),
    /// 有符号整数
    Signed(i64),
    /// 标志位
    Flag(bool),
    /// 文本标签 (如 NAL 类型名)
    Text(String),
}

impl From<FieldValue> for SyntaxValue {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Unsigned(v) => Self::Unsigned(v),
            FieldValue::Signed(v) => Self::Signed(v),
            FieldValue::Flag(v) => Self::Flag(v),
        }
    }
}

impl fmt::Display for SyntaxValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Flag(v) => write!(f, "{}", u8::from(*v)),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// 位范围 (相对 RBSP 起点)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitSpan {
    pub offset: usize,
    pub len: usize,
}

/// 语法树节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxNode {
    /// 语法元素或结构名
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<SyntaxValue>,
    /// 说明 (语义含义、取值范围提示等)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<BitSpan>,
    /// 该节点 (或其子树) 解析失败
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    /// 创建结构节点
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            annotation: None,
            bits: None,
            error: false,
            children: Vec::new(),
        }
    }

    /// 创建叶子节点
    pub fn leaf(name: impl Into<String>, value: SyntaxValue) -> Self {
        Self {
            value: Some(value),
            ..Self::new(name)
        }
    }

    /// 设置说明
    pub fn with_annotation(mut self, text: impl Into<String>) -> Self {
        self.annotation = Some(text.into());
        self
    }

    /// 追加子节点
    pub fn push(&mut self, child: SyntaxNode) {
        self.children.push(child);
    }

    /// 深度优先查找第一个同名节点
    pub fn find(&self, name: &str) -> Option<&SyntaxNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// 深度优先查找所有同名节点
    pub fn find_all<'a>(&'a self, name: &str, out: &mut Vec<&'a SyntaxNode>) {
        if self.name == name {
            out.push(self);
        }
        for c in &self.children {
            c.find_all(name, out);
        }
    }

    /// 查找字段的无符号值
    pub fn uint(&self, name: &str) -> Option<u64> {
        match self.find(name)?.value.as_ref()? {
            SyntaxValue::Unsigned(v) => Some(*v),
            SyntaxValue::Flag(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    /// 子树节点总数 (含自身)
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SyntaxNode::node_count).sum::<usize>()
    }

    /// 子树中是否存在错误节点
    pub fn has_error(&self) -> bool {
        self.error || self.children.iter().any(SyntaxNode::has_error)
    }

    /// 以缩进文本形式写出子树
    ///
    /// `max_depth` 为 `None` 时不限深度.
    pub fn write_tree(
        &self,
        out: &mut impl fmt::Write,
        depth: usize,
        max_depth: Option<usize>,
    ) -> fmt::Result {
        if max_depth.is_some_and(|m| depth > m) {
            return Ok(());
        }
        write!(out, "{:indent$}{}", "", self.name, indent = depth * 2)?;
        if let Some(v) = &self.value {
            write!(out, " = {v}")?;
        }
        if let Some(a) = &self.annotation {
            write!(out, "  ({a})")?;
        }
        if self.error {
            write!(out, "  [错误]")?;
        }
        writeln!(out)?;
        for c in &self.children {
            c.write_tree(out, depth + 1, max_depth)?;
        }
        Ok(())
    }
}

/// 语法树构建器
///
/// 作为 [`TraceSink`] 注入 `BitReader`. 解析中途失败时, 尚未关闭的结构在
/// [`finish`](Self::finish) 时自动收拢, 得到带错误标记的部分树.
#[derive(Debug)]
pub struct SyntaxTreeBuilder {
    stack: Vec<SyntaxNode>,
}

impl SyntaxTreeBuilder {
    /// 以根节点名创建
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            stack: vec![SyntaxNode::new(root)],
        }
    }

    fn top(&mut self) -> &mut SyntaxNode {
        // 栈底的根节点永不弹出
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    /// 直接追加一个已构建的子节点
    pub fn push_node(&mut self, node: SyntaxNode) {
        self.top().push(node);
    }

    /// 标记当前打开的所有结构为错误
    pub fn mark_error(&mut self, message: &str) {
        for node in &mut self.stack {
            node.error = true;
        }
        if self.stack.len() == 1 && self.stack[0].annotation.is_none() {
            self.stack[0].annotation = Some(message.to_string());
        }
    }

    /// 收拢所有打开的结构, 返回根节点
    pub fn finish(mut self) -> SyntaxNode {
        while self.stack.len() > 1 {
            if let Some(node) = self.stack.pop() {
                self.top().push(node);
            }
        }
        self.stack.pop().unwrap_or_else(|| SyntaxNode::new("?"))
    }
}

impl TraceSink for SyntaxTreeBuilder {
    fn record(&mut self, entry: TraceEntry) {
        let node = SyntaxNode {
            bits: Some(BitSpan {
                offset: entry.bit_offset,
                len: entry.bit_len,
            }),
            ..SyntaxNode::leaf(entry.label, entry.value.into())
        };
        self.top().push(node);
    }

    fn enter(&mut self, name: &str) {
        self.stack.push(SyntaxNode::new(name));
    }

    fn exit(&mut self) {
        if self.stack.len() > 1 {
            if let Some(node) = self.stack.pop() {
                self.top().push(node);
            }
        }
    }

    fn annotate(&mut self, text: &str) {
        let top = self.top();
        match top.children.last_mut() {
            Some(last) => last.annotation = Some(text.to_string()),
            None => top.annotation = Some(text.to_string()),
        }
    }

    fn derived(&mut self, label: &str, value: FieldValue) {
        self.top()
            .push(SyntaxNode::leaf(label, value.into()).with_annotation("派生值"));
    }

    fn error(&mut self, label: &str, message: &str) {
        let mut node = SyntaxNode::new(label).with_annotation(message);
        node.error = true;
        self.top().push(node);
        for open in &mut self.stack {
            open.error = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xi_core::BitReader;

    #[test]
    fn test_builder_nesting_order() {
        let data = [0b1010_0000];
        let mut builder = SyntaxTreeBuilder::new("nal_unit");
        {
            let mut r = BitReader::with_trace(&data, &mut builder);
            r.flag("a").unwrap();
            r.enter("inner()");
            r.flag("b").unwrap();
            r.annotate("说明");
            r.exit();
            r.flag("c").unwrap();
        }
        let root = builder.finish();
        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "inner()", "c"], "子节点应按语法顺序排列");
        let inner = &root.children[1];
        assert_eq!(inner.children[0].value, Some(SyntaxValue::Flag(false)));
        assert_eq!(inner.children[0].annotation.as_deref(), Some("说明"));
        assert_eq!(root.children[2].bits, Some(BitSpan { offset: 2, len: 1 }));
    }

    #[test]
    fn test_builder_partial_tree_on_error() {
        let data = [0xFF];
        let mut builder = SyntaxTreeBuilder::new("sps");
        {
            let mut r = BitReader::with_trace(&data, &mut builder);
            r.u("profile_idc", 4).unwrap();
            r.enter("vui_parameters()");
            assert!(r.u("time_scale", 32).is_err());
        }
        let root = builder.finish();
        assert!(root.error, "根节点应被标记为错误");
        let vui = root.find("vui_parameters()").expect("未关闭的结构应被收拢");
        assert!(vui.error);
        assert!(root.find("time_scale").is_some_and(|n| n.error));
        assert_eq!(root.uint("profile_idc"), Some(15), "失败前的字段应保留");
    }

    #[test]
    fn test_write_tree_depth_limit() {
        let mut root = SyntaxNode::new("root");
        let mut child = SyntaxNode::new("child");
        child.push(SyntaxNode::leaf("x", SyntaxValue::Unsigned(3)));
        root.push(child);
        let mut full = String::new();
        root.write_tree(&mut full, 0, None).unwrap();
        assert_eq!(full, "root\n  child\n    x = 3\n");
        let mut limited = String::new();
        root.write_tree(&mut limited, 0, Some(1)).unwrap();
        assert_eq!(limited, "root\n  child\n");
        assert_eq!(root.node_count(), 3);
    }
}
