//! 进度状态文本.

/// 根据进度与终止错误生成状态栏文本
///
/// `progress` 为 -1 表示没有选择输入. `error` 非空时优先显示错误.
pub fn status_text(progress: i32, error: Option<&str>) -> String {
    if let Some(e) = error.filter(|e| !e.is_empty()) {
        return format!("Error parsing the file: {e}");
    }
    match progress {
        p if p < 0 => "No bitstream file selected.".to_string(),
        p if p >= 100 => "Parsing done.".to_string(),
        p => format!("Parsing file ({p}%)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(-1, None), "No bitstream file selected.");
        assert_eq!(status_text(0, None), "Parsing file (0%)");
        assert_eq!(status_text(42, Some("")), "Parsing file (42%)");
        assert_eq!(status_text(100, None), "Parsing done.");
        assert_eq!(
            status_text(37, Some("I/O 错误: 拒绝访问")),
            "Error parsing the file: I/O 错误: 拒绝访问"
        );
    }
}
