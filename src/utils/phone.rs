use regex::Regex;
use std::sync::OnceLock;

fn e164_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+\d{8,15}$").unwrap())
}

/// 归一化为可投递的 E.164 号码；无法归一化返回 None（该接收人不参与短信）
///
/// 裸 10 位号码按默认国家码 +91 处理（部署目标市场）
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let candidate = if trimmed.starts_with('+') {
        format!("+{digits}")
    } else if digits.len() == 10 {
        format!("+91{digits}")
    } else if digits.len() == 12 && digits.starts_with("91") {
        format!("+{digits}")
    } else {
        return None;
    };

    if e164_regex().is_match(&candidate) {
        Some(candidate)
    } else {
        None
    }
}
