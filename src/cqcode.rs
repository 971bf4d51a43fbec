//! CQ 码编解码
//!
//! `[CQ:type,key=value,...]` 形式的旧版消息编码。参数值中的 `&` `[` `]` `,`
//! 使用 HTML 实体转义，纯文本部分只转义前三个。

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::message::Segment;

static CQ_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[CQ:([A-Za-z0-9_]+)((?:,[A-Za-z0-9_]+=[^,\]]*)*)\]")
        .expect("CQ 码正则无效")
});

/// 一次匹配的结果
#[derive(Debug, Clone, PartialEq)]
pub struct CqMatch {
    pub segment: Segment,
    /// 匹配在原文中的字节偏移
    pub start: usize,
    /// 匹配的字节长度
    pub len: usize,
}

/// 解析输入：CQ 字符串或已分段的消息
#[derive(Debug, Clone, Copy)]
pub enum CqSource<'a> {
    Text(&'a str),
    Segments(&'a [Segment]),
}

impl<'a> From<&'a str> for CqSource<'a> {
    fn from(text: &'a str) -> Self {
        CqSource::Text(text)
    }
}

impl<'a> From<&'a String> for CqSource<'a> {
    fn from(text: &'a String) -> Self {
        CqSource::Text(text)
    }
}

impl<'a> From<&'a [Segment]> for CqSource<'a> {
    fn from(segments: &'a [Segment]) -> Self {
        CqSource::Segments(segments)
    }
}

impl<'a> From<&'a Vec<Segment>> for CqSource<'a> {
    fn from(segments: &'a Vec<Segment>) -> Self {
        CqSource::Segments(segments)
    }
}

// U+1F300..U+1F64F, U+1F680..U+1F6FF, U+2600..U+2B55
fn is_stripped_emoji(c: char) -> bool {
    matches!(c, '\u{1F300}'..='\u{1F64F}' | '\u{1F680}'..='\u{1F6FF}' | '\u{2600}'..='\u{2B55}')
}

/// 转义
///
/// `inline` 为 true 时用于参数值：额外转义逗号，并把常见 emoji 替换为空格。
pub fn escape(text: &str, inline: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '[' => out.push_str("&#91;"),
            ']' => out.push_str("&#93;"),
            ',' if inline => out.push_str("&#44;"),
            c if inline && is_stripped_emoji(c) => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// 反转义，`&amp;` 最后处理
pub fn unescape(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

/// 查找第一个 CQ 码
pub fn parse_one(text: &str) -> Option<CqMatch> {
    let caps = CQ_PATTERN.captures(text)?;
    let whole = caps.get(0)?;
    let kind = caps.get(1)?.as_str();

    let mut data = Map::new();
    if let Some(attrs) = caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        for pair in attrs[1..].split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                data.insert(key.to_string(), Value::from(unescape(value)));
            }
        }
    }

    Some(CqMatch {
        segment: Segment::new(kind, data),
        start: whole.start(),
        len: whole.len(),
    })
}

/// 把 CQ 字符串切分为消息段
pub fn parse_str(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(found) = parse_one(rest) {
        if found.start > 0 {
            segments.push(Segment::text(unescape(&rest[..found.start])));
        }
        segments.push(found.segment);
        rest = &rest[found.start + found.len..];
    }

    if !rest.is_empty() {
        segments.push(Segment::text(unescape(rest)));
    }
    segments
}

/// 规范化已分段的消息：文本段只保留文本内容，其余原样保留
pub fn parse_segments(list: &[Segment]) -> Vec<Segment> {
    list.iter()
        .map(|seg| {
            if seg.is_text() {
                Segment::text(seg.attr("text").unwrap_or_default())
            } else {
                seg.clone()
            }
        })
        .collect()
}

pub fn parse_all<'a>(source: impl Into<CqSource<'a>>) -> Vec<Segment> {
    match source.into() {
        CqSource::Text(text) => parse_str(text),
        CqSource::Segments(list) => parse_segments(list),
    }
}

/// 解析线上的 `message` 字段：字符串或消息段数组，其它形态视为空消息
pub fn parse_value(value: &Value) -> Vec<Segment> {
    match value {
        Value::String(text) => parse_str(text),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<Segment>(item.clone()).ok())
            .map(|seg| {
                if seg.is_text() {
                    Segment::text(seg.attr("text").unwrap_or_default())
                } else {
                    seg
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// 把消息段编码为 CQ 字符串
pub fn stringify(segments: &[Segment]) -> String {
    let mut out = String::new();
    for seg in segments {
        if seg.is_text() {
            out.push_str(&escape(&seg.text_content().unwrap_or_default(), false));
            continue;
        }

        out.push_str("[CQ:");
        out.push_str(&seg.kind);
        for (key, value) in &seg.data {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            out.push(',');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape(&value, true));
        }
        out.push(']');
    }
    out
}
