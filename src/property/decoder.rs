//! 内容解码器
//!
//! 将远程文本解码为有序的键值对。结构化格式（JSON/YAML/TOML）按
//! `a.b.c` 和 `list[0]` 的形式展平嵌套结构。

use crate::error::DecodeError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 解码后的键值对，保持文档中的出现顺序
pub type Properties = IndexMap<String, String>;

/// 内容格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyFormat {
    /// Java properties 格式
    #[default]
    Properties,
    /// JSON
    Json,
    /// YAML
    Yaml,
    /// TOML
    Toml,
}

impl PropertyFormat {
    /// 按资源名扩展名推断格式，无法识别时使用 properties
    pub fn from_resource_name(name: &str) -> Self {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "json" => PropertyFormat::Json,
            "yaml" | "yml" => PropertyFormat::Yaml,
            "toml" => PropertyFormat::Toml,
            _ => PropertyFormat::Properties,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PropertyFormat::Properties => "properties",
            PropertyFormat::Json => "json",
            PropertyFormat::Yaml => "yaml",
            PropertyFormat::Toml => "toml",
        }
    }

    /// 发布时声明给服务端的内容类型
    ///
    /// 服务端没有 toml 类型，按纯文本发布。
    pub fn content_type(&self) -> &'static str {
        match self {
            PropertyFormat::Toml => "text",
            other => other.name(),
        }
    }
}

impl FromStr for PropertyFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "properties" => Ok(PropertyFormat::Properties),
            "json" => Ok(PropertyFormat::Json),
            "yaml" | "yml" => Ok(PropertyFormat::Yaml),
            "toml" => Ok(PropertyFormat::Toml),
            other => Err(format!("不支持的内容格式: {other}")),
        }
    }
}

impl fmt::Display for PropertyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 内容解码器trait
pub trait PropertyDecoder: Send + Sync {
    /// 解码器处理的格式
    fn format(&self) -> PropertyFormat;

    /// 解码文本
    ///
    /// # 参数
    /// * `text` - 已按字符编码转换后的文本
    ///
    /// # 返回
    /// * `Result<Properties, DecodeError>` - 有序键值对
    fn decode(&self, text: &str) -> Result<Properties, DecodeError>;
}

/// 获取格式对应的内置解码器
pub fn decoder_for(format: PropertyFormat) -> Arc<dyn PropertyDecoder> {
    match format {
        PropertyFormat::Properties => Arc::new(PropertiesDecoder),
        PropertyFormat::Json => Arc::new(JsonDecoder),
        PropertyFormat::Yaml => Arc::new(YamlDecoder),
        PropertyFormat::Toml => Arc::new(TomlDecoder),
    }
}

fn syntax_error(format: PropertyFormat, reason: impl fmt::Display) -> DecodeError {
    DecodeError::Syntax {
        format: format.name().to_string(),
        reason: reason.to_string(),
    }
}

fn not_a_map(format: PropertyFormat) -> DecodeError {
    DecodeError::NotAMap {
        format: format.name().to_string(),
    }
}

fn child_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Java properties 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesDecoder;

impl PropertyDecoder for PropertiesDecoder {
    fn format(&self) -> PropertyFormat {
        PropertyFormat::Properties
    }

    fn decode(&self, text: &str) -> Result<Properties, DecodeError> {
        let mut properties = Properties::new();
        let mut lines = text.lines().enumerate();

        while let Some((index, line)) = lines.next() {
            let trimmed = line.trim_start_matches(is_properties_whitespace);
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                continue;
            }

            let mut logical = trimmed.to_string();
            while has_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => {
                        logical.push_str(next.trim_start_matches(is_properties_whitespace))
                    }
                    None => break,
                }
            }

            let (key, value) = split_key_value(&logical);
            let line_number = index + 1;
            properties.insert(unescape(key, line_number)?, unescape(value, line_number)?);
        }

        Ok(properties)
    }
}

fn is_properties_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{000c}')
}

/// 行尾有奇数个反斜杠时续行
fn has_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// 键在第一个未转义的 `=`、`:` 或空白处结束
fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();

    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                key_end = i;
                break;
            }
            c if is_properties_whitespace(c) => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let rest = line[key_end..].trim_start_matches(is_properties_whitespace);
    let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
    (key, rest.trim_start_matches(is_properties_whitespace))
}

fn unescape(raw: &str, line: usize) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{000c}'),
            Some('u') => {
                let high = read_code_unit(&mut chars, line)?;
                let code = if (0xD800..0xDC00).contains(&high) {
                    // 代理对的低位必须紧随其后
                    if chars.next() != Some('\\') || chars.next() != Some('u') {
                        return Err(invalid_escape(line, "代理对缺少低位"));
                    }
                    let low = read_code_unit(&mut chars, line)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(invalid_escape(line, "代理对低位无效"));
                    }
                    0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                } else {
                    high
                };
                let decoded =
                    char::from_u32(code).ok_or_else(|| invalid_escape(line, "无效的码点"))?;
                out.push(decoded);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    Ok(out)
}

fn read_code_unit(chars: &mut std::str::Chars<'_>, line: usize) -> Result<u32, DecodeError> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.chars().count() != 4 {
        return Err(invalid_escape(line, "\\u 后需要4位十六进制数"));
    }
    u32::from_str_radix(&hex, 16)
        .map_err(|_| invalid_escape(line, format!("\\u{hex} 不是十六进制数")))
}

fn invalid_escape(line: usize, reason: impl fmt::Display) -> DecodeError {
    syntax_error(PropertyFormat::Properties, format!("第 {line} 行: {reason}"))
}

/// JSON 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl PropertyDecoder for JsonDecoder {
    fn format(&self) -> PropertyFormat {
        PropertyFormat::Json
    }

    fn decode(&self, text: &str) -> Result<Properties, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| syntax_error(self.format(), e))?;
        let serde_json::Value::Object(root) = value else {
            return Err(not_a_map(self.format()));
        };

        let mut properties = Properties::new();
        for (key, child) in &root {
            flatten_json(key, child, &mut properties);
        }
        Ok(properties)
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, out: &mut Properties) {
    use serde_json::Value;

    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_json(&child_key(prefix, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(&format!("{prefix}[{i}]"), child, out);
            }
        }
        Value::Object(_) | Value::Array(_) | Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// YAML 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlDecoder;

impl PropertyDecoder for YamlDecoder {
    fn format(&self) -> PropertyFormat {
        PropertyFormat::Yaml
    }

    fn decode(&self, text: &str) -> Result<Properties, DecodeError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| syntax_error(self.format(), e))?;
        let serde_yaml::Value::Mapping(root) = value else {
            return Err(not_a_map(self.format()));
        };

        let mut properties = Properties::new();
        for (key, child) in &root {
            flatten_yaml(&yaml_scalar(key), child, &mut properties);
        }
        Ok(properties)
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    use serde_yaml::Value;

    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Tagged(tagged) => yaml_scalar(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => {
            serde_yaml::to_string(value).unwrap_or_default().trim().to_string()
        }
    }
}

fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut Properties) {
    use serde_yaml::Value;

    match value {
        Value::Mapping(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_yaml(&child_key(prefix, &yaml_scalar(key)), child, out);
            }
        }
        Value::Sequence(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_yaml(&format!("{prefix}[{i}]"), child, out);
            }
        }
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out),
        Value::Mapping(_) | Value::Sequence(_) => {
            out.insert(prefix.to_string(), String::new());
        }
        scalar => {
            out.insert(prefix.to_string(), yaml_scalar(scalar));
        }
    }
}

/// TOML 解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlDecoder;

impl PropertyDecoder for TomlDecoder {
    fn format(&self) -> PropertyFormat {
        PropertyFormat::Toml
    }

    fn decode(&self, text: &str) -> Result<Properties, DecodeError> {
        let table: toml::Table = text.parse().map_err(|e| syntax_error(self.format(), e))?;

        let mut properties = Properties::new();
        for (key, value) in &table {
            flatten_toml(key, value, &mut properties);
        }
        Ok(properties)
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut Properties) {
    use toml::Value;

    match value {
        Value::Table(table) if !table.is_empty() => {
            for (key, child) in table {
                flatten_toml(&child_key(prefix, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_toml(&format!("{prefix}[{i}]"), child, out);
            }
        }
        Value::Table(_) | Value::Array(_) => {
            out.insert(prefix.to_string(), String::new());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Integer(i) => {
            out.insert(prefix.to_string(), i.to_string());
        }
        Value::Float(f) => {
            out.insert(prefix.to_string(), f.to_string());
        }
        Value::Boolean(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Datetime(dt) => {
            out.insert(prefix.to_string(), dt.to_string());
        }
    }
}
