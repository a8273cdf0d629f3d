//! 配置内容与字符编码
//!
//! 远程拉取到的原始字节、内容指纹和修订号

use crate::error::{ConfigError, DecodeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支持的字符编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Charset {
    /// UTF-8（默认）
    #[default]
    Utf8,
    /// US-ASCII
    Ascii,
    /// ISO-8859-1
    Latin1,
}

impl Charset {
    /// 标准名称
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Ascii => "US-ASCII",
            Charset::Latin1 => "ISO-8859-1",
        }
    }

    /// 将原始字节解码为文本
    pub fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::Charset {
                charset: self.name().to_string(),
                reason: e.to_string(),
            }),
            Charset::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(DecodeError::Charset {
                        charset: self.name().to_string(),
                        reason: format!("位置 {} 处出现非 ASCII 字节 0x{:02x}", pos, bytes[pos]),
                    });
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// 将文本编码为字节
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, DecodeError> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Ascii | Charset::Latin1 => {
                let limit = if *self == Charset::Ascii { 0x7f } else { 0xff };
                text.chars()
                    .map(|c| {
                        let code = c as u32;
                        if code <= limit {
                            Ok(code as u8)
                        } else {
                            Err(DecodeError::Charset {
                                charset: self.name().to_string(),
                                reason: format!("字符 {c:?} 无法编码"),
                            })
                        }
                    })
                    .collect()
            }
        }
    }
}

impl FromStr for Charset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Charset::Utf8),
            "US-ASCII" | "ASCII" => Ok(Charset::Ascii),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Charset::Latin1),
            _ => Err(ConfigError::UnsupportedCharset(s.to_string())),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 远程配置内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigContent {
    /// 原始字节
    data: Vec<u8>,
    /// 内容指纹（md5 十六进制）
    md5: String,
    /// 服务端声明的内容类型（json、properties、text ...）
    content_type: Option<String>,
    /// 修订号，数值越大越新
    revision: i64,
    /// 拉取时间
    fetched_at: DateTime<Utc>,
}

impl ConfigContent {
    /// 创建新的配置内容，md5 按原始字节计算
    pub fn new(data: impl Into<Vec<u8>>, revision: i64) -> Self {
        let data = data.into();
        let md5 = digest(&data);
        Self {
            data,
            md5,
            content_type: None,
            revision,
            fetched_at: Utc::now(),
        }
    }

    /// 设置服务端返回的 md5
    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        let md5 = md5.into();
        if !md5.trim().is_empty() {
            self.md5 = md5.trim().to_ascii_lowercase();
        }
        self
    }

    /// 设置内容类型
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// 内容是否为空白（所有字节都是 ASCII 空白）
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(u8::is_ascii_whitespace)
    }

    /// 按指定编码转换为文本
    pub fn text(&self, charset: Charset) -> Result<String, DecodeError> {
        charset.decode(&self.data)
    }
}

/// 计算内容指纹
pub fn digest(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// 一次拉取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 找到配置
    Found(ConfigContent),
    /// 坐标下没有配置
    NotFound,
}

impl FetchOutcome {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchOutcome::NotFound)
    }

    /// 取出可用内容，空白内容视同不存在
    pub fn into_usable(self) -> Option<ConfigContent> {
        match self {
            FetchOutcome::Found(content) if !content.is_blank() => Some(content),
            _ => None,
        }
    }
}

impl From<Option<ConfigContent>> for FetchOutcome {
    fn from(value: Option<ConfigContent>) -> Self {
        match value {
            Some(content) => FetchOutcome::Found(content),
            None => FetchOutcome::NotFound,
        }
    }
}
