use anyhow::{bail, Result};
use language_tags::LanguageTag;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    /// 自动检测
    Auto,
    /// 简体中文
    Chinese,
    /// 英语
    English,
    /// 日语
    Japanese,
    /// 韩语
    Korean,
    /// 法语
    French,
    /// 俄语
    Russian,
    /// 德语
    German,
    /// 文言文
    Wenyanwen,
    /// 泰语
    Thai,
    /// 葡萄牙语
    Portuguese,
    /// 越南语
    Vietnamese,
    /// 意大利语
    Italian,
    /// 粤语
    ChineseYue,
    /// 西班牙语
    Spanish,
}

impl Default for Language {
    fn default() -> Self {
        Language::Auto
    }
}

impl Language {
    /// 首次使用时的源语言
    pub const DEFAULT_SOURCE: Language = Language::English;
    /// 首次使用时的目标语言
    pub const DEFAULT_TARGET: Language = Language::Chinese;

    pub const ALL: [Language; 15] = [
        Language::Auto,
        Language::Chinese,
        Language::English,
        Language::Japanese,
        Language::Korean,
        Language::French,
        Language::Russian,
        Language::German,
        Language::Wenyanwen,
        Language::Thai,
        Language::Portuguese,
        Language::Vietnamese,
        Language::Italian,
        Language::ChineseYue,
        Language::Spanish,
    ];

    /// 持久化用的稳定编号，历史记录里保存的就是它
    pub fn id(&self) -> u32 {
        Self::ALL
            .iter()
            .position(|l| l == self)
            .map(|i| i as u32)
            .unwrap_or(0)
    }

    pub fn from_id(id: u32) -> Option<Language> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Language::Auto)
    }

    /// BCP47 代码，`Auto` 返回 `auto`
    pub fn code(&self) -> &'static str {
        match self {
            Language::Auto => "auto",
            Language::Chinese => "zh-CN",
            Language::English => "en",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::French => "fr",
            Language::Russian => "ru",
            Language::German => "de",
            Language::Wenyanwen => "lzh",
            Language::Thai => "th",
            Language::Portuguese => "pt",
            Language::Vietnamese => "vi",
            Language::Italian => "it",
            Language::ChineseYue => "yue",
            Language::Spanish => "es",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Auto => "Auto",
            Language::Chinese => "Chinese",
            Language::English => "English",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::French => "French",
            Language::Russian => "Russian",
            Language::German => "German",
            Language::Wenyanwen => "Classical Chinese",
            Language::Thai => "Thai",
            Language::Portuguese => "Portuguese",
            Language::Vietnamese => "Vietnamese",
            Language::Italian => "Italian",
            Language::ChineseYue => "Cantonese",
            Language::Spanish => "Spanish",
        }
    }

    pub fn to_tag(&self) -> Option<LanguageTag> {
        if self.is_auto() {
            return None;
        }
        self.code().parse().ok()
    }
}

impl TryFrom<&LanguageTag> for Language {
    type Error = anyhow::Error;

    fn try_from(tag: &LanguageTag) -> Result<Self, Self::Error> {
        match tag.primary_language() {
            "zh" => Ok(Language::Chinese),
            "en" => Ok(Language::English),
            "ja" => Ok(Language::Japanese),
            "ko" => Ok(Language::Korean),
            "fr" => Ok(Language::French),
            "ru" => Ok(Language::Russian),
            "de" => Ok(Language::German),
            "lzh" => Ok(Language::Wenyanwen),
            "th" => Ok(Language::Thai),
            "pt" => Ok(Language::Portuguese),
            "vi" => Ok(Language::Vietnamese),
            "it" => Ok(Language::Italian),
            "yue" => Ok(Language::ChineseYue),
            "es" => Ok(Language::Spanish),
            other => bail!("Unsupported BCP47 language: {}", other),
        }
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[test]
fn test_language_ids_are_stable() {
    assert_eq!(Language::Auto.id(), 0);
    assert_eq!(Language::Chinese.id(), 1);
    assert_eq!(Language::Spanish.id(), 14);
    for lang in Language::ALL {
        assert_eq!(Language::from_id(lang.id()), Some(lang));
    }
    assert_eq!(Language::from_id(99), None);
}

#[test]
fn test_language_tag_conversion() -> Result<()> {
    assert!(Language::Auto.to_tag().is_none());

    let tag: LanguageTag = "zh-Hant-TW".parse()?;
    assert_eq!(Language::try_from(&tag)?, Language::Chinese);

    for lang in Language::ALL.iter().filter(|l| !l.is_auto()) {
        let tag = lang.to_tag().expect("every concrete language has a tag");
        assert_eq!(Language::try_from(&tag)?, *lang);
    }

    let unknown: LanguageTag = "sw".parse()?;
    assert!(Language::try_from(&unknown).is_err());
    Ok(())
}
