use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ar,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ar => "ar",
            Self::En => "en",
        }
    }

    /// Lenient parse: accepts tags like `en-US` or `AR`.
    pub fn parse(value: &str) -> Option<Self> {
        let primary = value.trim().split(['-', '_']).next()?.to_ascii_lowercase();
        match primary.as_str() {
            "ar" => Some(Self::Ar),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ar => "Arabic (العربية)",
            Self::En => "English",
        }
    }

    /// Picks the variant for this language.
    pub fn pick<'a>(self, ar: &'a str, en: &'a str) -> &'a str {
        match self {
            Self::Ar => ar,
            Self::En => en,
        }
    }
}

/// Preferred field if non-empty, else the other language, else `fallback`.
pub fn resolve(preferred: Language, ar: &str, en: &str, fallback: &str) -> String {
    let (first, second) = match preferred {
        Language::Ar => (ar, en),
        Language::En => (en, ar),
    };
    [first, second]
        .into_iter()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub fn resolve_opt(preferred: Language, ar: Option<&str>, en: Option<&str>) -> String {
    resolve(preferred, ar.unwrap_or(""), en.unwrap_or(""), "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_language_wins_when_present() {
        assert_eq!(resolve(Language::Ar, "الكسور", "Fractions", ""), "الكسور");
        assert_eq!(resolve(Language::En, "الكسور", "Fractions", ""), "Fractions");
    }

    #[test]
    fn falls_back_to_other_language_then_fallback() {
        assert_eq!(resolve(Language::Ar, "  ", "Fractions", "?"), "Fractions");
        assert_eq!(resolve(Language::En, "الكسور", "", "?"), "الكسور");
        assert_eq!(resolve(Language::En, "", "", "untitled"), "untitled");
        assert_eq!(resolve_opt(Language::Ar, None, None), "");
    }

    #[test]
    fn resolve_is_non_empty_whenever_either_side_is() {
        let samples = ["", " ", "a", "ب"];
        for ar in samples {
            for en in samples {
                for pref in [Language::Ar, Language::En] {
                    let out = resolve(pref, ar, en, "");
                    let any = !ar.trim().is_empty() || !en.trim().is_empty();
                    assert_eq!(!out.is_empty(), any, "pref={pref:?} ar={ar:?} en={en:?}");
                }
            }
        }
    }

    #[test]
    fn parse_accepts_region_tags() {
        assert_eq!(Language::parse("en-US"), Some(Language::En));
        assert_eq!(Language::parse("AR"), Some(Language::Ar));
        assert_eq!(Language::parse("fr"), None);
    }
}
