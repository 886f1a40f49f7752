use crate::db::learning::ProfileRecord;
use crate::i18n::{self, Language};

/// Identity and turn-scoped facts threaded into every tool and log call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentContext {
    pub student_id: String,
    pub full_name: String,
    pub full_name_ar: String,
    pub grade_level: Option<i64>,
    pub language: Language,
    pub conversation_id: Option<String>,
    pub last_user_message: Option<String>,
}

impl StudentContext {
    pub fn from_profile(profile: &ProfileRecord, language: Language) -> Self {
        Self {
            student_id: profile.id.clone(),
            full_name: profile.full_name.clone(),
            full_name_ar: profile.full_name_ar.clone(),
            grade_level: profile.grade_level,
            language,
            conversation_id: None,
            last_user_message: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_last_user_message(mut self, text: impl Into<String>) -> Self {
        self.last_user_message = Some(text.into());
        self
    }

    pub fn display_name(&self) -> String {
        i18n::resolve(
            self.language,
            self.full_name_ar.as_str(),
            self.full_name.as_str(),
            "",
        )
    }

    /// Pick `ar`/`en` variant for this student's language.
    pub fn text(&self, ar: &str, en: &str) -> String {
        i18n::resolve(self.language, ar, en, "")
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }
}

#[cfg(test)]
pub(crate) fn test_context(student_id: &str, language: Language) -> StudentContext {
    StudentContext {
        student_id: student_id.to_string(),
        full_name: String::from("Test Student"),
        full_name_ar: String::from("طالب تجريبي"),
        grade_level: Some(3),
        language,
        conversation_id: None,
        last_user_message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_follows_language() {
        let ar = test_context("s1", Language::Ar);
        assert_eq!(ar.display_name(), "طالب تجريبي");
        let en = test_context("s1", Language::En);
        assert_eq!(en.display_name(), "Test Student");
    }
}
