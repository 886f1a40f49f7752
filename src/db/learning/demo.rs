use serde::Serialize;

use super::{
    ContentBlockInput, LearningRepoError, LearningStore, LessonProgressInput, UpsertLessonInput,
    UpsertProfileInput, UpsertSubjectInput,
};

pub const DEMO_STUDENT_ID: &str = "demo-student";

struct DemoLesson {
    id: &'static str,
    subject: &'static str,
    title_en: &'static str,
    title_ar: &'static str,
    description_en: &'static str,
    description_ar: &'static str,
    sort_order: i64,
    blocks: &'static [(&'static str, &'static str)],
}

const DEMO_SUBJECTS: &[(&str, &str, &str, &str)] = &[
    ("demo-subject-math", "math", "Mathematics", "الرياضيات"),
    ("demo-subject-science", "science", "Science", "العلوم"),
    ("demo-subject-english", "english", "English", "اللغة الإنجليزية"),
    ("demo-subject-arabic", "arabic", "Arabic", "اللغة العربية"),
];

const DEMO_LESSONS: &[DemoLesson] = &[
    DemoLesson {
        id: "demo-lesson-addition",
        subject: "demo-subject-math",
        title_en: "Addition within 100",
        title_ar: "الجمع ضمن ١٠٠",
        description_en: "Adding two-digit numbers with and without regrouping.",
        description_ar: "جمع الأعداد المكونة من رقمين مع إعادة التجميع وبدونها.",
        sort_order: 1,
        blocks: &[
            (
                "To add 23 and 45, add the tens first: 20 + 40 = 60. Then add the ones: 3 + 5 = 8. The answer is 68.",
                "لجمع ٢٣ و٤٥ نجمع العشرات أولًا: ٢٠ + ٤٠ = ٦٠. ثم نجمع الآحاد: ٣ + ٥ = ٨. الناتج ٦٨.",
            ),
            (
                "When the ones add up to 10 or more, carry one ten to the tens column.",
                "عندما يكون مجموع الآحاد ١٠ أو أكثر ننقل عشرة واحدة إلى خانة العشرات.",
            ),
        ],
    },
    DemoLesson {
        id: "demo-lesson-subtraction",
        subject: "demo-subject-math",
        title_en: "Subtraction within 100",
        title_ar: "الطرح ضمن ١٠٠",
        description_en: "Taking away two-digit numbers.",
        description_ar: "طرح الأعداد المكونة من رقمين.",
        sort_order: 2,
        blocks: &[(
            "To subtract, start with the ones. If the top digit is smaller, borrow one ten.",
            "للطرح نبدأ بالآحاد. إذا كان الرقم العلوي أصغر نستلف عشرة واحدة.",
        )],
    },
    DemoLesson {
        id: "demo-lesson-plants",
        subject: "demo-subject-science",
        title_en: "How plants grow",
        title_ar: "كيف تنمو النباتات",
        description_en: "Seeds need water, sunlight and soil to grow.",
        description_ar: "تحتاج البذور إلى الماء وضوء الشمس والتربة لتنمو.",
        sort_order: 1,
        blocks: &[(
            "Plants make their own food from sunlight. This is called photosynthesis.",
            "تصنع النباتات غذاءها بنفسها من ضوء الشمس، وتسمى هذه العملية البناء الضوئي.",
        )],
    },
    DemoLesson {
        id: "demo-lesson-animals",
        subject: "demo-subject-english",
        title_en: "Animal words",
        title_ar: "كلمات الحيوانات",
        description_en: "Reading and spelling common animal names.",
        description_ar: "قراءة أسماء الحيوانات الشائعة وتهجئتها.",
        sort_order: 1,
        blocks: &[(
            "A cat says meow. A dog says woof. A cow says moo.",
            "القطة تقول مياو. الكلب يقول هاو. البقرة تقول مو.",
        )],
    },
    DemoLesson {
        id: "demo-lesson-letters",
        subject: "demo-subject-arabic",
        title_en: "Sun and moon letters",
        title_ar: "الحروف الشمسية والقمرية",
        description_en: "How the definite article is pronounced.",
        description_ar: "كيف تُنطق أل التعريف.",
        sort_order: 1,
        blocks: &[(
            "With moon letters the lam is pronounced; with sun letters it is silent.",
            "مع الحروف القمرية تُنطق اللام، ومع الحروف الشمسية لا تُنطق.",
        )],
    },
];

/// What `seed_demo` created.
#[derive(Debug, Clone, Serialize)]
pub struct DemoSeed {
    pub student_id: String,
    pub subject_ids: Vec<String>,
    pub lesson_ids: Vec<String>,
}

impl LearningStore {
    /// Demo catalog plus one grade-3 Arabic-speaking student. Safe to run again.
    pub fn seed_demo(&self) -> Result<DemoSeed, LearningRepoError> {
        let mut subject_ids = Vec::with_capacity(DEMO_SUBJECTS.len());
        for (id, slug, name_en, name_ar) in DEMO_SUBJECTS {
            let subject = self.upsert_subject(UpsertSubjectInput {
                id: Some((*id).to_string()),
                slug: (*slug).to_string(),
                name_en: (*name_en).to_string(),
                name_ar: (*name_ar).to_string(),
            })?;
            subject_ids.push(subject.id);
        }

        let mut lesson_ids = Vec::with_capacity(DEMO_LESSONS.len());
        for lesson in DEMO_LESSONS {
            let record = self.upsert_lesson(UpsertLessonInput {
                id: Some(lesson.id.to_string()),
                subject_id: lesson.subject.to_string(),
                title_en: lesson.title_en.to_string(),
                title_ar: lesson.title_ar.to_string(),
                description_en: Some(lesson.description_en.to_string()),
                description_ar: Some(lesson.description_ar.to_string()),
                grade_level: Some(3),
                sort_order: Some(lesson.sort_order),
                duration_minutes: Some(20),
            })?;
            if self.lesson_content_source(record.id.as_str())?.blocks.is_empty() {
                for (body_en, body_ar) in lesson.blocks {
                    self.append_content_block(ContentBlockInput {
                        lesson_id: record.id.clone(),
                        body_en: (*body_en).to_string(),
                        body_ar: (*body_ar).to_string(),
                    })?;
                }
            }
            lesson_ids.push(record.id);
        }

        let student = self.upsert_profile(UpsertProfileInput {
            id: Some(String::from(DEMO_STUDENT_ID)),
            full_name: String::from("Layla Hassan"),
            full_name_ar: Some(String::from("ليلى حسن")),
            grade_level: Some(3),
            preferred_language: Some(String::from("ar")),
            role: Some(String::from("student")),
        })?;
        self.record_lesson_progress(LessonProgressInput {
            student_id: student.id.clone(),
            lesson_id: String::from("demo-lesson-addition"),
            progress_percent: 100,
        })?;
        self.record_lesson_progress(LessonProgressInput {
            student_id: student.id.clone(),
            lesson_id: String::from("demo-lesson-plants"),
            progress_percent: 40,
        })?;

        Ok(DemoSeed {
            student_id: student.id,
            subject_ids,
            lesson_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::learning::test_support::temp_store;

    #[test]
    fn seeding_twice_keeps_one_copy_of_everything() {
        let store = temp_store();
        let first = store.seed_demo().expect("seed");
        let second = store.seed_demo().expect("reseed");
        assert_eq!(first.lesson_ids, second.lesson_ids);
        assert_eq!(store.list_subjects().expect("subjects").len(), 4);
        let source = store
            .lesson_content_source("demo-lesson-addition")
            .expect("content");
        assert_eq!(source.blocks.len(), 2);
        let summary = store
            .progress_summary(first.student_id.as_str(), Some(3))
            .expect("summary");
        assert_eq!(summary.lessons_completed, 1);
    }
}
