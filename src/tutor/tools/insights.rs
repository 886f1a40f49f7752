use async_trait::async_trait;
use serde_json::{json, Value};

use crate::i18n;
use crate::tutor::tools::profile::{has_activity, round1, subject_json};
use crate::tutor::tools::{store_failure, ToolContext, ToolOutcome, TutorTool};

pub struct GetLearningInsights;

#[async_trait]
impl TutorTool for GetLearningInsights {
    fn name(&self) -> &'static str {
        "get_learning_insights"
    }

    fn description(&self) -> &'static str {
        "Summarise the student's overall learning: completed lessons, homework average, pending work, strongest and weakest subjects."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _params: Value) -> ToolOutcome {
        let student_id = ctx.student.student_id.clone();
        let grade = ctx.student.grade_level;
        let loaded = ctx
            .store
            .run_blocking(move |store| {
                let summary = store.progress_summary(student_id.as_str(), grade)?;
                let mistakes = store.list_mistakes(student_id.as_str(), None, 50)?;
                Ok((summary, mistakes.len()))
            })
            .await;
        let (summary, recent_mistakes) = match loaded {
            Ok(v) => v,
            Err(error) => return store_failure(self.name(), error),
        };

        let lang = ctx.student.language;
        let mut active = summary
            .subjects
            .iter()
            .filter(|s| has_activity(s))
            .collect::<Vec<_>>();
        active.sort_by(|a, b| b.mastery().total_cmp(&a.mastery()));
        let strongest = active.first().copied();
        let weakest = if active.len() > 1 {
            active.last().copied()
        } else {
            None
        };

        let subject_name = |s: &crate::db::learning::SubjectScore| {
            i18n::resolve(lang, s.name_ar.as_str(), s.name_en.as_str(), "")
        };
        let average_text = summary
            .homework_average
            .map(|avg| format!("{}%", round1(avg)))
            .unwrap_or_else(|| ctx.student.text("لا توجد درجات بعد", "no grades yet"));
        let mut summary_text = ctx.student.text(
            format!(
                "أكملت {} درسًا من أصل {}. متوسط درجات الواجبات: {}. الواجبات المتبقية: {}.",
                summary.lessons_completed,
                summary.lessons_total,
                average_text,
                summary.homework_pending
            )
            .as_str(),
            format!(
                "Completed {} of {} lessons. Homework average: {}. Pending homework: {}.",
                summary.lessons_completed,
                summary.lessons_total,
                average_text,
                summary.homework_pending
            )
            .as_str(),
        );
        if let Some(best) = strongest {
            summary_text.push(' ');
            summary_text.push_str(
                ctx.student
                    .text(
                        format!("أقوى مادة: {}.", subject_name(best)).as_str(),
                        format!("Strongest subject: {}.", subject_name(best)).as_str(),
                    )
                    .as_str(),
            );
        }
        if let Some(worst) = weakest {
            summary_text.push(' ');
            summary_text.push_str(
                ctx.student
                    .text(
                        format!("تحتاج إلى مزيد من التدريب في: {}.", subject_name(worst)).as_str(),
                        format!("Needs more practice in: {}.", subject_name(worst)).as_str(),
                    )
                    .as_str(),
            );
        }

        ToolOutcome::ok(json!({
            "lessons_completed": summary.lessons_completed,
            "lessons_total": summary.lessons_total,
            "lessons_in_progress": summary.lessons_in_progress,
            "homework_average": summary.homework_average.map(round1),
            "homework_pending": summary.homework_pending,
            "homework_graded": summary.homework_graded,
            "recent_mistakes": recent_mistakes,
            "strongest_subject": strongest.map(|s| subject_json(lang, s)),
            "weakest_subject": weakest.map(|s| subject_json(lang, s)),
            "last_activity_at": summary.last_activity_at,
            "summary": summary_text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::db::learning::LessonProgressInput;
    use crate::i18n::Language;
    use crate::tutor::tools::test_support::fixture;

    use super::*;

    #[tokio::test]
    async fn insights_name_strongest_and_weakest_subjects() {
        let fx = fixture(Language::En);
        for (lesson, percent) in [(&fx.addition_id, 100), (&fx.plants_id, 30)] {
            fx.store
                .record_lesson_progress(LessonProgressInput {
                    student_id: fx.student.student_id.clone(),
                    lesson_id: lesson.clone(),
                    progress_percent: percent,
                })
                .expect("progress");
        }
        let out = GetLearningInsights
            .execute(&fx.ctx(), json!({}))
            .await
            .into_planner_value();
        assert_eq!(out["strongest_subject"]["name"], "Mathematics");
        assert_eq!(out["weakest_subject"]["name"], "Science");
        let text = out["summary"].as_str().unwrap_or_default();
        assert!(text.starts_with("Completed 1 of 2 lessons."));
        assert!(text.contains("no grades yet"));
    }

    #[tokio::test]
    async fn insights_summary_is_arabic_for_arabic_students() {
        let fx = fixture(Language::Ar);
        let out = GetLearningInsights
            .execute(&fx.ctx(), json!({}))
            .await
            .into_planner_value();
        assert!(out["summary"].as_str().unwrap_or_default().starts_with("أكملت 0"));
        assert!(out["strongest_subject"].is_null());
    }
}
