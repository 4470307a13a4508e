use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::chapter::Chapter;

/// The closed set of purchase tiers the portal offers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Tier {
    #[serde(rename = "1")]
    OneMonth,
    #[serde(rename = "3")]
    ThreeMonths,
    #[serde(rename = "10")]
    TenMonths,
    #[serde(rename = "lifetime")]
    Lifetime,
}

impl Tier {
    /// Month count for temporary tiers, `None` for lifetime.
    pub fn months(&self) -> Option<u32> {
        match self {
            Tier::OneMonth => Some(1),
            Tier::ThreeMonths => Some(3),
            Tier::TenMonths => Some(10),
            Tier::Lifetime => None,
        }
    }

    /// Access window end for a purchase starting at `start`. Months are
    /// billed as 30-day blocks.
    pub fn end_at_from(&self, start: OffsetDateTime) -> Option<OffsetDateTime> {
        self.months()
            .map(|m| start + time::Duration::days(30 * m as i64))
    }
}

/// Price (minor currency units) per offered tier; a missing field means the
/// tier is not offered for this item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Pricing {
    #[serde(rename = "1", skip_serializing_if = "Option::is_none", default)]
    pub one_month: Option<u32>,
    #[serde(rename = "3", skip_serializing_if = "Option::is_none", default)]
    pub three_months: Option<u32>,
    #[serde(rename = "10", skip_serializing_if = "Option::is_none", default)]
    pub ten_months: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lifetime: Option<u32>,
}

impl Pricing {
    pub fn price(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::OneMonth => self.one_month,
            Tier::ThreeMonths => self.three_months,
            Tier::TenMonths => self.ten_months,
            Tier::Lifetime => self.lifetime,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    /// Denormalized lesson count carried by the catalog source. Must equal
    /// `lesson_count()`; the evaluator recomputes rather than trusting it.
    pub total_lessons: u32,
    #[serde(default)]
    pub pricing: Pricing,
    #[serde(default)]
    pub published: bool,
}

impl Course {
    /// Recomputed lesson count across all chapters and sections.
    pub fn lesson_count(&self) -> usize {
        self.chapters.iter().map(|ch| ch.lesson_count()).sum()
    }

    pub fn total_lessons_consistent(&self) -> bool {
        self.lesson_count() == self.total_lessons as usize
    }

    /// Sort chapters into ascending position order. Catalog sources are
    /// expected to deliver them sorted already; this makes it an invariant.
    pub fn normalize(&mut self) {
        self.chapters.sort_by_key(|ch| ch.position);
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|ch| ch.id == chapter_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::chapter::{Lesson, LessonDuration, Section};

    pub(crate) fn lesson(id: &str) -> Lesson {
        Lesson {
            id: id.to_string(),
            title: format!("Lesson {id}"),
            duration: LessonDuration::from_seconds(300),
        }
    }

    pub(crate) fn section(id: &str, lessons: &[&str]) -> Section {
        Section {
            id: id.to_string(),
            title: format!("Section {id}"),
            lessons: lessons.iter().map(|l| lesson(l)).collect(),
        }
    }

    pub(crate) fn chapter(id: &str, position: u32, sections: Vec<Section>) -> Chapter {
        Chapter {
            id: id.to_string(),
            position,
            title: format!("Chapter {id}"),
            description: None,
            sections,
            pricing: None,
        }
    }

    pub(crate) fn course(id: &str, chapters: Vec<Chapter>) -> Course {
        let mut course = Course {
            id: id.to_string(),
            title: format!("Course {id}"),
            description: None,
            total_lessons: chapters.iter().map(|c| c.lesson_count() as u32).sum(),
            chapters,
            pricing: Pricing {
                one_month: Some(900),
                three_months: Some(2400),
                ten_months: Some(6900),
                lifetime: Some(9900),
            },
            published: true,
        };
        course.normalize();
        course
    }

    #[test]
    fn total_lessons_invariant() {
        let c = course(
            "rust-101",
            vec![
                chapter("ch-a", 1, vec![section("s1", &["l1", "l2", "l3"])]),
                chapter("ch-b", 2, vec![section("s2", &["l4", "l5"])]),
            ],
        );
        assert_eq!(c.lesson_count(), 5);
        assert!(c.total_lessons_consistent());

        let mut broken = c.clone();
        broken.total_lessons = 7;
        assert!(!broken.total_lessons_consistent());
    }

    #[test]
    fn normalize_orders_chapters_by_position() {
        let mut c = course(
            "rust-101",
            vec![
                chapter("ch-b", 2, vec![]),
                chapter("ch-a", 1, vec![]),
                chapter("ch-c", 3, vec![]),
            ],
        );
        c.normalize();
        let ids: Vec<&str> = c.chapters.iter().map(|ch| ch.id.as_str()).collect();
        assert_eq!(ids, ["ch-a", "ch-b", "ch-c"]);
    }

    #[test]
    fn tier_windows() {
        let start = time::macros::datetime!(2026-01-01 0:00 UTC);
        assert_eq!(
            Tier::ThreeMonths.end_at_from(start),
            Some(start + time::Duration::days(90))
        );
        assert_eq!(Tier::Lifetime.end_at_from(start), None);
    }
}
