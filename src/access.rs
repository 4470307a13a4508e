//! Pure access and progress evaluation over catalog and ledger snapshots.
//!
//! Nothing here performs I/O or throws for absent data: missing lookups
//! degrade to `false` or zeroed progress so rendering code never has to
//! special-case a lookup. Access windows are time-sensitive, so callers pass
//! `now` explicitly and should evaluate against freshly fetched snapshots.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::catalog::chapter::Chapter;
use crate::catalog::course::Course;
use crate::ledger::{EnrolledCourse, StudentLedger};

/// What an access check is asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTarget<'a> {
    Course(&'a str),
    Chapter {
        course_id: &'a str,
        chapter_id: &'a str,
    },
    Book(&'a str),
}

/// True iff the student currently holds a valid entitlement for the target.
/// Course access subsumes every chapter of the course; book access is plain
/// ownership with no expiry.
pub fn has_access(ledger: &StudentLedger, target: AccessTarget<'_>, now: OffsetDateTime) -> bool {
    match target {
        AccessTarget::Course(course_id) => ledger
            .enrolled_courses
            .get(course_id)
            .is_some_and(|e| e.grants_access(now)),
        AccessTarget::Chapter {
            course_id,
            chapter_id,
        } => {
            ledger
                .enrolled_chapters
                .get(chapter_id)
                .is_some_and(|e| e.grants_access(now))
                || has_access(ledger, AccessTarget::Course(course_id), now)
        }
        AccessTarget::Book(book_id) => ledger.bought_books.contains_key(book_id),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Progress {
    pub watched: u32,
    pub total: u32,
    pub percentage: u8,
}

impl Progress {
    pub fn new(watched: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (100.0 * watched as f64 / total as f64).round() as u8
        } else {
            0
        };
        Progress {
            watched: watched as u32,
            total: total as u32,
            percentage,
        }
    }

    pub fn empty() -> Self {
        Progress::new(0, 0)
    }
}

/// Fraction of a course the enrollment has watched. Totals are recounted from
/// the catalog rather than read from the denormalized `total_lessons`;
/// watched ids not present in the chapter are inert.
pub fn course_progress(course: &Course, enrollment: &EnrolledCourse) -> Progress {
    let mut watched = 0;
    let mut total = 0;
    for chapter in &course.chapters {
        let lesson_ids: BTreeSet<&str> = chapter.lesson_ids().collect();
        total += lesson_ids.len();
        if let Some(set) = enrollment.watched_in_chapter(&chapter.id) {
            watched += set.iter().filter(|id| lesson_ids.contains(id.as_str())).count();
        }
    }
    Progress::new(watched, total)
}

/// Same formula restricted to one chapter's own sections.
pub fn chapter_progress(chapter: &Chapter, watched_lessons: &BTreeSet<String>) -> Progress {
    let lesson_ids: BTreeSet<&str> = chapter.lesson_ids().collect();
    let watched = watched_lessons
        .iter()
        .filter(|id| lesson_ids.contains(id.as_str()))
        .count();
    Progress::new(watched, lesson_ids.len())
}

/// Where "continue watching" should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NextLesson {
    pub chapter_id: String,
    pub section_id: String,
    pub lesson_id: String,
}

/// First lesson the enrollment has not watched, scanning chapters in position
/// order and lessons in array order. `None` when the course is fully watched
/// or empty.
pub fn next_unwatched(course: &Course, enrollment: &EnrolledCourse) -> Option<NextLesson> {
    for chapter in &course.chapters {
        let watched = enrollment.watched_in_chapter(&chapter.id);
        for section in &chapter.sections {
            for lesson in &section.lessons {
                if !watched.is_some_and(|w| w.contains(&lesson.id)) {
                    return Some(NextLesson {
                        chapter_id: chapter.id.clone(),
                        section_id: section.id.clone(),
                        lesson_id: lesson.id.clone(),
                    });
                }
            }
        }
    }
    None
}
