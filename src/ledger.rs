use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::Error;
use crate::utils::now_local;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Valid only until `end_at`. Ordered below lifetime: lifetime dominates.
    Temporary,
    Lifetime,
}

/// What an enrollment hands out: the access mode plus, for temporary access,
/// the end of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGrant {
    pub access_type: AccessType,
    pub end_at: Option<OffsetDateTime>,
}

impl AccessGrant {
    pub fn lifetime() -> Self {
        AccessGrant {
            access_type: AccessType::Lifetime,
            end_at: None,
        }
    }

    pub fn temporary(end_at: OffsetDateTime) -> Self {
        AccessGrant {
            access_type: AccessType::Temporary,
            end_at: Some(end_at),
        }
    }

    fn validated(self) -> Result<Self, Error> {
        match self.access_type {
            AccessType::Temporary if self.end_at.is_none() => Err(Error::Validation(
                "temporary access requires an end date".into(),
            )),
            // lifetime never expires, drop a stray end date
            AccessType::Lifetime => Ok(AccessGrant {
                end_at: None,
                ..self
            }),
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledCourse {
    pub course_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    /// Absent means lifetime.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub end_at: Option<OffsetDateTime>,
    pub access_type: AccessType,
    /// Watched lesson ids per chapter id. Ids pointing outside the catalog
    /// are inert, the ledger needs no referential cleanup.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub progress: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledChapter {
    pub course_id: String,
    pub chapter_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub end_at: Option<OffsetDateTime>,
    pub access_type: AccessType,
    /// Flat set, the chapter itself is the unit of enrollment.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub watched_lessons: BTreeSet<String>,
}

/// Books are binary owned/not-owned, no progress concept.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BoughtBook {
    pub book_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub purchased_at: OffsetDateTime,
}

/// Expiry is evaluated at read time; expired entries stay in the ledger.
fn grants_access(access_type: AccessType, end_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match access_type {
        AccessType::Lifetime => true,
        AccessType::Temporary => end_at.is_some_and(|end| end > now),
    }
}

impl EnrolledCourse {
    pub fn grants_access(&self, now: OffsetDateTime) -> bool {
        grants_access(self.access_type, self.end_at, now)
    }

    pub fn watched_in_chapter(&self, chapter_id: &str) -> Option<&BTreeSet<String>> {
        self.progress.get(chapter_id)
    }
}

impl EnrolledChapter {
    pub fn grants_access(&self, now: OffsetDateTime) -> bool {
        grants_access(self.access_type, self.end_at, now)
    }
}

/// Per-student aggregate of everything granted, keyed by natural id. A second
/// enroll on the same key replaces in place, never appends a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentLedger {
    pub student_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub enrolled_courses: BTreeMap<String, EnrolledCourse>,
    /// Keyed by chapter id; chapter ids are unique across the catalog.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub enrolled_chapters: BTreeMap<String, EnrolledChapter>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub bought_books: BTreeMap<String, BoughtBook>,
}

impl StudentLedger {
    pub fn new(student_id: impl Into<String>) -> Self {
        StudentLedger {
            student_id: student_id.into(),
            enrolled_courses: BTreeMap::new(),
            enrolled_chapters: BTreeMap::new(),
            bought_books: BTreeMap::new(),
        }
    }

    /// Enroll into a course. Conflicts when a still-valid entitlement of
    /// equal or stronger access already exists; an expired temporary entry
    /// does not block re-enrollment. Watched history always survives the
    /// replacement.
    pub fn enroll_course(
        &mut self,
        course_id: &str,
        grant: AccessGrant,
        now: OffsetDateTime,
    ) -> Result<(), Error> {
        let grant = grant.validated()?;
        if let Some(existing) = self.enrolled_courses.get(course_id) {
            if existing.grants_access(now) && existing.access_type >= grant.access_type {
                return Err(Error::Conflict(format!(
                    "already enrolled in course {course_id}"
                )));
            }
        }
        let progress = self
            .enrolled_courses
            .remove(course_id)
            .map(|e| e.progress)
            .unwrap_or_default();
        self.enrolled_courses.insert(
            course_id.to_string(),
            EnrolledCourse {
                course_id: course_id.to_string(),
                enrolled_at: now,
                end_at: grant.end_at,
                access_type: grant.access_type,
                progress,
            },
        );
        Ok(())
    }

    pub fn enroll_chapter(
        &mut self,
        course_id: &str,
        chapter_id: &str,
        grant: AccessGrant,
        now: OffsetDateTime,
    ) -> Result<(), Error> {
        let grant = grant.validated()?;
        if let Some(existing) = self.enrolled_chapters.get(chapter_id) {
            if existing.grants_access(now) && existing.access_type >= grant.access_type {
                return Err(Error::Conflict(format!(
                    "already enrolled in chapter {chapter_id}"
                )));
            }
        }
        let watched_lessons = self
            .enrolled_chapters
            .remove(chapter_id)
            .map(|e| e.watched_lessons)
            .unwrap_or_default();
        self.enrolled_chapters.insert(
            chapter_id.to_string(),
            EnrolledChapter {
                course_id: course_id.to_string(),
                chapter_id: chapter_id.to_string(),
                enrolled_at: now,
                end_at: grant.end_at,
                access_type: grant.access_type,
                watched_lessons,
            },
        );
        Ok(())
    }

    pub fn purchase_book(&mut self, book_id: &str, now: OffsetDateTime) -> Result<(), Error> {
        if self.bought_books.contains_key(book_id) {
            return Err(Error::Conflict(format!("book {book_id} already owned")));
        }
        self.bought_books.insert(
            book_id.to_string(),
            BoughtBook {
                book_id: book_id.to_string(),
                purchased_at: now,
            },
        );
        Ok(())
    }

    /// Record a watched lesson into every matching ledger entry (course- and
    /// chapter-level enrollments are additive). Idempotent; silently no-ops
    /// when the student holds neither entry, access gating for viewing is an
    /// earlier, separate check. Returns whether anything new was recorded.
    pub fn mark_lesson_completed(
        &mut self,
        course_id: &str,
        chapter_id: &str,
        lesson_id: &str,
    ) -> bool {
        let mut inserted = false;
        if let Some(course) = self.enrolled_courses.get_mut(course_id) {
            inserted |= course
                .progress
                .entry(chapter_id.to_string())
                .or_default()
                .insert(lesson_id.to_string());
        }
        if let Some(chapter) = self.enrolled_chapters.get_mut(chapter_id) {
            inserted |= chapter.watched_lessons.insert(lesson_id.to_string());
        }
        inserted
    }
}

/// Persistence contract for student ledgers. Enroll/purchase/watch must be
/// atomic upserts; the enroll and purchase conflict rules mirror
/// [`StudentLedger`]'s in-place operations.
#[allow(async_fn_in_trait)]
pub trait LedgerStore: Send + Sync {
    async fn student(&self, student_id: &str) -> Result<StudentLedger, Error>;

    async fn enroll_course(
        &self,
        student_id: &str,
        course_id: &str,
        grant: AccessGrant,
    ) -> Result<(), Error>;

    async fn enroll_chapter(
        &self,
        student_id: &str,
        course_id: &str,
        chapter_id: &str,
        grant: AccessGrant,
    ) -> Result<(), Error>;

    async fn purchase_book(&self, student_id: &str, book_id: &str) -> Result<(), Error>;

    async fn record_lesson_watched(
        &self,
        student_id: &str,
        course_id: &str,
        chapter_id: &str,
        lesson_id: &str,
    ) -> Result<bool, Error>;
}

/// In-memory ledger store. Per-entry locking through the map shards gives the
/// atomic-upsert contract.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    students: DashMap<String, StudentLedger>,
}

impl MemoryLedger {
    pub fn with_students(students: impl IntoIterator<Item = StudentLedger>) -> Self {
        let ledger = Self::default();
        for s in students {
            ledger.students.insert(s.student_id.clone(), s);
        }
        ledger
    }
}

impl LedgerStore for MemoryLedger {
    async fn student(&self, student_id: &str) -> Result<StudentLedger, Error> {
        self.students
            .get(student_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::not_found("student", student_id))
    }

    async fn enroll_course(
        &self,
        student_id: &str,
        course_id: &str,
        grant: AccessGrant,
    ) -> Result<(), Error> {
        let mut student = self
            .students
            .entry(student_id.to_string())
            .or_insert_with(|| StudentLedger::new(student_id));
        student.enroll_course(course_id, grant, now_local())?;
        info!("student {student_id} enrolled in course {course_id}");
        Ok(())
    }

    async fn enroll_chapter(
        &self,
        student_id: &str,
        course_id: &str,
        chapter_id: &str,
        grant: AccessGrant,
    ) -> Result<(), Error> {
        let mut student = self
            .students
            .entry(student_id.to_string())
            .or_insert_with(|| StudentLedger::new(student_id));
        student.enroll_chapter(course_id, chapter_id, grant, now_local())?;
        info!("student {student_id} enrolled in chapter {chapter_id}");
        Ok(())
    }

    async fn purchase_book(&self, student_id: &str, book_id: &str) -> Result<(), Error> {
        let mut student = self
            .students
            .entry(student_id.to_string())
            .or_insert_with(|| StudentLedger::new(student_id));
        student.purchase_book(book_id, now_local())?;
        info!("student {student_id} bought book {book_id}");
        Ok(())
    }

    async fn record_lesson_watched(
        &self,
        student_id: &str,
        course_id: &str,
        chapter_id: &str,
        lesson_id: &str,
    ) -> Result<bool, Error> {
        match self.students.get_mut(student_id) {
            Some(mut student) => Ok(student.mark_lesson_completed(course_id, chapter_id, lesson_id)),
            // unknown student: defensive no-op, same as an unknown lesson
            None => Ok(false),
        }
    }
}
