use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use tracing::{info, warn};

use super::chapter::Chapter;
use super::course::Course;
use crate::Error;

/// Read-only lookup surface the evaluator consumes. Missing entries are
/// `None`, never errors; callers aggregating over the catalog degrade to
/// zero/empty instead of failing.
pub trait CatalogProvider {
    fn course(&self, course_id: &str) -> Option<Course>;

    fn chapter(&self, course_id: &str, chapter_id: &str) -> Option<Chapter> {
        self.course(course_id)
            .and_then(|c| c.chapter(chapter_id).cloned())
    }
}

/// In-memory catalog keyed by course id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub courses: DashMap<String, Course>,
}

impl Catalog {
    pub fn new(courses: impl IntoIterator<Item = Course>) -> anyhow::Result<Self> {
        let catalog = Self::default();
        for course in courses {
            catalog.insert_course(course)?;
        }
        Ok(catalog)
    }

    pub fn insert_course(&self, mut course: Course) -> Result<(), Error> {
        if self.courses.contains_key(&course.id) {
            return Err(Error::Conflict(format!(
                "course {} already in catalog",
                course.id
            )));
        }
        course.normalize();
        if !course.total_lessons_consistent() {
            // stale denormalized count from the source; the evaluator
            // recounts, so accept and flag
            warn!(
                "course {}: total_lessons={} but counted {}",
                course.id,
                course.total_lessons,
                course.lesson_count()
            );
        }
        info!("catalog: added course {} - {}", course.id, course.title);
        self.courses.insert(course.id.clone(), course);
        Ok(())
    }

    pub fn get_course(&self, course_id: &str) -> Option<Ref<'_, String, Course>> {
        self.courses.get(course_id)
    }

    /// Published courses only, the set the student portal browses.
    pub fn published_courses(&self) -> Vec<Course> {
        let mut courses: Vec<Course> = self
            .courses
            .iter()
            .filter(|c| c.published)
            .map(|c| c.clone())
            .collect();
        courses.sort_by(|a, b| a.id.cmp(&b.id));
        courses
    }
}

impl CatalogProvider for Catalog {
    fn course(&self, course_id: &str) -> Option<Course> {
        self.courses.get(course_id).map(|c| c.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::course::tests::{chapter, course, section};

    #[test]
    fn duplicate_insert_conflicts() {
        let catalog = Catalog::default();
        catalog.insert_course(course("rust-101", vec![])).unwrap();
        let err = catalog
            .insert_course(course("rust-101", vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn chapter_lookup_degrades_to_none() {
        let catalog = Catalog::default();
        catalog
            .insert_course(course(
                "rust-101",
                vec![chapter("ch-a", 1, vec![section("s1", &["l1"])])],
            ))
            .unwrap();
        assert!(catalog.chapter("rust-101", "ch-a").is_some());
        assert!(catalog.chapter("rust-101", "ch-x").is_none());
        assert!(catalog.chapter("nope", "ch-a").is_none());
    }
}
