use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lesson running time in seconds. Catalog sources record durations either as
/// a bare second count or as a `mm:ss` clock string; both forms deserialize,
/// serialization always emits seconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "DurationRepr", into = "u64")]
pub struct LessonDuration(u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Seconds(u64),
    Clock(String),
}

impl LessonDuration {
    pub fn from_seconds(seconds: u64) -> Self {
        LessonDuration(seconds)
    }

    pub fn as_seconds(&self) -> u64 {
        self.0
    }
}

impl From<LessonDuration> for u64 {
    fn from(d: LessonDuration) -> Self {
        d.0
    }
}

impl TryFrom<DurationRepr> for LessonDuration {
    type Error = String;

    fn try_from(repr: DurationRepr) -> Result<Self, Self::Error> {
        match repr {
            DurationRepr::Seconds(s) => Ok(LessonDuration(s)),
            DurationRepr::Clock(s) => s.parse().map_err(|e| format!("{e}")),
        }
    }
}

impl FromStr for LessonDuration {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((min, sec)) = s.split_once(':') {
            let min: u64 = min
                .parse()
                .map_err(|_| crate::Error::Validation(format!("bad duration: {s}")))?;
            let sec: u64 = sec
                .parse()
                .map_err(|_| crate::Error::Validation(format!("bad duration: {s}")))?;
            if sec >= 60 {
                return Err(crate::Error::Validation(format!(
                    "seconds out of range in duration: {s}"
                )));
            }
            Ok(LessonDuration(min * 60 + sec))
        } else {
            let sec: u64 = s
                .parse()
                .map_err(|_| crate::Error::Validation(format!("bad duration: {s}")))?;
            Ok(LessonDuration(sec))
        }
    }
}

impl fmt::Display for LessonDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// A single playable unit. Completion is never stored here, it lives in the
/// student's ledger; a lesson object joined to a specific student may carry a
/// transient `completed` flag in view DTOs only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    #[schema(value_type = u64)]
    pub duration: LessonDuration,
}

/// Ordered group of lessons. Array order is the lesson order, there is no
/// explicit position field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Chapter {
    pub id: String,
    /// 1-based ordering within the course.
    pub position: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    /// Standalone pricing; a chapter may be purchased independently of its
    /// course.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pricing: Option<super::course::Pricing>,
}

impl Chapter {
    pub fn lesson_count(&self) -> usize {
        self.sections.iter().map(|s| s.lessons.len()).sum()
    }

    /// All lesson ids in display order (section order, then array order).
    pub fn lesson_ids(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.lessons.iter().map(|l| l.id.as_str()))
    }

    pub fn total_duration(&self) -> LessonDuration {
        LessonDuration::from_seconds(
            self.sections
                .iter()
                .flat_map(|s| &s.lessons)
                .map(|l| l.duration.as_seconds())
                .sum(),
        )
    }
}
