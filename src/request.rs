use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::Error;
use crate::catalog::course::Tier;
use crate::ledger::{AccessGrant, AccessType, LedgerStore};
use crate::utils::now_local;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Approved and rejected are terminal; a new request must be submitted
    /// instead of re-opening.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Approved | RequestStatus::Rejected)
    }
}

/// What the student is asking for. Closed set, matched exhaustively; adding a
/// variant must break every match site at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestTarget {
    #[serde(rename_all = "camelCase")]
    Course {
        course_id: String,
        // wire format keeps the historical misspelling
        #[serde(rename = "accesType")]
        access_type: AccessType,
        #[serde(
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none",
            default
        )]
        access_until: Option<OffsetDateTime>,
    },
    #[serde(rename_all = "camelCase")]
    Chapter {
        course_id: String,
        chapter_id: String,
        #[serde(rename = "accesType")]
        access_type: AccessType,
        #[serde(
            with = "time::serde::rfc3339::option",
            skip_serializing_if = "Option::is_none",
            default
        )]
        access_until: Option<OffsetDateTime>,
    },
    #[serde(rename_all = "camelCase")]
    Book { book_id: String },
}

impl RequestTarget {
    pub fn type_name(&self) -> &'static str {
        match self {
            RequestTarget::Course { .. } => "course",
            RequestTarget::Chapter { .. } => "chapter",
            RequestTarget::Book { .. } => "book",
        }
    }

    /// Id of the entity being requested (chapter id for chapter requests).
    pub fn target_id(&self) -> &str {
        match self {
            RequestTarget::Course { course_id, .. } => course_id,
            RequestTarget::Chapter { chapter_id, .. } => chapter_id,
            RequestTarget::Book { book_id } => book_id,
        }
    }
}

/// Student-initiated, admin-adjudicated ask for an entitlement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: String,
    pub student_id: String,
    pub title: String,
    pub status: RequestStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub reviewed_at: Option<OffsetDateTime>,
    pub price: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
    /// Populated only on rejection.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub target: RequestTarget,
}

/// Everything the student supplies at submission time.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestDraft {
    pub student_id: String,
    pub title: String,
    pub price: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
    #[serde(flatten)]
    pub target: RequestTarget,
}

impl AccessRequest {
    fn from_draft(id: String, draft: RequestDraft, now: OffsetDateTime) -> Self {
        AccessRequest {
            id,
            student_id: draft.student_id,
            title: draft.title,
            status: RequestStatus::Pending,
            submitted_at: now,
            reviewed_at: None,
            price: draft.price,
            note: draft.note,
            reason: None,
            target: draft.target,
        }
    }

    fn ensure_pending(&self) -> Result<(), Error> {
        if self.status != RequestStatus::Pending {
            return Err(Error::InvalidState(format!(
                "request {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// pending -> approved. Stamps `reviewed_at` and clears any stale
    /// rejection reason. The caller must follow up with the matching ledger
    /// call, see [`fulfil_approval`].
    pub fn approve(&mut self, now: OffsetDateTime) -> Result<(), Error> {
        self.ensure_pending()?;
        self.status = RequestStatus::Approved;
        self.reviewed_at = Some(now);
        self.reason = None;
        Ok(())
    }

    /// pending -> rejected with a mandatory non-blank reason.
    pub fn reject(&mut self, reason: &str, now: OffsetDateTime) -> Result<(), Error> {
        self.ensure_pending()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::Validation("rejection requires a reason".into()));
        }
        self.status = RequestStatus::Rejected;
        self.reviewed_at = Some(now);
        self.reason = Some(reason.to_string());
        Ok(())
    }
}

/// Stateless admin-side query over a request collection: status filter and
/// case-insensitive text filter, AND-combined. Text matches against title,
/// student id, request id, target type and target id.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RequestFilter {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub text: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, request: &AccessRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = [
                request.title.as_str(),
                request.student_id.as_str(),
                request.id.as_str(),
                request.target.type_name(),
                request.target.target_id(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

pub fn filter_requests<'a>(
    requests: impl IntoIterator<Item = &'a AccessRequest>,
    filter: &RequestFilter,
) -> Vec<&'a AccessRequest> {
    requests.into_iter().filter(|r| filter.matches(r)).collect()
}

/// Persistence contract for requests. Approve/reject must be atomic
/// conditional transitions (only from pending), so a storage-level CAS
/// failure surfaces as the same `InvalidState` the in-memory guard raises.
/// Retrying callers must treat `InvalidState` as "already done", not failure.
#[allow(async_fn_in_trait)]
pub trait RequestStore: Send + Sync {
    async fn submit(&self, draft: RequestDraft) -> Result<AccessRequest, Error>;
    async fn request(&self, id: &str) -> Result<AccessRequest, Error>;
    async fn approve(&self, id: &str) -> Result<AccessRequest, Error>;
    async fn reject(&self, id: &str, reason: &str) -> Result<AccessRequest, Error>;
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<AccessRequest>, Error>;
}

/// In-memory request store; the per-entry lock of the map makes each
/// transition an atomic check-then-set.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    requests: DashMap<String, AccessRequest>,
    next_id: AtomicU64,
}

impl RequestStore for MemoryRequestStore {
    async fn submit(&self, draft: RequestDraft) -> Result<AccessRequest, Error> {
        if draft.title.trim().is_empty() {
            return Err(Error::Validation("request title must not be empty".into()));
        }
        let id = format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let request = AccessRequest::from_draft(id.clone(), draft, now_local());
        info!(
            "request {id} submitted by {} for {} {}",
            request.student_id,
            request.target.type_name(),
            request.target.target_id()
        );
        self.requests.insert(id, request.clone());
        Ok(request)
    }

    async fn request(&self, id: &str) -> Result<AccessRequest, Error> {
        self.requests
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found("request", id))
    }

    async fn approve(&self, id: &str) -> Result<AccessRequest, Error> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| Error::not_found("request", id))?;
        entry.approve(now_local())?;
        info!("request {id} approved");
        Ok(entry.clone())
    }

    async fn reject(&self, id: &str, reason: &str) -> Result<AccessRequest, Error> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| Error::not_found("request", id))?;
        entry.reject(reason, now_local())?;
        info!("request {id} rejected: {reason}");
        Ok(entry.clone())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<AccessRequest>, Error> {
        let mut requests: Vec<AccessRequest> = self
            .requests
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.clone())
            .collect();
        requests.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }
}

/// Grant used when fulfilling an approved course/chapter request: an explicit
/// `access_until` wins, otherwise a temporary window falls back to the
/// one-month tier.
fn grant_for(access_type: AccessType, access_until: Option<OffsetDateTime>) -> AccessGrant {
    match access_type {
        AccessType::Lifetime => AccessGrant::lifetime(),
        AccessType::Temporary => AccessGrant {
            access_type,
            end_at: access_until.or_else(|| Tier::OneMonth.end_at_from(now_local())),
        },
    }
}

/// The approval side of the contract between request store and ledger: turn
/// an approved request into the matching enrollment or purchase. The state
/// machine itself does not call this; a failed fulfilment after approval is
/// an inconsistency the surrounding system must retry.
pub async fn fulfil_approval<L: LedgerStore>(
    ledger: &L,
    request: &AccessRequest,
) -> Result<(), Error> {
    match &request.target {
        RequestTarget::Course {
            course_id,
            access_type,
            access_until,
        } => {
            ledger
                .enroll_course(
                    &request.student_id,
                    course_id,
                    grant_for(*access_type, *access_until),
                )
                .await
        }
        RequestTarget::Chapter {
            course_id,
            chapter_id,
            access_type,
            access_until,
        } => {
            ledger
                .enroll_chapter(
                    &request.student_id,
                    course_id,
                    chapter_id,
                    grant_for(*access_type, *access_until),
                )
                .await
        }
        RequestTarget::Book { book_id } => {
            ledger.purchase_book(&request.student_id, book_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn course_draft(student: &str, title: &str) -> RequestDraft {
        RequestDraft {
            student_id: student.to_string(),
            title: title.to_string(),
            price: 9900,
            note: None,
            target: RequestTarget::Course {
                course_id: "rust-101".to_string(),
                access_type: AccessType::Lifetime,
                access_until: None,
            },
        }
    }

    fn pending(id: &str, student: &str, title: &str) -> AccessRequest {
        AccessRequest::from_draft(id.to_string(), course_draft(student, title), NOW)
    }

    #[test]
    fn approve_stamps_review_and_clears_reason() {
        let mut req = pending("req-1", "stu-1", "React Basics");
        req.approve(NOW).unwrap();
        assert_eq!(req.status, RequestStatus::Approved);
        assert_eq!(req.reviewed_at, Some(NOW));
        assert_eq!(req.reason, None);
    }

    #[test]
    fn reject_requires_a_reason() {
        let mut req = pending("req-1", "stu-1", "React Basics");
        let err = req.reject("  ", NOW).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(req.status, RequestStatus::Pending);

        req.reject("Prerequisite not met", NOW).unwrap();
        assert_eq!(req.status, RequestStatus::Rejected);
        assert_eq!(req.reason.as_deref(), Some("Prerequisite not met"));
        assert_eq!(req.reviewed_at, Some(NOW));
    }

    #[test]
    fn terminal_states_accept_no_transition() {
        let mut req = pending("req-1", "stu-1", "React Basics");
        req.reject("Prerequisite not met", NOW).unwrap();
        assert!(matches!(req.approve(NOW), Err(Error::InvalidState(_))));
        assert!(matches!(
            req.reject("again", NOW),
            Err(Error::InvalidState(_))
        ));

        let mut req = pending("req-2", "stu-1", "React Basics");
        req.approve(NOW).unwrap();
        assert!(matches!(req.approve(NOW), Err(Error::InvalidState(_))));
    }

    #[test]
    fn filter_combines_status_and_text() {
        let mut rejected = pending("req-1", "stu-9", "React Basics");
        rejected.reject("dup", NOW).unwrap();
        let requests = vec![
            pending("req-2", "stu-1", "React Basics"),
            pending("req-3", "stu-2", "Advanced Rust"),
            rejected,
        ];
        let filter = RequestFilter {
            status: Some(RequestStatus::Pending),
            text: Some("REACT".to_string()),
        };
        let hits = filter_requests(&requests, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "req-2");
    }

    #[test]
    fn text_filter_matches_type_and_target_id() {
        let requests = vec![pending("req-1", "stu-1", "Something")];
        for needle in ["course", "RUST-101", "req-1", "stu-1"] {
            let filter = RequestFilter {
                status: None,
                text: Some(needle.to_string()),
            };
            assert_eq!(filter_requests(&requests, &filter).len(), 1, "{needle}");
        }
        let filter = RequestFilter {
            status: None,
            text: Some("chapter".to_string()),
        };
        assert!(filter_requests(&requests, &filter).is_empty());
    }

    #[test]
    fn target_serializes_with_wire_field_names() {
        let req = pending("req-1", "stu-1", "React Basics");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "course");
        assert_eq!(value["courseId"], "rust-101");
        assert_eq!(value["accesType"], "lifetime");
        assert_eq!(value["status"], "pending");
    }

    #[tokio::test]
    async fn store_transitions_only_from_pending() {
        let store = MemoryRequestStore::default();
        let req = store.submit(course_draft("stu-1", "React Basics")).await.unwrap();
        assert_eq!(req.status, RequestStatus::Pending);

        store.reject(&req.id, "Prerequisite not met").await.unwrap();
        let err = store.approve(&req.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let fetched = store.request(&req.id).await.unwrap();
        assert_eq!(fetched.status, RequestStatus::Rejected);
        assert_eq!(fetched.reason.as_deref(), Some("Prerequisite not met"));
    }

    #[tokio::test]
    async fn approval_fulfilment_enrolls_the_student() {
        let store = MemoryRequestStore::default();
        let ledger = MemoryLedger::default();
        let req = store.submit(course_draft("stu-1", "React Basics")).await.unwrap();
        let approved = store.approve(&req.id).await.unwrap();
        fulfil_approval(&ledger, &approved).await.unwrap();

        let student = ledger.student("stu-1").await.unwrap();
        assert!(student.enrolled_courses.contains_key("rust-101"));
        assert_eq!(
            student.enrolled_courses["rust-101"].access_type,
            AccessType::Lifetime
        );
    }

    #[tokio::test]
    async fn book_request_fulfilment_records_purchase() {
        let store = MemoryRequestStore::default();
        let ledger = MemoryLedger::default();
        let draft = RequestDraft {
            student_id: "stu-1".to_string(),
            title: "Rust for Rustaceans".to_string(),
            price: 3500,
            note: Some("print copy".to_string()),
            target: RequestTarget::Book {
                book_id: "bk-1".to_string(),
            },
        };
        let req = store.submit(draft).await.unwrap();
        let approved = store.approve(&req.id).await.unwrap();
        fulfil_approval(&ledger, &approved).await.unwrap();
        let student = ledger.student("stu-1").await.unwrap();
        assert!(student.bought_books.contains_key("bk-1"));
    }
}
