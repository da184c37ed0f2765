//! Case registration saga
//!
//! Registration coordinates the moderation check, the remote embedding
//! computation, object storage and the vector index across four
//! independent stores. There is no distributed transaction: each step
//! that creates an artifact pushes its own idempotent compensation, and
//! any later failure unwinds the stack so a rejected registration leaves
//! no case record, no images and no vectors behind.
//!
//! Side effects that cannot be compensated (the registrant's case list,
//! the registration notification, counters, summary generation) run only
//! after the last compensatable step has committed, via the outbox.

mod summary;

pub use summary::compose_summary;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, info};

use crate::auth::{can_perform, Actor, CaseAction};
use crate::db::schemas::{
    increment_counter, CaseDoc, CaseStatus, Metadata, StatsDoc, TimelineEntry, UserDoc,
    COUNTER_CASES_REGISTERED,
};
use crate::db::MongoCollection;
use crate::notify::{NewNotification, Notifier};
use crate::outbox::{Outbox, RetryPolicy, SideEffect};
use crate::services::{media_key, ContentModerator, FaceEmbedder, MediaStore};
use crate::types::{Error, Result};
use crate::vector::{vector_id, VectorIndex, VectorMetadata, VectorRecord};

/// Owner recorded for unauthenticated registrations
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Description until the summary worker replaces it
pub const PLACEHOLDER_DESCRIPTION: &str = "Case details are being prepared.";

const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// One uploaded image, base64 as the embedding function consumes it
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ImageUpload {
    pub data: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "image/jpeg".to_string()
}

/// Registration request body
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegistrationRequest {
    pub full_name: String,
    #[serde(default)]
    pub age: Option<i32>,
    pub gender: String,
    pub case_ref_number: String,
    pub jurisdiction: String,
    pub status: String,
    /// Epoch seconds
    pub date_missing_found: i64,
    pub last_seen_location: String,
    pub contact_phone: String,
    pub images: Vec<ImageUpload>,
    #[serde(default)]
    pub skip_verification: bool,
}

/// Request after field validation and image decoding
struct ValidatedRequest {
    request: RegistrationRequest,
    status: CaseStatus,
    images: Vec<(Bytes, String)>,
}

/// Persistence seam for the saga and its post-commit effects
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn ref_exists(&self, jurisdiction: &str, case_ref: &str) -> Result<bool>;
    async fn insert_case(&self, case: CaseDoc) -> Result<String>;
    /// Idempotent: deleting an already-deleted case is a no-op.
    async fn delete_case(&self, case_id: &str) -> Result<()>;
    async fn append_registered_timeline(&self, case_id: &str) -> Result<()>;
    async fn add_case_to_user(&self, user_id: &str, case_id: &str) -> Result<()>;
    async fn bump_registered_counter(&self) -> Result<()>;
    /// Overwrites the placeholder description; a no-op if it was already
    /// replaced.
    async fn set_description(&self, case_id: &str, description: &str) -> Result<()>;
}

/// MongoDB-backed registration store
pub struct MongoRegistrationStore {
    cases: MongoCollection<CaseDoc>,
    users: MongoCollection<UserDoc>,
    stats: MongoCollection<StatsDoc>,
}

impl MongoRegistrationStore {
    pub fn new(
        cases: MongoCollection<CaseDoc>,
        users: MongoCollection<UserDoc>,
        stats: MongoCollection<StatsDoc>,
    ) -> Self {
        Self {
            cases,
            users,
            stats,
        }
    }
}

#[async_trait]
impl RegistrationStore for MongoRegistrationStore {
    async fn ref_exists(&self, jurisdiction: &str, case_ref: &str) -> Result<bool> {
        let existing = self
            .cases
            .find_one(doc! { "jurisdiction": jurisdiction, "case_ref_number": case_ref })
            .await?;
        Ok(existing.is_some())
    }

    async fn insert_case(&self, case: CaseDoc) -> Result<String> {
        let id = self.cases.insert_one(case).await?;
        Ok(id.to_hex())
    }

    async fn delete_case(&self, case_id: &str) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;
        self.cases.delete_one(doc! { "_id": oid }).await?;
        Ok(())
    }

    async fn append_registered_timeline(&self, case_id: &str) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;
        let entry = TimelineEntry::new("registered", "Case registered".to_string());
        let entry_bson =
            bson::to_bson(&entry).map_err(|e| Error::Internal(format!("timeline encode: {}", e)))?;

        self.cases
            .update_one(doc! { "_id": oid }, doc! { "$push": { "timelines": entry_bson } })
            .await?;
        Ok(())
    }

    async fn add_case_to_user(&self, user_id: &str, case_id: &str) -> Result<()> {
        // At most one owner add per case
        self.users
            .update_one(
                doc! { "identifier": user_id, "case_ids": { "$ne": case_id } },
                doc! { "$push": { "case_ids": case_id } },
            )
            .await?;
        Ok(())
    }

    async fn bump_registered_counter(&self) -> Result<()> {
        increment_counter(&self.stats, COUNTER_CASES_REGISTERED).await
    }

    async fn set_description(&self, case_id: &str, description: &str) -> Result<()> {
        let oid = ObjectId::parse_str(case_id)?;
        self.cases
            .update_one(
                doc! { "_id": oid, "description": PLACEHOLDER_DESCRIPTION },
                doc! { "$set": {
                    "description": description,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }
}

type Undo = BoxFuture<'static, Result<()>>;

/// The registration saga
pub struct CaseRegistrar {
    store: Arc<dyn RegistrationStore>,
    moderator: Arc<dyn ContentModerator>,
    embedder: Arc<dyn FaceEmbedder>,
    media: Arc<dyn MediaStore>,
    vectors: Arc<dyn VectorIndex>,
    notifier: Arc<dyn Notifier>,
    outbox: Outbox,
    max_severity: u8,
}

impl CaseRegistrar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        moderator: Arc<dyn ContentModerator>,
        embedder: Arc<dyn FaceEmbedder>,
        media: Arc<dyn MediaStore>,
        vectors: Arc<dyn VectorIndex>,
        notifier: Arc<dyn Notifier>,
        outbox: Outbox,
        max_severity: u8,
    ) -> Self {
        Self {
            store,
            moderator,
            embedder,
            media,
            vectors,
            notifier,
            outbox,
            max_severity,
        }
    }

    /// Run the saga. Returns the committed case id, or an error with
    /// every created artifact rolled back.
    pub async fn register(
        &self,
        actor: Option<&Actor>,
        request: RegistrationRequest,
    ) -> Result<String> {
        // Step 1: field validation + reference-number uniqueness
        let validated = validate(request)?;
        if self
            .store
            .ref_exists(&validated.request.jurisdiction, &validated.request.case_ref_number)
            .await?
        {
            return Err(Error::Conflict(format!(
                "reference number {} already registered in {}",
                validated.request.case_ref_number, validated.request.jurisdiction
            )));
        }

        // Step 2: moderation, before anything is created
        for (index, (bytes, _)) in validated.images.iter().enumerate() {
            let verdict = self.moderator.review(bytes).await?;
            if let Some(hit) = verdict.exceeds(self.max_severity) {
                return Err(Error::Validation(format!(
                    "image {} was rejected by content moderation ({}, severity {})",
                    index + 1,
                    hit.category,
                    hit.severity
                )));
            }
        }

        // Step 3: verification bypass needs an elevated role
        if validated.request.skip_verification {
            let actor = actor.ok_or_else(|| {
                Error::unauthorized("verification bypass requested without authentication")
            })?;
            can_perform(actor, &[], &CaseDoc::default(), CaseAction::BypassVerification)?;
        }

        // Step 4: tentative case record; the unit of compensation exists
        // from here on
        let case = build_case(&validated, actor);
        let summary_source = case.clone();
        let case_id = self.store.insert_case(case).await?;

        let mut compensations: Vec<(&'static str, Undo)> = Vec::new();
        {
            let store = Arc::clone(&self.store);
            let id = case_id.clone();
            compensations.push((
                "delete-case-record",
                Box::pin(async move { store.delete_case(&id).await }),
            ));
        }

        // Step 5: remote embedding computation (and same-person check)
        let pair = match self
            .embedder
            .embeddings(
                &validated.images[0].0,
                &validated.images[1].0,
                !validated.request.skip_verification,
            )
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                unwind(compensations).await;
                return Err(e);
            }
        };

        // Step 6: images into object storage under deterministic keys
        for (index, (bytes, content_type)) in validated.images.iter().enumerate() {
            let key = media_key(&validated.request.jurisdiction, &case_id, index);
            match self.media.put(&key, bytes.clone(), content_type).await {
                Ok(()) => {
                    let media = Arc::clone(&self.media);
                    let undo_key = key.clone();
                    compensations.push((
                        "delete-image",
                        Box::pin(async move { media.delete(&undo_key).await }),
                    ));
                }
                Err(e) => {
                    unwind(compensations).await;
                    return Err(e);
                }
            }
        }

        // Step 7: both vectors into the jurisdiction namespace
        let date_ts = validated.request.date_missing_found;
        let records = vec![
            VectorRecord {
                id: vector_id(&case_id, 0),
                values: pair.first,
                metadata: VectorMetadata {
                    gender: validated.request.gender.clone(),
                    status: validated.status,
                    date_ts,
                },
            },
            VectorRecord {
                id: vector_id(&case_id, 1),
                values: pair.second,
                metadata: VectorMetadata {
                    gender: validated.request.gender.clone(),
                    status: validated.status,
                    date_ts,
                },
            },
        ];

        if let Err(e) = self
            .vectors
            .upsert(&validated.request.jurisdiction, records)
            .await
        {
            unwind(compensations).await;
            return Err(e);
        }

        // Step 8: committed. Everything from here is best-effort and never
        // blocks the response.
        info!(
            %case_id,
            jurisdiction = %validated.request.jurisdiction,
            status = %validated.status,
            "case registered"
        );
        self.enqueue_side_effects(&case_id, actor, summary_source);

        Ok(case_id)
    }

    fn enqueue_side_effects(&self, case_id: &str, actor: Option<&Actor>, summary_source: CaseDoc) {
        {
            let store = Arc::clone(&self.store);
            let id = case_id.to_string();
            self.outbox.enqueue(SideEffect::new(
                "registered-timeline",
                RetryPolicy::SINGLE,
                move || {
                    let store = Arc::clone(&store);
                    let id = id.clone();
                    Box::pin(async move { store.append_registered_timeline(&id).await })
                },
            ));
        }

        {
            let store = Arc::clone(&self.store);
            self.outbox.enqueue(SideEffect::new(
                "registered-counter",
                RetryPolicy::SINGLE,
                move || {
                    let store = Arc::clone(&store);
                    Box::pin(async move { store.bump_registered_counter().await })
                },
            ));
        }

        if let Some(actor) = actor {
            {
                let store = Arc::clone(&self.store);
                let user = actor.id.clone();
                let id = case_id.to_string();
                self.outbox.enqueue(SideEffect::new(
                    "owner-case-list",
                    RetryPolicy::SINGLE,
                    move || {
                        let store = Arc::clone(&store);
                        let user = user.clone();
                        let id = id.clone();
                        Box::pin(async move { store.add_case_to_user(&user, &id).await })
                    },
                ));
            }

            {
                let notifier = Arc::clone(&self.notifier);
                let user = actor.id.clone();
                let message = format!(
                    "Your case {} has been registered",
                    summary_source.case_ref_number
                );
                let target = format!("/cases/{}", case_id);
                self.outbox.enqueue(SideEffect::new(
                    "registered-notification",
                    RetryPolicy::SINGLE,
                    move || {
                        let notifier = Arc::clone(&notifier);
                        let user = user.clone();
                        let n = NewNotification::link(message.clone(), target.clone());
                        Box::pin(async move {
                            notifier.notify(&user, n).await;
                            Ok(())
                        })
                    },
                ));
            }
        }

        // Summary generation gets a real retry schedule; if every attempt
        // fails the placeholder stays
        {
            let store = Arc::clone(&self.store);
            let id = case_id.to_string();
            let description = compose_summary(&summary_source);
            self.outbox.enqueue(SideEffect::new(
                "case-summary",
                RetryPolicy::SUMMARY,
                move || {
                    let store = Arc::clone(&store);
                    let id = id.clone();
                    let description = description.clone();
                    Box::pin(async move { store.set_description(&id, &description).await })
                },
            ));
        }
    }
}

/// Run compensations newest-first. Failures are logged and never mask
/// the error that triggered the unwind.
async fn unwind(compensations: Vec<(&'static str, Undo)>) {
    for (label, undo) in compensations.into_iter().rev() {
        if let Err(e) = undo.await {
            error!("compensation '{}' failed: {}", label, e);
        }
    }
}

fn build_case(validated: &ValidatedRequest, actor: Option<&Actor>) -> CaseDoc {
    let (owner_id, reported_by) = match actor {
        Some(actor) => (actor.id.clone(), actor.role.as_str().to_string()),
        None => (ANONYMOUS_OWNER.to_string(), "general".to_string()),
    };

    CaseDoc {
        _id: None,
        metadata: Metadata::new(),
        full_name: validated.request.full_name.trim().to_string(),
        age: validated.request.age,
        gender: validated.request.gender.clone(),
        case_ref_number: validated.request.case_ref_number.clone(),
        jurisdiction: validated.request.jurisdiction.clone(),
        description: PLACEHOLDER_DESCRIPTION.to_string(),
        status: validated.status,
        original_status: None,
        is_assigned: false,
        owner_id,
        reported_by,
        visible: true,
        is_flagged: false,
        flags: Vec::new(),
        timelines: Vec::new(),
        last_searched_time: None,
        date_missing_found: DateTime::from_millis(validated.request.date_missing_found * 1000),
        last_seen_location: validated.request.last_seen_location.trim().to_string(),
        contact_phone: validated.request.contact_phone.clone(),
    }
}

fn validate(request: RegistrationRequest) -> Result<ValidatedRequest> {
    use base64::prelude::*;

    // Normalize before checking so the stored fields are exactly the
    // validated ones
    let mut request = request;
    request.full_name = request.full_name.trim().to_string();
    request.case_ref_number = request.case_ref_number.trim().to_string();
    request.jurisdiction = request.jurisdiction.trim().to_string();
    request.last_seen_location = request.last_seen_location.trim().to_string();
    request.contact_phone = request.contact_phone.trim().to_string();

    let name = request.full_name.as_str();
    if name.is_empty() || name.len() > 120 {
        return Err(Error::Validation(
            "full_name must be between 1 and 120 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphabetic() || c.is_whitespace() || matches!(c, '-' | '\'' | '.'))
    {
        return Err(Error::Validation(
            "full_name contains unsupported characters".to_string(),
        ));
    }

    if let Some(age) = request.age {
        if !(0..=130).contains(&age) {
            return Err(Error::Validation("age must be between 0 and 130".to_string()));
        }
    }

    if request.gender != "male" && request.gender != "female" {
        return Err(Error::Validation(
            "gender must be \"male\" or \"female\"".to_string(),
        ));
    }

    let case_ref = request.case_ref_number.as_str();
    if case_ref.len() < 3 || case_ref.len() > 64 {
        return Err(Error::Validation(
            "case_ref_number must be between 3 and 64 characters".to_string(),
        ));
    }
    if !case_ref
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/'))
    {
        return Err(Error::Validation(
            "case_ref_number may only contain letters, digits, '-' and '/'".to_string(),
        ));
    }

    let jurisdiction = request.jurisdiction.as_str();
    if jurisdiction.len() < 2 || jurisdiction.len() > 32 {
        return Err(Error::Validation(
            "jurisdiction must be between 2 and 32 characters".to_string(),
        ));
    }
    if !jurisdiction
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::Validation(
            "jurisdiction must be lowercase letters, digits and '-'".to_string(),
        ));
    }

    let status = match request.status.as_str() {
        "missing" => CaseStatus::Missing,
        "found" => CaseStatus::Found,
        _ => {
            return Err(Error::Validation(
                "status must be \"missing\" or \"found\"".to_string(),
            ))
        }
    };

    if request.date_missing_found <= 0 {
        return Err(Error::Validation(
            "date_missing_found must be a positive epoch timestamp".to_string(),
        ));
    }
    let now_secs = DateTime::now().timestamp_millis() / 1000;
    if request.date_missing_found > now_secs + 86_400 {
        return Err(Error::Validation(
            "date_missing_found cannot be in the future".to_string(),
        ));
    }

    let location = request.last_seen_location.as_str();
    if location.is_empty() || location.len() > 160 {
        return Err(Error::Validation(
            "last_seen_location must be between 1 and 160 characters".to_string(),
        ));
    }

    let phone = request.contact_phone.as_str();
    if phone.len() < 7 || phone.len() > 20 {
        return Err(Error::Validation(
            "contact_phone must be between 7 and 20 characters".to_string(),
        ));
    }
    if !phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
    {
        return Err(Error::Validation(
            "contact_phone contains unsupported characters".to_string(),
        ));
    }

    if request.images.len() != 2 {
        return Err(Error::Validation(
            "exactly 2 images are required".to_string(),
        ));
    }

    let mut images = Vec::with_capacity(2);
    for (index, upload) in request.images.iter().enumerate() {
        if upload.content_type != "image/jpeg" && upload.content_type != "image/png" {
            return Err(Error::Validation(format!(
                "image {} must be image/jpeg or image/png",
                index + 1
            )));
        }
        let bytes = BASE64_STANDARD.decode(upload.data.as_bytes()).map_err(|_| {
            Error::Validation(format!("image {} is not valid base64", index + 1))
        })?;
        if bytes.is_empty() || bytes.len() > MAX_IMAGE_BYTES {
            return Err(Error::Validation(format!(
                "image {} must be between 1 byte and {} bytes",
                index + 1,
                MAX_IMAGE_BYTES
            )));
        }
        images.push((Bytes::from(bytes), upload.content_type.clone()));
    }

    Ok(ValidatedRequest {
        status,
        images,
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::services::{EmbeddingPair, ModerationVerdict};
    use crate::services::moderation::CategoryScore;
    use crate::types::Error;
    use crate::vector::{VectorFilter, VectorMatch};
    use std::collections::HashMap;
    use std::sync::Mutex;

    use base64::prelude::*;

    fn sample_request() -> RegistrationRequest {
        RegistrationRequest {
            full_name: "Adaeze Obi".to_string(),
            age: Some(12),
            gender: "female".to_string(),
            case_ref_number: "NG-2026/0042".to_string(),
            jurisdiction: "ng-lagos".to_string(),
            status: "missing".to_string(),
            date_missing_found: 1_750_000_000,
            last_seen_location: "Ikeja bus terminal".to_string(),
            contact_phone: "+234 800 123 4567".to_string(),
            images: vec![
                ImageUpload {
                    data: BASE64_STANDARD.encode(b"front-facing photo"),
                    content_type: "image/jpeg".to_string(),
                },
                ImageUpload {
                    data: BASE64_STANDARD.encode(b"side profile photo"),
                    content_type: "image/jpeg".to_string(),
                },
            ],
            skip_verification: false,
        }
    }

    // ------------------------------------------------------------------
    // In-memory fakes
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct FakeStore {
        cases: Mutex<HashMap<String, CaseDoc>>,
        user_cases: Mutex<Vec<(String, String)>>,
        registered_count: Mutex<u64>,
        descriptions: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl RegistrationStore for FakeStore {
        async fn ref_exists(&self, jurisdiction: &str, case_ref: &str) -> Result<bool> {
            Ok(self.cases.lock().unwrap().values().any(|c| {
                c.jurisdiction == jurisdiction && c.case_ref_number == case_ref
            }))
        }

        async fn insert_case(&self, case: CaseDoc) -> Result<String> {
            let id = ObjectId::new().to_hex();
            self.cases.lock().unwrap().insert(id.clone(), case);
            Ok(id)
        }

        async fn delete_case(&self, case_id: &str) -> Result<()> {
            self.cases.lock().unwrap().remove(case_id);
            Ok(())
        }

        async fn append_registered_timeline(&self, _case_id: &str) -> Result<()> {
            Ok(())
        }

        async fn add_case_to_user(&self, user_id: &str, case_id: &str) -> Result<()> {
            self.user_cases
                .lock()
                .unwrap()
                .push((user_id.to_string(), case_id.to_string()));
            Ok(())
        }

        async fn bump_registered_counter(&self) -> Result<()> {
            *self.registered_count.lock().unwrap() += 1;
            Ok(())
        }

        async fn set_description(&self, case_id: &str, description: &str) -> Result<()> {
            self.descriptions
                .lock()
                .unwrap()
                .insert(case_id.to_string(), description.to_string());
            Ok(())
        }
    }

    struct FakeModerator {
        severity: u8,
    }

    #[async_trait]
    impl ContentModerator for FakeModerator {
        async fn review(&self, _image: &[u8]) -> Result<ModerationVerdict> {
            Ok(ModerationVerdict {
                categories: vec![CategoryScore {
                    category: "violence".to_string(),
                    severity: self.severity,
                }],
            })
        }
    }

    enum EmbedderBehavior {
        Succeed,
        NoFace,
        Mismatch,
    }

    struct FakeEmbedder {
        behavior: EmbedderBehavior,
    }

    #[async_trait]
    impl FaceEmbedder for FakeEmbedder {
        async fn embeddings(
            &self,
            _first: &[u8],
            _second: &[u8],
            _verify_identity: bool,
        ) -> Result<EmbeddingPair> {
            match self.behavior {
                EmbedderBehavior::Succeed => Ok(EmbeddingPair {
                    first: vec![0.1, 0.2],
                    second: vec![0.3, 0.4],
                }),
                EmbedderBehavior::NoFace => Err(crate::services::embedding::map_failure(
                    "Face not detected in one or both images during pre-check.",
                )),
                EmbedderBehavior::Mismatch => Err(crate::services::embedding::map_failure(
                    "The faces belong to different people",
                )),
            }
        }
    }

    #[derive(Default)]
    struct FakeMedia {
        objects: Mutex<HashMap<String, usize>>,
        fail_puts: bool,
    }

    #[async_trait]
    impl MediaStore for FakeMedia {
        async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
            if self.fail_puts {
                return Err(Error::external("object-storage", "storage unavailable"));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), data.len());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeVectors {
        stored: Mutex<HashMap<String, Vec<String>>>,
        fail_upserts: bool,
    }

    #[async_trait]
    impl VectorIndex for FakeVectors {
        async fn upsert(&self, namespace: &str, vectors: Vec<VectorRecord>) -> Result<()> {
            if self.fail_upserts {
                return Err(Error::external("vector-index", "index unavailable"));
            }
            let mut stored = self.stored.lock().unwrap();
            let entry = stored.entry(namespace.to_string()).or_default();
            for v in vectors {
                entry.push(v.id);
            }
            Ok(())
        }

        async fn query_by_id(
            &self,
            _namespace: &str,
            _id: &str,
            _top_k: usize,
            _filter: &VectorFilter,
        ) -> Result<Vec<VectorMatch>> {
            Ok(Vec::new())
        }

        async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
            if let Some(entry) = self.stored.lock().unwrap().get_mut(namespace) {
                entry.retain(|id| !ids.contains(id));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, user_id: &str, _n: NewNotification) {
            self.sent.lock().unwrap().push(user_id.to_string());
        }
    }

    struct Harness {
        store: Arc<FakeStore>,
        media: Arc<FakeMedia>,
        vectors: Arc<FakeVectors>,
        registrar: CaseRegistrar,
    }

    fn harness(
        moderation_severity: u8,
        embedder: EmbedderBehavior,
        fail_puts: bool,
        fail_upserts: bool,
    ) -> Harness {
        let store = Arc::new(FakeStore::default());
        let media = Arc::new(FakeMedia {
            fail_puts,
            ..FakeMedia::default()
        });
        let vectors = Arc::new(FakeVectors {
            fail_upserts,
            ..FakeVectors::default()
        });

        let registrar = CaseRegistrar::new(
            Arc::clone(&store) as Arc<dyn RegistrationStore>,
            Arc::new(FakeModerator {
                severity: moderation_severity,
            }),
            Arc::new(FakeEmbedder { behavior: embedder }),
            Arc::clone(&media) as Arc<dyn MediaStore>,
            Arc::clone(&vectors) as Arc<dyn VectorIndex>,
            Arc::new(FakeNotifier::default()),
            Outbox::start(64),
            2,
        );

        Harness {
            store,
            media,
            vectors,
            registrar,
        }
    }

    fn actor() -> Actor {
        Actor {
            id: "amira".to_string(),
            role: Role::General,
        }
    }

    // ------------------------------------------------------------------
    // Saga properties
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_committed_case_has_two_images_and_two_vectors() {
        let h = harness(0, EmbedderBehavior::Succeed, false, false);

        let case_id = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect("registration should commit");

        assert_eq!(h.store.cases.lock().unwrap().len(), 1);
        assert_eq!(h.media.objects.lock().unwrap().len(), 2);

        let stored = h.vectors.stored.lock().unwrap();
        let ids = stored.get("ng-lagos").expect("namespace should exist");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&format!("{}_0", case_id)));
        assert!(ids.contains(&format!("{}_1", case_id)));
    }

    #[tokio::test]
    async fn test_no_face_rolls_back_everything() {
        let h = harness(0, EmbedderBehavior::NoFace, false, false);

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("registration should fail");

        match err {
            Error::ExternalService { message, .. } => {
                assert_eq!(message, crate::services::embedding::MSG_NO_FACE);
            }
            other => panic!("expected external service error, got {:?}", other),
        }

        assert!(h.store.cases.lock().unwrap().is_empty());
        assert!(h.media.objects.lock().unwrap().is_empty());
        assert!(h.vectors.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identity_mismatch_surfaces_remediation() {
        let h = harness(0, EmbedderBehavior::Mismatch, false, false);

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("registration should fail");

        match err {
            Error::ExternalService { message, .. } => {
                assert_eq!(message, crate::services::embedding::MSG_IDENTITY_MISMATCH);
            }
            other => panic!("expected external service error, got {:?}", other),
        }
        assert!(h.store.cases.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_case() {
        let h = harness(0, EmbedderBehavior::Succeed, true, false);

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("registration should fail");

        assert!(matches!(err, Error::ExternalService { .. }));
        assert!(h.store.cases.lock().unwrap().is_empty());
        assert!(h.vectors.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_failure_rolls_back_case_and_images() {
        let h = harness(0, EmbedderBehavior::Succeed, false, true);

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("registration should fail");

        assert!(matches!(err, Error::ExternalService { .. }));
        assert!(h.store.cases.lock().unwrap().is_empty());
        assert!(h.media.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moderation_rejects_before_anything_is_created() {
        let h = harness(5, EmbedderBehavior::Succeed, false, false);

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("registration should fail");

        assert!(matches!(err, Error::Validation(_)));
        assert!(h.store.cases.lock().unwrap().is_empty());
        assert!(h.media.objects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_reference_number_conflicts() {
        let h = harness(0, EmbedderBehavior::Succeed, false, false);

        h.registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect("first registration should commit");

        let err = h
            .registrar
            .register(Some(&actor()), sample_request())
            .await
            .expect_err("duplicate reference should fail");

        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.store.cases.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bypass_requires_elevated_role() {
        let h = harness(0, EmbedderBehavior::Succeed, false, false);
        let mut request = sample_request();
        request.skip_verification = true;

        let err = h
            .registrar
            .register(Some(&actor()), request.clone())
            .await
            .expect_err("general role cannot bypass verification");
        assert!(matches!(err, Error::Authorization { .. }));

        let elevated = Actor {
            id: "officer".to_string(),
            role: Role::Police,
        };
        h.registrar
            .register(Some(&elevated), request)
            .await
            .expect("elevated role can bypass verification");
    }

    #[tokio::test]
    async fn test_anonymous_registration_commits() {
        let h = harness(0, EmbedderBehavior::Succeed, false, false);

        let case_id = h
            .registrar
            .register(None, sample_request())
            .await
            .expect("anonymous registration should commit");

        let cases = h.store.cases.lock().unwrap();
        let case = cases.values().next().unwrap();
        assert_eq!(case.owner_id, ANONYMOUS_OWNER);
        assert!(!case_id.is_empty());
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    #[test]
    fn test_validate_accepts_sample() {
        assert!(validate(sample_request()).is_ok());
    }

    #[test]
    fn test_validate_requires_exactly_two_images() {
        let mut request = sample_request();
        request.images.pop();
        assert!(matches!(validate(request), Err(Error::Validation(_))));

        let mut request = sample_request();
        let extra = request.images[0].clone();
        request.images.push(extra);
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_bad_base64() {
        let mut request = sample_request();
        request.images[0].data = "not-base64!!!".to_string();
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_status() {
        let mut request = sample_request();
        request.status = "closed".to_string();
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_bad_gender() {
        let mut request = sample_request();
        request.gender = "other".to_string();
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_future_date() {
        let mut request = sample_request();
        request.date_missing_found = DateTime::now().timestamp_millis() / 1000 + 7 * 86_400;
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_name_charset() {
        let mut request = sample_request();
        request.full_name = "Robert; DROP TABLE cases".to_string();
        assert!(matches!(validate(request), Err(Error::Validation(_))));
    }
}
