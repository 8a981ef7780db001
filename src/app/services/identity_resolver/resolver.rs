//! Identity matching against the identity store

use crate::app::adapters::stores::{IdentityStore, class_key};
use crate::app::models::{IdentityCandidate, MatchType, StudentIdentity};
use crate::app::services::field_mapper::normalize_name;
use crate::app::services::field_mapper::normalize::normalize_cell;
use crate::config::IdentityConfig;
use crate::constants::{
    FUZZY_CLASS_WEIGHT, FUZZY_NAME_WEIGHT, MINTED_ID_NAMESPACE, MINTED_ID_PREFIX,
};
use crate::{Error, Result};
use rapidfuzz::distance::levenshtein;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Confidence reported for a match on normalized name and class
const NAME_CLASS_MATCH_CONFIDENCE: f64 = 0.95;

/// Outcome of resolving one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub identity: StudentIdentity,
    pub match_type: MatchType,
    pub confidence: f64,
}

impl Resolution {
    fn new(identity: StudentIdentity, match_type: MatchType, confidence: f64) -> Self {
        Self {
            identity,
            match_type,
            confidence,
        }
    }
}

/// Normalized Levenshtein similarity of two names in [0, 1]
///
/// Both sides are normalized first, so "张 三" and "张三" are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    levenshtein::normalized_similarity(a.chars(), b.chars())
}

/// Deterministic id for a student the source gave no id for
///
/// The same normalized name and class always mint the same id, in this
/// process or any other.
pub fn mint_student_id(name: &str, class_name: &str) -> String {
    let uuid = Uuid::new_v5(&MINTED_ID_NAMESPACE, memo_key(name, class_name).as_bytes());
    format!("{}{}", MINTED_ID_PREFIX, uuid)
}

fn memo_key(name: &str, class_name: &str) -> String {
    format!("{}|{}", normalize_name(name), class_key(class_name))
}

fn id_memo_key(student_id: &str) -> String {
    format!("id:{}", student_id)
}

/// Resolves row identities for one import task
///
/// Identities created by the task are memoized by their source id, or by
/// normalized name and class when the source gave none. A row with an
/// explicit id never resolves to a stored student carrying a different
/// explicit id, however alike their names are. The memo is exported into checkpoints so a resumed task hands out the
/// same identities it handed out before the interruption.
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    config: IdentityConfig,
    create_missing: bool,
    memo: BTreeMap<String, StudentIdentity>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, config: IdentityConfig) -> Self {
        Self {
            store,
            config,
            create_missing: true,
            memo: BTreeMap::new(),
        }
    }

    /// Whether unknown students are created or rejected
    pub fn with_create_missing(mut self, create_missing: bool) -> Self {
        self.create_missing = create_missing;
        self
    }

    /// Resolve one candidate
    ///
    /// Unknown students with creation disabled, rows with no id and no name,
    /// and rows whose unknown id comes without a name are recoverable
    /// identity errors.
    pub async fn resolve(&mut self, candidate: &IdentityCandidate) -> Result<Resolution> {
        if !candidate.is_resolvable() {
            return Err(Error::identity_resolution(format!(
                "No student id or name ({})",
                candidate.describe()
            )));
        }

        if let Some(student_id) = candidate.student_id.as_deref() {
            if let Some(identity) = self.store.find_by_id(student_id).await? {
                return Ok(Resolution::new(identity, MatchType::Exact, 1.0));
            }
        }

        let Some(name) = candidate.name.as_deref() else {
            return Err(Error::identity_resolution(format!(
                "Student id '{}' is not known and the row has no name",
                candidate.student_id.as_deref().unwrap_or_default()
            )));
        };
        let class_name = candidate
            .class_name
            .as_deref()
            .unwrap_or(&self.config.default_class_name)
            .to_string();

        let explicit_id = candidate.student_id.is_some();
        let key = match candidate.student_id.as_deref() {
            Some(student_id) => id_memo_key(student_id),
            None => memo_key(name, &class_name),
        };
        if let Some(identity) = self.memo.get(&key) {
            return Ok(Resolution::new(identity.clone(), MatchType::New, 1.0));
        }

        let by_name = self
            .store
            .find_by_name_and_class(name, &class_name)
            .await?
            .filter(|identity| accepts(explicit_id, identity));
        if let Some(identity) = by_name {
            return Ok(Resolution::new(
                identity,
                MatchType::Exact,
                NAME_CLASS_MATCH_CONFIDENCE,
            ));
        }

        if self.config.enable_fuzzy {
            if let Some(resolution) = self.fuzzy_match(name, &class_name, explicit_id).await? {
                return Ok(resolution);
            }
        }

        if !self.create_missing {
            return Err(Error::identity_resolution(format!(
                "Unknown student ({}) and creating students is disabled",
                candidate.describe()
            )));
        }

        self.mint(candidate, name, &class_name, key).await
    }

    async fn fuzzy_match(
        &self,
        name: &str,
        class_name: &str,
        explicit_id: bool,
    ) -> Result<Option<Resolution>> {
        let mut best: Option<Resolution> = None;
        for stored in self.store.candidates_in_class(class_name).await? {
            if !accepts(explicit_id, &stored) {
                continue;
            }
            let name_similarity = similarity(name, &stored.name);
            let class_similarity = similarity(class_name, &stored.class_name);
            if name_similarity < self.config.fuzzy_threshold
                || class_similarity < self.config.class_similarity_threshold
            {
                continue;
            }

            let confidence =
                FUZZY_NAME_WEIGHT * name_similarity + FUZZY_CLASS_WEIGHT * class_similarity;
            if best.as_ref().is_none_or(|b| confidence > b.confidence) {
                best = Some(Resolution::new(stored, MatchType::Fuzzy, confidence));
            }
        }

        if let Some(resolution) = &best {
            debug!(
                "Fuzzy matched '{}' to '{}' ({}) with confidence {:.2}",
                name,
                resolution.identity.name,
                resolution.identity.student_id,
                resolution.confidence
            );
        }
        Ok(best)
    }

    async fn mint(
        &mut self,
        candidate: &IdentityCandidate,
        name: &str,
        class_name: &str,
        key: String,
    ) -> Result<Resolution> {
        let (student_id, minted) = match &candidate.student_id {
            Some(student_id) => (student_id.clone(), false),
            None => (mint_student_id(name, class_name), true),
        };
        let identity = StudentIdentity {
            student_id,
            name: normalize_cell(name),
            class_name: normalize_cell(class_name),
            minted,
        };

        let stored = self.store.insert_if_absent(identity.clone()).await?;
        self.memo.insert(key, stored.clone());

        if stored == identity {
            debug!("Created student {} ({})", stored.name, stored.student_id);
            Ok(Resolution::new(stored, MatchType::New, 1.0))
        } else {
            // Another import stored the same person first
            Ok(Resolution::new(
                stored,
                MatchType::Exact,
                NAME_CLASS_MATCH_CONFIDENCE,
            ))
        }
    }

    /// Identities created so far, keyed by source id or by normalized name
    /// and class
    pub fn export_memo(&self) -> BTreeMap<String, StudentIdentity> {
        self.memo.clone()
    }

    /// Restore identities created before a checkpoint
    pub fn import_memo(&mut self, memo: BTreeMap<String, StudentIdentity>) {
        self.memo.extend(memo);
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

/// Whether a name match may stand for the row's student
///
/// A row with an unknown explicit id only takes over minted students, since
/// a stored explicit id that differs belongs to someone else.
fn accepts(explicit_id: bool, stored: &StudentIdentity) -> bool {
    !explicit_id || stored.minted
}
