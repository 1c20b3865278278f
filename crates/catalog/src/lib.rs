//! Use-case orchestration for the petition catalog. Every operation follows
//! the same shape: resolve state, run the pure guards from
//! `causeway_guards`, then mutate, all inside one store transaction so the
//! decision and the write cannot be separated by a concurrent request.

use std::future::Future;

use causeway_contracts::{
    Category, CoreError, NewPetition, NewSupporter, NewSupportTier, PetitionDetail, PetitionPage,
    PetitionPatch, PetitionSearchQuery, Principal, SupporterRecord, SupportTierPatch,
};
use causeway_store::{PetitionRow, Store, StoreError, TierRow};

/// Resolved outcome of a petition merge patch: the full row to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPetition {
    pub title: String,
    pub description: String,
    pub category_id: i64,
}

/// Applies a merge patch against the current row. Absent fields keep the
/// stored value; the caller validates the resolved whole.
pub fn resolve_petition_patch(current: &PetitionRow, patch: &PetitionPatch) -> ResolvedPetition {
    ResolvedPetition {
        title: patch.title.clone().unwrap_or_else(|| current.title.clone()),
        description: patch
            .description
            .clone()
            .unwrap_or_else(|| current.description.clone()),
        category_id: patch.category_id.unwrap_or(current.category_id),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTier {
    pub title: String,
    pub description: String,
    pub cost: i64,
}

pub fn resolve_tier_patch(current: &TierRow, patch: &SupportTierPatch) -> ResolvedTier {
    ResolvedTier {
        title: patch.title.clone().unwrap_or_else(|| current.title.clone()),
        description: patch
            .description
            .clone()
            .unwrap_or_else(|| current.description.clone()),
        cost: patch.cost.unwrap_or(current.cost),
    }
}

fn validate_petition_fields(title: &str, description: &str) -> Result<(), CoreError> {
    if title.is_empty() {
        return Err(CoreError::Validation(
            "petition title must be non-empty".to_string(),
        ));
    }
    if description.is_empty() {
        return Err(CoreError::Validation(
            "petition description must be non-empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_tier_fields(title: &str, cost: i64) -> Result<(), CoreError> {
    if title.is_empty() {
        return Err(CoreError::Validation(
            "support tier title must be non-empty".to_string(),
        ));
    }
    if cost < 0 {
        return Err(CoreError::Validation(
            "support tier cost must be >= 0".to_string(),
        ));
    }
    Ok(())
}

fn map_store(err: StoreError) -> CoreError {
    match err {
        StoreError::Timeout => CoreError::Internal("store operation timed out".to_string()),
        // Pre-checks inside the transaction normally catch these first; the
        // schema constraint is the race backstop.
        StoreError::UniqueViolation(_) => {
            CoreError::Conflict("resource already exists".to_string())
        }
        StoreError::Sqlx(err) => {
            tracing::error!(error = %err, "store query failed");
            CoreError::Internal("store query failed".to_string())
        }
    }
}

/// Runs a store read, retrying exactly once when the store reports a
/// transient fault. Business-rule failures and plain query errors pass
/// through on the first attempt; writes never go through this path.
async fn read_with_retry<T, F, Fut>(what: &'static str, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            tracing::warn!(what, "retrying read after store timeout");
            op().await.map_err(map_store)
        }
        other => other.map_err(map_store),
    }
}

#[derive(Clone)]
pub struct CatalogService {
    store: Store,
}

impl CatalogService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolves a bearer credential to a principal; `Ok(None)` is anonymous.
    pub async fn principal_for_token(&self, token: &str) -> Result<Option<Principal>, CoreError> {
        let user_id =
            read_with_retry("token lookup", || self.store.user_id_for_token(token)).await?;
        Ok(user_id.map(|user_id| Principal { user_id }))
    }

    pub async fn categories(&self) -> Result<Vec<Category>, CoreError> {
        read_with_retry("category read", || self.store.categories()).await
    }

    /// The catalog listing. The returned `count` is always the total number
    /// of petitions matching the filters, independent of pagination.
    pub async fn list_petitions(
        &self,
        query: &PetitionSearchQuery,
    ) -> Result<PetitionPage, CoreError> {
        query.validate()?;

        if !query.category_ids.is_empty() {
            let known = self.store.category_ids().await.map_err(map_store)?;
            for id in &query.category_ids {
                if !known.contains(id) {
                    return Err(CoreError::Validation(format!(
                        "unknown category id: {}",
                        id
                    )));
                }
            }
        }

        let (petitions, count) =
            read_with_retry("petition listing", || self.store.list_petitions(query)).await?;

        Ok(PetitionPage { petitions, count })
    }

    pub async fn petition_detail(&self, petition_id: i64) -> Result<PetitionDetail, CoreError> {
        let detail =
            read_with_retry("petition read", || self.store.petition_detail(petition_id)).await?;
        detail.ok_or_else(|| CoreError::NotFound("petition not found".to_string()))
    }

    pub async fn create_petition(
        &self,
        principal: Principal,
        body: &NewPetition,
    ) -> Result<i64, CoreError> {
        validate_petition_fields(&body.title, &body.description)?;
        causeway_guards::validate_initial_tiers(&body.support_tiers)?;

        let mut tx = self.store.begin().await.map_err(map_store)?;

        if !tx.category_exists(body.category_id).await.map_err(map_store)? {
            return Err(CoreError::Validation(format!(
                "unknown category id: {}",
                body.category_id
            )));
        }
        if tx
            .petition_title_taken(&body.title, None)
            .await
            .map_err(map_store)?
        {
            return Err(CoreError::Conflict(format!(
                "petition title already exists: {}",
                body.title
            )));
        }

        let petition_id = tx
            .insert_petition(
                &body.title,
                &body.description,
                principal.user_id,
                body.category_id,
            )
            .await
            .map_err(map_store)?;
        for tier in &body.support_tiers {
            tx.insert_support_tier(petition_id, &tier.title, &tier.description, tier.cost)
                .await
                .map_err(map_store)?;
        }

        tx.commit().await.map_err(map_store)?;
        Ok(petition_id)
    }

    pub async fn update_petition(
        &self,
        principal: Principal,
        petition_id: i64,
        patch: &PetitionPatch,
    ) -> Result<(), CoreError> {
        let mut tx = self.store.begin().await.map_err(map_store)?;

        let current = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;
        causeway_guards::assert_owner(current.owner_id, principal)?;

        let resolved = resolve_petition_patch(&current, patch);
        validate_petition_fields(&resolved.title, &resolved.description)?;

        if resolved.title != current.title
            && tx
                .petition_title_taken(&resolved.title, Some(petition_id))
                .await
                .map_err(map_store)?
        {
            return Err(CoreError::Conflict(format!(
                "petition title already exists: {}",
                resolved.title
            )));
        }
        if resolved.category_id != current.category_id
            && !tx
                .category_exists(resolved.category_id)
                .await
                .map_err(map_store)?
        {
            return Err(CoreError::Validation(format!(
                "unknown category id: {}",
                resolved.category_id
            )));
        }

        tx.update_petition(
            petition_id,
            &resolved.title,
            &resolved.description,
            resolved.category_id,
        )
        .await
        .map_err(map_store)?;
        tx.commit().await.map_err(map_store)
    }

    pub async fn delete_petition(
        &self,
        principal: Principal,
        petition_id: i64,
    ) -> Result<(), CoreError> {
        let mut tx = self.store.begin().await.map_err(map_store)?;

        let current = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;
        causeway_guards::assert_owner(current.owner_id, principal)?;

        let pledges = tx
            .supporter_count_for_petition(petition_id)
            .await
            .map_err(map_store)?;
        causeway_guards::assert_no_active_support(pledges)?;

        tx.delete_petition(petition_id).await.map_err(map_store)?;
        tx.commit().await.map_err(map_store)
    }

    pub async fn add_support_tier(
        &self,
        principal: Principal,
        petition_id: i64,
        body: &NewSupportTier,
    ) -> Result<i64, CoreError> {
        validate_tier_fields(&body.title, body.cost)?;

        let mut tx = self.store.begin().await.map_err(map_store)?;

        let current = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;
        causeway_guards::assert_owner(current.owner_id, principal)?;

        let tiers = tx.tiers_for_update(petition_id).await.map_err(map_store)?;
        causeway_guards::assert_tier_cap(tiers.len())?;
        let titles: Vec<String> = tiers.iter().map(|t| t.title.clone()).collect();
        causeway_guards::assert_title_unique(&titles, &body.title)?;

        let tier_id = tx
            .insert_support_tier(petition_id, &body.title, &body.description, body.cost)
            .await
            .map_err(map_store)?;
        tx.commit().await.map_err(map_store)?;
        Ok(tier_id)
    }

    pub async fn update_support_tier(
        &self,
        principal: Principal,
        petition_id: i64,
        tier_id: i64,
        patch: &SupportTierPatch,
    ) -> Result<(), CoreError> {
        let mut tx = self.store.begin().await.map_err(map_store)?;

        let current = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;
        causeway_guards::assert_owner(current.owner_id, principal)?;

        let tiers = tx.tiers_for_update(petition_id).await.map_err(map_store)?;
        let tier = tiers
            .iter()
            .find(|t| t.id == tier_id)
            .ok_or_else(|| CoreError::NotFound("support tier not found".to_string()))?;

        let pledges = tx.pledge_count_for_tier(tier_id).await.map_err(map_store)?;
        causeway_guards::assert_no_active_support(pledges)?;

        let resolved = resolve_tier_patch(tier, patch);
        validate_tier_fields(&resolved.title, resolved.cost)?;
        if resolved.title != tier.title {
            let siblings: Vec<String> = tiers
                .iter()
                .filter(|t| t.id != tier_id)
                .map(|t| t.title.clone())
                .collect();
            causeway_guards::assert_title_unique(&siblings, &resolved.title)?;
        }

        tx.update_support_tier(tier_id, &resolved.title, &resolved.description, resolved.cost)
            .await
            .map_err(map_store)?;
        tx.commit().await.map_err(map_store)
    }

    pub async fn delete_support_tier(
        &self,
        principal: Principal,
        petition_id: i64,
        tier_id: i64,
    ) -> Result<(), CoreError> {
        let mut tx = self.store.begin().await.map_err(map_store)?;

        let current = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;
        causeway_guards::assert_owner(current.owner_id, principal)?;

        let tiers = tx.tiers_for_update(petition_id).await.map_err(map_store)?;
        if !tiers.iter().any(|t| t.id == tier_id) {
            return Err(CoreError::NotFound("support tier not found".to_string()));
        }
        causeway_guards::assert_not_sole_tier(tiers.len())?;

        let pledges = tx.pledge_count_for_tier(tier_id).await.map_err(map_store)?;
        causeway_guards::assert_no_active_support(pledges)?;

        tx.delete_support_tier(tier_id).await.map_err(map_store)?;
        tx.commit().await.map_err(map_store)
    }

    pub async fn list_supporters(
        &self,
        petition_id: i64,
    ) -> Result<Vec<SupporterRecord>, CoreError> {
        if !self
            .store
            .petition_exists(petition_id)
            .await
            .map_err(map_store)?
        {
            return Err(CoreError::NotFound("petition not found".to_string()));
        }
        read_with_retry("supporter read", || {
            self.store.supporters_for_petition(petition_id)
        })
        .await
    }

    /// One-shot pledge registration. Precondition order is fixed: petition
    /// existence, tier existence under this petition, ownership, duplicate
    /// pledge. The first violated rule decides the error.
    pub async fn register_support(
        &self,
        principal: Principal,
        petition_id: i64,
        body: &NewSupporter,
    ) -> Result<SupporterRecord, CoreError> {
        let mut tx = self.store.begin().await.map_err(map_store)?;

        let petition = tx
            .petition_for_update(petition_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::NotFound("petition not found".to_string()))?;

        let tiers = tx.tiers_for_update(petition_id).await.map_err(map_store)?;
        if !tiers.iter().any(|t| t.id == body.support_tier_id) {
            return Err(CoreError::NotFound(
                "support tier not found on this petition".to_string(),
            ));
        }

        causeway_guards::assert_not_owner(petition.owner_id, principal)?;

        if tx
            .has_pledge(body.support_tier_id, principal.user_id)
            .await
            .map_err(map_store)?
        {
            return Err(CoreError::Conflict(
                "already supporting at this tier".to_string(),
            ));
        }

        let (support_id, timestamp) = tx
            .insert_supporter(
                petition_id,
                body.support_tier_id,
                principal.user_id,
                body.message.as_deref(),
            )
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation(_) => {
                    CoreError::Conflict("already supporting at this tier".to_string())
                }
                other => map_store(other),
            })?;

        let (first_name, last_name) = tx
            .user_name(principal.user_id)
            .await
            .map_err(map_store)?
            .ok_or_else(|| CoreError::Internal("supporter user row missing".to_string()))?;

        tx.commit().await.map_err(map_store)?;

        Ok(SupporterRecord {
            support_id,
            support_tier_id: body.support_tier_id,
            supporter_id: principal.user_id,
            supporter_first_name: first_name,
            supporter_last_name: last_name,
            message: body.message.clone(),
            timestamp,
        })
    }
}
