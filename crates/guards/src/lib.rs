//! Pure invariant guards over already-fetched state. Each function performs
//! no I/O and rejects with the specific error kind on first violation, which
//! keeps every rule independently unit-testable.

use causeway_contracts::{CoreError, NewSupportTier, Principal};

/// A petition has at most this many support tiers.
pub const MAX_SUPPORT_TIERS: usize = 3;

/// Mutations on an owned resource are restricted to the owner.
pub fn assert_owner(resource_owner_id: i64, principal: Principal) -> Result<(), CoreError> {
    if resource_owner_id != principal.user_id {
        return Err(CoreError::Forbidden(
            "only the owner of a petition may change it".to_string(),
        ));
    }
    Ok(())
}

/// Owners may not pledge to their own petitions.
pub fn assert_not_owner(resource_owner_id: i64, principal: Principal) -> Result<(), CoreError> {
    if resource_owner_id == principal.user_id {
        return Err(CoreError::Forbidden(
            "cannot support your own petition".to_string(),
        ));
    }
    Ok(())
}

/// Cardinality cap: a petition holds at most [`MAX_SUPPORT_TIERS`] tiers.
pub fn assert_tier_cap(existing_tier_count: usize) -> Result<(), CoreError> {
    if existing_tier_count >= MAX_SUPPORT_TIERS {
        return Err(CoreError::LimitExceeded(format!(
            "a petition may have at most {} support tiers",
            MAX_SUPPORT_TIERS
        )));
    }
    Ok(())
}

/// Case-sensitive exact-match uniqueness. Scope is the petition for tier
/// titles and global for petition titles; the caller supplies the
/// corresponding title set.
pub fn assert_title_unique(existing_titles: &[String], candidate: &str) -> Result<(), CoreError> {
    if existing_titles.iter().any(|t| t == candidate) {
        return Err(CoreError::Conflict(format!(
            "title already exists: {}",
            candidate
        )));
    }
    Ok(())
}

/// Blocks tier edit/delete and petition delete once any pledge exists.
pub fn assert_no_active_support(pledge_count: i64) -> Result<(), CoreError> {
    if pledge_count > 0 {
        return Err(CoreError::Conflict(
            "resource has one or more supporters".to_string(),
        ));
    }
    Ok(())
}

/// The last remaining tier of a petition cannot be deleted.
pub fn assert_not_sole_tier(tier_count_for_petition: usize) -> Result<(), CoreError> {
    if tier_count_for_petition == 1 {
        return Err(CoreError::Conflict(
            "cannot delete the only support tier of a petition".to_string(),
        ));
    }
    Ok(())
}

/// Validates the initial tier set of a create-petition request: 1 to 3
/// tiers, pairwise-distinct non-empty titles, non-negative costs.
pub fn validate_initial_tiers(tiers: &[NewSupportTier]) -> Result<(), CoreError> {
    if tiers.is_empty() {
        return Err(CoreError::Validation(
            "a petition requires at least one support tier".to_string(),
        ));
    }
    if tiers.len() > MAX_SUPPORT_TIERS {
        return Err(CoreError::LimitExceeded(format!(
            "a petition may have at most {} support tiers",
            MAX_SUPPORT_TIERS
        )));
    }

    let mut seen: Vec<&str> = Vec::with_capacity(tiers.len());
    for tier in tiers {
        if tier.title.is_empty() {
            return Err(CoreError::Validation(
                "support tier title must be non-empty".to_string(),
            ));
        }
        if tier.cost < 0 {
            return Err(CoreError::Validation(
                "support tier cost must be >= 0".to_string(),
            ));
        }
        if seen.contains(&tier.title.as_str()) {
            return Err(CoreError::Conflict(format!(
                "duplicate support tier title: {}",
                tier.title
            )));
        }
        seen.push(tier.title.as_str());
    }
    Ok(())
}
