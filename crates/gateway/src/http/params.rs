//! Listing query-string parsing. The wire uses camelCase keys and allows
//! `categoryIds` to repeat; every other key may appear at most once, and an
//! unknown key rejects the whole request.

use causeway_contracts::{CoreError, PetitionSearchQuery, SortOrder};

pub fn parse_search_query(pairs: &[(String, String)]) -> Result<PetitionSearchQuery, CoreError> {
    let mut query = PetitionSearchQuery::default();
    let mut seen: Vec<&str> = Vec::new();

    for (key, value) in pairs {
        match key.as_str() {
            "q" => {
                reject_repeat(&mut seen, "q")?;
                query.q = Some(value.clone());
            }
            "categoryIds" => {
                query.category_ids.push(parse_i64(value, "categoryIds")?);
            }
            "supportingCost" => {
                reject_repeat(&mut seen, "supportingCost")?;
                query.supporting_cost = Some(parse_i64(value, "supportingCost")?);
            }
            "ownerId" => {
                reject_repeat(&mut seen, "ownerId")?;
                query.owner_id = Some(parse_i64(value, "ownerId")?);
            }
            "supporterId" => {
                reject_repeat(&mut seen, "supporterId")?;
                query.supporter_id = Some(parse_i64(value, "supporterId")?);
            }
            "sortBy" => {
                reject_repeat(&mut seen, "sortBy")?;
                query.sort_by = SortOrder::parse(value).ok_or_else(|| {
                    CoreError::Validation(format!("unknown sortBy value: {}", value))
                })?;
            }
            "startIndex" => {
                reject_repeat(&mut seen, "startIndex")?;
                query.start_index = parse_i64(value, "startIndex")?;
            }
            "count" => {
                reject_repeat(&mut seen, "count")?;
                query.count = Some(parse_i64(value, "count")?);
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "unknown query parameter: {}",
                    other
                )));
            }
        }
    }

    query.validate()?;
    Ok(query)
}

fn reject_repeat<'a>(seen: &mut Vec<&'a str>, key: &'a str) -> Result<(), CoreError> {
    if seen.contains(&key) {
        return Err(CoreError::Validation(format!(
            "query parameter given more than once: {}",
            key
        )));
    }
    seen.push(key);
    Ok(())
}

fn parse_i64(value: &str, key: &str) -> Result<i64, CoreError> {
    value
        .parse::<i64>()
        .map_err(|_| CoreError::Validation(format!("{} must be an integer", key)))
}
