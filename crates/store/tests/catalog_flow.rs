//! End-to-end store and service tests against a real Postgres. Each test
//! migrates into a fresh schema and drops it afterwards, so runs are
//! independent and repeatable. Skipped unless CAUSEWAY_TEST_DB_URL (or
//! DATABASE_URL) points at a reachable database.

use std::time::Duration;

use causeway_catalog::CatalogService;
use causeway_contracts::{
    CoreError, NewPetition, NewSupporter, NewSupportTier, PetitionPatch, PetitionSearchQuery,
    Principal, SortOrder, SupportTierPatch,
};
use causeway_store::Store;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

fn test_db_url() -> Option<String> {
    std::env::var("CAUSEWAY_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

struct Fixture {
    admin: PgPool,
    schema: String,
    catalog: CatalogService,
}

async fn fixture() -> Option<Fixture> {
    let db_url = test_db_url()?;

    let schema = format!("causeway_test_{}", ulid::Ulid::new());
    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");

    let create_schema = format!("CREATE SCHEMA {}", schema);
    sqlx::query(&create_schema)
        .execute(&admin)
        .await
        .expect("create schema should succeed");

    let schema_url = schema_db_url(&db_url, &schema);
    let store = Store::connect_and_migrate(&schema_url, Duration::from_millis(2000))
        .await
        .expect("store init should succeed");

    Some(Fixture {
        admin,
        schema,
        catalog: CatalogService::new(store),
    })
}

impl Fixture {
    fn pool(&self) -> &PgPool {
        self.catalog.store().pool()
    }

    async fn teardown(self) {
        self.catalog.store().close().await;
        let drop_schema = format!("DROP SCHEMA {} CASCADE", self.schema);
        let _ = sqlx::query(&drop_schema).execute(&self.admin).await;
        self.admin.close().await;
    }

    async fn seed_user(&self, email: &str, first: &str, last: &str) -> Principal {
        let row = sqlx::query(
            "INSERT INTO users (email, first_name, last_name, password_hash) \
             VALUES ($1, $2, $3, 'x') RETURNING id",
        )
        .bind(email)
        .bind(first)
        .bind(last)
        .fetch_one(self.pool())
        .await
        .expect("insert user should succeed");
        Principal {
            user_id: row.try_get("id").expect("user id"),
        }
    }

    async fn seed_category(&self, name: &str) -> i64 {
        let row = sqlx::query("INSERT INTO category (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(self.pool())
            .await
            .expect("insert category should succeed");
        row.try_get("id").expect("category id")
    }
}

fn tier(title: &str, cost: i64) -> NewSupportTier {
    NewSupportTier {
        title: title.to_string(),
        description: format!("{} tier", title),
        cost,
    }
}

fn petition(title: &str, category_id: i64, tiers: Vec<NewSupportTier>) -> NewPetition {
    NewPetition {
        title: title.to_string(),
        description: format!("about {}", title),
        category_id,
        support_tiers: tiers,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listing_count_is_the_filter_total_not_the_page_length() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let cat = fx.seed_category("environment").await;

    for i in 0..5 {
        fx.catalog
            .create_petition(owner, &petition(&format!("Petition {i}"), cat, vec![tier("Base", i)]))
            .await
            .expect("create should succeed");
    }

    let page = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            count: Some(2),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(page.petitions.len(), 2);
    assert_eq!(page.count, 5);

    // An offset past the end still reports the full total.
    let past_end = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            start_index: 100,
            count: Some(2),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert!(past_end.petitions.is_empty());
    assert_eq!(past_end.count, 5);

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cost_ceiling_recomputes_minimum_within_the_ceiling() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let cat = fx.seed_category("environment").await;

    fx.catalog
        .create_petition(
            owner,
            &petition("Wide range", cat, vec![tier("Low", 5), tier("High", 20)]),
        )
        .await
        .expect("create should succeed");
    fx.catalog
        .create_petition(owner, &petition("Mid only", cat, vec![tier("Mid", 15)]))
        .await
        .expect("create should succeed");

    let capped = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            supporting_cost: Some(10),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(capped.count, 1);
    assert_eq!(capped.petitions[0].title, "Wide range");
    // The advertised cost is the cheapest tier within the ceiling.
    assert_eq!(capped.petitions[0].supporting_cost, Some(5));

    let uncapped = fx
        .catalog
        .list_petitions(&PetitionSearchQuery::default())
        .await
        .expect("listing should succeed");
    assert_eq!(uncapped.count, 2);

    // A ceiling below every tier excludes the petition entirely.
    let strict = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            supporting_cost: Some(3),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(strict.count, 0);

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_matches_title_or_description_case_insensitively() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let cat = fx.seed_category("environment").await;

    fx.catalog
        .create_petition(owner, &petition("Save the Rivers", cat, vec![tier("Base", 1)]))
        .await
        .expect("create should succeed");
    let mut about_parks = petition("Green spaces", cat, vec![tier("Base", 1)]);
    about_parks.description = "More parks along rivers".to_string();
    fx.catalog
        .create_petition(owner, &about_parks)
        .await
        .expect("create should succeed");
    fx.catalog
        .create_petition(owner, &petition("Bike lanes", cat, vec![tier("Base", 1)]))
        .await
        .expect("create should succeed");

    let hits = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            q: Some("RIVERS".to_string()),
            sort_by: SortOrder::AlphabeticalAsc,
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(hits.count, 2);
    assert_eq!(hits.petitions[0].title, "Green spaces");
    assert_eq!(hits.petitions[1].title, "Save the Rivers");

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn petition_titles_are_globally_unique_and_tiers_capped_at_three() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let other = fx.seed_user("other@example.test", "Otto", "Other").await;
    let cat = fx.seed_category("environment").await;

    let petition_id = fx
        .catalog
        .create_petition(owner, &petition("Unique title", cat, vec![tier("A", 1), tier("B", 2)]))
        .await
        .expect("create should succeed");

    // Uniqueness is global, not per owner.
    let err = fx
        .catalog
        .create_petition(other, &petition("Unique title", cat, vec![tier("A", 1)]))
        .await
        .expect_err("duplicate title must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    fx.catalog
        .add_support_tier(owner, petition_id, &tier("C", 3))
        .await
        .expect("third tier should be accepted");
    let err = fx
        .catalog
        .add_support_tier(owner, petition_id, &tier("D", 4))
        .await
        .expect_err("fourth tier must be rejected");
    assert!(matches!(err, CoreError::LimitExceeded(_)));

    // Tier titles are unique within the petition only.
    let detail = fx.catalog.petition_detail(petition_id).await.expect("detail");
    let tier_b = detail.support_tiers[1].support_tier_id;
    let err = fx
        .catalog
        .update_support_tier(
            owner,
            petition_id,
            tier_b,
            &SupportTierPatch {
                title: Some("A".to_string()),
                ..SupportTierPatch::default()
            },
        )
        .await
        .expect_err("duplicate tier title must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn merge_patch_keeps_absent_fields_and_enforces_ownership() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let other = fx.seed_user("other@example.test", "Otto", "Other").await;
    let cat = fx.seed_category("environment").await;

    let petition_id = fx
        .catalog
        .create_petition(owner, &petition("Original", cat, vec![tier("Base", 1)]))
        .await
        .expect("create should succeed");

    let err = fx
        .catalog
        .update_petition(
            other,
            petition_id,
            &PetitionPatch {
                title: Some("Hijacked".to_string()),
                ..PetitionPatch::default()
            },
        )
        .await
        .expect_err("non-owner edit must be rejected");
    assert!(matches!(err, CoreError::Forbidden(_)));

    fx.catalog
        .update_petition(
            owner,
            petition_id,
            &PetitionPatch {
                title: Some("Renamed".to_string()),
                ..PetitionPatch::default()
            },
        )
        .await
        .expect("owner edit should succeed");

    let detail = fx.catalog.petition_detail(petition_id).await.expect("detail");
    assert_eq!(detail.summary.title, "Renamed");
    assert_eq!(detail.description, "about Original");

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pledges_freeze_tiers_and_block_petition_deletion() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let backer = fx.seed_user("backer@example.test", "Bea", "Backer").await;
    let cat = fx.seed_category("environment").await;

    let petition_id = fx
        .catalog
        .create_petition(owner, &petition("Frozen", cat, vec![tier("A", 1), tier("B", 2)]))
        .await
        .expect("create should succeed");
    let detail = fx.catalog.petition_detail(petition_id).await.expect("detail");
    let tier_a = detail.support_tiers[0].support_tier_id;
    let tier_b = detail.support_tiers[1].support_tier_id;

    fx.catalog
        .register_support(
            backer,
            petition_id,
            &NewSupporter {
                support_tier_id: tier_a,
                message: Some("good cause".to_string()),
            },
        )
        .await
        .expect("pledge should succeed");

    let err = fx
        .catalog
        .update_support_tier(
            owner,
            petition_id,
            tier_a,
            &SupportTierPatch {
                cost: Some(99),
                ..SupportTierPatch::default()
            },
        )
        .await
        .expect_err("pledged tier edit must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    let err = fx
        .catalog
        .delete_support_tier(owner, petition_id, tier_a)
        .await
        .expect_err("pledged tier delete must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    let err = fx
        .catalog
        .delete_petition(owner, petition_id)
        .await
        .expect_err("pledged petition delete must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    // The unpledged tier can still be deleted while a sibling remains.
    fx.catalog
        .delete_support_tier(owner, petition_id, tier_b)
        .await
        .expect("unpledged tier delete should succeed");

    // Now tier A is the sole tier and cannot be deleted even without pledges
    // on its siblings.
    let err = fx
        .catalog
        .delete_support_tier(owner, petition_id, tier_a)
        .await
        .expect_err("sole tier delete must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pledge_preconditions_follow_the_fixed_order() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let backer = fx.seed_user("backer@example.test", "Bea", "Backer").await;
    let cat = fx.seed_category("environment").await;

    let petition_id = fx
        .catalog
        .create_petition(owner, &petition("Backed", cat, vec![tier("A", 1), tier("B", 2)]))
        .await
        .expect("create should succeed");
    let other_petition = fx
        .catalog
        .create_petition(owner, &petition("Elsewhere", cat, vec![tier("X", 1)]))
        .await
        .expect("create should succeed");

    let detail = fx.catalog.petition_detail(petition_id).await.expect("detail");
    let tier_a = detail.support_tiers[0].support_tier_id;
    let tier_b = detail.support_tiers[1].support_tier_id;
    let foreign_tier = fx
        .catalog
        .petition_detail(other_petition)
        .await
        .expect("detail")
        .support_tiers[0]
        .support_tier_id;

    // Unknown petition wins over unknown tier.
    let err = fx
        .catalog
        .register_support(
            backer,
            999_999,
            &NewSupporter {
                support_tier_id: tier_a,
                message: None,
            },
        )
        .await
        .expect_err("unknown petition must be rejected");
    assert!(matches!(err, CoreError::NotFound(_)));

    // A tier of a different petition is not found under this one.
    let err = fx
        .catalog
        .register_support(
            backer,
            petition_id,
            &NewSupporter {
                support_tier_id: foreign_tier,
                message: None,
            },
        )
        .await
        .expect_err("foreign tier must be rejected");
    assert!(matches!(err, CoreError::NotFound(_)));

    let err = fx
        .catalog
        .register_support(
            owner,
            petition_id,
            &NewSupporter {
                support_tier_id: tier_a,
                message: None,
            },
        )
        .await
        .expect_err("owner self-pledge must be rejected");
    assert!(matches!(err, CoreError::Forbidden(_)));

    let record = fx
        .catalog
        .register_support(
            backer,
            petition_id,
            &NewSupporter {
                support_tier_id: tier_a,
                message: None,
            },
        )
        .await
        .expect("first pledge should succeed");
    assert_eq!(record.supporter_first_name, "Bea");
    assert!(record.message.is_none());

    let err = fx
        .catalog
        .register_support(
            backer,
            petition_id,
            &NewSupporter {
                support_tier_id: tier_a,
                message: None,
            },
        )
        .await
        .expect_err("duplicate pledge must be rejected");
    assert!(matches!(err, CoreError::Conflict(_)));

    // A different tier of the same petition is a distinct pledge.
    fx.catalog
        .register_support(
            backer,
            petition_id,
            &NewSupporter {
                support_tier_id: tier_b,
                message: None,
            },
        )
        .await
        .expect("second-tier pledge should succeed");

    let supporters = fx
        .catalog
        .list_supporters(petition_id)
        .await
        .expect("supporter listing should succeed");
    assert_eq!(supporters.len(), 2);

    let detail = fx.catalog.petition_detail(petition_id).await.expect("detail");
    assert_eq!(detail.summary.number_of_supporters, 2);
    assert_eq!(detail.money_raised, Some(3));

    fx.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn supporter_filter_and_owner_filter_compose() {
    let Some(fx) = fixture().await else {
        eprintln!("skipping DB test; set CAUSEWAY_TEST_DB_URL to enable");
        return;
    };

    let owner = fx.seed_user("owner@example.test", "Olive", "Owner").await;
    let rival = fx.seed_user("rival@example.test", "Rita", "Rival").await;
    let backer = fx.seed_user("backer@example.test", "Bea", "Backer").await;
    let cat = fx.seed_category("environment").await;

    let mine = fx
        .catalog
        .create_petition(owner, &petition("Mine", cat, vec![tier("A", 1)]))
        .await
        .expect("create should succeed");
    fx.catalog
        .create_petition(rival, &petition("Theirs", cat, vec![tier("A", 1)]))
        .await
        .expect("create should succeed");

    let tier_id = fx
        .catalog
        .petition_detail(mine)
        .await
        .expect("detail")
        .support_tiers[0]
        .support_tier_id;
    fx.catalog
        .register_support(
            backer,
            mine,
            &NewSupporter {
                support_tier_id: tier_id,
                message: None,
            },
        )
        .await
        .expect("pledge should succeed");

    let by_owner = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            owner_id: Some(owner.user_id),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(by_owner.count, 1);
    assert_eq!(by_owner.petitions[0].title, "Mine");

    let by_supporter = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            supporter_id: Some(backer.user_id),
            ..PetitionSearchQuery::default()
        })
        .await
        .expect("listing should succeed");
    assert_eq!(by_supporter.count, 1);
    assert_eq!(by_supporter.petitions[0].title, "Mine");

    let unknown_category = fx
        .catalog
        .list_petitions(&PetitionSearchQuery {
            category_ids: vec![cat + 100],
            ..PetitionSearchQuery::default()
        })
        .await
        .expect_err("unknown category id must be rejected");
    assert!(matches!(unknown_category, CoreError::Validation(_)));

    fx.teardown().await;
}
