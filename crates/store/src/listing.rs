//! Assembly of the two catalog listing statements: the bounded page and the
//! unpaginated total. Both are built from one shared predicate walk so their
//! filter semantics can never drift apart, and every value travels as a
//! `$N` bind; nothing is interpolated into the SQL text.

use causeway_contracts::{PetitionSearchQuery, SortOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bind {
    Int(i64),
    Text(String),
}

#[derive(Debug, Default)]
pub(crate) struct SqlBuilder {
    sql: String,
    binds: Vec<Bind>,
}

impl SqlBuilder {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: Bind) {
        self.binds.push(value);
        self.sql.push('$');
        self.sql.push_str(&self.binds.len().to_string());
    }

    fn finish(self) -> (String, Vec<Bind>) {
        (self.sql, self.binds)
    }
}

pub(crate) struct ListingSql {
    pub page_sql: String,
    pub page_binds: Vec<Bind>,
    pub count_sql: String,
    pub count_binds: Vec<Bind>,
}

const SUMMARY_COLUMNS: &str = "SELECT p.id, p.title, p.category_id, p.owner_id, \
     u.first_name, u.last_name, \
     COALESCE(sc.supporters, 0) AS supporters, \
     to_char(p.creation_date AT TIME ZONE 'UTC', 'YYYY-MM-DD\"T\"HH24:MI:SS\"Z\"') AS creation_date, \
     mc.min_cost";

/// Builds the page query and the count query for one listing request. The
/// count query runs the identical predicate set with pagination ignored;
/// the returned total is never derived from the page.
pub(crate) fn build_listing_sql(query: &PetitionSearchQuery) -> ListingSql {
    let mut page = SqlBuilder::default();
    page.push(SUMMARY_COLUMNS);
    push_scope(&mut page, query, true);
    page.push(" ORDER BY ");
    page.push(order_clause(query.sort_by));
    if let Some(count) = query.count {
        page.push(" LIMIT ");
        page.bind(Bind::Int(count));
    }
    if query.start_index > 0 {
        page.push(" OFFSET ");
        page.bind(Bind::Int(query.start_index));
    }

    let mut count = SqlBuilder::default();
    count.push("SELECT COUNT(p.id)");
    push_scope(&mut count, query, false);

    let (page_sql, page_binds) = page.finish();
    let (count_sql, count_binds) = count.finish();
    ListingSql {
        page_sql,
        page_binds,
        count_sql,
        count_binds,
    }
}

/// Shared FROM/WHERE scope. The supporter-count join is one row per
/// petition, so the count query skips it without changing cardinality.
fn push_scope(b: &mut SqlBuilder, query: &PetitionSearchQuery, with_supporter_count: bool) {
    b.push(" FROM petition p JOIN users u ON p.owner_id = u.id");

    if with_supporter_count {
        b.push(
            " LEFT JOIN (SELECT petition_id, COUNT(*) AS supporters \
             FROM supporter GROUP BY petition_id) sc ON p.id = sc.petition_id",
        );
    }

    match query.supporting_cost {
        Some(ceiling) => {
            b.push(
                " LEFT JOIN (SELECT petition_id, MIN(cost) AS min_cost \
                 FROM support_tier WHERE cost <= ",
            );
            b.bind(Bind::Int(ceiling));
            b.push(" GROUP BY petition_id) mc ON p.id = mc.petition_id");
        }
        None => {
            b.push(
                " LEFT JOIN (SELECT petition_id, MIN(cost) AS min_cost \
                 FROM support_tier GROUP BY petition_id) mc ON p.id = mc.petition_id",
            );
        }
    }

    // Tierless petitions carry no defined minimum cost and never appear in
    // a listing, ceiling or not.
    b.push(" WHERE mc.min_cost IS NOT NULL");

    if let Some(q) = query.q.as_deref() {
        let pattern = format!("%{}%", q);
        b.push(" AND (p.title ILIKE ");
        b.bind(Bind::Text(pattern.clone()));
        b.push(" OR p.description ILIKE ");
        b.bind(Bind::Text(pattern));
        b.push(")");
    }

    if !query.category_ids.is_empty() {
        b.push(" AND p.category_id IN (");
        for (idx, id) in query.category_ids.iter().enumerate() {
            if idx != 0 {
                b.push(", ");
            }
            b.bind(Bind::Int(*id));
        }
        b.push(")");
    }

    if let Some(owner_id) = query.owner_id {
        b.push(" AND p.owner_id = ");
        b.bind(Bind::Int(owner_id));
    }

    if let Some(supporter_id) = query.supporter_id {
        b.push(" AND p.id IN (SELECT petition_id FROM supporter WHERE user_id = ");
        b.bind(Bind::Int(supporter_id));
        b.push(")");
    }
}

fn order_clause(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::AlphabeticalAsc => "p.title ASC, p.id ASC",
        SortOrder::AlphabeticalDesc => "p.title DESC, p.id ASC",
        SortOrder::CostAsc => "mc.min_cost ASC, p.id ASC",
        SortOrder::CostDesc => "mc.min_cost DESC, p.id ASC",
        SortOrder::CreatedAsc => "p.creation_date ASC, p.id ASC",
        SortOrder::CreatedDesc => "p.creation_date DESC, p.id ASC",
    }
}
