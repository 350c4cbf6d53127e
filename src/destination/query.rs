/*!
 * @file destination/query.rs
 * @brief Typed SQL read-builder for the columnar destination (§4.8)
 */

/// Builds `SELECT <cols> FROM <db>.<tbl> [FINAL] [WHERE …] [ORDER BY …]
/// [LIMIT n] [OFFSET k]`. Predicates compose via typed methods; a caller
/// needing something the builder doesn't cover can add a raw clause.
#[derive(Debug, Clone)]
pub struct ReadQueryBuilder {
    database: String,
    table: String,
    columns: Vec<String>,
    final_: bool,
    predicates: Vec<String>,
    order_by: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ReadQueryBuilder {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            columns: vec!["*".to_string()],
            final_: false,
            predicates: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn columns(mut self, cols: &[&str]) -> Self {
        self.columns = cols.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Applies the `FINAL` projection so the dedup-by-version engine
    /// collapses rows sharing a primary key at read time (§4.8).
    pub fn dedup_final(mut self) -> Self {
        self.final_ = true;
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.predicates.push(format!("collection = {}", quote(collection)));
        self
    }

    pub fn doc_id(mut self, doc_id: &str) -> Self {
        self.predicates.push(format!("doc_id = {}", quote(doc_id)));
        self
    }

    pub fn exclude_deleted(mut self) -> Self {
        self.predicates.push("is_deleted = 0".to_string());
        self
    }

    pub fn updated_after(mut self, millis: i64) -> Self {
        self.predicates.push(format!("updated_at > {}", millis));
        self
    }

    pub fn updated_before(mut self, millis: i64) -> Self {
        self.predicates.push(format!("updated_at < {}", millis));
        self
    }

    pub fn raw_where(mut self, clause: &str) -> Self {
        self.predicates.push(clause.to_string());
        self
    }

    pub fn order_by(mut self, clause: &str) -> Self {
        self.order_by = Some(clause.to_string());
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn build(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}.{}", self.columns.join(", "), self.database, self.table);

        if self.final_ {
            sql.push_str(" FINAL");
        }
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}

/// Quotes a string literal with doubled single-quote escaping (§4.8).
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_shaped_select_with_final_and_predicates() {
        let sql = ReadQueryBuilder::new("fauxdb_cdc", "realtime_changes")
            .dedup_final()
            .collection("users")
            .exclude_deleted()
            .order_by("updated_at DESC")
            .limit(10)
            .offset(5)
            .build();

        assert_eq!(
            sql,
            "SELECT * FROM fauxdb_cdc.realtime_changes FINAL WHERE collection = 'users' AND is_deleted = 0 ORDER BY updated_at DESC LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn quotes_escape_embedded_single_quotes() {
        let sql = ReadQueryBuilder::new("db", "tbl").doc_id("o'brien").build();
        assert!(sql.contains("doc_id = 'o''brien'"));
    }

    #[test]
    fn exclude_deleted_filters_tombstoned_rows() {
        let sql = ReadQueryBuilder::new("db", "tbl").doc_id("k1").exclude_deleted().build();
        assert!(sql.contains("is_deleted = 0"));
    }
}
