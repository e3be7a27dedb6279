use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use ts_rs::TS;

/// Catalog entry shown on product cards and the wishlist grid
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS, PartialEq)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub image: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    pub rating: f64,
    pub discount: Option<i64>, // Percentage shown on the card badge
    pub category_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProduct {
    pub id: String,
    pub title: String,
    pub image: Option<String>,
    pub price: f64,
    pub original_price: Option<f64>,
    pub rating: Option<f64>,
    pub discount: Option<i64>,
    pub category_id: Option<String>,
}

impl Product {
    pub async fn create(pool: &SqlitePool, data: &CreateProduct) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r#"INSERT INTO products (id, title, image, price, original_price, rating, discount, category_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id, title, image, price, original_price, rating, discount, category_id, created_at"#,
        )
        .bind(&data.id)
        .bind(&data.title)
        .bind(&data.image)
        .bind(data.price)
        .bind(data.original_price)
        .bind(data.rating.unwrap_or(0.0))
        .bind(data.discount)
        .bind(&data.category_id)
        .fetch_one(pool)
        .await
    }

    pub async fn find_all(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(
            r#"SELECT id, title, image, price, original_price, rating, discount, category_id, created_at
               FROM products
               ORDER BY created_at DESC"#,
        )
        .fetch_all(pool)
        .await
    }

    /// Look up the products for a set of ids. Unknown ids are skipped.
    pub async fn find_by_ids(pool: &SqlitePool, ids: &[String]) -> Result<Vec<Self>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, image, price, original_price, rating, discount, category_id, created_at FROM products WHERE id IN (",
        );
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(") ORDER BY created_at DESC");

        query.build_query_as::<Product>().fetch_all(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    fn product(id: &str, title: &str, price: f64) -> CreateProduct {
        CreateProduct {
            id: id.to_string(),
            title: title.to_string(),
            image: None,
            price,
            original_price: None,
            rating: None,
            discount: None,
            category_id: None,
        }
    }

    #[tokio::test]
    async fn test_create_defaults_rating() {
        let db = DBService::new("sqlite::memory:").await.unwrap();

        let created = Product::create(&db.pool, &product("p1", "Running Shoes", 49.99))
            .await
            .unwrap();

        assert_eq!(created.id, "p1");
        assert_eq!(created.rating, 0.0);
        assert_eq!(Product::find_all(&db.pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_ids_skips_unknown_ids() {
        let db = DBService::new("sqlite::memory:").await.unwrap();
        Product::create(&db.pool, &product("p1", "Running Shoes", 49.99))
            .await
            .unwrap();
        Product::create(&db.pool, &product("p2", "Headphones", 89.0))
            .await
            .unwrap();

        let found = Product::find_by_ids(&db.pool, &["p2".to_string(), "gone".to_string()])
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Headphones");
        assert!(Product::find_by_ids(&db.pool, &[]).await.unwrap().is_empty());
    }
}
