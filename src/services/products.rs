/*!
 * Branch-scoped product storage
 *
 * [`ProductRepository`] is bound to one [`DataScope`] and issues the same
 * statements against either `products` or `<schema>.products`.
 * [`ProductService`] resolves a branch to its scope first.
 */

use crate::{
    db::DbPool,
    entities::product::{self, Column as ProductColumn, Entity as Product},
    errors::ServiceError,
    services::scope::{DataScope, ScopeResolver},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr, Order, Query, SimpleExpr},
    ConnectionTrait, DbBackend, EntityTrait, Statement,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

const PRODUCTS_TABLE: &str = "products";

const ALL_COLUMNS: [ProductColumn; 7] = [
    ProductColumn::Id,
    ProductColumn::Sku,
    ProductColumn::Name,
    ProductColumn::Price,
    ProductColumn::IsActive,
    ProductColumn::CreatedAt,
    ProductColumn::UpdatedAt,
];

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("Price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 64, message = "SKU must be 1-64 characters"))]
    pub sku: String,
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 64, message = "SKU must be 1-64 characters"))]
    pub sku: Option<String>,
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: Option<String>,
    #[validate(custom = "validate_price")]
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

/// Product CRUD against the table of a single data scope
pub struct ProductRepository {
    db_pool: Arc<DbPool>,
    scope: DataScope,
}

impl ProductRepository {
    pub fn new(db_pool: Arc<DbPool>, scope: DataScope) -> Self {
        Self { db_pool, scope }
    }

    pub fn scope(&self) -> &DataScope {
        &self.scope
    }

    fn backend(&self) -> DbBackend {
        self.db_pool.get_database_backend()
    }

    /// Products ordered by SKU, 1-based page, with the total row count
    pub async fn list(&self, page: u64, per_page: u64) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let select = Query::select()
            .columns(ALL_COLUMNS)
            .from(self.scope.table_ref(PRODUCTS_TABLE))
            .order_by(ProductColumn::Sku, Order::Asc)
            .order_by(ProductColumn::Id, Order::Asc)
            .limit(per_page)
            .offset(page.saturating_sub(1).saturating_mul(per_page))
            .to_owned();

        let items = Product::find()
            .from_raw_sql(self.backend().build(&select))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let count = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("total"))
            .from(self.scope.table_ref(PRODUCTS_TABLE))
            .to_owned();
        let total: i64 = self
            .db_pool
            .query_one(self.backend().build(&count))
            .await
            .map_err(ServiceError::db_error)?
            .map(|row| row.try_get("", "total"))
            .transpose()
            .map_err(ServiceError::db_error)?
            .unwrap_or(0);

        Ok((items, total.max(0) as u64))
    }

    pub async fn get(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        let select = Query::select()
            .columns(ALL_COLUMNS)
            .from(self.scope.table_ref(PRODUCTS_TABLE))
            .and_where(Expr::col(ProductColumn::Id).eq(product_id))
            .to_owned();

        Product::find()
            .from_raw_sql(self.backend().build(&select))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Product {} not found in {} scope",
                    product_id, self.scope
                ))
            })
    }

    pub async fn create(&self, input: CreateProductInput) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let now = Utc::now();
        let model = product::Model {
            id: Uuid::new_v4(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            price: input.price,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let insert = Query::insert()
            .into_table(self.scope.table_ref(PRODUCTS_TABLE))
            .columns(ALL_COLUMNS)
            .values([
                model.id.into(),
                model.sku.clone().into(),
                model.name.clone().into(),
                model.price.into(),
                model.is_active.into(),
                model.created_at.into(),
                model.updated_at.into(),
            ])
            .map_err(|e| ServiceError::InternalError(format!("Failed to build insert: {}", e)))?
            .to_owned();

        self.execute(&self.backend().build(&insert)).await?;
        debug!(product_id = %model.id, scope = %self.scope, "Product created");
        Ok(model)
    }

    pub async fn update(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let mut values: Vec<(ProductColumn, SimpleExpr)> = Vec::new();
        if let Some(sku) = input.sku {
            values.push((ProductColumn::Sku, sku.trim().to_string().into()));
        }
        if let Some(name) = input.name {
            values.push((ProductColumn::Name, name.trim().to_string().into()));
        }
        if let Some(price) = input.price {
            values.push((ProductColumn::Price, price.into()));
        }
        if let Some(is_active) = input.is_active {
            values.push((ProductColumn::IsActive, is_active.into()));
        }
        values.push((ProductColumn::UpdatedAt, Utc::now().into()));

        let update = Query::update()
            .table(self.scope.table_ref(PRODUCTS_TABLE))
            .values(values)
            .and_where(Expr::col(ProductColumn::Id).eq(product_id))
            .to_owned();

        let affected = self.execute(&self.backend().build(&update)).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found in {} scope",
                product_id, self.scope
            )));
        }
        self.get(product_id).await
    }

    pub async fn delete(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let delete = Query::delete()
            .from_table(self.scope.table_ref(PRODUCTS_TABLE))
            .and_where(Expr::col(ProductColumn::Id).eq(product_id))
            .to_owned();

        let affected = self.execute(&self.backend().build(&delete)).await?;
        if affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found in {} scope",
                product_id, self.scope
            )));
        }
        Ok(())
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, ServiceError> {
        self.db_pool
            .execute(statement.clone())
            .await
            .map(|result| result.rows_affected())
            .map_err(ServiceError::db_error)
    }
}

/// Routes product CRUD for a branch to that branch's data scope
pub struct ProductService {
    db_pool: Arc<DbPool>,
    resolver: Arc<ScopeResolver>,
}

impl ProductService {
    pub fn new(db_pool: Arc<DbPool>, resolver: Arc<ScopeResolver>) -> Self {
        Self { db_pool, resolver }
    }

    /// Repository bound to the branch's scope. Unknown branch is `NotFound`.
    pub async fn repository(&self, branch_id: Uuid) -> Result<ProductRepository, ServiceError> {
        let resolved = self.resolver.resolve(branch_id).await?;
        Ok(ProductRepository::new(self.db_pool.clone(), resolved.scope))
    }

    /// Like [`Self::repository`] but rejects deactivated branches, which keep
    /// their catalogue readable and frozen.
    async fn writable_repository(&self, branch_id: Uuid) -> Result<ProductRepository, ServiceError> {
        let resolved = self.resolver.resolve(branch_id).await?;
        if !resolved.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Branch {} is inactive",
                branch_id
            )));
        }
        Ok(ProductRepository::new(self.db_pool.clone(), resolved.scope))
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        branch_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        self.repository(branch_id).await?.list(page, per_page).await
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, branch_id: Uuid, product_id: Uuid) -> Result<product::Model, ServiceError> {
        self.repository(branch_id).await?.get(product_id).await
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        branch_id: Uuid,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        self.writable_repository(branch_id).await?.create(input).await
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        self.writable_repository(branch_id)
            .await?
            .update(product_id, input)
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_product(&self, branch_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        self.writable_repository(branch_id).await?.delete(product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn negative_price_fails_validation() {
        let input = CreateProductInput {
            sku: "SKU-1".into(),
            name: "Cola 330ml".into(),
            price: dec!(-0.01),
        };
        assert!(input.validate().is_err());

        let input = CreateProductInput {
            price: dec!(1.25),
            ..input
        };
        assert!(input.validate().is_ok());
    }

    #[test]
    fn empty_update_fields_fail_validation() {
        let input = UpdateProductInput {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(input.validate().is_err());
        assert!(UpdateProductInput::default().validate().is_ok());
    }
}
