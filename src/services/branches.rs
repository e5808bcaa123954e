use crate::{
    db::DbPool,
    entities::branch::{self, Entity as Branch},
    errors::ServiceError,
    events::{Event, EventSender},
    services::scope::{provision_scope, DataScope, SchemaName, ScopeResolver},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBranchInput {
    #[validate(length(min = 1, max = 32, message = "Branch code must be 1-32 characters"))]
    pub code: String,
    #[validate(length(min = 1, max = 255, message = "Branch name must be 1-255 characters"))]
    pub name: String,
    /// Keep this branch's products in their own schema
    pub isolated_schema: Option<SchemaName>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBranchInput {
    #[validate(length(min = 1, max = 255, message = "Branch name must be 1-255 characters"))]
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

/// Loads a branch or fails with `NotFound`; `require_active` also rejects
/// deactivated branches.
pub async fn require_branch<C>(
    conn: &C,
    branch_id: Uuid,
    require_active: bool,
) -> Result<branch::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let branch = Branch::find_by_id(branch_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Branch {} not found", branch_id)))?;

    if require_active && !branch.is_active {
        return Err(ServiceError::InvalidOperation(format!(
            "Branch {} ({}) is inactive",
            branch.code, branch_id
        )));
    }
    Ok(branch)
}

pub struct BranchService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    resolver: Arc<ScopeResolver>,
}

impl BranchService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        resolver: Arc<ScopeResolver>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            resolver,
        }
    }

    /// Creates a branch. An isolated schema is provisioned before the row is
    /// written so a branch never points at a scope that does not exist.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_branch(&self, input: CreateBranchInput) -> Result<branch::Model, ServiceError> {
        input.validate()?;
        let db = self.db_pool.as_ref();

        let code = input.code.trim().to_uppercase();
        let existing = Branch::find()
            .filter(branch::Column::Code.eq(code.clone()))
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if existing > 0 {
            return Err(ServiceError::Conflict(format!(
                "Branch code {} already exists",
                code
            )));
        }

        if let Some(schema) = &input.isolated_schema {
            let sharing = Branch::find()
                .filter(branch::Column::IsolatedSchema.eq(schema.as_str()))
                .count(db)
                .await
                .map_err(ServiceError::db_error)?;
            if sharing > 0 {
                return Err(ServiceError::Conflict(format!(
                    "Schema {} already belongs to another branch",
                    schema
                )));
            }

            provision_scope(
                db,
                &DataScope::Isolated(schema.clone()),
                self.resolver.sqlite_scope_dir(),
            )
            .await?;
        }

        let now = Utc::now();
        let model = branch::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            name: Set(input.name.trim().to_string()),
            isolated_schema: Set(input.isolated_schema.map(|s| s.as_str().to_string())),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)
        .map_err(|e| {
            if e.is_unique_violation() {
                ServiceError::Conflict("Branch code or isolated schema already taken".to_string())
            } else {
                e
            }
        })?;

        info!(branch_id = %model.id, code = %model.code, "Branch created");
        Ok(model)
    }

    pub async fn get_branch(&self, branch_id: Uuid) -> Result<branch::Model, ServiceError> {
        require_branch(self.db_pool.as_ref(), branch_id, false).await
    }

    pub async fn list_branches(&self, include_inactive: bool) -> Result<Vec<branch::Model>, ServiceError> {
        let mut query = Branch::find().order_by_asc(branch::Column::Code);
        if !include_inactive {
            query = query.filter(branch::Column::IsActive.eq(true));
        }
        query
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Updates name or active flag and drops the branch's cached scope
    #[instrument(skip(self, input))]
    pub async fn update_branch(
        &self,
        branch_id: Uuid,
        input: UpdateBranchInput,
    ) -> Result<branch::Model, ServiceError> {
        input.validate()?;
        let db = self.db_pool.as_ref();
        let branch = require_branch(db, branch_id, false).await?;

        let mut active: branch::ActiveModel = branch.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await.map_err(ServiceError::db_error)?;
        self.invalidate_scope(Some(branch_id)).await;
        Ok(updated)
    }

    /// Drops cached scope metadata for one branch, or for all with `None`.
    /// Returns whether any cached entry was removed.
    pub async fn invalidate_scope(&self, branch_id: Option<Uuid>) -> bool {
        let removed = match branch_id {
            Some(id) => self.resolver.invalidate(id),
            None => self.resolver.invalidate_all() > 0,
        };
        self.event_sender
            .send_or_log(Event::ScopeInvalidated { branch_id })
            .await;
        removed
    }

    pub fn resolver(&self) -> Arc<ScopeResolver> {
        self.resolver.clone()
    }
}
