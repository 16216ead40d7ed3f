use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgConnection, PgPool, Postgres, Row, Transaction};

use crate::model::{
    ApiLevel, Category, Endpoint, Generation, GenerationKind, HttpMethod, Id, NewCategory,
    NewEndpoint, NewIteration, NewParamNode, NewService, NewUser, ParamLocation, ParamNode,
    ParamSide, ParamSlot, ParamTable, ParamType, Service, ServiceIteration, User, DEFAULT_LEVEL,
};
use crate::store::traits::{
    CatalogStore, CatalogTx, CategoryStore, EndpointStore, IterationStore, ParamStore,
    ServiceStore, UserStore,
};

const SERVICE_COLUMNS: &str =
    "id, service_uuid, owner_id, version, description, created_at, updated_at, is_deleted, deleted_at";
const ITERATION_COLUMNS: &str =
    "id, service_id, creator_id, version, description, is_committed, created_at, committed_at";
const ENDPOINT_COLUMNS: &str =
    "id, owner_id, category_id, name, method, path, description, level, is_enabled, created_at, updated_at";
const PARAM_COLUMNS: &str =
    "id, endpoint_id, parent_id, name, param_type, required, default_value, description, example, array_child_type";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run the embedded database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl CatalogStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }
}

/// A PostgreSQL transaction; rolled back when dropped uncommitted
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        let tx = self
            .tx
            .as_mut()
            .context("Transaction already committed")?;
        Ok(&mut **tx)
    }
}

/// Owner column of an endpoint table
fn owner_column(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Live => "service_id",
        GenerationKind::Draft => "iteration_id",
    }
}

fn parse_enum<T: std::str::FromStr + Default>(raw: &str, column: &str) -> T {
    raw.parse().unwrap_or_else(|_| {
        log::warn!("Unrecognized {} value '{}' in database, using default", column, raw);
        T::default()
    })
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        nickname: row.get("nickname"),
        email: row.get("email"),
        level: row.get("level"),
    }
}

fn service_from_row(row: &PgRow) -> Service {
    Service {
        id: row.get("id"),
        service_uuid: row.get("service_uuid"),
        owner_id: row.get("owner_id"),
        version: row.get("version"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        is_deleted: row.get("is_deleted"),
        deleted_at: row.get("deleted_at"),
    }
}

fn iteration_from_row(row: &PgRow) -> ServiceIteration {
    ServiceIteration {
        id: row.get("id"),
        service_id: row.get("service_id"),
        creator_id: row.get("creator_id"),
        version: row.get("version"),
        description: row.get("description"),
        is_committed: row.get("is_committed"),
        created_at: row.get("created_at"),
        committed_at: row.get("committed_at"),
    }
}

fn category_from_row(row: &PgRow) -> Category {
    Category {
        id: row.get("id"),
        service_id: row.get("service_id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn endpoint_from_row(kind: GenerationKind, row: &PgRow) -> Endpoint {
    let owner: Id = row.get(owner_column(kind));
    let generation = match kind {
        GenerationKind::Live => Generation::Live { service_id: owner },
        GenerationKind::Draft => Generation::Draft {
            iteration_id: owner,
        },
    };
    let method: String = row.get("method");
    let level: String = row.get("level");

    Endpoint {
        id: row.get("id"),
        generation,
        owner_id: row.get("owner_id"),
        category_id: row.get("category_id"),
        name: row.get("name"),
        method: parse_enum::<HttpMethod>(&method, "method"),
        path: row.get("path"),
        description: row.get("description"),
        level: parse_enum::<ApiLevel>(&level, "level"),
        is_enabled: row.get("is_enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn param_from_row(side: ParamSide, row: &PgRow) -> ParamNode {
    let param_type: String = row.get("param_type");
    let array_child_type: Option<String> = row.get("array_child_type");
    let slot = match side {
        ParamSide::Request => {
            let location: String = row.get("location");
            ParamSlot::Request {
                location: parse_enum::<ParamLocation>(&location, "location"),
            }
        }
        ParamSide::Response => ParamSlot::Response {
            status_code: row.get("status_code"),
        },
    };

    ParamNode {
        id: row.get("id"),
        endpoint_id: row.get("endpoint_id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        param_type: parse_enum::<ParamType>(&param_type, "param_type"),
        required: row.get("required"),
        default_value: row.get("default_value"),
        description: row.get("description"),
        example: row.get("example"),
        array_child_type: array_child_type
            .and_then(|raw| raw.parse::<ParamType>().ok()),
        slot,
    }
}

fn slot_column(side: ParamSide) -> &'static str {
    match side {
        ParamSide::Request => "location",
        ParamSide::Response => "status_code",
    }
}

#[async_trait::async_trait]
impl CatalogTx for PgTx {
    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().context("Transaction already committed")?;
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for PgTx {
    async fn get_user(&mut self, id: Id) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, nickname, email, level FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch user")?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_user_by_username(&mut self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, nickname, email, level FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.conn()?)
        .await
        .context("Failed to fetch user by username")?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, nickname, email, level)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, nickname, email, level
            "#,
        )
        .bind(&user.username)
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(user.level.unwrap_or(DEFAULT_LEVEL))
        .fetch_one(self.conn()?)
        .await
        .context("Failed to insert user")?;

        Ok(user_from_row(&row))
    }
}

#[async_trait::async_trait]
impl ServiceStore for PgTx {
    async fn get_service(&mut self, id: Id) -> Result<Option<Service>> {
        let sql = format!("SELECT {} FROM services WHERE id = $1", SERVICE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch service")?;

        Ok(row.as_ref().map(service_from_row))
    }

    async fn find_service_by_uuid(&mut self, service_uuid: &str) -> Result<Option<Service>> {
        let sql = format!("SELECT {} FROM services WHERE service_uuid = $1", SERVICE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(service_uuid)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch service by uuid")?;

        Ok(row.as_ref().map(service_from_row))
    }

    async fn insert_service(&mut self, service: NewService) -> Result<Service> {
        let sql = format!(
            r#"
            INSERT INTO services (service_uuid, owner_id, version, description)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&service.service_uuid)
            .bind(service.owner_id)
            .bind(&service.version)
            .bind(&service.description)
            .fetch_one(self.conn()?)
            .await
            .context("Failed to insert service")?;

        Ok(service_from_row(&row))
    }

    async fn update_service(&mut self, service: &Service) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE services SET
                version = $2,
                description = $3,
                updated_at = $4,
                is_deleted = $5,
                deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(service.id)
        .bind(&service.version)
        .bind(&service.description)
        .bind(service.updated_at)
        .bind(service.is_deleted)
        .bind(service.deleted_at)
        .execute(self.conn()?)
        .await
        .context("Failed to update service")?;

        Ok(())
    }

    async fn list_services(&mut self, owner_id: Id) -> Result<Vec<Service>> {
        let sql = format!(
            "SELECT {} FROM services WHERE owner_id = $1 AND NOT is_deleted ORDER BY id",
            SERVICE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(self.conn()?)
            .await
            .context("Failed to list services")?;

        Ok(rows.iter().map(service_from_row).collect())
    }
}

#[async_trait::async_trait]
impl IterationStore for PgTx {
    async fn get_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>> {
        let sql = format!("SELECT {} FROM service_iterations WHERE id = $1", ITERATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch iteration")?;

        Ok(row.as_ref().map(iteration_from_row))
    }

    async fn lock_iteration(&mut self, id: Id) -> Result<Option<ServiceIteration>> {
        let sql = format!(
            "SELECT {} FROM service_iterations WHERE id = $1 FOR UPDATE",
            ITERATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to lock iteration")?;

        Ok(row.as_ref().map(iteration_from_row))
    }

    async fn find_open_iteration(
        &mut self,
        service_id: Id,
        creator_id: Id,
    ) -> Result<Option<ServiceIteration>> {
        let sql = format!(
            r#"
            SELECT {} FROM service_iterations
            WHERE service_id = $1 AND creator_id = $2 AND NOT is_committed
            "#,
            ITERATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(service_id)
            .bind(creator_id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch open iteration")?;

        Ok(row.as_ref().map(iteration_from_row))
    }

    async fn insert_iteration(
        &mut self,
        iteration: NewIteration,
    ) -> Result<Option<ServiceIteration>> {
        let sql = format!(
            r#"
            INSERT INTO service_iterations (service_id, creator_id, version, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (service_id, creator_id) WHERE NOT is_committed DO NOTHING
            RETURNING {}
            "#,
            ITERATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(iteration.service_id)
            .bind(iteration.creator_id)
            .bind(&iteration.version)
            .bind(&iteration.description)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to insert iteration")?;

        Ok(row.as_ref().map(iteration_from_row))
    }

    async fn update_iteration(&mut self, iteration: &ServiceIteration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE service_iterations SET
                version = $2,
                description = $3,
                is_committed = $4,
                committed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(iteration.id)
        .bind(&iteration.version)
        .bind(&iteration.description)
        .bind(iteration.is_committed)
        .bind(iteration.committed_at)
        .execute(self.conn()?)
        .await
        .context("Failed to update iteration")?;

        Ok(())
    }

    async fn delete_iteration(&mut self, id: Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM service_iterations WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await
            .context("Failed to delete iteration")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_iterations(&mut self, service_id: Id) -> Result<Vec<ServiceIteration>> {
        let sql = format!(
            "SELECT {} FROM service_iterations WHERE service_id = $1 \
             ORDER BY committed_at DESC NULLS LAST, id DESC",
            ITERATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(service_id)
            .fetch_all(self.conn()?)
            .await
            .context("Failed to list iterations")?;

        Ok(rows.iter().map(iteration_from_row).collect())
    }
}

#[async_trait::async_trait]
impl CategoryStore for PgTx {
    async fn get_category(&mut self, id: Id) -> Result<Option<Category>> {
        let row = sqlx::query("SELECT id, service_id, name, description FROM api_categories WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch category")?;

        Ok(row.as_ref().map(category_from_row))
    }

    async fn find_category(&mut self, service_id: Id, name: &str) -> Result<Option<Category>> {
        let row = sqlx::query(
            "SELECT id, service_id, name, description FROM api_categories WHERE service_id = $1 AND name = $2",
        )
        .bind(service_id)
        .bind(name)
        .fetch_optional(self.conn()?)
        .await
        .context("Failed to fetch category by name")?;

        Ok(row.as_ref().map(category_from_row))
    }

    async fn insert_category(&mut self, category: NewCategory) -> Result<Category> {
        let row = sqlx::query(
            r#"
            INSERT INTO api_categories (service_id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, service_id, name, description
            "#,
        )
        .bind(category.service_id)
        .bind(&category.name)
        .bind(&category.description)
        .fetch_one(self.conn()?)
        .await
        .context("Failed to insert category")?;

        Ok(category_from_row(&row))
    }

    async fn update_category(&mut self, category: &Category) -> Result<()> {
        sqlx::query("UPDATE api_categories SET name = $2, description = $3 WHERE id = $1")
            .bind(category.id)
            .bind(&category.name)
            .bind(&category.description)
            .execute(self.conn()?)
            .await
            .context("Failed to update category")?;

        Ok(())
    }

    async fn delete_category(&mut self, id: Id) -> Result<bool> {
        // Endpoints keep existing through ON DELETE SET NULL
        let result = sqlx::query("DELETE FROM api_categories WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await
            .context("Failed to delete category")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_categories(&mut self, service_id: Id) -> Result<Vec<Category>> {
        let rows = sqlx::query(
            "SELECT id, service_id, name, description FROM api_categories WHERE service_id = $1 ORDER BY id",
        )
        .bind(service_id)
        .fetch_all(self.conn()?)
        .await
        .context("Failed to list categories")?;

        Ok(rows.iter().map(category_from_row).collect())
    }
}

#[async_trait::async_trait]
impl EndpointStore for PgTx {
    async fn get_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<Option<Endpoint>> {
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE id = $1",
            ENDPOINT_COLUMNS,
            owner_column(kind),
            kind.endpoint_table()
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to fetch endpoint")?;

        Ok(row.map(|row| endpoint_from_row(kind, &row)))
    }

    async fn list_endpoints(&mut self, generation: Generation) -> Result<Vec<Endpoint>> {
        let kind = generation.kind();
        let sql = format!(
            "SELECT {}, {owner} FROM {} WHERE {owner} = $1 ORDER BY id",
            ENDPOINT_COLUMNS,
            kind.endpoint_table(),
            owner = owner_column(kind)
        );
        let rows = sqlx::query(&sql)
            .bind(generation.owner_id())
            .fetch_all(self.conn()?)
            .await
            .context("Failed to list endpoints")?;

        Ok(rows.iter().map(|row| endpoint_from_row(kind, row)).collect())
    }

    async fn find_endpoint(
        &mut self,
        generation: Generation,
        method: HttpMethod,
        path: &str,
    ) -> Result<Option<Endpoint>> {
        let kind = generation.kind();
        let sql = format!(
            "SELECT {}, {owner} FROM {} WHERE {owner} = $1 AND method = $2 AND path = $3",
            ENDPOINT_COLUMNS,
            kind.endpoint_table(),
            owner = owner_column(kind)
        );
        let row = sqlx::query(&sql)
            .bind(generation.owner_id())
            .bind(method.as_str())
            .bind(path)
            .fetch_optional(self.conn()?)
            .await
            .context("Failed to find endpoint")?;

        Ok(row.map(|row| endpoint_from_row(kind, &row)))
    }

    async fn insert_endpoint(&mut self, endpoint: NewEndpoint) -> Result<Endpoint> {
        let kind = endpoint.generation.kind();
        let sql = format!(
            r#"
            INSERT INTO {} ({owner}, owner_id, category_id, name, method, path, description, level, is_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}, {owner}
            "#,
            kind.endpoint_table(),
            ENDPOINT_COLUMNS,
            owner = owner_column(kind)
        );
        let row = sqlx::query(&sql)
            .bind(endpoint.generation.owner_id())
            .bind(endpoint.owner_id)
            .bind(endpoint.category_id)
            .bind(&endpoint.name)
            .bind(endpoint.method.as_str())
            .bind(&endpoint.path)
            .bind(&endpoint.description)
            .bind(endpoint.level.as_str())
            .bind(endpoint.is_enabled)
            .fetch_one(self.conn()?)
            .await
            .with_context(|| format!("Failed to insert into {}", kind.endpoint_table()))?;

        Ok(endpoint_from_row(kind, &row))
    }

    async fn update_endpoint(&mut self, endpoint: &Endpoint) -> Result<()> {
        let kind = endpoint.generation.kind();
        let sql = format!(
            r#"
            UPDATE {} SET
                category_id = $2,
                name = $3,
                method = $4,
                path = $5,
                description = $6,
                level = $7,
                is_enabled = $8,
                updated_at = $9
            WHERE id = $1
            "#,
            kind.endpoint_table()
        );
        sqlx::query(&sql)
            .bind(endpoint.id)
            .bind(endpoint.category_id)
            .bind(&endpoint.name)
            .bind(endpoint.method.as_str())
            .bind(&endpoint.path)
            .bind(&endpoint.description)
            .bind(endpoint.level.as_str())
            .bind(endpoint.is_enabled)
            .bind(endpoint.updated_at)
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to update {}", kind.endpoint_table()))?;

        Ok(())
    }

    async fn delete_endpoint(&mut self, kind: GenerationKind, id: Id) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", kind.endpoint_table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to delete from {}", kind.endpoint_table()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_endpoints(&mut self, generation: Generation) -> Result<u64> {
        let kind = generation.kind();
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            kind.endpoint_table(),
            owner_column(kind)
        );
        let result = sqlx::query(&sql)
            .bind(generation.owner_id())
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to clear {}", kind.endpoint_table()))?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl ParamStore for PgTx {
    async fn list_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<Vec<ParamNode>> {
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE endpoint_id = $1 ORDER BY id",
            PARAM_COLUMNS,
            slot_column(table.side),
            table.table_name()
        );
        let rows = sqlx::query(&sql)
            .bind(endpoint_id)
            .fetch_all(self.conn()?)
            .await
            .with_context(|| format!("Failed to list {}", table.table_name()))?;

        Ok(rows.iter().map(|row| param_from_row(table.side, row)).collect())
    }

    async fn insert_param(&mut self, table: ParamTable, param: NewParamNode) -> Result<ParamNode> {
        anyhow::ensure!(
            param.slot.side() == table.side,
            "{:?} row cannot be stored in {}",
            param.slot.side(),
            table.table_name()
        );
        let sql = format!(
            r#"
            INSERT INTO {} (endpoint_id, parent_id, name, param_type, required, default_value,
                            description, example, array_child_type, {slot})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}, {slot}
            "#,
            table.table_name(),
            PARAM_COLUMNS,
            slot = slot_column(table.side)
        );
        let query = sqlx::query(&sql)
            .bind(param.endpoint_id)
            .bind(param.parent_id)
            .bind(&param.name)
            .bind(param.param_type.as_str())
            .bind(param.required)
            .bind(&param.default_value)
            .bind(&param.description)
            .bind(&param.example)
            .bind(param.array_child_type.map(|t| t.as_str()));
        let query = match param.slot {
            ParamSlot::Request { location } => query.bind(location.as_str()),
            ParamSlot::Response { status_code } => query.bind(status_code),
        };
        let row = query
            .fetch_one(self.conn()?)
            .await
            .with_context(|| format!("Failed to insert into {}", table.table_name()))?;

        Ok(param_from_row(table.side, &row))
    }

    async fn set_param_parent(
        &mut self,
        table: ParamTable,
        id: Id,
        parent_id: Option<Id>,
    ) -> Result<()> {
        let sql = format!("UPDATE {} SET parent_id = $2 WHERE id = $1", table.table_name());
        sqlx::query(&sql)
            .bind(id)
            .bind(parent_id)
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to relink {} row {}", table.table_name(), id))?;

        Ok(())
    }

    async fn delete_params(&mut self, table: ParamTable, endpoint_id: Id) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE endpoint_id = $1", table.table_name());
        let result = sqlx::query(&sql)
            .bind(endpoint_id)
            .execute(self.conn()?)
            .await
            .with_context(|| format!("Failed to clear {}", table.table_name()))?;

        Ok(result.rows_affected())
    }
}
