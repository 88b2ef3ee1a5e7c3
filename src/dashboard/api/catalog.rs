//! Shop Catalog API
//!
//! Offers and achievements share one CRUD surface; [`CatalogResource`]
//! supplies the table, response key and audit tags for each.
//!
//! - `GET /api/{offers,achievements}` - All rows ordered by id
//! - `POST` - Insert the body as a row
//! - `PUT ?id=` - Update a row
//! - `PATCH ?id=` - Quick toggle, not audited
//! - `DELETE ?id=` - Remove a row

use axum::{
    extract::{rejection::JsonRejection, Query as QueryParams, State},
    routing::get,
    Extension, Json, Router,
};
use serde_json::{Map, Value};
use tracing::warn;

use super::{ApiError, AppState, IdParam, Success};
use crate::audit::AuditAction;
use crate::dashboard::auth::AdminSession;
use crate::store::{value_text, Filter, Query};

/// Table and audit vocabulary for one catalog collection
#[derive(Debug)]
pub struct CatalogResource {
    pub table: &'static str,
    /// Key of the list in the GET response
    pub collection: &'static str,
    /// Column named in the creation audit entry
    pub label_column: &'static str,
    pub noun: &'static str,
    pub created: AuditAction,
    pub updated: AuditAction,
    pub deleted: AuditAction,
}

pub static OFFERS: CatalogResource = CatalogResource {
    table: "offers",
    collection: "offers",
    label_column: "category",
    noun: "offer",
    created: AuditAction::CreateOffer,
    updated: AuditAction::UpdateOffer,
    deleted: AuditAction::DeleteOffer,
};

pub static ACHIEVEMENTS: CatalogResource = CatalogResource {
    table: "achievements",
    collection: "achievements",
    label_column: "name",
    noun: "achievement",
    created: AuditAction::CreateAchievement,
    updated: AuditAction::UpdateAchievement,
    deleted: AuditAction::DeleteAchievement,
};

type Resource = Extension<&'static CatalogResource>;

/// Require a JSON object body
pub(crate) fn object_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    let Json(value) = body?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ApiError::Validation("Expected a JSON object".into()))
    }
}

pub async fn list_entries(
    _session: AdminSession,
    State(state): State<AppState>,
    Extension(resource): Resource,
) -> Json<Value> {
    let query = Query::new().order_by("id", true);
    let rows = match state.store.select(resource.table, &query).await {
        Ok(rows) => rows.rows,
        Err(e) => {
            warn!("Failed to list {}: {}", resource.table, e);
            Vec::new()
        }
    };
    let mut body = Map::new();
    body.insert(resource.collection.to_string(), Value::Array(rows));
    Json(Value::Object(body))
}

pub async fn create_entry(
    session: AdminSession,
    State(state): State<AppState>,
    Extension(resource): Resource,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let row = object_body(body)?;
    let label = row.get(resource.label_column).and_then(value_text).unwrap_or_default();

    state
        .store
        .insert(resource.table, row)
        .await
        .map_err(ApiError::rejected)?;

    state
        .audit
        .log(
            session.username(),
            resource.created,
            &format!("New {}: {}", resource.noun, label),
            None,
        )
        .await;

    Ok(Success::ok())
}

pub async fn update_entry(
    session: AdminSession,
    State(state): State<AppState>,
    Extension(resource): Resource,
    QueryParams(params): QueryParams<IdParam>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let id = params.require()?;
    let patch = object_body(body)?;

    state
        .store
        .update(resource.table, &[Filter::eq("id", &id)], patch)
        .await
        .map_err(ApiError::rejected)?;

    state
        .audit
        .log(
            session.username(),
            resource.updated,
            &format!("Updated {} #{}", resource.noun, id),
            Some(id.as_str()),
        )
        .await;

    Ok(Success::ok())
}

pub async fn toggle_entry(
    _session: AdminSession,
    State(state): State<AppState>,
    Extension(resource): Resource,
    QueryParams(params): QueryParams<IdParam>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let id = params.require()?;
    let patch = object_body(body)?;

    state
        .store
        .update(resource.table, &[Filter::eq("id", &id)], patch)
        .await
        .map_err(ApiError::rejected)?;

    Ok(Success::ok())
}

pub async fn delete_entry(
    session: AdminSession,
    State(state): State<AppState>,
    Extension(resource): Resource,
    QueryParams(params): QueryParams<IdParam>,
) -> Result<Json<Success>, ApiError> {
    let id = params.require()?;

    state
        .store
        .delete(resource.table, &[Filter::eq("id", &id)])
        .await
        .map_err(ApiError::rejected)?;

    state
        .audit
        .log(
            session.username(),
            resource.deleted,
            &format!("Deleted {} #{}", resource.noun, id),
            Some(id.as_str()),
        )
        .await;

    Ok(Success::ok())
}

fn resource_router(path: &str, resource: &'static CatalogResource) -> Router<AppState> {
    Router::new()
        .route(
            path,
            get(list_entries)
                .post(create_entry)
                .put(update_entry)
                .patch(toggle_entry)
                .delete(delete_entry),
        )
        .layer(Extension(resource))
}

pub fn catalog_router() -> Router<AppState> {
    resource_router("/offers", &OFFERS).merge(resource_router("/achievements", &ACHIEVEMENTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AUDIT_TABLE;
    use crate::dashboard::api::test_support::Fixture;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_offer_lifecycle() {
        let fixture = Fixture::new();

        let (status, _) = fixture
            .call(Method::POST, "/offers", Some(json!({"category": "beer", "price": 50, "is_active": true})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = fixture.call(Method::GET, "/offers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["offers"][0]["category"], "beer");
        let id = body["offers"][0]["id"].as_i64().unwrap();

        let (status, _) = fixture
            .call(Method::PUT, &format!("/offers?id={}", id), Some(json!({"price": 60})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = fixture
            .call(Method::PATCH, &format!("/offers?id={}", id), Some(json!({"is_active": false})))
            .await;
        assert_eq!(status, StatusCode::OK);

        let row = &fixture.store.rows("offers")[0];
        assert_eq!(row["price"], 60);
        assert_eq!(row["is_active"], false);

        let (status, _) = fixture.call(Method::DELETE, &format!("/offers?id={}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(fixture.store.rows("offers").is_empty());

        let actions: Vec<Value> = fixture
            .store
            .rows(AUDIT_TABLE)
            .iter()
            .map(|r| r["action"].clone())
            .collect();
        assert_eq!(actions, vec![json!("CREATE_OFFER"), json!("UPDATE_OFFER"), json!("DELETE_OFFER")]);
    }

    #[tokio::test]
    async fn test_achievements_ordered_by_id() {
        let fixture = Fixture::new();
        fixture.store.seed(
            "achievements",
            vec![json!({"id": 5, "name": "Regular"}), json!({"id": 2, "name": "First Pint"})],
        );

        let (_, body) = fixture.call(Method::GET, "/achievements", None).await;
        assert_eq!(body["achievements"][0]["name"], "First Pint");
        assert!(body.get("offers").is_none());

        let (status, _) = fixture
            .call(Method::POST, "/achievements", Some(json!({"name": "Explorer"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fixture.store.rows(AUDIT_TABLE)[0]["action"], "CREATE_ACHIEVEMENT");
    }

    #[tokio::test]
    async fn test_writes_require_id_and_object() {
        let fixture = Fixture::new();

        let (status, body) = fixture.call(Method::DELETE, "/offers", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing id");

        let (status, _) = fixture.call(Method::POST, "/offers", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(fixture.store.rows(AUDIT_TABLE).is_empty());
    }
}
