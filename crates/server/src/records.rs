//! `/api/v1/records` handlers over the `phonebook` table

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub phone: String,
}

/// Request body for create and update; absent fields are empty
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecordInput {
    pub name: String,
    pub phone: String,
}

impl Record {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
        })
    }
}

pub async fn list(State(pool): State<PgPool>) -> ApiResult<Json<Vec<Record>>> {
    let rows = sqlx::query("SELECT id, name, phone FROM phonebook ORDER BY id")
        .fetch_all(&pool)
        .await?;
    let records = rows
        .iter()
        .map(Record::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(records))
}

pub async fn select(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
) -> ApiResult<Json<Record>> {
    let id = parse_id(&id)?;
    let row = sqlx::query("SELECT id, name, phone FROM phonebook WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(ApiError::NotFound { id })?;
    Ok(Json(Record::from_row(&row)?))
}

pub async fn insert(State(pool): State<PgPool>, body: Bytes) -> ApiResult<Json<Value>> {
    let input = parse_body(&body)?;
    let id: i64 =
        sqlx::query_scalar("INSERT INTO phonebook (name, phone) VALUES ($1, $2) RETURNING id")
            .bind(&input.name)
            .bind(&input.phone)
            .fetch_one(&pool)
            .await?;
    tracing::debug!(id, "Inserted record");
    Ok(Json(json!({ "id": id.to_string() })))
}

pub async fn update(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let input = parse_body(&body)?;
    let result = sqlx::query("UPDATE phonebook SET name = $2, phone = $3 WHERE id = $1")
        .bind(id)
        .bind(&input.name)
        .bind(&input.phone)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound { id });
    }
    Ok(StatusCode::OK)
}

pub async fn delete(
    State(pool): State<PgPool>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let result = sqlx::query("DELETE FROM phonebook WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound { id });
    }
    Ok(StatusCode::OK)
}

fn parse_id(raw: &str) -> ApiResult<i64> {
    match raw.parse::<i64>() {
        Ok(id) if id >= 0 && raw.bytes().all(|b| b.is_ascii_digit()) => Ok(id),
        _ => Err(ApiError::InvalidId { id: raw.to_string() }),
    }
}

fn parse_body(body: &[u8]) -> ApiResult<RecordInput> {
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidBody {
        message: e.to_string(),
    })
}
