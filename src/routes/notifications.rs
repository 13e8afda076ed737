use axum::extract::{Json, Path, Query, State};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Notification,
    schema::notifications,
    state::AppState,
    utils::json::to_iso,
};

const DEFAULT_LIMIT: i64 = 10;
const MAX_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub unread: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub read: bool,
    pub project_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub created_at: String,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            title: n.title,
            message: n.message,
            kind: n.kind,
            read: n.read,
            project_id: n.project_id,
            bill_id: n.bill_id,
            created_at: to_iso(n.created_at),
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut conn = state.db()?;

    let mut sql = notifications::table.into_boxed();
    if query.unread {
        sql = sql.filter(notifications::read.eq(false));
    }

    let rows: Vec<Notification> = sql
        .order(notifications::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(NotificationResponse::from).collect()))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<NotificationResponse>> {
    let mut conn = state.db()?;
    let notification: Option<Notification> =
        diesel::update(notifications::table.find(notification_id))
            .set(notifications::read.eq(true))
            .get_result(&mut conn)
            .optional()?;

    notification
        .map(|n| Json(n.into()))
        .ok_or_else(AppError::not_found)
}
