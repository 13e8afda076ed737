use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use diesel::{dsl::exists, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{
        Project, ProjectChanges, NewProject, PROJECT_STATUSES, PROJECT_STATUS_COMPLETED,
        PROJECT_STATUS_IN_PROGRESS, PROJECT_STATUS_QUOTE, ROLE_ADMIN, ROLE_MANAGER,
    },
    schema::{bills, clients, employees, files, project_staffing, projects},
    state::AppState,
    storage::Artifact,
    utils::json::{double_option, non_blank, to_iso},
};

#[derive(Deserialize)]
pub struct ListProjectsQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub total_value_cents: i64,
    #[serde(default)]
    pub paid_value_cents: i64,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub site_address: Option<String>,
    pub service_type: Option<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub client_id: Option<Uuid>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub total_value_cents: Option<i64>,
    pub paid_value_cents: Option<i64>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub site_address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub service_type: Option<Option<String>>,
    pub equipment: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub progress: i32,
}

#[derive(Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub total_value_cents: i64,
    pub paid_value_cents: i64,
    pub progress: i32,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub completed_on: Option<NaiveDate>,
    pub site_address: Option<String>,
    pub service_type: Option<String>,
    pub equipment: serde_json::Value,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct StaffMember {
    pub staffing_id: Uuid,
    pub employee_id: Uuid,
    pub name: String,
    pub position: String,
    pub role: Option<String>,
    pub joined_on: NaiveDate,
}

#[derive(Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    pub staff: Vec<StaffMember>,
}

pub(crate) fn to_project_response(project: Project, client_name: Option<String>) -> ProjectResponse {
    ProjectResponse {
        id: project.id,
        client_id: project.client_id,
        client_name,
        name: project.name,
        description: project.description,
        total_value_cents: project.total_value_cents,
        paid_value_cents: project.paid_value_cents,
        progress: project.progress,
        status: project.status,
        start_date: project.start_date,
        due_date: project.due_date,
        completed_on: project.completed_on,
        site_address: project.site_address,
        service_type: project.service_type,
        equipment: project.equipment,
        notes: project.notes,
        created_at: to_iso(project.created_at),
        updated_at: to_iso(project.updated_at),
    }
}

fn validate_status(status: &str) -> AppResult<()> {
    if PROJECT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "invalid project status; expected one of {}",
            PROJECT_STATUSES.join(", ")
        )))
    }
}

fn validate_amounts(total: Option<i64>, paid: Option<i64>) -> AppResult<()> {
    if total.is_some_and(|v| v < 0) || paid.is_some_and(|v| v < 0) {
        return Err(AppError::bad_request("amounts must not be negative"));
    }
    Ok(())
}

/// Status and completion date implied by a progress update.
pub(crate) fn progress_transition(
    progress: i32,
    status: &str,
    completed_on: Option<NaiveDate>,
    today: NaiveDate,
) -> (String, Option<NaiveDate>) {
    if progress == 100 {
        (
            PROJECT_STATUS_COMPLETED.to_string(),
            completed_on.or(Some(today)),
        )
    } else if progress > 0 && status == PROJECT_STATUS_QUOTE {
        (PROJECT_STATUS_IN_PROGRESS.to_string(), completed_on)
    } else {
        (status.to_string(), completed_on)
    }
}

pub(crate) fn load_staff(conn: &mut PgConnection, project_id: Uuid) -> QueryResult<Vec<StaffMember>> {
    let rows: Vec<(Uuid, Uuid, String, String, Option<String>, NaiveDate)> =
        project_staffing::table
            .inner_join(employees::table)
            .filter(project_staffing::project_id.eq(project_id))
            .filter(project_staffing::active.eq(true))
            .order(employees::name.asc())
            .select((
                project_staffing::id,
                employees::id,
                employees::name,
                employees::position,
                project_staffing::role,
                project_staffing::joined_on,
            ))
            .load(conn)?;

    Ok(rows
        .into_iter()
        .map(
            |(staffing_id, employee_id, name, position, role, joined_on)| StaffMember {
                staffing_id,
                employee_id,
                name,
                position,
                role,
                joined_on,
            },
        )
        .collect())
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListProjectsQuery>,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    let mut conn = state.db()?;

    let mut sql = projects::table
        .inner_join(clients::table)
        .select((projects::all_columns, clients::name))
        .into_boxed();

    if let Some(client_id) = query.client_id {
        sql = sql.filter(projects::client_id.eq(client_id));
    }
    if let Some(status) = query.status.filter(|s| !s.trim().is_empty()) {
        sql = sql.filter(projects::status.eq(status));
    }

    let rows: Vec<(Project, String)> = sql.order(projects::created_at.desc()).load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(project, client_name)| to_project_response(project, Some(client_name)))
            .collect(),
    ))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<ProjectResponse>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("project name must not be empty"));
    }
    let status = payload
        .status
        .unwrap_or_else(|| PROJECT_STATUS_QUOTE.to_string());
    validate_status(&status)?;
    validate_amounts(Some(payload.total_value_cents), Some(payload.paid_value_cents))?;

    let mut conn = state.db()?;

    let client_name: Option<String> = clients::table
        .find(payload.client_id)
        .select(clients::name)
        .first(&mut conn)
        .optional()?;
    let Some(client_name) = client_name else {
        return Err(AppError::bad_request("client does not exist"));
    };

    let new_project = NewProject {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        name: name.to_string(),
        description: non_blank(payload.description),
        total_value_cents: payload.total_value_cents,
        paid_value_cents: payload.paid_value_cents,
        progress: 0,
        status,
        start_date: payload.start_date,
        due_date: payload.due_date,
        site_address: non_blank(payload.site_address),
        service_type: non_blank(payload.service_type),
        equipment: serde_json::to_value(payload.equipment)?,
        notes: non_blank(payload.notes),
    };

    let project: Project = diesel::insert_into(projects::table)
        .values(&new_project)
        .get_result(&mut conn)?;

    info!(project_id = %project.id, client_id = %project.client_id, "project created");

    Ok((
        StatusCode::CREATED,
        Json(to_project_response(project, Some(client_name))),
    ))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ProjectDetailResponse>> {
    let mut conn = state.db()?;

    let (project, client_name): (Project, String) = projects::table
        .inner_join(clients::table)
        .filter(projects::id.eq(project_id))
        .select((projects::all_columns, clients::name))
        .first(&mut conn)?;

    let staff = load_staff(&mut conn, project_id)?;

    Ok(Json(ProjectDetailResponse {
        project: to_project_response(project, Some(client_name)),
        staff,
    }))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> AppResult<Json<ProjectResponse>> {
    if let Some(status) = payload.status.as_deref() {
        validate_status(status)?;
    }
    validate_amounts(payload.total_value_cents, payload.paid_value_cents)?;

    let name = match payload.name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::bad_request("project name must not be empty"))
        }
        Some(name) => Some(name.trim().to_string()),
        None => None,
    };

    let mut conn = state.db()?;

    let project = conn.transaction::<Project, AppError, _>(|conn| {
        let existing: Project = projects::table.find(project_id).first(conn)?;

        if let Some(client_id) = payload.client_id {
            let client_exists =
                diesel::select(exists(clients::table.find(client_id))).get_result::<bool>(conn)?;
            if !client_exists {
                return Err(AppError::bad_request("client does not exist"));
            }
        }

        let completed_on = match payload.status.as_deref() {
            Some(PROJECT_STATUS_COMPLETED) if existing.completed_on.is_none() => {
                Some(Some(Utc::now().date_naive()))
            }
            _ => None,
        };

        let equipment = payload
            .equipment
            .map(serde_json::to_value)
            .transpose()?;

        let changes = ProjectChanges {
            client_id: payload.client_id,
            name,
            description: payload.description.map(non_blank),
            total_value_cents: payload.total_value_cents,
            paid_value_cents: payload.paid_value_cents,
            status: payload.status,
            start_date: payload.start_date,
            due_date: payload.due_date,
            completed_on,
            site_address: payload.site_address.map(non_blank),
            service_type: payload.service_type.map(non_blank),
            equipment,
            notes: payload.notes.map(non_blank),
            updated_at: Utc::now().naive_utc(),
        };

        Ok(diesel::update(projects::table.find(project_id))
            .set(&changes)
            .get_result(conn)?)
    })?;

    Ok(Json(to_project_response(project, None)))
}

pub async fn update_progress(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<Json<ProjectResponse>> {
    if !(0..=100).contains(&payload.progress) {
        return Err(AppError::bad_request("progress must be between 0 and 100"));
    }

    let mut conn = state.db()?;

    let project = conn.transaction::<Project, AppError, _>(|conn| {
        let existing: Project = projects::table.find(project_id).first(conn)?;
        let (status, completed_on) = progress_transition(
            payload.progress,
            &existing.status,
            existing.completed_on,
            Utc::now().date_naive(),
        );

        Ok(diesel::update(projects::table.find(project_id))
            .set((
                projects::progress.eq(payload.progress),
                projects::status.eq(status),
                projects::completed_on.eq(completed_on),
                projects::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?)
    })?;

    info!(project_id = %project.id, progress = project.progress, status = %project.status, "project progress updated");

    Ok(Json(to_project_response(project, None)))
}

pub async fn list_project_staff(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<Vec<StaffMember>>> {
    let mut conn = state.db()?;
    let project_exists =
        diesel::select(exists(projects::table.find(project_id))).get_result::<bool>(&mut conn)?;
    if !project_exists {
        return Err(AppError::not_found());
    }
    Ok(Json(load_staff(&mut conn, project_id)?))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(project_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_role(&[ROLE_ADMIN, ROLE_MANAGER])?;

    let mut conn = state.db()?;

    let artifacts = conn.transaction::<Vec<Artifact>, AppError, _>(|conn| {
        let project_exists =
            diesel::select(exists(projects::table.find(project_id))).get_result::<bool>(conn)?;
        if !project_exists {
            return Err(AppError::not_found());
        }

        let has_bills = diesel::select(exists(
            bills::table.filter(bills::project_id.eq(project_id)),
        ))
        .get_result::<bool>(conn)?;
        if has_bills {
            return Err(AppError::bad_request(
                "project has bills and cannot be deleted",
            ));
        }

        let has_active_staff = diesel::select(exists(
            project_staffing::table
                .filter(project_staffing::project_id.eq(project_id))
                .filter(project_staffing::active.eq(true)),
        ))
        .get_result::<bool>(conn)?;
        if has_active_staff {
            return Err(AppError::bad_request(
                "project has active staff and cannot be deleted",
            ));
        }

        let stored: Vec<(String, Option<String>, Option<String>)> = files::table
            .filter(files::project_id.eq(project_id))
            .select((files::storage_kind, files::local_path, files::s3_key))
            .load(conn)?;

        diesel::delete(project_staffing::table.filter(project_staffing::project_id.eq(project_id)))
            .execute(conn)?;
        diesel::delete(projects::table.find(project_id)).execute(conn)?;

        Ok(stored
            .iter()
            .filter_map(|(kind, path, key)| {
                Artifact::from_record(kind, path.as_deref(), key.as_deref()).ok()
            })
            .collect())
    })?;

    for artifact in &artifacts {
        if let Err(err) = state.files.remove(artifact).await {
            warn!(project_id = %project_id, artifact = artifact.describe(), error = %err, "failed to remove bytes of cascaded file");
        }
    }

    info!(project_id = %project_id, files_removed = artifacts.len(), "project deleted");

    Ok(StatusCode::NO_CONTENT)
}
