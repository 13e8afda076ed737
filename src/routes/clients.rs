use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::{dsl::exists, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{conflict_on_unique, AppError, AppResult},
    models::{Client, ClientChanges, NewClient, Project, ROLE_ADMIN, ROLE_MANAGER},
    schema::{clients, projects},
    state::AppState,
    utils::json::{double_option, non_blank, to_iso},
};

use super::projects::{to_project_response, ProjectResponse};

const DUPLICATE_CLIENT: &str = "a client with this email or tax id already exists";

#[derive(Deserialize)]
pub struct ListClientsQuery {
    pub q: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub tax_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub city: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub state: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub postal_code: Option<Option<String>>,
}

#[derive(Serialize)]
pub struct ClientResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct ClientDetailResponse {
    #[serde(flatten)]
    pub client: ClientResponse,
    pub projects: Vec<ProjectResponse>,
}

impl From<Client> for ClientResponse {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            name: client.name,
            email: client.email,
            phone: client.phone,
            tax_id: client.tax_id,
            address: client.address,
            city: client.city,
            state: client.state,
            postal_code: client.postal_code,
            created_at: to_iso(client.created_at),
            updated_at: to_iso(client.updated_at),
        }
    }
}

fn required(value: &str, field: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::bad_request(format!("{field} must not be empty")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn validate_email(email: &str) -> AppResult<String> {
    let email = required(email, "email")?.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::bad_request("invalid email address")),
    }
}

pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ListClientsQuery>,
) -> AppResult<Json<Vec<ClientResponse>>> {
    let mut conn = state.db()?;

    let mut sql = clients::table.into_boxed();
    if let Some(q) = non_blank(query.q) {
        let pattern = format!("%{q}%");
        sql = sql.filter(
            clients::name
                .ilike(pattern.clone())
                .or(clients::email.ilike(pattern.clone()))
                .or(clients::tax_id.ilike(pattern)),
        );
    }

    let rows: Vec<Client> = sql.order(clients::name.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(ClientResponse::from).collect()))
}

pub async fn create_client(
    State(state): State<AppState>,
    Json(payload): Json<CreateClientRequest>,
) -> AppResult<(StatusCode, Json<ClientResponse>)> {
    let new_client = NewClient {
        id: Uuid::new_v4(),
        name: required(&payload.name, "name")?,
        email: validate_email(&payload.email)?,
        phone: required(&payload.phone, "phone")?,
        tax_id: non_blank(payload.tax_id),
        address: non_blank(payload.address),
        city: non_blank(payload.city),
        state: non_blank(payload.state).map(|s| s.to_uppercase()),
        postal_code: non_blank(payload.postal_code),
    };

    let mut conn = state.db()?;
    let client: Client = diesel::insert_into(clients::table)
        .values(&new_client)
        .get_result(&mut conn)
        .map_err(|err| conflict_on_unique(err, DUPLICATE_CLIENT))?;

    info!(client_id = %client.id, "client created");

    Ok((StatusCode::CREATED, Json(client.into())))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<ClientDetailResponse>> {
    let mut conn = state.db()?;

    let client: Client = clients::table.find(client_id).first(&mut conn)?;
    let projects: Vec<Project> = Project::belonging_to(&client)
        .order(projects::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(ClientDetailResponse {
        client: client.into(),
        projects: projects
            .into_iter()
            .map(|project| to_project_response(project, None))
            .collect(),
    }))
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(payload): Json<UpdateClientRequest>,
) -> AppResult<Json<ClientResponse>> {
    let changes = ClientChanges {
        name: payload.name.as_deref().map(|v| required(v, "name")).transpose()?,
        email: payload.email.as_deref().map(validate_email).transpose()?,
        phone: payload.phone.as_deref().map(|v| required(v, "phone")).transpose()?,
        tax_id: payload.tax_id.map(non_blank),
        address: payload.address.map(non_blank),
        city: payload.city.map(non_blank),
        state: payload
            .state
            .map(|state| non_blank(state).map(|s| s.to_uppercase())),
        postal_code: payload.postal_code.map(non_blank),
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let client: Client = diesel::update(clients::table.find(client_id))
        .set(&changes)
        .get_result(&mut conn)
        .map_err(|err| conflict_on_unique(err, DUPLICATE_CLIENT))?;

    Ok(Json(client.into()))
}

pub async fn delete_client(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(client_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_role(&[ROLE_ADMIN, ROLE_MANAGER])?;

    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let client: Client = clients::table.find(client_id).first(conn)?;

        let has_projects = diesel::select(exists(
            projects::table.filter(projects::client_id.eq(client.id)),
        ))
        .get_result::<bool>(conn)?;
        if has_projects {
            return Err(AppError::bad_request(
                "client has projects and cannot be deleted",
            ));
        }

        diesel::delete(clients::table.find(client.id)).execute(conn)?;
        Ok(())
    })?;

    info!(client_id = %client_id, "client deleted");

    Ok(StatusCode::NO_CONTENT)
}
