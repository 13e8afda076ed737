use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::{NaiveDate, Utc};
use diesel::{dsl::exists, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{conflict_on_unique, AppError, AppResult},
    models::{
        Employee, EmployeeChanges, NewEmployee, NewProjectStaffing, ProjectStaffing,
        EMPLOYEE_STATUSES, EMPLOYEE_STATUS_ACTIVE, ROLE_ADMIN, ROLE_MANAGER,
    },
    schema::{employees, project_staffing, projects},
    state::AppState,
    utils::json::{double_option, non_blank, to_iso},
};

#[derive(Deserialize)]
pub struct ListEmployeesQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateEmployeeRequest {
    pub name: String,
    pub cpf: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub position: String,
    pub salary_cents: Option<i64>,
    pub hired_on: Option<NaiveDate>,
    pub status: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateEmployeeRequest {
    pub name: Option<String>,
    pub cpf: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    pub position: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub salary_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub hired_on: Option<Option<NaiveDate>>,
    pub status: Option<String>,
    pub specialties: Option<Vec<String>>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub project_id: Uuid,
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct EmployeeResponse {
    pub id: Uuid,
    pub name: String,
    pub cpf: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub position: String,
    pub salary_cents: Option<i64>,
    pub hired_on: Option<NaiveDate>,
    pub status: String,
    pub specialties: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub role: Option<String>,
    pub joined_on: NaiveDate,
    pub left_on: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Serialize)]
pub struct EmployeeDetailResponse {
    #[serde(flatten)]
    pub employee: EmployeeResponse,
    pub assignments: Vec<AssignmentResponse>,
}

impl From<Employee> for EmployeeResponse {
    fn from(employee: Employee) -> Self {
        Self {
            id: employee.id,
            name: employee.name,
            cpf: employee.cpf,
            phone: employee.phone,
            email: employee.email,
            position: employee.position,
            salary_cents: employee.salary_cents,
            hired_on: employee.hired_on,
            status: employee.status,
            specialties: employee.specialties,
            created_at: to_iso(employee.created_at),
            updated_at: to_iso(employee.updated_at),
        }
    }
}

fn validate_status(status: &str) -> AppResult<()> {
    if EMPLOYEE_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "invalid employee status; expected one of {}",
            EMPLOYEE_STATUSES.join(", ")
        )))
    }
}

/// Keeps only the digits of a CPF; exactly 11 are required.
fn normalize_cpf(raw: &str) -> AppResult<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 {
        Ok(digits)
    } else {
        Err(AppError::bad_request("cpf must have 11 digits"))
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

fn validate_salary(salary: Option<i64>) -> AppResult<Option<i64>> {
    match salary {
        Some(value) if value < 0 => Err(AppError::bad_request("salary must not be negative")),
        other => Ok(other),
    }
}

pub async fn list_employees(
    State(state): State<AppState>,
    Query(query): Query<ListEmployeesQuery>,
) -> AppResult<Json<Vec<EmployeeResponse>>> {
    let mut conn = state.db()?;

    let mut sql = employees::table.into_boxed();
    if let Some(status) = non_blank(query.status) {
        sql = sql.filter(employees::status.eq(status));
    }

    let rows: Vec<Employee> = sql.order(employees::name.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(EmployeeResponse::from).collect()))
}

/// Active employees without an active assignment.
pub async fn list_available_employees(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<EmployeeResponse>>> {
    let mut conn = state.db()?;

    let busy = project_staffing::table
        .filter(project_staffing::active.eq(true))
        .select(project_staffing::employee_id);

    let rows: Vec<Employee> = employees::table
        .filter(employees::status.eq(EMPLOYEE_STATUS_ACTIVE))
        .filter(employees::id.ne_all(busy))
        .order(employees::name.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(EmployeeResponse::from).collect()))
}

pub async fn create_employee(
    State(state): State<AppState>,
    Json(payload): Json<CreateEmployeeRequest>,
) -> AppResult<(StatusCode, Json<EmployeeResponse>)> {
    let status = payload
        .status
        .unwrap_or_else(|| EMPLOYEE_STATUS_ACTIVE.to_string());
    validate_status(&status)?;

    let new_employee = NewEmployee {
        id: Uuid::new_v4(),
        name: required(&payload.name, "name")?,
        cpf: normalize_cpf(&payload.cpf)?,
        phone: non_blank(payload.phone),
        email: non_blank(payload.email).map(|e| e.to_lowercase()),
        position: required(&payload.position, "position")?,
        salary_cents: validate_salary(payload.salary_cents)?,
        hired_on: payload.hired_on,
        status,
        specialties: serde_json::to_value(payload.specialties)?,
    };

    let mut conn = state.db()?;
    let employee: Employee = diesel::insert_into(employees::table)
        .values(&new_employee)
        .get_result(&mut conn)
        .map_err(|err| conflict_on_unique(err, "an employee with this cpf already exists"))?;

    info!(employee_id = %employee.id, "employee created");

    Ok((StatusCode::CREATED, Json(employee.into())))
}

pub async fn get_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
) -> AppResult<Json<EmployeeDetailResponse>> {
    let mut conn = state.db()?;

    let employee: Employee = employees::table.find(employee_id).first(&mut conn)?;
    let rows: Vec<(ProjectStaffing, String)> = project_staffing::table
        .inner_join(projects::table)
        .filter(project_staffing::employee_id.eq(employee_id))
        .order(project_staffing::joined_on.desc())
        .select((project_staffing::all_columns, projects::name))
        .load(&mut conn)?;

    let assignments = rows
        .into_iter()
        .map(|(staffing, project_name)| AssignmentResponse {
            id: staffing.id,
            project_id: staffing.project_id,
            project_name,
            role: staffing.role,
            joined_on: staffing.joined_on,
            left_on: staffing.left_on,
            active: staffing.active,
        })
        .collect();

    Ok(Json(EmployeeDetailResponse {
        employee: employee.into(),
        assignments,
    }))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    Json(payload): Json<UpdateEmployeeRequest>,
) -> AppResult<Json<EmployeeResponse>> {
    if let Some(status) = payload.status.as_deref() {
        validate_status(status)?;
    }

    let changes = EmployeeChanges {
        name: payload.name.as_deref().map(|v| required(v, "name")).transpose()?,
        cpf: payload.cpf.as_deref().map(normalize_cpf).transpose()?,
        phone: payload.phone.map(non_blank),
        email: payload
            .email
            .map(|email| non_blank(email).map(|e| e.to_lowercase())),
        position: payload
            .position
            .as_deref()
            .map(|v| required(v, "position"))
            .transpose()?,
        salary_cents: payload.salary_cents.map(validate_salary).transpose()?,
        hired_on: payload.hired_on,
        status: payload.status,
        specialties: payload
            .specialties
            .map(serde_json::to_value)
            .transpose()?,
        updated_at: Utc::now().naive_utc(),
    };

    let mut conn = state.db()?;
    let employee: Employee = diesel::update(employees::table.find(employee_id))
        .set(&changes)
        .get_result(&mut conn)
        .map_err(|err| conflict_on_unique(err, "an employee with this cpf already exists"))?;

    Ok(Json(employee.into()))
}

pub async fn delete_employee(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(employee_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_role(&[ROLE_ADMIN, ROLE_MANAGER])?;

    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let employee_exists =
            diesel::select(exists(employees::table.find(employee_id))).get_result::<bool>(conn)?;
        if !employee_exists {
            return Err(AppError::not_found());
        }

        let has_active_assignment = diesel::select(exists(
            project_staffing::table
                .filter(project_staffing::employee_id.eq(employee_id))
                .filter(project_staffing::active.eq(true)),
        ))
        .get_result::<bool>(conn)?;
        if has_active_assignment {
            return Err(AppError::bad_request(
                "employee is assigned to an active project and cannot be deleted",
            ));
        }

        diesel::delete(
            project_staffing::table.filter(project_staffing::employee_id.eq(employee_id)),
        )
        .execute(conn)?;
        diesel::delete(employees::table.find(employee_id)).execute(conn)?;
        Ok(())
    })?;

    info!(employee_id = %employee_id, "employee deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn assign_employee(
    State(state): State<AppState>,
    Path(employee_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<(StatusCode, Json<AssignmentResponse>)> {
    let mut conn = state.db()?;

    let assignment = conn.transaction::<AssignmentResponse, AppError, _>(|conn| {
        let employee: Employee = employees::table.find(employee_id).first(conn)?;
        if employee.status != EMPLOYEE_STATUS_ACTIVE {
            return Err(AppError::bad_request("only active employees can be assigned"));
        }

        let project_name: Option<String> = projects::table
            .find(payload.project_id)
            .select(projects::name)
            .first(conn)
            .optional()?;
        let Some(project_name) = project_name else {
            return Err(AppError::bad_request("project does not exist"));
        };

        let new_staffing = NewProjectStaffing {
            id: Uuid::new_v4(),
            project_id: payload.project_id,
            employee_id,
            role: non_blank(payload.role),
            joined_on: Utc::now().date_naive(),
        };

        let staffing: ProjectStaffing = diesel::insert_into(project_staffing::table)
            .values(&new_staffing)
            .get_result(conn)
            .map_err(|err| {
                conflict_on_unique(err, "employee is already assigned to this project")
            })?;

        Ok(AssignmentResponse {
            id: staffing.id,
            project_id: staffing.project_id,
            project_name,
            role: staffing.role,
            joined_on: staffing.joined_on,
            left_on: staffing.left_on,
            active: staffing.active,
        })
    })?;

    info!(employee_id = %employee_id, project_id = %assignment.project_id, "employee assigned to project");

    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn unassign_employee(
    State(state): State<AppState>,
    Path((employee_id, project_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let updated = diesel::update(
        project_staffing::table
            .filter(project_staffing::employee_id.eq(employee_id))
            .filter(project_staffing::project_id.eq(project_id))
            .filter(project_staffing::active.eq(true)),
    )
    .set((
        project_staffing::active.eq(false),
        project_staffing::left_on.eq(Some(Utc::now().date_naive())),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::not_found());
    }

    info!(employee_id = %employee_id, project_id = %project_id, "employee removed from project");

    Ok(StatusCode::NO_CONTENT)
}
