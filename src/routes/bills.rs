use std::collections::BTreeMap;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use bytes::Bytes;
use chrono::{Duration, NaiveDate, Utc};
use diesel::{dsl::exists, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Bill, BillChanges, NewBill, BILL_PRIORITIES, BILL_STATUS_PAID, BILL_STATUS_PENDING,
    },
    notifications::{self, format_money, Links},
    schema::{bills, projects},
    state::AppState,
    utils::json::{double_option, non_blank, optional_body, to_iso},
};

/// Bills due within this many days raise a notification when created.
const DUE_SOON_DAYS: i64 = 7;

#[derive(Deserialize)]
pub struct ListBillsQuery {
    pub status: Option<String>,
    pub project_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct DueBillsQuery {
    #[serde(default)]
    pub period: DuePeriod,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuePeriod {
    Overdue,
    Today,
    #[default]
    #[serde(rename = "next_7_days")]
    Next7Days,
    #[serde(rename = "next_30_days")]
    Next30Days,
}

impl DuePeriod {
    /// Inclusive due-date bounds for pending bills in this period.
    fn bounds(self, today: NaiveDate) -> (Option<NaiveDate>, NaiveDate) {
        match self {
            DuePeriod::Overdue => (None, today - Duration::days(1)),
            DuePeriod::Today => (Some(today), today),
            DuePeriod::Next7Days => (Some(today), today + Duration::days(7)),
            DuePeriod::Next30Days => (Some(today), today + Duration::days(30)),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateBillRequest {
    pub description: String,
    pub amount_cents: i64,
    pub kind: Option<String>,
    pub category: Option<String>,
    pub due_date: NaiveDate,
    pub priority: Option<String>,
    pub project_id: Option<Uuid>,
    pub supplier: Option<String>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateBillRequest {
    pub description: Option<String>,
    pub amount_cents: Option<i64>,
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub supplier: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub document_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Deserialize, Default)]
pub struct PayBillRequest {
    pub paid_on: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct BillResponse {
    pub id: Uuid,
    pub description: String,
    pub amount_cents: i64,
    pub kind: String,
    pub category: Option<String>,
    pub due_date: NaiveDate,
    pub paid_on: Option<NaiveDate>,
    pub status: String,
    pub priority: String,
    pub project_id: Option<Uuid>,
    pub supplier: Option<String>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
    pub overdue: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct CategoryTotal {
    pub category: String,
    pub count: i64,
    pub total_cents: i64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct BillsReport {
    pub total_count: i64,
    pub total_cents: i64,
    pub pending_count: i64,
    pub pending_cents: i64,
    pub paid_count: i64,
    pub paid_cents: i64,
    pub overdue_count: i64,
    pub overdue_cents: i64,
    pub by_category: Vec<CategoryTotal>,
}

fn is_overdue(bill: &Bill, today: NaiveDate) -> bool {
    bill.status == BILL_STATUS_PENDING && bill.due_date < today
}

pub(crate) fn to_bill_response(bill: Bill, today: NaiveDate) -> BillResponse {
    let overdue = is_overdue(&bill, today);
    BillResponse {
        id: bill.id,
        description: bill.description,
        amount_cents: bill.amount_cents,
        kind: bill.kind,
        category: bill.category,
        due_date: bill.due_date,
        paid_on: bill.paid_on,
        status: bill.status,
        priority: bill.priority,
        project_id: bill.project_id,
        supplier: bill.supplier,
        document_number: bill.document_number,
        notes: bill.notes,
        overdue,
        created_at: to_iso(bill.created_at),
        updated_at: to_iso(bill.updated_at),
    }
}

pub(crate) fn build_report(bills: &[Bill], today: NaiveDate) -> BillsReport {
    let mut report = BillsReport {
        total_count: 0,
        total_cents: 0,
        pending_count: 0,
        pending_cents: 0,
        paid_count: 0,
        paid_cents: 0,
        overdue_count: 0,
        overdue_cents: 0,
        by_category: Vec::new(),
    };
    let mut categories: BTreeMap<String, (i64, i64)> = BTreeMap::new();

    for bill in bills {
        report.total_count += 1;
        report.total_cents += bill.amount_cents;

        if bill.status == BILL_STATUS_PAID {
            report.paid_count += 1;
            report.paid_cents += bill.amount_cents;
        } else {
            report.pending_count += 1;
            report.pending_cents += bill.amount_cents;
        }
        if is_overdue(bill, today) {
            report.overdue_count += 1;
            report.overdue_cents += bill.amount_cents;
        }

        let category = bill
            .category
            .clone()
            .unwrap_or_else(|| "Uncategorized".to_string());
        let entry = categories.entry(category).or_default();
        entry.0 += 1;
        entry.1 += bill.amount_cents;
    }

    report.by_category = categories
        .into_iter()
        .map(|(category, (count, total_cents))| CategoryTotal {
            category,
            count,
            total_cents,
        })
        .collect();
    report
}

fn validate_priority(priority: &str) -> AppResult<()> {
    if BILL_PRIORITIES.contains(&priority) {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "invalid priority; expected one of {}",
            BILL_PRIORITIES.join(", ")
        )))
    }
}

fn validate_amount(amount_cents: i64) -> AppResult<i64> {
    if amount_cents > 0 {
        Ok(amount_cents)
    } else {
        Err(AppError::bad_request("amount must be greater than zero"))
    }
}

fn ensure_project(conn: &mut PgConnection, project_id: Option<Uuid>) -> AppResult<()> {
    if let Some(project_id) = project_id {
        let found =
            diesel::select(exists(projects::table.find(project_id))).get_result::<bool>(conn)?;
        if !found {
            return Err(AppError::bad_request("project does not exist"));
        }
    }
    Ok(())
}

pub async fn list_bills(
    State(state): State<AppState>,
    Query(query): Query<ListBillsQuery>,
) -> AppResult<Json<Vec<BillResponse>>> {
    let mut conn = state.db()?;

    let mut sql = bills::table.into_boxed();
    if let Some(status) = non_blank(query.status) {
        sql = sql.filter(bills::status.eq(status));
    }
    if let Some(project_id) = query.project_id {
        sql = sql.filter(bills::project_id.eq(project_id));
    }

    let rows: Vec<Bill> = sql
        .order((bills::due_date.asc(), bills::created_at.asc()))
        .load(&mut conn)?;

    let today = Utc::now().date_naive();
    Ok(Json(
        rows.into_iter()
            .map(|bill| to_bill_response(bill, today))
            .collect(),
    ))
}

pub async fn list_due_bills(
    State(state): State<AppState>,
    Query(query): Query<DueBillsQuery>,
) -> AppResult<Json<Vec<BillResponse>>> {
    let today = Utc::now().date_naive();
    let (from, until) = query.period.bounds(today);

    let mut conn = state.db()?;
    let mut sql = bills::table
        .filter(bills::status.eq(BILL_STATUS_PENDING))
        .filter(bills::due_date.le(until))
        .into_boxed();
    if let Some(from) = from {
        sql = sql.filter(bills::due_date.ge(from));
    }

    let rows: Vec<Bill> = sql.order(bills::due_date.asc()).load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|bill| to_bill_response(bill, today))
            .collect(),
    ))
}

pub async fn bills_report(State(state): State<AppState>) -> AppResult<Json<BillsReport>> {
    let mut conn = state.db()?;
    let rows: Vec<Bill> = bills::table.load(&mut conn)?;
    Ok(Json(build_report(&rows, Utc::now().date_naive())))
}

pub async fn create_bill(
    State(state): State<AppState>,
    Json(payload): Json<CreateBillRequest>,
) -> AppResult<(StatusCode, Json<BillResponse>)> {
    let description = payload.description.trim().to_string();
    if description.is_empty() {
        return Err(AppError::bad_request("description must not be empty"));
    }
    let amount_cents = validate_amount(payload.amount_cents)?;
    let priority = payload.priority.unwrap_or_else(|| "Medium".to_string());
    validate_priority(&priority)?;

    let today = Utc::now().date_naive();
    let mut conn = state.db()?;

    let bill = conn.transaction::<Bill, AppError, _>(|conn| {
        ensure_project(conn, payload.project_id)?;

        let new_bill = NewBill {
            id: Uuid::new_v4(),
            description,
            amount_cents,
            kind: non_blank(payload.kind).unwrap_or_else(|| "Supplier".to_string()),
            category: non_blank(payload.category),
            due_date: payload.due_date,
            status: BILL_STATUS_PENDING.to_string(),
            priority,
            project_id: payload.project_id,
            supplier: non_blank(payload.supplier),
            document_number: non_blank(payload.document_number),
            notes: non_blank(payload.notes),
        };

        let bill: Bill = diesel::insert_into(bills::table)
            .values(&new_bill)
            .get_result(conn)?;

        if bill.due_date <= today + Duration::days(DUE_SOON_DAYS) {
            notifications::notify(
                conn,
                notifications::KIND_WARNING,
                "Bill due soon",
                format!(
                    "{} ({}) is due on {}",
                    bill.description,
                    format_money(bill.amount_cents),
                    bill.due_date.format("%d/%m/%Y")
                ),
                Links {
                    project_id: bill.project_id,
                    bill_id: Some(bill.id),
                },
            )?;
        }

        Ok(bill)
    })?;

    info!(bill_id = %bill.id, amount_cents = bill.amount_cents, due_date = %bill.due_date, "bill created");

    Ok((StatusCode::CREATED, Json(to_bill_response(bill, today))))
}

pub async fn get_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> AppResult<Json<BillResponse>> {
    let mut conn = state.db()?;
    let bill: Bill = bills::table.find(bill_id).first(&mut conn)?;
    Ok(Json(to_bill_response(bill, Utc::now().date_naive())))
}

pub async fn update_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
    Json(payload): Json<UpdateBillRequest>,
) -> AppResult<Json<BillResponse>> {
    if let Some(priority) = payload.priority.as_deref() {
        validate_priority(priority)?;
    }

    let description = match payload.description {
        Some(value) if value.trim().is_empty() => {
            return Err(AppError::bad_request("description must not be empty"))
        }
        Some(value) => Some(value.trim().to_string()),
        None => None,
    };

    let mut conn = state.db()?;

    let bill = conn.transaction::<Bill, AppError, _>(|conn| {
        if let Some(project_id) = payload.project_id {
            ensure_project(conn, project_id)?;
        }

        let changes = BillChanges {
            description,
            amount_cents: payload.amount_cents.map(validate_amount).transpose()?,
            kind: non_blank(payload.kind),
            category: payload.category.map(non_blank),
            due_date: payload.due_date,
            paid_on: None,
            status: None,
            priority: payload.priority,
            project_id: payload.project_id,
            supplier: payload.supplier.map(non_blank),
            document_number: payload.document_number.map(non_blank),
            notes: payload.notes.map(non_blank),
            updated_at: Utc::now().naive_utc(),
        };

        Ok(diesel::update(bills::table.find(bill_id))
            .set(&changes)
            .get_result(conn)?)
    })?;

    Ok(Json(to_bill_response(bill, Utc::now().date_naive())))
}

pub async fn pay_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
    body: Bytes,
) -> AppResult<Json<BillResponse>> {
    let payload: Option<PayBillRequest> = optional_body(&body)
        .map_err(|err| AppError::bad_request(format!("invalid payment body: {err}")))?;
    let today = Utc::now().date_naive();
    let paid_on = payload
        .and_then(|request| request.paid_on)
        .unwrap_or(today);

    let mut conn = state.db()?;

    let bill = conn.transaction::<Bill, AppError, _>(|conn| {
        let existing: Bill = bills::table.find(bill_id).first(conn)?;
        if existing.status == BILL_STATUS_PAID {
            return Err(AppError::bad_request("bill is already paid"));
        }

        let changes = BillChanges {
            description: None,
            amount_cents: None,
            kind: None,
            category: None,
            due_date: None,
            paid_on: Some(Some(paid_on)),
            status: Some(BILL_STATUS_PAID.to_string()),
            priority: None,
            project_id: None,
            supplier: None,
            document_number: None,
            notes: None,
            updated_at: Utc::now().naive_utc(),
        };
        let bill: Bill = diesel::update(bills::table.find(bill_id))
            .set(&changes)
            .get_result(conn)?;

        notifications::notify(
            conn,
            notifications::KIND_SUCCESS,
            "Bill paid",
            format!(
                "{} ({}) was paid on {}",
                bill.description,
                format_money(bill.amount_cents),
                paid_on.format("%d/%m/%Y")
            ),
            Links {
                project_id: bill.project_id,
                bill_id: Some(bill.id),
            },
        )?;

        Ok(bill)
    })?;

    info!(bill_id = %bill.id, paid_on = %paid_on, "bill paid");

    Ok(Json(to_bill_response(bill, today)))
}

pub async fn delete_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(bills::table.find(bill_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
