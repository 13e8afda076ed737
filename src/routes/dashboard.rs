use std::collections::BTreeMap;

use axum::extract::{Json, Query, State};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    error::AppResult,
    models::{
        Bill, Project, BILL_STATUS_PAID, BILL_STATUS_PENDING, EMPLOYEE_STATUS_ACTIVE,
        PROJECT_STATUS_COMPLETED, PROJECT_STATUS_IN_PROGRESS, ROLE_ADMIN, ROLE_MANAGER,
    },
    routes::{
        bills::{to_bill_response, BillResponse},
        projects::{to_project_response, ProjectResponse},
    },
    schema::{bills, clients, employees, notifications, project_staffing, projects},
    state::AppState,
};

/// Projects due within this many days show up in the alerts.
const PROJECT_DEADLINE_ALERT_DAYS: i64 = 7;

#[derive(Serialize)]
pub struct DashboardStats {
    pub total_clients: i64,
    pub total_projects: i64,
    pub active_projects: i64,
    pub total_employees: i64,
    pub pending_bills_count: i64,
    pub pending_bills_cents: i64,
    pub overdue_bills: i64,
    pub unread_notifications: i64,
    pub average_progress: f64,
}

#[derive(Deserialize)]
pub struct RecentProjectsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct UpcomingBillsQuery {
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct UpcomingBills {
    pub bills: Vec<BillResponse>,
    pub total: usize,
    pub total_cents: i64,
}

#[derive(Deserialize)]
pub struct MonthlyActivityQuery {
    pub months: Option<i64>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct ProjectsInMonth {
    pub month: String,
    pub projects: i64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct BillsInMonth {
    pub month: String,
    pub bills: i64,
    pub total_cents: i64,
}

#[derive(Serialize)]
pub struct MonthlyActivity {
    pub since: NaiveDate,
    pub projects_per_month: Vec<ProjectsInMonth>,
    pub bills_per_month: Vec<BillsInMonth>,
}

#[derive(Serialize)]
pub struct FinancialSummary {
    pub revenue_total_cents: i64,
    pub revenue_this_month_cents: i64,
    pub revenue_last_month_cents: i64,
    pub expenses_this_month_cents: i64,
    pub profit_this_month_cents: i64,
    pub monthly_growth_percent: f64,
}

#[derive(Serialize)]
pub struct OperationalSummary {
    pub overdue_projects: i64,
    pub average_completion_days: f64,
    pub efficiency_rate: f64,
}

#[derive(Serialize)]
pub struct ExecutiveSummary {
    pub financial: FinancialSummary,
    pub operational: OperationalSummary,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Alert {
    pub kind: &'static str,
    pub title: &'static str,
    pub message: String,
    pub action: &'static str,
}

pub async fn dashboard_stats(State(state): State<AppState>) -> AppResult<Json<DashboardStats>> {
    let today = Utc::now().date_naive();
    let mut conn = state.db()?;

    let total_clients: i64 = clients::table.count().get_result(&mut conn)?;
    let total_projects: i64 = projects::table.count().get_result(&mut conn)?;
    let active_projects: i64 = projects::table
        .filter(projects::status.eq(PROJECT_STATUS_IN_PROGRESS))
        .count()
        .get_result(&mut conn)?;
    let total_employees: i64 = employees::table.count().get_result(&mut conn)?;

    let pending: Vec<(i64, NaiveDate)> = bills::table
        .filter(bills::status.eq(BILL_STATUS_PENDING))
        .select((bills::amount_cents, bills::due_date))
        .load(&mut conn)?;
    let pending_bills_cents = pending.iter().map(|(amount, _)| amount).sum();
    let overdue_bills = pending.iter().filter(|(_, due)| *due < today).count() as i64;

    let unread_notifications: i64 = notifications::table
        .filter(notifications::read.eq(false))
        .count()
        .get_result(&mut conn)?;

    let progress: Vec<i32> = projects::table
        .select(projects::progress)
        .load(&mut conn)?;
    let average_progress = if progress.is_empty() {
        0.0
    } else {
        let sum: i64 = progress.iter().map(|p| i64::from(*p)).sum();
        round_to(sum as f64 / progress.len() as f64, 1)
    };

    Ok(Json(DashboardStats {
        total_clients,
        total_projects,
        active_projects,
        total_employees,
        pending_bills_count: pending.len() as i64,
        pending_bills_cents,
        overdue_bills,
        unread_notifications,
        average_progress,
    }))
}

pub async fn recent_projects(
    State(state): State<AppState>,
    Query(query): Query<RecentProjectsQuery>,
) -> AppResult<Json<Vec<ProjectResponse>>> {
    let limit = query.limit.unwrap_or(5).clamp(1, 50);
    let mut conn = state.db()?;

    let rows: Vec<(Project, String)> = projects::table
        .inner_join(clients::table)
        .select((projects::all_columns, clients::name))
        .order(projects::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(project, client_name)| to_project_response(project, Some(client_name)))
            .collect(),
    ))
}

pub async fn upcoming_bills(
    State(state): State<AppState>,
    Query(query): Query<UpcomingBillsQuery>,
) -> AppResult<Json<UpcomingBills>> {
    let today = Utc::now().date_naive();
    let until = today + Duration::days(query.days.unwrap_or(7).clamp(0, 365));
    let mut conn = state.db()?;

    let rows: Vec<Bill> = bills::table
        .filter(bills::status.eq(BILL_STATUS_PENDING))
        .filter(bills::due_date.between(today, until))
        .order(bills::due_date.asc())
        .load(&mut conn)?;

    let total_cents: i64 = rows.iter().map(|bill| bill.amount_cents).sum();
    let bills: Vec<BillResponse> = rows
        .into_iter()
        .map(|bill| to_bill_response(bill, today))
        .collect();

    Ok(Json(UpcomingBills {
        total: bills.len(),
        total_cents,
        bills,
    }))
}

pub async fn monthly_activity(
    State(state): State<AppState>,
    Query(query): Query<MonthlyActivityQuery>,
) -> AppResult<Json<MonthlyActivity>> {
    let months = query.months.unwrap_or(6).clamp(1, 24);
    let since = Utc::now().date_naive() - Duration::days(30 * months);
    let since_at = since.and_hms_opt(0, 0, 0).unwrap_or_default();
    let mut conn = state.db()?;

    let project_dates: Vec<NaiveDateTime> = projects::table
        .filter(projects::created_at.ge(since_at))
        .select(projects::created_at)
        .load(&mut conn)?;
    let bill_rows: Vec<(NaiveDateTime, i64)> = bills::table
        .filter(bills::created_at.ge(since_at))
        .select((bills::created_at, bills::amount_cents))
        .load(&mut conn)?;

    Ok(Json(MonthlyActivity {
        since,
        projects_per_month: projects_per_month(&project_dates),
        bills_per_month: bills_per_month(&bill_rows),
    }))
}

pub async fn executive_summary(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ExecutiveSummary>> {
    user.require_role(&[ROLE_ADMIN, ROLE_MANAGER])?;

    let today = Utc::now().date_naive();
    let this_month = month_start(today);
    let last_month = month_start(this_month - Duration::days(1));
    let mut conn = state.db()?;

    let completed: Vec<(i64, Option<NaiveDate>, Option<NaiveDate>)> = projects::table
        .filter(projects::status.eq(PROJECT_STATUS_COMPLETED))
        .select((
            projects::total_value_cents,
            projects::start_date,
            projects::completed_on,
        ))
        .load(&mut conn)?;

    let revenue_total_cents: i64 = completed.iter().map(|(value, _, _)| value).sum();
    let revenue_between = |from: NaiveDate, until: Option<NaiveDate>| -> i64 {
        completed
            .iter()
            .filter(|(_, _, done)| {
                done.is_some_and(|done| done >= from && until.map_or(true, |until| done < until))
            })
            .map(|(value, _, _)| value)
            .sum()
    };
    let revenue_this_month_cents = revenue_between(this_month, None);
    let revenue_last_month_cents = revenue_between(last_month, Some(this_month));

    let expenses: Vec<i64> = bills::table
        .filter(bills::status.eq(BILL_STATUS_PAID))
        .filter(bills::paid_on.ge(this_month))
        .select(bills::amount_cents)
        .load(&mut conn)?;
    let expenses_this_month_cents: i64 = expenses.iter().sum();

    let overdue_projects: i64 = projects::table
        .filter(projects::status.eq(PROJECT_STATUS_IN_PROGRESS))
        .filter(projects::due_date.lt(today))
        .count()
        .get_result(&mut conn)?;

    let durations: Vec<i64> = completed
        .iter()
        .filter_map(|(_, start, done)| done.zip(*start))
        .map(|(done, start)| (done - start).num_days())
        .collect();
    let average_completion_days = if durations.is_empty() {
        0.0
    } else {
        round_to(durations.iter().sum::<i64>() as f64 / durations.len() as f64, 1)
    };

    Ok(Json(ExecutiveSummary {
        financial: FinancialSummary {
            revenue_total_cents,
            revenue_this_month_cents,
            revenue_last_month_cents,
            expenses_this_month_cents,
            profit_this_month_cents: revenue_this_month_cents - expenses_this_month_cents,
            monthly_growth_percent: growth_percent(
                revenue_this_month_cents,
                revenue_last_month_cents,
            ),
        },
        operational: OperationalSummary {
            overdue_projects,
            average_completion_days,
            efficiency_rate: efficiency_rate(overdue_projects),
        },
    }))
}

pub async fn alerts(State(state): State<AppState>) -> AppResult<Json<Vec<Alert>>> {
    let today = Utc::now().date_naive();
    let mut conn = state.db()?;

    let overdue_bills: i64 = bills::table
        .filter(bills::status.eq(BILL_STATUS_PENDING))
        .filter(bills::due_date.lt(today))
        .count()
        .get_result(&mut conn)?;

    let projects_due_soon: i64 = projects::table
        .filter(projects::status.eq(PROJECT_STATUS_IN_PROGRESS))
        .filter(
            projects::due_date.between(today, today + Duration::days(PROJECT_DEADLINE_ALERT_DAYS)),
        )
        .count()
        .get_result(&mut conn)?;

    let busy = project_staffing::table
        .filter(project_staffing::active.eq(true))
        .select(project_staffing::employee_id);
    let idle_employees: i64 = employees::table
        .filter(employees::status.eq(EMPLOYEE_STATUS_ACTIVE))
        .filter(employees::id.ne_all(busy))
        .count()
        .get_result(&mut conn)?;

    Ok(Json(build_alerts(
        overdue_bills,
        projects_due_soon,
        idle_employees,
    )))
}

fn build_alerts(overdue_bills: i64, projects_due_soon: i64, idle_employees: i64) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if overdue_bills > 0 {
        alerts.push(Alert {
            kind: "error",
            title: "Overdue bills",
            message: format!("{overdue_bills} bill(s) are past their due date"),
            action: "View bills",
        });
    }
    if projects_due_soon > 0 {
        alerts.push(Alert {
            kind: "warning",
            title: "Project deadlines approaching",
            message: format!(
                "{projects_due_soon} project(s) due within {PROJECT_DEADLINE_ALERT_DAYS} days"
            ),
            action: "View projects",
        });
    }
    if idle_employees > 0 {
        alerts.push(Alert {
            kind: "info",
            title: "Available employees",
            message: format!("{idle_employees} employee(s) without an active project"),
            action: "Assign employees",
        });
    }
    alerts
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn month_label(at: NaiveDateTime) -> String {
    at.format("%Y-%m").to_string()
}

fn projects_per_month(created: &[NaiveDateTime]) -> Vec<ProjectsInMonth> {
    let mut buckets: BTreeMap<String, i64> = BTreeMap::new();
    for at in created {
        *buckets.entry(month_label(*at)).or_default() += 1;
    }
    buckets
        .into_iter()
        .map(|(month, projects)| ProjectsInMonth { month, projects })
        .collect()
}

fn bills_per_month(rows: &[(NaiveDateTime, i64)]) -> Vec<BillsInMonth> {
    let mut buckets: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for (at, amount) in rows {
        let entry = buckets.entry(month_label(*at)).or_default();
        entry.0 += 1;
        entry.1 += amount;
    }
    buckets
        .into_iter()
        .map(|(month, (bills, total_cents))| BillsInMonth {
            month,
            bills,
            total_cents,
        })
        .collect()
}

/// Month-over-month change in percent; zero when there is nothing to compare with.
fn growth_percent(current: i64, previous: i64) -> f64 {
    if previous <= 0 {
        return 0.0;
    }
    round_to((current - previous) as f64 / previous as f64 * 100.0, 2)
}

/// Ten points off per overdue project, floored at zero.
fn efficiency_rate(overdue_projects: i64) -> f64 {
    (100 - overdue_projects.saturating_mul(10)).max(0) as f64
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
