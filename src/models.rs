use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_USER: &str = "user";
pub const ROLES: &[&str] = &[ROLE_ADMIN, ROLE_MANAGER, ROLE_USER];

pub const PROJECT_STATUS_QUOTE: &str = "Quote";
pub const PROJECT_STATUS_IN_PROGRESS: &str = "In Progress";
pub const PROJECT_STATUS_COMPLETED: &str = "Completed";
pub const PROJECT_STATUSES: &[&str] = &[
    PROJECT_STATUS_QUOTE,
    PROJECT_STATUS_IN_PROGRESS,
    "Paused",
    PROJECT_STATUS_COMPLETED,
    "Cancelled",
];

pub const EMPLOYEE_STATUS_ACTIVE: &str = "Active";
pub const EMPLOYEE_STATUSES: &[&str] = &[EMPLOYEE_STATUS_ACTIVE, "Inactive"];

pub const BILL_STATUS_PENDING: &str = "Pending";
pub const BILL_STATUS_PAID: &str = "Paid";
pub const BILL_PRIORITIES: &[&str] = &["Low", "Medium", "High"];

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserChanges {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = clients)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = clients)]
pub struct NewClient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = clients)]
pub struct ClientChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub tax_id: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub city: Option<Option<String>>,
    pub state: Option<Option<String>>,
    pub postal_code: Option<Option<String>>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = projects)]
#[diesel(belongs_to(Client))]
pub struct Project {
    pub id: Uuid,
    pub client_id: Uuid,
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub client_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub total_value_cents: i64,
    pub paid_value_cents: i64,
    pub progress: i32,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub site_address: Option<String>,
    pub service_type: Option<String>,
    pub equipment: serde_json::Value,
    pub notes: Option<String>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = projects)]
pub struct ProjectChanges {
    pub client_id: Option<Uuid>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub total_value_cents: Option<i64>,
    pub paid_value_cents: Option<i64>,
    pub status: Option<String>,
    pub start_date: Option<Option<NaiveDate>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub completed_on: Option<Option<NaiveDate>>,
    pub site_address: Option<Option<String>>,
    pub service_type: Option<Option<String>>,
    pub equipment: Option<serde_json::Value>,
    pub notes: Option<Option<String>>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = employees)]
pub struct Employee {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = employees)]
pub struct NewEmployee {
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
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = employees)]
pub struct EmployeeChanges {
    pub name: Option<String>,
    pub cpf: Option<String>,
    pub phone: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub position: Option<String>,
    pub salary_cents: Option<Option<i64>>,
    pub hired_on: Option<Option<NaiveDate>>,
    pub status: Option<String>,
    pub specialties: Option<serde_json::Value>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = project_staffing)]
#[diesel(belongs_to(Project))]
#[diesel(belongs_to(Employee))]
pub struct ProjectStaffing {
    pub id: Uuid,
    pub project_id: Uuid,
    pub employee_id: Uuid,
    pub role: Option<String>,
    pub joined_on: NaiveDate,
    pub left_on: Option<NaiveDate>,
    pub active: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = project_staffing)]
pub struct NewProjectStaffing {
    pub id: Uuid,
    pub project_id: Uuid,
    pub employee_id: Uuid,
    pub role: Option<String>,
    pub joined_on: NaiveDate,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = bills)]
pub struct Bill {
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
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = bills)]
pub struct NewBill {
    pub id: Uuid,
    pub description: String,
    pub amount_cents: i64,
    pub kind: String,
    pub category: Option<String>,
    pub due_date: NaiveDate,
    pub status: String,
    pub priority: String,
    pub project_id: Option<Uuid>,
    pub supplier: Option<String>,
    pub document_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = bills)]
pub struct BillChanges {
    pub description: Option<String>,
    pub amount_cents: Option<i64>,
    pub kind: Option<String>,
    pub category: Option<Option<String>>,
    pub due_date: Option<NaiveDate>,
    pub paid_on: Option<Option<NaiveDate>>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub project_id: Option<Option<Uuid>>,
    pub supplier: Option<Option<String>>,
    pub document_number: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = folders)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub parent_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = folders)]
pub struct NewFolder {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub parent_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// File metadata without the inline payload, so listings never pull blobs.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FileRecord {
    pub id: Uuid,
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub category: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
    pub storage_kind: String,
    pub local_path: Option<String>,
    pub s3_key: Option<String>,
    pub s3_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub checksum: String,
    pub uploaded_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = files)]
pub struct NewFile {
    pub id: Uuid,
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: i64,
    pub content_type: Option<String>,
    pub category: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
    pub storage_kind: String,
    pub blob_data: Option<Vec<u8>>,
    pub local_path: Option<String>,
    pub s3_key: Option<String>,
    pub s3_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub checksum: String,
    pub uploaded_by: Option<Uuid>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = files)]
pub struct FileChanges {
    pub original_name: Option<String>,
    pub category: Option<String>,
    pub description: Option<Option<String>>,
    pub project_id: Option<Option<Uuid>>,
    pub folder_id: Option<Option<Uuid>>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub read: bool,
    pub project_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub project_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = received_boletos)]
pub struct ReceivedBoleto {
    pub id: Uuid,
    pub bank: String,
    pub barcode: String,
    pub amount_cents: i64,
    pub due_at: NaiveDateTime,
    pub beneficiary: Option<String>,
    pub account: Option<String>,
    pub status: String,
    pub urgent: bool,
    pub payload: serde_json::Value,
    pub received_at: NaiveDateTime,
    pub processed: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = received_boletos)]
pub struct NewReceivedBoleto {
    pub id: Uuid,
    pub bank: String,
    pub barcode: String,
    pub amount_cents: i64,
    pub due_at: NaiveDateTime,
    pub beneficiary: Option<String>,
    pub account: Option<String>,
    pub urgent: bool,
    pub payload: serde_json::Value,
}
