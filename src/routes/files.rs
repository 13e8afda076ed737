use std::collections::BTreeMap;

use axum::{
    extract::{Json, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use bytes::Bytes;
use chrono::Utc;
use diesel::{dsl::exists, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{FileChanges, FileRecord, NewFile},
    schema::{files, folders, projects},
    state::AppState,
    storage::{
        content_disposition, Artifact, Delivery, PersistOutcome, Retrieved, StorageError,
        StorageKind, StoredLocation, UploadRequest, MAX_FILENAME_CHARS,
    },
    utils::json::{double_option, non_blank, to_iso},
};

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "jpg", "jpeg", "png", "gif",
    "bmp", "webp", "svg", "dwg", "dxf", "zip", "rar", "7z", "mp4", "mov", "avi", "mp3", "wav",
];

const DEFAULT_CATEGORY: &str = "General";
const DEFAULT_PER_PAGE: i64 = 50;
const MAX_PER_PAGE: i64 = 200;
const SEARCH_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct ListFilesQuery {
    pub project_id: Option<Uuid>,
    pub folder_id: Option<Uuid>,
    pub category: Option<String>,
    pub storage_kind: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchFilesQuery {
    pub q: String,
}

#[derive(Deserialize)]
pub struct UpdateFileRequest {
    pub original_name: Option<String>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub project_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub folder_id: Option<Option<Uuid>>,
}

#[derive(Serialize)]
pub struct FileResponse {
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
    pub s3_url: Option<String>,
    pub checksum: String,
    pub uploaded_by: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub file: FileResponse,
}

#[derive(Serialize)]
pub struct DeleteFileResponse {
    pub id: Uuid,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Serialize, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub count: i64,
    pub total_bytes: i64,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct FileStatsResponse {
    pub total_files: i64,
    pub total_bytes: i64,
    pub by_storage_kind: BTreeMap<String, GroupStats>,
    pub by_category: BTreeMap<String, GroupStats>,
    pub remote_storage_enabled: bool,
    pub inline_threshold_bytes: u64,
}

pub(crate) fn to_file_response(record: FileRecord) -> FileResponse {
    FileResponse {
        id: record.id,
        original_name: record.original_name,
        stored_name: record.stored_name,
        size_bytes: record.size_bytes,
        content_type: record.content_type,
        category: record.category,
        description: record.description,
        project_id: record.project_id,
        folder_id: record.folder_id,
        storage_kind: record.storage_kind,
        s3_url: record.s3_url,
        checksum: record.checksum,
        uploaded_by: record.uploaded_by,
        created_at: to_iso(record.created_at),
        updated_at: to_iso(record.updated_at),
    }
}

fn artifact_of(record: &FileRecord) -> Result<Artifact, StorageError> {
    Artifact::from_record(
        &record.storage_kind,
        record.local_path.as_deref(),
        record.s3_key.as_deref(),
    )
}

pub(crate) fn extension_allowed(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

fn check_name_length(name: &str) -> AppResult<()> {
    if name.chars().count() > MAX_FILENAME_CHARS {
        return Err(AppError::bad_request(format!(
            "filename must be at most {MAX_FILENAME_CHARS} characters"
        )));
    }
    Ok(())
}

pub(crate) fn aggregate_stats(
    rows: &[(String, String, i64)],
) -> (i64, i64, BTreeMap<String, GroupStats>, BTreeMap<String, GroupStats>) {
    let mut by_kind: BTreeMap<String, GroupStats> = BTreeMap::new();
    let mut by_category: BTreeMap<String, GroupStats> = BTreeMap::new();
    let mut total_bytes = 0;

    for (kind, category, size) in rows {
        total_bytes += size;
        for (map, key) in [(&mut by_kind, kind), (&mut by_category, category)] {
            let entry = map.entry(key.clone()).or_default();
            entry.count += 1;
            entry.total_bytes += size;
        }
    }

    (rows.len() as i64, total_bytes, by_kind, by_category)
}

fn apply_filters<'a, ST: 'a>(
    mut sql: files::BoxedQuery<'a, Pg, ST>,
    query: &ListFilesQuery,
) -> files::BoxedQuery<'a, Pg, ST> {
    if let Some(project_id) = query.project_id {
        sql = sql.filter(files::project_id.eq(project_id));
    }
    if let Some(folder_id) = query.folder_id {
        sql = sql.filter(files::folder_id.eq(folder_id));
    }
    if let Some(category) = query.category.as_deref().filter(|c| !c.trim().is_empty()) {
        sql = sql.filter(files::category.eq(category.to_string()));
    }
    if let Some(kind) = query.storage_kind.as_deref().filter(|k| !k.trim().is_empty()) {
        sql = sql.filter(files::storage_kind.eq(kind.to_string()));
    }
    sql
}

fn ensure_parents(
    conn: &mut PgConnection,
    project_id: Option<Uuid>,
    folder_id: Option<Uuid>,
) -> AppResult<()> {
    if let Some(project_id) = project_id {
        let found =
            diesel::select(exists(projects::table.find(project_id))).get_result::<bool>(conn)?;
        if !found {
            return Err(AppError::bad_request("project does not exist"));
        }
    }
    if let Some(folder_id) = folder_id {
        let found =
            diesel::select(exists(folders::table.find(folder_id))).get_result::<bool>(conn)?;
        if !found {
            return Err(AppError::bad_request("folder does not exist"));
        }
    }
    Ok(())
}

fn parse_optional_uuid(value: &str, field: &str) -> AppResult<Option<Uuid>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(trimmed)
        .map(Some)
        .map_err(|_| AppError::bad_request(format!("{field} must be a valid UUID")))
}

pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListFilesQuery>,
) -> AppResult<Json<FileListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);

    let mut conn = state.db()?;

    let total: i64 = apply_filters(files::table.count().into_boxed(), &query)
        .get_result(&mut conn)?;

    let records: Vec<FileRecord> =
        apply_filters(files::table.select(FileRecord::as_select()).into_boxed(), &query)
            .order(files::created_at.desc())
            .limit(per_page)
            .offset((page - 1) * per_page)
            .load(&mut conn)?;

    Ok(Json(FileListResponse {
        files: records.into_iter().map(to_file_response).collect(),
        total,
        page,
        per_page,
    }))
}

pub async fn search_files(
    State(state): State<AppState>,
    Query(query): Query<SearchFilesQuery>,
) -> AppResult<Json<Vec<FileResponse>>> {
    let term = query.q.trim();
    if term.is_empty() {
        return Err(AppError::bad_request("search query must not be empty"));
    }
    let pattern = format!("%{term}%");

    let mut conn = state.db()?;
    let records: Vec<FileRecord> = files::table
        .select(FileRecord::as_select())
        .filter(
            files::original_name
                .ilike(pattern.clone())
                .or(files::description.ilike(pattern.clone()))
                .or(files::category.ilike(pattern)),
        )
        .order(files::created_at.desc())
        .limit(SEARCH_LIMIT)
        .load(&mut conn)?;

    Ok(Json(records.into_iter().map(to_file_response).collect()))
}

pub async fn file_stats(State(state): State<AppState>) -> AppResult<Json<FileStatsResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<(String, String, i64)> = files::table
        .select((files::storage_kind, files::category, files::size_bytes))
        .load(&mut conn)?;

    let (total_files, total_bytes, by_storage_kind, by_category) = aggregate_stats(&rows);

    Ok(Json(FileStatsResponse {
        total_files,
        total_bytes,
        by_storage_kind,
        by_category,
        remote_storage_enabled: state.files.remote().is_some(),
        inline_threshold_bytes: state.files.inline_max(),
    }))
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let mut file_bytes: Option<Bytes> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut project_id: Option<Uuid> = None;
    let mut folder_id: Option<Uuid> = None;
    let mut category: Option<String> = None;
    let mut description: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::new(err.status(), format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::new(err.status(), format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data);
            }
            Some(field_name @ ("project_id" | "folder_id" | "category" | "description")) => {
                let field_name = field_name.to_string();
                let value = field.text().await.map_err(|err| {
                    error!(error = %err, field = %field_name, "invalid multipart text field");
                    AppError::bad_request(format!("invalid {field_name}: {err}"))
                })?;
                match field_name.as_str() {
                    "project_id" => project_id = parse_optional_uuid(&value, "project_id")?,
                    "folder_id" => folder_id = parse_optional_uuid(&value, "folder_id")?,
                    "category" => category = non_blank(Some(value)),
                    _ => description = non_blank(Some(value)),
                }
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    if file_bytes.is_empty() {
        error!("upload rejected: empty file payload");
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if file_bytes.len() as u64 > state.config.max_upload_size {
        warn!(size = file_bytes.len(), limit = state.config.max_upload_size, "upload rejected: too large");
        return Err(AppError::payload_too_large(format!(
            "file exceeds the maximum upload size of {} bytes",
            state.config.max_upload_size
        )));
    }

    let original_name = original_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            error!("upload rejected: missing original filename");
            AppError::bad_request("filename is required")
        })?;
    check_name_length(&original_name)?;
    if !extension_allowed(&original_name) {
        return Err(AppError::bad_request(format!(
            "file type not allowed; accepted extensions: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    {
        let mut conn = state.db()?;
        ensure_parents(&mut conn, project_id, folder_id)?;
    }

    let content_type = content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| {
            mime_guess::from_path(&original_name)
                .first()
                .map(|mime| mime.to_string())
        });
    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let size_bytes = file_bytes.len() as i64;

    let placement = state
        .files
        .store(UploadRequest {
            bytes: file_bytes,
            original_name: original_name.clone(),
            content_type: content_type.clone(),
            folder_id,
            project_id,
        })
        .await
        .map_err(|err| {
            error!(error = %err, original_name = %original_name, "failed to store file bytes");
            AppError::internal(format!("failed to store file: {err}"))
        })?;

    let artifact = placement.location.artifact();
    let kind = placement.location.kind();
    let (blob_data, local_path, s3_key, s3_url, s3_bucket) = match placement.location {
        StoredLocation::Inline(bytes) => (Some(bytes), None, None, None, None),
        StoredLocation::Local { path } => (None, Some(path), None, None, None),
        StoredLocation::Remote { key, url, bucket } => {
            (None, None, Some(key), Some(url), Some(bucket))
        }
    };

    let new_file = NewFile {
        id: Uuid::new_v4(),
        original_name: original_name.clone(),
        stored_name: placement.stored_name,
        size_bytes,
        content_type,
        category: category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        description,
        project_id,
        folder_id,
        storage_kind: kind.as_str().to_string(),
        blob_data,
        local_path,
        s3_key,
        s3_url,
        s3_bucket,
        checksum,
        uploaded_by: Some(user.user_id),
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(files::table)
            .values(&new_file)
            .returning(FileRecord::as_returning())
            .get_result::<FileRecord>(&mut conn)
            .map_err(AppError::from)
    });

    let record = match inserted {
        Ok(record) => record,
        Err(err) => {
            error!(error = ?err, original_name = %original_name, storage_kind = %kind, "failed to record file metadata");
            if let Err(cleanup_err) = state.files.remove(&artifact).await {
                warn!(artifact = artifact.describe(), error = %cleanup_err, "failed to remove bytes of unrecorded upload");
            }
            return Err(AppError::internal("failed to record file metadata"));
        }
    };

    let outcome: PersistOutcome = placement.outcome;
    info!(
        file_id = %record.id,
        storage_kind = %record.storage_kind,
        size_bytes = record.size_bytes,
        outcome = outcome.label(),
        "file uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            status: outcome.label(),
            warning: outcome.warning().map(str::to_string),
            file: to_file_response(record),
        }),
    ))
}

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<FileResponse>> {
    let mut conn = state.db()?;
    let record: FileRecord = files::table
        .find(file_id)
        .select(FileRecord::as_select())
        .first(&mut conn)?;
    Ok(Json(to_file_response(record)))
}

pub async fn update_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Json(payload): Json<UpdateFileRequest>,
) -> AppResult<Json<FileResponse>> {
    let original_name = match payload.original_name.as_deref().map(str::trim) {
        Some("") => return Err(AppError::bad_request("original_name must not be empty")),
        Some(name) => {
            check_name_length(name)?;
            Some(name.to_string())
        }
        None => None,
    };

    let mut conn = state.db()?;

    let record = conn.transaction::<FileRecord, AppError, _>(|conn| {
        ensure_parents(conn, payload.project_id.flatten(), payload.folder_id.flatten())?;

        let changes = FileChanges {
            original_name,
            category: non_blank(payload.category),
            description: payload.description.map(non_blank),
            project_id: payload.project_id,
            folder_id: payload.folder_id,
            updated_at: Utc::now().naive_utc(),
        };

        Ok(diesel::update(files::table.find(file_id))
            .set(&changes)
            .returning(FileRecord::as_returning())
            .get_result(conn)?)
    })?;

    Ok(Json(to_file_response(record)))
}

/// Removes the metadata row, then the stored bytes; byte removal failures only warn.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Json<DeleteFileResponse>> {
    let record: FileRecord = {
        let mut conn = state.db()?;
        let record: FileRecord = files::table
            .find(file_id)
            .select(FileRecord::as_select())
            .first(&mut conn)?;
        diesel::delete(files::table.find(file_id)).execute(&mut conn)?;
        record
    };

    let removal = match artifact_of(&record) {
        Ok(artifact) => state
            .files
            .remove(&artifact)
            .await
            .map_err(|err| (artifact.describe().to_string(), err)),
        Err(err) => Err((record.stored_name.clone(), err)),
    };

    let warning = match removal {
        Ok(()) => None,
        Err((location, err)) => {
            warn!(file_id = %file_id, storage_kind = %record.storage_kind, location = %location, error = %err, "file record deleted but stored bytes could not be removed");
            Some(format!("file record deleted but stored bytes could not be removed: {err}"))
        }
    };

    info!(file_id = %file_id, storage_kind = %record.storage_kind, "file deleted");

    Ok(Json(DeleteFileResponse {
        id: file_id,
        deleted: true,
        warning,
    }))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Response> {
    serve_file(&state, file_id, Delivery::Download).await
}

pub async fn preview_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> AppResult<Response> {
    serve_file(&state, file_id, Delivery::Preview).await
}

async fn serve_file(state: &AppState, file_id: Uuid, delivery: Delivery) -> AppResult<Response> {
    let mut conn = state.db()?;
    let record: FileRecord = files::table
        .find(file_id)
        .select(FileRecord::as_select())
        .first(&mut conn)?;
    let artifact = artifact_of(&record)?;

    let bytes = match state.files.open(&artifact, delivery).await? {
        Retrieved::Redirect(url) => return Ok(Redirect::temporary(&url).into_response()),
        Retrieved::Bytes(bytes) => bytes,
        Retrieved::InlineColumn => files::table
            .find(file_id)
            .select(files::blob_data)
            .first::<Option<Vec<u8>>>(&mut conn)?
            .ok_or_else(|| {
                StorageError::Inconsistent(format!("{} row {file_id} has no blob", StorageKind::Database))
            })?,
    };
    drop(conn);

    let content_type = record.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&record.original_name)
            .first_or_octet_stream()
            .to_string()
    });
    let disposition_kind = match delivery {
        Delivery::Download => "attachment",
        Delivery::Preview => "inline",
    };
    let disposition = content_disposition(disposition_kind, &record.original_name)
        .unwrap_or_else(|| disposition_kind.to_string());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
