use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use diesel::{dsl::exists, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{FileRecord, Folder, NewFolder};
use crate::schema::{files, folders, projects};
use crate::state::AppState;
use crate::{
    auth::AuthenticatedUser,
    error::{conflict_on_unique, AppError, AppResult},
    utils::json::{double_option, non_blank, to_iso},
};

use super::files::{to_file_response, FileResponse};

const DEFAULT_COLOR: &str = "#3B82F6";
const DEFAULT_ICON: &str = "folder";
const NAME_TAKEN: &str = "a folder with the same name already exists here";

#[derive(Deserialize)]
pub struct ListFoldersQuery {
    pub project_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateFolderRequest {
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<Uuid>>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
}

#[derive(Serialize)]
pub struct FolderContentsResponse {
    pub folder: Option<FolderInfo>,
    pub breadcrumbs: Vec<FolderInfo>,
    pub subfolders: Vec<FolderInfo>,
    pub files: Vec<FileResponse>,
}

#[derive(Serialize)]
pub struct FolderInfo {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub parent_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

fn validate_color(color: &str) -> AppResult<String> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(color.to_uppercase())
    } else {
        Err(AppError::bad_request("color must be a hex value like #3B82F6"))
    }
}

fn sibling_name_taken(
    conn: &mut PgConnection,
    parent_id: Option<Uuid>,
    name: &str,
    except: Option<Uuid>,
) -> AppResult<bool> {
    let mut query = folders::table
        .select(folders::id)
        .filter(folders::name.eq(name.to_string()))
        .into_boxed();
    query = match parent_id {
        Some(parent_id) => query.filter(folders::parent_id.eq(parent_id)),
        None => query.filter(folders::parent_id.is_null()),
    };
    if let Some(except) = except {
        query = query.filter(folders::id.ne(except));
    }
    let existing: Option<Uuid> = query.first(conn).optional()?;
    Ok(existing.is_some())
}

pub async fn list_folders(
    State(state): State<AppState>,
    Query(query): Query<ListFoldersQuery>,
) -> AppResult<Json<Vec<FolderInfo>>> {
    let mut conn = state.db()?;

    let mut sql = folders::table.into_boxed();
    if let Some(project_id) = query.project_id {
        sql = sql.filter(folders::project_id.eq(project_id));
    }

    let rows: Vec<Folder> = sql.order(folders::name.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(folder_to_info).collect()))
}

pub async fn create_folder(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateFolderRequest>,
) -> AppResult<(StatusCode, Json<FolderInfo>)> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let color = payload
        .color
        .as_deref()
        .map(validate_color)
        .transpose()?
        .unwrap_or_else(|| DEFAULT_COLOR.to_string());

    let mut conn = state.db()?;

    let folder = conn.transaction::<Folder, AppError, _>(|conn| {
        if let Some(parent_id) = payload.parent_id {
            let parent_exists =
                diesel::select(exists(folders::table.find(parent_id))).get_result::<bool>(conn)?;
            if !parent_exists {
                return Err(AppError::bad_request("parent folder does not exist"));
            }
        }
        if let Some(project_id) = payload.project_id {
            let project_exists = diesel::select(exists(projects::table.find(project_id)))
                .get_result::<bool>(conn)?;
            if !project_exists {
                return Err(AppError::bad_request("project does not exist"));
            }
        }
        if sibling_name_taken(conn, payload.parent_id, &name, None)? {
            return Err(AppError::conflict(NAME_TAKEN));
        }

        let new_folder = NewFolder {
            id: Uuid::new_v4(),
            name,
            description: non_blank(payload.description),
            color,
            icon: non_blank(payload.icon).unwrap_or_else(|| DEFAULT_ICON.to_string()),
            parent_id: payload.parent_id,
            project_id: payload.project_id,
            created_by: Some(user.user_id),
        };

        diesel::insert_into(folders::table)
            .values(&new_folder)
            .execute(conn)
            .map_err(|err| conflict_on_unique(err, NAME_TAKEN))?;

        Ok(folders::table.find(new_folder.id).first(conn)?)
    })?;

    Ok((StatusCode::CREATED, Json(folder_to_info(folder))))
}

pub async fn list_folder_contents(
    State(state): State<AppState>,
    Path(folder_identifier): Path<String>,
) -> AppResult<Json<FolderContentsResponse>> {
    let mut conn = state.db()?;

    let folder_id = if folder_identifier.eq_ignore_ascii_case("root") {
        None
    } else {
        Some(
            Uuid::parse_str(&folder_identifier)
                .map_err(|_| AppError::bad_request("folder identifier must be 'root' or a UUID"))?,
        )
    };

    let (folder, breadcrumbs) = match folder_id {
        Some(id) => {
            let folder: Folder = folders::table.find(id).first(&mut conn)?;
            let breadcrumbs = load_breadcrumbs(&mut conn, &folder)?;
            (Some(folder_to_info(folder)), breadcrumbs)
        }
        None => (None, Vec::new()),
    };

    let child_folders: Vec<Folder> = if let Some(parent_id) = folder_id {
        folders::table
            .filter(folders::parent_id.eq(parent_id))
            .order(folders::name.asc())
            .load(&mut conn)?
    } else {
        folders::table
            .filter(folders::parent_id.is_null())
            .order(folders::name.asc())
            .load(&mut conn)?
    };
    let subfolders = child_folders.into_iter().map(folder_to_info).collect();

    let files_query = files::table
        .select(FileRecord::as_select())
        .order(files::created_at.desc());
    let records: Vec<FileRecord> = if let Some(current_folder) = folder_id {
        files_query
            .filter(files::folder_id.eq(current_folder))
            .load(&mut conn)?
    } else {
        files_query
            .filter(files::folder_id.is_null())
            .load(&mut conn)?
    };

    Ok(Json(FolderContentsResponse {
        folder,
        breadcrumbs,
        subfolders,
        files: records.into_iter().map(to_file_response).collect(),
    }))
}

pub async fn delete_folder(
    State(state): State<AppState>,
    Path(folder_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        folders::table.find(folder_id).first::<Folder>(conn)?;

        let has_child_folders: bool = diesel::select(exists(
            folders::table.filter(folders::parent_id.eq(Some(folder_id))),
        ))
        .get_result(conn)?;

        let has_files: bool = diesel::select(exists(
            files::table.filter(files::folder_id.eq(Some(folder_id))),
        ))
        .get_result(conn)?;

        if has_child_folders || has_files {
            return Err(AppError::bad_request(
                "folder must be empty before deletion",
            ));
        }

        diesel::delete(folders::table.find(folder_id)).execute(conn)?;

        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_folder(
    State(state): State<AppState>,
    Path(folder_id): Path<Uuid>,
    Json(payload): Json<UpdateFolderRequest>,
) -> AppResult<Json<FolderInfo>> {
    let color = payload.color.as_deref().map(validate_color).transpose()?;

    let mut conn = state.db()?;

    let folder = conn.transaction::<Folder, AppError, _>(|conn| {
        let folder: Folder = folders::table.find(folder_id).first(conn)?;

        let mut next_parent = folder.parent_id;
        if let Some(parent_request) = payload.parent_id {
            if parent_request == Some(folder_id) {
                return Err(AppError::bad_request("folder cannot be its own parent"));
            }

            if let Some(parent_id) = parent_request {
                let _parent: Folder = folders::table.find(parent_id).first(conn)?;

                let descendant_ids = gather_descendant_folder_ids(conn, folder_id)?;
                if descendant_ids.contains(&parent_id) {
                    return Err(AppError::bad_request(
                        "cannot move folder into itself or a descendant",
                    ));
                }
            }

            next_parent = parent_request;
        }

        let new_name = match payload.name.as_deref().map(str::trim) {
            Some("") => return Err(AppError::bad_request("name must not be empty")),
            Some(name) => name.to_string(),
            None => folder.name.clone(),
        };

        let placement_changed = next_parent != folder.parent_id || new_name != folder.name;
        if placement_changed && sibling_name_taken(conn, next_parent, &new_name, Some(folder_id))? {
            return Err(AppError::conflict(NAME_TAKEN));
        }

        let description = payload
            .description
            .map(non_blank)
            .unwrap_or(folder.description);

        diesel::update(folders::table.find(folder_id))
            .set((
                folders::parent_id.eq(next_parent),
                folders::name.eq(&new_name),
                folders::description.eq(description),
                folders::color.eq(color.unwrap_or(folder.color)),
                folders::icon.eq(non_blank(payload.icon).unwrap_or(folder.icon)),
                folders::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .map_err(|err| conflict_on_unique(err, NAME_TAKEN))
    })?;

    Ok(Json(folder_to_info(folder)))
}

fn folder_to_info(folder: Folder) -> FolderInfo {
    FolderInfo {
        id: folder.id,
        name: folder.name,
        description: folder.description,
        color: folder.color,
        icon: folder.icon,
        parent_id: folder.parent_id,
        project_id: folder.project_id,
        created_at: to_iso(folder.created_at),
        updated_at: to_iso(folder.updated_at),
    }
}

/// Ancestors from the root down to (and including) `folder`.
fn load_breadcrumbs(conn: &mut PgConnection, folder: &Folder) -> AppResult<Vec<FolderInfo>> {
    let mut chain = vec![folder.clone()];
    let mut next = folder.parent_id;

    while let Some(parent_id) = next {
        if chain.iter().any(|f| f.id == parent_id) {
            break;
        }
        let parent: Folder = folders::table.find(parent_id).first(conn)?;
        next = parent.parent_id;
        chain.push(parent);
    }

    chain.reverse();
    Ok(chain.into_iter().map(folder_to_info).collect())
}

fn gather_descendant_folder_ids(
    conn: &mut PgConnection,
    folder_id: Uuid,
) -> AppResult<Vec<Uuid>> {
    let mut ids = vec![folder_id];
    let mut queue = vec![folder_id];

    while let Some(current) = queue.pop() {
        let child_ids: Vec<Uuid> = folders::table
            .filter(folders::parent_id.eq(Some(current)))
            .select(folders::id)
            .load(conn)?;
        queue.extend(child_ids.iter().copied());
        ids.extend(child_ids);
    }

    Ok(ids)
}
