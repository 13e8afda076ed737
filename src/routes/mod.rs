use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod bills;
pub mod clients;
pub mod dashboard;
pub mod employees;
pub mod files;
pub mod folders;
pub mod health;
pub mod notifications;
pub mod projects;
pub mod webhooks;

/// Room for multipart boundaries and text fields on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

fn cors_layer(state: &AppState) -> CorsLayer {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/verify-token", get(auth::verify_token))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/profile", get(auth::get_profile).put(auth::update_profile))
        .route("/change-password", post(auth::change_password))
        .route("/users", get(auth::list_users))
        .route(
            "/users/:id",
            put(auth::update_user).delete(auth::delete_user),
        );

    let clients_routes = Router::new()
        .route("/", get(clients::list_clients).post(clients::create_client))
        .route(
            "/:id",
            get(clients::get_client)
                .put(clients::update_client)
                .delete(clients::delete_client),
        );

    let projects_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/:id/progress", patch(projects::update_progress))
        .route("/:id/staff", get(projects::list_project_staff));

    let employees_routes = Router::new()
        .route(
            "/",
            get(employees::list_employees).post(employees::create_employee),
        )
        .route("/available", get(employees::list_available_employees))
        .route(
            "/:id",
            get(employees::get_employee)
                .put(employees::update_employee)
                .delete(employees::delete_employee),
        )
        .route("/:id/assignments", post(employees::assign_employee))
        .route(
            "/:id/assignments/:project_id",
            delete(employees::unassign_employee),
        );

    let bills_routes = Router::new()
        .route("/", get(bills::list_bills).post(bills::create_bill))
        .route("/due", get(bills::list_due_bills))
        .route("/report", get(bills::bills_report))
        .route(
            "/:id",
            get(bills::get_bill)
                .put(bills::update_bill)
                .delete(bills::delete_bill),
        )
        .route("/:id/pay", patch(bills::pay_bill));

    let folders_routes = Router::new()
        .route("/", get(folders::list_folders).post(folders::create_folder))
        .route(
            "/:id",
            delete(folders::delete_folder).patch(folders::update_folder),
        )
        .route("/:id/contents", get(folders::list_folder_contents));

    let files_routes = Router::new()
        .route("/", get(files::list_files).post(files::upload_file))
        .route("/search", get(files::search_files))
        .route("/stats", get(files::file_stats))
        .route(
            "/:id",
            get(files::get_file)
                .put(files::update_file)
                .delete(files::delete_file),
        )
        .route("/:id/download", get(files::download_file))
        .route("/:id/preview", get(files::preview_file));

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/:id/read", patch(notifications::mark_notification_read));

    let webhook_admin_routes = Router::new()
        .route("/boletos", get(webhooks::list_boletos))
        .route("/stats", get(webhooks::webhook_stats));

    let dashboard_routes = Router::new()
        .route("/stats", get(dashboard::dashboard_stats))
        .route("/recent-projects", get(dashboard::recent_projects))
        .route("/upcoming-bills", get(dashboard::upcoming_bills))
        .route("/monthly-activity", get(dashboard::monthly_activity))
        .route("/executive-summary", get(dashboard::executive_summary))
        .route("/alerts", get(dashboard::alerts));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/clients", clients_routes)
        .nest("/api/projects", projects_routes)
        .nest("/api/employees", employees_routes)
        .nest("/api/bills", bills_routes)
        .nest("/api/folders", folders_routes)
        .nest("/api/files", files_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/webhooks", webhook_admin_routes)
        .nest("/api/dashboard", dashboard_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route(
            "/api/webhooks/boletos/:bank",
            post(webhooks::receive_boleto),
        )
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
