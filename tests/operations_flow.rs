mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn client_project_and_staffing_lifecycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;

    let response = app
        .post_json(
            "/api/clients",
            &json!({
                "name": "Padaria Central",
                "email": "contato@padaria.com.br",
                "phone": "11 99999-0000",
                "tax_id": "12.345.678/0001-90",
                "city": "Campinas"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let client = body_json(response).await?;
    let client_id = client["id"].as_str().unwrap_or_default().to_string();

    let response = app.get("/api/clients?q=padaria", Some(&token)).await?;
    let found = body_json(response).await?;
    assert_eq!(found.as_array().map(Vec::len), Some(1));

    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "client_id": client_id,
                "name": "Instalação split 24k BTU",
                "total_value_cents": 1_250_000,
                "equipment": ["split 24000", "suporte"]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let project = body_json(response).await?;
    assert_eq!(project["status"], "Quote");
    assert_eq!(project["client_name"], "Padaria Central");
    let project_id = project["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "client_id": uuid::Uuid::new_v4(),
                "name": "Ghost",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(
            &format!("/api/projects/{project_id}/progress"),
            &json!({ "progress": 40 }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let progressed = body_json(response).await?;
    assert_eq!(progressed["status"], "In Progress");
    assert!(progressed["completed_on"].is_null());

    let response = app
        .patch_json(
            &format!("/api/projects/{project_id}/progress"),
            &json!({ "progress": 101 }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/employees",
            &json!({
                "name": "João Técnico",
                "cpf": "123.456.789-09",
                "position": "Técnico de refrigeração",
                "specialties": ["split", "VRF"]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let employee = body_json(response).await?;
    assert_eq!(employee["cpf"], "12345678909");
    let employee_id = employee["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            &format!("/api/employees/{employee_id}/assignments"),
            &json!({ "project_id": project_id, "role": "lead" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            &format!("/api/employees/{employee_id}/assignments"),
            &json!({ "project_id": project_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.get("/api/employees/available", Some(&token)).await?;
    let available = body_json(response).await?;
    assert_eq!(available.as_array().map(Vec::len), Some(0));

    let response = app
        .get(&format!("/api/projects/{project_id}/staff"), Some(&token))
        .await?;
    let staff = body_json(response).await?;
    assert_eq!(staff[0]["name"], "João Técnico");

    // Active staff blocks deletion of the project and of the employee.
    let response = app
        .delete(&format!("/api/projects/{project_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app
        .delete(&format!("/api/employees/{employee_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(
            &format!("/api/employees/{employee_id}/assignments/{project_id}"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Clients with projects cannot be removed.
    let response = app
        .delete(&format!("/api/clients/{client_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(&format!("/api/projects/{project_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .delete(&format!("/api/clients/{client_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.count_rows("project_staffing").await?, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn plain_users_cannot_delete_records() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.insert_user("field_tech", "tech-pass", "user").await?;
    let token = app.login_token("field_tech", "tech-pass").await?;

    let response = app
        .post_json(
            "/api/clients",
            &json!({ "name": "Loja", "email": "loja@example.com", "phone": "1" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let client = body_json(response).await?;
    let client_id = client["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            "/api/clients",
            &json!({ "name": "Loja 2", "email": "loja@example.com", "phone": "2" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .delete(&format!("/api/clients/{client_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bills_notifications_and_dashboard() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let today = Utc::now().date_naive();

    let response = app
        .post_json(
            "/api/bills",
            &json!({
                "description": "Compressor",
                "amount_cents": 450_000,
                "category": "Equipment",
                "due_date": today + Duration::days(2),
                "priority": "High"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let due_soon = body_json(response).await?;
    let due_soon_id = due_soon["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            "/api/bills",
            &json!({
                "description": "Aluguel",
                "amount_cents": 300_000,
                "due_date": today - Duration::days(3)
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            "/api/bills",
            &json!({
                "description": "Seguro",
                "amount_cents": 10_000,
                "due_date": today + Duration::days(60)
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            "/api/bills",
            &json!({ "description": "Zero", "amount_cents": 0, "due_date": today }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/bills/due?period=overdue", Some(&token)).await?;
    let overdue = body_json(response).await?;
    assert_eq!(overdue.as_array().map(Vec::len), Some(1));
    assert_eq!(overdue[0]["overdue"], true);

    let response = app.get("/api/bills/due?period=next_7_days", Some(&token)).await?;
    let upcoming = body_json(response).await?;
    assert_eq!(upcoming.as_array().map(Vec::len), Some(1));

    let response = app.get("/api/bills/report", Some(&token)).await?;
    let report = body_json(response).await?;
    assert_eq!(report["total_count"], 3);
    assert_eq!(report["pending_cents"], 760_000);
    assert_eq!(report["overdue_count"], 1);

    let response = app
        .patch_raw(&format!("/api/bills/{due_soon_id}/pay"), b"{\"paid_on\":", &token)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_raw(&format!("/api/bills/{due_soon_id}/pay"), b"", &token)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let paid = body_json(response).await?;
    assert_eq!(paid["status"], "Paid");
    assert_eq!(paid["paid_on"], json!(today));

    let response = app
        .patch_json(&format!("/api/bills/{due_soon_id}/pay"), &json!({}), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Two bills due within a week plus one payment.
    let response = app.get("/api/notifications?unread=true", Some(&token)).await?;
    let notifications = body_json(response).await?;
    let unread = notifications.as_array().cloned().unwrap_or_default();
    assert_eq!(unread.len(), 3);
    let first_id = unread[0]["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .patch_json(
            &format!("/api/notifications/{first_id}/read"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.get("/api/dashboard/stats", Some(&token)).await?;
    let stats = body_json(response).await?;
    assert_eq!(stats["pending_bills_count"], 2);
    assert_eq!(stats["pending_bills_cents"], 310_000);
    assert_eq!(stats["overdue_bills"], 1);
    assert_eq!(stats["unread_notifications"], 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn dashboard_views_summarize_operations() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let token = app.admin_token().await?;
    let today = Utc::now().date_naive();

    let response = app
        .post_json(
            "/api/clients",
            &json!({ "name": "Hotel Serra", "email": "obras@hotelserra.com", "phone": "19 3333-0000" }),
            Some(&token),
        )
        .await?;
    let client = body_json(response).await?;
    let client_id = client["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "client_id": client_id,
                "name": "Chiller do lobby",
                "total_value_cents": 2_000_000,
                "start_date": today - Duration::days(10)
            }),
            Some(&token),
        )
        .await?;
    let finished = body_json(response).await?;
    let finished_id = finished["id"].as_str().unwrap_or_default().to_string();
    let response = app
        .patch_json(
            &format!("/api/projects/{finished_id}/progress"),
            &json!({ "progress": 100 }),
            Some(&token),
        )
        .await?;
    assert_eq!(body_json(response).await?["status"], "Completed");

    let response = app
        .post_json(
            "/api/projects",
            &json!({
                "client_id": client_id,
                "name": "Dutos do restaurante",
                "status": "In Progress",
                "due_date": today + Duration::days(3)
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    app.post_json(
        "/api/bills",
        &json!({ "description": "Gás R410A", "amount_cents": 80_000, "due_date": today + Duration::days(3) }),
        Some(&token),
    )
    .await?;
    app.post_json(
        "/api/bills",
        &json!({ "description": "Energia", "amount_cents": 20_000, "due_date": today - Duration::days(1) }),
        Some(&token),
    )
    .await?;
    let response = app
        .post_json(
            "/api/bills",
            &json!({ "description": "Ferramentas", "amount_cents": 5_000, "due_date": today + Duration::days(20) }),
            Some(&token),
        )
        .await?;
    let tools = body_json(response).await?;
    let tools_id = tools["id"].as_str().unwrap_or_default().to_string();
    app.patch_json(&format!("/api/bills/{tools_id}/pay"), &json!({}), Some(&token))
        .await?;

    app.post_json(
        "/api/employees",
        &json!({ "name": "Rita Souza", "cpf": "987.654.321-00", "position": "Auxiliar" }),
        Some(&token),
    )
    .await?;

    let response = app.get("/api/dashboard/recent-projects?limit=1", Some(&token)).await?;
    let recent = body_json(response).await?;
    assert_eq!(recent.as_array().map(Vec::len), Some(1));
    assert_eq!(recent[0]["name"], "Dutos do restaurante");
    assert_eq!(recent[0]["client_name"], "Hotel Serra");

    let response = app.get("/api/dashboard/upcoming-bills?days=7", Some(&token)).await?;
    let upcoming = body_json(response).await?;
    assert_eq!(upcoming["total"], 1);
    assert_eq!(upcoming["total_cents"], 80_000);
    assert_eq!(upcoming["bills"][0]["description"], "Gás R410A");

    let response = app.get("/api/dashboard/monthly-activity", Some(&token)).await?;
    let activity = body_json(response).await?;
    assert_eq!(activity["projects_per_month"][0]["projects"], 2);
    assert_eq!(activity["bills_per_month"][0]["bills"], 3);
    assert_eq!(activity["bills_per_month"][0]["total_cents"], 105_000);

    let response = app.get("/api/dashboard/executive-summary", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await?;
    assert_eq!(summary["financial"]["revenue_total_cents"], 2_000_000);
    assert_eq!(summary["financial"]["revenue_this_month_cents"], 2_000_000);
    assert_eq!(summary["financial"]["expenses_this_month_cents"], 5_000);
    assert_eq!(summary["financial"]["profit_this_month_cents"], 1_995_000);
    assert_eq!(summary["operational"]["overdue_projects"], 0);
    assert_eq!(summary["operational"]["average_completion_days"], 10.0);
    assert_eq!(summary["operational"]["efficiency_rate"], 100.0);

    let response = app.get("/api/dashboard/alerts", Some(&token)).await?;
    let alerts = body_json(response).await?;
    let kinds: Vec<&str> = alerts
        .as_array()
        .map(|items| items.iter().filter_map(|a| a["kind"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(kinds, vec!["error", "warning", "info"]);

    app.insert_user("helper", "helper-pass1", "user").await?;
    let user_token = app.login_token("helper", "helper-pass1").await?;
    let response = app
        .get("/api/dashboard/executive-summary", Some(&user_token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.get("/api/dashboard/alerts", Some(&user_token)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}
