use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    boletos::{self, Bank},
    error::{AppError, AppResult},
    models::{NewReceivedBoleto, ReceivedBoleto},
    notifications::{self, format_money, Links},
    schema::received_boletos,
    state::AppState,
    utils::json::{non_blank, to_iso},
};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;
const SIGNATURE_HEADERS: [&str; 2] = ["x-webhook-signature", "signature"];

#[derive(Deserialize)]
pub struct ListBoletosQuery {
    pub bank: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct BoletoResponse {
    pub id: Uuid,
    pub bank: String,
    pub barcode: String,
    pub amount_cents: i64,
    pub due_at: String,
    pub beneficiary: Option<String>,
    pub account: Option<String>,
    pub status: String,
    pub urgent: bool,
    pub received_at: String,
    pub processed: bool,
}

#[derive(Serialize, Default, Debug, PartialEq, Eq)]
pub struct BankStats {
    pub count: i64,
    pub urgent: i64,
    pub amount_cents: i64,
}

#[derive(Serialize)]
pub struct WebhookStatsResponse {
    pub total: i64,
    pub urgent: i64,
    pub unprocessed: i64,
    pub by_bank: BTreeMap<String, BankStats>,
    pub last_received_at: Option<String>,
    pub signature_required: bool,
}

impl From<ReceivedBoleto> for BoletoResponse {
    fn from(boleto: ReceivedBoleto) -> Self {
        Self {
            id: boleto.id,
            bank: boleto.bank,
            barcode: boleto.barcode,
            amount_cents: boleto.amount_cents,
            due_at: to_iso(boleto.due_at),
            beneficiary: boleto.beneficiary,
            account: boleto.account,
            status: boleto.status,
            urgent: boleto.urgent,
            received_at: to_iso(boleto.received_at),
            processed: boleto.processed,
        }
    }
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

pub async fn receive_boleto(
    State(state): State<AppState>,
    Path(bank): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Value>)> {
    let bank: Bank = bank.parse()?;

    if let Err(err) = boletos::check_signature(
        state.config.webhook_require_signature,
        state.config.webhook_secret(bank.as_str()),
        signature_header(&headers),
        &body,
    ) {
        warn!(bank = %bank, "webhook rejected: invalid signature");
        return Err(err.into());
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        warn!(bank = %bank, error = %err, "webhook rejected: invalid JSON");
        AppError::bad_request(format!("invalid JSON payload: {err}"))
    })?;

    let received_at = Utc::now();
    let normalized = boletos::normalize(bank, &payload, received_at).map_err(|err| {
        warn!(bank = %bank, error = %err, "webhook rejected: unusable payload");
        AppError::from(err)
    })?;

    let mut conn = state.db()?;

    let inserted = conn.transaction::<Option<Uuid>, AppError, _>(|conn| {
        let new_boleto = NewReceivedBoleto {
            id: Uuid::new_v4(),
            bank: bank.as_str().to_string(),
            barcode: normalized.barcode.clone(),
            amount_cents: normalized.amount_cents,
            due_at: normalized.due_at.naive_utc(),
            beneficiary: normalized.beneficiary.clone(),
            account: normalized.account.clone(),
            urgent: normalized.urgent,
            payload: payload.clone(),
        };

        let inserted: Option<Uuid> = diesel::insert_into(received_boletos::table)
            .values(&new_boleto)
            .on_conflict(received_boletos::barcode)
            .do_nothing()
            .returning(received_boletos::id)
            .get_result(conn)
            .optional()?;

        if inserted.is_some() && normalized.urgent {
            notifications::notify(
                conn,
                notifications::KIND_WARNING,
                "Urgent boleto received",
                format!(
                    "{} boleto of {} from {} is due on {}",
                    bank,
                    format_money(normalized.amount_cents),
                    normalized.beneficiary.as_deref().unwrap_or("unknown beneficiary"),
                    normalized.due_at.format("%d/%m/%Y")
                ),
                Links::default(),
            )?;
        }

        Ok(inserted)
    })?;

    match inserted {
        Some(boleto_id) => {
            info!(
                bank = %bank,
                boleto_id = %boleto_id,
                amount_cents = normalized.amount_cents,
                urgent = normalized.urgent,
                "boleto received"
            );
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "status": "received",
                    "boleto_id": boleto_id,
                    "urgent": normalized.urgent,
                })),
            ))
        }
        None => {
            let existing: Uuid = received_boletos::table
                .filter(received_boletos::barcode.eq(&normalized.barcode))
                .select(received_boletos::id)
                .first(&mut conn)?;
            info!(bank = %bank, boleto_id = %existing, "duplicate boleto ignored");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "status": "already_processed",
                    "boleto_id": existing,
                })),
            ))
        }
    }
}

pub async fn list_boletos(
    State(state): State<AppState>,
    Query(query): Query<ListBoletosQuery>,
) -> AppResult<Json<Vec<BoletoResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let mut sql = received_boletos::table.into_boxed();
    if let Some(bank) = non_blank(query.bank) {
        let bank: Bank = bank.parse()?;
        sql = sql.filter(received_boletos::bank.eq(bank.as_str()));
    }
    if let Some(status) = non_blank(query.status) {
        sql = sql.filter(received_boletos::status.eq(status));
    }

    let mut conn = state.db()?;
    let rows: Vec<ReceivedBoleto> = sql
        .order(received_boletos::received_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(BoletoResponse::from).collect()))
}

pub async fn webhook_stats(State(state): State<AppState>) -> AppResult<Json<WebhookStatsResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<(String, bool, bool, i64, NaiveDateTime)> = received_boletos::table
        .select((
            received_boletos::bank,
            received_boletos::urgent,
            received_boletos::processed,
            received_boletos::amount_cents,
            received_boletos::received_at,
        ))
        .load(&mut conn)?;

    let mut by_bank: BTreeMap<String, BankStats> = BTreeMap::new();
    let mut urgent = 0;
    let mut unprocessed = 0;
    for (bank, is_urgent, processed, amount_cents, _) in &rows {
        let entry = by_bank.entry(bank.clone()).or_default();
        entry.count += 1;
        entry.amount_cents += amount_cents;
        if *is_urgent {
            entry.urgent += 1;
            urgent += 1;
        }
        if !processed {
            unprocessed += 1;
        }
    }

    Ok(Json(WebhookStatsResponse {
        total: rows.len() as i64,
        urgent,
        unprocessed,
        by_bank,
        last_received_at: rows.iter().map(|row| row.4).max().map(to_iso),
        signature_required: state.config.webhook_require_signature,
    }))
}
