//! Normalization of bank webhook payloads into received boletos.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Boletos due within this many whole days (or already overdue) are flagged urgent.
pub const URGENT_WITHIN_DAYS: i64 = 3;

const MAX_BARCODE_CHARS: usize = 100;
const MAX_BENEFICIARY_CHARS: usize = 200;
const MAX_ACCOUNT_CHARS: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoletoError {
    #[error("unsupported bank: {0}")]
    UnsupportedBank(String),
    #[error("payload must be a JSON object")]
    NotAnObject,
    #[error("payload is missing the barcode field `{0}`")]
    MissingBarcode(&'static str),
    #[error("invalid amount in field `{0}`")]
    InvalidAmount(&'static str),
    #[error("field `{field}` exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("invalid webhook signature")]
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Bradesco,
    Itau,
    BancoBrasil,
}

struct FieldMap {
    barcode: &'static str,
    amount: &'static str,
    due: &'static str,
    beneficiary: &'static str,
    account: &'static str,
}

impl Bank {
    pub const ALL: [Bank; 3] = [Bank::Bradesco, Bank::Itau, Bank::BancoBrasil];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bank::Bradesco => "BRADESCO",
            Bank::Itau => "ITAU",
            Bank::BancoBrasil => "BANCO_BRASIL",
        }
    }

    fn fields(&self) -> FieldMap {
        match self {
            Bank::Bradesco => FieldMap {
                barcode: "codigoBarras",
                amount: "valor",
                due: "dataVencimento",
                beneficiary: "beneficiario",
                account: "conta",
            },
            Bank::Itau => FieldMap {
                barcode: "barCode",
                amount: "amount",
                due: "dueDate",
                beneficiary: "payeeName",
                account: "accountNumber",
            },
            Bank::BancoBrasil => FieldMap {
                barcode: "codigo_barras",
                amount: "valor_titulo",
                due: "data_vencimento",
                beneficiary: "nome_beneficiario",
                account: "numero_conta",
            },
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bank {
    type Err = BoletoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace('-', "_");
        Bank::ALL
            .into_iter()
            .find(|bank| bank.as_str() == normalized)
            .ok_or_else(|| BoletoError::UnsupportedBank(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBoleto {
    pub bank: Bank,
    pub barcode: String,
    pub amount_cents: i64,
    pub due_at: DateTime<Utc>,
    pub beneficiary: Option<String>,
    pub account: Option<String>,
    pub urgent: bool,
}

pub fn normalize(
    bank: Bank,
    payload: &Value,
    received_at: DateTime<Utc>,
) -> Result<NormalizedBoleto, BoletoError> {
    let object = payload.as_object().ok_or(BoletoError::NotAnObject)?;
    let fields = bank.fields();

    let barcode = object
        .get(fields.barcode)
        .and_then(text_value)
        .ok_or(BoletoError::MissingBarcode(fields.barcode))?;
    check_length(&barcode, fields.barcode, MAX_BARCODE_CHARS)?;

    let beneficiary = object.get(fields.beneficiary).and_then(text_value);
    if let Some(beneficiary) = &beneficiary {
        check_length(beneficiary, fields.beneficiary, MAX_BENEFICIARY_CHARS)?;
    }
    let account = object.get(fields.account).and_then(text_value);
    if let Some(account) = &account {
        check_length(account, fields.account, MAX_ACCOUNT_CHARS)?;
    }

    let amount_cents = match object.get(fields.amount) {
        None | Some(Value::Null) => 0,
        Some(value) => parse_amount_cents(value).ok_or(BoletoError::InvalidAmount(fields.amount))?,
    };

    let due_at = parse_due(
        object.get(fields.due).and_then(Value::as_str),
        received_at,
    );

    Ok(NormalizedBoleto {
        bank,
        barcode,
        amount_cents,
        due_at,
        beneficiary,
        account,
        urgent: is_urgent(due_at, received_at),
    })
}

fn check_length(value: &str, field: &'static str, max: usize) -> Result<(), BoletoError> {
    if value.chars().count() > max {
        return Err(BoletoError::FieldTooLong { field, max });
    }
    Ok(())
}

fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Accepts JSON numbers and decimal strings with either `.` or `,` as separator.
pub fn parse_amount_cents(value: &Value) -> Option<i64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let normalized = if s.contains(',') {
                s.replace('.', "").replace(',', ".")
            } else {
                s.to_string()
            };
            normalized.parse::<f64>().ok()?
        }
        _ => return None,
    };

    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let cents = (amount * 100.0).round();
    if cents >= i64::MAX as f64 {
        return None;
    }
    Some(cents as i64)
}

/// RFC 3339 timestamps or plain `YYYY-MM-DD` dates; anything else yields `fallback`.
pub fn parse_due(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return fallback;
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(fallback)
}

/// Counts whole days left, so anything short of four full days is urgent.
pub fn is_urgent(due_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (due_at - now).num_days() <= URGENT_WITHIN_DAYS
}

/// Checks a hex HMAC-SHA256 of `body`; an optional `sha256=` prefix is accepted.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Applies the signature policy: nothing is checked unless enforcement is on.
pub fn check_signature(
    required: bool,
    secret: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), BoletoError> {
    if !required {
        return Ok(());
    }
    match (secret, signature) {
        (Some(secret), Some(signature)) if verify_signature(secret, body, signature) => Ok(()),
        _ => Err(BoletoError::InvalidSignature),
    }
}
