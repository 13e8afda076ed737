use diesel::prelude::*;
use uuid::Uuid;

use crate::models::{NewNotification, Notification};
use crate::schema::notifications;

pub const KIND_WARNING: &str = "warning";
pub const KIND_SUCCESS: &str = "success";

/// Optional links a notification can carry.
#[derive(Debug, Default, Clone, Copy)]
pub struct Links {
    pub project_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
}

pub fn notify(
    conn: &mut PgConnection,
    kind: &str,
    title: impl Into<String>,
    message: impl Into<String>,
    links: Links,
) -> QueryResult<Notification> {
    let new_notification = NewNotification {
        id: Uuid::new_v4(),
        title: title.into(),
        message: message.into(),
        kind: kind.to_string(),
        project_id: links.project_id,
        bill_id: links.bill_id,
    };

    diesel::insert_into(notifications::table)
        .values(&new_notification)
        .execute(conn)?;

    notifications::table.find(new_notification.id).first(conn)
}

/// Formats cents as Brazilian currency, e.g. `R$ 1.234,56`.
pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (idx, ch) in whole.chars().enumerate() {
        if idx > 0 && (whole.len() - idx) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{sign}R$ {grouped},{:02}", cents % 100)
}

#[cfg(test)]
mod tests {
    use super::format_money;

    #[test]
    fn formats_brazilian_currency() {
        assert_eq!(format_money(0), "R$ 0,00");
        assert_eq!(format_money(5), "R$ 0,05");
        assert_eq!(format_money(123_456), "R$ 1.234,56");
        assert_eq!(format_money(100_000_000), "R$ 1.000.000,00");
        assert_eq!(format_money(-2_550), "-R$ 25,50");
    }
}
