//! Spreadsheet mirror for created orders. Appends are fire-and-forget:
//! the order row in the database is the source of truth and a failed
//! append only produces a log line.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;

use delguur_core::domain::order::Order;

/// Target range for appended rows; the sheets API picks the next free row.
pub const SHEET_RANGE: &str = "Orders!A:H";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("sheet transport failure: {0}")]
    Transport(String),
    #[error("sheet append rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

#[async_trait]
pub trait SheetMirror: Send + Sync {
    async fn append_order(&self, order: &Order) -> Result<(), MirrorError>;
}

/// One spreadsheet row per order, matching the column layout of
/// [`SHEET_RANGE`].
pub fn order_row(order: &Order) -> Vec<String> {
    let items = order
        .lines
        .iter()
        .map(|line| format!("{} x{}", line.product_name, line.quantity))
        .collect::<Vec<_>>()
        .join("; ");

    vec![
        order.created_at.to_rfc3339(),
        order.id.0.to_string(),
        order.phone.clone(),
        order.address.clone(),
        items,
        order.total.to_string(),
        if order.needs_review { "review" } else { "ok" }.to_string(),
        format!("{:.2}", order.provenance.confidence),
    ]
}

pub struct HttpSheetMirror {
    client: reqwest::Client,
    api_base_url: String,
    spreadsheet_id: String,
    access_token: SecretString,
}

impl HttpSheetMirror {
    pub fn new(
        api_base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: SecretString,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base_url: api_base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token,
        }
    }
}

#[async_trait]
impl SheetMirror for HttpSheetMirror {
    async fn append_order(&self, order: &Order) -> Result<(), MirrorError> {
        let url = format!(
            "{}/spreadsheets/{}/values/{}:append",
            self.api_base_url.trim_end_matches('/'),
            self.spreadsheet_id,
            SHEET_RANGE,
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [order_row(order)] }))
            .send()
            .await
            .map_err(|error| MirrorError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(MirrorError::Rejected { status: status.as_u16(), message });
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct NoopSheetMirror;

#[async_trait]
impl SheetMirror for NoopSheetMirror {
    async fn append_order(&self, _order: &Order) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// Test double recording every appended row, optionally failing on demand.
#[derive(Default)]
pub struct RecordingSheetMirror {
    rows: Mutex<Vec<Vec<String>>>,
    fail_all: Mutex<bool>,
}

impl RecordingSheetMirror {
    pub fn fail_all(&self) {
        *self.fail_all.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SheetMirror for RecordingSheetMirror {
    async fn append_order(&self, order: &Order) -> Result<(), MirrorError> {
        if *self.fail_all.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(MirrorError::Transport("recording mirror is set to fail".to_string()));
        }

        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.push(order_row(order));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use delguur_core::domain::conversation::ConversationId;
    use delguur_core::domain::customer::CustomerId;
    use delguur_core::domain::order::{Order, OrderId, OrderLine, OrderStatus, Provenance};

    use super::{order_row, RecordingSheetMirror, SheetMirror};

    fn order() -> Order {
        let lines = vec![OrderLine {
            product_name: "хар цамц".to_string(),
            quantity: 2,
            unit_price: Decimal::new(15_000, 0),
        }];
        let total = Order::compute_total(&lines);
        Order {
            id: OrderId(Uuid::new_v4()),
            conversation_id: ConversationId(Uuid::new_v4()),
            customer_id: CustomerId(Uuid::new_v4()),
            phone: "99112233".to_string(),
            address: "БЗД 14-р хороо".to_string(),
            lines,
            total,
            needs_review: false,
            status: OrderStatus::Pending,
            provenance: Provenance {
                message_text: "2 ширхэг хар цамц авъя".to_string(),
                raw_extraction: serde_json::Value::Null,
                confidence: 0.92,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn row_carries_contact_items_and_total() {
        let row = order_row(&order());

        assert_eq!(row.len(), 8);
        assert_eq!(row[2], "99112233");
        assert_eq!(row[3], "БЗД 14-р хороо");
        assert_eq!(row[4], "хар цамц x2");
        assert_eq!(row[5], "30000");
        assert_eq!(row[6], "ok");
        assert_eq!(row[7], "0.92");
    }

    #[tokio::test]
    async fn recording_mirror_captures_rows_and_can_fail() {
        let mirror = RecordingSheetMirror::default();
        mirror.append_order(&order()).await.expect("append");
        assert_eq!(mirror.rows().len(), 1);

        mirror.fail_all();
        assert!(mirror.append_order(&order()).await.is_err());
        assert_eq!(mirror.rows().len(), 1);
    }
}
