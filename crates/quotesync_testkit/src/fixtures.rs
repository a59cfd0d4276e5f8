//! Quotation fixtures.
//!
//! Provides a builder for quotations and helpers for the common
//! "cached copy vs server copy" scenarios.

use chrono::{DateTime, Duration, TimeZone, Utc};
use quotesync_protocol::{Fields, Quotation, QuotationId, QuotationState};
use serde_json::{json, Value};
use uuid::Uuid;

/// Client identifier used when a test does not care.
pub const DEFAULT_CLIENT: &str = "compras@ferreteria-norte.mx";

/// Fixed instant used as `updated_at` so fixtures compare deterministically.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Builder for test quotations.
#[derive(Debug, Clone)]
pub struct QuotationBuilder {
    record: Quotation,
}

impl QuotationBuilder {
    /// Starts from [`sample_fields`] for [`DEFAULT_CLIENT`], version 1,
    /// `CARGADA`.
    pub fn new() -> Self {
        let mut record = Quotation::new(QuotationId::new(), DEFAULT_CLIENT, sample_fields());
        record.updated_at = epoch();
        Self { record }
    }

    /// Uses a deterministic id derived from `n`.
    pub fn numbered(mut self, n: u128) -> Self {
        self.record.id = QuotationId::from_uuid(Uuid::from_u128(n));
        self
    }

    /// Sets the id.
    pub fn id(mut self, id: QuotationId) -> Self {
        self.record.id = id;
        self
    }

    /// Sets the client identifier.
    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.record.client_email = client.into();
        self
    }

    /// Sets the version.
    pub fn version(mut self, version: u64) -> Self {
        self.record.version = version;
        self
    }

    /// Sets the lifecycle state.
    pub fn state(mut self, state: QuotationState) -> Self {
        self.record.state = state;
        self
    }

    /// Sets one content field.
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.record.set_field(name, value);
        self
    }

    /// Removes one content field.
    pub fn without_field(mut self, name: &str) -> Self {
        self.record.fields.remove(name);
        self
    }

    /// Replaces every content field.
    pub fn fields(mut self, fields: Fields) -> Self {
        self.record.fields = fields;
        self
    }

    /// Moves `updated_at` forward from the fixture epoch.
    pub fn updated_after(mut self, minutes: i64) -> Self {
        self.record.updated_at = epoch() + Duration::minutes(minutes);
        self
    }

    /// Builds the quotation.
    pub fn build(self) -> Quotation {
        self.record
    }
}

impl Default for QuotationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Content fields of a typical quotation.
pub fn sample_fields() -> Fields {
    let mut fields = Fields::new();
    fields.insert("empresa".into(), json!("Ferretería Norte"));
    fields.insert("contacto".into(), json!("Lucía Ramos"));
    fields.insert("telefono".into(), json!("+52 81 5555 0101"));
    fields.insert(
        "items".into(),
        json!([
            {"sku": "TOR-0125", "descripcion": "Tornillo 1/4", "cantidad": 500, "precio": 1.2},
            {"sku": "TAQ-0300", "descripcion": "Taquete 3/8", "cantidad": 500, "precio": 0.8},
        ]),
    );
    fields.insert("subtotal".into(), json!(1000.0));
    fields.insert("iva".into(), json!(160.0));
    fields.insert("total".into(), json!(1160.0));
    fields.insert("moneda".into(), json!("MXN"));
    fields
}

/// A sample quotation.
pub fn sample_quotation() -> Quotation {
    QuotationBuilder::new().build()
}

/// A cached copy and a newer server copy that differ in one field.
///
/// The cached copy is at version 3 with `field = local_value`; the server
/// copy is at version 4 with `field = server_value`. Everything else is
/// identical.
pub fn diverged_pair(field: &str, local_value: &str, server_value: &str) -> (Quotation, Quotation) {
    let base = QuotationBuilder::new();
    let local = base
        .clone()
        .version(3)
        .field(field, json!(local_value))
        .build();
    let server = base
        .id(local.id)
        .version(4)
        .field(field, json!(server_value))
        .updated_after(5)
        .build();
    (local, server)
}

/// `count` quotations of one client, all in `state`.
pub fn client_quotations(client: &str, state: QuotationState, count: usize) -> Vec<Quotation> {
    (0..count)
        .map(|_| QuotationBuilder::new().client(client).state(state).build())
        .collect()
}
