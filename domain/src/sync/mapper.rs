//! Provider-specific mapping from wire records to [`CanonicalRecord`]s.
//!
//! Every function here is pure. Amounts end up in the currency's minor units:
//! QuickBooks and Xero report decimal major units, which go through
//! [`major_to_minor_units`]; Wave already reports `minorUnitValue`.

use std::fmt;

use accounting_auth::oauth::{EntityKind, ProviderKind, ProviderRecord};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use super::{CanonicalRecord, Contact, Invoice, Payment};
use crate::error::{sync_error, Error, SyncErrorKind};

/// A provider record that does not have the shape its mapping expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingError {
    pub provider: ProviderKind,
    pub kind: EntityKind,
    pub external_id: Option<String>,
    pub reason: String,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "malformed {} {}", self.provider, self.kind)?;
        if let Some(id) = &self.external_id {
            write!(f, " {}", id)?;
        }
        write!(f, ": {}", self.reason)
    }
}

impl std::error::Error for MappingError {}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        sync_error(SyncErrorKind::Mapping, &err.to_string())
    }
}

/// Number of minor-unit digits for an ISO 4217 currency code.
pub fn currency_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Convert a decimal amount in major units to an integer count of minor units.
///
/// The text is parsed exactly. More significant fractional digits than
/// `exponent` is an error, never a rounding; trailing zeros past the exponent
/// are accepted since they carry no value.
pub fn major_to_minor_units(text: &str, exponent: u32) -> Result<i64, String> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (digits, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(format!("'{}' is not a decimal amount", text));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(format!("'{}' is not a decimal amount", text));
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > exponent as usize {
        return Err(format!(
            "'{}' has more than {} fractional digits",
            text, exponent
        ));
    }

    let scaled = format!(
        "{}{}{}",
        if whole.is_empty() { "0" } else { whole },
        fraction,
        "0".repeat(exponent as usize - fraction.len())
    );
    let magnitude = scaled
        .parse::<i64>()
        .map_err(|_| format!("'{}' overflows the minor unit range", text))?;

    Ok(if negative { -magnitude } else { magnitude })
}

/// Normalize one provider record for `org_id`.
///
/// `account_id` is the provider-side company the record was fetched from.
/// QuickBooks ids are only unique within a company (realm), so QuickBooks
/// external ids, and the ids they link to, are qualified as `"{realm}:{Id}"`.
pub fn to_canonical(
    record: &ProviderRecord,
    provider: ProviderKind,
    org_id: &str,
    account_id: Option<&str>,
) -> Result<CanonicalRecord, MappingError> {
    let fields = Fields::new(provider, record, id_field(provider, record.kind))?;

    match (provider, record.kind) {
        (ProviderKind::QuickBooks, EntityKind::Invoice) => {
            quickbooks_invoice(&fields, org_id, realm(&fields, account_id)?)
        }
        (ProviderKind::QuickBooks, EntityKind::Payment) => {
            quickbooks_payment(&fields, org_id, realm(&fields, account_id)?)
        }
        (ProviderKind::QuickBooks, EntityKind::Contact) => {
            quickbooks_contact(&fields, org_id, realm(&fields, account_id)?)
        }
        (ProviderKind::Xero, EntityKind::Invoice) => xero_invoice(&fields, org_id),
        (ProviderKind::Xero, EntityKind::Payment) => xero_payment(&fields, org_id),
        (ProviderKind::Xero, EntityKind::Contact) => xero_contact(&fields, org_id),
        (ProviderKind::Wave, EntityKind::Invoice) => wave_invoice(&fields, org_id),
        (ProviderKind::Wave, EntityKind::Payment) => wave_payment(&fields, org_id),
        (ProviderKind::Wave, EntityKind::Contact) => wave_contact(&fields, org_id),
    }
}

fn realm<'r>(fields: &Fields, account_id: Option<&'r str>) -> Result<&'r str, MappingError> {
    account_id
        .filter(|realm| !realm.is_empty())
        .ok_or_else(|| fields.error("QuickBooks record without a company realm id"))
}

fn qualified(realm: &str, id: &str) -> String {
    format!("{}:{}", realm, id)
}

fn id_field(provider: ProviderKind, kind: EntityKind) -> &'static str {
    match (provider, kind) {
        (ProviderKind::QuickBooks, _) => "Id",
        (ProviderKind::Xero, EntityKind::Invoice) => "InvoiceID",
        (ProviderKind::Xero, EntityKind::Payment) => "PaymentID",
        (ProviderKind::Xero, EntityKind::Contact) => "ContactID",
        (ProviderKind::Wave, _) => "id",
    }
}

/// Field access over one payload that reports failures as [`MappingError`]s.
struct Fields<'a> {
    provider: ProviderKind,
    kind: EntityKind,
    payload: &'a Value,
    external_id: String,
}

impl<'a> Fields<'a> {
    fn new(
        provider: ProviderKind,
        record: &'a ProviderRecord,
        id_field: &str,
    ) -> Result<Self, MappingError> {
        let external_id = match record.payload.get(id_field) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(MappingError {
                    provider,
                    kind: record.kind,
                    external_id: None,
                    reason: format!("missing {}", id_field),
                })
            }
        };
        Ok(Self {
            provider,
            kind: record.kind,
            payload: &record.payload,
            external_id,
        })
    }

    fn error(&self, reason: impl Into<String>) -> MappingError {
        MappingError {
            provider: self.provider,
            kind: self.kind,
            external_id: Some(self.external_id.clone()),
            reason: reason.into(),
        }
    }

    /// Follows a `/`-separated path; `"CurrencyRef/value"` reads `payload.CurrencyRef.value`.
    fn value(&self, path: &str) -> Option<&'a Value> {
        path.split('/')
            .try_fold(self.payload, |value, key| value.get(key))
            .filter(|value| !value.is_null())
    }

    fn text(&self, path: &str) -> Option<String> {
        match self.value(path)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required_text(&self, path: &str) -> Result<String, MappingError> {
        self.text(path)
            .ok_or_else(|| self.error(format!("missing {}", path)))
    }

    fn flag(&self, path: &str) -> Result<bool, MappingError> {
        match self.value(path) {
            None => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(self.error(format!("{} is not a boolean", path))),
        }
    }

    /// A decimal major-unit amount converted to minor units of `currency`.
    fn major_amount(&self, path: &str, currency: &str) -> Result<i64, MappingError> {
        let text = self.required_text(path)?;
        major_to_minor_units(&text, currency_exponent(currency))
            .map_err(|reason| self.error(format!("{}: {}", path, reason)))
    }

    /// An integer minor-unit amount, sent as a JSON number or a numeric string.
    fn minor_amount(&self, path: &str) -> Result<i64, MappingError> {
        let invalid = || self.error(format!("{} is not an integer amount", path));
        match self.value(path) {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid()),
            _ => Err(self.error(format!("missing {}", path))),
        }
    }

    fn date(&self, path: &str) -> Result<Option<NaiveDate>, MappingError> {
        match self.text(path) {
            None => Ok(None),
            Some(text) => parse_date(&text)
                .map(Some)
                .ok_or_else(|| self.error(format!("{} has unrecognized date '{}'", path, text))),
        }
    }

    fn reference(&self, number: Option<&str>) -> String {
        reference(self.provider, &self.external_id, number)
    }
}

fn reference(provider: ProviderKind, external_id: &str, number: Option<&str>) -> String {
    match number {
        Some(number) => format!("{}:{} #{}", provider, external_id, number),
        None => format!("{}:{}", provider, external_id),
    }
}

/// Accepts `YYYY-MM-DD`, an ISO date-time (the date part is kept), and Xero's
/// `/Date(1518685950940+0000)/` form, which is read in the offset it carries.
fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Some(inner) = text
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        return parse_ms_date(inner);
    }
    text.get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
}

fn parse_ms_date(inner: &str) -> Option<NaiveDate> {
    // A leading '-' belongs to the millisecond count, not the offset.
    let split = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i);
    let (millis, offset) = match split {
        Some(i) => (&inner[..i], Some(&inner[i..])),
        None => (inner, None),
    };
    let millis = millis.parse::<i64>().ok()?;

    let offset_secs = match offset {
        // `offset` starts at an ASCII sign, so `[1..]` is on a char boundary.
        Some(offset)
            if offset.len() == 5 && offset[1..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            let sign = if offset.starts_with('-') { -1 } else { 1 };
            let hours = offset[1..3].parse::<i32>().ok()?;
            let minutes = offset[3..5].parse::<i32>().ok()?;
            sign * (hours * 3600 + minutes * 60)
        }
        Some(_) => return None,
        None => 0,
    };

    let offset = FixedOffset::east_opt(offset_secs)?;
    let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
    Some(offset.from_utc_datetime(&utc.naive_utc()).date_naive())
}

fn invoice_status(provider: ProviderKind, raw: Option<&str>, balance_minor: i64) -> String {
    let raw = match raw {
        Some(raw) => raw.to_ascii_uppercase(),
        // QuickBooks invoices carry no status; the balance decides.
        None if balance_minor == 0 => return "paid".to_string(),
        None => return "open".to_string(),
    };
    let status = match (provider, raw.as_str()) {
        (_, "DRAFT") | (ProviderKind::Wave, "SAVED") => "draft",
        (_, "PAID") => "paid",
        (ProviderKind::Xero, "VOIDED") | (ProviderKind::Xero, "DELETED") => "void",
        (ProviderKind::Xero, "SUBMITTED") | (ProviderKind::Xero, "AUTHORISED") => "open",
        (ProviderKind::Wave, "SENT")
        | (ProviderKind::Wave, "VIEWED")
        | (ProviderKind::Wave, "PARTIAL")
        | (ProviderKind::Wave, "UNPAID")
        | (ProviderKind::Wave, "OVERDUE") => "open",
        _ => return raw.to_ascii_lowercase(),
    };
    status.to_string()
}

fn quickbooks_invoice(
    fields: &Fields,
    org_id: &str,
    realm: &str,
) -> Result<CanonicalRecord, MappingError> {
    let currency = fields.required_text("CurrencyRef/value")?;
    let total_minor = fields.major_amount("TotalAmt", &currency)?;
    let balance_minor = fields.major_amount("Balance", &currency)?;
    let number = fields.text("DocNumber");

    Ok(CanonicalRecord::Invoice(Invoice {
        org_id: org_id.to_string(),
        source: ProviderKind::QuickBooks,
        external_id: qualified(realm, &fields.external_id),
        reference: fields.reference(number.as_deref()),
        number,
        contact_external_id: fields
            .text("CustomerRef/value")
            .map(|id| qualified(realm, &id)),
        status: invoice_status(ProviderKind::QuickBooks, None, balance_minor),
        currency,
        total_minor,
        balance_minor,
        issued_on: fields.date("TxnDate")?,
        due_on: fields.date("DueDate")?,
    }))
}

fn quickbooks_payment(
    fields: &Fields,
    org_id: &str,
    realm: &str,
) -> Result<CanonicalRecord, MappingError> {
    let currency = fields.required_text("CurrencyRef/value")?;
    let amount_minor = fields.major_amount("TotalAmt", &currency)?;

    // Line[].LinkedTxn[] entries of type Invoice name the invoices this payment settles.
    let invoice_external_id = fields
        .value("Line")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|line| line.get("LinkedTxn").and_then(Value::as_array))
        .flatten()
        .find(|txn| txn.get("TxnType").and_then(Value::as_str) == Some("Invoice"))
        .and_then(|txn| txn.get("TxnId"))
        .and_then(|id| match id {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        });

    Ok(CanonicalRecord::Payment(Payment {
        org_id: org_id.to_string(),
        source: ProviderKind::QuickBooks,
        external_id: qualified(realm, &fields.external_id),
        reference: fields.reference(fields.text("PaymentRefNum").as_deref()),
        invoice_external_id: invoice_external_id.map(|id| qualified(realm, &id)),
        currency,
        amount_minor,
        paid_on: fields.date("TxnDate")?,
    }))
}

fn quickbooks_contact(
    fields: &Fields,
    org_id: &str,
    realm: &str,
) -> Result<CanonicalRecord, MappingError> {
    Ok(CanonicalRecord::Contact(Contact {
        org_id: org_id.to_string(),
        source: ProviderKind::QuickBooks,
        external_id: qualified(realm, &fields.external_id),
        display_name: fields.required_text("DisplayName")?,
        email: fields.text("PrimaryEmailAddr/Address"),
        phone: fields.text("PrimaryPhone/FreeFormNumber"),
        is_customer: true,
        is_supplier: false,
        reference: fields.reference(None),
    }))
}

fn xero_invoice(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    let currency = fields.required_text("CurrencyCode")?;
    let total_minor = fields.major_amount("Total", &currency)?;
    let balance_minor = fields.major_amount("AmountDue", &currency)?;
    let number = fields.text("InvoiceNumber");
    let issued_on = match fields.date("Date")? {
        Some(date) => Some(date),
        None => fields.date("DateString")?,
    };

    Ok(CanonicalRecord::Invoice(Invoice {
        org_id: org_id.to_string(),
        source: ProviderKind::Xero,
        external_id: fields.external_id.clone(),
        reference: fields.reference(number.as_deref()),
        number,
        contact_external_id: fields.text("Contact/ContactID"),
        status: invoice_status(
            ProviderKind::Xero,
            fields.text("Status").as_deref(),
            balance_minor,
        ),
        currency,
        total_minor,
        balance_minor,
        issued_on,
        due_on: fields.date("DueDate")?,
    }))
}

fn xero_payment(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    let currency = fields.required_text("Invoice/CurrencyCode")?;

    Ok(CanonicalRecord::Payment(Payment {
        org_id: org_id.to_string(),
        source: ProviderKind::Xero,
        external_id: fields.external_id.clone(),
        reference: fields.reference(fields.text("Reference").as_deref()),
        invoice_external_id: fields.text("Invoice/InvoiceID"),
        amount_minor: fields.major_amount("Amount", &currency)?,
        currency,
        paid_on: fields.date("Date")?,
    }))
}

fn xero_contact(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    // Prefer the DEFAULT phone, then any phone with a number.
    let phones: Vec<&Value> = fields
        .value("Phones")
        .and_then(Value::as_array)
        .map(|phones| phones.iter().collect())
        .unwrap_or_default();
    let has_number = |phone: &&&Value| {
        phone
            .get("PhoneNumber")
            .and_then(Value::as_str)
            .is_some_and(|n| !n.is_empty())
    };
    let phone = phones
        .iter()
        .filter(has_number)
        .find(|phone| phone.get("PhoneType").and_then(Value::as_str) == Some("DEFAULT"))
        .or_else(|| phones.iter().find(has_number))
        .map(|phone| {
            let number = phone.get("PhoneNumber").and_then(Value::as_str).unwrap_or_default();
            match phone.get("PhoneAreaCode").and_then(Value::as_str) {
                Some(area) if !area.is_empty() => format!("{} {}", area, number),
                _ => number.to_string(),
            }
        });

    Ok(CanonicalRecord::Contact(Contact {
        org_id: org_id.to_string(),
        source: ProviderKind::Xero,
        external_id: fields.external_id.clone(),
        display_name: fields.required_text("Name")?,
        email: fields.text("EmailAddress"),
        phone,
        is_customer: fields.flag("IsCustomer")?,
        is_supplier: fields.flag("IsSupplier")?,
        reference: fields.reference(None),
    }))
}

fn wave_currency(fields: &Fields, amount: &str) -> Result<String, MappingError> {
    fields
        .text(&format!("{}/currency/code", amount))
        .or_else(|| fields.text("total/currency/code"))
        .ok_or_else(|| fields.error(format!("missing {}/currency/code", amount)))
}

fn wave_invoice(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    let balance_minor = fields.minor_amount("amountDue/minorUnitValue")?;
    let number = fields.text("invoiceNumber");

    Ok(CanonicalRecord::Invoice(Invoice {
        org_id: org_id.to_string(),
        source: ProviderKind::Wave,
        external_id: fields.external_id.clone(),
        reference: fields.reference(number.as_deref()),
        number,
        contact_external_id: fields.text("customer/id"),
        status: invoice_status(
            ProviderKind::Wave,
            fields.text("status").as_deref(),
            balance_minor,
        ),
        currency: wave_currency(fields, "total")?,
        total_minor: fields.minor_amount("total/minorUnitValue")?,
        balance_minor,
        issued_on: fields.date("invoiceDate")?,
        due_on: fields.date("dueDate")?,
    }))
}

/// Wave payments are derived from invoice nodes; the payment is the invoice's paid amount.
fn wave_payment(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    Ok(CanonicalRecord::Payment(Payment {
        org_id: org_id.to_string(),
        source: ProviderKind::Wave,
        external_id: fields.external_id.clone(),
        reference: fields.reference(fields.text("invoiceNumber").as_deref()),
        invoice_external_id: Some(fields.external_id.clone()),
        currency: wave_currency(fields, "amountPaid")?,
        amount_minor: fields.minor_amount("amountPaid/minorUnitValue")?,
        paid_on: fields.date("modifiedAt")?,
    }))
}

fn wave_contact(fields: &Fields, org_id: &str) -> Result<CanonicalRecord, MappingError> {
    Ok(CanonicalRecord::Contact(Contact {
        org_id: org_id.to_string(),
        source: ProviderKind::Wave,
        external_id: fields.external_id.clone(),
        display_name: fields.required_text("name")?,
        email: fields.text("email"),
        phone: fields.text("phone").or_else(|| fields.text("mobile")),
        is_customer: true,
        is_supplier: false,
        reference: fields.reference(None),
    }))
}
