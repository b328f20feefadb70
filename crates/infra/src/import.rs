//! Batch-import adapter for CSV and XLSX uploads.
//!
//! Turns an uploaded sheet into typed import rows. Both formats are read into
//! the same header-plus-records shape, so validation is shared. Every row is
//! parsed before anything is returned; failures are reported together with
//! 1-based data row numbers so a whole sheet can be fixed in one pass.

use std::io::Cursor;
use std::str::FromStr;

use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use stockroom_core::{DomainError, DomainResult, FieldError, ProductId, StoreId};

use crate::services::{LotImportRow, ProductImportRow};

pub const PRODUCT_COLUMNS: &[&str] = &["name", "category_code", "selling_price", "purchase_price"];
pub const INVENTORY_COLUMNS: &[&str] = &["quantity"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Xlsx,
}

impl UploadFormat {
    /// Pick the format from the file name, falling back to the content type.
    pub fn detect(filename: Option<&str>, content_type: Option<&str>) -> DomainResult<Self> {
        let filename = filename.map(str::to_ascii_lowercase).unwrap_or_default();
        let content_type = content_type.map(str::to_ascii_lowercase).unwrap_or_default();

        if filename.ends_with(".xlsx") || content_type.contains("spreadsheetml") {
            return Ok(Self::Xlsx);
        }
        if filename.ends_with(".xls") || content_type.contains("ms-excel") {
            return Err(DomainError::validation(
                "legacy .xls workbooks are not supported; save the sheet as .xlsx or CSV",
            ));
        }
        if filename.ends_with(".csv") || content_type.starts_with("text/csv") {
            Ok(Self::Csv)
        } else {
            Err(DomainError::validation("upload must be a CSV or XLSX file"))
        }
    }
}

/// Header row plus data records, whatever the upload format was.
struct Sheet {
    headers: StringRecord,
    records: Vec<Result<StringRecord, String>>,
}

impl Sheet {
    fn read(format: UploadFormat, bytes: &[u8]) -> DomainResult<Self> {
        match format {
            UploadFormat::Csv => Self::from_csv(bytes),
            UploadFormat::Xlsx => Self::from_xlsx(bytes),
        }
    }

    fn from_csv(bytes: &[u8]) -> DomainResult<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(false)
            .from_reader(bytes);
        let headers = reader
            .headers()
            .map_err(|e| DomainError::validation(format!("malformed CSV header: {e}")))?
            .clone();
        let records = reader.records().map(|r| r.map_err(|e| e.to_string())).collect();
        Ok(Self { headers, records })
    }

    /// First worksheet only. Cells are rendered as text the CSV path would see.
    fn from_xlsx(bytes: &[u8]) -> DomainResult<Self> {
        let unreadable = |e: calamine::XlsxError| DomainError::validation(format!("unreadable XLSX file: {e}"));
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(unreadable)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| DomainError::validation("XLSX file has no worksheets"))?
            .map_err(unreadable)?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<StringRecord>());
        let headers = rows.next().unwrap_or_default();
        let width = headers.len();
        let records = rows
            .map(|mut record| {
                // Trailing blank cells past the header are formatting leftovers.
                while record.len() > width && record.get(record.len() - 1) == Some("") {
                    record.truncate(record.len() - 1);
                }
                if record.len() == width {
                    Ok(record)
                } else {
                    Err(format!("found {} cells, expected {width}", record.len()))
                }
            })
            .collect();
        Ok(Self { headers, records })
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::DateTime(at) if at.is_datetime() => match at.as_datetime() {
            Some(at) if at.time() == NaiveTime::MIN => at.format("%Y-%m-%d").to_string(),
            Some(at) => at.and_utc().to_rfc3339(),
            None => at.to_string(),
        },
        other => other.to_string().trim().to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ProductRecord {
    name: Option<String>,
    category_code: Option<String>,
    selling_price: Option<String>,
    purchase_price: Option<String>,
    sku: Option<String>,
    store_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InventoryRecordRow {
    quantity: Option<String>,
    product_id: Option<String>,
    sku: Option<String>,
    location: Option<String>,
    expiry_date: Option<String>,
}

pub fn parse_product_rows(format: UploadFormat, bytes: &[u8]) -> DomainResult<Vec<ProductImportRow>> {
    parse_rows(Sheet::read(format, bytes)?, PRODUCT_COLUMNS, |record: ProductRecord, errors| {
        let mut row = RowParser { errors };
        ProductImportRow {
            name: row.required("name", record.name).unwrap_or_default(),
            category_code: row.required("category_code", record.category_code).unwrap_or_default(),
            selling_price: row.decimal("selling_price", record.selling_price),
            purchase_price: row.decimal("purchase_price", record.purchase_price),
            sku: record.sku,
            store_id: row.id::<StoreId>("store_id", record.store_id),
        }
    })
}

pub fn parse_inventory_rows(format: UploadFormat, bytes: &[u8]) -> DomainResult<Vec<LotImportRow>> {
    parse_rows(Sheet::read(format, bytes)?, INVENTORY_COLUMNS, |record: InventoryRecordRow, errors| {
        let mut row = RowParser { errors };
        let product_id = row.id::<ProductId>("product_id", record.product_id);
        if product_id.is_none() && record.sku.is_none() {
            row.push("product_id", "either product_id or sku is required");
        }
        LotImportRow {
            quantity: row.decimal("quantity", record.quantity),
            product_id,
            sku: record.sku,
            location: record.location,
            expiry_date: row.date("expiry_date", record.expiry_date),
        }
    })
}

/// Check the sheet's header and map every data row.
///
/// `map` records field problems into the passed vector; a row with any
/// problem is dropped and the whole call fails once every row has been seen.
fn parse_rows<R, T>(
    sheet: Sheet,
    required: &[&str],
    mut map: impl FnMut(R, &mut Vec<FieldError>) -> T,
) -> DomainResult<Vec<T>>
where
    R: for<'de> Deserialize<'de>,
{
    let headers: StringRecord = sheet
        .headers
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    let missing: Vec<FieldError> = required
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| FieldError::new("header", format!("missing column '{column}'")))
        .collect();
    DomainError::from_field_errors(missing)?;

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (idx, result) in sheet.records.into_iter().enumerate() {
        let row_no = idx + 1;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                errors.push(FieldError::new(format!("row {row_no}"), e));
                continue;
            }
        };
        if record.iter().all(str::is_empty) {
            continue;
        }
        let decoded: R = match record.deserialize(Some(&headers)) {
            Ok(decoded) => decoded,
            Err(e) => {
                errors.push(FieldError::new(format!("row {row_no}"), e.to_string()));
                continue;
            }
        };
        let mut row_errors = Vec::new();
        let parsed = map(decoded, &mut row_errors);
        if row_errors.is_empty() {
            rows.push(parsed);
        } else {
            errors.extend(row_errors.into_iter().map(|e| prefixed(row_no, e)));
        }
    }
    DomainError::from_field_errors(errors)?;
    Ok(rows)
}

struct RowParser<'a> {
    errors: &'a mut Vec<FieldError>,
}

impl RowParser<'_> {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn required(&mut self, field: &str, value: Option<String>) -> Option<String> {
        if value.is_none() {
            self.push(field, "is required");
        }
        value
    }

    fn decimal(&mut self, field: &str, value: Option<String>) -> Decimal {
        let Some(raw) = self.required(field, value) else {
            return Decimal::ZERO;
        };
        match Decimal::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                self.push(field, format!("'{raw}' is not a number"));
                Decimal::ZERO
            }
        }
    }

    fn id<T: FromStr<Err = DomainError>>(&mut self, field: &str, value: Option<String>) -> Option<T> {
        let raw = value?;
        match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                self.push(field, format!("'{raw}' is not a valid id"));
                None
            }
        }
    }

    fn date(&mut self, field: &str, value: Option<String>) -> Option<DateTime<Utc>> {
        let raw = value?;
        let parsed = parse_date(&raw);
        if parsed.is_none() {
            self.push(field, format!("'{raw}' is not a YYYY-MM-DD or RFC 3339 date"));
        }
        parsed
    }
}

/// `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|at| at.with_timezone(&Utc))
}

fn prefixed(row: usize, error: FieldError) -> FieldError {
    FieldError::new(format!("row {row}.{}", error.field), error.message)
}

/// Attach a data row number to a domain failure raised while importing it.
pub(crate) fn row_errors(row: usize, err: DomainError) -> Vec<FieldError> {
    match err {
        DomainError::ValidationErrors(errors) => errors.into_iter().map(|e| prefixed(row, e)).collect(),
        other => vec![FieldError::new(format!("row {row}"), other.to_string())],
    }
}
