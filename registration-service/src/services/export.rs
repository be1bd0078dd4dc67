//! XLSX export of registrations.

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::models::{FileUrls, RegistrationDetail, Submission};

const MIN_COLUMN_WIDTH: usize = 2;
const MAX_COLUMN_WIDTH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn opt(value: Option<impl Into<String>>) -> Self {
        value.map_or(Cell::Empty, |v| Cell::Text(v.into()))
    }

    fn time(value: DateTime<Utc>) -> Self {
        Cell::Text(value.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn yes_no(value: bool) -> Self {
        Cell::text(if value { "Y" } else { "N" })
    }

    fn width(&self) -> usize {
        match self {
            Cell::Text(s) => s.chars().count(),
            Cell::Number(n) => n.to_string().len(),
            Cell::Empty => 0,
        }
    }
}

struct Sheet {
    name: &'static str,
    headers: &'static [&'static str],
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    /// Widest cell per column, clamped to `MIN_COLUMN_WIDTH..=MAX_COLUMN_WIDTH`.
    fn column_widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(col, header)| {
                let widest = self
                    .rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(Cell::width)
                    .fold(header.chars().count(), usize::max);
                widest.clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
            })
            .collect()
    }
}

fn registrations_sheet(details: &[RegistrationDetail]) -> Sheet {
    let rows = details
        .iter()
        .map(|d| {
            let r = &d.registration;
            vec![
                Cell::Number(r.id as f64),
                Cell::text(&r.full_name),
                Cell::text(&r.email),
                Cell::text(&r.residence),
                Cell::text(&r.nationality),
                Cell::opt(r.second_nationality.as_deref()),
                Cell::text(&r.whatsapp),
                Cell::text(&r.institution),
                Cell::text(r.date_of_birth.format("%Y-%m-%d").to_string()),
                Cell::text(r.gender.as_str()),
                Cell::text(r.discover_source.as_str()),
                Cell::opt(r.discover_other_text.as_deref()),
                Cell::text(r.scholarship_type.as_str()),
                Cell::time(r.created_at),
                Cell::time(r.updated_at),
            ]
        })
        .collect();
    Sheet {
        name: "Registrations",
        headers: &[
            "id",
            "full_name",
            "email",
            "residence",
            "nationality",
            "second_nationality",
            "whatsapp",
            "institution",
            "date_of_birth",
            "gender",
            "discover_source",
            "discover_other_text",
            "scholarship_type",
            "created_at",
            "updated_at",
        ],
        rows,
    }
}

fn self_funded_sheet(details: &[RegistrationDetail], urls: &FileUrls) -> Sheet {
    let rows = details
        .iter()
        .filter_map(|d| match &d.submission {
            Submission::SelfFunded(s) => Some((d, s)),
            Submission::FullyFunded(_) => None,
        })
        .map(|(d, s)| {
            vec![
                Cell::Number(s.registration_id as f64),
                Cell::text(&d.registration.full_name),
                Cell::text(&d.registration.email),
                Cell::text(&s.passport_number),
                Cell::yes_no(s.need_visa),
                Cell::Number(s.headshot_file_id as f64),
                Cell::text(urls.url(s.headshot_file_id)),
                Cell::yes_no(s.read_policies),
                Cell::time(s.created_at),
            ]
        })
        .collect();
    Sheet {
        name: "Self Funded",
        headers: &[
            "registration_id",
            "full_name",
            "email",
            "passport_number",
            "need_visa",
            "headshot_file_id",
            "headshot_url",
            "read_policies",
            "created_at",
        ],
        rows,
    }
}

fn fully_funded_sheet(details: &[RegistrationDetail], urls: &FileUrls) -> Sheet {
    let rows = details
        .iter()
        .filter_map(|d| match &d.submission {
            Submission::FullyFunded(s) => Some((d, s)),
            Submission::SelfFunded(_) => None,
        })
        .map(|(d, s)| {
            vec![
                Cell::Number(s.registration_id as f64),
                Cell::text(&d.registration.full_name),
                Cell::text(&d.registration.email),
                Cell::text(s.essay_topic.as_str()),
                Cell::Number(s.essay_file_id as f64),
                Cell::text(urls.url(s.essay_file_id)),
                Cell::opt(s.essay_description.as_deref()),
                Cell::time(s.created_at),
            ]
        })
        .collect();
    Sheet {
        name: "Fully Funded",
        headers: &[
            "registration_id",
            "full_name",
            "email",
            "essay_topic",
            "essay_file_id",
            "essay_url",
            "essay_description",
            "created_at",
        ],
        rows,
    }
}

fn payments_sheet(details: &[RegistrationDetail], urls: &FileUrls) -> Sheet {
    let rows = details
        .iter()
        .flat_map(|d| d.payments.iter().map(move |p| (d, p)))
        .map(|(d, p)| {
            vec![
                Cell::Number(p.registration_id as f64),
                Cell::text(&d.registration.full_name),
                Cell::text(&d.registration.email),
                Cell::text(&p.order_id),
                Cell::Number(p.amount_idr as f64),
                Cell::text(p.status.as_str()),
                Cell::text(p.method.as_str()),
                p.paid_at.map_or(Cell::Empty, Cell::time),
                Cell::time(p.created_at),
                Cell::opt(p.gateway_transaction_id.as_deref()),
                p.payment_proof_file_id
                    .map_or(Cell::Empty, |id| Cell::Number(id as f64)),
                Cell::opt(p.payment_proof_file_id.map(|id| urls.url(id))),
            ]
        })
        .collect();
    Sheet {
        name: "Payments",
        headers: &[
            "registration_id",
            "full_name",
            "email",
            "payment_id",
            "amount",
            "status",
            "type",
            "paid_at",
            "created_at",
            "gateway_id",
            "payment_proof_id",
            "payment_proof_url",
        ],
        rows,
    }
}

/// Render the four export sheets into an in-memory workbook.
pub fn build_workbook(details: &[RegistrationDetail], urls: &FileUrls) -> Result<Vec<u8>, XlsxError> {
    let sheets = [
        registrations_sheet(details),
        self_funded_sheet(details, urls),
        fully_funded_sheet(details, urls),
        payments_sheet(details, urls),
    ];

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    for sheet in &sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name)?;

        for (col, header) in sheet.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
        }
        for (i, row) in sheet.rows.iter().enumerate() {
            let row_idx = (i + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                match cell {
                    Cell::Text(s) => {
                        worksheet.write_string(row_idx, col as u16, s)?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(row_idx, col as u16, *n)?;
                    }
                    Cell::Empty => {}
                }
            }
        }
        for (col, width) in sheet.column_widths().into_iter().enumerate() {
            worksheet.set_column_width(col as u16, width as f64)?;
        }
    }

    workbook.save_to_buffer()
}
