use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{DiscoverSource, EssayTopic, Gender, PaymentMethod, ScholarshipType};
use super::payment::Payment;
use super::status::RegistrationStatus;

/// One applicant submission.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: i64,
    pub submission_id: String,
    pub full_name: String,
    pub email: String,
    pub residence: String,
    pub nationality: String,
    pub second_nationality: Option<String>,
    pub whatsapp: String,
    pub institution: String,
    pub date_of_birth: NaiveDate,
    pub age: i32,
    pub gender: Gender,
    pub discover_source: DiscoverSource,
    pub discover_other_text: Option<String>,
    pub scholarship_type: ScholarshipType,
    pub payment_status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullyFundedSubmission {
    pub id: i64,
    pub registration_id: i64,
    pub essay_topic: EssayTopic,
    pub essay_file_id: i64,
    pub essay_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfFundedSubmission {
    pub id: i64,
    pub registration_id: i64,
    pub passport_number: String,
    pub need_visa: bool,
    pub headshot_file_id: i64,
    pub read_policies: bool,
    pub created_at: DateTime<Utc>,
}

/// The scholarship-specific half of a registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Submission {
    FullyFunded(FullyFundedSubmission),
    SelfFunded(SelfFundedSubmission),
}

impl Submission {
    pub fn scholarship_type(&self) -> ScholarshipType {
        match self {
            Submission::FullyFunded(_) => ScholarshipType::FullyFunded,
            Submission::SelfFunded(_) => ScholarshipType::SelfFunded,
        }
    }

    /// The uploaded file this submission owns.
    pub fn file_id(&self) -> i64 {
        match self {
            Submission::FullyFunded(s) => s.essay_file_id,
            Submission::SelfFunded(s) => s.headshot_file_id,
        }
    }
}

/// A registration with its submission and every payment attempt.
#[derive(Debug, Clone)]
pub struct RegistrationDetail {
    pub registration: Registration,
    pub submission: Submission,
    /// Oldest first.
    pub payments: Vec<Payment>,
}

impl RegistrationDetail {
    /// The most recent payment attempt.
    pub fn active_payment(&self) -> Option<&Payment> {
        self.payments.iter().max_by_key(|p| (p.created_at, p.id))
    }

    /// Files this registration owns: its submission file and payment proofs.
    pub fn owned_file_ids(&self) -> Vec<i64> {
        let mut ids = vec![self.submission.file_id()];
        ids.extend(self.payments.iter().filter_map(|p| p.payment_proof_file_id));
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Validated identity and application fields shared by both scholarships.
#[derive(Debug, Clone, PartialEq)]
pub struct Applicant {
    pub full_name: String,
    pub email: String,
    pub residence: String,
    pub nationality: String,
    pub second_nationality: Option<String>,
    pub whatsapp: String,
    pub institution: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub discover_source: DiscoverSource,
    pub discover_other_text: Option<String>,
}

/// Scholarship-specific fields of a submission request.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionDetails {
    FullyFunded {
        essay_topic: EssayTopic,
        essay_file_id: i64,
        essay_description: Option<String>,
    },
    SelfFunded {
        passport_number: String,
        need_visa: bool,
        headshot_file_id: i64,
    },
}

impl SubmissionDetails {
    pub fn scholarship_type(&self) -> ScholarshipType {
        match self {
            SubmissionDetails::FullyFunded { .. } => ScholarshipType::FullyFunded,
            SubmissionDetails::SelfFunded { .. } => ScholarshipType::SelfFunded,
        }
    }
}

/// How the registration fee will be paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentChoice {
    Midtrans,
    /// Manual transfer with an uploaded proof, reviewed by an admin.
    Paypal { proof_file_id: i64 },
}

impl PaymentChoice {
    pub fn method(self) -> PaymentMethod {
        match self {
            PaymentChoice::Midtrans => PaymentMethod::Midtrans,
            PaymentChoice::Paypal { .. } => PaymentMethod::Paypal,
        }
    }

    pub fn proof_file_id(self) -> Option<i64> {
        match self {
            PaymentChoice::Midtrans => None,
            PaymentChoice::Paypal { proof_file_id } => Some(proof_file_id),
        }
    }
}

/// A fully validated submission request.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub applicant: Applicant,
    pub details: SubmissionDetails,
    pub payment: PaymentChoice,
}

/// Age in whole years on `today`.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        age -= 1;
    }
    age
}

/// Sortable registration columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    FullName,
    Email,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::FullName => "full_name",
            SortField::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
    pub scholarship_type: Option<ScholarshipType>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_to: Option<DateTime<Utc>>,
    /// Case-insensitive match against name or email.
    pub search: Option<String>,
}

impl RegistrationFilter {
    pub fn matches(&self, registration: &Registration) -> bool {
        if self.status.is_some_and(|s| s != registration.payment_status) {
            return false;
        }
        if self
            .scholarship_type
            .is_some_and(|t| t != registration.scholarship_type)
        {
            return false;
        }
        if self.created_from.is_some_and(|from| registration.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| registration.created_at >= to) {
            return false;
        }
        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                registration.full_name.to_lowercase().contains(&needle)
                    || registration.email.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub per_page: u32,
}

impl Paging {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, paging: Paging) -> Self {
        let per_page = i64::from(paging.per_page);
        Self {
            items,
            total,
            page: paging.page,
            per_page: paging.per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_completed_years() {
        assert_eq!(age_on(date(2000, 1, 1), date(2024, 1, 1)), 24);
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 14)), 23);
        assert_eq!(age_on(date(2000, 6, 15), date(2024, 6, 15)), 24);
    }

    #[test]
    fn paging_is_clamped() {
        let paging = Paging::new(Some(0), Some(1000));
        assert_eq!(paging.page, 1);
        assert_eq!(paging.per_page, Paging::MAX_PER_PAGE);
        assert_eq!(Paging::new(Some(3), Some(10)).offset(), 20);
    }

    #[test]
    fn page_counts_partial_last_page() {
        let page = Page::new(vec![1, 2], 21, Paging::new(Some(1), Some(10)));
        assert_eq!(page.total_pages, 3);
        let empty: Page<i32> = Page::new(vec![], 0, Paging::default());
        assert_eq!(empty.total_pages, 0);
    }
}
