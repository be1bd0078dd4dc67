use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::response::FieldError;
use validator::Validate;

use super::validation::{self as rules, parse, required, Checks};
use crate::models::{
    age_on, Applicant, Application, DiscoverSource, EssayTopic, FileUrls, FraudDecision,
    FraudStatus, Gender, Payment, PaymentChoice, PaymentMethod, Registration, RegistrationDetail,
    RegistrationFilter, RegistrationStatus, ScholarshipType, Sort, SortField, SortOrder,
    Submission, SubmissionDetails, TransactionStatus,
};

pub const MIN_APPLICANT_AGE: i32 = 10;
pub const MAX_APPLICANT_AGE: i32 = 100;

/// Identity and application fields shared by both submission forms.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantRequest {
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "fullName is required"),
        length(min = 2, max = 100, message = "fullName must be between 2 and 100 characters")
    )]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "email is required"),
        length(max = 255, message = "email must be at most 255 characters"),
        email(message = "Invalid email format")
    )]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "residence is required"),
        length(min = 2, max = 100, message = "residence must be between 2 and 100 characters")
    )]
    pub residence: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "nationality is required"),
        length(min = 2, max = 100, message = "nationality must be between 2 and 100 characters")
    )]
    pub nationality: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(length(max = 100, message = "secondNationality must be at most 100 characters"))]
    pub second_nationality: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "whatsapp is required"),
        length(max = 25, message = "whatsapp must be at most 25 characters"),
        custom(function = "rules::phone")
    )]
    pub whatsapp: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "institution is required"),
        length(min = 2, max = 255, message = "institution must be between 2 and 255 characters")
    )]
    pub institution: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "dateOfBirth is required"),
        custom(function = "rules::iso_date")
    )]
    pub date_of_birth: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(required(message = "gender is required"), custom(function = "rules::gender"))]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "discoverSource is required"),
        custom(function = "rules::discover_source")
    )]
    pub discover_source: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(length(max = 255, message = "discoverOtherText must be at most 255 characters"))]
    pub discover_other_text: Option<String>,
    /// Optional on the typed endpoints, where it must agree with the route.
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::scholarship_type"))]
    pub scholarship_type: Option<String>,
}

impl ApplicantRequest {
    /// Rules that depend on another field, on `today` or on the route.
    fn check(&self, checks: &mut Checks, today: NaiveDate, expected: ScholarshipType) {
        checks.absorb(self.validate());

        if let Some(dob) = self.date_of_birth.as_deref().and_then(rules::parse_date) {
            if dob >= today {
                checks.fail("dateOfBirth", "Date of birth must be in the past");
            } else if !(MIN_APPLICANT_AGE..=MAX_APPLICANT_AGE).contains(&age_on(dob, today)) {
                checks.fail(
                    "dateOfBirth",
                    format!(
                        "Applicant must be between {MIN_APPLICANT_AGE} and {MAX_APPLICANT_AGE} years old"
                    ),
                );
            }
        }

        if self.discover_source.as_deref() == Some(DiscoverSource::Other.as_str())
            && self.discover_other_text.is_none()
        {
            checks.fail("discoverOtherText", "discoverOtherText is required");
        }

        let declared = self.scholarship_type.as_deref().map(str::parse::<ScholarshipType>);
        if let Some(Ok(declared)) = declared {
            if declared != expected {
                checks.fail(
                    "scholarshipType",
                    format!("scholarshipType must be {expected} for this submission"),
                );
            }
        }
    }

    fn into_applicant(self) -> Result<Applicant, Vec<FieldError>> {
        let gender: Gender = parse("gender", &required("gender", self.gender)?)?;
        let discover_source: DiscoverSource =
            parse("discoverSource", &required("discoverSource", self.discover_source)?)?;
        let date_of_birth: NaiveDate =
            parse("dateOfBirth", &required("dateOfBirth", self.date_of_birth)?)?;
        let whatsapp = required("whatsapp", self.whatsapp)?;
        Ok(Applicant {
            full_name: required("fullName", self.full_name)?,
            email: required("email", self.email)?.to_lowercase(),
            residence: required("residence", self.residence)?,
            nationality: required("nationality", self.nationality)?,
            second_nationality: self.second_nationality,
            whatsapp: rules::compact_phone(&whatsapp),
            institution: required("institution", self.institution)?,
            date_of_birth,
            gender,
            discover_other_text: match discover_source {
                DiscoverSource::Other => self.discover_other_text,
                _ => None,
            },
            discover_source,
        })
    }
}

/// Payment fields shared by both submission forms.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Defaults to `MIDTRANS`.
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::payment_method"))]
    pub payment_method: Option<String>,
    #[serde(alias = "paymentProof")]
    #[validate(range(min = 1, message = "paymentProofFileId must be a positive id"))]
    pub payment_proof_file_id: Option<i64>,
}

impl PaymentRequest {
    fn check(&self, checks: &mut Checks) {
        checks.absorb(self.validate());
        if self.payment_method.as_deref() == Some(PaymentMethod::Paypal.as_str())
            && self.payment_proof_file_id.is_none()
        {
            checks.fail("paymentProofFileId", "paymentProofFileId is required");
        }
    }

    fn into_choice(self) -> Result<PaymentChoice, Vec<FieldError>> {
        let method = match self.payment_method.as_deref() {
            None => PaymentMethod::Midtrans,
            Some(raw) => parse("paymentMethod", raw)?,
        };
        Ok(match method {
            PaymentMethod::Midtrans => PaymentChoice::Midtrans,
            PaymentMethod::Paypal => PaymentChoice::Paypal {
                proof_file_id: required("paymentProofFileId", self.payment_proof_file_id)?,
            },
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FullyFundedRequest {
    #[serde(flatten)]
    pub applicant: ApplicantRequest,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "essayTopic is required"),
        custom(function = "rules::essay_topic")
    )]
    pub essay_topic: Option<String>,
    #[validate(
        required(message = "essayFileId is required"),
        range(min = 1, message = "essayFileId must be a positive id")
    )]
    pub essay_file_id: Option<i64>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(length(max = 2000, message = "essayDescription must be at most 2000 characters"))]
    pub essay_description: Option<String>,
    #[serde(flatten)]
    pub payment: PaymentRequest,
}

impl FullyFundedRequest {
    pub fn into_application(self, today: NaiveDate) -> Result<Application, Vec<FieldError>> {
        let mut checks = Checks::new();
        self.applicant
            .check(&mut checks, today, ScholarshipType::FullyFunded);
        checks.absorb(self.validate());
        self.payment.check(&mut checks);
        checks.finish()?;

        let essay_topic: EssayTopic =
            parse("essayTopic", &required("essayTopic", self.essay_topic)?)?;
        Ok(Application {
            applicant: self.applicant.into_applicant()?,
            details: SubmissionDetails::FullyFunded {
                essay_topic,
                essay_file_id: required("essayFileId", self.essay_file_id)?,
                essay_description: self.essay_description,
            },
            payment: self.payment.into_choice()?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelfFundedRequest {
    #[serde(flatten)]
    pub applicant: ApplicantRequest,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "passportNumber is required"),
        length(min = 6, max = 20, message = "passportNumber must be between 6 and 20 characters"),
        custom(function = "rules::alphanumeric")
    )]
    pub passport_number: Option<String>,
    #[validate(required(message = "needVisa is required"))]
    pub need_visa: Option<bool>,
    #[validate(
        required(message = "headshotFileId is required"),
        range(min = 1, message = "headshotFileId must be a positive id")
    )]
    pub headshot_file_id: Option<i64>,
    #[validate(
        required(message = "readPolicies is required"),
        custom(function = "rules::accepted")
    )]
    pub read_policies: Option<bool>,
    #[serde(flatten)]
    pub payment: PaymentRequest,
}

impl SelfFundedRequest {
    pub fn into_application(self, today: NaiveDate) -> Result<Application, Vec<FieldError>> {
        let mut checks = Checks::new();
        self.applicant
            .check(&mut checks, today, ScholarshipType::SelfFunded);
        checks.absorb(self.validate());
        self.payment.check(&mut checks);
        checks.finish()?;

        Ok(Application {
            applicant: self.applicant.into_applicant()?,
            details: SubmissionDetails::SelfFunded {
                passport_number: required("passportNumber", self.passport_number)?.to_uppercase(),
                need_visa: required("needVisa", self.need_visa)?,
                headshot_file_id: required("headshotFileId", self.headshot_file_id)?,
            },
            payment: self.payment.into_choice()?,
        })
    }
}

/// Scholarship-agnostic form: `scholarshipType` picks the shape of `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionRequest {
    /// `MIDTRANS` or `PAYPAL`.
    #[serde(rename = "type")]
    pub method: Option<String>,
    pub data: serde_json::Value,
}

impl CreateTransactionRequest {
    pub fn into_application(self, today: NaiveDate) -> Result<Application, Vec<FieldError>> {
        let scholarship_type = self
            .data
            .get("scholarshipType")
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let scholarship_type = required("scholarshipType", scholarship_type)?;
        if let Err(error) = rules::scholarship_type(scholarship_type) {
            let message = error.message.unwrap_or_default();
            return Err(vec![FieldError::new("scholarshipType", message)]);
        }
        let scholarship_type: ScholarshipType = parse("scholarshipType", scholarship_type)?;

        let method = self
            .method
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let malformed = |e: serde_json::Error| vec![FieldError::new("data", e.to_string())];
        match scholarship_type {
            ScholarshipType::FullyFunded => {
                let mut form: FullyFundedRequest =
                    serde_json::from_value(self.data).map_err(malformed)?;
                if method.is_some() {
                    form.payment.payment_method = method;
                }
                form.into_application(today)
            }
            ScholarshipType::SelfFunded => {
                let mut form: SelfFundedRequest =
                    serde_json::from_value(self.data).map_err(malformed)?;
                if method.is_some() {
                    form.payment.payment_method = method;
                }
                form.into_application(today)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(
        required(message = "status is required"),
        custom(function = "rules::registration_status")
    )]
    pub status: Option<String>,
}

impl UpdateStatusRequest {
    pub fn parse(&self) -> Result<RegistrationStatus, Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.absorb(self.validate());
        checks.finish()?;
        parse("status", required("status", self.status.as_deref())?)
    }
}

/// Filters shared by listing, date-range and export queries.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationQuery {
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::registration_status"))]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::scholarship_type"))]
    pub scholarship_type: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::iso_date"))]
    pub start_date: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(custom(function = "rules::iso_date"))]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "rules::trimmed")]
    #[validate(length(max = 100, message = "search must be at most 100 characters"))]
    pub search: Option<String>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100, message = "perPage must be between 1 and 100"))]
    pub per_page: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl RegistrationQuery {
    /// Dates are inclusive calendar days in UTC.
    pub fn filter(&self) -> Result<RegistrationFilter, Vec<FieldError>> {
        let mut checks = Checks::new();
        checks.absorb(self.validate());
        let start = self.start_date.as_deref().and_then(rules::parse_date);
        let end = self.end_date.as_deref().and_then(rules::parse_date);
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                checks.fail("endDate", "endDate must not be before startDate");
            }
        }
        checks.finish()?;

        Ok(RegistrationFilter {
            status: self
                .status
                .as_deref()
                .map(|s| parse("status", s))
                .transpose()?,
            scholarship_type: self
                .scholarship_type
                .as_deref()
                .map(|s| parse("scholarshipType", s))
                .transpose()?,
            created_from: start.map(start_of_day),
            created_to: end.and_then(|d| d.succ_opt()).map(start_of_day),
            search: self.search.clone(),
        })
    }

    /// The date-range endpoint needs both bounds.
    pub fn require_range(&self) -> Result<(), Vec<FieldError>> {
        let mut checks = Checks::new();
        if self.start_date.is_none() {
            checks.fail("startDate", "startDate is required");
        }
        if self.end_date.is_none() {
            checks.fail("endDate", "endDate is required");
        }
        checks.finish()
    }

    pub fn sort(&self) -> Result<Sort, Vec<FieldError>> {
        let field = match self.sort_by.as_deref() {
            None | Some("createdAt") => SortField::CreatedAt,
            Some("updatedAt") => SortField::UpdatedAt,
            Some("fullName") => SortField::FullName,
            Some("email") => SortField::Email,
            Some(_) => {
                return Err(vec![FieldError::new(
                    "sortBy",
                    "sortBy must be one of: createdAt, updatedAt, fullName, email",
                )])
            }
        };
        let order = match self.sort_order.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(_) => {
                return Err(vec![FieldError::new(
                    "sortOrder",
                    "sortOrder must be asc or desc",
                )])
            }
        };
        Ok(Sort { field, order })
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: i64,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub fraud_status: Option<FraudStatus>,
    pub fraud_decision: Option<FraudDecision>,
    pub amount_idr: i64,
    pub amount_usd: Decimal,
    pub fx_rate: Decimal,
    pub quoted_at: DateTime<Utc>,
    pub snap_token: Option<String>,
    pub redirect_url: Option<String>,
    pub payment_proof_file_id: Option<i64>,
    pub payment_proof_url: Option<String>,
    pub payment_type: Option<String>,
    pub gateway_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentView {
    pub fn new(payment: &Payment, urls: &FileUrls) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id.clone(),
            method: payment.method,
            status: payment.status,
            fraud_status: payment.fraud_status,
            fraud_decision: payment.fraud_status.map(FraudStatus::decision),
            amount_idr: payment.amount_idr,
            amount_usd: payment.amount_usd,
            fx_rate: payment.fx_rate,
            quoted_at: payment.quoted_at,
            snap_token: payment.snap_token.clone(),
            redirect_url: payment.redirect_url.clone(),
            payment_proof_file_id: payment.payment_proof_file_id,
            payment_proof_url: payment.payment_proof_file_id.map(|id| urls.url(id)),
            payment_type: payment.payment_type.clone(),
            gateway_transaction_id: payment.gateway_transaction_id.clone(),
            paid_at: payment.paid_at,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionView {
    #[serde(rename_all = "camelCase")]
    FullyFunded {
        essay_topic: EssayTopic,
        essay_file_id: i64,
        essay_url: String,
        essay_description: Option<String>,
        created_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SelfFunded {
        passport_number: String,
        need_visa: bool,
        headshot_file_id: i64,
        headshot_url: String,
        read_policies: bool,
        created_at: DateTime<Utc>,
    },
}

impl SubmissionView {
    pub fn new(submission: &Submission, urls: &FileUrls) -> Self {
        match submission {
            Submission::FullyFunded(s) => SubmissionView::FullyFunded {
                essay_topic: s.essay_topic,
                essay_file_id: s.essay_file_id,
                essay_url: urls.url(s.essay_file_id),
                essay_description: s.essay_description.clone(),
                created_at: s.created_at,
            },
            Submission::SelfFunded(s) => SubmissionView::SelfFunded {
                passport_number: s.passport_number.clone(),
                need_visa: s.need_visa,
                headshot_file_id: s.headshot_file_id,
                headshot_url: urls.url(s.headshot_file_id),
                read_policies: s.read_policies,
                created_at: s.created_at,
            },
        }
    }
}

/// Body returned by a successful submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub registration_id: i64,
    pub submission_id: String,
    pub email: String,
    pub full_name: String,
    pub scholarship_type: ScholarshipType,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub submission: SubmissionView,
    pub payment: Option<PaymentView>,
}

impl SubmissionResult {
    pub fn new(detail: &RegistrationDetail, urls: &FileUrls) -> Self {
        let r = &detail.registration;
        Self {
            registration_id: r.id,
            submission_id: r.submission_id.clone(),
            email: r.email.clone(),
            full_name: r.full_name.clone(),
            scholarship_type: r.scholarship_type,
            status: r.payment_status,
            created_at: r.created_at,
            submission: SubmissionView::new(&detail.submission, urls),
            payment: detail.active_payment().map(|p| PaymentView::new(p, urls)),
        }
    }
}

/// Full registration with submission and payment history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    #[serde(flatten)]
    pub registration: Registration,
    pub submission: SubmissionView,
    pub active_payment: Option<PaymentView>,
    pub payments: Vec<PaymentView>,
}

impl RegistrationView {
    pub fn new(detail: &RegistrationDetail, urls: &FileUrls) -> Self {
        Self {
            registration: detail.registration.clone(),
            submission: SubmissionView::new(&detail.submission, urls),
            active_payment: detail.active_payment().map(|p| PaymentView::new(p, urls)),
            payments: detail
                .payments
                .iter()
                .map(|p| PaymentView::new(p, urls))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailCheckResponse {
    pub email: String,
    pub exists: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub id: i64,
    pub deleted: bool,
    pub deleted_files: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn step1() -> serde_json::Value {
        json!({
            "fullName": "Ada L",
            "email": "A@B.co",
            "residence": "Jakarta",
            "nationality": "ID",
            "whatsapp": "+62 812 3456 7890",
            "institution": "Universitas Indonesia",
            "dateOfBirth": "2000-01-01",
            "gender": "FEMALE",
            "discoverSource": "RISE_INSTAGRAM"
        })
    }

    fn with(mut base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
        let target = base.as_object_mut().unwrap();
        for (k, v) in extra.as_object().unwrap() {
            target.insert(k.clone(), v.clone());
        }
        base
    }

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn fully_funded_form_parses() {
        let body = with(
            step1(),
            json!({ "essayTopic": "Green Innovation", "essayFileId": 42 }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body).unwrap();
        let application = form.into_application(today()).unwrap();

        assert_eq!(application.applicant.email, "a@b.co");
        assert_eq!(application.applicant.whatsapp, "+6281234567890");
        assert_eq!(application.payment, PaymentChoice::Midtrans);
        assert_eq!(
            application.details,
            SubmissionDetails::FullyFunded {
                essay_topic: EssayTopic::GreenInnovation,
                essay_file_id: 42,
                essay_description: None,
            }
        );
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let form: FullyFundedRequest = serde_json::from_value(json!({})).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        let fields = fields(&errors);
        for expected in ["fullName", "email", "dateOfBirth", "gender", "essayTopic", "essayFileId"] {
            assert!(fields.contains(&expected), "{expected} missing from {fields:?}");
        }
    }

    #[test]
    fn padded_values_are_trimmed_and_blank_ones_missing() {
        let body = with(
            step1(),
            json!({
                "fullName": "  Ada L  ",
                "residence": "   ",
                "essayTopic": " Green Action ",
                "essayFileId": 3
            }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body.clone()).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["residence"]);
        assert_eq!(errors[0].message, "residence is required");

        let form: FullyFundedRequest =
            serde_json::from_value(with(body, json!({ "residence": "Bandung" }))).unwrap();
        let application = form.into_application(today()).unwrap();
        assert_eq!(application.applicant.full_name, "Ada L");
    }

    #[test]
    fn other_discover_source_needs_text() {
        let body = with(
            step1(),
            json!({ "discoverSource": "OTHER", "essayTopic": "Green Action", "essayFileId": 1 }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["discoverOtherText"]);

        let body = with(
            step1(),
            json!({ "discoverOtherText": "ignored", "essayTopic": "Green Action", "essayFileId": 1 }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body).unwrap();
        let application = form.into_application(today()).unwrap();
        assert_eq!(application.applicant.discover_other_text, None);
    }

    #[test]
    fn self_funded_rules() {
        let body = with(
            step1(),
            json!({
                "passportNumber": "A12",
                "needVisa": true,
                "headshotFileId": 7,
                "readPolicies": false
            }),
        );
        let form: SelfFundedRequest = serde_json::from_value(body).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["passportNumber", "readPolicies"]);
    }

    #[test]
    fn paypal_requires_a_proof() {
        let body = with(
            step1(),
            json!({
                "passportNumber": "A1234567",
                "needVisa": true,
                "headshotFileId": 7,
                "readPolicies": true,
                "paymentMethod": "PAYPAL"
            }),
        );
        let form: SelfFundedRequest = serde_json::from_value(body.clone()).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["paymentProofFileId"]);

        let form: SelfFundedRequest =
            serde_json::from_value(with(body, json!({ "paymentProofFileId": 9 }))).unwrap();
        let application = form.into_application(today()).unwrap();
        assert_eq!(application.payment, PaymentChoice::Paypal { proof_file_id: 9 });
    }

    #[test]
    fn transaction_form_dispatches_on_scholarship_type() {
        let request = CreateTransactionRequest {
            method: Some("PAYPAL".into()),
            data: with(
                step1(),
                json!({
                    "scholarshipType": "SELF_FUNDED",
                    "passportNumber": "a1234567",
                    "needVisa": false,
                    "headshotFileId": 7,
                    "readPolicies": true,
                    "paymentProof": 9
                }),
            ),
        };
        let application = request.into_application(today()).unwrap();
        assert_eq!(application.payment.method(), PaymentMethod::Paypal);
        assert!(matches!(
            application.details,
            SubmissionDetails::SelfFunded { ref passport_number, .. } if passport_number == "A1234567"
        ));
    }

    #[test]
    fn unknown_scholarship_type_is_rejected() {
        let request = CreateTransactionRequest {
            method: None,
            data: with(step1(), json!({ "scholarshipType": "OTHER" })),
        };
        let errors = request.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["scholarshipType"]);

        let body = with(
            step1(),
            json!({ "scholarshipType": "OTHER", "essayTopic": "Green Action", "essayFileId": 1 }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body).unwrap();
        let errors = form.into_application(today()).unwrap_err();
        assert_eq!(fields(&errors), vec!["scholarshipType"]);
    }

    #[test]
    fn date_of_birth_must_be_plausible() {
        let body = with(
            step1(),
            json!({ "dateOfBirth": "2030-01-01", "essayTopic": "Green Action", "essayFileId": 1 }),
        );
        let form: FullyFundedRequest = serde_json::from_value(body).unwrap();
        assert_eq!(fields(&form.into_application(today()).unwrap_err()), vec!["dateOfBirth"]);
    }

    #[test]
    fn query_dates_are_inclusive_days() {
        let query = RegistrationQuery {
            start_date: Some("2025-01-01".into()),
            end_date: Some("2025-01-31".into()),
            status: Some("PAID".into()),
            ..Default::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.status, Some(RegistrationStatus::Paid));
        assert_eq!(
            filter.created_to.unwrap().date_naive(),
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()
        );

        let reversed = RegistrationQuery {
            start_date: Some("2025-02-01".into()),
            end_date: Some("2025-01-01".into()),
            ..Default::default()
        };
        assert_eq!(fields(&reversed.filter().unwrap_err()), vec!["endDate"]);
    }

    #[test]
    fn query_limits_are_validated() {
        let query = RegistrationQuery {
            per_page: Some(500),
            ..Default::default()
        };
        assert!(query.validate().is_err());
        assert!(RegistrationQuery::default().validate().is_ok());
    }
}
