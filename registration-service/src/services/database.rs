//! PostgreSQL implementation of [`RegistrationStore`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, instrument, warn};

use crate::error::StoreError;
use crate::models::{
    FullyFundedSubmission, Page, Paging, Payment, PaymentRecord, Reconciled, Registration,
    RegistrationDetail, RegistrationFilter, SelfFundedSubmission, Sort, SortOrder, Submission,
    SubmissionDetails,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{
    NewRegistrationRecord, PaymentStats, ReconcileFn, RegistrationStats, RegistrationStore,
};

macro_rules! registration_columns {
    () => {
        "id, submission_id, full_name, email, residence, nationality, second_nationality, \
         whatsapp, institution, date_of_birth, age, gender, discover_source, \
         discover_other_text, scholarship_type, payment_status, created_at, updated_at"
    };
}

macro_rules! payment_columns {
    () => {
        "id, registration_id, order_id, amount_idr, amount_usd, fx_rate, quoted_at, method, \
         status, fraud_status, payment_proof_file_id, gateway_transaction_id, payment_type, \
         snap_token, redirect_url, last_status_code, paid_at, created_at, updated_at"
    };
}

macro_rules! payment_columns_p {
    () => {
        "p.id, p.registration_id, p.order_id, p.amount_idr, p.amount_usd, p.fx_rate, \
         p.quoted_at, p.method, p.status, p.fraud_status, p.payment_proof_file_id, \
         p.gateway_transaction_id, p.payment_type, p.snap_token, p.redirect_url, \
         p.last_status_code, p.paid_at, p.created_at, p.updated_at"
    };
}

const FULLY_FUNDED_COLUMNS: &str =
    "id, registration_id, essay_topic, essay_file_id, essay_description, created_at";
const SELF_FUNDED_COLUMNS: &str =
    "id, registration_id, passport_number, need_visa, headshot_file_id, read_policies, created_at";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "registration-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn load_details(
        &self,
        registrations: Vec<Registration>,
    ) -> Result<Vec<RegistrationDetail>, StoreError> {
        if registrations.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = registrations.iter().map(|r| r.id).collect();

        let fully_funded = sqlx::query_as::<_, FullyFundedSubmission>(&format!(
            "SELECT {FULLY_FUNDED_COLUMNS} FROM fully_funded_submissions WHERE registration_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let self_funded = sqlx::query_as::<_, SelfFundedSubmission>(&format!(
            "SELECT {SELF_FUNDED_COLUMNS} FROM self_funded_submissions WHERE registration_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let payments = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns!(),
            " FROM payments WHERE registration_id = ANY($1) ORDER BY created_at, id"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(assemble(registrations, fully_funded, self_funded, payments))
    }

    async fn find_one(
        &self,
        column: &'static str,
        value: RegistrationKey<'_>,
    ) -> Result<Option<RegistrationDetail>, StoreError> {
        let sql = format!(
            "SELECT {} FROM registrations WHERE {} = $1",
            registration_columns!(),
            column
        );
        let query = sqlx::query_as::<_, Registration>(&sql);
        let registration = match value {
            RegistrationKey::Id(id) => query.bind(id),
            RegistrationKey::SubmissionId(sid) => query.bind(sid),
        }
        .fetch_optional(&self.pool)
        .await?;

        match registration {
            Some(registration) => Ok(self.load_details(vec![registration]).await?.pop()),
            None => Ok(None),
        }
    }
}

enum RegistrationKey<'a> {
    Id(i64),
    SubmissionId(&'a str),
}

/// Join registrations with their submissions and payments, preserving order.
fn assemble(
    registrations: Vec<Registration>,
    fully_funded: Vec<FullyFundedSubmission>,
    self_funded: Vec<SelfFundedSubmission>,
    payments: Vec<Payment>,
) -> Vec<RegistrationDetail> {
    let mut submissions: HashMap<i64, Submission> = HashMap::new();
    for s in fully_funded {
        submissions.insert(s.registration_id, Submission::FullyFunded(s));
    }
    for s in self_funded {
        submissions.insert(s.registration_id, Submission::SelfFunded(s));
    }
    let mut payments_by_registration: HashMap<i64, Vec<Payment>> = HashMap::new();
    for p in payments {
        payments_by_registration
            .entry(p.registration_id)
            .or_default()
            .push(p);
    }

    registrations
        .into_iter()
        .filter_map(|registration| {
            let Some(submission) = submissions.remove(&registration.id) else {
                warn!(registration_id = registration.id, "Registration has no submission");
                return None;
            };
            let payments = payments_by_registration
                .remove(&registration.id)
                .unwrap_or_default();
            Some(RegistrationDetail {
                registration,
                submission,
                payments,
            })
        })
        .collect()
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &RegistrationFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND payment_status = ").push_bind(status);
    }
    if let Some(scholarship_type) = filter.scholarship_type {
        qb.push(" AND scholarship_type = ").push_bind(scholarship_type);
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at < ").push_bind(to);
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.to_lowercase());
        qb.push(" AND (LOWER(full_name) LIKE ")
            .push_bind(pattern.clone())
            .push(" OR LOWER(email) LIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn counts(rows: Vec<(String, i64)>) -> BTreeMap<String, i64> {
    rows.into_iter().collect()
}

#[async_trait]
impl RegistrationStore for Database {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, email))]
    async fn email_in_use(&self, email: &str) -> Result<bool, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["email_in_use"])
            .start_timer();

        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM registrations
                WHERE LOWER(email) = LOWER($1)
                  AND payment_status NOT IN ('EXPIRED', 'FAILED')
            )
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn next_order_sequence(&self) -> Result<i64, StoreError> {
        let value = sqlx::query_scalar::<_, i64>("SELECT nextval('payment_order_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(value)
    }

    async fn order_id_exists(&self, order_id: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE order_id = $1)",
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self, new), fields(submission_id = %new.submission_id, order_id = %new.payment.order_id))]
    async fn create_registration(
        &self,
        new: NewRegistrationRecord,
    ) -> Result<RegistrationDetail, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_registration"])
            .start_timer();

        let NewRegistrationRecord {
            submission_id,
            applicant,
            age,
            details,
            payment,
        } = new;

        let mut tx = self.pool.begin().await?;

        let registration = sqlx::query_as::<_, Registration>(concat!(
            r#"
            INSERT INTO registrations (
                submission_id, full_name, email, residence, nationality, second_nationality,
                whatsapp, institution, date_of_birth, age, gender, discover_source,
                discover_other_text, scholarship_type, payment_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'PENDING')
            RETURNING "#,
            registration_columns!()
        ))
        .bind(&submission_id)
        .bind(&applicant.full_name)
        .bind(&applicant.email)
        .bind(&applicant.residence)
        .bind(&applicant.nationality)
        .bind(&applicant.second_nationality)
        .bind(&applicant.whatsapp)
        .bind(&applicant.institution)
        .bind(applicant.date_of_birth)
        .bind(age)
        .bind(applicant.gender)
        .bind(applicant.discover_source)
        .bind(&applicant.discover_other_text)
        .bind(details.scholarship_type())
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_write)?;

        let submission = match details {
            SubmissionDetails::FullyFunded {
                essay_topic,
                essay_file_id,
                essay_description,
            } => {
                let row = sqlx::query_as::<_, FullyFundedSubmission>(&format!(
                    r#"
                    INSERT INTO fully_funded_submissions
                        (registration_id, essay_topic, essay_file_id, essay_description)
                    VALUES ($1, $2, $3, $4)
                    RETURNING {FULLY_FUNDED_COLUMNS}
                    "#
                ))
                .bind(registration.id)
                .bind(essay_topic)
                .bind(essay_file_id)
                .bind(essay_description)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from_write)?;
                Submission::FullyFunded(row)
            }
            SubmissionDetails::SelfFunded {
                passport_number,
                need_visa,
                headshot_file_id,
            } => {
                let row = sqlx::query_as::<_, SelfFundedSubmission>(&format!(
                    r#"
                    INSERT INTO self_funded_submissions
                        (registration_id, passport_number, need_visa, headshot_file_id, read_policies)
                    VALUES ($1, $2, $3, $4, TRUE)
                    RETURNING {SELF_FUNDED_COLUMNS}
                    "#
                ))
                .bind(registration.id)
                .bind(passport_number)
                .bind(need_visa)
                .bind(headshot_file_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(StoreError::from_write)?;
                Submission::SelfFunded(row)
            }
        };

        let payment = sqlx::query_as::<_, Payment>(concat!(
            r#"
            INSERT INTO payments (
                registration_id, order_id, amount_idr, amount_usd, fx_rate, quoted_at, method,
                status, payment_proof_file_id, snap_token, redirect_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10)
            RETURNING "#,
            payment_columns!()
        ))
        .bind(registration.id)
        .bind(&payment.order_id)
        .bind(payment.amount_idr)
        .bind(payment.amount_usd)
        .bind(payment.fx_rate)
        .bind(payment.quoted_at)
        .bind(payment.method)
        .bind(payment.payment_proof_file_id)
        .bind(&payment.snap_token)
        .bind(&payment.redirect_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(StoreError::from_write)?;

        tx.commit().await.map_err(StoreError::from_write)?;
        timer.observe_duration();

        info!(registration_id = registration.id, "Registration created");

        Ok(RegistrationDetail {
            registration,
            submission,
            payments: vec![payment],
        })
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> Result<Option<RegistrationDetail>, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["find_registration"])
            .start_timer();
        self.find_one("id", RegistrationKey::Id(id)).await
    }

    #[instrument(skip(self))]
    async fn find_by_submission_id(
        &self,
        submission_id: &str,
    ) -> Result<Option<RegistrationDetail>, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["find_registration"])
            .start_timer();
        self.find_one("submission_id", RegistrationKey::SubmissionId(submission_id))
            .await
    }

    #[instrument(skip(self, filter))]
    async fn list(
        &self,
        filter: &RegistrationFilter,
        sort: Sort,
        paging: Paging,
    ) -> Result<Page<Registration>, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_registrations"])
            .start_timer();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM registrations");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let direction = match sort.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let mut query = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            registration_columns!(),
            " FROM registrations"
        ));
        push_filter(&mut query, filter);
        query.push(format!(
            " ORDER BY {} {}, id {}",
            sort.field.column(),
            direction,
            direction
        ));
        query.push(" LIMIT ").push_bind(paging.limit());
        query.push(" OFFSET ").push_bind(paging.offset());

        let items = query
            .build_query_as::<Registration>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, paging))
    }

    #[instrument(skip(self, filter))]
    async fn list_details(
        &self,
        filter: &RegistrationFilter,
    ) -> Result<Vec<RegistrationDetail>, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_details"])
            .start_timer();

        let mut query = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            registration_columns!(),
            " FROM registrations"
        ));
        push_filter(&mut query, filter);
        query.push(" ORDER BY created_at, id");

        let registrations = query
            .build_query_as::<Registration>()
            .fetch_all(&self.pool)
            .await?;

        self.load_details(registrations).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_registration"])
            .start_timer();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM payments WHERE registration_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM fully_funded_submissions WHERE registration_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM self_funded_submissions WHERE registration_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(deleted > 0)
    }

    async fn file_reference_count(&self, file_id: i64) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM fully_funded_submissions WHERE essay_file_id = $1)
              + (SELECT COUNT(*) FROM self_funded_submissions WHERE headshot_file_id = $1)
              + (SELECT COUNT(*) FROM payments WHERE payment_proof_file_id = $1)
            "#,
        )
        .bind(file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn find_payment(&self, order_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let record = sqlx::query_as::<_, PaymentRecord>(concat!(
            "SELECT ",
            payment_columns_p!(),
            ", r.payment_status AS registration_status \
             FROM payments p JOIN registrations r ON r.id = p.registration_id \
             WHERE p.order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    #[instrument(skip(self, decide))]
    async fn reconcile_payment(
        &self,
        order_id: &str,
        decide: ReconcileFn<'_>,
    ) -> Result<Option<Reconciled>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_payment"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, PaymentRecord>(concat!(
            "SELECT ",
            payment_columns_p!(),
            ", r.payment_status AS registration_status \
             FROM payments p JOIN registrations r ON r.id = p.registration_id \
             WHERE p.order_id = $1 \
             FOR UPDATE OF p, r"
        ))
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(None);
        };

        let applied = decide(&current);
        if let Some(update) = &applied {
            sqlx::query(
                r#"
                UPDATE payments
                SET status = $2,
                    fraud_status = $3,
                    payment_type = COALESCE($4, payment_type),
                    gateway_transaction_id = COALESCE($5, gateway_transaction_id),
                    last_status_code = COALESCE($6, last_status_code),
                    paid_at = COALESCE(paid_at, $7),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(current.payment.id)
            .bind(update.status)
            .bind(update.fraud_status)
            .bind(&update.payment_type)
            .bind(&update.gateway_transaction_id)
            .bind(&update.status_code)
            .bind(update.paid_at)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_write)?;

            if update.registration_status != current.registration_status {
                sqlx::query(
                    "UPDATE registrations SET payment_status = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(current.payment.registration_id)
                .bind(update.registration_status)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from_write)?;
            }
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(Some(Reconciled {
            before: current,
            applied,
        }))
    }

    async fn stale_pending_payments(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Payment>, StoreError> {
        let payments = sqlx::query_as::<_, Payment>(concat!(
            "SELECT ",
            payment_columns_p!(),
            " FROM payments p JOIN registrations r ON r.id = p.registration_id \
             WHERE p.method = 'MIDTRANS' AND p.status = 'pending' \
               AND r.payment_status = 'PENDING' AND p.created_at < $1 \
             ORDER BY p.created_at \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    #[instrument(skip(self))]
    async fn registration_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<RegistrationStats, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["registration_stats"])
            .start_timer();

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM registrations")
            .fetch_one(&self.pool)
            .await?;
        let by_status = sqlx::query_as::<_, (String, i64)>(
            "SELECT payment_status, COUNT(*) FROM registrations GROUP BY payment_status",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT scholarship_type, COUNT(*) FROM registrations GROUP BY scholarship_type",
        )
        .fetch_all(&self.pool)
        .await?;
        let created_today = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM registrations WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(RegistrationStats {
            total,
            by_status: counts(by_status),
            by_scholarship_type: counts(by_type),
            created_today,
        })
    }

    #[instrument(skip(self))]
    async fn payment_stats(&self) -> Result<PaymentStats, StoreError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["payment_stats"])
            .start_timer();

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments")
            .fetch_one(&self.pool)
            .await?;
        let by_status = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM payments GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        let by_method = sqlx::query_as::<_, (String, i64)>(
            "SELECT method, COUNT(*) FROM payments GROUP BY method",
        )
        .fetch_all(&self.pool)
        .await?;
        let paid_amount_idr = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(p.amount_idr), 0)::BIGINT
            FROM payments p JOIN registrations r ON r.id = p.registration_id
            WHERE r.payment_status = 'PAID' AND p.status IN ('settlement', 'capture')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(PaymentStats {
            total,
            by_status: counts(by_status),
            by_method: counts(by_method),
            paid_amount_idr,
        })
    }
}
