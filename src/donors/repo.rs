use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::repo_types::{BloodType, DonorContact, DonorProfile, DonorRow, SCHEMA_VERSION};

/// Failure at the store boundary.
///
/// `Unavailable` and `Rejected` mean the request definitely did not apply.
/// `OutcomeUnknown` means a mutation was dispatched and may still land.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store did not confirm outcome: {0}")]
    OutcomeUnknown(String),
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("record failed schema validation: {0}")]
    Corrupt(String),
}

/// Whether a store call can change state; decides how a lost reply is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl StoreError {
    pub fn from_sqlx(err: sqlx::Error, access: Access) -> Self {
        use sqlx::Error as E;
        match err {
            E::PoolTimedOut | E::PoolClosed | E::Configuration(_) => {
                StoreError::Unavailable(err.to_string())
            }
            E::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            E::Database(db) => StoreError::Rejected(db.message().to_string()),
            E::ColumnDecode { .. }
            | E::Decode(_)
            | E::ColumnNotFound(_)
            | E::ColumnIndexOutOfBounds { .. }
            | E::TypeNotFound { .. } => StoreError::Corrupt(err.to_string()),
            other => match access {
                Access::Read => StoreError::Unavailable(other.to_string()),
                Access::Write => StoreError::OutcomeUnknown(other.to_string()),
            },
        }
    }
}

/// Runs one store call under a deadline.
///
/// A read that misses the deadline is simply unavailable; a write that misses
/// it may still be applied by the store, so it surfaces as `OutcomeUnknown`.
pub async fn bounded<T, E, F>(deadline: Duration, access: Access, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<StoreError>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => {
            warn!(?access, deadline_ms = deadline.as_millis() as u64, "store call timed out");
            let msg = format!("no reply within {}ms", deadline.as_millis());
            Err(match access {
                Access::Read => StoreError::Unavailable(msg),
                Access::Write => StoreError::OutcomeUnknown(msg),
            }
            .into())
        }
    }
}

/// Fields for a profile that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewDonor {
    pub username: String,
    pub password_hash: String,
    pub blood_type: BloodType,
    pub contact_number: String,
    pub location: String,
    pub donation_count: u32,
}

/// Partial profile update. `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub password_hash: Option<String>,
    pub blood_type: Option<BloodType>,
    pub contact_number: Option<String>,
    pub location: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.password_hash.is_none()
            && self.blood_type.is_none()
            && self.contact_number.is_none()
            && self.location.is_none()
    }

    pub fn apply(&self, p: &mut DonorProfile) {
        if let Some(h) = &self.password_hash {
            p.password_hash = h.clone();
        }
        if let Some(bt) = self.blood_type {
            p.blood_type = bt;
        }
        if let Some(c) = &self.contact_number {
            p.contact_number = c.clone();
        }
        if let Some(l) = &self.location {
            p.location = l.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonorFilter {
    pub blood_type: Option<BloodType>,
    pub location: Option<String>,
}

impl DonorFilter {
    pub fn matches(&self, p: &DonorProfile) -> bool {
        self.blood_type.map_or(true, |bt| bt == p.blood_type)
            && self.location.as_deref().map_or(true, |l| l == p.location)
    }
}

/// Durable keyed storage of donor profiles.
///
/// Every mutating method is one atomic read-modify-write at the store, so
/// callers never combine a read and a write to change a counter.
#[async_trait]
pub trait DonorStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<DonorProfile>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DonorProfile>, StoreError>;

    /// Insert-if-absent on `username`. `Ok(None)` when the username is taken.
    async fn insert_if_absent(&self, donor: NewDonor) -> Result<Option<DonorProfile>, StoreError>;

    /// Picks the eligible donor (`donation_count > 0`) with the highest count
    /// for the given blood type and location and decrements it, in one step.
    /// Returns the donor as it is after the decrement.
    async fn claim_top_donor(
        &self,
        blood_type: BloodType,
        location: &str,
    ) -> Result<Option<DonorProfile>, StoreError>;

    /// Adds one to the donor's count. `Ok(None)` when the username is unknown.
    async fn increment_donations(&self, username: &str) -> Result<Option<u32>, StoreError>;

    /// Returns the number of profiles modified. With `owner` set, only the
    /// profile that has both this username and this id is touched.
    async fn update_profile(
        &self,
        username: &str,
        owner: Option<Uuid>,
        changes: &ProfileChanges,
    ) -> Result<u64, StoreError>;

    /// Removes profiles under `username` (and `owner`, when given), returning
    /// how many went away.
    async fn delete_by_username(
        &self,
        username: &str,
        owner: Option<Uuid>,
    ) -> Result<u64, StoreError>;

    /// Lazily streams donors matching `filter`, oldest first. Each call
    /// starts a fresh scan.
    fn list(&self, filter: DonorFilter) -> BoxStream<'_, Result<DonorContact, StoreError>>;

    async fn close(&self);
}

/// Claims that lose the race for the top donor are retried this many times.
const MAX_CLAIM_ATTEMPTS: u32 = 5;

const DONOR_COLUMNS: &str = "id, username, password_hash, blood_type, contact_number, \
                             location, donation_count, schema_version, created_at";

/// Postgres-backed store. Atomicity comes from single-statement updates.
#[derive(Clone)]
pub struct PgDonorStore {
    pool: PgPool,
}

impl PgDonorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DonorStore for PgDonorStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<DonorProfile>, StoreError> {
        let sql = format!("SELECT {DONOR_COLUMNS} FROM donors WHERE username = $1");
        let row = sqlx::query_as::<_, DonorRow>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, Access::Read))?;
        row.map(DonorProfile::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DonorProfile>, StoreError> {
        let sql = format!("SELECT {DONOR_COLUMNS} FROM donors WHERE id = $1");
        let row = sqlx::query_as::<_, DonorRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, Access::Read))?;
        row.map(DonorProfile::try_from).transpose()
    }

    async fn insert_if_absent(&self, donor: NewDonor) -> Result<Option<DonorProfile>, StoreError> {
        let count = i32::try_from(donor.donation_count)
            .map_err(|_| StoreError::Rejected("donation count out of range".into()))?;
        let sql = format!(
            r#"
            INSERT INTO donors (id, username, password_hash, blood_type, contact_number,
                                location, donation_count, schema_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (username) DO NOTHING
            RETURNING {DONOR_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, DonorRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&donor.username)
            .bind(&donor.password_hash)
            .bind(donor.blood_type.as_str())
            .bind(&donor.contact_number)
            .bind(&donor.location)
            .bind(count)
            .bind(SCHEMA_VERSION)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, Access::Write))?;
        row.map(DonorProfile::try_from).transpose()
    }

    async fn claim_top_donor(
        &self,
        blood_type: BloodType,
        location: &str,
    ) -> Result<Option<DonorProfile>, StoreError> {
        // FOR UPDATE makes a concurrent claim wait on the top row and re-check
        // `donation_count > 0`. If that row ran dry meanwhile the statement
        // returns nothing even though a runner-up may still be eligible, so
        // retry while one exists.
        let sql = format!(
            r#"
            UPDATE donors
               SET donation_count = donation_count - 1
             WHERE id = (
                    SELECT id
                      FROM donors
                     WHERE blood_type = $1 AND location = $2 AND donation_count > 0
                     ORDER BY donation_count DESC, created_at ASC, id ASC
                     LIMIT 1
                     FOR UPDATE
                   )
               AND donation_count > 0
            RETURNING {DONOR_COLUMNS}
            "#
        );
        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let row = sqlx::query_as::<_, DonorRow>(&sql)
                .bind(blood_type.as_str())
                .bind(location)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::from_sqlx(e, Access::Write))?;
            if let Some(row) = row {
                return DonorProfile::try_from(row).map(Some);
            }

            let (eligible,): (bool,) = sqlx::query_as(
                r#"
                SELECT EXISTS (
                    SELECT 1
                      FROM donors
                     WHERE blood_type = $1 AND location = $2 AND donation_count > 0
                )
                "#,
            )
            .bind(blood_type.as_str())
            .bind(location)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx(e, Access::Read))?;
            if !eligible {
                return Ok(None);
            }
            debug!(attempt, %blood_type, "claim lost a race; retrying");
        }

        warn!(%blood_type, attempts = MAX_CLAIM_ATTEMPTS, "claim kept losing races");
        Err(StoreError::Unavailable(format!(
            "no claim succeeded after {MAX_CLAIM_ATTEMPTS} attempts"
        )))
    }

    async fn increment_donations(&self, username: &str) -> Result<Option<u32>, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE donors
               SET donation_count = donation_count + 1
             WHERE username = $1
            RETURNING donation_count
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, Access::Write))?;

        row.map(|(count,)| {
            u32::try_from(count)
                .map_err(|_| StoreError::Corrupt(format!("negative donation count {count}")))
        })
        .transpose()
    }

    async fn update_profile(
        &self,
        username: &str,
        owner: Option<Uuid>,
        changes: &ProfileChanges,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE donors
               SET password_hash  = COALESCE($3, password_hash),
                   blood_type     = COALESCE($4, blood_type),
                   contact_number = COALESCE($5, contact_number),
                   location       = COALESCE($6, location)
             WHERE username = $1
               AND ($2::uuid IS NULL OR id = $2)
            "#,
        )
        .bind(username)
        .bind(owner)
        .bind(changes.password_hash.as_deref())
        .bind(changes.blood_type.map(BloodType::as_str))
        .bind(changes.contact_number.as_deref())
        .bind(changes.location.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, Access::Write))?;
        Ok(res.rows_affected())
    }

    async fn delete_by_username(
        &self,
        username: &str,
        owner: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            "DELETE FROM donors WHERE username = $1 AND ($2::uuid IS NULL OR id = $2)",
        )
        .bind(username)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx(e, Access::Write))?;
        Ok(res.rows_affected())
    }

    fn list(&self, filter: DonorFilter) -> BoxStream<'_, Result<DonorContact, StoreError>> {
        sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT contact_number, location
              FROM donors
             WHERE ($1::text IS NULL OR blood_type = $1)
               AND ($2::text IS NULL OR location = $2)
             ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(filter.blood_type.map(BloodType::as_str))
        .bind(filter.location)
        .fetch(&self.pool)
        .map(|row| {
            row.map(|(contact_number, location)| DonorContact {
                contact_number,
                location,
            })
            .map_err(|e| StoreError::from_sqlx(e, Access::Read))
        })
        .boxed()
    }

    async fn close(&self) {
        debug!("closing postgres pool");
        self.pool.close().await;
    }
}
