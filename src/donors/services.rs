use std::{sync::Arc, time::Duration};

use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    repo::{bounded, Access, DonorFilter, DonorStore, ProfileChanges},
    repo_types::{DonorContact, DonorSummary},
};
use crate::{auth::password::hash_password_blocking, error::AppError, validation};

/// Raw partial update as received from a client.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub password: Option<String>,
    pub blood_type: Option<String>,
    pub contact_number: Option<String>,
    pub location: Option<String>,
}

/// Raw list filter; blank values mean "any".
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub blood_type: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

impl DeleteOutcome {
    pub fn already_absent(&self) -> bool {
        self.deleted_count == 0
    }
}

/// Matching, donation bookkeeping and profile maintenance.
///
/// Holds no profile state: every call goes to the store, and every counter
/// change is a single atomic store operation.
#[derive(Clone)]
pub struct DonorService {
    store: Arc<dyn DonorStore>,
    timeout: Duration,
}

impl DonorService {
    pub fn new(store: Arc<dyn DonorStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Hands out the most experienced eligible donor for the request and
    /// takes one unit off that donor's count.
    #[instrument(skip(self))]
    pub async fn request_match(
        &self,
        blood_type: &str,
        location: &str,
    ) -> Result<DonorContact, AppError> {
        let blood_type = validation::blood_type(blood_type)?;
        let location = validation::location(location)?;

        let claimed = bounded(
            self.timeout,
            Access::Write,
            self.store.claim_top_donor(blood_type, &location),
        )
        .await?;

        match claimed {
            Some(donor) => {
                info!(
                    donor_id = %donor.id,
                    %blood_type,
                    remaining = donor.donation_count,
                    "donor matched"
                );
                Ok(DonorContact::from(&donor))
            }
            None => {
                info!(%blood_type, location = %location, "no eligible donor");
                Err(AppError::NoMatch)
            }
        }
    }

    /// Adds one completed donation to the donor and returns the new count.
    #[instrument(skip(self))]
    pub async fn record_donation(&self, username: &str) -> Result<u32, AppError> {
        let username = validation::username(username)?;
        let count = bounded(
            self.timeout,
            Access::Write,
            self.store.increment_donations(&username),
        )
        .await?;

        match count {
            Some(count) => {
                info!(username = %username, donation_count = count, "donation recorded");
                Ok(count)
            }
            None => {
                info!(username = %username, "donation for unknown user");
                Err(AppError::UnknownUser)
            }
        }
    }

    /// Lazy, read-only view over matching donors. Calling again restarts it.
    pub fn list_donors(
        &self,
        query: ListQuery,
    ) -> Result<BoxStream<'_, Result<DonorContact, AppError>>, AppError> {
        let filter = Self::filter(query)?;
        debug!(?filter, "listing donors");
        Ok(self.store.list(filter).map_err(AppError::from).boxed())
    }

    /// Drains [`Self::list_donors`] under the store deadline.
    pub async fn collect_donors(&self, query: ListQuery) -> Result<Vec<DonorContact>, AppError> {
        let stream = self.list_donors(query)?;
        bounded(self.timeout, Access::Read, stream.try_collect()).await
    }

    fn filter(query: ListQuery) -> Result<DonorFilter, AppError> {
        let blood_type = match query.blood_type.as_deref().map(str::trim) {
            Some(bt) if !bt.is_empty() => Some(validation::blood_type(bt)?),
            _ => None,
        };
        let location = match query.location.as_deref().map(str::trim) {
            Some(loc) if !loc.is_empty() => Some(validation::location(loc)?),
            _ => None,
        };
        Ok(DonorFilter {
            blood_type,
            location,
        })
    }

    #[instrument(skip(self))]
    pub async fn profile(&self, id: Uuid) -> Result<DonorSummary, AppError> {
        bounded(self.timeout, Access::Read, self.store.find_by_id(id))
            .await?
            .map(DonorSummary::from)
            .ok_or(AppError::UnknownUser)
    }

    /// Id of the donor registered under `username`, if any.
    pub async fn owner_of(&self, username: &str) -> Result<Option<Uuid>, AppError> {
        let username = validation::username(username)?;
        let found = bounded(
            self.timeout,
            Access::Read,
            self.store.find_by_username(&username),
        )
        .await?;
        Ok(found.map(|p| p.id))
    }

    /// Applies the given fields; `donation_count` is never touched here.
    /// With `owner` set, only that donor's profile under `username` changes.
    #[instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        username: &str,
        owner: Option<Uuid>,
        update: ProfileUpdate,
    ) -> Result<u64, AppError> {
        let username = validation::username(username)?;

        let blood_type = update
            .blood_type
            .as_deref()
            .map(validation::blood_type)
            .transpose()?;
        let contact_number = update
            .contact_number
            .as_deref()
            .map(validation::contact_number)
            .transpose()?;
        let location = update
            .location
            .as_deref()
            .map(validation::location)
            .transpose()?;
        if let Some(pw) = update.password.as_deref() {
            validation::password(pw)?;
        }

        let mut changes = ProfileChanges {
            password_hash: None,
            blood_type,
            contact_number,
            location,
        };
        if let Some(pw) = update.password {
            changes.password_hash = Some(hash_password_blocking(pw).await?);
        }
        if changes.is_empty() {
            return Err(AppError::Validation("no fields to update".into()));
        }

        let modified = bounded(
            self.timeout,
            Access::Write,
            self.store.update_profile(&username, owner, &changes),
        )
        .await?;
        if modified == 0 {
            info!(username = %username, "update: no matching profile");
            return Ok(0);
        }

        info!(
            username = %username,
            modified,
            password_changed = changes.password_hash.is_some(),
            "profile updated"
        );
        Ok(modified)
    }

    /// Removes profiles under `username`, restricted to `owner` when given.
    /// Absent usernames are not an error.
    #[instrument(skip(self))]
    pub async fn delete_profile(
        &self,
        username: &str,
        owner: Option<Uuid>,
    ) -> Result<DeleteOutcome, AppError> {
        let username = validation::username(username)?;
        let deleted_count = bounded(
            self.timeout,
            Access::Write,
            self.store.delete_by_username(&username, owner),
        )
        .await?;

        let outcome = DeleteOutcome { deleted_count };
        if outcome.already_absent() {
            info!(username = %username, "delete: already absent");
        } else {
            info!(username = %username, deleted_count, "profile deleted");
        }
        Ok(outcome)
    }
}
