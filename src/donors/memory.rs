use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{DonorFilter, DonorStore, NewDonor, ProfileChanges, StoreError};
use super::repo_types::{BloodType, DonorContact, DonorProfile};

/// Process-local store. Each mutation runs under one write lock, which gives
/// the same read-modify-write atomicity the Postgres statements provide.
#[derive(Default)]
pub struct MemoryDonorStore {
    donors: RwLock<Vec<DonorProfile>>, // insertion order == created_at order
}

impl MemoryDonorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_by(d: &DonorProfile, username: &str, owner: Option<Uuid>) -> bool {
    d.username == username && owner.map_or(true, |id| d.id == id)
}

#[async_trait]
impl DonorStore for MemoryDonorStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<DonorProfile>, StoreError> {
        let donors = self.donors.read().await;
        Ok(donors.iter().find(|d| d.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DonorProfile>, StoreError> {
        let donors = self.donors.read().await;
        Ok(donors.iter().find(|d| d.id == id).cloned())
    }

    async fn insert_if_absent(&self, donor: NewDonor) -> Result<Option<DonorProfile>, StoreError> {
        let mut donors = self.donors.write().await;
        if donors.iter().any(|d| d.username == donor.username) {
            return Ok(None);
        }
        let profile = DonorProfile {
            id: Uuid::new_v4(),
            username: donor.username,
            password_hash: donor.password_hash,
            blood_type: donor.blood_type,
            contact_number: donor.contact_number,
            location: donor.location,
            donation_count: donor.donation_count,
            created_at: OffsetDateTime::now_utc(),
        };
        donors.push(profile.clone());
        Ok(Some(profile))
    }

    async fn claim_top_donor(
        &self,
        blood_type: BloodType,
        location: &str,
    ) -> Result<Option<DonorProfile>, StoreError> {
        let mut donors = self.donors.write().await;
        // strict `>` keeps the earliest registration on ties
        let mut best: Option<usize> = None;
        for (i, d) in donors.iter().enumerate() {
            if d.blood_type != blood_type || d.location != location || d.donation_count == 0 {
                continue;
            }
            if best.map_or(true, |b| d.donation_count > donors[b].donation_count) {
                best = Some(i);
            }
        }

        Ok(best.map(|i| {
            let donor = &mut donors[i];
            donor.donation_count -= 1;
            donor.clone()
        }))
    }

    async fn increment_donations(&self, username: &str) -> Result<Option<u32>, StoreError> {
        let mut donors = self.donors.write().await;
        let Some(donor) = donors.iter_mut().find(|d| d.username == username) else {
            return Ok(None);
        };
        donor.donation_count = donor
            .donation_count
            .checked_add(1)
            .ok_or_else(|| StoreError::Rejected("donation count overflow".into()))?;
        Ok(Some(donor.donation_count))
    }

    async fn update_profile(
        &self,
        username: &str,
        owner: Option<Uuid>,
        changes: &ProfileChanges,
    ) -> Result<u64, StoreError> {
        let mut donors = self.donors.write().await;
        let mut modified = 0;
        for d in donors.iter_mut().filter(|d| owned_by(d, username, owner)) {
            changes.apply(d);
            modified += 1;
        }
        Ok(modified)
    }

    async fn delete_by_username(
        &self,
        username: &str,
        owner: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let mut donors = self.donors.write().await;
        let before = donors.len();
        donors.retain(|d| !owned_by(d, username, owner));
        Ok((before - donors.len()) as u64)
    }

    fn list(&self, filter: DonorFilter) -> BoxStream<'_, Result<DonorContact, StoreError>> {
        stream::once(async move {
            let donors = self.donors.read().await;
            donors
                .iter()
                .filter(|d| filter.matches(d))
                .map(|d| Ok::<_, StoreError>(DonorContact::from(d)))
                .collect::<Vec<_>>()
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn close(&self) {}
}
