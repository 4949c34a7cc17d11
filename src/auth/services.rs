use std::{sync::Arc, time::Duration};

use tracing::{info, instrument, warn};

use crate::{
    auth::password::{hash_password_blocking, verify_password_blocking},
    donors::{
        repo::{bounded, Access, DonorStore, NewDonor},
        repo_types::DonorSummary,
    },
    error::AppError,
    validation,
};

/// Raw registration input as received from a client.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub blood_type: String,
    pub contact_number: String,
    pub location: String,
}

/// Registration and login against the donor store.
#[derive(Clone)]
pub struct CredentialGate {
    store: Arc<dyn DonorStore>,
    timeout: Duration,
    initial_donation_count: u32,
}

impl CredentialGate {
    pub fn new(store: Arc<dyn DonorStore>, timeout: Duration, initial_donation_count: u32) -> Self {
        Self {
            store,
            timeout,
            initial_donation_count,
        }
    }

    /// Creates a profile if the username is free.
    ///
    /// The lookup only saves a hash on the common path; the insert itself is
    /// insert-if-absent, so a racing registration still gets `UsernameTaken`.
    #[instrument(skip(self, reg), fields(username = %reg.username))]
    pub async fn register(&self, reg: Registration) -> Result<DonorSummary, AppError> {
        let username = validation::username(&reg.username)?;
        validation::password(&reg.password)?;
        let blood_type = validation::blood_type(&reg.blood_type)?;
        let contact_number = validation::contact_number(&reg.contact_number)?;
        let location = validation::location(&reg.location)?;

        let existing = bounded(
            self.timeout,
            Access::Read,
            self.store.find_by_username(&username),
        )
        .await?;
        if existing.is_some() {
            warn!(username = %username, "username already registered");
            return Err(AppError::UsernameTaken);
        }

        let password_hash = hash_password_blocking(reg.password).await?;

        let donor = NewDonor {
            username,
            password_hash,
            blood_type,
            contact_number,
            location,
            donation_count: self.initial_donation_count,
        };
        let created = bounded(self.timeout, Access::Write, self.store.insert_if_absent(donor))
            .await?
            .ok_or_else(|| {
                warn!("username claimed concurrently");
                AppError::UsernameTaken
            })?;

        info!(donor_id = %created.id, username = %created.username, "donor registered");
        Ok(created.into())
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<DonorSummary, AppError> {
        let username = validation::username(username)?;
        if password.is_empty() {
            return Err(AppError::Validation("password is required".into()));
        }

        let Some(profile) = bounded(
            self.timeout,
            Access::Read,
            self.store.find_by_username(&username),
        )
        .await?
        else {
            info!(username = %username, "login for unregistered username");
            return Err(AppError::NotRegistered);
        };

        let ok = verify_password_blocking(password.to_string(), profile.password_hash.clone())
            .await?;
        if !ok {
            warn!(username = %username, donor_id = %profile.id, "login invalid password");
            return Err(AppError::BadCredentials);
        }

        info!(donor_id = %profile.id, "donor logged in");
        Ok(profile.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::donors::memory::MemoryDonorStore;

    fn gate(initial: u32) -> (CredentialGate, Arc<MemoryDonorStore>) {
        let store = Arc::new(MemoryDonorStore::new());
        let gate = CredentialGate::new(store.clone(), Duration::from_secs(5), initial);
        (gate, store)
    }

    fn registration(username: &str, password: &str) -> Registration {
        Registration {
            username: username.into(),
            password: password.into(),
            blood_type: "O+".into(),
            contact_number: "555-0100".into(),
            location: "Springfield".into(),
        }
    }

    #[tokio::test]
    async fn login_round_trip() {
        let (gate, _) = gate(1);
        let registered = gate.register(registration("alice", "secret-pw")).await.unwrap();
        assert_eq!(registered.username, "alice");
        assert_eq!(registered.donation_count, 1);

        let logged_in = gate.login("alice", "secret-pw").await.unwrap();
        assert_eq!(logged_in.id, registered.id);

        assert!(matches!(
            gate.login("alice", "wrong-pw").await,
            Err(AppError::BadCredentials)
        ));
        assert!(matches!(
            gate.login("bob", "whatever").await,
            Err(AppError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn six_character_password_round_trips() {
        let (gate, _) = gate(1);
        let registered = gate.register(registration("alice", "secret")).await.unwrap();
        let logged_in = gate.login("alice", "secret").await.unwrap();
        assert_eq!(logged_in.id, registered.id);
        assert_eq!(logged_in.username, "alice");
    }

    #[tokio::test]
    async fn duplicate_username_leaves_original_untouched() {
        let (gate, store) = gate(1);
        gate.register(registration("carol", "first-password"))
            .await
            .unwrap();

        let mut second = registration("carol", "second-password");
        second.location = "Shelbyville".into();
        assert!(matches!(
            gate.register(second).await,
            Err(AppError::UsernameTaken)
        ));

        let stored = store.find_by_username("carol").await.unwrap().unwrap();
        assert_eq!(stored.location, "Springfield");
        assert!(gate.login("carol", "first-password").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_registrations_admit_one() {
        let (gate, store) = gate(1);
        let a = tokio::spawn({
            let gate = gate.clone();
            async move { gate.register(registration("dave", "password-one")).await }
        });
        let b = tokio::spawn({
            let gate = gate.clone();
            async move { gate.register(registration("dave", "password-two")).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let taken = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::UsernameTaken)))
            .count();
        assert_eq!((ok, taken), (1, 1));
        assert_eq!(store.delete_by_username("dave", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initial_count_is_configurable() {
        let (gate, _) = gate(0);
        let donor = gate.register(registration("erin", "password-x")).await.unwrap();
        assert_eq!(donor.donation_count, 0);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let (gate, store) = gate(1);
        let mut reg = registration("frank", "password-x");
        reg.blood_type = "XY".into();
        assert!(matches!(gate.register(reg).await, Err(AppError::Validation(_))));
        assert!(matches!(
            gate.register(registration("frank", "short")).await,
            Err(AppError::Validation(_))
        ));
        assert!(store.find_by_username("frank").await.unwrap().is_none());
    }
}
