use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::StoreError;

/// Version of the `donors` record layout this build reads and writes.
pub const SCHEMA_VERSION: i16 = 1;

/// ABO/Rh blood group, stored and rendered as `A+`, `AB-`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BloodType {
    APos,
    ANeg,
    BPos,
    BNeg,
    AbPos,
    AbNeg,
    OPos,
    ONeg,
}

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        BloodType::ALL
            .into_iter()
            .find(|bt| bt.as_str() == normalized)
            .ok_or_else(|| format!("unknown blood type {s:?}"))
    }
}

impl TryFrom<String> for BloodType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BloodType> for String {
    fn from(bt: BloodType) -> Self {
        bt.as_str().to_string()
    }
}

/// Donor record as the rest of the crate sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorProfile {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String, // argon2 PHC string, salt embedded
    pub blood_type: BloodType,
    pub contact_number: String,
    pub location: String,
    pub donation_count: u32,
    pub created_at: OffsetDateTime,
}

/// What a requester learns about a donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorContact {
    pub contact_number: String,
    pub location: String,
}

impl From<&DonorProfile> for DonorContact {
    fn from(p: &DonorProfile) -> Self {
        Self {
            contact_number: p.contact_number.clone(),
            location: p.location.clone(),
        }
    }
}

/// Profile without credentials, safe to hand back to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorSummary {
    pub id: Uuid,
    pub username: String,
    pub blood_type: BloodType,
    pub contact_number: String,
    pub location: String,
    pub donation_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<DonorProfile> for DonorSummary {
    fn from(p: DonorProfile) -> Self {
        Self {
            id: p.id,
            username: p.username,
            blood_type: p.blood_type,
            contact_number: p.contact_number,
            location: p.location,
            donation_count: p.donation_count,
            created_at: p.created_at,
        }
    }
}

/// Raw `donors` row; only becomes a [`DonorProfile`] after validation.
#[derive(Debug, FromRow)]
pub struct DonorRow {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub blood_type: String,
    pub contact_number: String,
    pub location: String,
    pub donation_count: i32,
    pub schema_version: i16,
    pub created_at: OffsetDateTime,
}

impl TryFrom<DonorRow> for DonorProfile {
    type Error = StoreError;

    fn try_from(r: DonorRow) -> Result<Self, Self::Error> {
        if r.schema_version != SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "donor {} has schema version {}, expected {}",
                r.id, r.schema_version, SCHEMA_VERSION
            )));
        }
        let blood_type = r
            .blood_type
            .parse::<BloodType>()
            .map_err(|e| StoreError::Corrupt(format!("donor {}: {e}", r.id)))?;
        let donation_count = u32::try_from(r.donation_count).map_err(|_| {
            StoreError::Corrupt(format!(
                "donor {} has negative donation count {}",
                r.id, r.donation_count
            ))
        })?;

        Ok(Self {
            id: r.id,
            username: r.username,
            password_hash: r.password_hash,
            blood_type,
            contact_number: r.contact_number,
            location: r.location,
            donation_count,
            created_at: r.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> DonorRow {
        DonorRow {
            id: Uuid::new_v4(),
            username: "alice".into(),
            password_hash: "$argon2id$stub".into(),
            blood_type: "AB-".into(),
            contact_number: "555-0100".into(),
            location: "Springfield".into(),
            donation_count: 3,
            schema_version: SCHEMA_VERSION,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn blood_type_parses_case_insensitively() {
        assert_eq!("ab+".parse::<BloodType>().unwrap(), BloodType::AbPos);
        assert_eq!(" O- ".parse::<BloodType>().unwrap(), BloodType::ONeg);
        assert!("C+".parse::<BloodType>().is_err());
        assert!("A".parse::<BloodType>().is_err());
    }

    #[test]
    fn blood_type_serializes_canonically() {
        let json = serde_json::to_string(&BloodType::AbNeg).unwrap();
        assert_eq!(json, "\"AB-\"");
        let back: BloodType = serde_json::from_str("\"b+\"").unwrap();
        assert_eq!(back, BloodType::BPos);
    }

    #[test]
    fn valid_row_decodes() {
        let profile = DonorProfile::try_from(row()).expect("row is valid");
        assert_eq!(profile.blood_type, BloodType::AbNeg);
        assert_eq!(profile.donation_count, 3);
    }

    #[test]
    fn row_with_unknown_schema_version_is_rejected() {
        let mut r = row();
        r.schema_version = 2;
        assert!(matches!(DonorProfile::try_from(r), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn row_with_negative_count_is_rejected() {
        let mut r = row();
        r.donation_count = -1;
        assert!(matches!(DonorProfile::try_from(r), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn row_with_bad_blood_type_is_rejected() {
        let mut r = row();
        r.blood_type = "Z".into();
        assert!(matches!(DonorProfile::try_from(r), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn summary_never_carries_the_hash() {
        let summary = DonorSummary::from(DonorProfile::try_from(row()).unwrap());
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"bloodType\":\"AB-\""));
        assert!(json.contains("\"donationCount\":3"));
    }
}
