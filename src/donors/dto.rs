use serde::{Deserialize, Serialize};

use super::services::{DeleteOutcome, ListQuery, ProfileUpdate};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub blood_type: String,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct DonationRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRecorded {
    pub username: String,
    pub donation_count: u32,
}

/// Query string of `GET /donors`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListParams {
    pub blood_type: Option<String>,
    pub location: Option<String>,
}

impl From<DonorListParams> for ListQuery {
    fn from(p: DonorListParams) -> Self {
        Self {
            blood_type: p.blood_type,
            location: p.location,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub password: Option<String>,
    pub blood_type: Option<String>,
    pub contact_number: Option<String>,
    pub location: Option<String>,
}

impl From<UpdateProfileRequest> for ProfileUpdate {
    fn from(r: UpdateProfileRequest) -> Self {
        Self {
            password: r.password,
            blood_type: r.blood_type,
            contact_number: r.contact_number,
            location: r.location,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileResponse {
    pub modified_count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeleteStatus {
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProfileResponse {
    pub deleted_count: u64,
    pub status: DeleteStatus,
}

impl From<DeleteOutcome> for DeleteProfileResponse {
    fn from(o: DeleteOutcome) -> Self {
        Self {
            deleted_count: o.deleted_count,
            status: if o.already_absent() {
                DeleteStatus::AlreadyAbsent
            } else {
                DeleteStatus::Deleted
            },
        }
    }
}
