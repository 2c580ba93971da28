//! Feature gating
//!
//! Paid access unlocks everything. Without it only the read-only allow-list
//! stays available, so a lapsed user can still look at their own data.
//! Clients use this for UX; the API applies the same rule on mutating routes.

use serde::{Deserialize, Serialize};

use crate::error::JobProofError;

/// A gated capability of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    // Read-only
    ViewJobs,
    ViewCustomers,
    ViewReports,
    ViewSettings,

    // Mutating
    CreateJob,
    EditJob,
    CreateCustomer,
    UploadEvidence,
    SignDocument,
    GenerateReport,
}

/// Features that remain available after the trial ends without a subscription
pub const READ_ONLY_FEATURES: &[Feature] = &[
    Feature::ViewJobs,
    Feature::ViewCustomers,
    Feature::ViewReports,
    Feature::ViewSettings,
];

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewJobs => "view_jobs",
            Self::ViewCustomers => "view_customers",
            Self::ViewReports => "view_reports",
            Self::ViewSettings => "view_settings",
            Self::CreateJob => "create_job",
            Self::EditJob => "edit_job",
            Self::CreateCustomer => "create_customer",
            Self::UploadEvidence => "upload_evidence",
            Self::SignDocument => "sign_document",
            Self::GenerateReport => "generate_report",
        }
    }

    pub fn is_read_only(&self) -> bool {
        READ_ONLY_FEATURES.contains(self)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = JobProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view_jobs" => Ok(Self::ViewJobs),
            "view_customers" => Ok(Self::ViewCustomers),
            "view_reports" => Ok(Self::ViewReports),
            "view_settings" => Ok(Self::ViewSettings),
            "create_job" => Ok(Self::CreateJob),
            "edit_job" => Ok(Self::EditJob),
            "create_customer" => Ok(Self::CreateCustomer),
            "upload_evidence" => Ok(Self::UploadEvidence),
            "sign_document" => Ok(Self::SignDocument),
            "generate_report" => Ok(Self::GenerateReport),
            _ => Err(JobProofError::Validation(format!("Unknown feature: {}", s))),
        }
    }
}

/// Decide a single feature given whether the user currently has full access
pub fn can_access_feature(full_access: bool, feature: Feature) -> bool {
    full_access || feature.is_read_only()
}

/// Same as [`can_access_feature`] for a feature name coming off the wire.
/// Unknown names are only allowed when everything is allowed.
pub fn can_access_feature_named(full_access: bool, feature: &str) -> bool {
    match feature.parse::<Feature>() {
        Ok(feature) => can_access_feature(full_access, feature),
        Err(_) => full_access,
    }
}
