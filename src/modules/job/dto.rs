use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::model::Job;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct FailJobRequest {
    #[validate(length(min = 1, max = 2000, message = "Reason must be between 1 and 2000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct DeleteJobQuery {
    /// Also delete the stored input and output artifacts.
    #[serde(default)]
    pub purge_files: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProxyQuery {
    /// Absolute http(s) URL to relay.
    pub url: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub job: Job,
    /// False when the same outcome had already been recorded.
    pub applied: bool,
}
