use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub job_id: String,
}

impl AcceptedResponse {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            status: "accepted",
            job_id: job_id.into(),
        }
    }
}
