//! External service clients/adapters.

pub mod activity_client;

pub use activity_client::{
    ActionActivity, ActivityClientConfig, ActivityEmitter, ActivityError, AgentActivityClient,
    ResponseActivity, SessionExternalUrls, ThoughtActivity, normalized_external_urls,
};
