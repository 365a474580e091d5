//! HTTP implementations of the collaborator traits.

mod http;
mod mistral;
mod recruitee;

pub use http::build_client;
pub use mistral::{MistralClassifier, MistralOcr};
pub use recruitee::{HttpDocumentFetcher, RecruiteeClient};
