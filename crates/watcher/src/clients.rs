//! Placeholder implementations of the two external collaborators this
//! system only ever consumes through thin trait interfaces (§6): the art
//! site and the delivery platform. Concrete adapters for a specific site
//! and a specific chat platform are explicitly out of scope here -- wire in
//! real ones before running this against production traffic.

use async_trait::async_trait;
use pipeline::{
    DownloadError,
    FullSubmission,
    PlatformClient,
    SiteClient,
};
use query::SubmissionID;

/// Never discovers anything, so the intake loop idles forever rather than
/// crashing. Replace with a `SiteClient` that actually polls the art site's
/// browse page.
pub struct UnconfiguredSiteClient;

#[async_trait]
impl SiteClient for UnconfiguredSiteClient {
    async fn get_browse_page(&self) -> anyhow::Result<Vec<SubmissionID>> {
        Ok(Vec::new())
    }

    async fn get_full_submission(&self, id: SubmissionID) -> Result<Box<dyn FullSubmission>, DownloadError> {
        Err(DownloadError::new(501, format!("no SiteClient configured to fetch submission {id}")))
    }
}

/// Carries no session state. Replace with a real `PlatformClient` for
/// whichever chat platform delivers the bot's messages.
pub struct UnconfiguredPlatformClient;

impl PlatformClient for UnconfiguredPlatformClient {}
