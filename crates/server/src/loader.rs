use pingpong_core::{PluginSettings, WebsiteEntry, WebsiteId, WebsiteRegistry};
use pingpong_crisp::api::{ApiError, ConnectWebsite, CrispApi};
use tracing::{info, warn};

/// Outcome of walking the subscribed-website listing at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub pages_loaded: u32,
    pub websites_loaded: usize,
    pub websites_skipped: usize,
    /// Set when pagination stopped on a vendor error instead of an empty page.
    pub halted_by: Option<ApiError>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.halted_by.is_none()
    }
}

/// Pages through every website with the plugin installed, starting at page 1,
/// until the first empty page or the first error. Websites from pages already
/// loaded stay registered when a later page fails.
pub async fn load_subscribed_websites(
    api: &dyn CrispApi,
    registry: &WebsiteRegistry,
    default_message: &str,
) -> LoadReport {
    let mut report = LoadReport::default();
    let mut page: u32 = 1;

    loop {
        match api.list_connect_websites(page, true).await {
            Ok(listing) if listing.is_empty() => break,
            Ok(listing) => {
                info!(
                    event_name = "system.bootstrap.page_loaded",
                    correlation_id = "bootstrap",
                    page,
                    websites = listing.websites.len(),
                    skipped = listing.skipped,
                    "loaded page of subscribed websites"
                );
                report.websites_skipped += listing.skipped;
                for website in listing.websites {
                    register_website(registry, website, default_message);
                    report.websites_loaded += 1;
                }
                report.pages_loaded += 1;
                page += 1;
            }
            Err(error) => {
                warn!(
                    event_name = "system.bootstrap.page_failed",
                    correlation_id = "bootstrap",
                    page,
                    error = %error,
                    "failed to load subscribed websites; keeping pages loaded so far"
                );
                report.halted_by = Some(error);
                break;
            }
        }
    }

    info!(
        event_name = "system.bootstrap.websites_loaded",
        correlation_id = "bootstrap",
        pages_loaded = report.pages_loaded,
        websites_loaded = report.websites_loaded,
        websites_skipped = report.websites_skipped,
        complete = report.is_complete(),
        "subscribed websites loaded"
    );
    report
}

fn register_website(registry: &WebsiteRegistry, website: ConnectWebsite, default_message: &str) {
    let message = match PluginSettings::from_value(&website.settings) {
        Ok(settings) => settings.message,
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.settings_fallback",
                correlation_id = "bootstrap",
                website_id = %website.website_id,
                error = %error,
                "website settings unusable; falling back to the default message"
            );
            default_message.to_owned()
        }
    };

    info!(
        event_name = "system.bootstrap.website_bound",
        correlation_id = "bootstrap",
        website_id = %website.website_id,
        "website now bound with the plugin"
    );
    registry.put(WebsiteId::from(website.website_id), WebsiteEntry::new(website.token, message));
}
