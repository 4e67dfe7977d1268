//! User-Agent string sent with every request.

/// Product token prefix.
const PRODUCT: &str = "awsutils";

/// Default User-Agent: product and crate version.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version}")
}
