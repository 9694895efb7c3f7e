//! CloudID constants
//!
//! These values are compiled into the binary. Anything a deployment is expected
//! to change (client id, audience) is deliberately absent and must come from
//! configuration.

use std::time::Duration;

/// Identity provider host used when no domain is configured
pub const DEFAULT_DOMAIN: &str = "id.sage.com";

/// Standard OpenID scopes requested for every token.
///
/// Must include `email` to allow migration from SageID to CloudID.
pub const OPENID_SCOPE: &str = "openid token access_token offline_access email";

/// Name of the machine-wide lock guarding the durable refresh-token store
pub const DEFAULT_LOCK_NAME: &str = "cloudid.token-store";

/// Wall-clock budget for one logon, retries included
pub const LOGON_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Pause between two attempts of the retry loop
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Access tokens expiring within this margin are renewed instead of reused
pub const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// How long the browser flow waits for the provider redirect
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Loopback redirect registered for the interactive flow
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8765/callback";

/// Application directory name under the platform data/config roots
pub const APP_DIR_NAME: &str = "cloudid";

/// Normalise a configured provider domain.
///
/// Empty input falls back to [`DEFAULT_DOMAIN`]; trailing path separators are
/// stripped.
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_DOMAIN.to_string()
    } else {
        trimmed.to_string()
    }
}
