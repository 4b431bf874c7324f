//! Utility functions and helpers

use rand::RngCore;

/// Number of random bytes behind ids produced by [`create_random_id`].
const RANDOM_ID_BYTES: usize = 5;

/// Returns a short random hex id (10 characters).
///
/// Used for correlation ids and throwaway resource names.
#[must_use]
pub fn create_random_id() -> String {
    let mut bytes = [0u8; RANDOM_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Strips a single trailing slash.
#[must_use]
pub fn ensure_no_slash(s: &str) -> &str {
    s.strip_suffix('/').unwrap_or(s)
}

/// Appends a trailing slash unless one is already present.
#[must_use]
pub fn ensure_slash(s: &str) -> String {
    if s.ends_with('/') {
        s.to_owned()
    } else {
        format!("{s}/")
    }
}

/// Joins a base URL and a path the way the portal does: no doubled slash at
/// the seam and exactly one trailing slash.
#[must_use]
pub fn join_base_path(base: &str, path: &str) -> String {
    ensure_slash(&format!("{}{path}", ensure_no_slash(base)))
}

pub mod shape {
    //! Response-shape assertions shared by scenarios.

    use url::Url;

    use crate::error::{HarnessError, HarnessResult};
    use crate::http::{HttpResponse, ResponseBody};

    /// Checks the `would_be_html` marker the auth server adds to JSON
    /// renderings of pages it would otherwise serve as HTML.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when the marker is missing or does not
    /// match `expected`.
    pub fn expect_html_marker(body: &ResponseBody, expected: bool) -> HarnessResult<()> {
        let marker = body
            .as_json()
            .and_then(|json| json.get("would_be_html"))
            .and_then(serde_json::Value::as_bool);
        match marker {
            Some(value) if value == expected => Ok(()),
            Some(value) => Err(HarnessError::protocol_violation(format!(
                "would_be_html is {value}, expected {expected}"
            ))),
            None => Err(HarnessError::protocol_violation(
                "response carries no would_be_html marker",
            )),
        }
    }

    /// Extracts the `error` parameter of an OAuth2 error redirect.
    #[must_use]
    pub fn redirect_error(response: &HttpResponse) -> Option<String> {
        let location = Url::parse(response.location()?).ok()?;
        location
            .query_pairs()
            .find(|(key, _)| key == "error")
            .map(|(_, value)| value.into_owned())
    }

    /// Requires the response to be an error redirect carrying `expected`.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation when there is no redirect, no `error`
    /// parameter, or a different error code.
    pub fn expect_redirect_error(response: &HttpResponse, expected: &str) -> HarnessResult<()> {
        match redirect_error(response) {
            Some(error) if error == expected => Ok(()),
            Some(error) => Err(HarnessError::protocol_violation(format!(
                "redirect error is '{error}', expected '{expected}'"
            ))),
            None => Err(HarnessError::protocol_violation(format!(
                "expected an error redirect with '{expected}', got status {}",
                response.status
            ))),
        }
    }
}
