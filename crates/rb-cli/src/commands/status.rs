//! `status`: query a running gateway about a session

use anyhow::{Context, Result};
use reqwest::header::COOKIE;

use crate::output::{format_session_status, print_error, session_cookie, SessionStatus};

/// Build the status endpoint URL for a gateway base address
pub fn status_url(gateway: &str) -> String {
    let base = if gateway.starts_with("http://") || gateway.starts_with("https://") {
        gateway.to_string()
    } else {
        format!("http://{}", gateway)
    };
    format!("{}/remote/status", base.trim_end_matches('/'))
}

/// Execute the status command
pub async fn status_command(gateway: &str, session: &str) -> Result<()> {
    let url = status_url(gateway);
    tracing::debug!("Querying {}", url);

    let response = match reqwest::Client::new()
        .get(&url)
        .header(COOKIE, session_cookie(session))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            print_error(&format!("Failed to reach gateway at {}: {}", gateway, e));
            print_error("Is a session running? Try: remote-bridge connect <user@host>");
            return Err(e.into());
        }
    };

    let status: SessionStatus = response
        .error_for_status()
        .context("Gateway returned an error")?
        .json()
        .await
        .context("Failed to parse status response")?;

    println!("{}", format_session_status(&status));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_url() {
        assert_eq!(
            status_url("127.0.0.1:8080"),
            "http://127.0.0.1:8080/remote/status"
        );
        assert_eq!(
            status_url("http://localhost:8080/"),
            "http://localhost:8080/remote/status"
        );
    }
}
