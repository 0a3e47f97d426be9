//! Ad-hoc credentialed requests (`dashlink request`).

use anyhow::{Context, Result};
use serde_json::Value;

use dashlink::config::ClientConfig;
use dashlink::errors::TransportError;
use dashlink::transport::{ApiRequest, Method};

use super::Session;

pub async fn cmd_request(
    config: &ClientConfig,
    method: &str,
    path: &str,
    data: Option<&str>,
) -> Result<()> {
    let method: Method = method.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.with_body(body);
    }

    let session = Session::open(config)?;
    session.require_signed_in()?;

    match session.transport.execute(&request).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response.body)?);
            Ok(())
        }
        Err(TransportError::Validation { status, body } | TransportError::Server { status, body }) => {
            eprintln!(
                "{} {}",
                console::style(format!("HTTP {}", status)).red().bold(),
                serde_json::to_string_pretty(&body)?
            );
            anyhow::bail!("{} {} failed with status {}", method, path, status)
        }
        Err(e) if e.is_session_expired() => {
            anyhow::bail!("Session expired. Run 'dashlink login' to sign in again.")
        }
        Err(e) => Err(e).context(format!("{} {} failed", method, path)),
    }
}
