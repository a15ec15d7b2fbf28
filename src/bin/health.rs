use std::env;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;

const DEFAULT_URL: &str = "http://127.0.0.1:5000/health";

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

fn probe(url: Url) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        bail!("Request failed with status {}", response.status())
    }

    let health: HealthResponse = response.json().context("Malformed health response")?;
    if health.status != "OK" {
        bail!("Server reported status {}", health.status)
    }
    Ok(())
}

fn main() -> ExitCode {
    let url = env::args().nth(1).unwrap_or_else(|| DEFAULT_URL.to_string());
    let result = Url::parse(&url)
        .with_context(|| format!("Invalid URL {url}"))
        .and_then(probe);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Health check failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
