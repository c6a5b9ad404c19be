//! bettercap REST client
//!
//! Drives the `wifi.recon` module through `POST /api/session`. Every call
//! resolves to a [`ScanAck`]; transport errors become rejections so the
//! orchestrator sees one uniform result.

use super::{ScanAck, ScanControl};
use crate::config::ScannerConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct SessionCommand<'a> {
    cmd: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Clone)]
pub struct BettercapClient {
    http: reqwest::Client,
    session_url: String,
    username: String,
    password: String,
}

impl BettercapClient {
    pub fn new(config: &ScannerConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            session_url: format!("{}/api/session", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn session_url(&self) -> &str {
        &self.session_url
    }

    /// Run one bettercap session command
    pub async fn run(&self, cmd: &str) -> ScanAck {
        debug!("bettercap: {}", cmd);

        let response = match self
            .http
            .post(&self.session_url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&SessionCommand { cmd })
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ScanAck::rejected(format!("{}: {}", cmd, e)),
        };

        let status = response.status();
        match response.json::<SessionReply>().await {
            Ok(reply) if status.is_success() && reply.success => ScanAck::ok(reply.msg),
            Ok(reply) => ScanAck::rejected(format!("{}: {} {}", cmd, status, reply.msg)),
            Err(_) if status.is_success() => ScanAck::ok(String::new()),
            Err(e) => ScanAck::rejected(format!("{}: {} ({})", cmd, status, e)),
        }
    }

    pub fn recon_command(enabled: bool) -> &'static str {
        if enabled {
            "wifi.recon on"
        } else {
            "wifi.recon off"
        }
    }

    pub fn interface_command(name: &str) -> String {
        format!("set wifi.interface {}", name)
    }
}

#[async_trait]
impl ScanControl for BettercapClient {
    async fn set_scanning_enabled(&self, enabled: bool) -> ScanAck {
        self.run(Self::recon_command(enabled)).await
    }

    async fn set_scan_target_interface(&self, name: &str) -> ScanAck {
        self.run(&Self::interface_command(name)).await
    }

    async fn clear_scan_state(&self) -> ScanAck {
        self.run("wifi.clear").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_normalised() {
        let config = ScannerConfig {
            url: "http://127.0.0.1:8081/".to_string(),
            ..ScannerConfig::default()
        };
        let client = BettercapClient::new(&config).unwrap();
        assert_eq!(client.session_url(), "http://127.0.0.1:8081/api/session");
    }

    #[test]
    fn test_commands() {
        assert_eq!(BettercapClient::recon_command(true), "wifi.recon on");
        assert_eq!(BettercapClient::recon_command(false), "wifi.recon off");
        assert_eq!(BettercapClient::interface_command("mon0"), "set wifi.interface mon0");
    }

    #[test]
    fn test_reply_parsing_defaults() {
        let reply: SessionReply = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(reply.success);
        assert!(reply.msg.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_scanner_is_rejection() {
        let config = ScannerConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..ScannerConfig::default()
        };
        let client = BettercapClient::new(&config).unwrap();
        let ack = client.set_scanning_enabled(false).await;
        assert!(!ack.success);
        assert!(ack.detail.starts_with("wifi.recon off"));
    }
}
