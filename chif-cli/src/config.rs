//! Global options shared by every command.
//!
//! Each option can also be supplied through the environment; flags win.

use std::time::Duration;

use chif_core::{ChifError, ClientConfig, PollInterval, PollOptions, DEFAULT_BASE_URL, DEFAULT_IP_ECHO_URL};
use clap::{ArgAction, Args};
use url::Url;

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Service root URL
    #[arg(long, env = "CHIF_API_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub url: String,

    /// Organization identifier
    #[arg(long = "org_id", env = "CHIF_ORG_ID", global = true)]
    pub org_id: Option<String>,

    /// API bearer token
    #[arg(long, env = "CHIF_API_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Append logs to this file (empty disables file logging)
    #[arg(long, env = "CHIF_LOG", default_value = "chif-api.log", global = true)]
    pub log: String,

    /// Whole-request timeout in seconds (unlimited by default)
    #[arg(long, env = "CHIF_TIMEOUT", value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Delay between status checks, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 500, global = true)]
    pub poll_interval: u64,

    /// Stop waiting for a job after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub max_wait: Option<u64>,

    /// Stop waiting for a job after this many status checks
    #[arg(long, value_name = "N", global = true)]
    pub max_polls: Option<u32>,

    /// Do not look up the external IP recorded in encode manifests
    #[arg(long, global = true)]
    pub no_ip_lookup: bool,

    /// Service that echoes the caller's public IP
    #[arg(long, env = "CHIF_IP_ECHO_URL", default_value = DEFAULT_IP_ECHO_URL, global = true)]
    pub ip_echo_url: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalArgs {
    pub fn client_config(&self) -> Result<ClientConfig, ChifError> {
        let org_id = self
            .org_id
            .clone()
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| ChifError::Config("--org_id or CHIF_ORG_ID is required".into()))?;
        let token = self
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChifError::Config("--token or CHIF_API_TOKEN is required".into()))?;

        Ok(ClientConfig::new(&self.url, org_id, token)
            .with_request_timeout(self.timeout.map(Duration::from_secs)))
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: PollInterval::Fixed(Duration::from_millis(self.poll_interval)),
            max_attempts: self.max_polls,
            max_wait: self.max_wait.map(Duration::from_secs),
        }
    }

    /// `None` when the lookup is disabled.
    pub fn ip_echo_url(&self) -> Result<Option<Url>, ChifError> {
        if self.no_ip_lookup {
            return Ok(None);
        }
        Url::parse(&self.ip_echo_url)
            .map(Some)
            .map_err(|e| ChifError::Config(format!("invalid IP echo URL {:?}: {e}", self.ip_echo_url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        global: GlobalArgs,
    }

    fn parse(args: &[&str]) -> GlobalArgs {
        let mut argv = vec!["chif-api"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn test_client_config_requires_credentials() {
        let args = parse(&["--org_id", "org", "--token", ""]);
        assert!(matches!(args.client_config(), Err(ChifError::Config(_))));

        let args = parse(&["--org_id", "org", "--token", "t", "--timeout", "30"]);
        let config = args.client_config().unwrap();
        assert_eq!(config.org_id, "org");
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_poll_options() {
        let args = parse(&["--poll-interval", "250", "--max-polls", "8", "--max-wait", "60"]);
        assert_eq!(
            args.poll_options(),
            PollOptions {
                interval: PollInterval::Fixed(Duration::from_millis(250)),
                max_attempts: Some(8),
                max_wait: Some(Duration::from_secs(60)),
            }
        );
    }

    #[test]
    fn test_ip_lookup_toggle() {
        let args = parse(&["--ip-echo-url", "http://127.0.0.1:9/ip"]);
        assert_eq!(
            args.ip_echo_url().unwrap().unwrap().as_str(),
            "http://127.0.0.1:9/ip"
        );

        let args = parse(&["--no-ip-lookup", "--ip-echo-url", "not a url"]);
        assert_eq!(args.ip_echo_url().unwrap(), None);
    }
}
