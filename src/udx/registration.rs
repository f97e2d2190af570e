//! Device Registration Handshake
//!
//! Two-phase exchange with the registration authority: a start request
//! carrying the registration URL, the one-time PIN and the most recently
//! issued token, then status polls at a fixed cadence until the authority
//! confirms, rejects, or the deadline elapses.

use crate::domain::ports::{RegistrationAuthorityRef, RegistrationRequest, RegistrationStatus};
use crate::error::{Error, Result};
use crate::metrics::UslMetrics;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use reqwest::Url;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Alphabet of registration tokens
pub const TOKEN_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Registration token length
pub const TOKEN_LENGTH: usize = 12;

/// Generate a registration token: distinct characters of [`TOKEN_ALPHABET`]
/// drawn from the OS random source
pub fn generate_token() -> String {
    TOKEN_ALPHABET
        .choose_multiple(&mut OsRng, TOKEN_LENGTH)
        .map(|&c| c as char)
        .collect()
}

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Started,
    Polling,
    Confirmed,
    Rejected,
    TimedOut,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Started => "started",
            HandshakeState::Polling => "polling",
            HandshakeState::Confirmed => "confirmed",
            HandshakeState::Rejected => "rejected",
            HandshakeState::TimedOut => "timed_out",
        }
    }
}

/// Registration handshake driver. One handshake runs at a time.
pub struct RegistrationHandshake {
    authority: RegistrationAuthorityRef,
    poll_interval: Duration,
    timeout: Duration,
    token: Mutex<String>,
    state: Mutex<HandshakeState>,
    in_flight: tokio::sync::Mutex<()>,
    metrics: Option<UslMetrics>,
}

impl RegistrationHandshake {
    pub fn new(authority: RegistrationAuthorityRef, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            authority,
            poll_interval,
            timeout,
            token: Mutex::new(String::new()),
            state: Mutex::new(HandshakeState::Idle),
            in_flight: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: UslMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Issue a new token, replacing the previous one
    pub fn issue_token(&self) -> String {
        let token = generate_token();
        *self.token.lock() = token.clone();
        token
    }

    /// State of the last handshake
    pub fn state(&self) -> HandshakeState {
        *self.state.lock()
    }

    /// Register this device at `url` using `pin`.
    ///
    /// Fails with bad-request for a malformed URL, internal for a rejected
    /// start or an unexpected poll status, and gateway-timeout when no
    /// confirmation arrives before the deadline.
    pub async fn register(&self, url: &str, pin: &str) -> Result<()> {
        validate_url(url)?;
        self.deadline()?;

        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| Error::conflict("Registration", "in progress"))?;

        let request = RegistrationRequest {
            url: url.to_string(),
            reg_pin: pin.to_string(),
            reg_token: self.token.lock().clone(),
        };

        let outcome = self.handshake(&request).await;
        let state = match &outcome {
            Ok(()) => HandshakeState::Confirmed,
            Err(Error::GatewayTimeout(_)) => HandshakeState::TimedOut,
            Err(_) => HandshakeState::Rejected,
        };
        self.set_state(state);
        if let Some(metrics) = &self.metrics {
            metrics.registrations.with_label_values(&[state.as_str()]).inc();
        }
        outcome
    }

    async fn handshake(&self, request: &RegistrationRequest) -> Result<()> {
        self.set_state(HandshakeState::Started);
        info!("Start device registration at {}", request.url);

        let status = self.authority.start(request).await?;
        if status != RegistrationStatus::Created {
            let reason = "Could not start device registration";
            error!("{}---{}", reason, status);
            return Err(Error::Internal(reason.to_string()));
        }

        self.set_state(HandshakeState::Polling);
        info!("Device registration in process---waiting for confirmation");

        let deadline = self.deadline()?;
        while Instant::now() < deadline {
            match self.authority.status().await? {
                RegistrationStatus::Confirmed => {
                    info!("Device registration successful");
                    return Ok(());
                }
                RegistrationStatus::Created => {}
                other => {
                    let reason = "Device registration failed";
                    error!("{}---{}", reason, other);
                    return Err(Error::Internal(reason.to_string()));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let reason = "Could not confirm device registration status";
        warn!("{} within {:?}", reason, self.timeout);
        Err(Error::GatewayTimeout(reason.to_string()))
    }

    /// Confirmation deadline counted from now
    fn deadline(&self) -> Result<Instant> {
        Instant::now().checked_add(self.timeout).ok_or_else(|| {
            Error::Configuration(format!(
                "Registration timeout {:?} is out of range",
                self.timeout
            ))
        })
    }

    fn set_state(&self, state: HandshakeState) {
        *self.state.lock() = state;
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| Error::BadRequest(format!("Invalid URL {}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(Error::BadRequest(format!("Invalid URL: {}", url)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::RegistrationAuthority;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Arc;

    /// Authority replaying scripted poll statuses, then `Created` forever
    struct ScriptedAuthority {
        start_status: RegistrationStatus,
        polls: Mutex<VecDeque<RegistrationStatus>>,
        started: Mutex<Vec<RegistrationRequest>>,
        poll_count: Mutex<u32>,
    }

    impl ScriptedAuthority {
        fn new(start_status: RegistrationStatus, polls: Vec<RegistrationStatus>) -> Arc<Self> {
            Arc::new(Self {
                start_status,
                polls: Mutex::new(polls.into()),
                started: Mutex::new(Vec::new()),
                poll_count: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl RegistrationAuthority for ScriptedAuthority {
        async fn start(&self, request: &RegistrationRequest) -> Result<RegistrationStatus> {
            self.started.lock().push(request.clone());
            Ok(self.start_status)
        }

        async fn status(&self) -> Result<RegistrationStatus> {
            *self.poll_count.lock() += 1;
            Ok(self
                .polls
                .lock()
                .pop_front()
                .unwrap_or(RegistrationStatus::Created))
        }
    }

    fn handshake(authority: Arc<ScriptedAuthority>) -> RegistrationHandshake {
        RegistrationHandshake::new(authority, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_token_shape() {
        for _ in 0..50 {
            let token = generate_token();
            assert_eq!(token.len(), TOKEN_LENGTH);
            assert!(token.bytes().all(|c| TOKEN_ALPHABET.contains(&c)));
            let distinct: HashSet<char> = token.chars().collect();
            assert_eq!(distinct.len(), TOKEN_LENGTH);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_after_polling() {
        let authority = ScriptedAuthority::new(
            RegistrationStatus::Created,
            vec![RegistrationStatus::Created, RegistrationStatus::Confirmed],
        );
        let handshake = handshake(authority.clone());
        let token = handshake.issue_token();

        handshake.register("https://partner.example/usl", "0000").await.unwrap();
        assert_eq!(handshake.state(), HandshakeState::Confirmed);

        let started = authority.started.lock();
        assert_eq!(started[0].reg_token, token);
        assert_eq!(started[0].reg_pin, "0000");
        assert_eq!(*authority.poll_count.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_start_never_polls() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Unexpected(403), vec![]);
        let handshake = handshake(authority.clone());

        let err = handshake.register("https://partner.example", "0000").await.unwrap_err();
        assert_matches!(err, Error::Internal(_));
        assert_eq!(*authority.poll_count.lock(), 0);
        assert_eq!(handshake.state(), HandshakeState::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_poll_status() {
        let authority = ScriptedAuthority::new(
            RegistrationStatus::Created,
            vec![RegistrationStatus::Created, RegistrationStatus::Unexpected(500)],
        );
        let handshake = handshake(authority);

        let err = handshake.register("https://partner.example", "0000").await.unwrap_err();
        assert_matches!(err, Error::Internal(_));
        assert_eq!(handshake.state(), HandshakeState::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_deadline() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Created, vec![]);
        let handshake = handshake(authority.clone());

        let begin = Instant::now();
        let err = handshake.register("https://partner.example", "0000").await.unwrap_err();

        assert_matches!(err, Error::GatewayTimeout(_));
        assert!(begin.elapsed() >= Duration::from_secs(60));
        assert!(begin.elapsed() < Duration::from_secs(62));
        assert_eq!(*authority.poll_count.lock(), 60);
        assert_eq!(handshake.state(), HandshakeState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_handshake_is_rejected_while_polling() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Created, vec![]);
        let handshake = handshake(authority.clone());

        let (first, second) = tokio::join!(
            handshake.register("https://partner.example", "0000"),
            handshake.register("https://other.example", "1111"),
        );

        assert_matches!(first, Err(Error::GatewayTimeout(_)));
        assert_matches!(second, Err(Error::Conflict { .. }));
        assert_eq!(authority.started.lock().len(), 1);
        assert_eq!(handshake.state(), HandshakeState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_is_rejected() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Created, vec![]);
        let handshake = RegistrationHandshake::new(
            authority.clone(),
            Duration::from_secs(1),
            Duration::from_secs(u64::MAX),
        );

        assert_matches!(
            handshake.register("https://partner.example", "0000").await,
            Err(Error::Configuration(_))
        );
        assert!(authority.started.lock().is_empty());
        assert_eq!(handshake.state(), HandshakeState::Idle);
    }

    #[tokio::test]
    async fn test_malformed_url() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Created, vec![]);
        let handshake = handshake(authority.clone());

        for url in ["not a url", "ftp://partner.example", "file:///etc/passwd"] {
            assert_matches!(handshake.register(url, "0000").await, Err(Error::BadRequest(_)));
        }
        assert!(authority.started.lock().is_empty());
        assert_eq!(handshake.state(), HandshakeState::Idle);
    }

    #[test]
    fn test_issue_token_replaces_previous() {
        let authority = ScriptedAuthority::new(RegistrationStatus::Created, vec![]);
        let handshake = handshake(authority);
        let first = handshake.issue_token();
        let second = handshake.issue_token();
        assert_eq!(*handshake.token.lock(), second);
        assert_eq!(first.len(), second.len());
    }
}
