use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for both transports, the shared retry schedule and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub http: HttpSettings,
    pub xmpp: XmppSettings,
    pub retry: RetrySettings,
    pub log: LogSettings,
}

/// Configuration settings for the HTTP transport.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HttpSettings {
    pub api_key: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Configuration settings for the persistent stream transport.
///
/// `debug` selects the testing endpoint instead of the production one.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct XmppSettings {
    pub sender_id: String,
    pub api_key: String,
    pub debug: bool,
    pub production_endpoint: String,
    pub testing_endpoint: String,
    pub command_capacity: usize,
    pub send_timeout_ms: u64,
    pub max_read_failures: u32,
}

impl XmppSettings {
    /// The endpoint selected by the `debug` flag.
    pub fn endpoint(&self) -> &str {
        if self.debug {
            &self.testing_endpoint
        } else {
            &self.production_endpoint
        }
    }
}

/// Backoff schedule shared by the HTTP retrier and stream reconnects.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrySettings {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub http: Option<PartialHttpSettings>,
    pub xmpp: Option<PartialXmppSettings>,
    pub retry: Option<PartialRetrySettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialHttpSettings {
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialXmppSettings {
    pub sender_id: Option<String>,
    pub api_key: Option<String>,
    pub debug: Option<bool>,
    pub production_endpoint: Option<String>,
    pub testing_endpoint: Option<String>,
    pub command_capacity: Option<usize>,
    pub send_timeout_ms: Option<u64>,
    pub max_read_failures: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRetrySettings {
    pub min_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let http = self.http;
        let xmpp = self.xmpp;
        let retry = self.retry;
        let log = self.log;

        Settings {
            http: HttpSettings {
                api_key: http
                    .as_ref()
                    .and_then(|h| h.api_key.clone())
                    .unwrap_or(defaults.http.api_key),
                endpoint: http
                    .as_ref()
                    .and_then(|h| h.endpoint.clone())
                    .unwrap_or(defaults.http.endpoint),
                timeout_secs: http
                    .as_ref()
                    .and_then(|h| h.timeout_secs)
                    .unwrap_or(defaults.http.timeout_secs),
            },
            xmpp: XmppSettings {
                sender_id: xmpp
                    .as_ref()
                    .and_then(|x| x.sender_id.clone())
                    .unwrap_or(defaults.xmpp.sender_id),
                api_key: xmpp
                    .as_ref()
                    .and_then(|x| x.api_key.clone())
                    .unwrap_or(defaults.xmpp.api_key),
                debug: xmpp
                    .as_ref()
                    .and_then(|x| x.debug)
                    .unwrap_or(defaults.xmpp.debug),
                production_endpoint: xmpp
                    .as_ref()
                    .and_then(|x| x.production_endpoint.clone())
                    .unwrap_or(defaults.xmpp.production_endpoint),
                testing_endpoint: xmpp
                    .as_ref()
                    .and_then(|x| x.testing_endpoint.clone())
                    .unwrap_or(defaults.xmpp.testing_endpoint),
                command_capacity: xmpp
                    .as_ref()
                    .and_then(|x| x.command_capacity)
                    .unwrap_or(defaults.xmpp.command_capacity),
                send_timeout_ms: xmpp
                    .as_ref()
                    .and_then(|x| x.send_timeout_ms)
                    .unwrap_or(defaults.xmpp.send_timeout_ms),
                max_read_failures: xmpp
                    .as_ref()
                    .and_then(|x| x.max_read_failures)
                    .unwrap_or(defaults.xmpp.max_read_failures),
            },
            retry: RetrySettings {
                min_backoff_ms: retry
                    .as_ref()
                    .and_then(|r| r.min_backoff_ms)
                    .unwrap_or(defaults.retry.min_backoff_ms),
                max_backoff_ms: retry
                    .as_ref()
                    .and_then(|r| r.max_backoff_ms)
                    .unwrap_or(defaults.retry.max_backoff_ms),
                max_attempts: retry
                    .as_ref()
                    .and_then(|r| r.max_attempts)
                    .unwrap_or(defaults.retry.max_attempts),
            },
            log: LogSettings {
                level: log
                    .and_then(|l| l.level)
                    .unwrap_or(defaults.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Credentials default to empty; clients refuse to start without them.
impl Default for Settings {
    fn default() -> Self {
        Self {
            http: HttpSettings {
                api_key: String::new(),
                endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
                timeout_secs: 30,
            },
            xmpp: XmppSettings {
                sender_id: String::new(),
                api_key: String::new(),
                debug: false,
                production_endpoint: "wss://fcm-xmpp.googleapis.com:5235".to_string(),
                testing_endpoint: "wss://fcm-xmpp.googleapis.com:5236".to_string(),
                command_capacity: 100,
                send_timeout_ms: 15_000,
                max_read_failures: 3,
            },
            retry: RetrySettings {
                min_backoff_ms: 100,
                max_backoff_ms: 60_000,
                max_attempts: 5,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
