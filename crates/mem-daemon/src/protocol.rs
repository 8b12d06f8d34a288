use embeddings_client::ProviderStatsSnapshot;
use serde::{Deserialize, Serialize};

/// Monotonically increasing wire version; any mismatch triggers a daemon
/// restart on the client side.
pub const PROTOCOL_VERSION: u32 = 1;

pub const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One request per line, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Ping {
        protocol_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Shutdown {
        protocol_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Run {
        protocol_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
        argv: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdin: Option<String>,
    },
}

impl Request {
    pub fn ping() -> Self {
        Self::Ping {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(DAEMON_VERSION.to_string()),
        }
    }

    pub fn shutdown() -> Self {
        Self::Shutdown {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(DAEMON_VERSION.to_string()),
        }
    }

    pub fn run(argv: Vec<String>, stdin: Option<String>) -> Self {
        Self::Run {
            protocol_version: PROTOCOL_VERSION,
            client_version: Some(DAEMON_VERSION.to_string()),
            argv,
            stdin,
        }
    }

    pub fn protocol_version(&self) -> u32 {
        match self {
            Self::Ping {
                protocol_version, ..
            }
            | Self::Shutdown {
                protocol_version, ..
            }
            | Self::Run {
                protocol_version, ..
            } => *protocol_version,
        }
    }

    pub fn client_version(&self) -> Option<&str> {
        match self {
            Self::Ping { client_version, .. }
            | Self::Shutdown { client_version, .. }
            | Self::Run { client_version, .. } => client_version.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub ok: bool,
    pub protocol_version: u32,
    pub daemon_version: String,
    pub pid: u32,
    pub started_at: i64,
    pub embeddings: ProviderStatsSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_required: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_required: Option<bool>,
}

#[cfg(test)]
mod unit_tests {
    use super::{Request, PROTOCOL_VERSION};

    #[test]
    fn requests_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&Request::ping()).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains(&format!("\"protocolVersion\":{PROTOCOL_VERSION}")));
    }

    #[test]
    fn run_requests_round_trip() {
        let request = Request::run(
            vec!["search".to_string(), "kiwi".to_string()],
            Some("piped input".to_string()),
        );
        let json = serde_json::to_string(&request).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        match parsed {
            Request::Run { argv, stdin, .. } => {
                assert_eq!(argv, vec!["search", "kiwi"]);
                assert_eq!(stdin.as_deref(), Some("piped input"));
            }
            other => panic!("expected run request, got {other:?}"),
        }
    }

    #[test]
    fn missing_optional_fields_deserialize_as_none() {
        let parsed: Request =
            serde_json::from_str("{\"type\":\"ping\",\"protocolVersion\":1}").unwrap();
        assert_eq!(parsed.client_version(), None);
        assert_eq!(parsed.protocol_version(), 1);
    }
}
