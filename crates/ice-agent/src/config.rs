use std::time::Duration;

/// Which candidate this agent's role makes it harvest/offer. Mirrors RFC 8445 §8.3's
/// controlling/controlled split, not to be confused with full/lite below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

/// RFC 8445 §2.7: a lite implementation never sends its own connectivity checks and always has
/// exactly one host candidate; the overwhelming majority of agents (including this one, by
/// default) are full implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceMode {
    Full,
    Lite,
}

/// Chooses which valid pair per component gets nominated, once any exist (RFC 8445 §8.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominationStrategy {
    /// Nominate the first pair that becomes valid. Lowest latency to a usable pair, may settle
    /// on a worse path than one that validates slightly later.
    FirstValid,
    /// Wait until every pair in the checklist has either succeeded or failed, then nominate the
    /// highest-priority valid pair. The default — matches most browsers' behavior.
    HighestPriority,
    /// Nominate the highest-priority pair only once the checklist has reached `Completed`.
    AfterChecklistCompletion,
}

impl Default for NominationStrategy {
    fn default() -> Self {
        NominationStrategy::HighestPriority
    }
}

/// STUN/TURN retransmission timers (RFC 8445 §14, RFC 8489 §6.2.1).
#[derive(Debug, Clone, Copy)]
pub struct RtoConfig {
    pub initial_rto: Duration,
    pub max_rto: Duration,
    pub max_retransmits: u32,
}

impl Default for RtoConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(100),
            max_rto: Duration::from_millis(1600),
            max_retransmits: 6,
        }
    }
}

/// A STUN or TURN server to harvest reflexive/relayed candidates from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: std::net::SocketAddr,
    pub credentials: Option<TurnCredentials>,
}

#[derive(Debug, Clone)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    /// Set once the server's 401 response supplies it; `None` before the first Allocate.
    pub realm: Option<String>,
    pub nonce: Option<String>,
}

impl TurnCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into(), realm: None, nonce: None }
    }
}

/// Configuration for one [`crate::agent::IceAgent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub role: IceRole,
    pub mode: IceMode,
    pub nomination: NominationStrategy,
    pub rto: RtoConfig,
    /// Pacing interval between originating successive connectivity checks (RFC 8445 §14, `Ta`).
    pub pacing: Duration,
    pub stun_servers: Vec<ServerConfig>,
    pub turn_servers: Vec<ServerConfig>,
    /// Skip host candidates whose address falls in CGNAT (100.64.0.0/10) or other
    /// non-globally-routable private ranges that would never be reachable by a remote peer.
    pub filter_private_addresses: bool,
    /// Drop remote candidates signaled via `add_remote_candidate` whose address is CGNAT
    /// (100.64.0.0/10).
    pub skip_remote_cgnat: bool,
    /// Drop remote candidates whose address is RFC 1918 private space.
    pub skip_remote_private_hosts: bool,
    /// Drop remote candidates whose address isn't globally routable at all (private, CGNAT,
    /// loopback, or link-local) — the broadest of the three remote filters.
    pub skip_remote_non_public_hosts: bool,
    /// Interval at which STUN consent-freshness checks (RFC 7675) are sent on the nominated
    /// pair once a stream has completed.
    pub consent_freshness_interval: Duration,
    /// Caps each stream's checklist at this many pairs (RFC 8445 §6.1.2.5), pruning the
    /// lowest-priority pairs first once redundant pairs have already been removed.
    pub max_checklist_size: usize,
    /// How long after a stream finishes (or fails) this agent keeps its non-selected candidate
    /// sockets open before tearing them down, in case a late triggered check still needs
    /// answering.
    pub termination_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            role: IceRole::Controlling,
            mode: IceMode::Full,
            nomination: NominationStrategy::default(),
            rto: RtoConfig::default(),
            pacing: Duration::from_millis(50),
            stun_servers: Vec::new(),
            turn_servers: Vec::new(),
            filter_private_addresses: false,
            skip_remote_cgnat: false,
            skip_remote_private_hosts: false,
            skip_remote_non_public_hosts: false,
            consent_freshness_interval: Duration::from_secs(5),
            max_checklist_size: 100,
            termination_delay: Duration::from_secs(5),
        }
    }
}
