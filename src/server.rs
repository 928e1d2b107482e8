//! Proxy orchestration.
//!
//! [`QueryHandler`] holds the per-query decision flow: static rules, the
//! decision cache, then feature extraction and scoring on a miss. Blocked
//! domains are answered locally; everything else is forwarded. The UDP and
//! TCP listeners only move bytes in and out of the handler.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::DecisionCache;
use crate::config::{AaaaPolicy, Config, UpstreamFailurePolicy};
use crate::dns::codec::{self, Query};
use crate::dns::{DomainRules, Forwarder, RuleMatch};
use crate::error::{ForwardError, ModelError, Result};
use crate::features::FeatureProvider;
use crate::model::TreeEnsemble;
use crate::stats::{AuditLog, AuditSink, Outcome, Stats};
use crate::verdict::Verdict;

/// Largest query accepted on the UDP listener.
const MAX_UDP_QUERY: usize = 4096;

/// Decision and forwarding policy applied to every query.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Scores at or above this value are blocked.
    pub threshold: f64,
    pub cache_ttl: Duration,
    /// TTL of the synthesized null-address record.
    pub blocked_ttl: u32,
    pub blocked_aaaa: AaaaPolicy,
    pub upstream: SocketAddr,
    pub secondary: Option<SocketAddr>,
    pub forward_timeout: Duration,
    pub on_upstream_failure: UpstreamFailurePolicy,
}

impl HandlerSettings {
    /// Defaults matching an empty configuration, forwarding to `upstream`.
    pub fn new(upstream: SocketAddr) -> Self {
        Self {
            threshold: 0.5,
            cache_ttl: Duration::from_secs(300),
            blocked_ttl: 300,
            blocked_aaaa: AaaaPolicy::default(),
            upstream,
            secondary: None,
            forward_timeout: Duration::from_secs(3),
            on_upstream_failure: UpstreamFailurePolicy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.threshold,
            cache_ttl: config.cache_ttl(),
            blocked_ttl: config.blocked_ttl_seconds,
            blocked_aaaa: config.blocked_aaaa,
            upstream: config.upstream_resolver,
            secondary: config.secondary_resolver,
            forward_timeout: config.forward_timeout(),
            on_upstream_failure: config.on_upstream_failure,
        }
    }

    const fn failure_rcode(&self) -> ResponseCode {
        match self.on_upstream_failure {
            UpstreamFailurePolicy::Servfail => ResponseCode::ServFail,
            UpstreamFailurePolicy::Refused => ResponseCode::Refused,
        }
    }
}

/// DNS query handler that processes queries using the provided dependencies.
///
/// This struct encapsulates the decision logic, separated from the sockets
/// for easier testing. Clones share every component.
pub struct QueryHandler<C, F, P>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    cache: C,
    forwarder: F,
    features: Arc<P>,
    model: Arc<TreeEnsemble>,
    rules: Arc<DomainRules>,
    stats: Arc<Stats>,
    audit: Arc<dyn AuditSink>,
    settings: Arc<HandlerSettings>,
}

impl<C, F, P> QueryHandler<C, F, P>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    /// Create a handler with no static rules and a `tracing`-only audit log.
    ///
    /// Fails when the provider and the model disagree on the vector length.
    pub fn new(
        cache: C,
        forwarder: F,
        features: P,
        model: TreeEnsemble,
        settings: HandlerSettings,
    ) -> std::result::Result<Self, ModelError> {
        if features.feature_count() != model.feature_count() {
            return Err(ModelError::FeatureMismatch {
                expected: model.feature_count(),
                actual: features.feature_count(),
            });
        }

        Ok(Self {
            cache,
            forwarder,
            features: Arc::new(features),
            model: Arc::new(model),
            rules: Arc::new(DomainRules::default()),
            stats: Arc::new(Stats::new()),
            audit: Arc::new(AuditLog::new()),
            settings: Arc::new(settings),
        })
    }

    #[must_use]
    pub fn with_rules(mut self, rules: DomainRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: impl AuditSink) -> Self {
        self.audit = Arc::new(audit);
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    /// Decide and answer a decoded query. Always yields exactly one response.
    #[instrument(skip(self, query), fields(domain = %query.domain(), id = query.id()))]
    pub async fn handle_query(&self, query: &Query) -> Vec<u8> {
        let verdict = self.decide(query.domain());

        if verdict.is_blocked() {
            debug!(score = verdict.score(), source = %verdict.source(), "blocking");
            self.finish(&verdict, Outcome::Blocked);
            return codec::encode_blocked(
                query,
                self.settings.blocked_ttl,
                self.settings.blocked_aaaa,
            );
        }

        match self.forward(query).await {
            Ok(answer) => {
                self.finish(&verdict, Outcome::Allowed);
                codec::encode_forwarded_answer(query, &answer)
            }
            Err(err) => {
                warn!("forwarding failed: {err}");
                self.finish(&verdict, Outcome::Errored);
                codec::encode_error(query, self.settings.failure_rcode())
            }
        }
    }

    /// Decode and answer a packet; `None` when it is not a valid query.
    pub async fn handle_packet(&self, bytes: &[u8], source: SocketAddr) -> Option<Vec<u8>> {
        let query = self.decode(bytes, source)?;
        Some(self.handle_query(&query).await)
    }

    /// Like [`handle_packet`](Self::handle_packet), but answers that exceed
    /// the client's UDP payload limit are replaced by a truncated response.
    pub async fn handle_datagram(&self, bytes: &[u8], source: SocketAddr) -> Option<Vec<u8>> {
        let query = self.decode(bytes, source)?;
        let response = self.handle_query(&query).await;
        if response.len() > usize::from(query.max_udp_payload()) {
            debug!(
                domain = query.domain(),
                size = response.len(),
                limit = query.max_udp_payload(),
                "answer too large for UDP, truncating"
            );
            return Some(codec::encode_truncated(&query));
        }
        Some(response)
    }

    fn decode(&self, bytes: &[u8], source: SocketAddr) -> Option<Query> {
        match codec::decode(bytes, source) {
            Ok(query) => Some(query),
            Err(err) => {
                debug!(%source, len = bytes.len(), "dropping malformed query: {err}");
                self.stats.record(Outcome::Errored);
                None
            }
        }
    }

    fn decide(&self, domain: &str) -> Verdict {
        if let Some(rule) = self.rules.check(domain) {
            return Verdict::rule(domain, rule == RuleMatch::Deny);
        }

        if let Some(cached) = self.cache.lookup(domain) {
            self.stats.record_cache(true);
            return cached.from_cache();
        }
        self.stats.record_cache(false);

        let features = self.features.extract(domain);
        match self.model.score(&features) {
            Ok(score) => {
                let verdict = Verdict::scored(domain, score, self.settings.threshold);
                self.cache
                    .store(domain, verdict.clone(), self.settings.cache_ttl);
                verdict
            }
            Err(err) => {
                error!("scoring failed, letting query through: {err}");
                Verdict::passthrough(domain)
            }
        }
    }

    async fn forward(&self, query: &Query) -> std::result::Result<Vec<u8>, ForwardError> {
        let settings = &self.settings;
        let primary = self
            .forwarder
            .forward(query, settings.upstream, settings.forward_timeout)
            .await;

        match (primary, settings.secondary) {
            (Err(err), Some(secondary)) => {
                debug!(upstream = %settings.upstream, "primary upstream failed: {err}");
                self.forwarder
                    .forward(query, secondary, settings.forward_timeout)
                    .await
            }
            (result, _) => result,
        }
    }

    fn finish(&self, verdict: &Verdict, outcome: Outcome) {
        self.stats.record(outcome);
        self.audit.record(verdict, outcome);
    }
}

impl<C, F, P> Clone for QueryHandler<C, F, P>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            forwarder: self.forwarder.clone(),
            features: Arc::clone(&self.features),
            model: Arc::clone(&self.model),
            rules: Arc::clone(&self.rules),
            stats: Arc::clone(&self.stats),
            audit: Arc::clone(&self.audit),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Listener limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP queries processed at the same time; further datagrams wait.
    pub max_concurrent_queries: usize,
    /// A TCP connection with no complete query for this long is closed.
    pub tcp_idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 1024,
            tcp_idle_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_queries: config.max_concurrent_queries,
            ..Self::default()
        }
    }
}

/// Serve DNS over UDP, one task per datagram.
pub async fn run_udp<C, F, P>(
    socket: Arc<UdpSocket>,
    handler: QueryHandler<C, F, P>,
    config: &ServerConfig,
) -> Result<()>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries.max(1)));
    let mut buf = vec![0u8; MAX_UDP_QUERY];
    info!(addr = %socket.local_addr()?, "UDP listener started");

    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!("UDP receive failed: {err}");
                continue;
            }
        };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let packet = buf[..len].to_vec();
        let handler = handler.clone();
        let socket = Arc::clone(&socket);

        tokio::spawn(async move {
            let _permit = permit;
            let Some(response) = handler.handle_datagram(&packet, source).await else {
                return;
            };
            if let Err(err) = socket.send_to(&response, source).await {
                warn!(%source, "failed to send response: {err}");
            }
        });
    }

    Ok(())
}

/// Serve DNS over TCP with two-byte length framing, one task per connection.
pub async fn run_tcp<C, F, P>(
    listener: TcpListener,
    handler: QueryHandler<C, F, P>,
    config: &ServerConfig,
) -> Result<()>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    info!(addr = %listener.local_addr()?, "TCP listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("TCP accept failed: {err}");
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let handler = handler.clone();
        let idle_timeout = config.tcp_idle_timeout;
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, peer, &handler, idle_timeout).await {
                debug!(%peer, "TCP connection closed: {err}");
            }
        });
    }
}

async fn serve_connection<C, F, P>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: &QueryHandler<C, F, P>,
    idle_timeout: Duration,
) -> io::Result<()>
where
    C: DecisionCache,
    F: Forwarder,
    P: FeatureProvider,
{
    loop {
        let mut prefix = [0u8; 2];
        match tokio::time::timeout(idle_timeout, stream.read_exact(&mut prefix)).await {
            Err(_) => return Ok(()),
            Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(err),
            Ok(Ok(_)) => {}
        }

        let mut packet = vec![0u8; usize::from(u16::from_be_bytes(prefix))];
        tokio::time::timeout(idle_timeout, stream.read_exact(&mut packet))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "incomplete query"))??;

        // A malformed query gets no answer; the client is not worth keeping.
        let Some(response) = handler.handle_packet(&packet, peer).await else {
            return Ok(());
        };
        let Ok(len) = u16::try_from(response.len()) else {
            warn!(%peer, size = response.len(), "answer too large for TCP framing");
            continue;
        };

        let mut framed = Vec::with_capacity(response.len() + 2);
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&response);
        stream.write_all(&framed).await?;
    }
}
