//! Startup and authentication exchange
//!
//! The requester opens with Startup, the responder echoes it with the
//! session id, then the requester sends `Authent(Ask)` carrying its host id,
//! key and announced version. The responder checks the key against the host
//! table and answers with its own credentials. Both sides then derive the
//! same [`PartnerCapability`] and switch to its dialect.

use std::fmt;
use std::net::IpAddr;

use r66_common::digest::{DigestAlgo, auth_key, keys_match};
use r66_common::packet::{AuthentPacket, Packet, StartupPacket, Way};
use r66_common::partner::{PartnerCache, PartnerCapability};
use r66_common::DEFAULT_FIELD_SEPARATOR;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::constants::*;
use crate::context::ServerContext;
use crate::db::hosts::HostRecord;
use crate::error::{R66Error, Result};
use crate::session::{Session, unexpected};

/// Credentials and capability a requester presents
#[derive(Clone)]
pub struct Identity {
    pub host_id: String,
    secret: String,
    pub capability: PartnerCapability,
    announced: String,
}

impl Identity {
    pub fn new(host_id: &str, secret: &str, digest: DigestAlgo) -> Self {
        let capability = PartnerCapability::local(host_id, digest, DEFAULT_FIELD_SEPARATOR, false);
        Self::with_capability(secret, capability)
    }

    /// Identity of this server on a plain or TLS channel
    pub fn from_context(ctx: &ServerContext, tls: bool) -> Self {
        Self::with_capability(&ctx.config.host_secret, ctx.local_capability(tls))
    }

    fn with_capability(secret: &str, capability: PartnerCapability) -> Self {
        Self {
            host_id: capability.host_id.clone(),
            secret: secret.to_string(),
            announced: capability.announce(),
            capability,
        }
    }

    /// Announce `version` verbatim and use only what it supports
    ///
    /// Used to talk to a partner as an older release would.
    pub fn with_version(mut self, version: &str) -> Self {
        self.capability =
            PartnerCapability::negotiate(&self.host_id, version, self.capability.digest);
        self.announced = version.to_string();
        self
    }

    /// Key sent in `Authent(Ask)`
    pub fn key(&self) -> String {
        auth_key(&self.secret)
    }

    pub fn announced(&self) -> &str {
        &self.announced
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("host_id", &self.host_id)
            .field("announced", &self.announced)
            .finish_non_exhaustive()
    }
}

// ========================================================================
// Responder
// ========================================================================

/// Authenticate an inbound partner
///
/// Returns the partner's host record. The session is switched to the agreed
/// dialect before returning.
///
/// # Errors
///
/// Returns [`R66Error::BadAuthentication`] for an unknown, inactive or
/// wrongly keyed host; the failure counts toward the address blacklist.
pub async fn accept<R, W>(
    session: &mut Session<R, W>,
    ctx: &ServerContext,
    peer_ip: IpAddr,
    session_id: u32,
) -> Result<HostRecord>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match session.recv().await? {
        Packet::Startup(_) => {}
        other => return Err(unexpected(&session.state, &other)),
    }
    session
        .send(&Packet::Startup(StartupPacket {
            session_id,
            tls: session.tls,
        }))
        .await?;

    let ask = match session.recv().await? {
        Packet::Authent(ask) if ask.way == Way::Ask => ask,
        other => return Err(unexpected(&session.state, &other)),
    };

    let host_id = ctx.db.aliases.resolve(&ask.host_id).await?;
    let host = match ctx.db.hosts.get(&host_id).await? {
        Some(host) if host.active => host,
        _ => {
            reject(ctx, peer_ip, &ask.host_id);
            return Err(R66Error::BadAuthentication(format!("{ERR_UNKNOWN_HOST}{}", ask.host_id)));
        }
    };
    if !keys_match(&host.host_key, &ask.key) {
        reject(ctx, peer_ip, &host.host_id);
        return Err(R66Error::BadAuthentication(format!("{ERR_BAD_KEY}{}", host.host_id)));
    }
    ctx.admission.record_good_auth(peer_ip);

    let capability = ctx
        .partners
        .resolve(&host.host_id, &ask.version, ctx.config.digest);
    if capability.proxied || host.proxified {
        ctx.admission.disable_blacklist();
    }
    let local = ctx.local_capability(session.tls);
    let agreed = capability.common_with(&local);
    let announce = PartnerCapability {
        digest: agreed.digest,
        ..local
    }
    .announce();

    session
        .send(&Packet::Authent(AuthentPacket {
            host_id: ctx.local_host_id(session.tls).to_string(),
            key: auth_key(&ctx.config.host_secret),
            local_id: session_id,
            way: Way::Answer,
            version: announce,
        }))
        .await?;

    debug!(
        host = %host.host_id,
        version = %agreed.version,
        json = agreed.use_json,
        digest = agreed.digest.as_str(),
        "partner authenticated"
    );
    session.set_partner(agreed);
    Ok(host)
}

fn reject(ctx: &ServerContext, peer_ip: IpAddr, host_id: &str) {
    if ctx.admission.record_bad_auth(peer_ip) {
        warn!(peer = %peer_ip, host = %host_id, "address blacklisted after failed authentications");
    } else {
        debug!(peer = %peer_ip, host = %host_id, "authentication failed");
    }
}

// ========================================================================
// Requester
// ========================================================================

/// Authenticate to a partner
///
/// # Errors
///
/// Returns [`R66Error::BadAuthentication`] when the partner answers with an
/// unexpected host id or key, or the partner's error.
pub async fn initiate<R, W>(
    session: &mut Session<R, W>,
    identity: &Identity,
    partner: &HostRecord,
    partners: &PartnerCache,
) -> Result<PartnerCapability>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    session
        .send(&Packet::Startup(StartupPacket {
            session_id: 0,
            tls: session.tls,
        }))
        .await?;
    let session_id = match session.recv().await? {
        Packet::Startup(startup) => startup.session_id,
        other => return Err(unexpected(&session.state, &other)),
    };

    session
        .send(&Packet::Authent(AuthentPacket {
            host_id: identity.host_id.clone(),
            key: identity.key(),
            local_id: session_id,
            way: Way::Ask,
            version: identity.announced.clone(),
        }))
        .await?;
    let answer = match session.recv().await? {
        Packet::Authent(answer) if answer.way == Way::Answer => answer,
        other => return Err(unexpected(&session.state, &other)),
    };

    if answer.host_id != partner.host_id {
        return Err(R66Error::BadAuthentication(format!(
            "{ERR_UNKNOWN_HOST}{} (expected {})",
            answer.host_id, partner.host_id
        )));
    }
    if !keys_match(&partner.host_key, &answer.key) {
        return Err(R66Error::BadAuthentication(format!("{ERR_BAD_KEY}{}", partner.host_id)));
    }

    let capability =
        partners.resolve(&partner.host_id, &answer.version, identity.capability.digest);
    let agreed = capability.common_with(&identity.capability);
    session.set_partner(agreed.clone());
    Ok(agreed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::create_test_context;
    use r66_common::packet::Dialect;
    use std::sync::Arc;

    fn host(host_id: &str, secret: &str) -> HostRecord {
        HostRecord {
            host_id: host_id.into(),
            address: "127.0.0.1".into(),
            port: 6666,
            ssl: false,
            host_key: auth_key(secret),
            admin: false,
            client: false,
            proxified: false,
            active: true,
        }
    }

    async fn responder() -> Arc<ServerContext> {
        let config = ServerConfig {
            host_id: "hostB".into(),
            host_secret: "secretB".into(),
            ..ServerConfig::default()
        };
        let ctx = create_test_context(config).await;
        ctx.db.hosts.upsert(&host("hostA", "secretA")).await.unwrap();
        ctx
    }

    async fn handshake(
        ctx: &Arc<ServerContext>,
        identity: Identity,
    ) -> (Result<HostRecord>, Result<PartnerCapability>, Dialect, Dialect) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = Session::over(a, false);
        let mut server = Session::over(b, false);
        let partner = host("hostB", "secretB");
        let cache = PartnerCache::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        // each side reports its failure so the other never waits on a dead peer
        let server_side = async {
            let result = accept(&mut server, ctx, ip, 7).await;
            if let Err(err) = &result {
                server.abort(err).await;
            }
            result
        };
        let client_side = async {
            let result = initiate(&mut client, &identity, &partner, &cache).await;
            if let Err(err) = &result {
                client.abort(err).await;
            }
            result
        };
        let (accepted, initiated) = tokio::join!(server_side, client_side);
        (
            accepted,
            initiated,
            server.dialect().clone(),
            client.dialect().clone(),
        )
    }

    #[tokio::test]
    async fn test_current_partners_agree_on_json() {
        let ctx = responder().await;
        let identity = Identity::new("hostA", "secretA", DigestAlgo::Sha512);
        let (accepted, initiated, server, client) = handshake(&ctx, identity).await;

        assert_eq!(accepted.unwrap().host_id, "hostA");
        let agreed = initiated.unwrap();
        assert!(agreed.use_json);
        // the responder adopts the digest the requester announced
        assert_eq!(agreed.digest, DigestAlgo::Sha512);
        assert_eq!(server, client);
        assert_eq!(server, Dialect::json(";"));
    }

    #[tokio::test]
    async fn test_old_partner_gets_legacy_blank() {
        let ctx = responder().await;
        let identity = Identity::new("hostA", "secretA", DigestAlgo::Sha256).with_version("2.4.12");
        let (accepted, initiated, server, client) = handshake(&ctx, identity).await;

        accepted.unwrap();
        let agreed = initiated.unwrap();
        assert!(!agreed.use_json);
        assert_eq!(server, Dialect::legacy(" "));
        assert_eq!(client, Dialect::legacy(" "));
    }

    #[tokio::test]
    async fn test_bad_key_rejected_and_counted() {
        let ctx = responder().await;
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        for _ in 0..ctx.config.bad_auth_threshold {
            let identity = Identity::new("hostA", "wrong", DigestAlgo::Sha256);
            let (accepted, _initiated, _, _) = handshake(&ctx, identity).await;
            assert!(matches!(accepted, Err(R66Error::BadAuthentication(_))));
        }
        assert!(ctx.admission.is_blacklisted(ip));
    }

    #[tokio::test]
    async fn test_unknown_host_rejected() {
        let ctx = responder().await;
        let identity = Identity::new("hostZ", "secretA", DigestAlgo::Sha256);
        let (accepted, _, _, _) = handshake(&ctx, identity).await;
        match accepted {
            Err(R66Error::BadAuthentication(msg)) => assert!(msg.contains("hostZ")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requester_checks_responder_key() {
        let ctx = responder().await;
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut client = Session::over(a, false);
        let mut server = Session::over(b, false);
        let identity = Identity::new("hostA", "secretA", DigestAlgo::Sha256);
        let impostor = host("hostB", "not-the-secret");
        let cache = PartnerCache::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        let (accepted, initiated) = tokio::join!(
            accept(&mut server, &ctx, ip, 1),
            initiate(&mut client, &identity, &impostor, &cache)
        );
        accepted.unwrap();
        assert!(matches!(initiated, Err(R66Error::BadAuthentication(_))));
    }

    #[test]
    fn test_identity_debug_hides_secret() {
        let identity = Identity::new("hostA", "topsecret", DigestAlgo::Sha256);
        assert!(!format!("{identity:?}").contains("topsecret"));
    }
}
