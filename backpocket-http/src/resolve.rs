//! DNS resolver that refuses private network addresses.
//!
//! Plugged into the `reqwest` client, so the connection is made only to an
//! address that passed [`is_blocked_ip`]. A hostname that resolves solely to
//! private addresses fails with [`PrivateAddressError`].

use crate::guard::is_blocked_ip;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::error::Error as StdError;
use std::net::SocketAddr;

type BoxError = Box<dyn StdError + Send + Sync>;

pub(crate) const PRIVATE_ADDRESS_MARKER: &str = "resolves only to private network addresses";

#[derive(Debug, thiserror::Error)]
#[error("{host} {}", PRIVATE_ADDRESS_MARKER)]
pub struct PrivateAddressError {
    pub host: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GuardedResolver;

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await?
                .collect();
            let total = resolved.len();
            let allowed = public_addrs(resolved);
            if allowed.is_empty() {
                tracing::warn!(host = %host, resolved = total, "http.resolve.blocked");
                return Err(Box::new(PrivateAddressError { host }) as BoxError);
            }
            tracing::trace!(host = %host, resolved = total, allowed = allowed.len(), "http.resolve");
            let addrs: Addrs = Box::new(allowed.into_iter());
            Ok::<Addrs, BoxError>(addrs)
        })
    }
}

fn public_addrs(addrs: Vec<SocketAddr>) -> Vec<SocketAddr> {
    addrs
        .into_iter()
        .filter(|addr| !is_blocked_ip(addr.ip()))
        .collect()
}
