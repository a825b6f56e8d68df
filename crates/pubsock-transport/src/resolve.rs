use crate::error::{Result, TransportError};

/// Host token that means "every local interface" when binding.
pub const WILDCARD_HOST: &str = "*";

const TCP_SCHEME: &str = "tcp://";

/// Turns an endpoint URI into a `(host, port)` pair.
///
/// Implementations must fail when the URI cannot be parsed; they never touch
/// the network.
pub trait Resolver {
    fn resolve(&self, uri: &str) -> Result<(String, u16)>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Result<(String, u16)>,
{
    fn resolve(&self, uri: &str) -> Result<(String, u16)> {
        self(uri)
    }
}

/// Default resolver for `tcp://host:port`, `host:port` and `*:port`.
///
/// IPv6 literals must be bracketed (`tcp://[::1]:9000`).
#[derive(Debug, Clone, Copy, Default)]
pub struct UriResolver;

impl Resolver for UriResolver {
    fn resolve(&self, uri: &str) -> Result<(String, u16)> {
        let fail = |reason: &str| TransportError::Resolution {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = uri.trim();
        let authority = match trimmed.find("://") {
            Some(_) => trimmed
                .strip_prefix(TCP_SCHEME)
                .ok_or_else(|| fail("only the tcp:// scheme is supported"))?,
            None => trimmed,
        };
        let authority = authority.trim_end_matches('/');

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| fail("unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| fail("missing port"))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| fail("missing port"))?
        };

        if host.is_empty() {
            return Err(fail("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| fail("port is not a number in 0..=65535"))?;

        Ok((host.to_string(), port))
    }
}
