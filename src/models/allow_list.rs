use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowListError {
    #[error("allow-list is empty")]
    Missing,
    #[error("allow-list entry {0:?} is not an IP address")]
    Malformed(String),
}

/// Client addresses permitted to reach the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    ips: Vec<IpAddr>,
}

impl AllowList {
    pub fn new(ips: Vec<IpAddr>) -> Result<Self, AllowListError> {
        if ips.is_empty() {
            return Err(AllowListError::Missing);
        }
        Ok(Self { ips })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.ips.iter().any(|allowed| canonical(*allowed) == ip)
    }

    /// Like [`AllowList::contains`] for a raw header value. Anything that
    /// doesn't parse (including `unknown`) is refused.
    pub fn contains_str(&self, ip: &str) -> bool {
        ip.trim()
            .parse::<IpAddr>()
            .map(|ip| self.contains(ip))
            .unwrap_or(false)
    }

    pub fn ips(&self) -> &[IpAddr] {
        &self.ips
    }
}

impl FromStr for AllowList {
    type Err = AllowListError;

    /// Parses `"10.0.0.1, 10.0.0.2"`. Blank entries are skipped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ips = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<IpAddr>()
                    .map_err(|_| AllowListError::Malformed(entry.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ips)
    }
}

// ::ffff:a.b.c.d and a.b.c.d are the same caller
pub(crate) fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}
