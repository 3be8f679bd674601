use serde::Serialize;
use std::net::IpAddr;

use super::allow_list::canonical;
use crate::config::UserConfig;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub ip: String,
}

/// Fixed set of known people and the workstation address each one uses.
#[derive(Clone, Debug, Default)]
pub struct UserDirectory {
    users: Vec<User>,
}

impl UserDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    pub fn from_config(users: &[UserConfig]) -> Self {
        Self::new(
            users
                .iter()
                .map(|u| User {
                    name: u.name.clone(),
                    ip: u.ip.trim().to_string(),
                })
                .collect(),
        )
    }

    /// Matches addresses the way the allow-list does, so an IPv4-mapped
    /// caller finds the owner of the plain IPv4 entry.
    pub fn find_user_by_ip(&self, ip: &str) -> Option<&User> {
        let wanted = parse_canonical(ip);
        self.users.iter().find(|user| match (wanted, parse_canonical(&user.ip)) {
            (Some(wanted), Some(known)) => wanted == known,
            _ => user.ip == ip.trim(),
        })
    }

    pub fn find_user_by_name(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|user| user.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.users.iter().map(|user| user.name.clone()).collect()
    }
}

fn parse_canonical(ip: &str) -> Option<IpAddr> {
    ip.trim().parse::<IpAddr>().ok().map(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> UserDirectory {
        UserDirectory::from_config(&[
            UserConfig {
                name: "alice".to_string(),
                ip: "172.21.25.25".to_string(),
            },
            UserConfig {
                name: "bob".to_string(),
                ip: " 172.21.24.18 ".to_string(),
            },
        ])
    }

    #[test]
    fn test_lookup_by_ip_and_name() {
        let users = directory();
        assert_eq!(users.find_user_by_ip("172.21.24.18").unwrap().name, "bob");
        assert_eq!(users.find_user_by_name("alice").unwrap().ip, "172.21.25.25");
        assert!(users.find_user_by_ip("10.0.0.1").is_none());
        assert!(users.find_user_by_name("carol").is_none());
    }

    #[test]
    fn test_lookup_by_mapped_or_ipv6_address() {
        let users = UserDirectory::from_config(&[
            UserConfig {
                name: "alice".to_string(),
                ip: "172.21.25.25".to_string(),
            },
            UserConfig {
                name: "carol".to_string(),
                ip: "2001:db8::7".to_string(),
            },
        ]);
        assert_eq!(
            users.find_user_by_ip("::ffff:172.21.25.25").unwrap().name,
            "alice"
        );
        assert_eq!(
            users.find_user_by_ip("2001:0db8:0:0::7").unwrap().name,
            "carol"
        );
        assert!(users.find_user_by_ip("::ffff:172.21.25.26").is_none());
        assert!(users.find_user_by_ip("unknown").is_none());
    }

    #[test]
    fn test_names_keep_configured_order() {
        assert_eq!(directory().names(), vec!["alice", "bob"]);
    }
}
