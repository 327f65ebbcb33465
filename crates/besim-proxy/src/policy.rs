//! Local-vs-remote routing policy for the HTTP proxy.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/proxyMiddleware.py`'s
//! `BEHAVIOUR` enum and `PROXY_URL_BEHAVIOUR` ordered regex table.

use regex::Regex;

/// How a request path should be routed between the local REST surface
/// and the real vendor cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Serve remote and local both; prefer remote on divergence.
    RemoteFirst,
    /// Serve remote and local both; prefer local on divergence.
    LocalFirst,
    /// Probe the local router first: if the path isn't one we serve,
    /// fall back to `OnlyRemote`; otherwise behave as `LocalFirst`.
    RemoteIfMissing,
    /// Never consult the local router.
    OnlyRemote,
    /// Never consult the upstream cloud.
    OnlyLocal,
}

/// One path-pattern rule. Order matters: the first matching pattern
/// wins, mirroring Python dict-iteration order over the original's
/// `PROXY_URL_BEHAVIOUR` table (insertion-ordered since 3.7).
pub struct Rule {
    pub pattern: Regex,
    pub behaviour: Behaviour,
}

/// The default routing table. `weather_override` lets the
/// `getWebTemperature.php` rule become `LocalFirst` once a
/// configured weather-station location makes the local simulator's
/// own reading authoritative, matching the original's constructor-time
/// table patch gated on `weather_location_latitude`.
pub fn default_rules(weather_override: bool) -> Vec<Rule> {
    let weather_behaviour = if weather_override { Behaviour::LocalFirst } else { Behaviour::RemoteFirst };
    vec![
        Rule { pattern: Regex::new(r"(?i)^/static").unwrap(), behaviour: Behaviour::OnlyLocal },
        Rule { pattern: Regex::new(r"(?i)^/(index\.html)?$").unwrap(), behaviour: Behaviour::OnlyLocal },
        Rule { pattern: Regex::new(r"(?i)^/api/v1\.0/").unwrap(), behaviour: Behaviour::OnlyLocal },
        Rule {
            pattern: Regex::new(r"(?i)^/fwUpgrade/PR06549/version\.txt").unwrap(),
            behaviour: Behaviour::LocalFirst,
        },
        Rule {
            pattern: Regex::new(r"(?i)^/WifiBoxInterface_vokera/getWebTemperature\.php").unwrap(),
            behaviour: weather_behaviour,
        },
    ]
}

/// Returns the first matching rule's behaviour, or [`Behaviour::RemoteIfMissing`]
/// if nothing matches — the original's table-miss default.
pub fn check_behaviour(rules: &[Rule], path: &str) -> Behaviour {
    for rule in rules {
        if rule.pattern.is_match(path) {
            return rule.behaviour;
        }
    }
    Behaviour::RemoteIfMissing
}

/// Matches a `Host` header that addresses this simulator itself
/// (its own container hostname, loopback, or `localhost`), in which
/// case the proxy should not even consult the routing table — every
/// such request is served locally. Grounded on the original's inline
/// `__call__` regex on `HTTP_HOST`.
pub fn is_local_host(host: &str) -> bool {
    static PATTERN: &str = r"(?i)^(([\w-]+-besim[\w]?)|(127\.\d{1,3}\.\d{1,3}\.\d{1,3})|(localhost))(:\d+)?$";
    Regex::new(PATTERN).unwrap().is_match(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_and_api_paths_are_local_only() {
        let rules = default_rules(false);
        assert_eq!(check_behaviour(&rules, "/static/app.js"), Behaviour::OnlyLocal);
        assert_eq!(check_behaviour(&rules, "/api/v1.0/devices"), Behaviour::OnlyLocal);
    }

    #[test]
    fn unmatched_path_defaults_to_remote_if_missing() {
        let rules = default_rules(false);
        assert_eq!(check_behaviour(&rules, "/something/else"), Behaviour::RemoteIfMissing);
    }

    #[test]
    fn weather_override_flips_remote_first_to_local_first() {
        let without = default_rules(false);
        let with = default_rules(true);
        let path = "/WifiBoxInterface_vokera/getWebTemperature.php";
        assert_eq!(check_behaviour(&without, path), Behaviour::RemoteFirst);
        assert_eq!(check_behaviour(&with, path), Behaviour::LocalFirst);
    }

    #[test]
    fn local_host_pattern_matches_besim_hostnames_and_loopback() {
        assert!(is_local_host("my-besim:8099"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("localhost:8099"));
        assert!(!is_local_host("api.vendor-cloud.example.com"));
    }
}
