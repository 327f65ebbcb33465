//! The local/remote HTTP proxy: forwards each request to the real
//! vendor cloud, the in-process simulator REST surface, or both,
//! according to a path-based routing policy.
//!
//! Grounded on `original_source/besim/rootfs/opt/BeSIM/proxyMiddleware.py`.

pub mod middleware;
pub mod policy;

pub use middleware::{proxy, ProxyState};
pub use policy::{default_rules, is_local_host, Behaviour, Rule};
