//! Per-hostname sets of candidate DoH server IPs, with a "last-known-good" slot.
//!
//! See [`IpMap::get`] and [`IpSet::confirm`]/[`IpSet::disconfirm`].

use std::{
    collections::{BTreeSet, HashMap},
    net::IpAddr,
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};

/// Resolves a hostname to its candidate IP addresses. External collaborator:
/// the forwarder never resolves names itself.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// An ordered set of candidate IPs for one hostname, plus the most recently
/// confirmed-working one.
#[derive(Default)]
pub struct IpSet {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    addrs: BTreeSet<IpAddr>,
    order: Vec<IpAddr>,
    confirmed: Option<IpAddr>,
}

impl Inner {
    fn insert(&mut self, ip: IpAddr) {
        if self.addrs.insert(ip) {
            self.order.push(ip);
        }
    }
}

impl IpSet {
    fn from_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut inner = Inner::default();
        for addr in addrs {
            inner.insert(addr);
        }

        Self {
            inner: RwLock::new(inner),
        }
    }

    /// All known candidate addresses, in the order they were first observed.
    pub fn get_all(&self) -> Vec<IpAddr> {
        self.inner.read().order.clone()
    }

    /// The most recently confirmed-working address, if any.
    pub fn confirmed(&self) -> Option<IpAddr> {
        self.inner.read().confirmed
    }

    /// Records `ip` as the last-known-good address, adding it to the set if new.
    pub fn confirm(&self, ip: IpAddr) {
        let mut inner = self.inner.write();
        inner.insert(ip);
        inner.confirmed = Some(ip);
    }

    /// Clears the confirmed slot, but only if it currently holds `ip`
    /// (compare-and-clear, so a stale disconfirm can't undo a fresher confirm).
    pub fn disconfirm(&self, ip: IpAddr) {
        let mut inner = self.inner.write();
        if inner.confirmed == Some(ip) {
            inner.confirmed = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().addrs.is_empty()
    }

    /// Adds each address in `addrs` to the set, preserving any existing
    /// confirmed slot.
    fn merge(&self, addrs: impl IntoIterator<Item = IpAddr>) {
        let mut inner = self.inner.write();
        for addr in addrs {
            inner.insert(addr);
        }
    }
}

/// Hostname -> [`IpSet`] store, lazily populated via bootstrap seeds or a
/// name-resolution callback.
pub struct IpMap {
    resolver: Arc<dyn Resolver>,
    sets: Mutex<HashMap<String, Arc<IpSet>>>,
}

impl IpMap {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Creates (or replaces) the set for `host`, seeded from `seeds`. Each seed is
    /// treated as a literal IP if it parses as one, otherwise resolved via the
    /// external resolver. Unresolvable seeds are silently dropped; an empty result
    /// leaves the set empty rather than failing.
    pub fn of(&self, host: &str, seeds: &[String]) -> Arc<IpSet> {
        let mut addrs = Vec::new();
        for seed in seeds {
            if let Ok(ip) = seed.parse::<IpAddr>() {
                addrs.push(ip);
                continue;
            }

            addrs.extend(self.resolver.resolve(seed));
        }

        let set = Arc::new(IpSet::from_addrs(addrs));
        self.sets.lock().insert(host.to_owned(), set.clone());
        set
    }

    /// Returns the existing set for `host`, or creates one by resolving `host`
    /// via the external resolver. A set that is still empty (e.g. seeded from an
    /// empty bootstrap list) is re-resolved on every access rather than cached as
    /// a permanent miss, so the resolver callback is consulted on first real use.
    pub fn get(&self, host: &str) -> Arc<IpSet> {
        let existing = self.sets.lock().get(host).cloned();

        if let Some(set) = existing {
            if !set.is_empty() {
                return set;
            }

            set.merge(self.resolver.resolve(host));
            return set;
        }

        let addrs = self.resolver.resolve(host);
        let set = Arc::new(IpSet::from_addrs(addrs));
        self.sets.lock().insert(host.to_owned(), set.clone());
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct NoopResolver;

    impl Resolver for NoopResolver {
        fn resolve(&self, _host: &str) -> Vec<IpAddr> {
            Vec::new()
        }
    }

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(1, 1, 1, n))
    }

    #[test]
    fn of_drops_unresolvable_seeds_instead_of_erroring() {
        let map = IpMap::new(Arc::new(NoopResolver));

        let set = map.of("example.com", &["not-an-ip".to_owned()]);

        assert!(set.is_empty());
    }

    #[test]
    fn confirm_sets_slot_and_adds_member() {
        let map = IpMap::new(Arc::new(NoopResolver));
        let set = map.of("example.com", &[]);

        set.confirm(ip(1));

        assert_eq!(set.confirmed(), Some(ip(1)));
        assert!(set.get_all().contains(&ip(1)));
    }

    #[test]
    fn disconfirm_is_compare_and_clear() {
        let map = IpMap::new(Arc::new(NoopResolver));
        let set = map.of("example.com", &[]);
        set.confirm(ip(1));

        set.disconfirm(ip(2)); // stale, doesn't match current confirmed
        assert_eq!(set.confirmed(), Some(ip(1)));

        set.disconfirm(ip(1));
        assert_eq!(set.confirmed(), None);
    }

    #[test]
    fn get_caches_the_set_for_repeat_lookups() {
        let map = IpMap::new(Arc::new(NoopResolver));

        let first = map.get("example.com");
        first.confirm(ip(3));

        let second = map.get("example.com");

        assert_eq!(second.confirmed(), Some(ip(3)));
    }

    struct OneShotResolver {
        addrs: Vec<IpAddr>,
    }

    impl Resolver for OneShotResolver {
        fn resolve(&self, _host: &str) -> Vec<IpAddr> {
            self.addrs.clone()
        }
    }

    #[test]
    fn get_re_resolves_a_set_left_empty_by_an_empty_bootstrap() {
        let map = IpMap::new(Arc::new(OneShotResolver { addrs: vec![ip(9)] }));
        map.of("example.com", &[]); // empty bootstrap, caches an empty set

        let set = map.get("example.com");

        assert!(set.get_all().contains(&ip(9)));
    }
}
