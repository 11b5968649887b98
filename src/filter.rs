//! Scan filters.
//!
//! A filter decides whether an advertisement is surfaced to the manager.
//! Filters are pure predicates evaluated once per discovery event.

use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::ble::adapter::PeripheralHandle;
use crate::ble::advertisement::Advertisement;

/// Predicate over a discovery event.
///
/// Closures with the matching signature implement this trait, so ad-hoc
/// filters can be passed directly to
/// [`ConnectionManager::start_scan`](crate::ConnectionManager::start_scan).
pub trait ScanFilter: Send + Sync {
    /// Return `true` to accept the advertisement.
    fn matches(&self, peripheral: &PeripheralHandle, advertisement: &Advertisement, rssi: i16)
        -> bool;
}

impl<F> ScanFilter for F
where
    F: Fn(&PeripheralHandle, &Advertisement, i16) -> bool + Send + Sync,
{
    fn matches(&self, peripheral: &PeripheralHandle, advertisement: &Advertisement, rssi: i16) -> bool {
        self(peripheral, advertisement, rssi)
    }
}

/// Substring match on the peripheral name.
///
/// The platform-reported name is used when present, otherwise the
/// advertised local name. Peripherals with neither never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    pattern: String,
    case_sensitive: bool,
}

impl NameFilter {
    /// Case-insensitive substring filter.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
        }
    }

    /// Substring filter that respects case.
    pub fn case_sensitive(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: true,
        }
    }

    /// The substring being searched for.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl ScanFilter for NameFilter {
    fn matches(&self, peripheral: &PeripheralHandle, advertisement: &Advertisement, _rssi: i16) -> bool {
        let name = match peripheral
            .name
            .as_deref()
            .or(advertisement.local_name.as_deref())
        {
            Some(name) => name,
            None => return false,
        };

        if self.case_sensitive {
            name.contains(&self.pattern)
        } else {
            name.to_lowercase().contains(&self.pattern.to_lowercase())
        }
    }
}

/// Accepts advertisements listing at least one of a set of services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFilter {
    services: HashSet<Uuid>,
}

impl ServiceFilter {
    /// Build a filter from a set of service UUIDs.
    pub fn new(services: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            services: services.into_iter().collect(),
        }
    }
}

impl ScanFilter for ServiceFilter {
    fn matches(&self, _peripheral: &PeripheralHandle, advertisement: &Advertisement, _rssi: i16) -> bool {
        advertisement
            .service_uuids
            .iter()
            .any(|uuid| self.services.contains(uuid))
    }
}

/// How a [`CompositeFilter`] combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeMode {
    /// Every child must accept. An empty list accepts.
    All,
    /// At least one child must accept. An empty list rejects.
    Any,
}

/// Combination of other filters.
pub struct CompositeFilter {
    mode: CompositeMode,
    filters: Vec<Box<dyn ScanFilter>>,
}

impl CompositeFilter {
    /// Combine filters with the given mode.
    pub fn new(mode: CompositeMode, filters: Vec<Box<dyn ScanFilter>>) -> Self {
        Self { mode, filters }
    }

    /// Accept only if every filter accepts.
    pub fn all(filters: Vec<Box<dyn ScanFilter>>) -> Self {
        Self::new(CompositeMode::All, filters)
    }

    /// Accept if any filter accepts.
    pub fn any(filters: Vec<Box<dyn ScanFilter>>) -> Self {
        Self::new(CompositeMode::Any, filters)
    }

    /// Append a child filter.
    pub fn push(&mut self, filter: impl ScanFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// The combination mode.
    pub fn mode(&self) -> CompositeMode {
        self.mode
    }

    /// Number of child filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if there are no child filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ScanFilter for CompositeFilter {
    fn matches(&self, peripheral: &PeripheralHandle, advertisement: &Advertisement, rssi: i16) -> bool {
        match self.mode {
            CompositeMode::All => self
                .filters
                .iter()
                .all(|f| f.matches(peripheral, advertisement, rssi)),
            CompositeMode::Any => self
                .filters
                .iter()
                .any(|f| f.matches(peripheral, advertisement, rssi)),
        }
    }
}

impl fmt::Debug for CompositeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeFilter")
            .field("mode", &self.mode)
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::uuid_from_u16;
    use proptest::prelude::*;

    fn named(name: &str) -> PeripheralHandle {
        PeripheralHandle::with_name("id", name)
    }

    fn accept() -> Box<dyn ScanFilter> {
        Box::new(|_: &PeripheralHandle, _: &Advertisement, _: i16| true)
    }

    fn reject() -> Box<dyn ScanFilter> {
        Box::new(|_: &PeripheralHandle, _: &Advertisement, _: i16| false)
    }

    #[test]
    fn test_name_filter_substring() {
        let filter = NameFilter::new("foo");
        let adv = Advertisement::default();

        assert!(filter.matches(&named("Foobar"), &adv, -60));
        assert!(!filter.matches(&named("bar"), &adv, -60));
    }

    #[test]
    fn test_name_filter_case_sensitive() {
        let filter = NameFilter::case_sensitive("foo");
        let adv = Advertisement::default();

        assert!(!filter.matches(&named("Foobar"), &adv, -60));
        assert!(filter.matches(&named("xfoo"), &adv, -60));
    }

    #[test]
    fn test_name_filter_falls_back_to_local_name() {
        let filter = NameFilter::new("sensor");
        let unnamed = PeripheralHandle::new("id");

        assert!(filter.matches(&unnamed, &Advertisement::with_local_name("Sensor-01"), 0));
        assert!(!filter.matches(&unnamed, &Advertisement::default(), 0));
    }

    #[test]
    fn test_name_filter_prefers_peripheral_name() {
        let filter = NameFilter::new("sensor");
        let adv = Advertisement::with_local_name("Sensor-01");

        assert!(!filter.matches(&named("Thermo"), &adv, 0));
    }

    #[test]
    fn test_service_filter_intersection() {
        let a = uuid_from_u16(0x180F);
        let b = uuid_from_u16(0x180A);
        let c = uuid_from_u16(0x1809);
        let filter = ServiceFilter::new([a, b]);
        let handle = named("x");

        assert!(filter.matches(&handle, &Advertisement::default().with_service(a), 0));
        assert!(filter.matches(
            &handle,
            &Advertisement::default().with_service(c).with_service(b),
            0
        ));
        assert!(!filter.matches(&handle, &Advertisement::default().with_service(c), 0));
        assert!(!filter.matches(&handle, &Advertisement::default(), 0));
    }

    #[test]
    fn test_composite_all_rejects_if_any_child_rejects() {
        let handle = named("Foobar");
        let adv = Advertisement::default();

        let filter = CompositeFilter::all(vec![Box::new(NameFilter::new("foo")), reject()]);
        assert!(!filter.matches(&handle, &adv, 0));

        let filter = CompositeFilter::all(vec![Box::new(NameFilter::new("foo")), accept()]);
        assert!(filter.matches(&handle, &adv, 0));
    }

    #[test]
    fn test_composite_empty_lists() {
        let handle = named("x");
        let adv = Advertisement::default();

        assert!(CompositeFilter::all(Vec::new()).matches(&handle, &adv, 0));
        assert!(!CompositeFilter::any(Vec::new()).matches(&handle, &adv, 0));
    }

    #[test]
    fn test_composite_push_and_nesting() {
        let mut inner = CompositeFilter::any(vec![reject()]);
        inner.push(NameFilter::new("bar"));
        assert_eq!(inner.len(), 2);

        let outer = CompositeFilter::all(vec![Box::new(inner), accept()]);
        assert!(outer.matches(&named("Foobar"), &Advertisement::default(), 0));
        assert!(!outer.matches(&named("Foo"), &Advertisement::default(), 0));
    }

    #[test]
    fn test_closure_filter_sees_rssi() {
        let strong = |_: &PeripheralHandle, _: &Advertisement, rssi: i16| rssi > -70;
        assert!(strong.matches(&named("x"), &Advertisement::default(), -50));
        assert!(!strong.matches(&named("x"), &Advertisement::default(), -90));
    }

    proptest! {
        #[test]
        fn prop_composite_matches_boolean_fold(children in proptest::collection::vec(any::<bool>(), 0..8)) {
            let build = |mode| {
                let filters = children
                    .iter()
                    .map(|&accepts| if accepts { accept() } else { reject() })
                    .collect();
                CompositeFilter::new(mode, filters)
            };
            let handle = named("x");
            let adv = Advertisement::default();

            prop_assert_eq!(
                build(CompositeMode::All).matches(&handle, &adv, 0),
                children.iter().all(|&c| c)
            );
            prop_assert_eq!(
                build(CompositeMode::Any).matches(&handle, &adv, 0),
                children.iter().any(|&c| c)
            );
        }

        #[test]
        fn prop_name_filter_matches_own_name(name in "[A-Za-z0-9-]{1,16}", start in 0usize..16, len in 1usize..16) {
            let start = start.min(name.len() - 1);
            let end = (start + len).min(name.len());
            let filter = NameFilter::case_sensitive(&name[start..end]);
            prop_assert!(filter.matches(&named(&name), &Advertisement::default(), 0));
            prop_assert!(NameFilter::new(name.to_uppercase()).matches(&named(&name), &Advertisement::default(), 0));
        }
    }
}
