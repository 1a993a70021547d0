//! # Source Registry
//!
//! Every service advertised by the source directory, indexed by service id
//! and by name, together with the subscriptions opened through it.
//!
//! The registry decides *which* subscriptions a service transition affects;
//! it never touches a subscription itself. Transitions are returned to the
//! session, which applies them through the subscription arena:
//!
//! - up → down: every item on the source goes Stale (stream kept)
//! - down → up: every item on the source is forced Live
//! - up → up, down → down: nothing
//!
//! A down → up transition does not request new images; that happens when the
//! session completes a recovery and resubscribes everything.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rdm_types::{
    DataType, DomainType, FilterAction, MapEntryAction, MsgKey, DIRECTORY_STREAM_ID,
};
use rwf_codec::{
    decode_element_list, decode_filter_list, decode_map, decode_value, directory_filter,
    directory_filter_id, find_element, primitive::require_uint, CodecError, CodecResult, Msg,
    MsgBuilder,
};
use tracing::{debug, info, warn};

use crate::subscription::{SubscriptionId, SubscriptionKind};

/// Which item domain a service serves, from its advertised capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DomainHint {
    #[default]
    Unknown,
    MarketPrice,
    MarketByOrder,
    MarketByPrice,
}

impl DomainHint {
    /// Hint from a list of domain bytes
    ///
    /// A service offering exactly one of the two book domains pins book
    /// requests to it; anything else leaves the choice to configuration.
    pub fn from_capabilities(domains: &[u8]) -> Self {
        let has = |d: DomainType| domains.iter().any(|b| DomainType::from(*b) == d);
        match (
            has(DomainType::MarketByOrder),
            has(DomainType::MarketByPrice),
            has(DomainType::MarketPrice),
        ) {
            (true, false, _) => DomainHint::MarketByOrder,
            (false, true, _) => DomainHint::MarketByPrice,
            (false, false, true) => DomainHint::MarketPrice,
            _ => DomainHint::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    pub up: bool,
    pub accepting: bool,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            up: true,
            accepting: true,
        }
    }
}

/// Effect of one directory change on the source's subscriptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTransition {
    Unchanged,
    WentDown { items: Vec<SubscriptionId> },
    WentUp { items: Vec<SubscriptionId> },
}

#[derive(Debug)]
pub struct Source {
    id: u16,
    name: Arc<str>,
    state: ServiceState,
    hint: DomainHint,
    paused: bool,
    items: HashMap<(Arc<str>, SubscriptionKind), SubscriptionId>,
}

impl Source {
    fn new(id: u16, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
            state: ServiceState::default(),
            hint: DomainHint::Unknown,
            paused: false,
            items: HashMap::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state.up
    }

    pub fn hint(&self) -> DomainHint {
        self.hint
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn item(&self, symbol: &str, kind: SubscriptionKind) -> Option<SubscriptionId> {
        self.items.get(&(Arc::from(symbol), kind)).copied()
    }

    pub fn item_ids(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.items.values().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn apply_state(&mut self, state: ServiceState) -> SourceTransition {
        let was_up = self.state.up;
        self.state = state;
        match (was_up, state.up) {
            (true, false) => SourceTransition::WentDown {
                items: self.item_ids(),
            },
            (false, true) => SourceTransition::WentUp {
                items: self.item_ids(),
            },
            _ => SourceTransition::Unchanged,
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: HashMap<u16, Source>,
    by_name: HashMap<Arc<str>, u16>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert keyed by service id
    ///
    /// A service seen for the first time without a name is registered under
    /// its numeric id. A new service is assumed up until told otherwise.
    pub fn update_or_create(
        &mut self,
        id: u16,
        name: Option<&str>,
        state: Option<ServiceState>,
        hint: Option<DomainHint>,
    ) -> SourceTransition {
        if !self.sources.contains_key(&id) {
            let name = name.map(str::to_owned).unwrap_or_else(|| id.to_string());
            let mut source = Source::new(id, &name);
            if let Some(state) = state {
                source.state = state;
            }
            if let Some(hint) = hint {
                source.hint = hint;
            }
            info!(
                service_id = id,
                service = %source.name,
                up = source.state.up,
                accepting = source.state.accepting,
                "Source added"
            );
            self.by_name.insert(source.name.clone(), id);
            self.sources.insert(id, source);
            return SourceTransition::Unchanged;
        }

        let mut renamed = None;
        let transition = match self.sources.get_mut(&id) {
            Some(source) => {
                if let Some(name) = name {
                    if &*source.name != name {
                        renamed = Some((source.name.clone(), Arc::<str>::from(name)));
                        source.name = Arc::from(name);
                    }
                }
                if let Some(hint) = hint {
                    source.hint = hint;
                }
                match state {
                    Some(state) => source.apply_state(state),
                    None => SourceTransition::Unchanged,
                }
            }
            None => SourceTransition::Unchanged,
        };
        if let Some((old, new)) = renamed {
            warn!(service_id = id, old = %old, new = %new, "Source renamed");
            self.by_name.remove(&old);
            self.by_name.insert(new, id);
        }
        if transition != SourceTransition::Unchanged {
            info!(service_id = id, transition = ?transition, "Source state changed");
        }
        transition
    }

    /// Service removed from the directory
    pub fn mark_down(&mut self, id: u16) -> SourceTransition {
        match self.sources.get_mut(&id) {
            Some(source) => {
                let accepting = source.state.accepting;
                source.apply_state(ServiceState {
                    up: false,
                    accepting,
                })
            }
            None => SourceTransition::Unchanged,
        }
    }

    pub fn find_by_id(&self, id: u16) -> Option<&Source> {
        self.sources.get(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Source> {
        self.by_name.get(name).and_then(|id| self.sources.get(id))
    }

    /// Lowest-numbered service that is up
    pub fn first_up(&self) -> Option<&Source> {
        self.sources
            .values()
            .filter(|s| s.is_up())
            .min_by_key(|s| s.id)
    }

    /// Mark every source down; returns the items that must go Stale
    pub fn set_all_stale(&mut self) -> Vec<SubscriptionId> {
        let mut items = Vec::new();
        for source in self.sources.values_mut() {
            let accepting = source.state.accepting;
            if let SourceTransition::WentDown { items: ids } =
                source.apply_state(ServiceState { up: false, accepting })
            {
                items.extend(ids);
            }
        }
        items.sort_unstable();
        items
    }

    /// Every subscription known to any source
    pub fn resubscribe_all(&self) -> Vec<SubscriptionId> {
        let mut items: Vec<_> = self
            .sources
            .values()
            .flat_map(|s| s.items.values().copied())
            .collect();
        items.sort_unstable();
        items
    }

    pub fn pause_updates(&mut self, name: &str) -> bool {
        self.set_paused(name, true)
    }

    pub fn resume_updates(&mut self, name: &str) -> bool {
        self.set_paused(name, false)
    }

    fn set_paused(&mut self, name: &str, paused: bool) -> bool {
        let Some(id) = self.by_name.get(name).copied() else {
            return false;
        };
        match self.sources.get_mut(&id) {
            Some(source) => {
                source.paused = paused;
                debug!(service = name, paused, "Source update flow changed");
                true
            }
            None => false,
        }
    }

    pub fn is_paused(&self, id: u16) -> bool {
        self.sources.get(&id).is_some_and(|s| s.paused)
    }

    pub fn register_item(
        &mut self,
        source_id: u16,
        symbol: Arc<str>,
        kind: SubscriptionKind,
        subscription: SubscriptionId,
    ) {
        if let Some(source) = self.sources.get_mut(&source_id) {
            source.items.insert((symbol, kind), subscription);
        }
    }

    pub fn unregister_item(
        &mut self,
        source_id: u16,
        symbol: &str,
        kind: SubscriptionKind,
        subscription: SubscriptionId,
    ) -> bool {
        let Some(source) = self.sources.get_mut(&source_id) else {
            return false;
        };
        let key = (Arc::<str>::from(symbol), kind);
        if source.items.get(&key) == Some(&subscription) {
            source.items.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    /// Apply a directory refresh or update
    ///
    /// The payload is a map keyed by service id whose entries are filter
    /// lists of INFO and STATE element lists.
    pub fn process_directory(
        &mut self,
        msg: &Msg<'_>,
    ) -> Result<Vec<(u16, SourceTransition)>, CodecError> {
        if msg.container == DataType::NoData {
            return Ok(Vec::new());
        }
        if msg.container != DataType::Map {
            return Err(CodecError::unsupported_type(msg.container, "directory payload"));
        }
        let map = decode_map(msg.payload)?;
        let mut transitions = Vec::new();
        for entry in &map.entries {
            let id = service_id_of(entry.key)?;
            if entry.action == MapEntryAction::Delete {
                transitions.push((id, self.mark_down(id)));
                continue;
            }
            let service = decode_service(entry.payload)?;
            let transition =
                self.update_or_create(id, service.name.as_deref(), service.state, service.hint);
            transitions.push((id, transition));
        }
        Ok(transitions)
    }
}

/// Directory request for INFO and STATE on the directory stream
pub fn directory_request() -> CodecResult<Bytes> {
    MsgBuilder::request(
        DomainType::Source,
        DIRECTORY_STREAM_ID,
        MsgKey::default().with_filter(directory_filter::INFO | directory_filter::STATE),
    )
    .encode()
}

#[derive(Debug, Default)]
struct ServiceUpdate {
    name: Option<String>,
    state: Option<ServiceState>,
    hint: Option<DomainHint>,
}

fn service_id_of(key: &[u8]) -> CodecResult<u16> {
    let id = require_uint(key, "service id")?;
    u16::try_from(id)
        .map_err(|_| CodecError::invalid_payload(0, format!("service id out of range: {}", id), key.len()))
}

fn decode_service(payload: &[u8]) -> CodecResult<ServiceUpdate> {
    let (container, filters) = decode_filter_list(payload)?;
    if container != DataType::ElementList {
        return Err(CodecError::unsupported_type(container, "directory filter entry"));
    }
    let mut update = ServiceUpdate::default();
    for filter in filters {
        if filter.action == FilterAction::Clear {
            continue;
        }
        let elements = decode_element_list(filter.payload)?;
        match filter.id {
            directory_filter_id::INFO => {
                if let Some(name) = find_element(&elements, "Name") {
                    update.name = Some(String::from_utf8_lossy(name.data).into_owned());
                }
                if let Some(caps) = find_element(&elements, "Capabilities") {
                    update.hint = Some(DomainHint::from_capabilities(caps.data));
                }
            }
            directory_filter_id::STATE => {
                let up = match find_element(&elements, "ServiceState") {
                    Some(e) => require_uint(e.data, "ServiceState")? == 1,
                    None => true,
                };
                let accepting = match find_element(&elements, "AcceptingRequests") {
                    Some(e) => decode_value(e.data_type, e.data)?.as_u64().unwrap_or(1) == 1,
                    None => up,
                };
                update.state = Some(ServiceState { up, accepting });
            }
            other => debug!(filter_id = other, "Ignoring directory filter"),
        }
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down() -> ServiceState {
        ServiceState {
            up: false,
            accepting: false,
        }
    }

    fn registry_with_items() -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        registry.update_or_create(10, Some("X"), None, None);
        registry.register_item(10, Arc::from("AAA"), SubscriptionKind::MarketPrice, 0);
        registry.register_item(10, Arc::from("BBB"), SubscriptionKind::MarketPrice, 1);
        registry
    }

    #[test]
    fn test_update_or_create_indexes_by_id_and_name() {
        let registry = registry_with_items();
        assert_eq!(registry.find_by_name("X").map(Source::id), Some(10));
        assert_eq!(registry.find_by_id(10).map(Source::name), Some("X"));
        assert!(registry.find_by_name("Y").is_none());
        assert_eq!(
            registry.find_by_name("X").and_then(|s| s.item("AAA", SubscriptionKind::MarketPrice)),
            Some(0)
        );
    }

    #[test]
    fn test_transitions_fire_only_on_change() {
        let mut registry = registry_with_items();
        assert_eq!(
            registry.update_or_create(10, None, Some(ServiceState::default()), None),
            SourceTransition::Unchanged
        );
        assert_eq!(
            registry.update_or_create(10, None, Some(down()), None),
            SourceTransition::WentDown { items: vec![0, 1] }
        );
        assert_eq!(
            registry.update_or_create(10, None, Some(down()), None),
            SourceTransition::Unchanged
        );
        assert_eq!(
            registry.update_or_create(10, None, Some(ServiceState::default()), None),
            SourceTransition::WentUp { items: vec![0, 1] }
        );
    }

    #[test]
    fn test_set_all_stale_and_resubscribe_all() {
        let mut registry = registry_with_items();
        registry.update_or_create(11, Some("Y"), Some(down()), None);
        registry.register_item(11, Arc::from("CCC"), SubscriptionKind::MarketByPrice, 2);

        assert_eq!(registry.set_all_stale(), vec![0, 1]);
        assert!(registry.set_all_stale().is_empty());
        assert_eq!(registry.resubscribe_all(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unregister_requires_matching_owner() {
        let mut registry = registry_with_items();
        assert!(!registry.unregister_item(10, "AAA", SubscriptionKind::MarketPrice, 7));
        assert!(registry.unregister_item(10, "AAA", SubscriptionKind::MarketPrice, 0));
        assert_eq!(registry.resubscribe_all(), vec![1]);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut registry = registry_with_items();
        assert!(registry.pause_updates("X"));
        assert!(registry.is_paused(10));
        assert!(registry.resume_updates("X"));
        assert!(!registry.is_paused(10));
        assert!(!registry.pause_updates("nope"));
    }

    #[test]
    fn test_capabilities_hint() {
        assert_eq!(DomainHint::from_capabilities(&[6, 7]), DomainHint::MarketByOrder);
        assert_eq!(DomainHint::from_capabilities(&[6, 8]), DomainHint::MarketByPrice);
        assert_eq!(DomainHint::from_capabilities(&[6]), DomainHint::MarketPrice);
        assert_eq!(DomainHint::from_capabilities(&[6, 7, 8]), DomainHint::Unknown);
    }

    #[test]
    fn test_process_directory_refresh_then_delete() {
        use crate::provider::{directory_refresh, directory_update, ServiceInfo};
        use rdm_types::DomainType;
        use rwf_codec::decode_msg;

        let mut registry = SourceRegistry::new();
        let refresh = directory_refresh(&[
            ServiceInfo::new(10, "X")
                .with_capabilities(&[DomainType::MarketPrice, DomainType::MarketByOrder]),
            ServiceInfo::new(11, "Y").down(),
        ])
        .unwrap();
        registry.process_directory(&decode_msg(&refresh).unwrap()).unwrap();
        assert_eq!(registry.len(), 2);
        let x = registry.find_by_name("X").unwrap();
        assert!(x.is_up());
        assert_eq!(x.hint(), DomainHint::MarketByOrder);
        assert!(!registry.find_by_id(11).unwrap().is_up());

        registry.register_item(10, Arc::from("AAA"), SubscriptionKind::MarketPrice, 4);
        let delete = directory_update(&[], &[10]).unwrap();
        let transitions = registry.process_directory(&decode_msg(&delete).unwrap()).unwrap();
        assert_eq!(transitions, vec![(10, SourceTransition::WentDown { items: vec![4] })]);
        assert!(registry.find_by_name("X").is_some());
    }
}
