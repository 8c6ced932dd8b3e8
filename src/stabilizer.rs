//! Structure-based stable keys for tree-addressed configuration entities
//!
//! Configuration documents name their entities with an object prefix and a
//! physical address (`ObjA.Group - A4.3`). Both parts change between two
//! otherwise equivalent documents, so entities are re-keyed by structure:
//! the prefix is dropped, rack numbers are replaced by their rank within
//! the group, dependents inherit their owner's key and nets are numbered
//! among siblings with the same base label.

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

static OBJECT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^.\s]+)\.(.+)$").expect("object prefix pattern is valid"));

static DEVICE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<group>.+?)\s*-\s*A(?P<rack>\d+)\.(?P<slot>\d+)$").expect("address pattern is valid")
});

static BARE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^A?(?P<rack>\d+)\.(?P<slot>\d+)$").expect("address pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    Device,
    Module,
    Net,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Device => "Device",
            EntityKind::Module => "Module",
            EntityKind::Net => "Net",
        }
    }
}

/// One entity as it appears in a configuration document
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    pub entity_type: String,
    /// Index of the owning device or module, for dependents
    pub owner: Option<usize>,
    /// Raw parent reference, for nets
    pub parent: Option<String>,
    pub address: Option<String>,
    pub channel: Option<String>,
    pub attributes: IndexMap<String, String>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            entity_type: entity_type.into(),
            owner: None,
            parent: None,
            address: None,
            channel: None,
            attributes: IndexMap::new(),
        }
    }
}

/// All entities of one document, owners listed before their dependents
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub object_name: Option<String>,
    pub entities: Vec<Entity>,
}

/// Stable key of one entity plus the stable key of its parent or owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StableEntity {
    pub key: String,
    pub parent_key: Option<String>,
}

/// Parsed `<group> - A<rack>.<slot>` suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    pub group: String,
    pub rack: u64,
    pub slot: u64,
}

/// Trim and collapse runs of whitespace to a single space
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn parse_address(local_name: &str) -> Option<DeviceAddress> {
    let caps = DEVICE_ADDRESS.captures(local_name)?;
    Some(DeviceAddress {
        group: normalize_name(&caps["group"]),
        rack: caps["rack"].parse().ok()?,
        slot: caps["slot"].parse().ok()?,
    })
}

fn parse_bare_address(address: &str) -> Option<(u64, u64)> {
    let caps = BARE_ADDRESS.captures(address.trim())?;
    Some((caps["rack"].parse().ok()?, caps["slot"].parse().ok()?))
}

/// Re-keys the entities of one document
#[derive(Debug, Clone, Default)]
pub struct KeyStabilizer {
    object_name: Option<String>,
}

impl KeyStabilizer {
    pub fn new(object_name: Option<String>) -> Self {
        Self { object_name }
    }

    /// Entity name without its object prefix, whitespace normalized.
    /// A generic `word.` prefix is only stripped when the object name is
    /// unknown.
    pub fn local_name(&self, name: &str) -> String {
        let trimmed = name.trim();
        if let Some(object) = self.object_name.as_deref().filter(|o| !o.is_empty()) {
            let local = trimmed
                .strip_prefix(object)
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(trimmed);
            return normalize_name(local);
        }
        match OBJECT_PREFIX.captures(trimmed) {
            Some(caps) => normalize_name(&caps[2]),
            None => normalize_name(trimmed),
        }
    }

    /// Compute stable keys for every entity, in document order
    pub fn stabilize(&self, document: &Document) -> Vec<StableEntity> {
        let entities = &document.entities;
        let locals: Vec<String> = entities.iter().map(|e| self.local_name(&e.name)).collect();
        let mut keys: Vec<Option<String>> = vec![None; entities.len()];
        let mut parents: Vec<Option<String>> = vec![None; entities.len()];

        let ranks = rack_ranks(entities, &locals);
        self.key_devices(entities, &locals, &ranks, &mut keys);
        for index in 0..entities.len() {
            if entities[index].kind == EntityKind::Module {
                key_dependent(entities, &locals, &ranks, &mut keys, &mut parents, index, 0);
            }
        }
        self.key_nets(entities, &locals, &mut keys, &mut parents);

        keys.into_iter()
            .zip(parents)
            .zip(&locals)
            .map(|((key, parent_key), local)| StableEntity {
                key: key.unwrap_or_else(|| local.clone()),
                parent_key,
            })
            .collect()
    }

    fn key_devices(&self, entities: &[Entity], locals: &[String], ranks: &RackRanks, keys: &mut [Option<String>]) {
        for (index, entity) in entities.iter().enumerate() {
            if entity.kind != EntityKind::Device {
                continue;
            }
            keys[index] = Some(ranked_name(&locals[index], ranks));
        }
    }

    fn key_nets(
        &self,
        entities: &[Entity],
        locals: &[String],
        keys: &mut [Option<String>],
        parents: &mut [Option<String>],
    ) {
        let nets: Vec<usize> = (0..entities.len())
            .filter(|&i| entities[i].kind == EntityKind::Net)
            .collect();
        if nets.is_empty() {
            return;
        }

        let mut net_by_name: HashMap<&str, usize> = HashMap::new();
        let mut owner_by_name: HashMap<&str, usize> = HashMap::new();
        for (index, local) in locals.iter().enumerate() {
            match entities[index].kind {
                EntityKind::Net => net_by_name.entry(local.as_str()).or_insert(index),
                _ => owner_by_name.entry(local.as_str()).or_insert(index),
            };
        }

        // Resolved parent: another net, or an owning device/module as anchor
        let mut net_parent: HashMap<usize, usize> = HashMap::new();
        let mut anchor: HashMap<usize, usize> = HashMap::new();
        for &net in &nets {
            let Some(raw) = entities[net].parent.as_deref().filter(|p| !p.trim().is_empty()) else {
                continue;
            };
            let parent_local = self.local_name(raw);
            if let Some(&parent) = net_by_name.get(parent_local.as_str()).filter(|&&p| p != net) {
                net_parent.insert(net, parent);
            } else if let Some(&owner) = owner_by_name.get(parent_local.as_str()) {
                anchor.insert(net, owner);
            } else {
                log::debug!("Net '{}' has unknown parent '{}', treating as root", locals[net], raw);
            }
        }
        break_cycles(&nets, locals, &mut net_parent);

        let mut children: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
        for &net in &nets {
            children.entry(net_parent.get(&net).copied()).or_default().push(net);
        }

        // Roots grouped by anchor key so nets under one device number together
        let mut pending: Vec<(Option<String>, Vec<usize>)> = Vec::new();
        let mut anchored: BTreeMap<Option<String>, Vec<usize>> = BTreeMap::new();
        for &root in children.get(&None).map(Vec::as_slice).unwrap_or(&[]) {
            let anchor_key = anchor.get(&root).and_then(|&owner| keys[owner].clone());
            anchored.entry(anchor_key).or_default().push(root);
        }
        pending.extend(anchored);

        while let Some((parent_key, siblings)) = pending.pop() {
            let assigned = number_siblings(entities, locals, &siblings);
            for (net, label) in assigned {
                let key = match &parent_key {
                    Some(parent) => format!("{}/{}", parent, label),
                    None => label,
                };
                parents[net] = parent_key.clone();
                keys[net] = Some(key.clone());
                if let Some(grandchildren) = children.get(&Some(net)) {
                    pending.push((Some(key), grandchildren.clone()));
                }
            }
        }
    }
}

/// Key a dependent under its owner's key, resolving owners first
fn key_dependent(
    entities: &[Entity],
    locals: &[String],
    ranks: &RackRanks,
    keys: &mut [Option<String>],
    parents: &mut [Option<String>],
    index: usize,
    depth: usize,
) -> String {
    if let Some(key) = &keys[index] {
        return key.clone();
    }
    let owner = entities[index]
        .owner
        .filter(|&o| o != index && o < entities.len() && depth < entities.len());
    let key = match owner {
        Some(owner) => {
            let owner_key = key_dependent(entities, locals, ranks, keys, parents, owner, depth + 1);
            let label = ranked_name(&dependent_label(&locals[index], &locals[owner]), ranks);
            parents[index] = Some(owner_key.clone());
            format!("{}/{}", owner_key, label)
        }
        None => ranked_name(&locals[index], ranks),
    };
    keys[index] = Some(key.clone());
    key
}

/// Rank of each rack number within its group, 1 for the lowest
type RackRanks = HashMap<(String, u64), usize>;

/// Rank the racks of every addressed device and dependent per group
fn rack_ranks(entities: &[Entity], locals: &[String]) -> RackRanks {
    let mut racks: HashMap<String, BTreeSet<u64>> = HashMap::new();
    for (entity, local) in entities.iter().zip(locals) {
        if entity.kind == EntityKind::Net {
            continue;
        }
        if let Some(address) = parse_address(local) {
            racks.entry(address.group).or_default().insert(address.rack);
        }
    }
    racks
        .into_iter()
        .flat_map(|(group, set)| {
            set.into_iter()
                .enumerate()
                .map(move |(position, rack)| ((group.clone(), rack), position + 1))
        })
        .collect()
}

/// `group|R<rank>|S<slot>` for an addressed name, the name itself otherwise
fn ranked_name(local: &str, ranks: &RackRanks) -> String {
    match parse_address(local) {
        Some(address) => {
            let rank = ranks.get(&(address.group.clone(), address.rack)).copied().unwrap_or(0);
            format!("{}|R{}|S{}", address.group, rank, address.slot)
        }
        None => local.to_string(),
    }
}

/// Local name with the owner's local name removed from the front
fn dependent_label(local: &str, owner_local: &str) -> String {
    let stripped = local
        .strip_prefix(owner_local)
        .map(|rest| rest.trim_start_matches(|c: char| c == '.' || c == '/' || c == '-' || c.is_whitespace()))
        .filter(|rest| !rest.is_empty());
    match stripped {
        Some(rest) => rest.to_string(),
        None => local.to_string(),
    }
}

/// Type plus the name with any address suffix removed
fn base_label(entity: &Entity, local: &str) -> String {
    let name = match parse_address(local) {
        Some(address) => address.group,
        None => local.to_string(),
    };
    if entity.entity_type.trim().is_empty() {
        name
    } else {
        format!("{}:{}", normalize_name(&entity.entity_type), name)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SiblingOrder {
    address: Option<(u64, u64)>,
    channel: (Option<u64>, String),
    name: String,
}

fn sibling_order(entity: &Entity, local: &str) -> SiblingOrder {
    let address = entity
        .address
        .as_deref()
        .and_then(parse_bare_address)
        .or_else(|| parse_address(local).map(|a| (a.rack, a.slot)));
    let channel = entity.channel.as_deref().map(str::trim).unwrap_or("");
    SiblingOrder {
        address,
        channel: (channel.parse().ok(), channel.to_string()),
        name: local.to_string(),
    }
}

/// Group siblings by base label and number each group from 1
fn number_siblings(entities: &[Entity], locals: &[String], siblings: &[usize]) -> Vec<(usize, String)> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for &net in siblings {
        groups.entry(base_label(&entities[net], &locals[net])).or_default().push(net);
    }
    let mut labels = Vec::with_capacity(siblings.len());
    for (base, mut members) in groups {
        members.sort_by_key(|&net| sibling_order(&entities[net], &locals[net]));
        for (ordinal, net) in members.into_iter().enumerate() {
            labels.push((net, format!("{}#{}", base, ordinal + 1)));
        }
    }
    labels
}

/// Cut parent links that close a cycle, at the member with the smallest name
fn break_cycles(nets: &[usize], locals: &[String], net_parent: &mut HashMap<usize, usize>) {
    let mut ordered = nets.to_vec();
    ordered.sort_by(|&a, &b| locals[a].cmp(&locals[b]).then(a.cmp(&b)));
    for &start in &ordered {
        let mut path = vec![start];
        let mut current = start;
        while let Some(&parent) = net_parent.get(&current) {
            if let Some(position) = path.iter().position(|&n| n == parent) {
                let cycle = &path[position..];
                if let Some(&cut) = cycle
                    .iter()
                    .min_by(|&&a, &&b| locals[a].cmp(&locals[b]).then(a.cmp(&b)))
                {
                    log::warn!("Parent cycle through net '{}', treating it as a root", locals[cut]);
                    net_parent.remove(&cut);
                }
                break;
            }
            path.push(parent);
            current = parent;
        }
    }
}
