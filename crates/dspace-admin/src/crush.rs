// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Crush content generator.
//!
//! Builds the bucket tree of one crush rule from a set of osds and a fault
//! domain. Output is deterministic for a given input set. When regenerating
//! from existing content, buckets keep their ids by name so ceph sees the
//! smallest possible change; new buckets get ids below every existing one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dspace_tools::{BucketType, CrushBucket, CrushContent, CrushOsd, FaultDomain};

const DEFAULT_LOCATION: &str = "default";

/// Where one osd sits in the physical topology.
#[derive(Debug, Clone, PartialEq)]
pub struct OsdPlacement {
    pub osd_id: i64,
    pub name: String,
    pub weight: f64,
    pub host: String,
    pub rack: Option<String>,
    pub datacenter: Option<String>,
}

impl OsdPlacement {
    fn rack(&self) -> &str {
        self.rack.as_deref().unwrap_or(DEFAULT_LOCATION)
    }

    fn datacenter(&self) -> &str {
        self.datacenter.as_deref().unwrap_or(DEFAULT_LOCATION)
    }

    /// Name of the fault-domain bucket this osd falls in.
    pub fn fault_domain(&self, rule_name: &str, fault_domain: FaultDomain) -> String {
        match fault_domain {
            FaultDomain::Host => host_bucket(rule_name, &self.host),
            FaultDomain::Rack => rack_bucket(rule_name, self.rack()),
            FaultDomain::Datacenter => dc_bucket(rule_name, self.datacenter()),
        }
    }
}

fn root_bucket(rule: &str) -> String {
    format!("{rule}-root")
}

fn host_bucket(rule: &str, host: &str) -> String {
    format!("{rule}-host-{host}")
}

fn rack_bucket(rule: &str, rack: &str) -> String {
    format!("{rule}-rack-{rack}")
}

fn dc_bucket(rule: &str, dc: &str) -> String {
    format!("{rule}-dc-{dc}")
}

/// Distinct fault-domain buckets touched by `osds`.
pub fn fault_domains_of(rule_name: &str, fault_domain: FaultDomain, osds: &[OsdPlacement]) -> BTreeSet<String> {
    osds.iter().map(|o| o.fault_domain(rule_name, fault_domain)).collect()
}

type Hosts<'a> = BTreeMap<&'a str, Vec<&'a OsdPlacement>>;
type Racks<'a> = BTreeMap<&'a str, Hosts<'a>>;

#[derive(Debug, Clone)]
pub struct CrushGenerator {
    rule_name: String,
    fault_domain: FaultDomain,
    osds: Vec<OsdPlacement>,
    preserved: HashMap<String, i64>,
}

impl CrushGenerator {
    pub fn new(rule_name: impl Into<String>, fault_domain: FaultDomain, osds: Vec<OsdPlacement>) -> Self {
        Self {
            rule_name: rule_name.into(),
            fault_domain,
            osds,
            preserved: HashMap::new(),
        }
    }

    /// Regenerate `existing` over a new osd set, keeping bucket ids by name.
    pub fn from_content(existing: &CrushContent, osds: Vec<OsdPlacement>) -> Self {
        let preserved = existing
            .buckets()
            .into_iter()
            .map(|(_, b)| (b.name.clone(), b.id))
            .collect();
        Self {
            rule_name: existing.rule_name.clone(),
            fault_domain: existing.fault_domain,
            osds,
            preserved,
        }
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn gen_content(&self) -> CrushContent {
        let mut ids = IdAllocator {
            preserved: &self.preserved,
            next: self.preserved.values().copied().min().unwrap_or(0).min(0) - 1,
        };

        let mut sorted: Vec<&OsdPlacement> = self.osds.iter().collect();
        sorted.sort_by_key(|o| o.osd_id);
        sorted.dedup_by_key(|o| o.osd_id);

        let mut tree: BTreeMap<&str, Racks<'_>> = BTreeMap::new();
        for osd in sorted {
            tree.entry(osd.datacenter())
                .or_default()
                .entry(osd.rack())
                .or_default()
                .entry(osd.host.as_str())
                .or_default()
                .push(osd);
        }

        let rule = self.rule_name.as_str();
        let root_name = root_bucket(rule);
        let root_id = ids.id(&root_name);
        let children = match self.fault_domain {
            FaultDomain::Host => {
                let mut hosts: Hosts<'_> = BTreeMap::new();
                for racks in tree.values() {
                    for rack in racks.values() {
                        for (host, osds) in rack {
                            hosts.entry(*host).or_default().extend(osds.iter().copied());
                        }
                    }
                }
                self.hosts(&mut ids, &hosts)
            }
            FaultDomain::Rack => {
                let mut racks: Racks<'_> = BTreeMap::new();
                for dc in tree.values() {
                    for (rack, hosts) in dc {
                        let entry = racks.entry(*rack).or_default();
                        for (host, osds) in hosts {
                            entry.entry(*host).or_default().extend(osds.iter().copied());
                        }
                    }
                }
                self.racks(&mut ids, &racks)
            }
            FaultDomain::Datacenter => tree
                .iter()
                .map(|(dc, racks)| {
                    let name = dc_bucket(rule, dc);
                    let id = ids.id(&name);
                    CrushBucket {
                        id,
                        name,
                        bucket_type: BucketType::Datacenter,
                        children: self.racks(&mut ids, racks),
                        osds: Vec::new(),
                    }
                })
                .collect(),
        };

        CrushContent {
            rule_name: self.rule_name.clone(),
            fault_domain: self.fault_domain,
            root: CrushBucket {
                id: root_id,
                name: root_name,
                bucket_type: BucketType::Root,
                children,
                osds: Vec::new(),
            },
        }
    }

    fn racks(&self, ids: &mut IdAllocator<'_>, racks: &Racks<'_>) -> Vec<CrushBucket> {
        racks
            .iter()
            .map(|(rack, hosts)| {
                let name = rack_bucket(&self.rule_name, rack);
                let id = ids.id(&name);
                CrushBucket {
                    id,
                    name,
                    bucket_type: BucketType::Rack,
                    children: self.hosts(ids, hosts),
                    osds: Vec::new(),
                }
            })
            .collect()
    }

    fn hosts(&self, ids: &mut IdAllocator<'_>, hosts: &Hosts<'_>) -> Vec<CrushBucket> {
        hosts
            .iter()
            .map(|(host, osds)| {
                let name = host_bucket(&self.rule_name, host);
                let mut leaves: Vec<CrushOsd> = osds
                    .iter()
                    .map(|o| CrushOsd {
                        id: o.osd_id,
                        name: o.name.clone(),
                        weight: o.weight,
                    })
                    .collect();
                leaves.sort_by_key(|o| o.id);
                CrushBucket {
                    id: ids.id(&name),
                    name,
                    bucket_type: BucketType::Host,
                    children: Vec::new(),
                    osds: leaves,
                }
            })
            .collect()
    }
}

struct IdAllocator<'a> {
    preserved: &'a HashMap<String, i64>,
    next: i64,
}

impl IdAllocator<'_> {
    fn id(&mut self, name: &str) -> i64 {
        if let Some(id) = self.preserved.get(name) {
            return *id;
        }
        let id = self.next;
        self.next -= 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn osd(id: i64, host: &str, rack: Option<&str>) -> OsdPlacement {
        OsdPlacement {
            osd_id: id,
            name: format!("osd.{id}"),
            weight: 1.0,
            host: host.to_string(),
            rack: rack.map(str::to_string),
            datacenter: None,
        }
    }

    fn three_hosts() -> Vec<OsdPlacement> {
        vec![osd(1, "n1", None), osd(2, "n2", None), osd(3, "n3", None)]
    }

    #[test]
    fn test_host_hierarchy() {
        let content = CrushGenerator::new("r1", FaultDomain::Host, three_hosts()).gen_content();
        assert_eq!(content.root.name, "r1-root");
        assert_eq!(content.root.id, -1);
        assert_eq!(content.root.children.len(), 3);
        assert!(content.root.children.iter().all(|b| b.bucket_type == BucketType::Host));
        assert_eq!(content.osd_ids(), vec![1, 2, 3]);
        assert_eq!(content.fault_domains(), vec!["r1-host-n1", "r1-host-n2", "r1-host-n3"]);
    }

    #[test]
    fn test_rack_hierarchy_groups_hosts() {
        let osds = vec![
            osd(1, "n1", Some("a")),
            osd(2, "n2", Some("a")),
            osd(3, "n3", Some("b")),
            osd(4, "n3", Some("b")),
        ];
        let content = CrushGenerator::new("r1", FaultDomain::Rack, osds).gen_content();
        assert_eq!(content.fault_domains(), vec!["r1-rack-a", "r1-rack-b"]);
        let rack_b = &content.root.children[1];
        assert_eq!(rack_b.children.len(), 1);
        assert_eq!(rack_b.children[0].osds.len(), 2);
    }

    #[test]
    fn test_output_ignores_input_order() {
        let mut reversed = three_hosts();
        reversed.reverse();
        assert_eq!(
            CrushGenerator::new("r1", FaultDomain::Host, three_hosts()).gen_content(),
            CrushGenerator::new("r1", FaultDomain::Host, reversed).gen_content()
        );
    }

    #[test]
    fn test_round_trip_through_existing_content() {
        for fd in [FaultDomain::Host, FaultDomain::Rack, FaultDomain::Datacenter] {
            let osds = vec![osd(1, "n1", Some("a")), osd(2, "n2", Some("b")), osd(5, "n2", Some("b"))];
            let first = CrushGenerator::new("r1", fd, osds.clone()).gen_content();
            let again = CrushGenerator::from_content(&first, osds).gen_content();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_regeneration_preserves_bucket_ids() {
        let first = CrushGenerator::new("r1", FaultDomain::Host, three_hosts()).gen_content();
        let n3_id = first.root.children[2].id;

        // drop n1, add n4
        let osds = vec![osd(2, "n2", None), osd(3, "n3", None), osd(4, "n4", None)];
        let next = CrushGenerator::from_content(&first, osds).gen_content();
        assert_eq!(next.root.id, first.root.id);
        let names: Vec<_> = next.root.children.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["r1-host-n2", "r1-host-n3", "r1-host-n4"]);
        assert_eq!(next.root.children[1].id, n3_id);
        let min_before = first.buckets().iter().map(|(_, b)| b.id).min().unwrap();
        assert!(next.root.children[2].id < min_before);
    }

    #[test]
    fn test_fault_domains_of_removed_osds() {
        let osds = vec![osd(1, "n1", Some("a")), osd(2, "n2", Some("a"))];
        assert_eq!(fault_domains_of("r1", FaultDomain::Host, &osds).len(), 2);
        assert_eq!(fault_domains_of("r1", FaultDomain::Rack, &osds).len(), 1);
    }
}
