// region_map.rs

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::error::{RegionalPcaError, Result};
use crate::intervals::{GenomicInterval, OverlapEngine, Region, Site};

/// One site assigned to one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionSiteLink {
    pub region_id: String,
    pub site_id: String,
}

impl RegionSiteLink {
    pub fn new(region_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            site_id: site_id.into(),
        }
    }
}

/// Ordered site -> region assignment table.
///
/// A site may appear under several regions; a repeated (region, site) pair is
/// stored once. Read-only after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMap {
    links: Vec<RegionSiteLink>,
}

impl RegionMap {
    pub fn new<I>(links: I) -> Self
    where
        I: IntoIterator<Item = RegionSiteLink>,
    {
        let mut seen: HashSet<RegionSiteLink> = HashSet::new();
        let mut deduplicated = Vec::new();
        let mut repeats = 0usize;
        for link in links {
            if seen.insert(link.clone()) {
                deduplicated.push(link);
            } else {
                repeats += 1;
            }
        }
        if repeats > 0 {
            debug!("RegionMap: collapsed {} repeated (region, site) pairs.", repeats);
        }
        Self {
            links: deduplicated,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[RegionSiteLink] {
        &self.links
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionSiteLink> {
        self.links.iter()
    }

    /// Distinct region ids in the order they first appear.
    pub fn region_ids(&self) -> Vec<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        self.links
            .iter()
            .map(|link| link.region_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

impl FromIterator<RegionSiteLink> for RegionMap {
    fn from_iter<T: IntoIterator<Item = RegionSiteLink>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a RegionMap {
    type Item = &'a RegionSiteLink;
    type IntoIter = std::slice::Iter<'a, RegionSiteLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}

/// Turns site and region position tables into a [`RegionMap`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionMapBuilder {
    engine: OverlapEngine,
}

impl RegionMapBuilder {
    pub fn new(strand_aware: bool) -> Self {
        Self {
            engine: OverlapEngine::new(strand_aware),
        }
    }

    /// Links are emitted in region-table order, then site-table order.
    pub fn build(&self, sites: &[Site], regions: &[Region]) -> Result<RegionMap> {
        info!(
            "Building region map from {} sites and {} regions (strand aware: {})...",
            sites.len(),
            regions.len(),
            self.engine.strand_aware()
        );
        check_site_identifiers(sites)?;
        log_repeated_region_ids(regions);

        let overlaps = self.engine.find_overlaps(sites, regions)?;
        let mut pairs = overlaps.pairs;
        pairs.sort_unstable_by_key(|pair| (pair.subject, pair.query));

        let region_map: RegionMap = pairs
            .iter()
            .map(|pair| RegionSiteLink::new(regions[pair.subject].id(), sites[pair.query].id()))
            .collect();

        let mapped_sites: HashSet<&str> = region_map.iter().map(|l| l.site_id.as_str()).collect();
        let mapped_regions = region_map.region_ids().len();
        info!(
            "Region map: {} links, {} / {} sites assigned, {} / {} regions with at least one site.",
            region_map.len(),
            mapped_sites.len(),
            sites.len(),
            mapped_regions,
            regions.len()
        );
        if region_map.is_empty() {
            warn!("No site overlapped any region. Check that both tables use the same genome build and chromosome naming.");
        }
        Ok(region_map)
    }
}

type Coordinates<'a> = (&'a str, u64, u64, char);

fn coordinates(site: &Site) -> Coordinates<'_> {
    (site.chrom(), site.start(), site.end(), char::from(site.strand()))
}

/// Site ids must be unique, and no two distinct ids may share a position:
/// either case makes the id recovered for an overlap ambiguous.
fn check_site_identifiers(sites: &[Site]) -> Result<()> {
    let mut by_id: HashMap<&str, Coordinates<'_>> = HashMap::with_capacity(sites.len());
    let mut by_position: HashMap<Coordinates<'_>, &str> = HashMap::with_capacity(sites.len());

    for site in sites {
        let position = coordinates(site);
        if let Some(previous) = by_id.insert(site.id(), position) {
            if previous == position {
                return Err(RegionalPcaError::DuplicateIdentifier {
                    kind: "site",
                    id: site.id().to_string(),
                });
            }
            return Err(RegionalPcaError::IdentifierCollision(format!(
                "site id '{}' is used for {}:{}-{} and {}:{}-{}",
                site.id(),
                previous.0,
                previous.1,
                previous.2,
                position.0,
                position.1,
                position.2
            )));
        }
        if let Some(other_id) = by_position.insert(position, site.id()) {
            return Err(RegionalPcaError::IdentifierCollision(format!(
                "sites '{}' and '{}' share position {}:{}-{} ({})",
                other_id,
                site.id(),
                position.0,
                position.1,
                position.2,
                position.3
            )));
        }
    }
    Ok(())
}

fn log_repeated_region_ids(regions: &[Region]) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for region in regions {
        *counts.entry(region.id()).or_default() += 1;
    }
    let multi_interval = counts.values().filter(|&&count| count > 1).count();
    if multi_interval > 0 {
        debug!(
            "{} region ids span more than one interval; their sites are pooled per id.",
            multi_interval
        );
    }
}
