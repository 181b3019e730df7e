// intervals.rs
//
// Genomic positions for measured sites and annotation regions, and the
// sort-and-sweep overlap search that links the two.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};

use crate::error::{RegionalPcaError, Result};

// --- Strand ---

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug, PartialOrd, Ord, Default)]
pub enum Strand {
    /// Forward strand.
    Forward,
    /// Reverse strand.
    Reverse,
    /// No strand.
    #[default]
    None,
}

impl Strand {
    /// Unstranded intervals are compatible with either strand.
    pub fn is_compatible(self, other: Strand) -> bool {
        self == Strand::None || other == Strand::None || self == other
    }
}

impl FromStr for Strand {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Ok(Strand::None),
        }
    }
}

impl From<Strand> for char {
    fn from(value: Strand) -> Self {
        match value {
            Strand::Forward => '+',
            Strand::Reverse => '-',
            Strand::None => '*',
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", char::from(*self))
    }
}

// --- Interval Abstraction ---

/// Anything with a half-open `[start, end)` position on a named chromosome.
///
/// An interval with `start == end` is read as covering the single base at
/// `start`, so point sites still land inside the regions that contain them.
pub trait GenomicInterval {
    fn id(&self) -> &str;
    fn chrom(&self) -> &str;
    fn start(&self) -> u64;
    fn end(&self) -> u64;

    fn strand(&self) -> Strand {
        Strand::None
    }

    fn is_malformed(&self) -> bool {
        self.start() > self.end()
    }

    /// End coordinate after widening zero-length intervals to one base.
    fn effective_end(&self) -> u64 {
        if self.end() == self.start() {
            self.start().saturating_add(1)
        } else {
            self.end()
        }
    }
}

/// A measured position (e.g. a CpG probe). Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site {
    id: String,
    chrom: String,
    start: u64,
    end: u64,
    strand: Strand,
}

impl Site {
    pub fn new(
        id: impl Into<String>,
        chrom: impl Into<String>,
        start: u64,
        end: u64,
        strand: Strand,
    ) -> Self {
        Self {
            id: id.into(),
            chrom: chrom.into(),
            start,
            end,
            strand,
        }
    }

    /// Single-base site at `position`.
    pub fn point(id: impl Into<String>, chrom: impl Into<String>, position: u64) -> Self {
        Self::new(id, chrom, position, position.saturating_add(1), Strand::None)
    }

    /// Builds a site whose id is a composite `chrom_start_end[_name]` key.
    pub fn from_key(key: &str) -> Result<Self> {
        let parsed = SiteKey::parse(key)?;
        Ok(Self::new(
            key,
            parsed.chrom,
            parsed.start,
            parsed.end,
            Strand::None,
        ))
    }
}

impl GenomicInterval for Site {
    fn id(&self) -> &str {
        &self.id
    }
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn start(&self) -> u64 {
        self.start
    }
    fn end(&self) -> u64 {
        self.end
    }
    fn strand(&self) -> Strand {
        self.strand
    }
}

/// An annotation interval (gene body, promoter, ...). Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    id: String,
    chrom: String,
    start: u64,
    end: u64,
    strand: Strand,
}

impl Region {
    pub fn new(
        id: impl Into<String>,
        chrom: impl Into<String>,
        start: u64,
        end: u64,
        strand: Strand,
    ) -> Self {
        Self {
            id: id.into(),
            chrom: chrom.into(),
            start,
            end,
            strand,
        }
    }
}

impl GenomicInterval for Region {
    fn id(&self) -> &str {
        &self.id
    }
    fn chrom(&self) -> &str {
        &self.chrom
    }
    fn start(&self) -> u64 {
        self.start
    }
    fn end(&self) -> u64 {
        self.end
    }
    fn strand(&self) -> Strand {
        self.strand
    }
}

// --- Composite Site Keys ---

/// Parsed form of a `chrom_start_end[_name]` matrix row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteKey {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub name: Option<String>,
}

impl SiteKey {
    /// Chromosome names and probe names may themselves contain underscores
    /// (`chrUn_gl000220`); the coordinates are the first two consecutive
    /// integer fields after a non-empty chromosome prefix.
    pub fn parse(key: &str) -> Result<Self> {
        let fields: Vec<&str> = key.split('_').collect();
        for i in 1..fields.len().saturating_sub(1) {
            let (Ok(start), Ok(end)) = (fields[i].parse::<u64>(), fields[i + 1].parse::<u64>())
            else {
                continue;
            };
            let chrom = fields[..i].join("_");
            if chrom.is_empty() {
                break;
            }
            let name = if i + 2 < fields.len() {
                Some(fields[i + 2..].join("_"))
            } else {
                None
            };
            return Ok(Self {
                chrom,
                start,
                end,
                name,
            });
        }
        Err(RegionalPcaError::InvalidSiteKey(key.to_string()))
    }
}

// --- Overlap Engine ---

/// Index pair into the query and subject slices handed to
/// [`OverlapEngine::find_overlaps`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlapPair {
    pub query: usize,
    pub subject: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Overlaps {
    /// Sorted by query index, then subject index.
    pub pairs: Vec<OverlapPair>,
    pub rejected_queries: Vec<usize>,
    pub rejected_subjects: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Query,
    Subject,
}

#[derive(Debug)]
struct SweepEntry<'a> {
    chrom: &'a str,
    start: u64,
    end: u64,
    strand: Strand,
    side: Side,
    idx: usize,
}

#[derive(Debug, Clone, Copy)]
struct ActiveInterval {
    end: u64,
    strand: Strand,
    idx: usize,
}

/// Finds every intersecting (query, subject) pair on the same chromosome.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapEngine {
    strand_aware: bool,
}

impl OverlapEngine {
    pub fn new(strand_aware: bool) -> Self {
        Self { strand_aware }
    }

    pub fn strand_aware(&self) -> bool {
        self.strand_aware
    }

    pub fn find_overlaps<Q, S>(&self, queries: &[Q], subjects: &[S]) -> Result<Overlaps>
    where
        Q: GenomicInterval,
        S: GenomicInterval,
    {
        let rejected_queries = reject_malformed(queries, "query")?;
        let rejected_subjects = reject_malformed(subjects, "subject")?;

        let mut entries: Vec<SweepEntry<'_>> =
            Vec::with_capacity(queries.len() + subjects.len());
        collect_entries(queries, Side::Query, &rejected_queries, &mut entries);
        collect_entries(subjects, Side::Subject, &rejected_subjects, &mut entries);

        entries.sort_by(|a, b| {
            a.chrom
                .cmp(b.chrom)
                .then(a.start.cmp(&b.start))
                .then(a.side.cmp(&b.side))
                .then(a.idx.cmp(&b.idx))
        });

        let mut pairs = Vec::new();
        let mut active_queries: Vec<ActiveInterval> = Vec::new();
        let mut active_subjects: Vec<ActiveInterval> = Vec::new();
        let mut current_chrom: Option<&str> = None;

        for entry in &entries {
            if current_chrom != Some(entry.chrom) {
                active_queries.clear();
                active_subjects.clear();
                current_chrom = Some(entry.chrom);
            }

            let (opposite, own) = match entry.side {
                Side::Query => (&mut active_subjects, &mut active_queries),
                Side::Subject => (&mut active_queries, &mut active_subjects),
            };

            // Anything still open past this start intersects the new interval,
            // because the new interval ends strictly after its own start.
            opposite.retain(|active| active.end > entry.start);
            for active in opposite.iter() {
                if self.strand_aware && !entry.strand.is_compatible(active.strand) {
                    continue;
                }
                pairs.push(match entry.side {
                    Side::Query => OverlapPair {
                        query: entry.idx,
                        subject: active.idx,
                    },
                    Side::Subject => OverlapPair {
                        query: active.idx,
                        subject: entry.idx,
                    },
                });
            }
            own.push(ActiveInterval {
                end: entry.end,
                strand: entry.strand,
                idx: entry.idx,
            });
        }

        pairs.sort_unstable();
        debug!(
            "Overlap sweep over {} queries x {} subjects produced {} pairs (strand aware: {}).",
            queries.len(),
            subjects.len(),
            pairs.len(),
            self.strand_aware
        );

        Ok(Overlaps {
            pairs,
            rejected_queries,
            rejected_subjects,
        })
    }
}

fn reject_malformed<I: GenomicInterval>(intervals: &[I], kind: &'static str) -> Result<Vec<usize>> {
    let rejected: Vec<usize> = intervals
        .iter()
        .enumerate()
        .filter(|(_, interval)| interval.is_malformed())
        .map(|(idx, _)| idx)
        .collect();

    for &idx in rejected.iter().take(10) {
        let interval = &intervals[idx];
        warn!(
            "{}",
            RegionalPcaError::MalformedInterval {
                id: interval.id().to_string(),
                chrom: interval.chrom().to_string(),
                start: interval.start(),
                end: interval.end(),
            }
        );
    }
    if rejected.len() > 10 {
        warn!("... and {} more malformed {} intervals.", rejected.len() - 10, kind);
    }

    if !intervals.is_empty() && rejected.len() == intervals.len() {
        return Err(RegionalPcaError::AllIntervalsMalformed {
            kind,
            count: intervals.len(),
        });
    }
    if !rejected.is_empty() {
        info!(
            "Rejected {} / {} malformed {} intervals.",
            rejected.len(),
            intervals.len(),
            kind
        );
    }
    Ok(rejected)
}

fn collect_entries<'a, I: GenomicInterval>(
    intervals: &'a [I],
    side: Side,
    rejected: &[usize],
    entries: &mut Vec<SweepEntry<'a>>,
) {
    let mut rejected_iter = rejected.iter().peekable();
    for (idx, interval) in intervals.iter().enumerate() {
        if rejected_iter.peek() == Some(&&idx) {
            rejected_iter.next();
            continue;
        }
        entries.push(SweepEntry {
            chrom: interval.chrom(),
            start: interval.start(),
            end: interval.effective_end(),
            strand: interval.strand(),
            side,
            idx,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn naive_overlaps(sites: &[Site], regions: &[Region], strand_aware: bool) -> Vec<OverlapPair> {
        let mut pairs = Vec::new();
        for (q, site) in sites.iter().enumerate() {
            for (s, region) in regions.iter().enumerate() {
                if site.chrom() != region.chrom() {
                    continue;
                }
                if strand_aware && !site.strand().is_compatible(region.strand()) {
                    continue;
                }
                if site.start() < region.effective_end() && region.start() < site.effective_end() {
                    pairs.push(OverlapPair { query: q, subject: s });
                }
            }
        }
        pairs
    }

    #[test]
    fn test_site_inside_region_overlaps() {
        let sites = vec![Site::new("cg1", "chr1", 100, 101, Strand::None)];
        let regions = vec![Region::new("A", "chr1", 50, 200, Strand::None)];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        assert_eq!(overlaps.pairs, vec![OverlapPair { query: 0, subject: 0 }]);
    }

    #[test]
    fn test_other_chromosome_does_not_overlap() {
        let sites = vec![Site::new("cg1", "chr2", 100, 101, Strand::None)];
        let regions = vec![Region::new("A", "chr1", 50, 200, Strand::None)];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        assert!(overlaps.pairs.is_empty());
    }

    #[test]
    fn test_zero_length_site_matches_containing_base() {
        let sites = vec![
            Site::new("inside", "chr1", 199, 199, Strand::None),
            Site::new("at_end", "chr1", 200, 200, Strand::None),
            Site::new("at_start", "chr1", 50, 50, Strand::None),
        ];
        let regions = vec![Region::new("A", "chr1", 50, 200, Strand::None)];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        let hits: Vec<usize> = overlaps.pairs.iter().map(|p| p.query).collect();
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn test_half_open_boundaries() {
        let sites = vec![
            Site::new("left", "chr1", 49, 50, Strand::None),
            Site::new("right", "chr1", 200, 201, Strand::None),
        ];
        let regions = vec![Region::new("A", "chr1", 50, 200, Strand::None)];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        assert!(overlaps.pairs.is_empty());
    }

    #[test]
    fn test_strand_aware_mode() {
        let sites = vec![
            Site::new("plus", "chr1", 100, 101, Strand::Forward),
            Site::new("minus", "chr1", 100, 101, Strand::Reverse),
            Site::new("none", "chr1", 100, 101, Strand::None),
        ];
        let regions = vec![Region::new("A", "chr1", 50, 200, Strand::Forward)];

        let unaware = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        assert_eq!(unaware.pairs.len(), 3);

        let aware = OverlapEngine::new(true).find_overlaps(&sites, &regions).unwrap();
        let hits: Vec<usize> = aware.pairs.iter().map(|p| p.query).collect();
        assert_eq!(hits, vec![0, 2]);
    }

    #[test]
    fn test_malformed_intervals_rejected_not_fatal() {
        let sites = vec![
            Site::new("bad", "chr1", 150, 120, Strand::None),
            Site::new("good", "chr1", 120, 121, Strand::None),
        ];
        let regions = vec![Region::new("A", "chr1", 100, 200, Strand::None)];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        assert_eq!(overlaps.rejected_queries, vec![0]);
        assert_eq!(overlaps.pairs, vec![OverlapPair { query: 1, subject: 0 }]);
    }

    #[test]
    fn test_all_malformed_is_fatal() {
        let sites = vec![Site::new("cg1", "chr1", 100, 101, Strand::None)];
        let regions = vec![
            Region::new("A", "chr1", 300, 200, Strand::None),
            Region::new("B", "chr1", 30, 20, Strand::None),
        ];
        let err = OverlapEngine::new(false)
            .find_overlaps(&sites, &regions)
            .unwrap_err();
        assert!(matches!(
            err,
            RegionalPcaError::AllIntervalsMalformed { count: 2, .. }
        ));
    }

    #[test]
    fn test_site_in_overlapping_regions_reported_for_each() {
        let sites = vec![Site::point("cg1", "chr1", 150)];
        let regions = vec![
            Region::new("P1", "chr1", 100, 200, Strand::None),
            Region::new("P2", "chr1", 140, 400, Strand::None),
            Region::new("P3", "chr1", 151, 400, Strand::None),
        ];
        let overlaps = OverlapEngine::new(false).find_overlaps(&sites, &regions).unwrap();
        let subjects: Vec<usize> = overlaps.pairs.iter().map(|p| p.subject).collect();
        assert_eq!(subjects, vec![0, 1]);
    }

    #[test]
    fn test_sweep_matches_naive_search() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let chroms = ["chr1", "chr2", "chrX"];
        let strands = [Strand::Forward, Strand::Reverse, Strand::None];

        let sites: Vec<Site> = (0..300)
            .map(|i| {
                let start = rng.random_range(0..5_000u64);
                let width = rng.random_range(0..3u64);
                Site::new(
                    format!("s{}", i),
                    chroms[rng.random_range(0..chroms.len())],
                    start,
                    start + width,
                    strands[rng.random_range(0..strands.len())],
                )
            })
            .collect();
        let regions: Vec<Region> = (0..80)
            .map(|i| {
                let start = rng.random_range(0..5_000u64);
                let width = rng.random_range(1..400u64);
                Region::new(
                    format!("r{}", i),
                    chroms[rng.random_range(0..chroms.len())],
                    start,
                    start + width,
                    strands[rng.random_range(0..strands.len())],
                )
            })
            .collect();

        for strand_aware in [false, true] {
            let swept = OverlapEngine::new(strand_aware)
                .find_overlaps(&sites, &regions)
                .unwrap();
            assert_eq!(swept.pairs, naive_overlaps(&sites, &regions, strand_aware));
        }
    }

    #[test]
    fn test_parse_site_key() {
        let key = SiteKey::parse("chr1_100_101_cg0001").unwrap();
        assert_eq!(key.chrom, "chr1");
        assert_eq!((key.start, key.end), (100, 101));
        assert_eq!(key.name.as_deref(), Some("cg0001"));

        let key = SiteKey::parse("chrUn_gl000220_5_6_cg_x").unwrap();
        assert_eq!(key.chrom, "chrUn_gl000220");
        assert_eq!((key.start, key.end), (5, 6));
        assert_eq!(key.name.as_deref(), Some("cg_x"));

        let key = SiteKey::parse("chr2_7_8").unwrap();
        assert_eq!(key.name, None);

        assert!(SiteKey::parse("cg0001").is_err());
        assert!(SiteKey::parse("_1_2_x").is_err());
    }

    #[test]
    fn test_site_from_key() {
        let site = Site::from_key("chr3_10_11_cgA").unwrap();
        assert_eq!(site.id(), "chr3_10_11_cgA");
        assert_eq!(site.chrom(), "chr3");
        assert_eq!((site.start(), site.end()), (10, 11));
    }
}
