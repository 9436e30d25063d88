use crate::ScanError;
use itertools::Itertools;
use std::fmt;
use std::str::FromStr;

/// A set of non-negative integers stored as sorted, disjoint, inclusive ranges.
///
/// Adjacent ranges are always coalesced, so two collections holding the same
/// elements have identical range lists and identical text forms.
/// The text form is a comma separated list of `a` or `a-b` items, e.g. `0-99,150,200-210`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeCollection {
    ranges: Vec<(u64, u64)>,
}

impl RangeCollection {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Collection holding every element of `first..=last`
    pub fn from_range(first: u64, last: u64) -> Self {
        let mut collection = Self::new();
        collection.add_range(first, last);
        collection
    }

    pub fn add(&mut self, element: u64) {
        self.add_range(element, element);
    }

    /// Returns false (and leaves the collection unchanged) if `element` was already present
    pub fn try_add(&mut self, element: u64) -> bool {
        if self.contains(element) {
            return false;
        }
        self.add(element);
        true
    }

    pub fn add_range(&mut self, first: u64, last: u64) {
        if last < first {
            return;
        }

        // First range that overlaps or touches [first, last]
        let start = self
            .ranges
            .partition_point(|&(_, hi)| hi.saturating_add(1) < first);

        let mut lo = first;
        let mut hi = last;
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].0 <= last.saturating_add(1) {
            lo = lo.min(self.ranges[end].0);
            hi = hi.max(self.ranges[end].1);
            end += 1;
        }

        self.ranges.splice(start..end, std::iter::once((lo, hi)));
    }

    /// Set union
    pub fn add_range_collection(&mut self, other: &RangeCollection) {
        for &(lo, hi) in &other.ranges {
            self.add_range(lo, hi);
        }
    }

    /// Adds every element of `other`. Returns false if any of them was already present.
    pub fn try_add_range_collection(&mut self, other: &RangeCollection) -> bool {
        let mut all_new = true;
        for &(lo, hi) in &other.ranges {
            if self.overlaps(lo, hi) {
                all_new = false;
            }
            self.add_range(lo, hi);
        }
        all_new
    }

    pub fn contains(&self, element: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < element);
        idx < self.ranges.len() && self.ranges[idx].0 <= element
    }

    /// True if the two collections share at least one element
    pub fn intersects(&self, other: &RangeCollection) -> bool {
        other.ranges.iter().any(|&(lo, hi)| self.overlaps(lo, hi))
    }

    fn overlaps(&self, first: u64, last: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, hi)| hi < first);
        idx < self.ranges.len() && self.ranges[idx].0 <= last
    }

    /// Number of elements (not ranges). Saturates at `u64::MAX` for `0-18446744073709551615`.
    pub fn count(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0u64, |total, &(lo, hi)| total.saturating_add((hi - lo).saturating_add(1)))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn first_element(&self) -> Option<u64> {
        self.ranges.first().map(|&(lo, _)| lo)
    }

    pub fn last_element(&self) -> Option<u64> {
        self.ranges.last().map(|&(_, hi)| hi)
    }

    /// True iff the collection is exactly `{0, 1, ..., total - 1}`
    pub fn is_complete(&self, total: u64) -> bool {
        if total == 0 {
            return self.ranges.is_empty();
        }
        self.ranges.len() == 1 && self.ranges[0] == (0, total - 1)
    }

    /// True if every element lies in `low..=high`. An empty collection is always between.
    pub fn is_between(&self, low: u64, high: u64) -> bool {
        match (self.first_element(), self.last_element()) {
            (Some(first), Some(last)) => first >= low && last <= high,
            _ => true,
        }
    }

    /// Elements of `low..=high` that are not in this collection
    pub fn complement(&self, low: u64, high: u64) -> RangeCollection {
        let mut result = RangeCollection::new();
        if high < low {
            return result;
        }

        let mut next = low;
        for &(lo, hi) in &self.ranges {
            if hi < next {
                continue;
            }
            if lo > high {
                break;
            }
            if lo > next {
                result.ranges.push((next, lo - 1));
            }
            if hi >= high {
                return result;
            }
            next = hi + 1;
        }
        result.ranges.push((next, high));
        result
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// The inclusive `(first, last)` pairs in ascending order
    pub fn ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().copied()
    }

    pub fn elements(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(lo, hi)| lo..=hi)
    }
}

impl fmt::Display for RangeCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .ranges
            .iter()
            .map(|&(lo, hi)| {
                if lo == hi {
                    lo.to_string()
                } else {
                    format!("{}-{}", lo, hi)
                }
            })
            .join(",");
        f.write_str(&text)
    }
}

impl FromStr for RangeCollection {
    type Err = ScanError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut collection = RangeCollection::new();
        let text = text.trim();
        if text.is_empty() {
            return Ok(collection);
        }

        for item in text.split(',') {
            let item = item.trim();
            let (first, last) = match item.split_once('-') {
                Some((a, b)) => (parse_element(a, text)?, parse_element(b, text)?),
                None => {
                    let element = parse_element(item, text)?;
                    (element, element)
                }
            };
            if last < first {
                return Err(ScanError::Parse(format!(
                    "range {} in \"{}\" ends before it begins",
                    item, text
                )));
            }
            collection.add_range(first, last);
        }
        Ok(collection)
    }
}

fn parse_element(item: &str, whole: &str) -> Result<u64, ScanError> {
    item.trim().parse::<u64>().map_err(|e| {
        ScanError::Parse(format!(
            "cannot parse \"{}\" in range text \"{}\": {}",
            item, whole, e
        ))
    })
}

impl FromIterator<u64> for RangeCollection {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut collection = RangeCollection::new();
        collection.extend(iter);
        collection
    }
}

impl Extend<u64> for RangeCollection {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for element in iter {
            self.add(element);
        }
    }
}
