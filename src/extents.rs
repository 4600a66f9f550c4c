//! # Extents Module
//!
//! An `Extents` object is a set of integers stored as closed ranges `[start,end]`.
//! It is used wherever a disk image has to remember a collection of addresses, such as
//! bad sectors, present tracks, or sectors that have already been written.
//!
//! The set always satisfies two invariants:
//! * stored extents are sorted in ascending order of their start
//! * no two stored extents overlap or touch, touching extents are merged on insertion
//!
//! Insertion works one point at a time, and the list is re-sorted after every mutation.
//! This is quadratic in the worst case, which is fine for the small sets images keep
//! (a list of damaged sectors, not a free-space map).
//!
//! The same algorithm serves every integer domain; use the `Extents8`, `Extents32`,
//! or `Extents64` aliases, or any other primitive integer.  Arithmetic at the domain
//! boundaries is checked, so the minimum and maximum of a domain can be stored safely.

use num_traits::PrimInt;
use std::fmt;

/// Set of `u8` values
pub type Extents8 = Extents<u8>;
/// Set of `u32` values
pub type Extents32 = Extents<u32>;
/// Set of `u64` values
pub type Extents64 = Extents<u64>;

/// Ordered list of disjoint, non-adjacent closed ranges
#[derive(Clone,Debug,PartialEq,Eq,Default)]
pub struct Extents<T: PrimInt> {
    backend: Vec<(T,T)>
}

/// value immediately before `x`, or None at the domain minimum
fn pred<T: PrimInt>(x: T) -> Option<T> {
    x.checked_sub(&T::one())
}

/// value immediately after `x`, or None at the domain maximum
fn succ<T: PrimInt>(x: T) -> Option<T> {
    x.checked_add(&T::one())
}

impl<T: PrimInt> Extents<T> {
    pub fn new() -> Self {
        Self {
            backend: Vec::new()
        }
    }
    /// Build from a list of closed ranges, which may overlap or come in any order.
    pub fn from_ranges(ranges: &[(T,T)]) -> Self {
        let mut ans = Self::new();
        for (start,end) in ranges {
            ans.add_range(*start,*end);
        }
        ans
    }
    /// Number of stored extents (not the number of values)
    pub fn count(&self) -> usize {
        self.backend.len()
    }
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
    pub fn clear(&mut self) {
        self.backend.clear();
    }
    /// Insert a single value.  If the value touches an extent, that extent grows;
    /// if the value closes the gap between two extents, they become one.
    pub fn add(&mut self,item: T) {
        let mut remove: Vec<usize> = Vec::new();
        let mut merged: Option<(T,T)> = None;
        for i in 0..self.backend.len() {
            let (start,end) = self.backend[i];
            if item >= start && item <= end {
                return;
            }
            // grow the start of this extent
            if pred(start) == Some(item) {
                remove.push(i);
                if i > 0 && succ(self.backend[i-1].1) == Some(item) {
                    remove.push(i-1);
                    merged = Some((self.backend[i-1].0,end));
                } else {
                    merged = Some((item,end));
                }
                break;
            }
            if succ(end) != Some(item) {
                continue;
            }
            // grow the end of this extent
            remove.push(i);
            if i+1 < self.backend.len() && pred(self.backend[i+1].0) == Some(item) {
                remove.push(i+1);
                merged = Some((start,self.backend[i+1].1));
            } else {
                merged = Some((start,item));
            }
            break;
        }
        remove.sort();
        for idx in remove.iter().rev() {
            self.backend.remove(*idx);
        }
        self.backend.push(merged.unwrap_or((item,item)));
        self.backend.sort_by(|a,b| a.0.cmp(&b.0));
    }
    /// Insert the closed range `[start,end]` one value at a time.
    /// Callers with very large ranges should batch their work.
    pub fn add_range(&mut self,start: T,end: T) {
        let mut curr = start;
        while curr <= end {
            self.add(curr);
            match succ(curr) {
                Some(next) => curr = next,
                None => break
            }
        }
    }
    /// Insert `length` values starting at `start`
    pub fn add_run(&mut self,start: T,length: T) {
        if length.is_zero() {
            return;
        }
        let end = match start.checked_add(&(length - T::one())) {
            Some(end) => end,
            None => T::max_value()
        };
        self.add_range(start,end);
    }
    /// Remove a single value, splitting or shrinking the extent that holds it.
    /// Returns false if the value was not in the set.
    pub fn remove(&mut self,item: T) -> bool {
        let mut found: Option<usize> = None;
        let mut replacements: Vec<(T,T)> = Vec::new();
        for i in 0..self.backend.len() {
            let (start,end) = self.backend[i];
            if item < start || item > end {
                continue;
            }
            found = Some(i);
            // a value strictly inside the range has both neighbors, boundary values have one
            if let (Some(before),true) = (pred(item),item > start) {
                replacements.push((start,before));
            }
            if let (Some(after),true) = (succ(item),item < end) {
                replacements.push((after,end));
            }
            break;
        }
        match found {
            Some(idx) => {
                self.backend.remove(idx);
                self.backend.append(&mut replacements);
                self.backend.sort_by(|a,b| a.0.cmp(&b.0));
                true
            },
            None => false
        }
    }
    /// True if any stored extent holds `item`
    pub fn contains(&self,item: T) -> bool {
        self.backend.iter().any(|(start,end)| item >= *start && item <= *end)
    }
    /// Start of the extent holding `item`, if there is one
    pub fn get_start(&self,item: T) -> Option<T> {
        for (start,end) in &self.backend {
            if item >= *start && item <= *end {
                return Some(*start);
            }
        }
        None
    }
    /// Total number of values in the set, saturating at `usize::MAX`
    pub fn len(&self) -> usize {
        let mut ans: usize = 0;
        for (start,end) in &self.backend {
            let span = (*end - *start).to_usize().unwrap_or(usize::MAX);
            ans = ans.saturating_add(span).saturating_add(1);
        }
        ans
    }
    pub fn iter(&self) -> std::slice::Iter<'_,(T,T)> {
        self.backend.iter()
    }
    pub fn to_vec(&self) -> Vec<(T,T)> {
        self.backend.clone()
    }
}

impl<'a,T: PrimInt> IntoIterator for &'a Extents<T> {
    type Item = &'a (T,T);
    type IntoIter = std::slice::Iter<'a,(T,T)>;
    fn into_iter(self) -> Self::IntoIter {
        self.backend.iter()
    }
}

/// Displays as a comma separated list, e.g., `0-3,7,9-10`
impl<T: PrimInt + fmt::Display> fmt::Display for Extents<T> {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (start,end) in &self.backend {
            if !first {
                write!(f,",")?;
            }
            first = false;
            if start==end {
                write!(f,"{}",start)?;
            } else {
                write!(f,"{}-{}",start,end)?;
            }
        }
        Ok(())
    }
}

#[test]
fn test_display() {
    let ext = Extents32::from_ranges(&[(9,10),(0,3),(7,7)]);
    assert_eq!(ext.to_string(),"0-3,7,9-10");
}
