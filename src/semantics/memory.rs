//! Byte-addressed symbolic memory.
//!
//! Every function activation owns one `Memory`. Regions are named, allocated
//! with a size and an initialisation policy, and addressed by byte offset.
//! Global regions are constant lookup tables shared by every activation.
//! Multi-byte accesses are little-endian: a load concatenates bytes from the
//! highest offset down, a store splits its value with `extract`.
//!
//! Unwritten bytes of an `Undefined` or `DontCare` region read as `Undef`
//! terms whose names are stable across runs, so a solver model can be replayed
//! against the concrete interpreter byte for byte.

use crate::error::MemoryModelError;
use crate::ir::{MemInit, Program};
use crate::term::{Sort, Term};
use im::OrdMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// What to do with an access whose offset is not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AliasPolicy {
    /// Refuse with `AmbiguousAlias`.
    #[default]
    Reject,
    /// Case-split over every in-bounds offset. The access is assumed to be
    /// in bounds.
    Enumerate,
}

/// Contents of one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Written(Term),
    Undefined,
    DontCare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    tag: String,
    size: u64,
    init: MemInit,
    contents: Option<Arc<Vec<u8>>>,
}

impl Region {
    fn read_only(&self) -> bool {
        self.contents.is_some()
    }

    fn initial(&self, offset: u64) -> Cell {
        if let Some(bytes) = &self.contents {
            let b = bytes.get(offset as usize).copied().unwrap_or(0);
            return Cell::Written(Term::constant(b as u64, Sort::BitVec(8)));
        }
        match self.init {
            MemInit::Zero => Cell::Written(Term::constant(0, Sort::BitVec(8))),
            MemInit::Undefined => Cell::Undefined,
            MemInit::DontCare => Cell::DontCare,
        }
    }
}

/// Tag of the `instance`-th allocation of `region` within activation `scope`.
pub fn region_tag(scope: &str, region: &str, instance: u32) -> String {
    format!("{}:{}#{}", scope, region, instance)
}

/// Name of the undefined byte at `offset` of the allocation tagged `tag`.
pub fn undef_name(tag: &str, offset: u64) -> String {
    format!("{}[{}]", tag, offset)
}

/// Byte-level access record: which undefined bytes a load observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadLog {
    pub undefined: BTreeSet<String>,
    pub dont_care: BTreeSet<String>,
}

impl ReadLog {
    pub fn is_empty(&self) -> bool {
        self.undefined.is_empty() && self.dont_care.is_empty()
    }

    pub fn extend(&mut self, other: ReadLog) {
        self.undefined.extend(other.undefined);
        self.dont_care.extend(other.dont_care);
    }
}

/// Symbolic memory of one activation.
#[derive(Debug, Clone)]
pub struct Memory {
    scope: String,
    regions: OrdMap<String, Region>,
    cells: OrdMap<(String, u64), Cell>,
    instances: OrdMap<String, u32>,
}

fn check_width(bytes: u32) -> Result<(), MemoryModelError> {
    if matches!(bytes, 1 | 2 | 4 | 8) {
        Ok(())
    } else {
        Err(MemoryModelError::AccessWidth { bytes, width: bytes * 8 })
    }
}

impl Memory {
    /// Empty memory for activation `scope`, with the program's globals mapped.
    pub fn new(scope: impl Into<String>, program: &Program) -> Self {
        let mut regions = OrdMap::new();
        for (name, global) in &program.globals {
            regions.insert(
                name.clone(),
                Region {
                    tag: format!("global:{}", name),
                    size: global.bytes.len() as u64,
                    init: MemInit::Zero,
                    contents: Some(Arc::new(global.bytes.clone())),
                },
            );
        }
        Memory {
            scope: scope.into(),
            regions,
            cells: OrdMap::new(),
            instances: OrdMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Allocate (or re-allocate) `region`. Re-allocation starts a fresh
    /// instance; the previous contents become unreachable.
    pub fn alloc(&mut self, region: &str, size: u64, init: MemInit) -> Result<(), MemoryModelError> {
        if self.regions.get(region).is_some_and(Region::read_only) {
            return Err(MemoryModelError::ConstantRegion(region.to_string()));
        }
        let instance = self.instances.get(region).copied().unwrap_or(0);
        self.instances.insert(region.to_string(), instance + 1);
        self.regions.insert(
            region.to_string(),
            Region {
                tag: region_tag(&self.scope, region, instance),
                size,
                init,
                contents: None,
            },
        );
        Ok(())
    }

    /// Same regions under a new scope with every local byte forgotten.
    /// Used when execution resumes at a cut point.
    pub fn havoc(&self, scope: impl Into<String>) -> Memory {
        let scope = scope.into();
        let mut regions = OrdMap::new();
        let mut instances = OrdMap::new();
        for (name, r) in self.regions.iter() {
            if r.read_only() {
                regions.insert(name.clone(), r.clone());
                continue;
            }
            regions.insert(
                name.clone(),
                Region {
                    tag: region_tag(&scope, name, 0),
                    size: r.size,
                    init: MemInit::Undefined,
                    contents: None,
                },
            );
            instances.insert(name.clone(), 1);
        }
        Memory {
            scope,
            regions,
            cells: OrdMap::new(),
            instances,
        }
    }

    /// Names of allocated regions whose initial contents are don't-care.
    pub fn dont_care_regions(&self) -> BTreeSet<String> {
        self.regions
            .iter()
            .filter(|(_, r)| r.init == MemInit::DontCare && !r.read_only())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn region(&self, name: &str) -> Result<&Region, MemoryModelError> {
        self.regions
            .get(name)
            .ok_or_else(|| MemoryModelError::UnknownRegion(name.to_string()))
    }

    fn cell(&self, region: &Region, offset: u64) -> Cell {
        self.cells
            .get(&(region.tag.clone(), offset))
            .cloned()
            .unwrap_or_else(|| region.initial(offset))
    }

    fn cell_term(region: &Region, offset: u64, cell: Cell, log: Option<&mut ReadLog>) -> Term {
        match cell {
            Cell::Written(t) => t,
            Cell::Undefined | Cell::DontCare => {
                let dont_care = cell == Cell::DontCare;
                let name = undef_name(&region.tag, offset);
                if let Some(log) = log {
                    if dont_care {
                        log.dont_care.insert(name.clone());
                    } else {
                        log.undefined.insert(name.clone());
                    }
                }
                Term::undef(name, Sort::BitVec(8), dont_care)
            }
        }
    }

    fn bounds(region_name: &str, region: &Region, offset: u64, bytes: u32) -> Result<(), MemoryModelError> {
        let fits = matches!(offset.checked_add(bytes as u64), Some(end) if end <= region.size);
        if !fits {
            return Err(MemoryModelError::OutOfBounds {
                region: region_name.to_string(),
                offset,
                bytes,
                size: region.size,
            });
        }
        Ok(())
    }

    fn read_at(&self, region: &Region, offset: u64, bytes: u32, log: &mut ReadLog) -> Result<Term, MemoryModelError> {
        let mut acc: Option<Term> = None;
        for i in (0..bytes as u64).rev() {
            let byte = Self::cell_term(region, offset + i, self.cell(region, offset + i), Some(log));
            acc = Some(match acc {
                None => byte,
                Some(hi) => Term::concat(&hi, &byte)?,
            });
        }
        // bytes >= 1 is checked by the caller
        acc.ok_or(MemoryModelError::AccessWidth { bytes, width: 0 })
    }

    /// Candidate offsets for a symbolic access.
    fn candidates(region_name: &str, region: &Region, offset: &Term, bytes: u32) -> Result<Vec<(u64, Term)>, MemoryModelError> {
        if region.size < bytes as u64 {
            return Err(MemoryModelError::OutOfBounds {
                region: region_name.to_string(),
                offset: 0,
                bytes,
                size: region.size,
            });
        }
        let width = offset.width();
        let limit = region.size - bytes as u64;
        let mut out = Vec::new();
        for o in 0..=limit {
            if o > crate::term::mask(width) {
                break;
            }
            let k = Term::bv(o, width)?;
            out.push((o, Term::eq(offset, &k)?));
        }
        Ok(out)
    }

    /// Load `bytes` bytes of `region` at `offset`.
    pub fn read(
        &self,
        region_name: &str,
        offset: &Term,
        bytes: u32,
        policy: AliasPolicy,
        log: &mut ReadLog,
    ) -> Result<Term, MemoryModelError> {
        check_width(bytes)?;
        let region = self.region(region_name)?;
        if let Some(o) = offset.as_const() {
            Self::bounds(region_name, region, o, bytes)?;
            return self.read_at(region, o, bytes, log);
        }
        if policy == AliasPolicy::Reject {
            return Err(MemoryModelError::AmbiguousAlias {
                region: region_name.to_string(),
                offset: offset.to_string(),
            });
        }
        let mut cases = Self::candidates(region_name, region, offset, bytes)?;
        let (last, _) = cases.pop().ok_or_else(|| MemoryModelError::OutOfBounds {
            region: region_name.to_string(),
            offset: 0,
            bytes,
            size: region.size,
        })?;
        let mut acc = self.read_at(region, last, bytes, log)?;
        for (o, cond) in cases.into_iter().rev() {
            let value = self.read_at(region, o, bytes, log)?;
            acc = Term::ite(&cond, &value, &acc)?;
        }
        Ok(acc)
    }

    /// Store the low `bytes` bytes of `value` into `region` at `offset`.
    pub fn write(
        &mut self,
        region_name: &str,
        offset: &Term,
        value: &Term,
        bytes: u32,
        policy: AliasPolicy,
    ) -> Result<(), MemoryModelError> {
        check_width(bytes)?;
        if value.width() != bytes * 8 {
            return Err(MemoryModelError::AccessWidth {
                bytes,
                width: value.width(),
            });
        }
        let region = self.region(region_name)?.clone();
        if region.read_only() {
            return Err(MemoryModelError::ConstantRegion(region_name.to_string()));
        }
        let pieces: Vec<Term> = (0..bytes)
            .map(|i| Term::extract(value, 8 * i + 7, 8 * i))
            .collect::<Result<_, _>>()?;

        if let Some(o) = offset.as_const() {
            Self::bounds(region_name, &region, o, bytes)?;
            for (i, piece) in pieces.into_iter().enumerate() {
                self.cells.insert((region.tag.clone(), o + i as u64), Cell::Written(piece));
            }
            return Ok(());
        }
        if policy == AliasPolicy::Reject {
            return Err(MemoryModelError::AmbiguousAlias {
                region: region_name.to_string(),
                offset: offset.to_string(),
            });
        }
        let cases = Self::candidates(region_name, &region, offset, bytes)?;
        let mut updates: OrdMap<u64, Term> = OrdMap::new();
        for (o, cond) in cases {
            for (i, piece) in pieces.iter().enumerate() {
                let at = o + i as u64;
                let current = match updates.get(&at) {
                    Some(t) => t.clone(),
                    None => Self::cell_term(&region, at, self.cell(&region, at), None),
                };
                updates.insert(at, Term::ite(&cond, piece, &current)?);
            }
        }
        for (at, t) in updates {
            self.cells.insert((region.tag.clone(), at), Cell::Written(t));
        }
        Ok(())
    }

    /// Merge two memories that diverged under `cond` (true selects `self`).
    pub fn merge(&self, cond: &Term, other: &Memory) -> Result<Memory, MemoryModelError> {
        let mut merged = self.clone();
        let mut reallocated: BTreeSet<String> = BTreeSet::new();
        for (name, theirs) in other.regions.iter() {
            match self.regions.get(name) {
                None => {
                    merged.regions.insert(name.clone(), theirs.clone());
                }
                Some(ours) if ours.tag == theirs.tag => {}
                Some(ours) => {
                    if ours.size != theirs.size || ours.read_only() != theirs.read_only() {
                        return Err(MemoryModelError::DivergentRegion(name.clone()));
                    }
                    // Re-allocated on one path: merge byte-wise under our tag.
                    reallocated.insert(ours.tag.clone());
                    reallocated.insert(theirs.tag.clone());
                    for o in 0..ours.size {
                        let a = Self::cell_term(ours, o, self.cell(ours, o), None);
                        let b = Self::cell_term(theirs, o, other.cell(theirs, o), None);
                        merged.cells.insert((ours.tag.clone(), o), Cell::Written(Term::ite(cond, &a, &b)?));
                    }
                }
            }
        }
        for (name, count) in other.instances.iter() {
            let mine = merged.instances.get(name).copied().unwrap_or(0);
            merged.instances.insert(name.clone(), mine.max(*count));
        }

        let mut keys: BTreeSet<(String, u64)> = BTreeSet::new();
        for (k, v) in self.cells.iter() {
            if other.cells.get(k) != Some(v) {
                keys.insert(k.clone());
            }
        }
        for (k, v) in other.cells.iter() {
            if self.cells.get(k) != Some(v) {
                keys.insert(k.clone());
            }
        }
        for (tag, offset) in keys {
            if reallocated.contains(&tag) {
                continue;
            }
            let Some(region) = self.region_by_tag(&tag).or_else(|| other.region_by_tag(&tag)) else {
                continue;
            };
            let a = self.cells.get(&(tag.clone(), offset)).cloned().unwrap_or_else(|| region.initial(offset));
            let b = other.cells.get(&(tag.clone(), offset)).cloned().unwrap_or_else(|| region.initial(offset));
            if a == b {
                merged.cells.insert((tag, offset), a);
                continue;
            }
            let ta = Self::cell_term(region, offset, a, None);
            let tb = Self::cell_term(region, offset, b, None);
            merged.cells.insert((tag, offset), Cell::Written(Term::ite(cond, &ta, &tb)?));
        }
        Ok(merged)
    }

    fn region_by_tag(&self, tag: &str) -> Option<&Region> {
        self.regions.values().find(|r| r.tag == tag)
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, r) in self.regions.iter() {
            if r.read_only() {
                continue;
            }
            writeln!(f, "{} ({} bytes, {}):", name, r.size, r.init)?;
            for ((tag, offset), cell) in self.cells.iter() {
                if tag == &r.tag {
                    match cell {
                        Cell::Written(t) => writeln!(f, "  [{}] = {}", offset, t)?,
                        Cell::Undefined => writeln!(f, "  [{}] = undef", offset)?,
                        Cell::DontCare => writeln!(f, "  [{}] = dontcare", offset)?,
                    }
                }
            }
        }
        Ok(())
    }
}
