//! Video memory usage report.

use std::cmp::Ordering;

use super::{ArgReader, WireRecord};
use crate::codec::Variant;
use crate::error::Result;

/// One resource holding video memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceInfo {
    pub path: String,
    pub format: String,
    pub type_name: String,
    /// Local tie-breaker for ordering. Not transmitted.
    pub id: u64,
    pub vram: i64,
}

impl ResourceInfo {
    /// Largest `vram` first, then ascending `id`.
    fn report_order(&self, other: &Self) -> Ordering {
        other
            .vram
            .cmp(&self.vram)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Wire layout: `[n, (path, format, type, vram)*n]`, sorted by `vram`
/// descending then `id` ascending.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub infos: Vec<ResourceInfo>,
}

impl ResourceUsage {
    /// Put the entries in report order.
    pub fn sort(&mut self) {
        self.infos.sort_by(ResourceInfo::report_order);
    }

    pub fn total_vram(&self) -> i64 {
        self.infos.iter().map(|info| info.vram).sum()
    }
}

impl WireRecord for ResourceUsage {
    const LABEL: &'static str = "ResourceUsage";

    fn write_args(&self, out: &mut Vec<Variant>) {
        let mut sorted: Vec<&ResourceInfo> = self.infos.iter().collect();
        sorted.sort_by(|a, b| a.report_order(b));

        out.push(Variant::Int(sorted.len() as i64));
        for info in sorted {
            out.push(info.path.as_str().into());
            out.push(info.format.as_str().into());
            out.push(info.type_name.as_str().into());
            out.push(info.vram.into());
        }
    }

    fn read_args(reader: &mut ArgReader<'_>) -> Result<Self> {
        reader.require(1)?;
        let count = reader.count()?;
        reader.require_items(count, 4)?;

        let mut infos = Vec::with_capacity(count);
        for _ in 0..count {
            infos.push(ResourceInfo {
                path: reader.string()?,
                format: reader.string()?,
                type_name: reader.string()?,
                id: 0,
                vram: reader.int()?,
            });
        }
        Ok(Self { infos })
    }
}
