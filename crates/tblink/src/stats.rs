//! Link cache statistics collection and reporting.
//!
//! This module tracks how well the control-transfer caches are doing. It provides:
//! 1. **Call sites:** Compiled call sites and how their slots were linked.
//! 2. **Shadow stack:** Pushes, overflows, flushes, and pop outcomes.
//! 3. **IBTC:** Hits, misses, updates, and evictions.

use std::fmt;

/// Link cache statistics structure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccelStats {
    /// Call sites compiled (one shadow slot each).
    pub call_sites: u64,
    /// Call sites whose return block already existed at compile time.
    pub links_immediate: u64,
    /// Call sites that had to queue a deferred link.
    pub links_deferred: u64,
    /// Deferred links completed by a block registration.
    pub links_completed: u64,

    /// Runtime shadow stack pushes.
    pub shadow_pushes: u64,
    /// Pushes that found the stack full.
    pub shadow_overflows: u64,
    /// Shadow stack flushes.
    pub shadow_flushes: u64,
    /// Pops that jumped straight to a linked host target.
    pub shadow_hits: u64,
    /// Pops whose actual return address did not match the top entry.
    pub shadow_mismatches: u64,
    /// Pops that matched but found the slot still unresolved.
    pub shadow_unresolved: u64,

    /// IBTC lookups that hit.
    pub ibtc_hits: u64,
    /// IBTC lookups that missed and raised the miss flag.
    pub ibtc_misses: u64,
    /// IBTC entries written by the dispatcher.
    pub ibtc_updates: u64,
    /// Updates that replaced an entry for a different guest address.
    pub ibtc_evictions: u64,
}

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"shadow"`, `"ibtc"`.
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "shadow", "ibtc"];

impl AccelStats {
    /// Total shadow stack pops.
    pub const fn shadow_pops(&self) -> u64 {
        self.shadow_hits + self.shadow_mismatches + self.shadow_unresolved
    }

    /// Fraction of pops that bypassed the dispatcher, in `0.0..=1.0`.
    ///
    /// Returns `0.0` when nothing has been popped.
    pub fn shadow_hit_rate(&self) -> f64 {
        ratio(self.shadow_hits, self.shadow_pops())
    }

    /// Total IBTC lookups.
    pub const fn ibtc_lookups(&self) -> u64 {
        self.ibtc_hits + self.ibtc_misses
    }

    /// Fraction of IBTC lookups that hit, in `0.0..=1.0`.
    ///
    /// Returns `0.0` when nothing has been looked up.
    pub fn ibtc_hit_rate(&self) -> f64 {
        ratio(self.ibtc_hits, self.ibtc_lookups())
    }

    /// Prints all statistics sections to stdout.
    pub fn print(&self) {
        print!("{self}");
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// Each element of `sections` should be one of [`STATS_SECTIONS`]. Pass an
    /// empty slice to print every section.
    pub fn print_sections(&self, sections: &[String]) {
        print!("{}", self.report(sections));
    }

    /// Renders the requested sections as the text `print_sections` writes.
    pub fn render(&self, sections: &[String]) -> String {
        self.report(sections).to_string()
    }

    /// A displayable view of the requested sections.
    pub const fn report<'a>(&'a self, sections: &'a [String]) -> Report<'a> {
        Report {
            stats: self,
            sections,
        }
    }
}

impl fmt::Display for AccelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.report(&[]), f)
    }
}

/// Sectioned statistics report; an empty section list selects every section.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    stats: &'a AccelStats,
    sections: &'a [String],
}

impl Report<'_> {
    fn wants(&self, section: &str) -> bool {
        self.sections.is_empty() || self.sections.iter().any(|s| s == section)
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.stats;

        if self.wants("summary") {
            writeln!(f, "\n==========================================================")?;
            writeln!(f, "CONTROL-TRANSFER CACHE STATISTICS")?;
            writeln!(f, "==========================================================")?;
            writeln!(f, "call_sites               {}", s.call_sites)?;
            writeln!(f, "links.immediate          {}", s.links_immediate)?;
            writeln!(f, "links.deferred           {}", s.links_deferred)?;
            writeln!(f, "links.completed          {}", s.links_completed)?;
            writeln!(f, "----------------------------------------------------------")?;
        }
        if self.wants("shadow") {
            writeln!(f, "SHADOW STACK")?;
            writeln!(f, "  pushes                 {}", s.shadow_pushes)?;
            writeln!(f, "  overflows              {}", s.shadow_overflows)?;
            writeln!(f, "  flushes                {}", s.shadow_flushes)?;
            writeln!(f, "  pops                   {}", s.shadow_pops())?;
            writeln!(
                f,
                "  pops.hit               {} ({:.2}%)",
                s.shadow_hits,
                s.shadow_hit_rate() * 100.0
            )?;
            writeln!(f, "  pops.mismatch          {}", s.shadow_mismatches)?;
            writeln!(f, "  pops.unresolved        {}", s.shadow_unresolved)?;
            writeln!(f, "----------------------------------------------------------")?;
        }
        if self.wants("ibtc") {
            writeln!(f, "IBTC")?;
            writeln!(f, "  lookups                {}", s.ibtc_lookups())?;
            writeln!(
                f,
                "  hits                   {} ({:.2}%)",
                s.ibtc_hits,
                s.ibtc_hit_rate() * 100.0
            )?;
            writeln!(f, "  misses                 {}", s.ibtc_misses)?;
            writeln!(f, "  updates                {}", s.ibtc_updates)?;
            writeln!(f, "  evictions              {}", s.ibtc_evictions)?;
            writeln!(f, "==========================================================")?;
        }
        Ok(())
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
