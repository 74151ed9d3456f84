//! Execution context.
//!
//! One `ExecContext` exists per emulated CPU. It owns every piece of mutable
//! cache state for that CPU and implements the cache protocols:
//! 1. **Call sites:** Allocate a shadow slot and link it now or defer the link.
//! 2. **Shadow stack:** Runtime push, pop with prediction check, and flush.
//! 3. **Link completion:** Backpatch waiting slots when a block is registered.
//! 4. **IBTC:** Lookup with miss flag, and the dispatcher-side update.
//!
//! All methods take `&mut self`; a context is driven by one thread at a time.

use tracing::{debug, trace, warn};

use crate::common::{GuestAddr, HostAddr, Result};
use crate::config::{Config, OverflowPolicy};
use crate::core::units::ibtc::Ibtc;
use crate::core::units::shadow::{DeferredLinkTable, ShadowEntry, ShadowStack, SlotArray, SlotRef};
use crate::registry::{BlockRef, TbRegistry};
use crate::stats::AccelStats;

/// Host address returned by an IBTC miss when no stub has been installed.
///
/// Translators install their real "return to dispatcher" stub with
/// [`ExecContext::with_dispatcher_stub`].
pub const DEFAULT_DISPATCHER_STUB: HostAddr = HostAddr(u64::MAX);

/// A compiled call site: the return address it pushes and the slot it owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushSite {
    /// Statically known guest return address.
    pub ret: GuestAddr,
    /// Shadow slot allocated to this call site.
    pub slot: SlotRef,
    /// Whether the slot was linked at compile time.
    pub linked: bool,
}

/// Outcome of popping the shadow stack for a return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnPrediction {
    /// Prediction confirmed; jump straight to this host entry.
    Hit(HostAddr),
    /// The actual return address differs from the top entry; stack untouched.
    Mismatch,
    /// Prediction confirmed and popped, but the target is not compiled yet.
    Unresolved,
}

impl ReturnPrediction {
    /// The host target for a hit, `None` when the slow path must run.
    pub const fn target(&self) -> Option<HostAddr> {
        match self {
            Self::Hit(host) => Some(*host),
            Self::Mismatch | Self::Unresolved => None,
        }
    }
}

/// Per-CPU cache state.
#[derive(Debug, Clone)]
pub struct ExecContext {
    shadow: ShadowStack,
    slots: SlotArray,
    links: DeferredLinkTable,
    ibtc: Ibtc,
    /// Raised by an IBTC miss, cleared by `update_ibtc`.
    ibtc_miss: bool,
    dispatcher_stub: HostAddr,
    trace_transfers: bool,
    /// Protocol counters.
    pub stats: AccelStats,
}

impl ExecContext {
    /// Builds a context sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::InvalidConfig`](crate::common::AccelError::InvalidConfig)
    /// if the configuration fails validation.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        debug!(
            stack = config.shadow.stack_size,
            slots = config.shadow.slot_capacity,
            link_buckets = 1u64 << config.shadow.link_table_bits,
            ibtc_entries = 1u64 << config.ibtc.index_bits,
            overflow = ?config.shadow.overflow,
            "execution context created"
        );
        Ok(Self {
            shadow: ShadowStack::new(config.shadow.stack_size, config.shadow.overflow),
            slots: SlotArray::new(config.shadow.slot_capacity),
            links: DeferredLinkTable::new(config.shadow.link_table_bits),
            ibtc: Ibtc::new(config.ibtc.index_bits),
            ibtc_miss: false,
            dispatcher_stub: DEFAULT_DISPATCHER_STUB,
            trace_transfers: config.general.trace_transfers || cfg!(feature = "always-trace"),
            stats: AccelStats::default(),
        })
    }

    /// Sets the host address an IBTC miss returns.
    #[must_use]
    pub fn with_dispatcher_stub(mut self, stub: HostAddr) -> Self {
        self.dispatcher_stub = stub;
        self
    }

    /// Host address an IBTC miss returns.
    pub const fn dispatcher_stub(&self) -> HostAddr {
        self.dispatcher_stub
    }

    /// The shadow stack.
    pub const fn shadow(&self) -> &ShadowStack {
        &self.shadow
    }

    /// The shadow slot array.
    pub const fn slots(&self) -> &SlotArray {
        &self.slots
    }

    /// The deferred link table.
    pub const fn links(&self) -> &DeferredLinkTable {
        &self.links
    }

    /// The indirect branch target cache.
    pub const fn ibtc(&self) -> &Ibtc {
        &self.ibtc
    }

    pub(crate) fn shadow_mut(&mut self) -> &mut ShadowStack {
        &mut self.shadow
    }

    /// Overflow policy of the shadow stack.
    pub const fn overflow_policy(&self) -> OverflowPolicy {
        self.shadow.policy()
    }

    // ── Shadow return cache ─────────────────────────────────

    /// Compile-time half of the push protocol for a call returning to `ret`.
    ///
    /// Allocates the call site's slot and links it: immediately if `registry`
    /// already holds a block for `ret`, otherwise by queueing a deferred link
    /// that [`on_block_registered`](Self::on_block_registered) will complete.
    ///
    /// # Errors
    ///
    /// Returns [`AccelError::SlotsExhausted`](crate::common::AccelError::SlotsExhausted)
    /// when the slot array is full. Nothing is linked or queued in that case.
    pub fn prepare_call_site<R: TbRegistry + ?Sized>(
        &mut self,
        ret: GuestAddr,
        registry: &R,
    ) -> Result<PushSite> {
        let slot = self.slots.alloc()?;
        self.stats.call_sites += 1;

        let linked = match registry.lookup_block(ret) {
            Some(block) => {
                let linked = self.slots.resolve(slot, block.host);
                debug_assert!(linked, "freshly allocated slot {} out of range", slot.0);
                self.stats.links_immediate += 1;
                linked
            }
            None => {
                self.links.defer(ret, slot);
                self.stats.links_deferred += 1;
                debug!(guest = %ret, slot = slot.0, "return block not compiled; link deferred");
                false
            }
        };

        Ok(PushSite { ret, slot, linked })
    }

    /// Runtime half of the push protocol: what a compiled call site does each time it runs.
    pub fn push_shadow(&mut self, site: PushSite) {
        let overflowed = self.shadow.push(ShadowEntry {
            expected: site.ret,
            slot: site.slot,
        });
        self.stats.shadow_pushes += 1;
        if overflowed {
            self.note_overflow();
        }
    }

    /// Records a push that found the stack full.
    pub(crate) fn note_overflow(&mut self) {
        self.stats.shadow_overflows += 1;
        warn!(
            capacity = self.shadow.capacity(),
            policy = ?self.shadow.policy(),
            "shadow stack overflow; older return predictions dropped"
        );
    }

    /// Pop protocol for a return whose actual guest target is `actual`.
    ///
    /// A mismatch leaves the stack exactly as it was. A match pops the entry
    /// whether or not its slot has been linked yet.
    pub fn pop_shadow(&mut self, actual: GuestAddr) -> ReturnPrediction {
        let top = self.shadow.peek();
        if self.shadow.is_empty() || top.expected != actual {
            self.stats.shadow_mismatches += 1;
            if self.trace_transfers {
                trace!(actual = %actual, expected = %top.expected, "shadow pop mismatch");
            }
            return ReturnPrediction::Mismatch;
        }

        self.shadow.pop();
        let host = self.slots.value(top.slot);
        if host.is_unresolved() {
            self.stats.shadow_unresolved += 1;
            if self.trace_transfers {
                trace!(actual = %actual, slot = top.slot.0, "shadow pop hit unresolved slot");
            }
            ReturnPrediction::Unresolved
        } else {
            self.stats.shadow_hits += 1;
            if self.trace_transfers {
                trace!(actual = %actual, host = %host, "shadow pop hit");
            }
            ReturnPrediction::Hit(host)
        }
    }

    /// Empties the shadow stack. Pending deferred links are kept.
    pub fn flush_shadow_stack(&mut self) {
        self.shadow.flush();
        self.stats.shadow_flushes += 1;
        debug!("shadow stack flushed");
    }

    /// Link completion: called by the registry owner after registering `block`.
    ///
    /// Writes the block's host entry into every slot waiting for its guest
    /// address and discards those links. A waiting slot outside the slot array
    /// is dropped with a warning.
    ///
    /// # Returns
    ///
    /// The number of slots linked.
    pub fn on_block_registered(&mut self, block: BlockRef) -> usize {
        let slots = &mut self.slots;
        let mut linked = 0;
        let _ = self.links.complete(block.guest, |slot| {
            if slots.resolve(slot, block.host) {
                linked += 1;
            } else {
                warn!(
                    guest = %block.guest,
                    slot = slot.0,
                    capacity = slots.capacity(),
                    "deferred link names a slot outside the slot array; dropped"
                );
            }
        });
        if linked > 0 {
            self.stats.links_completed += linked as u64;
            debug!(guest = %block.guest, host = %block.host, linked, "deferred links completed");
        }
        linked
    }

    // ── Indirect branch target cache ────────────────────────

    /// IBTC lookup protocol.
    ///
    /// # Returns
    ///
    /// The cached host entry on a hit. On a miss the context's miss flag is
    /// raised and the dispatcher stub is returned.
    pub fn lookup_ibtc(&mut self, target: GuestAddr) -> HostAddr {
        if let Some(host) = self.ibtc.lookup(target) {
            self.stats.ibtc_hits += 1;
            if self.trace_transfers {
                trace!(target = %target, host = %host, "ibtc hit");
            }
            return host;
        }
        self.ibtc_miss = true;
        self.stats.ibtc_misses += 1;
        if self.trace_transfers {
            trace!(target = %target, "ibtc miss");
        }
        self.dispatcher_stub
    }

    /// Whether the last IBTC lookup missed and the dispatcher owes an update.
    pub const fn ibtc_update_pending(&self) -> bool {
        self.ibtc_miss
    }

    /// IBTC update protocol, run by the dispatcher after resolving a missed target.
    pub fn update_ibtc(&mut self, block: BlockRef) {
        self.ibtc_miss = false;
        self.stats.ibtc_updates += 1;
        if let Some(evicted) = self.ibtc.update(block) {
            self.stats.ibtc_evictions += 1;
            if self.trace_transfers {
                trace!(guest = %block.guest, evicted = %evicted.guest, "ibtc entry replaced");
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Clears all cache state: stack, slots, deferred links, IBTC, and miss flag.
    ///
    /// Translated code references slots by index, so this must accompany a
    /// flush of every translated block. Statistics are kept.
    pub fn reset(&mut self) {
        self.shadow.flush();
        self.slots.clear();
        self.links.clear();
        self.ibtc.clear();
        self.ibtc_miss = false;
        debug!("execution context reset");
    }
}
