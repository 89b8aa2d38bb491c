//! Memory arbiter: page tables shared by every device, with
//! priority-ordered, revocable overlays.
//!
//! Each device that maps memory first connects and receives an [`Owner`]
//! slot. Slot index is priority: slot 0 beats slot 1 and so on. Every grant
//! a device makes is recorded in its own local view, and the global table
//! shows, for each page, the entry of the highest-priority device holding a
//! grant there. Releasing a grant reveals whatever the next holder mapped.

use emu_core::FetchWindow;

use crate::device::{DeviceId, Devices};

/// log2 of the page size.
pub const PAGE_BITS: u32 = 10;
/// Bytes per page.
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
/// Pages in the 64K address space.
pub const PAGE_COUNT: usize = 0x10000 >> PAGE_BITS;
/// Size of the priority array.
pub const SLOT_COUNT: usize = 16;

const PAGE_MASK: u16 = (PAGE_SIZE - 1) as u16;

/// Priority slot held by a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Owner(u8);

impl Owner {
    /// Position in the priority array; lower wins.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }

    const fn bit(self) -> u16 {
        1 << self.0
    }
}

/// Handle to a byte buffer owned by the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

/// What one page resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEntry {
    /// Plain bytes; `offset` is where the page starts in the buffer.
    Direct { buffer: BufferId, offset: usize },
    /// Routed to the device's `mem_read`/`mem_write`.
    Callback { device: DeviceId },
    /// Nobody mapped this page.
    Undefined,
}

/// Backing for an [`MemoryBus::alloc`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Map buffer bytes. Page `k` of the range starts at
    /// `offset + k * stride`; a stride of 0 mirrors one page.
    Buffer { buffer: BufferId, offset: usize, stride: usize },
    /// Route accesses to the owning device.
    Callback,
}

/// Which table(s) an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    const fn reads(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    const fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// One direction's tables: global entries plus which slots hold a grant.
struct Table {
    global: [PageEntry; PAGE_COUNT],
    holders: [u16; PAGE_COUNT],
}

impl Table {
    fn new() -> Self {
        Self {
            global: [PageEntry::Undefined; PAGE_COUNT],
            holders: [0; PAGE_COUNT],
        }
    }

    /// Highest-priority holder of a page.
    fn top(&self, page: usize) -> Option<usize> {
        let holders = self.holders[page];
        (holders != 0).then(|| holders.trailing_zeros() as usize)
    }
}

/// A connected device and its private view of the address space.
struct Slot {
    device: DeviceId,
    read: [PageEntry; PAGE_COUNT],
    write: [PageEntry; PAGE_COUNT],
}

impl Slot {
    fn new(device: DeviceId) -> Self {
        Self {
            device,
            read: [PageEntry::Undefined; PAGE_COUNT],
            write: [PageEntry::Undefined; PAGE_COUNT],
        }
    }
}

/// Page-granular memory bus for one CPU.
pub struct MemoryBus {
    buffers: Vec<Vec<u8>>,
    slots: [Option<Slot>; SLOT_COUNT],
    backstop: Option<Owner>,
    read: Table,
    write: Table,
    /// Bumped on every remap; stale fetch windows are refused.
    generation: u32,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            slots: std::array::from_fn(|_| None),
            backstop: None,
            read: Table::new(),
            write: Table::new(),
            generation: 0,
        }
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Hand a byte buffer to the arbiter for use as direct pages.
    pub fn add_buffer(&mut self, bytes: Vec<u8>) -> BufferId {
        self.buffers.push(bytes);
        BufferId(self.buffers.len() - 1)
    }

    #[must_use]
    pub fn buffer(&self, id: BufferId) -> &[u8] {
        &self.buffers[id.0]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut [u8] {
        &mut self.buffers[id.0]
    }

    // =========================================================================
    // Priority slots
    // =========================================================================

    /// Reserve a priority slot for `device`.
    ///
    /// High priority takes the lowest free slot, low priority the highest.
    /// The first device to take the last slot becomes the backstop, which
    /// can never be released. Returns `None` when every slot is taken.
    pub fn connect(&mut self, device: DeviceId, high_priority: bool) -> Option<Owner> {
        let free = |i: &usize| self.slots[*i].is_none();
        let index = if high_priority {
            (0..SLOT_COUNT).find(free)
        } else {
            (0..SLOT_COUNT).rev().find(free)
        };
        let Some(index) = index else {
            tracing::warn!(device = device.index(), "memory connect: no free priority slot");
            return None;
        };

        self.slots[index] = Some(Slot::new(device));
        let owner = Owner(index as u8);
        if index == SLOT_COUNT - 1 && self.backstop.is_none() {
            self.backstop = Some(owner);
        }
        tracing::debug!(device = device.index(), slot = index, "memory connected");
        Some(owner)
    }

    /// Release every grant of `owner` and free its slot. The backstop is
    /// refused.
    pub fn disconnect(&mut self, owner: Owner) -> bool {
        if self.backstop == Some(owner) {
            tracing::warn!(slot = owner.slot(), "refusing to disconnect the backstop");
            return false;
        }
        if self.slots[owner.slot()].is_none() {
            return false;
        }
        self.release(owner, 0, 0x10000, Access::ReadWrite);
        self.slots[owner.slot()] = None;
        tracing::debug!(slot = owner.slot(), "memory disconnected");
        true
    }

    /// The backstop owner, once one has connected.
    #[must_use]
    pub const fn backstop(&self) -> Option<Owner> {
        self.backstop
    }

    // =========================================================================
    // Grants
    // =========================================================================

    /// Pages covering `addr .. addr + len`, clipped to the address space.
    fn pages(addr: u16, len: usize) -> std::ops::Range<usize> {
        if len == 0 {
            return 0..0;
        }
        let first = usize::from(addr) >> PAGE_BITS;
        let last = ((usize::from(addr) + len - 1) >> PAGE_BITS).min(PAGE_COUNT - 1);
        first..last + 1
    }

    /// Grant `owner` the pages covering `addr .. addr + len`.
    ///
    /// The grant always lands in the owner's local view and the holder
    /// record; the global table changes only where the owner is now the
    /// highest-priority holder. Returns `false` (and maps nothing) for an
    /// unconnected owner or a buffer too short for the range.
    pub fn alloc(
        &mut self,
        owner: Owner,
        addr: u16,
        len: usize,
        target: Target,
        access: Access,
    ) -> bool {
        let Some(slot) = self.slots[owner.slot()].as_ref() else {
            tracing::warn!(slot = owner.slot(), "alloc from unconnected owner");
            return false;
        };
        let device = slot.device;
        let pages = Self::pages(addr, len);

        if let Target::Buffer { buffer, offset, stride } = target {
            let size = self.buffers.get(buffer.0).map_or(0, Vec::len);
            let end = offset + pages.len().saturating_sub(1) * stride + PAGE_SIZE;
            if pages.is_empty() || end > size {
                tracing::warn!(slot = owner.slot(), size, end, "alloc: buffer too short");
                return false;
            }
        }

        for (k, page) in pages.clone().enumerate() {
            let entry = match target {
                Target::Buffer { buffer, offset, stride } => PageEntry::Direct {
                    buffer,
                    offset: offset + k * stride,
                },
                Target::Callback => PageEntry::Callback { device },
            };
            if access.reads() {
                self.grant(owner, page, entry, true);
            }
            if access.writes() {
                self.grant(owner, page, entry, false);
            }
        }
        self.generation = self.generation.wrapping_add(1);
        tracing::debug!(slot = owner.slot(), addr, len, ?access, "alloc");
        true
    }

    fn grant(&mut self, owner: Owner, page: usize, entry: PageEntry, read: bool) {
        let (table, slot) = match (read, self.slots[owner.slot()].as_mut()) {
            (true, Some(slot)) => (&mut self.read, &mut slot.read),
            (false, Some(slot)) => (&mut self.write, &mut slot.write),
            (_, None) => return,
        };
        slot[page] = entry;
        table.holders[page] |= owner.bit();
        if table.top(page) == Some(owner.slot()) {
            table.global[page] = entry;
        }
    }

    /// Revoke `owner`'s grants over `addr .. addr + len`.
    ///
    /// Where the owner was the global owner, the next holder in priority
    /// order takes over with the entry from its local view; with no holder
    /// left the page becomes undefined. The backstop is refused.
    pub fn release(&mut self, owner: Owner, addr: u16, len: usize, access: Access) {
        if self.backstop == Some(owner) {
            tracing::warn!(slot = owner.slot(), "refusing to release the backstop");
            return;
        }
        if self.slots[owner.slot()].is_none() {
            return;
        }
        for page in Self::pages(addr, len) {
            if access.reads() {
                self.revoke(owner, page, true);
            }
            if access.writes() {
                self.revoke(owner, page, false);
            }
        }
        self.generation = self.generation.wrapping_add(1);
        tracing::debug!(slot = owner.slot(), addr, len, ?access, "release");
    }

    fn revoke(&mut self, owner: Owner, page: usize, read: bool) {
        let table = if read { &mut self.read } else { &mut self.write };
        if table.holders[page] & owner.bit() == 0 {
            return;
        }
        let was_global = table.top(page) == Some(owner.slot());
        table.holders[page] &= !owner.bit();

        if let Some(slot) = self.slots[owner.slot()].as_mut() {
            let view = if read { &mut slot.read } else { &mut slot.write };
            view[page] = PageEntry::Undefined;
        }

        if was_global {
            let table = if read { &self.read } else { &self.write };
            let next = table.top(page).and_then(|s| self.slots[s].as_ref()).map_or(
                PageEntry::Undefined,
                |slot| if read { slot.read[page] } else { slot.write[page] },
            );
            let table = if read { &mut self.read } else { &mut self.write };
            table.global[page] = next;
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Global entry for `addr`. `ReadWrite` reports the read table.
    #[must_use]
    pub fn page(&self, addr: u16, access: Access) -> PageEntry {
        let page = usize::from(addr) >> PAGE_BITS;
        if access.reads() {
            self.read.global[page]
        } else {
            self.write.global[page]
        }
    }

    /// Entry `owner` has mapped for `addr`, visible or not.
    #[must_use]
    pub fn local_page(&self, owner: Owner, addr: u16, access: Access) -> Option<PageEntry> {
        let slot = self.slots[owner.slot()].as_ref()?;
        let page = usize::from(addr) >> PAGE_BITS;
        Some(if access.reads() { slot.read[page] } else { slot.write[page] })
    }

    /// Highest-priority holder of `addr`'s page.
    #[must_use]
    pub fn global_owner(&self, addr: u16, access: Access) -> Option<Owner> {
        let page = usize::from(addr) >> PAGE_BITS;
        let table = if access.reads() { &self.read } else { &self.write };
        table.top(page).map(|s| Owner(s as u8))
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn read(&self, devices: &mut Devices, addr: u16) -> u8 {
        match self.read.global[usize::from(addr) >> PAGE_BITS] {
            PageEntry::Direct { buffer, offset } => {
                self.buffers[buffer.0][offset + usize::from(addr & PAGE_MASK)]
            }
            PageEntry::Callback { device } => {
                devices.get_mut(device).map_or(0xFF, |d| d.mem_read(addr))
            }
            PageEntry::Undefined => {
                tracing::trace!(addr, "read from unmapped page");
                0xFF
            }
        }
    }

    pub fn write(&mut self, devices: &mut Devices, addr: u16, value: u8) {
        match self.write.global[usize::from(addr) >> PAGE_BITS] {
            PageEntry::Direct { buffer, offset } => {
                self.buffers[buffer.0][offset + usize::from(addr & PAGE_MASK)] = value;
            }
            PageEntry::Callback { device } => {
                if let Some(d) = devices.get_mut(device) {
                    d.mem_write(addr, value);
                }
            }
            PageEntry::Undefined => {
                tracing::trace!(addr, value, "write to unmapped page");
            }
        }
    }

    /// Direct window over `addr`'s page, if it reads plain bytes.
    #[must_use]
    pub fn fetch_window(&self, addr: u16) -> Option<FetchWindow> {
        let page = usize::from(addr) >> PAGE_BITS;
        match self.read.global[page] {
            PageEntry::Direct { buffer, offset } => Some(FetchWindow {
                base: addr & !PAGE_MASK,
                len: PAGE_SIZE as u16,
                buffer: buffer.0 as u32,
                offset: offset as u32,
                generation: self.generation,
            }),
            _ => None,
        }
    }

    /// Read through a window; `None` once any remap has happened since it
    /// was issued.
    #[must_use]
    pub fn read_window(&self, window: &FetchWindow, addr: u16) -> Option<u8> {
        if window.generation != self.generation {
            return None;
        }
        let index = window.offset as usize + usize::from(addr.wrapping_sub(window.base));
        self.buffers.get(window.buffer as usize)?.get(index).copied()
    }
}
