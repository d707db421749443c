// kernel/src/testing.rs
//
// 役割:
// - ホスト上の #[cfg(test)] から、メモリ管理コアを「本物の経路」で動かすための足場。
//
// やること:
// - SimRam: ホストのヒープ上に 4KiB 境界の「物理メモリ」を用意し、
//   本番と同じ PhysWindow（phys + offset）で見せる。
// - FakeRegisters: CR3 / CR2 の代役。CR3 への書き込みを記録する。
//
// やらないこと:
// - ページングの有効化や本物の例外発生（それは QEMU 上の仕事）

use core::cell::{Cell, RefCell};
use std::vec::Vec;

use crate::arch::cpu::ControlRegisters;
use crate::mem::addr::{PhysAddr, PhysFrame, VirtAddr};
use crate::mem::layout::HIGHER_HALF_L4_INDEX;
use crate::mem::paging::{EntryExt, PageFlags};
use crate::mem::phys::PhysWindow;
use crate::types::PAGE_SIZE;

#[repr(C, align(4096))]
struct RamFrame([u8; PAGE_SIZE as usize]);

/// 物理 [base, base + frames*4KiB) を模したホストメモリ
pub struct SimRam {
    base: PhysAddr,
    frames: Vec<RamFrame>,
}

impl SimRam {
    pub fn new(base: PhysAddr, frames: usize) -> Self {
        assert!(base.is_page_aligned());
        let frames = (0..frames).map(|_| RamFrame([0; PAGE_SIZE as usize])).collect();
        SimRam { base, frames }
    }

    pub fn window(&self) -> PhysWindow {
        let host = self.frames.as_ptr() as u64;
        // Safety: 窓経由で触るのはテストが用意した範囲だけで、SimRam が生きている間だけ使う
        unsafe { PhysWindow::new(host.wrapping_sub(self.base.0)) }
    }

    pub fn end(&self) -> PhysAddr {
        self.base + self.frames.len() as u64 * PAGE_SIZE
    }

    pub fn fill(&self, start: PhysAddr, len: usize, byte: u8) {
        assert!(start.0 >= self.base.0 && start.0 + len as u64 <= self.end().0);
        self.window().write_bytes(start, &std::vec![byte; len]);
    }

    pub fn bytes(&self, start: PhysAddr, len: usize) -> Vec<u8> {
        assert!(start.0 >= self.base.0 && start.0 + len as u64 <= self.end().0);
        let mut buf = std::vec![0u8; len];
        self.window().read_bytes(start, &mut buf);
        buf
    }
}

/// bootloader が作る階層を小さく真似たもの（物理 [0x1000, 0x5000) を使う）
///
/// - L4[0] → L3 → L3[0] → L2、L2[0] は [0, 2MiB) の identity 大ページ
/// - L4[256] → physmap 用 L3、L3[0] は物理 0 からの 1GiB 大ページ
pub struct KernelTables {
    pub root: PhysFrame,
    pub l3: PhysFrame,
    pub l2: PhysFrame,
    pub physmap_l3: PhysFrame,
}

impl KernelTables {
    pub const FIRST_FRAME: u64 = 0x1000;
    pub const END: u64 = 0x5000;

    pub fn install(ram: &SimRam) -> Self {
        assert!(ram.base.0 <= Self::FIRST_FRAME && ram.end().0 >= Self::END);
        let w = ram.window();
        let frame = |n: u64| PhysAddr(Self::FIRST_FRAME + n * PAGE_SIZE).frame();
        let t = KernelTables {
            root: frame(0),
            l3: frame(1),
            l2: frame(2),
            physmap_l3: frame(3),
        };
        for f in [t.root, t.l3, t.l2, t.physmap_l3] {
            w.table(f).clear();
        }

        let table = PageFlags::PRESENT | PageFlags::WRITABLE;
        let huge = table | PageFlags::HUGE;

        w.table(t.root).with_mut(|l4| {
            l4[0].point_to(t.l3, table);
            l4[HIGHER_HALF_L4_INDEX].point_to(t.physmap_l3, table);
        });
        w.table(t.l3).with_mut(|l3| l3[0].point_to(t.l2, table));
        w.table(t.l2).with_mut(|l2| l2[0].point_to(PhysFrame::from_index(0), huge));
        w.table(t.physmap_l3)
            .with_mut(|l3| l3[0].point_to(PhysFrame::from_index(0), huge));
        t
    }
}

/// CR3 / CR2 の代役
pub struct FakeRegisters {
    cr3: Cell<PhysFrame>,
    cr2: Cell<u64>,
    writes: RefCell<Vec<PhysFrame>>,
}

impl FakeRegisters {
    pub fn new(active_root: PhysFrame) -> Self {
        FakeRegisters {
            cr3: Cell::new(active_root),
            cr2: Cell::new(0),
            writes: RefCell::new(Vec::new()),
        }
    }

    pub fn set_fault_address(&self, addr: u64) {
        self.cr2.set(addr);
    }

    /// set_active_root() に渡された root の履歴
    pub fn cr3_writes(&self) -> Vec<PhysFrame> {
        self.writes.borrow().clone()
    }
}

impl ControlRegisters for FakeRegisters {
    fn active_root(&self) -> PhysFrame {
        self.cr3.get()
    }

    unsafe fn set_active_root(&self, root: PhysFrame) {
        self.cr3.set(root);
        self.writes.borrow_mut().push(root);
    }

    fn fault_address(&self) -> VirtAddr {
        VirtAddr(self.cr2.get())
    }
}

/// `f` が fail-stop（テストでは panic）に到達したら true
pub fn hits_fail_stop<F: FnOnce()>(f: F) -> bool {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(()) => false,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<std::string::String>().map(|s| s.as_str()));
            msg == Some(crate::arch::cpu::FAIL_STOP_MESSAGE)
        }
    }
}
