// src/kernel/mod.rs
//
// memcore: メモリ管理コアのハンドル
//
// - MemoryManager が frame pool / 物理窓 / CPU レジスタの入口をまとめて所有する。
// - 公開操作はすべて割り込みを止めた区間で走る（#PF 以外の割り込みハンドラと pool を取り合わない）。
// - グローバル状態は持たない。起動コード（entry）が 1 つ作って &mut で回す。
//
// [このモジュールの不変条件]
//
// 1. kernel_root
//    - new() した時点の CR3 をカーネル自身の root として覚える。
//    - activate_kernel() はここへ戻すだけ（カーネルの階層は作り直さない）。
//
// 2. タスクの root
//    - build_task() が成功したタスクだけが activate() の対象になる。
//
// 3. pool
//    - ページテーブル・データフレームはすべてこの pool から取る。
//    - pool 外のフレーム（タスクイメージなど）は呼び出し側が所有する。

pub mod demo;
#[cfg(all(target_os = "none", not(test)))]
pub mod entry;
pub mod trace;

use crate::arch::cpu::{self, ControlRegisters};
use crate::arch::paging::{self, SwitchError};
use crate::logging;
use crate::mem::addr::{PhysAddr, PhysFrame, VirtAddr, VirtPage};
use crate::mem::address_space::{self, BuildError, Task};
use crate::mem::mapper::{self, MapError};
use crate::mem::paging::PageLevel;
use crate::mem::phys::PhysWindow;
use crate::mem::walker::{self, Translation, WalkSummary};
use crate::mm::{FrameError, FramePool, PoolStats};

/// audit() の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskAudit {
    pub root: PhysFrame,
    pub summary: WalkSummary,
    /// L4[0] → L3[0] がカーネルと同じか
    pub kernel_spliced: bool,
}

pub struct MemoryManager<C: ControlRegisters> {
    pool: FramePool,
    window: PhysWindow,
    regs: C,
    kernel_root: PhysFrame,
}

impl<C: ControlRegisters> MemoryManager<C> {
    pub fn new(pool: FramePool, window: PhysWindow, regs: C) -> Self {
        let kernel_root = regs.active_root();

        logging::info("memcore: memory manager ready");
        logging::info_hex(" kernel_root", kernel_root.start_address().0);
        logging::info_hex(" pool_base", pool.base().start_address().0);
        logging::info_u64(" pool_frames", pool.capacity() as u64);

        MemoryManager {
            pool,
            window,
            regs,
            kernel_root,
        }
    }

    pub fn kernel_root(&self) -> PhysFrame {
        self.kernel_root
    }

    pub fn regs(&self) -> &C {
        &self.regs
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn allocate_frame(&mut self) -> Result<PhysFrame, FrameError> {
        cpu::without_interrupts(|| self.pool.allocate())
    }

    pub fn free_frame(&mut self, frame: PhysFrame) {
        cpu::without_interrupts(|| self.pool.free(frame))
    }

    pub fn map(&mut self, root: PhysFrame, page: VirtPage, frame: PhysFrame) -> Result<(), MapError> {
        cpu::without_interrupts(|| mapper::map(&mut self.pool, &self.window, root, page, frame))
    }

    pub fn map_anonymous(&mut self, root: PhysFrame, page: VirtPage) -> Result<PhysFrame, MapError> {
        cpu::without_interrupts(|| mapper::map_anonymous(&mut self.pool, &self.window, root, page))
    }

    pub fn build_task(&mut self, task: &mut Task) -> Result<(), BuildError> {
        let result = cpu::without_interrupts(|| {
            address_space::build(task, &mut self.pool, &self.window, &self.regs)
        });
        if let Err(e) = result {
            logging::error("memcore: build_task failed");
            logging::error(e.as_str());
        }
        result
    }

    pub fn activate(&self, task: &Task) -> Result<(), SwitchError> {
        cpu::without_interrupts(|| paging::switch_address_space(&self.regs, task))
    }

    /// カーネル自身の root に戻る
    pub fn activate_kernel(&self) {
        // Safety: kernel_root は起動時に CPU が使っていた階層そのもの
        cpu::without_interrupts(|| unsafe { paging::switch_to_root(&self.regs, self.kernel_root) })
    }

    pub fn active_root(&self) -> PhysFrame {
        paging::active_root(&self.regs)
    }

    pub fn translate(&self, root: PhysFrame, vaddr: VirtAddr) -> Option<Translation> {
        cpu::without_interrupts(|| walker::translate(&self.window, root, vaddr))
    }

    /// 物理メモリへ直接書く（タスクイメージの用意など、pool 外のフレーム向け）
    pub fn write_phys(&self, start: PhysAddr, bytes: &[u8]) {
        self.window.write_bytes(start, bytes);
    }

    /// build 済みタスクの階層を集計してログに出す
    pub fn audit(&self, task: &Task) -> Option<TaskAudit> {
        let root = task.root()?;
        let audit = cpu::without_interrupts(|| TaskAudit {
            root,
            summary: walker::summarize(&self.window, root),
            kernel_spliced: address_space::kernel_region_spliced(&self.window, root, self.kernel_root),
        });

        logging::info("memcore: task audit");
        logging::info_hex(" root", root.start_address().0);
        logging::info_hex(" load_vaddr", task.image().load_vaddr().0);
        logging::info_hex(" load_paddr", task.image().load_paddr().0);
        logging::info_hex(" bss_end_vaddr", task.image().bss_end_vaddr().0);
        logging::info_u64(" tables", audit.summary.tables() as u64);
        logging::info_u64(" leaves", audit.summary.leaves as u64);
        logging::info_u64(" huge_leaves", audit.summary.huge_leaves as u64);
        if audit.kernel_spliced {
            logging::info(" kernel region = spliced");
        } else {
            logging::error(" kernel region = NOT spliced");
        }
        Some(audit)
    }

    /// 現在の CR3 階層を全部ログに出す
    pub fn dump_active(&self) {
        let root = self.active_root();
        cpu::without_interrupts(|| walker::dump(&self.window, root, PageLevel::L4));
    }
}
