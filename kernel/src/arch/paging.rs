// kernel/src/arch/paging.rs
//
// 役割:
// - アドレス空間の切り替え（CR3 の書き換え）をここに集約する。
// - CR3 への実アクセスは ControlRegisters 経由（実機は X86ControlRegisters、テストは FakeRegisters）。
//
// 方針:
// - 切り替え先は build を最後まで終えたタスクだけ。
//   カーネル領域と higher half が splice されていない root に切り替えると、次の命令フェッチで #PF になる。
// - TLB は CR3 の書き込みでまとめて捨てる（PCID は使わない）。

use crate::arch::cpu::ControlRegisters;
use crate::kernel::trace;
use crate::logging;
use crate::mem::addr::PhysFrame;
use crate::mem::address_space::Task;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchError {
    /// build されていない（root が無い）
    NotBuilt,
    /// build が途中で失敗していて、カーネル領域が引けるとは限らない
    Incomplete,
}

impl SwitchError {
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchError::NotBuilt => "SwitchError::NotBuilt",
            SwitchError::Incomplete => "SwitchError::Incomplete",
        }
    }
}

/// 今 CPU が使っている L4
pub fn active_root<C: ControlRegisters>(regs: &C) -> PhysFrame {
    regs.active_root()
}

/// タスクのアドレス空間へ切り替える。
pub fn switch_address_space<C: ControlRegisters>(regs: &C, task: &Task) -> Result<(), SwitchError> {
    let Some(root) = task.root() else {
        logging::error("switch_address_space: task has no root");
        return Err(SwitchError::NotBuilt);
    };
    if !task.is_complete() {
        logging::error("switch_address_space: task build is incomplete");
        logging::error_hex(" root", root.start_address().0);
        return Err(SwitchError::Incomplete);
    }

    // Safety: build が完了した root にはカーネル領域と higher half が入っている
    unsafe { switch_to_root(regs, root) };
    Ok(())
}

/// 任意の root へ切り替える（カーネル自身の root に戻るときなど）。
///
/// # Safety
/// `root` の階層で、実行中のコード・スタック・physmap が引けること。
pub unsafe fn switch_to_root<C: ControlRegisters>(regs: &C, root: PhysFrame) {
    let from = regs.active_root();
    trace::trace_switch(from, root);
    regs.set_active_root(root);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::addr::{PhysAddr, VirtAddr};
    use crate::mem::address_space::{build, TaskImage};
    use crate::mem::layout::USER_TEXT_START;
    use crate::mm::FramePool;
    use crate::testing::{FakeRegisters, KernelTables, SimRam};

    fn task() -> Task {
        let image = TaskImage::new(
            VirtAddr(USER_TEXT_START),
            PhysAddr(0x9000),
            PhysAddr(0xa000),
            VirtAddr(USER_TEXT_START + 0x1000),
        )
        .unwrap();
        Task::new(image)
    }

    #[test]
    fn switches_to_built_task_and_back() {
        let ram = SimRam::new(PhysAddr(0), 256);
        let kernel = KernelTables::install(&ram);
        let regs = FakeRegisters::new(kernel.root);
        let mut pool = FramePool::new(PhysAddr(0x8_0000).frame(), 16);

        let mut t = task();
        build(&mut t, &mut pool, &ram.window(), &regs).unwrap();
        let root = t.root().unwrap();

        switch_address_space(&regs, &t).unwrap();
        assert_eq!(active_root(&regs), root);

        unsafe { switch_to_root(&regs, kernel.root) };
        assert_eq!(regs.cr3_writes(), [root, kernel.root]);
    }

    #[test]
    fn refuses_unbuilt_task() {
        let regs = FakeRegisters::new(PhysFrame::from_index(1));
        let _ = logging::captured();

        assert_eq!(switch_address_space(&regs, &task()), Err(SwitchError::NotBuilt));
        assert!(regs.cr3_writes().is_empty());
        assert_eq!(logging::captured().len(), 1);
    }

    #[test]
    fn refuses_half_built_task() {
        let ram = SimRam::new(PhysAddr(0), 256);
        // カーネル階層が空 → splice で失敗する
        let regs = FakeRegisters::new(PhysFrame::from_index(1));
        let mut pool = FramePool::new(PhysAddr(0x8_0000).frame(), 16);

        let mut t = task();
        assert!(build(&mut t, &mut pool, &ram.window(), &regs).is_err());
        assert!(t.root().is_some());

        assert_eq!(switch_address_space(&regs, &t), Err(SwitchError::Incomplete));
        assert!(regs.cr3_writes().is_empty());
    }
}
