// src/arch/cpu.rs
// CPU 命令ラッパ。unsafe は最小限。
//
// - halt_loop / fail_stop: 致命的状態での停止
// - without_interrupts: メモリ管理コアの臨界区間
// - ControlRegisters: CR3 / CR2 への細い入口（テストでは FakeRegisters に差し替える）

use crate::mem::addr::{PhysFrame, VirtAddr};

/// cfg(test) で fail_stop() が panic するときのメッセージ
pub const FAIL_STOP_MESSAGE: &str = "fail-stop";

pub fn halt_loop() -> ! {
    loop {
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

/// 致命的な不変条件違反での停止。
///
/// - 実機: 割り込みを止めて hlt し続ける（復帰しない）。
/// - ホストテスト: panic にして catch_unwind で観測できるようにする。
#[cfg(not(test))]
pub fn fail_stop() -> ! {
    x86_64::instructions::interrupts::disable();
    halt_loop()
}

#[cfg(test)]
pub fn fail_stop() -> ! {
    panic!("fail-stop")
}

/// 割り込みを止めたまま `f` を実行する。
#[cfg(not(test))]
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(f)
}

/// ホストテストでは割り込みフラグを触れないので、そのまま呼ぶ。
#[cfg(test)]
#[inline]
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// ページング関連の制御レジスタ
pub trait ControlRegisters {
    /// CR3 が指している L4 テーブル
    fn active_root(&self) -> PhysFrame;

    /// CR3 を書き換える。
    ///
    /// # Safety
    /// `root` の階層でカーネル領域（コード・スタック・physmap）が引けること。
    /// そうでなければ次の命令フェッチで #PF になる。
    unsafe fn set_active_root(&self, root: PhysFrame);

    /// 直近の #PF の原因アドレス（CR2）
    fn fault_address(&self) -> VirtAddr;
}

/// 実 CPU の CR3 / CR2
pub struct X86ControlRegisters;

impl ControlRegisters for X86ControlRegisters {
    fn active_root(&self) -> PhysFrame {
        let (frame, _) = x86_64::registers::control::Cr3::read();
        PhysFrame::from_index(frame.start_address().as_u64() / crate::types::PAGE_SIZE)
    }

    unsafe fn set_active_root(&self, root: PhysFrame) {
        use x86_64::registers::control::Cr3;
        use x86_64::structures::paging::PhysFrame as X86PhysFrame;

        let (_, flags) = Cr3::read();
        let frame = X86PhysFrame::containing_address(x86_64::PhysAddr::new(root.start_address().0));
        Cr3::write(frame, flags);
    }

    fn fault_address(&self) -> VirtAddr {
        VirtAddr(x86_64::registers::control::Cr2::read_raw())
    }
}
