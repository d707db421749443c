// kernel/src/arch/mod.rs
//
// アーキ依存部。unsafe をできるだけここに閉じ込める方針。
// - cpu: hlt / 割り込みマスク / CR3・CR2 の入口
// - paging: CR3 の切り替え
// - interrupts: IDT と #PF 報告

pub mod cpu;
pub mod interrupts;
pub mod paging;

/// CPU を停止させるループ
pub fn halt_loop() -> ! {
    cpu::halt_loop()
}
