// kernel/src/kernel/demo/mod.rs
//
// 役割:
// - デモ/テスト注入（fault injection）を起動コードから分離する。
// - feature で切り替わる “実験用分岐” をここに閉じ込める。
//
// 設計方針:
// - MemoryManager 本体を汚さない（起動コードは hook を叩くだけ）
// - feature off でもコンパイルできるように、関数は常に存在させる
// - 注入ロジックは demo/* に分割して責務を小さく保つ

pub mod mem_faults;

use crate::arch::cpu::ControlRegisters;

use super::MemoryManager;

/// MemoryManager 初期化直後に注入を試す
/// - 注入したら true（通常のデモタスクはスキップしてよい）
pub fn on_boot<C: ControlRegisters>(mm: &mut MemoryManager<C>) -> bool {
    mem_faults::on_boot(mm)
}
