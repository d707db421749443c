// kernel/src/lib.rs
//
// memcore: x86_64 カーネルのメモリ管理コア
//
// - mm: 物理フレームの固定 pool
// - mem: アドレス型 / ページテーブル / mapper / walker / タスクのアドレス空間
// - arch: CR3 切り替え・#PF 報告・CPU 命令
// - kernel: MemoryManager（割り込みマスク付きの公開操作）と起動コード
//
// ビルド形態:
// - ベアメタル（target_os = "none"）: no_std + bootloader
// - ホストの cargo test: std 上で SimRam（ホストメモリ）を物理メモリに見立てて動かす

#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_os = "none", feature(abi_x86_interrupt))]

pub mod arch;
pub mod kernel;
pub mod logging;
pub mod mem;
pub mod mm;
pub mod types;

#[cfg(all(target_os = "none", not(test)))]
mod panic;

#[cfg(test)]
pub(crate) mod testing;
