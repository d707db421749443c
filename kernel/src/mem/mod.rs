// kernel/src/mem/mod.rs
//
// 役割:
// - メモリ関連のサブモジュールをまとめる中継点。
// - 型（addr / paging / layout）→ 物理窓（phys）→ 操作（mapper / walker / address_space）の順に依存する。

pub mod addr;
pub mod paging;
pub mod layout;
pub mod phys;
pub mod mapper;
pub mod walker;
pub mod address_space;
