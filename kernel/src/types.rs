/*!
 * types
 *
 * 役割:
 *   - カーネル全体で共有する素朴な型・定数を集約する。
 *
 * やること:
 *   - ページサイズ、ページテーブルの幾何（512 エントリ / 9bit index）。
 *   - ファームウェアのメモリマップを表す MemoryRegion（frame pool の配置に使う）。
 *
 * やらないこと:
 *   - ページングや CR3 切替などの arch 依存処理。
 *
 * 設計方針:
 *   - 依存を増やさず、共通処理をここに寄せる。
 */

pub const PAGE_SIZE: u64 = 4096;

/// 物理アドレス幅（52bit）の上限（exclusive）
pub const PHYS_ADDR_LIMIT: u64 = 1 << 52;

/// 1 テーブルあたりのエントリ数（どのレベルでも 512）
pub const ENTRY_COUNT: usize = 512;

/// 1つの L4 エントリがカバーする仮想アドレス範囲（512GiB）
pub const L4_ENTRY_SIZE: u64 = 1u64 << 39;
/// 1つの L3 エントリがカバーする仮想アドレス範囲（1GiB）
pub const L3_ENTRY_SIZE: u64 = 1u64 << 30;
/// 1つの L2 エントリがカバーする仮想アドレス範囲（2MiB）
pub const L2_ENTRY_SIZE: u64 = 1u64 << 21;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryRegionType {
    Usable,
    Reserved,
    Other,
}

impl MemoryRegionType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryRegionType::Usable => "Usable",
            MemoryRegionType::Reserved => "Reserved",
            MemoryRegionType::Other => "Other",
        }
    }
}

/// ファームウェアから見た物理メモリ領域 [start_phys, end_phys)
#[derive(Clone, Copy, Debug)]
pub struct MemoryRegion {
    pub index: usize,
    pub start_phys: u64,
    pub end_phys: u64,
    pub region_type: MemoryRegionType,
}

impl MemoryRegion {
    pub fn size_bytes(&self) -> u64 {
        self.end_phys.saturating_sub(self.start_phys)
    }

    pub fn is_usable(&self) -> bool {
        self.region_type == MemoryRegionType::Usable
    }
}

/// `value` を `align`（2 の冪）の倍数へ切り上げる。溢れたら None。
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}
