// kernel/src/mem/layout.rs
//
// x86_64 仮想アドレスレイアウト（このカーネルの約束事）
//
//   0xffff_ffff_ffff_ffff +----------------------------+
//                         | higher half                |
//                         | (physmap / kernel stack)   |  ← bootloader が配置。全タスクで共有
//   0xffff_8000_0000_0000 +----------------------------+
//                         | (non-canonical)            |
//   0x0000_7fff_ffff_ffff +----------------------------+
//                         | user text + data + heap    |  ← タスクが明示的に map する
//   0x0000_0020_0000_0000 +----------------------------+  128GiB
//                         | user stack (下向きに伸びる) |
//   0x0000_0000_4000_0000 +----------------------------+  1GiB
//                         | kernel only                |
//   0x0000_0000_0020_0000 +----------------------------+  2MiB
//                         | kernel identity            |
//   0x0000_0000_0000_0000 +----------------------------+
//
// 重要:
// - [0, 1GiB) は L4[0] → L3[0] の 1 エントリで引ける。タスク構築時はこの 1 エントリを
//   現在の階層から splice する（mem::address_space）。
// - タスクイメージがこの L3[0] に重なると splice で覆われて見えなくなる（build が警告を出す）。

use crate::mem::addr::VirtAddr;

/// 1MiB 未満は BIOS / VGA 領域。frame pool には使わない。
pub const LOW_MEMORY_END: u64 = 0x0010_0000;

/// identity map されたカーネル領域の終わり（2MiB）
pub const KERNEL_IDENTITY_END: u64 = 0x0020_0000;

/// カーネル専用領域の終わり（1GiB）= splice される L3[0] の範囲
pub const KERNEL_SPACE_END: u64 = 0x4000_0000;

/// ユーザスタックの天井（128GiB）。ここから下向きに伸びる。
pub const USER_STACK_TOP: u64 = 0x0020_0000_0000;

/// ユーザの text / data / heap の開始
pub const USER_TEXT_START: u64 = USER_STACK_TOP;

/// canonical な low half の終わり（exclusive）
pub const USER_SPACE_END: u64 = 0x0000_8000_0000_0000;

/// canonical な higher half の開始
pub const HIGHER_HALF_START: u64 = 0xffff_8000_0000_0000;

/// higher half の先頭 L4 index
pub const HIGHER_HALF_L4_INDEX: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    KernelIdentity,
    Kernel,
    UserStack,
    User,
    NonCanonical,
    HigherHalf,
}

/// 仮想アドレスがどの領域に属するか
pub fn classify(addr: VirtAddr) -> Region {
    match addr.0 {
        a if a < KERNEL_IDENTITY_END => Region::KernelIdentity,
        a if a < KERNEL_SPACE_END => Region::Kernel,
        a if a < USER_STACK_TOP => Region::UserStack,
        a if a < USER_SPACE_END => Region::User,
        a if a < HIGHER_HALF_START => Region::NonCanonical,
        _ => Region::HigherHalf,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::paging::PageLevel;

    #[test]
    fn classifies_boundaries() {
        assert_eq!(classify(VirtAddr(0xb8000)), Region::KernelIdentity);
        assert_eq!(classify(VirtAddr(0x20_1000)), Region::Kernel);
        assert_eq!(classify(VirtAddr(KERNEL_SPACE_END)), Region::UserStack);
        assert_eq!(classify(VirtAddr(USER_STACK_TOP - 8)), Region::UserStack);
        assert_eq!(classify(VirtAddr(USER_TEXT_START)), Region::User);
        assert_eq!(classify(VirtAddr(0x0000_8000_0000_0000)), Region::NonCanonical);
        assert_eq!(classify(VirtAddr(HIGHER_HALF_START)), Region::HigherHalf);
    }

    #[test]
    fn kernel_space_is_exactly_one_l3_slot() {
        let last = VirtAddr(KERNEL_SPACE_END - 1);
        assert_eq!(usize::from(last.table_index(PageLevel::L4)), 0);
        assert_eq!(usize::from(last.table_index(PageLevel::L3)), 0);
        assert_eq!(usize::from(VirtAddr(KERNEL_SPACE_END).table_index(PageLevel::L3)), 1);
        assert_eq!(usize::from(VirtAddr(HIGHER_HALF_START).table_index(PageLevel::L4)), HIGHER_HALF_L4_INDEX);
    }
}
