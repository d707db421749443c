// src/mem/addr.rs
//
// 役割:
// - 物理アドレス / 仮想アドレス / フレーム / ページなど、メモリ関連の基本型を定義する。
// - 「数値に型を付ける」ことで、フレーム参照は常に 4KiB 境界になるようにする。
// やること:
// - u64 の生アドレス値に対して、「これは物理フレーム」「これは仮想ページ」と区別できるようにする。
// - 仮想アドレスを 4 つの 9bit index + 12bit offset に分解する。
// やらないこと:
// - ページテーブルの中身を読む/書く処理（それは mem::phys / mem::mapper 側で行う）。

use core::fmt;
use core::ops::Add;

use x86_64::structures::paging::PageTableIndex;

use crate::mem::paging::PageLevel;
use crate::types::PAGE_SIZE;

/// 物理アドレス（バイト単位）
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct PhysAddr(pub u64);

/// 仮想アドレス（バイト単位）
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct VirtAddr(pub u64);

/// 物理フレーム（4KiB ごとの番号）
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct PhysFrame {
    pub number: u64, // frame index = phys_addr / PAGE_SIZE
}

/// 仮想ページ（4KiB ごとの番号）
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct VirtPage {
    pub number: u64, // page index = virt_addr / PAGE_SIZE
}

impl PhysAddr {
    pub fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// このアドレスが含まれる物理フレームを返す。
    pub fn frame(self) -> PhysFrame {
        PhysFrame {
            number: self.0 / PAGE_SIZE,
        }
    }
}

impl VirtAddr {
    pub fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// このアドレスが含まれる仮想ページを返す。
    pub fn page(self) -> VirtPage {
        VirtPage {
            number: self.0 / PAGE_SIZE,
        }
    }

    /// 指定レベルのテーブル index（L1: bits 12..20, L2: 21..29, L3: 30..38, L4: 39..47）
    pub fn table_index(self, level: PageLevel) -> PageTableIndex {
        let va = x86_64::VirtAddr::new_truncate(self.0);
        match level {
            PageLevel::L4 => va.p4_index(),
            PageLevel::L3 => va.p3_index(),
            PageLevel::L2 => va.p2_index(),
            PageLevel::L1 => va.p1_index(),
        }
    }
}

/// 48bit canonical への正規化（bit47 を sign-extend）
#[inline(always)]
pub const fn canonicalize(addr: u64) -> u64 {
    let sign_bit = 1u64 << 47;
    if (addr & sign_bit) != 0 {
        addr | 0xffff_0000_0000_0000
    } else {
        addr & 0x0000_ffff_ffff_ffff
    }
}

impl PhysFrame {
    /// フレーム先頭の物理アドレスを返す。
    pub fn start_address(self) -> PhysAddr {
        PhysAddr(self.number * PAGE_SIZE)
    }

    /// インデックスから直接フレームを作る（テスト用途など）。
    pub const fn from_index(number: u64) -> Self {
        PhysFrame { number }
    }

    /// ページ境界のアドレスからのみフレームを作る。
    pub fn from_start_address(addr: PhysAddr) -> Option<Self> {
        if addr.is_page_aligned() {
            Some(addr.frame())
        } else {
            None
        }
    }
}

impl VirtPage {
    /// ページ先頭の仮想アドレスを返す。
    pub fn start_address(self) -> VirtAddr {
        VirtAddr(self.number * PAGE_SIZE)
    }
}

impl Add<u64> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: u64) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

impl Add<u64> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, rhs: u64) -> VirtAddr {
        VirtAddr(self.0 + rhs)
    }
}

// --- Debug 実装（ログで見やすくするため） ---

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // フレーム先頭の物理アドレスを表示
        write!(f, "PhysFrame({:#x})", self.start_address().0)
    }
}

impl fmt::Debug for VirtPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPage({:#x})", self.start_address().0)
    }
}
