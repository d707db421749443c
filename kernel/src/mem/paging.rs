// kernel/src/mem/paging.rs
//
// 役割:
// - カーネル側の抽象ページ属性（PageFlags）とページテーブルのレベル（PageLevel）を定義する。
// - エントリ / テーブル / index の実体は x86_64 crate（PageTableEntry / PageTable / PageTableIndex）を使い、
//   ここではその境界で PageFlags ⇔ PageTableFlags と PhysFrame の変換だけを行う。
//
// エントリ形式（ハードウェア仕様）:
// - bit 0: present, bit 1: writable, bit 2: user, bit 7: huge（PS, 大ページ leaf）
// - bit 6 は dirty。大ページの目印としては使わず、読み出し時も無視する。
// - bits 12..51: 次段テーブル or データフレームの物理アドレス

use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::PageTableFlags;

use crate::mem::addr::{PhysAddr, PhysFrame};
use crate::types::{L2_ENTRY_SIZE, L3_ENTRY_SIZE, L4_ENTRY_SIZE, PAGE_SIZE};

bitflags::bitflags! {
    /// ページ属性（このカーネルが意味を持たせるビットだけ）
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        /// ページが有効かどうか
        const PRESENT = 1 << 0;
        /// 書き込み可能かどうか
        const WRITABLE = 1 << 1;
        /// ユーザ空間からアクセス可能かどうか
        const USER = 1 << 2;
        /// L3/L2 で大ページ leaf を示す（下位テーブルへ降りない）
        /// PS bit。bit 6 は dirty なので目印には使わず無視する。
        const HUGE = 1 << 7;
    }
}

impl PageFlags {
    /// mapper が中間テーブルにも leaf にも付ける属性
    pub const TABLE_DEFAULT: PageFlags = PageFlags::PRESENT
        .union(PageFlags::WRITABLE)
        .union(PageFlags::USER);
}

/// 抽象 PageFlags → x86_64 の PageTableFlags
pub fn to_x86_flags(flags: PageFlags) -> PageTableFlags {
    let mut res = PageTableFlags::empty();

    if flags.contains(PageFlags::PRESENT) {
        res |= PageTableFlags::PRESENT;
    }
    if flags.contains(PageFlags::WRITABLE) {
        res |= PageTableFlags::WRITABLE;
    }
    if flags.contains(PageFlags::USER) {
        res |= PageTableFlags::USER_ACCESSIBLE;
    }
    if flags.contains(PageFlags::HUGE) {
        res |= PageTableFlags::HUGE_PAGE;
    }

    res
}

/// x86_64 の PageTableFlags → 抽象 PageFlags（知らないビットは落とす）
pub fn from_x86_flags(flags: PageTableFlags) -> PageFlags {
    let mut res = PageFlags::empty();

    if flags.contains(PageTableFlags::PRESENT) {
        res |= PageFlags::PRESENT;
    }
    if flags.contains(PageTableFlags::WRITABLE) {
        res |= PageFlags::WRITABLE;
    }
    if flags.contains(PageTableFlags::USER_ACCESSIBLE) {
        res |= PageFlags::USER;
    }
    if flags.contains(PageTableFlags::HUGE_PAGE) {
        res |= PageFlags::HUGE;
    }

    res
}

/// x86_64 の PageTableEntry を memcore の型（PhysFrame / PageFlags）で読み書きする
pub trait EntryExt {
    fn is_present(&self) -> bool;
    fn is_huge(&self) -> bool;
    /// bits 12..51 が指す物理フレーム（大ページならその先頭）
    fn target(&self) -> PhysFrame;
    fn page_flags(&self) -> PageFlags;
    /// `frame` を `flags` で指すように書き換える
    fn point_to(&mut self, frame: PhysFrame, flags: PageFlags);
    /// 既存の属性を残したまま `flags` を足す
    fn add_flags(&mut self, flags: PageFlags);
    /// アドレスも全属性ビットも同じか
    fn same_as(&self, other: &PageTableEntry) -> bool;
}

impl EntryExt for PageTableEntry {
    fn is_present(&self) -> bool {
        self.flags().contains(PageTableFlags::PRESENT)
    }

    fn is_huge(&self) -> bool {
        self.flags().contains(PageTableFlags::HUGE_PAGE)
    }

    fn target(&self) -> PhysFrame {
        PhysAddr(self.addr().as_u64()).frame()
    }

    fn page_flags(&self) -> PageFlags {
        from_x86_flags(self.flags())
    }

    fn point_to(&mut self, frame: PhysFrame, flags: PageFlags) {
        let addr = x86_64::PhysAddr::new_truncate(frame.start_address().0);
        self.set_addr(addr, to_x86_flags(flags));
    }

    fn add_flags(&mut self, flags: PageFlags) {
        self.set_flags(self.flags() | to_x86_flags(flags));
    }

    fn same_as(&self, other: &PageTableEntry) -> bool {
        self.addr() == other.addr() && self.flags() == other.flags()
    }
}

/// ページテーブルのレベル（L4 が root）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PageLevel {
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
}

impl PageLevel {
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// 1つ下のレベル。L1 の下は無い。
    pub const fn next_lower(self) -> Option<PageLevel> {
        match self {
            PageLevel::L4 => Some(PageLevel::L3),
            PageLevel::L3 => Some(PageLevel::L2),
            PageLevel::L2 => Some(PageLevel::L1),
            PageLevel::L1 => None,
        }
    }

    /// このレベルの 1 エントリが覆う仮想範囲のバイト数
    pub const fn entry_size(self) -> u64 {
        match self {
            PageLevel::L1 => PAGE_SIZE,
            PageLevel::L2 => L2_ENTRY_SIZE,
            PageLevel::L3 => L3_ENTRY_SIZE,
            PageLevel::L4 => L4_ENTRY_SIZE,
        }
    }
}
