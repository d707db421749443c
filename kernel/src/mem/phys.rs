// kernel/src/mem/phys.rs
//
// 役割:
// - 「物理アドレス → カーネル仮想アドレス」変換を PhysWindow に集約する。
// - ページテーブルフレームは TableView 経由で x86_64 の PageTable として触る。
//
// 方針:
// - すべての物理メモリアクセスは **必ず PhysWindow を経由** する。
//   bootloader の physmap offset を変えても、ここ以外は変えなくてよい。
// - &mut PageTable は with_mut のクロージャの中だけで渡す（参照を持ち越さない）。
// - バイト列の読み書きは volatile で 1 バイトずつ。
// - unsafe は PhysWindow::new の契約に閉じ込める。

use core::ptr::{read_volatile, write_bytes, write_volatile};

use x86_64::structures::paging::page_table::PageTableEntry;
use x86_64::structures::paging::{PageTable, PageTableIndex};

use crate::mem::addr::{PhysAddr, PhysFrame};
use crate::mem::paging::EntryExt;
use crate::types::{ENTRY_COUNT, PAGE_SIZE};

/// 物理メモリ全域が `phys + offset` に見えている仮想窓
#[derive(Clone, Copy, Debug)]
pub struct PhysWindow {
    offset: u64,
}

impl PhysWindow {
    /// # Safety
    /// - この窓経由で触る物理アドレスは、すべて `phys + offset` に読み書き可能でマップされていること。
    /// - 窓経由で触るフレーム（frame pool / ページテーブル / タスクイメージ）は
    ///   メモリ管理コアが排他的に所有していること（Rust の参照と重ならないこと）。
    pub const unsafe fn new(offset: u64) -> Self {
        PhysWindow { offset }
    }

    fn virt_of(&self, phys: PhysAddr) -> *mut u8 {
        phys.0.wrapping_add(self.offset) as *mut u8
    }

    /// フレームをページテーブルとして見る
    pub fn table(&self, frame: PhysFrame) -> TableView {
        TableView { window: *self, frame }
    }

    /// 1 フレームをゼロクリアする
    pub fn zero_frame(&self, frame: PhysFrame) {
        self.zero_range(frame.start_address(), PAGE_SIZE);
    }

    /// 物理 [start, start+len) をゼロクリアする
    pub fn zero_range(&self, start: PhysAddr, len: u64) {
        if len == 0 {
            return;
        }
        // Safety: new() の契約により、窓経由の物理範囲は書き込み可能で他と重ならない。
        unsafe { write_bytes(self.virt_of(start), 0, len as usize) };
    }

    /// 物理 [start, start+buf.len()) を buf にコピーする
    pub fn read_bytes(&self, start: PhysAddr, buf: &mut [u8]) {
        let src = self.virt_of(start);
        for (i, b) in buf.iter_mut().enumerate() {
            // Safety: new() の契約
            *b = unsafe { read_volatile(src.add(i)) };
        }
    }

    /// buf を物理 [start, start+buf.len()) に書き込む
    pub fn write_bytes(&self, start: PhysAddr, buf: &[u8]) {
        let dst = self.virt_of(start);
        for (i, b) in buf.iter().enumerate() {
            // Safety: new() の契約
            unsafe { write_volatile(dst.add(i), *b) };
        }
    }
}

/// 1 フレーム分のページテーブル（512 エントリ）への入口
#[derive(Clone, Copy, Debug)]
pub struct TableView {
    window: PhysWindow,
    frame: PhysFrame,
}

impl TableView {
    /// フレームを &mut PageTable として `f` に渡す
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut PageTable) -> R) -> R {
        let table = self.window.virt_of(self.frame.start_address()) as *mut PageTable;
        // Safety: new() の契約により窓経由の物理フレームは読み書き可能で他と重ならない。
        // frame はページ境界なので PageTable の align(4096) を満たす。
        f(unsafe { &mut *table })
    }

    pub fn get(&self, index: PageTableIndex) -> PageTableEntry {
        self.with_mut(|t| t[index].clone())
    }

    pub fn set(&self, index: PageTableIndex, entry: PageTableEntry) {
        self.with_mut(|t| t[index] = entry);
    }

    /// 全エントリを未使用にする
    pub fn clear(&self) {
        self.with_mut(|t| t.zero());
    }

    /// (index, entry) を 0..512 の順に返す
    pub fn entries(&self) -> impl Iterator<Item = (PageTableIndex, PageTableEntry)> + '_ {
        (0..ENTRY_COUNT as u16).map(move |i| {
            let index = PageTableIndex::new(i);
            (index, self.get(index))
        })
    }

    pub fn present_count(&self) -> usize {
        self.with_mut(|t| t.iter().filter(|e| e.is_present()).count())
    }
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE as usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::paging::PageFlags;
    use crate::testing::SimRam;

    #[test]
    fn table_view_reads_back_entries() {
        let ram = SimRam::new(PhysAddr(0), 8);
        let t = ram.window().table(PhysFrame::from_index(1));
        let idx = PageTableIndex::new(511);
        let mut e = PageTableEntry::new();
        e.point_to(PhysFrame::from_index(3), PageFlags::TABLE_DEFAULT);

        t.set(idx, e.clone());
        assert!(t.get(idx).same_as(&e));
        assert_eq!(t.present_count(), 1);

        // 末尾エントリは frame の最後の 8byte
        let mut raw = [0u8; 8];
        ram.window().read_bytes(PhysAddr(0x1ff8), &mut raw);
        assert_eq!(u64::from_le_bytes(raw), 0x3007);
    }

    #[test]
    fn with_mut_sees_the_same_frame() {
        let ram = SimRam::new(PhysAddr(0), 4);
        let t = ram.window().table(PhysFrame::from_index(2));
        t.with_mut(|table| table[7].point_to(PhysFrame::from_index(1), PageFlags::PRESENT));

        assert!(t.get(PageTableIndex::new(7)).is_present());
        let mut raw = [0u8; 8];
        ram.window().read_bytes(PhysAddr(0x2000 + 7 * 8), &mut raw);
        assert_eq!(u64::from_le_bytes(raw), 0x1001);
    }

    #[test]
    fn clear_unmaps_everything() {
        let ram = SimRam::new(PhysAddr(0x10_0000), 4);
        let frame = PhysFrame::from_start_address(PhysAddr(0x10_2000)).unwrap();
        let t = ram.window().table(frame);
        t.with_mut(|table| {
            for e in table.iter_mut() {
                e.point_to(PhysFrame::from_index(0xdead), PageFlags::TABLE_DEFAULT);
            }
        });
        assert_eq!(t.present_count(), ENTRY_COUNT);

        t.clear();
        assert_eq!(t.present_count(), 0);
        assert!(t.entries().all(|(_, e)| e.is_unused()));
    }

    #[test]
    fn zero_range_touches_only_requested_bytes() {
        let ram = SimRam::new(PhysAddr(0), 4);
        let w = ram.window();
        w.write_bytes(PhysAddr(0x1000), &[0xaa; 0x2000]);
        w.zero_range(PhysAddr(0x1800), 0x800);

        let mut buf = [0u8; 0x2000];
        w.read_bytes(PhysAddr(0x1000), &mut buf);
        assert!(buf[..0x800].iter().all(|&b| b == 0xaa));
        assert!(buf[0x800..0x1000].iter().all(|&b| b == 0));
        assert!(buf[0x1000..].iter().all(|&b| b == 0xaa));
    }
}
