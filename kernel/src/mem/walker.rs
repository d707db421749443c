// kernel/src/mem/walker.rs
//
// 役割:
// - ページテーブル階層を読むだけの道具（書き換えはしない）。
//   - walk: present なエントリを深さ優先で列挙する
//   - dump: walk の結果をログに出す（起動時の監査用）
//   - translate: 1 つの仮想アドレスを物理アドレスへ引く
//   - summarize: レベルごとの present 数と leaf 数
//
// 方針:
// - 大ページ（HUGE）のエントリは報告するが、その下へは降りない。
// - L1 のエントリは常に leaf。

use x86_64::structures::paging::PageTableIndex;

use crate::logging;
use crate::mem::addr::{PhysAddr, PhysFrame, VirtAddr};
use crate::mem::paging::{EntryExt, PageFlags, PageLevel};
use crate::mem::phys::PhysWindow;

/// walk が訪れた 1 エントリ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    /// エントリを含むテーブルのフレーム
    pub table: PhysFrame,
    pub index: PageTableIndex,
    pub level: PageLevel,
    /// エントリが指すフレーム（次段テーブル / データ / 大ページの先頭）
    pub target: PhysFrame,
    pub flags: PageFlags,
    /// このエントリが覆う仮想範囲の先頭（canonical）
    pub vaddr: VirtAddr,
}

impl WalkEntry {
    /// データページ（または大ページ）を指すエントリか
    pub fn is_leaf(&self) -> bool {
        is_leaf(self.level, self.flags)
    }
}

/// `root` を `level` のテーブルとみなし、present なエントリを全部 visit する。
pub fn walk<F>(window: &PhysWindow, root: PhysFrame, level: PageLevel, visit: &mut F)
where
    F: FnMut(&WalkEntry),
{
    walk_table(window, root, level, 0, visit);
}

fn walk_table<F>(window: &PhysWindow, frame: PhysFrame, level: PageLevel, prefix: u64, visit: &mut F)
where
    F: FnMut(&WalkEntry),
{
    let table = window.table(frame);
    for (index, entry) in table.entries() {
        if !entry.is_present() {
            continue;
        }

        let raw = prefix | (u64::from(index) * level.entry_size());
        let walked = WalkEntry {
            table: frame,
            index,
            level,
            target: entry.target(),
            flags: entry.page_flags(),
            vaddr: VirtAddr(crate::mem::addr::canonicalize(raw)),
        };
        visit(&walked);

        if walked.is_leaf() {
            continue;
        }
        if let Some(lower) = level.next_lower() {
            walk_table(window, walked.target, lower, raw, visit);
        }
    }
}

/// walk の結果を 1 エントリ 3 行でログに出す。
pub fn dump(window: &PhysWindow, root: PhysFrame, level: PageLevel) {
    logging::info("=== page table dump ===");
    logging::info_hex(" root", root.start_address().0);

    let mut count = 0u64;
    walk(window, root, level, &mut |e| {
        count += 1;
        logging::info_hex(" entry", e.table.start_address().0 + u64::from(e.index) * 8);
        logging::info_hex("  target", e.target.start_address().0);
        logging::info_u64("  level", e.level.number() as u64);
    });

    logging::info_u64(" present_entries", count);
    logging::info("=== end of page table dump ===");
}

// L4 の PS ビットはハードウェア的に予約なので leaf 扱いしない
fn is_leaf(level: PageLevel, flags: PageFlags) -> bool {
    match level {
        PageLevel::L1 => true,
        PageLevel::L2 | PageLevel::L3 => flags.contains(PageFlags::HUGE),
        PageLevel::L4 => false,
    }
}

/// translate の結果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    pub phys: PhysAddr,
    /// leaf エントリの属性
    pub flags: PageFlags,
    /// leaf が見つかったレベル（大ページなら L2 / L3）
    pub level: PageLevel,
}

/// `vaddr` を `root` の階層で引く。途中で present でなければ None。
pub fn translate(window: &PhysWindow, root: PhysFrame, vaddr: VirtAddr) -> Option<Translation> {
    let mut frame = root;
    let mut level = PageLevel::L4;

    loop {
        let entry = window.table(frame).get(vaddr.table_index(level));
        if !entry.is_present() {
            return None;
        }

        let flags = entry.page_flags();
        if is_leaf(level, flags) {
            let mask = level.entry_size() - 1;
            let base = entry.target().start_address().0 & !mask;
            return Some(Translation {
                phys: PhysAddr(base | (vaddr.0 & mask)),
                flags,
                level,
            });
        }

        frame = entry.target();
        level = level.next_lower()?;
    }
}

/// 階層の集計
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// present なエントリ数。index 0 が L1、3 が L4。
    pub present: [usize; 4],
    /// 4KiB leaf の数
    pub leaves: usize,
    /// 大ページ leaf の数
    pub huge_leaves: usize,
}

impl WalkSummary {
    pub fn present_at(&self, level: PageLevel) -> usize {
        self.present[level.number() as usize - 1]
    }

    /// root から辿れるテーブルの枚数（splice や higher half で共有しているテーブルも数える）
    pub fn tables(&self) -> usize {
        // root + 各中間エントリが指すテーブル
        1 + self.present[1..].iter().sum::<usize>() - self.huge_leaves
    }
}

pub fn summarize(window: &PhysWindow, root: PhysFrame) -> WalkSummary {
    let mut summary = WalkSummary::default();
    walk(window, root, PageLevel::L4, &mut |e| {
        summary.present[e.level.number() as usize - 1] += 1;
        if e.level == PageLevel::L1 {
            summary.leaves += 1;
        } else if e.is_leaf() {
            summary.huge_leaves += 1;
        }
    });
    summary
}
