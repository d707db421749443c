// kernel/src/mem/mapper.rs
//
// 役割:
// - タスクの L4 から 4 段のテーブルを辿り（無ければ作り）、4KiB の leaf を 1 つ張る。
//
// 方針:
// - 中間テーブルが無ければ pool から 1 枚取り、ゼロクリアして present|writable|user で繋ぐ。
// - 既にある中間テーブルは再利用する（同じ L4/L3/L2 index を共有するページは同じテーブルを使う）。
// - leaf は常に上書き（同じページを再 map すると差し替わるだけで、何も確保しない）。
// - 途中で枯渇しても、作りかけの中間テーブルは巻き戻さない。
//
// やらないこと:
// - unmap（このカーネルにはまだ解放経路が無い）

use crate::kernel::trace;
use crate::mem::addr::{PhysFrame, VirtPage};
use crate::mem::paging::{EntryExt, PageFlags, PageLevel};
use crate::mem::phys::PhysWindow;
use crate::mm::pagetable_init::allocate_table;
use crate::mm::{FrameError, FramePool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// 中間テーブル or データフレームを確保できなかった
    FrameAllocationFailed,
    /// 途中のエントリが大ページ leaf で、その下にテーブルが無い
    ParentEntryHugePage(PageLevel),
}

impl MapError {
    pub fn as_str(self) -> &'static str {
        match self {
            MapError::FrameAllocationFailed => "MapError::FrameAllocationFailed",
            MapError::ParentEntryHugePage(_) => "MapError::ParentEntryHugePage",
        }
    }
}

impl From<FrameError> for MapError {
    fn from(_: FrameError) -> Self {
        MapError::FrameAllocationFailed
    }
}

/// `page` → `frame` を present|writable|user で `root` の階層に張る。
///
/// 既存の中間エントリにも present|writable|user を足す。
/// 最終的な権限は各段の AND なので、leaf の user を効かせるにはこれが要る。
pub fn map(
    pool: &mut FramePool,
    window: &PhysWindow,
    root: PhysFrame,
    page: VirtPage,
    frame: PhysFrame,
) -> Result<(), MapError> {
    let vaddr = page.start_address();
    let mut table = root;
    let mut level = PageLevel::L4;

    while let Some(lower) = level.next_lower() {
        let index = vaddr.table_index(level);
        let view = window.table(table);
        let entry = view.get(index);

        let next = if !entry.is_present() {
            let new_table = allocate_table(pool, window)?;
            view.with_mut(|t| t[index].point_to(new_table, PageFlags::TABLE_DEFAULT));
            new_table
        } else if entry.is_huge() {
            return Err(MapError::ParentEntryHugePage(level));
        } else {
            view.with_mut(|t| t[index].add_flags(PageFlags::TABLE_DEFAULT));
            entry.target()
        };

        table = next;
        level = lower;
    }

    let leaf = vaddr.table_index(PageLevel::L1);
    window
        .table(table)
        .with_mut(|t| t[leaf].point_to(frame, PageFlags::TABLE_DEFAULT));
    trace::trace_map(root, page, frame);
    Ok(())
}

/// 新しいフレームを 1 枚取り、ゼロクリアして `page` に張る（eager な mmap）。
///
/// map に失敗したらそのフレームは pool に返す。
pub fn map_anonymous(
    pool: &mut FramePool,
    window: &PhysWindow,
    root: PhysFrame,
    page: VirtPage,
) -> Result<PhysFrame, MapError> {
    let frame = pool.allocate()?;
    window.zero_frame(frame);

    if let Err(e) = map(pool, window, root, page, frame) {
        pool.free(frame);
        return Err(e);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::addr::{PhysAddr, VirtAddr};
    use crate::mem::layout::USER_TEXT_START;
    use crate::mem::walker::translate;
    use crate::testing::SimRam;
    use crate::types::{L2_ENTRY_SIZE, PAGE_SIZE};

    struct Fixture {
        ram: SimRam,
        pool: FramePool,
        root: PhysFrame,
    }

    fn fixture(pool_frames: usize) -> Fixture {
        // 物理 [0, 1MiB)。pool は 0x80000 から。
        let ram = SimRam::new(PhysAddr(0), 256);
        let mut pool = FramePool::new(PhysAddr(0x8_0000).frame(), pool_frames);
        let root = allocate_table(&mut pool, &ram.window()).unwrap();
        Fixture { ram, pool, root }
    }

    fn page(addr: u64) -> VirtPage {
        VirtAddr(addr).page()
    }

    #[test]
    fn mapping_round_trips_through_walk() {
        let mut f = fixture(16);
        let w = f.ram.window();
        let target = PhysAddr(0x9000).frame();

        map(&mut f.pool, &w, f.root, page(USER_TEXT_START), target).unwrap();

        let t = translate(&w, f.root, VirtAddr(USER_TEXT_START + 0x123)).unwrap();
        assert_eq!(t.phys, PhysAddr(0x9123));
        assert_eq!(t.level, PageLevel::L1);
        assert!(t.flags.contains(PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER));
    }

    #[test]
    fn shared_prefix_reuses_intermediate_tables() {
        let mut f = fixture(16);
        let w = f.ram.window();
        let before = f.pool.stats().total_allocations;

        // 1 つ目: L3 / L2 / L1 を新規に作る
        map(&mut f.pool, &w, f.root, page(USER_TEXT_START), PhysAddr(0x9000).frame()).unwrap();
        assert_eq!(f.pool.stats().total_allocations - before, 3);

        // 同じ L4/L3/L2 index: 何も確保しない
        map(&mut f.pool, &w, f.root, page(USER_TEXT_START + PAGE_SIZE), PhysAddr(0xa000).frame()).unwrap();
        assert_eq!(f.pool.stats().total_allocations - before, 3);

        // L2 index だけ違う: L1 を 1 枚だけ
        map(&mut f.pool, &w, f.root, page(USER_TEXT_START + L2_ENTRY_SIZE), PhysAddr(0xb000).frame()).unwrap();
        assert_eq!(f.pool.stats().total_allocations - before, 4);
    }

    #[test]
    fn remapping_replaces_leaf_without_allocating() {
        let mut f = fixture(16);
        let w = f.ram.window();
        let va = USER_TEXT_START + 5 * PAGE_SIZE;

        map(&mut f.pool, &w, f.root, page(va), PhysAddr(0x9000).frame()).unwrap();
        let used = f.pool.stats().total_allocations;
        map(&mut f.pool, &w, f.root, page(va), PhysAddr(0xc000).frame()).unwrap();

        assert_eq!(f.pool.stats().total_allocations, used);
        assert_eq!(translate(&w, f.root, VirtAddr(va)).unwrap().phys, PhysAddr(0xc000));
    }

    #[test]
    fn exhaustion_keeps_partial_tables() {
        // root + L3 までしか取れない
        let mut f = fixture(2);
        let w = f.ram.window();
        let _ = crate::logging::captured();

        let r = map(&mut f.pool, &w, f.root, page(USER_TEXT_START), PhysAddr(0x9000).frame());
        assert_eq!(r, Err(MapError::FrameAllocationFailed));

        // L4 エントリは張られたまま（巻き戻さない）
        let l4 = w.table(f.root);
        assert!(l4.get(VirtAddr(USER_TEXT_START).table_index(PageLevel::L4)).is_present());
        assert!(translate(&w, f.root, VirtAddr(USER_TEXT_START)).is_none());
        assert!(crate::logging::captured().iter().any(|l| l.contains("exhausted")));
    }

    #[test]
    fn refuses_to_descend_into_huge_page() {
        let mut f = fixture(16);
        let w = f.ram.window();

        // L4[0] → L3, L3[0] を 1GiB 大ページにしておく
        let l3 = allocate_table(&mut f.pool, &w).unwrap();
        w.table(f.root)
            .with_mut(|t| t[0].point_to(l3, PageFlags::PRESENT | PageFlags::WRITABLE));
        w.table(l3)
            .with_mut(|t| t[0].point_to(PhysFrame::from_index(0), PageFlags::PRESENT | PageFlags::HUGE));

        let r = map(&mut f.pool, &w, f.root, page(0x20_1000), PhysAddr(0x9000).frame());
        assert_eq!(r, Err(MapError::ParentEntryHugePage(PageLevel::L3)));
    }

    #[test]
    fn anonymous_mapping_is_zeroed() {
        let mut f = fixture(16);
        let w = f.ram.window();

        // 再利用されるフレームにゴミを残しておく
        let dirty = f.pool.allocate().unwrap();
        f.ram.fill(dirty.start_address(), PAGE_SIZE as usize, 0x5a);
        f.pool.free(dirty);

        let frame = map_anonymous(&mut f.pool, &w, f.root, page(USER_TEXT_START)).unwrap();
        assert_eq!(frame, dirty);
        assert!(f.ram.bytes(frame.start_address(), PAGE_SIZE as usize).iter().all(|&b| b == 0));
        assert_eq!(
            translate(&w, f.root, VirtAddr(USER_TEXT_START)).unwrap().phys,
            frame.start_address()
        );
    }

    #[test]
    fn anonymous_mapping_returns_frame_on_failure() {
        // root + データ 1 枚 + L3 で尽きる
        let mut f = fixture(3);
        let w = f.ram.window();

        let r = map_anonymous(&mut f.pool, &w, f.root, page(USER_TEXT_START));
        assert_eq!(r, Err(MapError::FrameAllocationFailed));
        // データフレームは返却済み、root と L3 は残る
        assert_eq!(f.pool.stats().allocated, 2);
    }
}
