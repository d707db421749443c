// src/mm/mod.rs
//
// 物理メモリ管理の入り口。
// - 固定容量の frame pool（既定 64 フレーム）を 1 フレーム = 1 ビットの bitmap で管理する。
// - 「最も小さい空き index から」返すので、割り当て順は決定的（テストで再現できる）。
// - 状態は構造体に閉じ込め、グローバルには置かない（所有者が &mut で渡す）。
//
// 不変条件:
// - bitmap の bit i が立っている ⇔ frame i がちょうど 1 人の所有者に割り当て済み
// - capacity 以上の bit は決して立たない
//
// エラー:
// - 枯渇: Err(FrameError::Exhausted)（0 番地のような番兵値は返さない）
// - 未割り当てフレームの free: 致命的。ログを出して fail-stop。

pub mod pagetable_init;

use crate::arch::cpu;
use crate::kernel::trace;
use crate::logging;
use crate::mem::addr::{PhysAddr, PhysFrame};
use crate::mem::layout::LOW_MEMORY_END;
use crate::types::{align_up, MemoryRegion, PAGE_SIZE};

/// 既定の frame pool 容量
pub const DEFAULT_POOL_FRAMES: usize = 64;
/// bitmap の上限（u64 × 16 語）
pub const MAX_POOL_FRAMES: usize = 1024;

const BITMAP_WORDS: usize = MAX_POOL_FRAMES / 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// 空きフレームが無い
    Exhausted,
}

impl FrameError {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameError::Exhausted => "frame pool exhausted",
        }
    }
}

/// pool の構成
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: DEFAULT_POOL_FRAMES,
        }
    }
}

impl PoolConfig {
    /// Cargo feature から決める（pool_large で 256 フレーム）
    pub fn from_features() -> Self {
        if cfg!(feature = "pool_large") {
            PoolConfig { capacity: 256 }
        } else {
            PoolConfig::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// 現在割り当て中のフレーム数
    pub allocated: usize,
    /// これまでに成功した allocate() の回数
    pub total_allocations: u64,
}

/// 物理フレームの固定 pool
pub struct FramePool {
    base: PhysFrame,
    capacity: usize,
    bitmap: [u64; BITMAP_WORDS],
    allocated: usize,
    total_allocations: u64,
}

impl FramePool {
    /// `base` から連続する `capacity` フレームを pool にする（1..=MAX_POOL_FRAMES に丸める）。
    ///
    /// 呼び出し側の前提:
    /// - その物理範囲を他のコードが使っていないこと（ダブルアロケーション防止）。
    pub fn new(base: PhysFrame, capacity: usize) -> Self {
        FramePool {
            base,
            capacity: capacity.clamp(1, MAX_POOL_FRAMES),
            bitmap: [0; BITMAP_WORDS],
            allocated: 0,
            total_allocations: 0,
        }
    }

    /// メモリマップから pool を置ける場所を探す。
    ///
    /// - Usable な領域だけを見る
    /// - 1MiB 未満（BIOS / VGA 領域）は使わない
    /// - 先頭をページ境界に切り上げ、capacity フレームが丸ごと入る最初の領域を選ぶ
    pub fn from_regions<I>(regions: I, config: PoolConfig) -> Option<Self>
    where
        I: IntoIterator<Item = MemoryRegion>,
    {
        let capacity = config.capacity.clamp(1, MAX_POOL_FRAMES);
        let need = capacity as u64 * PAGE_SIZE;

        regions
            .into_iter()
            .filter(|r| r.is_usable())
            .find_map(|r| {
                let start = align_up(r.start_phys.max(LOW_MEMORY_END), PAGE_SIZE)?;
                let end = start.checked_add(need)?;
                (end <= r.end_phys).then(|| FramePool::new(PhysAddr(start).frame(), capacity))
            })
    }

    pub fn base(&self) -> PhysFrame {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            allocated: self.allocated,
            total_allocations: self.total_allocations,
        }
    }

    /// 最も小さい空き index のフレームを割り当てる。
    pub fn allocate(&mut self) -> Result<PhysFrame, FrameError> {
        let Some(index) = self.lowest_free_index() else {
            logging::error("mm: frame pool exhausted");
            logging::info_u64(" capacity", self.capacity as u64);
            return Err(FrameError::Exhausted);
        };

        self.bitmap[index / 64] |= 1u64 << (index % 64);
        self.allocated += 1;
        self.total_allocations += 1;

        let frame = self.frame_at(index);
        trace::trace_alloc(frame);
        Ok(frame)
    }

    /// フレームを pool に返す。
    ///
    /// pool 外・未割り当て（二重 free 含む）は allocator 状態の破損を意味するので
    /// 続行せずに fail-stop する。
    pub fn free(&mut self, frame: PhysFrame) {
        let Some(index) = self.index_of(frame).filter(|&i| self.bit(i)) else {
            logging::fatal("mm: invalid frame free");
            logging::fatal_hex(" addr", frame.start_address().0);
            logging::fatal_hex(" pool_base", self.base.start_address().0);
            cpu::fail_stop();
        };

        self.bitmap[index / 64] &= !(1u64 << (index % 64));
        self.allocated -= 1;
        trace::trace_free(frame);
    }

    pub fn is_allocated(&self, frame: PhysFrame) -> bool {
        self.index_of(frame).is_some_and(|i| self.bit(i))
    }

    fn index_of(&self, frame: PhysFrame) -> Option<usize> {
        let offset = frame.number.checked_sub(self.base.number)?;
        (offset < self.capacity as u64).then_some(offset as usize)
    }

    fn frame_at(&self, index: usize) -> PhysFrame {
        PhysFrame::from_index(self.base.number + index as u64)
    }

    fn bit(&self, index: usize) -> bool {
        self.bitmap[index / 64] & (1u64 << (index % 64)) != 0
    }

    fn lowest_free_index(&self) -> Option<usize> {
        let words = self.capacity.div_ceil(64);
        self.bitmap[..words]
            .iter()
            .enumerate()
            .filter(|(_, &w)| w != u64::MAX)
            .map(|(i, &w)| i * 64 + (!w).trailing_zeros() as usize)
            .find(|&index| index < self.capacity)
    }
}
