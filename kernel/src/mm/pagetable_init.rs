// src/mm/pagetable_init.rs
//
// 役割：
// - ページテーブル用のフレームを 1 枚確保し、ゼロクリア（全エントリ無効）して返す。
// - root(L4) にも中間テーブル(L3/L2/L1) にも同じ手順を使う。
//
// pool から返ったフレームには前の持ち主のデータが残っている可能性があるので、
// テーブルとして使う前に必ずここを通す。

use crate::mem::addr::PhysFrame;
use crate::mem::phys::PhysWindow;
use crate::mm::{FrameError, FramePool};

pub fn allocate_table(pool: &mut FramePool, window: &PhysWindow) -> Result<PhysFrame, FrameError> {
    let frame = pool.allocate()?;
    window.table(frame).clear();
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::addr::PhysAddr;
    use crate::testing::SimRam;

    #[test]
    fn recycled_frame_comes_back_empty() {
        let ram = SimRam::new(PhysAddr(0), 4);
        let mut pool = FramePool::new(PhysFrame::from_index(1), 2);

        let first = pool.allocate().unwrap();
        ram.fill(first.start_address(), 4096, 0xff);
        pool.free(first);

        let table = allocate_table(&mut pool, &ram.window()).unwrap();
        assert_eq!(table, first);
        assert_eq!(ram.window().table(table).present_count(), 0);
    }

    #[test]
    fn propagates_exhaustion() {
        let ram = SimRam::new(PhysAddr(0), 2);
        let mut pool = FramePool::new(PhysFrame::from_index(1), 1);
        assert!(allocate_table(&mut pool, &ram.window()).is_ok());
        assert_eq!(allocate_table(&mut pool, &ram.window()), Err(FrameError::Exhausted));
    }
}
