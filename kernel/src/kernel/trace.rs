// kernel/src/kernel/trace.rs
//
// 低コスト trace（観測性）を 1 箇所に集約する。
// - frame pool の allocate / free
// - mapper が張った leaf
// - CR3 の切り替え
//
// 設計方針:
// - logging 側に新 API を要求しない（info / info_hex のみで完結）
// - no_std 前提で heap 確保なし（固定文字列 + u64）
// - feature off のときは呼び出し側を含めて何も残らない
//
// feature:
// - mm_trace: 上記すべてを 1 行ずつ出す

use crate::mem::addr::{PhysFrame, VirtPage};

#[inline(always)]
pub fn trace_alloc(frame: PhysFrame) {
    #[cfg(feature = "mm_trace")]
    crate::logging::info_hex("mm_trace alloc", frame.start_address().0);
    #[cfg(not(feature = "mm_trace"))]
    let _ = frame;
}

#[inline(always)]
pub fn trace_free(frame: PhysFrame) {
    #[cfg(feature = "mm_trace")]
    crate::logging::info_hex("mm_trace free", frame.start_address().0);
    #[cfg(not(feature = "mm_trace"))]
    let _ = frame;
}

#[inline(always)]
pub fn trace_map(root: PhysFrame, page: VirtPage, frame: PhysFrame) {
    #[cfg(feature = "mm_trace")]
    {
        crate::logging::info_hex("mm_trace map root", root.start_address().0);
        crate::logging::info_hex(" virt", page.start_address().0);
        crate::logging::info_hex(" phys", frame.start_address().0);
    }
    #[cfg(not(feature = "mm_trace"))]
    {
        let _ = root;
        let _ = page;
        let _ = frame;
    }
}

#[inline(always)]
pub fn trace_switch(from: PhysFrame, to: PhysFrame) {
    #[cfg(feature = "mm_trace")]
    {
        crate::logging::info_hex("mm_trace cr3 from", from.start_address().0);
        crate::logging::info_hex(" to", to.start_address().0);
    }
    #[cfg(not(feature = "mm_trace"))]
    {
        let _ = from;
        let _ = to;
    }
}
