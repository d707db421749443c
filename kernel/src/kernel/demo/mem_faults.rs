// kernel/src/kernel/demo/mem_faults.rs
//
// 役割:
// - メモリ管理の fault injection を集約する。
// - evil_double_free / evil_pool_exhaust / pf_demo のような “意図的異常系” をここに閉じ込める。
//
// 方針:
// - 再現性を最優先（起動直後に 1 回だけ）
// - 本体は常にコンパイルし、どれを走らせるかだけを feature で選ぶ（ホストテストから直接叩ける）
// - double free と #PF は fail-stop で終わる（ここから戻らない）

use crate::arch::cpu::ControlRegisters;
use crate::kernel::MemoryManager;
use crate::logging;
use crate::mm::{FrameError, MAX_POOL_FRAMES};
use crate::mem::addr::PhysFrame;

/// 起動直後に fault injection を試す。
/// - 何か注入して戻ってきたら true
pub fn on_boot<C: ControlRegisters>(mm: &mut MemoryManager<C>) -> bool {
    #[cfg(feature = "evil_pool_exhaust")]
    {
        exhaust_pool(mm);
        return true;
    }

    #[cfg(feature = "evil_double_free")]
    {
        double_free(mm);
    }

    #[cfg(all(feature = "pf_demo", target_os = "none", not(test)))]
    {
        touch_unmapped();
    }

    // feature off
    #[allow(unreachable_code)]
    {
        let _ = mm;
        false
    }
}

// -----------------------------------------------------------------------------
// evil_pool_exhaust
// - Exhausted が返るまで allocate し、ちょうど capacity 回で尽きることを確認
// - 取ったフレームはすべて返す
// -----------------------------------------------------------------------------

/// 成功した allocate の回数を返す
pub fn exhaust_pool<C: ControlRegisters>(mm: &mut MemoryManager<C>) -> usize {
    logging::info("evil_pool_exhaust: allocate until exhausted");

    let mut taken: [Option<PhysFrame>; MAX_POOL_FRAMES] = [None; MAX_POOL_FRAMES];
    let mut count = 0;
    loop {
        match mm.allocate_frame() {
            Ok(frame) if count < MAX_POOL_FRAMES => {
                taken[count] = Some(frame);
                count += 1;
            }
            Ok(frame) => {
                // capacity は MAX_POOL_FRAMES 以下なのでここには来ない
                mm.free_frame(frame);
                break;
            }
            Err(FrameError::Exhausted) => break,
        }
    }

    logging::info_u64("evil_pool_exhaust: allocated", count as u64);
    logging::info_u64("evil_pool_exhaust: capacity", mm.pool_stats().capacity as u64);

    for frame in taken.iter().flatten() {
        mm.free_frame(*frame);
    }
    logging::info("evil_pool_exhaust: all frames returned");
    count
}

// -----------------------------------------------------------------------------
// evil_double_free
// - 同じフレームを 2 回 free して、2 回目で fail-stop することを確認
// -----------------------------------------------------------------------------

pub fn double_free<C: ControlRegisters>(mm: &mut MemoryManager<C>) {
    logging::info("evil_double_free: free #1");
    let Ok(frame) = mm.allocate_frame() else {
        logging::error("evil_double_free: pool already exhausted");
        return;
    };
    mm.free_frame(frame);

    logging::info("evil_double_free: free #2 (expect fail-stop)");
    mm.free_frame(frame);

    logging::error("evil_double_free: second free returned");
}

// -----------------------------------------------------------------------------
// pf_demo
// - どこにも map されていない canonical なアドレスを読む → #PF 報告で停止
// -----------------------------------------------------------------------------

/// canonical だが、このカーネルが決して map しない場所（user 空間の天井付近）
pub const PF_DEMO_ADDR: u64 = 0x0000_7fff_ffff_0000;

#[cfg(all(target_os = "none", not(test)))]
pub fn touch_unmapped() {
    logging::info("pf_demo: read unmapped address (expect #PF report)");
    // Safety: わざと #PF を起こす。ハンドラは戻らない。
    let v = unsafe { core::ptr::read_volatile(PF_DEMO_ADDR as *const u64) };
    logging::info_hex("pf_demo: unexpectedly read", v);
}
