// kernel/src/panic.rs
//
// no_std カーネル用 panic ハンドラ。
// - 挙動は「緊急出力（ロック無し） → CPU 停止」に固定する。
// - タスクの CR3 中でも落ちないよう、VGA や lock を取る logging は使わない。
// - 二重 panic は即停止（再入で #DF になりやすい）
// - message の文字列化は行わない（core::fmt を panic 経路に持ち込まない）。

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::cpu;
use crate::logging;

static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if PANIC_IN_PROGRESS.swap(true, Ordering::AcqRel) {
        logging::fatal("[PANIC] re-entered => halt");
        cpu::halt_loop();
    }

    logging::fatal("[PANIC] kernel panic");

    match info.location() {
        Some(loc) => {
            logging::fatal(loc.file());
            logging::fatal_hex(" line", loc.line() as u64);
            logging::fatal_hex(" col", loc.column() as u64);
        }
        None => logging::fatal(" location unknown"),
    }

    cpu::fail_stop()
}
