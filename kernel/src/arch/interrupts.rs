// kernel/src/arch/interrupts.rs
//
// 役割:
// - IDT に #PF / #DF のハンドラを入れてロードする。
// - #PF は「報告して止まる」だけ。demand paging も復帰もしない。
//
// 設計方針:
// - 例外ハンドラは lock を取らない（ログも lock 無しの fatal 経路だけ使う）
// - CR2 は ControlRegisters 経由で読む（report_page_fault はホストでもテストできる）
// - 報告は 1 回だけ出して fail-stop
//
// 重要:
// - x86_64 crate(0.15.x) の IDT は handler シグネチャが固定。
// - x86-interrupt ABI は nightly 機能なので、ハンドラ本体はベアメタル向けビルドにだけ入れる。

use x86_64::structures::idt::PageFaultErrorCode;

use crate::arch::cpu::{self, ControlRegisters};
use crate::logging;

/// #PF 時に CPU が積んだ情報のうち、報告に使うもの
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageFaultFrame {
    pub rip: u64,
    pub rsp: u64,
    /// ハードウェアのエラーコード（bit0: protection, bit1: write, bit2: user, bit4: ifetch）
    pub err: u64,
}

/// エラーコードを 1 語で
pub fn describe_error(err: u64) -> &'static str {
    let code = PageFaultErrorCode::from_bits_truncate(err);
    let write = code.contains(PageFaultErrorCode::CAUSED_BY_WRITE);

    if code.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
        "instruction fetch"
    } else if code.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
        if write {
            "protection violation (write)"
        } else {
            "protection violation (read)"
        }
    } else if write {
        "not present (write)"
    } else {
        "not present (read)"
    }
}

/// 回復不能な #PF を報告して止まる。
pub fn report_page_fault<C: ControlRegisters>(regs: &C, frame: PageFaultFrame) -> ! {
    let cr2 = regs.fault_address();
    let user = PageFaultErrorCode::from_bits_truncate(frame.err).contains(PageFaultErrorCode::USER_MODE);

    logging::fatal("#PF unrecoverable");
    logging::fatal_hex(" rip", frame.rip);
    logging::fatal_hex(" cr2", cr2.0);
    logging::fatal_hex(" err", frame.err);
    logging::fatal_hex(" rsp", frame.rsp);
    logging::fatal(describe_error(frame.err));
    if user {
        logging::fatal(" from user mode");
    }

    cpu::fail_stop()
}

#[cfg(all(target_os = "none", not(test)))]
pub use self::idt::init;

#[cfg(all(target_os = "none", not(test)))]
mod idt {
    use spin::Once;
    use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

    use super::{report_page_fault, PageFaultFrame};
    use crate::arch::cpu::{self, X86ControlRegisters};
    use crate::logging;

    static IDT: Once<InterruptDescriptorTable> = Once::new();

    /// 2 回目以降の呼び出しは何もしない
    pub fn init() {
        cpu::without_interrupts(|| {
            if IDT.is_completed() {
                return;
            }

            let idt = IDT.call_once(|| {
                let mut idt = InterruptDescriptorTable::new();
                idt.page_fault.set_handler_fn(page_fault_handler);
                idt.double_fault.set_handler_fn(double_fault_handler);
                idt
            });
            idt.load();
            logging::info("arch::interrupts::init: IDT loaded");
        });
    }

    extern "x86-interrupt" fn page_fault_handler(stack_frame: InterruptStackFrame, error_code: PageFaultErrorCode) {
        x86_64::instructions::interrupts::disable();

        report_page_fault(
            &X86ControlRegisters,
            PageFaultFrame {
                rip: stack_frame.instruction_pointer.as_u64(),
                rsp: stack_frame.stack_pointer.as_u64(),
                err: error_code.bits(),
            },
        )
    }

    extern "x86-interrupt" fn double_fault_handler(stack_frame: InterruptStackFrame, error_code: u64) -> ! {
        x86_64::instructions::interrupts::disable();

        logging::fatal("#DF");
        logging::fatal_hex(" err", error_code);
        logging::fatal_hex(" rip", stack_frame.instruction_pointer.as_u64());
        logging::fatal_hex(" rsp", stack_frame.stack_pointer.as_u64());

        cpu::fail_stop()
    }
}
